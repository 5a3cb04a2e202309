use lua51::{LuaError, LuaState};
use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

const VERSION: &str = "Lua51-RS 0.1 (Lua 5.1 compatible)";

fn print_usage() {
    eprintln!("usage: lua51 [options] [script]");
    eprintln!("Available options are:");
    eprintln!("  -e stat          execute string 'stat'");
    eprintln!("  --execute stat   same as -e");
    eprintln!("  -i               enter interactive mode");
    eprintln!("  --interactive    same as -i");
    eprintln!("  -v               show version information");
}

#[derive(Default)]
struct Options {
    execute_strings: Vec<String>,
    interactive: bool,
    script_file: Option<String>,
    show_version: bool,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options::default();
    let mut i = 1;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "-e" | "--execute" => {
                i += 1;
                if i >= args.len() {
                    return Err(format!("'{}' needs argument", arg));
                }
                opts.execute_strings.push(args[i].clone());
            }
            "-i" | "--interactive" => {
                opts.interactive = true;
            }
            "-v" | "--version" => {
                opts.show_version = true;
            }
            _ if arg.starts_with('-') => {
                return Err(format!("unrecognized option '{}'", arg));
            }
            _ => {
                opts.script_file = Some(arg.clone());
            }
        }
        i += 1;
    }
    Ok(opts)
}

fn report(l: &LuaState, kind: LuaError) {
    let err = l.full_error(kind);
    eprintln!("lua51: {}", err);
}

fn execute_source(l: &mut LuaState, source: &str, chunkname: String) -> bool {
    match l.execute_named(source, chunkname) {
        Ok(_) => true,
        Err(e) => {
            report(l, e);
            false
        }
    }
}

fn execute_file(l: &mut LuaState, path: &str) -> bool {
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("lua51: cannot open {}: {}", path, e);
            return false;
        }
    };
    execute_source(l, &source, format!("@{}", path))
}

fn run_repl(l: &mut LuaState) {
    println!("{}", VERSION);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let Some(Ok(line)) = lines.next() else {
            break; // EOF
        };
        let trimmed = line.trim();
        if trimmed == "exit" || trimmed == "quit" {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }
        // expressions print their results, statements just run
        let as_expr = format!("return {}", trimmed);
        let result = l
            .execute_named(&as_expr, "=stdin".to_string())
            .or_else(|_| l.execute_named(trimmed, "=stdin".to_string()));
        match result {
            Ok(values) => {
                if !values.is_empty() {
                    let rendered: Vec<String> =
                        values.iter().map(|v| l.display_value(v)).collect();
                    println!("{}", rendered.join("\t"));
                }
            }
            Err(e) => report(l, e),
        }
    }
}

fn main() -> ExitCode {
    let opts = match parse_args() {
        Ok(o) => o,
        Err(msg) => {
            eprintln!("lua51: {}", msg);
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    if opts.show_version {
        println!("{}", VERSION);
        return ExitCode::SUCCESS;
    }

    let no_work = opts.execute_strings.is_empty()
        && opts.script_file.is_none()
        && !opts.interactive;
    if no_work {
        print_usage();
        return ExitCode::SUCCESS;
    }

    let mut l = LuaState::new();
    if let Err(e) = l.open_libs() {
        report(&l, e);
        return ExitCode::FAILURE;
    }

    for code in &opts.execute_strings {
        if !execute_source(&mut l, code, "=(command line)".to_string()) {
            return ExitCode::FAILURE;
        }
    }

    if let Some(path) = &opts.script_file {
        if !execute_file(&mut l, path) {
            return ExitCode::FAILURE;
        }
    }

    if opts.interactive {
        run_repl(&mut l);
    }

    ExitCode::SUCCESS
}
