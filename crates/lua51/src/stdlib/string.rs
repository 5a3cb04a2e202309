// String library
// Implements: len, sub, upper, lower, rep, reverse, byte, char, format
// Pattern matching functions are intentionally absent.

use crate::lib_registry::LibraryModule;
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaResult, LuaState};

pub fn create_string_lib() -> LibraryModule {
    crate::lib_module!("string", {
        "len" => lua_len,
        "sub" => lua_sub,
        "upper" => lua_upper,
        "lower" => lua_lower,
        "rep" => lua_rep,
        "reverse" => lua_reverse,
        "byte" => lua_byte,
        "char" => lua_char,
        "format" => lua_format,
    })
}

fn check_string(l: &mut LuaState, i: usize, fname: &str) -> LuaResult<String> {
    match l.to_rust_string(i as i32) {
        Some(s) => Ok(s),
        None => Err(l.error(format!(
            "bad argument #{} to '{}' (string expected)",
            i, fname
        ))),
    }
}

/// Translate a 1-based, possibly negative string position.
fn str_pos(len: usize, pos: i64, default: i64) -> i64 {
    let pos = if pos == 0 { default } else { pos };
    if pos >= 0 { pos } else { len as i64 + pos + 1 }
}

/// string.len(s)
fn lua_len(l: &mut LuaState) -> LuaResult<usize> {
    let s = check_string(l, 1, "len")?;
    l.push_number(s.len() as f64)?;
    Ok(1)
}

/// string.sub(s, i [, j]) - byte positions, negative counts from the end
fn lua_sub(l: &mut LuaState) -> LuaResult<usize> {
    let s = check_string(l, 1, "sub")?;
    let len = s.len();
    let i = l.get_arg(2).and_then(|v| v.as_integer()).unwrap_or(1);
    let j = l.get_arg(3).and_then(|v| v.as_integer()).unwrap_or(-1);
    let start = str_pos(len, i, 1).max(1) as usize;
    let end = str_pos(len, j, -1).min(len as i64);
    if end < start as i64 {
        l.push_string("")?;
    } else {
        let bytes = &s.as_bytes()[start - 1..end as usize];
        let sub = String::from_utf8_lossy(bytes).into_owned();
        l.push_string(&sub)?;
    }
    Ok(1)
}

/// string.upper(s)
fn lua_upper(l: &mut LuaState) -> LuaResult<usize> {
    let s = check_string(l, 1, "upper")?;
    l.push_string(&s.to_uppercase())?;
    Ok(1)
}

/// string.lower(s)
fn lua_lower(l: &mut LuaState) -> LuaResult<usize> {
    let s = check_string(l, 1, "lower")?;
    l.push_string(&s.to_lowercase())?;
    Ok(1)
}

/// string.rep(s, n)
fn lua_rep(l: &mut LuaState) -> LuaResult<usize> {
    let s = check_string(l, 1, "rep")?;
    let n = l.get_arg(2).and_then(|v| v.as_integer()).unwrap_or(0);
    let out = if n > 0 { s.repeat(n as usize) } else { String::new() };
    l.push_string(&out)?;
    Ok(1)
}

/// string.reverse(s)
fn lua_reverse(l: &mut LuaState) -> LuaResult<usize> {
    let s = check_string(l, 1, "reverse")?;
    let mut bytes = s.into_bytes();
    bytes.reverse();
    let out = String::from_utf8_lossy(&bytes).into_owned();
    l.push_string(&out)?;
    Ok(1)
}

/// string.byte(s [, i [, j]])
fn lua_byte(l: &mut LuaState) -> LuaResult<usize> {
    let s = check_string(l, 1, "byte")?;
    let len = s.len();
    let i = l.get_arg(2).and_then(|v| v.as_integer()).unwrap_or(1);
    let j = l.get_arg(3).and_then(|v| v.as_integer()).unwrap_or(i);
    let start = str_pos(len, i, 1).max(1) as usize;
    let end = str_pos(len, j, -1).min(len as i64);
    let mut count = 0;
    let bytes = s.as_bytes();
    for k in start..=end.max(0) as usize {
        if k == 0 || k > len {
            break;
        }
        l.push_number(bytes[k - 1] as f64)?;
        count += 1;
    }
    Ok(count)
}

/// string.char(...)
fn lua_char(l: &mut LuaState) -> LuaResult<usize> {
    let argc = l.arg_count();
    let mut bytes = Vec::with_capacity(argc);
    for i in 1..=argc {
        let Some(n) = l.get_arg(i).and_then(|v| v.as_integer()) else {
            return Err(l.error(format!("bad argument #{} to 'char' (number expected)", i)));
        };
        if !(0..=255).contains(&n) {
            return Err(l.error(format!("bad argument #{} to 'char' (value out of range)", i)));
        }
        bytes.push(n as u8);
    }
    let out = String::from_utf8_lossy(&bytes).into_owned();
    l.push_string(&out)?;
    Ok(1)
}

/// string.format(fmt, ...) - C-style directives; %d %i %u %c %x %X %o
/// %e %f %g %s %q %% with optional width, zero-fill and left-align.
fn lua_format(l: &mut LuaState) -> LuaResult<usize> {
    let fmt = check_string(l, 1, "format")?;
    let mut out = String::new();
    let mut arg = 1usize;
    let mut chars = fmt.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let mut left_align = false;
        let mut zero_fill = false;
        while let Some(&f) = chars.peek() {
            match f {
                '-' => left_align = true,
                '0' => zero_fill = true,
                '+' | ' ' | '#' => {}
                _ => break,
            }
            chars.next();
        }
        let mut width = 0usize;
        while let Some(&d) = chars.peek() {
            if let Some(v) = d.to_digit(10) {
                width = width * 10 + v as usize;
                chars.next();
            } else {
                break;
            }
        }
        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = 0usize;
            while let Some(&d) = chars.peek() {
                if let Some(v) = d.to_digit(10) {
                    p = p * 10 + v as usize;
                    chars.next();
                } else {
                    break;
                }
            }
            precision = Some(p);
        }
        let Some(spec) = chars.next() else {
            return Err(l.error("invalid format string to 'format'"));
        };
        if spec == '%' {
            out.push('%');
            continue;
        }
        arg += 1;
        let piece = match spec {
            'd' | 'i' => {
                let n = format_number_arg(l, arg)? as i64;
                n.to_string()
            }
            'u' => {
                let n = format_number_arg(l, arg)? as i64;
                (n as u64).to_string()
            }
            'c' => {
                let n = format_number_arg(l, arg)? as u32;
                char::from_u32(n).map(String::from).unwrap_or_default()
            }
            'x' => format!("{:x}", format_number_arg(l, arg)? as i64),
            'X' => format!("{:X}", format_number_arg(l, arg)? as i64),
            'o' => format!("{:o}", format_number_arg(l, arg)? as i64),
            'e' => format!("{:e}", format_number_arg(l, arg)?),
            'f' => {
                let n = format_number_arg(l, arg)?;
                format!("{:.*}", precision.unwrap_or(6), n)
            }
            'g' => {
                let n = format_number_arg(l, arg)?;
                crate::lua_vm::number_to_display(n)
            }
            's' => {
                let v = l.get_arg(arg).unwrap_or(LuaValue::Nil);
                let s = l.display_value(&v);
                match precision {
                    Some(p) if p < s.len() => s[..p].to_string(),
                    _ => s,
                }
            }
            'q' => {
                let v = l.get_arg(arg).unwrap_or(LuaValue::Nil);
                quote_string(&l.display_value(&v))
            }
            _ => {
                return Err(l.error(format!(
                    "invalid option '%{}' to 'format'",
                    spec
                )));
            }
        };
        out.push_str(&pad(piece, width, left_align, zero_fill));
    }
    l.push_string(&out)?;
    Ok(1)
}

fn format_number_arg(l: &mut LuaState, i: usize) -> LuaResult<f64> {
    let v = l.get_arg(i).unwrap_or(LuaValue::Nil);
    match l.coerce_number(&v) {
        Some(n) => Ok(n),
        None => Err(l.error(format!(
            "bad argument #{} to 'format' (number expected, got {})",
            i,
            v.type_name()
        ))),
    }
}

fn pad(s: String, width: usize, left_align: bool, zero_fill: bool) -> String {
    if s.len() >= width {
        return s;
    }
    let fill = width - s.len();
    if left_align {
        format!("{}{}", s, " ".repeat(fill))
    } else if zero_fill {
        let (sign, digits) = match s.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", s.as_str()),
        };
        format!("{}{}{}", sign, "0".repeat(fill), digits)
    } else {
        format!("{}{}", " ".repeat(fill), s)
    }
}

/// %q: quote a string so the reader can load it back.
fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
