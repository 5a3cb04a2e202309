// Basic library (_G global functions)
// Implements: print, type, tostring, tonumber, assert, error, select,
// ipairs, pairs, next, unpack, rawget, rawset, rawequal, pcall, xpcall,
// collectgarbage, load, loadstring, dofile

use crate::lib_registry::LibraryModule;
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaResult, LuaState};

pub fn create_basic_lib() -> LibraryModule {
    crate::lib_module!("_G", {
        "print" => lua_print,
        "type" => lua_type,
        "tostring" => lua_tostring,
        "tonumber" => lua_tonumber,
        "assert" => lua_assert,
        "error" => lua_error,
        "select" => lua_select,
        "ipairs" => lua_ipairs,
        "pairs" => lua_pairs,
        "next" => lua_next,
        "unpack" => lua_unpack,
        "rawget" => lua_rawget,
        "rawset" => lua_rawset,
        "rawequal" => lua_rawequal,
        "pcall" => lua_pcall,
        "xpcall" => lua_xpcall,
        "collectgarbage" => lua_collectgarbage,
        "load" => lua_load,
        "loadstring" => lua_load,
        "dofile" => lua_dofile,
    })
}

/// print(...) - write tab-separated values and a newline to stdout
fn lua_print(l: &mut LuaState) -> LuaResult<usize> {
    let argc = l.arg_count();
    let mut out = String::new();
    for i in 1..=argc {
        let v = l.get_arg(i).unwrap_or(LuaValue::Nil);
        out.push_str(&l.display_value(&v));
        if i < argc {
            out.push('\t');
        }
    }
    println!("{}", out);
    Ok(0)
}

/// type(v) - type name of a value
fn lua_type(l: &mut LuaState) -> LuaResult<usize> {
    let Some(v) = l.get_arg(1) else {
        return Err(l.error("bad argument #1 to 'type' (value expected)"));
    };
    l.push_string(v.type_name())?;
    Ok(1)
}

/// tostring(v) - convert any value to its display string
fn lua_tostring(l: &mut LuaState) -> LuaResult<usize> {
    let v = l.get_arg(1).unwrap_or(LuaValue::Nil);
    let s = l.display_value(&v);
    l.push_string(&s)?;
    Ok(1)
}

/// tonumber(v [, base]) - numeric coercion; nil when not convertible
fn lua_tonumber(l: &mut LuaState) -> LuaResult<usize> {
    let v = l.get_arg(1).unwrap_or(LuaValue::Nil);
    match l.get_arg(2).and_then(|b| b.as_integer()) {
        None | Some(10) => match l.coerce_number(&v) {
            Some(n) => l.push_number(n)?,
            None => l.push_nil()?,
        },
        Some(base) => {
            if !(2..=36).contains(&base) {
                return Err(l.error("bad argument #2 to 'tonumber' (base out of range)"));
            }
            let parsed = l
                .to_rust_string(1)
                .and_then(|s| i64::from_str_radix(s.trim(), base as u32).ok());
            match parsed {
                Some(n) => l.push_number(n as f64)?,
                None => l.push_nil()?,
            }
        }
    }
    Ok(1)
}

/// assert(v [, message]) - raise when v is falsy, pass arguments through
fn lua_assert(l: &mut LuaState) -> LuaResult<usize> {
    let argc = l.arg_count();
    let v = l.get_arg(1).unwrap_or(LuaValue::Nil);
    if v.is_falsy() {
        return match l.get_arg(2) {
            Some(msg) if !msg.is_none_or_nil() => Err(l.raise_value(msg)),
            _ => Err(l.error("assertion failed!")),
        };
    }
    Ok(argc)
}

/// error(message [, level]) - raise; string messages gain a position
fn lua_error(l: &mut LuaState) -> LuaResult<usize> {
    let v = l.get_arg(1).unwrap_or(LuaValue::Nil);
    let level = l.get_arg(2).and_then(|n| n.as_integer()).unwrap_or(1);
    if level > 0 {
        if let LuaValue::Str(id) = v {
            let msg = l.pool.string_str(id).to_string();
            let positioned = format!("{}{}", l.where_string(level as usize), msg);
            let value = l.create_string(&positioned);
            return Err(l.raise_value(value));
        }
    }
    Err(l.raise_value(v))
}

/// select('#', ...) or select(n, ...)
fn lua_select(l: &mut LuaState) -> LuaResult<usize> {
    let argc = l.arg_count();
    let first = l.get_arg(1).unwrap_or(LuaValue::Nil);
    if let LuaValue::Str(id) = first {
        if l.pool.string_str(id) == "#" {
            l.push_number((argc - 1) as f64)?;
            return Ok(1);
        }
    }
    let Some(n) = first.as_integer().filter(|n| *n >= 1) else {
        return Err(l.error("bad argument #1 to 'select' (number expected)"));
    };
    let n = n as usize;
    if n >= argc {
        return Ok(0);
    }
    // arguments n+1.. are already in place on top of the frame
    let mut count = 0;
    for i in (n + 1)..=argc {
        let v = l.get_arg(i).unwrap_or(LuaValue::Nil);
        l.push_value(v)?;
        count += 1;
    }
    Ok(count)
}

/// Iterator behind ipairs: inext(t, i) -> i+1, t[i+1] until nil
fn lua_inext(l: &mut LuaState) -> LuaResult<usize> {
    let Some(t) = l.to_table(1) else {
        return Err(l.raise(LuaError::ExpectedTable, "bad argument #1 to 'ipairs' (table expected)"));
    };
    let i = l.get_arg(2).and_then(|v| v.as_integer()).unwrap_or(0) + 1;
    let v = l.pool.table(t).get_int(i);
    if v.is_nil() {
        l.push_nil()?;
        Ok(1)
    } else {
        l.push_number(i as f64)?;
        l.push_value(v)?;
        Ok(2)
    }
}

/// ipairs(t) -> inext, t, 0
fn lua_ipairs(l: &mut LuaState) -> LuaResult<usize> {
    let Some(t) = l.get_arg(1).filter(|v| v.is_table()) else {
        return Err(l.raise(LuaError::ExpectedTable, "bad argument #1 to 'ipairs' (table expected)"));
    };
    l.push_cfunction(lua_inext)?;
    l.push_value(t)?;
    l.push_number(0.0)?;
    Ok(3)
}

/// pairs(t) -> next, t, nil
fn lua_pairs(l: &mut LuaState) -> LuaResult<usize> {
    let Some(t) = l.get_arg(1).filter(|v| v.is_table()) else {
        return Err(l.raise(LuaError::ExpectedTable, "bad argument #1 to 'pairs' (table expected)"));
    };
    l.push_cfunction(lua_next)?;
    l.push_value(t)?;
    l.push_nil()?;
    Ok(3)
}

/// next(t [, key]) - raw iteration step
fn lua_next(l: &mut LuaState) -> LuaResult<usize> {
    let Some(t) = l.to_table(1) else {
        return Err(l.raise(LuaError::ExpectedTable, "bad argument #1 to 'next' (table expected)"));
    };
    let key = l.get_arg(2).unwrap_or(LuaValue::Nil);
    match l.pool.table(t).next(&key) {
        Some((k, v)) => {
            l.push_value(k)?;
            l.push_value(v)?;
            Ok(2)
        }
        None => {
            l.push_nil()?;
            Ok(1)
        }
    }
}

/// unpack(t [, i [, j]]) - spread the array slice onto the stack
fn lua_unpack(l: &mut LuaState) -> LuaResult<usize> {
    let Some(t) = l.to_table(1) else {
        return Err(l.raise(LuaError::ExpectedTable, "bad argument #1 to 'unpack' (table expected)"));
    };
    let i = l.get_arg(2).and_then(|v| v.as_integer()).unwrap_or(1);
    let j = l
        .get_arg(3)
        .and_then(|v| v.as_integer())
        .unwrap_or_else(|| l.pool.table(t).len() as i64);
    let mut count = 0;
    for k in i..=j {
        let v = l.pool.table(t).get_int(k);
        l.push_value(v)?;
        count += 1;
    }
    Ok(count)
}

/// rawget(t, k)
fn lua_rawget(l: &mut LuaState) -> LuaResult<usize> {
    let Some(t) = l.to_table(1) else {
        return Err(l.raise(LuaError::ExpectedTable, "bad argument #1 to 'rawget' (table expected)"));
    };
    let k = l.get_arg(2).unwrap_or(LuaValue::Nil);
    let v = l.pool.table(t).get(&k);
    l.push_value(v)?;
    Ok(1)
}

/// rawset(t, k, v) -> t
fn lua_rawset(l: &mut LuaState) -> LuaResult<usize> {
    let Some(tv) = l.get_arg(1).filter(|v| v.is_table()) else {
        return Err(l.raise(LuaError::ExpectedTable, "bad argument #1 to 'rawset' (table expected)"));
    };
    let t = tv.as_table_id().expect("checked table");
    let k = l.get_arg(2).unwrap_or(LuaValue::Nil);
    let v = l.get_arg(3).unwrap_or(LuaValue::Nil);
    l.table_set_checked(t, k, v)?;
    l.push_value(tv)?;
    Ok(1)
}

/// rawequal(a, b) - identity / raw value equality
fn lua_rawequal(l: &mut LuaState) -> LuaResult<usize> {
    let a = l.get_arg(1).unwrap_or(LuaValue::Nil);
    let b = l.get_arg(2).unwrap_or(LuaValue::Nil);
    l.push_boolean(a.raw_equal(&b))?;
    Ok(1)
}

/// Shift the current frame's values up one slot and plant a boolean at
/// the bottom, turning call results into pcall results.
fn prepend_boolean(l: &mut LuaState, at: usize, flag: bool) -> LuaResult<usize> {
    l.push_value(LuaValue::Nil)?;
    for i in ((at + 1)..l.top).rev() {
        let below = l.stack[i - 1];
        l.stack[i] = below;
    }
    l.stack[at] = LuaValue::boolean(flag);
    Ok(l.top - at)
}

/// pcall(f, ...) - protected call boundary
fn lua_pcall(l: &mut LuaState) -> LuaResult<usize> {
    if l.arg_count() == 0 {
        return Err(l.error("bad argument #1 to 'pcall' (value expected)"));
    }
    let func_index = l.current_base();
    let nargs = l.arg_count() - 1;
    let ok = l.protected_call(func_index, nargs)?;
    prepend_boolean(l, func_index, ok)
}

/// xpcall(f, handler) - protected call with an error handler
fn lua_xpcall(l: &mut LuaState) -> LuaResult<usize> {
    let Some(f) = l.get_arg(1) else {
        return Err(l.error("bad argument #1 to 'xpcall' (value expected)"));
    };
    let Some(handler) = l.get_arg(2).filter(|v| v.is_function()) else {
        return Err(l.error("bad argument #2 to 'xpcall' (function expected)"));
    };
    let fidx = l.top;
    l.push_value(f)?;
    let ok = l.protected_call(fidx, 0)?;
    if ok {
        return prepend_boolean(l, fidx, true);
    }
    // The raised value is on top; run the handler over it.
    let err = l.stack[fidx];
    let hidx = l.top;
    l.push_value(handler)?;
    l.push_value(err)?;
    l.do_call(hidx, 1, 1)?;
    let handled = l.stack[hidx];
    l.stack[fidx] = LuaValue::boolean(false);
    l.stack[fidx + 1] = handled;
    let drop_to = fidx + 2;
    for i in drop_to..l.top {
        l.stack[i] = LuaValue::Nil;
    }
    l.top = drop_to;
    Ok(2)
}

/// collectgarbage([opt]) - "collect" runs a full cycle, "count"
/// reports the live object count
fn lua_collectgarbage(l: &mut LuaState) -> LuaResult<usize> {
    let opt = l.to_rust_string(1).unwrap_or_else(|| "collect".to_string());
    match opt.as_str() {
        "collect" | "step" => {
            l.collect_garbage();
            l.push_number(0.0)?;
        }
        "count" => {
            let n = l.gc_object_count();
            l.push_number(n as f64)?;
        }
        _ => {
            return Err(l.error(format!("bad argument #1 to 'collectgarbage' (invalid option '{}')", opt)));
        }
    }
    Ok(1)
}

/// load(source [, chunkname]) / loadstring - compile without running.
/// Returns the closure, or nil plus the compile error message.
fn lua_load(l: &mut LuaState) -> LuaResult<usize> {
    let Some(source) = l.to_rust_string(1) else {
        return Err(l.error("bad argument #1 to 'load' (string expected)"));
    };
    let chunkname = l
        .to_rust_string(2)
        .unwrap_or_else(|| "=(load)".to_string());
    match l.load(&source, &chunkname) {
        Ok(()) => Ok(1),
        Err(_) => {
            let msg = l.error_message().to_string();
            l.push_nil()?;
            l.push_string(&msg)?;
            Ok(2)
        }
    }
}

/// dofile(filename) - load and run a file, passing results through
fn lua_dofile(l: &mut LuaState) -> LuaResult<usize> {
    let Some(path) = l.to_rust_string(1) else {
        return Err(l.error("bad argument #1 to 'dofile' (string expected)"));
    };
    let source = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => return Err(l.error(format!("cannot open {}: {}", path, e))),
    };
    let bottom = l.top;
    l.load(&source, &path)?;
    l.do_call(bottom, 0, crate::lua_vm::LUA_MULTRET)?;
    Ok(l.top - bottom)
}
