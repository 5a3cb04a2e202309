// Math library
// Thin wrappers over the IEEE-754 double operations of the host.

use crate::lib_registry::LibraryModule;
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaResult, LuaState};

pub fn create_math_lib() -> LibraryModule {
    crate::lib_module!("math", {
        "abs" => lua_abs,
        "ceil" => lua_ceil,
        "floor" => lua_floor,
        "sqrt" => lua_sqrt,
        "exp" => lua_exp,
        "log" => lua_log,
        "log10" => lua_log10,
        "sin" => lua_sin,
        "cos" => lua_cos,
        "tan" => lua_tan,
        "asin" => lua_asin,
        "acos" => lua_acos,
        "atan" => lua_atan,
        "fmod" => lua_fmod,
        "modf" => lua_modf,
        "pow" => lua_pow,
        "max" => lua_max,
        "min" => lua_min,
    })
    .with_value("pi", |_| LuaValue::number(std::f64::consts::PI))
    .with_value("huge", |_| LuaValue::number(f64::INFINITY))
}

fn check_number(l: &mut LuaState, i: usize, fname: &str) -> LuaResult<f64> {
    match l.to_number(i as i32) {
        Some(n) => Ok(n),
        None => Err(l.error(format!(
            "bad argument #{} to '{}' (number expected)",
            i, fname
        ))),
    }
}

macro_rules! unary_math {
    ($rust_name:ident, $lua_name:expr, $op:expr) => {
        fn $rust_name(l: &mut LuaState) -> LuaResult<usize> {
            let n = check_number(l, 1, $lua_name)?;
            let f: fn(f64) -> f64 = $op;
            l.push_number(f(n))?;
            Ok(1)
        }
    };
}

unary_math!(lua_abs, "abs", f64::abs);
unary_math!(lua_ceil, "ceil", f64::ceil);
unary_math!(lua_floor, "floor", f64::floor);
unary_math!(lua_sqrt, "sqrt", f64::sqrt);
unary_math!(lua_exp, "exp", f64::exp);
unary_math!(lua_log, "log", f64::ln);
unary_math!(lua_log10, "log10", f64::log10);
unary_math!(lua_sin, "sin", f64::sin);
unary_math!(lua_cos, "cos", f64::cos);
unary_math!(lua_tan, "tan", f64::tan);
unary_math!(lua_asin, "asin", f64::asin);
unary_math!(lua_acos, "acos", f64::acos);
unary_math!(lua_atan, "atan", f64::atan);

/// math.fmod(x, y) - remainder with the sign of x
fn lua_fmod(l: &mut LuaState) -> LuaResult<usize> {
    let x = check_number(l, 1, "fmod")?;
    let y = check_number(l, 2, "fmod")?;
    l.push_number(x % y)?;
    Ok(1)
}

/// math.modf(x) - integral and fractional parts
fn lua_modf(l: &mut LuaState) -> LuaResult<usize> {
    let x = check_number(l, 1, "modf")?;
    l.push_number(x.trunc())?;
    l.push_number(x.fract())?;
    Ok(2)
}

/// math.pow(x, y)
fn lua_pow(l: &mut LuaState) -> LuaResult<usize> {
    let x = check_number(l, 1, "pow")?;
    let y = check_number(l, 2, "pow")?;
    l.push_number(x.powf(y))?;
    Ok(1)
}

/// math.max(...)
fn lua_max(l: &mut LuaState) -> LuaResult<usize> {
    let mut best = check_number(l, 1, "max")?;
    for i in 2..=l.arg_count() {
        let n = check_number(l, i, "max")?;
        if n > best {
            best = n;
        }
    }
    l.push_number(best)?;
    Ok(1)
}

/// math.min(...)
fn lua_min(l: &mut LuaState) -> LuaResult<usize> {
    let mut best = check_number(l, 1, "min")?;
    for i in 2..=l.arg_count() {
        let n = check_number(l, i, "min")?;
        if n < best {
            best = n;
        }
    }
    l.push_number(best)?;
    Ok(1)
}
