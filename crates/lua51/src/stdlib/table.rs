// Table library
// Implements: insert, remove, concat, maxn, sort

use crate::gc::TableId;
use crate::lib_registry::LibraryModule;
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaResult, LuaState};

pub fn create_table_lib() -> LibraryModule {
    crate::lib_module!("table", {
        "insert" => lua_insert,
        "remove" => lua_remove,
        "concat" => lua_concat,
        "maxn" => lua_maxn,
        "sort" => lua_sort,
    })
}

fn check_table(l: &mut LuaState, i: usize, fname: &str) -> LuaResult<TableId> {
    match l.to_table(i as i32) {
        Some(t) => Ok(t),
        None => Err(l.raise(
            LuaError::ExpectedTable,
            format!("bad argument #{} to '{}' (table expected)", i, fname),
        )),
    }
}

/// table.insert(t, v) appends; table.insert(t, pos, v) shifts up
fn lua_insert(l: &mut LuaState) -> LuaResult<usize> {
    let t = check_table(l, 1, "insert")?;
    let len = l.pool.table(t).len() as i64;
    match l.arg_count() {
        2 => {
            let v = l.get_arg(2).unwrap_or(LuaValue::Nil);
            l.pool.table_mut(t).set_int(len + 1, v);
        }
        3 => {
            let Some(pos) = l.get_arg(2).and_then(|v| v.as_integer()) else {
                return Err(l.error("bad argument #2 to 'insert' (number expected)"));
            };
            let v = l.get_arg(3).unwrap_or(LuaValue::Nil);
            let mut i = len;
            while i >= pos {
                let moved = l.pool.table(t).get_int(i);
                l.pool.table_mut(t).set_int(i + 1, moved);
                i -= 1;
            }
            l.pool.table_mut(t).set_int(pos, v);
        }
        _ => return Err(l.error("wrong number of arguments to 'insert'")),
    }
    Ok(0)
}

/// table.remove(t [, pos]) - shift down, return the removed value
fn lua_remove(l: &mut LuaState) -> LuaResult<usize> {
    let t = check_table(l, 1, "remove")?;
    let len = l.pool.table(t).len() as i64;
    let pos = l.get_arg(2).and_then(|v| v.as_integer()).unwrap_or(len);
    if len == 0 {
        l.push_nil()?;
        return Ok(1);
    }
    let removed = l.pool.table(t).get_int(pos);
    for i in pos..len {
        let moved = l.pool.table(t).get_int(i + 1);
        l.pool.table_mut(t).set_int(i, moved);
    }
    l.pool.table_mut(t).set_int(len, LuaValue::Nil);
    l.push_value(removed)?;
    Ok(1)
}

/// table.concat(t [, sep [, i [, j]]])
fn lua_concat(l: &mut LuaState) -> LuaResult<usize> {
    let t = check_table(l, 1, "concat")?;
    let sep = l.to_rust_string(2).unwrap_or_default();
    let i = l.get_arg(3).and_then(|v| v.as_integer()).unwrap_or(1);
    let j = l
        .get_arg(4)
        .and_then(|v| v.as_integer())
        .unwrap_or_else(|| l.pool.table(t).len() as i64);
    let mut out = String::new();
    for k in i..=j {
        let v = l.pool.table(t).get_int(k);
        match v {
            LuaValue::Str(id) => out.push_str(l.pool.string_str(id)),
            LuaValue::Number(n) => out.push_str(&crate::lua_vm::number_to_display(n)),
            _ => {
                return Err(l.error(format!(
                    "invalid value (at index {}) in table for 'concat'",
                    k
                )));
            }
        }
        if k < j {
            out.push_str(&sep);
        }
    }
    l.push_string(&out)?;
    Ok(1)
}

/// table.maxn(t) - largest positive numeric key
fn lua_maxn(l: &mut LuaState) -> LuaResult<usize> {
    let t = check_table(l, 1, "maxn")?;
    let mut max = 0.0f64;
    let mut key = LuaValue::Nil;
    while let Some((k, _)) = l.pool.table(t).next(&key) {
        if let LuaValue::Number(n) = k {
            if n > max {
                max = n;
            }
        }
        key = k;
    }
    l.push_number(max)?;
    Ok(1)
}

/// table.sort(t [, comp]) - in-place sort of the array slice 1..#t.
/// The comparator re-enters the VM, so a binary insertion-free simple
/// sort keeps the call pattern predictable.
fn lua_sort(l: &mut LuaState) -> LuaResult<usize> {
    let t = check_table(l, 1, "sort")?;
    let comp = l.get_arg(2).filter(|v| v.is_function());
    let len = l.pool.table(t).len() as i64;
    let mut values: Vec<LuaValue> = (1..=len).map(|i| l.pool.table(t).get_int(i)).collect();

    // Insertion sort: O(n^2) comparisons but stable and re-entrant safe.
    for i in 1..values.len() {
        let mut j = i;
        while j > 0 {
            let swap = sort_less(l, &comp, &values[j], &values[j - 1])?;
            if !swap {
                break;
            }
            values.swap(j, j - 1);
            j -= 1;
        }
    }

    for (i, v) in values.into_iter().enumerate() {
        l.pool.table_mut(t).set_int(i as i64 + 1, v);
    }
    Ok(0)
}

fn sort_less(
    l: &mut LuaState,
    comp: &Option<LuaValue>,
    a: &LuaValue,
    b: &LuaValue,
) -> LuaResult<bool> {
    match comp {
        Some(f) => {
            let fidx = l.top;
            l.push_value(*f)?;
            l.push_value(*a)?;
            l.push_value(*b)?;
            l.do_call(fidx, 2, 1)?;
            let r = l.stack[fidx].is_truthy();
            l.pop(1);
            Ok(r)
        }
        None => match (a, b) {
            (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x < y),
            (LuaValue::Str(x), LuaValue::Str(y)) => {
                Ok(l.pool.string(*x).as_bytes() < l.pool.string(*y).as_bytes())
            }
            _ => Err(l.error(format!(
                "attempt to compare {} with {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}
