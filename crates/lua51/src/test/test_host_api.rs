/// The embedding API: stack discipline, host functions, re-entrancy.
use crate::lua_value::LuaValue;
use crate::lua_vm::{LUA_MULTRET, LuaResult, LuaState};

fn state() -> LuaState {
    let mut vm = LuaState::new();
    vm.open_libs().expect("open libs");
    vm
}

/// addall(...) - sums every numeric argument
fn host_add_all(l: &mut LuaState) -> LuaResult<usize> {
    let mut sum = 0.0;
    for i in 1..=l.arg_count() {
        sum += l.to_number(i as i32).unwrap_or(0.0);
    }
    l.push_number(sum)?;
    Ok(1)
}

/// calltwice(f) - invokes its argument twice (host -> script)
fn host_call_twice(l: &mut LuaState) -> LuaResult<usize> {
    let f = l.get_arg(1).unwrap_or(LuaValue::Nil);
    for _ in 0..2 {
        l.push_value(f)?;
        l.call(0, 0)?;
    }
    Ok(0)
}

/// three() - leaves three results
fn host_three(l: &mut LuaState) -> LuaResult<usize> {
    l.push_number(1.0)?;
    l.push_number(2.0)?;
    l.push_number(3.0)?;
    Ok(3)
}

#[test]
fn test_register_and_call_host_function() {
    let mut vm = state();
    vm.register("addall", host_add_all).expect("register");
    let results = vm.execute_string("return addall(1, 2, 3, 4)").expect("run");
    assert_eq!(results[0].as_number(), Some(10.0));
}

#[test]
fn test_register_qualified_name() {
    let mut vm = state();
    vm.register("acme.util.sum", host_add_all).expect("register");
    let results = vm
        .execute_string("return acme.util.sum(20, 22)")
        .expect("run");
    assert_eq!(results[0].as_number(), Some(42.0));
}

#[test]
fn test_host_function_multiple_results() {
    let mut vm = state();
    vm.register("three", host_three).expect("register");
    vm.execute_string(
        r##"
        local a, b, c = three()
        assert(a == 1 and b == 2 and c == 3)
        -- truncated and padded forms
        local x = three()
        assert(x == 1)
        local p, q, r, s = three()
        assert(r == 3 and s == nil)
        assert(select("#", three()) == 3)
        "##,
    )
    .expect("run");
}

#[test]
fn test_host_calls_script_reentrantly() {
    let mut vm = state();
    vm.register("calltwice", host_call_twice).expect("register");
    vm.execute_string(
        r#"
        local n = 0
        calltwice(function() n = n + 1 end)
        assert(n == 2)
        "#,
    )
    .expect("run");
}

#[test]
fn test_push_and_read_stack() {
    let mut vm = state();
    vm.push_number(1.5).expect("push");
    vm.push_string("s").expect("push");
    vm.push_boolean(true).expect("push");
    vm.push_nil().expect("push");
    assert_eq!(vm.get_top(), 4);
    assert!(vm.is_number(1));
    assert!(vm.is_string(2));
    assert!(vm.is_boolean(3));
    assert!(vm.is_nil(4));
    assert!(vm.is_none_or_nil(9));
    assert_eq!(vm.to_number(-4), Some(1.5));
    assert!(vm.to_boolean(-2));
    vm.set_top(1).expect("set_top");
    assert_eq!(vm.get_top(), 1);
    vm.pop(1);
    assert_eq!(vm.get_top(), 0);
}

#[test]
fn test_call_from_host_with_results() {
    let mut vm = state();
    vm.execute_string("function mul(a, b) return a * b end")
        .expect("define");
    let f = vm.get_global("mul");
    vm.push_value(f).expect("push f");
    vm.push_number(6.0).expect("push arg");
    vm.push_number(7.0).expect("push arg");
    vm.call(2, 1).expect("call");
    assert_eq!(vm.get_top(), 1);
    assert_eq!(vm.to_number(-1), Some(42.0));
    vm.pop(1);
}

#[test]
fn test_call_result_padding() {
    let mut vm = state();
    vm.execute_string("function one() return 'only' end")
        .expect("define");
    let f = vm.get_global("one");
    vm.push_value(f).expect("push");
    vm.call(0, 3).expect("call");
    // caller asked for three: one real result, two nils
    assert_eq!(vm.get_top(), 3);
    assert_eq!(vm.to_rust_string(1).as_deref(), Some("only"));
    assert!(vm.is_nil(2));
    assert!(vm.is_nil(3));
    vm.pop(3);
}

#[test]
fn test_multret_call_from_host() {
    let mut vm = state();
    vm.execute_string("function spread() return 1, 2, 3 end")
        .expect("define");
    let f = vm.get_global("spread");
    let before = vm.get_top();
    vm.push_value(f).expect("push");
    vm.call(0, LUA_MULTRET).expect("call");
    assert_eq!(vm.get_top(), before + 3);
    vm.pop(3);
}

#[test]
fn test_field_access_api() {
    let mut vm = state();
    vm.new_table().expect("table");
    vm.push_number(5.0).expect("push");
    vm.set_field(-2, "x").expect("set x");
    vm.get_field(-1, "x").expect("get x");
    assert_eq!(vm.to_number(-1), Some(5.0));
    vm.pop(1);
    vm.get_field(-1, "missing").expect("get missing");
    assert!(vm.is_nil(-1));
    vm.pop(2);
}

#[test]
fn test_get_set_table_api() {
    let mut vm = state();
    vm.new_table().expect("table");
    vm.push_string("key").expect("k");
    vm.push_string("value").expect("v");
    vm.set_table(-3).expect("set");
    vm.push_string("key").expect("k");
    vm.get_table(-2).expect("get");
    assert_eq!(vm.to_rust_string(-1).as_deref(), Some("value"));
    vm.pop(2);
}

#[test]
fn test_next_api_iterates() {
    let mut vm = state();
    vm.execute_string("iter_target = {a = 1, b = 2}").expect("seed");
    let t = vm.get_global("iter_target");
    vm.push_value(t).expect("push table");
    vm.push_nil().expect("first key");
    let mut count = 0;
    while vm.next(-2).expect("next") {
        count += 1;
        vm.pop(1); // drop value, keep key as cursor
    }
    assert_eq!(count, 2);
    vm.pop(1); // table
}

#[test]
fn test_concat_api() {
    let mut vm = state();
    vm.push_string("a").expect("push");
    vm.push_number(1.0).expect("push");
    vm.push_string("b").expect("push");
    vm.concat(3).expect("concat");
    assert_eq!(vm.to_rust_string(-1).as_deref(), Some("a1b"));
    vm.pop(1);
}

#[test]
fn test_insert_api() {
    let mut vm = state();
    vm.push_number(1.0).expect("push");
    vm.push_number(2.0).expect("push");
    vm.push_number(3.0).expect("push");
    vm.insert(1);
    assert_eq!(vm.to_number(1), Some(3.0));
    assert_eq!(vm.to_number(2), Some(1.0));
    assert_eq!(vm.to_number(3), Some(2.0));
    vm.pop(3);
}

#[test]
fn test_raw_equal_api() {
    let mut vm = state();
    vm.push_string("same").expect("push");
    vm.push_string("same").expect("push");
    assert!(vm.raw_equal(-1, -2));
    vm.push_number(1.0).expect("push");
    assert!(!vm.raw_equal(-1, -2));
    vm.pop(3);
}

#[test]
fn test_load_then_run() {
    let mut vm = state();
    vm.load("answer = 42", "=unit").expect("load");
    vm.run().expect("run");
    assert_eq!(vm.get_global("answer").as_number(), Some(42.0));
}

#[test]
fn test_host_function_as_value_in_tables() {
    let mut vm = state();
    vm.register("sum", host_add_all).expect("register");
    vm.execute_string(
        r#"
        local ops = {plus = sum}
        assert(ops.plus(1, 2) == 3)
        local alias = sum
        assert(alias(40, 2) == 42)
        "#,
    )
    .expect("run");
}
