/// Error raising, classification and protected-call recovery.
use crate::lua_vm::{LuaError, LuaState};

fn run(source: &str) {
    let mut vm = LuaState::new();
    vm.open_libs().expect("open libs");
    let result = vm.execute_string(source);
    if let Err(e) = result {
        panic!("script failed: {}", vm.full_error(e));
    }
}

fn run_err(source: &str) -> (LuaState, LuaError) {
    let mut vm = LuaState::new();
    vm.open_libs().expect("open libs");
    let err = vm
        .execute_string(source)
        .expect_err("script should have failed");
    (vm, err)
}

#[test]
fn test_pcall_catches_error() {
    run(r#"
        local ok, err = pcall(function() error("boom") end)
        assert(ok == false)
        assert(string.sub(err, -4) == "boom")
        -- the message carries a source position
        assert(#err > #"boom")
    "#);
}

#[test]
fn test_pcall_success_passes_results() {
    run(r#"
        local ok, a, b = pcall(function() return 1, 2 end)
        assert(ok == true and a == 1 and b == 2)
        local ok2 = pcall(function() end)
        assert(ok2 == true)
    "#);
}

#[test]
fn test_pcall_forwards_arguments() {
    run(r#"
        local ok, sum = pcall(function(a, b) return a + b end, 30, 12)
        assert(ok and sum == 42)
    "#);
}

#[test]
fn test_error_with_non_string_value() {
    run(r#"
        local ok, e = pcall(function() error({code = 7}) end)
        assert(ok == false)
        assert(type(e) == "table")
        assert(e.code == 7)
    "#);
}

#[test]
fn test_error_level_zero_keeps_message_raw() {
    run(r#"
        local ok, e = pcall(function() error("plain", 0) end)
        assert(ok == false)
        assert(e == "plain")
    "#);
}

#[test]
fn test_xpcall_runs_handler() {
    run(r#"
        local ok, handled = xpcall(
            function() error("inner") end,
            function(e) return "handled: " .. e end
        )
        assert(ok == false)
        assert(string.sub(handled, 1, 9) == "handled: ")
        local ok2, v = xpcall(function() return 5 end, function() return "?" end)
        assert(ok2 == true and v == 5)
    "#);
}

#[test]
fn test_runtime_type_errors_are_catchable() {
    run(r#"
        assert(pcall(function() local x = nil return x.y end) == false)
        assert(pcall(function() return 1 + {} end) == false)
        assert(pcall(function() return #true end) == false)
        assert(pcall(function() return {} .. "x" end) == false)
        assert(pcall(function() local f = 42 f() end) == false)
        assert(pcall(function() local t = {} t[nil] = 1 end) == false)
        assert(pcall(function() return 1 < "x" end) == false)
    "#);
}

#[test]
fn test_execution_continues_after_caught_error() {
    run(r#"
        local attempts = 0
        for i = 1, 3 do
            local ok = pcall(function()
                attempts = attempts + 1
                if i == 2 then error("skip") end
            end)
            assert(ok == (i ~= 2))
        end
        assert(attempts == 3)
    "#);
}

#[test]
fn test_nested_pcall() {
    run(r#"
        local ok_outer, v = pcall(function()
            local ok_inner, e = pcall(function() error("deep") end)
            assert(ok_inner == false)
            return "recovered"
        end)
        assert(ok_outer == true and v == "recovered")
    "#);
}

#[test]
fn test_uncaught_error_reaches_host() {
    let (vm, err) = run_err("error('unprotected')");
    assert_eq!(err, LuaError::RuntimeError);
    assert!(vm.full_error(err).to_string().contains("unprotected"));
}

#[test]
fn test_call_on_non_function_kind() {
    let (_, err) = run_err("local x = 5 x()");
    assert_eq!(err, LuaError::AttemptToCallNonFunction);
}

#[test]
fn test_index_non_table_kind() {
    let (vm, err) = run_err("local n = 1 return n.field");
    assert_eq!(err, LuaError::ExpectedTable);
    assert!(vm.error_message().contains("attempt to index"));
}

#[test]
fn test_arithmetic_kind() {
    let (_, err) = run_err("return {} + 1");
    assert_eq!(err, LuaError::AttemptToPerformArithmetic);
}

#[test]
fn test_compile_errors() {
    let mut vm = LuaState::new();
    vm.open_libs().expect("open libs");
    let err = vm
        .execute_string("local = 5")
        .expect_err("syntax error expected");
    assert_eq!(err, LuaError::CompileError);

    // load reports instead of raising
    vm.execute_string(
        r#"
        local f, msg = load("1 +")
        assert(f == nil)
        assert(type(msg) == "string")
        local g = load("return 42")
        assert(g() == 42)
        "#,
    )
    .expect("load probe");
}

#[test]
fn test_runaway_recursion_is_catchable() {
    run(r#"
        local function deep(n)
            if n == 0 then return 0 end
            return 1 + deep(n - 1)
        end
        local ok, err = pcall(deep, 1e9)
        assert(ok == false)
    "#);
}

#[test]
fn test_error_messages_carry_positions() {
    let (vm, err) = run_err("local x = nil\nreturn x.y");
    assert_eq!(err, LuaError::ExpectedTable);
    let msg = vm.error_message();
    assert!(msg.contains(":2:"), "missing line info in '{}'", msg);
}
