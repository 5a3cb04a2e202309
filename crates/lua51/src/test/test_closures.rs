/// Closures, upvalue capture, sharing and close-on-scope-exit.
use crate::lua_vm::LuaState;

fn run(source: &str) {
    let mut vm = LuaState::new();
    vm.open_libs().expect("open libs");
    let result = vm.execute_string(source);
    if let Err(e) = result {
        panic!("script failed: {}", vm.full_error(e));
    }
}

#[test]
fn test_counter_closure() {
    run(r#"
        local function mk()
            local x = 0
            return function()
                x = x + 1
                return x
            end
        end
        local f = mk()
        assert(f() == 1)
        assert(f() == 2)
        assert(f() == 3)
        -- a fresh factory call gets a fresh cell
        local g = mk()
        assert(g() == 1)
        assert(f() == 4)
    "#);
}

#[test]
fn test_two_closures_share_one_cell() {
    run(r#"
        local function make_getset()
            local value = 10
            local function get() return value end
            local function set(v) value = v end
            return get, set
        end
        local get, set = make_getset()
        assert(get() == 10)
        set(20)
        assert(get() == 20)
        -- the enclosing frame returned long ago; the closed cell is
        -- still shared
        set(30)
        assert(get() == 30)
    "#);
}

#[test]
fn test_nested_capture_through_levels() {
    run(r#"
        local function outer(x)
            return function(y)
                return function(z)
                    return x + y + z
                end
            end
        end
        assert(outer(1)(2)(3) == 6)
        assert(outer(10)(20)(30) == 60)
    "#);
}

#[test]
fn test_loop_captures_are_distinct() {
    run(r#"
        local funcs = {}
        for i = 1, 5 do
            funcs[i] = function() return i end
        end
        assert(funcs[1]() == 1)
        assert(funcs[3]() == 3)
        assert(funcs[5]() == 5)
    "#);
}

#[test]
fn test_capture_before_and_after_mutation() {
    run(r#"
        local x = 1
        local function read() return x end
        x = 2
        assert(read() == 2)
        local function write(v) x = v end
        write(7)
        assert(x == 7)
        assert(read() == 7)
    "#);
}

#[test]
fn test_upvalue_of_upvalue() {
    run(r#"
        local counter = 0
        local function level1()
            local function level2()
                counter = counter + 1
                return counter
            end
            return level2()
        end
        assert(level1() == 1)
        assert(level1() == 2)
    "#);
}

#[test]
fn test_block_close_keeps_identity() {
    run(r#"
        local pair
        do
            local shared = 0
            pair = {
                bump = function() shared = shared + 1 return shared end,
                peek = function() return shared end,
            }
        end
        pair.bump()
        pair.bump()
        assert(pair.peek() == 2)
    "#);
}

#[test]
fn test_recursive_local_function() {
    run(r#"
        local function fib(n)
            if n < 2 then return n end
            return fib(n - 1) + fib(n - 2)
        end
        assert(fib(10) == 55)
    "#);
}
