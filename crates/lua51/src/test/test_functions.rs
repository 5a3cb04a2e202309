/// Calls, returns, varargs, methods and tail calls.
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
fn test_multiple_returns_and_adjustment() {
    run(r#"
        local function two() return 1, 2 end
        local a, b = two()
        assert(a == 1 and b == 2)
        -- fewer results than targets pad with nil
        local c, d, e = two()
        assert(c == 1 and d == 2 and e == nil)
        -- extra results drop
        local f = two()
        assert(f == 1)
        -- parentheses truncate to one value
        local g, h = (two())
        assert(g == 1 and h == nil)
    "#);
}

#[test]
fn test_call_in_middle_of_list_truncates() {
    run(r#"
        local function two() return 1, 2 end
        local a, b, c = two(), 9
        assert(a == 1 and b == 9 and c == nil)
    "#);
}

#[test]
fn test_multret_spreads_into_calls_and_tables() {
    run(r##"
        local function two() return 1, 2 end
        local t = {two(), two()}
        assert(#t == 3)
        assert(t[1] == 1 and t[2] == 1 and t[3] == 2)
        assert(select("#", two(), two()) == 3)
    "##);
}

#[test]
fn test_varargs() {
    run(r##"
        local function count(...)
            return select("#", ...)
        end
        assert(count() == 0)
        assert(count(1, 2, 3) == 3)
        assert(count(nil, nil) == 2)

        local function pack(...)
            return {...}
        end
        local t = pack("a", "b", "c")
        assert(#t == 3 and t[2] == "b")

        local function head(...)
            local first = ...
            return first
        end
        assert(head(7, 8, 9) == 7)

        local function forward(...)
            return ...
        end
        local x, y = forward(4, 5)
        assert(x == 4 and y == 5)
    "##);
}

#[test]
fn test_varargs_mixed_with_params() {
    run(r##"
        local function f(first, ...)
            return first, select("#", ...)
        end
        local head, rest = f(1, 2, 3, 4)
        assert(head == 1 and rest == 3)
        local h2, r2 = f()
        assert(h2 == nil and r2 == 0)
    "##);
}

#[test]
fn test_missing_arguments_become_nil() {
    run(r#"
        local function f(a, b, c)
            return a, b, c
        end
        local x, y, z = f(1)
        assert(x == 1 and y == nil and z == nil)
    "#);
}

#[test]
fn test_method_calls() {
    run(r#"
        local obj = {value = 5}
        function obj:get() return self.value end
        function obj:add(n) self.value = self.value + n end
        assert(obj:get() == 5)
        obj:add(3)
        assert(obj:get() == 8)

        local account = {balance = 0}
        function account.deposit(self, n)
            self.balance = self.balance + n
            return self.balance
        end
        assert(account:deposit(10) == 10)
    "#);
}

#[test]
fn test_function_fields() {
    run(r#"
        lib = {}
        lib.util = {}
        function lib.util.double(n) return n * 2 end
        assert(lib.util.double(21) == 42)
    "#);
}

#[test]
fn test_tail_calls_do_not_grow_the_frame_chain() {
    // max_call_depth defaults to 200; fifty thousand iterations only
    // pass if TAILCALL reuses the frame
    run(r#"
        local function loop(n)
            if n == 0 then return "done" end
            return loop(n - 1)
        end
        assert(loop(50000) == "done")
    "#);
}

#[test]
fn test_mutual_tail_recursion() {
    run(r#"
        local is_even, is_odd
        function is_even(n)
            if n == 0 then return true end
            return is_odd(n - 1)
        end
        function is_odd(n)
            if n == 0 then return false end
            return is_even(n - 1)
        end
        assert(is_even(10000))
        assert(not is_odd(10000))
    "#);
}

#[test]
fn test_functions_are_values() {
    run(r#"
        local function apply(f, x) return f(x) end
        assert(apply(function(n) return n + 1 end, 41) == 42)
        local ops = {
            add = function(a, b) return a + b end,
            mul = function(a, b) return a * b end,
        }
        assert(ops.add(2, 3) == 5)
        assert(ops["mul"](2, 3) == 6)
    "#);
}

#[test]
fn test_string_argument_call_sugar() {
    run(r#"
        local function id(s) return s end
        assert(id "direct" == "direct")
        local function tab(t) return t[1] end
        assert(tab {42} == 42)
    "#);
}
