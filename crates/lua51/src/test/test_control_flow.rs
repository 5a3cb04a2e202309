/// Branches, loops and break.
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
fn test_if_elseif_else() {
    run(r#"
        local function classify(n)
            if n < 0 then
                return "neg"
            elseif n == 0 then
                return "zero"
            else
                return "pos"
            end
        end
        assert(classify(-5) == "neg")
        assert(classify(0) == "zero")
        assert(classify(9) == "pos")
    "#);
}

#[test]
fn test_while_loop() {
    run(r#"
        local n, sum = 0, 0
        while n < 10 do
            n = n + 1
            sum = sum + n
        end
        assert(sum == 55)
    "#);
}

#[test]
fn test_repeat_until() {
    run(r#"
        local n = 0
        repeat
            n = n + 1
        until n >= 5
        assert(n == 5)
    "#);
}

#[test]
fn test_repeat_sees_body_locals_in_condition() {
    run(r#"
        local count = 0
        repeat
            local done = count >= 3
            count = count + 1
        until done
        assert(count == 4)
    "#);
}

#[test]
fn test_numeric_for() {
    run(r#"
        local sum = 0
        for i = 1, 5 do sum = sum + i end
        assert(sum == 15)

        local squares = {}
        for i = 1, 3 do squares[#squares + 1] = i * i end
        assert(squares[1] == 1 and squares[2] == 4 and squares[3] == 9)
    "#);
}

#[test]
fn test_numeric_for_with_step() {
    run(r#"
        local sum = 0
        for i = 10, 1, -2 do sum = sum + i end
        assert(sum == 30)

        local count = 0
        for _ = 1, 0 do count = count + 1 end
        assert(count == 0)

        local frac = 0
        for x = 0, 1, 0.25 do frac = frac + x end
        assert(frac == 2.5)
    "#);
}

#[test]
fn test_generic_for_pairs() {
    run(r#"
        local t = {a = 1, b = 2, c = 3}
        local seen, total = 0, 0
        for k, v in pairs(t) do
            seen = seen + 1
            total = total + v
        end
        assert(seen == 3)
        assert(total == 6)
    "#);
}

#[test]
fn test_generic_for_ipairs() {
    run(r#"
        local t = {10, 20, 30}
        local sum = 0
        for i, v in ipairs(t) do sum = sum + i * v end
        assert(sum == 10 + 40 + 90)

        -- ipairs stops at the first hole
        local holey = {1, 2, nil, 4}
        local count = 0
        for _ in ipairs(holey) do count = count + 1 end
        assert(count == 2)
    "#);
}

#[test]
fn test_break() {
    run(r#"
        local n = 0
        while true do
            n = n + 1
            if n == 7 then break end
        end
        assert(n == 7)

        local last
        for i = 1, 100 do
            if i > 4 then break end
            last = i
        end
        assert(last == 4)
    "#);
}

#[test]
fn test_nested_loops() {
    run(r#"
        local cells = 0
        for i = 1, 4 do
            for j = 1, 4 do
                if j > i then break end
                cells = cells + 1
            end
        end
        assert(cells == 10)
    "#);
}

#[test]
fn test_scoping() {
    run(r#"
        local x = 1
        do
            local x = 2
            assert(x == 2)
        end
        assert(x == 1)
    "#);
}

#[test]
fn test_loop_variable_is_per_iteration_copy() {
    run(r#"
        for i = 1, 3 do
            i = i * 10
            assert(i % 10 == 0)
        end
    "#);
}
