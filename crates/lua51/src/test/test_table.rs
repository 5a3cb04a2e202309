/// Table semantics: hybrid storage, borders, iteration, table library.
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
fn test_constructors() {
    run(r#"
        local t = {10, 20, 30}
        assert(#t == 3 and t[2] == 20)

        local u = {x = 1, ["y"] = 2, 3}
        assert(u.x == 1 and u.y == 2 and u[1] == 3)

        local nested = {inner = {deep = "v"}}
        assert(nested.inner.deep == "v")

        local empty = {}
        assert(#empty == 0)
        assert(empty.missing == nil)
    "#);
}

#[test]
fn test_large_constructor_flushes_in_blocks() {
    // more items than one SETLIST block holds
    run(r#"
        local src = "local q = {"
        for i = 1, 120 do src = src .. i .. "," end
        src = src .. "} return q"
        local f = assert(load(src))
        local q = f()
        assert(q[1] == 1 and q[49] == 49 and q[50] == 50)
        -- indices past the array threshold spill into the hash part
        assert(q[51] == 51 and q[60] == 60 and q[120] == 120)
        local count = 0
        for _ in pairs(q) do count = count + 1 end
        assert(count == 120)
    "#);
}

#[test]
fn test_integer_and_float_keys_coincide() {
    run(r#"
        local t = {}
        t[2] = "a"
        assert(t[2.0] == "a")
        t[2.0] = "b"
        assert(t[2] == "b")
    "#);
}

#[test]
fn test_set_nil_removes() {
    run(r#"
        local t = {x = 1}
        t.x = nil
        assert(t.x == nil)
        t[1] = "v"
        t[1] = nil
        assert(t[1] == nil)
        assert(#t == 0)
    "#);
}

#[test]
fn test_length_is_a_border() {
    run(r#"
        local t = {1, 2, 3, 4}
        t[4] = nil
        assert(#t == 3)
        t[3] = nil
        assert(#t == 2)
    "#);
}

#[test]
fn test_keys_beyond_array_threshold() {
    run(r#"
        local t = {}
        for i = 1, 200 do t[i] = i * 2 end
        assert(t[1] == 2)
        assert(t[50] == 100)
        assert(t[51] == 102)
        assert(t[200] == 400)
    "#);
}

#[test]
fn test_arbitrary_keys() {
    run(r#"
        local t = {}
        t[true] = "yes"
        t[false] = "no"
        t[0.5] = "half"
        t["0.5"] = "string half"
        assert(t[true] == "yes")
        assert(t[false] == "no")
        assert(t[0.5] == "half")
        assert(t["0.5"] == "string half")

        local key = {}
        t[key] = "by identity"
        assert(t[key] == "by identity")
        assert(t[{}] == nil)
    "#);
}

#[test]
fn test_next_visits_every_entry_once() {
    run(r#"
        local t = {10, 20, x = "a", y = "b"}
        local seen = {}
        local count = 0
        local k, v = next(t, nil)
        while k ~= nil do
            assert(seen[k] == nil)
            seen[k] = v
            count = count + 1
            k, v = next(t, k)
        end
        assert(count == 4)
        assert(seen[1] == 10 and seen[2] == 20)
        assert(seen.x == "a" and seen.y == "b")
        assert(next({}) == nil)
    "#);
}

#[test]
fn test_nil_assignment_during_iteration() {
    run(r#"
        local t = {a = 1, b = 2, c = 3}
        local visited = 0
        for k in pairs(t) do
            visited = visited + 1
            t[k] = nil
        end
        assert(visited == 3)
        assert(next(t) == nil)
    "#);
}

#[test]
fn test_table_insert_remove() {
    run(r#"
        local t = {1, 2, 3}
        table.insert(t, 4)
        assert(#t == 4 and t[4] == 4)
        table.insert(t, 1, 0)
        assert(t[1] == 0 and t[2] == 1 and #t == 5)
        local popped = table.remove(t)
        assert(popped == 4 and #t == 4)
        local head = table.remove(t, 1)
        assert(head == 0 and t[1] == 1 and #t == 3)
    "#);
}

#[test]
fn test_table_concat() {
    run(r#"
        assert(table.concat({1, 2, 3}) == "123")
        assert(table.concat({"a", "b"}, "-") == "a-b")
        assert(table.concat({"a", "b", "c"}, ",", 2, 3) == "b,c")
        assert(table.concat({}) == "")
    "#);
}

#[test]
fn test_table_sort() {
    run(r#"
        local t = {5, 2, 8, 1, 9}
        table.sort(t)
        assert(t[1] == 1 and t[2] == 2 and t[3] == 5 and t[4] == 8 and t[5] == 9)
        table.sort(t, function(a, b) return a > b end)
        assert(t[1] == 9 and t[5] == 1)
        local words = {"pear", "apple", "fig"}
        table.sort(words)
        assert(words[1] == "apple" and words[3] == "pear")
    "#);
}

#[test]
fn test_table_maxn() {
    run(r#"
        assert(table.maxn({}) == 0)
        assert(table.maxn({1, 2, 3}) == 3)
        local t = {}
        t[100] = true
        assert(table.maxn(t) == 100)
    "#);
}

#[test]
fn test_rawget_rawset() {
    run(r#"
        local t = {}
        rawset(t, "k", "v")
        assert(rawget(t, "k") == "v")
        assert(rawset(t, 1, "one") == t)
    "#);
}

#[test]
fn test_tables_compare_by_identity() {
    run(r#"
        local a = {}
        local b = {}
        assert(a ~= b)
        local c = a
        assert(a == c)
        assert(rawequal(a, c))
        assert(not rawequal(a, b))
    "#);
}
