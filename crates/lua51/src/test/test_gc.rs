/// Collector behavior observable through the whole stack.
use crate::lua_value::LuaValue;
use crate::lua_vm::LuaState;

fn state() -> LuaState {
    let mut vm = LuaState::new();
    vm.open_libs().expect("open libs");
    vm
}

#[test]
fn test_interned_strings_are_one_object() {
    let mut vm = state();
    let a = vm.create_string("interned once");
    let b = vm.create_string("interned once");
    assert_eq!(a, b);
}

#[test]
fn test_garbage_from_a_run_is_collected() {
    let mut vm = state();
    vm.execute_string("return 1").expect("warm up");
    vm.collect_garbage();
    let baseline = vm.gc_object_count();
    vm.execute_string(
        r#"
        local keep = {}
        for i = 1, 500 do
            keep[(i % 10) + 1] = {payload = "garbage " .. i}
        end
        "#,
    )
    .expect("allocate");
    vm.collect_garbage();
    let after = vm.gc_object_count();
    // everything the chunk allocated is unreachable once it returns
    assert!(
        after <= baseline + 8,
        "leak: {} objects before, {} after",
        baseline,
        after
    );
}

#[test]
fn test_reference_cycles_are_collected() {
    let mut vm = state();
    vm.execute_string(
        r#"
        cycle_a = {}
        cycle_b = {}
        cycle_a.peer = cycle_b
        cycle_b.peer = cycle_a
        "#,
    )
    .expect("build cycle");
    vm.collect_garbage();
    let with_cycle = vm.gc_object_count();
    vm.execute_string("cycle_a = nil cycle_b = nil").expect("drop roots");
    vm.collect_garbage();
    assert!(vm.gc_object_count() < with_cycle);
}

#[test]
fn test_globals_survive_collection() {
    let mut vm = state();
    vm.execute_string("kept = {mark = 'still here'}").expect("set");
    vm.collect_garbage();
    vm.collect_garbage();
    let results = vm.execute_string("return kept.mark").expect("get");
    assert_eq!(results.len(), 1);
    match results[0] {
        LuaValue::Str(id) => assert_eq!(vm.pool.string_str(id), "still here"),
        ref v => panic!("expected string, got {:?}", v),
    }
}

#[test]
fn test_closed_upvalues_survive_collection() {
    let mut vm = state();
    vm.execute_string(
        r#"
        local function mk()
            local hidden = {value = 41}
            return function()
                hidden.value = hidden.value + 1
                return hidden.value
            end
        end
        bump = mk()
        "#,
    )
    .expect("build closure");
    vm.collect_garbage();
    let results = vm.execute_string("return bump()").expect("call");
    assert_eq!(results[0].as_number(), Some(42.0));
}

#[test]
fn test_collectgarbage_from_scripts() {
    let mut vm = state();
    vm.execute_string(
        r#"
        for i = 1, 100 do
            local _ = {"transient", i}
        end
        collectgarbage("collect")
        assert(collectgarbage("count") > 0)
        "#,
    )
    .expect("collect in-script");
}

#[test]
fn test_collection_during_execution_keeps_live_values() {
    // allocation pressure forces cycles mid-run; live locals must hold
    let mut vm = state();
    vm.execute_string(
        r#"
        local pinned = {tag = "pinned"}
        local sum = 0
        for i = 1, 3000 do
            local tmp = {i, "chunk of garbage"}
            sum = sum + tmp[1]
        end
        assert(pinned.tag == "pinned")
        assert(sum == 3000 * 3001 / 2)
        "#,
    )
    .expect("stress");
}
