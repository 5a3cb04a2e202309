/// Values, operators and the base library.
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
fn test_arithmetic() {
    run(r#"
        assert(1 + 2 == 3)
        assert(7 - 10 == -3)
        assert(3 * 4 == 12)
        assert(7 / 2 == 3.5)
        assert(2 ^ 10 == 1024)
        assert(2 ^ 3 ^ 2 == 512)
        assert(7 % 3 == 1)
        assert(-1 % 3 == 2)
        assert(-(5) == -5)
    "#);
}

#[test]
fn test_string_coercion_in_arithmetic() {
    run(r#"
        assert("10" + 1 == 11)
        assert("0x10" + 0 == 16)
    "#);
}

#[test]
fn test_comparison() {
    run(r#"
        assert(1 < 2)
        assert(2 <= 2)
        assert(3 > 2)
        assert(3 >= 3)
        assert(1 ~= 2)
        assert("a" < "b")
        assert("abc" < "abd")
        assert("Z" < "a")
        assert(not (1 == "1"))
    "#);
}

#[test]
fn test_truthiness_and_logic() {
    run(r#"
        assert(not nil)
        assert(not false)
        assert(0)
        assert("")
        assert((nil and 1) == nil)
        assert((false or "x") == "x")
        assert((1 and 2) == 2)
        assert((nil or nil) == nil)
    "#);
}

#[test]
fn test_concat() {
    run(r#"
        assert("a" .. "b" .. "c" == "abc")
        assert(1 .. 2 == "12")
        assert("n=" .. 3.5 == "n=3.5")
    "#);
}

#[test]
fn test_string_interning_makes_equality_identity() {
    run(r#"
        local s1 = "abc"
        local s2 = "ab" .. "c"
        assert(s1 == s2)
        assert(rawequal(s1, s2))
    "#);
}

#[test]
fn test_length_operator() {
    run(r#"
        assert(#"hello" == 5)
        assert(#"" == 0)
        assert(#{10, 20, 30} == 3)
    "#);
}

#[test]
fn test_type_and_tostring() {
    run(r#"
        assert(type(nil) == "nil")
        assert(type(true) == "boolean")
        assert(type(1) == "number")
        assert(type("s") == "string")
        assert(type({}) == "table")
        assert(type(print) == "function")
        assert(tostring(nil) == "nil")
        assert(tostring(true) == "true")
        assert(tostring(3) == "3")
        assert(tostring(3.5) == "3.5")
    "#);
}

#[test]
fn test_tonumber() {
    run(r#"
        assert(tonumber("42") == 42)
        assert(tonumber(" 7 ") == 7)
        assert(tonumber("0x1F") == 31)
        assert(tonumber("ff", 16) == 255)
        assert(tonumber("zz") == nil)
        assert(tonumber({}) == nil)
    "#);
}

#[test]
fn test_select_and_unpack() {
    run(r##"
        assert(select("#", 1, 2, 3) == 3)
        assert(select("#") == 0)
        local a, b = select(2, "x", "y", "z")
        assert(a == "y" and b == "z")
        local p, q = unpack({7, 8})
        assert(p == 7 and q == 8)
    "##);
}

#[test]
fn test_globals_table() {
    run(r#"
        assert(_VERSION == "Lua 5.1")
        assert(type(_G) == "table")
        some_global = 99
        assert(_G.some_global == 99)
        assert(_G._G == _G)
    "#);
}

#[test]
fn test_string_library() {
    run(r#"
        assert(string.len("abc") == 3)
        assert(string.upper("abc") == "ABC")
        assert(string.lower("ABC") == "abc")
        assert(string.sub("hello", 2, 4) == "ell")
        assert(string.sub("hello", -3) == "llo")
        assert(string.rep("ab", 3) == "ababab")
        assert(string.reverse("abc") == "cba")
        assert(string.byte("A") == 65)
        assert(string.char(104, 105) == "hi")
        assert(string.format("%d-%s", 7, "x") == "7-x")
        assert(string.format("%05d", 42) == "00042")
        assert(string.format("%x", 255) == "ff")
        assert(string.format("100%%") == "100%")
    "#);
}

#[test]
fn test_math_library() {
    run(r#"
        assert(math.abs(-3) == 3)
        assert(math.floor(3.7) == 3)
        assert(math.ceil(3.2) == 4)
        assert(math.sqrt(16) == 4)
        assert(math.max(1, 9, 4) == 9)
        assert(math.min(1, 9, 4) == 1)
        assert(math.fmod(7, 3) == 1)
        assert(math.pi > 3.14 and math.pi < 3.15)
        assert(math.huge > 1e300)
        local int, frac = math.modf(3.25)
        assert(int == 3 and frac == 0.25)
    "#);
}

#[test]
fn test_long_strings_and_comments() {
    run(r#"
        local s = [[hello]]
        assert(s == "hello")
        local t = [==[a]b]==]
        assert(t == "a]b")
        --[[ a block
             comment ]]
        assert(true)
    "#);
}

#[test]
fn test_escapes() {
    run("assert(#\"a\\nb\" == 3) assert(string.byte(\"\\65\") == 65)");
}

#[test]
fn test_results_surface_to_host() {
    let mut vm = LuaState::new();
    vm.open_libs().expect("open libs");
    let results = vm.execute_string("return 1, 'two', true").expect("run");
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_number(), Some(1.0));
    assert!(results[2].is_truthy());
}
