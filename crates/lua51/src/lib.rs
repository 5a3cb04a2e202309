// Lua 5.1 Runtime
// A compact Lua VM implementation with bytecode compiler and GC

#[cfg(test)]
mod test;

pub mod compiler;
pub mod gc;
pub mod lib_registry;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;

pub use gc::*;
pub use lib_registry::LibraryRegistry;
pub use lua_value::{ARRAY_THRESHOLD, Chunk, LuaString, LuaTable, LuaValue, LuaValueKind};
pub use lua_vm::{
    CFunction, Instruction, LUA_MULTRET, LUA_VERSION, LuaError, LuaFullError, LuaResult,
    LuaState, OpCode, SafeOption,
};

/// Compile and run a source chunk in a fresh state with the standard
/// libraries loaded.
pub fn execute(source: &str) -> LuaResult<Vec<LuaValue>> {
    let mut l = LuaState::new();
    l.open_libs()?;
    l.execute_string(source)
}
