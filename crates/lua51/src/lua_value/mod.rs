// Value model: tagged values and the heap object payloads they name.

mod chunk;
mod lua_string;
mod lua_table;
mod lua_value;

pub use chunk::Chunk;
pub use lua_string::LuaString;
pub use lua_table::{ARRAY_THRESHOLD, LuaTable};
pub use lua_value::{LuaValue, LuaValueKind};
