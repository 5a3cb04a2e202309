// Virtual machine: state, frames, opcodes and the dispatch loop.

mod call_info;
mod execute;
mod lua_error;
mod lua_state;
pub mod opcode;
mod safe_option;

pub use call_info::{CallInfo, LUA_MULTRET, call_status};
pub use lua_error::{LuaError, LuaFullError};
pub use lua_state::{LUA_VERSION, LuaState};
pub use opcode::{FIELDS_PER_FLUSH, Instruction, OpCode, OpMode};
pub use safe_option::SafeOption;

pub(crate) use lua_state::number_to_display;

pub type LuaResult<T> = Result<T, LuaError>;

/// Host function signature: arguments occupy stack indices 1..=nargs;
/// the return value is how many results were left on top.
pub type CFunction = fn(&mut LuaState) -> LuaResult<usize>;
