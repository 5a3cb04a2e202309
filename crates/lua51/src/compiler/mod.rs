// Compiler front-end: tokenizer, parser and code generation.
//
// `compile` turns a source chunk into a function prototype in the
// object pool. The caller is expected to hold the collector off while
// compilation runs; prototypes under construction are not yet
// reachable from any root.

mod func_state;
mod parser;
mod tokenizer;

use crate::gc::ProtoId;
use crate::lua_vm::LuaState;
use parser::Parser;

pub fn compile(l: &mut LuaState, source: &str, chunkname: &str) -> Result<ProtoId, String> {
    Parser::new(l, source, chunkname)?.compile_main()
}
