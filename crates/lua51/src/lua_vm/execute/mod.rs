// Instruction dispatch
//
// One fetch-decode-dispatch loop drives every script frame at or above
// a base depth. The four call shapes are kept distinct:
//   script -> script: push a frame, let the same loop pick it up;
//   script -> host:   invoke the host function directly;
//   host   -> script: `do_call` re-enters the loop at a deeper base;
//   tail call:        the current frame is rewritten, never stacked.
// The loop returns once the frame chain drops back to its base depth.

mod arithmetic_instructions;
mod control_instructions;
mod load_instructions;
mod loop_instructions;
mod table_instructions;
mod upvalue_instructions;

use arithmetic_instructions::*;
use control_instructions::*;
use load_instructions::*;
use loop_instructions::*;
use table_instructions::*;
use upvalue_instructions::*;

use crate::gc::ProtoId;
use crate::lua_value::LuaValue;
use crate::lua_vm::call_info::LUA_MULTRET;
use crate::lua_vm::{Instruction, LuaError, LuaResult, LuaState, OpCode};

/// Run script frames until the chain drops back to `base_depth`.
pub(crate) fn lua_execute(l: &mut LuaState, base_depth: usize) -> LuaResult<()> {
    loop {
        if l.frames.len() <= base_depth {
            return Ok(());
        }
        if let Err(e) = step(l, base_depth) {
            l.position_error();
            return Err(e);
        }
    }
}

/// Execute one instruction of the current (script) frame.
fn step(l: &mut LuaState, base_depth: usize) -> LuaResult<()> {
    let (base, pc, func) = {
        let frame = l.frames.last().expect("active frame");
        (frame.base, frame.pc, frame.func)
    };
    let cid = match func {
        LuaValue::Closure(c) => c,
        _ => return Err(l.raise(LuaError::RuntimeError, "host frame in interpreter loop")),
    };
    let proto = l.pool.closure(cid).proto;
    let instr = {
        let chunk = l.pool.proto(proto);
        debug_assert!(pc < chunk.code.len(), "fell off the instruction stream");
        chunk.code[pc]
    };
    if let Some(frame) = l.frames.last_mut() {
        frame.pc = pc + 1;
    }

    match Instruction::get_opcode(instr) {
        // Load and move
        OpCode::Move => exec_move(l, base, instr),
        OpCode::LoadK => exec_loadk(l, proto, base, instr),
        OpCode::LoadBool => exec_loadbool(l, base, instr),
        OpCode::LoadNil => exec_loadnil(l, base, instr),
        OpCode::GetGlobal => exec_getglobal(l, proto, base, instr),
        OpCode::SetGlobal => exec_setglobal(l, proto, base, instr),

        // Upvalues and closures
        OpCode::GetUpval => exec_getupval(l, cid, base, instr),
        OpCode::SetUpval => exec_setupval(l, cid, base, instr),
        OpCode::Closure => exec_closure(l, cid, proto, base, instr),
        OpCode::Close => {
            let a = Instruction::get_a(instr) as usize;
            l.close_upvalues(base + a);
            Ok(())
        }
        OpCode::Vararg => exec_vararg(l, base, instr),

        // Tables
        OpCode::GetTable => exec_gettable(l, proto, base, instr),
        OpCode::SetTable => exec_settable(l, proto, base, instr),
        OpCode::NewTable => exec_newtable(l, base, instr),
        OpCode::Self_ => exec_self(l, proto, base, instr),
        OpCode::SetList => exec_setlist(l, proto, base, instr),

        // Arithmetic and string operations
        op @ (OpCode::Add
        | OpCode::Sub
        | OpCode::Mul
        | OpCode::Div
        | OpCode::Mod
        | OpCode::Pow) => exec_arith(l, proto, base, instr, op),
        OpCode::Unm => exec_unm(l, base, instr),
        OpCode::Not => exec_not(l, base, instr),
        OpCode::Len => exec_len(l, base, instr),
        OpCode::Concat => exec_concat(l, base, instr),

        // Control flow
        OpCode::Jmp => exec_jmp(l, instr),
        op @ (OpCode::Eq | OpCode::Lt | OpCode::Le) => exec_compare(l, proto, base, instr, op),
        OpCode::Test => exec_test(l, base, instr),
        OpCode::TestSet => exec_testset(l, base, instr),

        // Loops
        OpCode::ForPrep => exec_forprep(l, base, instr),
        OpCode::ForLoop => exec_forloop(l, base, instr),
        OpCode::TForLoop => exec_tforloop(l, base, instr),

        // Calls and returns
        OpCode::Call => op_call(l, base, instr),
        OpCode::TailCall => op_tailcall(l, base_depth, base, instr),
        OpCode::Return => op_return(l, base_depth, base, instr),
    }
}

/// RK operand: high bit selects the constant pool, else a register.
#[inline(always)]
pub(super) fn rk_value(l: &LuaState, proto: ProtoId, base: usize, operand: u32) -> LuaValue {
    if Instruction::is_k(operand) {
        l.pool.proto(proto).constants[Instruction::rk_index(operand) as usize]
    } else {
        l.stack[base + operand as usize]
    }
}

#[inline(always)]
pub(super) fn kst(l: &LuaState, proto: ProtoId, idx: usize) -> LuaValue {
    l.pool.proto(proto).constants[idx]
}

fn op_call(l: &mut LuaState, base: usize, instr: u32) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr);
    let c = Instruction::get_c(instr);
    let func_index = base + a;
    let nargs = if b == 0 {
        l.top - func_index - 1
    } else {
        (b - 1) as usize
    };
    let nresults = if c == 0 { LUA_MULTRET } else { (c - 1) as i32 };
    if b != 0 {
        l.top = func_index + 1 + nargs;
    }
    match l.stack[func_index] {
        LuaValue::Closure(_) => {
            // The loop executes the new frame; no host recursion.
            l.push_script_frame(func_index, nargs, nresults)
        }
        LuaValue::CClosure(_) => {
            l.call_c(func_index, nargs, nresults)?;
            if nresults != LUA_MULTRET {
                if let Some(frame) = l.frames.last() {
                    l.top = frame.top;
                }
            }
            Ok(())
        }
        v => Err(l.raise(
            LuaError::AttemptToCallNonFunction,
            format!("attempt to call a {} value", v.type_name()),
        )),
    }
}

/// Tail call: the current frame is reused, so unbounded tail recursion
/// never grows the frame chain.
fn op_tailcall(l: &mut LuaState, base_depth: usize, base: usize, instr: u32) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr);
    let func_index = base + a;
    let nargs = if b == 0 {
        l.top - func_index - 1
    } else {
        (b - 1) as usize
    };
    l.close_upvalues(base);
    match l.stack[func_index] {
        LuaValue::Closure(_) => {
            let old = l.frames.pop().expect("tail-calling frame");
            let dest = old.func_index;
            // Slide callee and arguments down over the abandoned frame.
            for i in 0..=nargs {
                let v = l.stack[func_index + i];
                l.stack[dest + i] = v;
            }
            for i in (dest + nargs + 1)..l.top {
                l.stack[i] = LuaValue::Nil;
            }
            l.top = dest + nargs + 1;
            l.push_script_frame(dest, nargs, old.nresults)?;
            if let Some(frame) = l.frames.last_mut() {
                frame.set_tail();
                frame.tail_calls = frame.tail_calls.max(old.tail_calls + 1);
            }
            Ok(())
        }
        LuaValue::CClosure(_) => {
            // A host tail-callee returns straight through this frame.
            l.call_c(func_index, nargs, LUA_MULTRET)?;
            let actual = l.top - func_index;
            let old = l.frames.pop().expect("tail-calling frame");
            l.finish_results(old.func_index, func_index, actual, old.nresults);
            after_return(l, base_depth, old.nresults);
            Ok(())
        }
        v => Err(l.raise(
            LuaError::AttemptToCallNonFunction,
            format!("attempt to call a {} value", v.type_name()),
        )),
    }
}

fn op_return(l: &mut LuaState, base_depth: usize, base: usize, instr: u32) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr);
    let first = base + a;
    let actual = if b == 0 {
        l.top - first
    } else {
        (b - 1) as usize
    };
    l.close_upvalues(base);
    let frame = l.frames.pop().expect("returning frame");
    l.finish_results(frame.func_index, first, actual, frame.nresults);
    after_return(l, base_depth, frame.nresults);
    Ok(())
}

/// Re-establish the caller's register window after a return, unless the
/// caller asked for an open result count.
fn after_return(l: &mut LuaState, base_depth: usize, wanted: i32) {
    if l.frames.len() <= base_depth {
        return;
    }
    if wanted != LUA_MULTRET {
        if let Some(caller) = l.frames.last() {
            if caller.is_lua() {
                l.top = caller.top;
            }
        }
    }
}
