// Upvalue access, closure construction and varargs.

use crate::gc::{ClosureId, ProtoId};
use crate::lua_value::LuaValue;
use crate::lua_vm::{Instruction, LuaError, LuaResult, LuaState, OpCode};

/// GETUPVAL: R(A) := UpValue[B]
#[inline]
pub(super) fn exec_getupval(
    l: &mut LuaState,
    cid: ClosureId,
    base: usize,
    instr: u32,
) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr) as usize;
    let uv = l.closure_upvalue(cid, b);
    let value = l.upvalue_get(uv);
    l.stack[base + a] = value;
    Ok(())
}

/// SETUPVAL: UpValue[B] := R(A)
#[inline]
pub(super) fn exec_setupval(
    l: &mut LuaState,
    cid: ClosureId,
    base: usize,
    instr: u32,
) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr) as usize;
    let uv = l.closure_upvalue(cid, b);
    let v = l.stack[base + a];
    l.upvalue_set(uv, v);
    Ok(())
}

/// CLOSURE: R(A) := closure over prototype P(Bx). One pseudo
/// instruction per upvalue follows: MOVE captures the caller's stack
/// slot (shared through the open-upvalue chain), GETUPVAL reuses the
/// caller closure's upvalue.
pub(super) fn exec_closure(
    l: &mut LuaState,
    cid: ClosureId,
    proto: ProtoId,
    base: usize,
    instr: u32,
) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let bx = Instruction::get_bx(instr) as usize;
    let child = l.pool.proto(proto).protos[bx];
    let nup = l.pool.proto(child).num_upvalues as usize;
    let mut upvalues = Vec::with_capacity(nup);
    for _ in 0..nup {
        let pc = l.frames.last().expect("active frame").pc;
        let pseudo = l.pool.proto(proto).code[pc];
        if let Some(frame) = l.frames.last_mut() {
            frame.pc = pc + 1;
        }
        let b = Instruction::get_b(pseudo) as usize;
        match Instruction::get_opcode(pseudo) {
            OpCode::Move => upvalues.push(l.find_or_create_upvalue(base + b)),
            OpCode::GetUpval => upvalues.push(l.closure_upvalue(cid, b)),
            _ => {
                return Err(l.raise(LuaError::RuntimeError, "malformed upvalue capture"));
            }
        }
    }
    let closure = l.create_closure(child, upvalues);
    l.stack[base + a] = closure;
    Ok(())
}

/// VARARG: copy the frame's extra arguments into R(A..). B == 0 copies
/// them all and leaves the top just past the last one.
pub(super) fn exec_vararg(l: &mut LuaState, base: usize, instr: u32) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr) as usize;
    let n = l.frames.last().expect("active frame").num_varargs;
    // The actual varargs sit immediately below the frame base.
    let vstart = base - n;
    if b == 0 {
        let dest_end = base + a + n;
        if dest_end > l.stack.len() {
            return Err(l.raise(LuaError::StackOverflow, "stack overflow"));
        }
        for j in 0..n {
            let v = l.stack[vstart + j];
            l.stack[base + a + j] = v;
        }
        l.top = dest_end;
    } else {
        let wanted = b - 1;
        for j in 0..wanted {
            let v = if j < n {
                l.stack[vstart + j]
            } else {
                LuaValue::Nil
            };
            l.stack[base + a + j] = v;
        }
    }
    Ok(())
}
