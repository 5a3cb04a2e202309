// Table access, creation, method lookup and bulk initialization.

use super::rk_value;
use crate::gc::{ProtoId, TableId};
use crate::lua_value::LuaValue;
use crate::lua_vm::opcode::FIELDS_PER_FLUSH;
use crate::lua_vm::{Instruction, LuaError, LuaResult, LuaState};

#[inline]
fn expect_table(l: &mut LuaState, v: &LuaValue) -> LuaResult<TableId> {
    match v {
        LuaValue::Table(t) => Ok(*t),
        _ => Err(l.raise(
            LuaError::ExpectedTable,
            format!("attempt to index a {} value", v.type_name()),
        )),
    }
}

/// GETTABLE: R(A) := R(B)[RK(C)]
pub(super) fn exec_gettable(
    l: &mut LuaState,
    proto: ProtoId,
    base: usize,
    instr: u32,
) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr) as usize;
    let tv = l.stack[base + b];
    let t = expect_table(l, &tv)?;
    let key = rk_value(l, proto, base, Instruction::get_c(instr));
    l.stack[base + a] = l.pool.table(t).get(&key);
    Ok(())
}

/// SETTABLE: R(A)[RK(B)] := RK(C)
pub(super) fn exec_settable(
    l: &mut LuaState,
    proto: ProtoId,
    base: usize,
    instr: u32,
) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let tv = l.stack[base + a];
    let t = expect_table(l, &tv)?;
    let key = rk_value(l, proto, base, Instruction::get_b(instr));
    let value = rk_value(l, proto, base, Instruction::get_c(instr));
    l.table_set_checked(t, key, value)
}

/// NEWTABLE: R(A) := {} (the B/C size hints are advisory)
pub(super) fn exec_newtable(l: &mut LuaState, base: usize, instr: u32) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let t = l.create_table(0, 0);
    l.stack[base + a] = t;
    Ok(())
}

/// SELF: R(A+1) := R(B); R(A) := R(B)[RK(C)]
pub(super) fn exec_self(
    l: &mut LuaState,
    proto: ProtoId,
    base: usize,
    instr: u32,
) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr) as usize;
    let tv = l.stack[base + b];
    l.stack[base + a + 1] = tv;
    let t = expect_table(l, &tv)?;
    let key = rk_value(l, proto, base, Instruction::get_c(instr));
    l.stack[base + a] = l.pool.table(t).get(&key);
    Ok(())
}

/// SETLIST: bulk-assign R(A+1..A+B) into the array part of R(A)
/// starting at (C-1)*FPF + 1. C == 0 pulls the real block index from
/// the next instruction word, read as a raw 32-bit count.
pub(super) fn exec_setlist(
    l: &mut LuaState,
    proto: ProtoId,
    base: usize,
    instr: u32,
) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr) as usize;
    let mut c = Instruction::get_c(instr) as usize;
    if c == 0 {
        let frame = l.frames.last().expect("active frame");
        let pc = frame.pc;
        c = l.pool.proto(proto).code[pc] as usize;
        if let Some(frame) = l.frames.last_mut() {
            frame.pc = pc + 1;
        }
    }
    let n = if b == 0 { l.top - (base + a) - 1 } else { b };
    let tv = l.stack[base + a];
    let t = expect_table(l, &tv)?;
    let start = (c - 1) * FIELDS_PER_FLUSH;
    for i in 1..=n {
        let v = l.stack[base + a + i];
        l.pool.table_mut(t).set_int((start + i) as i64, v);
    }
    if let Some(frame) = l.frames.last() {
        l.top = frame.top;
    }
    Ok(())
}
