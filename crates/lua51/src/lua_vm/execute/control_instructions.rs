// Jumps, comparisons and conditional tests.
//
// The comparison opcodes implement the skip convention of the
// compiler's output: when the comparison result disagrees with operand
// A the next instruction (always a JMP) is skipped.

use super::rk_value;
use crate::gc::ProtoId;
use crate::lua_value::LuaValue;
use crate::lua_vm::{Instruction, LuaError, LuaResult, LuaState, OpCode};

#[inline(always)]
fn skip_next(l: &mut LuaState) {
    if let Some(frame) = l.frames.last_mut() {
        frame.pc += 1;
    }
}

/// JMP: pc += sBx
#[inline(always)]
pub(super) fn exec_jmp(l: &mut LuaState, instr: u32) -> LuaResult<()> {
    let sbx = Instruction::get_sbx(instr);
    if let Some(frame) = l.frames.last_mut() {
        frame.pc = (frame.pc as i64 + sbx as i64) as usize;
    }
    Ok(())
}

/// EQ/LT/LE: if ((RK(B) op RK(C)) ~= A) then skip next
pub(super) fn exec_compare(
    l: &mut LuaState,
    proto: ProtoId,
    base: usize,
    instr: u32,
    op: OpCode,
) -> LuaResult<()> {
    let a = Instruction::get_a(instr);
    let vb = rk_value(l, proto, base, Instruction::get_b(instr));
    let vc = rk_value(l, proto, base, Instruction::get_c(instr));
    let cond = match op {
        OpCode::Eq => vb.raw_equal(&vc),
        OpCode::Lt => order(l, &vb, &vc)?.is_lt(),
        OpCode::Le => order(l, &vb, &vc)?.is_le(),
        _ => unreachable!("non-comparison opcode"),
    };
    if cond != (a != 0) {
        skip_next(l);
    }
    Ok(())
}

/// Ordering is defined for two numbers and two strings only.
fn order(l: &mut LuaState, a: &LuaValue, b: &LuaValue) -> LuaResult<std::cmp::Ordering> {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => {
            // NaN is unordered; either direction reads as "not less".
            Ok(x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Greater))
        }
        (LuaValue::Str(x), LuaValue::Str(y)) => {
            Ok(l.pool.string(*x).as_bytes().cmp(l.pool.string(*y).as_bytes()))
        }
        _ => Err(l.raise(
            LuaError::RuntimeError,
            format!(
                "attempt to compare {} with {}",
                a.type_name(),
                b.type_name()
            ),
        )),
    }
}

/// TEST: if truthiness of R(A) disagrees with C, skip next
#[inline]
pub(super) fn exec_test(l: &mut LuaState, base: usize, instr: u32) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let c = Instruction::get_c(instr);
    if l.stack[base + a].is_truthy() != (c != 0) {
        skip_next(l);
    }
    Ok(())
}

/// TESTSET: if truthiness of R(B) agrees with C then R(A) := R(B),
/// else skip next
#[inline]
pub(super) fn exec_testset(l: &mut LuaState, base: usize, instr: u32) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr) as usize;
    let c = Instruction::get_c(instr);
    let v = l.stack[base + b];
    if v.is_truthy() == (c != 0) {
        l.stack[base + a] = v;
    } else {
        skip_next(l);
    }
    Ok(())
}
