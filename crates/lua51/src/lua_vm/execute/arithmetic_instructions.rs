// Arithmetic, unary and string-building instructions.
//
// All arithmetic is IEEE-754 double precision. Operands coerce the way
// the language does: numbers pass through, numeral strings parse.
// MOD keeps the sign of the divisor (x - floor(x/y)*y).

use super::rk_value;
use crate::gc::ProtoId;
use crate::lua_value::LuaValue;
use crate::lua_vm::{Instruction, LuaError, LuaResult, LuaState, OpCode};

#[inline]
fn arith_operand(l: &mut LuaState, v: &LuaValue) -> LuaResult<f64> {
    match l.coerce_number(v) {
        Some(n) => Ok(n),
        None => Err(l.raise(
            LuaError::AttemptToPerformArithmetic,
            format!("attempt to perform arithmetic on a {} value", v.type_name()),
        )),
    }
}

/// ADD/SUB/MUL/DIV/MOD/POW: R(A) := RK(B) op RK(C)
pub(super) fn exec_arith(
    l: &mut LuaState,
    proto: ProtoId,
    base: usize,
    instr: u32,
    op: OpCode,
) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let vb = rk_value(l, proto, base, Instruction::get_b(instr));
    let vc = rk_value(l, proto, base, Instruction::get_c(instr));
    let x = arith_operand(l, &vb)?;
    let y = arith_operand(l, &vc)?;
    let r = match op {
        OpCode::Add => x + y,
        OpCode::Sub => x - y,
        OpCode::Mul => x * y,
        OpCode::Div => x / y,
        OpCode::Mod => x - (x / y).floor() * y,
        OpCode::Pow => x.powf(y),
        _ => unreachable!("non-arithmetic opcode"),
    };
    l.stack[base + a] = LuaValue::number(r);
    Ok(())
}

/// UNM: R(A) := -R(B)
pub(super) fn exec_unm(l: &mut LuaState, base: usize, instr: u32) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr) as usize;
    let v = l.stack[base + b];
    let n = arith_operand(l, &v)?;
    l.stack[base + a] = LuaValue::number(-n);
    Ok(())
}

/// NOT: R(A) := not R(B)
#[inline]
pub(super) fn exec_not(l: &mut LuaState, base: usize, instr: u32) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr) as usize;
    let falsy = l.stack[base + b].is_falsy();
    l.stack[base + a] = LuaValue::boolean(falsy);
    Ok(())
}

/// LEN: R(A) := length of R(B) (string bytes or table border)
pub(super) fn exec_len(l: &mut LuaState, base: usize, instr: u32) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr) as usize;
    let v = l.stack[base + b];
    let len = match v {
        LuaValue::Str(id) => l.pool.string(id).len(),
        LuaValue::Table(t) => l.pool.table(t).len(),
        _ => {
            return Err(l.raise(
                LuaError::AttemptToGetLength,
                format!("attempt to get length of a {} value", v.type_name()),
            ));
        }
    };
    l.stack[base + a] = LuaValue::number(len as f64);
    Ok(())
}

/// CONCAT: R(A) := R(B) .. ... .. R(C)
pub(super) fn exec_concat(l: &mut LuaState, base: usize, instr: u32) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr) as usize;
    let c = Instruction::get_c(instr) as usize;
    let v = l.concat_values(base + b, c - b + 1)?;
    l.stack[base + a] = v;
    Ok(())
}
