// Numeric and generic for-loops.

use crate::lua_value::LuaValue;
use crate::lua_vm::{Instruction, LuaError, LuaResult, LuaState};

fn for_number(l: &mut LuaState, base: usize, slot: usize, what: &str) -> LuaResult<f64> {
    let v = l.stack[base + slot];
    match l.coerce_number(&v) {
        Some(n) => Ok(n),
        None => Err(l.raise(
            LuaError::RuntimeError,
            format!("'for' {} must be a number", what),
        )),
    }
}

/// FORPREP: R(A) -= R(A+2); pc += sBx
pub(super) fn exec_forprep(l: &mut LuaState, base: usize, instr: u32) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let sbx = Instruction::get_sbx(instr);
    let init = for_number(l, base, a, "initial value")?;
    let limit = for_number(l, base, a + 1, "limit")?;
    let step = for_number(l, base, a + 2, "step")?;
    l.stack[base + a] = LuaValue::number(init - step);
    l.stack[base + a + 1] = LuaValue::number(limit);
    l.stack[base + a + 2] = LuaValue::number(step);
    if let Some(frame) = l.frames.last_mut() {
        frame.pc = (frame.pc as i64 + sbx as i64) as usize;
    }
    Ok(())
}

/// FORLOOP: R(A) += R(A+2); while R(A) is within R(A+1), jump back and
/// expose the loop variable in R(A+3).
pub(super) fn exec_forloop(l: &mut LuaState, base: usize, instr: u32) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let sbx = Instruction::get_sbx(instr);
    let step = l.stack[base + a + 2].as_number().unwrap_or(0.0);
    let limit = l.stack[base + a + 1].as_number().unwrap_or(0.0);
    let idx = l.stack[base + a].as_number().unwrap_or(0.0) + step;
    l.stack[base + a] = LuaValue::number(idx);
    let in_range = if step > 0.0 { idx <= limit } else { idx >= limit };
    if in_range {
        if let Some(frame) = l.frames.last_mut() {
            frame.pc = (frame.pc as i64 + sbx as i64) as usize;
        }
        l.stack[base + a + 3] = LuaValue::number(idx);
    }
    Ok(())
}

/// TFORLOOP: call the iterator R(A) with R(A+1), R(A+2), placing C
/// results at R(A+3). A nil first result ends the loop by skipping the
/// trailing JMP; otherwise the control variable advances and the JMP
/// runs.
pub(super) fn exec_tforloop(l: &mut LuaState, base: usize, instr: u32) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let c = Instruction::get_c(instr) as i32;
    let cb = base + a + 3;
    let (func, s, ctl) = (
        l.stack[base + a],
        l.stack[base + a + 1],
        l.stack[base + a + 2],
    );
    l.stack[cb + 2] = ctl;
    l.stack[cb + 1] = s;
    l.stack[cb] = func;
    l.top = cb + 3;
    l.do_call(cb, 2, c.max(1))?;
    if let Some(frame) = l.frames.last() {
        l.top = frame.top;
    }
    let first = l.stack[cb];
    if !first.is_nil() {
        l.stack[cb - 1] = first;
    } else if let Some(frame) = l.frames.last_mut() {
        frame.pc += 1;
    }
    Ok(())
}
