// Per-function compilation state and code emission.
//
// This is the expression-discharge machinery of a single-pass code
// generator: expressions live as ExpDesc descriptors (constant, local,
// global, indexed, pending jump, relocatable instruction, ...) until a
// consumer forces them into a register or an RK operand. Boolean
// expressions carry true/false patch lists threaded through the sBx
// fields of their pending JMP instructions.

use std::collections::HashMap;

use crate::gc::StringId;
use crate::lua_value::{Chunk, LuaValue};
use crate::lua_vm::{Instruction, OpCode};

pub const NO_JUMP: i32 = -1;
/// Register sentinel used while patching test instructions.
pub const NO_REG: u32 = Instruction::MAX_A;
/// Hard per-function register limit.
pub const MAX_REGS: u32 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpKind {
    Void,
    Nil,
    True,
    False,
    /// Numeric constant in `nval`.
    KNum,
    /// String constant in `sval`.
    KStr,
    /// Constant-pool entry `info`.
    K,
    /// Local variable in register `info`.
    Local,
    /// Upvalue `info`.
    Upval,
    /// Global named by constant `info`.
    Global,
    /// Table in register `info`, key RK in `aux`.
    Indexed,
    /// Pending jump at pc `info` (comparisons).
    Jump,
    /// Instruction at pc `info` still wants a destination register.
    Reloc,
    /// Value fixed in register `info`.
    NonReloc,
    /// CALL instruction at pc `info`.
    Call,
    /// VARARG instruction at pc `info`.
    Vararg,
}

#[derive(Debug, Clone, Copy)]
pub struct ExpDesc {
    pub kind: ExpKind,
    pub info: i32,
    pub aux: i32,
    pub nval: f64,
    pub sval: StringId,
    /// Patch list: jumps taken when the expression is true.
    pub t: i32,
    /// Patch list: jumps taken when the expression is false.
    pub f: i32,
}

impl ExpDesc {
    pub fn new(kind: ExpKind, info: i32) -> Self {
        Self {
            kind,
            info,
            aux: 0,
            nval: 0.0,
            sval: StringId(0),
            t: NO_JUMP,
            f: NO_JUMP,
        }
    }

    pub fn number(n: f64) -> Self {
        let mut e = Self::new(ExpKind::KNum, 0);
        e.nval = n;
        e
    }

    pub fn string(sid: StringId) -> Self {
        let mut e = Self::new(ExpKind::KStr, 0);
        e.sval = sid;
        e
    }

    #[inline]
    pub fn has_jumps(&self) -> bool {
        self.t != self.f
    }

    #[inline]
    pub fn is_multret(&self) -> bool {
        matches!(self.kind, ExpKind::Call | ExpKind::Vararg)
    }

    fn is_constant(&self) -> bool {
        matches!(
            self.kind,
            ExpKind::Nil | ExpKind::True | ExpKind::False | ExpKind::KNum | ExpKind::KStr | ExpKind::K
        )
    }
}

#[derive(Hash, PartialEq, Eq)]
enum ConstKey {
    Nil,
    True,
    False,
    Num(u64),
    Str(StringId),
}

/// Upvalue captured by a nested function: either a parent local (by
/// register) or a parent upvalue (by index).
pub struct UpvalDesc {
    pub name: String,
    pub in_stack: bool,
    pub index: u32,
}

/// Lexical block, tracking break jumps and whether any local inside
/// was captured (forcing a CLOSE on exit).
pub struct BlockCnt {
    pub breakable: bool,
    pub has_upvalue: bool,
    pub nactive: u32,
    pub break_list: i32,
}

pub struct FuncState {
    pub chunk: Chunk,
    const_map: HashMap<ConstKey, u32>,
    /// Active local names; index is the register.
    pub actives: Vec<String>,
    /// Declared but not yet activated locals.
    pub pending_locals: Vec<String>,
    pub upvalues: Vec<UpvalDesc>,
    pub blocks: Vec<BlockCnt>,
    pub freereg: u32,
    /// Jumps waiting to target the next emitted instruction.
    jpc: i32,
    pub cur_line: u32,
    /// Register limit exceeded; reported at function end.
    pub overflow: bool,
}

impl FuncState {
    pub fn new(source: String) -> Self {
        Self {
            chunk: Chunk::new(source),
            const_map: HashMap::new(),
            actives: Vec::new(),
            pending_locals: Vec::new(),
            upvalues: Vec::new(),
            blocks: Vec::new(),
            freereg: 0,
            jpc: NO_JUMP,
            cur_line: 1,
            overflow: false,
        }
    }

    #[inline]
    pub fn nactive(&self) -> u32 {
        self.actives.len() as u32
    }

    #[inline]
    pub fn pc(&self) -> i32 {
        self.chunk.code.len() as i32
    }

    // ============ Emission ============

    pub fn code(&mut self, instr: u32) -> i32 {
        self.discharge_jpc();
        self.chunk.code.push(instr);
        self.chunk.lines.push(self.cur_line);
        self.pc() - 1
    }

    pub fn code_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> i32 {
        self.code(Instruction::create_abc(op, a, b, c))
    }

    pub fn code_abx(&mut self, op: OpCode, a: u32, bx: u32) -> i32 {
        self.code(Instruction::create_abx(op, a, bx))
    }

    pub fn code_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> i32 {
        self.code(Instruction::create_asbx(op, a, sbx))
    }

    /// RETURN first..first+nret-1 (nret < 0 returns through the top).
    pub fn emit_return(&mut self, first: u32, nret: i32) {
        self.code_abc(OpCode::Return, first, (nret + 1) as u32, 0);
    }

    // ============ Registers ============

    pub fn check_stack(&mut self, n: u32) {
        let needed = self.freereg + n;
        if needed > self.chunk.max_stack_size as u32 {
            if needed > MAX_REGS {
                self.overflow = true;
                return;
            }
            self.chunk.max_stack_size = needed as u8;
        }
    }

    pub fn reserve_regs(&mut self, n: u32) {
        self.check_stack(n);
        self.freereg += n;
    }

    fn free_reg(&mut self, reg: u32) {
        if reg >= self.nactive() && reg < NO_REG {
            self.freereg -= 1;
            debug_assert_eq!(reg, self.freereg, "register freed out of order");
        }
    }

    fn free_rk(&mut self, rk: u32) {
        if !Instruction::is_k(rk) {
            self.free_reg(rk);
        }
    }

    pub fn free_exp(&mut self, e: &ExpDesc) {
        if e.kind == ExpKind::NonReloc {
            self.free_reg(e.info as u32);
        }
    }

    // ============ Constants ============

    fn add_constant(&mut self, key: ConstKey, value: LuaValue) -> u32 {
        if let Some(&idx) = self.const_map.get(&key) {
            return idx;
        }
        let idx = self.chunk.constants.len() as u32;
        self.chunk.constants.push(value);
        self.const_map.insert(key, idx);
        idx
    }

    pub fn number_k(&mut self, n: f64) -> u32 {
        self.add_constant(ConstKey::Num(n.to_bits()), LuaValue::number(n))
    }

    pub fn string_k(&mut self, sid: StringId) -> u32 {
        self.add_constant(ConstKey::Str(sid), LuaValue::Str(sid))
    }

    pub fn nil_k(&mut self) -> u32 {
        self.add_constant(ConstKey::Nil, LuaValue::Nil)
    }

    pub fn bool_k(&mut self, b: bool) -> u32 {
        let key = if b { ConstKey::True } else { ConstKey::False };
        self.add_constant(key, LuaValue::boolean(b))
    }

    // ============ Jump lists ============

    /// Emit an unconditional jump, inheriting any jumps that were
    /// waiting on this spot.
    pub fn jump(&mut self) -> i32 {
        let save = self.jpc;
        self.jpc = NO_JUMP;
        let mut j = self.code_asbx(OpCode::Jmp, 0, NO_JUMP);
        self.concat_jump(&mut j, save);
        j
    }

    fn get_jump(&self, pc: i32) -> i32 {
        let offset = Instruction::get_sbx(self.chunk.code[pc as usize]);
        if offset == NO_JUMP {
            NO_JUMP
        } else {
            pc + 1 + offset
        }
    }

    // A fixed jump leaves every pending list, so an offset of -1 (a
    // self-loop, e.g. `while true do end`) cannot be confused with the
    // NO_JUMP chain terminator afterwards.
    fn fix_jump(&mut self, pc: i32, dest: i32) {
        let offset = dest - (pc + 1);
        Instruction::set_sbx(&mut self.chunk.code[pc as usize], offset);
    }

    /// Mark the next instruction as a jump target and return its pc.
    pub fn get_label(&mut self) -> i32 {
        self.pc()
    }

    pub fn concat_jump(&mut self, l1: &mut i32, l2: i32) {
        if l2 == NO_JUMP {
            return;
        }
        if *l1 == NO_JUMP {
            *l1 = l2;
            return;
        }
        let mut list = *l1;
        loop {
            let next = self.get_jump(list);
            if next == NO_JUMP {
                break;
            }
            list = next;
        }
        self.fix_jump(list, l2);
    }

    pub fn patch_list(&mut self, list: i32, target: i32) {
        if target == self.pc() {
            self.patch_to_here(list);
        } else {
            debug_assert!(target < self.pc());
            self.patch_list_aux(list, target, NO_REG, target);
        }
    }

    pub fn patch_to_here(&mut self, list: i32) {
        self.get_label();
        let mut jpc = self.jpc;
        self.concat_jump(&mut jpc, list);
        self.jpc = jpc;
    }

    fn discharge_jpc(&mut self) {
        let jpc = self.jpc;
        self.jpc = NO_JUMP;
        let here = self.pc();
        self.patch_list_aux(jpc, here, NO_REG, here);
    }

    fn patch_list_aux(&mut self, mut list: i32, vtarget: i32, reg: u32, dtarget: i32) {
        while list != NO_JUMP {
            let next = self.get_jump(list);
            if self.patch_test_reg(list, reg) {
                self.fix_jump(list, vtarget);
            } else {
                self.fix_jump(list, dtarget);
            }
            list = next;
        }
    }

    /// The instruction controlling a conditional jump: the test that
    /// precedes it, or the jump itself when unconditional.
    fn jump_control_pc(&self, pc: i32) -> i32 {
        if pc >= 1 && is_test_op(Instruction::get_opcode(self.chunk.code[pc as usize - 1])) {
            pc - 1
        } else {
            pc
        }
    }

    /// Retarget a TESTSET to produce its value in `reg`, or demote it
    /// to TEST when no value is wanted. Returns false for jumps whose
    /// control is not a TESTSET.
    fn patch_test_reg(&mut self, node: i32, reg: u32) -> bool {
        let ctrl = self.jump_control_pc(node);
        let instr = self.chunk.code[ctrl as usize];
        if Instruction::get_opcode(instr) != OpCode::TestSet {
            return false;
        }
        let b = Instruction::get_b(instr);
        if reg != NO_REG && reg != b {
            let mut patched = instr;
            Instruction::set_a(&mut patched, reg);
            self.chunk.code[ctrl as usize] = patched;
        } else {
            self.chunk.code[ctrl as usize] =
                Instruction::create_abc(OpCode::Test, b, 0, Instruction::get_c(instr));
        }
        true
    }

    /// Does any jump in the list need an actual boolean value (i.e. is
    /// not a value-producing TESTSET)?
    fn need_value(&self, mut list: i32) -> bool {
        while list != NO_JUMP {
            let ctrl = self.jump_control_pc(list);
            if Instruction::get_opcode(self.chunk.code[ctrl as usize]) != OpCode::TestSet {
                return true;
            }
            list = self.get_jump(list);
        }
        false
    }

    fn invert_jump(&mut self, e: &ExpDesc) {
        let ctrl = self.jump_control_pc(e.info);
        let mut instr = self.chunk.code[ctrl as usize];
        let op = Instruction::get_opcode(instr);
        debug_assert!(is_test_op(op) && op != OpCode::Test && op != OpCode::TestSet);
        let a = Instruction::get_a(instr);
        Instruction::set_a(&mut instr, if a == 0 { 1 } else { 0 });
        self.chunk.code[ctrl as usize] = instr;
    }

    fn remove_values(&mut self, mut list: i32) {
        while list != NO_JUMP {
            let next = self.get_jump(list);
            self.patch_test_reg(list, NO_REG);
            list = next;
        }
    }

    // ============ Expression discharge ============

    /// Turn variable references into computations (reads of locals,
    /// upvalues, globals and table slots).
    pub fn discharge_vars(&mut self, e: &mut ExpDesc) {
        match e.kind {
            ExpKind::Local => e.kind = ExpKind::NonReloc,
            ExpKind::Upval => {
                e.info = self.code_abc(OpCode::GetUpval, 0, e.info as u32, 0);
                e.kind = ExpKind::Reloc;
            }
            ExpKind::Global => {
                e.info = self.code_abx(OpCode::GetGlobal, 0, e.info as u32);
                e.kind = ExpKind::Reloc;
            }
            ExpKind::Indexed => {
                self.free_rk(e.aux as u32);
                self.free_reg(e.info as u32);
                e.info = self.code_abc(OpCode::GetTable, 0, e.info as u32, e.aux as u32);
                e.kind = ExpKind::Reloc;
            }
            ExpKind::Call | ExpKind::Vararg => self.set_one_ret(e),
            _ => {}
        }
    }

    fn discharge_to_reg(&mut self, e: &mut ExpDesc, reg: u32) {
        self.discharge_vars(e);
        match e.kind {
            ExpKind::Nil => {
                self.emit_nil(reg, 1);
            }
            ExpKind::False => {
                self.code_abc(OpCode::LoadBool, reg, 0, 0);
            }
            ExpKind::True => {
                self.code_abc(OpCode::LoadBool, reg, 1, 0);
            }
            ExpKind::KNum => {
                let k = self.number_k(e.nval);
                self.code_abx(OpCode::LoadK, reg, k);
            }
            ExpKind::KStr => {
                let k = self.string_k(e.sval);
                self.code_abx(OpCode::LoadK, reg, k);
            }
            ExpKind::K => {
                self.code_abx(OpCode::LoadK, reg, e.info as u32);
            }
            ExpKind::Reloc => {
                let mut instr = self.chunk.code[e.info as usize];
                Instruction::set_a(&mut instr, reg);
                self.chunk.code[e.info as usize] = instr;
            }
            ExpKind::NonReloc => {
                if reg != e.info as u32 {
                    self.code_abc(OpCode::Move, reg, e.info as u32, 0);
                }
            }
            ExpKind::Void | ExpKind::Jump => return,
            _ => unreachable!("expression not discharged"),
        }
        e.info = reg as i32;
        e.kind = ExpKind::NonReloc;
    }

    fn discharge_to_any_reg(&mut self, e: &mut ExpDesc) {
        if e.kind != ExpKind::NonReloc {
            self.reserve_regs(1);
            let reg = self.freereg - 1;
            self.discharge_to_reg(e, reg);
        }
    }

    /// LOADNIL with the adjacent-run merge the emitter traditionally
    /// applies.
    pub fn emit_nil(&mut self, from: u32, n: u32) {
        if self.jpc == NO_JUMP && self.pc() > 0 {
            let prev_pc = self.pc() - 1;
            let prev = self.chunk.code[prev_pc as usize];
            if Instruction::get_opcode(prev) == OpCode::LoadNil {
                let pfrom = Instruction::get_a(prev);
                let pto = Instruction::get_b(prev);
                if pfrom <= from && from <= pto + 1 {
                    if from + n - 1 > pto {
                        let mut patched = prev;
                        Instruction::set_b(&mut patched, from + n - 1);
                        self.chunk.code[prev_pc as usize] = patched;
                    }
                    return;
                }
            }
        }
        self.code_abc(OpCode::LoadNil, from, from + n - 1, 0);
    }

    fn code_label(&mut self, reg: u32, b: u32, jump: u32) -> i32 {
        self.get_label();
        self.code_abc(OpCode::LoadBool, reg, b, jump)
    }

    pub fn exp2reg(&mut self, e: &mut ExpDesc, reg: u32) {
        self.discharge_to_reg(e, reg);
        if e.kind == ExpKind::Jump {
            let mut t = e.t;
            self.concat_jump(&mut t, e.info);
            e.t = t;
        }
        if e.has_jumps() {
            let mut p_f = NO_JUMP;
            let mut p_t = NO_JUMP;
            if self.need_value(e.t) || self.need_value(e.f) {
                let fj = if e.kind == ExpKind::Jump {
                    NO_JUMP
                } else {
                    self.jump()
                };
                p_f = self.code_label(reg, 0, 1);
                p_t = self.code_label(reg, 1, 0);
                self.patch_to_here(fj);
            }
            let end = self.get_label();
            self.patch_list_aux(e.f, end, reg, p_f);
            self.patch_list_aux(e.t, end, reg, p_t);
        }
        e.t = NO_JUMP;
        e.f = NO_JUMP;
        e.info = reg as i32;
        e.kind = ExpKind::NonReloc;
    }

    pub fn exp2nextreg(&mut self, e: &mut ExpDesc) {
        self.discharge_vars(e);
        self.free_exp(e);
        self.reserve_regs(1);
        let reg = self.freereg - 1;
        self.exp2reg(e, reg);
    }

    pub fn exp2anyreg(&mut self, e: &mut ExpDesc) -> u32 {
        self.discharge_vars(e);
        if e.kind == ExpKind::NonReloc {
            if !e.has_jumps() {
                return e.info as u32;
            }
            if e.info as u32 >= self.nactive() {
                let reg = e.info as u32;
                self.exp2reg(e, reg);
                return reg;
            }
        }
        self.exp2nextreg(e);
        e.info as u32
    }

    pub fn exp2val(&mut self, e: &mut ExpDesc) {
        if e.has_jumps() {
            self.exp2anyreg(e);
        } else {
            self.discharge_vars(e);
        }
    }

    /// Force the expression into an RK operand: a constant index when
    /// it fits, otherwise a register.
    pub fn exp2rk(&mut self, e: &mut ExpDesc) -> u32 {
        self.exp2val(e);
        if e.is_constant() {
            let k = match e.kind {
                ExpKind::Nil => Some(self.nil_k()),
                ExpKind::True => Some(self.bool_k(true)),
                ExpKind::False => Some(self.bool_k(false)),
                ExpKind::KNum => Some(self.number_k(e.nval)),
                ExpKind::KStr => Some(self.string_k(e.sval)),
                ExpKind::K => Some(e.info as u32),
                _ => None,
            };
            if let Some(k) = k {
                if k <= Instruction::MAX_INDEX_RK {
                    e.kind = ExpKind::K;
                    e.info = k as i32;
                    return Instruction::rk_as_k(k);
                }
            }
        }
        self.exp2anyreg(e)
    }

    /// Assign the discharged expression to a variable target.
    pub fn store_var(&mut self, var: &ExpDesc, e: &mut ExpDesc) {
        match var.kind {
            ExpKind::Local => {
                self.free_exp(e);
                self.exp2reg(e, var.info as u32);
            }
            ExpKind::Upval => {
                let reg = self.exp2anyreg(e);
                self.code_abc(OpCode::SetUpval, reg, var.info as u32, 0);
                self.free_exp(e);
            }
            ExpKind::Global => {
                let reg = self.exp2anyreg(e);
                self.code_abx(OpCode::SetGlobal, reg, var.info as u32);
                self.free_exp(e);
            }
            ExpKind::Indexed => {
                let rk = self.exp2rk(e);
                self.code_abc(OpCode::SetTable, var.info as u32, var.aux as u32, rk);
                self.free_exp(e);
            }
            _ => unreachable!("invalid assignment target"),
        }
    }

    /// Method-call receiver setup: SELF places function and receiver in
    /// two fresh registers.
    pub fn emit_self(&mut self, e: &mut ExpDesc, key: &mut ExpDesc) {
        self.exp2anyreg(e);
        self.free_exp(e);
        let func = self.freereg;
        self.reserve_regs(2);
        let rk = self.exp2rk(key);
        self.code_abc(OpCode::Self_, func, e.info as u32, rk);
        self.free_exp(key);
        e.info = func as i32;
        e.kind = ExpKind::NonReloc;
    }

    /// Fix an open-result instruction (CALL/VARARG) to produce
    /// `nresults` values.
    pub fn set_returns(&mut self, e: &ExpDesc, nresults: i32) {
        if e.kind == ExpKind::Call {
            let mut instr = self.chunk.code[e.info as usize];
            Instruction::set_c(&mut instr, (nresults + 1) as u32);
            self.chunk.code[e.info as usize] = instr;
        } else if e.kind == ExpKind::Vararg {
            let mut instr = self.chunk.code[e.info as usize];
            Instruction::set_b(&mut instr, (nresults + 1) as u32);
            Instruction::set_a(&mut instr, self.freereg);
            self.chunk.code[e.info as usize] = instr;
            self.reserve_regs(1);
        }
    }

    pub fn set_multret(&mut self, e: &ExpDesc) {
        self.set_returns(e, -1);
    }

    pub fn set_one_ret(&mut self, e: &mut ExpDesc) {
        if e.kind == ExpKind::Call {
            e.kind = ExpKind::NonReloc;
            e.info = Instruction::get_a(self.chunk.code[e.info as usize]) as i32;
        } else if e.kind == ExpKind::Vararg {
            let mut instr = self.chunk.code[e.info as usize];
            Instruction::set_b(&mut instr, 2);
            self.chunk.code[e.info as usize] = instr;
            e.kind = ExpKind::Reloc;
        }
    }

    // ============ Conditional jumps ============

    fn cond_jump(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> i32 {
        self.code_abc(op, a, b, c);
        self.jump()
    }

    fn jump_on_cond(&mut self, e: &mut ExpDesc, cond: bool) -> i32 {
        if e.kind == ExpKind::Reloc {
            let instr = self.chunk.code[e.info as usize];
            if Instruction::get_opcode(instr) == OpCode::Not {
                // negation folds into the test direction
                self.chunk.code.pop();
                self.chunk.lines.pop();
                let b = Instruction::get_b(instr);
                return self.cond_jump(OpCode::Test, b, 0, if cond { 0 } else { 1 });
            }
        }
        self.discharge_to_any_reg(e);
        self.free_exp(e);
        self.cond_jump(
            OpCode::TestSet,
            NO_REG,
            e.info as u32,
            if cond { 1 } else { 0 },
        )
    }

    /// Emit the test taken when the expression is false; true jumps
    /// fall through to the code that follows.
    pub fn go_if_true(&mut self, e: &mut ExpDesc) {
        self.discharge_vars(e);
        let pc = match e.kind {
            ExpKind::K | ExpKind::KNum | ExpKind::KStr | ExpKind::True => NO_JUMP,
            ExpKind::Jump => {
                self.invert_jump(e);
                e.info
            }
            _ => self.jump_on_cond(e, false),
        };
        let mut f = e.f;
        self.concat_jump(&mut f, pc);
        e.f = f;
        self.patch_to_here(e.t);
        e.t = NO_JUMP;
    }

    pub fn go_if_false(&mut self, e: &mut ExpDesc) {
        self.discharge_vars(e);
        let pc = match e.kind {
            ExpKind::Nil | ExpKind::False => NO_JUMP,
            ExpKind::Jump => e.info,
            _ => self.jump_on_cond(e, true),
        };
        let mut t = e.t;
        self.concat_jump(&mut t, pc);
        e.t = t;
        self.patch_to_here(e.f);
        e.f = NO_JUMP;
    }

    // ============ Operators ============

    pub fn emit_not(&mut self, e: &mut ExpDesc) {
        self.discharge_vars(e);
        match e.kind {
            ExpKind::Nil | ExpKind::False => e.kind = ExpKind::True,
            ExpKind::K | ExpKind::KNum | ExpKind::KStr | ExpKind::True => {
                e.kind = ExpKind::False;
            }
            ExpKind::Jump => self.invert_jump(e),
            ExpKind::Reloc | ExpKind::NonReloc => {
                self.discharge_to_any_reg(e);
                self.free_exp(e);
                e.info = self.code_abc(OpCode::Not, 0, e.info as u32, 0);
                e.kind = ExpKind::Reloc;
            }
            _ => unreachable!("cannot negate"),
        }
        std::mem::swap(&mut e.t, &mut e.f);
        self.remove_values(e.f);
        self.remove_values(e.t);
    }

    pub fn emit_unary_minus(&mut self, e: &mut ExpDesc) {
        if e.kind == ExpKind::KNum && !e.has_jumps() {
            e.nval = -e.nval;
            return;
        }
        self.exp2anyreg(e);
        self.free_exp(e);
        e.info = self.code_abc(OpCode::Unm, 0, e.info as u32, 0);
        e.kind = ExpKind::Reloc;
    }

    pub fn emit_len(&mut self, e: &mut ExpDesc) {
        self.exp2anyreg(e);
        self.free_exp(e);
        e.info = self.code_abc(OpCode::Len, 0, e.info as u32, 0);
        e.kind = ExpKind::Reloc;
    }

    pub fn emit_arith(&mut self, op: OpCode, e1: &mut ExpDesc, e2: &mut ExpDesc) {
        let o2 = self.exp2rk(e2);
        let o1 = self.exp2rk(e1);
        // free in reverse allocation order
        if o1 > o2 {
            self.free_rk(o1);
            self.free_rk(o2);
        } else {
            self.free_rk(o2);
            self.free_rk(o1);
        }
        e1.info = self.code_abc(op, 0, o1, o2);
        e1.kind = ExpKind::Reloc;
    }

    /// Comparison: produces a Jump expression whose control is the
    /// comparison instruction.
    pub fn emit_compare(
        &mut self,
        op: OpCode,
        cond: bool,
        e1: &mut ExpDesc,
        e2: &mut ExpDesc,
        swap: bool,
    ) {
        let mut o1 = self.exp2rk(e1);
        let mut o2 = self.exp2rk(e2);
        if o1 > o2 {
            self.free_rk(o1);
            self.free_rk(o2);
        } else {
            self.free_rk(o2);
            self.free_rk(o1);
        }
        if swap {
            std::mem::swap(&mut o1, &mut o2);
        }
        e1.info = self.cond_jump(op, cond as u32, o1, o2);
        e1.kind = ExpKind::Jump;
    }

    pub fn emit_concat(&mut self, e1: &mut ExpDesc, e2: &mut ExpDesc) {
        self.exp2val(e2);
        if e2.kind == ExpKind::Reloc {
            let instr = self.chunk.code[e2.info as usize];
            if Instruction::get_opcode(instr) == OpCode::Concat {
                // chained concat folds into one instruction
                debug_assert_eq!(e1.info as u32, Instruction::get_b(instr) - 1);
                self.free_exp(e1);
                let mut patched = instr;
                Instruction::set_b(&mut patched, e1.info as u32);
                self.chunk.code[e2.info as usize] = patched;
                e1.kind = ExpKind::Reloc;
                e1.info = e2.info;
                return;
            }
        }
        self.exp2nextreg(e2);
        self.free_exp(e2);
        self.free_exp(e1);
        e1.info = self.code_abc(OpCode::Concat, 0, e1.info as u32, e2.info as u32);
        e1.kind = ExpKind::Reloc;
    }

    // ============ SETLIST ============

    /// Flush `tostore` pending constructor items into the table at
    /// `base`. A block index too wide for C spills into a raw trailing
    /// word.
    pub fn emit_setlist(&mut self, base: u32, nelems: u32, tostore: i32) {
        let c = (nelems - 1) / crate::lua_vm::FIELDS_PER_FLUSH as u32 + 1;
        let b = if tostore < 0 { 0 } else { tostore as u32 };
        if c <= Instruction::MAX_C {
            self.code_abc(OpCode::SetList, base, b, c);
        } else {
            self.code_abc(OpCode::SetList, base, b, 0);
            self.code(c);
        }
        self.freereg = base + 1;
    }
}

/// Opcodes whose following JMP they control.
fn is_test_op(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Eq | OpCode::Lt | OpCode::Le | OpCode::Test | OpCode::TestSet
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jump_chain_patching() {
        let mut fs = FuncState::new("t".into());
        let j1 = fs.jump();
        let j2 = fs.jump();
        let mut list = j1;
        fs.concat_jump(&mut list, j2);
        fs.code_abc(OpCode::Move, 0, 1, 0);
        let target = fs.get_label();
        fs.code_abc(OpCode::Move, 0, 2, 0);
        fs.patch_list(list, target);
        assert_eq!(Instruction::get_sbx(fs.chunk.code[j1 as usize]), target - j1 - 1);
        assert_eq!(Instruction::get_sbx(fs.chunk.code[j2 as usize]), target - j2 - 1);
    }

    #[test]
    fn test_constant_dedup() {
        let mut fs = FuncState::new("t".into());
        let a = fs.number_k(1.5);
        let b = fs.number_k(1.5);
        let c = fs.number_k(2.5);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(fs.chunk.constants.len(), 2);
    }

    #[test]
    fn test_loadnil_merges_adjacent_runs() {
        let mut fs = FuncState::new("t".into());
        fs.emit_nil(0, 1);
        fs.emit_nil(1, 2);
        assert_eq!(fs.chunk.code.len(), 1);
        let i = fs.chunk.code[0];
        assert_eq!(Instruction::get_opcode(i), OpCode::LoadNil);
        assert_eq!(Instruction::get_a(i), 0);
        assert_eq!(Instruction::get_b(i), 2);
    }

    #[test]
    fn test_exp_to_register() {
        let mut fs = FuncState::new("t".into());
        let mut e = ExpDesc::number(7.0);
        fs.exp2nextreg(&mut e);
        assert_eq!(e.kind, ExpKind::NonReloc);
        assert_eq!(e.info, 0);
        let i = fs.chunk.code[0];
        assert_eq!(Instruction::get_opcode(i), OpCode::LoadK);
    }
}
