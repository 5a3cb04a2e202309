mod instruction;

pub use instruction::Instruction;

/// Number of list items SETLIST flushes per block (LFIELDS_PER_FLUSH).
pub const FIELDS_PER_FLUSH: usize = 50;

/// Instruction format modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
}

/// Complete Lua 5.1 opcode set (38 opcodes), in lopcodes.h order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,  // R(A) := R(B)
    LoadK,     // R(A) := K(Bx)
    LoadBool,  // R(A) := (bool)B; if C, pc++
    LoadNil,   // R(A..B) := nil
    GetUpval,  // R(A) := UpValue[B]
    GetGlobal, // R(A) := Gbl[K(Bx)]
    GetTable,  // R(A) := R(B)[RK(C)]
    SetGlobal, // Gbl[K(Bx)] := R(A)
    SetUpval,  // UpValue[B] := R(A)
    SetTable,  // R(A)[RK(B)] := RK(C)
    NewTable,  // R(A) := {} (size hints B, C)
    Self_,     // R(A+1) := R(B); R(A) := R(B)[RK(C)]
    Add,       // R(A) := RK(B) + RK(C)
    Sub,       // R(A) := RK(B) - RK(C)
    Mul,       // R(A) := RK(B) * RK(C)
    Div,       // R(A) := RK(B) / RK(C)
    Mod,       // R(A) := RK(B) % RK(C)
    Pow,       // R(A) := RK(B) ^ RK(C)
    Unm,       // R(A) := -R(B)
    Not,       // R(A) := not R(B)
    Len,       // R(A) := length of R(B)
    Concat,    // R(A) := R(B) .. ... .. R(C)
    Jmp,       // pc += sBx
    Eq,        // if ((RK(B) == RK(C)) ~= A) then pc++
    Lt,        // if ((RK(B) <  RK(C)) ~= A) then pc++
    Le,        // if ((RK(B) <= RK(C)) ~= A) then pc++
    Test,      // if not (R(A) <=> C) then pc++
    TestSet,   // if (R(B) <=> C) then R(A) := R(B) else pc++
    Call,      // R(A..A+C-2) := R(A)(R(A+1..A+B-1))
    TailCall,  // return R(A)(R(A+1..A+B-1))
    Return,    // return R(A..A+B-2)
    ForLoop,   // R(A) += R(A+2); if R(A) <?= R(A+1) { pc += sBx; R(A+3) := R(A) }
    ForPrep,   // R(A) -= R(A+2); pc += sBx
    TForLoop,  // R(A+3..A+2+C) := R(A)(R(A+1), R(A+2)); loop if R(A+3) ~= nil
    SetList,   // R(A)[(C-1)*FPF + i] := R(A+i), 1 <= i <= B
    Close,     // close upvalues at or above R(A)
    Closure,   // R(A) := closure(KPROTO[Bx], pseudo-instructions follow)
    Vararg,    // R(A..A+B-2) := vararg
}

pub const NUM_OPCODES: u8 = OpCode::Vararg as u8 + 1;

impl OpCode {
    #[inline(always)]
    pub fn from_u8(byte: u8) -> Self {
        debug_assert!(byte < NUM_OPCODES);
        unsafe { std::mem::transmute(byte) }
    }

    /// Instruction format for this opcode, per the lopcodes.h table.
    pub fn get_mode(self) -> OpMode {
        use OpCode::*;
        match self {
            LoadK | GetGlobal | SetGlobal | Closure => OpMode::IABx,
            Jmp | ForLoop | ForPrep => OpMode::IAsBx,
            _ => OpMode::IABC,
        }
    }

    /// Opcodes whose B (or C) of zero means "through the stack top",
    /// consuming the open result count of the previous instruction.
    pub fn uses_top(self) -> bool {
        use OpCode::*;
        matches!(self, Call | TailCall | Return | SetList)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_count() {
        assert_eq!(NUM_OPCODES, 38);
        assert_eq!(OpCode::Move as u8, 0);
        assert_eq!(OpCode::Vararg as u8, 37);
    }

    #[test]
    fn test_round_trip() {
        for b in 0..NUM_OPCODES {
            assert_eq!(OpCode::from_u8(b) as u8, b);
        }
    }

    #[test]
    fn test_modes() {
        assert_eq!(OpCode::Move.get_mode(), OpMode::IABC);
        assert_eq!(OpCode::LoadK.get_mode(), OpMode::IABx);
        assert_eq!(OpCode::GetGlobal.get_mode(), OpMode::IABx);
        assert_eq!(OpCode::Jmp.get_mode(), OpMode::IAsBx);
        assert_eq!(OpCode::ForPrep.get_mode(), OpMode::IAsBx);
        assert_eq!(OpCode::TForLoop.get_mode(), OpMode::IABC);
    }
}
