// Recursive-descent parser and code generator driver.
//
// Single pass: statements parse directly into bytecode through the
// FuncState discharge machinery. Nested functions keep a stack of
// FuncStates; upvalue references thread through every enclosing level
// so the CLOSURE pseudo-instructions can name either a parent local
// (MOVE) or a parent upvalue (GETUPVAL).

use crate::compiler::func_state::{
    BlockCnt, ExpDesc, ExpKind, FuncState, NO_JUMP, UpvalDesc,
};
use crate::compiler::tokenizer::{Token, Tokenizer};
use crate::gc::ProtoId;
use crate::lua_vm::{Instruction, LuaState, OpCode};

const UNARY_PRIORITY: u8 = 8;

#[derive(Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// (left, right) binding priorities; right < left makes an operator
/// right-associative.
fn binop_of(token: &Token) -> Option<(BinOp, u8, u8)> {
    Some(match token {
        Token::Plus => (BinOp::Add, 6, 6),
        Token::Minus => (BinOp::Sub, 6, 6),
        Token::Star => (BinOp::Mul, 7, 7),
        Token::Slash => (BinOp::Div, 7, 7),
        Token::Percent => (BinOp::Mod, 7, 7),
        Token::Caret => (BinOp::Pow, 10, 9),
        Token::Concat => (BinOp::Concat, 5, 4),
        Token::EqEq => (BinOp::Eq, 3, 3),
        Token::NotEq => (BinOp::Ne, 3, 3),
        Token::Less => (BinOp::Lt, 3, 3),
        Token::LessEq => (BinOp::Le, 3, 3),
        Token::Greater => (BinOp::Gt, 3, 3),
        Token::GreaterEq => (BinOp::Ge, 3, 3),
        Token::And => (BinOp::And, 2, 2),
        Token::Or => (BinOp::Or, 1, 1),
        _ => return None,
    })
}

enum VarKind {
    Local(u32),
    Upval(u32),
    Global,
}

pub struct Parser<'a, 's> {
    l: &'a mut LuaState,
    tk: Tokenizer<'s>,
    token: Token,
    line: u32,
    lookahead: Option<(Token, u32)>,
    fss: Vec<FuncState>,
    chunkname: String,
}

impl<'a, 's> Parser<'a, 's> {
    pub fn new(l: &'a mut LuaState, source: &'s str, chunkname: &str) -> Result<Self, String> {
        let mut tk = Tokenizer::new(source);
        let (token, line) = tk.next_token().map_err(|e| format!("{}: {}", chunkname, e))?;
        Ok(Self {
            l,
            tk,
            token,
            line,
            lookahead: None,
            fss: Vec::new(),
            chunkname: chunkname.to_string(),
        })
    }

    /// Compile the whole source as a vararg main chunk.
    pub fn compile_main(mut self) -> Result<ProtoId, String> {
        let mut fs = FuncState::new(self.chunkname.clone());
        fs.chunk.is_vararg = true;
        fs.cur_line = self.line;
        self.fss.push(fs);
        self.parse_block_body()?;
        if self.token != Token::Eof {
            return Err(self.syntax_error("'<eof>' expected"));
        }
        self.close_function()
    }

    // ============ Token plumbing ============

    fn next(&mut self) -> Result<(), String> {
        let (token, line) = match self.lookahead.take() {
            Some(pair) => pair,
            None => self
                .tk
                .next_token()
                .map_err(|e| format!("{}: {}", self.chunkname, e))?,
        };
        self.token = token;
        self.line = line;
        if let Some(fs) = self.fss.last_mut() {
            fs.cur_line = line;
        }
        Ok(())
    }

    fn peek_ahead(&mut self) -> Result<&Token, String> {
        if self.lookahead.is_none() {
            let pair = self
                .tk
                .next_token()
                .map_err(|e| format!("{}: {}", self.chunkname, e))?;
            self.lookahead = Some(pair);
        }
        Ok(&self.lookahead.as_ref().expect("primed lookahead").0)
    }

    fn accept(&mut self, t: Token) -> Result<bool, String> {
        if self.token == t {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, t: Token, what: &str) -> Result<(), String> {
        if self.token == t {
            self.next()
        } else {
            Err(self.syntax_error(&format!("'{}' expected", what)))
        }
    }

    fn check_name(&mut self) -> Result<String, String> {
        match std::mem::replace(&mut self.token, Token::Eof) {
            Token::Name(n) => {
                self.next()?;
                Ok(n)
            }
            other => {
                self.token = other;
                Err(self.syntax_error("<name> expected"))
            }
        }
    }

    fn syntax_error(&self, msg: &str) -> String {
        format!(
            "{}:{}: {} near '{}'",
            self.chunkname,
            self.line,
            msg,
            self.token.describe()
        )
    }

    #[inline]
    fn fs(&mut self) -> &mut FuncState {
        self.fss.last_mut().expect("active function state")
    }

    // ============ Function open/close ============

    fn close_function(&mut self) -> Result<ProtoId, String> {
        let fs = self.fs();
        fs.emit_return(0, 0);
        let fs = self.fss.pop().expect("function to close");
        if fs.overflow {
            return Err(format!(
                "{}: function or expression too complex",
                self.chunkname
            ));
        }
        let mut chunk = fs.chunk;
        chunk.num_upvalues = fs.upvalues.len() as u8;
        Ok(self.l.pool.create_proto(chunk))
    }

    /// `function (...) body end` - compiles the nested function and
    /// emits CLOSURE plus its capture pseudo-instructions.
    fn func_body(&mut self, is_method: bool, line: u32) -> Result<ExpDesc, String> {
        let mut fs = FuncState::new(self.chunkname.clone());
        fs.cur_line = line;
        self.fss.push(fs);
        if is_method {
            self.fs().pending_locals.push("self".to_string());
            self.adjust_local_vars(1);
        }
        self.expect(Token::LParen, "(")?;
        self.parse_params()?;
        self.expect(Token::RParen, ")")?;
        self.parse_block_body()?;
        self.expect(Token::End, "end")?;

        let fs = self.fs();
        fs.emit_return(0, 0);
        let child = self.fss.pop().expect("nested function state");
        if child.overflow {
            return Err(format!(
                "{}: function or expression too complex",
                self.chunkname
            ));
        }
        let mut chunk = child.chunk;
        chunk.num_upvalues = child.upvalues.len() as u8;
        let pid = self.l.pool.create_proto(chunk);

        let parent = self.fs();
        let idx = parent.chunk.protos.len() as u32;
        parent.chunk.protos.push(pid);
        let pc = parent.code_abx(OpCode::Closure, 0, idx);
        for up in &child.upvalues {
            let op = if up.in_stack {
                OpCode::Move
            } else {
                OpCode::GetUpval
            };
            let instr = Instruction::create_abc(op, 0, up.index, 0);
            parent.chunk.code.push(instr);
            parent.chunk.lines.push(parent.cur_line);
        }
        Ok(ExpDesc::new(ExpKind::Reloc, pc))
    }

    fn parse_params(&mut self) -> Result<(), String> {
        let mut nparams = 0u8;
        if self.token != Token::RParen {
            loop {
                match std::mem::replace(&mut self.token, Token::Eof) {
                    Token::Name(n) => {
                        self.token = Token::Name(n.clone());
                        self.next()?;
                        self.fs().pending_locals.push(n);
                        nparams += 1;
                    }
                    Token::Dots => {
                        self.token = Token::Dots;
                        self.next()?;
                        self.fs().chunk.is_vararg = true;
                        break;
                    }
                    other => {
                        self.token = other;
                        return Err(self.syntax_error("<name> or '...' expected"));
                    }
                }
                if !self.accept(Token::Comma)? {
                    break;
                }
            }
        }
        self.adjust_local_vars(nparams as u32);
        let fs = self.fs();
        // all locals active at this point are parameters (incl. self)
        let n = fs.nactive();
        fs.chunk.num_params = n as u8;
        fs.reserve_regs(n);
        Ok(())
    }

    // ============ Locals, upvalues, globals ============

    fn adjust_local_vars(&mut self, n: u32) {
        let fs = self.fs();
        for _ in 0..n {
            if fs.pending_locals.is_empty() {
                break;
            }
            let name = fs.pending_locals.remove(0);
            fs.actives.push(name);
        }
    }

    fn search_local(fs: &FuncState, name: &str) -> Option<u32> {
        fs.actives.iter().rposition(|n| n == name).map(|i| i as u32)
    }

    /// Mark the block declaring the local in `reg` as captured, so its
    /// exit emits CLOSE.
    fn mark_block_upvalue(fs: &mut FuncState, reg: u32) {
        for bl in fs.blocks.iter_mut().rev() {
            if bl.nactive <= reg {
                bl.has_upvalue = true;
                return;
            }
        }
    }

    fn add_upvalue(fs: &mut FuncState, name: &str, in_stack: bool, index: u32) -> u32 {
        for (i, up) in fs.upvalues.iter().enumerate() {
            if up.name == name && up.in_stack == in_stack && up.index == index {
                return i as u32;
            }
        }
        fs.upvalues.push(UpvalDesc {
            name: name.to_string(),
            in_stack,
            index,
        });
        (fs.upvalues.len() - 1) as u32
    }

    fn resolve_var(&mut self, level: usize, name: &str, base: bool) -> VarKind {
        if let Some(reg) = Self::search_local(&self.fss[level], name) {
            if !base {
                Self::mark_block_upvalue(&mut self.fss[level], reg);
            }
            return VarKind::Local(reg);
        }
        if level == 0 {
            return VarKind::Global;
        }
        match self.resolve_var(level - 1, name, false) {
            VarKind::Global => VarKind::Global,
            VarKind::Local(reg) => {
                VarKind::Upval(Self::add_upvalue(&mut self.fss[level], name, true, reg))
            }
            VarKind::Upval(idx) => {
                VarKind::Upval(Self::add_upvalue(&mut self.fss[level], name, false, idx))
            }
        }
    }

    fn single_var(&mut self, name: &str) -> ExpDesc {
        let top = self.fss.len() - 1;
        match self.resolve_var(top, name, true) {
            VarKind::Local(reg) => ExpDesc::new(ExpKind::Local, reg as i32),
            VarKind::Upval(idx) => ExpDesc::new(ExpKind::Upval, idx as i32),
            VarKind::Global => {
                let sid = self.l.intern_string(name);
                let k = self.fs().string_k(sid);
                ExpDesc::new(ExpKind::Global, k as i32)
            }
        }
    }

    // ============ Blocks ============

    fn enter_block(&mut self, breakable: bool) {
        let nactive = self.fs().nactive();
        self.fs().blocks.push(BlockCnt {
            breakable,
            has_upvalue: false,
            nactive,
            break_list: NO_JUMP,
        });
    }

    fn leave_block(&mut self) {
        let fs = self.fs();
        let bl = fs.blocks.pop().expect("block to leave");
        fs.actives.truncate(bl.nactive as usize);
        if bl.has_upvalue {
            fs.code_abc(OpCode::Close, bl.nactive, 0, 0);
        }
        fs.freereg = fs.nactive();
        if bl.break_list != NO_JUMP {
            fs.patch_to_here(bl.break_list);
        }
    }

    fn block(&mut self) -> Result<(), String> {
        self.enter_block(false);
        self.parse_block_body()?;
        self.leave_block();
        Ok(())
    }

    fn block_follow(&self) -> bool {
        matches!(
            self.token,
            Token::Eof | Token::End | Token::Else | Token::Elseif | Token::Until
        )
    }

    fn parse_block_body(&mut self) -> Result<(), String> {
        let mut is_last = false;
        while !is_last && !self.block_follow() {
            is_last = self.statement()?;
            self.accept(Token::Semi)?;
            let fs = self.fs();
            fs.freereg = fs.nactive();
        }
        Ok(())
    }

    // ============ Statements ============

    /// Returns true for statements that must end a block.
    fn statement(&mut self) -> Result<bool, String> {
        match &self.token {
            Token::If => {
                self.if_stat()?;
                Ok(false)
            }
            Token::While => {
                self.while_stat()?;
                Ok(false)
            }
            Token::Do => {
                self.next()?;
                self.block()?;
                self.expect(Token::End, "end")?;
                Ok(false)
            }
            Token::For => {
                self.for_stat()?;
                Ok(false)
            }
            Token::Repeat => {
                self.repeat_stat()?;
                Ok(false)
            }
            Token::Function => {
                self.func_stat()?;
                Ok(false)
            }
            Token::Local => {
                self.next()?;
                if self.accept(Token::Function)? {
                    self.local_func_stat()?;
                } else {
                    self.local_stat()?;
                }
                Ok(false)
            }
            Token::Return => {
                self.return_stat()?;
                Ok(true)
            }
            Token::Break => {
                self.next()?;
                self.break_stat()?;
                Ok(true)
            }
            _ => {
                self.expr_stat()?;
                Ok(false)
            }
        }
    }

    fn cond(&mut self) -> Result<i32, String> {
        let mut e = self.expr()?;
        if e.kind == ExpKind::Nil {
            e.kind = ExpKind::False;
        }
        self.fs().go_if_true(&mut e);
        Ok(e.f)
    }

    fn if_stat(&mut self) -> Result<(), String> {
        let mut flist = self.test_then_block()?;
        let mut escape = NO_JUMP;
        while self.token == Token::Elseif {
            let j = self.fs().jump();
            self.fs().concat_jump(&mut escape, j);
            self.fs().patch_to_here(flist);
            flist = self.test_then_block()?;
        }
        if self.token == Token::Else {
            let j = self.fs().jump();
            self.fs().concat_jump(&mut escape, j);
            self.fs().patch_to_here(flist);
            self.next()?;
            self.block()?;
        } else {
            self.fs().concat_jump(&mut escape, flist);
        }
        self.fs().patch_to_here(escape);
        self.expect(Token::End, "end")
    }

    fn test_then_block(&mut self) -> Result<i32, String> {
        self.next()?; // skip `if` / `elseif`
        let flist = self.cond()?;
        self.expect(Token::Then, "then")?;
        self.block()?;
        Ok(flist)
    }

    fn while_stat(&mut self) -> Result<(), String> {
        self.next()?;
        let init = self.fs().get_label();
        let condexit = self.cond()?;
        self.enter_block(true);
        self.expect(Token::Do, "do")?;
        self.block()?;
        let j = self.fs().jump();
        self.fs().patch_list(j, init);
        self.expect(Token::End, "end")?;
        self.leave_block();
        self.fs().patch_to_here(condexit);
        Ok(())
    }

    fn repeat_stat(&mut self) -> Result<(), String> {
        let init = self.fs().get_label();
        self.enter_block(true);
        self.enter_block(false);
        self.next()?;
        self.parse_block_body()?;
        self.expect(Token::Until, "until")?;
        let condexit = self.cond()?;
        let captured = self
            .fs()
            .blocks
            .last()
            .map(|b| b.has_upvalue)
            .unwrap_or(false);
        if !captured {
            self.leave_block();
            self.fs().patch_list(condexit, init);
        } else {
            // locals of the body are captured: break out on the
            // condition, close scope, then loop
            self.break_stat()?;
            self.fs().patch_to_here(condexit);
            self.leave_block();
            let j = self.fs().jump();
            self.fs().patch_list(j, init);
        }
        self.leave_block();
        Ok(())
    }

    fn break_stat(&mut self) -> Result<(), String> {
        let fs = self.fs();
        let mut upval = false;
        let mut target = None;
        for (i, bl) in fs.blocks.iter().enumerate().rev() {
            if bl.breakable {
                target = Some(i);
                break;
            }
            upval |= bl.has_upvalue;
        }
        let Some(idx) = target else {
            return Err(self.syntax_error("no loop to break"));
        };
        let nactive = fs.blocks[idx].nactive;
        if upval {
            fs.code_abc(OpCode::Close, nactive, 0, 0);
        }
        let j = fs.jump();
        let mut list = fs.blocks[idx].break_list;
        fs.concat_jump(&mut list, j);
        fs.blocks[idx].break_list = list;
        Ok(())
    }

    fn for_stat(&mut self) -> Result<(), String> {
        self.next()?;
        let name = self.check_name()?;
        self.enter_block(true);
        match self.token {
            Token::Assign => self.for_num(name)?,
            Token::Comma | Token::In => self.for_list(name)?,
            _ => return Err(self.syntax_error("'=' or 'in' expected")),
        }
        self.expect(Token::End, "end")?;
        self.leave_block();
        Ok(())
    }

    fn exp_to_next_reg(&mut self) -> Result<(), String> {
        let mut e = self.expr()?;
        self.fs().exp2nextreg(&mut e);
        Ok(())
    }

    fn for_num(&mut self, name: String) -> Result<(), String> {
        let base = self.fs().freereg;
        self.fs().pending_locals.push("(for index)".to_string());
        self.fs().pending_locals.push("(for limit)".to_string());
        self.fs().pending_locals.push("(for step)".to_string());
        self.fs().pending_locals.push(name);
        self.expect(Token::Assign, "=")?;
        self.exp_to_next_reg()?;
        self.expect(Token::Comma, ",")?;
        self.exp_to_next_reg()?;
        if self.accept(Token::Comma)? {
            self.exp_to_next_reg()?;
        } else {
            let fs = self.fs();
            let k = fs.number_k(1.0);
            let reg = fs.freereg;
            fs.code_abx(OpCode::LoadK, reg, k);
            fs.reserve_regs(1);
        }
        self.for_body(base, 1, true)
    }

    fn for_list(&mut self, first_name: String) -> Result<(), String> {
        let base = self.fs().freereg;
        self.fs()
            .pending_locals
            .push("(for generator)".to_string());
        self.fs().pending_locals.push("(for state)".to_string());
        self.fs().pending_locals.push("(for control)".to_string());
        let mut nvars = 1u32;
        self.fs().pending_locals.push(first_name);
        // the pending queue holds control vars first, then loop vars
        while self.accept(Token::Comma)? {
            let n = self.check_name()?;
            self.fs().pending_locals.push(n);
            nvars += 1;
        }
        self.expect(Token::In, "in")?;
        let (nexps, mut e) = self.exp_list()?;
        self.adjust_assign(3, nexps, &mut e);
        self.fs().check_stack(3);
        self.for_body(base, nvars, false)
    }

    fn for_body(&mut self, base: u32, nvars: u32, is_num: bool) -> Result<(), String> {
        self.adjust_local_vars(3);
        self.expect(Token::Do, "do")?;
        let prep = if is_num {
            self.fs().code_asbx(OpCode::ForPrep, base, NO_JUMP)
        } else {
            self.fs().jump()
        };
        self.enter_block(false);
        self.adjust_local_vars(nvars);
        self.fs().reserve_regs(nvars);
        self.parse_block_body()?;
        self.leave_block();
        self.fs().patch_to_here(prep);
        let back = if is_num {
            self.fs().code_asbx(OpCode::ForLoop, base, NO_JUMP)
        } else {
            self.fs().code_abc(OpCode::TForLoop, base, 0, nvars);
            self.fs().jump()
        };
        self.fs().patch_list(back, prep + 1);
        Ok(())
    }

    fn func_stat(&mut self) -> Result<(), String> {
        let line = self.line;
        self.next()?;
        let name = self.check_name()?;
        let mut v = self.single_var(&name);
        let mut is_method = false;
        loop {
            match self.token {
                Token::Dot => {
                    self.next()?;
                    self.index_by_name(&mut v)?;
                }
                Token::Colon => {
                    self.next()?;
                    self.index_by_name(&mut v)?;
                    is_method = true;
                    break;
                }
                _ => break,
            }
        }
        let mut b = self.func_body(is_method, line)?;
        self.fs().store_var(&v, &mut b);
        Ok(())
    }

    fn local_func_stat(&mut self) -> Result<(), String> {
        let line = self.line;
        let name = self.check_name()?;
        let fs = self.fs();
        fs.pending_locals.push(name);
        let reg = fs.freereg;
        fs.reserve_regs(1);
        self.adjust_local_vars(1);
        let mut b = self.func_body(false, line)?;
        let v = ExpDesc::new(ExpKind::Local, reg as i32);
        self.fs().store_var(&v, &mut b);
        Ok(())
    }

    fn local_stat(&mut self) -> Result<(), String> {
        let mut nvars = 0u32;
        loop {
            let name = self.check_name()?;
            self.fs().pending_locals.push(name);
            nvars += 1;
            if !self.accept(Token::Comma)? {
                break;
            }
        }
        let (nexps, mut e) = if self.accept(Token::Assign)? {
            self.exp_list()?
        } else {
            (0, ExpDesc::new(ExpKind::Void, 0))
        };
        self.adjust_assign(nvars as usize, nexps, &mut e);
        self.adjust_local_vars(nvars);
        Ok(())
    }

    fn return_stat(&mut self) -> Result<(), String> {
        self.next()?;
        let fs_nactive = self.fs().nactive();
        if self.block_follow() || self.token == Token::Semi {
            self.fs().emit_return(0, 0);
            return Ok(());
        }
        let (nexps, mut e) = self.exp_list()?;
        let (first, nret) = if e.is_multret() {
            self.fs().set_multret(&e);
            if e.kind == ExpKind::Call && nexps == 1 {
                // `return f(...)` becomes a tail call
                let fs = self.fs();
                let instr = fs.chunk.code[e.info as usize];
                let a = Instruction::get_a(instr);
                let b = Instruction::get_b(instr);
                fs.chunk.code[e.info as usize] =
                    Instruction::create_abc(OpCode::TailCall, a, b, 0);
            }
            (fs_nactive, -1)
        } else if nexps == 1 {
            let reg = self.fs().exp2anyreg(&mut e);
            (reg, 1)
        } else {
            self.fs().exp2nextreg(&mut e);
            let first = fs_nactive;
            let nret = self.fs().freereg - first;
            (first, nret as i32)
        };
        self.fs().emit_return(first, nret);
        Ok(())
    }

    /// Call statement or (multiple) assignment.
    fn expr_stat(&mut self) -> Result<(), String> {
        let e = self.suffixed_exp()?;
        if e.kind == ExpKind::Call && self.token != Token::Assign && self.token != Token::Comma {
            // plain call: discard results
            let fs = self.fs();
            let mut instr = fs.chunk.code[e.info as usize];
            Instruction::set_c(&mut instr, 1);
            fs.chunk.code[e.info as usize] = instr;
            return Ok(());
        }
        let mut lhs = vec![e];
        while self.accept(Token::Comma)? {
            lhs.push(self.suffixed_exp()?);
        }
        for v in &lhs {
            if !matches!(
                v.kind,
                ExpKind::Local | ExpKind::Upval | ExpKind::Global | ExpKind::Indexed
            ) {
                return Err(self.syntax_error("syntax error: cannot assign"));
            }
        }
        self.expect(Token::Assign, "=")?;
        let (nexps, mut rhs) = self.exp_list()?;
        if lhs.len() == 1 && nexps == 1 {
            self.fs().set_one_ret(&mut rhs);
            self.fs().store_var(&lhs[0], &mut rhs);
            return Ok(());
        }
        self.adjust_assign(lhs.len(), nexps, &mut rhs);
        // values sit in consecutive registers ending at freereg; each
        // store consumes the topmost one
        let nvars = lhs.len();
        let value_base = self.fs().freereg - nvars as u32;
        for i in (0..nvars).rev() {
            let mut val = ExpDesc::new(ExpKind::NonReloc, (value_base + i as u32) as i32);
            self.fs().store_var(&lhs[i], &mut val);
        }
        Ok(())
    }

    /// Balance an expression list against a target count: spread an
    /// open call/vararg, pad with nils, or drop extras.
    fn adjust_assign(&mut self, nvars: usize, nexps: usize, e: &mut ExpDesc) {
        let fs = self.fs();
        let mut extra = nvars as i32 - nexps as i32;
        if e.is_multret() {
            extra += 1; // the open expression supplies the difference
            if extra < 0 {
                extra = 0;
            }
            fs.set_returns(e, extra);
            if extra > 1 {
                fs.reserve_regs(extra as u32 - 1);
            }
        } else {
            if e.kind != ExpKind::Void {
                fs.exp2nextreg(e);
            }
            if extra > 0 {
                let reg = fs.freereg;
                fs.reserve_regs(extra as u32);
                fs.emit_nil(reg, extra as u32);
            }
        }
        if nexps > nvars {
            fs.freereg -= (nexps - nvars) as u32;
        }
    }

    // ============ Expressions ============

    fn expr(&mut self) -> Result<ExpDesc, String> {
        self.sub_expr(0)
    }

    fn sub_expr(&mut self, limit: u8) -> Result<ExpDesc, String> {
        let mut e = match self.token {
            Token::Not => {
                self.next()?;
                let mut e = self.sub_expr(UNARY_PRIORITY)?;
                self.fs().emit_not(&mut e);
                e
            }
            Token::Minus => {
                self.next()?;
                let mut e = self.sub_expr(UNARY_PRIORITY)?;
                self.fs().emit_unary_minus(&mut e);
                e
            }
            Token::Hash => {
                self.next()?;
                let mut e = self.sub_expr(UNARY_PRIORITY)?;
                self.fs().emit_len(&mut e);
                e
            }
            _ => self.simple_exp()?,
        };
        while let Some((op, left, right)) = binop_of(&self.token) {
            if left <= limit {
                break;
            }
            self.next()?;
            self.infix(op, &mut e);
            let mut e2 = self.sub_expr(right)?;
            self.posfix(op, &mut e, &mut e2);
        }
        Ok(e)
    }

    fn infix(&mut self, op: BinOp, e: &mut ExpDesc) {
        let fs = self.fs();
        match op {
            BinOp::And => fs.go_if_true(e),
            BinOp::Or => fs.go_if_false(e),
            BinOp::Concat => fs.exp2nextreg(e),
            _ => {
                fs.exp2rk(e);
            }
        }
    }

    fn posfix(&mut self, op: BinOp, e: &mut ExpDesc, e2: &mut ExpDesc) {
        let fs = self.fs();
        match op {
            BinOp::And => {
                debug_assert_eq!(e.t, NO_JUMP);
                fs.discharge_vars(e2);
                let mut f = e2.f;
                fs.concat_jump(&mut f, e.f);
                e2.f = f;
                *e = *e2;
            }
            BinOp::Or => {
                debug_assert_eq!(e.f, NO_JUMP);
                fs.discharge_vars(e2);
                let mut t = e2.t;
                fs.concat_jump(&mut t, e.t);
                e2.t = t;
                *e = *e2;
            }
            BinOp::Concat => fs.emit_concat(e, e2),
            BinOp::Add => fs.emit_arith(OpCode::Add, e, e2),
            BinOp::Sub => fs.emit_arith(OpCode::Sub, e, e2),
            BinOp::Mul => fs.emit_arith(OpCode::Mul, e, e2),
            BinOp::Div => fs.emit_arith(OpCode::Div, e, e2),
            BinOp::Mod => fs.emit_arith(OpCode::Mod, e, e2),
            BinOp::Pow => fs.emit_arith(OpCode::Pow, e, e2),
            BinOp::Eq => fs.emit_compare(OpCode::Eq, true, e, e2, false),
            BinOp::Ne => fs.emit_compare(OpCode::Eq, false, e, e2, false),
            BinOp::Lt => fs.emit_compare(OpCode::Lt, true, e, e2, false),
            BinOp::Le => fs.emit_compare(OpCode::Le, true, e, e2, false),
            BinOp::Gt => fs.emit_compare(OpCode::Lt, true, e, e2, true),
            BinOp::Ge => fs.emit_compare(OpCode::Le, true, e, e2, true),
        }
    }

    fn simple_exp(&mut self) -> Result<ExpDesc, String> {
        let e = match std::mem::replace(&mut self.token, Token::Eof) {
            Token::Number(n) => {
                self.token = Token::Number(n);
                self.next()?;
                ExpDesc::number(n)
            }
            Token::Str(s) => {
                self.token = Token::Eof;
                self.next()?;
                let sid = self.l.intern_string(&s);
                ExpDesc::string(sid)
            }
            Token::Nil => {
                self.token = Token::Nil;
                self.next()?;
                ExpDesc::new(ExpKind::Nil, 0)
            }
            Token::True => {
                self.token = Token::True;
                self.next()?;
                ExpDesc::new(ExpKind::True, 0)
            }
            Token::False => {
                self.token = Token::False;
                self.next()?;
                ExpDesc::new(ExpKind::False, 0)
            }
            Token::Dots => {
                self.token = Token::Dots;
                self.next()?;
                if !self.fs().chunk.is_vararg {
                    return Err(self.syntax_error("cannot use '...' outside a vararg function"));
                }
                let pc = self.fs().code_abc(OpCode::Vararg, 0, 1, 0);
                ExpDesc::new(ExpKind::Vararg, pc)
            }
            Token::LBrace => {
                self.token = Token::LBrace;
                self.constructor()?
            }
            Token::Function => {
                self.token = Token::Function;
                let line = self.line;
                self.next()?;
                self.func_body(false, line)?
            }
            other => {
                self.token = other;
                self.suffixed_exp()?
            }
        };
        Ok(e)
    }

    fn prefix_exp(&mut self) -> Result<ExpDesc, String> {
        match std::mem::replace(&mut self.token, Token::Eof) {
            Token::Name(n) => {
                self.token = Token::Name(n.clone());
                self.next()?;
                Ok(self.single_var(&n))
            }
            Token::LParen => {
                self.token = Token::LParen;
                self.next()?;
                let mut e = self.expr()?;
                self.expect(Token::RParen, ")")?;
                // parentheses truncate multiple results to one
                self.fs().discharge_vars(&mut e);
                Ok(e)
            }
            other => {
                self.token = other;
                Err(self.syntax_error("unexpected symbol"))
            }
        }
    }

    fn index_by_name(&mut self, e: &mut ExpDesc) -> Result<(), String> {
        self.fs().exp2anyreg(e);
        let name = self.check_name()?;
        let sid = self.l.intern_string(&name);
        let mut key = ExpDesc::string(sid);
        let aux = self.fs().exp2rk(&mut key);
        e.aux = aux as i32;
        e.kind = ExpKind::Indexed;
        Ok(())
    }

    fn suffixed_exp(&mut self) -> Result<ExpDesc, String> {
        let mut e = self.prefix_exp()?;
        loop {
            match self.token {
                Token::Dot => {
                    self.next()?;
                    self.index_by_name(&mut e)?;
                }
                Token::LBracket => {
                    self.next()?;
                    self.fs().exp2anyreg(&mut e);
                    let mut k = self.expr()?;
                    self.expect(Token::RBracket, "]")?;
                    self.fs().exp2val(&mut k);
                    let aux = self.fs().exp2rk(&mut k);
                    e.aux = aux as i32;
                    e.kind = ExpKind::Indexed;
                }
                Token::Colon => {
                    self.next()?;
                    let name = self.check_name()?;
                    let sid = self.l.intern_string(&name);
                    let mut key = ExpDesc::string(sid);
                    self.fs().emit_self(&mut e, &mut key);
                    self.func_args(&mut e)?;
                }
                Token::LParen | Token::Str(_) | Token::LBrace => {
                    self.fs().exp2nextreg(&mut e);
                    self.func_args(&mut e)?;
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn func_args(&mut self, e: &mut ExpDesc) -> Result<(), String> {
        let line = self.line;
        let mut args = match std::mem::replace(&mut self.token, Token::Eof) {
            Token::LParen => {
                self.token = Token::LParen;
                self.next()?;
                if self.token == Token::RParen {
                    self.next()?;
                    ExpDesc::new(ExpKind::Void, 0)
                } else {
                    let (_, mut a) = self.exp_list()?;
                    if a.is_multret() {
                        self.fs().set_multret(&a);
                    }
                    self.expect(Token::RParen, ")")?;
                    a
                }
            }
            Token::Str(s) => {
                self.token = Token::Eof;
                self.next()?;
                let sid = self.l.intern_string(&s);
                ExpDesc::string(sid)
            }
            Token::LBrace => {
                self.token = Token::LBrace;
                self.constructor()?
            }
            other => {
                self.token = other;
                return Err(self.syntax_error("function arguments expected"));
            }
        };
        debug_assert_eq!(e.kind, ExpKind::NonReloc);
        let base = e.info as u32;
        let b = if args.is_multret() {
            0
        } else {
            if args.kind != ExpKind::Void {
                self.fs().exp2nextreg(&mut args);
            }
            let fs = self.fs();
            fs.freereg - (base + 1) + 1
        };
        let fs = self.fs();
        fs.cur_line = line;
        let pc = fs.code_abc(OpCode::Call, base, b, 2);
        e.kind = ExpKind::Call;
        e.info = pc;
        fs.freereg = base + 1;
        Ok(())
    }

    fn exp_list(&mut self) -> Result<(usize, ExpDesc), String> {
        let mut e = self.expr()?;
        let mut n = 1;
        while self.accept(Token::Comma)? {
            self.fs().exp2nextreg(&mut e);
            e = self.expr()?;
            n += 1;
        }
        Ok((n, e))
    }

    // ============ Table constructors ============

    fn constructor(&mut self) -> Result<ExpDesc, String> {
        let pc = self.fs().code_abc(OpCode::NewTable, 0, 0, 0);
        let mut t = ExpDesc::new(ExpKind::Reloc, pc);
        self.fs().exp2nextreg(&mut t);
        self.expect(Token::LBrace, "{")?;
        let mut na = 0u32;
        let mut nh = 0u32;
        let mut tostore = 0u32;
        let mut pending = ExpDesc::new(ExpKind::Void, 0);
        loop {
            if self.token == Token::RBrace {
                break;
            }
            // flush the previous array item
            if pending.kind != ExpKind::Void {
                self.fs().exp2nextreg(&mut pending);
                pending = ExpDesc::new(ExpKind::Void, 0);
                if tostore == crate::lua_vm::FIELDS_PER_FLUSH as u32 {
                    self.fs().emit_setlist(t.info as u32, na, tostore as i32);
                    tostore = 0;
                }
            }
            let is_record_field =
                matches!(self.token, Token::Name(_)) && *self.peek_ahead()? == Token::Assign;
            if is_record_field {
                let name = self.check_name()?;
                let sid = self.l.intern_string(&name);
                let key = ExpDesc::string(sid);
                self.next()?; // '='
                self.rec_field(&t, key)?;
                nh += 1;
            } else if self.token == Token::LBracket {
                self.next()?;
                let mut key = self.expr()?;
                self.expect(Token::RBracket, "]")?;
                self.fs().exp2val(&mut key);
                self.expect(Token::Assign, "=")?;
                self.rec_field(&t, key)?;
                nh += 1;
            } else {
                pending = self.expr()?;
                na += 1;
                tostore += 1;
            }
            if !self.accept(Token::Comma)? && !self.accept(Token::Semi)? {
                break;
            }
        }
        self.expect(Token::RBrace, "}")?;
        // final flush
        if pending.is_multret() {
            self.fs().set_multret(&pending);
            self.fs().emit_setlist(t.info as u32, na, -1);
            na -= 1;
        } else {
            if pending.kind != ExpKind::Void {
                self.fs().exp2nextreg(&mut pending);
            }
            if tostore > 0 {
                self.fs().emit_setlist(t.info as u32, na, tostore as i32);
            }
        }
        // advisory size hints
        let fs = self.fs();
        let mut instr = fs.chunk.code[pc as usize];
        Instruction::set_b(&mut instr, na.min(Instruction::MAX_B));
        Instruction::set_c(&mut instr, nh.min(Instruction::MAX_C));
        fs.chunk.code[pc as usize] = instr;
        Ok(t)
    }

    fn rec_field(&mut self, t: &ExpDesc, mut key: ExpDesc) -> Result<(), String> {
        let reg = self.fs().freereg;
        let rk_key = self.fs().exp2rk(&mut key);
        let mut val = self.expr()?;
        let rk_val = self.fs().exp2rk(&mut val);
        let fs = self.fs();
        fs.code_abc(OpCode::SetTable, t.info as u32, rk_key, rk_val);
        fs.freereg = reg;
        Ok(())
    }
}
