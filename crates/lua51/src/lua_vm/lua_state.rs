// LuaState - the interpreter state and embedding API
//
// One state owns everything: the object pool and collector, the string
// interner, the globals and registry tables, the main-thread value
// stack, the call-info chain and the open-upvalue list. The embedding
// API is the stack discipline of lauxlib: positive indices count from
// the current call's base, negative indices from the top.

use crate::compiler;
use crate::gc::{
    ClosureId, Gc, GcRoots, ObjectPool, ProtoId, StringId, StringInterner, TableId, UpvalueId,
    UpvalueState,
};
use crate::lua_value::{LuaTable, LuaValue};
use crate::lua_vm::call_info::{CallInfo, LUA_MULTRET};
use crate::lua_vm::execute::lua_execute;
use crate::lua_vm::{CFunction, LuaError, LuaFullError, LuaResult, SafeOption};

pub const LUA_VERSION: &str = "Lua 5.1";

pub struct LuaState {
    pub(crate) pool: ObjectPool,
    pub(crate) gc: Gc,
    pub(crate) interner: StringInterner,
    pub(crate) globals: TableId,
    pub(crate) registry: TableId,
    /// Fixed-capacity value stack of the main thread.
    pub(crate) stack: Vec<LuaValue>,
    /// First free slot; everything below is live.
    pub(crate) top: usize,
    pub(crate) frames: Vec<CallInfo>,
    /// Open upvalues sorted by descending stack index.
    pub(crate) open_upvalues: Vec<UpvalueId>,
    pub(crate) error_msg: String,
    /// Error value raised by `error(v)` with a non-string argument.
    pub(crate) error_value: LuaValue,
    /// Whether error_msg already carries a source:line prefix.
    pub(crate) error_positioned: bool,
    options: SafeOption,
}

impl LuaState {
    pub fn new() -> Self {
        Self::with_options(SafeOption::default())
    }

    pub fn with_options(options: SafeOption) -> Self {
        let mut pool = ObjectPool::new();
        let globals = pool.create_table(0, 32);
        let registry = pool.create_table(0, 8);
        let mut l = Self {
            pool,
            gc: Gc::new(),
            interner: StringInterner::new(),
            globals,
            registry,
            stack: vec![LuaValue::Nil; options.stack_size],
            top: 0,
            frames: Vec::with_capacity(16),
            open_upvalues: Vec::new(),
            error_msg: String::new(),
            error_value: LuaValue::Nil,
            error_positioned: false,
            options,
        };
        // Globals are pinned through the registry as well (slot 1).
        l.pool
            .table_mut(registry)
            .set_int(1, LuaValue::Table(globals));
        let g = LuaValue::Table(globals);
        l.set_global("_G", g);
        let version = l.create_string(LUA_VERSION);
        l.set_global("_VERSION", version);
        l
    }

    /// Register the standard libraries into globals.
    pub fn open_libs(&mut self) -> LuaResult<()> {
        crate::lib_registry::create_standard_registry().load_all(self)
    }

    #[inline(always)]
    pub fn globals(&self) -> TableId {
        self.globals
    }

    #[inline(always)]
    pub fn registry(&self) -> TableId {
        self.registry
    }

    // ============ Object creation ============

    /// Intern `s`, returning the canonical id for its contents.
    pub fn intern_string(&mut self, s: &str) -> StringId {
        self.maybe_collect();
        let (id, _fresh) = self.interner.intern(s, &mut self.pool.strings);
        id
    }

    pub fn create_string(&mut self, s: &str) -> LuaValue {
        LuaValue::Str(self.intern_string(s))
    }

    pub fn create_table(&mut self, array_hint: usize, hash_hint: usize) -> LuaValue {
        self.maybe_collect();
        LuaValue::Table(self.pool.create_table(array_hint, hash_hint))
    }

    pub(crate) fn create_closure(&mut self, proto: ProtoId, upvalues: Vec<UpvalueId>) -> LuaValue {
        self.maybe_collect();
        LuaValue::Closure(self.pool.create_closure(proto, upvalues))
    }

    /// Wrap a host function, optionally closing over upvalue values.
    pub fn create_c_closure(&mut self, func: CFunction, upvalues: Vec<LuaValue>) -> LuaValue {
        self.maybe_collect();
        LuaValue::CClosure(self.pool.create_c_closure(func, upvalues, None))
    }

    // ============ Garbage collection ============

    #[inline]
    pub(crate) fn maybe_collect(&mut self) {
        if self.gc.should_collect(self.pool.total_objects()) {
            self.collect_garbage();
        }
    }

    /// Run a full mark-sweep cycle now. Returns objects freed.
    pub fn collect_garbage(&mut self) -> usize {
        let mut frame_callees: Vec<LuaValue> =
            self.frames.iter().map(|f| f.func).collect();
        // The in-flight error value has no stack slot of its own.
        frame_callees.push(self.error_value);
        let watermark = self.stack_watermark();
        self.gc.collect(
            &mut self.pool,
            &mut self.interner,
            GcRoots {
                globals: self.globals,
                registry: self.registry,
                stack: &self.stack[..watermark],
                frame_callees: &frame_callees,
                open_upvalues: &self.open_upvalues,
            },
        )
    }

    /// Live extent of the stack: the logical top or any frame's
    /// register window, whichever reaches higher.
    fn stack_watermark(&self) -> usize {
        let mut w = self.top;
        for f in &self.frames {
            w = w.max(f.top);
        }
        w.min(self.stack.len())
    }

    pub fn gc_object_count(&self) -> usize {
        self.pool.total_objects()
    }

    // ============ Errors ============

    /// Record an error message and return its kind for propagation.
    pub(crate) fn raise(&mut self, kind: LuaError, msg: impl Into<String>) -> LuaError {
        self.error_msg = msg.into();
        self.error_value = LuaValue::Nil;
        self.error_positioned = false;
        kind
    }

    /// Raise with an arbitrary error value (`error(v)`).
    pub(crate) fn raise_value(&mut self, value: LuaValue) -> LuaError {
        self.error_value = value;
        self.error_msg.clear();
        self.error_positioned = true;
        LuaError::RuntimeError
    }

    /// Runtime error from library code; message only.
    pub fn error(&mut self, msg: impl Into<String>) -> LuaError {
        self.raise(LuaError::RuntimeError, msg)
    }

    pub fn error_message(&self) -> &str {
        &self.error_msg
    }

    /// The error as a Lua value, for pcall results.
    pub(crate) fn error_as_value(&mut self) -> LuaValue {
        if !self.error_value.is_nil() {
            let v = self.error_value;
            self.error_value = LuaValue::Nil;
            v
        } else {
            let msg = std::mem::take(&mut self.error_msg);
            let v = self.create_string(&msg);
            self.error_msg = msg;
            v
        }
    }

    /// Pair a propagated kind with the recorded message.
    pub fn full_error(&self, kind: LuaError) -> LuaFullError {
        let message = if self.error_msg.is_empty() {
            kind.description().to_string()
        } else {
            self.error_msg.clone()
        };
        LuaFullError { kind, message }
    }

    /// `chunkname:line:` prefix for the active script frame at `level`
    /// (1 = innermost script frame).
    pub(crate) fn where_string(&self, level: usize) -> String {
        let mut seen = 0;
        for f in self.frames.iter().rev() {
            if f.is_lua() {
                seen += 1;
                if seen == level {
                    if let LuaValue::Closure(cid) = f.func {
                        let proto = self.pool.closure(cid).proto;
                        let chunk = self.pool.proto(proto);
                        let pc = f.pc.saturating_sub(1);
                        return format!("{}:{}: ", chunk.source, chunk.line_at(pc));
                    }
                }
            }
        }
        String::new()
    }

    /// Prefix the recorded message with the failing instruction's
    /// source position, once.
    pub(crate) fn position_error(&mut self) {
        if self.error_positioned {
            return;
        }
        let prefix = self.where_string(1);
        if !prefix.is_empty() {
            self.error_msg = format!("{}{}", prefix, self.error_msg);
        }
        self.error_positioned = true;
    }

    // ============ Stack primitives ============

    /// Resolve an API index to an absolute stack slot.
    fn abs_index(&self, idx: i32) -> Option<usize> {
        let base = self.current_base();
        if idx > 0 {
            Some(base + idx as usize - 1)
        } else if idx < 0 {
            let abs = self.top as i64 + idx as i64;
            if abs >= base as i64 { Some(abs as usize) } else { None }
        } else {
            None
        }
    }

    /// Register 0 of the current call, or the stack bottom outside any
    /// call.
    #[inline]
    pub(crate) fn current_base(&self) -> usize {
        self.frames.last().map(|f| f.base).unwrap_or(0)
    }

    pub fn push_value(&mut self, v: LuaValue) -> LuaResult<()> {
        if self.top >= self.stack.len() {
            return Err(self.raise(LuaError::StackOverflow, "stack overflow"));
        }
        self.stack[self.top] = v;
        self.top += 1;
        Ok(())
    }

    pub fn pop(&mut self, n: usize) {
        let n = n.min(self.top - self.current_base());
        for i in (self.top - n)..self.top {
            self.stack[i] = LuaValue::Nil;
        }
        self.top -= n;
    }

    pub fn push_nil(&mut self) -> LuaResult<()> {
        self.push_value(LuaValue::Nil)
    }

    pub fn push_boolean(&mut self, b: bool) -> LuaResult<()> {
        self.push_value(LuaValue::boolean(b))
    }

    pub fn push_number(&mut self, n: f64) -> LuaResult<()> {
        self.push_value(LuaValue::number(n))
    }

    pub fn push_string(&mut self, s: &str) -> LuaResult<()> {
        let v = self.create_string(s);
        self.push_value(v)
    }

    pub fn push_cfunction(&mut self, f: CFunction) -> LuaResult<()> {
        let v = self.create_c_closure(f, Vec::new());
        self.push_value(v)
    }

    /// Create an empty table and push it.
    pub fn new_table(&mut self) -> LuaResult<()> {
        let t = self.create_table(0, 0);
        self.push_value(t)
    }

    /// Number of values on the stack above the current base.
    pub fn get_top(&self) -> usize {
        self.top - self.current_base()
    }

    /// Force the value count; growing pushes nils, shrinking drops.
    pub fn set_top(&mut self, n: usize) -> LuaResult<()> {
        let base = self.current_base();
        let new_top = base + n;
        if new_top > self.stack.len() {
            return Err(self.raise(LuaError::StackOverflow, "stack overflow"));
        }
        if new_top > self.top {
            for i in self.top..new_top {
                self.stack[i] = LuaValue::Nil;
            }
        } else {
            for i in new_top..self.top {
                self.stack[i] = LuaValue::Nil;
            }
        }
        self.top = new_top;
        Ok(())
    }

    /// Rotate the top value into position `idx`, shifting the values
    /// above up by one.
    pub fn insert(&mut self, idx: i32) {
        if let Some(abs) = self.abs_index(idx) {
            if abs < self.top {
                let v = self.stack[self.top - 1];
                for i in ((abs + 1)..self.top).rev() {
                    let below = self.stack[i - 1];
                    self.stack[i] = below;
                }
                self.stack[abs] = v;
            }
        }
    }

    // ============ Reading values ============

    /// Value at an index, or `None` (the absent sentinel) outside the
    /// live window.
    pub fn to_value(&self, idx: i32) -> LuaValue {
        match self.abs_index(idx) {
            Some(abs) if abs < self.top => self.stack[abs],
            _ => LuaValue::None,
        }
    }

    /// Numeric coercion: numbers pass through, strings parse as
    /// decimal (or 0x-prefixed hex) numerals.
    pub fn to_number(&self, idx: i32) -> Option<f64> {
        let v = self.to_value(idx);
        self.coerce_number(&v)
    }

    pub(crate) fn coerce_number(&self, v: &LuaValue) -> Option<f64> {
        match v {
            LuaValue::Number(n) => Some(*n),
            LuaValue::Str(id) => parse_number(self.pool.string_str(*id)),
            _ => None,
        }
    }

    /// Truthiness coercion.
    pub fn to_boolean(&self, idx: i32) -> bool {
        self.to_value(idx).is_truthy()
    }

    /// String coercion: strings pass through, numbers format.
    pub fn to_rust_string(&self, idx: i32) -> Option<String> {
        match self.to_value(idx) {
            LuaValue::Str(id) => Some(self.pool.string_str(id).to_string()),
            LuaValue::Number(n) => Some(number_to_display(n)),
            _ => None,
        }
    }

    pub fn to_table(&self, idx: i32) -> Option<TableId> {
        self.to_value(idx).as_table_id()
    }

    pub fn is_nil(&self, idx: i32) -> bool {
        self.to_value(idx).is_nil()
    }

    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        self.to_value(idx).is_none_or_nil()
    }

    pub fn is_boolean(&self, idx: i32) -> bool {
        self.to_value(idx).is_boolean()
    }

    pub fn is_number(&self, idx: i32) -> bool {
        self.to_value(idx).is_number()
    }

    pub fn is_string(&self, idx: i32) -> bool {
        self.to_value(idx).is_string()
    }

    pub fn is_table(&self, idx: i32) -> bool {
        self.to_value(idx).is_table()
    }

    pub fn is_function(&self, idx: i32) -> bool {
        self.to_value(idx).is_function()
    }

    // ============ Host-function argument helpers ============

    /// Argument count of the current host call.
    pub fn arg_count(&self) -> usize {
        self.get_top()
    }

    /// 1-based argument accessor for host functions.
    pub fn get_arg(&self, i: usize) -> Option<LuaValue> {
        let v = self.to_value(i as i32);
        if v.is_none() { None } else { Some(v) }
    }

    // ============ Globals and fields ============

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        let key = self.create_string(name);
        self.pool.table_mut(self.globals).set(key, value);
    }

    pub fn get_global(&mut self, name: &str) -> LuaValue {
        let key = self.create_string(name);
        self.pool.table(self.globals).get(&key)
    }

    /// Push `t[key]` where `t` is the table at `idx`.
    pub fn get_field(&mut self, idx: i32, key: &str) -> LuaResult<()> {
        let t = self.check_table_at(idx)?;
        let k = self.create_string(key);
        let v = self.pool.table(t).get(&k);
        self.push_value(v)
    }

    /// Pop a value and store it at `t[key]`.
    pub fn set_field(&mut self, idx: i32, key: &str) -> LuaResult<()> {
        let t = self.check_table_at(idx)?;
        let v = self.to_value(-1);
        let k = self.create_string(key);
        self.pop(1);
        self.pool.table_mut(t).set(k, v);
        Ok(())
    }

    /// Pop a key, push `t[key]`.
    pub fn get_table(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.check_table_at(idx)?;
        let k = self.to_value(-1);
        self.pop(1);
        let v = self.pool.table(t).get(&k);
        self.push_value(v)
    }

    /// Pop a value then a key, store `t[key] = value`.
    pub fn set_table(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.check_table_at(idx)?;
        let v = self.to_value(-1);
        let k = self.to_value(-2);
        self.pop(2);
        self.table_set_checked(t, k, v)
    }

    fn check_table_at(&mut self, idx: i32) -> LuaResult<TableId> {
        match self.to_value(idx) {
            LuaValue::Table(t) => Ok(t),
            v => Err(self.raise(
                LuaError::ExpectedTable,
                format!("attempt to index a {} value", v.type_name()),
            )),
        }
    }

    /// Raw table store with the key rules of the language: nil and NaN
    /// keys are errors, nil values remove.
    pub(crate) fn table_set_checked(
        &mut self,
        t: TableId,
        key: LuaValue,
        value: LuaValue,
    ) -> LuaResult<()> {
        if key.is_none_or_nil() {
            return Err(self.raise(LuaError::TableIndexIsNil, "table index is nil"));
        }
        if let LuaValue::Number(n) = key {
            if n.is_nan() {
                return Err(self.raise(LuaError::TableIndexIsNil, "table index is NaN"));
            }
        }
        self.pool.table_mut(t).set(key, value);
        Ok(())
    }

    // ============ Length, iteration, comparison ============

    /// Length of the string or table at `idx`.
    pub fn obj_len(&mut self, idx: i32) -> LuaResult<usize> {
        match self.to_value(idx) {
            LuaValue::Str(id) => Ok(self.pool.string(id).len()),
            LuaValue::Table(t) => Ok(self.pool.table(t).len()),
            v => Err(self.raise(
                LuaError::AttemptToGetLength,
                format!("attempt to get length of a {} value", v.type_name()),
            )),
        }
    }

    /// Iteration step over the table at `idx`: pops a key; pushes the
    /// next key/value pair and returns true, or pushes nothing and
    /// returns false at the end.
    pub fn next(&mut self, idx: i32) -> LuaResult<bool> {
        let t = self.check_table_at(idx)?;
        let k = self.to_value(-1);
        self.pop(1);
        match self.pool.table(t).next(&k) {
            Some((nk, nv)) => {
                self.push_value(nk)?;
                self.push_value(nv)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn raw_equal(&self, idx1: i32, idx2: i32) -> bool {
        let a = self.to_value(idx1);
        let b = self.to_value(idx2);
        !a.is_none() && !b.is_none() && a.raw_equal(&b)
    }

    /// Pop the top `n` values and push their concatenation.
    pub fn concat(&mut self, n: usize) -> LuaResult<()> {
        if n == 0 {
            return self.push_string("");
        }
        let first = self.top - n;
        let v = self.concat_values(first, n)?;
        self.pop(n);
        self.push_value(v)
    }

    /// Concatenate `count` stack slots starting at `from`. Operands
    /// must be strings or numbers.
    pub(crate) fn concat_values(&mut self, from: usize, count: usize) -> LuaResult<LuaValue> {
        let mut out = String::new();
        for i in 0..count {
            match self.stack[from + i] {
                LuaValue::Str(id) => out.push_str(self.pool.string_str(id)),
                LuaValue::Number(n) => out.push_str(&number_to_display(n)),
                v => {
                    return Err(self.raise(
                        LuaError::AttemptToConcatenate,
                        format!("attempt to concatenate a {} value", v.type_name()),
                    ));
                }
            }
        }
        Ok(self.create_string(&out))
    }

    /// Human-readable rendering, as `tostring` produces it.
    pub fn display_value(&self, v: &LuaValue) -> String {
        match v {
            LuaValue::Nil | LuaValue::None => "nil".to_string(),
            LuaValue::Boolean(b) => b.to_string(),
            LuaValue::Number(n) => number_to_display(*n),
            LuaValue::Str(id) => self.pool.string_str(*id).to_string(),
            LuaValue::Table(id) => format!("table: 0x{:08x}", id.0),
            LuaValue::Closure(id) => format!("function: 0x{:08x}", id.0),
            LuaValue::CClosure(id) => format!("function: builtin: 0x{:08x}", id.0),
            LuaValue::LightUserdata(p) => format!("userdata: 0x{:08x}", p),
            LuaValue::Userdata(id) => format!("userdata: 0x{:08x}", id.0),
            LuaValue::Thread(id) => format!("thread: 0x{:08x}", id.0),
        }
    }

    // ============ Host function registration ============

    /// Register a host function under a (possibly dotted) global name:
    /// `"print"` lands in globals, `"string.upper"` creates or reuses
    /// the `string` table and sets its `upper` field.
    pub fn register(&mut self, name: &str, func: CFunction) -> LuaResult<()> {
        let value = self.create_c_closure(func, Vec::new());
        self.set_qualified(name, value)
    }

    pub(crate) fn set_qualified(&mut self, name: &str, value: LuaValue) -> LuaResult<()> {
        // `value` and the interned path segments have no root until
        // the final store; keep the collector out of the window.
        let prev = self.gc.stopped;
        self.gc.stopped = true;
        let outcome = self.set_qualified_inner(name, value);
        self.gc.stopped = prev;
        outcome
    }

    fn set_qualified_inner(&mut self, name: &str, value: LuaValue) -> LuaResult<()> {
        let mut table = self.globals;
        let mut parts = name.split('.').peekable();
        while let Some(part) = parts.next() {
            let key = self.create_string(part);
            if parts.peek().is_none() {
                self.pool.table_mut(table).set(key, value);
                break;
            }
            let existing = self.pool.table(table).get(&key);
            table = match existing {
                LuaValue::Table(t) => t,
                LuaValue::Nil => {
                    let t = self.create_table(0, 8);
                    self.pool.table_mut(table).set(key, t);
                    t.as_table_id().expect("fresh table value")
                }
                v => {
                    return Err(self.raise(
                        LuaError::ExpectedTable,
                        format!("name '{}' shadowed by a {} value", name, v.type_name()),
                    ));
                }
            };
        }
        Ok(())
    }

    // ============ Load and call ============

    /// Compile `source` and push the resulting closure.
    pub fn load(&mut self, source: &str, chunkname: &str) -> LuaResult<()> {
        // Prototypes under construction are unreachable from the
        // roots; hold the collector off until the closure is on the
        // stack.
        let prev = self.gc.stopped;
        self.gc.stopped = true;
        let result = compiler::compile(self, source, chunkname);
        let outcome = match result {
            Ok(proto) => {
                let closure = self.create_closure(proto, Vec::new());
                self.push_value(closure)
            }
            Err(msg) => Err(self.raise(LuaError::CompileError, msg)),
        };
        self.gc.stopped = prev;
        outcome
    }

    /// Call the value at `top - nargs - 1` with the `nargs` values
    /// above it; leaves `nresults` results (or all, for LUA_MULTRET)
    /// starting at the callee's slot.
    pub fn call(&mut self, nargs: usize, nresults: i32) -> LuaResult<()> {
        let func_index = self.top - nargs - 1;
        let entry_depth = self.frames.len();
        match self.do_call(func_index, nargs, nresults) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.unwind_to(entry_depth, func_index);
                Err(e)
            }
        }
    }

    /// Run the closure on top of the stack with no arguments and no
    /// results.
    pub fn run(&mut self) -> LuaResult<()> {
        self.call(0, 0)
    }

    /// Compile and run a source string, returning every result.
    pub fn execute_string(&mut self, source: &str) -> LuaResult<Vec<LuaValue>> {
        self.execute_named(source, source_to_chunkname(source))
    }

    pub fn execute_named(
        &mut self,
        source: &str,
        chunkname: String,
    ) -> LuaResult<Vec<LuaValue>> {
        let bottom = self.top;
        self.load(source, &chunkname)?;
        match self.call(0, LUA_MULTRET) {
            Ok(()) => {
                let results = self.stack[bottom..self.top].to_vec();
                self.pop(self.top - bottom);
                Ok(results)
            }
            Err(e) => {
                self.pop(self.top - bottom);
                Err(e)
            }
        }
    }

    /// Drop frames and stack back to a protected boundary, closing
    /// every upvalue that pointed above it.
    pub(crate) fn unwind_to(&mut self, depth: usize, stack_base: usize) {
        self.close_upvalues(stack_base);
        self.frames.truncate(depth);
        for i in stack_base..self.top {
            self.stack[i] = LuaValue::Nil;
        }
        self.top = stack_base;
    }

    /// Protected call used by pcall: on a catchable error the state is
    /// unwound and `false` is returned with the error value pushed.
    pub(crate) fn protected_call(
        &mut self,
        func_index: usize,
        nargs: usize,
    ) -> LuaResult<bool> {
        let entry_depth = self.frames.len();
        match self.do_call(func_index, nargs, LUA_MULTRET) {
            Ok(()) => Ok(true),
            Err(e) if !e.is_fatal() => {
                if matches!(e, LuaError::RuntimeError | LuaError::CompileError) {
                    // keep the recorded message
                } else if self.error_msg.is_empty() {
                    self.error_msg = e.description().to_string();
                }
                self.position_error();
                let err_value = self.error_as_value();
                self.unwind_to(entry_depth, func_index);
                self.push_value(err_value)?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // ============ Call machinery ============

    /// Dispatch a call at an absolute stack slot. Script callees run to
    /// completion through the interpreter loop; host callees run
    /// directly. Results land at `func_index`.
    pub(crate) fn do_call(
        &mut self,
        func_index: usize,
        nargs: usize,
        nresults: i32,
    ) -> LuaResult<()> {
        match self.stack[func_index] {
            LuaValue::Closure(_) => {
                self.push_script_frame(func_index, nargs, nresults)?;
                let depth = self.frames.len();
                lua_execute(self, depth - 1)
            }
            LuaValue::CClosure(_) => self.call_c(func_index, nargs, nresults),
            v => Err(self.raise(
                LuaError::AttemptToCallNonFunction,
                format!("attempt to call a {} value", v.type_name()),
            )),
        }
    }

    /// Build the frame for a script call: nil-fill missing parameters,
    /// shift fixed parameters above the varargs for vararg functions,
    /// and pre-extend the register window to max_stack_size.
    pub(crate) fn push_script_frame(
        &mut self,
        func_index: usize,
        nargs: usize,
        nresults: i32,
    ) -> LuaResult<()> {
        if self.frames.len() >= self.options.max_call_depth {
            return Err(self.raise(LuaError::StackOverflow, "stack overflow"));
        }
        let func = self.stack[func_index];
        let cid = func.as_closure_id().expect("script callee");
        let proto_id = self.pool.closure(cid).proto;
        let chunk = self.pool.proto(proto_id);
        let num_params = chunk.num_params as usize;
        let is_vararg = chunk.is_vararg;
        let max_stack = chunk.max_stack_size as usize;

        let fixed_base = func_index + 1;
        // Missing arguments become nil.
        let nactual = nargs.max(num_params);
        if fixed_base + nactual > self.stack.len() {
            return Err(self.raise(LuaError::StackOverflow, "stack overflow"));
        }
        for i in nargs..nactual {
            self.stack[fixed_base + i] = LuaValue::Nil;
        }

        let (base, num_varargs) = if is_vararg {
            // Fixed parameters move above the varargs; the extras stay
            // below the new base where VARARG can reach them.
            let base = fixed_base + nactual;
            if base + max_stack > self.stack.len() {
                return Err(self.raise(LuaError::StackOverflow, "stack overflow"));
            }
            for i in 0..num_params {
                let param = self.stack[fixed_base + i];
                self.stack[base + i] = param;
                self.stack[fixed_base + i] = LuaValue::Nil;
            }
            (base, nargs.saturating_sub(num_params))
        } else {
            (fixed_base, 0)
        };

        let new_top = base + max_stack;
        if new_top > self.stack.len() {
            return Err(self.raise(LuaError::StackOverflow, "stack overflow"));
        }
        // Fresh registers start nil.
        let args_end = base + if is_vararg { num_params } else { nactual };
        for i in args_end..new_top {
            self.stack[i] = LuaValue::Nil;
        }

        let mut ci = CallInfo::new_lua(func, func_index, base, new_top);
        ci.nresults = nresults;
        ci.num_varargs = num_varargs;
        self.frames.push(ci);
        self.top = new_top;
        self.maybe_collect();
        Ok(())
    }

    /// Invoke a host function: arguments sit at stack indices 1..nargs
    /// of its frame; it returns how many results it left on top.
    pub(crate) fn call_c(
        &mut self,
        func_index: usize,
        nargs: usize,
        nresults: i32,
    ) -> LuaResult<()> {
        if self.frames.len() >= self.options.max_call_depth {
            return Err(self.raise(LuaError::StackOverflow, "stack overflow"));
        }
        let func = self.stack[func_index];
        let ccid = func.as_c_closure_id().expect("host callee");
        let base = func_index + 1;
        let mut ci = CallInfo::new_c(func, func_index, base, base + nargs);
        ci.nresults = nresults;
        self.frames.push(ci);
        self.top = base + nargs;

        let f = self.pool.c_closure(ccid).func;
        let n = f(self)?;

        let first_result = self.top - n.min(self.top);
        self.frames.pop();
        self.finish_results(func_index, first_result, n, nresults);
        Ok(())
    }

    /// Copy a call's results down over the callee slot, trimming or
    /// nil-padding to the expected count. LUA_MULTRET keeps the actual
    /// count, leaving the top just past the last result.
    pub(crate) fn finish_results(
        &mut self,
        func_index: usize,
        first_result: usize,
        actual: usize,
        wanted: i32,
    ) {
        for i in 0..actual {
            let v = self.stack[first_result + i];
            self.stack[func_index + i] = v;
        }
        let new_top = if wanted == LUA_MULTRET {
            func_index + actual
        } else {
            let w = wanted as usize;
            for i in actual..w {
                self.stack[func_index + i] = LuaValue::Nil;
            }
            func_index + w
        };
        for i in new_top..self.top {
            self.stack[i] = LuaValue::Nil;
        }
        self.top = new_top;
    }

    // ============ Upvalues ============

    /// Find the open upvalue for a stack slot, or create one. At most
    /// one open upvalue exists per slot, so closures capturing the same
    /// local share the same cell.
    pub(crate) fn find_or_create_upvalue(&mut self, stack_index: usize) -> UpvalueId {
        let mut insert_at = self.open_upvalues.len();
        for (i, &uv) in self.open_upvalues.iter().enumerate() {
            if let UpvalueState::Open(idx) = self.pool.upvalue(uv).state {
                if idx == stack_index {
                    return uv;
                }
                if idx < stack_index {
                    insert_at = i;
                    break;
                }
            }
        }
        self.maybe_collect();
        let id = self.pool.create_upvalue_open(stack_index);
        self.open_upvalues.insert(insert_at, id);
        id
    }

    /// Close every open upvalue at or above `from`: the stack value is
    /// copied inline and the cell leaves the open chain. Closures
    /// sharing the cell keep sharing it.
    pub(crate) fn close_upvalues(&mut self, from: usize) {
        while let Some(&uv) = self.open_upvalues.first() {
            let idx = match self.pool.upvalue(uv).state {
                UpvalueState::Open(i) => i,
                UpvalueState::Closed(_) => {
                    self.open_upvalues.remove(0);
                    continue;
                }
            };
            if idx < from {
                break;
            }
            let v = self.stack[idx];
            self.pool.upvalue_mut(uv).state = UpvalueState::Closed(v);
            self.open_upvalues.remove(0);
        }
    }

    #[inline]
    pub(crate) fn upvalue_get(&self, id: UpvalueId) -> LuaValue {
        match self.pool.upvalue(id).state {
            UpvalueState::Open(i) => self.stack[i],
            UpvalueState::Closed(v) => v,
        }
    }

    #[inline]
    pub(crate) fn upvalue_set(&mut self, id: UpvalueId, v: LuaValue) {
        match self.pool.upvalue(id).state {
            UpvalueState::Open(i) => self.stack[i] = v,
            UpvalueState::Closed(_) => self.pool.upvalue_mut(id).state = UpvalueState::Closed(v),
        }
    }

    // ============ Misc accessors used across the crate ============

    #[inline(always)]
    pub(crate) fn globals_table(&self) -> &LuaTable {
        self.pool.table(self.globals)
    }

    #[inline(always)]
    pub(crate) fn closure_upvalue(&self, cid: ClosureId, i: usize) -> UpvalueId {
        self.pool.closure(cid).upvalues[i]
    }
}

impl Default for LuaState {
    fn default() -> Self {
        Self::new()
    }
}

/// Abbreviate a source string into a chunk name, the way error
/// messages cite inline chunks.
fn source_to_chunkname(source: &str) -> String {
    let line = source.lines().next().unwrap_or("");
    match line.char_indices().nth(30) {
        Some((cut, _)) => format!("[string \"{}...\"]", &line[..cut]),
        None => format!("[string \"{}\"]", line),
    }
}

/// Lua 5.1 numeral parsing for coercions: optional sign, decimal or
/// 0x-prefixed hex, surrounding whitespace allowed.
pub(crate) fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (negative, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok().map(|v| v as f64)
    } else {
        body.parse::<f64>().ok()
    }?;
    Some(if negative { -value } else { value })
}

/// Format a number the way `tostring` does: integral values render
/// without a decimal point (itoa fast path), the rest use shortest
/// round-trip notation.
pub(crate) fn number_to_display(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }
    format!("{}", n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_top() {
        let mut l = LuaState::new();
        l.push_number(1.0).unwrap();
        l.push_string("two").unwrap();
        assert_eq!(l.get_top(), 2);
        assert_eq!(l.to_number(1), Some(1.0));
        assert_eq!(l.to_rust_string(-1).as_deref(), Some("two"));
        l.pop(2);
        assert_eq!(l.get_top(), 0);
        assert!(l.to_value(1).is_none());
    }

    #[test]
    fn test_interned_strings_share_identity() {
        let mut l = LuaState::new();
        let a = l.create_string("abc");
        let b = l.create_string("abc");
        assert_eq!(a, b);
        let c = l.create_string("abd");
        assert_ne!(a, c);
    }

    #[test]
    fn test_globals_round_trip() {
        let mut l = LuaState::new();
        let v = l.create_string("value");
        l.set_global("key", v);
        assert_eq!(l.get_global("key"), v);
        assert!(l.get_global("missing").is_nil());
    }

    #[test]
    fn test_number_coercion_from_strings() {
        let mut l = LuaState::new();
        l.push_string(" 42 ").unwrap();
        assert_eq!(l.to_number(-1), Some(42.0));
        l.push_string("0x10").unwrap();
        assert_eq!(l.to_number(-1), Some(16.0));
        l.push_string("nope").unwrap();
        assert_eq!(l.to_number(-1), None);
    }

    #[test]
    fn test_number_display() {
        assert_eq!(number_to_display(3.0), "3");
        assert_eq!(number_to_display(-7.0), "-7");
        assert_eq!(number_to_display(0.5), "0.5");
        assert_eq!(number_to_display(f64::INFINITY), "inf");
    }

    #[test]
    fn test_insert_rotates() {
        let mut l = LuaState::new();
        l.push_number(1.0).unwrap();
        l.push_number(2.0).unwrap();
        l.push_number(3.0).unwrap();
        l.insert(1);
        assert_eq!(l.to_number(1), Some(3.0));
        assert_eq!(l.to_number(2), Some(1.0));
        assert_eq!(l.to_number(3), Some(2.0));
    }

    #[test]
    fn test_stack_overflow_is_reported() {
        let mut l = LuaState::with_options(SafeOption {
            stack_size: 8,
            max_call_depth: 8,
        });
        let mut result = Ok(());
        for _ in 0..16 {
            result = l.push_nil();
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(LuaError::StackOverflow));
    }
}
