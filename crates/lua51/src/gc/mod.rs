// Garbage collector - stop-the-world mark-sweep
//
// Every collectable object lives in a typed arena of the object pool
// and embeds a mark bit. A cycle marks from the roots (globals,
// registry, main-thread stack, frame callees, open upvalues) through a
// gray worklist, then sweeps every arena, freeing unmarked slots and
// resetting survivors to white.
//
// Trigger policy: a collection is due when the live object count
// crosses a threshold. After each cycle the threshold is recomputed as
// live * factor, with the factor adapted to sweep efficiency (collect
// aggressively when much was garbage, back off when little was) and
// floored at GC_MIN_THRESHOLD.

mod object_pool;
mod string_interner;

pub use object_pool::*;
pub use string_interner::StringInterner;

use crate::lua_value::LuaValue;

/// Threshold floor: never collect more often than every 1024 objects.
pub const GC_MIN_THRESHOLD: usize = 1024;

const FACTOR_MIN: f64 = 1.5;
const FACTOR_DEFAULT: f64 = 2.0;
const FACTOR_MAX: f64 = 3.0;

/// A reference to any collectable object, for the gray worklist.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GcRef {
    Str(StringId),
    Table(TableId),
    Closure(ClosureId),
    CClosure(CClosureId),
    Userdata(UserdataId),
    Thread(ThreadId),
    Upvalue(UpvalueId),
    Proto(ProtoId),
}

impl GcRef {
    fn from_value(v: &LuaValue) -> Option<GcRef> {
        match v {
            LuaValue::Str(id) => Some(GcRef::Str(*id)),
            LuaValue::Table(id) => Some(GcRef::Table(*id)),
            LuaValue::Closure(id) => Some(GcRef::Closure(*id)),
            LuaValue::CClosure(id) => Some(GcRef::CClosure(*id)),
            LuaValue::Userdata(id) => Some(GcRef::Userdata(*id)),
            LuaValue::Thread(id) => Some(GcRef::Thread(*id)),
            _ => None,
        }
    }
}

/// Root set borrowed from the state for one cycle.
pub struct GcRoots<'a> {
    pub globals: TableId,
    pub registry: TableId,
    /// Live window of the main thread stack, `[0, top)`.
    pub stack: &'a [LuaValue],
    /// Callee values embedded in the call-info chain.
    pub frame_callees: &'a [LuaValue],
    /// Open-upvalue chain of the main thread.
    pub open_upvalues: &'a [UpvalueId],
}

#[derive(Debug, Clone, Default)]
pub struct GcStats {
    pub collection_count: usize,
    pub objects_collected: usize,
    pub last_collected: usize,
    pub last_live: usize,
    pub threshold: usize,
}

pub struct Gc {
    threshold: usize,
    factor: f64,
    /// Re-entrancy latch: the collector must never run inside itself.
    in_cycle: bool,
    /// Set while the compiler builds prototypes that are not yet
    /// reachable from any root.
    pub(crate) stopped: bool,
    gray: Vec<GcRef>,
    scratch: Vec<GcRef>,
    stats: GcStats,
}

impl Gc {
    pub fn new() -> Self {
        Self {
            threshold: GC_MIN_THRESHOLD,
            factor: FACTOR_DEFAULT,
            in_cycle: false,
            stopped: false,
            gray: Vec::with_capacity(128),
            scratch: Vec::with_capacity(32),
            stats: GcStats {
                threshold: GC_MIN_THRESHOLD,
                ..GcStats::default()
            },
        }
    }

    #[inline(always)]
    pub fn should_collect(&self, live_objects: usize) -> bool {
        !self.stopped && !self.in_cycle && live_objects > self.threshold
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Run one full mark-sweep cycle. Returns the number of objects
    /// freed.
    pub fn collect(
        &mut self,
        pool: &mut ObjectPool,
        interner: &mut StringInterner,
        roots: GcRoots<'_>,
    ) -> usize {
        if self.in_cycle {
            return 0;
        }
        self.in_cycle = true;
        self.gray.clear();

        // ============ Mark ============
        self.mark_ref(pool, GcRef::Table(roots.globals));
        self.mark_ref(pool, GcRef::Table(roots.registry));
        for v in roots.stack {
            self.mark_value(pool, v);
        }
        for v in roots.frame_callees {
            self.mark_value(pool, v);
        }
        for &uv in roots.open_upvalues {
            self.mark_ref(pool, GcRef::Upvalue(uv));
        }
        while let Some(r) = self.gray.pop() {
            self.trace(pool, r);
        }

        // ============ Sweep ============
        let collected = self.sweep(pool, interner);
        let live = pool.total_objects();

        // Adapt the factor to sweep efficiency.
        let efficiency = if collected + live > 0 {
            collected as f64 / (collected + live) as f64
        } else {
            0.0
        };
        self.factor = if efficiency >= 0.5 {
            FACTOR_MIN
        } else if efficiency <= 0.125 {
            FACTOR_MAX
        } else {
            FACTOR_DEFAULT
        };
        self.threshold = ((live as f64 * self.factor) as usize).max(GC_MIN_THRESHOLD);

        self.stats.collection_count += 1;
        self.stats.objects_collected += collected;
        self.stats.last_collected = collected;
        self.stats.last_live = live;
        self.stats.threshold = self.threshold;

        self.in_cycle = false;
        collected
    }

    #[inline]
    fn mark_value(&mut self, pool: &mut ObjectPool, v: &LuaValue) {
        if let Some(r) = GcRef::from_value(v) {
            self.mark_ref(pool, r);
        }
    }

    /// Set the mark bit; queue the object for tracing if it was white.
    fn mark_ref(&mut self, pool: &mut ObjectPool, r: GcRef) {
        let header = match r {
            GcRef::Str(id) => pool.strings.get_mut(id.0).map(|o| &mut o.header),
            GcRef::Table(id) => pool.tables.get_mut(id.0).map(|o| &mut o.header),
            GcRef::Closure(id) => pool.closures.get_mut(id.0).map(|o| &mut o.header),
            GcRef::CClosure(id) => pool.c_closures.get_mut(id.0).map(|o| &mut o.header),
            GcRef::Userdata(id) => pool.userdata.get_mut(id.0).map(|o| &mut o.header),
            GcRef::Thread(id) => pool.threads.get_mut(id.0).map(|o| &mut o.header),
            GcRef::Upvalue(id) => pool.upvalues.get_mut(id.0).map(|o| &mut o.header),
            GcRef::Proto(id) => pool.protos.get_mut(id.0).map(|o| &mut o.header),
        };
        if let Some(header) = header {
            if !header.marked {
                header.marked = true;
                // Strings have no outgoing references; skip the queue.
                if !matches!(r, GcRef::Str(_)) {
                    self.gray.push(r);
                }
            }
        }
    }

    /// Push every child of `r` through the mark. Children are copied to
    /// a scratch buffer first because tracing needs the pool immutably
    /// while marking flips header bits.
    fn trace(&mut self, pool: &mut ObjectPool, r: GcRef) {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        match r {
            GcRef::Str(_) => {}
            GcRef::Table(id) => {
                if let Some(t) = pool.tables.get(id.0) {
                    if let Some(mt) = t.data.metatable() {
                        scratch.push(GcRef::Table(mt));
                    }
                    t.data.for_each_value(|v| {
                        if let Some(child) = GcRef::from_value(v) {
                            scratch.push(child);
                        }
                    });
                }
            }
            GcRef::Closure(id) => {
                if let Some(c) = pool.closures.get(id.0) {
                    scratch.push(GcRef::Proto(c.proto));
                    for &uv in &c.upvalues {
                        scratch.push(GcRef::Upvalue(uv));
                    }
                }
            }
            GcRef::CClosure(id) => {
                if let Some(c) = pool.c_closures.get(id.0) {
                    if let Some(env) = c.env {
                        scratch.push(GcRef::Table(env));
                    }
                    for v in &c.upvalues {
                        if let Some(child) = GcRef::from_value(v) {
                            scratch.push(child);
                        }
                    }
                }
            }
            GcRef::Userdata(id) => {
                if let Some(u) = pool.userdata.get(id.0) {
                    if let Some(mt) = u.metatable {
                        scratch.push(GcRef::Table(mt));
                    }
                }
            }
            GcRef::Thread(id) => {
                if let Some(t) = pool.threads.get(id.0) {
                    for v in &t.stack[..t.top] {
                        if let Some(child) = GcRef::from_value(v) {
                            scratch.push(child);
                        }
                    }
                }
            }
            GcRef::Upvalue(id) => {
                if let Some(uv) = pool.upvalues.get(id.0) {
                    // Open upvalues point into the stack, which is
                    // already a root.
                    if let UpvalueState::Closed(v) = &uv.state {
                        if let Some(child) = GcRef::from_value(v) {
                            scratch.push(child);
                        }
                    }
                }
            }
            GcRef::Proto(id) => {
                if let Some(p) = pool.protos.get(id.0) {
                    for k in &p.chunk.constants {
                        if let Some(child) = GcRef::from_value(k) {
                            scratch.push(child);
                        }
                    }
                    for &nested in &p.chunk.protos {
                        scratch.push(GcRef::Proto(nested));
                    }
                }
            }
        }
        for child in scratch.drain(..) {
            self.mark_ref(pool, child);
        }
        self.scratch = scratch;
    }

    /// Free unmarked objects, reset survivors to white.
    fn sweep(&mut self, pool: &mut ObjectPool, interner: &mut StringInterner) -> usize {
        let mut collected = 0;

        let dead_strings: Vec<(StringId, u64)> = pool
            .strings
            .iter()
            .filter(|(_, s)| !s.header.marked)
            .map(|(id, s)| (StringId(id), s.data.hash()))
            .collect();
        for (id, hash) in dead_strings {
            interner.remove_dead(id, hash);
            pool.strings.free(id.0);
            collected += 1;
        }
        for (_, s) in pool.strings.iter_mut() {
            s.header.marked = false;
        }

        macro_rules! sweep_arena {
            ($arena:expr) => {{
                let dead: Vec<u32> = $arena
                    .iter()
                    .filter(|(_, o)| !o.header.marked)
                    .map(|(id, _)| id)
                    .collect();
                for id in dead {
                    $arena.free(id);
                    collected += 1;
                }
                for (_, o) in $arena.iter_mut() {
                    o.header.marked = false;
                }
            }};
        }

        sweep_arena!(pool.tables);
        sweep_arena!(pool.closures);
        sweep_arena!(pool.c_closures);
        sweep_arena!(pool.upvalues);
        sweep_arena!(pool.userdata);
        sweep_arena!(pool.threads);
        sweep_arena!(pool.protos);

        collected
    }
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_roots(globals: TableId, registry: TableId) -> (Vec<LuaValue>, Vec<LuaValue>, Vec<UpvalueId>) {
        let _ = (globals, registry);
        (Vec::new(), Vec::new(), Vec::new())
    }

    #[test]
    fn test_unreachable_table_is_swept() {
        let mut pool = ObjectPool::new();
        let mut interner = StringInterner::new();
        let mut gc = Gc::new();
        let globals = pool.create_table(0, 0);
        let registry = pool.create_table(0, 0);
        let garbage = pool.create_table(0, 0);
        let (stack, callees, upvals) = empty_roots(globals, registry);
        let collected = gc.collect(
            &mut pool,
            &mut interner,
            GcRoots {
                globals,
                registry,
                stack: &stack,
                frame_callees: &callees,
                open_upvalues: &upvals,
            },
        );
        assert_eq!(collected, 1);
        assert!(pool.tables.get(garbage.0).is_none());
        assert!(pool.tables.get(globals.0).is_some());
    }

    #[test]
    fn test_cycle_between_tables_is_swept() {
        let mut pool = ObjectPool::new();
        let mut interner = StringInterner::new();
        let mut gc = Gc::new();
        let globals = pool.create_table(0, 0);
        let registry = pool.create_table(0, 0);
        let a = pool.create_table(0, 0);
        let b = pool.create_table(0, 0);
        pool.table_mut(a)
            .set(LuaValue::boolean(true), LuaValue::Table(b));
        pool.table_mut(b)
            .set(LuaValue::boolean(true), LuaValue::Table(a));
        let (stack, callees, upvals) = empty_roots(globals, registry);
        let collected = gc.collect(
            &mut pool,
            &mut interner,
            GcRoots {
                globals,
                registry,
                stack: &stack,
                frame_callees: &callees,
                open_upvalues: &upvals,
            },
        );
        assert_eq!(collected, 2);
        assert!(pool.tables.get(a.0).is_none());
        assert!(pool.tables.get(b.0).is_none());
    }

    #[test]
    fn test_stack_roots_survive() {
        let mut pool = ObjectPool::new();
        let mut interner = StringInterner::new();
        let mut gc = Gc::new();
        let globals = pool.create_table(0, 0);
        let registry = pool.create_table(0, 0);
        let kept = pool.create_table(0, 0);
        let stack = vec![LuaValue::Table(kept)];
        let collected = gc.collect(
            &mut pool,
            &mut interner,
            GcRoots {
                globals,
                registry,
                stack: &stack,
                frame_callees: &[],
                open_upvalues: &[],
            },
        );
        assert_eq!(collected, 0);
        assert!(pool.tables.get(kept.0).is_some());
    }

    #[test]
    fn test_threshold_never_drops_below_floor() {
        let mut pool = ObjectPool::new();
        let mut interner = StringInterner::new();
        let mut gc = Gc::new();
        let globals = pool.create_table(0, 0);
        let registry = pool.create_table(0, 0);
        gc.collect(
            &mut pool,
            &mut interner,
            GcRoots {
                globals,
                registry,
                stack: &[],
                frame_callees: &[],
                open_upvalues: &[],
            },
        );
        assert!(gc.stats().threshold >= GC_MIN_THRESHOLD);
    }
}
