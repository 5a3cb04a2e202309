// Library registration system for the standard libraries
//
// A module is a named bundle of host functions and values. `_G`
// entries register directly into globals; named modules register as a
// table stored under the module name, which is how scripts reach the
// qualified names (`string.upper` is field `upper` of global
// `string`).

use crate::lua_value::LuaValue;
use crate::lua_vm::{CFunction, LuaResult, LuaState};
use crate::stdlib;

/// Value initializer: builds a value when the module loads.
pub type ValueInitializer = fn(&mut LuaState) -> LuaValue;

pub enum LibraryEntry {
    Function(CFunction),
    Value(ValueInitializer),
}

pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, LibraryEntry)>,
}

impl LibraryModule {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    pub fn with_function(mut self, name: &'static str, func: CFunction) -> Self {
        self.entries.push((name, LibraryEntry::Function(func)));
        self
    }

    pub fn with_value(mut self, name: &'static str, init: ValueInitializer) -> Self {
        self.entries.push((name, LibraryEntry::Value(init)));
        self
    }
}

/// Build a library module from a function table.
#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($item_name:expr => $item:expr),* $(,)?
    }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push((
                $item_name,
                $crate::lib_registry::LibraryEntry::Function($item),
            ));
        )*
        module
    }};
}

pub struct LibraryRegistry {
    modules: Vec<LibraryModule>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn register(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    /// Load every registered module into the state's globals.
    pub fn load_all(&self, l: &mut LuaState) -> LuaResult<()> {
        // Freshly created closures and keys are only rooted once the
        // module table lands in globals; registration runs with the
        // collector held.
        let prev = l.gc.stopped;
        l.gc.stopped = true;
        let mut outcome = Ok(());
        for module in &self.modules {
            outcome = self.load_module(l, module);
            if outcome.is_err() {
                break;
            }
        }
        l.gc.stopped = prev;
        outcome
    }

    fn load_module(&self, l: &mut LuaState, module: &LibraryModule) -> LuaResult<()> {
        if module.name == "_G" {
            for (name, entry) in &module.entries {
                let value = Self::make_value(l, entry);
                l.set_qualified(name, value)?;
            }
            return Ok(());
        }
        let lib_table = l.create_table(0, module.entries.len());
        // root the table before filling it
        l.set_global(module.name, lib_table);
        let t = lib_table.as_table_id().expect("fresh library table");
        for (name, entry) in &module.entries {
            let value = Self::make_value(l, entry);
            let key = l.create_string(name);
            l.pool.table_mut(t).set(key, value);
        }
        Ok(())
    }

    fn make_value(l: &mut LuaState, entry: &LibraryEntry) -> LuaValue {
        match entry {
            LibraryEntry::Function(func) => l.create_c_closure(*func, Vec::new()),
            LibraryEntry::Value(init) => init(l),
        }
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The standard Lua 5.1 library set.
pub fn create_standard_registry() -> LibraryRegistry {
    let mut registry = LibraryRegistry::new();
    registry.register(stdlib::basic::create_basic_lib());
    registry.register(stdlib::string::create_string_lib());
    registry.register(stdlib::table::create_table_lib());
    registry.register(stdlib::math::create_math_lib());
    registry
}
