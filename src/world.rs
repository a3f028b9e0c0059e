//! A World holds everything a compile may reference that is not lexical: the
//! symbol interner, global constants, global vars, and the host's natives.

use std::collections::HashMap;

use lasso::Rodeo;

use crate::{
    reader::{self, Parsed, ReadError},
    value::{Builtin, BuiltinId, Symbol, Value},
};

/// Natives registered by [`World::with_builtins`].
pub const STANDARD_BUILTINS: &[&str] = &["+", "-", "*", "/", "<", ">", "<=", ">=", "=", "print"];

#[derive(Debug, Clone, PartialEq)]
pub enum Global {
    /// Immutable; uses compile to the value itself.
    Constant(Value),
    /// Mutable; uses compile to reads and writes of the var's cell.
    Var,
}

#[derive(Default)]
pub struct World {
    /// interner
    rodeo: Rodeo,
    globals: HashMap<Symbol, Global>,
    /// every native ever registered, indexed by id
    builtins: Vec<Builtin>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// A world with the [`STANDARD_BUILTINS`] bound to their names.
    pub fn with_builtins() -> Self {
        let mut world = Self::new();
        for name in STANDARD_BUILTINS {
            world.register_builtin(name);
        }
        world
    }

    pub fn intern(&mut self, name: impl AsRef<str>) -> Symbol {
        self.rodeo.get_or_intern(name.as_ref())
    }

    pub fn symbol(&self, name: impl AsRef<str>) -> Option<Symbol> {
        self.rodeo.get(name.as_ref())
    }

    pub fn name(&self, symbol: Symbol) -> &str {
        self.rodeo.resolve(&symbol)
    }

    pub fn interner(&self) -> &Rodeo {
        &self.rodeo
    }

    /// Reads source text, interning its symbols into this world.
    pub fn read(&mut self, source: &str) -> Result<Vec<Parsed>, ReadError> {
        reader::read_all(source, &mut self.rodeo)
    }

    pub fn lookup(&self, symbol: Symbol) -> Option<&Global> {
        self.globals.get(&symbol)
    }

    /// Binds a global constant, returning whatever was bound before.
    pub fn define(&mut self, name: impl AsRef<str>, value: Value) -> Option<Global> {
        let symbol = self.intern(name);
        self.globals.insert(symbol, Global::Constant(value))
    }

    /// Binds a global var, returning whatever was bound before.
    pub fn define_var(&mut self, name: impl AsRef<str>) -> Option<Global> {
        let symbol = self.intern(name);
        self.globals.insert(symbol, Global::Var)
    }

    /// Registers a native under `name`. Every call hands out a fresh identity,
    /// even when the name was used before.
    pub fn register_builtin(&mut self, name: impl AsRef<str>) -> Builtin {
        let name = self.intern(name);
        let builtin = Builtin {
            id: BuiltinId(self.builtins.len() as u32),
            name,
        };
        self.builtins.push(builtin);
        self.globals
            .insert(name, Global::Constant(Value::Builtin(builtin)));
        builtin
    }

    /// The most recently registered native called `name`, whether or not the
    /// name is still bound to it.
    pub fn registered_builtin(&self, name: impl AsRef<str>) -> Option<Builtin> {
        let symbol = self.symbol(name)?;
        self.builtins.iter().rev().find(|b| b.name == symbol).copied()
    }
}
