//! Lexical scopes, bindings, and capture of variables from enclosing
//! functions.

use bitflags::bitflags;

use super::{
    opcode::{ENV_MAX, INDEX_MAX},
    regalloc::RegisterAllocator,
    slot::{Slot, SlotFlags},
    CompileError, CompileErrorKind, CompileResult, Compiler, FuncDef,
};
use crate::{
    lexer::Span,
    value::{Symbol, Value},
    world::Global,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ScopeFlags: u8 {
        /// starts a new function frame
        const FUNCTION = 1 << 0;
        /// some nested function captures this frame
        const ENV = 1 << 1;
        const TOP = 1 << 2;
        /// code compiled here is thrown away
        const UNUSED = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// the outermost function
    Top,
    Function,
    Block,
    Unused,
}

#[derive(Debug, Clone)]
struct Binding {
    /// `None` once the binding went out of scope but its register must
    /// stay alive for a closure
    symbol: Option<Symbol>,
    slot: Slot,
    /// captured by a nested function
    keep: bool,
}

/// One lexical scope.
///
/// Constants, sub-functions and environments only live on function scopes;
/// block scopes use the ones of the function they are in.
#[derive(Debug)]
pub struct Scope {
    pub(crate) consts: Vec<Value>,
    syms: Vec<Binding>,
    pub(crate) regs: RegisterAllocator,
    pub(crate) defs: Vec<FuncDef>,
    /// for each captured environment, where the enclosing function finds it:
    /// 0 is its own frame, `n` its environment `n`
    pub(crate) envs: Vec<u32>,
    pub(crate) bytecode_start: usize,
    pub(crate) flags: ScopeFlags,
}

impl Scope {
    fn new(flags: ScopeFlags, regs: RegisterAllocator, bytecode_start: usize) -> Self {
        Self {
            consts: vec![],
            syms: vec![],
            regs,
            defs: vec![],
            envs: vec![],
            bytecode_start,
            flags,
        }
    }

    pub fn flags(&self) -> ScopeFlags {
        self.flags
    }

    pub fn is_function(&self) -> bool {
        self.flags.contains(ScopeFlags::FUNCTION)
    }

    fn find(&self, symbol: Symbol) -> Option<usize> {
        self.syms.iter().rposition(|b| b.symbol == Some(symbol))
    }
}

impl Compiler<'_> {
    pub(crate) fn push_scope(&mut self, kind: ScopeKind) {
        let flags = match kind {
            ScopeKind::Top => ScopeFlags::FUNCTION | ScopeFlags::TOP,
            ScopeKind::Function => ScopeFlags::FUNCTION,
            ScopeKind::Block => ScopeFlags::empty(),
            ScopeKind::Unused => ScopeFlags::UNUSED,
        };
        // blocks keep using the registers their parent has in use
        let regs = match (flags.contains(ScopeFlags::FUNCTION), self.scopes.last()) {
            (false, Some(parent)) => parent.regs.clone(),
            _ => RegisterAllocator::new(),
        };
        log::debug!("push {kind:?} scope at depth {}", self.scopes.len());
        self.scopes
            .push(Scope::new(flags, regs, self.buffer.len()));
    }

    /// Pops a block or unused scope. Function scopes are popped by
    /// [`Compiler::pop_funcdef`].
    pub(crate) fn pop_scope(&mut self) {
        let Some(old) = self.scopes.pop() else {
            return;
        };
        debug_assert!(!old.is_function(), "function scopes pop through pop_funcdef");
        log::debug!("pop scope at depth {}", self.scopes.len());

        if old.flags.contains(ScopeFlags::UNUSED) {
            return;
        }
        let Some(parent) = self.scopes.last_mut() else {
            return;
        };
        parent.regs.raise_high_water(old.regs.high_water());
        // captured registers stay alive, but can no longer be named
        for binding in old.syms.into_iter().filter(|b| b.keep) {
            if binding.slot.is_local() {
                parent.regs.touch(binding.slot.index);
            }
            parent.syms.push(Binding {
                symbol: None,
                ..binding
            });
        }
    }

    /// Pops a block scope whose result lives in `slot`, keeping the register
    /// allocated in the parent.
    ///
    /// A register the parent did not own belonged to a binding that just went
    /// out of scope. The result then becomes a temporary of the parent, so
    /// whoever consumes it frees it.
    pub(crate) fn pop_scope_keep_slot(&mut self, mut slot: Slot) -> Slot {
        self.pop_scope();
        if !slot.is_local() {
            return slot;
        }
        if let Some(scope) = self.scopes.last_mut() {
            if !scope.regs.is_allocated(slot.index) {
                scope.regs.touch(slot.index);
                slot.flags -= SlotFlags::NAMED | SlotFlags::MUTABLE;
            }
        }
        slot
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scopes[self.scopes.len() - 1]
    }

    pub(crate) fn scope_mut(&mut self) -> &mut Scope {
        let top = self.scopes.len() - 1;
        &mut self.scopes[top]
    }

    /// Stack position of the innermost function scope. The bottom of the
    /// stack is always the top level function.
    pub(crate) fn function_scope_index(&self) -> usize {
        self.scopes.iter().rposition(Scope::is_function).unwrap_or(0)
    }

    fn function_scope_mut(&mut self) -> &mut Scope {
        let index = self.function_scope_index();
        &mut self.scopes[index]
    }

    /// Binds `symbol` to `slot` in the current scope. Earlier bindings of the
    /// same symbol stay allocated but are no longer visible.
    pub(crate) fn define(&mut self, symbol: Symbol, slot: Slot) {
        self.scope_mut().syms.push(Binding {
            symbol: Some(symbol),
            slot,
            keep: false,
        });
    }

    /// Index of `value` in the current function's constants, adding it if it
    /// is not there yet.
    pub(crate) fn add_constant(&mut self, span: &Span, value: Value) -> CompileResult<u32> {
        let consts = &mut self.function_scope_mut().consts;
        if let Some(index) = consts.iter().position(|c| c.identical(&value)) {
            return Ok(index as u32);
        }
        if consts.len() > INDEX_MAX as usize {
            Err(CompileError::new(
                CompileErrorKind::InternalLimit,
                span,
                "too many constants in one function",
            ))?
        }
        consts.push(value);
        Ok((consts.len() - 1) as u32)
    }

    pub(crate) fn add_def(&mut self, span: &Span, def: FuncDef) -> CompileResult<u32> {
        let defs = &mut self.function_scope_mut().defs;
        if defs.len() > INDEX_MAX as usize {
            Err(CompileError::new(
                CompileErrorKind::InternalLimit,
                span,
                "too many nested functions in one function",
            ))?
        }
        defs.push(def);
        Ok((defs.len() - 1) as u32)
    }

    /// Finds what `symbol` refers to, capturing it from enclosing functions
    /// when needed.
    pub(crate) fn resolve(&mut self, span: &Span, symbol: Symbol) -> CompileResult<Slot> {
        let mut found = None;
        let mut local = true;
        let unused = self
            .scopes
            .iter()
            .any(|s| s.flags.contains(ScopeFlags::UNUSED));
        for (depth, scope) in self.scopes.iter().enumerate().rev() {
            if let Some(position) = scope.find(symbol) {
                found = Some((depth, position));
                break;
            }
            if scope.is_function() {
                local = false;
            }
        }

        let Some((depth, position)) = found else {
            return self.resolve_global(span, symbol);
        };

        let mut slot = self.scopes[depth].syms[position].slot.clone();
        slot.flags |= SlotFlags::NAMED;
        // constants carry no state, and code in unused scopes never runs
        if local || unused || slot.flags.intersects(SlotFlags::CONSTANT | SlotFlags::REF) {
            return Ok(slot);
        }

        self.scopes[depth].syms[position].keep = true;
        let owner = self.scopes[..=depth]
            .iter()
            .rposition(Scope::is_function)
            .unwrap_or(0);
        self.scopes[owner].flags |= ScopeFlags::ENV;

        // walk down to the current function, giving every function in between
        // a reference to the environment
        let mut env = 0;
        for scope in self.scopes[owner + 1..]
            .iter_mut()
            .filter(|s| s.is_function())
        {
            env = match scope.envs.iter().position(|&e| e == env) {
                Some(existing) => existing as u32 + 1,
                None => {
                    if scope.envs.len() >= ENV_MAX as usize {
                        Err(CompileError::new(
                            CompileErrorKind::InternalLimit,
                            span,
                            "too many captured environments in one function",
                        ))?
                    }
                    scope.envs.push(env);
                    scope.envs.len() as u32
                }
            };
        }
        log::trace!("captured {:?} as environment {env}", symbol);
        slot.env = env;
        Ok(slot)
    }

    fn resolve_global(&self, span: &Span, symbol: Symbol) -> CompileResult<Slot> {
        match self.world.lookup(symbol) {
            Some(Global::Constant(value)) => {
                let mut slot = Slot::constant(value.clone());
                slot.flags |= SlotFlags::NAMED;
                Ok(slot)
            }
            Some(Global::Var) => Ok(Slot::reference(Value::Cell(symbol))),
            None => Err(CompileError::new(
                CompileErrorKind::UnknownSymbol,
                span,
                format_args!("`{}` is not defined", self.world.name(symbol)),
            )),
        }
    }

    /// The value of `symbol` if it is known at compile time. Unlike
    /// [`Compiler::resolve`] this never captures anything.
    pub(crate) fn lookup_constant(&self, symbol: Symbol) -> Option<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(position) = scope.find(symbol) {
                let slot = &scope.syms[position].slot;
                return slot.is_constant().then(|| slot.constant.clone());
            }
        }
        match self.world.lookup(symbol)? {
            Global::Constant(value) => Some(value.clone()),
            Global::Var => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{ScopeFlags, ScopeKind};
    use crate::{
        compiler::{CompileErrorKind, Compiler, Slot, SlotFlags},
        value::Value,
        world::World,
    };

    #[test]
    fn resolving_twice_gives_the_same_storage() {
        let mut world = World::with_builtins();
        let x = world.intern("x");
        let mut c = Compiler::new(&world);
        c.push_scope(ScopeKind::Top);
        c.define(x, Slot::local(0));

        let first = c.resolve(&(0..1), x).unwrap();
        let second = c.resolve(&(0..1), x).unwrap();
        check!(first.same_storage(&second));
        check!(first.flags.contains(SlotFlags::NAMED));
    }

    #[test]
    fn shadowing_only_affects_later_lookups() {
        let mut world = World::new();
        let x = world.intern("x");
        let mut c = Compiler::new(&world);
        c.push_scope(ScopeKind::Top);
        c.define(x, Slot::local(0));
        let before = c.resolve(&(0..1), x).unwrap();
        c.define(x, Slot::local(1));
        let after = c.resolve(&(0..1), x).unwrap();
        check!(before.index == 0);
        check!(after.index == 1);

        c.push_scope(ScopeKind::Block);
        c.define(x, Slot::local(2));
        check!(c.resolve(&(0..1), x).unwrap().index == 2);
        c.pop_scope();
        check!(c.resolve(&(0..1), x).unwrap().index == 1);
    }

    #[test]
    fn captures_are_shared_per_environment() {
        let mut world = World::new();
        let x = world.intern("x");
        let y = world.intern("y");
        let mut c = Compiler::new(&world);
        c.push_scope(ScopeKind::Top);
        c.define(x, Slot::local(0));
        c.define(y, Slot::local(1));
        c.push_scope(ScopeKind::Function);
        c.push_scope(ScopeKind::Block);

        let x1 = c.resolve(&(0..1), x).unwrap();
        let x2 = c.resolve(&(0..1), x).unwrap();
        let y1 = c.resolve(&(0..1), y).unwrap();
        check!(x1.env == 1);
        check!(x1 == x2);
        check!(y1.env == 1);
        check!(y1.index == 1);
        check!(c.scopes[1].envs == [0]);
        check!(c.scopes[0].flags.contains(ScopeFlags::ENV));
    }

    #[test]
    fn captures_chain_through_every_function() {
        let mut world = World::new();
        let x = world.intern("x");
        let mut c = Compiler::new(&world);
        c.push_scope(ScopeKind::Top);
        c.define(x, Slot::local(3));
        c.push_scope(ScopeKind::Function);
        c.push_scope(ScopeKind::Function);
        c.push_scope(ScopeKind::Function);

        let slot = c.resolve(&(0..1), x).unwrap();
        check!(slot.env == 1);
        check!(slot.index == 3);
        check!(c.scopes[1].envs == [0]);
        check!(c.scopes[2].envs == [1]);
        check!(c.scopes[3].envs == [1]);
    }

    #[test]
    fn no_captures_from_unused_scopes() {
        let mut world = World::new();
        let x = world.intern("x");
        let mut c = Compiler::new(&world);
        c.push_scope(ScopeKind::Top);
        c.define(x, Slot::local(0));
        c.push_scope(ScopeKind::Unused);
        c.push_scope(ScopeKind::Function);
        let slot = c.resolve(&(0..1), x).unwrap();
        check!(slot.env == 0);
        check!(c.scopes[2].envs.is_empty());
    }

    #[test]
    fn no_captures_of_bindings_inside_unused_scopes() {
        let mut world = World::new();
        let x = world.intern("x");
        let mut c = Compiler::new(&world);
        c.push_scope(ScopeKind::Top);
        c.push_scope(ScopeKind::Unused);
        c.push_scope(ScopeKind::Block);
        c.define(x, Slot::local(0));
        c.push_scope(ScopeKind::Function);
        let slot = c.resolve(&(0..1), x).unwrap();
        check!(slot.env == 0);
        check!(c.scopes[3].envs.is_empty());
        check!(!c.scopes[0].flags.contains(ScopeFlags::ENV));
    }

    #[test]
    fn kept_registers_survive_the_block() {
        let mut world = World::new();
        let x = world.intern("x");
        let mut c = Compiler::new(&world);
        c.push_scope(ScopeKind::Top);
        c.push_scope(ScopeKind::Block);
        let index = c.scope_mut().regs.alloc().unwrap();
        c.define(x, Slot::local(index));
        c.push_scope(ScopeKind::Function);
        c.resolve(&(0..1), x).unwrap();
        c.scopes.pop();
        c.pop_scope();
        check!(c.scope().regs.is_allocated(index));
        // but the name is gone
        check!(c.resolve(&(0..1), x).is_err());
    }

    #[test]
    fn globals() {
        let mut world = World::with_builtins();
        world.define_var("counter");
        world.define("answer", Value::Integer(42));
        let counter = world.symbol("counter").unwrap();
        let answer = world.symbol("answer").unwrap();
        let missing = world.intern("missing");
        let mut c = Compiler::new(&world);
        c.push_scope(ScopeKind::Top);

        let slot = c.resolve(&(0..1), counter).unwrap();
        check!(slot.is_ref());
        check!(slot.constant == Value::Cell(counter));

        let slot = c.resolve(&(0..1), answer).unwrap();
        check!(slot.is_constant());
        check!(c.lookup_constant(answer) == Some(Value::Integer(42)));

        let_assert!(Err(err) = c.resolve(&(3..10), missing));
        check!(err.kind == CompileErrorKind::UnknownSymbol);
        check!(err.span == (3..10));
    }

    #[test]
    fn constants_are_deduplicated() {
        let world = World::new();
        let mut c = Compiler::new(&world);
        c.push_scope(ScopeKind::Top);
        let a = c.add_constant(&(0..1), Value::Integer(1)).unwrap();
        c.push_scope(ScopeKind::Block);
        let b = c.add_constant(&(0..1), Value::Integer(1)).unwrap();
        let r = c.add_constant(&(0..1), Value::Real(1.0)).unwrap();
        check!(a == b);
        check!(r != a);
        check!(c.scopes[0].consts.len() == 2);
        check!(c.scopes[1].consts.is_empty());
    }
}
