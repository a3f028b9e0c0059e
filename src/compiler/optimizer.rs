//! Specialized code for calls to known builtins.
//!
//! Builtins are recognized by identity, not by name: rebinding `+` to a
//! function of your own turns the optimization off for it, and a builtin
//! bound under another name keeps it.

use core::fmt;
use std::collections::HashMap;

use super::{
    opcode::{encode_abc, Opcode, NEAR_SLOT_MAX},
    CompileResult, Compiler, Fopts, Slot, Special,
};
use crate::{
    num::{Arith, Compare, Number},
    value::{BuiltinId, Value},
    world::World,
};

/// Compiles a call to a builtin, or declines with `None` before emitting
/// anything. The arguments are the call's elements after the head.
pub type Specializer = fn(&mut Compiler<'_>, &Fopts<'_>, &[Value]) -> CompileResult<Option<Slot>>;

/// Computes a call at compile time from constant arguments, or declines.
/// Must agree with what the builtin would return at run time.
pub type Folder = fn(&[Value]) -> Option<Value>;

#[derive(Clone, Copy)]
pub struct Optimization {
    pub specialize: Specializer,
    /// lets calls to this builtin appear inside other folded calls
    pub fold: Option<Folder>,
}

impl fmt::Debug for Optimization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Optimization")
            .field("folds", &self.fold.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Optimizer {
    table: HashMap<BuiltinId, Optimization>,
}

impl Optimizer {
    /// An optimizer that knows no builtins.
    pub fn new() -> Self {
        Self::default()
    }

    /// Optimizations for the arithmetic and comparison builtins `world` has
    /// registered.
    pub fn standard(world: &World) -> Self {
        let mut optimizer = Self::new();
        for &(name, optimization) in STANDARD {
            if let Some(builtin) = world.registered_builtin(name) {
                optimizer.register(builtin.id, optimization);
            }
        }
        optimizer
    }

    /// Returns the optimization `id` had before, if any.
    pub fn register(&mut self, id: BuiltinId, optimization: Optimization) -> Option<Optimization> {
        self.table.insert(id, optimization)
    }

    pub fn get(&self, id: BuiltinId) -> Option<Optimization> {
        self.table.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn numbers(args: &[Value]) -> Option<Vec<Number>> {
    args.iter().map(Value::as_number).collect()
}

fn fold_arith(op: Arith, args: &[Value]) -> Option<Value> {
    Number::fold(op, &numbers(args)?).map(Value::from)
}

fn fold_compare(op: Compare, args: &[Value]) -> Option<Value> {
    Some(Value::Boolean(Number::fold_compare(op, &numbers(args)?)))
}

macro_rules! standard {
    ($($name:literal => $fold:ident($folder:ident, $op:expr), $specialize:ident($opcode:ident);)*) => {
        $(
            fn $fold(args: &[Value]) -> Option<Value> {
                $folder($op, args)
            }

            fn $specialize(
                c: &mut Compiler<'_>,
                opts: &Fopts<'_>,
                args: &[Value],
            ) -> CompileResult<Option<Slot>> {
                fold_or_binary(c, opts, args, $fold, Opcode::$opcode)
            }
        )*

        const STANDARD: &[(&str, Optimization)] = &[
            $(($name, Optimization { specialize: $specialize, fold: Some($fold) }),)*
        ];
    };
}

standard! {
    "+" => fold_add(fold_arith, Arith::Add), specialize_add(Add);
    "-" => fold_subtract(fold_arith, Arith::Subtract), specialize_subtract(Subtract);
    "*" => fold_multiply(fold_arith, Arith::Multiply), specialize_multiply(Multiply);
    "/" => fold_divide(fold_arith, Arith::Divide), specialize_divide(Divide);
    "<" => fold_less(fold_compare, Compare::Less), specialize_less(LessThan);
    ">" => fold_greater(fold_compare, Compare::Greater), specialize_greater(GreaterThan);
    "<=" => fold_less_equal(fold_compare, Compare::LessEqual), specialize_less_equal(LessThanEqual);
    ">=" => fold_greater_equal(fold_compare, Compare::GreaterEqual), specialize_greater_equal(GreaterThanEqual);
    "=" => fold_equal(fold_compare, Compare::Equal), specialize_equal(Equals);
}

/// Folds a call whose arguments are all known, or emits `op` for a call
/// with exactly two arguments. Anything else goes through a generic call.
fn fold_or_binary(
    c: &mut Compiler<'_>,
    opts: &Fopts<'_>,
    args: &[Value],
    fold: Folder,
    op: Opcode,
) -> CompileResult<Option<Slot>> {
    let span = opts.span();
    let known: Option<Vec<Value>> = args.iter().map(|arg| c.constant_value(arg, 1)).collect();
    if let Some(folded) = known.as_deref().and_then(fold) {
        if opts.kinds.contains(folded.kind()) {
            log::debug!(
                "folded call at {span:?} to {}",
                folded.display(c.world().interner())
            );
            return Ok(Some(Slot::constant(folded)));
        }
    }

    if args.len() != 2 {
        return Ok(None);
    }
    let (lhs_opts, rhs_opts) = (opts.index(1), opts.index(2));
    let (lhs_span, rhs_span) = (lhs_opts.span(), rhs_opts.span());
    let lhs = c.value(lhs_opts)?;
    let rhs = c.value(rhs_opts)?;
    let target = c.get_target(&span, opts)?;
    let a = c.preread(&lhs_span, NEAR_SLOT_MAX, &lhs)?;
    let b = c.preread(&rhs_span, NEAR_SLOT_MAX, &rhs)?;
    c.emit(
        &span,
        encode_abc(op, target.index as u8, a as u8, b as u8),
    );
    c.postread(&rhs, b);
    c.postread(&lhs, a);
    c.free_slot(&lhs);
    c.free_slot(&rhs);
    Ok(Some(target))
}

impl Compiler<'_> {
    /// The value `form` evaluates to, if it is known at compile time without
    /// running anything. Nested calls count when their builtin can fold.
    pub(crate) fn constant_value(&self, form: &Value, depth: usize) -> Option<Value> {
        if self.recursion_guard + depth >= self.options.recursion_limit {
            return None;
        }
        match form {
            Value::Symbol(symbol) => self.lookup_constant(*symbol),
            Value::Array(_) | Value::Struct(_) => None,
            Value::Tuple(items) => {
                let (head, args) = match items.split_first() {
                    None => return Some(form.clone()),
                    Some((Value::Symbol(head), args)) => (*head, args),
                    Some(_) => return None,
                };
                match Special::from_name(self.world.name(head)) {
                    Some(Special::Quote) if args.len() == 1 => return Some(args[0].clone()),
                    Some(_) => return None,
                    None => {}
                }
                let Value::Builtin(builtin) = self.lookup_constant(head)? else {
                    return None;
                };
                let fold = self.optimizer.get(builtin.id)?.fold?;
                let args = args
                    .iter()
                    .map(|arg| self.constant_value(arg, depth + 1))
                    .collect::<Option<Vec<_>>>()?;
                fold(&args)
            }
            _ => Some(form.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{Optimization, Optimizer};
    use crate::{
        compiler::{
            opcode::{self, Opcode},
            tests::{compile_str, compile_with},
            CompileOptions, CompileResult, Compiler, Fopts, FuncDef, Slot,
        },
        value::Value,
        world::World,
    };

    fn ops(def: &FuncDef) -> Vec<Opcode> {
        def.bytecode
            .iter()
            .filter_map(|&i| opcode::opcode(i))
            .collect()
    }

    #[test]
    fn folds_constant_arithmetic() {
        let mut world = World::with_builtins();
        let def = compile_str(&mut world, "(+ 1 2)").unwrap();
        check!(ops(&def) == [Opcode::LoadConstant, Opcode::Return]);
        check!(def.constants[..] == [Value::Integer(3)]);

        let def = compile_str(&mut world, "(* (+ 1 2) (- 10 4) 0.5)").unwrap();
        check!(def.constants[..] == [Value::Real(9.0)]);

        let def = compile_str(&mut world, "(< 1 2 (quote 3))").unwrap();
        check!(ops(&def) == [Opcode::LoadTrue, Opcode::Return]);
    }

    #[test]
    fn folding_beats_the_run_time_version() {
        let mut world = World::with_builtins();
        let folded = compile_str(&mut world, "(+ 1 2)").unwrap();
        let run_time = compile_str(&mut world, "(do (var a 1) (var b 2) (+ a b))").unwrap();
        check!(folded.bytecode.len() < run_time.bytecode.len());
        check!(ops(&run_time).contains(&Opcode::Add));
    }

    #[test]
    fn constant_bindings_fold() {
        let mut world = World::with_builtins();
        world.define("ten", Value::Integer(10));
        let def = compile_str(&mut world, "(do (def x 2) (fn [] (* x ten)))").unwrap();
        let inner = &def.defs[0];
        check!(inner.constants[..] == [Value::Integer(20)]);
        check!(inner.environments.is_empty());
    }

    #[test]
    fn declines_where_the_machine_raises() {
        let mut world = World::with_builtins();
        let def = compile_str(&mut world, "(/ 1 0)").unwrap();
        check!(
            ops(&def)
                == [
                    Opcode::LoadConstant,
                    Opcode::LoadConstant,
                    Opcode::Divide,
                    Opcode::Return,
                ]
        );

        let def = compile_str(&mut world, "(+ 9223372036854775807 1 1)").unwrap();
        check!(ops(&def).last() == Some(&Opcode::TailCall));
    }

    #[test]
    fn rebinding_turns_it_off() {
        let mut world = World::with_builtins();
        let def = compile_str(&mut world, "(do (def + print) (+ 1 2))").unwrap();
        check!(ops(&def).contains(&Opcode::TailCall));

        // the builtin itself is still recognized under a new name
        let plus = world.registered_builtin("+").unwrap();
        world.define("plus", Value::Builtin(plus));
        let def = compile_str(&mut world, "(plus 1 2)").unwrap();
        check!(def.constants[..] == [Value::Integer(3)]);
    }

    #[test]
    fn no_folding_when_disabled() {
        let mut world = World::with_builtins();
        let options = CompileOptions {
            optimize: false,
            ..CompileOptions::default()
        };
        let def = compile_with(&mut world, "(+ 1 2)", options).unwrap();
        check!(ops(&def).last() == Some(&Opcode::TailCall));
    }

    #[test]
    fn custom_specializers() {
        fn always_nil(
            _: &mut Compiler<'_>,
            _: &Fopts<'_>,
            _: &[Value],
        ) -> CompileResult<Option<Slot>> {
            Ok(Some(Slot::nil()))
        }

        let mut world = World::with_builtins();
        let print = world.registered_builtin("print").unwrap();
        let parsed = world.read("(print 1)").unwrap();
        let mut optimizer = Optimizer::standard(&world);
        check!(optimizer.len() == 9);
        let_assert!(
            None = optimizer.register(
                print.id,
                Optimization {
                    specialize: always_nil,
                    fold: None,
                },
            )
        );
        let def = Compiler::new(&world)
            .with_optimizer(optimizer)
            .compile(&parsed[0].form, &parsed[0].map)
            .unwrap();
        check!(ops(&def) == [Opcode::ReturnNil]);
    }
}
