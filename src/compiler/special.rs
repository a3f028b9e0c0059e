//! Forms with their own evaluation rules.
//!
//! A special form is recognized by the exact name of its head symbol, before
//! the head is resolved, so a local binding cannot shadow one.

use core::fmt;

use super::{
    opcode::{encode, encode_a, encode_abx, Opcode, NEAR_SLOT_MAX},
    CompileError, CompileErrorKind, CompileResult, Compiler, Fopts, FoptsFlags, FuncDefFlags,
    LoopLabels, ScopeKind, Slot, SlotFlags,
};
use crate::{
    lexer::Span,
    value::{Symbol, Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Special {
    Quote,
    Def,
    Var,
    Do,
    While,
    Break,
    Continue,
    Fn,
    If,
    Cond,
    Set,
}

const NAMES: &[(&str, Special)] = &[
    ("quote", Special::Quote),
    ("def", Special::Def),
    ("var", Special::Var),
    ("do", Special::Do),
    ("while", Special::While),
    ("break", Special::Break),
    ("continue", Special::Continue),
    ("fn", Special::Fn),
    ("if", Special::If),
    ("cond", Special::Cond),
    ("set", Special::Set),
    ("varset", Special::Set),
];

impl Special {
    pub fn from_name(name: &str) -> Option<Self> {
        NAMES
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, special)| *special)
    }

    pub fn name(self) -> &'static str {
        match self {
            Special::Quote => "quote",
            Special::Def => "def",
            Special::Var => "var",
            Special::Do => "do",
            Special::While => "while",
            Special::Break => "break",
            Special::Continue => "continue",
            Special::Fn => "fn",
            Special::If => "if",
            Special::Cond => "cond",
            Special::Set => "set",
        }
    }

    /// Compiles `opts`, a tuple headed by this special form. Argument `i` is
    /// element `i + 1` of the tuple.
    pub(crate) fn compile(self, c: &mut Compiler<'_>, opts: &Fopts<'_>) -> CompileResult<Slot> {
        let args = opts.elements().get(1..).unwrap_or_default();
        match self {
            Special::Quote => {
                self.arity(opts, args, 1, Some(1))?;
                Ok(Slot::constant(args[0].clone()))
            }
            Special::Def | Special::Var => self.define(c, opts, args),
            Special::Do => compile_do(c, opts, args),
            Special::While => self.compile_while(c, opts, args),
            Special::Break | Special::Continue => self.jump(c, opts, args),
            Special::Fn => self.function(c, opts, args),
            Special::If => {
                self.arity(opts, args, 2, Some(3))?;
                let clauses = vec![(opts.index(1), opts.index(2))];
                let default = (args.len() == 3).then(|| opts.index(3));
                conditional(c, opts, clauses, default)
            }
            Special::Cond => {
                let clauses = (0..args.len() / 2)
                    .map(|pair| (opts.index(pair * 2 + 1), opts.index(pair * 2 + 2)))
                    .collect();
                let default = (args.len() % 2 == 1).then(|| opts.index(args.len()));
                conditional(c, opts, clauses, default)
            }
            Special::Set => self.set(c, opts, args),
        }
    }

    fn arity(
        self,
        opts: &Fopts<'_>,
        args: &[Value],
        min: usize,
        max: Option<usize>,
    ) -> CompileResult<()> {
        let expected = match max {
            Some(max) if max == min => format!("{min}"),
            Some(max) => format!("{min} to {max}"),
            None => format!("at least {min}"),
        };
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            Err(syntax(
                &opts.span(),
                format_args!(
                    "`{}` expects {expected} arguments, got {}",
                    self.name(),
                    args.len()
                ),
            ))?
        }
        Ok(())
    }

    fn symbol_argument(self, opts: &Fopts<'_>, index: usize) -> CompileResult<Symbol> {
        let sub = opts.index(index);
        sub.form.as_symbol().ok_or_else(|| {
            syntax(
                &sub.span(),
                format_args!("`{}` expects a symbol here", self.name()),
            )
        })
    }

    /// `(def name value)`, `(var name value)`
    fn define(self, c: &mut Compiler<'_>, opts: &Fopts<'_>, args: &[Value]) -> CompileResult<Slot> {
        self.arity(opts, args, 2, Some(2))?;
        let name = self.symbol_argument(opts, 1)?;
        let span = opts.span();
        let value = c.value(opts.index(2))?;

        let mut slot = if self == Special::Def && value.is_constant() {
            value
        } else {
            name_local(c, &span, value)?
        };
        slot.flags |= SlotFlags::NAMED;
        if self == Special::Var {
            slot.flags |= SlotFlags::MUTABLE;
        }
        log::debug!("bound {} to {:?}", c.world().name(name), slot);
        c.define(name, slot.clone());
        Ok(slot)
    }

    /// `(while condition body...)`
    fn compile_while(
        self,
        c: &mut Compiler<'_>,
        opts: &Fopts<'_>,
        args: &[Value],
    ) -> CompileResult<Slot> {
        self.arity(opts, args, 1, None)?;
        let span = opts.span();
        let function = c.function_scope_index();
        let top = c.buffer.len();
        let labels = LoopLabels {
            function,
            continue_to: top,
            breaks: vec![],
        };

        let test = opts.index(1);
        let test_span = test.span();
        let condition = c.value(test)?;
        let exit = if !condition.is_constant() {
            let reg = c.preread(&test_span, NEAR_SLOT_MAX, &condition)?;
            let at = c.emit_jump(&test_span, Opcode::JumpIfNot, reg);
            c.postread(&condition, reg);
            c.free_slot(&condition);
            Some(at)
        } else if condition.constant.is_truthy() {
            None
        } else {
            log::debug!("dropping loop that never runs at {span:?}");
            c.loops.push(labels);
            let body = c.throwaway(|c| loop_body(c, opts));
            c.loops.pop();
            body?;
            return Ok(Slot::nil());
        };

        c.loops.push(labels);
        loop_body(c, opts)?;
        let back = c.emit_jump(&span, Opcode::Jump, 0);
        c.patch_jump(back, top)?;

        let end = c.buffer.len();
        let breaks = c.loops.pop().map(|labels| labels.breaks).unwrap_or_default();
        for at in exit.into_iter().chain(breaks) {
            c.patch_jump(at, end)?;
        }
        Ok(Slot::nil())
    }

    /// `(break)`, `(continue)`
    fn jump(self, c: &mut Compiler<'_>, opts: &Fopts<'_>, args: &[Value]) -> CompileResult<Slot> {
        self.arity(opts, args, 0, Some(0))?;
        let span = opts.span();
        let function = c.function_scope_index();
        let Some(labels) = c.loops.last().filter(|labels| labels.function == function) else {
            return Err(syntax(
                &span,
                format_args!("`{}` outside of a loop", self.name()),
            ));
        };
        let continue_to = labels.continue_to;

        let at = c.emit_jump(&span, Opcode::Jump, 0);
        if self == Special::Continue {
            c.patch_jump(at, continue_to)?;
        } else if let Some(labels) = c.loops.last_mut() {
            labels.breaks.push(at);
        }
        Ok(Slot::nil())
    }

    /// `(fn name? [params...] body...)`
    fn function(
        self,
        c: &mut Compiler<'_>,
        opts: &Fopts<'_>,
        args: &[Value],
    ) -> CompileResult<Slot> {
        self.arity(opts, args, 1, None)?;
        let span = opts.span();
        let name = args[0].as_symbol();
        let params_at = if name.is_some() { 2 } else { 1 };
        let params = opts.index(params_at);
        let (Value::Array(list) | Value::Tuple(list)) = params.form else {
            return Err(syntax(&params.span(), "`fn` expects a parameter list"));
        };

        c.push_scope(ScopeKind::Function);
        let mut arity = 0;
        let mut vararg = false;
        for (i, param) in list.iter().enumerate() {
            let param_span = params.index(i).span();
            let Some(symbol) = param.as_symbol() else {
                return Err(syntax(&param_span, "parameters must be symbols"));
            };
            if c.world().name(symbol) == "&" {
                let rest = match &list[i + 1..] {
                    [Value::Symbol(rest)] => *rest,
                    _ => Err(syntax(
                        &param_span,
                        "`&` must be followed by exactly one parameter",
                    ))?,
                };
                bind_parameter(c, &param_span, rest)?;
                vararg = true;
                break;
            }
            bind_parameter(c, &param_span, symbol)?;
            arity += 1;
        }

        if let Some(name) = name {
            let reg = c.alloc_near(&span, NEAR_SLOT_MAX)?;
            c.emit(&span, encode_a(Opcode::LoadSelf, reg as u8));
            c.define(name, named(Slot::local(reg)));
        }

        let body = params_at + 1..opts.elements().len();
        if body.is_empty() {
            c.emit(&span, encode(Opcode::ReturnNil));
        }
        let last = body.end.saturating_sub(1);
        for i in body {
            if i == last {
                c.value(opts.index(i).with_flags(FoptsFlags::TAIL))?;
            } else {
                let slot = c.value(opts.index(i).with_flags(FoptsFlags::DROP))?;
                c.free_slot(&slot);
            }
        }

        let mut def = c.pop_funcdef()?;
        def.name = name;
        def.arity = arity;
        if vararg {
            def.flags |= FuncDefFlags::VARARG;
        }
        let index = c.add_def(&span, def)?;
        let target = c.get_target(&span, opts)?;
        c.emit(
            &span,
            encode_abx(Opcode::Closure, target.index as u8, index as u16),
        );
        Ok(target)
    }

    /// `(set name value)`
    fn set(self, c: &mut Compiler<'_>, opts: &Fopts<'_>, args: &[Value]) -> CompileResult<Slot> {
        self.arity(opts, args, 2, Some(2))?;
        let name = self.symbol_argument(opts, 1)?;
        let name_span = opts.index(1).span();
        let dest = c.resolve(&name_span, name)?;
        if !dest.is_mutable() {
            Err(CompileError::new(
                CompileErrorKind::ConstantWrite,
                &name_span,
                format_args!("cannot set constant `{}`", c.world().name(name)),
            ))?
        }

        let hint = (dest.is_local() && dest.index <= NEAR_SLOT_MAX).then(|| dest.clone());
        let value = c.value(opts.index(2).with_hint(hint))?;
        c.copy(&opts.span(), &dest, &value)?;
        if !value.same_storage(&dest) {
            c.free_slot(&value);
        }
        Ok(dest)
    }
}

fn syntax(span: &Span, message: impl fmt::Display) -> CompileError {
    CompileError::new(CompileErrorKind::SyntaxShape, span, message)
}

fn named(mut slot: Slot) -> Slot {
    slot.flags |= SlotFlags::NAMED;
    slot
}

fn bind_parameter(c: &mut Compiler<'_>, span: &Span, symbol: Symbol) -> CompileResult<()> {
    let reg = c.alloc_far(span)?;
    c.define(symbol, named(Slot::local(reg)));
    Ok(())
}

/// A register `value` can be named by: the value's own register when it is
/// an unnamed temporary, otherwise a fresh one it is copied into.
fn name_local(c: &mut Compiler<'_>, span: &Span, value: Slot) -> CompileResult<Slot> {
    let unnamed = value.is_local() && !value.flags.contains(SlotFlags::NAMED);
    if unnamed {
        return Ok(value);
    }
    let local = Slot::local(c.alloc_far(span)?);
    c.copy(span, &local, &value)?;
    c.free_slot(&value);
    Ok(local)
}

/// `(do forms...)`
fn compile_do(c: &mut Compiler<'_>, opts: &Fopts<'_>, args: &[Value]) -> CompileResult<Slot> {
    if args.is_empty() {
        return Ok(Slot::nil());
    }
    c.push_scope(ScopeKind::Block);
    for i in 1..args.len() {
        let slot = c.value(opts.index(i).with_flags(FoptsFlags::DROP))?;
        c.free_slot(&slot);
    }
    let last = Fopts {
        flags: opts.flags,
        kinds: opts.kinds,
        hint: opts.hint.clone(),
        ..opts.index(args.len())
    };
    let slot = c.value(last)?;
    Ok(c.pop_scope_keep_slot(slot))
}

fn loop_body(c: &mut Compiler<'_>, opts: &Fopts<'_>) -> CompileResult<()> {
    c.push_scope(ScopeKind::Block);
    for i in 2..opts.elements().len() {
        let slot = c.value(opts.index(i).with_flags(FoptsFlags::DROP))?;
        c.free_slot(&slot);
    }
    c.pop_scope();
    Ok(())
}

/// Compiles one branch of a conditional in its own block scope, leaving the
/// value in `target` when there is one.
fn branch(
    c: &mut Compiler<'_>,
    body: Fopts<'_>,
    opts: &Fopts<'_>,
    target: Option<&Slot>,
) -> CompileResult<Slot> {
    let body = Fopts {
        flags: opts.flags,
        kinds: opts.kinds,
        hint: target.or(opts.hint.as_ref()).cloned(),
        ..body
    };
    c.push_scope(ScopeKind::Block);
    let slot = c.value(body)?;
    Ok(c.pop_scope_keep_slot(slot))
}

/// `if` and `cond`: tests in order, the first truthy one picks its body,
/// `default` runs when none is.
///
/// Tests known at compile time pick or drop their body right away. The code
/// for a dropped body is still compiled to report its errors.
fn conditional<'a>(
    c: &mut Compiler<'_>,
    opts: &Fopts<'a>,
    clauses: Vec<(Fopts<'a>, Fopts<'a>)>,
    mut default: Option<Fopts<'a>>,
) -> CompileResult<Slot> {
    let span = opts.span();
    let collect = !opts.is_tail() && !opts.is_drop();
    let mut target: Option<Slot> = None;
    let mut ends = vec![];
    let mut chosen = None;

    let mut clauses = clauses.into_iter();
    while let Some((test, body)) = clauses.next() {
        let test_span = test.span();
        let condition = c.value(test)?;

        if condition.is_constant() {
            if condition.constant.is_truthy() {
                // everything after this clause is dead
                for (test, body) in clauses.by_ref() {
                    c.throwaway(|c| {
                        c.value(test)?;
                        c.value(body).map(drop)
                    })?;
                }
                if let Some(default) = default.take() {
                    c.throwaway(|c| c.value(default).map(drop))?;
                }
                chosen = Some(body);
                break;
            }
            c.throwaway(|c| c.value(body).map(drop))?;
            continue;
        }

        if collect && target.is_none() {
            target = Some(c.get_target(&span, opts)?);
        }
        let reg = c.preread(&test_span, NEAR_SLOT_MAX, &condition)?;
        let skip = c.emit_jump(&test_span, Opcode::JumpIfNot, reg);
        c.postread(&condition, reg);
        c.free_slot(&condition);

        let slot = branch(c, body, opts, target.as_ref())?;
        if target.is_none() {
            c.free_slot(&slot);
        }
        if !opts.is_tail() {
            ends.push(c.emit_jump(&span, Opcode::Jump, 0));
        }
        let next = c.buffer.len();
        c.patch_jump(skip, next)?;
    }

    let result = match (chosen.or(default), &target) {
        (Some(body), target) => branch(c, body, opts, target.as_ref())?,
        (None, Some(target)) => {
            c.copy(&span, target, &Slot::nil())?;
            target.clone()
        }
        (None, None) => Slot::nil(),
    };
    let end = c.buffer.len();
    for at in ends {
        c.patch_jump(at, end)?;
    }
    Ok(result)
}
