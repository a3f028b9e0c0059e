//! Compile forms into register bytecode.
//!
//! One pass, no backtracking: every form is compiled into a [`Slot`] that
//! says where its value lives, and instructions are emitted as soon as a
//! slot has to be read or written. For example `(fn [x] (+ x x 3))`
//! compiles to a closure whose body is
//!
//! ```text
//! == function (arity 1, slots 2) ==
//!    0  ldc $1 k0         ; 3
//!    1  push3 $0 $0 $1
//!    2  ldc $1 k1         ; <builtin +>
//!    3  tcall $1
//! ```
//!
//! while `(+ 1 2)` folds away to a single `ldc` of 3.

use core::fmt;

use crate::{
    lexer::Span,
    reader::{Parsed, SourceMap},
    value::Value,
    world::World,
};

pub mod access;
pub mod fopts;
pub mod form;
pub mod funcdef;
pub mod opcode;
pub mod optimizer;
pub mod regalloc;
pub mod scope;
pub mod slot;
pub mod special;

pub use fopts::{Fopts, FoptsFlags};
pub use funcdef::{FuncDef, FuncDefFlags};
pub use optimizer::{Folder, Optimization, Optimizer, Specializer};
pub use scope::{Scope, ScopeFlags, ScopeKind};
pub use slot::{Slot, SlotFlags};
pub use special::Special;

use opcode::Instruction;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileErrorKind {
    #[error("syntax error")]
    SyntaxShape,
    #[error("unknown symbol")]
    UnknownSymbol,
    #[error("constant write")]
    ConstantWrite,
    #[error("recursion limit")]
    RecursionLimit,
    #[error("internal limit")]
    InternalLimit,
}

/// The first error a compile ran into. Nothing is emitted after it.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: Box<str>,
    pub span: Span,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, span: &Span, message: impl fmt::Display) -> Self {
        Self {
            kind,
            message: Box::from(message.to_string().as_str()),
            span: span.clone(),
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Deepest form nesting compiled before giving up with
    /// [`CompileErrorKind::RecursionLimit`].
    pub recursion_limit: usize,
    /// Run the built-in call optimizer.
    pub optimize: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            recursion_limit: 256,
            optimize: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Compiling,
    Done,
}

/// Jump targets of a `while` being compiled.
#[derive(Debug)]
struct LoopLabels {
    /// stack position of the function scope the loop lives in
    function: usize,
    continue_to: usize,
    breaks: Vec<usize>,
}

/// Compiles one top level form. A compiler is consumed by
/// [`Compiler::compile`], so each request gets a fresh one.
pub struct Compiler<'w> {
    world: &'w World,
    options: CompileOptions,
    optimizer: Optimizer,
    scopes: Vec<Scope>,
    buffer: Vec<Instruction>,
    map_buffer: Vec<Span>,
    loops: Vec<LoopLabels>,
    recursion_guard: usize,
    status: Status,
}

impl<'w> Compiler<'w> {
    pub fn new(world: &'w World) -> Self {
        Self {
            world,
            options: CompileOptions::default(),
            optimizer: Optimizer::standard(world),
            scopes: vec![],
            buffer: vec![],
            map_buffer: vec![],
            loops: vec![],
            recursion_guard: 0,
            status: Status::Compiling,
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn world(&self) -> &'w World {
        self.world
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Whether the outermost scope has been popped.
    pub fn is_done(&self) -> bool {
        self.status == Status::Done
    }

    /// Compiles `form` as the body of a function taking no arguments.
    pub fn compile(mut self, form: &Value, map: &SourceMap) -> CompileResult<FuncDef> {
        log::debug!("compiling form at {:?}", map.span);
        self.push_scope(ScopeKind::Top);
        let opts = Fopts::new(form, map).with_flags(FoptsFlags::TAIL);
        self.value(opts)?;
        let def = self.pop_funcdef()?;
        debug_assert!(self.is_done());
        Ok(def)
    }
}

/// Compiles a parsed top level form against `world` with default options.
pub fn compile(world: &World, parsed: &Parsed) -> CompileResult<FuncDef> {
    Compiler::new(world).compile(&parsed.form, &parsed.map)
}

#[cfg(test)]
pub(crate) mod tests {
    use arbitrary::Unstructured;
    use arbtest::arbtest;
    use assert2::{check, let_assert};

    use super::{
        compile,
        opcode::{self, Operand},
        CompileErrorKind, CompileOptions, Compiler, FuncDef,
    };
    use crate::world::World;

    /// Reads and compiles the first form in `source`.
    pub(crate) fn compile_str(world: &mut World, source: &str) -> super::CompileResult<FuncDef> {
        compile_with(world, source, CompileOptions::default())
    }

    pub(crate) fn compile_with(
        world: &mut World,
        source: &str,
        options: CompileOptions,
    ) -> super::CompileResult<FuncDef> {
        let parsed = world.read(source).unwrap();
        Compiler::new(world)
            .with_options(options)
            .compile(&parsed[0].form, &parsed[0].map)
    }

    #[test]
    fn compiles_a_literal() {
        let mut world = World::with_builtins();
        let parsed = world.read("42").unwrap();
        let def = compile(&world, &parsed[0]).unwrap();
        check!(def.constants.len() == 1);
        check!(def.bytecode.len() == def.source_map.len());
        check!(def.source_map.iter().all(|span| *span == (0..2)));
    }

    #[test]
    fn first_error_aborts() {
        let mut world = World::with_builtins();
        let_assert!(Err(err) = compile_str(&mut world, "(do (print missing) (quote))"));
        check!(err.kind == CompileErrorKind::UnknownSymbol);
        check!(err.span == (11..18));
        check!(err.to_string() == "unknown symbol: `missing` is not defined");
    }

    #[test]
    fn done_after_outermost_pop() {
        let mut world = World::with_builtins();
        let parsed = world.read("(fn [x] x)").unwrap();
        let mut compiler = Compiler::new(&world);
        compiler.push_scope(super::ScopeKind::Top);
        check!(!compiler.is_done());
        let opts = super::Fopts::new(&parsed[0].form, &parsed[0].map)
            .with_flags(super::FoptsFlags::TAIL);
        compiler.value(opts).unwrap();
        let def = compiler.pop_funcdef().unwrap();
        check!(compiler.is_done());
        check!(def.defs.len() == 1);
    }

    /// Writes random programs that always compile: every symbol is bound,
    /// only `var`s are set and `break` only shows up inside a loop.
    struct Programs<'u, 'd> {
        u: &'u mut Unstructured<'d>,
        locals: Vec<(String, bool)>,
        fresh: usize,
        in_loop: bool,
    }

    impl Programs<'_, '_> {
        fn forms(&mut self, depth: usize, count: usize) -> arbitrary::Result<String> {
            let mut out = String::new();
            for _ in 0..count {
                out.push(' ');
                out.push_str(&self.form(depth)?);
            }
            Ok(out)
        }

        fn name(&mut self) -> String {
            self.fresh += 1;
            format!("v{}", self.fresh)
        }

        fn form(&mut self, depth: usize) -> arbitrary::Result<String> {
            let Some(depth) = depth.checked_sub(1) else {
                return self.atom();
            };
            Ok(match self.u.int_in_range(0..=13)? {
                0 | 1 => self.atom()?,
                2 => {
                    let op = *self.u.choose(&["+", "-", "*", "/", "<", "=", ">="])?;
                    let n = self.u.int_in_range(0..=3)?;
                    format!("({op}{})", self.forms(depth, n)?)
                }
                3 => format!("(if{})", self.forms(depth, 3)?),
                4 => {
                    let mark = self.locals.len();
                    let mut out = String::from("(do");
                    for _ in 0..self.u.int_in_range(1..=4)? {
                        if self.u.ratio(1, 3)? {
                            let mutable = self.u.arbitrary()?;
                            let name = self.name();
                            let value = self.form(depth)?;
                            let keyword = if mutable { "var" } else { "def" };
                            out.push_str(&format!(" ({keyword} {name} {value})"));
                            self.locals.push((name, mutable));
                        } else {
                            out.push_str(&self.forms(depth, 1)?);
                        }
                    }
                    self.locals.truncate(mark);
                    out + ")"
                }
                5 => {
                    let mark = self.locals.len();
                    let in_loop = std::mem::replace(&mut self.in_loop, false);
                    let mut params = Vec::new();
                    for _ in 0..self.u.int_in_range(0..=3)? {
                        let name = self.name();
                        params.push(name.clone());
                        self.locals.push((name, false));
                    }
                    let n = self.u.int_in_range(0..=3)?;
                    let body = self.forms(depth, n)?;
                    self.locals.truncate(mark);
                    self.in_loop = in_loop;
                    format!("(fn [{}]{body})", params.join(" "))
                }
                6 => {
                    let condition = self.form(depth)?;
                    let in_loop = std::mem::replace(&mut self.in_loop, true);
                    let n = self.u.int_in_range(0..=2)?;
                    let body = self.forms(depth, n)?;
                    self.in_loop = in_loop;
                    format!("(while {condition}{body} (break))")
                }
                7 => {
                    let n = self.u.int_in_range(0..=3)?;
                    format!("[{}]", self.forms(depth, n)?.trim_start())
                }
                8 => {
                    let n = self.u.int_in_range(0..=2)? * 2;
                    format!("{{{}}}", self.forms(depth, n)?.trim_start())
                }
                9 => {
                    let n = self.u.int_in_range(0..=4)?;
                    format!("(print{})", self.forms(depth, n)?)
                }
                10 => {
                    let mutable = self
                        .locals
                        .iter()
                        .filter(|(_, mutable)| *mutable)
                        .map(|(name, _)| name.clone())
                        .collect::<Vec<_>>();
                    match mutable.is_empty() {
                        true => self.atom()?,
                        false => {
                            let name = self.u.choose(&mutable)?.clone();
                            format!("(set {name} {})", self.form(depth)?)
                        }
                    }
                }
                11 => {
                    let n = self.u.int_in_range(1..=5)?;
                    format!("(cond{})", self.forms(depth, n)?)
                }
                12 if self.in_loop => "(break)".to_owned(),
                _ => format!("(quote {})", self.atom()?),
            })
        }

        fn atom(&mut self) -> arbitrary::Result<String> {
            Ok(match self.u.int_in_range(0..=3)? {
                0 => self.u.int_in_range(-300i64..=300)?.to_string(),
                1 => (*self.u.choose(&["nil", "true", "false", "1.5", "-0.25"])?).to_owned(),
                _ if self.locals.is_empty() => "7".to_owned(),
                _ => self.u.choose(&self.locals)?.0.clone(),
            })
        }
    }

    fn check_operands(def: &FuncDef) {
        check!(def.bytecode.len() == def.source_map.len());
        let len = def.bytecode.len() as i64;
        for (pos, &instr) in def.bytecode.iter().enumerate() {
            for (operand, value) in opcode::operands(instr) {
                let limit = match operand {
                    Operand::Reg | Operand::FarReg => def.slot_count as i64,
                    Operand::Const => def.constants.len() as i64,
                    Operand::Def => def.defs.len() as i64,
                    Operand::Env => def.environments.len() as i64 + 1,
                    Operand::Jump => {
                        let target = pos as i64 + 1 + value;
                        check!((0..len).contains(&target), "jump from {pos} to {target}");
                        continue;
                    }
                    Operand::EnvSlot | Operand::Imm => continue,
                };
                check!(value < limit, "{operand:?} {value} at {pos}");
            }
        }
        def.defs.iter().for_each(check_operands);
    }

    #[test]
    fn operands_stay_in_range() {
        arbtest(|u| {
            let mut programs = Programs {
                u,
                locals: vec![],
                fresh: 0,
                in_loop: false,
            };
            let source = programs.form(5)?;
            let mut world = World::with_builtins();
            let optimize = programs.u.arbitrary()?;
            let options = CompileOptions {
                optimize,
                ..CompileOptions::default()
            };
            let_assert!(Ok(def) = compile_with(&mut world, &source, options), "{source}");
            check_operands(&def);
            Ok(())
        });
    }
}
