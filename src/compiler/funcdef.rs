use core::fmt::Write;

use bitflags::bitflags;

use super::{
    opcode::{self, Instruction, Operand},
    CompileError, CompileErrorKind, CompileResult, Compiler, ScopeFlags, Status,
};
use crate::{
    lexer::Span,
    value::{Symbol, Value},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FuncDefFlags: u8 {
        /// nested functions capture this function's frame
        const NEEDS_ENV = 1 << 0;
        /// extra arguments are collected into the last parameter
        const VARARG = 1 << 1;
    }
}

/// A compiled function, ready for the machine.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub name: Option<Symbol>,
    /// parameters, not counting a rest parameter
    pub arity: u32,
    pub flags: FuncDefFlags,
    /// registers the frame needs
    pub slot_count: u32,
    pub bytecode: Box<[Instruction]>,
    pub constants: Box<[Value]>,
    pub defs: Box<[FuncDef]>,
    /// where each captured environment comes from, as an environment
    /// reference in the enclosing function: 0 is its own frame
    pub environments: Box<[u32]>,
    /// one span per instruction
    pub source_map: Box<[Span]>,
}

impl Compiler<'_> {
    /// Pops the current function scope into a [`FuncDef`]. Popping the
    /// outermost scope finishes the compile.
    pub(crate) fn pop_funcdef(&mut self) -> CompileResult<FuncDef> {
        let Some(scope) = self.scopes.pop() else {
            return Err(CompileError::new(
                CompileErrorKind::InternalLimit,
                &(0..0),
                "no function left to finish",
            ));
        };
        debug_assert!(scope.is_function());

        let bytecode = self.buffer.split_off(scope.bytecode_start);
        let source_map = self.map_buffer.split_off(scope.bytecode_start);
        let mut flags = FuncDefFlags::empty();
        if scope.flags.contains(ScopeFlags::ENV) {
            flags |= FuncDefFlags::NEEDS_ENV;
        }
        let def = FuncDef {
            name: None,
            arity: 0,
            flags,
            slot_count: scope.regs.high_water(),
            bytecode: bytecode.into(),
            constants: scope.consts.into(),
            defs: scope.defs.into(),
            environments: scope.envs.into(),
            source_map: source_map.into(),
        };
        log::debug!(
            "emitted function: {} instructions, {} slots, {} constants, {} environments",
            def.bytecode.len(),
            def.slot_count,
            def.constants.len(),
            def.environments.len()
        );

        if self.scopes.is_empty() {
            self.status = Status::Done;
        }
        Ok(def)
    }
}

impl FuncDef {
    /// A listing of this function and every function nested in it.
    pub fn disassemble(&self, reader: &impl lasso::Reader) -> String {
        let mut out = String::new();
        self.write_listing(&mut out, reader, 0);
        out
    }

    fn write_listing(&self, out: &mut String, reader: &impl lasso::Reader, depth: usize) {
        let indent = "    ".repeat(depth);
        let name = self.name.map_or("", |name| reader.resolve(&name));
        let mut header = format!("arity {}", self.arity);
        if self.flags.contains(FuncDefFlags::VARARG) {
            header.push_str(", vararg");
        }
        if self.flags.contains(FuncDefFlags::NEEDS_ENV) {
            header.push_str(", env");
        }
        let _ = writeln!(
            out,
            "{indent}== function {name}{}({header}, slots {}) ==",
            if name.is_empty() { "" } else { " " },
            self.slot_count
        );
        if !self.environments.is_empty() {
            let _ = writeln!(out, "{indent}  environments {:?}", self.environments);
        }

        for (pos, &instr) in self.bytecode.iter().enumerate() {
            let mut line = format!("{pos:>4}  ");
            let mut comment = None;
            match opcode::opcode(instr) {
                Some(op) => {
                    line.push_str(op.mnemonic());
                    for (operand, value) in opcode::operands(instr) {
                        let _ = match operand {
                            Operand::Reg | Operand::FarReg | Operand::EnvSlot => {
                                write!(line, " ${value}")
                            }
                            Operand::Const => {
                                if let Some(constant) = self.constants.get(value as usize) {
                                    comment = Some(constant.display(reader).to_string());
                                }
                                write!(line, " k{value}")
                            }
                            Operand::Def => write!(line, " f{value}"),
                            Operand::Env => write!(line, " e{value}"),
                            Operand::Imm => write!(line, " {value}"),
                            Operand::Jump => write!(line, " @{}", pos as i64 + 1 + value),
                        };
                    }
                }
                None => {
                    let _ = write!(line, "??? {instr:#010x}");
                }
            }
            let _ = match comment {
                Some(comment) => writeln!(out, "{indent}{line:<24}; {comment}"),
                None => writeln!(out, "{indent}{line}"),
            };
        }

        for def in self.defs.iter() {
            def.write_listing(out, reader, depth + 1);
        }
    }
}
