//! Moving values between slots and registers, and the instruction buffer.
//!
//! Instructions only take near registers, so every read of a slot goes
//! through [`Compiler::preread`], which brings the value into a register
//! `<= max` and tells [`Compiler::postread`] whether that register was a
//! temporary.

use super::{
    opcode::{
        self, encode, encode_a, encode_ab, encode_abc, encode_abx, encode_asbx, encode_sax,
        Instruction, Opcode, NEAR_SLOT_MAX,
    },
    CompileError, CompileErrorKind, CompileResult, Compiler, Fopts, ScopeKind, Slot, SlotFlags,
};
use crate::{lexer::Span, value::Value};

/// Farthest a 24 bit jump reaches in either direction.
const JUMP_MAX: i64 = (1 << 23) - 1;

fn out_of_registers(span: &Span) -> CompileError {
    CompileError::new(CompileErrorKind::InternalLimit, span, "out of registers")
}

fn out_of_reach(span: &Span, index: u32) -> CompileError {
    CompileError::new(
        CompileErrorKind::InternalLimit,
        span,
        format_args!("captured register {index} is out of reach"),
    )
}

impl Compiler<'_> {
    /// Allocates the lowest free register `<= max`.
    pub fn alloc_near(&mut self, span: &Span, max: u32) -> CompileResult<u32> {
        self.scope_mut()
            .regs
            .alloc_near(max)
            .ok_or_else(|| out_of_registers(span))
    }

    /// Allocates a register for a named value, which may be far.
    pub fn alloc_far(&mut self, span: &Span) -> CompileResult<u32> {
        self.scope_mut()
            .regs
            .alloc()
            .ok_or_else(|| out_of_registers(span))
    }

    pub fn free_index(&mut self, index: u32) {
        self.scope_mut().regs.free(index);
    }

    /// Frees a temporary. Named slots, constants and upvalues own no
    /// register of the current frame.
    pub fn free_slot(&mut self, slot: &Slot) {
        if slot.env > 0
            || slot
                .flags
                .intersects(SlotFlags::CONSTANT | SlotFlags::REF | SlotFlags::NAMED)
        {
            return;
        }
        self.free_index(slot.index);
    }

    /// Appends an instruction, returning its position in the buffer.
    pub fn emit(&mut self, span: &Span, instr: Instruction) -> usize {
        log::trace!(
            "emit {:>4} {:?} {:?}",
            self.buffer.len(),
            opcode::opcode(instr),
            opcode::operands(instr)
        );
        self.buffer.push(instr);
        self.map_buffer.push(span.clone());
        self.buffer.len() - 1
    }

    fn load_constant_into(&mut self, span: &Span, reg: u32, value: Value) -> CompileResult<()> {
        debug_assert!(reg <= NEAR_SLOT_MAX);
        let a = reg as u8;
        let instr = match value {
            Value::Nil => encode_a(Opcode::LoadNil, a),
            Value::Boolean(true) => encode_a(Opcode::LoadTrue, a),
            Value::Boolean(false) => encode_a(Opcode::LoadFalse, a),
            value => {
                let index = self.add_constant(span, value)?;
                encode_abx(Opcode::LoadConstant, a, index as u16)
            }
        };
        self.emit(span, instr);
        Ok(())
    }

    /// Loads the current value of the global var behind `cell` into near
    /// register `reg`.
    fn load_cell_into(&mut self, span: &Span, reg: u32, cell: Value) -> CompileResult<()> {
        self.load_constant_into(span, reg, cell)?;
        self.emit(span, encode_abc(Opcode::GetIndex, reg as u8, reg as u8, 0));
        Ok(())
    }

    /// Brings `slot` into a register `<= max`.
    pub fn preread(&mut self, span: &Span, max: u32, slot: &Slot) -> CompileResult<u32> {
        if slot.is_ref() {
            let reg = self.alloc_near(span, max)?;
            self.load_cell_into(span, reg, slot.constant.clone())?;
            Ok(reg)
        } else if slot.is_constant() {
            let reg = self.alloc_near(span, max)?;
            self.load_constant_into(span, reg, slot.constant.clone())?;
            Ok(reg)
        } else if slot.env > 0 {
            if slot.index > NEAR_SLOT_MAX {
                Err(out_of_reach(span, slot.index))?
            }
            let reg = self.alloc_near(span, max)?;
            self.emit(
                span,
                encode_abc(
                    Opcode::LoadUpvalue,
                    reg as u8,
                    slot.env as u8,
                    slot.index as u8,
                ),
            );
            Ok(reg)
        } else if slot.index > max {
            let reg = self.alloc_near(span, max)?;
            self.emit(
                span,
                encode_abx(Opcode::MoveNear, reg as u8, slot.index as u16),
            );
            Ok(reg)
        } else {
            Ok(slot.index)
        }
    }

    /// Releases whatever [`Compiler::preread`] allocated for `slot`.
    pub fn postread(&mut self, slot: &Slot, index: u32) {
        if index != slot.index
            || slot.env > 0
            || slot.flags.intersects(SlotFlags::CONSTANT | SlotFlags::REF)
        {
            self.free_index(index);
        }
    }

    /// Stores the value of `src` into `dest`.
    pub fn copy(&mut self, span: &Span, dest: &Slot, src: &Slot) -> CompileResult<()> {
        if dest.is_constant() {
            Err(CompileError::new(
                CompileErrorKind::ConstantWrite,
                span,
                "cannot write to a constant",
            ))?
        }
        if dest.same_storage(src) {
            return Ok(());
        }

        if dest.is_ref() {
            let value = self.preread(span, NEAR_SLOT_MAX, src)?;
            let cell = self.alloc_near(span, NEAR_SLOT_MAX)?;
            self.load_constant_into(span, cell, dest.constant.clone())?;
            self.emit(
                span,
                encode_abc(Opcode::PutIndex, cell as u8, value as u8, 0),
            );
            self.free_index(cell);
            self.postread(src, value);
            return Ok(());
        }

        if dest.env > 0 {
            if dest.index > NEAR_SLOT_MAX {
                Err(out_of_reach(span, dest.index))?
            }
            let value = self.preread(span, NEAR_SLOT_MAX, src)?;
            self.emit(
                span,
                encode_abc(
                    Opcode::SetUpvalue,
                    value as u8,
                    dest.env as u8,
                    dest.index as u8,
                ),
            );
            self.postread(src, value);
            return Ok(());
        }

        if dest.index > NEAR_SLOT_MAX {
            let value = self.preread(span, NEAR_SLOT_MAX, src)?;
            self.emit(
                span,
                encode_abx(Opcode::MoveFar, value as u8, dest.index as u16),
            );
            self.postread(src, value);
            return Ok(());
        }

        // near destination: load straight into it
        if src.is_ref() {
            self.load_cell_into(span, dest.index, src.constant.clone())
        } else if src.is_constant() {
            self.load_constant_into(span, dest.index, src.constant.clone())
        } else if src.env > 0 {
            if src.index > NEAR_SLOT_MAX {
                Err(out_of_reach(span, src.index))?
            }
            self.emit(
                span,
                encode_abc(
                    Opcode::LoadUpvalue,
                    dest.index as u8,
                    src.env as u8,
                    src.index as u8,
                ),
            );
            Ok(())
        } else {
            self.emit(
                span,
                encode_abx(Opcode::MoveNear, dest.index as u8, src.index as u16),
            );
            Ok(())
        }
    }

    /// Returns `slot` from the current function.
    pub fn emit_return(&mut self, span: &Span, slot: &Slot) -> CompileResult<Slot> {
        if slot.is_constant() && slot.constant.is_nil() {
            self.emit(span, encode(Opcode::ReturnNil));
        } else {
            let reg = self.preread(span, NEAR_SLOT_MAX, slot)?;
            self.emit(span, encode_a(Opcode::Return, reg as u8));
            self.postread(slot, reg);
        }
        Ok(Slot::returned())
    }

    /// Where an instruction producing the value of `opts` should write.
    pub fn get_target(&mut self, span: &Span, opts: &Fopts<'_>) -> CompileResult<Slot> {
        match &opts.hint {
            Some(hint) if hint.is_local() && hint.index <= NEAR_SLOT_MAX => Ok(hint.clone()),
            _ => Ok(Slot::local(self.alloc_near(span, NEAR_SLOT_MAX)?)),
        }
    }

    /// Compiles the elements of `opts` from `start` on, left to right.
    pub(crate) fn to_slots(
        &mut self,
        opts: &Fopts<'_>,
        start: usize,
    ) -> CompileResult<Vec<(Slot, Span)>> {
        (start..opts.elements().len())
            .map(|i| {
                let sub = opts.index(i);
                let span = sub.span();
                Ok((self.value(sub)?, span))
            })
            .collect()
    }

    /// Compiles the entries of a struct, each key before its value.
    pub(crate) fn to_slots_kv(&mut self, opts: &Fopts<'_>) -> CompileResult<Vec<(Slot, Span)>> {
        let Value::Struct(entries) = opts.form else {
            return Ok(vec![]);
        };
        let mut slots = Vec::with_capacity(entries.len() * 2);
        for entry in 0..entries.len() {
            for sub in [opts.key(entry), opts.value(entry)] {
                let span = sub.span();
                slots.push((self.value(sub)?, span));
            }
        }
        Ok(slots)
    }

    /// Pushes the slots as arguments, three at a time.
    pub(crate) fn push_slots(&mut self, slots: &[(Slot, Span)]) -> CompileResult<()> {
        for group in slots.chunks(3) {
            let mut regs = [0u8; 3];
            for (reg, (slot, span)) in regs.iter_mut().zip(group) {
                *reg = self.preread(span, NEAR_SLOT_MAX, slot)? as u8;
            }
            let instr = match group.len() {
                3 => encode_abc(Opcode::Push3, regs[0], regs[1], regs[2]),
                2 => encode_ab(Opcode::Push2, regs[0], regs[1]),
                _ => encode_a(Opcode::Push, regs[0]),
            };
            self.emit(&group[0].1, instr);
            for (reg, (slot, _)) in regs.iter().zip(group) {
                self.postread(slot, *reg as u32);
            }
        }
        Ok(())
    }

    pub(crate) fn free_slots(&mut self, slots: &[(Slot, Span)]) {
        for (slot, _) in slots {
            self.free_slot(slot);
        }
    }

    /// Emits a jump whose offset is patched later by
    /// [`Compiler::patch_jump`].
    pub(crate) fn emit_jump(&mut self, span: &Span, op: Opcode, condition: u32) -> usize {
        self.emit(span, encode_a(op, condition as u8))
    }

    /// Points the jump at `at` to `target`.
    pub(crate) fn patch_jump(&mut self, at: usize, target: usize) -> CompileResult<()> {
        let offset = target as i64 - at as i64 - 1;
        let instr = self.buffer[at];
        let span = self.map_buffer[at].clone();
        let too_far = || CompileError::new(CompileErrorKind::InternalLimit, &span, "jump too far");
        self.buffer[at] = match opcode::opcode(instr) {
            Some(Opcode::Jump) => {
                if offset.abs() > JUMP_MAX {
                    Err(too_far())?
                }
                encode_sax(Opcode::Jump, offset as i32)
            }
            Some(op) => {
                let offset = i16::try_from(offset).map_err(|_| too_far())?;
                encode_asbx(op, opcode::field_a(instr) as u8, offset)
            }
            None => instr,
        };
        Ok(())
    }

    /// Runs `compile` only to find its errors; nothing it emits is kept.
    pub(crate) fn throwaway(
        &mut self,
        compile: impl FnOnce(&mut Self) -> CompileResult<()>,
    ) -> CompileResult<()> {
        let function = self.function_scope_index();
        let code = self.buffer.len();
        let consts = self.scopes[function].consts.len();
        let defs = self.scopes[function].defs.len();

        self.push_scope(ScopeKind::Unused);
        compile(self)?;
        self.pop_scope();

        self.buffer.truncate(code);
        self.map_buffer.truncate(code);
        self.scopes[function].consts.truncate(consts);
        self.scopes[function].defs.truncate(defs);
        // breaks inside the discarded code must not be patched later
        for labels in &mut self.loops {
            labels.breaks.retain(|&at| at < code);
        }
        Ok(())
    }
}
