use super::{
    opcode::{encode_a, encode_ab, Opcode, NEAR_SLOT_MAX},
    CompileError, CompileErrorKind, CompileResult, Compiler, Fopts, Slot, Special,
};
use crate::{
    lexer::Span,
    value::{Kinds, Value},
};

impl Compiler<'_> {
    /// Compiles one form, returning the slot its value ends up in.
    ///
    /// In tail position the value is returned from the current function and
    /// the result is a returned slot; with a hint the value is left in the
    /// hint.
    pub fn value(&mut self, opts: Fopts<'_>) -> CompileResult<Slot> {
        let span = opts.span();
        if self.recursion_guard >= self.options.recursion_limit {
            Err(CompileError::new(
                CompileErrorKind::RecursionLimit,
                &span,
                "recursed too deeply",
            ))?
        }
        self.recursion_guard += 1;
        let result = self.value_guarded(&opts);
        self.recursion_guard -= 1;
        let slot = result?;

        if slot.is_returned() {
            return Ok(slot);
        }
        if opts.is_tail() {
            return self.emit_return(&span, &slot);
        }
        match opts.hint {
            Some(hint) if !slot.same_storage(&hint) => {
                self.copy(&span, &hint, &slot)?;
                self.free_slot(&slot);
                Ok(hint)
            }
            _ => Ok(slot),
        }
    }

    fn value_guarded(&mut self, opts: &Fopts<'_>) -> CompileResult<Slot> {
        match opts.form {
            Value::Symbol(symbol) => self.resolve(&opts.span(), *symbol),
            Value::Array(_) => {
                let slots = self.to_slots(opts, 0)?;
                self.collection(opts, Opcode::MakeArray, &slots)
            }
            Value::Struct(_) => {
                let slots = self.to_slots_kv(opts)?;
                self.collection(opts, Opcode::MakeStruct, &slots)
            }
            Value::Tuple(items) => match items.first() {
                None => Ok(Slot::constant(opts.form.clone())),
                Some(Value::Symbol(head)) => {
                    if let Some(special) = Special::from_name(self.world.name(*head)) {
                        return special.compile(self, opts);
                    }
                    let callee = self.resolve(&opts.index(0).span(), *head)?;
                    self.call_with_head(opts, callee)
                }
                Some(_) => {
                    let callee = self.value(opts.index(0).with_kinds(Kinds::FUNCTION))?;
                    self.call(opts, callee)
                }
            },
            _ => Ok(Slot::constant(opts.form.clone())),
        }
    }

    fn collection(
        &mut self,
        opts: &Fopts<'_>,
        op: Opcode,
        slots: &[(Slot, Span)],
    ) -> CompileResult<Slot> {
        let span = opts.span();
        self.push_slots(slots)?;
        self.free_slots(slots);
        let target = self.get_target(&span, opts)?;
        self.emit(&span, encode_a(op, target.index as u8));
        Ok(target)
    }

    /// A call whose head resolved to `callee`. Calls to known builtins go to
    /// their specializer first.
    fn call_with_head(&mut self, opts: &Fopts<'_>, callee: Slot) -> CompileResult<Slot> {
        let builtin = match &callee.constant {
            Value::Builtin(builtin) if self.options.optimize && callee.is_constant() => {
                Some(builtin.id)
            }
            _ => None,
        };
        if let Some(optimization) = builtin.and_then(|id| self.optimizer.get(id)) {
            let args = &opts.elements()[1..];
            if let Some(slot) = (optimization.specialize)(self, opts, args)? {
                return Ok(slot);
            }
        }
        self.call(opts, callee)
    }

    /// Generic call: arguments left to right, pushed, then called.
    pub(crate) fn call(&mut self, opts: &Fopts<'_>, callee: Slot) -> CompileResult<Slot> {
        let span = opts.span();
        let args = self.to_slots(opts, 1)?;
        self.push_slots(&args)?;
        self.free_slots(&args);

        let result = if opts.is_tail() {
            let reg = self.preread(&span, NEAR_SLOT_MAX, &callee)?;
            self.emit(&span, encode_a(Opcode::TailCall, reg as u8));
            self.postread(&callee, reg);
            Slot::returned()
        } else {
            let target = self.get_target(&span, opts)?;
            let reg = self.preread(&span, NEAR_SLOT_MAX, &callee)?;
            self.emit(
                &span,
                encode_ab(Opcode::Call, target.index as u8, reg as u8),
            );
            self.postread(&callee, reg);
            target
        };
        self.free_slot(&callee);
        Ok(result)
    }
}
