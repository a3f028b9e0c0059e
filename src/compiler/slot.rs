use bitflags::bitflags;

use crate::value::Value;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SlotFlags: u8 {
        /// the value is known at compile time and lives in `constant`
        const CONSTANT = 1 << 0;
        /// bound to a symbol, so its register outlives the expression
        const NAMED = 1 << 1;
        const MUTABLE = 1 << 2;
        /// `constant` is the cell of a global var
        const REF = 1 << 3;
        /// already returned from the current function
        const RETURNED = 1 << 4;
    }
}

/// Where a value lives while the compiled code runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub index: u32,
    /// 0 for the current frame, otherwise the 1-based position in the
    /// current function's environment list
    pub env: u32,
    pub flags: SlotFlags,
    pub constant: Value,
}

impl Slot {
    pub fn local(index: u32) -> Self {
        Self {
            index,
            env: 0,
            flags: SlotFlags::empty(),
            constant: Value::Nil,
        }
    }

    pub fn constant(value: Value) -> Self {
        Self {
            index: 0,
            env: 0,
            flags: SlotFlags::CONSTANT,
            constant: value,
        }
    }

    pub fn nil() -> Self {
        Self::constant(Value::Nil)
    }

    pub fn returned() -> Self {
        Self {
            flags: SlotFlags::CONSTANT | SlotFlags::RETURNED,
            ..Self::nil()
        }
    }

    /// A global var's cell. Reads and writes go through the cell, so the
    /// slot itself is never written to.
    pub fn reference(cell: Value) -> Self {
        Self {
            index: 0,
            env: 0,
            flags: SlotFlags::REF | SlotFlags::MUTABLE | SlotFlags::NAMED,
            constant: cell,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.flags.contains(SlotFlags::CONSTANT)
    }

    pub fn is_ref(&self) -> bool {
        self.flags.contains(SlotFlags::REF)
    }

    pub fn is_returned(&self) -> bool {
        self.flags.contains(SlotFlags::RETURNED)
    }

    pub fn is_mutable(&self) -> bool {
        self.flags.contains(SlotFlags::MUTABLE)
    }

    /// A register in the current frame, as opposed to a constant, a cell or
    /// an upvalue.
    pub fn is_local(&self) -> bool {
        self.env == 0 && !self.flags.intersects(SlotFlags::CONSTANT | SlotFlags::REF)
    }

    /// Whether both slots denote the same storage.
    pub fn same_storage(&self, other: &Slot) -> bool {
        if self.flags.intersects(SlotFlags::CONSTANT | SlotFlags::REF)
            || other.flags.intersects(SlotFlags::CONSTANT | SlotFlags::REF)
        {
            return self.is_ref() && other.is_ref() && self.constant == other.constant;
        }
        self.index == other.index && self.env == other.env
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::{Slot, SlotFlags};
    use crate::value::Value;

    #[test]
    fn storage_identity() {
        let a = Slot::local(3);
        let mut named = Slot::local(3);
        named.flags |= SlotFlags::NAMED | SlotFlags::MUTABLE;
        check!(a.same_storage(&named));

        let upvalue = Slot { env: 1, ..Slot::local(3) };
        check!(!a.same_storage(&upvalue));
        check!(!Slot::constant(Value::Integer(1)).same_storage(&Slot::constant(Value::Integer(1))));
    }

    #[test]
    fn kinds() {
        check!(Slot::local(0).is_local());
        check!(!Slot::nil().is_local());
        check!(!Slot::reference(Value::Nil).is_local());
        check!(Slot::returned().is_returned());
        check!(Slot::reference(Value::Nil).is_mutable());
    }
}
