use bitflags::bitflags;

use super::slot::Slot;
use crate::{
    lexer::Span,
    reader::SourceMap,
    value::{Kinds, Value},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FoptsFlags: u8 {
        /// the result is returned from the current function
        const TAIL = 1 << 0;
        /// the result is thrown away
        const DROP = 1 << 1;
    }
}

// stands in for elements a form does not have
static MISSING: Value = Value::Nil;

/// Options for compiling one form.
///
/// Passed by value: sub-forms get their own options through [`Fopts::index`],
/// [`Fopts::key`] and [`Fopts::value`], which also narrow the source map so
/// errors and instructions point at the sub-form.
#[derive(Debug, Clone)]
pub struct Fopts<'a> {
    pub form: &'a Value,
    pub map: &'a SourceMap,
    pub flags: FoptsFlags,
    /// results the surrounding code can use
    pub kinds: Kinds,
    /// where the result should end up, if the form can put it there
    pub hint: Option<Slot>,
}

impl<'a> Fopts<'a> {
    pub fn new(form: &'a Value, map: &'a SourceMap) -> Self {
        Self {
            form,
            map,
            flags: FoptsFlags::empty(),
            kinds: Kinds::ANY,
            hint: None,
        }
    }

    pub fn with_flags(mut self, flags: FoptsFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_kinds(mut self, kinds: Kinds) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn with_hint(mut self, hint: Option<Slot>) -> Self {
        self.hint = hint;
        self
    }

    pub fn is_tail(&self) -> bool {
        self.flags.contains(FoptsFlags::TAIL)
    }

    pub fn is_drop(&self) -> bool {
        self.flags.contains(FoptsFlags::DROP)
    }

    pub fn span(&self) -> Span {
        self.map.span.clone()
    }

    /// Elements of a tuple or array form.
    pub fn elements(&self) -> &'a [Value] {
        match self.form {
            Value::Tuple(items) | Value::Array(items) => &items[..],
            _ => &[],
        }
    }

    /// Options for element `index` of a tuple or array. A missing element
    /// reads as `nil` located at this form.
    pub fn index(&self, index: usize) -> Fopts<'a> {
        let form = self.elements().get(index).unwrap_or(&MISSING);
        self.sub(form, index)
    }

    /// Options for the key of entry `entry` of a struct.
    pub fn key(&self, entry: usize) -> Fopts<'a> {
        let form = match self.form {
            Value::Struct(entries) => entries.get(entry).map(|(k, _)| k),
            _ => None,
        };
        self.sub(form.unwrap_or(&MISSING), entry * 2)
    }

    /// Options for the value of entry `entry` of a struct.
    pub fn value(&self, entry: usize) -> Fopts<'a> {
        let form = match self.form {
            Value::Struct(entries) => entries.get(entry).map(|(_, v)| v),
            _ => None,
        };
        self.sub(form.unwrap_or(&MISSING), entry * 2 + 1)
    }

    fn sub(&self, form: &'a Value, child: usize) -> Fopts<'a> {
        Fopts::new(form, self.map.child(child).unwrap_or(self.map))
    }
}
