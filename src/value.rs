//! Compile-time values. Forms are values, and so are the constants a
//! [`FuncDef`](crate::compiler::FuncDef) carries.

use core::fmt;

use bitflags::bitflags;

use crate::num::Number;

pub type Symbol = lasso::Spur;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuiltinId(pub(crate) u32);

/// A native operation provided by the host. Identity is the id; the name is
/// only kept for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Builtin {
    pub id: BuiltinId,
    pub name: Symbol,
}

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(Box<str>),
    Symbol(Symbol),
    Keyword(Symbol),
    /// `( ... )`
    Tuple(Box<[Value]>),
    /// `[ ... ]`
    Array(Box<[Value]>),
    /// `{ ... }`
    Struct(Box<[(Value, Value)]>),
    Builtin(Builtin),
    /// storage cell of a global var
    Cell(Symbol),
}

bitflags! {
    /// Sets of value kinds, used to say which results a form may produce.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Kinds: u16 {
        const NIL = 1 << 0;
        const BOOLEAN = 1 << 1;
        const NUMBER = 1 << 2;
        const STRING = 1 << 3;
        const SYMBOL = 1 << 4;
        const KEYWORD = 1 << 5;
        const TUPLE = 1 << 6;
        const ARRAY = 1 << 7;
        const STRUCT = 1 << 8;
        const FUNCTION = 1 << 9;
        const CELL = 1 << 10;
        const ANY = 0xFFFF;
    }
}

impl Value {
    /// Only `nil` and `false` are falsey.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Boolean(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_number(&self) -> Option<Number> {
        match *self {
            Self::Integer(i) => Some(Number::Integer(i)),
            Self::Real(r) => Some(Number::Real(r)),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match *self {
            Self::Symbol(sym) => Some(sym),
            _ => None,
        }
    }

    pub fn kind(&self) -> Kinds {
        match self {
            Self::Nil => Kinds::NIL,
            Self::Boolean(_) => Kinds::BOOLEAN,
            Self::Integer(_) | Self::Real(_) => Kinds::NUMBER,
            Self::String(_) => Kinds::STRING,
            Self::Symbol(_) => Kinds::SYMBOL,
            Self::Keyword(_) => Kinds::KEYWORD,
            Self::Tuple(_) => Kinds::TUPLE,
            Self::Array(_) => Kinds::ARRAY,
            Self::Struct(_) => Kinds::STRUCT,
            Self::Builtin(_) => Kinds::FUNCTION,
            Self::Cell(_) => Kinds::CELL,
        }
    }

    /// Identity used for constant deduplication: structural, with reals
    /// compared by bit pattern and integers never equal to reals.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) | (Self::Keyword(a), Self::Keyword(b)) => a == b,
            (Self::Cell(a), Self::Cell(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a.id == b.id,
            (Self::Tuple(a), Self::Tuple(b)) | (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.identical(y))
            }
            (Self::Struct(a), Self::Struct(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka.identical(kb) && va.identical(vb))
            }
            _ => false,
        }
    }

    pub fn display<'a, R: lasso::Reader>(&'a self, reader: &'a R) -> DisplayValue<'a, R> {
        DisplayValue {
            value: self,
            reader,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.identical(other)
    }
}

impl From<Number> for Value {
    fn from(value: Number) -> Self {
        match value {
            Number::Integer(i) => Self::Integer(i),
            Number::Real(r) => Self::Real(r),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

pub struct DisplayValue<'a, R> {
    value: &'a Value,
    reader: &'a R,
}

impl<R: lasso::Reader> DisplayValue<'_, R> {
    fn write_seq(
        &self,
        f: &mut fmt::Formatter<'_>,
        open: char,
        items: &[Value],
        close: char,
    ) -> fmt::Result {
        write!(f, "{open}")?;
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", item.display(self.reader))?;
        }
        write!(f, "{close}")
    }
}

impl<R: lasso::Reader> fmt::Display for DisplayValue<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            // Debug keeps the trailing `.0`
            Value::Real(r) => write!(f, "{r:?}"),
            Value::String(s) => write!(f, "\"{}\"", s.escape_debug()),
            Value::Symbol(sym) => write!(f, "{}", self.reader.resolve(sym)),
            Value::Keyword(sym) => write!(f, ":{}", self.reader.resolve(sym)),
            Value::Tuple(items) => self.write_seq(f, '(', items, ')'),
            Value::Array(items) => self.write_seq(f, '[', items, ']'),
            Value::Struct(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{} {}", k.display(self.reader), v.display(self.reader))?;
                }
                write!(f, "}}")
            }
            Value::Builtin(builtin) => write!(f, "<builtin {}>", self.reader.resolve(&builtin.name)),
            Value::Cell(sym) => write!(f, "<cell {}>", self.reader.resolve(sym)),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::Value;

    #[test]
    fn identity_of_reals_is_bitwise() {
        check!(Value::Real(0.0) != Value::Real(-0.0));
        check!(Value::Real(f64::NAN) == Value::Real(f64::NAN));
        check!(Value::Integer(1) != Value::Real(1.0));
    }

    #[test]
    fn truthiness() {
        check!(!Value::Nil.is_truthy());
        check!(!Value::Boolean(false).is_truthy());
        check!(Value::Integer(0).is_truthy());
        check!(Value::String(Box::from("")).is_truthy());
    }

    #[test]
    fn display_nested() {
        let mut rodeo = lasso::Rodeo::default();
        let plus = rodeo.get_or_intern("+");
        let key = rodeo.get_or_intern("key");
        let form = Value::Tuple(Box::from([
            Value::Symbol(plus),
            Value::Real(1.0),
            Value::Array(Box::from([Value::Nil, Value::Boolean(true)])),
            Value::Struct(Box::from([(Value::Keyword(key), Value::String(Box::from("a\"b")))])),
        ]));
        check!(form.display(&rodeo).to_string() == r#"(+ 1.0 [nil true] {:key "a\"b"})"#);
    }
}
