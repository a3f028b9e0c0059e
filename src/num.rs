//! Numbers as the machine sees them.
//!
//! Constant folding goes through these rules, so a folded result is exactly
//! the value the unoptimized call would have produced at run time.

use arbitrary::Arbitrary;

#[derive(Debug, PartialEq, Clone, Copy, Arbitrary)]
pub enum Number {
    Integer(i64),
    Real(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arith {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compare {
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
}

impl Number {
    pub fn to_f64(self) -> f64 {
        match self {
            Self::Integer(i) => i as f64,
            Self::Real(r) => r,
        }
    }

    /// Applies a binary arithmetic operation.
    ///
    /// Returns `None` where the machine raises instead of producing a value:
    /// integer overflow and integer division by zero.
    pub fn arith(self, op: Arith, rhs: Number) -> Option<Number> {
        match (self, rhs) {
            (Self::Integer(a), Self::Integer(b)) => match op {
                Arith::Add => a.checked_add(b),
                Arith::Subtract => a.checked_sub(b),
                Arith::Multiply => a.checked_mul(b),
                // truncating, like the machine's integer divide
                Arith::Divide => a.checked_div(b),
            }
            .map(Self::Integer),
            (a, b) => {
                let (a, b) = (a.to_f64(), b.to_f64());
                Some(Self::Real(match op {
                    Arith::Add => a + b,
                    Arith::Subtract => a - b,
                    Arith::Multiply => a * b,
                    Arith::Divide => a / b,
                }))
            }
        }
    }

    pub fn compare(self, op: Compare, rhs: Number) -> bool {
        use std::cmp::Ordering;

        let ordering = match (self, rhs) {
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(&b)),
            (a, b) => a.to_f64().partial_cmp(&b.to_f64()),
        };
        // NaN compares false against everything
        let Some(ordering) = ordering else {
            return false;
        };
        match op {
            Compare::Less => ordering == Ordering::Less,
            Compare::Greater => ordering == Ordering::Greater,
            Compare::LessEqual => ordering != Ordering::Greater,
            Compare::GreaterEqual => ordering != Ordering::Less,
            Compare::Equal => ordering == Ordering::Equal,
        }
    }

    /// Folds a variadic arithmetic call the way the natives evaluate it: a
    /// left fold, with `(+)` = 0, `(*)` = 1, `(- x)` = 0 - x and `(/ x)` = 1 / x.
    pub fn fold(op: Arith, args: &[Number]) -> Option<Number> {
        match args {
            [] => match op {
                Arith::Add => Some(Self::Integer(0)),
                Arith::Multiply => Some(Self::Integer(1)),
                // arity error at run time
                Arith::Subtract | Arith::Divide => None,
            },
            [x] => match op {
                Arith::Add | Arith::Multiply => Some(*x),
                Arith::Subtract => Self::Integer(0).arith(op, *x),
                Arith::Divide => Self::Integer(1).arith(op, *x),
            },
            [first, rest @ ..] => rest.iter().try_fold(*first, |acc, n| acc.arith(op, *n)),
        }
    }

    /// Chained comparison: `(< a b c)` holds when every adjacent pair does.
    pub fn fold_compare(op: Compare, args: &[Number]) -> bool {
        args.windows(2).all(|pair| pair[0].compare(op, pair[1]))
    }
}
