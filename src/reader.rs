//! The reader turns source text into forms, and a [`SourceMap`] of the same
//! shape so the compiler can point errors and instructions back at the text.
//!
//! It keeps an explicit stack instead of recursing. Nesting is still capped
//! at [`MAX_NESTING`], since forms are cloned, compared and dropped
//! recursively.

use lasso::Rodeo;

use crate::{
    lexer::{LexerError, Span, Token},
    value::Value,
};

/// Deepest nesting of sequences and quotes a form may have.
pub const MAX_NESTING: usize = 1024;

/// Source locations for a form and, recursively, its elements.
///
/// Tuples and arrays have one child per element; structs have two per entry,
/// the key followed by the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMap {
    pub span: Span,
    pub children: Box<[SourceMap]>,
}

impl SourceMap {
    pub fn leaf(span: Span) -> Self {
        Self {
            span,
            children: Box::from([]),
        }
    }

    pub fn child(&self, index: usize) -> Option<&SourceMap> {
        self.children.get(index)
    }
}

/// A top level form together with its source map.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub form: Value,
    pub map: SourceMap,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReadError {
    #[error("{error}")]
    Lexer { error: LexerError, span: Span },
    #[error("unexpected closing delimiter `{found}`")]
    UnexpectedClose { found: char, span: Span },
    #[error("mismatched delimiter, expected `{expected}`")]
    Mismatched { expected: char, span: Span },
    #[error("unterminated `{open}`")]
    Unterminated { open: char, span: Span },
    #[error("struct literal needs an even number of forms")]
    OddStruct { span: Span },
    #[error("nothing to quote")]
    DanglingQuote { span: Span },
    #[error("forms nest deeper than {limit} levels")]
    TooDeep { limit: usize, span: Span },
}

impl ReadError {
    pub fn span(&self) -> Span {
        match self {
            Self::Lexer { span, .. }
            | Self::UnexpectedClose { span, .. }
            | Self::Mismatched { span, .. }
            | Self::Unterminated { span, .. }
            | Self::OddStruct { span }
            | Self::DanglingQuote { span }
            | Self::TooDeep { span, .. } => span.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Paren,
    Bracket,
    Brace,
}

impl Delimiter {
    fn open(self) -> char {
        match self {
            Self::Paren => '(',
            Self::Bracket => '[',
            Self::Brace => '{',
        }
    }

    fn close(self) -> char {
        match self {
            Self::Paren => ')',
            Self::Bracket => ']',
            Self::Brace => '}',
        }
    }
}

enum Frame {
    Sequence {
        delimiter: Delimiter,
        start: usize,
        items: Vec<Parsed>,
    },
    Quote {
        span: Span,
    },
}

struct Reader<'r> {
    rodeo: &'r mut Rodeo,
    stack: Vec<Frame>,
    output: Vec<Parsed>,
}

impl Reader<'_> {
    /// Hands a finished datum to whoever is waiting for it, wrapping pending
    /// quotes along the way.
    fn finish(&mut self, mut parsed: Parsed) {
        loop {
            match self.stack.last_mut() {
                Some(Frame::Quote { .. }) => {
                    let Some(Frame::Quote { span }) = self.stack.pop() else {
                        unreachable!()
                    };
                    let quote = self.rodeo.get_or_intern_static("quote");
                    parsed = Parsed {
                        form: Value::Tuple(Box::from([Value::Symbol(quote), parsed.form])),
                        map: SourceMap {
                            span: span.start..parsed.map.span.end,
                            children: Box::from([SourceMap::leaf(span), parsed.map]),
                        },
                    };
                }
                Some(Frame::Sequence { items, .. }) => {
                    items.push(parsed);
                    return;
                }
                None => {
                    self.output.push(parsed);
                    return;
                }
            }
        }
    }

    fn close(&mut self, found: Delimiter, span: Span) -> Result<(), ReadError> {
        let (delimiter, start, items) = match self.stack.pop() {
            Some(Frame::Sequence {
                delimiter,
                start,
                items,
            }) => (delimiter, start, items),
            Some(Frame::Quote { span }) => return Err(ReadError::DanglingQuote { span }),
            None => {
                return Err(ReadError::UnexpectedClose {
                    found: found.close(),
                    span,
                })
            }
        };
        if delimiter != found {
            return Err(ReadError::Mismatched {
                expected: delimiter.close(),
                span,
            });
        }

        let whole = start..span.end;
        let (forms, maps): (Vec<_>, Vec<_>) = items.into_iter().map(|p| (p.form, p.map)).unzip();
        let form = match delimiter {
            Delimiter::Paren => Value::Tuple(forms.into_boxed_slice()),
            Delimiter::Bracket => Value::Array(forms.into_boxed_slice()),
            Delimiter::Brace => {
                if forms.len() % 2 != 0 {
                    Err(ReadError::OddStruct { span: whole.clone() })?
                }
                let mut entries = Vec::with_capacity(forms.len() / 2);
                let mut forms = forms.into_iter();
                while let (Some(key), Some(value)) = (forms.next(), forms.next()) {
                    entries.push((key, value));
                }
                Value::Struct(entries.into_boxed_slice())
            }
        };

        self.finish(Parsed {
            form,
            map: SourceMap {
                span: whole,
                children: maps.into_boxed_slice(),
            },
        });
        Ok(())
    }

    fn push(&mut self, frame: Frame, span: Span) -> Result<(), ReadError> {
        if self.stack.len() >= MAX_NESTING {
            return Err(ReadError::TooDeep {
                limit: MAX_NESTING,
                span,
            });
        }
        self.stack.push(frame);
        Ok(())
    }

    fn open(&mut self, delimiter: Delimiter, span: Span) -> Result<(), ReadError> {
        let frame = Frame::Sequence {
            delimiter,
            start: span.start,
            items: vec![],
        };
        self.push(frame, span)
    }

    fn atom(&mut self, form: Value, span: Span) {
        self.finish(Parsed {
            form,
            map: SourceMap::leaf(span),
        });
    }
}

/// Reads every top level form in `source`.
pub fn read_all(source: &str, rodeo: &mut Rodeo) -> Result<Vec<Parsed>, ReadError> {
    let mut reader = Reader {
        rodeo,
        stack: vec![],
        output: vec![],
    };

    for (token, span) in Token::lexer(source).spanned() {
        let token = token.map_err(|error| ReadError::Lexer {
            error,
            span: span.clone(),
        })?;
        match token {
            Token::Whitespace | Token::Comment => {}
            Token::LParen => reader.open(Delimiter::Paren, span)?,
            Token::LBracket => reader.open(Delimiter::Bracket, span)?,
            Token::LBrace => reader.open(Delimiter::Brace, span)?,
            Token::RParen => reader.close(Delimiter::Paren, span)?,
            Token::RBracket => reader.close(Delimiter::Bracket, span)?,
            Token::RBrace => reader.close(Delimiter::Brace, span)?,
            Token::Quote => reader.push(Frame::Quote { span: span.clone() }, span)?,
            Token::Nil => reader.atom(Value::Nil, span),
            Token::Boolean(b) => reader.atom(Value::Boolean(b), span),
            Token::Integer(i) => reader.atom(Value::Integer(i), span),
            Token::Real(r) => reader.atom(Value::Real(r), span),
            Token::String(s) => reader.atom(Value::String(s), span),
            Token::Keyword(k) => {
                let k = reader.rodeo.get_or_intern(k);
                reader.atom(Value::Keyword(k), span)
            }
            Token::Symbol(s) => {
                let s = reader.rodeo.get_or_intern(s);
                reader.atom(Value::Symbol(s), span)
            }
        }
    }

    match reader.stack.pop() {
        None => Ok(reader.output),
        Some(Frame::Quote { span }) => Err(ReadError::DanglingQuote { span }),
        Some(Frame::Sequence {
            delimiter, start, ..
        }) => Err(ReadError::Unterminated {
            open: delimiter.open(),
            span: start..start + 1,
        }),
    }
}
