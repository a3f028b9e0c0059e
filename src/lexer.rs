pub use logos::Span;
use logos::{Lexer, Logos};

fn process_string(lexer: &mut Lexer<Token>) -> Result<Box<str>, LexerError> {
    let slice = lexer.slice();
    let mut string = String::with_capacity(slice.len());

    // Skip the quote at the beginning
    let mut chars = slice.chars().skip(1).peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => match chars.next() {
                Some('n') => string.push('\n'),
                Some('t') => string.push('\t'),
                Some('r') => string.push('\r'),
                Some('0') => string.push('\0'),
                Some('e') => string.push('\x1b'),
                Some('\\') => string.push('\\'),
                Some('"') => string.push('"'),
                Some('x') => {
                    let hex = chars.by_ref().take(2).collect::<String>();
                    if hex.len() != 2 {
                        Err(LexerError::MalformedString)?
                    }
                    // `\x` only spells ASCII
                    let byte = u8::from_str_radix(&hex, 16)
                        .ok()
                        .filter(u8::is_ascii)
                        .ok_or(LexerError::MalformedString)?;
                    string.push(char::from(byte));
                }
                Some(_) | None => Err(LexerError::MalformedString)?,
            },
            c => string.push(c),
        }
    }

    Ok(Box::from(string.as_str()))
}

fn read_integer(lexer: &mut Lexer<Token>) -> Result<i64, LexerError> {
    let slice = lexer.slice();
    let (is_neg, digits) = match slice.as_bytes().first() {
        Some(b'-') => (true, &slice[1..]),
        Some(b'+') => (false, &slice[1..]),
        _ => (false, slice),
    };
    let (radix, digits) = match digits.strip_prefix("0x") {
        Some(hex) => (16, hex),
        None => (10, digits),
    };

    // parse the magnitude as u64 so that i64::MIN still fits
    let magnitude = u64::from_str_radix(digits, radix).map_err(|_| LexerError::NumberTooBig)?;
    if is_neg {
        0i64.checked_sub_unsigned(magnitude)
            .ok_or(LexerError::NumberTooBig)
    } else {
        i64::try_from(magnitude).map_err(|_| LexerError::NumberTooBig)
    }
}

fn read_real(lexer: &mut Lexer<Token>) -> Result<f64, LexerError> {
    lexer
        .slice()
        .parse()
        .map_err(|_| LexerError::MalformedNumber)
}

#[derive(thiserror::Error, Debug, PartialEq, Clone, Default)]
pub enum LexerError {
    #[default]
    #[error("invalid token encountered")]
    Invalid,
    #[error("malformed string")]
    MalformedString,
    #[error("malformed number")]
    MalformedNumber,
    #[error("number literal too big")]
    NumberTooBig,
}

/// Tokens of the surface syntax.
#[derive(Debug, Clone, PartialEq, Logos)]
#[logos(error = LexerError)]
pub enum Token {
    #[regex("[ \t\r\n]+")]
    Whitespace,
    #[regex(r"#[^\n]*")]
    Comment,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("'")]
    Quote,

    #[token("nil")]
    Nil,
    #[token("true", |_| true)]
    #[token("false", |_| false)]
    Boolean(bool),
    #[regex(r"[+-]?[0-9]+", read_integer)]
    #[regex(r"[+-]?0x[0-9a-fA-F]+", read_integer)]
    Integer(i64),
    #[regex(r"[+-]?[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?", read_real)]
    #[regex(r"[+-]?[0-9]+[eE][+-]?[0-9]+", read_real)]
    Real(f64),
    #[regex(r#""([^\\"]|\\.)*""#, process_string)]
    String(Box<str>),
    #[regex(r":[0-9a-zA-Z!$%&*/<=>?^_~+\-.@:]+", |l| Box::from(&l.slice()[1..]))]
    Keyword(Box<str>),
    #[regex(r"[a-zA-Z!$%&*/<=>?^_~|][0-9a-zA-Z!$%&*/<=>?^_~|+\-.@:]*", |l| Box::from(l.slice()))]
    #[token("+", |l| Box::from(l.slice()))]
    #[token("-", |l| Box::from(l.slice()))]
    #[regex(r"[+-][a-zA-Z!$%&*/<=>?^_~|+\-.@:][0-9a-zA-Z!$%&*/<=>?^_~|+\-.@:]*", |l| Box::from(l.slice()))]
    Symbol(Box<str>),
}

impl Token {
    pub fn lexer(source: &str) -> Lexer<Self> {
        <Self as Logos>::lexer(source)
    }

    /// Whitespace and comments carry no meaning for the reader.
    pub fn is_trivia(&self) -> bool {
        matches!(self, Self::Whitespace | Self::Comment)
    }
}

#[cfg(test)]
mod tests {
    use super::{LexerError, Token};
    use arbtest::arbtest;
    use assert2::{check, let_assert};

    fn tokens(source: &str) -> Vec<Result<Token, LexerError>> {
        Token::lexer(source)
            .filter(|t| !t.as_ref().is_ok_and(Token::is_trivia))
            .collect()
    }

    #[test]
    fn symbol_checklist() {
        macro_rules! test_valid {
            ($source:literal) => {{
                let mut lexer = Token::lexer($source);
                let token = lexer.next();
                let_assert!(Some(Ok(Token::Symbol(s))) = token);
                check!(s.as_ref() == $source);
            }};
        }

        test_valid!("+");
        test_valid!("-");
        test_valid!("->string");
        test_valid!("<=");
        test_valid!("a34kTMNs");
        test_valid!("fn");
        test_valid!("set!");
        test_valid!("nil?");
        test_valid!("-x");
        test_valid!("nilly");
    }

    #[test]
    fn literals() {
        check!(tokens("nil true false") == [Ok(Token::Nil), Ok(Token::Boolean(true)), Ok(Token::Boolean(false))]);
        check!(tokens("1 -2 +3 0x1f") == [
            Ok(Token::Integer(1)),
            Ok(Token::Integer(-2)),
            Ok(Token::Integer(3)),
            Ok(Token::Integer(31)),
        ]);
        check!(tokens("1.5 2. 1e3") == [
            Ok(Token::Real(1.5)),
            Ok(Token::Real(2.0)),
            Ok(Token::Real(1000.0)),
        ]);
        check!(tokens(":key") == [Ok(Token::Keyword(Box::from("key")))]);
    }

    #[test]
    fn comments_are_trivia() {
        check!(tokens("(+ 1 # one\n 2)") == [
            Ok(Token::LParen),
            Ok(Token::Symbol(Box::from("+"))),
            Ok(Token::Integer(1)),
            Ok(Token::Integer(2)),
            Ok(Token::RParen),
        ]);
    }

    #[test]
    fn test_string() {
        macro_rules! verify_string {
            ($source:literal as $target:literal) => {
                let token = Token::lexer($source).next();
                let_assert!(Some(Ok(Token::String(bs))) = token);
                check!(bs.as_ref() == $target);
            };
        }

        verify_string!(r#""apple""# as "apple");
        verify_string!(r#""a\nb\"c\\""# as "a\nb\"c\\");
        verify_string!(r#""\x41""# as "A");
        check!(Token::lexer(r#""\q""#).next() == Some(Err(LexerError::MalformedString)));
        check!(Token::lexer(r#""\x7f""#).next() == Some(Ok(Token::String(Box::from("\x7f")))));
        check!(Token::lexer(r#""\xff""#).next() == Some(Err(LexerError::MalformedString)));
        check!(Token::lexer(r#""\x4""#).next() == Some(Err(LexerError::MalformedString)));
    }

    #[test]
    fn integer_bounds() {
        check!(tokens("-9223372036854775808") == [Ok(Token::Integer(i64::MIN))]);
        check!(tokens("9223372036854775808") == [Err(LexerError::NumberTooBig)]);
    }

    #[test]
    fn integers_round_trip_through_text() {
        arbtest(|u| {
            let value: i64 = u.arbitrary()?;
            let source = value.to_string();
            let mut lexer = Token::lexer(&source);
            assert!(lexer.next() == Some(Ok(Token::Integer(value))));
            assert!(lexer.next().is_none());
            Ok(())
        });
    }
}
