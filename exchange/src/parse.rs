//! Parser for the textual type signature syntax.
//!
//! ```text
//! type    := postfix ( "->" type )?
//! postfix := primary "?"*
//! primary := name | "[" type "]" | "{" postfix "->" type "}"
//!          | "(" ")" | "(" type ( "," type )* ")"
//! ```
//!
//! A parenthesized single type is grouping, not a tuple. Map keys are parsed
//! without the arrow, so a function-typed key needs parentheses.

use thiserror::Error;

use crate::ty::{CallbackType, TupleArityError, TupleType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeParseError {
    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },
    #[error("expected {expected} at offset {offset}, found {found}")]
    Expected {
        expected: &'static str,
        found: String,
        offset: usize,
    },
    #[error("unknown type name {name:?} at offset {offset}")]
    UnknownType { name: String, offset: usize },
    #[error("unexpected end of signature, expected {expected}")]
    UnexpectedEnd { expected: &'static str },
    #[error(transparent)]
    TupleArity(#[from] TupleArityError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Open(char),
    Close(char),
    Comma,
    Question,
    Arrow,
    Name(&'a str),
}

impl Token<'_> {
    fn describe(&self) -> String {
        match self {
            Token::Open(c) | Token::Close(c) => format!("'{c}'"),
            Token::Comma => "','".to_string(),
            Token::Question => "'?'".to_string(),
            Token::Arrow => "'->'".to_string(),
            Token::Name(name) => format!("{name:?}"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token<'_>)>, TypeParseError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    while let Some((offset, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '(' | '[' | '{' => Token::Open(c),
            ')' | ']' | '}' => Token::Close(c),
            ',' => Token::Comma,
            '?' => Token::Question,
            '-' if chars.next_if(|&(_, next)| next == '>').is_some() => Token::Arrow,
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut end = offset + c.len_utf8();
                while let Some((at, next)) =
                    chars.next_if(|&(_, next)| next.is_ascii_alphanumeric() || next == '_')
                {
                    end = at + next.len_utf8();
                }
                Token::Name(&source[offset..end])
            }
            found => return Err(TypeParseError::UnexpectedChar { found, offset }),
        };
        tokens.push((offset, token));
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<(usize, Token<'a>)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn eat(&mut self, token: &Token<'_>) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token<'_>, expected: &'static str) -> Result<(), TypeParseError> {
        if self.eat(token) {
            return Ok(());
        }
        Err(self.unexpected(expected))
    }

    fn unexpected(&self, expected: &'static str) -> TypeParseError {
        match self.tokens.get(self.pos) {
            Some((offset, token)) => TypeParseError::Expected {
                expected,
                found: token.describe(),
                offset: *offset,
            },
            None => TypeParseError::UnexpectedEnd { expected },
        }
    }

    fn ty(&mut self) -> Result<CallbackType, TypeParseError> {
        let param = self.postfix()?;
        if self.eat(&Token::Arrow) {
            let ret = self.ty()?;
            return Ok(CallbackType::func(param, ret));
        }
        Ok(param)
    }

    fn postfix(&mut self) -> Result<CallbackType, TypeParseError> {
        let mut ty = self.primary()?;
        while self.eat(&Token::Question) {
            ty = CallbackType::optional(ty);
        }
        Ok(ty)
    }

    fn primary(&mut self) -> Result<CallbackType, TypeParseError> {
        let Some((offset, token)) = self.tokens.get(self.pos).cloned() else {
            return Err(TypeParseError::UnexpectedEnd { expected: "a type" });
        };
        self.pos += 1;
        match token {
            Token::Name(name) => named(name).ok_or_else(|| TypeParseError::UnknownType {
                name: name.to_string(),
                offset,
            }),
            Token::Open('[') => {
                let element = self.ty()?;
                self.expect(&Token::Close(']'), "']'")?;
                Ok(CallbackType::list(element))
            }
            Token::Open('{') => {
                let key = self.postfix()?;
                self.expect(&Token::Arrow, "'->'")?;
                let value = self.ty()?;
                self.expect(&Token::Close('}'), "'}'")?;
                Ok(CallbackType::map(key, value))
            }
            Token::Open('(') => self.parenthesized(),
            _ => {
                self.pos -= 1;
                Err(self.unexpected("a type"))
            }
        }
    }

    fn parenthesized(&mut self) -> Result<CallbackType, TypeParseError> {
        if self.eat(&Token::Close(')')) {
            return Ok(CallbackType::Unit);
        }
        let mut elements = vec![self.ty()?];
        while self.eat(&Token::Comma) {
            elements.push(self.ty()?);
        }
        self.expect(&Token::Close(')'), "',' or ')'")?;
        if elements.len() == 1 {
            return Ok(elements.remove(0));
        }
        Ok(CallbackType::Tuple(TupleType::new(elements)?))
    }
}

fn named(name: &str) -> Option<CallbackType> {
    Some(match name {
        "bool" => CallbackType::Bool,
        "i32" => CallbackType::I32,
        "f32" => CallbackType::F32,
        "f64" => CallbackType::F64,
        "string" => CallbackType::Str,
        "entity" => CallbackType::Entity,
        "any" => CallbackType::Any,
        _ => return None,
    })
}

pub(crate) fn parse(source: &str) -> Result<CallbackType, TypeParseError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
    };
    let ty = parser.ty()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.unexpected("end of signature"));
    }
    Ok(ty)
}
