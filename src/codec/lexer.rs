//! Tokenizer for the text grammar.
//!
//! Tokens are the six structural characters `{ } [ ] , :`, quoted text and
//! bare atoms (numbers, `true`, `false`, `null`, `NaN`, `inf`). Whitespace
//! only separates tokens.
//!
//! Quoted text runs to the next `"`; there is no escape sequence, so text
//! containing a quote cannot be carried.

use std::fmt;

use crate::error::{RpcError, Result};

/// A single lexical token borrowed from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token<'a> {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    /// Quoted text, without the surrounding quotes.
    Text(&'a str),
    /// Bare atom such as `12`, `-3.5`, `true` or `null`.
    Atom(&'a str),
}

impl Token<'_> {
    pub(crate) fn is_null(&self) -> bool {
        matches!(self, Token::Atom("null"))
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LBrace => f.write_str("`{`"),
            Token::RBrace => f.write_str("`}`"),
            Token::LBracket => f.write_str("`[`"),
            Token::RBracket => f.write_str("`]`"),
            Token::Comma => f.write_str("`,`"),
            Token::Colon => f.write_str("`:`"),
            Token::Text(s) => write!(f, "text \"{}\"", s),
            Token::Atom(s) => write!(f, "`{}`", s),
        }
    }
}

/// Returns true for bytes that end a bare atom.
#[inline]
pub(crate) fn is_separator(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'{' | b'}' | b'[' | b']' | b',' | b':' | b'"')
}

/// Cursor over a text value stream.
pub(crate) struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Scan the token starting at or after `from`, returning it with its end offset.
    fn scan(&self, from: usize) -> Result<Option<(Token<'a>, usize)>> {
        let bytes = self.input.as_bytes();
        let mut start = from;
        while start < bytes.len() && bytes[start].is_ascii_whitespace() {
            start += 1;
        }
        if start >= bytes.len() {
            return Ok(None);
        }

        let single = |tok| Ok(Some((tok, start + 1)));
        match bytes[start] {
            b'{' => single(Token::LBrace),
            b'}' => single(Token::RBrace),
            b'[' => single(Token::LBracket),
            b']' => single(Token::RBracket),
            b',' => single(Token::Comma),
            b':' => single(Token::Colon),
            b'"' => {
                let body = start + 1;
                match bytes[body..].iter().position(|&b| b == b'"') {
                    Some(len) => Ok(Some((
                        Token::Text(&self.input[body..body + len]),
                        body + len + 1,
                    ))),
                    None => Err(RpcError::decode("unterminated text")),
                }
            }
            _ => {
                let mut end = start + 1;
                while end < bytes.len() && !is_separator(bytes[end]) {
                    end += 1;
                }
                Ok(Some((Token::Atom(&self.input[start..end]), end)))
            }
        }
    }

    /// Look at the next token without consuming it.
    pub(crate) fn peek(&self) -> Result<Option<Token<'a>>> {
        Ok(self.scan(self.pos)?.map(|(tok, _)| tok))
    }

    /// Consume the next token; running out of input is a decode error.
    pub(crate) fn next_token(&mut self) -> Result<Token<'a>> {
        match self.scan(self.pos)? {
            Some((tok, end)) => {
                self.pos = end;
                Ok(tok)
            }
            None => Err(RpcError::decode("unexpected end of input")),
        }
    }

    /// Consume the next token and require it to be `expected`.
    pub(crate) fn expect(&mut self, expected: Token<'_>) -> Result<()> {
        let found = self.next_token()?;
        if found == expected {
            Ok(())
        } else {
            Err(RpcError::decode(format!(
                "expected {}, found {}",
                expected, found
            )))
        }
    }

    /// True when only whitespace remains.
    pub(crate) fn is_exhausted(&self) -> bool {
        self.input.as_bytes()[self.pos..]
            .iter()
            .all(|b| b.is_ascii_whitespace())
    }

    /// Consume one complete value of any shape, checking that its
    /// delimiters are properly nested.
    pub(crate) fn skip_value(&mut self) -> Result<()> {
        let mut open: Vec<Token<'static>> = Vec::new();
        loop {
            let tok = self.next_token()?;
            match tok {
                Token::LBrace => open.push(Token::RBrace),
                Token::LBracket => open.push(Token::RBracket),
                Token::RBrace | Token::RBracket => match open.pop() {
                    Some(close) if close == tok => {}
                    _ => {
                        return Err(RpcError::decode(format!("unexpected {}", tok)));
                    }
                },
                Token::Comma | Token::Colon if open.is_empty() => {
                    return Err(RpcError::decode(format!("unexpected {}", tok)));
                }
                _ => {}
            }
            if open.is_empty() {
                return Ok(());
            }
        }
    }
}
