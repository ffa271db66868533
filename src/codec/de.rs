//! Deserializer for the text grammar.
//!
//! The target type drives parsing. `null` in any position yields the
//! target's zero value, and record fields absent from `{...}` are left at
//! theirs. Numbers and booleans are accepted bare or quoted.

use std::str::FromStr;

use serde::de::{self, DeserializeSeed, IntoDeserializer, MapAccess, Visitor};
use serde::Deserialize;

use super::lexer::{Lexer, Token};
use crate::error::{RpcError, Result};

/// Decodes back-to-back values from one text.
///
/// Each [`decode`](Decoder::decode) consumes exactly the tokens of one value
/// and leaves the stream positioned at the start of the next.
///
/// ```
/// use textwire_rpc::codec::Decoder;
///
/// let mut decoder = Decoder::new(r#"{"Seq":1} [1,2]"#);
/// decoder.skip_value().unwrap();
/// let items: Vec<u8> = decoder.decode().unwrap();
/// assert_eq!(items, vec![1, 2]);
/// assert!(decoder.is_exhausted());
/// ```
pub struct Decoder<'de> {
    lexer: Lexer<'de>,
}

impl<'de> Decoder<'de> {
    /// Create a decoder over `input`.
    pub fn new(input: &'de str) -> Self {
        Self {
            lexer: Lexer::new(input),
        }
    }

    /// Decode the next value as `T`.
    pub fn decode<T: Deserialize<'de>>(&mut self) -> Result<T> {
        T::deserialize(&mut *self)
    }

    /// Consume the next value without decoding it.
    pub fn skip_value(&mut self) -> Result<()> {
        self.lexer.skip_value()
    }

    /// True when nothing but whitespace is left.
    pub fn is_exhausted(&self) -> bool {
        self.lexer.is_exhausted()
    }

    /// Require that no further tokens remain.
    pub fn end(&self) -> Result<()> {
        match self.lexer.peek()? {
            None => Ok(()),
            Some(tok) => Err(RpcError::decode(format!(
                "trailing {} after value",
                tok
            ))),
        }
    }

    /// If the next token is `null`, consume it and return true.
    pub(crate) fn take_null(&mut self) -> Result<bool> {
        match self.lexer.peek()? {
            Some(tok) if tok.is_null() => {
                self.lexer.next_token()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Walk a `{...}` record, handing the value of field `name` to `decode`
    /// and skipping every other field. `null` or an absent field leaves the
    /// target untouched.
    pub(crate) fn decode_field_with<F>(&mut self, name: &str, mut decode: F) -> Result<()>
    where
        F: FnMut(&mut Self) -> Result<()>,
    {
        match self.lexer.next_token()? {
            Token::Atom("null") => return Ok(()),
            Token::LBrace => {}
            tok => return Err(RpcError::decode(format!("expected `{{`, found {}", tok))),
        }
        {
            let mut fields = Elements::new(self);
            while fields.has_next(Token::RBrace)? {
                let key = match fields.de.lexer.next_token()? {
                    Token::Text(key) | Token::Atom(key) => key,
                    tok => {
                        return Err(RpcError::decode(format!(
                            "expected a field name, found {}",
                            tok
                        )))
                    }
                };
                fields.de.lexer.expect(Token::Colon)?;
                if key == name {
                    decode(&mut *fields.de)?;
                } else {
                    fields.de.lexer.skip_value()?;
                }
            }
        }
        self.lexer.expect(Token::RBrace)
    }

    /// Read a scalar token, quoted or bare. `None` means `null`.
    fn scalar(&mut self) -> Result<Option<&'de str>> {
        match self.lexer.next_token()? {
            Token::Atom("null") => Ok(None),
            Token::Atom(s) | Token::Text(s) => Ok(Some(s)),
            tok => Err(RpcError::decode(format!("expected a scalar, found {}", tok))),
        }
    }

    fn parse<T>(&mut self, what: &str) -> Result<T>
    where
        T: FromStr + Default,
    {
        match self.scalar()? {
            None => Ok(T::default()),
            Some(s) => s
                .parse()
                .map_err(|_| RpcError::decode(format!("invalid {} `{}`", what, s))),
        }
    }
}

macro_rules! deserialize_number {
    ($($method:ident => $visit:ident: $ty:ty,)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
                let value: $ty = self.parse(stringify!($ty))?;
                visitor.$visit(value)
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for &mut Decoder<'de> {
    type Error = RpcError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let tok = self
            .lexer
            .peek()?
            .ok_or_else(|| RpcError::decode("unexpected end of input"))?;
        match tok {
            Token::LBrace => self.deserialize_map(visitor),
            Token::LBracket => self.deserialize_seq(visitor),
            Token::Text(s) => {
                self.lexer.next_token()?;
                visitor.visit_borrowed_str(s)
            }
            Token::Atom(atom) => {
                self.lexer.next_token()?;
                match atom {
                    "null" => visitor.visit_unit(),
                    "true" => visitor.visit_bool(true),
                    "false" => visitor.visit_bool(false),
                    _ => {
                        if let Ok(v) = atom.parse::<i64>() {
                            visitor.visit_i64(v)
                        } else if let Ok(v) = atom.parse::<u64>() {
                            visitor.visit_u64(v)
                        } else if let Ok(v) = atom.parse::<f64>() {
                            visitor.visit_f64(v)
                        } else {
                            Err(RpcError::decode(format!("invalid atom `{}`", atom)))
                        }
                    }
                }
            }
            tok => Err(RpcError::decode(format!("unexpected {}", tok))),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let value: bool = self.parse("bool")?;
        visitor.visit_bool(value)
    }

    deserialize_number! {
        deserialize_i8 => visit_i8: i8,
        deserialize_i16 => visit_i16: i16,
        deserialize_i32 => visit_i32: i32,
        deserialize_i64 => visit_i64: i64,
        deserialize_i128 => visit_i128: i128,
        deserialize_u8 => visit_u8: u8,
        deserialize_u16 => visit_u16: u16,
        deserialize_u32 => visit_u32: u32,
        deserialize_u64 => visit_u64: u64,
        deserialize_u128 => visit_u128: u128,
        deserialize_f32 => visit_f32: f32,
        deserialize_f64 => visit_f64: f64,
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.lexer.next_token()? {
            Token::Atom("null") => visitor.visit_char('\0'),
            Token::Text(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => visitor.visit_char(c),
                    _ => Err(RpcError::decode(format!("invalid char \"{}\"", s))),
                }
            }
            tok => Err(RpcError::decode(format!("expected a char, found {}", tok))),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.lexer.next_token()? {
            Token::Atom("null") => visitor.visit_borrowed_str(""),
            Token::Text(s) => visitor.visit_borrowed_str(s),
            tok => Err(RpcError::decode(format!("expected text, found {}", tok))),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        if self.take_null()? {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.lexer.next_token()? {
            Token::Atom("null") => visitor.visit_unit(),
            tok => Err(RpcError::decode(format!("expected `null`, found {}", tok))),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.lexer.next_token()? {
            Token::Atom("null") => visitor.visit_seq(Empty),
            Token::LBracket => {
                let value = visitor.visit_seq(Elements::new(self))?;
                self.lexer.expect(Token::RBracket)?;
                Ok(value)
            }
            tok => Err(RpcError::decode(format!("expected `[`, found {}", tok))),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value> {
        if self.take_null()? {
            return visitor.visit_seq(ZeroElements(len));
        }
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_tuple(len, visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.lexer.next_token()? {
            Token::Atom("null") => visitor.visit_map(Empty),
            Token::LBrace => {
                let value = visitor.visit_map(Elements::new(self))?;
                self.lexer.expect(Token::RBrace)?;
                Ok(value)
            }
            tok => Err(RpcError::decode(format!("expected `{{`, found {}", tok))),
        }
    }

    // Unknown field names reach `deserialize_ignored_any`, which skips the
    // whole value structurally.
    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self.lexer.next_token()? {
            Token::Atom("null") => visitor.visit_map(ZeroFields::new(fields)),
            Token::LBrace => {
                let value = visitor.visit_map(Fields::new(self, fields))?;
                self.lexer.expect(Token::RBrace)?;
                Ok(value)
            }
            tok => Err(RpcError::decode(format!("expected `{{`, found {}", tok))),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self.lexer.next_token()? {
            Token::Atom("null") => de::Deserializer::deserialize_enum(Zero, name, variants, visitor),
            Token::Text(variant) | Token::Atom(variant) => {
                visitor.visit_enum(variant.into_deserializer())
            }
            tok => Err(RpcError::decode(format!(
                "expected a variant name of `{}`, found {}",
                name, tok
            ))),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.lexer.skip_value()?;
        visitor.visit_unit()
    }
}

/// Element access for `[...]` and `{...}`; the closing delimiter is left for
/// the caller to consume.
struct Elements<'a, 'de> {
    de: &'a mut Decoder<'de>,
    first: bool,
}

impl<'a, 'de> Elements<'a, 'de> {
    fn new(de: &'a mut Decoder<'de>) -> Self {
        Self { de, first: true }
    }

    /// Returns false at `close`, otherwise consumes the separator if needed.
    fn has_next(&mut self, close: Token<'_>) -> Result<bool> {
        match self.de.lexer.peek()? {
            Some(tok) if tok == close => return Ok(false),
            None => return Err(RpcError::decode("unexpected end of input")),
            _ => {}
        }
        if !self.first {
            self.de.lexer.expect(Token::Comma)?;
        }
        self.first = false;
        Ok(true)
    }
}

impl<'de> de::SeqAccess<'de> for Elements<'_, 'de> {
    type Error = RpcError;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        if !self.has_next(Token::RBracket)? {
            return Ok(None);
        }
        seed.deserialize(&mut *self.de).map(Some)
    }
}

impl<'de> de::MapAccess<'de> for Elements<'_, 'de> {
    type Error = RpcError;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        if !self.has_next(Token::RBrace)? {
            return Ok(None);
        }
        seed.deserialize(&mut *self.de).map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        self.de.lexer.expect(Token::Colon)?;
        seed.deserialize(&mut *self.de)
    }
}

/// Access for a `null` sequence or map: no elements.
struct Empty;

impl<'de> de::SeqAccess<'de> for Empty {
    type Error = RpcError;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, _seed: T) -> Result<Option<T::Value>> {
        Ok(None)
    }
}

impl<'de> de::MapAccess<'de> for Empty {
    type Error = RpcError;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, _seed: K) -> Result<Option<K::Value>> {
        Ok(None)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, _seed: V) -> Result<V::Value> {
        Err(RpcError::decode("value requested from an empty map"))
    }
}

/// Field access for a `{...}` record. Once the closing brace is reached, the
/// declared fields that never appeared are yielded with their zero values.
struct Fields<'a, 'de> {
    elements: Elements<'a, 'de>,
    missing: ZeroFields,
    exhausted: bool,
}

impl<'a, 'de> Fields<'a, 'de> {
    fn new(de: &'a mut Decoder<'de>, fields: &'static [&'static str]) -> Self {
        Self {
            elements: Elements::new(de),
            missing: ZeroFields::new(fields),
            exhausted: false,
        }
    }
}

impl<'de> MapAccess<'de> for Fields<'_, 'de> {
    type Error = RpcError;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        if !self.exhausted {
            if self.elements.has_next(Token::RBrace)? {
                if let Some(Token::Text(key) | Token::Atom(key)) = self.elements.de.lexer.peek()? {
                    self.missing.mark_seen(key);
                }
                return seed.deserialize(&mut *self.elements.de).map(Some);
            }
            self.exhausted = true;
        }
        self.missing.next_key_seed(seed)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        if self.exhausted {
            self.missing.next_value_seed(seed)
        } else {
            self.elements.next_value_seed(seed)
        }
    }
}

/// Yields each declared field not yet seen, paired with its zero value.
struct ZeroFields {
    fields: &'static [&'static str],
    seen: Vec<bool>,
    next: usize,
}

impl ZeroFields {
    fn new(fields: &'static [&'static str]) -> Self {
        Self {
            fields,
            seen: vec![false; fields.len()],
            next: 0,
        }
    }

    fn mark_seen(&mut self, key: &str) {
        if let Some(i) = self.fields.iter().position(|field| *field == key) {
            self.seen[i] = true;
        }
    }
}

impl<'de> MapAccess<'de> for ZeroFields {
    type Error = RpcError;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        while self.next < self.fields.len() {
            let i = self.next;
            self.next += 1;
            if !self.seen[i] {
                let key: de::value::StrDeserializer<'static, RpcError> =
                    self.fields[i].into_deserializer();
                return seed.deserialize(key).map(Some);
            }
        }
        Ok(None)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        seed.deserialize(Zero)
    }
}

/// Access for a fixed-length tuple or array decoded from `null`.
struct ZeroElements(usize);

impl<'de> de::SeqAccess<'de> for ZeroElements {
    type Error = RpcError;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        if self.0 == 0 {
            return Ok(None);
        }
        self.0 -= 1;
        seed.deserialize(Zero).map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.0)
    }
}

/// Produces the zero value of whatever type asks for one.
struct Zero;

macro_rules! zero_number {
    ($($method:ident => $visit:ident: $zero:expr,)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
                visitor.$visit($zero)
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Zero {
    type Error = RpcError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_unit()
    }

    zero_number! {
        deserialize_bool => visit_bool: false,
        deserialize_i8 => visit_i8: 0,
        deserialize_i16 => visit_i16: 0,
        deserialize_i32 => visit_i32: 0,
        deserialize_i64 => visit_i64: 0,
        deserialize_i128 => visit_i128: 0,
        deserialize_u8 => visit_u8: 0,
        deserialize_u16 => visit_u16: 0,
        deserialize_u32 => visit_u32: 0,
        deserialize_u64 => visit_u64: 0,
        deserialize_u128 => visit_u128: 0,
        deserialize_f32 => visit_f32: 0.0,
        deserialize_f64 => visit_f64: 0.0,
        deserialize_char => visit_char: '\0',
        deserialize_str => visit_borrowed_str: "",
        deserialize_string => visit_borrowed_str: "",
        deserialize_identifier => visit_borrowed_str: "",
        deserialize_bytes => visit_borrowed_bytes: &[],
        deserialize_byte_buf => visit_borrowed_bytes: &[],
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_none()
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_seq(Empty)
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value> {
        visitor.visit_seq(ZeroElements(len))
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_seq(ZeroElements(len))
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_map(Empty)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_map(ZeroFields::new(fields))
    }

    // The first declared variant stands in for the zero of an enum.
    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match variants.first() {
            Some(variant) => {
                let variant: de::value::StrDeserializer<'static, RpcError> =
                    (*variant).into_deserializer();
                visitor.visit_enum(variant)
            }
            None => Err(RpcError::decode(format!("`{}` has no variants", name))),
        }
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_unit()
    }
}
