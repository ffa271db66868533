//! Serializer for the text grammar.

use std::fmt::{Display, Write};

use serde::ser::{self, Impossible, Serialize};

use crate::error::{RpcError, Result};

/// Newtype-struct name that marks pre-encoded text to be written verbatim.
pub(crate) const RAW_TEXT_TOKEN: &str = "$textwire::RawText";

/// Writes values into a text buffer.
pub(crate) struct Encoder<'a> {
    out: &'a mut String,
    raw_next: bool,
}

impl<'a> Encoder<'a> {
    pub(crate) fn new(out: &'a mut String) -> Self {
        Self {
            out,
            raw_next: false,
        }
    }

    fn display(&mut self, value: impl Display) -> Result<()> {
        write!(self.out, "{}", value).map_err(RpcError::encode)
    }

    fn quoted(&mut self, value: impl Display) -> Result<()> {
        write!(self.out, "\"{}\"", value).map_err(RpcError::encode)
    }
}

fn unsupported(what: impl Display) -> RpcError {
    RpcError::Encode(format!("{} has no wire mapping", what))
}

impl<'a, 'b> ser::Serializer for &'b mut Encoder<'a> {
    type Ok = ();
    type Error = RpcError;

    type SerializeSeq = Compound<'a, 'b>;
    type SerializeTuple = Compound<'a, 'b>;
    type SerializeTupleStruct = Compound<'a, 'b>;
    type SerializeTupleVariant = Impossible<(), RpcError>;
    type SerializeMap = Compound<'a, 'b>;
    type SerializeStruct = Compound<'a, 'b>;
    type SerializeStructVariant = Impossible<(), RpcError>;

    fn serialize_bool(self, v: bool) -> Result<()> {
        self.out.push_str(if v { "true" } else { "false" });
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> Result<()> {
        self.display(v)
    }

    fn serialize_i16(self, v: i16) -> Result<()> {
        self.display(v)
    }

    fn serialize_i32(self, v: i32) -> Result<()> {
        self.display(v)
    }

    fn serialize_i64(self, v: i64) -> Result<()> {
        self.display(v)
    }

    fn serialize_i128(self, v: i128) -> Result<()> {
        self.display(v)
    }

    fn serialize_u8(self, v: u8) -> Result<()> {
        self.display(v)
    }

    fn serialize_u16(self, v: u16) -> Result<()> {
        self.display(v)
    }

    fn serialize_u32(self, v: u32) -> Result<()> {
        self.display(v)
    }

    fn serialize_u64(self, v: u64) -> Result<()> {
        self.display(v)
    }

    fn serialize_u128(self, v: u128) -> Result<()> {
        self.display(v)
    }

    // `Display` for floats never switches to exponent form and prints the
    // shortest text that parses back to the same value.
    fn serialize_f32(self, v: f32) -> Result<()> {
        self.display(v)
    }

    fn serialize_f64(self, v: f64) -> Result<()> {
        self.display(v)
    }

    fn serialize_char(self, v: char) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_str(self, v: &str) -> Result<()> {
        if self.raw_next {
            self.raw_next = false;
            self.out.push_str(v);
            return Ok(());
        }
        self.quoted(v)
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<()> {
        use ser::SerializeSeq;
        let mut seq = self.serialize_seq(Some(v.len()))?;
        for byte in v {
            seq.serialize_element(byte)?;
        }
        seq.end()
    }

    fn serialize_none(self) -> Result<()> {
        self.out.push_str("null");
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<()> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<()> {
        self.serialize_none()
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<()> {
        self.serialize_none()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<()> {
        self.quoted(variant)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<()> {
        if name == RAW_TEXT_TOKEN {
            self.raw_next = true;
        }
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _value: &T,
    ) -> Result<()> {
        Err(unsupported(format_args!("enum variant `{}::{}`", name, variant)))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq> {
        self.out.push('[');
        Ok(Compound::new(self))
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(unsupported(format_args!("enum variant `{}::{}`", name, variant)))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        self.out.push('{');
        Ok(Compound::new(self))
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct> {
        self.out.push('{');
        Ok(Compound::new(self))
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(unsupported(format_args!("enum variant `{}::{}`", name, variant)))
    }
}

/// In-progress sequence, map or record.
pub(crate) struct Compound<'a, 'b> {
    enc: &'b mut Encoder<'a>,
    first: bool,
}

impl<'a, 'b> Compound<'a, 'b> {
    fn new(enc: &'b mut Encoder<'a>) -> Self {
        Self { enc, first: true }
    }

    fn separator(&mut self) {
        if !self.first {
            self.enc.out.push(',');
        }
        self.first = false;
    }
}

impl ser::SerializeSeq for Compound<'_, '_> {
    type Ok = ();
    type Error = RpcError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.separator();
        value.serialize(&mut *self.enc)
    }

    fn end(self) -> Result<()> {
        self.enc.out.push(']');
        Ok(())
    }
}

impl ser::SerializeTuple for Compound<'_, '_> {
    type Ok = ();
    type Error = RpcError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<()> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for Compound<'_, '_> {
    type Ok = ();
    type Error = RpcError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<()> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeMap for Compound<'_, '_> {
    type Ok = ();
    type Error = RpcError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<()> {
        self.separator();
        key.serialize(MapKeyEncoder {
            out: &mut *self.enc.out,
        })?;
        self.enc.out.push(':');
        Ok(())
    }

    // Values keep their own encoding; they are never quoted a second time.
    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut *self.enc)
    }

    fn end(self) -> Result<()> {
        self.enc.out.push('}');
        Ok(())
    }
}

impl ser::SerializeStruct for Compound<'_, '_> {
    type Ok = ();
    type Error = RpcError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        self.separator();
        self.enc.quoted(key)?;
        self.enc.out.push(':');
        value.serialize(&mut *self.enc)
    }

    fn end(self) -> Result<()> {
        self.enc.out.push('}');
        Ok(())
    }
}

/// Renders map keys, always as quoted text.
struct MapKeyEncoder<'a> {
    out: &'a mut String,
}

impl MapKeyEncoder<'_> {
    fn quoted(self, value: impl Display) -> Result<()> {
        write!(self.out, "\"{}\"", value).map_err(RpcError::encode)
    }
}

fn bad_key() -> RpcError {
    RpcError::encode("map key must be a primitive value")
}

impl ser::Serializer for MapKeyEncoder<'_> {
    type Ok = ();
    type Error = RpcError;

    type SerializeSeq = Impossible<(), RpcError>;
    type SerializeTuple = Impossible<(), RpcError>;
    type SerializeTupleStruct = Impossible<(), RpcError>;
    type SerializeTupleVariant = Impossible<(), RpcError>;
    type SerializeMap = Impossible<(), RpcError>;
    type SerializeStruct = Impossible<(), RpcError>;
    type SerializeStructVariant = Impossible<(), RpcError>;

    fn serialize_bool(self, v: bool) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_i8(self, v: i8) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_i16(self, v: i16) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_i32(self, v: i32) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_i64(self, v: i64) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_i128(self, v: i128) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_u8(self, v: u8) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_u16(self, v: u16) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_u32(self, v: u32) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_u64(self, v: u64) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_u128(self, v: u128) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_f32(self, v: f32) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_f64(self, v: f64) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_char(self, v: char) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_str(self, v: &str) -> Result<()> {
        self.quoted(v)
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<()> {
        Err(bad_key())
    }

    fn serialize_none(self) -> Result<()> {
        Err(bad_key())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<()> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<()> {
        Err(bad_key())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<()> {
        Err(bad_key())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<()> {
        self.quoted(variant)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<()> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<()> {
        Err(bad_key())
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq> {
        Err(bad_key())
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple> {
        Err(bad_key())
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Err(bad_key())
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(bad_key())
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        Err(bad_key())
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct> {
        Err(bad_key())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(bad_key())
    }
}
