//! Type-erased values.
//!
//! The wire carries no type tag, so a [`Dynamic`] can only be decoded into
//! when it already holds a concrete value: the held value's type drives the
//! decode. An empty `Dynamic` accepts nothing but `null`.

use std::any::Any;
use std::fmt;

use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::ser::{Error as _, Serializer};
use serde::{Deserialize, Serialize};

use super::de::Decoder;
use super::ser::RAW_TEXT_TOKEN;
use crate::error::{RpcError, Result};

const NO_CONCRETE_VALUE: &str = "dynamic target holds no concrete value";

/// Object-safe view of a value that can sit inside a [`Dynamic`].
///
/// Implemented for every `Serialize + DeserializeOwned` type.
pub trait DynamicValue: Any + Send + Sync + fmt::Debug {
    /// Encode the concrete value.
    fn encode_text(&self) -> Result<String>;

    /// Replace the concrete value with the next value decoded as its own type.
    fn decode_text(&mut self, decoder: &mut Decoder<'_>) -> Result<()>;

    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T> DynamicValue for T
where
    T: Serialize + DeserializeOwned + Any + Send + Sync + fmt::Debug,
{
    fn encode_text(&self) -> Result<String> {
        super::encode(self)
    }

    fn decode_text(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        *self = decoder.decode::<T>()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A value whose concrete type is erased.
///
/// ```
/// use textwire_rpc::codec::{self, Decoder, Dynamic};
///
/// let value = Dynamic::new(vec![1u32, 2]);
/// assert_eq!(codec::encode(&value).unwrap(), "[1,2]");
///
/// let mut target = Dynamic::new(Vec::<u32>::new());
/// target.decode_from(&mut Decoder::new("[3,4]")).unwrap();
/// assert_eq!(target.downcast_ref::<Vec<u32>>(), Some(&vec![3, 4]));
/// ```
#[derive(Debug, Default)]
pub struct Dynamic(Option<Box<dyn DynamicValue>>);

impl Dynamic {
    /// Wrap a concrete value.
    pub fn new<T: DynamicValue>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    /// An empty (absent) dynamic value.
    pub fn empty() -> Self {
        Self(None)
    }

    /// True when no concrete value is held.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Borrow the held value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.as_any().downcast_ref())
    }

    /// Decode the next value into the held concrete value.
    ///
    /// With no concrete value held, only `null` is accepted; anything else
    /// fails with a decode error.
    pub fn decode_from(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        match self.0.as_deref_mut() {
            Some(value) => value.decode_text(decoder),
            None if decoder.take_null()? => Ok(()),
            None => Err(RpcError::decode(NO_CONCRETE_VALUE)),
        }
    }
}

/// Marks already-encoded text so the encoder emits it verbatim.
struct RawText<'a>(&'a str);

impl Serialize for RawText<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(RAW_TEXT_TOKEN, self.0)
    }
}

impl Serialize for Dynamic {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.0 {
            None => serializer.serialize_none(),
            Some(value) => {
                let text = value.encode_text().map_err(S::Error::custom)?;
                RawText(&text).serialize(serializer)
            }
        }
    }
}

// A freshly constructed `Dynamic` has nothing to decode into, so only `null`
// deserializes.
impl<'de> Deserialize<'de> for Dynamic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct DynamicVisitor;

        impl<'de> Visitor<'de> for DynamicVisitor {
            type Value = Dynamic;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("null")
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<Dynamic, E> {
                Ok(Dynamic::empty())
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Dynamic, E> {
                Ok(Dynamic::empty())
            }

            fn visit_some<D: Deserializer<'de>>(
                self,
                _deserializer: D,
            ) -> std::result::Result<Dynamic, D::Error> {
                Err(de::Error::custom(NO_CONCRETE_VALUE))
            }
        }

        deserializer.deserialize_option(DynamicVisitor)
    }
}
