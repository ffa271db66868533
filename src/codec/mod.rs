//! Codec module - the self-delimiting text grammar.
//!
//! Values are encoded by shape:
//!
//! | Shape | Encoding |
//! |-------|----------|
//! | integer, float, bool | `12`, `-3.5`, `true` |
//! | text | `"verbatim"` (no escaping) |
//! | sequence | `[1,2,3]` |
//! | map | `{"1":"a","2":"b"}` (keys always quoted) |
//! | optional / absent | the value itself, or `null` |
//! | dynamic | the held value, or `null` |
//! | record | `{"Field":value,...}` in declaration order |
//!
//! Composite values end at their matching closing delimiter, so values can be
//! written back to back with no length prefix.
//!
//! # Design
//!
//! The codec is a serde data format: anything `Serialize` encodes and
//! anything `Deserialize` decodes, with the target type driving the parse.
//! Map and set enumeration order follows the collection; `HashMap` order is
//! unspecified.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use textwire_rpc::codec::TextCodec;
//!
//! let mut mp = BTreeMap::new();
//! mp.insert(1, 2);
//! let encoded = TextCodec::encode(&mp).unwrap();
//! assert_eq!(encoded, r#"{"1":2}"#);
//!
//! let decoded: BTreeMap<i32, i32> = TextCodec::decode(encoded.as_bytes()).unwrap();
//! assert_eq!(decoded, mp);
//! ```

mod de;
mod dynamic;
pub(crate) mod lexer;
mod ser;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{RpcError, Result};

pub use de::Decoder;
pub use dynamic::{Dynamic, DynamicValue};

/// Encode `value` into a fresh string.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut out = String::new();
    encode_into(value, &mut out)?;
    Ok(out)
}

/// Append the encoding of `value` to `out`.
///
/// On error `out` is restored to its previous contents.
pub fn encode_into<T: Serialize + ?Sized>(value: &T, out: &mut String) -> Result<()> {
    let mark = out.len();
    let result = value.serialize(&mut ser::Encoder::new(out));
    if result.is_err() {
        out.truncate(mark);
    }
    result
}

/// Decode exactly one value from `text`.
pub fn decode<'de, T: Deserialize<'de>>(text: &'de str) -> Result<T> {
    let mut decoder = Decoder::new(text);
    let value = decoder.decode()?;
    decoder.end()?;
    Ok(value)
}

/// Decode exactly one value from UTF-8 bytes.
pub fn decode_slice<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    let text = std::str::from_utf8(bytes).map_err(|e| RpcError::decode(format!("invalid UTF-8: {}", e)))?;
    decode(text)
}

/// Text codec for structured data.
pub struct TextCodec;

impl TextCodec {
    /// Encode a value to its text form.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Encode`] if the value has a shape with no wire
    /// mapping (for example an enum variant carrying data).
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
        encode(value)
    }

    /// Decode one value from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Decode`] if the bytes are not one well-formed
    /// value of type `T`.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        decode_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    #[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
    #[serde(rename_all = "PascalCase")]
    struct Pair {
        a: i64,
        b: i64,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
    #[serde(rename_all = "PascalCase")]
    struct Sample {
        a: i32,
        b: String,
        c: u32,
        d: bool,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
    #[serde(rename_all = "PascalCase", default)]
    struct Nested {
        a: Option<Box<Sample>>,
        b: Sample,
        mp: BTreeMap<i32, String>,
        ar: Vec<i32>,
        r#as: Vec<String>,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
    #[serde(rename_all = "PascalCase")]
    struct MapHolder {
        mp: HashMap<i32, i32>,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Hidden {
        #[serde(rename = "Shown")]
        shown: u8,
        #[serde(skip)]
        internal: u8,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Copy)]
    enum Color {
        Red,
        Green,
    }

    #[derive(Serialize)]
    enum Shape {
        Circle(f64),
    }

    fn sample() -> Sample {
        Sample {
            a: 1,
            b: "dsds".to_string(),
            c: 3,
            d: true,
        }
    }

    #[test]
    fn test_encode_primitives() {
        assert_eq!(encode(&1).unwrap(), "1");
        assert_eq!(encode(&-42i64).unwrap(), "-42");
        assert_eq!(encode(&u64::MAX).unwrap(), "18446744073709551615");
        assert_eq!(encode(&true).unwrap(), "true");
        assert_eq!(encode(&2.5f64).unwrap(), "2.5");
        assert_eq!(encode(&1e-7f64).unwrap(), "0.0000001");
        assert_eq!(encode("ada").unwrap(), r#""ada""#);
        assert_eq!(encode(&'x').unwrap(), r#""x""#);
    }

    #[test]
    fn test_encode_sequence_and_absent() {
        assert_eq!(encode(&vec![1, 2, 3]).unwrap(), "[1,2,3]");
        assert_eq!(encode(&Vec::<i32>::new()).unwrap(), "[]");
        assert_eq!(encode(&Option::<Vec<i32>>::None).unwrap(), "null");
        assert_eq!(encode(&(1, "a")).unwrap(), r#"[1,"a"]"#);
    }

    #[test]
    fn test_encode_record() {
        assert_eq!(encode(&Pair { a: 1, b: 2 }).unwrap(), r#"{"A":1,"B":2}"#);
        assert_eq!(
            encode(&sample()).unwrap(),
            r#"{"A":1,"B":"dsds","C":3,"D":true}"#
        );
    }

    #[test]
    fn test_encode_record_skips_hidden_fields() {
        let value = Hidden {
            shown: 1,
            internal: 9,
        };
        assert_eq!(encode(&value).unwrap(), r#"{"Shown":1}"#);
    }

    #[test]
    fn test_map_keys_always_quoted_values_never_requoted() {
        let mut mp = HashMap::new();
        mp.insert(1, 2);
        let holder = MapHolder { mp };
        assert_eq!(encode(&holder).unwrap(), r#"{"Mp":{"1":2}}"#);

        let mut named = BTreeMap::new();
        named.insert("k", sample());
        assert_eq!(
            encode(&named).unwrap(),
            r#"{"k":{"A":1,"B":"dsds","C":3,"D":true}}"#
        );

        let mut flags = BTreeMap::new();
        flags.insert(true, "yes");
        assert_eq!(encode(&flags).unwrap(), r#"{"true":"yes"}"#);
    }

    #[test]
    fn test_encode_nested() {
        let mut mp = BTreeMap::new();
        mp.insert(1, "adas".to_string());
        mp.insert(2, "sdsf".to_string());
        let value = Nested {
            a: Some(Box::new(sample())),
            b: sample(),
            mp,
            ar: vec![1, 2, 3],
            r#as: vec!["1".into(), "2".into(), "3".into()],
        };
        let expected = r#"{"A":{"A":1,"B":"dsds","C":3,"D":true},"B":{"A":1,"B":"dsds","C":3,"D":true},"Mp":{"1":"adas","2":"sdsf"},"Ar":[1,2,3],"As":["1","2","3"]}"#;
        assert_eq!(encode(&value).unwrap(), expected);
        assert_eq!(decode::<Nested>(expected).unwrap(), value);
    }

    #[test]
    fn test_unit_variants_and_unsupported_shapes() {
        assert_eq!(encode(&Color::Green).unwrap(), r#""Green""#);
        assert_eq!(decode::<Color>(r#""Red""#).unwrap(), Color::Red);

        let err = encode(&Shape::Circle(1.0)).unwrap_err();
        assert!(matches!(err, RpcError::Encode(_)));

        let mut bad_keys = BTreeMap::new();
        bad_keys.insert(vec![1], 1);
        assert!(matches!(encode(&bad_keys), Err(RpcError::Encode(_))));
    }

    #[test]
    fn test_encode_into_restores_on_error() {
        let mut out = String::from("keep");
        assert!(encode_into(&vec![Shape::Circle(2.0)], &mut out).is_err());
        assert_eq!(out, "keep");
    }

    #[test]
    fn test_decode_primitives_bare_or_quoted() {
        assert_eq!(decode::<i32>("1").unwrap(), 1);
        assert_eq!(decode::<i32>(r#""1""#).unwrap(), 1);
        assert_eq!(decode::<u64>(r#""7""#).unwrap(), 7);
        assert_eq!(decode::<bool>(r#""true""#).unwrap(), true);
        assert_eq!(decode::<f64>("-0.25").unwrap(), -0.25);
        assert_eq!(decode::<String>(r#""ada""#).unwrap(), "ada");
    }

    #[test]
    fn test_decode_null_leaves_zero_value() {
        assert_eq!(decode::<i32>("null").unwrap(), 0);
        assert_eq!(decode::<String>("null").unwrap(), "");
        assert_eq!(decode::<bool>("null").unwrap(), false);
        assert_eq!(decode::<Option<u8>>("null").unwrap(), None);
    }

    #[test]
    fn test_null_record_decodes_to_zero_fields() {
        assert_eq!(decode::<Pair>("null").unwrap(), Pair::default());
        assert_eq!(decode::<Sample>("null").unwrap(), Sample::default());
        assert_eq!(decode::<[i32; 2]>("null").unwrap(), [0, 0]);
        assert_eq!(decode::<(u8, String)>("null").unwrap(), (0, String::new()));
        assert_eq!(decode::<Vec<Pair>>("[null]").unwrap(), vec![Pair::default()]);
    }

    #[test]
    fn test_missing_record_fields_left_at_zero() {
        assert_eq!(decode::<Pair>(r#"{"A":1}"#).unwrap(), Pair { a: 1, b: 0 });
        assert_eq!(decode::<Pair>("{}").unwrap(), Pair::default());

        #[derive(Deserialize, PartialEq, Debug)]
        #[serde(rename_all = "PascalCase")]
        struct Outer {
            inner: Pair,
            tag: Option<String>,
            items: Vec<u8>,
        }
        let outer: Outer = decode(r#"{"Inner":null}"#).unwrap();
        assert_eq!(
            outer,
            Outer {
                inner: Pair::default(),
                tag: None,
                items: Vec::new(),
            }
        );
    }

    #[test]
    fn test_absent_args_reach_record_target() {
        let absent: Option<Pair> = None;
        let text = encode(&absent).unwrap();
        assert_eq!(decode::<Pair>(&text).unwrap(), Pair::default());
    }

    #[test]
    fn test_absent_containers_decode_empty() {
        let absent: Option<Vec<i32>> = None;
        let text = encode(&absent).unwrap();
        assert_eq!(text, "null");
        let seq: Vec<i32> = decode(&text).unwrap();
        assert!(seq.is_empty());

        let holder: MapHolder = decode(r#"{"Mp":null}"#).unwrap();
        assert_eq!(holder, MapHolder::default());
        assert!(holder.mp.is_empty());
    }

    #[test]
    fn test_decode_quoted_map_keys() {
        let holder: MapHolder = decode(r#"{"Mp":{"1":1,"2":2,"3":3}}"#).unwrap();
        assert_eq!(holder.mp.len(), 3);
        assert_eq!(holder.mp[&2], 2);
    }

    #[test]
    fn test_decode_skips_unknown_fields_structurally() {
        let text = r#"{"X":{"deep":[1,{"y":[2,3]}]},"A":1,"Junk":[[],{}],"B":2}"#;
        assert_eq!(decode::<Pair>(text).unwrap(), Pair { a: 1, b: 2 });
    }

    #[test]
    fn test_decode_errors() {
        for bad in [
            "[1,2",
            "[1;2]",
            "[1,]",
            r#"{"A":1"#,
            r#"{"A" 1}"#,
            "abc",
            "",
            "[1] 2",
        ] {
            let err = decode::<Vec<i32>>(bad).unwrap_err();
            assert!(
                err.to_string().contains("decode failed"),
                "{:?} gave {}",
                bad,
                err
            );
        }
        assert!(matches!(decode::<Pair>("[1]"), Err(RpcError::Decode(_))));
        assert!(matches!(decode::<i8>("300"), Err(RpcError::Decode(_))));
        assert!(matches!(decode_slice::<i8>(&[0xff]), Err(RpcError::Decode(_))));
    }

    #[test]
    fn test_decoder_stops_at_value_boundary() {
        let mut decoder = Decoder::new(r#"{"A":1,"B":2}{"A":3,"B":4} [5]"#);
        let first: Pair = decoder.decode().unwrap();
        let second: Pair = decoder.decode().unwrap();
        let third: Vec<i32> = decoder.decode().unwrap();
        assert_eq!(first, Pair { a: 1, b: 2 });
        assert_eq!(second, Pair { a: 3, b: 4 });
        assert_eq!(third, vec![5]);
        assert!(decoder.is_exhausted());
    }

    #[test]
    fn test_round_trip_shapes() {
        let floats = vec![0.1f64, -1.5, 1e300, 5e-324, f64::MAX];
        let back: Vec<f64> = decode(&encode(&floats).unwrap()).unwrap();
        assert_eq!(back, floats);

        let mut mp = HashMap::new();
        mp.insert("x".to_string(), vec![Some(1u8), None]);
        let back: HashMap<String, Vec<Option<u8>>> = decode(&encode(&mp).unwrap()).unwrap();
        assert_eq!(back, mp);

        let nested: Vec<Vec<Pair>> = vec![vec![Pair { a: 1, b: 2 }], vec![]];
        let back: Vec<Vec<Pair>> = decode(&encode(&nested).unwrap()).unwrap();
        assert_eq!(back, nested);
    }

    #[test]
    fn test_record_encoding_matches_json_for_plain_records() {
        let value = sample();
        assert_eq!(
            encode(&value).unwrap(),
            serde_json::to_string(&value).unwrap()
        );
    }

    #[test]
    fn test_text_codec_facade() {
        let encoded = TextCodec::encode(&Pair { a: 1, b: 2 }).unwrap();
        let decoded: Pair = TextCodec::decode(encoded.as_bytes()).unwrap();
        assert_eq!(decoded, Pair { a: 1, b: 2 });
    }
}
