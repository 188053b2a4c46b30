//! MsgPack codec using `rmp-serde`.
//!
//! Uses the positional (`to_vec`) encoding: structs serialize as arrays
//! without field names. On links where every payload must fit in 255 bytes,
//! the map form's field-name overhead is not worth paying; both ends of a
//! connection share the type definitions anyway.
//!
//! # Example
//!
//! ```
//! use framelink::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Reading {
//!     channel: u8,
//!     value: f32,
//! }
//!
//! let reading = Reading { channel: 3, value: 2.5 };
//! let encoded = MsgPackCodec::encode(&reading).unwrap();
//! let decoded: Reading = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, reading);
//! ```

use crate::error::Result;

/// MessagePack codec for typed payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (positional form).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
