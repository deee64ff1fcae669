//! # Payload Serializer
//!
//! Payloads are MessagePack maps with field names kept
//! (`rmp_serde::to_vec_named`), so a peer can recover every field without a
//! shared schema. Image fields are `bytes::Bytes`, which serde writes as a
//! MessagePack `bin` blob instead of an array of integers.

use std::fmt;

use serde::de::{DeserializeOwned, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{DecodeError, ProtocolError};

/// Payload of ping, pong and diagnostic requests: an empty map.
pub const EMPTY_MAP: &[u8] = &[0x80];

/// Packs a record into a named-field MessagePack map.
pub fn pack<T>(record: &T) -> Result<Vec<u8>, ProtocolError>
where
    T: Serialize + ?Sized,
{
    Ok(rmp_serde::to_vec_named(record)?)
}

/// Unpacks `bytes` as the record shape `T`.
pub fn unpack<T>(bytes: &[u8]) -> Result<T, DecodeError>
where
    T: DeserializeOwned,
{
    Ok(rmp_serde::from_slice(bytes)?)
}

/// True when `bytes` holds a MessagePack map, whatever its fields.
pub fn is_map(bytes: &[u8]) -> bool {
    rmp_serde::from_slice::<AnyMap>(bytes).is_ok()
}

/// Accepts any map and nothing else.
struct AnyMap;

impl<'de> Deserialize<'de> for AnyMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(AnyMapVisitor)
    }
}

struct AnyMapVisitor;

impl<'de> Visitor<'de> for AnyMapVisitor {
    type Value = AnyMap;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<AnyMap, A::Error>
    where
        A: MapAccess<'de>,
    {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(AnyMap)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde::Deserialize;

    use super::*;
    use crate::models::{IdentifyRequest, StatusModel};

    #[test]
    fn image_blob_is_packed_as_bin() {
        let packed = pack(&IdentifyRequest {
            image: Bytes::from_static(&[1, 2, 3]),
        })
        .unwrap();

        // fixmap(1), fixstr "image", bin8 len 3, payload
        let mut expected = vec![0x81, 0xA5];
        expected.extend_from_slice(b"image");
        expected.extend_from_slice(&[0xC4, 0x03, 1, 2, 3]);
        assert_eq!(packed, expected);
    }

    #[test]
    fn wrong_field_type_is_a_decode_error() {
        #[derive(Serialize)]
        struct Bogus {
            ok: &'static str,
        }
        let packed = pack(&Bogus { ok: "yes" }).unwrap();
        assert!(matches!(
            unpack::<StatusModel>(&packed),
            Err(DecodeError::Msgpack(_))
        ));
    }

    #[test]
    fn missing_required_field_is_a_decode_error() {
        assert!(unpack::<IdentifyRequest>(EMPTY_MAP).is_err());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(unpack::<StatusModel>(&[0xC1, 0xFF, 0x00]).is_err());
        assert!(unpack::<StatusModel>(&[]).is_err());
    }

    #[test]
    fn empty_struct_packs_to_empty_map() {
        #[derive(Serialize, Deserialize)]
        struct Nothing {}
        assert_eq!(pack(&Nothing {}).unwrap(), EMPTY_MAP);
        assert!(unpack::<Nothing>(EMPTY_MAP).is_ok());
    }

    #[test]
    fn map_detection() {
        assert!(is_map(EMPTY_MAP));
        assert!(is_map(&pack(&IdentifyRequest { image: Bytes::from_static(b"x") }).unwrap()));
        assert!(!is_map(&[0x90])); // empty array
        assert!(!is_map(&[0xC0])); // nil
        assert!(!is_map(&[]));
    }
}
