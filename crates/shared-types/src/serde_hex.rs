//! Hex encoding for byte fields in human-readable formats.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod bytes {
    use super::*;

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(value))
        } else {
            value.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer)
        }
    }
}

pub mod hash {
    use super::*;
    use crate::entities::Hash;

    pub fn serialize<S: Serializer>(value: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(value))
        } else {
            value.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let raw = hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
            raw.try_into().map_err(|v: Vec<u8>| {
                serde::de::Error::custom(format!("expected 32 byte hash, got {} bytes", v.len()))
            })
        } else {
            Hash::deserialize(deserializer)
        }
    }
}
