use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Error;

/// A 20-byte SHA-1 torrent info hash. The canonical text form is 40 uppercase
/// hex characters; parsing accepts either case.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    pub fn new(from: [u8; 20]) -> InfoHash {
        InfoHash(from)
    }

    pub fn from_bytes(b: &[u8]) -> crate::Result<Self> {
        let mut v = [0u8; 20];
        if b.len() != 20 {
            return Err(Error::InfoHashLength(b.len() * 2));
        }
        v.copy_from_slice(b);
        Ok(InfoHash(v))
    }

    pub fn as_string(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl FromStr for InfoHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 {
            return Err(Error::InfoHashLength(s.len()));
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(s, &mut out)?;
        Ok(InfoHash(out))
    }
}

impl std::fmt::Display for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl Serialize for InfoHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.as_string())
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = InfoHash;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a 40-character hex string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                InfoHash::from_str(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_either_case_canonical_upper() {
        let lower = InfoHash::from_str("dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c").unwrap();
        let upper = InfoHash::from_str("DD8255ECDC7CA55FB0BBF81323D87062DB1F6D1C").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(
            lower.as_string(),
            "DD8255ECDC7CA55FB0BBF81323D87062DB1F6D1C"
        );
        assert_eq!(lower.as_string().len(), 40);
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(matches!(
            InfoHash::from_str("dd8255"),
            Err(Error::InfoHashLength(6))
        ));
        assert!(InfoHash::from_str("").is_err());
    }

    #[test]
    fn test_rejects_non_hex() {
        assert!(InfoHash::from_str("zz8255ecdc7ca55fb0bbf81323d87062db1f6d1c").is_err());
    }

    #[test]
    fn test_serde_roundtrip_as_string() {
        let h = InfoHash::from_str("dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c").unwrap();
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, "\"DD8255ECDC7CA55FB0BBF81323D87062DB1F6D1C\"");
        let back: InfoHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
