//! Serde helpers shared by the ledger's wire types.

/// Byte strings as lower-case hex. Works for `Vec<u8>` and fixed arrays.
pub(crate) mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: TryFrom<Vec<u8>>,
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let raw = hex::decode(&encoded).map_err(D::Error::custom)?;
        let len = raw.len();
        T::try_from(raw).map_err(|_| D::Error::custom(format!("unexpected byte length {len}")))
    }
}

/// Amounts as decimal strings. Internally tagged enums buffer their fields
/// and that buffer has no 128-bit integers.
pub(crate) mod amount_str {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::ledger::Amount;

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        if encoded.is_empty() || !encoded.bytes().all(|b| b.is_ascii_digit()) {
            return Err(D::Error::custom(format!("invalid amount {encoded:?}")));
        }
        encoded.parse().map_err(D::Error::custom)
    }
}
