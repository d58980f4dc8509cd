// =============================================================================
// CROSSFILL - Amount Encoding
// =============================================================================
//
// Amounts are u128 in smallest units everywhere inside the crate.
// They only become strings (JSON, RPC) or 32-byte words (ABI) here,
// at the edge.
//
// =============================================================================

use std::fmt;

/// Error parsing an amount at the system edge
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmountError(pub String);

impl fmt::Display for AmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid amount: {}", self.0)
    }
}

impl std::error::Error for AmountError {}

/// Parse a decimal or 0x-prefixed hex integer string
pub fn parse_amount(s: &str) -> Result<u128, AmountError> {
    let s = s.trim();
    if let Some(hex_part) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex_part.is_empty() {
            return Ok(0);
        }
        return u128::from_str_radix(hex_part, 16).map_err(|e| AmountError(format!("{}: {}", s, e)));
    }
    s.parse::<u128>().map_err(|e| AmountError(format!("{}: {}", s, e)))
}

/// Parse a human amount ("1.5") into smallest units with `decimals` places
pub fn parse_units(s: &str, decimals: u32) -> Result<u128, AmountError> {
    let s = s.trim();
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if frac.len() > decimals as usize {
        return Err(AmountError(format!("{} has more than {} decimals", s, decimals)));
    }
    let scale = 10u128
        .checked_pow(decimals)
        .ok_or_else(|| AmountError(format!("decimals {} too large", decimals)))?;
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| AmountError(s.to_string()))?
    };
    let mut frac_padded = frac.to_string();
    while frac_padded.len() < decimals as usize {
        frac_padded.push('0');
    }
    let frac: u128 = if frac_padded.is_empty() {
        0
    } else {
        frac_padded.parse().map_err(|_| AmountError(s.to_string()))?
    };
    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(|| AmountError(format!("{} overflows", s)))
}

/// Format smallest units with `decimals` places, trimming trailing zeros
pub fn format_units(amount: u128, decimals: u32) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let scale = 10u128.pow(decimals);
    let whole = amount / scale;
    let frac = amount % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac_str = format!("{:0width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac_str.trim_end_matches('0'))
}

/// Left-pad a u128 into a big-endian 32-byte word
pub fn to_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Read a u128 from a big-endian 32-byte word; None if it does not fit
pub fn from_word(word: &[u8; 32]) -> Option<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&word[16..]);
    Some(u128::from_be_bytes(buf))
}

/// Serde adapter: u128 <-> decimal string
pub mod dec {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        // Binary formats have no self-description; the value is always a string there
        if !d.is_human_readable() {
            let s = String::deserialize(d)?;
            return super::parse_amount(&s).map_err(de::Error::custom);
        }
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            Num(u64),
        }
        match Repr::deserialize(d)? {
            Repr::Str(s) => super::parse_amount(&s).map_err(de::Error::custom),
            Repr::Num(n) => Ok(n as u128),
        }
    }
}

/// Serde adapter: u64 <-> decimal string (Move JSON renders u64 as strings)
pub mod dec64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        if !d.is_human_readable() {
            let s = String::deserialize(d)?;
            return s.trim().parse::<u64>().map_err(de::Error::custom);
        }
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            Num(u64),
        }
        match Repr::deserialize(d)? {
            Repr::Str(s) => s.trim().parse::<u64>().map_err(de::Error::custom),
            Repr::Num(n) => Ok(n),
        }
    }
}

/// Serde adapter: [u8; 32] <-> 0x-prefixed hex
pub mod hex32 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let raw = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(raw).map_err(de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| de::Error::custom("expected 32 bytes"))
    }
}

/// Serde adapter: Vec<u8> <-> 0x-prefixed hex
pub mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        let raw = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(raw).map_err(de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("100").unwrap(), 100);
        assert_eq!(parse_amount("0x64").unwrap(), 100);
        assert!(parse_amount("-1").is_err());
        assert!(parse_amount("abc").is_err());
    }

    #[test]
    fn test_parse_and_format_units() {
        assert_eq!(parse_units("100", 6).unwrap(), 100_000_000);
        assert_eq!(parse_units("0.001", 18).unwrap(), 1_000_000_000_000_000);
        assert_eq!(parse_units("1.5", 6).unwrap(), 1_500_000);
        assert!(parse_units("1.1234567", 6).is_err());

        assert_eq!(format_units(1_500_000, 6), "1.5");
        assert_eq!(format_units(100_000_000, 6), "100");
        assert_eq!(format_units(42, 0), "42");
    }

    #[test]
    fn test_word_fit() {
        let word = to_word(u128::MAX);
        assert_eq!(from_word(&word), Some(u128::MAX));

        let mut too_big = [0u8; 32];
        too_big[15] = 1;
        assert_eq!(from_word(&too_big), None);
    }

    #[test]
    fn test_dec_serde() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Wrapper {
            #[serde(with = "dec")]
            value: u128,
        }

        let json = serde_json::to_string(&Wrapper { value: 340282366920938463463374607431768211455 }).unwrap();
        assert_eq!(json, r#"{"value":"340282366920938463463374607431768211455"}"#);

        let parsed: Wrapper = serde_json::from_str(r#"{"value":7}"#).unwrap();
        assert_eq!(parsed.value, 7);
    }
}
