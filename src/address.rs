// =============================================================================
// CROSSFILL - Chain Addresses
// =============================================================================
//
// Two address shapes cross the wire:
// - EVM accounts and contracts (20 bytes)
// - Move object ids, accounts and packages (32 bytes)
//
// Both are parsed from 0x-prefixed hex. A 40-digit string is an EVM
// address; anything else up to 64 digits is a Move address, left-padded.
//
// =============================================================================

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::hashlock::keccak256;

/// Error parsing an address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressError(pub String);

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid address: {}", self.0)
    }
}

impl std::error::Error for AddressError {}

/// Chain-qualified account, contract, token or object address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Address {
    /// 20-byte EVM address
    Evm([u8; 20]),
    /// 32-byte Move address / object id
    Object([u8; 32]),
}

impl Address {
    /// The all-zero EVM address (native coin on EVM chains)
    pub const ZERO_EVM: Address = Address::Evm([0u8; 20]);

    /// Parse from hex, choosing the shape by length
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let raw = s.trim();
        let digits = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .ok_or_else(|| AddressError(format!("{} (missing 0x prefix)", raw)))?;

        if digits.is_empty() || digits.len() > 64 {
            return Err(AddressError(format!("{} (bad length)", raw)));
        }

        if digits.len() == 40 {
            let bytes = hex::decode(digits).map_err(|e| AddressError(format!("{}: {}", raw, e)))?;
            let mut out = [0u8; 20];
            out.copy_from_slice(&bytes);
            return Ok(Address::Evm(out));
        }

        let padded = format!("{:0>64}", digits);
        let bytes = hex::decode(&padded).map_err(|e| AddressError(format!("{}: {}", raw, e)))?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Address::Object(out))
    }

    /// Parse strictly as an EVM address
    pub fn parse_evm(s: &str) -> Result<Self, AddressError> {
        match Self::parse(s)? {
            a @ Address::Evm(_) => Ok(a),
            Address::Object(_) => Err(AddressError(format!("{} is not an EVM address", s))),
        }
    }

    /// Derive the EVM address of an uncompressed secp256k1 public key
    pub fn from_public_key(pubkey: &secp256k1::PublicKey) -> Self {
        let uncompressed = pubkey.serialize_uncompressed();
        let hash = keccak256(&uncompressed[1..]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&hash[12..]);
        Address::Evm(out)
    }

    /// Random Move address (object ids in the simulator)
    pub fn random_object() -> Self {
        Address::Object(rand::random())
    }

    /// Random EVM address
    pub fn random_evm() -> Self {
        Address::Evm(rand::random())
    }

    pub fn is_evm(&self) -> bool {
        matches!(self, Address::Evm(_))
    }

    /// Raw bytes (20 or 32)
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Address::Evm(b) => b,
            Address::Object(b) => b,
        }
    }

    /// Left-padded 32-byte word (ABI `address` encoding)
    pub fn to_word(&self) -> [u8; 32] {
        match self {
            Address::Evm(b) => {
                let mut word = [0u8; 32];
                word[12..].copy_from_slice(b);
                word
            }
            Address::Object(b) => *b,
        }
    }

    /// Read an EVM address out of an ABI word; None if the padding is dirty
    pub fn from_evm_word(word: &[u8; 32]) -> Option<Self> {
        if word[..12].iter().any(|b| *b != 0) {
            return None;
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&word[12..]);
        Some(Address::Evm(out))
    }

    /// 0x-prefixed lowercase hex
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.as_bytes()))
    }

    /// Short display
    pub fn short(&self) -> String {
        let h = hex::encode(self.as_bytes());
        format!("0x{}..{}", &h[..6], &h[h.len() - 4..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Evm(_) => write!(f, "Evm({})", self.to_hex()),
            Address::Object(_) => write!(f, "Object({})", self.to_hex()),
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shapes() {
        let evm = Address::parse("0x00000000000000000000000000000000000000aa").unwrap();
        assert!(evm.is_evm());
        assert_eq!(evm.as_bytes().len(), 20);

        let sui = Address::parse("0x2").unwrap();
        assert!(!sui.is_evm());
        assert_eq!(sui.as_bytes()[31], 2);

        assert!(Address::parse("1234").is_err());
        assert!(Address::parse("0xzz").is_err());
        assert!(Address::parse_evm("0x2").is_err());
    }

    #[test]
    fn test_word_padding() {
        let evm = Address::random_evm();
        let word = evm.to_word();
        assert_eq!(Address::from_evm_word(&word), Some(evm));

        let mut dirty = word;
        dirty[0] = 1;
        assert_eq!(Address::from_evm_word(&dirty), None);
    }

    #[test]
    fn test_serde_roundtrip_as_string() {
        let addr = Address::random_object();
        let json = serde_json::to_string(&addr).unwrap();
        assert!(json.starts_with("\"0x"));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_from_public_key() {
        // Private key 1 maps to a well-known address
        let secp = secp256k1::Secp256k1::new();
        let mut sk_bytes = [0u8; 32];
        sk_bytes[31] = 1;
        let sk = secp256k1::SecretKey::from_slice(&sk_bytes).unwrap();
        let pk = secp256k1::PublicKey::from_secret_key(&secp, &sk);
        assert_eq!(
            Address::from_public_key(&pk).to_hex(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }
}
