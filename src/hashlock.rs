// =============================================================================
// CROSSFILL - Secret / Hash-Lock
// =============================================================================
//
// The maker commits to H(secret) when signing the order. Both escrows are
// locked under the same hash; revealing the secret unlocks both.
//
// H is keccak256, the hash the escrow contracts check on withdrawal.
//
// =============================================================================

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;

use crate::{HASH_SIZE, SECRET_SIZE};

/// keccak256 of arbitrary bytes
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

fn parse_hex32(s: &str) -> Result<[u8; 32], String> {
    let raw = s.trim();
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(raw).map_err(|e| format!("bad hex: {}", e))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))
}

// =============================================================================
// Secret
// =============================================================================

/// 32-byte preimage
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Secret(pub [u8; SECRET_SIZE]);

impl Secret {
    /// Fresh uniformly random secret
    pub fn generate() -> Self {
        Secret(rand::random())
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        parse_hex32(s).map(Secret)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.0
    }
}

// Secrets stay out of logs
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(..)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Secret::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Hash-Lock
// =============================================================================

/// keccak256(secret)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashLock(pub [u8; HASH_SIZE]);

impl HashLock {
    /// Commit to a secret
    pub fn commit(secret: &Secret) -> Self {
        HashLock(keccak256(&secret.0))
    }

    /// Does the secret open this lock?
    pub fn verify(&self, secret: &Secret) -> bool {
        HashLock::commit(secret) == *self
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        parse_hex32(s).map(HashLock)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for HashLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for HashLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashLock({})", self.short())
    }
}

impl Serialize for HashLock {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for HashLock {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        HashLock::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_generation() {
        let a = Secret::generate();
        let b = Secret::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_commit_verify() {
        for _ in 0..32 {
            let secret = Secret::generate();
            let lock = HashLock::commit(&secret);
            assert!(lock.verify(&secret));
            assert_eq!(lock, HashLock::commit(&secret));

            let other = Secret::generate();
            assert!(!lock.verify(&other));
        }
    }

    #[test]
    fn test_keccak_known_vector() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_hex_roundtrip() {
        let secret = Secret::generate();
        assert_eq!(Secret::from_hex(&secret.to_hex()).unwrap(), secret);
        assert!(Secret::from_hex("0x1234").is_err());
        assert_eq!(format!("{:?}", secret), "Secret(..)");
    }
}
