// =============================================================================
// CROSSFILL - Order Signatures and Taker Traits
// =============================================================================

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

use super::{Order, OrderError, OrderHash};
use crate::address::Address;
use crate::amount;

// =============================================================================
// Order Signature
// =============================================================================

/// 65-byte `r || s || v` secp256k1 signature over the order hash
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSignature {
    #[serde(with = "amount::hex32")]
    pub r: [u8; 32],
    #[serde(with = "amount::hex32")]
    pub s: [u8; 32],
    /// 27 or 28
    pub v: u8,
}

impl OrderSignature {
    /// Sign an order hash (maker side, used by local tooling)
    pub fn sign(order_hash: &OrderHash, key: &SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let msg = Message::from_digest(order_hash.0);
        let sig = secp.sign_ecdsa_recoverable(&msg, key);
        let (rec_id, compact) = sig.serialize_compact();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[..32]);
        s.copy_from_slice(&compact[32..]);
        OrderSignature { r, s, v: 27 + rec_id.to_i32() as u8 }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OrderError> {
        if bytes.len() != 65 {
            return Err(OrderError::BadSignature(format!(
                "expected 65 bytes, got {}",
                bytes.len()
            )));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        let v = match bytes[64] {
            0 | 1 => bytes[64] + 27,
            v => v,
        };
        Ok(OrderSignature { r, s, v })
    }

    pub fn from_hex(s: &str) -> Result<Self, OrderError> {
        let raw = s.trim();
        let raw = raw.strip_prefix("0x").unwrap_or(raw);
        let bytes = hex::decode(raw).map_err(|e| OrderError::BadSignature(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    /// EIP-2098 compact form `(r, vs)`: parity folded into the top bit of s
    pub fn to_compact(&self) -> ([u8; 32], [u8; 32]) {
        let mut vs = self.s;
        if self.v == 28 {
            vs[0] |= 0x80;
        }
        (self.r, vs)
    }

    /// Recover the EVM address that signed `digest`
    pub fn recover(&self, digest: &[u8; 32]) -> Result<Address, OrderError> {
        let rec_id = match self.v {
            27 | 28 => RecoveryId::from_i32((self.v - 27) as i32),
            v => return Err(OrderError::BadSignature(format!("invalid v {}", v))),
        }
        .map_err(|e| OrderError::BadSignature(e.to_string()))?;

        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&self.r);
        compact[32..].copy_from_slice(&self.s);
        let sig = RecoverableSignature::from_compact(&compact, rec_id)
            .map_err(|e| OrderError::BadSignature(e.to_string()))?;

        let secp = Secp256k1::verification_only();
        let pubkey = secp
            .recover_ecdsa(&Message::from_digest(*digest), &sig)
            .map_err(|e| OrderError::BadSignature(e.to_string()))?;
        Ok(Address::from_public_key(&pubkey))
    }

    /// Check the maker signed this order. Non-EVM makers sign with their
    /// own scheme; the settlement contract checks those on-chain.
    pub fn verify(&self, order: &Order) -> Result<(), OrderError> {
        if !order.maker.is_evm() {
            return Ok(());
        }
        let signer = self.recover(&order.order_hash().0)?;
        if signer != order.maker {
            return Err(OrderError::BadSignature(format!(
                "signed by {}, maker is {}",
                signer, order.maker
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Taker Traits
// =============================================================================

const MAKER_AMOUNT_FLAG_BYTE: usize = 0;
const MAKER_AMOUNT_FLAG_MASK: u8 = 0x80;
/// Extension length occupies bits 224..248
const EXTENSION_LEN_BYTES: std::ops::Range<usize> = 1..4;
const MAX_EXTENSION_LEN: u32 = (1 << 24) - 1;

/// Fill-call options packed into one 256-bit word
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakerTraits {
    /// `amount` is the making amount (true) or the taking amount (false)
    pub maker_amount: bool,
    /// Max taking amount (maker mode) or min making amount (taker mode)
    #[serde(with = "amount::dec")]
    pub threshold: u128,
    /// Byte length of the extension passed in the fill args
    pub extension_len: u32,
}

impl TakerTraits {
    /// Fill by making amount, capped at `threshold` taking tokens
    pub fn by_making_amount(threshold: u128, extension_len: usize) -> Result<Self, OrderError> {
        let extension_len = u32::try_from(extension_len)
            .ok()
            .filter(|l| *l <= MAX_EXTENSION_LEN)
            .ok_or_else(|| OrderError::InvalidAmount("extension too long".into()))?;
        Ok(TakerTraits { maker_amount: true, threshold, extension_len })
    }

    pub fn encode(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        if self.maker_amount {
            word[MAKER_AMOUNT_FLAG_BYTE] |= MAKER_AMOUNT_FLAG_MASK;
        }
        let len = (self.extension_len & MAX_EXTENSION_LEN).to_be_bytes();
        word[EXTENSION_LEN_BYTES].copy_from_slice(&len[1..]);
        word[16..].copy_from_slice(&self.threshold.to_be_bytes());
        word
    }

    pub fn decode(word: &[u8; 32]) -> Self {
        let mut len = [0u8; 4];
        len[1..].copy_from_slice(&word[EXTENSION_LEN_BYTES]);
        let mut threshold = [0u8; 16];
        threshold.copy_from_slice(&word[16..]);
        TakerTraits {
            maker_amount: word[MAKER_AMOUNT_FLAG_BYTE] & MAKER_AMOUNT_FLAG_MASK != 0,
            threshold: u128::from_be_bytes(threshold),
            extension_len: u32::from_be_bytes(len),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::tests::sample_order;

    fn maker_key() -> (SecretKey, Address) {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let pk = secp256k1::PublicKey::from_secret_key(&secp, &sk);
        (sk, Address::from_public_key(&pk))
    }

    #[test]
    fn test_sign_and_verify() {
        let (sk, maker) = maker_key();
        let mut order = sample_order();
        order.maker = maker;

        let sig = OrderSignature::sign(&order.order_hash(), &sk);
        assert!(sig.v == 27 || sig.v == 28);
        assert!(sig.verify(&order).is_ok());
    }

    #[test]
    fn test_verify_rejects_other_maker() {
        let (sk, _) = maker_key();
        let order = sample_order();
        let sig = OrderSignature::sign(&order.order_hash(), &sk);
        assert!(matches!(sig.verify(&order), Err(OrderError::BadSignature(_))));
    }

    #[test]
    fn test_verify_rejects_tampered_order() {
        let (sk, maker) = maker_key();
        let mut order = sample_order();
        order.maker = maker;
        let sig = OrderSignature::sign(&order.order_hash(), &sk);

        order.taking_amount += 1;
        assert!(sig.verify(&order).is_err());
    }

    #[test]
    fn test_object_maker_passthrough() {
        let mut order = sample_order();
        order.maker = Address::Object([9; 32]);
        let sig = OrderSignature { r: [0; 32], s: [0; 32], v: 27 };
        assert!(sig.verify(&order).is_ok());
    }

    #[test]
    fn test_bytes_and_compact() {
        let (sk, _) = maker_key();
        let sig = OrderSignature::sign(&sample_order().order_hash(), &sk);
        let parsed = OrderSignature::from_hex(&sig.to_hex()).unwrap();
        assert_eq!(parsed, sig);

        let (r, vs) = sig.to_compact();
        assert_eq!(r, sig.r);
        assert_eq!(vs[0] & 0x80 != 0, sig.v == 28);
        assert_eq!(vs[1..], sig.s[1..]);

        assert!(OrderSignature::from_bytes(&[0u8; 64]).is_err());
    }

    #[test]
    fn test_taker_traits_layout() {
        let traits = TakerTraits::by_making_amount(1_100_000, 300).unwrap();
        let word = traits.encode();
        assert_eq!(word[0], 0x80);
        assert_eq!(&word[1..4], &[0, 1, 44]);
        assert_eq!(TakerTraits::decode(&word), traits);

        assert!(TakerTraits::by_making_amount(1, 1 << 24).is_err());
    }
}
