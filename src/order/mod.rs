// =============================================================================
// CROSSFILL - Cross-Chain Orders
// =============================================================================
//
// A maker's signed intent: give `making_amount` of `maker_asset` on the
// source chain, receive at least `taking_amount` of `taker_asset` on the
// destination chain, unlocked by the secret behind `hash_lock`.
//
// The order hash is the EIP-712 digest of the limit-order struct. Everything
// the limit-order struct does not carry (hash-lock, time-locks, deposits,
// destination chain, auction, whitelist) is bound through the escrow
// extension, whose keccak fills the low 160 bits of the salt.
//
// Single fill only: an order that allows partial or multiple fills is
// rejected at validation.
//
// =============================================================================

pub mod auction;
pub mod registry;
pub mod signature;

pub use auction::{AuctionDetails, AuctionPoint};
pub use registry::{OrderFilter, OrderPage, OrderRegistry, OrderStatus, SledOrderRegistry, StoredOrder};
pub use signature::{OrderSignature, TakerTraits};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::Address;
use crate::amount;
use crate::hashlock::{keccak256, HashLock};
use crate::timelocks::{TimeLockError, TimeLocks};
use crate::{MAX_NONCE, MIN_SAFETY_DEPOSIT, RATE_BUMP_DENOMINATOR};

// =============================================================================
// Constants
// =============================================================================

/// EIP-712 domain of the settlement contract
pub const DOMAIN_NAME: &str = "1inch Aggregation Router";
pub const DOMAIN_VERSION: &str = "6";

const ORDER_TYPE: &str = "Order(uint256 salt,address maker,address receiver,address makerAsset,address takerAsset,uint256 makingAmount,uint256 takingAmount,uint256 makerTraits)";
const DOMAIN_TYPE: &str = "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

/// Maker traits flag bits
const NO_PARTIAL_FILLS_FLAG: usize = 255;
const ALLOW_MULTIPLE_FILLS_FLAG: usize = 254;
const POST_INTERACTION_CALL_FLAG: usize = 251;
const HAS_EXTENSION_FLAG: usize = 249;

/// Maker traits field offsets
const EXPIRATION_OFFSET: usize = 80;
const NONCE_OFFSET: usize = 120;

// =============================================================================
// Errors
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderError {
    InvalidAmount(String),
    InvalidTimeLocks(TimeLockError),
    InvalidSafetyDeposit(String),
    InvalidWhitelist(String),
    InvalidAuction(String),
    InvalidFillFlags,
    InvalidNonce(u64),
    NotWhitelisted { resolver: Address, reason: String },
    OrderExpired { expiration: u64, now: u64 },
    PartialFillUnsupported { fill_amount: u128, making_amount: u128 },
    BadSignature(String),
    Overflow,
}

impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderError::InvalidAmount(s) => write!(f, "Invalid amount: {}", s),
            OrderError::InvalidTimeLocks(e) => write!(f, "Invalid time-locks: {}", e),
            OrderError::InvalidSafetyDeposit(s) => write!(f, "Invalid safety deposit: {}", s),
            OrderError::InvalidWhitelist(s) => write!(f, "Invalid whitelist: {}", s),
            OrderError::InvalidAuction(s) => write!(f, "Invalid auction: {}", s),
            OrderError::InvalidFillFlags => {
                write!(f, "Partial and multiple fills are not supported")
            }
            OrderError::InvalidNonce(n) => write!(f, "Nonce {} exceeds 40 bits", n),
            OrderError::NotWhitelisted { resolver, reason } => {
                write!(f, "Resolver {} not whitelisted: {}", resolver, reason)
            }
            OrderError::OrderExpired { expiration, now } => {
                write!(f, "Order expired at {} (now {})", expiration, now)
            }
            OrderError::PartialFillUnsupported { fill_amount, making_amount } => write!(
                f,
                "Partial fill {} of {} not supported",
                fill_amount, making_amount
            ),
            OrderError::BadSignature(s) => write!(f, "Bad signature: {}", s),
            OrderError::Overflow => write!(f, "Amount arithmetic overflow"),
        }
    }
}

impl std::error::Error for OrderError {}

impl From<TimeLockError> for OrderError {
    fn from(e: TimeLockError) -> Self {
        OrderError::InvalidTimeLocks(e)
    }
}

// =============================================================================
// Order Hash
// =============================================================================

/// Content-addressed order identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderHash(pub [u8; 32]);

impl OrderHash {
    pub fn from_hex(s: &str) -> Result<Self, String> {
        let raw = s.trim();
        let raw = raw.strip_prefix("0x").unwrap_or(raw);
        let bytes = hex::decode(raw).map_err(|e| format!("bad order hash: {}", e))?;
        bytes
            .try_into()
            .map(OrderHash)
            .map_err(|_| "order hash must be 32 bytes".to_string())
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for OrderHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for OrderHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderHash({})", self.short())
    }
}

impl Serialize for OrderHash {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for OrderHash {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        OrderHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Order
// =============================================================================

/// Resolver allowed to fill, and how long after auction start it must wait
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub resolver: Address,
    /// Seconds after auction start
    #[serde(default)]
    pub allow_from: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub maker: Address,
    /// Maker's address on the destination chain
    #[serde(default)]
    pub receiver: Option<Address>,
    pub maker_asset: Address,
    pub taker_asset: Address,
    #[serde(with = "amount::dec")]
    pub making_amount: u128,
    #[serde(with = "amount::dec")]
    pub taking_amount: u128,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub hash_lock: HashLock,
    pub time_locks: TimeLocks,
    #[serde(with = "amount::dec")]
    pub src_safety_deposit: u128,
    #[serde(with = "amount::dec")]
    pub dst_safety_deposit: u128,
    pub auction: AuctionDetails,
    pub whitelist: Vec<WhitelistEntry>,
    #[serde(default)]
    pub allow_partial_fills: bool,
    #[serde(default)]
    pub allow_multiple_fills: bool,
    pub nonce: u64,
    /// Random high bits of the salt word
    pub salt: u64,
    /// Unix seconds; 0 = never
    #[serde(default)]
    pub expiration: u64,
    /// Settlement contract on the source chain
    pub verifying_contract: Address,
}

impl Order {
    /// Maker's destination-chain address (receiver, falling back to maker)
    pub fn dst_receiver(&self) -> Address {
        self.receiver.unwrap_or(self.maker)
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    /// Reject malformed orders before anything touches a chain
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.making_amount == 0 {
            return Err(OrderError::InvalidAmount("making amount is zero".into()));
        }
        if self.taking_amount == 0 {
            return Err(OrderError::InvalidAmount("taking amount is zero".into()));
        }

        self.time_locks.validate()?;

        if self.src_safety_deposit < MIN_SAFETY_DEPOSIT {
            return Err(OrderError::InvalidSafetyDeposit(format!(
                "source deposit {} below minimum {}",
                self.src_safety_deposit, MIN_SAFETY_DEPOSIT
            )));
        }
        if self.dst_safety_deposit < MIN_SAFETY_DEPOSIT {
            return Err(OrderError::InvalidSafetyDeposit(format!(
                "destination deposit {} below minimum {}",
                self.dst_safety_deposit, MIN_SAFETY_DEPOSIT
            )));
        }

        if self.whitelist.is_empty() {
            return Err(OrderError::InvalidWhitelist("no resolvers".into()));
        }
        if self.whitelist.len() > u8::MAX as usize {
            return Err(OrderError::InvalidWhitelist("too many resolvers".into()));
        }

        if self.auction.duration == 0 {
            return Err(OrderError::InvalidAuction("zero duration".into()));
        }
        if !self.auction.points_within_duration() {
            return Err(OrderError::InvalidAuction("points exceed duration".into()));
        }

        if self.allow_partial_fills || self.allow_multiple_fills {
            return Err(OrderError::InvalidFillFlags);
        }
        if self.nonce > MAX_NONCE {
            return Err(OrderError::InvalidNonce(self.nonce));
        }
        if self.expiration > (1u64 << 40) - 1 {
            return Err(OrderError::InvalidAuction("expiration exceeds 40 bits".into()));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Pricing
    // -------------------------------------------------------------------------

    /// Taking amount owed for `fill_amount` at chain time `t`, rounded up
    pub fn taking_amount_at(&self, fill_amount: u128, t: u64) -> Result<u128, OrderError> {
        let base = mul_div_ceil(self.taking_amount, fill_amount, self.making_amount)?;
        let bump = self.auction.rate_bump(t) as u128;
        mul_div_ceil(base, RATE_BUMP_DENOMINATOR + bump, RATE_BUMP_DENOMINATOR)
    }

    /// May `resolver` fill `fill_amount` at chain time `t`?
    pub fn check_fill(&self, resolver: &Address, fill_amount: u128, t: u64) -> Result<(), OrderError> {
        let entry = self
            .whitelist
            .iter()
            .find(|e| e.resolver == *resolver)
            .ok_or_else(|| OrderError::NotWhitelisted {
                resolver: *resolver,
                reason: "not on the whitelist".into(),
            })?;

        let allowed_at = self.auction.start_time.saturating_add(entry.allow_from as u64);
        if t < allowed_at {
            return Err(OrderError::NotWhitelisted {
                resolver: *resolver,
                reason: format!("allowed from {}", allowed_at),
            });
        }

        if self.expiration != 0 && t >= self.expiration {
            return Err(OrderError::OrderExpired { expiration: self.expiration, now: t });
        }

        if fill_amount != self.making_amount {
            return Err(OrderError::PartialFillUnsupported {
                fill_amount,
                making_amount: self.making_amount,
            });
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Hashing
    // -------------------------------------------------------------------------

    /// Canonical escrow extension: every cross-chain parameter the
    /// limit-order struct does not carry
    pub fn escrow_extension(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&self.hash_lock.0);
        out.extend_from_slice(&amount::to_word(self.dst_chain_id as u128));
        out.extend_from_slice(&self.taker_asset.to_word());
        out.extend_from_slice(&self.src_safety_deposit.to_be_bytes());
        out.extend_from_slice(&self.dst_safety_deposit.to_be_bytes());
        // Offsets only; deployed_at is zero until deployment
        out.extend_from_slice(&pack_offsets(&self.time_locks.with_deployed_at(0)));
        out.extend_from_slice(&self.dst_receiver().to_word());
        out.extend_from_slice(&self.auction.encode());
        out.push(self.whitelist.len().min(u8::MAX as usize) as u8);
        for entry in self.whitelist.iter().take(u8::MAX as usize) {
            let bytes = entry.resolver.as_bytes();
            out.push(bytes.len() as u8);
            out.extend_from_slice(bytes);
            out.extend_from_slice(&entry.allow_from.to_be_bytes());
        }
        out
    }

    /// Salt word: random high bits, extension hash in the low 160 bits
    pub fn salt_word(&self) -> [u8; 32] {
        let ext_hash = keccak256(&self.escrow_extension());
        let mut word = [0u8; 32];
        word[4..12].copy_from_slice(&self.salt.to_be_bytes());
        word[12..].copy_from_slice(&ext_hash[12..]);
        word
    }

    /// Packed maker traits word
    pub fn maker_traits(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        if !self.allow_partial_fills {
            set_bit(&mut word, NO_PARTIAL_FILLS_FLAG);
        }
        if self.allow_multiple_fills {
            set_bit(&mut word, ALLOW_MULTIPLE_FILLS_FLAG);
        }
        set_bit(&mut word, POST_INTERACTION_CALL_FLAG);
        set_bit(&mut word, HAS_EXTENSION_FLAG);
        put_field(&mut word, EXPIRATION_OFFSET, 40, self.expiration);
        put_field(&mut word, NONCE_OFFSET, 40, self.nonce);
        word
    }

    /// EIP-712 hash of the limit-order struct
    pub fn struct_hash(&self) -> [u8; 32] {
        let receiver = match self.receiver {
            Some(r @ Address::Evm(_)) => r.to_word(),
            _ => [0u8; 32],
        };
        let mut buf = Vec::with_capacity(32 * 9);
        buf.extend_from_slice(&keccak256(ORDER_TYPE.as_bytes()));
        buf.extend_from_slice(&self.salt_word());
        buf.extend_from_slice(&self.maker.to_word());
        buf.extend_from_slice(&receiver);
        buf.extend_from_slice(&self.maker_asset.to_word());
        buf.extend_from_slice(&self.taker_asset.to_word());
        buf.extend_from_slice(&amount::to_word(self.making_amount));
        buf.extend_from_slice(&amount::to_word(self.taking_amount));
        buf.extend_from_slice(&self.maker_traits());
        keccak256(&buf)
    }

    /// EIP-712 domain separator for the source chain's settlement contract
    pub fn domain_separator(&self) -> [u8; 32] {
        let mut buf = Vec::with_capacity(32 * 5);
        buf.extend_from_slice(&keccak256(DOMAIN_TYPE.as_bytes()));
        buf.extend_from_slice(&keccak256(DOMAIN_NAME.as_bytes()));
        buf.extend_from_slice(&keccak256(DOMAIN_VERSION.as_bytes()));
        buf.extend_from_slice(&amount::to_word(self.src_chain_id as u128));
        buf.extend_from_slice(&self.verifying_contract.to_word());
        keccak256(&buf)
    }

    /// Content-addressed order hash
    pub fn order_hash(&self) -> OrderHash {
        let mut buf = Vec::with_capacity(66);
        buf.extend_from_slice(&[0x19, 0x01]);
        buf.extend_from_slice(&self.domain_separator());
        buf.extend_from_slice(&self.struct_hash());
        OrderHash(keccak256(&buf))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn pack_offsets(tl: &TimeLocks) -> [u8; 32] {
    // deployed_at is zero here, so packing cannot overflow
    tl.pack().unwrap_or([0u8; 32])
}

fn set_bit(word: &mut [u8; 32], bit: usize) {
    word[31 - bit / 8] |= 1 << (bit % 8);
}

fn put_field(word: &mut [u8; 32], offset: usize, width: usize, value: u64) {
    for i in 0..width {
        if value >> i & 1 == 1 {
            set_bit(word, offset + i);
        }
    }
}

/// ceil(a * b / d) with overflow reported
pub fn mul_div_ceil(a: u128, b: u128, d: u128) -> Result<u128, OrderError> {
    if d == 0 {
        return Err(OrderError::InvalidAmount("division by zero".into()));
    }
    let product = a.checked_mul(b).ok_or(OrderError::Overflow)?;
    Ok(product / d + u128::from(product % d != 0))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::hashlock::Secret;

    pub(crate) fn resolver_addr() -> Address {
        Address::Evm([0xaa; 20])
    }

    pub(crate) fn sample_order() -> Order {
        Order {
            maker: Address::Evm([0x11; 20]),
            receiver: Some(Address::Object([0x22; 32])),
            maker_asset: Address::Evm([0x33; 20]),
            taker_asset: Address::Object([0x44; 32]),
            making_amount: 100_000_000,
            taking_amount: 1_000_000,
            src_chain_id: 1,
            dst_chain_id: 101,
            hash_lock: HashLock::commit(&Secret([7u8; 32])),
            time_locks: TimeLocks::default(),
            src_safety_deposit: 1_000,
            dst_safety_deposit: 1_000,
            auction: AuctionDetails::flat(1_000, 120),
            whitelist: vec![WhitelistEntry { resolver: resolver_addr(), allow_from: 0 }],
            allow_partial_fills: false,
            allow_multiple_fills: false,
            nonce: 1,
            salt: 42,
            expiration: 10_000,
            verifying_contract: Address::Evm([0x55; 20]),
        }
    }

    #[test]
    fn test_sample_validates() {
        assert!(sample_order().validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut o = sample_order();
        o.making_amount = 0;
        assert!(matches!(o.validate(), Err(OrderError::InvalidAmount(_))));

        let mut o = sample_order();
        o.allow_partial_fills = true;
        assert_eq!(o.validate(), Err(OrderError::InvalidFillFlags));

        let mut o = sample_order();
        o.allow_multiple_fills = true;
        assert_eq!(o.validate(), Err(OrderError::InvalidFillFlags));

        let mut o = sample_order();
        o.whitelist.clear();
        assert!(matches!(o.validate(), Err(OrderError::InvalidWhitelist(_))));

        let mut o = sample_order();
        o.dst_safety_deposit = 0;
        assert!(matches!(o.validate(), Err(OrderError::InvalidSafetyDeposit(_))));

        let mut o = sample_order();
        o.nonce = MAX_NONCE + 1;
        assert_eq!(o.validate(), Err(OrderError::InvalidNonce(MAX_NONCE + 1)));

        let mut o = sample_order();
        o.time_locks.src_cancellation = o.time_locks.src_public_withdrawal;
        assert!(matches!(o.validate(), Err(OrderError::InvalidTimeLocks(_))));
    }

    #[test]
    fn test_order_hash_deterministic() {
        let o = sample_order();
        assert_eq!(o.order_hash(), o.clone().order_hash());
    }

    #[test]
    fn test_order_hash_binds_cross_chain_fields() {
        let base = sample_order().order_hash();

        let mut o = sample_order();
        o.hash_lock = HashLock::commit(&Secret([8u8; 32]));
        assert_ne!(o.order_hash(), base);

        let mut o = sample_order();
        o.time_locks.dst_withdrawal += 1;
        assert_ne!(o.order_hash(), base);

        let mut o = sample_order();
        o.dst_chain_id = 102;
        assert_ne!(o.order_hash(), base);

        let mut o = sample_order();
        o.src_chain_id = 2;
        assert_ne!(o.order_hash(), base);

        let mut o = sample_order();
        o.whitelist[0].allow_from = 5;
        assert_ne!(o.order_hash(), base);
    }

    #[test]
    fn test_maker_traits_layout() {
        let o = sample_order();
        let traits = o.maker_traits();
        // No-partial-fills flag (bit 255)
        assert_eq!(traits[0] & 0x80, 0x80);
        // Allow-multiple flag (bit 254) unset
        assert_eq!(traits[0] & 0x40, 0);
        // Nonce = 1 at bit 120
        assert_eq!(traits[31 - 15] & 1, 1);
    }

    #[test]
    fn test_taking_amount_with_bump() {
        let mut o = sample_order();
        o.auction.initial_rate_bump = 1_000_000; // +10 %
        assert_eq!(o.taking_amount_at(o.making_amount, 0).unwrap(), 1_100_000);
        assert_eq!(o.taking_amount_at(o.making_amount, 2_000).unwrap(), 1_000_000);
    }

    #[test]
    fn test_taking_amount_rounds_up() {
        let mut o = sample_order();
        o.making_amount = 3;
        o.taking_amount = 1;
        assert_eq!(o.taking_amount_at(1, 2_000).unwrap(), 1);
        assert_eq!(mul_div_ceil(1, 1, 3).unwrap(), 1);
        assert_eq!(mul_div_ceil(3, 1, 3).unwrap(), 1);
        assert_eq!(mul_div_ceil(u128::MAX, 2, 1), Err(OrderError::Overflow));
    }

    #[test]
    fn test_check_fill() {
        let o = sample_order();
        let r = resolver_addr();
        assert!(o.check_fill(&r, o.making_amount, 1_000).is_ok());

        let stranger = Address::Evm([0xbb; 20]);
        assert!(matches!(
            o.check_fill(&stranger, o.making_amount, 1_000),
            Err(OrderError::NotWhitelisted { .. })
        ));

        assert!(matches!(
            o.check_fill(&r, o.making_amount, 10_000),
            Err(OrderError::OrderExpired { .. })
        ));

        assert!(matches!(
            o.check_fill(&r, o.making_amount / 2, 1_000),
            Err(OrderError::PartialFillUnsupported { .. })
        ));
    }

    #[test]
    fn test_check_fill_respects_allow_from() {
        let mut o = sample_order();
        o.whitelist[0].allow_from = 30;
        let r = resolver_addr();
        assert!(matches!(
            o.check_fill(&r, o.making_amount, 1_029),
            Err(OrderError::NotWhitelisted { .. })
        ));
        assert!(o.check_fill(&r, o.making_amount, 1_030).is_ok());
    }

    #[test]
    fn test_order_json() {
        let o = sample_order();
        let json = serde_json::to_string(&o).unwrap();
        assert!(json.contains("\"making_amount\":\"100000000\""));
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(back, o);
    }
}
