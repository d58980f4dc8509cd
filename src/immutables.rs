// =============================================================================
// CROSSFILL - Escrow Immutables
// =============================================================================
//
// The parameter set an escrow is created with and checked against on every
// call. Source and destination immutables of one swap share `order_hash`
// and `hash_lock`; everything else is per-leg.
//
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::amount;
use crate::hashlock::HashLock;
use crate::order::{Order, OrderHash};
use crate::timelocks::TimeLocks;

/// Escrow parameters, in the field order both chains use
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Immutables {
    pub order_hash: OrderHash,
    pub hash_lock: HashLock,
    pub maker: Address,
    pub taker: Address,
    pub token: Address,
    #[serde(with = "amount::dec")]
    pub amount: u128,
    #[serde(with = "amount::dec")]
    pub safety_deposit: u128,
    pub time_locks: TimeLocks,
}

/// Destination-side parameters emitted with the source creation event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DstComplement {
    /// Receiver of the destination funds
    pub maker: Address,
    #[serde(with = "amount::dec")]
    pub amount: u128,
    pub token: Address,
    #[serde(with = "amount::dec")]
    pub safety_deposit: u128,
}

impl Immutables {
    /// Source escrow parameters for filling `order` as `taker`
    pub fn for_source(order: &Order, taker: Address, fill_amount: u128, deployed_at: u64) -> Self {
        Immutables {
            order_hash: order.order_hash(),
            hash_lock: order.hash_lock,
            maker: order.maker,
            taker,
            token: order.maker_asset,
            amount: fill_amount,
            safety_deposit: order.src_safety_deposit,
            time_locks: order.time_locks.with_deployed_at(deployed_at),
        }
    }

    /// Destination escrow parameters matching this source escrow
    pub fn to_destination(&self, complement: &DstComplement, taker: Address, deployed_at: u64) -> Self {
        Immutables {
            order_hash: self.order_hash,
            hash_lock: self.hash_lock,
            maker: complement.maker,
            taker,
            token: complement.token,
            amount: complement.amount,
            safety_deposit: complement.safety_deposit,
            time_locks: self.time_locks.with_deployed_at(deployed_at),
        }
    }

    /// Both legs lock the same swap: same order hash, hash-lock and
    /// destination windows
    pub fn same_swap(&self, other: &Immutables) -> bool {
        self.order_hash == other.order_hash
            && self.hash_lock == other.hash_lock
            && self.time_locks.same_dst_offsets(&other.time_locks)
    }

    /// Destination fields match, ignoring source stages (object ledgers only
    /// record the destination windows)
    pub fn dst_fields_match(&self, other: &Immutables) -> bool {
        self.same_swap(other)
            && self.maker == other.maker
            && self.taker == other.taker
            && self.token == other.token
            && self.amount == other.amount
            && self.safety_deposit == other.safety_deposit
            && self.time_locks.deployed_at == other.time_locks.deployed_at
    }

    /// Absolute chain time at which the source escrow becomes cancellable
    pub fn src_cancellation_timestamp(&self) -> u64 {
        self.time_locks
            .deployed_at
            .saturating_add(self.time_locks.src_cancellation as u64)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::tests::{resolver_addr, sample_order};

    fn complement() -> DstComplement {
        DstComplement {
            maker: Address::Object([0x22; 32]),
            amount: 1_000_000,
            token: Address::Object([0x44; 32]),
            safety_deposit: 1_000,
        }
    }

    #[test]
    fn test_for_source() {
        let order = sample_order();
        let imm = Immutables::for_source(&order, resolver_addr(), order.making_amount, 5_000);
        assert_eq!(imm.order_hash, order.order_hash());
        assert_eq!(imm.hash_lock, order.hash_lock);
        assert_eq!(imm.maker, order.maker);
        assert_eq!(imm.token, order.maker_asset);
        assert_eq!(imm.time_locks.deployed_at, 5_000);
        assert_eq!(imm.src_cancellation_timestamp(), 5_121);
    }

    #[test]
    fn test_destination_shares_swap_identity() {
        let order = sample_order();
        let src = Immutables::for_source(&order, resolver_addr(), order.making_amount, 5_000);
        let taker = Address::Object([0xcc; 32]);
        let dst = src.to_destination(&complement(), taker, 5_010);

        assert!(src.same_swap(&dst));
        assert_eq!(dst.order_hash, src.order_hash);
        assert_eq!(dst.hash_lock, src.hash_lock);
        assert_eq!(dst.maker, complement().maker);
        assert_eq!(dst.taker, taker);
        assert_eq!(dst.time_locks.deployed_at, 5_010);
    }

    #[test]
    fn test_cross_leg_mismatch_detected() {
        let order = sample_order();
        let src = Immutables::for_source(&order, resolver_addr(), order.making_amount, 5_000);
        let mut dst = src.to_destination(&complement(), Address::Object([0xcc; 32]), 5_010);

        dst.hash_lock = HashLock([0u8; 32]);
        assert!(!src.same_swap(&dst));

        let mut dst = src.to_destination(&complement(), Address::Object([0xcc; 32]), 5_010);
        dst.time_locks.dst_cancellation += 1;
        assert!(!src.same_swap(&dst));
    }

    #[test]
    fn test_dst_fields_match_ignores_src_stages() {
        let order = sample_order();
        let src = Immutables::for_source(&order, resolver_addr(), order.making_amount, 5_000);
        let dst = src.to_destination(&complement(), Address::Object([0xcc; 32]), 5_010);

        let mut recorded = dst;
        recorded.time_locks.src_withdrawal = 0;
        recorded.time_locks.src_public_withdrawal = 0;
        assert!(dst.dst_fields_match(&recorded));

        recorded.amount += 1;
        assert!(!dst.dst_fields_match(&recorded));
    }
}
