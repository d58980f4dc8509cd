// =============================================================================
// CROSSFILL - Time-Lock State Machine
// =============================================================================
//
// Seven offsets (seconds) anchored at the escrow's deployment time.
// Every decision about what an escrow allows is made from chain time,
// never from the local clock.
//
// Invariants:
// - src_withdrawal < src_public_withdrawal < src_cancellation < src_public_cancellation
// - dst_withdrawal < dst_public_withdrawal < dst_cancellation
// - dst_cancellation <= src_cancellation
//
// EVM packing: one 256-bit word, 32 bits per stage, stage 0 in the lowest
// bits, deployed_at in the top 32 bits.
//
// =============================================================================

pub mod stage;

pub use stage::{is_action_legal, EscrowAction, Leg, Stage};

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Constants
// =============================================================================

/// Packed stage indices
const IDX_SRC_WITHDRAWAL: usize = 0;
const IDX_SRC_PUBLIC_WITHDRAWAL: usize = 1;
const IDX_SRC_CANCELLATION: usize = 2;
const IDX_SRC_PUBLIC_CANCELLATION: usize = 3;
const IDX_DST_WITHDRAWAL: usize = 4;
const IDX_DST_PUBLIC_WITHDRAWAL: usize = 5;
const IDX_DST_CANCELLATION: usize = 6;
const IDX_DEPLOYED_AT: usize = 7;

// =============================================================================
// Errors
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeLockError {
    /// Offsets of one leg are not strictly increasing
    NotIncreasing(String),
    /// Destination cancels after the source does
    CancellationOrder { dst_cancellation: u32, src_cancellation: u32 },
    /// deployed_at does not fit the 32-bit packed slot
    DeployedAtOverflow(u64),
}

impl fmt::Display for TimeLockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeLockError::NotIncreasing(s) => write!(f, "Time-locks not increasing: {}", s),
            TimeLockError::CancellationOrder { dst_cancellation, src_cancellation } => write!(
                f,
                "dst_cancellation ({}) must not exceed src_cancellation ({})",
                dst_cancellation, src_cancellation
            ),
            TimeLockError::DeployedAtOverflow(t) => write!(f, "deployed_at {} exceeds 32 bits", t),
        }
    }
}

impl std::error::Error for TimeLockError {}

// =============================================================================
// Time-Locks
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeLocks {
    pub src_withdrawal: u32,
    pub src_public_withdrawal: u32,
    pub src_cancellation: u32,
    pub src_public_cancellation: u32,
    pub dst_withdrawal: u32,
    pub dst_public_withdrawal: u32,
    pub dst_cancellation: u32,
    /// Chain timestamp of escrow deployment; 0 until deployed
    pub deployed_at: u64,
}

impl Default for TimeLocks {
    /// 10s finality, ~2 min private windows
    fn default() -> Self {
        TimeLocks {
            src_withdrawal: 10,
            src_public_withdrawal: 120,
            src_cancellation: 121,
            src_public_cancellation: 122,
            dst_withdrawal: 10,
            dst_public_withdrawal: 100,
            dst_cancellation: 101,
            deployed_at: 0,
        }
    }
}

impl TimeLocks {
    /// Same offsets, anchored at a new deployment time
    pub fn with_deployed_at(&self, deployed_at: u64) -> Self {
        TimeLocks { deployed_at, ..*self }
    }

    /// Check the ordering invariants
    pub fn validate(&self) -> Result<(), TimeLockError> {
        let src = [
            self.src_withdrawal,
            self.src_public_withdrawal,
            self.src_cancellation,
            self.src_public_cancellation,
        ];
        if src.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TimeLockError::NotIncreasing(format!("source {:?}", src)));
        }

        let dst = [self.dst_withdrawal, self.dst_public_withdrawal, self.dst_cancellation];
        if dst.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TimeLockError::NotIncreasing(format!("destination {:?}", dst)));
        }

        if self.dst_cancellation > self.src_cancellation {
            return Err(TimeLockError::CancellationOrder {
                dst_cancellation: self.dst_cancellation,
                src_cancellation: self.src_cancellation,
            });
        }
        Ok(())
    }

    /// Offsets of the destination leg are identical
    pub fn same_dst_offsets(&self, other: &TimeLocks) -> bool {
        self.dst_withdrawal == other.dst_withdrawal
            && self.dst_public_withdrawal == other.dst_public_withdrawal
            && self.dst_cancellation == other.dst_cancellation
    }

    /// All seven offsets identical (deployment time ignored)
    pub fn same_offsets(&self, other: &TimeLocks) -> bool {
        self.with_deployed_at(0) == other.with_deployed_at(0)
    }

    // -------------------------------------------------------------------------
    // Packing
    // -------------------------------------------------------------------------

    fn slots(&self) -> [u32; 7] {
        [
            self.src_withdrawal,
            self.src_public_withdrawal,
            self.src_cancellation,
            self.src_public_cancellation,
            self.dst_withdrawal,
            self.dst_public_withdrawal,
            self.dst_cancellation,
        ]
    }

    /// Pack into the 256-bit EVM word (big-endian)
    pub fn pack(&self) -> Result<[u8; 32], TimeLockError> {
        let deployed_at = u32::try_from(self.deployed_at)
            .map_err(|_| TimeLockError::DeployedAtOverflow(self.deployed_at))?;

        let mut word = [0u8; 32];
        let mut put = |idx: usize, value: u32| {
            let end = 32 - idx * 4;
            word[end - 4..end].copy_from_slice(&value.to_be_bytes());
        };
        for (idx, value) in self.slots().iter().enumerate() {
            put(idx, *value);
        }
        put(IDX_DEPLOYED_AT, deployed_at);
        Ok(word)
    }

    /// Unpack from the 256-bit EVM word
    pub fn unpack(word: &[u8; 32]) -> Self {
        let get = |idx: usize| {
            let end = 32 - idx * 4;
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&word[end - 4..end]);
            u32::from_be_bytes(buf)
        };
        TimeLocks {
            src_withdrawal: get(IDX_SRC_WITHDRAWAL),
            src_public_withdrawal: get(IDX_SRC_PUBLIC_WITHDRAWAL),
            src_cancellation: get(IDX_SRC_CANCELLATION),
            src_public_cancellation: get(IDX_SRC_PUBLIC_CANCELLATION),
            dst_withdrawal: get(IDX_DST_WITHDRAWAL),
            dst_public_withdrawal: get(IDX_DST_PUBLIC_WITHDRAWAL),
            dst_cancellation: get(IDX_DST_CANCELLATION),
            deployed_at: get(IDX_DEPLOYED_AT) as u64,
        }
    }

    // -------------------------------------------------------------------------
    // Stage evaluation
    // -------------------------------------------------------------------------

    /// Absolute chain time at which `stage` begins on `leg`
    pub fn stage_start(&self, leg: Leg, stage: Stage) -> Option<u64> {
        let offset = match (leg, stage) {
            (_, Stage::Deploying) => 0,
            (Leg::Src, Stage::PrivateWithdrawal) => self.src_withdrawal,
            (Leg::Src, Stage::PublicWithdrawal) => self.src_public_withdrawal,
            (Leg::Src, Stage::PrivateCancellation) => self.src_cancellation,
            (Leg::Src, Stage::PublicCancellation) => self.src_public_cancellation,
            (Leg::Dst, Stage::PrivateWithdrawal) => self.dst_withdrawal,
            (Leg::Dst, Stage::PublicWithdrawal) => self.dst_public_withdrawal,
            (Leg::Dst, Stage::Cancellation) => self.dst_cancellation,
            _ => return None,
        };
        Some(self.deployed_at.saturating_add(offset as u64))
    }

    /// Latest stage whose start has been reached; boundary is inclusive
    pub fn current_stage(&self, leg: Leg, chain_time: u64) -> Stage {
        let mut current = Stage::Deploying;
        for stage in leg.stages().iter().skip(1) {
            match self.stage_start(leg, *stage) {
                Some(start) if chain_time >= start => current = *stage,
                _ => break,
            }
        }
        current
    }

    /// Absolute time of the next stage change after `chain_time`, if any
    pub fn next_transition(&self, leg: Leg, chain_time: u64) -> Option<u64> {
        leg.stages()
            .iter()
            .skip(1)
            .filter_map(|s| self.stage_start(leg, *s))
            .find(|start| *start > chain_time)
    }

    /// Earliest chain time at which `action` becomes legal on `leg`
    pub fn action_opens_at(&self, leg: Leg, action: EscrowAction) -> Option<u64> {
        let stage = match (leg, action) {
            (_, EscrowAction::PrivateWithdraw) => Stage::PrivateWithdrawal,
            (_, EscrowAction::PublicWithdraw) => Stage::PublicWithdrawal,
            (Leg::Src, EscrowAction::PrivateCancel) => Stage::PrivateCancellation,
            (Leg::Dst, EscrowAction::PrivateCancel) => Stage::Cancellation,
            (Leg::Src, EscrowAction::PublicCancel) => Stage::PublicCancellation,
            (Leg::Dst, EscrowAction::PublicCancel) => return None,
        };
        self.stage_start(leg, stage)
    }

    /// Chain time at which `action` stops being legal on `leg` (None = never)
    pub fn action_closes_at(&self, leg: Leg, action: EscrowAction) -> Option<u64> {
        match action {
            EscrowAction::PrivateWithdraw => self.stage_start(leg, Stage::PublicWithdrawal),
            EscrowAction::PublicWithdraw => match leg {
                Leg::Src => self.stage_start(leg, Stage::PrivateCancellation),
                Leg::Dst => self.stage_start(leg, Stage::Cancellation),
            },
            EscrowAction::PrivateCancel | EscrowAction::PublicCancel => None,
        }
    }

    /// Would a destination escrow deployed at `dst_deployed_at` become
    /// cancellable no later than this source escrow?
    pub fn dst_cancels_before_src(&self, dst_deployed_at: u64) -> bool {
        let dst_cancel = dst_deployed_at.saturating_add(self.dst_cancellation as u64);
        let src_cancel = self.deployed_at.saturating_add(self.src_cancellation as u64);
        dst_cancel <= src_cancel
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn locks_at(deployed_at: u64) -> TimeLocks {
        TimeLocks::default().with_deployed_at(deployed_at)
    }

    #[test]
    fn test_default_is_valid() {
        assert!(TimeLocks::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_ordering() {
        let mut tl = TimeLocks::default();
        tl.src_public_withdrawal = tl.src_withdrawal;
        assert!(matches!(tl.validate(), Err(TimeLockError::NotIncreasing(_))));

        let mut tl = TimeLocks::default();
        tl.dst_cancellation = tl.src_cancellation + 1;
        tl.dst_public_withdrawal = tl.dst_cancellation - 1;
        assert!(matches!(tl.validate(), Err(TimeLockError::CancellationOrder { .. })));
    }

    #[test]
    fn test_pack_layout() {
        let tl = locks_at(0x0102_0304);
        let word = tl.pack().unwrap();

        // Stage 0 in the lowest 32 bits
        assert_eq!(&word[28..32], &10u32.to_be_bytes());
        // dst_cancellation is stage 6
        assert_eq!(&word[4..8], &101u32.to_be_bytes());
        // deployed_at in the top 32 bits
        assert_eq!(&word[0..4], &[1, 2, 3, 4]);

        assert_eq!(TimeLocks::unpack(&word), tl);
    }

    #[test]
    fn test_pack_overflow() {
        let tl = locks_at(u32::MAX as u64 + 1);
        assert!(matches!(tl.pack(), Err(TimeLockError::DeployedAtOverflow(_))));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let tl = locks_at(1_000);
        assert_eq!(tl.current_stage(Leg::Src, 1_009), Stage::Deploying);
        assert_eq!(tl.current_stage(Leg::Src, 1_010), Stage::PrivateWithdrawal);
        assert_eq!(tl.current_stage(Leg::Src, 1_120), Stage::PublicWithdrawal);
        assert_eq!(tl.current_stage(Leg::Src, 1_121), Stage::PrivateCancellation);
        assert_eq!(tl.current_stage(Leg::Src, 1_122), Stage::PublicCancellation);
        assert_eq!(tl.current_stage(Leg::Src, 9_999), Stage::PublicCancellation);

        assert_eq!(tl.current_stage(Leg::Dst, 1_100), Stage::PublicWithdrawal);
        assert_eq!(tl.current_stage(Leg::Dst, 1_101), Stage::Cancellation);
    }

    #[test]
    fn test_before_deployment_is_deploying() {
        let tl = locks_at(1_000);
        assert_eq!(tl.current_stage(Leg::Src, 0), Stage::Deploying);
        assert_eq!(tl.current_stage(Leg::Dst, 999), Stage::Deploying);
    }

    #[test]
    fn test_stage_is_monotonic() {
        let tl = locks_at(500);
        for leg in [Leg::Src, Leg::Dst] {
            let mut prev = Stage::Deploying;
            for t in 0..1_000u64 {
                let stage = tl.current_stage(leg, t);
                assert!(stage >= prev, "{} regressed at t={}", leg, t);
                prev = stage;
            }
        }
    }

    #[test]
    fn test_next_transition() {
        let tl = locks_at(1_000);
        assert_eq!(tl.next_transition(Leg::Src, 0), Some(1_010));
        assert_eq!(tl.next_transition(Leg::Src, 1_010), Some(1_120));
        assert_eq!(tl.next_transition(Leg::Src, 1_122), None);
        assert_eq!(tl.next_transition(Leg::Dst, 1_100), Some(1_101));
    }

    #[test]
    fn test_action_windows() {
        let tl = locks_at(1_000);
        assert_eq!(tl.action_opens_at(Leg::Src, EscrowAction::PrivateWithdraw), Some(1_010));
        assert_eq!(tl.action_closes_at(Leg::Src, EscrowAction::PrivateWithdraw), Some(1_120));
        assert_eq!(tl.action_opens_at(Leg::Dst, EscrowAction::PrivateCancel), Some(1_101));
        assert_eq!(tl.action_opens_at(Leg::Dst, EscrowAction::PublicCancel), None);
        assert_eq!(tl.action_closes_at(Leg::Src, EscrowAction::PrivateCancel), None);
    }

    #[test]
    fn test_cancellation_ordering_across_legs() {
        let src = locks_at(1_000);
        // Destination deployed 20s later still cancels first (1121 vs 1121)
        assert!(src.dst_cancels_before_src(1_020));
        assert!(!src.dst_cancels_before_src(1_021));
    }
}
