// =============================================================================
// CROSSFILL - Escrow Stages
// =============================================================================
//
// Source escrow:
//
//   deployed_at ── Deploying ── src_withdrawal ── PrivateWithdrawal
//     ── src_public_withdrawal ── PublicWithdrawal
//     ── src_cancellation ── PrivateCancellation
//     ── src_public_cancellation ── PublicCancellation ──▶
//
// Destination escrow:
//
//   deployed_at ── Deploying ── dst_withdrawal ── PrivateWithdrawal
//     ── dst_public_withdrawal ── PublicWithdrawal
//     ── dst_cancellation ── Cancellation ──▶
//
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which leg of the swap an escrow belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leg {
    /// Maker's funds, on the order's source chain
    Src,
    /// Resolver's funds, on the destination chain
    Dst,
}

impl Leg {
    pub fn other(&self) -> Leg {
        match self {
            Leg::Src => Leg::Dst,
            Leg::Dst => Leg::Src,
        }
    }

    /// Stages this leg passes through, in order
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            Leg::Src => &[
                Stage::Deploying,
                Stage::PrivateWithdrawal,
                Stage::PublicWithdrawal,
                Stage::PrivateCancellation,
                Stage::PublicCancellation,
            ],
            Leg::Dst => &[
                Stage::Deploying,
                Stage::PrivateWithdrawal,
                Stage::PublicWithdrawal,
                Stage::Cancellation,
            ],
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Src => write!(f, "src"),
            Leg::Dst => write!(f, "dst"),
        }
    }
}

impl std::str::FromStr for Leg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "src" | "source" => Ok(Leg::Src),
            "dst" | "destination" => Ok(Leg::Dst),
            other => Err(format!("unknown leg '{}'", other)),
        }
    }
}

/// Time window an escrow is in
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Finality lock, nothing is allowed yet
    Deploying,
    /// Only the taker may withdraw
    PrivateWithdrawal,
    /// Anyone holding the secret may withdraw
    PublicWithdrawal,
    /// Only the taker may cancel (source)
    PrivateCancellation,
    /// Anyone may cancel (source)
    PublicCancellation,
    /// Taker may cancel (destination)
    Cancellation,
}

impl Stage {
    /// Withdrawal of any kind is possible in this stage
    pub fn is_withdrawal(&self) -> bool {
        matches!(self, Stage::PrivateWithdrawal | Stage::PublicWithdrawal)
    }

    /// Cancellation of any kind is possible in this stage
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Stage::PrivateCancellation | Stage::PublicCancellation | Stage::Cancellation
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Deploying => "Deploying",
            Stage::PrivateWithdrawal => "PrivateWithdrawal",
            Stage::PublicWithdrawal => "PublicWithdrawal",
            Stage::PrivateCancellation => "PrivateCancellation",
            Stage::PublicCancellation => "PublicCancellation",
            Stage::Cancellation => "Cancellation",
        };
        write!(f, "{}", name)
    }
}

/// Escrow actions gated by stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowAction {
    PrivateWithdraw,
    PublicWithdraw,
    PrivateCancel,
    PublicCancel,
}

impl EscrowAction {
    pub fn is_withdraw(&self) -> bool {
        matches!(self, EscrowAction::PrivateWithdraw | EscrowAction::PublicWithdraw)
    }
}

impl fmt::Display for EscrowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EscrowAction::PrivateWithdraw => "withdraw",
            EscrowAction::PublicWithdraw => "publicWithdraw",
            EscrowAction::PrivateCancel => "cancel",
            EscrowAction::PublicCancel => "publicCancel",
        };
        write!(f, "{}", name)
    }
}

/// Is `action` allowed while the escrow is in `stage`?
pub fn is_action_legal(action: EscrowAction, stage: Stage) -> bool {
    match action {
        EscrowAction::PrivateWithdraw => stage == Stage::PrivateWithdrawal,
        EscrowAction::PublicWithdraw => stage == Stage::PublicWithdrawal,
        EscrowAction::PrivateCancel => stage.is_cancellation(),
        EscrowAction::PublicCancel => stage == Stage::PublicCancellation,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STAGES: [Stage; 6] = [
        Stage::Deploying,
        Stage::PrivateWithdrawal,
        Stage::PublicWithdrawal,
        Stage::PrivateCancellation,
        Stage::PublicCancellation,
        Stage::Cancellation,
    ];

    #[test]
    fn test_private_withdraw_only_in_private_window() {
        for stage in ALL_STAGES {
            assert_eq!(
                is_action_legal(EscrowAction::PrivateWithdraw, stage),
                stage == Stage::PrivateWithdrawal
            );
        }
    }

    #[test]
    fn test_public_withdraw_excludes_private_window() {
        assert!(!is_action_legal(EscrowAction::PublicWithdraw, Stage::PrivateWithdrawal));
        assert!(is_action_legal(EscrowAction::PublicWithdraw, Stage::PublicWithdrawal));
        assert!(!is_action_legal(EscrowAction::PublicWithdraw, Stage::PrivateCancellation));
    }

    #[test]
    fn test_cancel_legality() {
        assert!(!is_action_legal(EscrowAction::PrivateCancel, Stage::PublicWithdrawal));
        assert!(is_action_legal(EscrowAction::PrivateCancel, Stage::PrivateCancellation));
        assert!(is_action_legal(EscrowAction::PrivateCancel, Stage::PublicCancellation));
        assert!(is_action_legal(EscrowAction::PrivateCancel, Stage::Cancellation));

        assert!(is_action_legal(EscrowAction::PublicCancel, Stage::PublicCancellation));
        assert!(!is_action_legal(EscrowAction::PublicCancel, Stage::PrivateCancellation));
        assert!(!is_action_legal(EscrowAction::PublicCancel, Stage::Cancellation));
    }

    #[test]
    fn test_nothing_legal_while_deploying() {
        for action in [
            EscrowAction::PrivateWithdraw,
            EscrowAction::PublicWithdraw,
            EscrowAction::PrivateCancel,
            EscrowAction::PublicCancel,
        ] {
            assert!(!is_action_legal(action, Stage::Deploying));
        }
    }

    #[test]
    fn test_leg_parse() {
        assert_eq!("src".parse::<Leg>().unwrap(), Leg::Src);
        assert_eq!("DST".parse::<Leg>().unwrap(), Leg::Dst);
        assert!("both".parse::<Leg>().is_err());
        assert!(!Leg::Dst.stages().contains(&Stage::PublicCancellation));
    }
}
