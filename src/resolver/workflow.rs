// =============================================================================
// CROSSFILL - Swap Workflow
// =============================================================================
//
// One sequential workflow per swap:
//
//   OrderSelected -> SrcDeploying -> SrcDeployed -> DstDeploying -> DstDeployed
//     -> AwaitingSecretWindow -> Withdrawing{src, dst} -> Completed
//     -> Cancelling{src, dst} -> Cancelled
//
// plus Failed{reason} and Aborted. The destination is never funded before
// the source event is decoded, no secret is accepted before the destination
// is confirmed, and abort is refused once funding has started.
//
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{DstDeployment, Resolver, ResolverError, SecretRelay, SrcDeployment, SwapJournal};
use crate::factory::Settlement;
use crate::hashlock::Secret;
use crate::order::{Order, OrderHash, OrderSignature};
use crate::timelocks::{EscrowAction, Leg};

/// Longest a workflow waits for one time-lock window by default
pub const DEFAULT_STAGE_DEADLINE: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// State
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapState {
    OrderSelected,
    SrcDeploying,
    SrcDeployed,
    DstDeploying,
    DstDeployed,
    AwaitingSecretWindow,
    /// Legs already withdrawn
    Withdrawing { src: bool, dst: bool },
    Completed,
    /// Legs already cancelled
    Cancelling { src: bool, dst: bool },
    Cancelled,
    Failed { reason: String },
    Aborted,
}

impl SwapState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapState::Completed | SwapState::Cancelled | SwapState::Failed { .. } | SwapState::Aborted
        )
    }

    /// Funds may be committed on the destination chain
    pub fn destination_committed(&self) -> bool {
        !matches!(
            self,
            SwapState::OrderSelected
                | SwapState::SrcDeploying
                | SwapState::SrcDeployed
                | SwapState::Aborted
        )
    }

    /// State implied by what the chains show for each leg
    pub fn from_settlements(dst_exists: bool, src: Option<&Settlement>, dst: Option<&Settlement>) -> SwapState {
        let withdrawn = |s: Option<&Settlement>| s.map(Settlement::is_withdrawn);
        match (withdrawn(src), withdrawn(dst)) {
            (None, None) if dst_exists => SwapState::DstDeployed,
            (None, None) => SwapState::SrcDeployed,
            (Some(true), Some(true)) => SwapState::Completed,
            (Some(false), Some(false)) => SwapState::Cancelled,
            (Some(false), None) if !dst_exists => SwapState::Cancelled,
            (Some(true), None) => SwapState::Withdrawing { src: true, dst: false },
            (None, Some(true)) => SwapState::Withdrawing { src: false, dst: true },
            (Some(false), None) => SwapState::Cancelling { src: true, dst: false },
            (None, Some(false)) => SwapState::Cancelling { src: false, dst: true },
            (Some(src_w), Some(_)) => SwapState::Failed {
                reason: if src_w {
                    "source withdrawn but destination cancelled".into()
                } else {
                    "source cancelled but destination withdrawn".into()
                },
            },
        }
    }
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapState::Withdrawing { src, dst } => write!(f, "Withdrawing(src={}, dst={})", src, dst),
            SwapState::Cancelling { src, dst } => write!(f, "Cancelling(src={}, dst={})", src, dst),
            SwapState::Failed { reason } => write!(f, "Failed({})", reason),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Everything known about one swap
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub order_hash: OrderHash,
    pub state: SwapState,
    pub src: Option<SrcDeployment>,
    pub dst: Option<DstDeployment>,
    pub src_settlement: Option<Settlement>,
    pub dst_settlement: Option<Settlement>,
    pub updated_at: u64,
}

impl SwapRecord {
    pub fn new(order_hash: OrderHash) -> Self {
        SwapRecord {
            order_hash,
            state: SwapState::OrderSelected,
            src: None,
            dst: None,
            src_settlement: None,
            dst_settlement: None,
            updated_at: crate::unix_now(),
        }
    }
}

// =============================================================================
// Workflow
// =============================================================================

pub struct SwapWorkflow {
    resolver: Arc<Resolver>,
    order: Order,
    signature: OrderSignature,
    record: SwapRecord,
    journal: Option<Arc<SwapJournal>>,
    stage_deadline: Duration,
}

impl SwapWorkflow {
    pub fn new(resolver: Arc<Resolver>, order: Order, signature: OrderSignature) -> Self {
        let record = SwapRecord::new(order.order_hash());
        SwapWorkflow {
            resolver,
            order,
            signature,
            record,
            journal: None,
            stage_deadline: DEFAULT_STAGE_DEADLINE,
        }
    }

    pub fn with_journal(mut self, journal: Arc<SwapJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_stage_deadline(mut self, deadline: Duration) -> Self {
        self.stage_deadline = deadline;
        self
    }

    pub fn record(&self) -> &SwapRecord {
        &self.record
    }

    pub fn state(&self) -> &SwapState {
        &self.record.state
    }

    fn transition(&mut self, next: SwapState) {
        log::info!(
            "[swap {}] {} -> {}",
            self.record.order_hash.short(),
            self.record.state,
            next
        );
        self.record.state = next;
        self.record.updated_at = crate::unix_now();
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(&self.record) {
                log::warn!("[swap {}] journal write failed: {}", self.record.order_hash.short(), e);
            }
        }
    }

    fn fail(&mut self, e: &ResolverError) {
        self.transition(SwapState::Failed { reason: e.to_string() });
    }

    // -------------------------------------------------------------------------
    // Deployment
    // -------------------------------------------------------------------------

    pub async fn deploy_source(&mut self) -> Result<SrcDeployment, ResolverError> {
        if self.record.state != SwapState::OrderSelected {
            return Err(ResolverError::InvalidState(format!("cannot fill from {}", self.record.state)));
        }
        self.transition(SwapState::SrcDeploying);
        let fill_amount = self.order.making_amount;
        match self.resolver.fill_on_source(&self.order, &self.signature, fill_amount).await {
            Ok(src) => {
                self.record.src = Some(src.clone());
                self.transition(SwapState::SrcDeployed);
                Ok(src)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Fund the destination. Failures before funding leave the swap in
    /// `SrcDeployed`, where the only way forward is cancellation.
    pub async fn deploy_destination(&mut self) -> Result<DstDeployment, ResolverError> {
        let src = match (&self.record.state, &self.record.src) {
            (SwapState::SrcDeployed, Some(src)) => src.clone(),
            _ => {
                return Err(ResolverError::InvalidState(format!(
                    "destination needs a decoded source escrow, state is {}",
                    self.record.state
                )))
            }
        };
        self.transition(SwapState::DstDeploying);
        match self.resolver.deploy_destination(&src.immutables, &src.complement).await {
            Ok(dst) => {
                self.record.dst = Some(dst.clone());
                self.transition(SwapState::DstDeployed);
                Ok(dst)
            }
            Err(e) if e.requires_recheck() => {
                // Funding may have landed; leave the state for status() to resolve
                log::warn!("[swap {}] destination unconfirmed: {}", self.record.order_hash.short(), e);
                Err(e)
            }
            Err(e) => {
                log::warn!("[swap {}] destination not funded: {}", self.record.order_hash.short(), e);
                self.transition(SwapState::SrcDeployed);
                Err(e)
            }
        }
    }

    /// Operator abort; refused once destination funding has started
    pub fn abort(&mut self) -> Result<(), ResolverError> {
        if self.record.state.destination_committed() {
            return Err(ResolverError::AbortNotSafe(format!(
                "destination already committed ({})",
                self.record.state
            )));
        }
        self.transition(SwapState::Aborted);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Secret and settlement
    // -------------------------------------------------------------------------

    /// Accept `secret` for this swap; only after the destination is confirmed
    pub fn accept_secret(&self, secret: &Secret) -> Result<(), ResolverError> {
        let confirmed = matches!(
            self.record.state,
            SwapState::DstDeployed | SwapState::AwaitingSecretWindow | SwapState::Withdrawing { .. }
        );
        if !confirmed || self.record.dst.is_none() {
            return Err(ResolverError::SecretBeforeDestination);
        }
        if !self.order.hash_lock.verify(secret) {
            return Err(ResolverError::SecretMismatch);
        }
        Ok(())
    }

    /// Re-check chain time until `action` is legal on `leg`, bounded by the
    /// stage deadline
    async fn wait_until_legal(
        &self,
        leg: Leg,
        action: EscrowAction,
        immutables: &crate::immutables::Immutables,
    ) -> Result<(), ResolverError> {
        let deadline = tokio::time::Instant::now() + self.stage_deadline;
        loop {
            match self.resolver.check_stage(leg, action, immutables).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_recoverable() => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(e);
                    }
                    log::debug!("[swap {}] waiting: {}", self.record.order_hash.short(), e);
                    tokio::time::sleep(self.resolver.settings().stage_poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Withdraw the destination (maker paid) then the source (resolver paid)
    pub async fn settle_with_secret(&mut self, secret: Secret) -> Result<(), ResolverError> {
        self.accept_secret(&secret)?;
        let (src, dst) = match (&self.record.src, &self.record.dst) {
            (Some(src), Some(dst)) => (src.clone(), dst.clone()),
            _ => return Err(ResolverError::SecretBeforeDestination),
        };

        if self.record.state == SwapState::DstDeployed {
            self.transition(SwapState::AwaitingSecretWindow);
        }

        if self.record.dst_settlement.is_none() {
            self.wait_until_legal(Leg::Dst, EscrowAction::PrivateWithdraw, &dst.immutables).await?;
            let tx = self.resolver.withdraw(Leg::Dst, &dst.escrow, &secret, &dst.immutables).await?;
            self.record.dst_settlement = Some(Settlement::Withdrawn { secret, tx });
            self.transition(SwapState::Withdrawing { src: false, dst: true });
        }

        if self.record.src_settlement.is_none() {
            self.wait_until_legal(Leg::Src, EscrowAction::PrivateWithdraw, &src.immutables).await?;
            let tx = self.resolver.withdraw(Leg::Src, &src.escrow, &secret, &src.immutables).await?;
            self.record.src_settlement = Some(Settlement::Withdrawn { secret, tx });
        }

        self.transition(SwapState::Completed);
        Ok(())
    }

    /// Cancel whatever legs exist once their cancellation windows open
    pub async fn cancel(&mut self) -> Result<(), ResolverError> {
        let src = match &self.record.src {
            Some(src) => src.clone(),
            None => {
                return Err(ResolverError::InvalidState("nothing deployed to cancel".into()));
            }
        };
        if self.record.state.is_terminal() && self.record.state != SwapState::Aborted {
            return Err(ResolverError::InvalidState(format!("swap already {}", self.record.state)));
        }
        self.transition(SwapState::Cancelling { src: false, dst: false });

        if let Some(dst) = self.record.dst.clone() {
            if self.record.dst_settlement.is_none() {
                self.wait_until_legal(Leg::Dst, EscrowAction::PrivateCancel, &dst.immutables).await?;
                let tx = self.resolver.cancel(Leg::Dst, &dst.escrow, &dst.immutables).await?;
                self.record.dst_settlement = Some(Settlement::Cancelled { tx });
                self.transition(SwapState::Cancelling { src: false, dst: true });
            }
        }

        if self.record.src_settlement.is_none() {
            self.wait_until_legal(Leg::Src, EscrowAction::PrivateCancel, &src.immutables).await?;
            let tx = self.resolver.cancel(Leg::Src, &src.escrow, &src.immutables).await?;
            self.record.src_settlement = Some(Settlement::Cancelled { tx });
        }

        self.transition(SwapState::Cancelled);
        Ok(())
    }

    /// Whole swap: fill, fund, obtain the secret from `relay`, settle.
    /// Falls back to cancellation when the destination or the secret fails.
    pub async fn run(&mut self, relay: &SecretRelay) -> Result<SwapState, ResolverError> {
        self.deploy_source().await?;

        let dst = match self.deploy_destination().await {
            Ok(dst) => dst,
            Err(e) if e.requires_recheck() => return Err(e),
            Err(e) => {
                log::warn!("[swap {}] cancelling source: {}", self.record.order_hash.short(), e);
                self.cancel().await?;
                return Ok(self.record.state.clone());
            }
        };

        match relay
            .release(&self.record.order_hash, &dst.escrow, &dst.immutables, self.resolver.factory(Leg::Dst))
            .await
        {
            Ok(secret) => self.settle_with_secret(secret).await?,
            Err(e) => {
                log::warn!("[swap {}] no secret ({}), cancelling", self.record.order_hash.short(), e);
                self.cancel().await?;
            }
        }
        Ok(self.record.state.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
