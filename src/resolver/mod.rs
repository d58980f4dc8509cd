// =============================================================================
// CROSSFILL - Resolver
// =============================================================================
//
// Coordinates one swap across the two legs:
// - fill the order on the source chain, creating the source escrow
// - fund the destination escrow once the source event is decoded
// - withdraw both legs with the secret, or cancel after the time-locks
//
// Every operation checks locally first (order, stage, hash-lock, taker) and
// only then submits. Timeouts and indeterminate results re-query the chain
// before anything else happens.
//
// =============================================================================

pub mod journal;
pub mod poller;
pub mod relay;
pub mod workflow;

#[cfg(test)]
mod e2e_tests;

pub use journal::SwapJournal;
pub use poller::{EventPoller, PollerHandle, PollerStatus};
pub use relay::SecretRelay;
pub use workflow::{SwapRecord, SwapState, SwapWorkflow};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::address::Address;
use crate::chain::{
    BlockQuery, ChainAdapter, ChainError, EscrowRef, Receipt, SubmissionQueue, TxRef, TxRequest,
};
use crate::factory::{EscrowFactory, FactoryError, Settlement, SrcCreated};
use crate::hashlock::Secret;
use crate::immutables::{DstComplement, Immutables};
use crate::order::{Order, OrderError, OrderSignature, TakerTraits};
use crate::timelocks::{is_action_legal, EscrowAction, Leg, Stage};

/// Blocks searched when re-querying for an earlier submission
pub const DEFAULT_LOOKBACK_BLOCKS: u64 = 5_000;

// =============================================================================
// Errors
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolverError {
    Order(OrderError),
    Chain(ChainError),
    Factory(FactoryError),
    /// The chain rejected the source fill
    FillReverted { reason: String },
    /// Too early; retry at `ready_at`
    ActionNotYetLegal { leg: Leg, action: EscrowAction, stage: Stage, ready_at: Option<u64> },
    /// The window for this action has passed
    WindowClosed { leg: Leg, action: EscrowAction, stage: Stage },
    SecretMismatch,
    UnauthorizedWithdrawer { taker: Address, caller: Address },
    CrossLegMismatch(String),
    CancellationOrder { dst_cancellation: u64, src_cancellation: u64 },
    AlreadySettled { escrow: EscrowRef },
    SecretBeforeDestination,
    AbortNotSafe(String),
    InvalidState(String),
    Storage(String),
}

impl ResolverError {
    /// Timing errors: wait and check again
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ResolverError::ActionNotYetLegal { .. })
    }

    /// The submission may have landed; re-query before anything else
    pub fn requires_recheck(&self) -> bool {
        match self {
            ResolverError::Chain(e) => e.requires_recheck(),
            ResolverError::Factory(FactoryError::Chain(e)) => e.requires_recheck(),
            _ => false,
        }
    }
}

impl fmt::Display for ResolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverError::Order(e) => write!(f, "Order rejected: {}", e),
            ResolverError::Chain(e) => write!(f, "{}", e),
            ResolverError::Factory(e) => write!(f, "{}", e),
            ResolverError::FillReverted { reason } => write!(f, "Fill reverted: {}", reason),
            ResolverError::ActionNotYetLegal { leg, action, stage, ready_at } => match ready_at {
                Some(t) => write!(f, "{} on {} not legal during {} (opens at {})", action, leg, stage, t),
                None => write!(f, "{} on {} not legal during {}", action, leg, stage),
            },
            ResolverError::WindowClosed { leg, action, stage } => {
                write!(f, "{} window on {} closed ({})", action, leg, stage)
            }
            ResolverError::SecretMismatch => write!(f, "Secret does not match the hash-lock"),
            ResolverError::UnauthorizedWithdrawer { taker, caller } => {
                write!(f, "Escrow taker is {}, not {}", taker, caller)
            }
            ResolverError::CrossLegMismatch(s) => write!(f, "Cross-leg mismatch: {}", s),
            ResolverError::CancellationOrder { dst_cancellation, src_cancellation } => write!(
                f,
                "Destination cancels at {} after source at {}",
                dst_cancellation, src_cancellation
            ),
            ResolverError::AlreadySettled { escrow } => write!(f, "Escrow {} already settled", escrow),
            ResolverError::SecretBeforeDestination => {
                write!(f, "Secret offered before the destination escrow was confirmed")
            }
            ResolverError::AbortNotSafe(s) => write!(f, "Abort not safe: {}", s),
            ResolverError::InvalidState(s) => write!(f, "Invalid state: {}", s),
            ResolverError::Storage(s) => write!(f, "Storage error: {}", s),
        }
    }
}

impl std::error::Error for ResolverError {}

impl From<OrderError> for ResolverError {
    fn from(e: OrderError) -> Self {
        ResolverError::Order(e)
    }
}

impl From<ChainError> for ResolverError {
    fn from(e: ChainError) -> Self {
        ResolverError::Chain(e)
    }
}

impl From<FactoryError> for ResolverError {
    fn from(e: FactoryError) -> Self {
        ResolverError::Factory(e)
    }
}

// =============================================================================
// Types
// =============================================================================

#[derive(Clone, Debug)]
pub struct ResolverSettings {
    /// Delay between chain-time reads while waiting for a stage
    pub stage_poll_interval: Duration,
    /// Blocks searched when re-querying for earlier submissions
    pub lookback_blocks: u64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        ResolverSettings {
            stage_poll_interval: Duration::from_millis(crate::DEFAULT_STAGE_POLL_MS),
            lookback_blocks: DEFAULT_LOOKBACK_BLOCKS,
        }
    }
}

/// Source escrow created by a fill
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SrcDeployment {
    pub escrow: EscrowRef,
    pub immutables: Immutables,
    pub complement: DstComplement,
    pub tx: TxRef,
}

impl From<SrcCreated> for SrcDeployment {
    fn from(c: SrcCreated) -> Self {
        SrcDeployment { escrow: c.escrow, immutables: c.immutables, complement: c.complement, tx: c.tx }
    }
}

/// Funded destination escrow
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DstDeployment {
    pub escrow: EscrowRef,
    pub immutables: Immutables,
    pub src_cancellation_timestamp: u64,
    pub tx: TxRef,
}

// =============================================================================
// Resolver
// =============================================================================

pub struct Resolver {
    src_factory: EscrowFactory,
    dst_factory: EscrowFactory,
    queue: SubmissionQueue,
    settings: ResolverSettings,
}

impl Resolver {
    pub fn new(src_factory: EscrowFactory, dst_factory: EscrowFactory, queue: SubmissionQueue) -> Self {
        Resolver { src_factory, dst_factory, queue, settings: ResolverSettings::default() }
    }

    pub fn with_settings(mut self, settings: ResolverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn factory(&self, leg: Leg) -> &EscrowFactory {
        match leg {
            Leg::Src => &self.src_factory,
            Leg::Dst => &self.dst_factory,
        }
    }

    pub fn adapter(&self, leg: Leg) -> &Arc<dyn ChainAdapter> {
        self.factory(leg).adapter()
    }

    pub async fn chain_time(&self, leg: Leg) -> Result<u64, ResolverError> {
        Ok(self.adapter(leg).chain_time().await?)
    }

    async fn submit(&self, leg: Leg, tx: &TxRequest) -> Result<Receipt, ChainError> {
        self.queue.submit(self.adapter(leg).as_ref(), tx).await
    }

    async fn lookback(&self, leg: Leg) -> Result<BlockQuery, ResolverError> {
        Ok(self.factory(leg).recent(self.settings.lookback_blocks).await?)
    }

    // -------------------------------------------------------------------------
    // Source fill
    // -------------------------------------------------------------------------

    /// Fill `order` on the source chain and decode the escrow it created
    pub async fn fill_on_source(
        &self,
        order: &Order,
        signature: &OrderSignature,
        fill_amount: u128,
    ) -> Result<SrcDeployment, ResolverError> {
        order.validate()?;
        signature.verify(order)?;

        let adapter = self.adapter(Leg::Src);
        let taker = adapter.resolver_address();
        let order_hash = order.order_hash();
        let now = adapter.chain_time().await?;
        order.check_fill(&taker, fill_amount, now)?;

        // Taking amount only decays, so the quote at `now` caps the fill
        let threshold = order.taking_amount_at(fill_amount, now)?;

        let range = self.lookback(Leg::Src).await?;
        if let Some(existing) = self.src_factory.find_source_by_order(&order_hash, &range).await? {
            if existing.immutables.taker == taker {
                log::warn!("[resolver] order {} already filled by us, reusing escrow", order_hash.short());
                return Ok(existing.into());
            }
            return Err(ResolverError::FillReverted {
                reason: format!("order already filled by {}", existing.immutables.taker),
            });
        }

        let args = order.escrow_extension();
        let taker_traits = TakerTraits::by_making_amount(threshold, args.len())?;
        let tx = TxRequest::DeploySrc {
            immutables: Immutables::for_source(order, taker, fill_amount, now),
            order: Box::new(order.clone()),
            signature: *signature,
            amount: fill_amount,
            taker_traits,
            args,
        };

        log::info!(
            "[resolver] filling order {} for {} (max taking {})",
            order_hash.short(),
            fill_amount,
            threshold
        );
        let receipt = match self.submit(Leg::Src, &tx).await {
            Ok(receipt) => receipt,
            Err(ChainError::TransactionReverted { reason, .. }) => {
                return Err(ResolverError::FillReverted { reason })
            }
            Err(e) if e.requires_recheck() => {
                log::warn!("[resolver] fill of {} unconfirmed ({}), re-checking", order_hash.short(), e);
                let range = self.lookback(Leg::Src).await?;
                return match self.src_factory.find_source_by_order(&order_hash, &range).await? {
                    Some(created) if created.immutables.taker == taker => Ok(created.into()),
                    _ => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let created = self
            .src_factory
            .decode_source_creation_event(&BlockQuery::Tx(receipt.tx_id.clone()), Some(&order_hash))
            .await?;
        if created.immutables.order_hash != order_hash || created.immutables.hash_lock != order.hash_lock {
            return Err(ResolverError::CrossLegMismatch(format!(
                "source event for {} does not match order {}",
                created.immutables.order_hash.short(),
                order_hash.short()
            )));
        }
        log::info!("[resolver] source escrow {} created in block {}", created.escrow, receipt.block.height);
        Ok(created.into())
    }

    // -------------------------------------------------------------------------
    // Destination deployment
    // -------------------------------------------------------------------------

    /// Fund and create the destination escrow matching `src`
    pub async fn deploy_destination(
        &self,
        src: &Immutables,
        complement: &DstComplement,
    ) -> Result<DstDeployment, ResolverError> {
        let adapter = self.adapter(Leg::Dst);
        let now = adapter.chain_time().await?;
        let expected = src.to_destination(complement, adapter.resolver_address(), now);

        if !src.same_swap(&expected) {
            return Err(ResolverError::CrossLegMismatch("destination does not bind the source swap".into()));
        }
        let src_cancellation = src.src_cancellation_timestamp();
        if !src.time_locks.dst_cancels_before_src(now) {
            return Err(ResolverError::CancellationOrder {
                dst_cancellation: now.saturating_add(src.time_locks.dst_cancellation as u64),
                src_cancellation,
            });
        }

        let range = self.lookback(Leg::Dst).await?;
        if let Some(existing) = self
            .dst_factory
            .find_destination(&src.order_hash, &src.hash_lock, &range)
            .await?
        {
            return match existing.immutables {
                Some(recorded) => {
                    log::warn!("[resolver] destination for {} already exists, reusing", src.order_hash.short());
                    self.confirm_destination(&expected, recorded.time_locks.deployed_at, existing, src_cancellation)
                }
                None => Err(ResolverError::InvalidState(format!(
                    "destination escrow {} already exists for hash-lock {}",
                    existing.escrow,
                    src.hash_lock.short()
                ))),
            };
        }

        let tx = TxRequest::DeployDst { immutables: expected, src_cancellation_timestamp: src_cancellation };
        log::info!(
            "[resolver] funding destination for {}: {} of {}",
            src.order_hash.short(),
            expected.amount,
            expected.token.short()
        );
        let receipt = match self.submit(Leg::Dst, &tx).await {
            Ok(receipt) => receipt,
            Err(e) if e.requires_recheck() => {
                log::warn!("[resolver] destination deploy unconfirmed ({}), re-checking", e);
                let range = self.lookback(Leg::Dst).await?;
                return match self
                    .dst_factory
                    .find_destination(&src.order_hash, &src.hash_lock, &range)
                    .await?
                {
                    Some(found) => {
                        let deployed_at = found.immutables.map(|i| i.time_locks.deployed_at);
                        match deployed_at {
                            Some(t) => self.confirm_destination(&expected, t, found, src_cancellation),
                            None => Err(e.into()),
                        }
                    }
                    None => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let found = self
            .dst_factory
            .find_destination(&src.order_hash, &src.hash_lock, &BlockQuery::Tx(receipt.tx_id.clone()))
            .await?
            .ok_or_else(|| FactoryError::EventNotFound(format!("DstEscrowCreated in {}", receipt.tx_id)))?;
        let deployed_at = found
            .immutables
            .map(|i| i.time_locks.deployed_at)
            .unwrap_or(receipt.confirmed_at);
        let deployment = self.confirm_destination(&expected, deployed_at, found, src_cancellation)?;
        log::info!("[resolver] destination escrow {} funded", deployment.escrow);
        Ok(deployment)
    }

    fn confirm_destination(
        &self,
        expected: &Immutables,
        deployed_at: u64,
        found: crate::factory::DstCreated,
        src_cancellation_timestamp: u64,
    ) -> Result<DstDeployment, ResolverError> {
        let immutables = Immutables {
            time_locks: expected.time_locks.with_deployed_at(deployed_at),
            ..*expected
        };
        if found.hash_lock != immutables.hash_lock || found.taker != immutables.taker {
            return Err(ResolverError::CrossLegMismatch(format!(
                "destination event for {} does not match",
                found.escrow
            )));
        }
        if let Some(recorded) = found.immutables {
            if !recorded.dst_fields_match(&immutables) {
                return Err(ResolverError::CrossLegMismatch(format!(
                    "destination escrow {} recorded different parameters",
                    found.escrow
                )));
            }
        }
        Ok(DstDeployment { escrow: found.escrow, immutables, src_cancellation_timestamp, tx: found.tx })
    }

    // -------------------------------------------------------------------------
    // Settlement
    // -------------------------------------------------------------------------

    /// Stage gate for `action`: too early is recoverable, too late is not
    async fn check_stage(&self, leg: Leg, action: EscrowAction, imm: &Immutables) -> Result<(), ResolverError> {
        let now = self.chain_time(leg).await?;
        let stage = imm.time_locks.current_stage(leg, now);
        if is_action_legal(action, stage) {
            return Ok(());
        }
        let opens_at = imm.time_locks.action_opens_at(leg, action);
        match opens_at {
            Some(t) if now < t => Err(ResolverError::ActionNotYetLegal { leg, action, stage, ready_at: Some(t) }),
            _ => Err(ResolverError::WindowClosed { leg, action, stage }),
        }
    }

    async fn ensure_unsettled(&self, leg: Leg, escrow: &EscrowRef) -> Result<(), ResolverError> {
        let range = self.lookback(leg).await?;
        if self.factory(leg).settlement(escrow, &range).await?.is_some() {
            return Err(ResolverError::AlreadySettled { escrow: *escrow });
        }
        Ok(())
    }

    /// Submit a settlement; an unconfirmed result is resolved by looking
    /// for the escrow's settlement event
    async fn settle(&self, leg: Leg, escrow: &EscrowRef, tx: TxRequest) -> Result<TxRef, ResolverError> {
        match self.submit(leg, &tx).await {
            Ok(receipt) => Ok(receipt.tx_ref(escrow.chain_id)),
            Err(e) if e.requires_recheck() => {
                log::warn!("[resolver] {} on {} unconfirmed ({}), re-checking", tx.name(), escrow, e);
                let range = self.lookback(leg).await?;
                match self.factory(leg).settlement(escrow, &range).await? {
                    Some(settlement) => Ok(settlement.tx().clone()),
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Private withdrawal by the escrow's taker
    pub async fn withdraw(
        &self,
        leg: Leg,
        escrow: &EscrowRef,
        secret: &Secret,
        immutables: &Immutables,
    ) -> Result<TxRef, ResolverError> {
        if !immutables.hash_lock.verify(secret) {
            return Err(ResolverError::SecretMismatch);
        }
        let caller = self.adapter(leg).resolver_address();
        if immutables.taker != caller {
            return Err(ResolverError::UnauthorizedWithdrawer { taker: immutables.taker, caller });
        }
        self.ensure_unsettled(leg, escrow).await?;
        self.check_stage(leg, EscrowAction::PrivateWithdraw, immutables).await?;

        log::info!("[resolver] withdrawing {} escrow {}", leg, escrow);
        let tx = TxRequest::Withdraw { leg, escrow: *escrow, secret: *secret, immutables: *immutables };
        self.settle(leg, escrow, tx).await
    }

    /// Withdrawal by anyone holding the secret, public window only
    pub async fn public_withdraw(
        &self,
        leg: Leg,
        escrow: &EscrowRef,
        secret: &Secret,
        immutables: &Immutables,
    ) -> Result<TxRef, ResolverError> {
        if !immutables.hash_lock.verify(secret) {
            return Err(ResolverError::SecretMismatch);
        }
        self.ensure_unsettled(leg, escrow).await?;
        self.check_stage(leg, EscrowAction::PublicWithdraw, immutables).await?;

        log::info!("[resolver] public withdrawal of {} escrow {}", leg, escrow);
        let tx = TxRequest::PublicWithdraw { leg, escrow: *escrow, secret: *secret, immutables: *immutables };
        self.settle(leg, escrow, tx).await
    }

    /// Cancel `escrow`: privately as its taker, otherwise publicly once the
    /// source public-cancellation window opens
    pub async fn cancel(&self, leg: Leg, escrow: &EscrowRef, immutables: &Immutables) -> Result<TxRef, ResolverError> {
        self.ensure_unsettled(leg, escrow).await?;
        let caller = self.adapter(leg).resolver_address();

        let tx = if immutables.taker == caller {
            self.check_stage(leg, EscrowAction::PrivateCancel, immutables).await?;
            TxRequest::Cancel { leg, escrow: *escrow, immutables: *immutables }
        } else if leg == Leg::Src {
            self.check_stage(leg, EscrowAction::PublicCancel, immutables).await?;
            TxRequest::PublicCancel { leg, escrow: *escrow, immutables: *immutables }
        } else {
            return Err(ResolverError::UnauthorizedWithdrawer { taker: immutables.taker, caller });
        };

        log::info!("[resolver] cancelling {} escrow {}", leg, escrow);
        self.settle(leg, escrow, tx).await
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Rebuild the swap's state from chain events and the order alone
    pub async fn status(&self, order: &Order) -> Result<SwapRecord, ResolverError> {
        let order_hash = order.order_hash();
        let mut record = SwapRecord::new(order_hash);

        let src_range = self.lookback(Leg::Src).await?;
        let src = match self.src_factory.find_source_by_order(&order_hash, &src_range).await? {
            Some(created) => SrcDeployment::from(created),
            None => return Ok(record),
        };
        record.state = SwapState::SrcDeployed;
        record.src_settlement = self.src_factory.settlement(&src.escrow, &src_range).await?;
        record.src = Some(src.clone());

        let dst_range = self.lookback(Leg::Dst).await?;
        let found = self
            .dst_factory
            .find_destination(&order_hash, &src.immutables.hash_lock, &dst_range)
            .await?;
        if let Some(found) = found {
            record.dst_settlement = self.dst_factory.settlement(&found.escrow, &dst_range).await?;
            let immutables = match found.immutables {
                Some(recorded) => Immutables {
                    time_locks: src.immutables.time_locks.with_deployed_at(recorded.time_locks.deployed_at),
                    ..recorded
                },
                None => src.immutables.to_destination(&src.complement, found.taker, 0),
            };
            record.dst = Some(DstDeployment {
                escrow: found.escrow,
                immutables,
                src_cancellation_timestamp: src.immutables.src_cancellation_timestamp(),
                tx: found.tx,
            });
        }

        record.state = SwapState::from_settlements(
            record.dst.is_some(),
            record.src_settlement.as_ref(),
            record.dst_settlement.as_ref(),
        );
        if record.state == SwapState::DstDeployed {
            if let Some(dst) = &record.dst {
                let now = self.chain_time(Leg::Dst).await?;
                if dst.immutables.time_locks.deployed_at != 0
                    && dst.immutables.time_locks.current_stage(Leg::Dst, now) >= Stage::PrivateWithdrawal
                {
                    record.state = SwapState::AwaitingSecretWindow;
                }
            }
        }
        record.updated_at = crate::unix_now();
        Ok(record)
    }

    /// Secret revealed by a settled withdrawal on either leg
    pub fn revealed_secret(record: &SwapRecord) -> Option<Secret> {
        [record.src_settlement.as_ref(), record.dst_settlement.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|s| match s {
                Settlement::Withdrawn { secret, .. } => Some(*secret),
                Settlement::Cancelled { .. } => None,
            })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let early = ResolverError::ActionNotYetLegal {
            leg: Leg::Src,
            action: EscrowAction::PrivateWithdraw,
            stage: Stage::Deploying,
            ready_at: Some(10),
        };
        assert!(early.is_recoverable());
        assert!(!ResolverError::SecretMismatch.is_recoverable());

        let timeout = ResolverError::Chain(ChainError::Timeout { tx_id: "0x1".into() });
        assert!(timeout.requires_recheck());
        let wrapped = ResolverError::Factory(FactoryError::Chain(ChainError::Indeterminate { tx_id: "0x1".into() }));
        assert!(wrapped.requires_recheck());
        assert!(!ResolverError::FillReverted { reason: "x".into() }.requires_recheck());
    }

    #[test]
    fn test_error_display_mentions_ready_time() {
        let e = ResolverError::ActionNotYetLegal {
            leg: Leg::Dst,
            action: EscrowAction::PrivateCancel,
            stage: Stage::PublicWithdrawal,
            ready_at: Some(1_234),
        };
        assert!(e.to_string().contains("1234"));
    }
}
