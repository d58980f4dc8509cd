// =============================================================================
// CROSSFILL - Secret Relay
// =============================================================================
//
// Holds makers' secrets and hands one out only once the destination escrow
// for that order is funded on chain with the terms the maker signed.
//
// The escrow the resolver names is read back from the destination factory
// and its recorded terms are checked before the balance. EVM creation logs
// carry only hash-lock and taker, so there the remaining terms come from the
// caller and are bounded by the balance check.
//
// =============================================================================

use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ResolverError, DEFAULT_LOOKBACK_BLOCKS};
use crate::chain::{ChainAdapter, EscrowRef};
use crate::factory::EscrowFactory;
use crate::hashlock::{HashLock, Secret};
use crate::immutables::Immutables;
use crate::order::{Order, OrderHash};

pub struct SecretRelay {
    secrets: RwLock<HashMap<OrderHash, (Order, Secret)>>,
    /// Blocks searched for the destination creation event
    lookback_blocks: u64,
}

impl Default for SecretRelay {
    fn default() -> Self {
        SecretRelay { secrets: RwLock::new(HashMap::new()), lookback_blocks: DEFAULT_LOOKBACK_BLOCKS }
    }
}

impl SecretRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lookback(mut self, lookback_blocks: u64) -> Self {
        self.lookback_blocks = lookback_blocks;
        self
    }

    /// Register the maker's secret for `order`
    pub async fn register(&self, order: Order, secret: Secret) -> Result<OrderHash, ResolverError> {
        if HashLock::commit(&secret) != order.hash_lock {
            return Err(ResolverError::SecretMismatch);
        }
        let id = order.order_hash();
        self.secrets.write().await.insert(id, (order, secret));
        log::debug!("[relay] secret registered for {}", id.short());
        Ok(id)
    }

    pub async fn contains(&self, order_hash: &OrderHash) -> bool {
        self.secrets.read().await.contains_key(order_hash)
    }

    pub async fn forget(&self, order_hash: &OrderHash) {
        self.secrets.write().await.remove(order_hash);
    }

    /// Release the secret once the destination factory shows `escrow`
    /// created and funded with the maker's terms. `claimed` is what the
    /// resolver says it deployed; it is checked against the chain, never
    /// trusted on its own.
    pub async fn release(
        &self,
        order_hash: &OrderHash,
        escrow: &EscrowRef,
        claimed: &Immutables,
        factory: &EscrowFactory,
    ) -> Result<Secret, ResolverError> {
        let (order, secret) = match self.secrets.read().await.get(order_hash) {
            Some((order, secret)) => (order.clone(), *secret),
            None => return Err(ResolverError::InvalidState(format!("no secret for {}", order_hash.short()))),
        };

        if escrow.chain_id != order.dst_chain_id || factory.chain_id() != order.dst_chain_id {
            return Err(ResolverError::CrossLegMismatch(format!(
                "escrow on chain {}, order targets {}",
                escrow.chain_id, order.dst_chain_id
            )));
        }

        let range = factory.recent(self.lookback_blocks).await?;
        let created = factory
            .decode_destination_creation_events(&range)
            .await?
            .into_iter()
            .find(|c| c.escrow == *escrow)
            .ok_or_else(|| {
                ResolverError::InvalidState(format!("no destination escrow created at {}", escrow))
            })?;
        if created.hash_lock != order.hash_lock || created.taker != claimed.taker {
            return Err(ResolverError::CrossLegMismatch(format!(
                "escrow {} was created for another hash-lock or taker",
                escrow
            )));
        }
        let terms = match created.immutables {
            Some(recorded) if recorded.dst_fields_match(claimed) => recorded,
            Some(_) => {
                return Err(ResolverError::CrossLegMismatch(format!(
                    "escrow {} recorded different terms",
                    escrow
                )))
            }
            None => *claimed,
        };

        if terms.order_hash != *order_hash || terms.hash_lock != order.hash_lock {
            return Err(ResolverError::CrossLegMismatch("escrow binds another swap".into()));
        }
        if terms.token != order.taker_asset || terms.maker != order.dst_receiver() {
            return Err(ResolverError::CrossLegMismatch("escrow pays the wrong asset or receiver".into()));
        }
        if terms.amount < order.taking_amount {
            return Err(ResolverError::CrossLegMismatch(format!(
                "escrow holds {}, order requires {}",
                terms.amount, order.taking_amount
            )));
        }
        if !terms.time_locks.same_dst_offsets(&order.time_locks) {
            return Err(ResolverError::CrossLegMismatch("destination windows differ".into()));
        }

        let held = factory.adapter().get_balance(&terms.token, &escrow.address).await?;
        if held < terms.amount {
            return Err(ResolverError::InvalidState(format!(
                "escrow {} holds {} of {}",
                escrow, held, terms.amount
            )));
        }

        log::info!("[relay] releasing secret for {}", order_hash.short());
        Ok(secret)
    }
}

// =============================================================================
// Tests
// =============================================================================
