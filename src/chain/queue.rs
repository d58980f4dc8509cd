// =============================================================================
// CROSSFILL - Submission Queue
// =============================================================================
//
// Submissions from one signer on one chain go out strictly one at a time
// (nonce ordering on EVM, owned-object versions on Move). Different
// (chain, signer) lanes run in parallel. Reads never queue.
//
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{ChainAdapter, ChainError, Receipt, TxRequest};
use crate::address::Address;

type Lane = Arc<Mutex<u64>>;

/// Per-(chain, signer) submission lanes
#[derive(Clone, Default)]
pub struct SubmissionQueue {
    lanes: Arc<std::sync::Mutex<HashMap<(u64, Address), Lane>>>,
}

impl SubmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, chain_id: u64, signer: Address) -> Result<Lane, ChainError> {
        let mut lanes = self
            .lanes
            .lock()
            .map_err(|_| ChainError::Rpc("submission lanes poisoned".into()))?;
        Ok(lanes
            .entry((chain_id, signer))
            .or_insert_with(|| Arc::new(Mutex::new(0)))
            .clone())
    }

    /// Submit through the adapter's lane, waiting for earlier submissions
    pub async fn submit(&self, adapter: &dyn ChainAdapter, tx: &TxRequest) -> Result<Receipt, ChainError> {
        let lane = self.lane(adapter.chain_id(), adapter.signer())?;
        let mut sent = lane.lock().await;
        *sent += 1;
        log::info!(
            "[chain {}] submitting {} (#{} from {})",
            adapter.chain_id(),
            tx.name(),
            *sent,
            adapter.signer().short()
        );
        let result = adapter.submit(tx).await;
        match &result {
            Ok(receipt) => log::info!(
                "[chain {}] {} included in block {} ({})",
                adapter.chain_id(),
                tx.name(),
                receipt.block.height,
                receipt.tx_id
            ),
            Err(e) => log::error!("[chain {}] {} failed: {}", adapter.chain_id(), tx.name(), e),
        }
        result
    }

    /// Submissions sent so far on a lane
    pub async fn sent(&self, chain_id: u64, signer: Address) -> u64 {
        match self.lane(chain_id, signer) {
            Ok(lane) => *lane.lock().await,
            Err(_) => 0,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
