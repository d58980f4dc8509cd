// =============================================================================
// CROSSFILL - Chain Adapters
// =============================================================================
//
// One adapter per chain family, behind a single trait:
// - EvmRpcAdapter: JSON-RPC against an EVM node
// - SuiRpcAdapter: JSON-RPC against a Sui full node
// - SimulatedChain: in-process ledger with real escrow rules
//
// Adapters encode `TxRequest`s natively, block until inclusion, and never
// resubmit on their own. Whether a timed-out transaction landed is the
// caller's question to answer by re-querying.
//
// =============================================================================

pub mod abi;
pub mod evm;
pub mod queue;
pub mod rpc;
pub mod simulated;
pub mod sui;

pub use evm::EvmRpcAdapter;
pub use queue::SubmissionQueue;
pub use simulated::{SimulatedChain, SimulatedLedger};
pub use sui::{SuiRpcAdapter, TxSigner};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::Address;
use crate::hashlock::{keccak256, Secret};
use crate::immutables::Immutables;
use crate::order::{Order, OrderSignature, TakerTraits};
use crate::timelocks::Leg;

// =============================================================================
// Errors
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainError {
    /// Included and reverted
    TransactionReverted { tx_id: String, reason: String },
    /// Not confirmed within the adapter's timeout
    Timeout { tx_id: String },
    /// Sent, but the outcome could not be determined
    Indeterminate { tx_id: String },
    /// Transport or node error before anything was sent
    Rpc(String),
    /// Request cannot be expressed on this chain
    Encode(String),
    /// Operation not supported by this adapter
    Unsupported(String),
}

impl ChainError {
    /// The transaction may or may not have landed
    pub fn requires_recheck(&self) -> bool {
        matches!(self, ChainError::Timeout { .. } | ChainError::Indeterminate { .. })
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::TransactionReverted { tx_id, reason } => {
                write!(f, "Transaction {} reverted: {}", tx_id, reason)
            }
            ChainError::Timeout { tx_id } => write!(f, "Transaction {} not confirmed in time", tx_id),
            ChainError::Indeterminate { tx_id } => write!(f, "Transaction {} outcome unknown", tx_id),
            ChainError::Rpc(s) => write!(f, "RPC error: {}", s),
            ChainError::Encode(s) => write!(f, "Encoding error: {}", s),
            ChainError::Unsupported(s) => write!(f, "Unsupported: {}", s),
        }
    }
}

impl std::error::Error for ChainError {}

// =============================================================================
// Chain Family
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// Account-model EVM chain
    Evm,
    /// Object-model Move ledger (Sui)
    #[serde(alias = "sui")]
    Move,
}

impl ChainFamily {
    /// Native coin, as the token address used for safety deposits
    pub fn native_token(&self) -> Address {
        match self {
            ChainFamily::Evm => Address::ZERO_EVM,
            ChainFamily::Move => {
                let mut sui = [0u8; 32];
                sui[31] = 2;
                Address::Object(sui)
            }
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainFamily::Evm => write!(f, "evm"),
            ChainFamily::Move => write!(f, "move"),
        }
    }
}

// =============================================================================
// References
// =============================================================================

/// A deployed escrow on a specific chain
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EscrowRef {
    pub chain_id: u64,
    /// Contract address (EVM) or object id (Move)
    pub address: Address,
}

impl fmt::Display for EscrowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address.short(), self.chain_id)
    }
}

/// Block (EVM) or checkpoint (Move) reference
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub height: u64,
    /// Block hash (EVM) or transaction digest (Move)
    pub hash: String,
}

/// A confirmed transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRef {
    pub chain_id: u64,
    pub tx_id: String,
    pub block: BlockRef,
}

/// Inclusion receipt
#[derive(Clone, Debug, PartialEq)]
pub struct Receipt {
    pub tx_id: String,
    pub block: BlockRef,
    /// Block timestamp
    pub confirmed_at: u64,
    pub events: Vec<RawEvent>,
}

impl Receipt {
    pub fn tx_ref(&self, chain_id: u64) -> TxRef {
        TxRef { chain_id, tx_id: self.tx_id.clone(), block: self.block.clone() }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Escrow lifecycle events the factory client understands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    SrcEscrowCreated,
    DstEscrowCreated,
    EscrowWithdrawal,
    EscrowCancelled,
}

impl EventKind {
    /// Solidity event signature
    pub fn evm_signature(&self) -> &'static str {
        match self {
            EventKind::SrcEscrowCreated => "SrcEscrowCreated((bytes32,bytes32,uint256,uint256,uint256,uint256,uint256,uint256),(uint256,uint256,uint256,uint256))",
            EventKind::DstEscrowCreated => "DstEscrowCreated(address,bytes32,uint256)",
            EventKind::EscrowWithdrawal => "EscrowWithdrawal(bytes32)",
            EventKind::EscrowCancelled => "EscrowCancelled()",
        }
    }

    /// topic0 of the EVM log
    pub fn evm_topic(&self) -> [u8; 32] {
        keccak256(self.evm_signature().as_bytes())
    }

    /// Fully-qualified Move event type under `package`
    pub fn move_type(&self, package: &Address) -> String {
        let (module, name) = match self {
            EventKind::SrcEscrowCreated => ("escrow_factory", "SrcEscrowCreated"),
            EventKind::DstEscrowCreated => ("escrow_factory", "DstEscrowCreated"),
            EventKind::EscrowWithdrawal => ("escrow", "EscrowWithdrawal"),
            EventKind::EscrowCancelled => ("escrow", "EscrowCancelled"),
        };
        format!("{}::{}::{}", package.to_hex(), module, name)
    }
}

/// Event body in the emitting chain's native encoding
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    /// EVM log
    Log { address: Address, topics: Vec<[u8; 32]>, data: Vec<u8> },
    /// Move event with its parsed JSON
    Move { event_type: String, json: serde_json::Value },
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawEvent {
    pub chain_id: u64,
    pub block: BlockRef,
    pub tx_id: String,
    pub payload: EventPayload,
}

impl RawEvent {
    /// Does this event look like `kind` emitted by `contract`?
    pub fn is(&self, kind: EventKind, contract: &Address) -> bool {
        match &self.payload {
            EventPayload::Log { address, topics, .. } => {
                address == contract && topics.first() == Some(&kind.evm_topic())
            }
            EventPayload::Move { event_type, .. } => *event_type == kind.move_type(contract),
        }
    }
}

/// Where to look for events
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockQuery {
    /// One block (by hash when known)
    Block(BlockRef),
    /// Events of one transaction
    Tx(String),
    /// Inclusive height range
    Range { from: u64, to: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventFilter {
    /// Emitting contract (EVM) or package (Move)
    pub contract: Address,
    pub kind: EventKind,
    pub range: BlockQuery,
}

// =============================================================================
// Transaction Requests
// =============================================================================

/// Typed escrow calls; each adapter encodes them natively
#[derive(Clone, Debug)]
pub enum TxRequest {
    /// Fill the order through the resolver contract, creating the source escrow
    DeploySrc {
        immutables: Immutables,
        order: Box<Order>,
        signature: OrderSignature,
        amount: u128,
        taker_traits: TakerTraits,
        args: Vec<u8>,
    },
    /// Fund and create the destination escrow
    DeployDst { immutables: Immutables, src_cancellation_timestamp: u64 },
    /// Taker withdrawal (private window)
    Withdraw { leg: Leg, escrow: EscrowRef, secret: Secret, immutables: Immutables },
    /// Anyone with the secret (public window)
    PublicWithdraw { leg: Leg, escrow: EscrowRef, secret: Secret, immutables: Immutables },
    /// Taker cancellation
    Cancel { leg: Leg, escrow: EscrowRef, immutables: Immutables },
    /// Anyone (source public cancellation window)
    PublicCancel { leg: Leg, escrow: EscrowRef, immutables: Immutables },
    Transfer { token: Address, to: Address, amount: u128 },
    Approve { token: Address, spender: Address, amount: u128 },
}

impl TxRequest {
    pub fn name(&self) -> &'static str {
        match self {
            TxRequest::DeploySrc { .. } => "deploySrc",
            TxRequest::DeployDst { .. } => "deployDst",
            TxRequest::Withdraw { .. } => "withdraw",
            TxRequest::PublicWithdraw { .. } => "publicWithdraw",
            TxRequest::Cancel { .. } => "cancel",
            TxRequest::PublicCancel { .. } => "publicCancel",
            TxRequest::Transfer { .. } => "transfer",
            TxRequest::Approve { .. } => "approve",
        }
    }

    /// Native value attached to the call (safety deposits)
    pub fn native_value(&self) -> u128 {
        match self {
            TxRequest::DeploySrc { immutables, .. } | TxRequest::DeployDst { immutables, .. } => {
                immutables.safety_deposit
            }
            _ => 0,
        }
    }
}

// =============================================================================
// Adapter Trait
// =============================================================================

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> u64;

    fn family(&self) -> ChainFamily;

    /// Wallet that signs submissions
    fn signer(&self) -> Address;

    /// Address recorded as `taker` in escrows this adapter creates:
    /// the resolver contract on EVM, the signer on Move ledgers
    fn resolver_address(&self) -> Address;

    /// Latest block timestamp (seconds)
    async fn chain_time(&self) -> Result<u64, ChainError>;

    /// Latest block height / checkpoint
    async fn latest_block(&self) -> Result<u64, ChainError>;

    async fn get_balance(&self, token: &Address, owner: &Address) -> Result<u128, ChainError>;

    /// Send and wait for inclusion
    async fn submit(&self, tx: &TxRequest) -> Result<Receipt, ChainError>;

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<RawEvent>, ChainError>;
}

// =============================================================================
// Tests
// =============================================================================
