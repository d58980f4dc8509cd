// =============================================================================
// CROSSFILL - Sui (Move) Adapter
// =============================================================================
//
// Escrows on Sui are shared objects created by the `resolver` module of the
// escrow package. Calls are built with `unsafe_moveCall`, signed by an
// injected `TxSigner`, and executed with `WaitForLocalExecution`.
//
// Move renders u64 as decimal strings, vector<u8> as number arrays and
// addresses as 0x-hex. The event structs below reject unknown fields.
//
// =============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::rpc::RpcClient;
use super::{
    BlockQuery, BlockRef, ChainAdapter, ChainError, ChainFamily, EventFilter, EventPayload,
    RawEvent, Receipt, TxRequest,
};
use crate::address::Address;
use crate::amount;
use crate::hashlock::{HashLock, Secret};
use crate::immutables::{DstComplement, Immutables};
use crate::order::OrderHash;
use crate::timelocks::{Leg, TimeLocks};

/// Shared clock object
pub const CLOCK_OBJECT: &str = "0x6";
/// Native coin type
pub const SUI_COIN_TYPE: &str = "0x2::sui::SUI";
/// Module holding the entry functions
pub const RESOLVER_MODULE: &str = "resolver";

const DEFAULT_GAS_BUDGET: u64 = 50_000_000;
const EVENTS_PAGE_LIMIT: u64 = 50;
const MAX_EVENT_PAGES: usize = 20;

// =============================================================================
// Move Event Bodies
// =============================================================================

/// `escrow_factory::SrcEscrowCreated`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoveSrcEscrowCreated {
    pub escrow_id: Address,
    pub order_hash: OrderHash,
    pub hashlock: Vec<u8>,
    pub maker: Address,
    pub taker: Address,
    pub token: Address,
    #[serde(with = "amount::dec64")]
    pub amount: u64,
    #[serde(with = "amount::dec64")]
    pub safety_deposit: u64,
    #[serde(with = "amount::dec64")]
    pub src_withdrawal: u64,
    #[serde(with = "amount::dec64")]
    pub src_public_withdrawal: u64,
    #[serde(with = "amount::dec64")]
    pub src_cancellation: u64,
    #[serde(with = "amount::dec64")]
    pub src_public_cancellation: u64,
    #[serde(with = "amount::dec64")]
    pub dst_withdrawal: u64,
    #[serde(with = "amount::dec64")]
    pub dst_public_withdrawal: u64,
    #[serde(with = "amount::dec64")]
    pub dst_cancellation: u64,
    #[serde(with = "amount::dec64")]
    pub deployed_at: u64,
    pub dst_maker: Address,
    #[serde(with = "amount::dec")]
    pub dst_amount: u128,
    pub dst_token: Address,
    #[serde(with = "amount::dec")]
    pub dst_safety_deposit: u128,
}

/// `escrow_factory::DstEscrowCreated`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoveDstEscrowCreated {
    pub escrow_id: Address,
    pub order_hash: OrderHash,
    pub hashlock: Vec<u8>,
    pub maker: Address,
    pub taker: Address,
    pub token: Address,
    #[serde(with = "amount::dec64")]
    pub amount: u64,
    #[serde(with = "amount::dec64")]
    pub safety_deposit: u64,
    #[serde(with = "amount::dec64")]
    pub dst_withdrawal: u64,
    #[serde(with = "amount::dec64")]
    pub dst_public_withdrawal: u64,
    #[serde(with = "amount::dec64")]
    pub dst_cancellation: u64,
    #[serde(with = "amount::dec64")]
    pub src_cancellation_timestamp: u64,
    #[serde(with = "amount::dec64")]
    pub deployed_at: u64,
}

/// `escrow::EscrowWithdrawal`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoveEscrowWithdrawal {
    pub escrow_id: Address,
    pub secret: Vec<u8>,
}

/// `escrow::EscrowCancelled`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoveEscrowCancelled {
    pub escrow_id: Address,
}

fn to_u64(v: u128, what: &str) -> Result<u64, String> {
    u64::try_from(v).map_err(|_| format!("{} {} exceeds u64", what, v))
}

fn to_u32(v: u64, what: &str) -> Result<u32, String> {
    u32::try_from(v).map_err(|_| format!("{} {} exceeds u32", what, v))
}

fn hash_lock_from(bytes: &[u8]) -> Result<HashLock, String> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| format!("hashlock has {} bytes", bytes.len()))?;
    Ok(HashLock(arr))
}

/// Read an address that belongs to a chain of `family`. Move stores every
/// address in 32 bytes; EVM addresses come back left-padded.
pub fn narrow_address(addr: Address, family: ChainFamily) -> Result<Address, String> {
    match (addr, family) {
        (Address::Object(bytes), ChainFamily::Evm) => Address::from_evm_word(&bytes)
            .ok_or_else(|| format!("{} is not an EVM address", addr)),
        (Address::Evm(_), ChainFamily::Move) => Ok(Address::Object(addr.to_word())),
        _ => Ok(addr),
    }
}

impl MoveSrcEscrowCreated {
    pub fn new(escrow_id: Address, imm: &Immutables, complement: &DstComplement) -> Result<Self, String> {
        let tl = &imm.time_locks;
        Ok(MoveSrcEscrowCreated {
            escrow_id,
            order_hash: imm.order_hash,
            hashlock: imm.hash_lock.0.to_vec(),
            maker: imm.maker,
            taker: imm.taker,
            token: imm.token,
            amount: to_u64(imm.amount, "amount")?,
            safety_deposit: to_u64(imm.safety_deposit, "safety deposit")?,
            src_withdrawal: tl.src_withdrawal as u64,
            src_public_withdrawal: tl.src_public_withdrawal as u64,
            src_cancellation: tl.src_cancellation as u64,
            src_public_cancellation: tl.src_public_cancellation as u64,
            dst_withdrawal: tl.dst_withdrawal as u64,
            dst_public_withdrawal: tl.dst_public_withdrawal as u64,
            dst_cancellation: tl.dst_cancellation as u64,
            deployed_at: tl.deployed_at,
            dst_maker: complement.maker,
            dst_amount: complement.amount,
            dst_token: complement.token,
            dst_safety_deposit: complement.safety_deposit,
        })
    }

    /// Strict decode from parsed JSON
    pub fn decode(
        json: &Value,
        dst_family: ChainFamily,
    ) -> Result<(Address, Immutables, DstComplement), String> {
        let ev: MoveSrcEscrowCreated =
            serde_json::from_value(json.clone()).map_err(|e| e.to_string())?;
        let imm = Immutables {
            order_hash: ev.order_hash,
            hash_lock: hash_lock_from(&ev.hashlock)?,
            maker: ev.maker,
            taker: ev.taker,
            token: ev.token,
            amount: ev.amount as u128,
            safety_deposit: ev.safety_deposit as u128,
            time_locks: TimeLocks {
                src_withdrawal: to_u32(ev.src_withdrawal, "src_withdrawal")?,
                src_public_withdrawal: to_u32(ev.src_public_withdrawal, "src_public_withdrawal")?,
                src_cancellation: to_u32(ev.src_cancellation, "src_cancellation")?,
                src_public_cancellation: to_u32(ev.src_public_cancellation, "src_public_cancellation")?,
                dst_withdrawal: to_u32(ev.dst_withdrawal, "dst_withdrawal")?,
                dst_public_withdrawal: to_u32(ev.dst_public_withdrawal, "dst_public_withdrawal")?,
                dst_cancellation: to_u32(ev.dst_cancellation, "dst_cancellation")?,
                deployed_at: ev.deployed_at,
            },
        };
        let complement = DstComplement {
            maker: narrow_address(ev.dst_maker, dst_family)?,
            amount: ev.dst_amount,
            token: narrow_address(ev.dst_token, dst_family)?,
            safety_deposit: ev.dst_safety_deposit,
        };
        Ok((ev.escrow_id, imm, complement))
    }
}

impl MoveDstEscrowCreated {
    pub fn new(escrow_id: Address, imm: &Immutables, src_cancellation_timestamp: u64) -> Result<Self, String> {
        let tl = &imm.time_locks;
        Ok(MoveDstEscrowCreated {
            escrow_id,
            order_hash: imm.order_hash,
            hashlock: imm.hash_lock.0.to_vec(),
            maker: imm.maker,
            taker: imm.taker,
            token: imm.token,
            amount: to_u64(imm.amount, "amount")?,
            safety_deposit: to_u64(imm.safety_deposit, "safety deposit")?,
            dst_withdrawal: tl.dst_withdrawal as u64,
            dst_public_withdrawal: tl.dst_public_withdrawal as u64,
            dst_cancellation: tl.dst_cancellation as u64,
            src_cancellation_timestamp,
            deployed_at: tl.deployed_at,
        })
    }

    /// Strict decode; source stages of the returned time-locks are zero
    pub fn decode(json: &Value) -> Result<(Address, Immutables), String> {
        let ev: MoveDstEscrowCreated =
            serde_json::from_value(json.clone()).map_err(|e| e.to_string())?;
        let imm = Immutables {
            order_hash: ev.order_hash,
            hash_lock: hash_lock_from(&ev.hashlock)?,
            maker: ev.maker,
            taker: ev.taker,
            token: ev.token,
            amount: ev.amount as u128,
            safety_deposit: ev.safety_deposit as u128,
            time_locks: TimeLocks {
                src_withdrawal: 0,
                src_public_withdrawal: 0,
                src_cancellation: 0,
                src_public_cancellation: 0,
                dst_withdrawal: to_u32(ev.dst_withdrawal, "dst_withdrawal")?,
                dst_public_withdrawal: to_u32(ev.dst_public_withdrawal, "dst_public_withdrawal")?,
                dst_cancellation: to_u32(ev.dst_cancellation, "dst_cancellation")?,
                deployed_at: ev.deployed_at,
            },
        };
        Ok((ev.escrow_id, imm))
    }
}

// =============================================================================
// Move Calls
// =============================================================================

/// One `resolver::<function>` entry call
#[derive(Clone, Debug, PartialEq)]
pub struct MoveCall {
    pub function: &'static str,
    pub type_arguments: Vec<String>,
    pub arguments: Vec<Value>,
}

/// Coin objects pre-split for a funding call
#[derive(Clone, Debug, Default)]
pub struct Funding {
    pub escrow_coin: Option<String>,
    pub deposit_coin: Option<String>,
}

fn u64_arg(v: u128, what: &str) -> Result<Value, ChainError> {
    let v = to_u64(v, what).map_err(ChainError::Encode)?;
    Ok(json!(v.to_string()))
}

fn bytes_arg(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|b| json!(b)).collect())
}

fn coin_arg(coin: &Option<String>, what: &str) -> Result<Value, ChainError> {
    coin.as_ref()
        .map(|c| json!(c))
        .ok_or_else(|| ChainError::Encode(format!("missing {} coin", what)))
}

/// Build the entry call for `tx`. `coin_type` maps a token to its Move type.
pub fn build_move_call(
    tx: &TxRequest,
    coin_type: &dyn Fn(&Address) -> Result<String, ChainError>,
    funding: &Funding,
) -> Result<MoveCall, ChainError> {
    match tx {
        TxRequest::DeploySrc { immutables, order, signature, .. } => {
            let tl = &immutables.time_locks;
            let complement_token = order.taker_asset;
            Ok(MoveCall {
                function: "deploy_src",
                type_arguments: vec![coin_type(&immutables.token)?, SUI_COIN_TYPE.to_string()],
                arguments: vec![
                    json!(CLOCK_OBJECT),
                    coin_arg(&funding.deposit_coin, "safety deposit")?,
                    json!(immutables.order_hash.to_hex()),
                    bytes_arg(&immutables.hash_lock.0),
                    json!(immutables.maker.to_hex()),
                    json!(immutables.taker.to_hex()),
                    json!(immutables.token.to_hex()),
                    u64_arg(immutables.amount, "amount")?,
                    u64_arg(immutables.safety_deposit, "safety deposit")?,
                    json!(tl.src_withdrawal.to_string()),
                    json!(tl.src_public_withdrawal.to_string()),
                    json!(tl.src_cancellation.to_string()),
                    json!(tl.src_public_cancellation.to_string()),
                    json!(tl.dst_withdrawal.to_string()),
                    json!(tl.dst_public_withdrawal.to_string()),
                    json!(tl.dst_cancellation.to_string()),
                    json!(order.dst_receiver().to_hex()),
                    json!(order.taking_amount.to_string()),
                    json!(complement_token.to_hex()),
                    json!(order.dst_safety_deposit.to_string()),
                    bytes_arg(&signature.to_bytes()),
                ],
            })
        }
        TxRequest::DeployDst { immutables, src_cancellation_timestamp } => {
            let tl = &immutables.time_locks;
            Ok(MoveCall {
                function: "deploy_dst",
                type_arguments: vec![coin_type(&immutables.token)?, SUI_COIN_TYPE.to_string()],
                arguments: vec![
                    json!(CLOCK_OBJECT),
                    coin_arg(&funding.escrow_coin, "escrow")?,
                    coin_arg(&funding.deposit_coin, "safety deposit")?,
                    json!(immutables.order_hash.to_hex()),
                    bytes_arg(&immutables.hash_lock.0),
                    json!(immutables.maker.to_hex()),
                    json!(immutables.taker.to_hex()),
                    json!(immutables.token.to_hex()),
                    u64_arg(immutables.amount, "amount")?,
                    u64_arg(immutables.safety_deposit, "safety deposit")?,
                    json!(tl.dst_withdrawal.to_string()),
                    json!(tl.dst_public_withdrawal.to_string()),
                    json!(tl.dst_cancellation.to_string()),
                    json!(src_cancellation_timestamp.to_string()),
                    json!(tl.deployed_at.to_string()),
                ],
            })
        }
        TxRequest::Withdraw { leg, escrow, secret, immutables }
        | TxRequest::PublicWithdraw { leg, escrow, secret, immutables } => {
            let public = matches!(tx, TxRequest::PublicWithdraw { .. });
            let function = match (leg, public) {
                (Leg::Src, false) => "withdraw_src",
                (Leg::Dst, false) => "withdraw_dst",
                (Leg::Src, true) => "public_withdraw_src",
                (Leg::Dst, true) => "public_withdraw_dst",
            };
            Ok(MoveCall {
                function,
                type_arguments: vec![coin_type(&immutables.token)?, SUI_COIN_TYPE.to_string()],
                arguments: vec![
                    json!(CLOCK_OBJECT),
                    json!(escrow.address.to_hex()),
                    bytes_arg(&secret.0),
                ],
            })
        }
        TxRequest::Cancel { leg, escrow, immutables } | TxRequest::PublicCancel { leg, escrow, immutables } => {
            let public = matches!(tx, TxRequest::PublicCancel { .. });
            let function = match (leg, public) {
                (Leg::Src, false) => "cancel_src",
                (Leg::Dst, false) => "cancel_dst",
                (Leg::Src, true) => "public_cancel_src",
                (Leg::Dst, true) => {
                    return Err(ChainError::Unsupported("destination has no public cancel".into()))
                }
            };
            Ok(MoveCall {
                function,
                type_arguments: vec![coin_type(&immutables.token)?, SUI_COIN_TYPE.to_string()],
                arguments: vec![json!(CLOCK_OBJECT), json!(escrow.address.to_hex())],
            })
        }
        TxRequest::Transfer { .. } | TxRequest::Approve { .. } => Err(ChainError::Unsupported(
            format!("{} is not a resolver entry call", tx.name()),
        )),
    }
}

// =============================================================================
// Signer
// =============================================================================

/// Signs base64 transaction bytes; key custody lives outside this crate
pub trait TxSigner: Send + Sync {
    /// Sui address of the key
    fn address(&self) -> Address;

    /// Serialized signature (base64, flag || sig || pubkey)
    fn sign(&self, tx_bytes_b64: &str) -> Result<String, ChainError>;
}

/// Address without a key: reads work, submissions are refused
pub struct WatchOnlySigner(pub Address);

impl TxSigner for WatchOnlySigner {
    fn address(&self) -> Address {
        self.0
    }

    fn sign(&self, _tx_bytes_b64: &str) -> Result<String, ChainError> {
        Err(ChainError::Unsupported(format!("{} is watch-only", self.0.short())))
    }
}

// =============================================================================
// RPC Adapter
// =============================================================================

pub struct SuiRpcAdapter {
    rpc: RpcClient,
    chain_id: u64,
    package: Address,
    coin_types: HashMap<Address, String>,
    signer: Arc<dyn TxSigner>,
    gas_budget: u64,
    confirm_timeout: Duration,
}

impl SuiRpcAdapter {
    pub fn new(
        rpc_url: &str,
        chain_id: u64,
        package: Address,
        coin_types: HashMap<Address, String>,
        signer: Arc<dyn TxSigner>,
        confirm_timeout: Duration,
    ) -> Self {
        SuiRpcAdapter {
            rpc: RpcClient::new(rpc_url, confirm_timeout),
            chain_id,
            package,
            coin_types,
            signer,
            gas_budget: DEFAULT_GAS_BUDGET,
            confirm_timeout,
        }
    }

    pub fn with_gas_budget(mut self, budget: u64) -> Self {
        self.gas_budget = budget;
        self
    }

    fn coin_type(&self, token: &Address) -> Result<String, ChainError> {
        if *token == ChainFamily::Move.native_token() {
            return Ok(SUI_COIN_TYPE.to_string());
        }
        self.coin_types
            .get(token)
            .cloned()
            .ok_or_else(|| ChainError::Encode(format!("no coin type configured for {}", token)))
    }

    async fn checkpoint_timestamp(&self, seq: u64) -> Result<u64, ChainError> {
        let cp = self.rpc.call("sui_getCheckpoint", json!([seq.to_string()])).await?;
        let ms = cp
            .get("timestampMs")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| ChainError::Rpc("checkpoint without timestampMs".into()))?;
        Ok(ms / 1_000)
    }

    /// Sign and execute prepared transaction bytes
    async fn execute(&self, tx_bytes: &str) -> Result<Value, ChainError> {
        let signature = self.signer.sign(tx_bytes)?;
        let params = json!([
            tx_bytes,
            [signature],
            { "showEffects": true, "showEvents": true, "showObjectChanges": true },
            "WaitForLocalExecution"
        ]);
        let call = self.rpc.call("sui_executeTransactionBlock", params);
        match tokio::time::timeout(self.confirm_timeout, call).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(ChainError::Rpc(e))) if e.contains("timed out") => {
                Err(ChainError::Indeterminate { tx_id: "unknown".into() })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ChainError::Timeout { tx_id: "unknown".into() }),
        }
    }

    /// Split an exact-amount coin of `coin_type` off the signer's coins
    async fn split_coin(&self, coin_type: &str, amount: u128) -> Result<String, ChainError> {
        let owner = self.signer.address().to_hex();
        let page = self
            .rpc
            .call("suix_getCoins", json!([owner, coin_type, null, 50]))
            .await?;
        let coin_id = page
            .get("data")
            .and_then(Value::as_array)
            .and_then(|coins| {
                coins.iter().find(|c| {
                    c.get("balance")
                        .and_then(Value::as_str)
                        .and_then(|b| b.parse::<u128>().ok())
                        .map(|b| b >= amount)
                        .unwrap_or(false)
                })
            })
            .and_then(|c| c.get("coinObjectId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ChainError::Rpc(format!("no {} coin covering {}", coin_type, amount)))?;

        let built = self
            .rpc
            .call(
                "unsafe_splitCoin",
                json!([owner, coin_id, [amount.to_string()], null, self.gas_budget.to_string()]),
            )
            .await?;
        let tx_bytes = built
            .get("txBytes")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Rpc("splitCoin returned no txBytes".into()))?
            .to_string();
        let response = self.execute(&tx_bytes).await?;
        check_status(&response)?;

        response
            .get("objectChanges")
            .and_then(Value::as_array)
            .and_then(|changes| {
                changes.iter().find(|c| {
                    c.get("type").and_then(Value::as_str) == Some("created")
                        && c.get("objectType")
                            .and_then(Value::as_str)
                            .map(|t| t.contains(coin_type.trim_start_matches("0x")))
                            .unwrap_or(false)
                })
            })
            .and_then(|c| c.get("objectId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ChainError::Rpc("split produced no coin".into()))
    }

    async fn funding_for(&self, tx: &TxRequest) -> Result<Funding, ChainError> {
        match tx {
            TxRequest::DeploySrc { immutables, .. } => Ok(Funding {
                escrow_coin: None,
                deposit_coin: Some(self.split_coin(SUI_COIN_TYPE, immutables.safety_deposit).await?),
            }),
            TxRequest::DeployDst { immutables, .. } => {
                let coin_type = self.coin_type(&immutables.token)?;
                Ok(Funding {
                    escrow_coin: Some(self.split_coin(&coin_type, immutables.amount).await?),
                    deposit_coin: Some(self.split_coin(SUI_COIN_TYPE, immutables.safety_deposit).await?),
                })
            }
            _ => Ok(Funding::default()),
        }
    }

    async fn transfer(&self, token: &Address, to: &Address, amount: u128) -> Result<Value, ChainError> {
        let coin_type = self.coin_type(token)?;
        let coin = self.split_coin(&coin_type, amount).await?;
        let built = self
            .rpc
            .call(
                "unsafe_transferObject",
                json!([self.signer.address().to_hex(), coin, null, self.gas_budget.to_string(), to.to_hex()]),
            )
            .await?;
        let tx_bytes = built
            .get("txBytes")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Rpc("transferObject returned no txBytes".into()))?
            .to_string();
        self.execute(&tx_bytes).await
    }

    fn parse_event(&self, ev: &Value, block: BlockRef) -> Option<RawEvent> {
        let event_type = ev.get("type")?.as_str()?.to_string();
        let tx_id = ev
            .get("id")
            .and_then(|id| id.get("txDigest"))
            .and_then(Value::as_str)
            .unwrap_or(&block.hash)
            .to_string();
        Some(RawEvent {
            chain_id: self.chain_id,
            block: BlockRef { height: block.height, hash: tx_id.clone() },
            tx_id,
            payload: EventPayload::Move {
                event_type,
                json: ev.get("parsedJson").cloned().unwrap_or(Value::Null),
            },
        })
    }

    async fn receipt_from(&self, response: &Value) -> Result<Receipt, ChainError> {
        let digest = response
            .get("digest")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        check_status(response).map_err(|e| match e {
            ChainError::TransactionReverted { reason, .. } => {
                ChainError::TransactionReverted { tx_id: digest.clone(), reason }
            }
            other => other,
        })?;

        let height = match response.get("checkpoint").and_then(Value::as_str) {
            Some(cp) => cp.parse::<u64>().unwrap_or(0),
            None => self.latest_block().await?,
        };
        let confirmed_at = match response.get("timestampMs").and_then(Value::as_str) {
            Some(ms) => ms.parse::<u64>().unwrap_or(0) / 1_000,
            None => self.chain_time().await?,
        };
        let block = BlockRef { height, hash: digest.clone() };
        let events = response
            .get("events")
            .and_then(Value::as_array)
            .map(|evs| evs.iter().filter_map(|e| self.parse_event(e, block.clone())).collect())
            .unwrap_or_default();

        Ok(Receipt { tx_id: digest, block, confirmed_at, events })
    }
}

fn check_status(response: &Value) -> Result<(), ChainError> {
    let status = response
        .get("effects")
        .and_then(|e| e.get("status"))
        .ok_or_else(|| ChainError::Rpc("response without effects".into()))?;
    if status.get("status").and_then(Value::as_str) == Some("success") {
        return Ok(());
    }
    let reason = status
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("execution failed")
        .to_string();
    Err(ChainError::TransactionReverted { tx_id: String::new(), reason })
}

#[async_trait]
impl ChainAdapter for SuiRpcAdapter {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn family(&self) -> ChainFamily {
        ChainFamily::Move
    }

    fn signer(&self) -> Address {
        self.signer.address()
    }

    fn resolver_address(&self) -> Address {
        self.signer.address()
    }

    async fn chain_time(&self) -> Result<u64, ChainError> {
        let seq = self.latest_block().await?;
        self.checkpoint_timestamp(seq).await
    }

    async fn latest_block(&self) -> Result<u64, ChainError> {
        let v = self
            .rpc
            .call("sui_getLatestCheckpointSequenceNumber", json!([]))
            .await?;
        v.as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| ChainError::Rpc(format!("bad checkpoint number {}", v)))
    }

    async fn get_balance(&self, token: &Address, owner: &Address) -> Result<u128, ChainError> {
        let coin_type = self.coin_type(token)?;
        let v = self
            .rpc
            .call("suix_getBalance", json!([owner.to_hex(), coin_type]))
            .await?;
        v.get("totalBalance")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u128>().ok())
            .ok_or_else(|| ChainError::Rpc(format!("bad balance response {}", v)))
    }

    async fn submit(&self, tx: &TxRequest) -> Result<Receipt, ChainError> {
        if let TxRequest::Transfer { token, to, amount } = tx {
            let response = self.transfer(token, to, *amount).await?;
            return self.receipt_from(&response).await;
        }
        if let TxRequest::Approve { .. } = tx {
            return Err(ChainError::Unsupported("Move coins have no allowances".into()));
        }

        let funding = self.funding_for(tx).await?;
        let call = build_move_call(tx, &|t| self.coin_type(t), &funding)?;
        log::debug!("[sui {}] {}::{}", self.chain_id, RESOLVER_MODULE, call.function);

        let built = self
            .rpc
            .call(
                "unsafe_moveCall",
                json!([
                    self.signer.address().to_hex(),
                    self.package.to_hex(),
                    RESOLVER_MODULE,
                    call.function,
                    call.type_arguments,
                    call.arguments,
                    null,
                    self.gas_budget.to_string()
                ]),
            )
            .await?;
        let tx_bytes = built
            .get("txBytes")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Rpc("moveCall returned no txBytes".into()))?
            .to_string();

        let response = self.execute(&tx_bytes).await?;
        self.receipt_from(&response).await
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<RawEvent>, ChainError> {
        let event_type = filter.kind.move_type(&filter.contract);
        let (query, window) = match &filter.range {
            BlockQuery::Block(b) => (json!({ "Transaction": b.hash }), None),
            BlockQuery::Tx(digest) => (json!({ "Transaction": digest }), None),
            BlockQuery::Range { from, to } => {
                let start = self.checkpoint_timestamp(*from).await?;
                let end = self.checkpoint_timestamp(*to).await?;
                (json!({ "MoveEventType": event_type }), Some((start * 1_000, end * 1_000 + 999)))
            }
        };

        let mut out = Vec::new();
        let mut cursor = Value::Null;
        for _ in 0..MAX_EVENT_PAGES {
            let page = self
                .rpc
                .call("suix_queryEvents", json!([query, cursor, EVENTS_PAGE_LIMIT, false]))
                .await?;
            let data = page.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
            for ev in &data {
                if ev.get("type").and_then(Value::as_str) != Some(event_type.as_str()) {
                    continue;
                }
                if let Some((start, end)) = window {
                    let ts = ev
                        .get("timestampMs")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(0);
                    if ts < start || ts > end {
                        continue;
                    }
                }
                let block = BlockRef { height: 0, hash: String::new() };
                if let Some(raw) = self.parse_event(ev, block) {
                    out.push(raw);
                }
            }
            if page.get("hasNextPage").and_then(Value::as_bool) != Some(true) {
                break;
            }
            cursor = page.get("nextCursor").cloned().unwrap_or(Value::Null);
        }
        log::debug!("[sui {}] {} {} events", self.chain_id, out.len(), event_type);
        Ok(out)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::EscrowRef;
    use crate::order::tests::sample_order;

    fn dst_immutables() -> Immutables {
        let order = sample_order();
        let src = Immutables::for_source(&order, Address::Evm([0xaa; 20]), order.making_amount, 1_000);
        let complement = DstComplement {
            maker: Address::Object([0x22; 32]),
            amount: 1_000_000,
            token: Address::Object([0x44; 32]),
            safety_deposit: 10,
        };
        src.to_destination(&complement, Address::Object([0xcc; 32]), 1_005)
    }

    fn coin_types(t: &Address) -> Result<String, ChainError> {
        Ok(format!("{}::usdc::USDC", t.to_hex()))
    }

    #[test]
    fn test_dst_created_decode() {
        let imm = dst_immutables();
        let escrow = Address::Object([0xee; 32]);
        let ev = MoveDstEscrowCreated::new(escrow, &imm, 2_000).unwrap();
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["amount"], json!("1000000"));

        let (id, decoded) = MoveDstEscrowCreated::decode(&json).unwrap();
        assert_eq!(id, escrow);
        assert!(decoded.dst_fields_match(&imm));
        assert_eq!(decoded.time_locks.src_withdrawal, 0);
    }

    #[test]
    fn test_decode_rejects_unknown_fields() {
        let imm = dst_immutables();
        let mut json = serde_json::to_value(MoveDstEscrowCreated::new(Address::Object([1; 32]), &imm, 2_000).unwrap()).unwrap();
        json["surprise"] = json!(1);
        assert!(MoveDstEscrowCreated::decode(&json).is_err());
    }

    #[test]
    fn test_decode_rejects_short_hashlock() {
        let imm = dst_immutables();
        let mut json = serde_json::to_value(MoveDstEscrowCreated::new(Address::Object([1; 32]), &imm, 2_000).unwrap()).unwrap();
        json["hashlock"] = json!([1, 2, 3]);
        assert!(MoveDstEscrowCreated::decode(&json).is_err());
    }

    #[test]
    fn test_src_created_narrows_evm_complement() {
        let order = sample_order();
        let src = Immutables::for_source(&order, Address::Object([0xaa; 32]), order.making_amount, 1_000);
        let complement = DstComplement {
            maker: Address::Evm([0x22; 20]),
            amount: 10u128.pow(24),
            token: Address::Evm([0x44; 20]),
            safety_deposit: 10,
        };
        let ev = MoveSrcEscrowCreated::new(Address::Object([0xee; 32]), &src, &complement).unwrap();
        let mut json = serde_json::to_value(&ev).unwrap();
        // Move renders addresses full width
        json["dst_maker"] = json!(Address::Object(complement.maker.to_word()).to_hex());

        let (_, imm, comp) = MoveSrcEscrowCreated::decode(&json, ChainFamily::Evm).unwrap();
        assert_eq!(imm, src);
        assert_eq!(comp, complement);
    }

    #[test]
    fn test_deploy_dst_argument_order() {
        let imm = dst_immutables();
        let tx = TxRequest::DeployDst { immutables: imm, src_cancellation_timestamp: 2_000 };
        let funding = Funding { escrow_coin: Some("0xc0".into()), deposit_coin: Some("0xd0".into()) };
        let call = build_move_call(&tx, &coin_types, &funding).unwrap();

        assert_eq!(call.function, "deploy_dst");
        assert_eq!(call.arguments.len(), 15);
        assert_eq!(call.arguments[0], json!(CLOCK_OBJECT));
        assert_eq!(call.arguments[1], json!("0xc0"));
        assert_eq!(call.arguments[2], json!("0xd0"));
        assert_eq!(call.arguments[3], json!(imm.order_hash.to_hex()));
        assert_eq!(call.arguments[8], json!("1000000"));
        assert_eq!(call.arguments[13], json!("2000"));
        assert_eq!(call.arguments[14], json!("1005"));
        assert_eq!(call.type_arguments[1], SUI_COIN_TYPE);
    }

    #[test]
    fn test_withdraw_function_by_leg() {
        let imm = dst_immutables();
        let escrow = EscrowRef { chain_id: 101, address: Address::Object([0xee; 32]) };
        let secret = Secret([3; 32]);
        let call = build_move_call(
            &TxRequest::Withdraw { leg: Leg::Dst, escrow, secret, immutables: imm },
            &coin_types,
            &Funding::default(),
        )
        .unwrap();
        assert_eq!(call.function, "withdraw_dst");
        assert_eq!(call.arguments.len(), 3);

        let err = build_move_call(
            &TxRequest::PublicCancel { leg: Leg::Dst, escrow, immutables: imm },
            &coin_types,
            &Funding::default(),
        );
        assert!(matches!(err, Err(ChainError::Unsupported(_))));
    }

    #[test]
    fn test_amount_must_fit_u64() {
        let mut imm = dst_immutables();
        imm.amount = u64::MAX as u128 + 1;
        let tx = TxRequest::DeployDst { immutables: imm, src_cancellation_timestamp: 2_000 };
        let funding = Funding { escrow_coin: Some("0xc0".into()), deposit_coin: Some("0xd0".into()) };
        assert!(matches!(build_move_call(&tx, &coin_types, &funding), Err(ChainError::Encode(_))));
    }

    #[test]
    fn test_watch_only_signer_refuses() {
        let signer = WatchOnlySigner(Address::Object([0xaa; 32]));
        assert_eq!(signer.address(), Address::Object([0xaa; 32]));
        assert!(matches!(signer.sign("AAAA"), Err(ChainError::Unsupported(_))));
    }
}
