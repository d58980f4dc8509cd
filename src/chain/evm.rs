// =============================================================================
// CROSSFILL - EVM Adapter
// =============================================================================
//
// JSON-RPC adapter for EVM chains. Transactions go out through
// `eth_sendTransaction` from an account the node manages (dev node, or a
// signing proxy in front of the real node); receipts are polled until
// inclusion or `confirm_timeout`.
//
// =============================================================================

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::abi;
use super::rpc::{parse_hex_bytes, parse_quantity, parse_word, to_quantity, CallFailure, RpcClient};
use super::{
    BlockQuery, BlockRef, ChainAdapter, ChainError, ChainFamily, EventFilter, EventPayload, RawEvent,
    Receipt, TxRequest,
};
use crate::address::Address;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Gas limit for escrow calls; nodes estimate when omitted, but estimation
/// fails for calls that only succeed after a time-lock boundary
const ESCROW_GAS_LIMIT: u64 = 1_000_000;

pub struct EvmRpcAdapter {
    rpc: RpcClient,
    chain_id: u64,
    signer: Address,
    resolver_contract: Address,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl EvmRpcAdapter {
    pub fn new(
        rpc_url: &str,
        chain_id: u64,
        signer: Address,
        resolver_contract: Address,
        confirm_timeout: Duration,
    ) -> Self {
        EvmRpcAdapter {
            rpc: RpcClient::new(rpc_url, confirm_timeout),
            chain_id,
            signer,
            resolver_contract,
            confirm_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// (to, calldata) for a request
    fn encode(&self, tx: &TxRequest) -> Result<(Address, Vec<u8>), ChainError> {
        let enc = |e: abi::AbiError| ChainError::Encode(e.0);
        match tx {
            TxRequest::DeploySrc { immutables, order, signature, amount, taker_traits, args } => Ok((
                self.resolver_contract,
                abi::encode_deploy_src(immutables, order, signature, *amount, taker_traits, args).map_err(enc)?,
            )),
            TxRequest::DeployDst { immutables, src_cancellation_timestamp } => Ok((
                self.resolver_contract,
                abi::encode_deploy_dst(immutables, *src_cancellation_timestamp).map_err(enc)?,
            )),
            TxRequest::Withdraw { escrow, secret, immutables, .. } => Ok((
                self.resolver_contract,
                abi::encode_withdraw(&escrow.address, secret, immutables).map_err(enc)?,
            )),
            TxRequest::Cancel { escrow, immutables, .. } => Ok((
                self.resolver_contract,
                abi::encode_cancel(&escrow.address, immutables).map_err(enc)?,
            )),
            TxRequest::PublicWithdraw { escrow, secret, immutables, .. } => Ok((
                escrow.address,
                abi::encode_public_withdraw(secret, immutables).map_err(enc)?,
            )),
            TxRequest::PublicCancel { escrow, immutables, .. } => {
                Ok((escrow.address, abi::encode_public_cancel(immutables).map_err(enc)?))
            }
            TxRequest::Transfer { token, to, amount } => {
                if *token == ChainFamily::Evm.native_token() {
                    Ok((*to, Vec::new()))
                } else {
                    Ok((*token, abi::encode_erc20_transfer(to, *amount)))
                }
            }
            TxRequest::Approve { token, spender, amount } => {
                Ok((*token, abi::encode_erc20_approve(spender, *amount)))
            }
        }
    }

    fn native_value(tx: &TxRequest) -> u128 {
        match tx {
            TxRequest::Transfer { token, amount, .. } if *token == ChainFamily::Evm.native_token() => *amount,
            _ => tx.native_value(),
        }
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Value, ChainError> {
        let deadline = tokio::time::Instant::now() + self.confirm_timeout;
        loop {
            match self.rpc.call("eth_getTransactionReceipt", json!([tx_hash])).await {
                Ok(Value::Null) => {}
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    log::warn!("[evm {}] receipt poll for {} failed: {}", self.chain_id, tx_hash, e);
                    if tokio::time::Instant::now() >= deadline {
                        return Err(ChainError::Indeterminate { tx_id: tx_hash.to_string() });
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ChainError::Timeout { tx_id: tx_hash.to_string() });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Wait for `tx_hash` and read its receipt
    async fn confirm(&self, tx_hash: &str) -> Result<Receipt, ChainError> {
        let receipt = self.wait_for_receipt(tx_hash).await?;
        let status = parse_quantity(receipt.get("status").unwrap_or(&json!("0x1")))
            .map_err(|_| ChainError::Indeterminate { tx_id: tx_hash.to_string() })?;
        if status == 0 {
            return Err(ChainError::TransactionReverted { tx_id: tx_hash.to_string(), reason: "status 0".into() });
        }

        let height = parse_quantity(receipt.get("blockNumber").unwrap_or(&Value::Null))? as u64;
        let hash = receipt
            .get("blockHash")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let confirmed_at = self.block_timestamp(&hash).await?;
        let events = receipt
            .get("logs")
            .and_then(Value::as_array)
            .map(|logs| logs.iter().map(|l| self.parse_log(l)).collect::<Result<Vec<_>, _>>())
            .transpose()?
            .unwrap_or_default();

        Ok(Receipt { tx_id: tx_hash.to_string(), block: BlockRef { height, hash }, confirmed_at, events })
    }

    async fn block_timestamp(&self, block_hash: &str) -> Result<u64, ChainError> {
        let block = self
            .rpc
            .call("eth_getBlockByHash", json!([block_hash, false]))
            .await?;
        let ts = parse_quantity(block.get("timestamp").unwrap_or(&Value::Null))?;
        u64::try_from(ts).map_err(|_| ChainError::Rpc("timestamp overflow".into()))
    }

    fn parse_log(&self, log: &Value) -> Result<RawEvent, ChainError> {
        let address = log
            .get("address")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Rpc("log without address".into()))
            .and_then(|a| Address::parse_evm(a).map_err(|e| ChainError::Rpc(e.to_string())))?;
        let topics = log
            .get("topics")
            .and_then(Value::as_array)
            .map(|ts| ts.iter().map(parse_word).collect::<Result<Vec<_>, _>>())
            .transpose()?
            .unwrap_or_default();
        let data = parse_hex_bytes(log.get("data").unwrap_or(&json!("0x")))?;
        let height = parse_quantity(log.get("blockNumber").unwrap_or(&Value::Null))? as u64;
        let hash = log
            .get("blockHash")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tx_id = log
            .get("transactionHash")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(RawEvent {
            chain_id: self.chain_id,
            block: BlockRef { height, hash },
            tx_id,
            payload: EventPayload::Log { address, topics, data },
        })
    }
}

#[async_trait]
impl ChainAdapter for EvmRpcAdapter {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    fn signer(&self) -> Address {
        self.signer
    }

    fn resolver_address(&self) -> Address {
        self.resolver_contract
    }

    async fn chain_time(&self) -> Result<u64, ChainError> {
        let block = self
            .rpc
            .call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let ts = parse_quantity(block.get("timestamp").unwrap_or(&Value::Null))?;
        u64::try_from(ts).map_err(|_| ChainError::Rpc("timestamp overflow".into()))
    }

    async fn latest_block(&self) -> Result<u64, ChainError> {
        let v = self.rpc.call("eth_blockNumber", json!([])).await?;
        Ok(parse_quantity(&v)? as u64)
    }

    async fn get_balance(&self, token: &Address, owner: &Address) -> Result<u128, ChainError> {
        if *token == ChainFamily::Evm.native_token() {
            let v = self
                .rpc
                .call("eth_getBalance", json!([owner.to_hex(), "latest"]))
                .await?;
            return parse_quantity(&v);
        }
        let call = json!({
            "to": token.to_hex(),
            "data": format!("0x{}", hex::encode(abi::encode_balance_of(owner))),
        });
        let v = self.rpc.call("eth_call", json!([call, "latest"])).await?;
        let word = parse_word(&v)?;
        crate::amount::from_word(&word).ok_or_else(|| ChainError::Rpc("balance exceeds u128".into()))
    }

    /// Any failure once the node may hold the transaction is `Indeterminate`,
    /// so callers re-query before deciding anything
    async fn submit(&self, tx: &TxRequest) -> Result<Receipt, ChainError> {
        let (to, data) = self.encode(tx)?;
        let request = json!({
            "from": self.signer.to_hex(),
            "to": to.to_hex(),
            "data": format!("0x{}", hex::encode(&data)),
            "value": to_quantity(Self::native_value(tx)),
            "gas": to_quantity(ESCROW_GAS_LIMIT as u128),
        });

        let sent = match self.rpc.try_call("eth_sendTransaction", json!([request])).await {
            Ok(sent) => sent,
            Err(CallFailure::Rejected(reason)) => return Err(ChainError::Rpc(reason)),
            Err(CallFailure::NoAnswer(reason)) => {
                log::warn!("[evm {}] {} may have been sent: {}", self.chain_id, tx.name(), reason);
                return Err(ChainError::Indeterminate { tx_id: format!("{} from {}", tx.name(), self.signer) });
            }
        };
        let tx_hash = match sent.as_str() {
            Some(hash) => hash.to_string(),
            None => {
                log::warn!("[evm {}] {} accepted with bad hash {}", self.chain_id, tx.name(), sent);
                return Err(ChainError::Indeterminate { tx_id: sent.to_string() });
            }
        };
        log::debug!("[evm {}] {} sent as {}", self.chain_id, tx.name(), tx_hash);

        match self.confirm(&tx_hash).await {
            Ok(receipt) => Ok(receipt),
            Err(e @ ChainError::TransactionReverted { .. }) => Err(e),
            Err(e) if e.requires_recheck() => Err(e),
            Err(e) => {
                log::warn!("[evm {}] receipt of {} unreadable: {}", self.chain_id, tx_hash, e);
                Err(ChainError::Indeterminate { tx_id: tx_hash })
            }
        }
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<RawEvent>, ChainError> {
        let topic = format!("0x{}", hex::encode(filter.kind.evm_topic()));
        let mut params = json!({
            "address": filter.contract.to_hex(),
            "topics": [topic],
        });
        match &filter.range {
            BlockQuery::Block(b) if !b.hash.is_empty() => {
                params["blockHash"] = json!(b.hash);
            }
            BlockQuery::Block(b) => {
                params["fromBlock"] = json!(to_quantity(b.height as u128));
                params["toBlock"] = json!(to_quantity(b.height as u128));
            }
            BlockQuery::Range { from, to } => {
                params["fromBlock"] = json!(to_quantity(*from as u128));
                params["toBlock"] = json!(to_quantity(*to as u128));
            }
            BlockQuery::Tx(tx_hash) => {
                let receipt = self
                    .rpc
                    .call("eth_getTransactionReceipt", json!([tx_hash]))
                    .await?;
                let logs = receipt.get("logs").and_then(Value::as_array).cloned().unwrap_or_default();
                let mut out = Vec::new();
                for l in &logs {
                    let ev = self.parse_log(l)?;
                    if ev.is(filter.kind, &filter.contract) {
                        out.push(ev);
                    }
                }
                return Ok(out);
            }
        }

        let logs = self.rpc.call("eth_getLogs", json!([params])).await?;
        logs.as_array()
            .map(|ls| ls.iter().map(|l| self.parse_log(l)).collect::<Result<Vec<_>, _>>())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{EscrowRef, EventKind};
    use crate::hashlock::Secret;
    use crate::immutables::Immutables;
    use crate::order::tests::{resolver_addr, sample_order};
    use crate::timelocks::Leg;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn adapter() -> EvmRpcAdapter {
        EvmRpcAdapter::new(
            "http://127.0.0.1:9",
            1,
            Address::Evm([0x01; 20]),
            resolver_addr(),
            Duration::from_millis(200),
        )
    }

    #[test]
    fn test_routing_of_calls() {
        let a = adapter();
        let order = sample_order();
        let imm = Immutables::for_source(&order, resolver_addr(), order.making_amount, 1_000);
        let escrow = EscrowRef { chain_id: 1, address: Address::Evm([0xee; 20]) };

        let (to, data) = a
            .encode(&TxRequest::Withdraw { leg: Leg::Src, escrow, secret: Secret([7; 32]), immutables: imm })
            .unwrap();
        assert_eq!(to, resolver_addr());
        assert_eq!(data.len(), 4 + 32 * 10);

        let (to, _) = a
            .encode(&TxRequest::PublicCancel { leg: Leg::Src, escrow, immutables: imm })
            .unwrap();
        assert_eq!(to, escrow.address);
    }

    #[test]
    fn test_native_transfer_carries_value() {
        let to = Address::Evm([0xcc; 20]);
        let tx = TxRequest::Transfer { token: Address::ZERO_EVM, to, amount: 5 };
        let (target, data) = adapter().encode(&tx).unwrap();
        assert_eq!(target, to);
        assert!(data.is_empty());
        assert_eq!(EvmRpcAdapter::native_value(&tx), 5);
    }

    #[test]
    fn test_parse_log() {
        let a = adapter();
        let topic = format!("0x{}", hex::encode(EventKind::EscrowCancelled.evm_topic()));
        let log = json!({
            "address": "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee",
            "topics": [topic],
            "data": "0x",
            "blockNumber": "0x10",
            "blockHash": "0xabc",
            "transactionHash": "0xdef",
        });
        let ev = a.parse_log(&log).unwrap();
        assert_eq!(ev.block.height, 16);
        assert!(ev.is(EventKind::EscrowCancelled, &Address::Evm([0xee; 20])));
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_before_send() {
        let err = adapter().latest_block().await.unwrap_err();
        assert!(matches!(err, ChainError::Rpc(_)));
        assert!(!err.requires_recheck());
    }

    // -------------------------------------------------------------------------
    // Local stub node
    // -------------------------------------------------------------------------

    /// Serve JSON-RPC on a local port, answering each method through
    /// `answer`; `None` drops the connection without a reply
    async fn stub_node(answer: fn(&str) -> Option<Value>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Some(request) = read_request(&mut socket).await else { return };
                    let method = request.get("method").and_then(Value::as_str).unwrap_or_default().to_string();
                    let Some(mut body) = answer(&method) else { return };
                    body["jsonrpc"] = json!("2.0");
                    body["id"] = request.get("id").cloned().unwrap_or(Value::Null);
                    let text = body.to_string();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        text.len(),
                        text
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        url
    }

    async fn read_request(socket: &mut TcpStream) -> Option<Value> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                if let Ok(v) = serde_json::from_slice(&buf[end + 4..]) {
                    return Some(v);
                }
            }
        }
    }

    fn stub_adapter(url: &str) -> EvmRpcAdapter {
        EvmRpcAdapter::new(url, 1, Address::Evm([0x01; 20]), resolver_addr(), Duration::from_secs(2))
            .with_poll_interval(Duration::from_millis(10))
    }

    fn transfer() -> TxRequest {
        TxRequest::Transfer { token: Address::ZERO_EVM, to: Address::Evm([0xcc; 20]), amount: 5 }
    }

    fn mined(method: &str) -> Option<Value> {
        match method {
            "eth_sendTransaction" => Some(json!({ "result": "0xabc" })),
            "eth_getTransactionReceipt" => Some(json!({
                "result": { "status": "0x1", "blockNumber": "0x5", "blockHash": "0xb1", "logs": [] }
            })),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_submit_reads_receipt() {
        let url = stub_node(|method| match method {
            "eth_getBlockByHash" => Some(json!({ "result": { "timestamp": "0x3e8" } })),
            other => mined(other),
        })
        .await;
        let receipt = stub_adapter(&url).submit(&transfer()).await.unwrap();
        assert_eq!(receipt.tx_id, "0xabc");
        assert_eq!(receipt.block.height, 5);
        assert_eq!(receipt.confirmed_at, 1_000);
    }

    #[tokio::test]
    async fn test_unreadable_receipt_is_indeterminate() {
        // Included with status 1, but the block lookup fails afterwards
        let url = stub_node(|method| match method {
            "eth_getBlockByHash" => Some(json!({ "error": { "code": -32000, "message": "header not found" } })),
            other => mined(other),
        })
        .await;
        let err = stub_adapter(&url).submit(&transfer()).await.unwrap_err();
        assert_eq!(err, ChainError::Indeterminate { tx_id: "0xabc".into() });
        assert!(err.requires_recheck());
    }

    #[tokio::test]
    async fn test_unanswered_send_is_indeterminate() {
        let url = stub_node(|_| None).await;
        let err = stub_adapter(&url).submit(&transfer()).await.unwrap_err();
        assert!(matches!(err, ChainError::Indeterminate { .. }));
    }

    #[tokio::test]
    async fn test_rejected_send_is_rpc_error() {
        let url = stub_node(|_| Some(json!({ "error": { "code": -32000, "message": "insufficient funds" } }))).await;
        let err = stub_adapter(&url).submit(&transfer()).await.unwrap_err();
        assert!(matches!(err, ChainError::Rpc(_)));
        assert!(!err.requires_recheck());
    }

    #[tokio::test]
    async fn test_reverted_receipt_stays_reverted() {
        let url = stub_node(|method| match method {
            "eth_getTransactionReceipt" => Some(json!({
                "result": { "status": "0x0", "blockNumber": "0x5", "blockHash": "0xb1", "logs": [] }
            })),
            other => mined(other),
        })
        .await;
        let err = stub_adapter(&url).submit(&transfer()).await.unwrap_err();
        assert!(matches!(err, ChainError::TransactionReverted { .. }));
    }
}
