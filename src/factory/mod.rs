// =============================================================================
// CROSSFILL - Escrow Factory Client
// =============================================================================
//
// Reads escrow lifecycle events back from a chain and turns them into typed
// values. EVM logs go through the strict ABI decoder; Move events through
// serde structs that reject unknown fields. Nothing here submits.
//
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::address::Address;
use crate::chain::abi;
use crate::chain::sui::{MoveDstEscrowCreated, MoveEscrowCancelled, MoveEscrowWithdrawal, MoveSrcEscrowCreated};
use crate::chain::{
    BlockQuery, ChainAdapter, ChainError, ChainFamily, EscrowRef, EventFilter, EventKind,
    EventPayload, RawEvent, TxRef,
};
use crate::hashlock::{HashLock, Secret};
use crate::immutables::{DstComplement, Immutables};
use crate::order::OrderHash;

// =============================================================================
// Errors
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FactoryError {
    /// No matching creation event at the queried block or transaction
    EventNotFound(String),
    /// Event present but not in the expected shape
    DecodeError(String),
    Chain(ChainError),
}

impl fmt::Display for FactoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactoryError::EventNotFound(s) => write!(f, "Event not found: {}", s),
            FactoryError::DecodeError(s) => write!(f, "Decode error: {}", s),
            FactoryError::Chain(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FactoryError {}

impl From<ChainError> for FactoryError {
    fn from(e: ChainError) -> Self {
        FactoryError::Chain(e)
    }
}

// =============================================================================
// Decoded Events
// =============================================================================

/// A decoded source escrow creation
#[derive(Clone, Debug, PartialEq)]
pub struct SrcCreated {
    pub escrow: EscrowRef,
    pub immutables: Immutables,
    pub complement: DstComplement,
    pub tx: TxRef,
}

/// A decoded destination escrow creation. EVM logs carry only the escrow,
/// hash-lock and taker; Move events carry the full parameter set.
#[derive(Clone, Debug, PartialEq)]
pub struct DstCreated {
    pub escrow: EscrowRef,
    pub hash_lock: HashLock,
    pub taker: Address,
    pub order_hash: Option<OrderHash>,
    pub immutables: Option<Immutables>,
    pub tx: TxRef,
}

/// How an escrow was settled
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Settlement {
    Withdrawn { secret: Secret, tx: TxRef },
    Cancelled { tx: TxRef },
}

impl Settlement {
    pub fn tx(&self) -> &TxRef {
        match self {
            Settlement::Withdrawn { tx, .. } | Settlement::Cancelled { tx } => tx,
        }
    }

    pub fn is_withdrawn(&self) -> bool {
        matches!(self, Settlement::Withdrawn { .. })
    }
}

/// CREATE2 address of a source escrow clone; no chain call
pub fn derive_source_escrow_address(
    factory: &Address,
    implementation: &Address,
    imm: &Immutables,
) -> Result<Address, FactoryError> {
    abi::escrow_address(factory, implementation, imm).map_err(|e| FactoryError::DecodeError(e.0))
}

fn tx_ref(ev: &RawEvent) -> TxRef {
    TxRef { chain_id: ev.chain_id, tx_id: ev.tx_id.clone(), block: ev.block.clone() }
}

// =============================================================================
// Factory Client
// =============================================================================

pub struct EscrowFactory {
    adapter: Arc<dyn ChainAdapter>,
    /// Factory contract (EVM) or escrow package (Move)
    address: Address,
    /// Source escrow implementation (EVM address derivation)
    src_implementation: Option<Address>,
    /// Family of the other leg, which decides how complement addresses read
    counterpart: ChainFamily,
}

impl EscrowFactory {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        address: Address,
        src_implementation: Option<Address>,
        counterpart: ChainFamily,
    ) -> Self {
        EscrowFactory { adapter, address, src_implementation, counterpart }
    }

    pub fn adapter(&self) -> &Arc<dyn ChainAdapter> {
        &self.adapter
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.adapter.chain_id()
    }

    /// Escrow address for source immutables. Object ledgers assign ids at
    /// creation, so there it comes from the event instead.
    pub fn source_escrow_address(&self, imm: &Immutables) -> Result<Address, FactoryError> {
        match (self.adapter.family(), &self.src_implementation) {
            (ChainFamily::Evm, Some(implementation)) => {
                derive_source_escrow_address(&self.address, implementation, imm)
            }
            (ChainFamily::Evm, None) => Err(FactoryError::DecodeError(
                "no source implementation configured".into(),
            )),
            (ChainFamily::Move, _) => Err(FactoryError::DecodeError(
                "object ids come from the creation event".into(),
            )),
        }
    }

    async fn events(&self, contract: Address, kind: EventKind, range: &BlockQuery) -> Result<Vec<RawEvent>, FactoryError> {
        let filter = EventFilter { contract, kind, range: range.clone() };
        Ok(self.adapter.query_events(&filter).await?)
    }

    /// Lookback window ending at the latest block
    pub async fn recent(&self, lookback_blocks: u64) -> Result<BlockQuery, FactoryError> {
        let latest = self.adapter.latest_block().await?;
        Ok(BlockQuery::Range { from: latest.saturating_sub(lookback_blocks), to: latest })
    }

    // -------------------------------------------------------------------------
    // Source creation
    // -------------------------------------------------------------------------

    pub fn decode_src_event(&self, ev: &RawEvent) -> Result<SrcCreated, FactoryError> {
        let (address, immutables, complement) = match &ev.payload {
            EventPayload::Log { topics, data, .. } => {
                let (imm, complement) = abi::decode_src_escrow_created(topics, data, self.counterpart)
                    .map_err(|e| FactoryError::DecodeError(e.0))?;
                (self.source_escrow_address(&imm)?, imm, complement)
            }
            EventPayload::Move { json, .. } => {
                MoveSrcEscrowCreated::decode(json, self.counterpart).map_err(FactoryError::DecodeError)?
            }
        };
        Ok(SrcCreated {
            escrow: EscrowRef { chain_id: ev.chain_id, address },
            immutables,
            complement,
            tx: tx_ref(ev),
        })
    }

    /// The source escrow created at `at` (a block or one transaction).
    /// Several creations at `at` need `order_hash` to pick one.
    pub async fn decode_source_creation_event(
        &self,
        at: &BlockQuery,
        order_hash: Option<&OrderHash>,
    ) -> Result<SrcCreated, FactoryError> {
        let events = self.events(self.address, EventKind::SrcEscrowCreated, at).await?;
        let created = match (order_hash, events.as_slice()) {
            (_, []) => return Err(FactoryError::EventNotFound(format!("SrcEscrowCreated at {:?}", at))),
            (None, [only]) => self.decode_src_event(only)?,
            (None, many) => {
                return Err(FactoryError::DecodeError(format!(
                    "{} creations at {:?}, no order hash to choose one",
                    many.len(),
                    at
                )))
            }
            (Some(wanted), many) => {
                let mut last_error = None;
                let mut found = None;
                for ev in many {
                    match self.decode_src_event(ev) {
                        Ok(c) if c.immutables.order_hash == *wanted => {
                            found = Some(c);
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => last_error = Some(e),
                    }
                }
                match (found, last_error) {
                    (Some(c), _) => c,
                    (None, Some(e)) => return Err(e),
                    (None, None) => {
                        return Err(FactoryError::EventNotFound(format!(
                            "SrcEscrowCreated for {} at {:?}",
                            wanted.short(),
                            at
                        )))
                    }
                }
            }
        };
        log::debug!(
            "[factory {}] source escrow {} for order {}",
            self.chain_id(),
            created.escrow,
            created.immutables.order_hash.short()
        );
        Ok(created)
    }

    /// Every decodable source creation in `range`; malformed events are
    /// logged and skipped
    pub async fn decode_source_creation_events(&self, range: &BlockQuery) -> Result<Vec<SrcCreated>, FactoryError> {
        let events = self.events(self.address, EventKind::SrcEscrowCreated, range).await?;
        let mut out = Vec::with_capacity(events.len());
        for ev in &events {
            match self.decode_src_event(ev) {
                Ok(created) => out.push(created),
                Err(e) => log::warn!(
                    "[factory {}] skipping SrcEscrowCreated in {}: {}",
                    self.chain_id(),
                    ev.tx_id,
                    e
                ),
            }
        }
        Ok(out)
    }

    /// Source escrow already created for `order_hash`, if any
    pub async fn find_source_by_order(
        &self,
        order_hash: &OrderHash,
        range: &BlockQuery,
    ) -> Result<Option<SrcCreated>, FactoryError> {
        Ok(self
            .decode_source_creation_events(range)
            .await?
            .into_iter()
            .find(|c| c.immutables.order_hash == *order_hash))
    }

    // -------------------------------------------------------------------------
    // Destination creation
    // -------------------------------------------------------------------------

    pub fn decode_dst_event(&self, ev: &RawEvent) -> Result<DstCreated, FactoryError> {
        let tx = tx_ref(ev);
        match &ev.payload {
            EventPayload::Log { topics, data, .. } => {
                let (escrow, hash_lock, taker) =
                    abi::decode_dst_escrow_created(topics, data).map_err(|e| FactoryError::DecodeError(e.0))?;
                Ok(DstCreated {
                    escrow: EscrowRef { chain_id: ev.chain_id, address: escrow },
                    hash_lock,
                    taker,
                    order_hash: None,
                    immutables: None,
                    tx,
                })
            }
            EventPayload::Move { json, .. } => {
                let (escrow, imm) = MoveDstEscrowCreated::decode(json).map_err(FactoryError::DecodeError)?;
                Ok(DstCreated {
                    escrow: EscrowRef { chain_id: ev.chain_id, address: escrow },
                    hash_lock: imm.hash_lock,
                    taker: imm.taker,
                    order_hash: Some(imm.order_hash),
                    immutables: Some(imm),
                    tx,
                })
            }
        }
    }

    /// All destination creations in `range`; the caller selects by order
    pub async fn decode_destination_creation_events(&self, range: &BlockQuery) -> Result<Vec<DstCreated>, FactoryError> {
        let events = self.events(self.address, EventKind::DstEscrowCreated, range).await?;
        let mut out = Vec::with_capacity(events.len());
        for ev in &events {
            match self.decode_dst_event(ev) {
                Ok(created) => out.push(created),
                Err(e) => log::warn!(
                    "[factory {}] skipping DstEscrowCreated in {}: {}",
                    self.chain_id(),
                    ev.tx_id,
                    e
                ),
            }
        }
        Ok(out)
    }

    /// Destination escrow for a swap. Matches by order hash where the event
    /// carries one, by hash-lock otherwise.
    pub async fn find_destination(
        &self,
        order_hash: &OrderHash,
        hash_lock: &HashLock,
        range: &BlockQuery,
    ) -> Result<Option<DstCreated>, FactoryError> {
        Ok(self
            .decode_destination_creation_events(range)
            .await?
            .into_iter()
            .find(|c| match c.order_hash {
                Some(h) => h == *order_hash && c.hash_lock == *hash_lock,
                None => c.hash_lock == *hash_lock,
            }))
    }

    // -------------------------------------------------------------------------
    // Settlement
    // -------------------------------------------------------------------------

    /// Withdrawal or cancellation of `escrow` within `range`
    pub async fn settlement(&self, escrow: &EscrowRef, range: &BlockQuery) -> Result<Option<Settlement>, FactoryError> {
        // EVM escrows emit from their own address; Move events come from the package
        let emitter = match self.adapter.family() {
            ChainFamily::Evm => escrow.address,
            ChainFamily::Move => self.address,
        };

        for ev in self.events(emitter, EventKind::EscrowWithdrawal, range).await? {
            let secret = match &ev.payload {
                EventPayload::Log { topics, data, .. } => {
                    abi::decode_escrow_withdrawal(topics, data).map_err(|e| FactoryError::DecodeError(e.0))?
                }
                EventPayload::Move { json, .. } => {
                    let body: MoveEscrowWithdrawal =
                        serde_json::from_value(json.clone()).map_err(|e| FactoryError::DecodeError(e.to_string()))?;
                    if body.escrow_id != escrow.address {
                        continue;
                    }
                    let bytes: [u8; 32] = body
                        .secret
                        .as_slice()
                        .try_into()
                        .map_err(|_| FactoryError::DecodeError("secret is not 32 bytes".into()))?;
                    Secret(bytes)
                }
            };
            return Ok(Some(Settlement::Withdrawn { secret, tx: tx_ref(&ev) }));
        }

        for ev in self.events(emitter, EventKind::EscrowCancelled, range).await? {
            match &ev.payload {
                EventPayload::Log { topics, data, .. } => {
                    abi::decode_escrow_cancelled(topics, data).map_err(|e| FactoryError::DecodeError(e.0))?;
                }
                EventPayload::Move { json, .. } => {
                    let body: MoveEscrowCancelled =
                        serde_json::from_value(json.clone()).map_err(|e| FactoryError::DecodeError(e.to_string()))?;
                    if body.escrow_id != escrow.address {
                        continue;
                    }
                }
            }
            return Ok(Some(Settlement::Cancelled { tx: tx_ref(&ev) }));
        }
        Ok(None)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{SimulatedLedger, TxRequest};
    use crate::order::tests::sample_order;
    use crate::order::{Order, OrderSignature, TakerTraits, WhitelistEntry};
    use secp256k1::{Secp256k1, SecretKey};

    const T0: u64 = 1_000;

    fn evm_setup() -> (SimulatedLedger, Arc<dyn ChainAdapter>, EscrowFactory, Order, OrderSignature) {
        let ledger = SimulatedLedger::new(ChainFamily::Evm, 1, T0);
        let resolver = Address::Evm([0xaa; 20]);
        let key = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let mut order = sample_order();
        order.maker = Address::from_public_key(&key.public_key(&Secp256k1::new()));
        order.whitelist = vec![WhitelistEntry { resolver, allow_from: 0 }];
        let sig = OrderSignature::sign(&order.order_hash(), &key);
        ledger.mint(&order.maker_asset, &order.maker, order.making_amount);
        ledger.mint(&ChainFamily::Evm.native_token(), &resolver, 10_000);

        let adapter: Arc<dyn ChainAdapter> = Arc::new(ledger.connect(resolver));
        let factory = EscrowFactory::new(
            Arc::clone(&adapter),
            ledger.factory(),
            Some(ledger.src_implementation()),
            ChainFamily::Move,
        );
        (ledger, adapter, factory, order, sig)
    }

    async fn fill(adapter: &Arc<dyn ChainAdapter>, order: &Order, sig: &OrderSignature) -> crate::chain::Receipt {
        let args = order.escrow_extension();
        let tx = TxRequest::DeploySrc {
            immutables: Immutables::for_source(order, adapter.resolver_address(), order.making_amount, T0),
            order: Box::new(order.clone()),
            signature: *sig,
            amount: order.making_amount,
            taker_traits: TakerTraits::by_making_amount(0, args.len()).unwrap(),
            args,
        };
        adapter.submit(&tx).await.unwrap()
    }

    #[tokio::test]
    async fn test_decode_source_is_idempotent() {
        let (ledger, adapter, factory, order, sig) = evm_setup();
        let receipt = fill(&adapter, &order, &sig).await;
        let at = BlockQuery::Block(receipt.block.clone());

        let first = factory.decode_source_creation_event(&at, None).await.unwrap();
        let second = factory.decode_source_creation_event(&at, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.immutables.order_hash, order.order_hash());
        assert_eq!(first.complement.maker, order.dst_receiver());
        assert!(ledger.escrow(&first.escrow.address).is_some());

        let by_tx = factory.decode_source_creation_event(&BlockQuery::Tx(receipt.tx_id), None).await.unwrap();
        assert_eq!(by_tx.immutables, first.immutables);
    }

    #[tokio::test]
    async fn test_missing_event_is_event_not_found() {
        let (_, _, factory, _, _) = evm_setup();
        let err = factory
            .decode_source_creation_event(&BlockQuery::Range { from: 0, to: 10 }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FactoryError::EventNotFound(_)));
    }

    #[tokio::test]
    async fn test_malformed_log_is_decode_error() {
        let (ledger, _, factory, _, _) = evm_setup();
        let block = ledger.emit_raw(EventPayload::Log {
            address: ledger.factory(),
            topics: vec![EventKind::SrcEscrowCreated.evm_topic()],
            data: vec![0u8; 64],
        });
        let err = factory.decode_source_creation_event(&BlockQuery::Block(block), None).await.unwrap_err();
        assert!(matches!(err, FactoryError::DecodeError(_)));
        assert!(factory
            .decode_source_creation_events(&BlockQuery::Range { from: 0, to: 10 })
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_several_creations_need_order_hash() {
        let (ledger, adapter, factory, order, sig) = evm_setup();
        fill(&adapter, &order, &sig).await;

        let key = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let second = Order { salt: order.salt + 1, ..order.clone() };
        let second_sig = OrderSignature::sign(&second.order_hash(), &key);
        ledger.mint(&second.maker_asset, &second.maker, second.making_amount);
        fill(&adapter, &second, &second_sig).await;

        let range = BlockQuery::Range { from: 0, to: 100 };
        let err = factory.decode_source_creation_event(&range, None).await.unwrap_err();
        assert!(matches!(err, FactoryError::DecodeError(_)));

        let picked = factory
            .decode_source_creation_event(&range, Some(&second.order_hash()))
            .await
            .unwrap();
        assert_eq!(picked.immutables.order_hash, second.order_hash());

        let unknown = factory
            .decode_source_creation_event(&range, Some(&OrderHash([9; 32])))
            .await
            .unwrap_err();
        assert!(matches!(unknown, FactoryError::EventNotFound(_)));
    }

    #[tokio::test]
    async fn test_find_source_by_order() {
        let (_, adapter, factory, order, sig) = evm_setup();
        let range = BlockQuery::Range { from: 0, to: 100 };
        assert!(factory.find_source_by_order(&order.order_hash(), &range).await.unwrap().is_none());
        fill(&adapter, &order, &sig).await;
        let found = factory.find_source_by_order(&order.order_hash(), &range).await.unwrap();
        assert_eq!(found.unwrap().immutables.hash_lock, order.hash_lock);
    }

    #[tokio::test]
    async fn test_move_destination_found_by_order_hash() {
        let ledger = SimulatedLedger::new(ChainFamily::Move, 101, T0);
        let resolver = Address::Object([0xaa; 32]);
        let token = Address::Object([0x44; 32]);
        ledger.mint(&token, &resolver, 1_000_000);
        ledger.mint(&ChainFamily::Move.native_token(), &resolver, 1_000);
        let adapter: Arc<dyn ChainAdapter> = Arc::new(ledger.connect(resolver));
        let factory = EscrowFactory::new(Arc::clone(&adapter), ledger.factory(), None, ChainFamily::Evm);

        let order = sample_order();
        let src = Immutables::for_source(&order, Address::Evm([0xaa; 20]), order.making_amount, T0);
        let complement = DstComplement { maker: Address::Object([0x22; 32]), amount: 1_000_000, token, safety_deposit: 1_000 };
        let dst = src.to_destination(&complement, resolver, T0);
        let receipt = adapter
            .submit(&TxRequest::DeployDst { immutables: dst, src_cancellation_timestamp: src.src_cancellation_timestamp() })
            .await
            .unwrap();

        let found = factory
            .find_destination(&src.order_hash, &src.hash_lock, &BlockQuery::Tx(receipt.tx_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.order_hash, Some(src.order_hash));
        assert!(found.immutables.unwrap().dst_fields_match(&dst));

        let other = OrderHash([9; 32]);
        let range = BlockQuery::Range { from: 0, to: 10 };
        assert!(factory.find_destination(&other, &src.hash_lock, &range).await.unwrap().is_none());
        assert!(factory.source_escrow_address(&src).is_err());
    }

    #[tokio::test]
    async fn test_settlement_reports_secret() {
        let (ledger, adapter, factory, order, sig) = evm_setup();
        let receipt = fill(&adapter, &order, &sig).await;
        let created = factory.decode_source_creation_event(&BlockQuery::Tx(receipt.tx_id), None).await.unwrap();
        let range = BlockQuery::Range { from: 0, to: 100 };
        assert!(factory.settlement(&created.escrow, &range).await.unwrap().is_none());

        ledger.advance(10);
        let secret = Secret([7; 32]);
        adapter
            .submit(&TxRequest::Withdraw {
                leg: crate::timelocks::Leg::Src,
                escrow: created.escrow,
                secret,
                immutables: created.immutables,
            })
            .await
            .unwrap();
        match factory.settlement(&created.escrow, &range).await.unwrap() {
            Some(Settlement::Withdrawn { secret: revealed, .. }) => assert_eq!(revealed, secret),
            other => panic!("unexpected {:?}", other),
        }
    }
}
