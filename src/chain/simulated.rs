// =============================================================================
// CROSSFILL - Simulated Ledger
// =============================================================================
//
// In-process chain that enforces the same escrow rules as the deployed
// contracts: fill authorization, CREATE2 escrow addresses, time-lock stages,
// hash-lock checks, safety-deposit payouts. Used by the test suites and the
// `demo` command.
//
// Every submission mines one block. A reverted call still mines its block
// but leaves balances and escrows untouched.
//
// =============================================================================

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::abi;
use super::sui::{MoveDstEscrowCreated, MoveEscrowCancelled, MoveEscrowWithdrawal, MoveSrcEscrowCreated};
use super::{
    BlockQuery, BlockRef, ChainAdapter, ChainError, ChainFamily, EscrowRef, EventFilter, EventKind,
    EventPayload, RawEvent, Receipt, TxRequest,
};
use crate::address::Address;
use crate::hashlock::{keccak256, Secret};
use crate::immutables::{DstComplement, Immutables};
use crate::order::OrderHash;
use crate::timelocks::{is_action_legal, EscrowAction, Leg};

/// Escrow held by the simulated factory
#[derive(Clone, Debug, PartialEq)]
pub struct SimEscrow {
    pub leg: Leg,
    pub immutables: Immutables,
    pub settled: bool,
}

#[derive(Clone)]
struct LedgerState {
    time: u64,
    /// Chain time follows the tokio clock from this instant
    follow: Option<tokio::time::Instant>,
    height: u64,
    balances: HashMap<(Address, Address), u128>,
    allowances: HashMap<(Address, Address, Address), u128>,
    escrows: HashMap<Address, SimEscrow>,
    filled: HashSet<OrderHash>,
    events: Vec<RawEvent>,
    submissions: u64,
    pending_failure: Option<(ChainError, bool)>,
}

impl LedgerState {
    fn now(&self) -> u64 {
        match self.follow {
            Some(start) => self.time + start.elapsed().as_secs(),
            None => self.time,
        }
    }

    fn balance(&self, token: &Address, owner: &Address) -> u128 {
        self.balances.get(&(*token, *owner)).copied().unwrap_or(0)
    }

    fn credit(&mut self, token: &Address, owner: &Address, amount: u128) {
        *self.balances.entry((*token, *owner)).or_insert(0) += amount;
    }

    fn debit(&mut self, token: &Address, owner: &Address, amount: u128) -> Result<(), String> {
        let have = self.balance(token, owner);
        if have < amount {
            return Err(format!(
                "InsufficientBalance: {} holds {} of {}, needs {}",
                owner.short(),
                have,
                token.short(),
                amount
            ));
        }
        self.balances.insert((*token, *owner), have - amount);
        Ok(())
    }

    /// Escrows hold their amount and deposit at their own address
    fn lock_funds(&mut self, family: &ChainFamily, escrow: &Address, imm: &Immutables) {
        self.credit(&imm.token, escrow, imm.amount);
        self.credit(&family.native_token(), escrow, imm.safety_deposit);
    }

    fn release_funds(&mut self, family: &ChainFamily, escrow: &Address, imm: &Immutables) -> Result<(), String> {
        self.debit(&imm.token, escrow, imm.amount)?;
        self.debit(&family.native_token(), escrow, imm.safety_deposit)
    }
}

fn derived_address(family: ChainFamily, chain_id: u64, label: &str) -> Address {
    let mut seed = chain_id.to_be_bytes().to_vec();
    seed.extend_from_slice(label.as_bytes());
    let hash = keccak256(&seed);
    match family {
        ChainFamily::Evm => {
            let mut out = [0u8; 20];
            out.copy_from_slice(&hash[12..]);
            Address::Evm(out)
        }
        ChainFamily::Move => Address::Object(hash),
    }
}

/// Shared ledger; connect any number of signers to it
#[derive(Clone)]
pub struct SimulatedLedger {
    family: ChainFamily,
    chain_id: u64,
    factory: Address,
    src_implementation: Address,
    dst_implementation: Address,
    state: Arc<Mutex<LedgerState>>,
}

impl SimulatedLedger {
    pub fn new(family: ChainFamily, chain_id: u64, genesis_time: u64) -> Self {
        SimulatedLedger {
            family,
            chain_id,
            factory: derived_address(family, chain_id, "escrow-factory"),
            src_implementation: derived_address(family, chain_id, "escrow-src"),
            dst_implementation: derived_address(family, chain_id, "escrow-dst"),
            state: Arc::new(Mutex::new(LedgerState {
                time: genesis_time,
                follow: None,
                height: 0,
                balances: HashMap::new(),
                allowances: HashMap::new(),
                escrows: HashMap::new(),
                filled: HashSet::new(),
                events: Vec::new(),
                submissions: 0,
                pending_failure: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn family(&self) -> ChainFamily {
        self.family
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Factory contract (EVM) or escrow package (Move)
    pub fn factory(&self) -> Address {
        self.factory
    }

    pub fn src_implementation(&self) -> Address {
        self.src_implementation
    }

    pub fn dst_implementation(&self) -> Address {
        self.dst_implementation
    }

    /// Let chain time advance with the tokio clock (paused clocks included)
    pub fn follow_tokio_clock(&self) {
        let mut state = self.state();
        state.time = state.now();
        state.follow = Some(tokio::time::Instant::now());
    }

    pub fn time(&self) -> u64 {
        self.state().now()
    }

    pub fn set_time(&self, t: u64) {
        let mut state = self.state();
        state.time = t;
        if state.follow.is_some() {
            state.follow = Some(tokio::time::Instant::now());
        }
    }

    pub fn advance(&self, secs: u64) {
        self.state().time += secs;
    }

    pub fn mint(&self, token: &Address, owner: &Address, amount: u128) {
        self.state().credit(token, owner, amount);
    }

    pub fn balance(&self, token: &Address, owner: &Address) -> u128 {
        self.state().balance(token, owner)
    }

    pub fn allowance(&self, token: &Address, owner: &Address, spender: &Address) -> u128 {
        self.state()
            .allowances
            .get(&(*token, *owner, *spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn escrow(&self, address: &Address) -> Option<SimEscrow> {
        self.state().escrows.get(address).cloned()
    }

    pub fn height(&self) -> u64 {
        self.state().height
    }

    /// Every submission that reached the ledger, reverted ones included
    pub fn submission_count(&self) -> u64 {
        self.state().submissions
    }

    /// Fail the next submission with `error`; with `apply` the transaction
    /// still executes (a confirmed transaction whose receipt got lost)
    pub fn inject_failure(&self, error: ChainError, apply: bool) {
        self.state().pending_failure = Some((error, apply));
    }

    /// Mine a block carrying an arbitrary event (malformed ones included)
    pub fn emit_raw(&self, payload: EventPayload) -> BlockRef {
        let mut state = self.state();
        state.height += 1;
        let height = state.height;
        let block = BlockRef {
            height,
            hash: format!("0x{}", hex::encode(keccak256(&height.to_be_bytes()))),
        };
        let mut seed = height.to_be_bytes().to_vec();
        seed.extend_from_slice(b"raw");
        let tx_id = format!("0x{}", hex::encode(keccak256(&seed)));
        state.events.push(RawEvent { chain_id: self.chain_id, block: block.clone(), tx_id, payload });
        block
    }

    /// Adapter signing as `signer`, which is also the recorded taker
    pub fn connect(&self, signer: Address) -> SimulatedChain {
        self.connect_with_resolver(signer, signer)
    }

    /// Adapter signing as `signer` through the resolver contract `resolver`
    pub fn connect_with_resolver(&self, signer: Address, resolver: Address) -> SimulatedChain {
        SimulatedChain { ledger: self.clone(), signer, resolver }
    }

    fn escrow_address(&self, leg: Leg, imm: &Immutables, height: u64) -> Result<Address, String> {
        match self.family {
            ChainFamily::Evm => {
                let implementation = match leg {
                    Leg::Src => &self.src_implementation,
                    Leg::Dst => &self.dst_implementation,
                };
                abi::escrow_address(&self.factory, implementation, imm).map_err(|e| e.to_string())
            }
            ChainFamily::Move => {
                let mut seed = imm.order_hash.0.to_vec();
                seed.extend_from_slice(&height.to_be_bytes());
                seed.push(leg as u8);
                Ok(Address::Object(keccak256(&seed)))
            }
        }
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    fn execute(
        &self,
        state: &mut LedgerState,
        caller: &Caller,
        tx: &TxRequest,
        now: u64,
        height: u64,
    ) -> Result<Vec<EventPayload>, String> {
        match tx {
            TxRequest::DeploySrc { immutables, order, signature, amount, taker_traits, args } => {
                let order_hash = order.order_hash();
                if self.family == ChainFamily::Evm {
                    signature.verify(order).map_err(|e| format!("BadSignature: {}", e))?;
                }
                order.validate().map_err(|e| format!("InvalidOrder: {}", e))?;
                if state.filled.contains(&order_hash) {
                    return Err("OrderFilled".into());
                }
                order
                    .check_fill(&caller.resolver, *amount, now)
                    .map_err(|e| format!("FillRejected: {}", e))?;
                let taking = order
                    .taking_amount_at(*amount, now)
                    .map_err(|e| format!("FillRejected: {}", e))?;
                if taker_traits.threshold != 0 && taking > taker_traits.threshold {
                    return Err(format!("TakingAmountTooHigh: {} > {}", taking, taker_traits.threshold));
                }
                if *args != order.escrow_extension() {
                    return Err("InvalidExtension".into());
                }

                let imm = immutables.time_locks.with_deployed_at(now);
                let imm = Immutables { time_locks: imm, ..*immutables };
                let expected = Immutables::for_source(order, caller.resolver, *amount, now);
                if imm != expected {
                    return Err("InvalidImmutables".into());
                }

                let escrow = self.escrow_address(Leg::Src, &imm, height)?;
                if state.escrows.contains_key(&escrow) {
                    return Err("EscrowExists".into());
                }
                state.debit(&imm.token, &imm.maker, imm.amount)?;
                state.debit(&self.family.native_token(), &caller.signer, imm.safety_deposit)?;
                state.lock_funds(&self.family, &escrow, &imm);
                state.filled.insert(order_hash);
                state
                    .escrows
                    .insert(escrow, SimEscrow { leg: Leg::Src, immutables: imm, settled: false });

                let complement = DstComplement {
                    maker: order.dst_receiver(),
                    amount: taking,
                    token: order.taker_asset,
                    safety_deposit: order.dst_safety_deposit,
                };
                let payload = match self.family {
                    ChainFamily::Evm => {
                        let (topics, data) =
                            abi::encode_src_escrow_created(&imm, &complement).map_err(|e| e.to_string())?;
                        EventPayload::Log { address: self.factory, topics, data }
                    }
                    ChainFamily::Move => EventPayload::Move {
                        event_type: EventKind::SrcEscrowCreated.move_type(&self.factory),
                        json: to_json(&MoveSrcEscrowCreated::new(escrow, &imm, &complement)?)?,
                    },
                };
                Ok(vec![payload])
            }

            TxRequest::DeployDst { immutables, src_cancellation_timestamp } => {
                let imm = Immutables {
                    time_locks: immutables.time_locks.with_deployed_at(now),
                    ..*immutables
                };
                if imm.taker != caller.resolver {
                    return Err("InvalidCaller".into());
                }
                let dst_cancel = now.saturating_add(imm.time_locks.dst_cancellation as u64);
                if dst_cancel > *src_cancellation_timestamp {
                    return Err(format!(
                        "InvalidCreationTime: cancels at {} after source {}",
                        dst_cancel, src_cancellation_timestamp
                    ));
                }
                let escrow = self.escrow_address(Leg::Dst, &imm, height)?;
                if state.escrows.contains_key(&escrow) {
                    return Err("EscrowExists".into());
                }
                state.debit(&imm.token, &caller.signer, imm.amount)?;
                state.debit(&self.family.native_token(), &caller.signer, imm.safety_deposit)?;
                state.lock_funds(&self.family, &escrow, &imm);
                state
                    .escrows
                    .insert(escrow, SimEscrow { leg: Leg::Dst, immutables: imm, settled: false });

                let payload = match self.family {
                    ChainFamily::Evm => {
                        let (topics, data) = abi::encode_dst_escrow_created(&escrow, &imm.hash_lock, &imm.taker);
                        EventPayload::Log { address: self.factory, topics, data }
                    }
                    ChainFamily::Move => EventPayload::Move {
                        event_type: EventKind::DstEscrowCreated.move_type(&self.factory),
                        json: to_json(&MoveDstEscrowCreated::new(escrow, &imm, *src_cancellation_timestamp)?)?,
                    },
                };
                Ok(vec![payload])
            }

            TxRequest::Withdraw { leg, escrow, secret, immutables } => {
                self.settle_withdraw(state, caller.resolver, *leg, escrow, secret, immutables, now, false)
            }
            TxRequest::PublicWithdraw { leg, escrow, secret, immutables } => {
                self.settle_withdraw(state, caller.signer, *leg, escrow, secret, immutables, now, true)
            }
            TxRequest::Cancel { leg, escrow, immutables } => {
                self.settle_cancel(state, caller.resolver, *leg, escrow, immutables, now, false)
            }
            TxRequest::PublicCancel { leg, escrow, immutables } => {
                self.settle_cancel(state, caller.signer, *leg, escrow, immutables, now, true)
            }

            TxRequest::Transfer { token, to, amount } => {
                state.debit(token, &caller.signer, *amount)?;
                state.credit(token, to, *amount);
                Ok(Vec::new())
            }
            TxRequest::Approve { token, spender, amount } => {
                state.allowances.insert((*token, caller.signer, *spender), *amount);
                Ok(Vec::new())
            }
        }
    }

    /// Look up a live escrow and check the caller-supplied parameters
    fn load_escrow(
        &self,
        state: &LedgerState,
        leg: Leg,
        escrow: &EscrowRef,
        immutables: &Immutables,
    ) -> Result<SimEscrow, String> {
        if escrow.chain_id != self.chain_id {
            return Err(format!("EscrowNotFound: wrong chain {}", escrow.chain_id));
        }
        let stored = state
            .escrows
            .get(&escrow.address)
            .cloned()
            .ok_or_else(|| format!("EscrowNotFound: {}", escrow.address))?;
        if stored.leg != leg {
            return Err(format!("WrongLeg: escrow is {}", stored.leg));
        }
        // Move escrows carry their parameters; EVM clones re-hash them
        if self.family == ChainFamily::Evm && stored.immutables != *immutables {
            return Err("InvalidImmutables".into());
        }
        Ok(stored)
    }

    #[allow(clippy::too_many_arguments)]
    fn settle_withdraw(
        &self,
        state: &mut LedgerState,
        caller: Address,
        leg: Leg,
        escrow: &EscrowRef,
        secret: &Secret,
        immutables: &Immutables,
        now: u64,
        public: bool,
    ) -> Result<Vec<EventPayload>, String> {
        let stored = self.load_escrow(state, leg, escrow, immutables)?;
        let imm = stored.immutables;

        if !imm.hash_lock.verify(secret) {
            return Err("InvalidSecret".into());
        }
        if !public && caller != imm.taker {
            return Err("InvalidCaller".into());
        }
        if stored.settled {
            return Err("AlreadySettled".into());
        }
        let action = if public { EscrowAction::PublicWithdraw } else { EscrowAction::PrivateWithdraw };
        let stage = imm.time_locks.current_stage(leg, now);
        if !is_action_legal(action, stage) {
            return Err(format!("InvalidTime: {} during {}", action, stage));
        }

        let recipient = match leg {
            Leg::Src => imm.taker,
            Leg::Dst => imm.maker,
        };
        state.release_funds(&self.family, &escrow.address, &imm)?;
        state.credit(&imm.token, &recipient, imm.amount);
        state.credit(&self.family.native_token(), &caller, imm.safety_deposit);
        if let Some(e) = state.escrows.get_mut(&escrow.address) {
            e.settled = true;
        }

        let payload = match self.family {
            ChainFamily::Evm => {
                let (topics, data) = abi::encode_escrow_withdrawal(secret);
                EventPayload::Log { address: escrow.address, topics, data }
            }
            ChainFamily::Move => EventPayload::Move {
                event_type: EventKind::EscrowWithdrawal.move_type(&self.factory),
                json: to_json(&MoveEscrowWithdrawal { escrow_id: escrow.address, secret: secret.0.to_vec() })?,
            },
        };
        Ok(vec![payload])
    }

    #[allow(clippy::too_many_arguments)]
    fn settle_cancel(
        &self,
        state: &mut LedgerState,
        caller: Address,
        leg: Leg,
        escrow: &EscrowRef,
        immutables: &Immutables,
        now: u64,
        public: bool,
    ) -> Result<Vec<EventPayload>, String> {
        let stored = self.load_escrow(state, leg, escrow, immutables)?;
        let imm = stored.immutables;

        if public && leg == Leg::Dst {
            return Err("InvalidLeg: destination escrows have no public cancel".into());
        }
        if !public && caller != imm.taker {
            return Err("InvalidCaller".into());
        }
        if stored.settled {
            return Err("AlreadySettled".into());
        }
        let action = if public { EscrowAction::PublicCancel } else { EscrowAction::PrivateCancel };
        let stage = imm.time_locks.current_stage(leg, now);
        if !is_action_legal(action, stage) {
            return Err(format!("InvalidTime: {} during {}", action, stage));
        }

        let refund_to = match leg {
            Leg::Src => imm.maker,
            Leg::Dst => imm.taker,
        };
        state.release_funds(&self.family, &escrow.address, &imm)?;
        state.credit(&imm.token, &refund_to, imm.amount);
        state.credit(&self.family.native_token(), &caller, imm.safety_deposit);
        if let Some(e) = state.escrows.get_mut(&escrow.address) {
            e.settled = true;
        }

        let payload = match self.family {
            ChainFamily::Evm => {
                let (topics, data) = abi::encode_escrow_cancelled();
                EventPayload::Log { address: escrow.address, topics, data }
            }
            ChainFamily::Move => EventPayload::Move {
                event_type: EventKind::EscrowCancelled.move_type(&self.factory),
                json: to_json(&MoveEscrowCancelled { escrow_id: escrow.address })?,
            },
        };
        Ok(vec![payload])
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

struct Caller {
    signer: Address,
    resolver: Address,
}

// =============================================================================
// Adapter
// =============================================================================

/// One signer's view of a `SimulatedLedger`
#[derive(Clone)]
pub struct SimulatedChain {
    ledger: SimulatedLedger,
    signer: Address,
    resolver: Address,
}

impl SimulatedChain {
    pub fn ledger(&self) -> &SimulatedLedger {
        &self.ledger
    }

    fn mine(&self, tx: &TxRequest) -> Result<Receipt, ChainError> {
        let ledger = &self.ledger;
        let mut state = ledger.state();
        state.submissions += 1;
        state.height += 1;
        let height = state.height;
        let now = state.now();

        let mut seed = ledger.chain_id.to_be_bytes().to_vec();
        seed.extend_from_slice(&height.to_be_bytes());
        seed.extend_from_slice(tx.name().as_bytes());
        let tx_id = format!("0x{}", hex::encode(keccak256(&seed)));
        let block = BlockRef {
            height,
            hash: format!("0x{}", hex::encode(keccak256(&height.to_be_bytes()))),
        };

        let failure = state.pending_failure.take();
        if let Some((err, false)) = &failure {
            return Err(err.clone());
        }

        let caller = Caller { signer: self.signer, resolver: self.resolver };
        let mut next = state.clone();
        let payloads = match ledger.execute(&mut next, &caller, tx, now, height) {
            Ok(payloads) => payloads,
            Err(reason) => {
                log::debug!("[sim {}] {} reverted: {}", ledger.chain_id, tx.name(), reason);
                return Err(ChainError::TransactionReverted { tx_id, reason });
            }
        };

        let events: Vec<RawEvent> = payloads
            .into_iter()
            .map(|payload| RawEvent {
                chain_id: ledger.chain_id,
                block: block.clone(),
                tx_id: tx_id.clone(),
                payload,
            })
            .collect();
        next.events.extend(events.iter().cloned());
        *state = next;

        if let Some((err, _)) = failure {
            return Err(err);
        }
        Ok(Receipt { tx_id, block, confirmed_at: now, events })
    }
}

#[async_trait]
impl ChainAdapter for SimulatedChain {
    fn chain_id(&self) -> u64 {
        self.ledger.chain_id
    }

    fn family(&self) -> ChainFamily {
        self.ledger.family
    }

    fn signer(&self) -> Address {
        self.signer
    }

    fn resolver_address(&self) -> Address {
        self.resolver
    }

    async fn chain_time(&self) -> Result<u64, ChainError> {
        Ok(self.ledger.time())
    }

    async fn latest_block(&self) -> Result<u64, ChainError> {
        Ok(self.ledger.height())
    }

    async fn get_balance(&self, token: &Address, owner: &Address) -> Result<u128, ChainError> {
        Ok(self.ledger.balance(token, owner))
    }

    async fn submit(&self, tx: &TxRequest) -> Result<Receipt, ChainError> {
        self.mine(tx)
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<RawEvent>, ChainError> {
        let state = self.ledger.state();
        Ok(state
            .events
            .iter()
            .filter(|ev| match &filter.range {
                BlockQuery::Block(b) => ev.block.height == b.height,
                BlockQuery::Tx(id) => ev.tx_id == *id,
                BlockQuery::Range { from, to } => ev.block.height >= *from && ev.block.height <= *to,
            })
            .filter(|ev| ev.is(filter.kind, &filter.contract))
            .cloned()
            .collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
