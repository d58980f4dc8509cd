// =============================================================================
// CROSSFILL - Event Poller
// =============================================================================
//
// Background task that scans the source factory for new escrow creations
// and forwards them to the resolver. Controlled through a handle:
// start, stop, status, shutdown.
//
// Only blocks after the last processed one are scanned, so a restart of the
// loop never forwards the same creation twice.
//
// =============================================================================

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::chain::BlockQuery;
use crate::factory::{EscrowFactory, FactoryError, SrcCreated};

/// Capacity of the creation channel
const EVENT_BUFFER: usize = 256;

#[derive(Debug)]
pub enum PollerCommand {
    Start,
    Stop,
    Status(oneshot::Sender<PollerStatus>),
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PollerStatus {
    pub running: bool,
    pub last_processed_block: Option<u64>,
    /// Unix time of the last start
    pub started_at: Option<u64>,
    pub uptime_secs: u64,
    pub events_forwarded: u64,
}

// =============================================================================
// Handle
// =============================================================================

#[derive(Clone)]
pub struct PollerHandle {
    commands: mpsc::Sender<PollerCommand>,
}

impl PollerHandle {
    async fn send(&self, cmd: PollerCommand) -> Result<(), String> {
        self.commands.send(cmd).await.map_err(|_| "Poller has shut down".to_string())
    }

    pub async fn start(&self) -> Result<(), String> {
        self.send(PollerCommand::Start).await
    }

    pub async fn stop(&self) -> Result<(), String> {
        self.send(PollerCommand::Stop).await
    }

    pub async fn status(&self) -> Result<PollerStatus, String> {
        let (tx, rx) = oneshot::channel();
        self.send(PollerCommand::Status(tx)).await?;
        rx.await.map_err(|_| "Poller dropped the status request".to_string())
    }

    pub async fn shutdown(&self) -> Result<(), String> {
        self.send(PollerCommand::Shutdown).await
    }
}

// =============================================================================
// Poller
// =============================================================================

pub struct EventPoller {
    factory: Arc<EscrowFactory>,
    interval: Duration,
    events: mpsc::Sender<SrcCreated>,
    running: bool,
    last_processed_block: Option<u64>,
    started: Option<(Instant, u64)>,
    events_forwarded: u64,
}

impl EventPoller {
    /// Spawn a stopped poller; send `start` through the handle to begin
    pub fn spawn(
        factory: Arc<EscrowFactory>,
        interval: Duration,
    ) -> (PollerHandle, mpsc::Receiver<SrcCreated>, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let poller = EventPoller {
            factory,
            interval,
            events: event_tx,
            running: false,
            last_processed_block: None,
            started: None,
            events_forwarded: 0,
        };
        let task = tokio::spawn(poller.run(cmd_rx));
        (PollerHandle { commands: cmd_tx }, event_rx, task)
    }

    fn status(&self) -> PollerStatus {
        PollerStatus {
            running: self.running,
            last_processed_block: self.last_processed_block,
            started_at: self.started.map(|(_, unix)| unix),
            uptime_secs: match (self.running, self.started) {
                (true, Some((at, _))) => at.elapsed().as_secs(),
                _ => 0,
            },
            events_forwarded: self.events_forwarded,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<PollerCommand>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(PollerCommand::Start) => {
                        if !self.running {
                            self.running = true;
                            self.started = Some((Instant::now(), crate::unix_now()));
                            ticker.reset_immediately();
                            log::info!("[poller {}] started", self.factory.chain_id());
                        }
                    }
                    Some(PollerCommand::Stop) => {
                        if self.running {
                            self.running = false;
                            log::info!("[poller {}] stopped", self.factory.chain_id());
                        }
                    }
                    Some(PollerCommand::Status(reply)) => {
                        let _ = reply.send(self.status());
                    }
                    Some(PollerCommand::Shutdown) | None => break,
                },
                _ = ticker.tick(), if self.running => {
                    match self.poll_once().await {
                        Ok(0) => {}
                        Ok(n) => log::info!("[poller {}] forwarded {} escrow creations", self.factory.chain_id(), n),
                        Err(e) => log::warn!("[poller {}] poll failed: {}", self.factory.chain_id(), e),
                    }
                }
            }
        }
        log::info!("[poller {}] shut down", self.factory.chain_id());
    }

    /// One round. The first round only records where to start.
    async fn poll_once(&mut self) -> Result<usize, FactoryError> {
        let latest = self.factory.adapter().latest_block().await?;
        let from = match self.last_processed_block {
            None => {
                self.last_processed_block = Some(latest);
                return Ok(0);
            }
            Some(last) if latest <= last => return Ok(0),
            Some(last) => last + 1,
        };

        let created = self
            .factory
            .decode_source_creation_events(&BlockQuery::Range { from, to: latest })
            .await?;
        let mut forwarded = 0;
        for ev in created {
            if self.events.send(ev).await.is_err() {
                // Cursor stays put so the unsent creations are scanned again
                log::warn!("[poller {}] no receiver for escrow creations", self.factory.chain_id());
                self.events_forwarded += forwarded as u64;
                return Ok(forwarded);
            }
            forwarded += 1;
        }
        self.events_forwarded += forwarded as u64;
        self.last_processed_block = Some(latest);
        Ok(forwarded)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::chain::simulated::SimulatedLedger;
    use crate::chain::{ChainAdapter, ChainFamily, EventKind, EventPayload, TxRequest};
    use crate::immutables::Immutables;
    use crate::order::tests::sample_order;
    use crate::order::{Order, OrderSignature, TakerTraits, WhitelistEntry};
    use secp256k1::{Secp256k1, SecretKey};

    const T0: u64 = 1_000;

    fn evm_factory(ledger: &SimulatedLedger) -> (Arc<dyn ChainAdapter>, Arc<EscrowFactory>) {
        let chain: Arc<dyn ChainAdapter> = Arc::new(ledger.connect(Address::Evm([0xaa; 20])));
        let factory = Arc::new(EscrowFactory::new(
            chain.clone(),
            ledger.factory(),
            Some(ledger.src_implementation()),
            ChainFamily::Move,
        ));
        (chain, factory)
    }

    /// Fill a fresh order through `chain`, creating one source escrow
    async fn create_source_escrow(ledger: &SimulatedLedger, chain: &Arc<dyn ChainAdapter>) -> Order {
        let resolver = chain.resolver_address();
        let key = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let mut order = sample_order();
        order.maker = Address::from_public_key(&key.public_key(&Secp256k1::new()));
        order.whitelist = vec![WhitelistEntry { resolver, allow_from: 0 }];
        let sig = OrderSignature::sign(&order.order_hash(), &key);
        ledger.mint(&order.maker_asset, &order.maker, order.making_amount);
        ledger.mint(&ChainFamily::Evm.native_token(), &resolver, 10_000);
        let args = order.escrow_extension();
        chain
            .submit(&TxRequest::DeploySrc {
                immutables: Immutables::for_source(&order, resolver, order.making_amount, T0),
                order: Box::new(order.clone()),
                signature: sig,
                amount: order.making_amount,
                taker_traits: TakerTraits::by_making_amount(0, args.len()).unwrap(),
                args,
            })
            .await
            .unwrap();
        order
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_forwards_new_creations_once() {
        let ledger = SimulatedLedger::new(ChainFamily::Evm, 1, T0);
        let (chain, factory) = evm_factory(&ledger);

        let (handle, mut rx, task) = EventPoller::spawn(factory, Duration::from_secs(1));
        assert!(!handle.status().await.unwrap().running);
        handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(handle.status().await.unwrap().last_processed_block, Some(ledger.height()));

        let order = create_source_escrow(&ledger, &chain).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        let created = rx.recv().await.unwrap();
        assert_eq!(created.immutables.order_hash, order.order_hash());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
        let status = handle.status().await.unwrap();
        assert_eq!(status.events_forwarded, 1);
        assert!(status.uptime_secs >= 4);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(handle.start().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_keeps_cursor_without_receiver() {
        let ledger = SimulatedLedger::new(ChainFamily::Evm, 1, T0);
        let (chain, factory) = evm_factory(&ledger);

        let (handle, rx, _task) = EventPoller::spawn(factory, Duration::from_secs(1));
        handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let before = handle.status().await.unwrap().last_processed_block;
        assert_eq!(before, Some(ledger.height()));

        drop(rx);
        create_source_escrow(&ledger, &chain).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let status = handle.status().await.unwrap();
        assert_eq!(status.last_processed_block, before);
        assert_eq!(status.events_forwarded, 0);
        assert!(ledger.height() > before.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_skips_malformed_events() {
        let ledger = SimulatedLedger::new(ChainFamily::Evm, 1, T0);
        let (_, factory) = evm_factory(&ledger);
        let (handle, mut rx, _task) = EventPoller::spawn(factory, Duration::from_secs(1));
        handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        ledger.emit_raw(EventPayload::Log {
            address: ledger.factory(),
            topics: vec![EventKind::SrcEscrowCreated.evm_topic()],
            data: vec![1, 2, 3],
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let status = handle.status().await.unwrap();
        assert_eq!(status.events_forwarded, 0);
        assert_eq!(status.last_processed_block, Some(ledger.height()));
        assert!(rx.try_recv().is_err());

        handle.stop().await.unwrap();
        assert!(!handle.status().await.unwrap().running);
    }
}
