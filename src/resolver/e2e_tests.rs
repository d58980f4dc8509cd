// =============================================================================
// CROSSFILL - End-to-end swap scenarios
// =============================================================================
//
// EVM source (chain 1) and Move destination (chain 101), both simulated and
// following the paused tokio clock so time-lock waits run instantly.
//
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use secp256k1::{Secp256k1, SecretKey};

use super::*;
use crate::chain::simulated::SimulatedLedger;
use crate::chain::ChainFamily;
use crate::order::tests::sample_order;

const T0: u64 = 1_000;
const FLOAT: u128 = 10_000;
const SECRET: Secret = Secret([7; 32]);

struct Harness {
    src: SimulatedLedger,
    dst: SimulatedLedger,
    resolver: Arc<Resolver>,
    order: Order,
    signature: OrderSignature,
}

fn src_resolver() -> Address {
    Address::Evm([0xaa; 20])
}

fn dst_resolver() -> Address {
    Address::Object([0xaa; 32])
}

fn resolver_for(src: &SimulatedLedger, dst: &SimulatedLedger, src_signer: Address, dst_signer: Address) -> Arc<Resolver> {
    let src_chain: Arc<dyn ChainAdapter> = Arc::new(src.connect(src_signer));
    let dst_chain: Arc<dyn ChainAdapter> = Arc::new(dst.connect(dst_signer));
    let src_factory = EscrowFactory::new(src_chain, src.factory(), Some(src.src_implementation()), ChainFamily::Move);
    let dst_factory = EscrowFactory::new(dst_chain, dst.factory(), None, ChainFamily::Evm);
    let settings = ResolverSettings { stage_poll_interval: Duration::from_secs(1), lookback_blocks: 1_000 };
    Arc::new(Resolver::new(src_factory, dst_factory, SubmissionQueue::new()).with_settings(settings))
}

/// Maker offers 100 on the source for 1 on the destination
fn harness(dst_liquidity: u128) -> Harness {
    let src = SimulatedLedger::new(ChainFamily::Evm, 1, T0);
    let dst = SimulatedLedger::new(ChainFamily::Move, 101, T0);
    src.follow_tokio_clock();
    dst.follow_tokio_clock();

    let key = SecretKey::from_slice(&[0x42; 32]).unwrap();
    let mut order = sample_order();
    order.maker = Address::from_public_key(&key.public_key(&Secp256k1::new()));
    order.making_amount = 100;
    order.taking_amount = 1;
    let signature = OrderSignature::sign(&order.order_hash(), &key);

    src.mint(&order.maker_asset, &order.maker, 100);
    src.mint(&ChainFamily::Evm.native_token(), &src_resolver(), FLOAT);
    dst.mint(&order.taker_asset, &dst_resolver(), dst_liquidity);
    dst.mint(&ChainFamily::Move.native_token(), &dst_resolver(), FLOAT);

    let resolver = resolver_for(&src, &dst, src_resolver(), dst_resolver());
    Harness { src, dst, resolver, order, signature }
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_settles_both_legs() {
    let h = harness(1);
    let journal = Arc::new(SwapJournal::temporary().unwrap());
    let relay = SecretRelay::new();
    relay.register(h.order.clone(), SECRET).await.unwrap();

    let mut swap = SwapWorkflow::new(h.resolver.clone(), h.order.clone(), h.signature).with_journal(journal.clone());
    assert_eq!(swap.run(&relay).await.unwrap(), SwapState::Completed);

    // Maker: 100 out on the source, 1 in on the destination
    assert_eq!(h.src.balance(&h.order.maker_asset, &h.order.maker), 0);
    assert_eq!(h.dst.balance(&h.order.taker_asset, &h.order.dst_receiver()), 1);
    // Resolver: the reverse, with both deposits back
    assert_eq!(h.src.balance(&h.order.maker_asset, &src_resolver()), 100);
    assert_eq!(h.dst.balance(&h.order.taker_asset, &dst_resolver()), 0);
    assert_eq!(h.src.balance(&ChainFamily::Evm.native_token(), &src_resolver()), FLOAT);
    assert_eq!(h.dst.balance(&ChainFamily::Move.native_token(), &dst_resolver()), FLOAT);

    let snapshot = journal.get(&h.order.order_hash()).unwrap().unwrap();
    assert_eq!(snapshot.state, SwapState::Completed);
    assert!(snapshot.dst_settlement.as_ref().is_some_and(Settlement::is_withdrawn));

    let status = h.resolver.status(&h.order).await.unwrap();
    assert_eq!(status.state, SwapState::Completed);
    assert_eq!(Resolver::revealed_secret(&status), Some(SECRET));
}

#[tokio::test(start_paused = true)]
async fn test_unfunded_destination_cancels_source() {
    // No destination liquidity: DeployDst reverts and the source is cancelled
    let h = harness(0);
    let relay = SecretRelay::new();
    relay.register(h.order.clone(), SECRET).await.unwrap();

    let mut swap = SwapWorkflow::new(h.resolver.clone(), h.order.clone(), h.signature);
    assert_eq!(swap.run(&relay).await.unwrap(), SwapState::Cancelled);
    assert!(swap.record().dst.is_none());
    assert!(h.src.time() >= T0 + h.order.time_locks.src_cancellation as u64);

    assert_eq!(h.src.balance(&h.order.maker_asset, &h.order.maker), 100);
    assert_eq!(h.src.balance(&ChainFamily::Evm.native_token(), &src_resolver()), FLOAT);

    let src = swap.record().src.clone().unwrap();
    let err = h.resolver.withdraw(Leg::Src, &src.escrow, &SECRET, &src.immutables).await.unwrap_err();
    assert!(matches!(err, ResolverError::AlreadySettled { .. }));

    let status = h.resolver.status(&h.order).await.unwrap();
    assert_eq!(status.state, SwapState::Cancelled);
    assert_eq!(Resolver::revealed_secret(&status), None);
}

#[tokio::test(start_paused = true)]
async fn test_third_party_cannot_withdraw() {
    let h = harness(1);
    let src = h.resolver.fill_on_source(&h.order, &h.signature, 100).await.unwrap();
    let dst = h.resolver.deploy_destination(&src.immutables, &src.complement).await.unwrap();

    let early = h.resolver.withdraw(Leg::Dst, &dst.escrow, &SECRET, &dst.immutables).await.unwrap_err();
    assert!(matches!(early, ResolverError::ActionNotYetLegal { ready_at: Some(t), .. } if t == T0 + 10));

    tokio::time::sleep(Duration::from_secs(20)).await;
    let stranger = resolver_for(&h.src, &h.dst, Address::Evm([0xbb; 20]), Address::Object([0xbb; 32]));
    for (leg, escrow, imm) in [(Leg::Dst, &dst.escrow, &dst.immutables), (Leg::Src, &src.escrow, &src.immutables)] {
        let err = stranger.withdraw(leg, escrow, &SECRET, imm).await.unwrap_err();
        assert!(matches!(err, ResolverError::UnauthorizedWithdrawer { .. }));
    }
    let err = stranger.cancel(Leg::Dst, &dst.escrow, &dst.immutables).await.unwrap_err();
    assert!(matches!(err, ResolverError::UnauthorizedWithdrawer { .. }));

    assert_eq!(h.dst.balance(&h.order.taker_asset, &dst.escrow.address), 1);
    assert_eq!(h.src.balance(&h.order.maker_asset, &src.escrow.address), 100);

    h.resolver.withdraw(Leg::Dst, &dst.escrow, &SECRET, &dst.immutables).await.unwrap();
    assert_eq!(h.dst.balance(&h.order.taker_asset, &h.order.dst_receiver()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wrong_secret_never_submits() {
    let h = harness(1);
    let mut swap = SwapWorkflow::new(h.resolver.clone(), h.order.clone(), h.signature);
    assert_eq!(swap.accept_secret(&SECRET), Err(ResolverError::SecretBeforeDestination));

    swap.deploy_source().await.unwrap();
    swap.deploy_destination().await.unwrap();
    let sent = (h.src.submission_count(), h.dst.submission_count());

    let wrong = Secret([8; 32]);
    assert_eq!(swap.settle_with_secret(wrong).await, Err(ResolverError::SecretMismatch));
    let dst = swap.record().dst.clone().unwrap();
    assert_eq!(
        h.resolver.withdraw(Leg::Dst, &dst.escrow, &wrong, &dst.immutables).await,
        Err(ResolverError::SecretMismatch)
    );
    assert_eq!((h.src.submission_count(), h.dst.submission_count()), sent);

    assert!(matches!(swap.abort(), Err(ResolverError::AbortNotSafe(_))));
    assert_eq!(swap.state(), &SwapState::DstDeployed);
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_destination_found_by_requery() {
    let h = harness(1);
    let src = h.resolver.fill_on_source(&h.order, &h.signature, 100).await.unwrap();

    h.dst.inject_failure(ChainError::Timeout { tx_id: "0xdead".into() }, true);
    let dst = h.resolver.deploy_destination(&src.immutables, &src.complement).await.unwrap();
    assert_eq!(dst.immutables.amount, 1);
    assert_eq!(h.dst.submission_count(), 1);

    // Re-running finds the same escrow instead of funding a second one
    let again = h.resolver.deploy_destination(&src.immutables, &src.complement).await.unwrap();
    assert_eq!(again.escrow, dst.escrow);
    assert_eq!(h.dst.submission_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lost_destination_submission_surfaces() {
    let h = harness(1);
    let src = h.resolver.fill_on_source(&h.order, &h.signature, 100).await.unwrap();

    h.dst.inject_failure(ChainError::Timeout { tx_id: "0xdead".into() }, false);
    let err = h.resolver.deploy_destination(&src.immutables, &src.complement).await.unwrap_err();
    assert!(err.requires_recheck());
    assert_eq!(h.dst.balance(&h.order.taker_asset, &dst_resolver()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abort_before_destination() {
    let h = harness(1);
    let mut swap = SwapWorkflow::new(h.resolver.clone(), h.order.clone(), h.signature);
    swap.deploy_source().await.unwrap();
    swap.abort().unwrap();
    assert_eq!(swap.state(), &SwapState::Aborted);

    // The source still has to be cancelled once its window opens
    swap.cancel().await.unwrap();
    assert_eq!(swap.state(), &SwapState::Cancelled);
    assert_eq!(h.src.balance(&h.order.maker_asset, &h.order.maker), 100);
    assert_eq!(h.dst.submission_count(), 0);
}

/// Sleep until `ledger` reaches `t`
async fn sleep_until_chain_time(ledger: &SimulatedLedger, t: u64) {
    let now = ledger.time();
    if t > now {
        tokio::time::sleep(Duration::from_secs(t - now)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_third_party_public_withdrawal() {
    let h = harness(1);
    let src = h.resolver.fill_on_source(&h.order, &h.signature, 100).await.unwrap();
    let dst = h.resolver.deploy_destination(&src.immutables, &src.complement).await.unwrap();
    let stranger = resolver_for(&h.src, &h.dst, Address::Evm([0xbb; 20]), Address::Object([0xbb; 32]));

    // Private window: only the taker may withdraw
    let dst_deployed = dst.immutables.time_locks.deployed_at;
    sleep_until_chain_time(&h.dst, dst_deployed + 20).await;
    let early = stranger.public_withdraw(Leg::Dst, &dst.escrow, &SECRET, &dst.immutables).await.unwrap_err();
    let public_from = dst_deployed + h.order.time_locks.dst_public_withdrawal as u64;
    assert!(matches!(early, ResolverError::ActionNotYetLegal { ready_at: Some(t), .. } if t == public_from));

    sleep_until_chain_time(&h.dst, public_from).await;
    stranger.public_withdraw(Leg::Dst, &dst.escrow, &SECRET, &dst.immutables).await.unwrap();
    assert_eq!(h.dst.balance(&h.order.taker_asset, &h.order.dst_receiver()), 1);
    assert_eq!(h.dst.balance(&ChainFamily::Move.native_token(), &Address::Object([0xbb; 32])), h.order.dst_safety_deposit);
    assert_eq!(h.dst.balance(&ChainFamily::Move.native_token(), &dst_resolver()), FLOAT - h.order.dst_safety_deposit);

    let src_public_from = src.immutables.time_locks.deployed_at + h.order.time_locks.src_public_withdrawal as u64;
    sleep_until_chain_time(&h.src, src_public_from).await;
    stranger.public_withdraw(Leg::Src, &src.escrow, &SECRET, &src.immutables).await.unwrap();
    assert_eq!(h.src.balance(&h.order.maker_asset, &src_resolver()), 100);
    assert_eq!(h.src.balance(&ChainFamily::Evm.native_token(), &Address::Evm([0xbb; 20])), h.order.src_safety_deposit);

    let again = stranger.public_withdraw(Leg::Src, &src.escrow, &SECRET, &src.immutables).await.unwrap_err();
    assert!(matches!(again, ResolverError::AlreadySettled { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_third_party_public_cancel_of_source() {
    let h = harness(1);
    let src = h.resolver.fill_on_source(&h.order, &h.signature, 100).await.unwrap();
    let stranger = resolver_for(&h.src, &h.dst, Address::Evm([0xbb; 20]), Address::Object([0xbb; 32]));
    let deployed = src.immutables.time_locks.deployed_at;

    // Private cancellation belongs to the taker
    sleep_until_chain_time(&h.src, deployed + h.order.time_locks.src_cancellation as u64).await;
    let public_from = deployed + h.order.time_locks.src_public_cancellation as u64;
    let early = stranger.cancel(Leg::Src, &src.escrow, &src.immutables).await.unwrap_err();
    assert!(matches!(early, ResolverError::ActionNotYetLegal { ready_at: Some(t), .. } if t == public_from));

    sleep_until_chain_time(&h.src, public_from).await;
    stranger.cancel(Leg::Src, &src.escrow, &src.immutables).await.unwrap();
    assert_eq!(h.src.balance(&h.order.maker_asset, &h.order.maker), 100);
    assert_eq!(h.src.balance(&ChainFamily::Evm.native_token(), &Address::Evm([0xbb; 20])), h.order.src_safety_deposit);
    assert_eq!(h.src.balance(&ChainFamily::Evm.native_token(), &src_resolver()), FLOAT - h.order.src_safety_deposit);

    let status = h.resolver.status(&h.order).await.unwrap();
    assert_eq!(status.state, SwapState::Cancelled);
}
