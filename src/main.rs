// =============================================================================
// CROSSFILL - Main Entry Point
// Cross-chain HTLC resolver: EVM <-> Move
// =============================================================================

use clap::{Parser, Subcommand};
use secp256k1::{Secp256k1, SecretKey};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossfill::address::Address;
use crossfill::chain::simulated::SimulatedLedger;
use crossfill::chain::{ChainAdapter, ChainFamily, SubmissionQueue};
use crossfill::config::{ResolverConfig, ENV_DATA_DIR, REGISTRY_DIR};
use crossfill::factory::EscrowFactory;
use crossfill::hashlock::{HashLock, Secret};
use crossfill::order::auction::AuctionDetails;
use crossfill::order::registry::{OrderFilter, OrderRegistry, OrderStatus, SledOrderRegistry};
use crossfill::order::{mul_div_ceil, Order, OrderHash, OrderSignature, WhitelistEntry};
use crossfill::resolver::{
    EventPoller, Resolver, ResolverSettings, SecretRelay, SwapJournal, SwapRecord, SwapState, SwapWorkflow,
};
use crossfill::timelocks::{is_action_legal, EscrowAction, Leg, TimeLocks};
use crossfill::{format_timestamp, RATE_BUMP_DENOMINATOR};

/// `poll` without --seconds runs until Ctrl+C
const FOREVER_SECS: u64 = 10 * 365 * 24 * 3600;

// =============================================================================
// CLI Definition
// =============================================================================

#[derive(Parser)]
#[command(name = "crossfill")]
#[command(version)]
#[command(about = "Cross-chain HTLC resolver between EVM and Move ledgers", long_about = None)]
struct Cli {
    /// Config file (default ~/.crossfill/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a secret and its hash-lock
    Secret,

    /// Show the stage of an escrow at a given chain time
    Stage {
        /// Escrow deployment timestamp
        deployed_at: u64,
        /// Chain time to evaluate
        now: u64,
        /// src or dst
        #[arg(long, default_value = "src")]
        leg: Leg,
    },

    /// Dutch-auction quote for a full fill
    Quote {
        #[arg(long)]
        making: u128,
        #[arg(long)]
        taking: u128,
        /// Auction start (unix seconds)
        #[arg(long)]
        start: u64,
        /// Auction length in seconds
        #[arg(long)]
        duration: u32,
        /// Initial rate bump in 1e-7 units (10_000_000 = +100 %)
        #[arg(long, default_value = "0")]
        bump: u32,
        /// Chain time to quote at
        #[arg(long)]
        at: u64,
    },

    /// Run a full swap on two simulated chains
    Demo {
        /// Withhold the secret and let both legs time out
        #[arg(long)]
        cancel: bool,
    },

    /// Store a signed order (JSON) in the registry
    OrderCreate {
        /// Order JSON file
        file: PathBuf,
        /// Maker's 65-byte signature (hex)
        #[arg(long)]
        signature: Option<String>,
    },

    /// List stored orders
    OrderList {
        #[arg(long)]
        maker: Option<String>,
        #[arg(long)]
        status: Option<OrderStatus>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show one stored order
    OrderShow {
        /// Order hash (hex)
        order_hash: String,
    },

    /// Rebuild a swap's state from both chains
    Status {
        /// Order hash (hex)
        order_hash: String,
    },

    /// Watch the source factory for new escrows
    Poll {
        /// Stop after this many seconds (default: until Ctrl+C)
        #[arg(long)]
        seconds: Option<u64>,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Secret => cmd_secret(),
        Commands::Stage { deployed_at, now, leg } => cmd_stage(deployed_at, now, leg),
        Commands::Quote { making, taking, start, duration, bump, at } => {
            cmd_quote(making, taking, start, duration, bump, at)
        }
        Commands::Demo { cancel } => cmd_demo(cancel).await,
        Commands::OrderCreate { file, signature } => cmd_order_create(config, &file, signature),
        Commands::OrderList { maker, status, limit } => cmd_order_list(config, maker, status, limit),
        Commands::OrderShow { order_hash } => cmd_order_show(config, &order_hash),
        Commands::Status { order_hash } => cmd_status(config, &order_hash).await,
        Commands::Poll { seconds } => cmd_poll(config, seconds).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn banner(title: &str) {
    println!();
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║  {:<57}║", title);
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
}

/// Registry location: config's data dir, else CROSSFILL_DATA_DIR, else ~/.crossfill
fn registry(config: Option<&Path>) -> Result<SledOrderRegistry, String> {
    let data_dir = match ResolverConfig::load(config) {
        Ok(cfg) => cfg.data_dir(),
        Err(e) => {
            log::debug!("No usable config ({}), using default data dir", e);
            std::env::var(ENV_DATA_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| ResolverConfig::default_data_dir())
        }
    };
    SledOrderRegistry::open_path(data_dir.join(REGISTRY_DIR))
}

// =============================================================================
// Offline Commands
// =============================================================================

fn cmd_secret() -> Result<(), String> {
    let secret = Secret::generate();
    let lock = HashLock::commit(&secret);

    banner("NEW SECRET");
    println!("  Secret:     {}", secret.to_hex());
    println!("  Hash-lock:  {}", lock.to_hex());
    println!();
    println!("  Keep the secret until both escrows are funded.");
    println!();
    Ok(())
}

fn cmd_stage(deployed_at: u64, now: u64, leg: Leg) -> Result<(), String> {
    let tl = TimeLocks { deployed_at, ..TimeLocks::default() };
    let stage = tl.current_stage(leg, now);

    banner(&format!("{} ESCROW STAGE", leg.to_string().to_uppercase()));
    println!("  Deployed:   {}", format_timestamp(deployed_at));
    println!("  Chain time: {}", format_timestamp(now));
    println!("  Stage:      {}", stage);
    println!();
    for action in [
        EscrowAction::PrivateWithdraw,
        EscrowAction::PublicWithdraw,
        EscrowAction::PrivateCancel,
        EscrowAction::PublicCancel,
    ] {
        let legal = is_action_legal(action, stage) && tl.action_opens_at(leg, action).is_some();
        let mark = if legal { "yes" } else { "no" };
        match tl.action_opens_at(leg, action) {
            Some(t) => println!("  {:<16} {:<4} (opens {})", action.to_string(), mark, format_timestamp(t)),
            None => println!("  {:<16} n/a", action.to_string()),
        }
    }
    if let Some(next) = tl.next_transition(leg, now) {
        println!();
        println!("  Next change in {}s", next - now);
    }
    println!();
    Ok(())
}

fn cmd_quote(making: u128, taking: u128, start: u64, duration: u32, bump: u32, at: u64) -> Result<(), String> {
    let auction = AuctionDetails { initial_rate_bump: bump, ..AuctionDetails::flat(start, duration) };
    let rate = auction.rate_bump(at) as u128;
    let quote = mul_div_ceil(taking, RATE_BUMP_DENOMINATOR + rate, RATE_BUMP_DENOMINATOR)
        .map_err(|e| e.to_string())?;

    banner("AUCTION QUOTE");
    println!("  Making:      {}", making);
    println!("  Min taking:  {}", taking);
    println!("  At:          {}", format_timestamp(at));
    println!("  Rate bump:   +{:.4} %", rate as f64 * 100.0 / RATE_BUMP_DENOMINATOR as f64);
    println!("  Taking now:  {}", quote);
    println!();
    Ok(())
}

// =============================================================================
// Demo
// =============================================================================

async fn cmd_demo(cancel: bool) -> Result<(), String> {
    let genesis = crossfill::unix_now();
    let src = SimulatedLedger::new(ChainFamily::Evm, 1, genesis);
    let dst = SimulatedLedger::new(ChainFamily::Move, 101, genesis);

    let maker_key = SecretKey::new(&mut rand::thread_rng());
    let maker = Address::from_public_key(&maker_key.public_key(&Secp256k1::new()));
    let maker_on_dst = Address::random_object();
    let src_resolver = Address::random_evm();
    let dst_resolver = Address::random_object();
    let src_token = Address::random_evm();
    let dst_token = Address::random_object();

    let secret = Secret::generate();
    let order = Order {
        maker,
        receiver: Some(maker_on_dst),
        maker_asset: src_token,
        taker_asset: dst_token,
        making_amount: 100,
        taking_amount: 1,
        src_chain_id: 1,
        dst_chain_id: 101,
        hash_lock: HashLock::commit(&secret),
        time_locks: TimeLocks::default(),
        src_safety_deposit: 10,
        dst_safety_deposit: 10,
        auction: AuctionDetails::flat(genesis, 120),
        whitelist: vec![WhitelistEntry { resolver: src_resolver, allow_from: 0 }],
        allow_partial_fills: false,
        allow_multiple_fills: false,
        nonce: 1,
        salt: rand::random::<u32>() as u64,
        expiration: genesis + 3_600,
        verifying_contract: Address::random_evm(),
    };
    let signature = OrderSignature::sign(&order.order_hash(), &maker_key);

    src.mint(&src_token, &maker, 100);
    src.mint(&ChainFamily::Evm.native_token(), &src_resolver, 1_000);
    dst.mint(&dst_token, &dst_resolver, 1);
    dst.mint(&ChainFamily::Move.native_token(), &dst_resolver, 1_000);

    let src_chain: Arc<dyn ChainAdapter> = Arc::new(src.connect(src_resolver));
    let dst_chain: Arc<dyn ChainAdapter> = Arc::new(dst.connect(dst_resolver));
    let resolver = Arc::new(
        Resolver::new(
            EscrowFactory::new(src_chain, src.factory(), Some(src.src_implementation()), ChainFamily::Move),
            EscrowFactory::new(dst_chain, dst.factory(), None, ChainFamily::Evm),
            SubmissionQueue::new(),
        )
        .with_settings(ResolverSettings { stage_poll_interval: Duration::from_millis(20), ..Default::default() }),
    );

    // One simulated second every 10 ms
    let clock = {
        let (src, dst) = (src.clone(), dst.clone());
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                src.advance(1);
                dst.advance(1);
            }
        })
    };

    banner(if cancel { "DEMO: CANCELLATION PATH" } else { "DEMO: HAPPY PATH" });
    println!("  Order:      {}", order.order_hash());
    println!("  Maker:      100 on chain 1 for 1 on chain 101");
    println!();

    let relay = SecretRelay::new();
    if !cancel {
        relay.register(order.clone(), secret).await.map_err(|e| e.to_string())?;
    }
    let journal = Arc::new(SwapJournal::temporary()?);
    let mut swap = SwapWorkflow::new(resolver.clone(), order.clone(), signature).with_journal(journal);
    let outcome = swap.run(&relay).await;
    clock.abort();
    let state = outcome.map_err(|e| e.to_string())?;

    print_record(swap.record());
    println!("  Balances after {}:", state);
    println!("    maker    src token  {}", src.balance(&src_token, &maker));
    println!("    maker    dst token  {}", dst.balance(&dst_token, &maker_on_dst));
    println!("    resolver src token  {}", src.balance(&src_token, &src_resolver));
    println!("    resolver dst token  {}", dst.balance(&dst_token, &dst_resolver));
    println!();

    let expected = if cancel { SwapState::Cancelled } else { SwapState::Completed };
    if state != expected {
        return Err(format!("demo ended in {}, expected {}", state, expected));
    }
    Ok(())
}

fn print_record(record: &SwapRecord) {
    println!("  Swap {}", record.order_hash);
    println!("    State:    {}", record.state);
    if let Some(src) = &record.src {
        println!("    Source:   {} (block {})", src.escrow, src.tx.block.height);
    }
    if let Some(dst) = &record.dst {
        println!("    Dest:     {} (block {})", dst.escrow, dst.tx.block.height);
    }
    for (leg, settlement) in [("source", &record.src_settlement), ("dest", &record.dst_settlement)] {
        if let Some(s) = settlement {
            let what = if s.is_withdrawn() { "withdrawn" } else { "cancelled" };
            println!("    {:<9} {} in {}", format!("{}:", leg), what, s.tx().tx_id);
        }
    }
    if let Some(secret) = Resolver::revealed_secret(record) {
        println!("    Secret:   {}", secret.to_hex());
    }
    println!("    Updated:  {}", format_timestamp(record.updated_at));
    println!();
}

// =============================================================================
// Registry Commands
// =============================================================================

fn cmd_order_create(config: Option<&Path>, file: &Path, signature: Option<String>) -> Result<(), String> {
    let json = std::fs::read_to_string(file).map_err(|e| format!("{}: {}", file.display(), e))?;
    let order: Order = serde_json::from_str(&json).map_err(|e| format!("Invalid order JSON: {}", e))?;
    let signature = signature
        .map(|s| OrderSignature::from_hex(&s).map_err(|e| e.to_string()))
        .transpose()?;

    let registry = registry(config)?;
    let id = registry.create_order(order, signature)?;
    registry.flush()?;

    println!();
    println!("  Order stored: {}", id);
    println!();
    Ok(())
}

fn cmd_order_list(
    config: Option<&Path>,
    maker: Option<String>,
    status: Option<OrderStatus>,
    limit: usize,
) -> Result<(), String> {
    let maker = maker.map(|m| Address::parse(&m).map_err(|e| e.to_string())).transpose()?;
    let registry = registry(config)?;
    let page = registry.list_orders(&OrderFilter { maker, status, limit, offset: 0 })?;

    banner(&format!("ORDERS ({} of {})", page.orders.len(), page.total));
    if page.orders.is_empty() {
        println!("  No orders.");
    }
    for stored in &page.orders {
        println!(
            "  {}  {:<9} {} -> {}  {}",
            stored.order_hash.short(),
            stored.status.to_string(),
            stored.order.making_amount,
            stored.order.taking_amount,
            format_timestamp(stored.created_at)
        );
    }
    if page.has_more {
        println!("  ...");
    }
    println!();
    Ok(())
}

fn cmd_order_show(config: Option<&Path>, order_hash: &str) -> Result<(), String> {
    let id = OrderHash::from_hex(order_hash)?;
    let registry = registry(config)?;
    let stored = registry.get_order(&id)?.ok_or_else(|| format!("Order {} not found", id))?;
    let order = &stored.order;

    banner("ORDER");
    println!("  Hash:          {}", stored.order_hash);
    println!("  Status:        {}", stored.status);
    println!("  Maker:         {}", order.maker);
    println!("  Receiver:      {}", order.dst_receiver());
    println!("  Offers:        {} of {} (chain {})", order.making_amount, order.maker_asset, order.src_chain_id);
    println!("  Wants:         {} of {} (chain {})", order.taking_amount, order.taker_asset, order.dst_chain_id);
    println!("  Hash-lock:     {}", order.hash_lock.to_hex());
    println!("  Auction:       {} for {}s", format_timestamp(order.auction.start_time), order.auction.duration);
    println!("  Expires:       {}", format_timestamp(order.expiration));
    println!("  Resolvers:     {}", order.whitelist.len());
    println!("  Signed:        {}", if stored.signature.is_some() { "yes" } else { "no" });
    println!("  Created:       {}", format_timestamp(stored.created_at));
    println!();
    Ok(())
}

// =============================================================================
// Chain Commands
// =============================================================================

async fn cmd_status(config: Option<&Path>, order_hash: &str) -> Result<(), String> {
    let cfg = ResolverConfig::load(config).map_err(|e| e.to_string())?;
    let id = OrderHash::from_hex(order_hash)?;
    let registry = SledOrderRegistry::open_path(cfg.registry_path())?;
    let stored = registry.get_order(&id)?.ok_or_else(|| format!("Order {} not found", id))?;

    let resolver = cfg.build_resolver(None).map_err(|e| e.to_string())?;
    let record = resolver.status(&stored.order).await.map_err(|e| e.to_string())?;

    banner("SWAP STATUS");
    print_record(&record);

    let journal = SwapJournal::open_path(cfg.journal_path())?;
    if let Some(local) = journal.get(&id)? {
        if local.state != record.state {
            println!("  Journal last saw {} ({})", local.state, format_timestamp(local.updated_at));
            println!();
        }
    }
    Ok(())
}

async fn cmd_poll(config: Option<&Path>, seconds: Option<u64>) -> Result<(), String> {
    let cfg = ResolverConfig::load(config).map_err(|e| e.to_string())?;
    let adapter = cfg.src.connect(None).map_err(|e| e.to_string())?;
    let factory = Arc::new(cfg.src.factory(adapter, cfg.dst.family));

    let (handle, mut created, task) = EventPoller::spawn(factory, cfg.poller_interval());
    handle.start().await?;
    println!("  Watching chain {} factory {} (Ctrl+C to stop)", cfg.src.chain_id, cfg.src.escrow_factory);

    let deadline = tokio::time::sleep(Duration::from_secs(seconds.unwrap_or(FOREVER_SECS)));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            ev = created.recv() => match ev {
                Some(ev) => println!(
                    "  [block {}] escrow {} for order {} ({} of {})",
                    ev.tx.block.height,
                    ev.escrow,
                    ev.immutables.order_hash.short(),
                    ev.immutables.amount,
                    ev.immutables.token.short()
                ),
                None => break,
            },
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let status = handle.status().await?;
    handle.shutdown().await?;
    let _ = task.await;
    println!();
    println!("  Forwarded {} events, last block {:?}", status.events_forwarded, status.last_processed_block);
    println!();
    Ok(())
}
