// =============================================================================
// CROSSFILL - Cross-chain HTLC Resolver
// =============================================================================
//
// Coordinates atomic swaps between an EVM chain and a Move object ledger:
// - Maker signs a single-fill order committing to H(secret)
// - Resolver fills it on the source chain (source escrow)
// - Resolver funds the matching destination escrow
// - Secret is revealed, both escrows are withdrawn
// - Or the time-locks expire and both legs are cancelled
//
// =============================================================================

pub mod amount;
pub mod address;
pub mod hashlock;
pub mod timelocks;
pub mod order;
pub mod immutables;
pub mod chain;
pub mod factory;
pub mod resolver;
pub mod config;

// --- Auction ---
/// Rate bumps are expressed in units of 1e-7 (10_000_000 = +100 %)
pub const RATE_BUMP_DENOMINATOR: u128 = 10_000_000;

// --- Orders ---
/// Nonce lives in 40 bits of the maker traits word
pub const MAX_NONCE: u64 = (1u64 << 40) - 1;
/// Smallest safety deposit accepted on either leg (smallest unit)
pub const MIN_SAFETY_DEPOSIT: u128 = 1;

// --- Secrets ---
/// Secret/preimage size in bytes
pub const SECRET_SIZE: usize = 32;
/// Hash-lock size in bytes
pub const HASH_SIZE: usize = 32;

// --- Timing ---
/// Default confirmation timeout for a submitted transaction
pub const DEFAULT_CONFIRM_TIMEOUT_SECS: u64 = 60;
/// Default interval between chain-time re-checks while waiting for a stage
pub const DEFAULT_STAGE_POLL_MS: u64 = 1_000;
/// Default interval between poller rounds
pub const DEFAULT_POLLER_INTERVAL_SECS: u64 = 5;

/// Current unix time in seconds (local clock, only for bookkeeping)
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Format a unix timestamp for display
pub fn format_timestamp(ts: u64) -> String {
    chrono::DateTime::from_timestamp(ts as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
