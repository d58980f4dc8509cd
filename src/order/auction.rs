// =============================================================================
// CROSSFILL - Dutch Auction Pricing
// =============================================================================
//
// The taking amount starts above the order's base price by
// `initial_rate_bump` and decays toward the base price over `duration`.
// Intermediate points bend the curve:
//
//   bump
//    ▲
//    │●───────╮ initial
//    │         ╲
//    │          ● point 1 (delay d1 after start)
//    │           ╲____
//    │                ● point 2 (delay d2 after point 1)
//    │                  ╲
//    └──────────────────────●──▶ t
//    start                start + duration
//
// Rate bumps are in units of RATE_BUMP_DENOMINATOR (1e7 = +100 %).
//
// =============================================================================

use serde::{Deserialize, Serialize};

/// One bend in the price curve
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuctionPoint {
    /// Rate bump reached at this point
    pub coefficient: u32,
    /// Seconds after the previous point (or the start)
    pub delay: u16,
}

/// Dutch auction parameters of an order
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuctionDetails {
    pub start_time: u64,
    pub duration: u32,
    pub initial_rate_bump: u32,
    #[serde(default)]
    pub points: Vec<AuctionPoint>,
}

impl AuctionDetails {
    /// Flat auction: no bump, only the time window
    pub fn flat(start_time: u64, duration: u32) -> Self {
        AuctionDetails {
            start_time,
            duration,
            initial_rate_bump: 0,
            points: Vec::new(),
        }
    }

    /// Absolute end of the auction
    pub fn end_time(&self) -> u64 {
        self.start_time.saturating_add(self.duration as u64)
    }

    /// All points fall inside the auction window
    pub fn points_within_duration(&self) -> bool {
        let total: u64 = self.points.iter().map(|p| p.delay as u64).sum();
        total <= self.duration as u64
    }

    /// Rate bump in effect at chain time `t`
    pub fn rate_bump(&self, t: u64) -> u64 {
        if t <= self.start_time {
            return self.initial_rate_bump as u64;
        }
        let finish = self.end_time();
        if t >= finish {
            return 0;
        }

        let mut point_time = self.start_time;
        let mut bump = self.initial_rate_bump as u64;

        for point in &self.points {
            let next_time = point_time + point.delay as u64;
            let next_bump = point.coefficient as u64;
            if t <= next_time {
                // t > point_time here, so the span is non-zero
                return ((t - point_time) * next_bump + (next_time - t) * bump)
                    / (next_time - point_time);
            }
            point_time = next_time;
            bump = next_bump;
        }

        ((finish - t) * bump) / (finish - point_time)
    }

    /// Compact binary form, bound into the order's extension hash
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(17 + self.points.len() * 6);
        out.extend_from_slice(&self.start_time.to_be_bytes());
        out.extend_from_slice(&self.duration.to_be_bytes());
        out.extend_from_slice(&self.initial_rate_bump.to_be_bytes());
        out.push(self.points.len().min(u8::MAX as usize) as u8);
        for point in self.points.iter().take(u8::MAX as usize) {
            out.extend_from_slice(&point.coefficient.to_be_bytes());
            out.extend_from_slice(&point.delay.to_be_bytes());
        }
        out
    }
}

// =============================================================================
// Tests
// =============================================================================
