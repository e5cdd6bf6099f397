use rust_decimal::Decimal;
use serde::Serialize;

/// Per-run counters. `failures` includes slots that timed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub candidates: usize,
    pub receipts: usize,
    pub filtered_out: usize,
    pub soft_skips: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationResult {
    NoReceipts { stats: RunStats },
    Total { amount: Decimal, stats: RunStats },
}

impl AggregationResult {
    /// Round an exact running sum to cents. No sum means no receipts.
    pub fn from_sum(sum: Option<Decimal>, stats: RunStats) -> Self {
        let Some(sum) = sum else {
            return Self::NoReceipts { stats };
        };
        let mut amount = sum.round_dp(2);
        amount.rescale(2);
        Self::Total { amount, stats }
    }

    pub fn stats(&self) -> &RunStats {
        match self {
            Self::NoReceipts { stats } | Self::Total { stats, .. } => stats,
        }
    }

    pub fn amount(&self) -> Option<Decimal> {
        match self {
            Self::NoReceipts { .. } => None,
            Self::Total { amount, .. } => Some(*amount),
        }
    }

    pub fn failures(&self) -> usize {
        self.stats().failures
    }
}
