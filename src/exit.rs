// wallet self-exit records. phase one sets the flag (deposits blocked at
// once, trading and ordinary withdrawal blocked after the propagation
// delay); phase two is the forced close-out to the exit fund. the pricing
// branch chosen for the first exit settlement is persisted here so repeated
// partial settlements of the same wallet stay consistent.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};

/// Pricing branch for settling an exited wallet, decided once per exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitPricing {
    /// Exit account value was positive: worse-of-entry-or-feed pricing.
    ExitPrice,
    /// Exit account value was non-positive: bankruptcy pricing.
    BankruptcyPrice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitRecord {
    pub exited_at: Timestamp,
    /// From here on trading, transfers and ordinary withdrawal are blocked.
    pub effective_at: Timestamp,
    /// Persisted on the first exit settlement touching this wallet.
    pub pricing: Option<ExitPricing>,
}

impl ExitRecord {
    pub fn new(now: Timestamp, propagation_delay_ms: i64) -> Self {
        Self {
            exited_at: now,
            effective_at: now.plus_ms(propagation_delay_ms),
            pricing: None,
        }
    }

    pub fn is_effective(&self, now: Timestamp) -> bool {
        now >= self.effective_at
    }

    pub fn withdraw_allowed(&self, now: Timestamp, withdrawal_release_delay_ms: i64) -> bool {
        self.is_effective(now) && now >= self.exited_at.plus_ms(withdrawal_release_delay_ms)
    }

    pub fn clear_allowed(&self, now: Timestamp, finalization_delay_ms: i64) -> bool {
        now >= self.exited_at.plus_ms(finalization_delay_ms)
    }
}
