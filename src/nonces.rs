// nonce invalidation book. a wallet can invalidate all orders and delegated
// key authorizations carrying nonce timestamps at or below a chosen value.
// each invalidation only starts to bite after the propagation delay, so
// orders already in flight still settle.

use crate::error::{EngineError, ValidationError};
use crate::types::{Nonce, Timestamp, Wallet, MS_PER_DAY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceInvalidation {
    /// Orders with nonce timestamps at or below this are rejected once effective.
    pub nonce_timestamp: i64,
    pub effective_at: Timestamp,
}

/// Append-only per-wallet invalidation history.
#[derive(Debug, Default)]
pub struct NonceBook {
    records: HashMap<Wallet, Vec<NonceInvalidation>>,
}

impl NonceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(
        &mut self,
        wallet: Wallet,
        nonce: Nonce,
        now: Timestamp,
        propagation_delay_ms: i64,
    ) -> Result<NonceInvalidation, EngineError> {
        let submitted = nonce.timestamp_ms();
        if submitted > now.as_millis() + MS_PER_DAY {
            return Err(ValidationError::TimestampTooFarAhead {
                submitted: Timestamp::from_millis(submitted),
                now,
            }
            .into());
        }
        if let Some(last) = self.records.get(&wallet).and_then(|r| r.last()) {
            if submitted <= last.nonce_timestamp {
                return Err(ValidationError::NonceNotIncreasing {
                    submitted,
                    previous: last.nonce_timestamp,
                }
                .into());
            }
        }

        let record = NonceInvalidation {
            nonce_timestamp: submitted,
            effective_at: now.plus_ms(propagation_delay_ms),
        };
        self.records.entry(wallet).or_default().push(record);
        Ok(record)
    }

    /// Highest invalidated nonce timestamp already effective at `now`.
    pub fn effective_threshold(&self, wallet: Wallet, now: Timestamp) -> Option<i64> {
        self.records.get(&wallet).and_then(|records| {
            records
                .iter()
                .filter(|r| r.effective_at <= now)
                .map(|r| r.nonce_timestamp)
                .max()
        })
    }

    /// Reject a nonce timestamp at or below the effective threshold.
    pub fn validate_nonce_timestamp(
        &self,
        wallet: Wallet,
        nonce_timestamp: i64,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        if let Some(threshold) = self.effective_threshold(wallet, now) {
            if nonce_timestamp <= threshold {
                return Err(ValidationError::InvalidatedNonce {
                    wallet,
                    nonce_timestamp,
                    threshold,
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn history(&self, wallet: Wallet) -> &[NonceInvalidation] {
        self.records.get(&wallet).map(Vec::as_slice).unwrap_or(&[])
    }
}
