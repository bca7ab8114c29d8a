// all settings in one place: caller roles, designated fund wallets, fee
// caps, delay periods and the funding catch-up bound.

use crate::types::{SignerKey, Wallet};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The single authorized caller for trade, liquidation, deleverage,
    /// withdrawal and funding-publish requests.
    pub operator: SignerKey,
    /// Absorbs liquidated exposure under normal operation.
    pub insurance_fund_wallet: Wallet,
    /// Absorbs exposure during exits and degraded operation.
    pub exit_fund_wallet: Wallet,
    /// Receives trade, transfer and withdrawal fees.
    pub fee_wallet: Wallet,
    /// Maximum fee as a fraction of the gross quote quantity.
    pub max_fee_rate: Decimal,
    /// Delay before a nonce invalidation or exit flag starts to bite.
    pub propagation_delay_ms: i64,
    /// Delay from exit initiation until `withdraw_exit` is admissible.
    pub withdrawal_release_delay_ms: i64,
    /// Delay from exit initiation until the flag may be cleared.
    pub finalization_delay_ms: i64,
    /// Upper bound on funding periods settled per invocation. One year of
    /// 8-hour periods: large enough that ordinary wallets settle in one
    /// call, small enough to bound the work of a single request.
    pub max_funding_periods_per_update: usize,
    /// Band around the index value accepted for below-minimum closures.
    pub below_minimum_tolerance: Decimal,
    /// Lifetime of a delegated key from its authorization nonce timestamp.
    pub delegated_key_expiration_ms: i64,
    /// Audit event ring capacity.
    pub max_events: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operator: SignerKey(0),
            insurance_fund_wallet: Wallet(u64::MAX),
            exit_fund_wallet: Wallet(u64::MAX - 1),
            fee_wallet: Wallet(u64::MAX - 2),
            max_fee_rate: dec!(0.05),
            propagation_delay_ms: 5 * 60 * 1000,
            withdrawal_release_delay_ms: 24 * 60 * 60 * 1000,
            finalization_delay_ms: 7 * 24 * 60 * 60 * 1000,
            max_funding_periods_per_update: 1095,
            below_minimum_tolerance: dec!(0.001),
            delegated_key_expiration_ms: 365 * 24 * 60 * 60 * 1000,
            max_events: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = EngineConfig::default();
        assert!(config.withdrawal_release_delay_ms >= config.propagation_delay_ms);
        assert!(config.finalization_delay_ms >= config.withdrawal_release_delay_ms);
        assert!(config.max_fee_rate > Decimal::ZERO && config.max_fee_rate < Decimal::ONE);
    }
}
