//! Margin calculation: total account value and the tiered initial /
//! flat maintenance requirements.
//!
//! Total account value is the quote balance plus every open position valued
//! at signed size x price. The initial requirement per position applies a
//! size-tiered fraction; the maintenance requirement applies the market's
//! flat fraction. Callers must settle outstanding funding for every touched
//! position before reading these numbers.

use crate::error::{EngineError, ValidationError};
use crate::ledger::BalanceLedger;
use crate::market::{MarginTiering, MarketRegistry};
use crate::types::{Pips, Price, Wallet};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Which price source values positions: real-time feed values supplied at
/// call time, or the fallback feed read from storage (the market's last
/// committed index price, or its frozen deactivation price).
#[derive(Debug, Clone, Copy)]
pub enum PriceSource<'a> {
    Supplied(&'a HashMap<String, Price>),
    Stored,
}

impl<'a> PriceSource<'a> {
    pub fn price_for(
        &self,
        registry: &MarketRegistry,
        symbol: &str,
    ) -> Result<Price, EngineError> {
        match self {
            PriceSource::Supplied(prices) => prices
                .get(symbol)
                .copied()
                .ok_or_else(|| ValidationError::MissingIndexPrice(symbol.to_string()).into()),
            PriceSource::Stored => registry.get(symbol)?.stored_price(),
        }
    }
}

/// baseFraction + incrementalFraction x ceil(max(0, |size| - baseline) / incrementalSize)
pub fn tiered_fraction(tiering: &MarginTiering, abs_size: Pips) -> Result<Decimal, EngineError> {
    let excess = abs_size.checked_sub(tiering.baseline_size)?;
    if !excess.is_positive() {
        return Ok(tiering.initial_margin_fraction);
    }
    let steps = excess.ratio(tiering.incremental_size)?.ceil();
    Ok(tiering.initial_margin_fraction + tiering.incremental_fraction * steps)
}

pub fn position_initial_margin(
    size: Pips,
    price: Price,
    tiering: &MarginTiering,
) -> Result<Pips, EngineError> {
    let fraction = tiered_fraction(tiering, size.abs())?;
    Ok(size.abs().mul_price(price)?.mul_fraction(fraction)?)
}

pub fn position_maintenance_margin(
    size: Pips,
    price: Price,
    maintenance_fraction: Decimal,
) -> Result<Pips, EngineError> {
    Ok(size.abs().mul_price(price)?.mul_fraction(maintenance_fraction)?)
}

/// A wallet's margin numbers at one instant under one price source.
#[derive(Debug, Clone, Copy)]
pub struct AccountStanding {
    pub total_account_value: Pips,
    pub initial_margin_requirement: Pips,
    pub maintenance_margin_requirement: Pips,
}

impl AccountStanding {
    /// New exposure and withdrawals are admissible only here.
    pub fn meets_initial(&self) -> bool {
        self.total_account_value >= self.initial_margin_requirement
    }

    pub fn in_maintenance(&self) -> bool {
        self.total_account_value < self.maintenance_margin_requirement
    }
}

pub fn total_account_value(
    ledger: &BalanceLedger,
    registry: &MarketRegistry,
    wallet: Wallet,
    source: PriceSource<'_>,
) -> Result<Pips, EngineError> {
    let mut value = ledger.quote_balance(wallet);
    for symbol in ledger.open_position_symbols(wallet) {
        let price = source.price_for(registry, &symbol)?;
        let size = ledger.position(wallet, &symbol).quantity;
        value = value.checked_add(size.mul_price(price)?)?;
    }
    Ok(value)
}

pub fn load_account_standing(
    ledger: &BalanceLedger,
    registry: &MarketRegistry,
    wallet: Wallet,
    source: PriceSource<'_>,
) -> Result<AccountStanding, EngineError> {
    let mut value = ledger.quote_balance(wallet);
    let mut initial = Pips::zero();
    let mut maintenance = Pips::zero();

    for symbol in ledger.open_position_symbols(wallet) {
        let price = source.price_for(registry, &symbol)?;
        let size = ledger.position(wallet, &symbol).quantity;
        let market = registry.get(&symbol)?;
        let tiering = registry.tiering_for(&symbol, wallet)?;

        value = value.checked_add(size.mul_price(price)?)?;
        initial = initial.checked_add(position_initial_margin(size, price, tiering)?)?;
        maintenance = maintenance.checked_add(position_maintenance_margin(
            size,
            price,
            market.maintenance_margin_fraction,
        )?)?;
    }

    Ok(AccountStanding {
        total_account_value: value,
        initial_margin_requirement: initial,
        maintenance_margin_requirement: maintenance,
    })
}
