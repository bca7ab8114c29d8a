//! Market registry: per-market risk parameters, activation state and the
//! cached last-committed index price.
//!
//! A market's identity (its base symbol) is immutable; parameters are
//! mutable. Deactivation freezes the closure price and is terminal for
//! opening new exposure but never for closing existing exposure.

use crate::error::{EngineError, StateError, ValidationError};
use crate::types::{Pips, Price, Timestamp, Wallet};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The tiered initial-margin parameter set. Replaceable wholesale by a
/// per-(market, wallet) override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginTiering {
    /// Base initial margin fraction applied to every position.
    pub initial_margin_fraction: Decimal,
    /// Position size up to which only the base fraction applies.
    pub baseline_size: Pips,
    /// Size step that adds one increment of extra margin.
    pub incremental_size: Pips,
    /// Extra fraction added per full-or-partial increment above baseline.
    pub incremental_fraction: Decimal,
}

impl MarginTiering {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.initial_margin_fraction <= Decimal::ZERO
            || self.initial_margin_fraction >= Decimal::ONE
        {
            return Err(ValidationError::InvalidMarketParameters(
                "initial margin fraction must be in (0, 1)".into(),
            )
            .into());
        }
        if self.incremental_fraction < Decimal::ZERO {
            return Err(ValidationError::InvalidMarketParameters(
                "incremental fraction must be non-negative".into(),
            )
            .into());
        }
        if self.baseline_size.is_negative() || !self.incremental_size.is_positive() {
            return Err(ValidationError::InvalidMarketParameters(
                "tier sizes must be positive".into(),
            )
            .into());
        }
        Ok(())
    }
}

impl Default for MarginTiering {
    fn default() -> Self {
        Self {
            initial_margin_fraction: dec!(0.10),
            baseline_size: Pips::from_int(10),
            incremental_size: Pips::from_int(10),
            incremental_fraction: dec!(0.01),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    /// Base asset symbol, e.g. "BTC". Quote is always [`crate::types::QUOTE_ASSET`].
    pub base_symbol: String,
    pub active: bool,
    pub tiering: MarginTiering,
    /// Flat maintenance fraction; maintenance margin is never tiered.
    pub maintenance_margin_fraction: Decimal,
    pub min_position_size: Pips,
    pub max_position_size: Pips,
    /// Last committed index price and its timestamp (the fallback feed).
    pub last_index_price: Option<Price>,
    pub last_index_timestamp: Option<Timestamp>,
    /// Price frozen at deactivation; positions close at exactly this price.
    pub deactivation_price: Option<Price>,
    pub created_at: Timestamp,
}

impl Market {
    pub fn new(base_symbol: &str, created_at: Timestamp) -> Self {
        Self {
            base_symbol: base_symbol.to_string(),
            active: true,
            tiering: MarginTiering::default(),
            maintenance_margin_fraction: dec!(0.05),
            min_position_size: Pips::new(dec!(0.001)),
            max_position_size: Pips::from_int(1_000),
            last_index_price: None,
            last_index_timestamp: None,
            deactivation_price: None,
            created_at,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.tiering.validate()?;
        if self.maintenance_margin_fraction <= Decimal::ZERO
            || self.maintenance_margin_fraction > self.tiering.initial_margin_fraction
        {
            return Err(ValidationError::InvalidMarketParameters(
                "maintenance fraction must be in (0, initial]".into(),
            )
            .into());
        }
        if !self.min_position_size.is_positive() || self.min_position_size > self.max_position_size
        {
            return Err(ValidationError::InvalidMarketParameters(
                "position size bounds must satisfy 0 < min <= max".into(),
            )
            .into());
        }
        Ok(())
    }

    /// The price used for closing positions in this market: the frozen
    /// deactivation price once deactivated, the live index price otherwise.
    pub fn stored_price(&self) -> Result<Price, EngineError> {
        if let Some(frozen) = self.deactivation_price {
            return Ok(frozen);
        }
        self.last_index_price
            .ok_or_else(|| StateError::NoIndexPrice(self.base_symbol.clone()).into())
    }
}

#[derive(Debug, Default)]
pub struct MarketRegistry {
    markets: HashMap<String, Market>,
    overrides: HashMap<(String, Wallet), MarginTiering>,
}

impl MarketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, market: Market) -> Result<(), EngineError> {
        market.validate()?;
        if self.markets.contains_key(&market.base_symbol) {
            return Err(StateError::MarketExists(market.base_symbol).into());
        }
        self.markets.insert(market.base_symbol.clone(), market);
        Ok(())
    }

    pub fn get(&self, symbol: &str) -> Result<&Market, EngineError> {
        self.markets
            .get(symbol)
            .ok_or_else(|| StateError::MarketNotFound(symbol.to_string()).into())
    }

    pub fn get_mut(&mut self, symbol: &str) -> Result<&mut Market, EngineError> {
        self.markets
            .get_mut(symbol)
            .ok_or_else(|| StateError::MarketNotFound(symbol.to_string()).into())
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.markets.contains_key(symbol)
    }

    /// Terminal for new exposure. The closure price is frozen at the last
    /// committed index price.
    pub fn deactivate(&mut self, symbol: &str) -> Result<Price, EngineError> {
        let market = self.get_mut(symbol)?;
        if !market.active {
            return Err(StateError::MarketNotActive(symbol.to_string()).into());
        }
        let frozen = market.stored_price()?;
        market.active = false;
        market.deactivation_price = Some(frozen);
        Ok(frozen)
    }

    pub fn set_override(
        &mut self,
        symbol: &str,
        wallet: Wallet,
        tiering: MarginTiering,
    ) -> Result<(), EngineError> {
        tiering.validate()?;
        self.get(symbol)?;
        self.overrides.insert((symbol.to_string(), wallet), tiering);
        Ok(())
    }

    pub fn clear_override(&mut self, symbol: &str, wallet: Wallet) {
        self.overrides.remove(&(symbol.to_string(), wallet));
    }

    /// The tiering parameter set in force for (market, wallet): the override
    /// when present, the market defaults otherwise.
    pub fn tiering_for(&self, symbol: &str, wallet: Wallet) -> Result<&MarginTiering, EngineError> {
        if let Some(tiering) = self.overrides.get(&(symbol.to_string(), wallet)) {
            return Ok(tiering);
        }
        Ok(&self.get(symbol)?.tiering)
    }
}
