// engine/funding.rs: operator-facing price and funding publication, plus the
// explicit catch-up path for wallets that fell behind the per-call bound.

use super::Engine;
use crate::error::{EngineError, StateError};
use crate::events::{EventPayload, FundingMultiplierPublishedEvent, IndexPriceCommittedEvent};
use crate::funding::{funding_payment, validate_funding_rate};
use crate::price_feed::{validate_index_price, IndexPricePayload};
use crate::types::{SignerKey, Timestamp, Wallet, QUOTE_ASSET};
use log::{debug, info};
use rust_decimal::Decimal;
use std::collections::HashMap;

impl Engine {
    /// Commit a batch of signed index prices. The batch is atomic: one bad
    /// payload rejects the whole submission before anything is written.
    pub fn publish_index_prices(
        &mut self,
        operator: SignerKey,
        payloads: &[IndexPricePayload],
    ) -> Result<(), EngineError> {
        self.require_operator(operator)?;

        // validate against the committed state plus earlier payloads in
        // this same batch, then apply
        let mut pending: HashMap<String, (crate::types::Price, Timestamp)> = HashMap::new();
        for payload in payloads {
            let mut market = self.registry.get(&payload.base_asset_symbol)?.clone();
            if let Some((_, ts)) = pending.get(&payload.base_asset_symbol) {
                market.last_index_timestamp = Some(*ts);
            }
            validate_index_price(payload, &self.index_price_signers, &market, self.current_time)?;
            pending.insert(
                payload.base_asset_symbol.clone(),
                (payload.price, payload.timestamp),
            );
        }

        for payload in payloads {
            let market = self.registry.get_mut(&payload.base_asset_symbol)?;
            market.last_index_price = Some(payload.price);
            market.last_index_timestamp = Some(payload.timestamp);
            self.emit_event(EventPayload::IndexPriceCommitted(IndexPriceCommittedEvent {
                market: payload.base_asset_symbol.clone(),
                price: payload.price,
                price_timestamp: payload.timestamp,
            }));
        }
        Ok(())
    }

    /// Append this period's funding multiplier (`rate x last index price`)
    /// for a market. Skipped periods were back-filled with zero.
    pub fn publish_funding_multiplier(
        &mut self,
        operator: SignerKey,
        symbol: &str,
        funding_rate: Decimal,
    ) -> Result<(), EngineError> {
        self.require_operator(operator)?;
        validate_funding_rate(funding_rate)?;

        let market = self.registry.get(symbol)?;
        if !market.active {
            return Err(StateError::MarketNotActive(symbol.to_string()).into());
        }
        let index_price = market.stored_price()?;

        let history = self
            .funding
            .get_mut(symbol)
            .ok_or_else(|| StateError::MarketNotFound(symbol.to_string()))?;
        let multiplier = history.publish(funding_rate, index_price, self.current_time, symbol)?;

        info!("funding multiplier published: market={symbol} multiplier={multiplier}");
        self.emit_event(EventPayload::FundingMultiplierPublished(
            FundingMultiplierPublishedEvent {
                market: symbol.to_string(),
                multiplier,
            },
        ));
        Ok(())
    }

    /// Apply up to the configured bound of outstanding funding periods for
    /// one (wallet, market). Returns the number of periods still
    /// outstanding; call repeatedly until it reaches zero.
    pub fn catch_up_wallet_funding(
        &mut self,
        wallet: Wallet,
        symbol: &str,
    ) -> Result<usize, EngineError> {
        let history = self
            .funding
            .get(symbol)
            .ok_or_else(|| StateError::MarketNotFound(symbol.to_string()))?;
        let last_published = history.last_published_period();

        let balance = self.ledger.balance(wallet, symbol);
        if balance.quantity.is_zero() {
            let row = self.ledger.balance_mut(wallet, symbol);
            if row.last_funding_time < last_published {
                row.last_funding_time = last_published;
            }
            return Ok(0);
        }

        let outstanding = history.outstanding_periods(balance.last_funding_time);
        if outstanding == 0 {
            return Ok(0);
        }
        let take = outstanding.min(self.config.max_funding_periods_per_update);
        let (aggregate, through) = history.aggregate_after(balance.last_funding_time, take)?;
        let payment = funding_payment(balance.quantity, aggregate)?;

        let quote = self.ledger.balance_mut(wallet, QUOTE_ASSET);
        quote.quantity = quote.quantity.checked_add(payment)?;
        self.ledger.balance_mut(wallet, symbol).last_funding_time = through;

        debug!(
            "funding catch-up: wallet={wallet:?} market={symbol} periods={take} payment={payment}"
        );
        Ok(outstanding - take)
    }
}
