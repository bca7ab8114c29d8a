// engine/core.rs: main engine struct. all persisted state lives here; each
// field has exactly one owning component file.

use crate::config::EngineConfig;
use crate::error::{
    AuthorizationError, EngineError, MarginError, StateError, ValidationError,
};
use crate::events::{
    DepositEvent, Event, EventId, EventPayload, FundingSettledEvent, MarketDeactivatedEvent,
};
use crate::exit::ExitRecord;
use crate::funding::{funding_payment, FundingHistory};
use crate::ledger::BalanceLedger;
use crate::margin::{load_account_standing, AccountStanding, PriceSource};
use crate::market::{MarginTiering, Market, MarketRegistry};
use crate::nonces::NonceBook;
use crate::types::{Hash32, Pips, Price, SignerKey, Timestamp, Wallet, QUOTE_ASSET};
use log::debug;
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) registry: MarketRegistry,
    pub(super) ledger: BalanceLedger,
    pub(super) funding: HashMap<String, FundingHistory>,
    pub(super) nonces: NonceBook,
    pub(super) exits: HashMap<Wallet, ExitRecord>,
    // per-order cumulative fills, keyed by order hash
    pub(super) partial_fills: HashMap<Hash32, Pips>,
    // replay guards
    pub(super) completed_trades: HashSet<Hash32>,
    pub(super) completed_transfers: HashSet<Hash32>,
    pub(super) completed_withdrawals: HashSet<Hash32>,
    pub(super) index_price_signers: HashSet<SignerKey>,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) current_time: Timestamp,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: MarketRegistry::new(),
            ledger: BalanceLedger::new(),
            funding: HashMap::new(),
            nonces: NonceBook::new(),
            exits: HashMap::new(),
            partial_fills: HashMap::new(),
            completed_trades: HashSet::new(),
            completed_transfers: HashSet::new(),
            completed_withdrawals: HashSet::new(),
            index_price_signers: HashSet::new(),
            events: Vec::new(),
            next_event_id: 1,
            current_time: Timestamp::from_millis(0),
        }
    }

    pub fn with_ledger(config: EngineConfig, ledger: BalanceLedger) -> Self {
        Self {
            ledger,
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = self.current_time.plus_ms(millis);
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    // --- market administration (governance pass-through, not operator-gated) ---

    pub fn add_market(&mut self, market: Market) -> Result<(), EngineError> {
        let symbol = market.base_symbol.clone();
        self.registry.insert(market)?;
        self.funding
            .insert(symbol, FundingHistory::new(self.current_time));
        Ok(())
    }

    pub fn market(&self, symbol: &str) -> Result<&Market, EngineError> {
        self.registry.get(symbol)
    }

    pub fn deactivate_market(&mut self, symbol: &str) -> Result<Price, EngineError> {
        let frozen = self.registry.deactivate(symbol)?;
        self.emit_event(EventPayload::MarketDeactivated(MarketDeactivatedEvent {
            market: symbol.to_string(),
            frozen_price: frozen,
        }));
        Ok(frozen)
    }

    /// Governance parameter update: mutate a market's parameters and
    /// re-validate the result. Market identity is immutable.
    pub fn update_market_parameters(
        &mut self,
        symbol: &str,
        update: impl FnOnce(&mut Market),
    ) -> Result<(), EngineError> {
        let mut market = self.registry.get(symbol)?.clone();
        update(&mut market);
        market.base_symbol = symbol.to_string();
        market.validate()?;
        *self.registry.get_mut(symbol)? = market;
        Ok(())
    }

    pub fn set_market_override(
        &mut self,
        symbol: &str,
        wallet: Wallet,
        tiering: MarginTiering,
    ) -> Result<(), EngineError> {
        self.registry.set_override(symbol, wallet, tiering)
    }

    pub fn clear_market_override(&mut self, symbol: &str, wallet: Wallet) {
        self.registry.clear_override(symbol, wallet);
    }

    pub fn add_index_price_signer(&mut self, key: SignerKey) {
        self.index_price_signers.insert(key);
    }

    pub fn remove_index_price_signer(&mut self, key: SignerKey) {
        self.index_price_signers.remove(&key);
    }

    // --- balances ---

    /// Custody pass-through credit. Blocked the moment the destination's
    /// exit flag is set, before the exit is even effective.
    pub fn deposit(&mut self, quantity: Pips, destination: Wallet) -> Result<(), EngineError> {
        if !quantity.is_positive() {
            return Err(ValidationError::NonPositiveQuantity.into());
        }
        if self.exits.contains_key(&destination) {
            return Err(StateError::WalletExited(destination).into());
        }
        let row = self.ledger.balance_mut(destination, QUOTE_ASSET);
        row.quantity = row.quantity.checked_add(quantity)?;
        let new_balance = row.quantity;
        self.emit_event(EventPayload::Deposit(DepositEvent {
            wallet: destination,
            quantity,
            new_balance,
        }));
        Ok(())
    }

    pub fn quote_balance(&self, wallet: Wallet) -> Pips {
        self.ledger.quote_balance(wallet)
    }

    pub fn position_size(&self, wallet: Wallet, symbol: &str) -> Pips {
        self.ledger.position(wallet, symbol).quantity
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    /// Net open interest across all wallets; zero for a healthy market.
    pub fn net_position(&self, symbol: &str) -> Pips {
        let wallets: Vec<Wallet> = self.ledger.wallets().copied().collect();
        let mut net = Pips::zero();
        for wallet in wallets {
            net = net
                .checked_add(self.ledger.position(wallet, symbol).quantity)
                .unwrap_or(net);
        }
        net
    }

    // --- shared gates and helpers ---

    pub(super) fn require_operator(&self, caller: SignerKey) -> Result<(), EngineError> {
        if caller != self.config.operator {
            return Err(AuthorizationError::NotOperator.into());
        }
        Ok(())
    }

    /// Trading, transfers and ordinary withdrawal are blocked once an exit
    /// becomes effective.
    pub(super) fn require_not_exit_blocked(&self, wallet: Wallet) -> Result<(), EngineError> {
        if let Some(record) = self.exits.get(&wallet) {
            if record.is_effective(self.current_time) {
                return Err(StateError::WalletExited(wallet).into());
            }
        }
        Ok(())
    }

    pub(super) fn standing(
        &self,
        wallet: Wallet,
        source: PriceSource<'_>,
    ) -> Result<AccountStanding, EngineError> {
        load_account_standing(&self.ledger, &self.registry, wallet, source)
    }

    pub(super) fn require_meets_initial(
        &self,
        wallet: Wallet,
        source: PriceSource<'_>,
    ) -> Result<(), EngineError> {
        let standing = self.standing(wallet, source)?;
        if !standing.meets_initial() {
            return Err(MarginError::BelowInitialRequirement {
                wallet,
                total_account_value: standing.total_account_value,
                requirement: standing.initial_margin_requirement,
            }
            .into());
        }
        Ok(())
    }

    /// Settle outstanding funding for one (wallet, market), applying at most
    /// the configured number of periods. A wallet further behind must catch
    /// up explicitly before dependent operations proceed.
    pub(super) fn settle_funding_for(
        &mut self,
        wallet: Wallet,
        symbol: &str,
    ) -> Result<(), EngineError> {
        let history = self
            .funding
            .get(symbol)
            .ok_or_else(|| StateError::MarketNotFound(symbol.to_string()))?;
        let last_published = history.last_published_period();

        let balance = self.ledger.balance(wallet, symbol);
        if balance.quantity.is_zero() {
            // no payment can accrue on an empty position; just advance
            let row = self.ledger.balance_mut(wallet, symbol);
            if row.last_funding_time < last_published {
                row.last_funding_time = last_published;
            }
            return Ok(());
        }

        let outstanding = history.outstanding_periods(balance.last_funding_time);
        if outstanding == 0 {
            return Ok(());
        }
        if outstanding > self.config.max_funding_periods_per_update {
            return Err(StateError::FundingBacklog {
                wallet,
                symbol: symbol.to_string(),
                outstanding,
            }
            .into());
        }

        let (aggregate, through) = history.aggregate_after(balance.last_funding_time, outstanding)?;
        let payment = funding_payment(balance.quantity, aggregate)?;

        let quote = self.ledger.balance_mut(wallet, QUOTE_ASSET);
        quote.quantity = quote.quantity.checked_add(payment)?;
        self.ledger.balance_mut(wallet, symbol).last_funding_time = through;

        if !payment.is_zero() {
            debug!("funding settled: wallet={wallet:?} market={symbol} payment={payment}");
            self.emit_event(EventPayload::FundingSettled(FundingSettledEvent {
                wallet,
                market: symbol.to_string(),
                payment,
            }));
        }
        Ok(())
    }

    /// Settle funding across every position the wallet has ever touched.
    pub(super) fn settle_all_funding(&mut self, wallet: Wallet) -> Result<(), EngineError> {
        for symbol in self.ledger.touched_position_symbols(wallet) {
            self.settle_funding_for(wallet, &symbol)?;
        }
        Ok(())
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;
        self.events.push(event);

        if self.events.len() > self.config.max_events {
            let drain = self.events.len() - self.config.max_events;
            self.events.drain(0..drain);
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn exit_record(&self, wallet: Wallet) -> Option<&ExitRecord> {
        self.exits.get(&wallet)
    }

    pub fn nonce_history(&self, wallet: Wallet) -> &[crate::nonces::NonceInvalidation] {
        self.nonces.history(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine() -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        engine.set_time(Timestamp::from_millis(1_000));
        let mut market = Market::new("BTC", engine.time());
        market.last_index_price = Some(Price::new_unchecked(dec!(50_000)));
        engine.add_market(market).unwrap();
        engine
    }

    #[test]
    fn deposit_credits_quote_balance() {
        let mut engine = engine();
        engine.deposit(Pips::from_int(10_000), Wallet(1)).unwrap();
        assert_eq!(engine.quote_balance(Wallet(1)), Pips::from_int(10_000));
        assert_eq!(engine.events().len(), 1);
    }

    #[test]
    fn deposit_rejects_non_positive() {
        let mut engine = engine();
        assert!(engine.deposit(Pips::zero(), Wallet(1)).is_err());
    }

    #[test]
    fn operator_gate() {
        let engine = engine();
        assert!(engine.require_operator(SignerKey(0)).is_ok());
        assert!(matches!(
            engine.require_operator(SignerKey(1)),
            Err(EngineError::Authorization(AuthorizationError::NotOperator))
        ));
    }

    #[test]
    fn duplicate_market_rejected() {
        let mut engine = engine();
        let market = Market::new("BTC", engine.time());
        assert!(engine.add_market(market).is_err());
    }
}
