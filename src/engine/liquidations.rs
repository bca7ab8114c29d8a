// engine/liquidations.rs: the five forced-closure protocols. one initial
// wallet state, one terminal outcome, mutually exclusive by precondition.
// positions always move wholesale; the counterparty is the insurance fund
// under normal operation and the exit fund during recovery.

use super::Engine;
use crate::error::{
    ArithmeticError, EngineError, MarginError, StateError, ValidationError,
};
use crate::events::{EventPayload, LiquidationKind, PositionLiquidatedEvent};
use crate::exit::ExitPricing;
use crate::ledger::acquire_position;
use crate::margin::{position_maintenance_margin, PriceSource};
use crate::pricing::{
    bankruptcy_quote_quantity, exit_quote_quantity, validate_below_minimum_quote_quantity,
    validate_quote_quantity,
};
use crate::types::{Pips, Price, SignerKey, Wallet, QUOTE_ASSET};
use log::info;
use std::collections::HashMap;

/// Which pricing rule values a whole-wallet closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ClosurePricing {
    Bankruptcy,
    Exit,
}

/// One planned position closure: symbol, signed size, signed quote credit.
pub(super) type ClosurePlan = Vec<(String, Pips, Pips)>;

impl Engine {
    // --- variant 1: position below minimum ---

    /// Close a single position smaller than the market minimum to the
    /// insurance fund. The wallet must be healthy; the price must sit
    /// within the configured tolerance of the index value.
    pub fn liquidate_position_below_minimum(
        &mut self,
        operator: SignerKey,
        symbol: &str,
        wallet: Wallet,
        quote_quantity: Pips,
    ) -> Result<(), EngineError> {
        self.require_operator(operator)?;
        let fund = self.config.insurance_fund_wallet;
        let snapshot = self.ledger.snapshot(&[wallet, fund]);
        let result = (|| -> Result<(), EngineError> {
            self.settle_all_funding(wallet)?;
            self.settle_all_funding(fund)?;
            self.settle_funding_for(fund, symbol)?;

            let market = self.registry.get(symbol)?;
            let (min_size, max_size) = (market.min_position_size, market.max_position_size);
            let index_price = market.stored_price()?;

            let size = self.ledger.position(wallet, symbol).quantity;
            if size.is_zero() {
                return Err(StateError::PositionNotFound(wallet, symbol.to_string()).into());
            }
            if size.abs() >= min_size {
                return Err(StateError::PositionNotBelowMinimum(wallet, symbol.to_string()).into());
            }

            let standing = self.standing(wallet, PriceSource::Stored)?;
            if standing.in_maintenance() {
                return Err(MarginError::InMaintenance(wallet).into());
            }

            validate_below_minimum_quote_quantity(
                size,
                index_price,
                quote_quantity,
                self.config.below_minimum_tolerance,
            )?;

            self.close_position_to(wallet, fund, symbol, quote_quantity)?;
            self.validate_fund_position_capacity(fund, symbol, max_size)?;
            self.require_meets_initial(fund, PriceSource::Stored)?;

            self.record_liquidation(
                LiquidationKind::PositionBelowMinimum,
                wallet,
                Some(fund),
                symbol,
                size,
                quote_quantity,
            );
            Ok(())
        })();
        if result.is_err() {
            self.ledger.restore(snapshot);
        }
        result
    }

    // --- variant 2: position in deactivated market ---

    /// Close one wallet's position at the price frozen at deactivation.
    /// There is no counterparty: once every holder is closed at the same
    /// price the zero-sum invariant nets the credits to zero.
    pub fn liquidate_position_in_deactivated_market(
        &mut self,
        operator: SignerKey,
        symbol: &str,
        wallet: Wallet,
    ) -> Result<(), EngineError> {
        self.require_operator(operator)?;
        let snapshot = self.ledger.snapshot(&[wallet]);
        let result = (|| -> Result<(), EngineError> {
            let market = self.registry.get(symbol)?;
            let frozen = market
                .deactivation_price
                .ok_or_else(|| StateError::MarketStillActive(symbol.to_string()))?;

            self.settle_funding_for(wallet, symbol)?;

            let size = self.ledger.position(wallet, symbol).quantity;
            if size.is_zero() {
                return Err(StateError::PositionNotFound(wallet, symbol.to_string()).into());
            }
            let quote_quantity = size.mul_price(frozen)?;
            self.close_position_to_nobody(wallet, symbol, quote_quantity)?;

            self.record_liquidation(
                LiquidationKind::PositionInDeactivatedMarket,
                wallet,
                None,
                symbol,
                size,
                quote_quantity,
            );
            Ok(())
        })();
        if result.is_err() {
            self.ledger.restore(snapshot);
        }
        result
    }

    // --- variants 3 and 4: wallet in maintenance ---

    /// Close every position of a wallet that fails its maintenance margin
    /// to the insurance fund, at bankruptcy prices validated against the
    /// supplied real-time index prices.
    pub fn liquidate_wallet_in_maintenance(
        &mut self,
        operator: SignerKey,
        wallet: Wallet,
        index_prices: &HashMap<String, Price>,
        quote_quantities: &[(String, Pips)],
    ) -> Result<(), EngineError> {
        self.require_operator(operator)?;
        let fund = self.config.insurance_fund_wallet;
        self.liquidate_in_maintenance_shared(
            wallet,
            fund,
            true,
            index_prices,
            quote_quantities,
            LiquidationKind::WalletInMaintenance,
        )
    }

    /// Same margin failure, but admissible only while the exit fund already
    /// holds an open position (degraded operation). The exit fund absorbs
    /// the wallet with no margin check of its own.
    pub fn liquidate_wallet_in_maintenance_during_recovery(
        &mut self,
        operator: SignerKey,
        wallet: Wallet,
        index_prices: &HashMap<String, Price>,
        quote_quantities: &[(String, Pips)],
    ) -> Result<(), EngineError> {
        self.require_operator(operator)?;
        let fund = self.config.exit_fund_wallet;
        if self.ledger.open_position_symbols(fund).is_empty() {
            return Err(StateError::ExitFundHasNoOpenPositions.into());
        }
        self.liquidate_in_maintenance_shared(
            wallet,
            fund,
            false,
            index_prices,
            quote_quantities,
            LiquidationKind::WalletInMaintenanceDuringRecovery,
        )
    }

    fn liquidate_in_maintenance_shared(
        &mut self,
        wallet: Wallet,
        fund: Wallet,
        check_fund_margin: bool,
        index_prices: &HashMap<String, Price>,
        quote_quantities: &[(String, Pips)],
        kind: LiquidationKind,
    ) -> Result<(), EngineError> {
        let snapshot = self.ledger.snapshot(&[wallet, fund]);
        let result = (|| -> Result<(), EngineError> {
            self.settle_all_funding(wallet)?;
            self.settle_all_funding(fund)?;
            for symbol in self.ledger.open_position_symbols(wallet) {
                self.settle_funding_for(fund, &symbol)?;
            }

            let source = PriceSource::Supplied(index_prices);
            let standing = self.standing(wallet, source)?;
            if !standing.in_maintenance() {
                return Err(MarginError::NotInMaintenance(wallet).into());
            }

            let symbols = self.ledger.open_position_symbols(wallet);
            if symbols.is_empty() {
                return Err(StateError::NoOpenPositions(wallet).into());
            }
            if quote_quantities.len() != symbols.len()
                || !quote_quantities
                    .iter()
                    .zip(&symbols)
                    .all(|((supplied, _), open)| supplied == open)
            {
                return Err(ValidationError::ClosureQuantitiesMismatch.into());
            }

            let mut plan: ClosurePlan = Vec::with_capacity(symbols.len());
            for (symbol, supplied) in quote_quantities {
                let price = source.price_for(&self.registry, symbol)?;
                let size = self.ledger.position(wallet, symbol).quantity;
                let position_mm = position_maintenance_margin(
                    size,
                    price,
                    self.registry.get(symbol)?.maintenance_margin_fraction,
                )?;
                let expected = bankruptcy_quote_quantity(
                    size,
                    price,
                    position_mm,
                    standing.total_account_value,
                    standing.maintenance_margin_requirement,
                )?;
                validate_quote_quantity(expected, *supplied)?;
                plan.push((symbol.clone(), size, *supplied));
            }

            let max_sizes: Vec<(String, Pips)> = plan
                .iter()
                .map(|(symbol, _, _)| {
                    self.registry
                        .get(symbol)
                        .map(|m| (symbol.clone(), m.max_position_size))
                })
                .collect::<Result<_, _>>()?;

            for (symbol, _, quote_quantity) in &plan {
                self.close_position_to(wallet, fund, symbol, *quote_quantity)?;
            }
            self.settle_rounding_dust(wallet, fund, plan.len())?;

            for (symbol, max_size) in &max_sizes {
                self.validate_fund_position_capacity(fund, symbol, *max_size)?;
            }
            if check_fund_margin {
                self.require_meets_initial(fund, source)?;
            }

            for (symbol, size, quote_quantity) in &plan {
                self.record_liquidation(kind, wallet, Some(fund), symbol, *size, *quote_quantity);
            }
            Ok(())
        })();
        if result.is_err() {
            self.ledger.restore(snapshot);
        }
        result
    }

    // --- variant 5: wallet exited ---

    /// Close every position of an exited wallet to the insurance fund. The
    /// pricing branch (exit vs bankruptcy) is decided once per exit and
    /// persisted so repeated partial settlements stay consistent.
    pub fn liquidate_wallet_exited(
        &mut self,
        operator: SignerKey,
        wallet: Wallet,
        quote_quantities: &[(String, Pips)],
    ) -> Result<(), EngineError> {
        self.require_operator(operator)?;
        let record = *self
            .exits
            .get(&wallet)
            .ok_or(StateError::WalletNotExited(wallet))?;
        if !record.is_effective(self.current_time) {
            return Err(StateError::ExitNotEffective(wallet).into());
        }

        let fund = self.config.insurance_fund_wallet;
        let snapshot = self.ledger.snapshot(&[wallet, fund]);
        let result = (|| -> Result<(), EngineError> {
            self.settle_all_funding(wallet)?;
            self.settle_all_funding(fund)?;
            for symbol in self.ledger.open_position_symbols(wallet) {
                self.settle_funding_for(fund, &symbol)?;
            }

            let pricing = self.resolve_exit_pricing(wallet)?;
            let plan = self.closure_plan(
                wallet,
                match pricing {
                    ExitPricing::ExitPrice => ClosurePricing::Exit,
                    ExitPricing::BankruptcyPrice => ClosurePricing::Bankruptcy,
                },
            )?;
            if plan.is_empty() {
                return Err(StateError::NoOpenPositions(wallet).into());
            }
            if quote_quantities.len() != plan.len()
                || !quote_quantities
                    .iter()
                    .zip(&plan)
                    .all(|((supplied, _), (open, _, _))| supplied == open)
            {
                return Err(ValidationError::ClosureQuantitiesMismatch.into());
            }
            for ((_, supplied), (_, _, expected)) in quote_quantities.iter().zip(&plan) {
                validate_quote_quantity(*expected, *supplied)?;
            }

            let max_sizes: Vec<(String, Pips)> = plan
                .iter()
                .map(|(symbol, _, _)| {
                    self.registry
                        .get(symbol)
                        .map(|m| (symbol.clone(), m.max_position_size))
                })
                .collect::<Result<_, _>>()?;

            for ((_, supplied), (symbol, _, _)) in quote_quantities.iter().zip(&plan) {
                self.close_position_to(wallet, fund, symbol, *supplied)?;
            }
            // dust is settled only when the wallet closed at bankruptcy
            // prices; on the exit branch its positive value stays put
            if pricing == ExitPricing::BankruptcyPrice {
                self.settle_rounding_dust(wallet, fund, plan.len())?;
            }

            for (symbol, max_size) in &max_sizes {
                self.validate_fund_position_capacity(fund, symbol, *max_size)?;
            }
            self.require_meets_initial(fund, PriceSource::Stored)?;

            for ((symbol, size, _), (_, supplied)) in plan.iter().zip(quote_quantities) {
                self.record_liquidation(
                    LiquidationKind::WalletExited,
                    wallet,
                    Some(fund),
                    symbol,
                    *size,
                    *supplied,
                );
            }
            Ok(())
        })();
        if result.is_err() {
            self.ledger.restore(snapshot);
        }
        result
    }

    // --- shared machinery ---

    /// Decide (or recall) the pricing branch for an exited wallet: exit
    /// pricing while the exit-priced account value is positive, bankruptcy
    /// pricing otherwise.
    pub(super) fn resolve_exit_pricing(&mut self, wallet: Wallet) -> Result<ExitPricing, EngineError> {
        if let Some(pricing) = self.exits.get(&wallet).and_then(|r| r.pricing) {
            return Ok(pricing);
        }

        let mut exit_value = self.ledger.quote_balance(wallet);
        for symbol in self.ledger.open_position_symbols(wallet) {
            let index = self.registry.get(&symbol)?.stored_price()?;
            let row = self.ledger.position(wallet, &symbol);
            exit_value = exit_value.checked_add(exit_quote_quantity(&row, index)?)?;
        }

        let pricing = if exit_value.is_positive() {
            ExitPricing::ExitPrice
        } else {
            ExitPricing::BankruptcyPrice
        };
        if let Some(record) = self.exits.get_mut(&wallet) {
            record.pricing = Some(pricing);
        }
        Ok(pricing)
    }

    /// Engine-derived closure quantities for every open position of a
    /// wallet, at stored prices, under the requested pricing rule.
    pub(super) fn closure_plan(
        &self,
        wallet: Wallet,
        pricing: ClosurePricing,
    ) -> Result<ClosurePlan, EngineError> {
        let symbols = self.ledger.open_position_symbols(wallet);
        let mut plan = Vec::with_capacity(symbols.len());
        match pricing {
            ClosurePricing::Exit => {
                for symbol in symbols {
                    let index = self.registry.get(&symbol)?.stored_price()?;
                    let row = self.ledger.position(wallet, &symbol);
                    plan.push((symbol, row.quantity, exit_quote_quantity(&row, index)?));
                }
            }
            ClosurePricing::Bankruptcy => {
                let standing = self.standing(wallet, PriceSource::Stored)?;
                for symbol in symbols {
                    let market = self.registry.get(&symbol)?;
                    let price = market.stored_price()?;
                    let size = self.ledger.position(wallet, &symbol).quantity;
                    let position_mm = position_maintenance_margin(
                        size,
                        price,
                        market.maintenance_margin_fraction,
                    )?;
                    plan.push((
                        symbol,
                        size,
                        bankruptcy_quote_quantity(
                            size,
                            price,
                            position_mm,
                            standing.total_account_value,
                            standing.maintenance_margin_requirement,
                        )?,
                    ));
                }
            }
        }
        Ok(plan)
    }

    /// Would the insurance fund remain within its margin and the market
    /// size limits after acquiring every position of `wallet` at the given
    /// pricing? Deleveraging is only admissible when this returns false.
    pub(super) fn insurance_fund_can_acquire(
        &self,
        wallet: Wallet,
        pricing: ClosurePricing,
    ) -> Result<bool, EngineError> {
        let fund = self.config.insurance_fund_wallet;
        let plan = self.closure_plan(wallet, pricing)?;

        let mut fund_quote = self.ledger.quote_balance(fund);
        let mut sizes: std::collections::BTreeMap<String, Pips> = self
            .ledger
            .open_position_symbols(fund)
            .into_iter()
            .map(|s| {
                let quantity = self.ledger.position(fund, &s).quantity;
                (s, quantity)
            })
            .collect();

        for (symbol, size, quote_quantity) in &plan {
            fund_quote = fund_quote.checked_sub(*quote_quantity)?;
            let entry = sizes.entry(symbol.clone()).or_insert_with(Pips::zero);
            *entry = entry.checked_add(*size)?;
            if entry.abs() > self.registry.get(symbol)?.max_position_size {
                return Ok(false);
            }
        }

        let mut value = fund_quote;
        let mut initial = Pips::zero();
        for (symbol, size) in &sizes {
            if size.is_zero() {
                continue;
            }
            let price = self.registry.get(symbol)?.stored_price()?;
            let tiering = self.registry.tiering_for(symbol, fund)?;
            value = value.checked_add(size.mul_price(price)?)?;
            initial = initial.checked_add(crate::margin::position_initial_margin(
                *size, price, tiering,
            )?)?;
        }
        Ok(value >= initial)
    }

    /// Move a whole position from `wallet` to `fund` at the given quote
    /// quantity: the wallet is credited, the fund debited, the fund's
    /// position and cost basis extended by the acquisition.
    pub(super) fn close_position_to(
        &mut self,
        wallet: Wallet,
        fund: Wallet,
        symbol: &str,
        quote_quantity: Pips,
    ) -> Result<(), EngineError> {
        let row = self.ledger.balance_mut(wallet, symbol);
        let size = row.quantity;
        if size.is_zero() {
            return Err(StateError::PositionNotFound(wallet, symbol.to_string()).into());
        }
        row.quantity = Pips::zero();
        row.cost_basis = Pips::zero();

        let wallet_quote = self.ledger.balance_mut(wallet, QUOTE_ASSET);
        wallet_quote.quantity = wallet_quote.quantity.checked_add(quote_quantity)?;

        let fund_row = self.ledger.balance_mut(fund, symbol);
        acquire_position(fund_row, size, quote_quantity)?;
        let fund_quote = self.ledger.balance_mut(fund, QUOTE_ASSET);
        fund_quote.quantity = fund_quote.quantity.checked_sub(quote_quantity)?;
        Ok(())
    }

    fn close_position_to_nobody(
        &mut self,
        wallet: Wallet,
        symbol: &str,
        quote_quantity: Pips,
    ) -> Result<(), EngineError> {
        let row = self.ledger.balance_mut(wallet, symbol);
        row.quantity = Pips::zero();
        row.cost_basis = Pips::zero();
        let quote = self.ledger.balance_mut(wallet, QUOTE_ASSET);
        quote.quantity = quote.quantity.checked_add(quote_quantity)?;
        Ok(())
    }

    /// A bankruptcy closure leaves at most a pip or two of truncation per
    /// position on the wallet's quote balance. Settle it against the
    /// absorbing fund so the wallet lands on exactly zero.
    pub(super) fn settle_rounding_dust(
        &mut self,
        wallet: Wallet,
        fund: Wallet,
        positions: usize,
    ) -> Result<(), EngineError> {
        let residual = self.ledger.quote_balance(wallet);
        let bound = Pips::one_pip().mul_fraction(rust_decimal::Decimal::from(
            (positions as u64) * 2 + 1,
        ))?;
        if residual.abs() > bound {
            return Err(ArithmeticError::RoundingResidual.into());
        }
        self.ledger.balance_mut(wallet, QUOTE_ASSET).quantity = Pips::zero();
        let fund_quote = self.ledger.balance_mut(fund, QUOTE_ASSET);
        fund_quote.quantity = fund_quote.quantity.checked_add(residual)?;
        Ok(())
    }

    pub(super) fn validate_fund_position_capacity(
        &self,
        fund: Wallet,
        symbol: &str,
        max_size: Pips,
    ) -> Result<(), EngineError> {
        if self.ledger.position(fund, symbol).quantity.abs() > max_size {
            return Err(StateError::FundPositionLimitExceeded {
                fund,
                symbol: symbol.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn record_liquidation(
        &mut self,
        kind: LiquidationKind,
        wallet: Wallet,
        counterparty: Option<Wallet>,
        symbol: &str,
        size: Pips,
        quote_quantity: Pips,
    ) {
        info!(
            "liquidation {kind:?}: wallet={wallet:?} market={symbol} size={size} quote={quote_quantity}"
        );
        self.emit_event(EventPayload::PositionLiquidated(PositionLiquidatedEvent {
            kind,
            wallet,
            counterparty,
            market: symbol.to_string(),
            size,
            quote_quantity,
        }));
    }
}
