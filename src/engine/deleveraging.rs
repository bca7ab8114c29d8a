// engine/deleveraging.rs: the four counterparty-matched partial-closure
// protocols. unlike liquidation, each call reduces exactly one position
// against one opposite-side counterparty position, bounded by the smaller
// of the two sizes; full closure may take several calls.

use super::liquidations::ClosurePricing;
use super::Engine;
use crate::error::{EngineError, MarginError, StateError, ValidationError};
use crate::events::{DeleverageKind, EventPayload, PositionDeleveragedEvent};
use crate::exit::ExitPricing;
use crate::ledger::acquire_position;
use crate::margin::PriceSource;
use crate::pricing::validate_quote_quantity;
use crate::types::{Pips, SignerKey, Wallet, QUOTE_ASSET};
use log::info;

impl Engine {
    // --- variant 1: in-maintenance acquisition ---

    /// Reduce an in-maintenance wallet's position against a counterparty at
    /// the wallet's bankruptcy price. Admissible only when the insurance
    /// fund could not absorb the wallet directly without breaching its own
    /// margin or the market size limits.
    pub fn deleverage_in_maintenance_acquisition(
        &mut self,
        operator: SignerKey,
        symbol: &str,
        liquidating: Wallet,
        counterparty: Wallet,
        base_quantity: Pips,
        quote_quantity: Pips,
    ) -> Result<(), EngineError> {
        self.require_operator(operator)?;
        let snapshot = self.ledger.snapshot(&[liquidating, counterparty]);
        let result = (|| -> Result<(), EngineError> {
            self.settle_all_funding(liquidating)?;
            self.settle_all_funding(counterparty)?;

            let standing = self.standing(liquidating, PriceSource::Stored)?;
            if !standing.in_maintenance() {
                return Err(MarginError::NotInMaintenance(liquidating).into());
            }
            if self.insurance_fund_can_acquire(liquidating, ClosurePricing::Bankruptcy)? {
                return Err(StateError::InsuranceFundCanLiquidateDirectly(liquidating).into());
            }

            let expected =
                self.partial_closure_quote(liquidating, symbol, base_quantity, ClosurePricing::Bankruptcy)?;
            validate_quote_quantity(expected, quote_quantity)?;

            self.reduce_pair(liquidating, counterparty, symbol, base_quantity, quote_quantity)?;

            let counterparty_standing = self.standing(counterparty, PriceSource::Stored)?;
            if counterparty_standing.in_maintenance() {
                return Err(MarginError::CounterpartyBelowMaintenance(counterparty).into());
            }

            self.record_deleverage(
                DeleverageKind::InMaintenanceAcquisition,
                liquidating,
                counterparty,
                symbol,
                base_quantity,
                quote_quantity,
            );
            Ok(())
        })();
        if result.is_err() {
            self.ledger.restore(snapshot);
        }
        result
    }

    // --- variant 2: insurance fund closure ---

    /// Reduce an insurance-fund position against a counterparty at the
    /// fund's entry price. The judgment that the order book cannot absorb
    /// the closure is the operator's; the engine validates the price.
    pub fn deleverage_insurance_fund_closure(
        &mut self,
        operator: SignerKey,
        symbol: &str,
        counterparty: Wallet,
        base_quantity: Pips,
        quote_quantity: Pips,
    ) -> Result<(), EngineError> {
        self.require_operator(operator)?;
        let fund = self.config.insurance_fund_wallet;
        let snapshot = self.ledger.snapshot(&[fund, counterparty]);
        let result = (|| -> Result<(), EngineError> {
            self.settle_all_funding(fund)?;
            self.settle_all_funding(counterparty)?;

            let position = self.ledger.position(fund, symbol);
            if position.quantity.is_zero() {
                return Err(StateError::PositionNotFound(fund, symbol.to_string()).into());
            }
            // entry price closure: the pro-rata share of the fund's basis
            let fraction = base_quantity.abs().ratio(position.quantity.abs())?;
            let expected = position.cost_basis.mul_fraction(fraction)?;
            validate_quote_quantity(expected, quote_quantity)?;

            self.reduce_pair(fund, counterparty, symbol, base_quantity, quote_quantity)?;

            self.record_deleverage(
                DeleverageKind::InsuranceFundClosure,
                fund,
                counterparty,
                symbol,
                base_quantity,
                quote_quantity,
            );
            Ok(())
        })();
        if result.is_err() {
            self.ledger.restore(snapshot);
        }
        result
    }

    // --- variant 3: exit acquisition ---

    /// Reduce an exited wallet's position against a counterparty under the
    /// persisted exit/bankruptcy pricing branch, when direct wallet-exited
    /// liquidation is blocked by the insurance fund's own limits.
    pub fn deleverage_exit_acquisition(
        &mut self,
        operator: SignerKey,
        symbol: &str,
        exited: Wallet,
        counterparty: Wallet,
        base_quantity: Pips,
        quote_quantity: Pips,
    ) -> Result<(), EngineError> {
        self.require_operator(operator)?;
        let record = *self
            .exits
            .get(&exited)
            .ok_or(StateError::WalletNotExited(exited))?;
        if !record.is_effective(self.current_time) {
            return Err(StateError::ExitNotEffective(exited).into());
        }

        let snapshot = self.ledger.snapshot(&[exited, counterparty]);
        let result = (|| -> Result<(), EngineError> {
            self.settle_all_funding(exited)?;
            self.settle_all_funding(counterparty)?;

            let pricing = match self.resolve_exit_pricing(exited)? {
                ExitPricing::ExitPrice => ClosurePricing::Exit,
                ExitPricing::BankruptcyPrice => ClosurePricing::Bankruptcy,
            };
            if self.insurance_fund_can_acquire(exited, pricing)? {
                return Err(StateError::InsuranceFundCanLiquidateDirectly(exited).into());
            }

            let expected = self.partial_closure_quote(exited, symbol, base_quantity, pricing)?;
            validate_quote_quantity(expected, quote_quantity)?;

            self.reduce_pair(exited, counterparty, symbol, base_quantity, quote_quantity)?;

            let counterparty_standing = self.standing(counterparty, PriceSource::Stored)?;
            if counterparty_standing.in_maintenance() {
                return Err(MarginError::CounterpartyBelowMaintenance(counterparty).into());
            }

            self.record_deleverage(
                DeleverageKind::ExitAcquisition,
                exited,
                counterparty,
                symbol,
                base_quantity,
                quote_quantity,
            );
            Ok(())
        })();
        if result.is_err() {
            self.ledger.restore(snapshot);
        }
        result
    }

    // --- variant 4: exit fund closure ---

    /// Close down exit-fund exposure during recovery: at the index price
    /// while the fund's account value is positive, at its bankruptcy price
    /// otherwise.
    pub fn deleverage_exit_fund_closure(
        &mut self,
        operator: SignerKey,
        symbol: &str,
        counterparty: Wallet,
        base_quantity: Pips,
        quote_quantity: Pips,
    ) -> Result<(), EngineError> {
        self.require_operator(operator)?;
        let fund = self.config.exit_fund_wallet;
        let snapshot = self.ledger.snapshot(&[fund, counterparty]);
        let result = (|| -> Result<(), EngineError> {
            self.settle_all_funding(fund)?;
            self.settle_all_funding(counterparty)?;

            let position = self.ledger.position(fund, symbol);
            if position.quantity.is_zero() {
                return Err(StateError::PositionNotFound(fund, symbol.to_string()).into());
            }

            let value = crate::margin::total_account_value(
                &self.ledger,
                &self.registry,
                fund,
                PriceSource::Stored,
            )?;
            let expected = if value.is_positive() {
                let index = self.registry.get(symbol)?.stored_price()?;
                let side = position
                    .quantity
                    .side()
                    .ok_or_else(|| StateError::PositionNotFound(fund, symbol.to_string()))?;
                Pips::from_side(side, base_quantity).mul_price(index)?
            } else {
                self.partial_closure_quote(fund, symbol, base_quantity, ClosurePricing::Bankruptcy)?
            };
            validate_quote_quantity(expected, quote_quantity)?;

            self.reduce_pair(fund, counterparty, symbol, base_quantity, quote_quantity)?;

            self.record_deleverage(
                DeleverageKind::ExitFundClosure,
                fund,
                counterparty,
                symbol,
                base_quantity,
                quote_quantity,
            );
            Ok(())
        })();
        if result.is_err() {
            self.ledger.restore(snapshot);
        }
        result
    }

    // --- shared machinery ---

    /// Expected signed quote credit for reducing `base_quantity` of the
    /// wallet's position under the full-closure pricing rule, pro-rated
    /// from the whole-position quantity.
    fn partial_closure_quote(
        &self,
        wallet: Wallet,
        symbol: &str,
        base_quantity: Pips,
        pricing: ClosurePricing,
    ) -> Result<Pips, EngineError> {
        let plan = self.closure_plan(wallet, pricing)?;
        let (_, size, full_quote) = plan
            .into_iter()
            .find(|(s, _, _)| s == symbol)
            .ok_or_else(|| StateError::PositionNotFound(wallet, symbol.to_string()))?;
        let fraction = base_quantity.abs().ratio(size.abs())?;
        Ok(full_quote.mul_fraction(fraction)?)
    }

    /// Reduce two opposite-side positions toward zero by `base_quantity`,
    /// crediting the closing wallet with `quote_quantity` and debiting the
    /// counterparty symmetrically.
    fn reduce_pair(
        &mut self,
        closing: Wallet,
        counterparty: Wallet,
        symbol: &str,
        base_quantity: Pips,
        quote_quantity: Pips,
    ) -> Result<(), EngineError> {
        if !base_quantity.is_positive() {
            return Err(ValidationError::NonPositiveQuantity.into());
        }
        let closing_size = self.ledger.position(closing, symbol).quantity;
        let counterparty_size = self.ledger.position(counterparty, symbol).quantity;
        let closing_side = closing_size
            .side()
            .ok_or_else(|| StateError::PositionNotFound(closing, symbol.to_string()))?;
        if counterparty_size.is_zero() {
            return Err(StateError::PositionNotFound(counterparty, symbol.to_string()).into());
        }
        if Some(closing_side) == counterparty_size.side() {
            return Err(ValidationError::CounterpartyNotOpposing.into());
        }
        let available = closing_size.abs().min(counterparty_size.abs());
        if base_quantity > available {
            return Err(ValidationError::DeleverageSizeExceedsPosition {
                requested: base_quantity,
                available,
            }
            .into());
        }

        // closing long: its size falls, the counterparty short rises toward
        // zero, and the quote credit flows from counterparty to closer
        let closing_delta = Pips::from_side(closing_side.opposite(), base_quantity);
        let counterparty_delta = closing_delta.neg();

        let closing_row = self.ledger.balance_mut(closing, symbol);
        acquire_position(closing_row, closing_delta, quote_quantity.neg())?;
        let closing_quote = self.ledger.balance_mut(closing, QUOTE_ASSET);
        closing_quote.quantity = closing_quote.quantity.checked_add(quote_quantity)?;

        let counterparty_row = self.ledger.balance_mut(counterparty, symbol);
        acquire_position(counterparty_row, counterparty_delta, quote_quantity)?;
        let counterparty_quote = self.ledger.balance_mut(counterparty, QUOTE_ASSET);
        counterparty_quote.quantity = counterparty_quote.quantity.checked_sub(quote_quantity)?;
        Ok(())
    }

    fn record_deleverage(
        &mut self,
        kind: DeleverageKind,
        wallet: Wallet,
        counterparty: Wallet,
        symbol: &str,
        base_quantity: Pips,
        quote_quantity: Pips,
    ) {
        info!(
            "deleverage {kind:?}: wallet={wallet:?} counterparty={counterparty:?} market={symbol} size={base_quantity}"
        );
        self.emit_event(EventPayload::PositionDeleveraged(PositionDeleveragedEvent {
            kind,
            wallet,
            counterparty,
            market: symbol.to_string(),
            size: base_quantity,
            quote_quantity,
        }));
    }
}
