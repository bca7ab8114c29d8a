//! Closure pricing policy: bankruptcy quantities, exit pricing, and the
//! tolerance band for below-minimum liquidations.
//!
//! A bankruptcy closure drains the wallet's value to exactly zero, with the
//! deficit allocated across positions pro-rata by maintenance margin. An
//! exit closure values each position at the worse of its entry price and the
//! feed price, from the holder's perspective.

use crate::error::{ArithmeticError, EngineError, ValidationError};
use crate::ledger::Balance;
use crate::types::{Pips, Price, Side};
use rust_decimal::Decimal;

/// Signed quote quantity credited to the wallet for closing position `size`
/// at its bankruptcy price:
///
/// `size x index - totalAccountValue x (mmr_position / mmr_total)`
///
/// Summed over all positions this leaves the wallet's quote balance at zero
/// (up to one pip of truncation per position).
pub fn bankruptcy_quote_quantity(
    size: Pips,
    index_price: Price,
    position_maintenance_margin: Pips,
    total_account_value: Pips,
    total_maintenance_margin: Pips,
) -> Result<Pips, EngineError> {
    if total_maintenance_margin.is_zero() {
        return Err(ArithmeticError::DivisionByZero.into());
    }
    let share = position_maintenance_margin.ratio(total_maintenance_margin)?;
    let allocated = total_account_value.mul_fraction(share)?;
    Ok(size.mul_price(index_price)?.checked_sub(allocated)?)
}

/// Entry price implied by a position's cost basis. None for empty positions.
pub fn entry_price(balance: &Balance) -> Option<Price> {
    if balance.quantity.is_zero() {
        return None;
    }
    let ratio = balance.cost_basis.ratio(balance.quantity).ok()?;
    Price::new(ratio)
}

/// The worse of entry and feed price from the holder's perspective: a long
/// exits no higher than it entered, a short no lower.
pub fn exit_price(side: Side, entry: Price, index: Price) -> Price {
    match side {
        Side::Long => entry.min(index),
        Side::Short => entry.max(index),
    }
}

/// Quote quantity for closing `size` at the exit price implied by the
/// position's own cost basis.
pub fn exit_quote_quantity(
    balance: &Balance,
    index_price: Price,
) -> Result<Pips, EngineError> {
    let side = match balance.quantity.side() {
        Some(side) => side,
        None => return Ok(Pips::zero()),
    };
    let price = match entry_price(balance) {
        Some(entry) => exit_price(side, entry, index_price),
        None => index_price,
    };
    Ok(balance.quantity.mul_price(price)?)
}

/// Exact-match validation at 1-pip resolution, used wherever the operator
/// supplies a quote quantity the engine can derive itself.
pub fn validate_quote_quantity(expected: Pips, supplied: Pips) -> Result<(), EngineError> {
    let diff = expected.checked_sub(supplied)?.abs();
    if diff > Pips::one_pip() {
        return Err(ValidationError::QuoteQuantityOutOfBand { supplied, expected }.into());
    }
    Ok(())
}

/// Below-minimum closures price at the feed value within a small tolerance.
/// Dust positions, whose tolerance band cannot be expressed in whole pips,
/// skip the band check entirely.
pub fn validate_below_minimum_quote_quantity(
    size: Pips,
    index_price: Price,
    supplied: Pips,
    tolerance: Decimal,
) -> Result<(), EngineError> {
    let expected = size.mul_price(index_price)?;
    let band = expected.abs().mul_fraction(tolerance)?;
    if band < Pips::one_pip() {
        return Ok(());
    }
    let diff = expected.checked_sub(supplied)?.abs();
    if diff > band {
        return Err(ValidationError::QuoteQuantityOutOfBand { supplied, expected }.into());
    }
    Ok(())
}
