// 3.0: funding accrual. every 8 hours the operator publishes one aggregate
// multiplier (funding rate x index price) per market; wallets settle lazily.
// the history is a plain growable array of per-period multipliers, one slot
// per 8-hour boundary starting at the market's creation day, so consumers
// never see a hole: skipped periods are back-filled with zero.

use crate::error::{ArithmeticError, EngineError, StateError, ValidationError};
use crate::types::{Pips, Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const FUNDING_PERIOD_MS: i64 = 8 * 60 * 60 * 1000;

/// The 8-hour boundary at or before the given time.
pub fn period_start(ts: Timestamp) -> Timestamp {
    Timestamp::from_millis(ts.as_millis() - ts.as_millis().rem_euclid(FUNDING_PERIOD_MS))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingHistory {
    /// Boundary of the first slot: start of the market's creation day.
    start: Timestamp,
    /// One multiplier per period from `start`, in quote pips per base unit.
    multipliers: Vec<Pips>,
}

impl FundingHistory {
    /// Seed the history at market creation: earlier same-day slots through
    /// the creation boundary are back-filled as zero.
    pub fn new(created_at: Timestamp) -> Self {
        let start = created_at.start_of_day();
        let seeded =
            (period_start(created_at).as_millis() - start.as_millis()) / FUNDING_PERIOD_MS + 1;
        Self {
            start,
            multipliers: vec![Pips::zero(); seeded as usize],
        }
    }

    pub fn last_published_period(&self) -> Timestamp {
        self.start
            .plus_ms((self.multipliers.len() as i64 - 1) * FUNDING_PERIOD_MS)
    }

    /// Append `funding_rate x index_price` for the period containing `now`.
    /// Skipped periods are zero-filled; publishing twice into one period is
    /// rejected.
    pub fn publish(
        &mut self,
        funding_rate: Decimal,
        index_price: Price,
        now: Timestamp,
        symbol: &str,
    ) -> Result<Pips, EngineError> {
        let target = period_start(now);
        let last = self.last_published_period();
        if target <= last {
            return Err(StateError::FundingAlreadyPublished(symbol.to_string()).into());
        }

        let multiplier = Pips::new(
            funding_rate
                .checked_mul(index_price.value())
                .ok_or(ArithmeticError::Overflow)?,
        );

        let mut next = last.plus_ms(FUNDING_PERIOD_MS);
        while next < target {
            self.multipliers.push(Pips::zero());
            next = next.plus_ms(FUNDING_PERIOD_MS);
        }
        self.multipliers.push(multiplier);
        Ok(multiplier)
    }

    fn index_of(&self, boundary: Timestamp) -> i64 {
        (boundary.as_millis() - self.start.as_millis()) / FUNDING_PERIOD_MS
    }

    /// Periods published strictly after the period containing `last_settled`.
    pub fn outstanding_periods(&self, last_settled: Timestamp) -> usize {
        let from = if last_settled < self.start {
            0
        } else {
            self.index_of(period_start(last_settled)) + 1
        };
        let len = self.multipliers.len() as i64;
        (len - from).max(0) as usize
    }

    /// Sum up to `limit` multipliers after `last_settled`, oldest first.
    /// Returns the aggregate and the boundary of the last period consumed.
    pub fn aggregate_after(
        &self,
        last_settled: Timestamp,
        limit: usize,
    ) -> Result<(Pips, Timestamp), EngineError> {
        let from = if last_settled < self.start {
            0
        } else {
            self.index_of(period_start(last_settled)) + 1
        };
        let to = ((from + limit as i64).min(self.multipliers.len() as i64)).max(from);
        if to == from {
            return Ok((Pips::zero(), last_settled));
        }

        let mut aggregate = Pips::zero();
        for multiplier in &self.multipliers[from as usize..to as usize] {
            aggregate = aggregate.checked_add(*multiplier)?;
        }
        let consumed_through = self.start.plus_ms((to - 1) * FUNDING_PERIOD_MS);
        Ok((aggregate, consumed_through))
    }

    pub fn len(&self) -> usize {
        self.multipliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.multipliers.is_empty()
    }
}

/// One quote-balance delta for a position carried across `aggregate` periods
/// of funding. Positive multipliers mean longs pay, so the wallet delta is
/// the negated product.
pub fn funding_payment(position_size: Pips, aggregate: Pips) -> Result<Pips, EngineError> {
    Ok(position_size.checked_mul(aggregate)?.neg())
}

/// Funding rate sanity bound shared with publication: one period's rate may
/// not exceed 100% in either direction.
pub fn validate_funding_rate(rate: Decimal) -> Result<(), EngineError> {
    if rate.abs() > Decimal::ONE {
        return Err(ValidationError::InvalidMarketParameters(
            "funding rate magnitude above 1".into(),
        )
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ts(periods: i64) -> Timestamp {
        Timestamp::from_millis(periods * FUNDING_PERIOD_MS)
    }

    #[test]
    fn creation_backfills_same_day_slots() {
        // created 19h into day 1 -> slots at 00:00, 08:00, 16:00 are zero
        let created = Timestamp::from_millis(crate::types::MS_PER_DAY + 19 * 3_600_000);
        let history = FundingHistory::new(created);
        assert_eq!(history.len(), 3);
        assert_eq!(
            history.last_published_period(),
            Timestamp::from_millis(crate::types::MS_PER_DAY + 16 * 3_600_000)
        );
    }

    #[test]
    fn publish_fills_gaps_with_zero() {
        let mut history = FundingHistory::new(ts(0));
        let price = Price::new_unchecked(dec!(50_000));

        // skip periods 1 and 2, publish into period 3
        history.publish(dec!(0.0001), price, ts(3), "BTC").unwrap();
        assert_eq!(history.len(), 4);

        let (aggregate, through) = history.aggregate_after(ts(0), 100).unwrap();
        assert_eq!(aggregate, Pips::new(dec!(5))); // 0 + 0 + 0.0001 * 50000
        assert_eq!(through, ts(3));
    }

    #[test]
    fn double_publish_rejected() {
        let mut history = FundingHistory::new(ts(0));
        let price = Price::new_unchecked(dec!(50_000));
        history.publish(dec!(0.0001), price, ts(1), "BTC").unwrap();
        let err = history
            .publish(dec!(0.0001), price, ts(1).plus_ms(5), "BTC")
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::State(StateError::FundingAlreadyPublished(_))
        ));
    }

    #[test]
    fn aggregate_respects_limit() {
        let mut history = FundingHistory::new(ts(0));
        let price = Price::new_unchecked(dec!(10_000));
        for period in 1..=4 {
            history.publish(dec!(0.0001), price, ts(period), "BTC").unwrap();
        }
        // each period contributes 1 quote unit
        let (aggregate, through) = history.aggregate_after(ts(0), 2).unwrap();
        assert_eq!(aggregate, Pips::from_int(2));
        assert_eq!(through, ts(2));
        assert_eq!(history.outstanding_periods(through), 2);

        let (rest, through) = history.aggregate_after(through, 2).unwrap();
        assert_eq!(rest, Pips::from_int(2));
        assert_eq!(through, ts(4));
        assert_eq!(history.outstanding_periods(through), 0);
    }

    #[test]
    fn settled_wallet_sees_no_payment() {
        let mut history = FundingHistory::new(ts(0));
        let price = Price::new_unchecked(dec!(10_000));
        history.publish(dec!(0.0001), price, ts(1), "BTC").unwrap();

        let (aggregate, through) = history.aggregate_after(ts(0), 10).unwrap();
        assert!(!aggregate.is_zero());
        // second settlement with no intervening publish is a no-op
        let (again, _) = history.aggregate_after(through, 10).unwrap();
        assert!(again.is_zero());
    }

    #[test]
    fn longs_pay_on_positive_multiplier() {
        let payment = funding_payment(Pips::from_int(2), Pips::from_int(5)).unwrap();
        assert_eq!(payment, Pips::from_int(-10));
        let short = funding_payment(Pips::from_int(-2), Pips::from_int(5)).unwrap();
        assert_eq!(short, Pips::from_int(10));
    }
}
