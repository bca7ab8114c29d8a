// 1.0: all the primitives live here. nothing in the engine works without these types.
// wallets, signer keys, pip quantities, prices, timestamps, nonces. each is a newtype
// so the compiler catches mixups between base quantities, quote quantities and prices.

use crate::error::ArithmeticError;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset symbol the quote side of every market settles in.
pub const QUOTE_ASSET: &str = "USD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Wallet(pub u64);

/// A signing key identity as recovered by the external signature layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignerKey(pub u64);

// Long = profit when price goes up. Short = profit when price goes down.
// orders use the same enum: a buy order is Long, a sell order is Short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => dec!(1),
            Side::Short => dec!(-1),
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

// 1.1: signed fixed-point quantity on the 1e-8 grid. positive = long / credit,
// negative = short / debit. every multiplication or division that could leave the
// grid truncates toward zero, so quantities stay exact integers-of-pips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pips(Decimal);

impl Pips {
    pub const DECIMALS: u32 = 8;

    /// Quantize onto the pip grid, truncating toward zero.
    pub fn new(value: Decimal) -> Self {
        Self(value.round_dp_with_strategy(Self::DECIMALS, RoundingStrategy::ToZero))
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn one_pip() -> Self {
        Self(Decimal::new(1, Self::DECIMALS))
    }

    pub fn from_int(value: i64) -> Self {
        Self(Decimal::from(value))
    }

    pub fn from_side(side: Side, abs: Pips) -> Self {
        Self(side.sign() * abs.0.abs())
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn side(&self) -> Option<Side> {
        if self.is_positive() {
            Some(Side::Long)
        } else if self.is_negative() {
            Some(Side::Short)
        } else {
            None
        }
    }

    pub fn neg(&self) -> Self {
        Self(-self.0)
    }

    pub fn checked_add(&self, other: Pips) -> Result<Pips, ArithmeticError> {
        self.0
            .checked_add(other.0)
            .map(Pips)
            .ok_or(ArithmeticError::Overflow)
    }

    pub fn checked_sub(&self, other: Pips) -> Result<Pips, ArithmeticError> {
        self.0
            .checked_sub(other.0)
            .map(Pips)
            .ok_or(ArithmeticError::Overflow)
    }

    /// pip quantity x pip quantity, truncated back to the grid. used for
    /// position size x aggregate funding multiplier.
    pub fn checked_mul(&self, other: Pips) -> Result<Pips, ArithmeticError> {
        self.0
            .checked_mul(other.0)
            .map(Pips::new)
            .ok_or(ArithmeticError::Overflow)
    }

    /// base quantity x price -> quote quantity, truncated to the grid.
    pub fn mul_price(&self, price: Price) -> Result<Pips, ArithmeticError> {
        self.0
            .checked_mul(price.value())
            .map(Pips::new)
            .ok_or(ArithmeticError::Overflow)
    }

    /// quantity x dimensionless fraction, truncated to the grid.
    pub fn mul_fraction(&self, fraction: Decimal) -> Result<Pips, ArithmeticError> {
        self.0
            .checked_mul(fraction)
            .map(Pips::new)
            .ok_or(ArithmeticError::Overflow)
    }

    /// ratio of two quantities (self / divisor), exact Decimal.
    pub fn ratio(&self, divisor: Pips) -> Result<Decimal, ArithmeticError> {
        if divisor.is_zero() {
            return Err(ArithmeticError::DivisionByZero);
        }
        self.0
            .checked_div(divisor.0)
            .ok_or(ArithmeticError::Overflow)
    }
}

impl fmt::Display for Pips {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.2: price in quote currency per unit of base. must be positive, pip-gridded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        let gridded = value.round_dp_with_strategy(Pips::DECIMALS, RoundingStrategy::ToZero);
        if gridded > Decimal::ZERO {
            Some(Self(gridded))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value.round_dp_with_strategy(Pips::DECIMALS, RoundingStrategy::ToZero))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.3: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

pub const MS_PER_DAY: i64 = 86_400_000;

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn plus_ms(&self, ms: i64) -> Self {
        Self(self.0 + ms)
    }

    /// Midnight UTC of the day containing this timestamp.
    pub fn start_of_day(&self) -> Self {
        Self(self.0 - self.0.rem_euclid(MS_PER_DAY))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// 1.4: order/transfer/withdrawal nonce. the upper 64 bits embed a millisecond
// timestamp, used both for replay prevention and for time-window validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nonce(pub u128);

impl Nonce {
    pub fn from_parts(timestamp_ms: i64, sequence: u64) -> Self {
        Self(((timestamp_ms as u128) << 64) | sequence as u128)
    }

    pub fn timestamp_ms(&self) -> i64 {
        (self.0 >> 64) as i64
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

// 1.5: keccak-256 operation fingerprint. replay guards key on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash32(pub [u8; 32]);

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn pips_truncate_toward_zero() {
        assert_eq!(Pips::new(dec!(1.234567899)).value(), dec!(1.23456789));
        assert_eq!(Pips::new(dec!(-1.234567899)).value(), dec!(-1.23456789));
    }

    #[test]
    fn pips_mul_price_truncates() {
        let size = Pips::new(dec!(0.00000003));
        let price = Price::new_unchecked(dec!(0.5));
        // 1.5e-8 truncates to one pip
        assert_eq!(size.mul_price(price).unwrap(), Pips::one_pip());
    }

    #[test]
    fn side_signs() {
        let long = Pips::from_side(Side::Long, Pips::from_int(10));
        assert!(long.is_positive());
        let short = Pips::from_side(Side::Short, Pips::from_int(10));
        assert_eq!(short.value(), dec!(-10));
        assert_eq!(short.side(), Some(Side::Short));
    }

    #[test]
    fn nonce_embeds_timestamp() {
        let nonce = Nonce::from_parts(1_700_000_000_000, 42);
        assert_eq!(nonce.timestamp_ms(), 1_700_000_000_000);
    }

    #[test]
    fn start_of_day() {
        let ts = Timestamp::from_millis(MS_PER_DAY * 3 + 12_345);
        assert_eq!(ts.start_of_day().as_millis(), MS_PER_DAY * 3);
    }
}
