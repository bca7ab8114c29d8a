//! Error taxonomy for settlement operations.
//!
//! Every failure aborts the whole operation with no partial state change.
//! The five categories below map one-to-one onto the reasons an operation
//! can be inadmissible: wrong caller, bad request payload, margin breach,
//! wrong lifecycle phase, or impossible arithmetic.

use crate::types::{Hash32, Pips, SignerKey, Timestamp, Wallet};
use rust_decimal::Decimal;

/// Wrong caller role for a gated operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizationError {
    #[error("caller is not the authorized operator")]
    NotOperator,
}

/// Bad or expired request payload: signatures, nonces, prices, fees, fills.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("index price signer {0:?} is not whitelisted")]
    UnknownPriceSigner(SignerKey),

    #[error("index price timestamp {submitted} does not exceed committed {committed}")]
    NonMonotonicPriceTimestamp {
        submitted: Timestamp,
        committed: Timestamp,
    },

    #[error("timestamp {submitted} is more than one day ahead of {now}")]
    TimestampTooFarAhead { submitted: Timestamp, now: Timestamp },

    #[error("nonce timestamp {nonce_timestamp} for {wallet:?} is at or below invalidated threshold {threshold}")]
    InvalidatedNonce {
        wallet: Wallet,
        nonce_timestamp: i64,
        threshold: i64,
    },

    #[error("nonce timestamp {submitted} does not exceed prior invalidation threshold {previous}")]
    NonceNotIncreasing { submitted: i64, previous: i64 },

    #[error("delegated key authorization wallet does not match order wallet")]
    DelegatedKeyWalletMismatch,

    #[error("order signed by {signed:?} but authorization covers {authorized:?}")]
    DelegatedKeySignerMismatch {
        signed: SignerKey,
        authorized: SignerKey,
    },

    #[error("order nonce predates its delegated key authorization")]
    DelegatedKeyNotYetValid,

    #[error("delegated key expired before the order nonce timestamp")]
    DelegatedKeyExpired,

    #[error("order carries a delegated signer without an authorization")]
    MissingDelegatedKeyAuthorization,

    #[error("operation {0} was already completed")]
    ReplayedOperation(Hash32),

    #[error("fill of {requested} exceeds remaining order quantity {remaining}")]
    OrderOverfill { requested: Pips, remaining: Pips },

    #[error("fee {fee} exceeds maximum {max}")]
    ExcessiveFee { fee: Pips, max: Pips },

    #[error("orders are not on opposing sides")]
    SameSide,

    #[error("order market does not match trade market")]
    MarketMismatch,

    #[error("trade price violates an order limit price")]
    PriceOutsideLimit,

    #[error("trade quote quantity is inconsistent with base quantity and price")]
    InconsistentQuoteQuantity,

    #[error("quantity must be positive")]
    NonPositiveQuantity,

    #[error("no index price supplied for {0}")]
    MissingIndexPrice(String),

    #[error("quote quantity {supplied} is outside the admissible band around {expected}")]
    QuoteQuantityOutOfBand { supplied: Pips, expected: Pips },

    #[error("resulting position {size} in {symbol} is below market minimum {minimum}")]
    PositionBelowMinimum {
        symbol: String,
        size: Pips,
        minimum: Pips,
    },

    #[error("resulting position {size} in {symbol} exceeds market maximum {maximum}")]
    PositionAboveMaximum {
        symbol: String,
        size: Pips,
        maximum: Pips,
    },

    #[error("transfer source and destination are the same wallet")]
    SelfTransfer,

    #[error("closure quote quantities do not cover the wallet's open positions")]
    ClosureQuantitiesMismatch,

    #[error("deleverage size {requested} exceeds a matched position size {available}")]
    DeleverageSizeExceedsPosition { requested: Pips, available: Pips },

    #[error("counterparty position is not on the opposing side")]
    CounterpartyNotOpposing,

    #[error("invalid market parameters: {0}")]
    InvalidMarketParameters(String),
}

/// Initial or maintenance requirement breached, pre- or post-condition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarginError {
    #[error("{wallet:?} below initial margin: value {total_account_value}, required {requirement}")]
    BelowInitialRequirement {
        wallet: Wallet,
        total_account_value: Pips,
        requirement: Pips,
    },

    #[error("{0:?} is in maintenance")]
    InMaintenance(Wallet),

    #[error("{0:?} is not in maintenance")]
    NotInMaintenance(Wallet),

    #[error("counterparty {0:?} below maintenance margin after settlement")]
    CounterpartyBelowMaintenance(Wallet),
}

/// Wrong lifecycle phase: exits, market activation, funding backlog, fund capacity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("market {0} not found")]
    MarketNotFound(String),

    #[error("market {0} already exists")]
    MarketExists(String),

    #[error("market {0} is not active")]
    MarketNotActive(String),

    #[error("market {0} is still active")]
    MarketStillActive(String),

    #[error("no index price committed for {0}")]
    NoIndexPrice(String),

    #[error("{0:?} has no open position in {1}")]
    PositionNotFound(Wallet, String),

    #[error("{0:?} has no open positions")]
    NoOpenPositions(Wallet),

    #[error("position of {0:?} in {1} is not below the market minimum")]
    PositionNotBelowMinimum(Wallet, String),

    #[error("{0:?} has initiated an exit")]
    WalletExited(Wallet),

    #[error("{0:?} has not initiated an exit")]
    WalletNotExited(Wallet),

    #[error("exit of {0:?} is not yet effective")]
    ExitNotEffective(Wallet),

    #[error("required delay for {0:?} has not elapsed")]
    ExitDelayNotElapsed(Wallet),

    #[error("exit fund holds no open position")]
    ExitFundHasNoOpenPositions,

    #[error("{wallet:?} is {outstanding} funding periods behind in {symbol}; catch up first")]
    FundingBacklog {
        wallet: Wallet,
        symbol: String,
        outstanding: usize,
    },

    #[error("funding multiplier already published for the current period of {0}")]
    FundingAlreadyPublished(String),

    #[error("fund {fund:?} position in {symbol} would exceed capacity")]
    FundPositionLimitExceeded { fund: Wallet, symbol: String },

    #[error("insurance fund can liquidate {0:?} directly; deleveraging not admissible")]
    InsuranceFundCanLiquidateDirectly(Wallet),
}

/// Impossible rounding or numeric overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ArithmeticError {
    #[error("arithmetic overflow")]
    Overflow,

    #[error("division by zero")]
    DivisionByZero,

    #[error("rounding residual exceeds tolerance")]
    RoundingResidual,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("authorization: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("margin: {0}")]
    Margin(#[from] MarginError),

    #[error("state: {0}")]
    State(#[from] StateError),

    #[error("arithmetic: {0}")]
    Arithmetic(#[from] ArithmeticError),
}

/// Fee fraction cap check shared by trades, transfers and withdrawals.
pub fn validate_fee(fee: Pips, gross: Pips, max_fee_rate: Decimal) -> Result<(), EngineError> {
    if fee.is_negative() {
        return Err(ValidationError::NonPositiveQuantity.into());
    }
    let max = gross.abs().mul_fraction(max_fee_rate)?;
    if fee > max {
        return Err(ValidationError::ExcessiveFee { fee, max }.into());
    }
    Ok(())
}
