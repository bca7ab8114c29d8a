// clearing-core: accounting and risk engine for a cross-margined
// perpetual-futures venue. risk-first architecture: margin math and the
// forced-closure protocols take priority. all computation is deterministic
// with no external I/O; orders arrive pre-matched and prices pre-validated.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: Wallet, Pips, Price, Timestamp, Nonce
//   2.x  ledger.rs: balance ledger with one-time migration fallback
//   3.x  funding.rs: 8-hour funding multipliers, lazy bounded settlement
//   4.x  order.rs: pre-matched orders, trades, authority validation
//        margin.rs: account value, tiered IM / flat MM requirements
//        pricing.rs: bankruptcy and exit closure pricing
//        market.rs: market registry, per-wallet margin overrides
//        nonces.rs: nonce invalidation with propagation delay
//        transfer.rs: transfer / withdrawal payloads
//        exit.rs: two-phase wallet exit records
//        price_feed.rs: signed index price validation
//        config.rs: engine configuration
//        events.rs: audit events for every state transition
//        error.rs: the five-category error taxonomy
//   8.x  engine/: the engine: trading, funding publication, the five
//        liquidation variants, the four deleverage variants, exits

// storage and request payloads
pub mod config;
pub mod error;
pub mod events;
pub mod exit;
pub mod ledger;
pub mod market;
pub mod nonces;
pub mod order;
pub mod price_feed;
pub mod transfer;
pub mod types;

// pure settlement math
pub mod funding;
pub mod margin;
pub mod pricing;

// the stateful engine
pub mod engine;

// re exports for convenience
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{
    ArithmeticError, AuthorizationError, EngineError, MarginError, StateError, ValidationError,
};
pub use events::{DeleverageKind, Event, EventId, EventPayload, LiquidationKind};
pub use exit::{ExitPricing, ExitRecord};
pub use funding::{FundingHistory, FUNDING_PERIOD_MS};
pub use ledger::{Balance, BalanceLedger, BalanceMigrationSource};
pub use margin::{load_account_standing, total_account_value, AccountStanding, PriceSource};
pub use market::{MarginTiering, Market, MarketRegistry};
pub use nonces::{NonceBook, NonceInvalidation};
pub use order::{DelegatedKeyAuthorization, Order, OrderSigner, Trade};
pub use price_feed::IndexPricePayload;
pub use transfer::{Transfer, Withdrawal};
pub use types::{
    Hash32, Nonce, Pips, Price, Side, SignerKey, Timestamp, Wallet, QUOTE_ASSET,
};
