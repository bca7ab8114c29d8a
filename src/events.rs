// every state change produces an event. used for audit trails, state
// reconstruction, and notifying external systems.

use crate::exit::ExitPricing;
use crate::types::{Pips, Price, Timestamp, Wallet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationKind {
    PositionBelowMinimum,
    PositionInDeactivatedMarket,
    WalletInMaintenance,
    WalletInMaintenanceDuringRecovery,
    WalletExited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleverageKind {
    InMaintenanceAcquisition,
    InsuranceFundClosure,
    ExitAcquisition,
    ExitFundClosure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // balance events
    Deposit(DepositEvent),
    WithdrawalExecuted(WithdrawalExecutedEvent),
    TransferExecuted(TransferExecutedEvent),

    // trade events
    TradeExecuted(TradeExecutedEvent),

    // price and funding events
    IndexPriceCommitted(IndexPriceCommittedEvent),
    FundingMultiplierPublished(FundingMultiplierPublishedEvent),
    FundingSettled(FundingSettledEvent),

    // forced closure events
    PositionLiquidated(PositionLiquidatedEvent),
    PositionDeleveraged(PositionDeleveragedEvent),
    MarketDeactivated(MarketDeactivatedEvent),

    // exit and nonce lifecycle
    WalletExitInitiated(WalletExitInitiatedEvent),
    WalletExitWithdrawn(WalletExitWithdrawnEvent),
    WalletExitCleared(WalletExitClearedEvent),
    NonceInvalidated(NonceInvalidatedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositEvent {
    pub wallet: Wallet,
    pub quantity: Pips,
    pub new_balance: Pips,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalExecutedEvent {
    pub wallet: Wallet,
    pub gross_quantity: Pips,
    pub fee: Pips,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferExecutedEvent {
    pub source: Wallet,
    pub destination: Wallet,
    pub gross_quantity: Pips,
    pub fee: Pips,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeExecutedEvent {
    pub market: String,
    pub buy_wallet: Wallet,
    pub sell_wallet: Wallet,
    pub base_quantity: Pips,
    pub price: Price,
    pub maker_fee: Pips,
    pub taker_fee: Pips,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexPriceCommittedEvent {
    pub market: String,
    pub price: Price,
    pub price_timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingMultiplierPublishedEvent {
    pub market: String,
    pub multiplier: Pips,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSettledEvent {
    pub wallet: Wallet,
    pub market: String,
    pub payment: Pips,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLiquidatedEvent {
    pub kind: LiquidationKind,
    pub wallet: Wallet,
    /// None for deactivated-market closures, which have no counterparty.
    pub counterparty: Option<Wallet>,
    pub market: String,
    pub size: Pips,
    pub quote_quantity: Pips,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionDeleveragedEvent {
    pub kind: DeleverageKind,
    pub wallet: Wallet,
    pub counterparty: Wallet,
    pub market: String,
    pub size: Pips,
    pub quote_quantity: Pips,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDeactivatedEvent {
    pub market: String,
    pub frozen_price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletExitInitiatedEvent {
    pub wallet: Wallet,
    pub effective_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletExitWithdrawnEvent {
    pub wallet: Wallet,
    pub released: Pips,
    pub pricing: ExitPricing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletExitClearedEvent {
    pub wallet: Wallet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceInvalidatedEvent {
    pub wallet: Wallet,
    pub nonce_timestamp: i64,
    pub effective_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn events_roundtrip_through_json() {
        let event = Event::new(
            EventId(7),
            Timestamp::from_millis(1_000),
            EventPayload::Deposit(DepositEvent {
                wallet: Wallet(1),
                quantity: Pips::new(dec!(5)),
                new_balance: Pips::new(dec!(5)),
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("Deposit"));

        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, EventId(7));
        assert_eq!(back.timestamp, Timestamp::from_millis(1_000));
    }
}
