// engine/trading.rs: margin-gated balance mutation with replay protection.
// executeTrade applies a pre-matched fill; transfers and withdrawals are the
// symmetric quote-only settlements. every operation settles outstanding
// funding for the touched wallets first and either fully applies or fully
// reverts via a ledger snapshot.

use super::Engine;
use crate::error::{validate_fee, EngineError, MarginError, StateError, ValidationError};
use crate::events::{
    EventPayload, TradeExecutedEvent, TransferExecutedEvent, WithdrawalExecutedEvent,
};
use crate::ledger::apply_position_delta;
use crate::margin::PriceSource;
use crate::order::{validate_order_authorization, validate_order_pair, Order, Trade};
use crate::transfer::{Transfer, Withdrawal};
use crate::types::{Pips, SignerKey, Wallet, QUOTE_ASSET};
use log::info;

impl Engine {
    /// Settle one pre-matched fill between two signed orders.
    pub fn execute_trade(
        &mut self,
        operator: SignerKey,
        buy: &Order,
        sell: &Order,
        trade: &Trade,
    ) -> Result<(), EngineError> {
        self.require_operator(operator)?;
        validate_order_pair(buy, sell, trade)?;

        let market = self.registry.get(&trade.market)?;
        let (min_size, max_size, market_active) =
            (market.min_position_size, market.max_position_size, market.active);

        validate_fee(trade.maker_fee, trade.quote_quantity, self.config.max_fee_rate)?;
        validate_fee(trade.taker_fee, trade.quote_quantity, self.config.max_fee_rate)?;

        for order in [buy, sell] {
            self.require_not_exit_blocked(order.wallet)?;
            validate_order_authorization(
                order,
                &self.nonces,
                self.current_time,
                self.config.delegated_key_expiration_ms,
            )?;
        }

        let trade_hash = trade.hash(buy, sell);
        if self.completed_trades.contains(&trade_hash) {
            return Err(ValidationError::ReplayedOperation(trade_hash).into());
        }

        // cumulative fill may not exceed either order's quantity
        let buy_hash = buy.hash();
        let sell_hash = sell.hash();
        for (order, hash) in [(buy, buy_hash), (sell, sell_hash)] {
            let filled = self
                .partial_fills
                .get(&hash)
                .copied()
                .unwrap_or_else(Pips::zero);
            let remaining = order.quantity.checked_sub(filled)?;
            if trade.base_quantity > remaining {
                return Err(ValidationError::OrderOverfill {
                    requested: trade.base_quantity,
                    remaining,
                }
                .into());
            }
        }

        let fee_wallet = self.config.fee_wallet;
        let snapshot = self
            .ledger
            .snapshot(&[buy.wallet, sell.wallet, fee_wallet]);
        let result = self.execute_trade_inner(
            buy,
            sell,
            trade,
            min_size,
            max_size,
            market_active,
            fee_wallet,
        );
        if result.is_err() {
            self.ledger.restore(snapshot);
            return result;
        }

        self.partial_fills
            .entry(buy_hash)
            .and_modify(|filled| *filled = filled.checked_add(trade.base_quantity).unwrap_or(*filled))
            .or_insert(trade.base_quantity);
        self.partial_fills
            .entry(sell_hash)
            .and_modify(|filled| *filled = filled.checked_add(trade.base_quantity).unwrap_or(*filled))
            .or_insert(trade.base_quantity);
        self.completed_trades.insert(trade_hash);

        info!(
            "trade settled: market={} buy={:?} sell={:?} base={} price={}",
            trade.market, buy.wallet, sell.wallet, trade.base_quantity, trade.price
        );
        self.emit_event(EventPayload::TradeExecuted(TradeExecutedEvent {
            market: trade.market.clone(),
            buy_wallet: buy.wallet,
            sell_wallet: sell.wallet,
            base_quantity: trade.base_quantity,
            price: trade.price,
            maker_fee: trade.maker_fee,
            taker_fee: trade.taker_fee,
        }));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_trade_inner(
        &mut self,
        buy: &Order,
        sell: &Order,
        trade: &Trade,
        min_size: Pips,
        max_size: Pips,
        market_active: bool,
        fee_wallet: Wallet,
    ) -> Result<(), EngineError> {
        self.settle_funding_for(buy.wallet, &trade.market)?;
        self.settle_funding_for(sell.wallet, &trade.market)?;

        let mut increased_exposure = Vec::new();
        for (order, delta) in [
            (buy, trade.base_quantity),
            (sell, trade.base_quantity.neg()),
        ] {
            let old = self.ledger.position(order.wallet, &trade.market).quantity;
            let new = old.checked_add(delta)?;

            if new.abs() > old.abs() {
                if !market_active {
                    return Err(StateError::MarketNotActive(trade.market.clone()).into());
                }
                increased_exposure.push(order.wallet);
            }
            if !new.is_zero() {
                if new.abs() < min_size {
                    return Err(ValidationError::PositionBelowMinimum {
                        symbol: trade.market.clone(),
                        size: new,
                        minimum: min_size,
                    }
                    .into());
                }
                if new.abs() > max_size {
                    return Err(ValidationError::PositionAboveMaximum {
                        symbol: trade.market.clone(),
                        size: new,
                        maximum: max_size,
                    }
                    .into());
                }
            }

            let row = self.ledger.balance_mut(order.wallet, &trade.market);
            apply_position_delta(row, delta, trade.price)?;
        }

        // quote legs: buyer pays gross plus fee, seller receives gross net
        // of fee, fee wallet collects both
        let buy_fee = trade.fee_for(crate::types::Side::Long);
        let sell_fee = trade.fee_for(crate::types::Side::Short);

        let buyer_quote = self.ledger.balance_mut(buy.wallet, QUOTE_ASSET);
        buyer_quote.quantity = buyer_quote
            .quantity
            .checked_sub(trade.quote_quantity.checked_add(buy_fee)?)?;

        let seller_quote = self.ledger.balance_mut(sell.wallet, QUOTE_ASSET);
        seller_quote.quantity = seller_quote
            .quantity
            .checked_add(trade.quote_quantity.checked_sub(sell_fee)?)?;

        let fees = self.ledger.balance_mut(fee_wallet, QUOTE_ASSET);
        fees.quantity = fees.quantity.checked_add(buy_fee.checked_add(sell_fee)?)?;

        // anyone whose absolute exposure grew must still meet initial margin
        for wallet in increased_exposure {
            self.require_meets_initial(wallet, PriceSource::Stored)?;
        }
        Ok(())
    }

    /// Quote transfer between wallets, margin-gated on the source.
    pub fn transfer(&mut self, operator: SignerKey, transfer: &Transfer) -> Result<(), EngineError> {
        self.require_operator(operator)?;
        if !transfer.gross_quantity.is_positive() {
            return Err(ValidationError::NonPositiveQuantity.into());
        }
        if transfer.source == transfer.destination {
            return Err(ValidationError::SelfTransfer.into());
        }
        validate_fee(transfer.fee, transfer.gross_quantity, self.config.max_fee_rate)?;
        self.nonces.validate_nonce_timestamp(
            transfer.source,
            transfer.nonce.timestamp_ms(),
            self.current_time,
        )?;
        self.require_not_exit_blocked(transfer.source)?;
        // the destination is treated like a deposit target
        if self.exits.contains_key(&transfer.destination) {
            return Err(StateError::WalletExited(transfer.destination).into());
        }

        let hash = transfer.hash();
        if self.completed_transfers.contains(&hash) {
            return Err(ValidationError::ReplayedOperation(hash).into());
        }

        let fee_wallet = self.config.fee_wallet;
        let snapshot =
            self.ledger
                .snapshot(&[transfer.source, transfer.destination, fee_wallet]);
        let result = (|| -> Result<(), EngineError> {
            self.settle_all_funding(transfer.source)?;

            let net = transfer.gross_quantity.checked_sub(transfer.fee)?;
            let source = self.ledger.balance_mut(transfer.source, QUOTE_ASSET);
            source.quantity = source.quantity.checked_sub(transfer.gross_quantity)?;
            let destination = self.ledger.balance_mut(transfer.destination, QUOTE_ASSET);
            destination.quantity = destination.quantity.checked_add(net)?;
            let fees = self.ledger.balance_mut(fee_wallet, QUOTE_ASSET);
            fees.quantity = fees.quantity.checked_add(transfer.fee)?;

            self.require_meets_initial(transfer.source, PriceSource::Stored)
        })();
        if let Err(err) = result {
            self.ledger.restore(snapshot);
            return Err(err);
        }

        self.completed_transfers.insert(hash);
        info!(
            "transfer settled: {:?} -> {:?} gross={}",
            transfer.source, transfer.destination, transfer.gross_quantity
        );
        self.emit_event(EventPayload::TransferExecuted(TransferExecutedEvent {
            source: transfer.source,
            destination: transfer.destination,
            gross_quantity: transfer.gross_quantity,
            fee: transfer.fee,
        }));
        Ok(())
    }

    /// Quote withdrawal; the net quantity is paid out by custody.
    pub fn withdraw(
        &mut self,
        operator: SignerKey,
        withdrawal: &Withdrawal,
    ) -> Result<(), EngineError> {
        self.require_operator(operator)?;
        if !withdrawal.gross_quantity.is_positive() {
            return Err(ValidationError::NonPositiveQuantity.into());
        }
        validate_fee(
            withdrawal.fee,
            withdrawal.gross_quantity,
            self.config.max_fee_rate,
        )?;
        self.nonces.validate_nonce_timestamp(
            withdrawal.wallet,
            withdrawal.nonce.timestamp_ms(),
            self.current_time,
        )?;
        self.require_not_exit_blocked(withdrawal.wallet)?;

        let hash = withdrawal.hash();
        if self.completed_withdrawals.contains(&hash) {
            return Err(ValidationError::ReplayedOperation(hash).into());
        }

        let fee_wallet = self.config.fee_wallet;
        let snapshot = self.ledger.snapshot(&[withdrawal.wallet, fee_wallet]);
        let result = (|| -> Result<(), EngineError> {
            self.settle_all_funding(withdrawal.wallet)?;

            let row = self.ledger.balance_mut(withdrawal.wallet, QUOTE_ASSET);
            row.quantity = row.quantity.checked_sub(withdrawal.gross_quantity)?;
            let fees = self.ledger.balance_mut(fee_wallet, QUOTE_ASSET);
            fees.quantity = fees.quantity.checked_add(withdrawal.fee)?;

            self.require_meets_initial(withdrawal.wallet, PriceSource::Stored)
        })();
        if let Err(err) = result {
            self.ledger.restore(snapshot);
            return Err(err);
        }

        self.completed_withdrawals.insert(hash);
        info!(
            "withdrawal settled: wallet={:?} gross={}",
            withdrawal.wallet, withdrawal.gross_quantity
        );
        self.emit_event(EventPayload::WithdrawalExecuted(WithdrawalExecutedEvent {
            wallet: withdrawal.wallet,
            gross_quantity: withdrawal.gross_quantity,
            fee: withdrawal.fee,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::market::Market;
    use crate::order::OrderSigner;
    use crate::types::{Nonce, Price, Side, Timestamp};
    use rust_decimal_macros::dec;

    const OPERATOR: SignerKey = SignerKey(0);

    fn engine() -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        engine.set_time(Timestamp::from_millis(1_000_000));
        let mut market = Market::new("BTC", engine.time());
        market.last_index_price = Some(Price::new_unchecked(dec!(50_000)));
        engine.add_market(market).unwrap();
        engine.deposit(Pips::from_int(10_000), Wallet(1)).unwrap();
        engine.deposit(Pips::from_int(10_000), Wallet(2)).unwrap();
        engine
    }

    fn order(wallet: u64, side: Side, seq: u64) -> Order {
        Order {
            wallet: Wallet(wallet),
            market: "BTC".to_string(),
            side,
            quantity: Pips::from_int(1),
            limit_price: Price::new_unchecked(dec!(50_000)),
            nonce: Nonce::from_parts(999_000, seq),
            signer: OrderSigner::Wallet,
            delegated_key_authorization: None,
        }
    }

    fn trade() -> Trade {
        Trade {
            market: "BTC".to_string(),
            base_quantity: Pips::from_int(1),
            quote_quantity: Pips::from_int(50_000),
            price: Price::new_unchecked(dec!(50_000)),
            maker_side: Side::Short,
            maker_fee: Pips::from_int(10),
            taker_fee: Pips::from_int(25),
        }
    }

    #[test]
    fn trade_settles_and_preserves_zero_sum() {
        let mut engine = engine();
        let buy = order(1, Side::Long, 1);
        let sell = order(2, Side::Short, 2);
        engine.execute_trade(OPERATOR, &buy, &sell, &trade()).unwrap();

        assert_eq!(engine.position_size(Wallet(1), "BTC"), Pips::from_int(1));
        assert_eq!(engine.position_size(Wallet(2), "BTC"), Pips::from_int(-1));
        assert!(engine.net_position("BTC").is_zero());

        // buyer paid gross + taker fee, seller received gross - maker fee
        assert_eq!(engine.quote_balance(Wallet(1)), Pips::from_int(-40_025));
        assert_eq!(engine.quote_balance(Wallet(2)), Pips::from_int(59_990));
        assert_eq!(
            engine.quote_balance(engine.config().fee_wallet),
            Pips::from_int(35)
        );
    }

    #[test]
    fn replayed_trade_rejected() {
        let mut engine = engine();
        let buy = order(1, Side::Long, 1);
        let sell = order(2, Side::Short, 2);
        engine.execute_trade(OPERATOR, &buy, &sell, &trade()).unwrap();
        let err = engine
            .execute_trade(OPERATOR, &buy, &sell, &trade())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::ReplayedOperation(_))
        ));
    }

    #[test]
    fn overfill_rejected() {
        let mut engine = engine();
        let buy = order(1, Side::Long, 1);
        let sell = order(2, Side::Short, 2);
        engine.execute_trade(OPERATOR, &buy, &sell, &trade()).unwrap();

        // a second distinct fill against the same 1-unit orders
        let mut second = trade();
        second.base_quantity = Pips::new(dec!(0.5));
        second.quote_quantity = Pips::from_int(25_000);
        let err = engine
            .execute_trade(OPERATOR, &buy, &sell, &second)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::OrderOverfill { .. })
        ));
    }

    #[test]
    fn margin_gate_rejects_over_leverage() {
        let mut engine = engine();
        // 10k collateral at 10% IM supports exactly one 50k position;
        // a second identical one must fail
        let buy = order(1, Side::Long, 1);
        let sell = order(2, Side::Short, 2);
        engine.execute_trade(OPERATOR, &buy, &sell, &trade()).unwrap();

        let buy2 = order(1, Side::Long, 3);
        let sell2 = order(2, Side::Short, 4);
        let err = engine
            .execute_trade(OPERATOR, &buy2, &sell2, &trade())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Margin(MarginError::BelowInitialRequirement { .. })
        ));
        // the failed trade left no partial state behind
        assert_eq!(engine.position_size(Wallet(1), "BTC"), Pips::from_int(1));
        assert_eq!(engine.quote_balance(Wallet(1)), Pips::from_int(-40_025));
    }

    #[test]
    fn non_operator_rejected() {
        let mut engine = engine();
        let buy = order(1, Side::Long, 1);
        let sell = order(2, Side::Short, 2);
        let err = engine
            .execute_trade(SignerKey(42), &buy, &sell, &trade())
            .unwrap_err();
        assert!(matches!(err, EngineError::Authorization(_)));
    }

    #[test]
    fn transfer_replay_and_margin_gate() {
        let mut engine = engine();
        let transfer = Transfer {
            source: Wallet(1),
            destination: Wallet(2),
            gross_quantity: Pips::from_int(1_000),
            fee: Pips::from_int(10),
            nonce: Nonce::from_parts(999_000, 9),
        };
        engine.transfer(OPERATOR, &transfer).unwrap();
        assert_eq!(engine.quote_balance(Wallet(1)), Pips::from_int(9_000));
        assert_eq!(engine.quote_balance(Wallet(2)), Pips::from_int(10_990));

        let err = engine.transfer(OPERATOR, &transfer).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::ReplayedOperation(_))
        ));
    }

    #[test]
    fn withdrawal_respects_initial_margin() {
        let mut engine = engine();
        let buy = order(1, Side::Long, 1);
        let sell = order(2, Side::Short, 2);
        engine.execute_trade(OPERATOR, &buy, &sell, &trade()).unwrap();

        // wallet 1 has TAV 9_975 and IM 5_000: only ~4_975 is free
        let too_much = Withdrawal {
            wallet: Wallet(1),
            gross_quantity: Pips::from_int(6_000),
            fee: Pips::zero(),
            nonce: Nonce::from_parts(999_100, 1),
        };
        assert!(matches!(
            engine.withdraw(OPERATOR, &too_much).unwrap_err(),
            EngineError::Margin(_)
        ));

        let ok = Withdrawal {
            wallet: Wallet(1),
            gross_quantity: Pips::from_int(4_000),
            fee: Pips::from_int(5),
            nonce: Nonce::from_parts(999_100, 2),
        };
        engine.withdraw(OPERATOR, &ok).unwrap();
        assert_eq!(engine.quote_balance(Wallet(1)), Pips::from_int(-44_025));
    }
}
