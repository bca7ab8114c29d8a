//! Property-based tests for the core accounting invariants.
//!
//! These verify the invariants hold under random inputs: the zero-sum
//! position invariant, quote conservation, funding idempotence, tier
//! monotonicity, and bankruptcy pricing landing on zero.

use clearing_core::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

const OPERATOR: SignerKey = SignerKey(0);
const FEED: SignerKey = SignerKey(500);

fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1_000i64..100_000i64).prop_map(Decimal::from)
}

fn size_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=200i64).prop_map(|x| Decimal::new(x, 2)) // 0.01 to 2.00
}

fn venue(entry_price: Decimal) -> Engine {
    let mut engine = Engine::new(EngineConfig::default());
    engine.set_time(Timestamp::from_millis(FUNDING_PERIOD_MS));
    engine.add_index_price_signer(FEED);
    engine.add_market(Market::new("BTC", engine.time())).unwrap();
    publish_price(&mut engine, entry_price, 1);
    engine
}

fn publish_price(engine: &mut Engine, price: Decimal, seq: i64) {
    let payload = IndexPricePayload {
        base_asset_symbol: "BTC".to_string(),
        timestamp: Timestamp::from_millis(seq),
        price: Price::new_unchecked(price),
        signer: FEED,
    };
    engine.publish_index_prices(OPERATOR, &[payload]).unwrap();
}

fn matched_trade(
    engine: &mut Engine,
    buyer: Wallet,
    seller: Wallet,
    quantity: Decimal,
    price: Decimal,
    seq: u64,
) -> Result<(), EngineError> {
    let make_order = |wallet: Wallet, side: Side, limit: Decimal, seq: u64| Order {
        wallet,
        market: "BTC".to_string(),
        side,
        quantity: Pips::new(quantity),
        limit_price: Price::new_unchecked(limit),
        nonce: Nonce::from_parts(engine.time().as_millis(), seq),
        signer: OrderSigner::Wallet,
        delegated_key_authorization: None,
    };
    let buy = make_order(buyer, Side::Long, dec!(10_000_000), seq);
    let sell = make_order(seller, Side::Short, dec!(0.00000001), seq + 1);
    let price = Price::new_unchecked(price);
    let trade = Trade {
        market: "BTC".to_string(),
        base_quantity: Pips::new(quantity),
        quote_quantity: Pips::new(quantity).mul_price(price).unwrap(),
        price,
        maker_side: Side::Short,
        maker_fee: Pips::zero(),
        taker_fee: Pips::zero(),
    };
    engine.execute_trade(OPERATOR, &buy, &sell, &trade)
}

proptest! {
    /// For all markets at all times: the sum of signed position sizes
    /// across wallets is exactly zero, and quote is conserved.
    #[test]
    fn positions_zero_sum_and_quote_conserved(
        entry in price_strategy(),
        sizes in proptest::collection::vec(size_strategy(), 1..8),
    ) {
        let mut engine = venue(entry);
        let wallets: Vec<Wallet> = (1..=8).map(Wallet).collect();
        for wallet in &wallets {
            engine.deposit(Pips::from_int(100_000_000), *wallet).unwrap();
        }

        let deposited = Pips::from_int(100_000_000 * wallets.len() as i64);

        for (i, quantity) in sizes.iter().enumerate() {
            let buyer = wallets[i % wallets.len()];
            let seller = wallets[(i + 1) % wallets.len()];
            if buyer == seller {
                continue;
            }
            matched_trade(&mut engine, buyer, seller, *quantity, entry, (i as u64) * 2).unwrap();
        }

        prop_assert!(engine.net_position("BTC").is_zero());

        let mut total_quote = Pips::zero();
        for wallet in &wallets {
            total_quote = total_quote.checked_add(engine.quote_balance(*wallet)).unwrap();
        }
        prop_assert_eq!(total_quote, deposited);
    }

    /// Funding settlement invoked twice with no intervening publish
    /// produces an identical balance the second time.
    #[test]
    fn funding_settlement_idempotent(
        entry in price_strategy(),
        rate_pips in -1_000i64..=1_000i64,
        quantity in size_strategy(),
    ) {
        let mut engine = venue(entry);
        engine.deposit(Pips::from_int(100_000_000), Wallet(1)).unwrap();
        engine.deposit(Pips::from_int(100_000_000), Wallet(2)).unwrap();
        matched_trade(&mut engine, Wallet(1), Wallet(2), quantity, entry, 1).unwrap();

        engine.advance_time(FUNDING_PERIOD_MS);
        let rate = Decimal::new(rate_pips, 6);
        engine.publish_funding_multiplier(OPERATOR, "BTC", rate).unwrap();

        engine.catch_up_wallet_funding(Wallet(1), "BTC").unwrap();
        let once = engine.quote_balance(Wallet(1));
        engine.catch_up_wallet_funding(Wallet(1), "BTC").unwrap();
        prop_assert_eq!(engine.quote_balance(Wallet(1)), once);

        // funding is zero-sum between the long and the short
        engine.catch_up_wallet_funding(Wallet(2), "BTC").unwrap();
        let total = engine
            .quote_balance(Wallet(1))
            .checked_add(engine.quote_balance(Wallet(2)))
            .unwrap();
        prop_assert_eq!(total, Pips::from_int(200_000_000));
    }

    /// The tiered initial margin fraction never decreases as size grows.
    #[test]
    fn tiered_fraction_monotonic(
        a in 1i64..1_000_000i64,
        b in 1i64..1_000_000i64,
    ) {
        let tiering = MarginTiering::default();
        let small = Pips::new(Decimal::new(a.min(b), 4));
        let large = Pips::new(Decimal::new(a.max(b), 4));

        let f_small = margin::tiered_fraction(&tiering, small).unwrap();
        let f_large = margin::tiered_fraction(&tiering, large).unwrap();
        prop_assert!(f_small <= f_large);
    }

    /// A wallet-in-maintenance liquidation leaves the wallet's recomputed
    /// total account value at zero within one pip.
    #[test]
    fn bankruptcy_closure_lands_on_zero(
        quantity in size_strategy(),
        drop_bps in 1_800i64..2_500i64,
    ) {
        let entry = dec!(50_000);
        let mut engine = venue(entry);
        engine.deposit(Pips::from_int(100_000_000), engine.config().insurance_fund_wallet).unwrap();
        engine.deposit(Pips::from_int(100_000_000), Wallet(2)).unwrap();

        // deposit exactly the initial margin plus a sliver
        let notional = Pips::new(quantity).mul_price(Price::new_unchecked(entry)).unwrap();
        let deposit = notional.mul_fraction(dec!(0.101)).unwrap();
        engine.deposit(deposit, Wallet(1)).unwrap();
        matched_trade(&mut engine, Wallet(1), Wallet(2), quantity, entry, 1).unwrap();

        // drop the price 18% to 25%: past the maintenance fraction
        let dropped = entry - entry * Decimal::new(drop_bps, 4);
        publish_price(&mut engine, dropped, 2);

        let mut prices = HashMap::new();
        prices.insert("BTC".to_string(), Price::new_unchecked(dropped));

        let bankruptcy_quote = engine.quote_balance(Wallet(1)).neg();
        engine.liquidate_wallet_in_maintenance(
            OPERATOR,
            Wallet(1),
            &prices,
            &[("BTC".to_string(), bankruptcy_quote)],
        ).unwrap();

        // no positions remain, so account value is the quote balance
        prop_assert!(engine.position_size(Wallet(1), "BTC").is_zero());
        prop_assert!(engine.quote_balance(Wallet(1)).abs() <= Pips::one_pip());
        prop_assert!(engine.net_position("BTC").is_zero());
    }

    /// Pip arithmetic never leaves the 1e-8 grid.
    #[test]
    fn pip_products_stay_on_grid(
        quantity in 1i64..10_000_000i64,
        price in 1i64..10_000_000i64,
    ) {
        let q = Pips::new(Decimal::new(quantity, 6));
        let p = Price::new_unchecked(Decimal::new(price, 3));
        let product = q.mul_price(p).unwrap();
        // scaling by 1e8 must give an integer
        let scaled = product.value() * dec!(100_000_000);
        prop_assert_eq!(scaled.fract(), Decimal::ZERO);
    }
}
