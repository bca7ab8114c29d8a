// clearing-sim: walk the engine through a deposit -> trade -> price-drop ->
// liquidation cycle and print what happened at each step.

use clearing_core::*;
use rust_decimal_macros::dec;
use std::collections::HashMap;

const OPERATOR: SignerKey = SignerKey(0);
const FEED_SIGNER: SignerKey = SignerKey(500);

const ALICE: Wallet = Wallet(1);
const BOB: Wallet = Wallet(2);

fn main() -> Result<(), EngineError> {
    env_logger::init();

    let config = EngineConfig::default();
    let insurance_fund = config.insurance_fund_wallet;
    let mut engine = Engine::new(config);
    engine.set_time(Timestamp::from_millis(FUNDING_PERIOD_MS));
    engine.add_index_price_signer(FEED_SIGNER);

    println!("=== clearing-sim ===\n");

    // market setup
    engine.add_market(Market::new("BTC", engine.time()))?;
    publish_price(&mut engine, dec!(50_000), 1)?;
    println!("market BTC listed, index committed at 50000");

    // collateral
    engine.deposit(Pips::from_int(10_000), ALICE)?;
    engine.deposit(Pips::from_int(10_000), BOB)?;
    engine.deposit(Pips::from_int(1_000_000), insurance_fund)?;
    println!("deposits: alice 10000, bob 10000, insurance fund 1000000\n");

    // one pre-matched trade: alice long 1 BTC against bob
    let buy = order(ALICE, Side::Long, 1);
    let sell = order(BOB, Side::Short, 2);
    let trade = Trade {
        market: "BTC".to_string(),
        base_quantity: Pips::from_int(1),
        quote_quantity: Pips::from_int(50_000),
        price: Price::new_unchecked(dec!(50_000)),
        maker_side: Side::Short,
        maker_fee: Pips::from_int(10),
        taker_fee: Pips::from_int(25),
    };
    engine.execute_trade(OPERATOR, &buy, &sell, &trade)?;
    println!("trade settled: alice +1 BTC @ 50000, bob -1 BTC");
    println!("  alice quote: {}", engine.quote_balance(ALICE));
    println!("  bob quote:   {}", engine.quote_balance(BOB));
    println!("  net open interest: {}\n", engine.net_position("BTC"));

    // one funding period elapses, longs pay
    engine.advance_time(FUNDING_PERIOD_MS);
    publish_price(&mut engine, dec!(50_000), 2)?;
    engine.publish_funding_multiplier(OPERATOR, "BTC", dec!(0.0001))?;
    println!("funding multiplier published (rate 0.0001)");

    // the index falls 16%: alice drops below her maintenance margin
    engine.advance_time(60_000);
    publish_price(&mut engine, dec!(42_000), 3)?;
    println!("index falls to 42000\n");

    // settle alice's funding lazily by touching her account with a
    // liquidation at bankruptcy price
    let mut prices = HashMap::new();
    prices.insert("BTC".to_string(), Price::new_unchecked(dec!(42_000)));

    // single position: the bankruptcy quote quantity exactly offsets the
    // (funding-settled) quote balance
    let funding_payment = Pips::from_int(5); // 1 BTC x 0.0001 x 50000
    let bankruptcy_quote = engine.quote_balance(ALICE).checked_sub(funding_payment)?.neg();
    engine.liquidate_wallet_in_maintenance(
        OPERATOR,
        ALICE,
        &prices,
        &[("BTC".to_string(), bankruptcy_quote)],
    )?;

    println!("alice liquidated into the insurance fund:");
    println!("  alice quote:       {}", engine.quote_balance(ALICE));
    println!("  alice position:    {}", engine.position_size(ALICE, "BTC"));
    println!(
        "  fund position:     {}",
        engine.position_size(insurance_fund, "BTC")
    );
    println!(
        "  fund quote:        {}",
        engine.quote_balance(insurance_fund)
    );
    println!("  net open interest: {}", engine.net_position("BTC"));

    println!("\n{} events recorded", engine.events().len());
    for event in engine.recent_events(5) {
        println!("  [{}] {:?}", event.id.0, event.payload);
    }
    Ok(())
}

fn order(wallet: Wallet, side: Side, seq: u64) -> Order {
    Order {
        wallet,
        market: "BTC".to_string(),
        side,
        quantity: Pips::from_int(1),
        limit_price: Price::new_unchecked(dec!(50_000)),
        nonce: Nonce::from_parts(FUNDING_PERIOD_MS, seq),
        signer: OrderSigner::Wallet,
        delegated_key_authorization: None,
    }
}

fn publish_price(
    engine: &mut Engine,
    price: rust_decimal::Decimal,
    sequence: i64,
) -> Result<(), EngineError> {
    let payload = IndexPricePayload {
        base_asset_symbol: "BTC".to_string(),
        timestamp: Timestamp::from_millis(engine.time().as_millis() - 1_000 + sequence),
        price: Price::new_unchecked(price),
        signer: FEED_SIGNER,
    };
    engine.publish_index_prices(OPERATOR, &[payload])
}
