//! Spot Market Core Simulation.
//!
//! Walks a single market through its lifecycle: opening auction, continuous
//! trading with fees, pegged orders, stop orders, liquidity fee payouts, an
//! automated purchase round and termination.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spot_core::*;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    println!("Spot Market Core Engine Simulation");
    println!("Single Market, Funds Held Per Order, Full Lifecycle\n");

    scenario_1_opening_auction();
    scenario_2_continuous_fees();
    scenario_3_pegged_orders();
    scenario_3b_stop_orders();
    scenario_4_liquidity_fees();
    scenario_5_automated_purchase();
    scenario_6_stress_test();

    println!("\nAll simulations completed successfully.");
}

fn usdt() -> AssetId {
    AssetId::from("USDT")
}

fn btc() -> AssetId {
    AssetId::from("BTC")
}

fn new_market(config: MarketConfig) -> SpotMarket {
    let mut market = SpotMarket::in_memory(config, Timestamp::from_secs(0)).unwrap();
    market.start_opening_auction().unwrap();
    market
}

fn limit(market: &SpotMarket, side: Side, price: Decimal, size: u64) -> OrderSubmission {
    OrderSubmission::limit(market.market_id().clone(), side, price, size, TimeInForce::GTC)
}

fn balance(market: &SpotMarket, party: &PartyId, asset: &AssetId) -> Decimal {
    market.ledger().balance(&AccountKey::general(party, asset))
}

/// Orders collect during the opening auction and uncross when it ends.
fn scenario_1_opening_auction() {
    println!("Scenario 1: Opening Auction\n");

    let mut market = new_market(MarketConfig::default());
    let alice = PartyId::from("alice");
    let bob = PartyId::from("bob");
    market.ledger_mut().deposit(&alice, &usdt(), dec!(100000));
    market.ledger_mut().deposit(&bob, &btc(), dec!(5));

    println!("  Market state: {}, mode: {:?}", market.state(), market.trading_mode());

    market.submit_order(&limit(&market, Side::Buy, dec!(30000), 2), &alice, "alice-1").unwrap();
    market.submit_order(&limit(&market, Side::Sell, dec!(29000), 2), &bob, "bob-1").unwrap();
    println!("  Alice bids 2 @ 30000, Bob offers 2 @ 29000");
    println!(
        "  Alice holding: {} USDT\n",
        market.ledger().balance(&AccountKey::holding(&alice, market.market_id(), &usdt()))
    );

    market.on_tick(Timestamp::from_secs(10));
    let summary = market.summary();
    println!("  After 10s: state {}, mode {:?}", summary.state, summary.trading_mode);
    println!("  Uncrossed at: {:?}", summary.last_traded_price);
    println!("  Alice: {} BTC, {} USDT", balance(&market, &alice, &btc()), balance(&market, &alice, &usdt()));
    println!("  Bob: {} BTC, {} USDT\n", balance(&market, &bob, &btc()), balance(&market, &bob, &usdt()));
}

/// The aggressor pays maker, infrastructure and liquidity fees.
fn scenario_2_continuous_fees() {
    println!("Scenario 2: Continuous Trading Fees\n");

    let mut market = new_market(MarketConfig::continuous());
    let maker = PartyId::from("maker");
    let taker = PartyId::from("taker");
    market.ledger_mut().deposit(&maker, &btc(), dec!(10));
    market.ledger_mut().deposit(&taker, &usdt(), dec!(1000000));

    market.submit_order(&limit(&market, Side::Sell, dec!(100000), 5), &maker, "maker-1").unwrap();
    let conf = market.submit_order(&limit(&market, Side::Buy, dec!(100000), 5), &taker, "taker-1").unwrap();

    for trade in &conf.trades {
        let fee = trade.buyer_fee.unwrap_or_default();
        println!("  Trade {} @ {}", trade.size, trade.price);
        println!(
            "  Taker fees: maker {}, infrastructure {}, liquidity {}",
            fee.maker_fee, fee.infrastructure_fee, fee.liquidity_fee
        );
    }
    println!("  Maker: {} USDT", balance(&market, &maker, &usdt()));
    println!("  Taker: {} USDT", balance(&market, &taker, &usdt()));
    println!(
        "  Total USDT in the ledger: {}\n",
        market.ledger().total_balance(&usdt())
    );
}

/// Pegged orders follow the best bid and park when it disappears.
fn scenario_3_pegged_orders() {
    println!("Scenario 3: Pegged Orders\n");

    let mut market = new_market(MarketConfig::continuous());
    let mm = PartyId::from("mm");
    let peg = PartyId::from("peg");
    market.ledger_mut().deposit(&mm, &usdt(), dec!(1000));
    market.ledger_mut().deposit(&mm, &btc(), dec!(1));
    market.ledger_mut().deposit(&peg, &usdt(), dec!(1000));

    market.submit_order(&limit(&market, Side::Sell, dec!(110), 1), &mm, "mm-1").unwrap();
    let bid = market.submit_order(&limit(&market, Side::Buy, dec!(90), 1), &mm, "mm-2").unwrap();
    let pegged = limit(&market, Side::Buy, Decimal::ZERO, 2).with_peg(PeggedReference::BestBid, dec!(5));
    let conf = market.submit_order(&pegged, &peg, "peg-1").unwrap();
    println!("  Best bid 90, pegged bid 5 below: {}", conf.order.price);

    market.cancel_order(&mm, &bid.order.id, "mm-3").unwrap();
    let parked = market.get_order(&conf.order.id).unwrap();
    println!("  Best bid cancelled, pegged order: {:?}", parked.status);

    market.submit_order(&limit(&market, Side::Buy, dec!(95), 1), &mm, "mm-4").unwrap();
    let live = market.get_order(&conf.order.id).unwrap();
    println!("  New best bid 95, pegged order: {:?} @ {}\n", live.status, live.price);
}

/// A stop loss waits off the book and sells once the price falls through it.
fn scenario_3b_stop_orders() {
    println!("Scenario 3b: Stop Orders\n");

    let mut market = new_market(MarketConfig::continuous());
    let maker = PartyId::from("maker");
    let taker = PartyId::from("taker");
    let holder = PartyId::from("holder");
    market.ledger_mut().deposit(&maker, &usdt(), dec!(10000));
    market.ledger_mut().deposit(&maker, &btc(), dec!(5));
    market.ledger_mut().deposit(&taker, &usdt(), dec!(10000));
    market.ledger_mut().deposit(&taker, &btc(), dec!(5));
    market.ledger_mut().deposit(&holder, &btc(), dec!(1));

    market.submit_order(&limit(&market, Side::Sell, dec!(100), 1), &maker, "maker-1").unwrap();
    market.submit_order(&limit(&market, Side::Buy, dec!(100), 1), &taker, "taker-1").unwrap();

    let exit = OrderSubmission::limit(market.market_id().clone(), Side::Sell, dec!(90), 1, TimeInForce::IOC);
    let stop = StopOrdersSubmission::falls_below(StopOrderSetup::trailing(exit, dec!(0.05)));
    market.submit_stop_orders(&stop, &holder, "holder-1").unwrap();
    println!("  Trailing stop 5% below 100, pooled: {}", market.stop_orders().len());

    market.submit_order(&limit(&market, Side::Buy, dec!(94), 3), &maker, "maker-2").unwrap();
    market.submit_order(&limit(&market, Side::Sell, dec!(94), 1), &taker, "taker-2").unwrap();
    println!(
        "  Price falls to 94: pooled {}, holder BTC {}, holder USDT {}\n",
        market.stop_orders().len(),
        balance(&market, &holder, &btc()),
        balance(&market, &holder, &usdt())
    );
}

/// The liquidity fee pool is paid out to LPs by equity share.
fn scenario_4_liquidity_fees() {
    println!("Scenario 4: Liquidity Fee Distribution\n");

    let mut market = new_market(MarketConfig::continuous());
    let lp1 = PartyId::from("lp1");
    let lp2 = PartyId::from("lp2");
    market.set_lp_stake(&lp1, dec!(100), dec!(100));
    market.set_lp_stake(&lp2, dec!(300), dec!(300));

    let maker = PartyId::from("maker");
    let taker = PartyId::from("taker");
    market.ledger_mut().deposit(&maker, &btc(), dec!(10));
    market.ledger_mut().deposit(&taker, &usdt(), dec!(1000000));
    market.submit_order(&limit(&market, Side::Sell, dec!(100000), 5), &maker, "maker-1").unwrap();
    market.submit_order(&limit(&market, Side::Buy, dec!(100000), 5), &taker, "taker-1").unwrap();

    let pool = AccountKey::market_pool(market.market_id(), &usdt(), AccountType::LiquidityFees);
    println!("  Liquidity fee pool: {} USDT", market.ledger().balance(&pool));

    market.on_tick(Timestamp::from_secs(60));
    println!("  LP1 (25%): {} USDT", balance(&market, &lp1, &usdt()));
    println!("  LP2 (75%): {} USDT\n", balance(&market, &lp2, &usdt()));
}

/// The network spends its treasury in a dedicated auction.
fn scenario_5_automated_purchase() {
    println!("Scenario 5: Protocol Automated Purchase\n");

    let mut market = new_market(MarketConfig::continuous());
    let treasury = AccountKey::network(&usdt(), AccountType::NetworkTreasury);
    let funder = PartyId::from("funder");
    market.ledger_mut().deposit(&funder, &usdt(), dec!(1000));
    market
        .ledger_mut()
        .move_between(&AccountKey::general(&funder, &usdt()), &treasury, dec!(1000), TransferType::TreasuryFeePay)
        .unwrap();

    market
        .new_protocol_automated_purchase(AutomatedPurchaseConfig::new("buyback-1", usdt()))
        .unwrap();
    let inbox = market.pap_inbox();
    inbox.push(PapCommand::OraclePrice {
        price: dec!(100),
        published_at: Timestamp::from_secs(0),
    });
    inbox.push(PapCommand::VolumeSnapshot);
    inbox.push(PapCommand::AuctionSchedule);
    market.on_tick(Timestamp::from_secs(1));
    println!("  Treasury 1000 USDT, oracle 100");
    println!("  Mode: {:?}", market.trading_mode());

    let seller = PartyId::from("seller");
    market.ledger_mut().deposit(&seller, &btc(), dec!(10));
    market.submit_order(&limit(&market, Side::Sell, dec!(100), 9), &seller, "seller-1").unwrap();

    market.on_tick(Timestamp::from_secs(61));
    let bought = AccountKey::network(&btc(), AccountType::BuyBackFees);
    println!("  After the auction: mode {:?}", market.trading_mode());
    println!("  Bought back: {} BTC", market.ledger().balance(&bought));
    println!("  Treasury left: {} USDT\n", market.ledger().balance(&treasury));
}

/// Many makers and takers, then terminate and check nothing leaked.
fn scenario_6_stress_test() {
    println!("Scenario 6: Stress Test\n");

    let mut market = new_market(MarketConfig::continuous());
    let parties: Vec<PartyId> = (0..50).map(|i| PartyId::from(format!("trader-{}", i))).collect();
    for party in &parties {
        market.ledger_mut().deposit(party, &usdt(), dec!(1000000));
        market.ledger_mut().deposit(party, &btc(), dec!(100));
    }

    let mut accepted = 0usize;
    let mut rejected = 0usize;
    for i in 0..1000u64 {
        let party = &parties[(i % parties.len() as u64) as usize];
        let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
        let price = Decimal::from(1000 + (i * 7) % 41);
        let submission = limit(&market, side, price, 1 + i % 5);
        match market.submit_order(&submission, party, &format!("stress-{}", i)) {
            Ok(_) => accepted += 1,
            Err(_) => rejected += 1,
        }
        if i % 100 == 0 {
            market.on_tick(Timestamp::from_secs((i / 100) as i64));
        }
    }

    let summary = market.summary();
    println!("  Orders: {} accepted, {} rejected", accepted, rejected);
    println!("  Resting: {}, last price: {:?}", summary.orders, summary.last_traded_price);

    market.terminate(MarketState::Settled).unwrap();
    let held: Decimal = parties
        .iter()
        .map(|p| market.ledger().balance(&AccountKey::holding(p, market.market_id(), &usdt())))
        .sum();
    println!("  After settlement: state {}, held USDT {}", market.state(), held);
    println!("  Total USDT: {}, total BTC: {}", market.ledger().total_balance(&usdt()), market.ledger().total_balance(&btc()));
}
