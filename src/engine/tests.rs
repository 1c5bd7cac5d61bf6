use super::*;
use crate::auction::{MarketState, TradingMode};
use crate::collateral::{AccountKey, AccountType, CollateralLedger, TransferType};
use crate::config::MarketConfig;
use crate::events::EventPayload;
use crate::order::{OrderAmendment, OrderConfirmation, OrderError, OrderStatus, OrderSubmission, PeggedReference, TimeInForce};
use crate::pap::{AutomatedPurchaseConfig, PapCommand};
use crate::price_monitor::PriceMonitoringTrigger;
use crate::stop_orders::{StopExpiryStrategy, StopOrderError, StopOrderSetup, StopOrderStatus, StopOrdersSubmission};
use crate::types::{AssetId, OrderId, PartyId, Side, StopOrderId, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn usdt() -> AssetId {
    AssetId::from("USDT")
}

fn btc() -> AssetId {
    AssetId::from("BTC")
}

fn t(secs: i64) -> Timestamp {
    Timestamp::from_secs(secs)
}

fn setup_opening_market() -> SpotMarket {
    let mut market = SpotMarket::in_memory(MarketConfig::default(), t(0)).unwrap();
    market.start_opening_auction().unwrap();
    market
}

fn setup_continuous_market() -> SpotMarket {
    let mut market = SpotMarket::in_memory(MarketConfig::continuous(), t(0)).unwrap();
    market.start_opening_auction().unwrap();
    market
}

fn deposit(market: &mut SpotMarket, party: &str, asset: &AssetId, amount: Decimal) {
    market.ledger_mut().deposit(&PartyId::from(party), asset, amount);
}

fn general(market: &SpotMarket, party: &str, asset: &AssetId) -> Decimal {
    market.ledger().balance(&AccountKey::general(&PartyId::from(party), asset))
}

fn holding(market: &SpotMarket, party: &str, asset: &AssetId) -> Decimal {
    market
        .ledger()
        .balance(&AccountKey::holding(&PartyId::from(party), market.market_id(), asset))
}

fn limit(market: &SpotMarket, side: Side, price: Decimal, size: u64, tif: TimeInForce) -> OrderSubmission {
    OrderSubmission::limit(market.market_id().clone(), side, price, size, tif)
}

fn submit(market: &mut SpotMarket, party: &str, submission: OrderSubmission, id: &str) -> OrderConfirmation {
    market.submit_order(&submission, &PartyId::from(party), id).unwrap()
}

fn amend(market: &SpotMarket, order: &OrderConfirmation) -> OrderAmendment {
    OrderAmendment::new(market.market_id().clone(), order.order.id.clone())
}

/// Seller rests 5 @ 100000, buyer lifts it.
fn trade_five_btc(market: &mut SpotMarket) -> OrderConfirmation {
    deposit(market, "seller", &btc(), dec!(10));
    deposit(market, "buyer", &usdt(), dec!(1000000));
    let sell = limit(market, Side::Sell, dec!(100000), 5, TimeInForce::GTC);
    submit(market, "seller", sell, "sell-1");
    let buy = limit(market, Side::Buy, dec!(100000), 5, TimeInForce::GTC);
    submit(market, "buyer", buy, "buy-1")
}

#[test]
fn test_market_opens_into_pending_auction() {
    let market = setup_opening_market();
    assert_eq!(market.state(), MarketState::Pending);
    assert_eq!(market.trading_mode(), TradingMode::OpeningAuction);

    let continuous = setup_continuous_market();
    assert_eq!(continuous.state(), MarketState::Active);
    assert_eq!(continuous.trading_mode(), TradingMode::Continuous);
}

#[test]
fn test_buy_in_opening_auction_holds_notional() {
    let mut market = setup_opening_market();
    deposit(&mut market, "alice", &usdt(), dec!(100000));

    let buy = limit(&market, Side::Buy, dec!(30000), 2, TimeInForce::GTC);
    let conf = submit(&mut market, "alice", buy, "a-1");

    assert_eq!(conf.order.status, OrderStatus::Active);
    assert!(conf.trades.is_empty());
    assert_eq!(general(&market, "alice", &usdt()), dec!(40000));
    assert_eq!(holding(&market, "alice", &usdt()), dec!(60000));
}

#[test]
fn test_amendments_move_holding_both_ways() {
    let mut market = setup_opening_market();
    deposit(&mut market, "alice", &usdt(), dec!(100000));
    let buy = limit(&market, Side::Buy, dec!(30000), 2, TimeInForce::GTC);
    let conf = submit(&mut market, "alice", buy, "a-1");
    let alice = PartyId::from("alice");

    let down = amend(&market, &conf).price(dec!(40000)).size_delta(-1);
    let amended = market.amend_order(&down, &alice, "a-2").unwrap();
    assert_eq!(amended.order.price, dec!(40000));
    assert_eq!(amended.order.remaining, 1);
    assert_eq!(general(&market, "alice", &usdt()), dec!(60000));
    assert_eq!(holding(&market, "alice", &usdt()), dec!(40000));

    let up = amend(&market, &conf).price(dec!(20000)).size_delta(2);
    let amended = market.amend_order(&up, &alice, "a-3").unwrap();
    assert_eq!(amended.order.remaining, 3);
    assert_eq!(general(&market, "alice", &usdt()), dec!(40000));
    assert_eq!(holding(&market, "alice", &usdt()), dec!(60000));
}

#[test]
fn test_amend_past_balance_rejected() {
    let mut market = setup_opening_market();
    deposit(&mut market, "alice", &usdt(), dec!(100000));
    let buy = limit(&market, Side::Buy, dec!(30000), 2, TimeInForce::GTC);
    let conf = submit(&mut market, "alice", buy, "a-1");

    let too_big = amend(&market, &conf).size_delta(2);
    let err = market.amend_order(&too_big, &PartyId::from("alice"), "a-2").unwrap_err();
    assert!(matches!(err, MarketError::Order(OrderError::InsufficientAssetBalance)));
    assert_eq!(holding(&market, "alice", &usdt()), dec!(60000));
}

#[test]
fn test_empty_amendment_rejected() {
    let mut market = setup_opening_market();
    deposit(&mut market, "alice", &usdt(), dec!(1000));
    let buy = limit(&market, Side::Buy, dec!(10), 2, TimeInForce::GTC);
    let conf = submit(&mut market, "alice", buy, "a-1");

    let nothing = amend(&market, &conf);
    let err = market.amend_order(&nothing, &PartyId::from("alice"), "a-2").unwrap_err();
    assert!(matches!(err, MarketError::Order(OrderError::EditNotAllowed)));
}

#[test]
fn test_size_decrease_amends_in_place() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "alice", &usdt(), dec!(1000));
    let buy = limit(&market, Side::Buy, dec!(100), 5, TimeInForce::GTC);
    let conf = submit(&mut market, "alice", buy, "a-1");
    assert_eq!(holding(&market, "alice", &usdt()), dec!(500));

    let smaller = amend(&market, &conf).size_delta(-2);
    let amended = market.amend_order(&smaller, &PartyId::from("alice"), "a-2").unwrap();
    assert_eq!(amended.order.remaining, 3);
    assert_eq!(amended.order.version, 2);
    assert_eq!(holding(&market, "alice", &usdt()), dec!(300));
    assert_eq!(general(&market, "alice", &usdt()), dec!(700));
}

#[test]
fn test_cancel_all_returns_everything() {
    let mut market = setup_opening_market();
    deposit(&mut market, "alice", &usdt(), dec!(100000));
    deposit(&mut market, "alice", &btc(), dec!(3));
    let buy = limit(&market, Side::Buy, dec!(30000), 2, TimeInForce::GTC);
    submit(&mut market, "alice", buy, "a-1");
    let sell = limit(&market, Side::Sell, dec!(50000), 3, TimeInForce::GTC);
    submit(&mut market, "alice", sell, "a-2");
    assert_eq!(holding(&market, "alice", &btc()), dec!(3));

    let cancelled = market.cancel_all_orders(&PartyId::from("alice"), "a-3").unwrap();
    assert_eq!(cancelled.len(), 2);
    assert!(cancelled.iter().all(|c| c.order.status == OrderStatus::Cancelled));
    assert_eq!(general(&market, "alice", &usdt()), dec!(100000));
    assert_eq!(general(&market, "alice", &btc()), dec!(3));
    assert_eq!(holding(&market, "alice", &usdt()), Decimal::ZERO);
    assert_eq!(holding(&market, "alice", &btc()), Decimal::ZERO);
    assert!(market.book().all_orders().is_empty());
}

#[test]
fn test_cancel_by_another_party_rejected() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "alice", &usdt(), dec!(1000));
    let buy = limit(&market, Side::Buy, dec!(10), 2, TimeInForce::GTC);
    let conf = submit(&mut market, "alice", buy, "a-1");

    let err = market.cancel_order(&PartyId::from("mallory"), &conf.order.id, "m-1").unwrap_err();
    assert!(matches!(err, MarketError::Order(OrderError::InvalidPartyId)));
    assert!(market.get_order(&conf.order.id).is_some());

    let missing = market.cancel_order(&PartyId::from("alice"), &OrderId::from("nope"), "a-2").unwrap_err();
    assert!(matches!(missing, MarketError::Order(OrderError::OrderNotFound)));
}

#[test]
fn test_continuous_trade_charges_aggressor() {
    let mut market = setup_continuous_market();
    let conf = trade_five_btc(&mut market);

    assert_eq!(conf.trades.len(), 1);
    assert_eq!(conf.order.status, OrderStatus::Filled);
    assert_eq!(market.last_traded_price(), Some(dec!(100000)));

    // taker pays maker 125, infrastructure 250, liquidity 500
    assert_eq!(general(&market, "buyer", &usdt()), dec!(499125));
    assert_eq!(general(&market, "buyer", &btc()), dec!(5));
    assert_eq!(general(&market, "seller", &usdt()), dec!(500125));
    assert_eq!(general(&market, "seller", &btc()), dec!(5));
    assert_eq!(holding(&market, "seller", &btc()), Decimal::ZERO);

    let infra = AccountKey::network(&usdt(), AccountType::Infrastructure);
    let liquidity = AccountKey::market_pool(market.market_id(), &usdt(), AccountType::LiquidityFees);
    assert_eq!(market.ledger().balance(&infra), dec!(250));
    assert_eq!(market.ledger().balance(&liquidity), dec!(500));

    assert_eq!(market.ledger().total_balance(&usdt()), dec!(1000000));
    assert_eq!(market.ledger().total_balance(&btc()), dec!(10));
    assert!(market.events().iter().any(|e| matches!(e.payload, EventPayload::Trade(_))));
}

#[test]
fn test_opening_auction_uncrosses_without_fees() {
    let mut market = setup_opening_market();
    deposit(&mut market, "buyer", &usdt(), dec!(1000));
    deposit(&mut market, "seller", &btc(), dec!(10));
    let buy = limit(&market, Side::Buy, dec!(100), 2, TimeInForce::GTC);
    submit(&mut market, "buyer", buy, "b-1");
    let sell = limit(&market, Side::Sell, dec!(100), 2, TimeInForce::GTC);
    submit(&mut market, "seller", sell, "s-1");

    assert!(!market.on_tick(t(5)));
    assert_eq!(market.trading_mode(), TradingMode::OpeningAuction);

    market.on_tick(t(10));
    assert_eq!(market.state(), MarketState::Active);
    assert_eq!(market.trading_mode(), TradingMode::Continuous);
    assert_eq!(market.last_traded_price(), Some(dec!(100)));
    assert_eq!(general(&market, "buyer", &usdt()), dec!(800));
    assert_eq!(general(&market, "buyer", &btc()), dec!(2));
    assert_eq!(general(&market, "seller", &usdt()), dec!(200));
    assert_eq!(general(&market, "seller", &btc()), dec!(8));
    assert!(market.book().all_orders().is_empty());
}

#[test]
fn test_opening_auction_extends_without_volume() {
    let mut market = setup_opening_market();
    deposit(&mut market, "buyer", &usdt(), dec!(1000));
    let buy = limit(&market, Side::Buy, dec!(100), 2, TimeInForce::GTC);
    submit(&mut market, "buyer", buy, "b-1");

    market.on_tick(t(10));
    assert_eq!(market.state(), MarketState::Pending);
    assert_eq!(market.trading_mode(), TradingMode::OpeningAuction);
    assert_eq!(holding(&market, "buyer", &usdt()), dec!(200));
}

#[test]
fn test_ioc_rejected_during_auction() {
    let mut market = setup_opening_market();
    deposit(&mut market, "alice", &usdt(), dec!(1000));
    let ioc = limit(&market, Side::Buy, dec!(10), 1, TimeInForce::IOC);
    let err = market.submit_order(&ioc, &PartyId::from("alice"), "a-1").unwrap_err();
    assert!(matches!(err, MarketError::Order(OrderError::IocOrderDuringAuction)));
    assert_eq!(general(&market, "alice", &usdt()), dec!(1000));

    let gfa = limit(&market, Side::Buy, dec!(10), 1, TimeInForce::GFA);
    let conf = submit(&mut market, "alice", gfa, "a-2");
    assert_eq!(conf.order.status, OrderStatus::Active);
}

#[test]
fn test_gfa_rejected_in_continuous_trading() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "alice", &usdt(), dec!(1000));
    let gfa = limit(&market, Side::Buy, dec!(10), 1, TimeInForce::GFA);
    let err = market.submit_order(&gfa, &PartyId::from("alice"), "a-1").unwrap_err();
    assert!(matches!(err, MarketError::Order(OrderError::GfaOrderDuringContinuousTrading)));
}

#[test]
fn test_unfunded_orders_rejected() {
    let mut market = setup_continuous_market();
    let buy = limit(&market, Side::Buy, dec!(100), 1, TimeInForce::GTC);
    let err = market.submit_order(&buy, &PartyId::from("nobody"), "n-1").unwrap_err();
    assert!(matches!(err, MarketError::Order(OrderError::MissingGeneralAccount)));

    deposit(&mut market, "alice", &usdt(), dec!(50));
    let err = market.submit_order(&buy, &PartyId::from("alice"), "a-1").unwrap_err();
    assert!(matches!(err, MarketError::Order(OrderError::InsufficientAssetBalance)));
    assert_eq!(general(&market, "alice", &usdt()), dec!(50));

    let rejected = market
        .events()
        .iter()
        .filter(|e| matches!(&e.payload, EventPayload::OrderUpdated(u) if u.order.status == OrderStatus::Rejected))
        .count();
    assert_eq!(rejected, 2);
}

#[test]
fn test_bad_expiry_rejected() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "alice", &usdt(), dec!(1000));
    let gtt = limit(&market, Side::Buy, dec!(10), 1, TimeInForce::GTT);
    let err = market.submit_order(&gtt, &PartyId::from("alice"), "a-1").unwrap_err();
    assert!(matches!(err, MarketError::Order(OrderError::GttWithoutExpiry)));

    let gtc = limit(&market, Side::Buy, dec!(10), 1, TimeInForce::GTC).with_expiry(t(5));
    let err = market.submit_order(&gtc, &PartyId::from("alice"), "a-2").unwrap_err();
    assert!(matches!(err, MarketError::Order(OrderError::NonGttWithExpiry)));
}

#[test]
fn test_post_only_would_trade() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "seller", &btc(), dec!(5));
    deposit(&mut market, "buyer", &usdt(), dec!(10000));
    let sell = limit(&market, Side::Sell, dec!(100), 5, TimeInForce::GTC);
    submit(&mut market, "seller", sell, "s-1");

    let crossing = limit(&market, Side::Buy, dec!(100), 1, TimeInForce::GTC).post_only();
    let err = market.submit_order(&crossing, &PartyId::from("buyer"), "b-1").unwrap_err();
    assert!(matches!(err, MarketError::Order(OrderError::PostOnlyOrderWouldTrade)));
    assert_eq!(general(&market, "buyer", &usdt()), dec!(10000));

    let passive = limit(&market, Side::Buy, dec!(99), 1, TimeInForce::GTC).post_only();
    let conf = submit(&mut market, "buyer", passive, "b-2");
    assert_eq!(conf.order.status, OrderStatus::Active);
}

#[test]
fn test_gtt_order_expires_on_tick() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "alice", &usdt(), dec!(1000));
    let gtt = limit(&market, Side::Buy, dec!(100), 2, TimeInForce::GTT).with_expiry(t(5));
    let conf = submit(&mut market, "alice", gtt, "a-1");
    assert_eq!(holding(&market, "alice", &usdt()), dec!(200));

    market.on_tick(t(4));
    assert!(market.get_order(&conf.order.id).is_some());

    market.on_tick(t(5));
    assert!(market.get_order(&conf.order.id).is_none());
    assert_eq!(holding(&market, "alice", &usdt()), Decimal::ZERO);
    assert_eq!(general(&market, "alice", &usdt()), dec!(1000));
    let expired = market.events().iter().find_map(|e| match &e.payload {
        EventPayload::ExpiredOrders(ev) => Some(ev.order_ids.clone()),
        _ => None,
    });
    assert_eq!(expired, Some(vec![conf.order.id.clone()]));
}

#[test]
fn test_pegged_order_parks_and_unparks() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "mm", &usdt(), dec!(1000));
    deposit(&mut market, "mm", &btc(), dec!(1));
    deposit(&mut market, "peg", &usdt(), dec!(1000));

    let ask = limit(&market, Side::Sell, dec!(110), 1, TimeInForce::GTC);
    submit(&mut market, "mm", ask, "mm-1");
    let bid = limit(&market, Side::Buy, dec!(90), 1, TimeInForce::GTC);
    let bid = submit(&mut market, "mm", bid, "mm-2");

    let pegged = limit(&market, Side::Buy, Decimal::ZERO, 2, TimeInForce::GTC).with_peg(PeggedReference::BestBid, dec!(5));
    let peg = submit(&mut market, "peg", pegged, "p-1");
    assert_eq!(peg.order.price, dec!(85));
    assert_eq!(holding(&market, "peg", &usdt()), dec!(170));

    market.cancel_order(&PartyId::from("mm"), &bid.order.id, "mm-3").unwrap();
    let parked = market.get_order(&peg.order.id).unwrap();
    assert_eq!(parked.status, OrderStatus::Parked);
    assert_eq!(holding(&market, "peg", &usdt()), Decimal::ZERO);
    assert_eq!(market.parked_orders().count(), 1);

    let higher = limit(&market, Side::Buy, dec!(95), 1, TimeInForce::GTC);
    submit(&mut market, "mm", higher, "mm-4");
    let unparked = market.get_order(&peg.order.id).unwrap();
    assert_eq!(unparked.status, OrderStatus::Active);
    assert_eq!(unparked.price, dec!(90));
    assert_eq!(holding(&market, "peg", &usdt()), dec!(180));
    assert_eq!(market.parked_orders().count(), 0);
}

#[test]
fn test_pegged_order_parks_on_entry_without_reference() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "peg", &usdt(), dec!(1000));
    let pegged = limit(&market, Side::Buy, Decimal::ZERO, 2, TimeInForce::GTC).with_peg(PeggedReference::BestBid, dec!(5));
    let conf = submit(&mut market, "peg", pegged, "p-1");
    assert_eq!(conf.order.status, OrderStatus::Parked);
    assert_eq!(holding(&market, "peg", &usdt()), Decimal::ZERO);
}

#[test]
fn test_terminate_releases_funds_and_closes() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "alice", &usdt(), dec!(1000));
    let buy = limit(&market, Side::Buy, dec!(100), 3, TimeInForce::GTC);
    let conf = submit(&mut market, "alice", buy, "a-1");

    market.terminate(MarketState::Settled).unwrap();
    assert!(market.is_closed());
    assert_eq!(market.state(), MarketState::Settled);
    assert!(market.get_order(&conf.order.id).is_none());
    assert_eq!(general(&market, "alice", &usdt()), dec!(1000));
    assert_eq!(holding(&market, "alice", &usdt()), Decimal::ZERO);

    let again = limit(&market, Side::Buy, dec!(100), 1, TimeInForce::GTC);
    let err = market.submit_order(&again, &PartyId::from("alice"), "a-2").unwrap_err();
    assert!(matches!(err, MarketError::Order(OrderError::MarketClosed)));
    assert!(market.on_tick(t(1)));
}

#[test]
fn test_governance_suspend_and_resume() {
    let mut market = setup_continuous_market();
    market.suspend().unwrap();
    assert_eq!(market.state(), MarketState::SuspendedViaGovernance);
    assert_eq!(market.trading_mode(), TradingMode::SuspendedViaGovernance);

    // still suspended until resumed, whatever the clock says
    market.on_tick(t(100));
    assert_eq!(market.state(), MarketState::SuspendedViaGovernance);

    market.resume().unwrap();
    market.on_tick(t(101));
    assert_eq!(market.state(), MarketState::Active);
    assert_eq!(market.trading_mode(), TradingMode::Continuous);
}

#[test]
fn test_snapshot_round_trip_hashes_match() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "alice", &usdt(), dec!(1000));
    deposit(&mut market, "lp", &usdt(), dec!(1000));
    market.set_lp_stake(&PartyId::from("lp"), dec!(100), dec!(100));
    let buy = limit(&market, Side::Buy, dec!(100), 3, TimeInForce::GTC);
    submit(&mut market, "alice", buy, "a-1");
    market.on_tick(t(1));

    let payloads = market.snapshot().unwrap();
    assert_eq!(payloads.len(), 7);

    let mut restored = SpotMarket::in_memory(MarketConfig::continuous(), t(0)).unwrap();
    restored.restore_snapshot(&payloads).unwrap();
    let again = restored.snapshot().unwrap();

    let before: Vec<String> = payloads.iter().map(|p| p.hash()).collect();
    let after: Vec<String> = again.iter().map(|p| p.hash()).collect();
    assert_eq!(before, after);
    assert_eq!(restored.equity_shares().lp_count(), 1);
}

#[test]
fn test_restore_with_missing_payload_changes_nothing() {
    let market = setup_continuous_market();
    let mut payloads = market.snapshot().unwrap();
    payloads.pop();

    let mut other = setup_continuous_market();
    other.set_lp_stake(&PartyId::from("lp"), dec!(100), dec!(100));
    assert!(other.restore_snapshot(&payloads).is_err());
    assert_eq!(other.equity_shares().lp_count(), 1);
}

#[test]
fn test_liquidity_fees_distributed_by_share() {
    let mut market = setup_continuous_market();
    market.set_lp_stake(&PartyId::from("lp1"), dec!(100), dec!(100));
    market.set_lp_stake(&PartyId::from("lp2"), dec!(300), dec!(300));
    trade_five_btc(&mut market);
    let pool = AccountKey::market_pool(market.market_id(), &usdt(), AccountType::LiquidityFees);
    assert_eq!(market.ledger().balance(&pool), dec!(500));

    market.on_tick(t(59));
    assert_eq!(market.ledger().balance(&pool), dec!(500));

    market.on_tick(t(60));
    assert_eq!(general(&market, "lp1", &usdt()), dec!(125));
    assert_eq!(general(&market, "lp2", &usdt()), dec!(375));
    assert_eq!(market.ledger().balance(&pool), Decimal::ZERO);
    assert!(market
        .events()
        .iter()
        .any(|e| matches!(e.payload, EventPayload::LiquidityFeeDistributed(_))));
}

#[test]
fn test_automated_purchase_round() {
    let mut market = setup_continuous_market();
    let treasury = AccountKey::network(&usdt(), AccountType::NetworkTreasury);
    deposit(&mut market, "funder", &usdt(), dec!(1000));
    market
        .ledger_mut()
        .move_between(&AccountKey::general(&PartyId::from("funder"), &usdt()), &treasury, dec!(1000), TransferType::TreasuryFeePay)
        .unwrap();

    market
        .new_protocol_automated_purchase(AutomatedPurchaseConfig::new("pap-1", usdt()))
        .unwrap();
    let inbox = market.pap_inbox();
    inbox.push(PapCommand::OraclePrice { price: dec!(100), published_at: t(0) });
    inbox.push(PapCommand::VolumeSnapshot);
    inbox.push(PapCommand::AuctionSchedule);

    market.on_tick(t(1));
    assert_eq!(market.trading_mode(), TradingMode::AutomatedPurchaseAuction);
    let order_id = market.automated_purchase().unwrap().active_order().cloned().unwrap();
    let order = market.get_order(&order_id).unwrap();
    assert_eq!(order.size, 9);
    assert_eq!(order.side, Side::Buy);
    // 900 notional plus the 2 auction fee
    assert_eq!(market.ledger().balance(&AccountKey::holding(&PartyId::network(), market.market_id(), &usdt())), dec!(902));

    deposit(&mut market, "seller", &btc(), dec!(10));
    let sell = limit(&market, Side::Sell, dec!(100), 9, TimeInForce::GTC);
    submit(&mut market, "seller", sell, "s-1");

    market.on_tick(t(61));
    assert_eq!(market.trading_mode(), TradingMode::Continuous);
    let pap = market.automated_purchase().unwrap();
    assert!(pap.active_order().is_none());
    assert_eq!(pap.rounds(), 1);

    let bought = AccountKey::network(&btc(), AccountType::BuyBackFees);
    assert_eq!(market.ledger().balance(&bought), dec!(9));
    assert_eq!(market.ledger().balance(&treasury), dec!(98));
    assert_eq!(general(&market, "seller", &usdt()), dec!(898));
    assert_eq!(general(&market, "seller", &btc()), dec!(1));
    assert_eq!(market.ledger().total_balance(&usdt()), dec!(1000));
}

#[test]
fn test_second_program_rejected_while_running() {
    let mut market = setup_continuous_market();
    market
        .new_protocol_automated_purchase(AutomatedPurchaseConfig::new("pap-1", usdt()))
        .unwrap();
    let err = market
        .new_protocol_automated_purchase(AutomatedPurchaseConfig::new("pap-2", usdt()))
        .unwrap_err();
    assert!(matches!(err, MarketError::AutomatedPurchase(_)));
}

fn fund_treasury(market: &mut SpotMarket, amount: Decimal) -> AccountKey {
    let treasury = AccountKey::network(&usdt(), AccountType::NetworkTreasury);
    deposit(market, "funder", &usdt(), amount);
    market
        .ledger_mut()
        .move_between(&AccountKey::general(&PartyId::from("funder"), &usdt()), &treasury, amount, TransferType::TreasuryFeePay)
        .unwrap();
    treasury
}

#[test]
fn test_automated_purchase_sized_down_to_cover_fees() {
    let mut market = setup_continuous_market();
    let treasury = fund_treasury(&mut market, dec!(100));
    market
        .new_protocol_automated_purchase(AutomatedPurchaseConfig::new("pap-1", usdt()))
        .unwrap();
    let inbox = market.pap_inbox();
    inbox.push(PapCommand::OraclePrice { price: dec!(1), published_at: t(0) });
    inbox.push(PapCommand::VolumeSnapshot);
    inbox.push(PapCommand::AuctionSchedule);

    // 99 would need 99 plus a fee of 2
    market.on_tick(t(1));
    assert_eq!(market.trading_mode(), TradingMode::AutomatedPurchaseAuction);
    let order_id = market.automated_purchase().unwrap().active_order().cloned().unwrap();
    assert_eq!(market.get_order(&order_id).unwrap().size, 98);
    let network_holding = AccountKey::holding(&PartyId::network(), market.market_id(), &usdt());
    assert_eq!(market.ledger().balance(&network_holding), dec!(100));
    assert_eq!(market.ledger().balance(&treasury), Decimal::ZERO);
    assert_eq!(market.ledger().total_balance(&usdt()), dec!(100));
}

#[test]
fn test_automated_purchase_too_small_for_one_unit() {
    let mut market = setup_continuous_market();
    let treasury = fund_treasury(&mut market, dec!(2));
    market
        .new_protocol_automated_purchase(AutomatedPurchaseConfig::new("pap-1", usdt()))
        .unwrap();
    let inbox = market.pap_inbox();
    inbox.push(PapCommand::OraclePrice { price: dec!(1), published_at: t(0) });
    inbox.push(PapCommand::VolumeSnapshot);
    inbox.push(PapCommand::AuctionSchedule);

    market.on_tick(t(1));
    assert_eq!(market.trading_mode(), TradingMode::Continuous);
    assert!(market.automated_purchase().unwrap().active_order().is_none());
    assert_eq!(market.ledger().balance(&treasury), dec!(2));
}

#[test]
fn test_overflowing_order_rejected_as_invalid_size() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "alice", &usdt(), dec!(1000));
    let huge = limit(&market, Side::Buy, dec!(1_000_000_000_000), 100_000_000_000_000_000, TimeInForce::GTC);
    let err = market.submit_order(&huge, &PartyId::from("alice"), "a-1").unwrap_err();
    assert!(matches!(err, MarketError::Order(OrderError::InvalidSize)));
    assert_eq!(general(&market, "alice", &usdt()), dec!(1000));
    assert!(market.book().all_orders().is_empty());
    assert!(market
        .events()
        .iter()
        .any(|e| matches!(&e.payload, EventPayload::OrderUpdated(u) if u.order.status == OrderStatus::Rejected)));

    let small = limit(&market, Side::Buy, dec!(1_000_000_000_000), 1, TimeInForce::GTC);
    let err = market.submit_order(&small, &PartyId::from("alice"), "a-2").unwrap_err();
    assert!(matches!(err, MarketError::Order(OrderError::InsufficientAssetBalance)));
}

#[test]
fn test_overflowing_amendment_rejected_as_invalid_size() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "alice", &usdt(), dec!(1000));
    let buy = limit(&market, Side::Buy, dec!(10), 1, TimeInForce::GTC);
    let conf = submit(&mut market, "alice", buy, "a-1");

    let huge = amend(&market, &conf).price(dec!(1_000_000_000_000)).size_delta(i64::MAX - 1);
    let err = market.amend_order(&huge, &PartyId::from("alice"), "a-2").unwrap_err();
    assert!(matches!(err, MarketError::Order(OrderError::InvalidSize)));
    assert_eq!(market.get_order(&conf.order.id).unwrap().price, dec!(10));
    assert_eq!(holding(&market, "alice", &usdt()), dec!(10));
}

#[test]
fn test_monitoring_auction_holds_and_releases_buy_fees() {
    let config = MarketConfig::continuous().with_triggers(vec![PriceMonitoringTrigger::new(60, dec!(0.99), 30)]);
    let mut market = SpotMarket::in_memory(config, t(0)).unwrap();
    market.start_opening_auction().unwrap();
    deposit(&mut market, "bidder", &usdt(), dec!(20000));
    deposit(&mut market, "maker", &btc(), dec!(2));
    deposit(&mut market, "taker", &usdt(), dec!(5000));

    let bid = limit(&market, Side::Buy, dec!(900), 10, TimeInForce::GTC);
    let bid = submit(&mut market, "bidder", bid, "bid-1");
    assert_eq!(market.holdings().held_fee(&bid.order.id), Decimal::ZERO);

    // first trade sets the reference at 1000
    let ask = limit(&market, Side::Sell, dec!(1000), 1, TimeInForce::GTC);
    submit(&mut market, "maker", ask, "m-1");
    let lift = limit(&market, Side::Buy, dec!(1000), 1, TimeInForce::GTC);
    submit(&mut market, "taker", lift, "t-1");

    let ask = limit(&market, Side::Sell, dec!(1200), 1, TimeInForce::GTC);
    submit(&mut market, "maker", ask, "m-2");
    let breach = limit(&market, Side::Buy, dec!(1200), 1, TimeInForce::GTC);
    let breach = submit(&mut market, "taker", breach, "t-2");
    assert!(breach.trades.is_empty());
    assert_eq!(market.trading_mode(), TradingMode::MonitoringAuction);

    // 9000 notional: infrastructure ceil(5 / 2) plus liquidity ceil(9 / 2)
    assert_eq!(market.holdings().held_fee(&bid.order.id), dec!(8));
    assert_eq!(holding(&market, "bidder", &usdt()), dec!(9008));

    market.on_tick(t(31));
    assert_eq!(market.trading_mode(), TradingMode::Continuous);
    assert_eq!(market.holdings().held_fee(&bid.order.id), Decimal::ZERO);
    assert_eq!(holding(&market, "bidder", &usdt()), dec!(9000));
    assert_eq!(general(&market, "bidder", &usdt()), dec!(11000));
    assert_eq!(market.ledger().total_balance(&usdt()), dec!(25000));
}

#[test]
fn test_iceberg_amendments_go_through_the_reserve() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "alice", &usdt(), dec!(10000));
    let buy = limit(&market, Side::Buy, dec!(100), 10, TimeInForce::GTC).with_iceberg(4, 2);
    let conf = submit(&mut market, "alice", buy, "a-1");
    assert_eq!(conf.order.remaining, 4);
    assert_eq!(conf.order.iceberg.unwrap().reserved_remaining, 6);
    assert_eq!(holding(&market, "alice", &usdt()), dec!(1000));

    let smaller = amend(&market, &conf).size_delta(-8);
    market.amend_order(&smaller, &PartyId::from("alice"), "a-2").unwrap();
    let order = market.get_order(&conf.order.id).unwrap();
    assert_eq!(order.iceberg.unwrap().reserved_remaining, 0);
    assert_eq!(order.remaining, 2);
    assert_eq!(order.size, 2);
    assert_eq!(holding(&market, "alice", &usdt()), dec!(200));

    let bigger = amend(&market, &conf).size_delta(5);
    market.amend_order(&bigger, &PartyId::from("alice"), "a-3").unwrap();
    let order = market.get_order(&conf.order.id).unwrap();
    assert_eq!(order.iceberg.unwrap().reserved_remaining, 5);
    assert_eq!(order.remaining, 2);
    assert_eq!(holding(&market, "alice", &usdt()), dec!(700));
    assert_eq!(general(&market, "alice", &usdt()), dec!(9300));
}

#[test]
fn test_later_batch_pays_continuous_fees() {
    let mut market = SpotMarket::in_memory(MarketConfig::frequent_batch(5), t(0)).unwrap();
    market.start_opening_auction().unwrap();
    assert_eq!(market.trading_mode(), TradingMode::BatchAuction);
    deposit(&mut market, "seller", &btc(), dec!(10));
    deposit(&mut market, "buyer", &usdt(), dec!(20000));

    let sell = limit(&market, Side::Sell, dec!(1000), 10, TimeInForce::GTC);
    submit(&mut market, "seller", sell, "s-1");
    market.on_tick(t(5));
    assert_eq!(market.trading_mode(), TradingMode::BatchAuction);

    // held at the same-batch auction rate
    let buy = limit(&market, Side::Buy, dec!(1000), 10, TimeInForce::GTC);
    submit(&mut market, "buyer", buy, "b-1");
    assert_eq!(holding(&market, "buyer", &usdt()), dec!(10008));

    // charged as the aggressor: maker 3, infrastructure 5, liquidity 10
    market.on_tick(t(10));
    assert_eq!(general(&market, "buyer", &usdt()), dec!(9982));
    assert_eq!(general(&market, "buyer", &btc()), dec!(10));
    assert_eq!(holding(&market, "buyer", &usdt()), Decimal::ZERO);
    assert_eq!(general(&market, "seller", &usdt()), dec!(10003));

    let infra = AccountKey::network(&usdt(), AccountType::Infrastructure);
    let liquidity = AccountKey::market_pool(market.market_id(), &usdt(), AccountType::LiquidityFees);
    assert_eq!(market.ledger().balance(&infra), dec!(5));
    assert_eq!(market.ledger().balance(&liquidity), dec!(10));
    assert_eq!(market.ledger().total_balance(&usdt()), dec!(20000));
}

#[test]
fn test_passive_order_updated_once_per_uncrossing() {
    let mut market = setup_opening_market();
    deposit(&mut market, "b1", &usdt(), dec!(1000));
    deposit(&mut market, "b2", &usdt(), dec!(1000));
    deposit(&mut market, "seller", &btc(), dec!(4));
    let buy = limit(&market, Side::Buy, dec!(100), 2, TimeInForce::GTC);
    submit(&mut market, "b1", buy.clone(), "b1-1");
    submit(&mut market, "b2", buy, "b2-1");
    let sell = limit(&market, Side::Sell, dec!(100), 4, TimeInForce::GTC);
    let sell = submit(&mut market, "seller", sell, "s-1");

    market.on_tick(t(10));
    assert_eq!(market.trading_mode(), TradingMode::Continuous);
    let statuses: Vec<OrderStatus> = market
        .events()
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::OrderUpdated(u) if u.order.id == sell.order.id => Some(u.order.status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![OrderStatus::Active, OrderStatus::Filled]);
    assert_eq!(general(&market, "seller", &usdt()), dec!(400));
}

/// Seller rests 2 @ 100 and the buyer takes one, leaving an ask at 100.
fn trade_at_one_hundred(market: &mut SpotMarket) {
    deposit(market, "mm", &btc(), dec!(10));
    deposit(market, "buyer", &usdt(), dec!(10000));
    let ask = limit(market, Side::Sell, dec!(100), 2, TimeInForce::GTC);
    submit(market, "mm", ask, "mm-1");
    let lift = limit(market, Side::Buy, dec!(100), 1, TimeInForce::GTC);
    submit(market, "buyer", lift, "b-1");
    assert_eq!(market.last_traded_price(), Some(dec!(100)));
}

fn stop_updates(market: &SpotMarket) -> Vec<(StopOrderId, StopOrderStatus)> {
    market
        .events()
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::StopOrderUpdated(u) => Some((u.stop_order.id.clone(), u.stop_order.status)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_stop_order_fires_when_price_falls() {
    let mut market = setup_continuous_market();
    trade_at_one_hundred(&mut market);
    deposit(&mut market, "stopper", &btc(), dec!(1));
    let stopper = PartyId::from("stopper");

    let exit = limit(&market, Side::Sell, dec!(90), 1, TimeInForce::IOC);
    let stop = StopOrdersSubmission::falls_below(StopOrderSetup::price(exit, dec!(95)));
    assert!(market.submit_stop_orders(&stop, &stopper, "st-1").unwrap().is_none());
    assert_eq!(market.stop_orders().count_for_party(&stopper), 1);
    // pooled stops hold nothing
    assert_eq!(general(&market, "stopper", &btc()), dec!(1));

    let bid = limit(&market, Side::Buy, dec!(95), 3, TimeInForce::GTC);
    submit(&mut market, "buyer", bid, "b-2");
    market.cancel_all_orders(&PartyId::from("mm"), "mm-2").unwrap();
    let hit = limit(&market, Side::Sell, dec!(95), 1, TimeInForce::GTC);
    submit(&mut market, "mm", hit, "mm-3");

    assert!(market.stop_orders().is_empty());
    assert_eq!(general(&market, "stopper", &btc()), Decimal::ZERO);
    assert_eq!(general(&market, "buyer", &btc()), dec!(3));
    let updates = stop_updates(&market);
    assert_eq!(
        updates,
        vec![
            (StopOrderId::from("st-1"), StopOrderStatus::Pending),
            (StopOrderId::from("st-1"), StopOrderStatus::Triggered),
        ]
    );
    let triggered = market.events().iter().rev().find_map(|e| match &e.payload {
        EventPayload::StopOrderUpdated(u) => u.stop_order.order_id.clone(),
        _ => None,
    });
    assert!(triggered.is_some());
    assert_eq!(market.ledger().total_balance(&btc()), dec!(11));
}

#[test]
fn test_stop_pair_triggers_on_submission() {
    let mut market = setup_continuous_market();
    trade_at_one_hundred(&mut market);
    deposit(&mut market, "stopper", &usdt(), dec!(1000));
    deposit(&mut market, "stopper", &btc(), dec!(1));
    let stopper = PartyId::from("stopper");

    let below = StopOrderSetup::price(limit(&market, Side::Sell, dec!(80), 1, TimeInForce::IOC), dec!(90));
    let above = StopOrderSetup::price(limit(&market, Side::Buy, dec!(100), 1, TimeInForce::IOC), dec!(100));
    let conf = market
        .submit_stop_orders(&StopOrdersSubmission::oco(below, above), &stopper, "st-1")
        .unwrap()
        .unwrap();

    assert_eq!(conf.trades.len(), 1);
    assert_eq!(conf.order.status, OrderStatus::Filled);
    assert_eq!(general(&market, "stopper", &btc()), dec!(2));
    assert!(market.stop_orders().is_empty());
    let statuses: Vec<StopOrderStatus> = stop_updates(&market).into_iter().map(|(_, s)| s).collect();
    assert_eq!(statuses, vec![StopOrderStatus::Stopped, StopOrderStatus::Triggered]);
}

#[test]
fn test_stop_orders_rejected() {
    let mut opening = setup_opening_market();
    deposit(&mut opening, "alice", &btc(), dec!(1));
    let alice = PartyId::from("alice");
    let exit = limit(&opening, Side::Sell, dec!(90), 1, TimeInForce::IOC);
    let stop = StopOrdersSubmission::falls_below(StopOrderSetup::price(exit.clone(), dec!(95)));
    let err = opening.submit_stop_orders(&stop, &alice, "st-1").unwrap_err();
    assert!(matches!(err, MarketError::StopOrder(StopOrderError::NotAllowedDuringOpeningAuction)));
    assert_eq!(stop_updates(&opening), vec![(StopOrderId::from("st-1"), StopOrderStatus::Rejected)]);

    let config = MarketConfig {
        max_stop_orders_per_party: 1,
        ..MarketConfig::continuous()
    };
    let mut market = SpotMarket::in_memory(config, t(0)).unwrap();
    market.start_opening_auction().unwrap();
    deposit(&mut market, "alice", &btc(), dec!(1));

    let pair = StopOrdersSubmission::oco(
        StopOrderSetup::price(exit.clone(), dec!(95)),
        StopOrderSetup::price(exit.clone(), dec!(105)),
    );
    let err = market.submit_stop_orders(&pair, &alice, "st-2").unwrap_err();
    assert!(matches!(err, MarketError::StopOrder(StopOrderError::MaxStopOrdersPerPartyReached)));

    let trailing = StopOrdersSubmission::falls_below(StopOrderSetup::trailing(exit.clone(), dec!(1.5)));
    let err = market.submit_stop_orders(&trailing, &alice, "st-3").unwrap_err();
    assert!(matches!(err, MarketError::StopOrder(StopOrderError::InvalidTrigger)));

    let err = market.submit_stop_orders(&stop, &PartyId::from("nobody"), "st-4").unwrap_err();
    assert!(matches!(err, MarketError::StopOrder(StopOrderError::MissingGeneralAccount)));

    let err = market
        .submit_stop_orders(&StopOrdersSubmission::default(), &alice, "st-5")
        .unwrap_err();
    assert!(matches!(err, MarketError::StopOrder(StopOrderError::EmptySubmission)));
    assert!(market.stop_orders().is_empty());
}

#[test]
fn test_cancel_stop_orders() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "alice", &btc(), dec!(1));
    let alice = PartyId::from("alice");
    let exit = limit(&market, Side::Sell, dec!(90), 1, TimeInForce::IOC);
    let pair = StopOrdersSubmission::oco(
        StopOrderSetup::price(exit.clone(), dec!(95)),
        StopOrderSetup::price(exit.clone(), dec!(105)),
    );
    market.submit_stop_orders(&pair, &alice, "st-1").unwrap();
    let single = StopOrdersSubmission::falls_below(StopOrderSetup::price(exit, dec!(80)));
    market.submit_stop_orders(&single, &alice, "st-2").unwrap();
    assert_eq!(market.stop_orders().len(), 3);

    let err = market
        .cancel_stop_order(&PartyId::from("mallory"), &StopOrderId::from("st-1"))
        .unwrap_err();
    assert!(matches!(err, MarketError::StopOrder(StopOrderError::InvalidPartyId)));

    let cancelled = market.cancel_stop_order(&alice, &StopOrderId::from("st-1")).unwrap();
    assert_eq!(cancelled.len(), 2);
    assert!(cancelled.iter().all(|s| s.status == StopOrderStatus::Cancelled));
    assert_eq!(market.stop_orders().len(), 1);

    let rest = market.cancel_all_stop_orders(&alice).unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, StopOrderId::from("st-2"));
    assert!(market.stop_orders().is_empty());
}

#[test]
fn test_expired_stop_order_submits_when_asked() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "alice", &btc(), dec!(2));
    let alice = PartyId::from("alice");
    let resting = limit(&market, Side::Sell, dec!(120), 1, TimeInForce::GTC);
    let submits = StopOrdersSubmission::falls_below(
        StopOrderSetup::price(resting.clone(), dec!(95)).with_expiry(t(5), StopExpiryStrategy::Submit),
    );
    market.submit_stop_orders(&submits, &alice, "st-1").unwrap();
    let cancels = StopOrdersSubmission::falls_below(
        StopOrderSetup::price(resting, dec!(95)).with_expiry(t(5), StopExpiryStrategy::Cancels),
    );
    market.submit_stop_orders(&cancels, &alice, "st-2").unwrap();

    market.on_tick(t(4));
    assert_eq!(market.stop_orders().len(), 2);

    market.on_tick(t(5));
    assert!(market.stop_orders().is_empty());
    let orders = market.book().all_orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].party, alice);
    assert_eq!(holding(&market, "alice", &btc()), dec!(1));
    let updates = stop_updates(&market);
    assert!(updates.contains(&(StopOrderId::from("st-1"), StopOrderStatus::Expired)));
    assert!(updates.contains(&(StopOrderId::from("st-2"), StopOrderStatus::Expired)));
}

#[test]
fn test_stop_orders_survive_snapshot_and_go_on_terminate() {
    let mut market = setup_continuous_market();
    deposit(&mut market, "alice", &btc(), dec!(1));
    let exit = limit(&market, Side::Sell, dec!(90), 1, TimeInForce::IOC);
    let stop = StopOrdersSubmission::falls_below(StopOrderSetup::price(exit, dec!(95)));
    market.submit_stop_orders(&stop, &PartyId::from("alice"), "st-1").unwrap();

    let payloads = market.snapshot().unwrap();
    let mut restored = SpotMarket::in_memory(MarketConfig::continuous(), t(0)).unwrap();
    restored.restore_snapshot(&payloads).unwrap();
    assert_eq!(restored.stop_orders().len(), 1);
    assert!(restored.stop_orders().get(&StopOrderId::from("st-1")).is_some());

    market.terminate(MarketState::Settled).unwrap();
    assert!(market.stop_orders().is_empty());
    assert_eq!(stop_updates(&market).last(), Some(&(StopOrderId::from("st-1"), StopOrderStatus::Cancelled)));
}
