//! Property-based tests for fee math, LP shares and snapshots.
//!
//! These tests verify invariants hold under random inputs.

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spot_core::*;
use std::collections::BTreeSet;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000i64).prop_map(Decimal::from)
}

fn size_strategy() -> impl Strategy<Value = u64> {
    1u64..10_000u64
}

fn factor_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..=1_000i64).prop_map(|x| Decimal::new(x, 5)) // 0 to 1%
}

fn stake_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000i64).prop_map(Decimal::from)
}

fn fee_engine(maker: Decimal, infra: Decimal, liquidity: Decimal) -> FeeEngine {
    FeeEngine::new(
        AssetId::from("USDT"),
        FeeFactors {
            maker_fee: maker,
            infrastructure_fee: infra,
            liquidity_fee: liquidity,
            ..FeeFactors::default()
        },
        Decimal::ONE,
    )
    .unwrap()
}

fn trade(size: u64, price: Decimal, aggressor: Option<Side>) -> Trade {
    Trade {
        id: TradeId::from("trade-1"),
        market_id: MarketId::from("BTC/USDT"),
        price,
        market_price: price,
        size,
        buyer: PartyId::from("buyer"),
        seller: PartyId::from("seller"),
        buy_order: OrderId::from("buy-1"),
        sell_order: OrderId::from("sell-1"),
        aggressor,
        timestamp: Timestamp::from_secs(0),
        buyer_fee: None,
        seller_fee: None,
        buyer_auction_batch: 0,
        seller_auction_batch: 0,
    }
}

fn continuous_total(engine: &FeeEngine, size: u64, price: Decimal) -> Decimal {
    let mut trades = vec![trade(size, price, Some(Side::Buy))];
    let fees = engine.calculate_for_continuous_mode(&mut trades, &FeeServices::default()).unwrap();
    fees.total_for(&PartyId::from("buyer"))
}

fn auction_total(engine: &FeeEngine, size: u64, price: Decimal) -> Decimal {
    let mut trades = vec![trade(size, price, None)];
    let fees = engine.calculate_for_auction_mode(&mut trades, &FeeServices::default()).unwrap();
    fees.total_for(&PartyId::from("buyer"))
}

proptest! {
    /// Fees are never negative, in either mode
    #[test]
    fn fees_never_negative(
        size in size_strategy(),
        price in price_strategy(),
        maker in factor_strategy(),
        infra in factor_strategy(),
        liquidity in factor_strategy(),
    ) {
        let engine = fee_engine(maker, infra, liquidity);
        prop_assert!(continuous_total(&engine, size, price) >= Decimal::ZERO);
        prop_assert!(auction_total(&engine, size, price) >= Decimal::ZERO);
    }

    /// Larger notional never pays a smaller fee
    #[test]
    fn fees_monotonic_in_notional(
        size in size_strategy(),
        extra in 0u64..1_000u64,
        price in price_strategy(),
        maker in factor_strategy(),
        infra in factor_strategy(),
        liquidity in factor_strategy(),
    ) {
        let engine = fee_engine(maker, infra, liquidity);
        let small = continuous_total(&engine, size, price);
        let large = continuous_total(&engine, size + extra, price);
        prop_assert!(large >= small, "fee fell from {} to {}", small, large);

        let small = auction_total(&engine, size, price);
        let large = auction_total(&engine, size + extra, price);
        prop_assert!(large >= small);
    }

    /// Each side of an auction trade pays half of the continuous network fees, rounded up
    #[test]
    fn auction_side_pays_half_rounded_up(
        size in size_strategy(),
        price in price_strategy(),
        infra in factor_strategy(),
        liquidity in factor_strategy(),
    ) {
        let engine = fee_engine(Decimal::ZERO, infra, liquidity);
        let notional = Decimal::from(size) * price;
        let expected = ((notional * infra).ceil() / dec!(2)).ceil() + ((notional * liquidity).ceil() / dec!(2)).ceil();

        let mut trades = vec![trade(size, price, None)];
        let fees = engine.calculate_for_auction_mode(&mut trades, &FeeServices::default()).unwrap();
        prop_assert_eq!(fees.total_for(&PartyId::from("buyer")), expected);
        prop_assert_eq!(fees.total_for(&PartyId::from("seller")), expected);
        prop_assert_eq!(fees.count(TransferType::MakerFeePay), 0);
    }

    /// The maker receives exactly what the taker pays it
    #[test]
    fn maker_fee_paid_equals_received(
        size in size_strategy(),
        price in price_strategy(),
        maker in factor_strategy(),
    ) {
        let engine = fee_engine(maker, dec!(0.0005), dec!(0.001));
        let mut trades = vec![trade(size, price, Some(Side::Sell))];
        let fees = engine.calculate_for_continuous_mode(&mut trades, &FeeServices::default()).unwrap();

        let paid: Decimal = fees
            .transfers()
            .iter()
            .filter(|t| t.transfer_type == TransferType::MakerFeePay)
            .map(|t| t.amount)
            .sum();
        let received: Decimal = fees
            .transfers()
            .iter()
            .filter(|t| t.transfer_type == TransferType::MakerFeeReceive)
            .map(|t| t.amount)
            .sum();
        prop_assert_eq!(paid, received);
        prop_assert_eq!(fees.total_for(&PartyId::from("buyer")), Decimal::ZERO);
    }

    /// LP shares sum to one whenever anyone has stake
    #[test]
    fn shares_sum_to_one(stakes in proptest::collection::vec(stake_strategy(), 1..20)) {
        let mut equity = EquityShares::new(Decimal::ZERO);
        for (i, stake) in stakes.iter().enumerate() {
            equity.set_party_stake(&PartyId::from(format!("lp-{}", i)), *stake, *stake, Decimal::ONE);
        }
        let shares = equity.shares_except(&BTreeSet::new());
        let total: Decimal = shares.values().sum();
        prop_assert!((total - Decimal::ONE).abs() < dec!(0.000000000001), "shares summed to {}", total);
    }

    /// Excluding LPs renormalises the others
    #[test]
    fn shares_except_renormalise(
        stakes in proptest::collection::vec(stake_strategy(), 2..20),
        excluded_index in 0usize..20,
    ) {
        let mut equity = EquityShares::new(Decimal::ZERO);
        for (i, stake) in stakes.iter().enumerate() {
            equity.set_party_stake(&PartyId::from(format!("lp-{}", i)), *stake, *stake, Decimal::ONE);
        }
        let excluded = PartyId::from(format!("lp-{}", excluded_index % stakes.len()));
        let shares = equity.shares_except(&BTreeSet::from([excluded.clone()]));
        prop_assert!(!shares.contains_key(&excluded));
        let total: Decimal = shares.values().sum();
        prop_assert!((total - Decimal::ONE).abs() < dec!(0.000000000001));
    }

    /// Equity share snapshots survive a round trip unchanged
    #[test]
    fn equity_snapshot_round_trip(stakes in proptest::collection::vec(stake_strategy(), 0..10)) {
        let market = MarketId::from("BTC/USDT");
        let mut equity = EquityShares::new(dec!(100));
        for (i, stake) in stakes.iter().enumerate() {
            equity.set_party_stake(&PartyId::from(format!("lp-{}", i)), *stake, *stake * dec!(2), Decimal::ONE);
        }
        let payload = SnapshotPayload::encode(spot_core::snapshot::EQUITY_SHARES, &market, &equity.state()).unwrap();
        let restored = EquityShares::restore(payload.decode().unwrap());
        let again = SnapshotPayload::encode(spot_core::snapshot::EQUITY_SHARES, &market, &restored.state()).unwrap();
        prop_assert_eq!(payload.hash(), again.hash());
    }
}

#[test]
fn continuous_trade_fee_breakdown() {
    let engine = fee_engine(dec!(0.00025), dec!(0.0005), dec!(0.001));
    let mut trades = vec![trade(5, dec!(100000), Some(Side::Buy))];
    let fees = engine.calculate_for_continuous_mode(&mut trades, &FeeServices::default()).unwrap();

    let fee = trades[0].buyer_fee.unwrap();
    assert_eq!(fee.maker_fee, dec!(125));
    assert_eq!(fee.infrastructure_fee, dec!(250));
    assert_eq!(fee.liquidity_fee, dec!(500));
    assert_eq!(fees.count(TransferType::InfrastructureFeePay), 1);
    assert_eq!(fees.count(TransferType::LiquidityFeePay), 1);
    assert_eq!(fees.count(TransferType::MakerFeePay), 1);
    assert_eq!(fees.count(TransferType::MakerFeeReceive), 1);
}

#[test]
fn auction_trade_splits_fees_between_sides() {
    let engine = fee_engine(Decimal::ZERO, dec!(0.05), dec!(0.1));
    let mut trades = vec![trade(1, dec!(100), None)];
    let fees = engine.calculate_for_auction_mode(&mut trades, &FeeServices::default()).unwrap();

    // infra ceil(5/2) = 3, liquidity ceil(10/2) = 5
    assert_eq!(fees.total_for(&PartyId::from("buyer")), dec!(8));
    assert_eq!(fees.total_for(&PartyId::from("seller")), dec!(8));
    assert_eq!(fees.count(TransferType::InfrastructureFeePay), 2);
    assert_eq!(fees.count(TransferType::LiquidityFeePay), 2);
    assert_eq!(fees.count(TransferType::MakerFeePay), 0);
}

#[test]
fn equity_shares_three_lps() {
    let mut equity = EquityShares::new(Decimal::ZERO);
    for (party, stake) in [("lp1", dec!(100)), ("lp2", dec!(200)), ("lp3", dec!(300))] {
        equity.set_party_stake(&PartyId::from(party), stake, stake, Decimal::ONE);
    }
    let close = |a: Decimal, b: Decimal| (a - b).abs() < dec!(0.0000000000001);

    let shares = equity.shares_except(&BTreeSet::new());
    assert!(close(shares[&PartyId::from("lp1")], Decimal::ONE / dec!(6)));
    assert!(close(shares[&PartyId::from("lp2")], Decimal::ONE / dec!(3)));
    assert!(close(shares[&PartyId::from("lp3")], dec!(0.5)));

    let without = equity.shares_except(&BTreeSet::from([PartyId::from("lp2")]));
    assert_eq!(without.len(), 2);
    assert!(close(without[&PartyId::from("lp1")], dec!(0.25)));
    assert!(close(without[&PartyId::from("lp3")], dec!(0.75)));
}

#[test]
fn no_lps_no_shares() {
    let mut equity = EquityShares::new(Decimal::ZERO);
    let shares = equity.shares_except(&BTreeSet::new());
    assert!(shares.values().sum::<Decimal>().is_zero());
}
