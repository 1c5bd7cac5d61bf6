//! Trading fee computation.
//!
//! Three modes: continuous (aggressor pays everything), auction (infrastructure
//! and liquidity halved and charged to both sides) and frequent batch auction
//! (auction fees for same-batch trades, continuous otherwise). Discounts are
//! applied in a fixed order: referral, then volume, then referrer reward.
//!
//! Fee calculation is pure. The returned [`FeesTransfer`] carries the ledger
//! transfers, per-party totals and the stats delta, which the caller records
//! once the transfers have actually been applied.

use crate::collateral::{Transfer, TransferType};
use crate::order::Trade;
use crate::types::{AssetId, PartyId, Side, TradeId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeFactors {
    pub maker_fee: Decimal,
    pub infrastructure_fee: Decimal,
    pub liquidity_fee: Decimal,
    pub buy_back_fee: Decimal,
    pub treasury_fee: Decimal,
}

impl FeeFactors {
    pub fn validate(&self) -> Result<(), FeeError> {
        let named = [
            ("maker", self.maker_fee),
            ("infrastructure", self.infrastructure_fee),
            ("liquidity", self.liquidity_fee),
            ("buyback", self.buy_back_fee),
            ("treasury", self.treasury_fee),
        ];
        for (name, value) in named {
            if value < Decimal::ZERO {
                return Err(FeeError::InvalidFeeFactor { name, value });
            }
        }
        Ok(())
    }

    /// 1 + every fee the buyer of an automated purchase auction can be charged.
    pub fn purchase_fee_factor(&self) -> Decimal {
        Decimal::ONE + self.infrastructure_fee + self.buy_back_fee + self.treasury_fee + self.liquidity_fee
    }
}

/// Per-side fee on a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fee {
    pub maker_fee: Decimal,
    pub infrastructure_fee: Decimal,
    pub liquidity_fee: Decimal,
    pub buy_back_fee: Decimal,
    pub treasury_fee: Decimal,
    /// paid to the maker, carved out of buyback and treasury
    pub high_volume_maker_fee: Decimal,
    /// paid to the payer's referrer, carved out of the components above
    pub referrer_reward: Decimal,
    pub referral_discount: Decimal,
    pub volume_discount: Decimal,
}

impl Fee {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Everything the payer of this fee is charged.
    pub fn total(&self) -> Decimal {
        self.maker_fee
            + self.infrastructure_fee
            + self.liquidity_fee
            + self.buy_back_fee
            + self.treasury_fee
            + self.high_volume_maker_fee
            + self.referrer_reward
    }

    fn components_mut(&mut self) -> [&mut Decimal; 5] {
        [
            &mut self.maker_fee,
            &mut self.infrastructure_fee,
            &mut self.liquidity_fee,
            &mut self.buy_back_fee,
            &mut self.treasury_fee,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeeError {
    #[error("invalid {name} fee factor: {value}")]
    InvalidFeeFactor { name: &'static str, value: Decimal },
    #[error("no trades to compute fees for")]
    EmptyTrades,
    #[error("continuous fees need an aggressor, trade {0} has none")]
    NoAggressor(TradeId),
    #[error("fee on trade {0} overflows")]
    Overflow(TradeId),
}

pub trait ReferralDiscountRewardService: std::fmt::Debug + Send {
    fn referral_discount_factor(&self, party: &PartyId) -> Decimal;
    fn reward_factor(&self, party: &PartyId) -> Decimal;
    fn referrer(&self, party: &PartyId) -> Option<PartyId>;
}

pub trait VolumeDiscountService: std::fmt::Debug + Send {
    fn volume_discount_factor(&self, party: &PartyId) -> Decimal;
}

pub trait VolumeRebateService: std::fmt::Debug + Send {
    fn volume_rebate_factor(&self, party: &PartyId) -> Decimal;
}

/// No discounts, rewards or rebates for anyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiscounts;

impl ReferralDiscountRewardService for NoDiscounts {
    fn referral_discount_factor(&self, _party: &PartyId) -> Decimal {
        Decimal::ZERO
    }

    fn reward_factor(&self, _party: &PartyId) -> Decimal {
        Decimal::ZERO
    }

    fn referrer(&self, _party: &PartyId) -> Option<PartyId> {
        None
    }
}

impl VolumeDiscountService for NoDiscounts {
    fn volume_discount_factor(&self, _party: &PartyId) -> Decimal {
        Decimal::ZERO
    }
}

impl VolumeRebateService for NoDiscounts {
    fn volume_rebate_factor(&self, _party: &PartyId) -> Decimal {
        Decimal::ZERO
    }
}

/// Table-driven discount programs, as computed by the referral and volume programs.
#[derive(Debug, Clone, Default)]
pub struct StaticFeeServices {
    pub referral_discounts: BTreeMap<PartyId, Decimal>,
    pub reward_factors: BTreeMap<PartyId, Decimal>,
    pub referrers: BTreeMap<PartyId, PartyId>,
    pub volume_discounts: BTreeMap<PartyId, Decimal>,
    pub volume_rebates: BTreeMap<PartyId, Decimal>,
}

impl StaticFeeServices {
    pub fn with_referrer(mut self, party: &PartyId, referrer: &PartyId, reward_factor: Decimal, discount_factor: Decimal) -> Self {
        self.referrers.insert(party.clone(), referrer.clone());
        self.reward_factors.insert(party.clone(), reward_factor);
        self.referral_discounts.insert(party.clone(), discount_factor);
        self
    }

    pub fn with_volume_discount(mut self, party: &PartyId, factor: Decimal) -> Self {
        self.volume_discounts.insert(party.clone(), factor);
        self
    }

    pub fn with_volume_rebate(mut self, party: &PartyId, factor: Decimal) -> Self {
        self.volume_rebates.insert(party.clone(), factor);
        self
    }
}

impl ReferralDiscountRewardService for StaticFeeServices {
    fn referral_discount_factor(&self, party: &PartyId) -> Decimal {
        self.referral_discounts.get(party).copied().unwrap_or_default()
    }

    fn reward_factor(&self, party: &PartyId) -> Decimal {
        self.reward_factors.get(party).copied().unwrap_or_default()
    }

    fn referrer(&self, party: &PartyId) -> Option<PartyId> {
        self.referrers.get(party).cloned()
    }
}

impl VolumeDiscountService for StaticFeeServices {
    fn volume_discount_factor(&self, party: &PartyId) -> Decimal {
        self.volume_discounts.get(party).copied().unwrap_or_default()
    }
}

impl VolumeRebateService for StaticFeeServices {
    fn volume_rebate_factor(&self, party: &PartyId) -> Decimal {
        self.volume_rebates.get(party).copied().unwrap_or_default()
    }
}

/// Discount collaborators handed to every fee calculation.
#[derive(Debug)]
pub struct FeeServices {
    pub referral: Box<dyn ReferralDiscountRewardService>,
    pub volume_discount: Box<dyn VolumeDiscountService>,
    pub volume_rebate: Box<dyn VolumeRebateService>,
}

impl Default for FeeServices {
    fn default() -> Self {
        Self {
            referral: Box::new(NoDiscounts),
            volume_discount: Box::new(NoDiscounts),
            volume_rebate: Box::new(NoDiscounts),
        }
    }
}

impl From<StaticFeeServices> for FeeServices {
    fn from(programs: StaticFeeServices) -> Self {
        Self {
            referral: Box::new(programs.clone()),
            volume_discount: Box::new(programs.clone()),
            volume_rebate: Box::new(programs),
        }
    }
}

/// Running per-party fee stats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeesStats {
    pub maker_fees_received: BTreeMap<PartyId, Decimal>,
    pub high_volume_maker_rebates: BTreeMap<PartyId, Decimal>,
    pub referral_discounts: BTreeMap<PartyId, Decimal>,
    pub volume_discounts: BTreeMap<PartyId, Decimal>,
    pub referrer_rewards: BTreeMap<PartyId, Decimal>,
}

impl FeesStats {
    fn add(map: &mut BTreeMap<PartyId, Decimal>, party: &PartyId, amount: Decimal) {
        if !amount.is_zero() {
            *map.entry(party.clone()).or_insert(Decimal::ZERO) += amount;
        }
    }

    pub fn merge(&mut self, other: &FeesStats) {
        for (target, source) in [
            (&mut self.maker_fees_received, &other.maker_fees_received),
            (&mut self.high_volume_maker_rebates, &other.high_volume_maker_rebates),
            (&mut self.referral_discounts, &other.referral_discounts),
            (&mut self.volume_discounts, &other.volume_discounts),
            (&mut self.referrer_rewards, &other.referrer_rewards),
        ] {
            for (party, amount) in source {
                Self::add(target, party, *amount);
            }
        }
    }
}

/// Transfers and totals produced by one fee calculation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeesTransfer {
    pub transfers: Vec<Transfer>,
    pub totals: BTreeMap<PartyId, Decimal>,
    pub stats: FeesStats,
}

impl FeesTransfer {
    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    pub fn total_fees_amounts_per_party(&self) -> &BTreeMap<PartyId, Decimal> {
        &self.totals
    }

    pub fn total_for(&self, party: &PartyId) -> Decimal {
        self.totals.get(party).copied().unwrap_or_default()
    }

    pub fn count(&self, transfer_type: TransferType) -> usize {
        self.transfers.iter().filter(|t| t.transfer_type == transfer_type).count()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct NetworkFees {
    infrastructure: Decimal,
    liquidity: Decimal,
    buy_back: Decimal,
    treasury: Decimal,
}

#[derive(Debug, Default)]
struct Accumulator {
    pays: Vec<Transfer>,
    receives: Vec<Transfer>,
    network_by_taker: BTreeMap<PartyId, NetworkFees>,
    totals: BTreeMap<PartyId, Decimal>,
    stats: FeesStats,
}

impl Accumulator {
    fn pay(&mut self, owner: &PartyId, asset: &AssetId, amount: Decimal, transfer_type: TransferType) {
        self.pays.push(Transfer::new(owner, asset, amount, transfer_type));
    }

    fn receive(&mut self, owner: &PartyId, asset: &AssetId, amount: Decimal, transfer_type: TransferType) {
        self.receives.push(Transfer::new(owner, asset, amount, transfer_type));
    }

    fn charge(&mut self, party: &PartyId, amount: Decimal) {
        *self.totals.entry(party.clone()).or_insert(Decimal::ZERO) += amount;
    }

    fn finish(mut self, asset: &AssetId) -> FeesTransfer {
        for (taker, fees) in &self.network_by_taker {
            self.pays.push(Transfer::new(taker, asset, fees.infrastructure, TransferType::InfrastructureFeePay));
            self.pays.push(Transfer::new(taker, asset, fees.liquidity, TransferType::LiquidityFeePay));
            if !fees.buy_back.is_zero() {
                self.pays.push(Transfer::new(taker, asset, fees.buy_back, TransferType::BuyBackFeePay));
            }
            if !fees.treasury.is_zero() {
                self.pays.push(Transfer::new(taker, asset, fees.treasury, TransferType::TreasuryFeePay));
            }
        }
        let mut transfers = self.pays;
        transfers.extend(self.receives);
        FeesTransfer {
            transfers,
            totals: self.totals,
            stats: self.stats,
        }
    }
}

/** 4.0: fee engine. one per market, settles in the quote asset */
#[derive(Debug, Clone)]
pub struct FeeEngine {
    asset: AssetId,
    factors: FeeFactors,
    position_factor: Decimal,
    stats: FeesStats,
}

impl FeeEngine {
    pub fn new(asset: AssetId, factors: FeeFactors, position_factor: Decimal) -> Result<Self, FeeError> {
        factors.validate()?;
        Ok(Self {
            asset,
            factors,
            position_factor,
            stats: FeesStats::default(),
        })
    }

    pub fn factors(&self) -> &FeeFactors {
        &self.factors
    }

    pub fn update_fee_factors(&mut self, factors: FeeFactors) -> Result<(), FeeError> {
        factors.validate()?;
        self.factors = factors;
        Ok(())
    }

    pub fn set_liquidity_fee(&mut self, factor: Decimal) -> Result<(), FeeError> {
        if factor < Decimal::ZERO {
            return Err(FeeError::InvalidFeeFactor {
                name: "liquidity",
                value: factor,
            });
        }
        self.factors.liquidity_fee = factor;
        Ok(())
    }

    pub fn stats(&self) -> &FeesStats {
        &self.stats
    }

    /// Records the stats of a fee calculation whose transfers were applied.
    pub fn record(&mut self, fees: &FeesTransfer) {
        self.stats.merge(&fees.stats);
    }

    fn notional(&self, trade: &Trade) -> Result<Decimal, FeeError> {
        Decimal::from(trade.size)
            .checked_mul(trade.price)
            .and_then(|n| n.checked_div(self.position_factor))
            .ok_or_else(|| FeeError::Overflow(trade.id.clone()))
    }

    fn continuous_fee(&self, trade: &Trade, notional: Decimal) -> Result<Fee, FeeError> {
        let scaled = |factor: Decimal| {
            notional
                .checked_mul(factor)
                .map(|v| v.ceil())
                .ok_or_else(|| FeeError::Overflow(trade.id.clone()))
        };
        Ok(Fee {
            maker_fee: scaled(self.factors.maker_fee)?,
            infrastructure_fee: scaled(self.factors.infrastructure_fee)?,
            liquidity_fee: scaled(self.factors.liquidity_fee)?,
            buy_back_fee: scaled(self.factors.buy_back_fee)?,
            treasury_fee: scaled(self.factors.treasury_fee)?,
            ..Fee::zero()
        })
    }

    fn auction_fee(&self, trade: &Trade, notional: Decimal) -> Result<Fee, FeeError> {
        let half = |factor: Decimal| {
            notional
                .checked_mul(factor)
                .map(|v| (v.ceil() / dec!(2)).ceil())
                .ok_or_else(|| FeeError::Overflow(trade.id.clone()))
        };
        Ok(Fee {
            infrastructure_fee: half(self.factors.infrastructure_fee)?,
            liquidity_fee: half(self.factors.liquidity_fee)?,
            ..Fee::zero()
        })
    }

    // 4.1: referral discount, then volume discount on the remainder, then the referrer reward.
    fn apply_discounts_and_rewards(&self, payer: &PartyId, mut fee: Fee, services: &FeeServices, acc: &mut Accumulator) -> Fee {
        let referral_factor = services.referral.referral_discount_factor(payer);
        let volume_factor = services.volume_discount.volume_discount_factor(payer);
        let mut referral_discount = Decimal::ZERO;
        let mut volume_discount = Decimal::ZERO;
        for component in fee.components_mut() {
            let referral = (*component * referral_factor).floor();
            *component -= referral;
            referral_discount += referral;
            let volume = (*component * volume_factor).floor();
            *component -= volume;
            volume_discount += volume;
        }
        fee.referral_discount = referral_discount;
        fee.volume_discount = volume_discount;
        FeesStats::add(&mut acc.stats.referral_discounts, payer, referral_discount);
        FeesStats::add(&mut acc.stats.volume_discounts, payer, volume_discount);

        if let Some(referrer) = services.referral.referrer(payer) {
            let reward_factor = services.referral.reward_factor(payer);
            let mut reward = Decimal::ZERO;
            for component in fee.components_mut() {
                let cut = (*component * reward_factor).floor();
                *component -= cut;
                reward += cut;
            }
            fee.referrer_reward = reward;
            if !reward.is_zero() {
                acc.pay(payer, &self.asset, reward, TransferType::FeeReferrerRewardPay);
                acc.receive(&referrer, &self.asset, reward, TransferType::FeeReferrerRewardDistribute);
                FeesStats::add(&mut acc.stats.referrer_rewards, &referrer, reward);
            }
        }
        fee
    }

    fn continuous_trade(&self, trade: &mut Trade, aggressor: Side, services: &FeeServices, acc: &mut Accumulator) -> Result<(), FeeError> {
        let (taker, maker) = match aggressor {
            Side::Buy => (trade.buyer.clone(), trade.seller.clone()),
            Side::Sell => (trade.seller.clone(), trade.buyer.clone()),
        };
        let notional = self.notional(trade)?;
        let base = self.continuous_fee(trade, notional)?;
        let mut fee = self.apply_discounts_and_rewards(&taker, base, services, acc);

        // high volume maker rebate, financed out of buyback and treasury only
        let pool = fee.buy_back_fee + fee.treasury_fee;
        let rebate = notional
            .checked_mul(services.volume_rebate.volume_rebate_factor(&maker))
            .ok_or_else(|| FeeError::Overflow(trade.id.clone()))?
            .floor()
            .min(pool);
        if rebate > Decimal::ZERO {
            let from_buy_back = (rebate * fee.buy_back_fee / pool).floor();
            fee.buy_back_fee -= from_buy_back;
            fee.treasury_fee -= rebate - from_buy_back;
            fee.high_volume_maker_fee = rebate;
        }

        acc.pay(&taker, &self.asset, fee.maker_fee, TransferType::MakerFeePay);
        acc.receive(&maker, &self.asset, fee.maker_fee, TransferType::MakerFeeReceive);
        FeesStats::add(&mut acc.stats.maker_fees_received, &maker, fee.maker_fee);
        if !fee.high_volume_maker_fee.is_zero() {
            acc.pay(&taker, &self.asset, fee.high_volume_maker_fee, TransferType::HighMakerRebatePay);
            acc.receive(&maker, &self.asset, fee.high_volume_maker_fee, TransferType::HighMakerRebateReceive);
            FeesStats::add(&mut acc.stats.high_volume_maker_rebates, &maker, fee.high_volume_maker_fee);
        }

        let network = acc.network_by_taker.entry(taker.clone()).or_default();
        network.infrastructure += fee.infrastructure_fee;
        network.liquidity += fee.liquidity_fee;
        network.buy_back += fee.buy_back_fee;
        network.treasury += fee.treasury_fee;

        acc.charge(&taker, fee.total());
        acc.charge(&maker, Decimal::ZERO);
        match aggressor {
            Side::Buy => {
                trade.buyer_fee = Some(fee);
                trade.seller_fee = Some(Fee::zero());
            }
            Side::Sell => {
                trade.seller_fee = Some(fee);
                trade.buyer_fee = Some(Fee::zero());
            }
        }
        Ok(())
    }

    fn auction_trade(&self, trade: &mut Trade, services: &FeeServices, acc: &mut Accumulator) -> Result<(), FeeError> {
        let notional = self.notional(trade)?;
        let base = self.auction_fee(trade, notional)?;
        let seller_fee = self.apply_discounts_and_rewards(&trade.seller, base, services, acc);
        let buyer_fee = self.apply_discounts_and_rewards(&trade.buyer, base, services, acc);
        for (party, fee) in [(&trade.seller, &seller_fee), (&trade.buyer, &buyer_fee)] {
            acc.pay(party, &self.asset, fee.infrastructure_fee, TransferType::InfrastructureFeePay);
            acc.pay(party, &self.asset, fee.liquidity_fee, TransferType::LiquidityFeePay);
            acc.charge(party, fee.total());
        }
        trade.seller_fee = Some(seller_fee);
        trade.buyer_fee = Some(buyer_fee);
        Ok(())
    }

    pub fn calculate_for_continuous_mode(&self, trades: &mut [Trade], services: &FeeServices) -> Result<FeesTransfer, FeeError> {
        if trades.is_empty() {
            return Err(FeeError::EmptyTrades);
        }
        let mut acc = Accumulator::default();
        for trade in trades.iter_mut() {
            let aggressor = trade.aggressor.ok_or_else(|| FeeError::NoAggressor(trade.id.clone()))?;
            self.continuous_trade(trade, aggressor, services, &mut acc)?;
        }
        Ok(acc.finish(&self.asset))
    }

    pub fn calculate_for_auction_mode(&self, trades: &mut [Trade], services: &FeeServices) -> Result<FeesTransfer, FeeError> {
        if trades.is_empty() {
            return Err(FeeError::EmptyTrades);
        }
        let mut acc = Accumulator::default();
        for trade in trades.iter_mut() {
            self.auction_trade(trade, services, &mut acc)?;
        }
        Ok(acc.finish(&self.asset))
    }

    /// Same batch: auction fees. Otherwise the later batch is the aggressor.
    pub fn calculate_for_frequent_batches_auction_mode(&self, trades: &mut [Trade], services: &FeeServices) -> Result<FeesTransfer, FeeError> {
        if trades.is_empty() {
            return Err(FeeError::EmptyTrades);
        }
        let mut acc = Accumulator::default();
        for trade in trades.iter_mut() {
            if trade.buyer_auction_batch == trade.seller_auction_batch {
                self.auction_trade(trade, services, &mut acc)?;
            } else {
                let aggressor = if trade.buyer_auction_batch > trade.seller_auction_batch {
                    Side::Buy
                } else {
                    Side::Sell
                };
                self.continuous_trade(trade, aggressor, services, &mut acc)?;
            }
        }
        Ok(acc.finish(&self.asset))
    }

    /// 4.2: floor(balance × share) per LP in party order. Flooring dust stays in the pool.
    pub fn build_liquidity_fees_distribute_transfer(&self, shares: &BTreeMap<PartyId, Decimal>, balance: Decimal) -> Option<FeesTransfer> {
        if balance.is_zero() || shares.is_empty() {
            return None;
        }
        let mut out = FeesTransfer::default();
        for (party, share) in shares {
            let amount = (balance * share).floor();
            if amount.is_zero() {
                continue;
            }
            out.transfers.push(Transfer::new(party, &self.asset, amount, TransferType::LiquidityFeeDistribute));
            out.totals.insert(party.clone(), amount);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketId, OrderId, Timestamp};

    fn engine(maker: Decimal, infra: Decimal, liquidity: Decimal) -> FeeEngine {
        FeeEngine::new(
            AssetId::from("usdt"),
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
            id: TradeId::from("t1"),
            market_id: MarketId::from("m"),
            price,
            market_price: price,
            size,
            buyer: PartyId::from("buyer"),
            seller: PartyId::from("seller"),
            buy_order: OrderId::from("b"),
            sell_order: OrderId::from("s"),
            aggressor,
            timestamp: Timestamp::from_millis(0),
            buyer_fee: None,
            seller_fee: None,
            buyer_auction_batch: 0,
            seller_auction_batch: 0,
        }
    }

    #[test]
    fn rejects_negative_factors() {
        let err = FeeEngine::new(
            AssetId::from("usdt"),
            FeeFactors {
                treasury_fee: dec!(-0.1),
                ..FeeFactors::default()
            },
            Decimal::ONE,
        )
        .unwrap_err();
        assert!(matches!(err, FeeError::InvalidFeeFactor { name: "treasury", .. }));

        let mut fe = engine(dec!(0), dec!(0), dec!(0));
        assert!(fe.set_liquidity_fee(dec!(-1)).is_err());
    }

    #[test]
    fn overflowing_notional_is_an_error() {
        let fe = engine(dec!(0.1), dec!(0.1), dec!(0.1));
        let services = FeeServices::default();
        let mut trades = vec![trade(u64::MAX, Decimal::MAX, Some(Side::Buy))];
        assert_eq!(
            fe.calculate_for_continuous_mode(&mut trades, &services),
            Err(FeeError::Overflow(TradeId::from("t1")))
        );
        assert!(fe.calculate_for_auction_mode(&mut trades, &services).is_err());
        assert!(trades[0].buyer_fee.is_none());
    }

    #[test]
    fn empty_trades_error() {
        let fe = engine(dec!(0.1), dec!(0.1), dec!(0.1));
        let services = FeeServices::default();
        assert_eq!(fe.calculate_for_continuous_mode(&mut [], &services), Err(FeeError::EmptyTrades));
        assert_eq!(fe.calculate_for_auction_mode(&mut [], &services), Err(FeeError::EmptyTrades));
    }

    #[test]
    fn continuous_mode_fees() {
        let fe = engine(dec!(0.00025), dec!(0.0005), dec!(0.001));
        let mut trades = vec![trade(5, dec!(100000), Some(Side::Sell))];
        let ft = fe.calculate_for_continuous_mode(&mut trades, &FeeServices::default()).unwrap();

        let fee = trades[0].seller_fee.unwrap();
        assert_eq!(fee.maker_fee, dec!(125));
        assert_eq!(fee.infrastructure_fee, dec!(250));
        assert_eq!(fee.liquidity_fee, dec!(500));
        assert_eq!(trades[0].buyer_fee, Some(Fee::zero()));

        assert_eq!(ft.count(TransferType::MakerFeePay), 1);
        assert_eq!(ft.count(TransferType::MakerFeeReceive), 1);
        assert_eq!(ft.count(TransferType::InfrastructureFeePay), 1);
        assert_eq!(ft.count(TransferType::LiquidityFeePay), 1);
        assert_eq!(ft.transfers().len(), 4);
        // receives come after every pay
        assert_eq!(ft.transfers().last().map(|t| t.transfer_type), Some(TransferType::MakerFeeReceive));
        assert_eq!(ft.total_for(&PartyId::from("seller")), dec!(875));
        assert_eq!(ft.total_for(&PartyId::from("buyer")), dec!(0));
    }

    #[test]
    fn auction_mode_halves_and_charges_both_sides() {
        let fe = engine(dec!(0.01), dec!(0.05), dec!(0.1));
        let mut trades = vec![trade(1, dec!(100), None)];
        let ft = fe.calculate_for_auction_mode(&mut trades, &FeeServices::default()).unwrap();

        for fee in [trades[0].buyer_fee.unwrap(), trades[0].seller_fee.unwrap()] {
            assert_eq!(fee.maker_fee, dec!(0));
            assert_eq!(fee.total(), dec!(8));
        }
        assert_eq!(ft.count(TransferType::InfrastructureFeePay), 2);
        assert_eq!(ft.count(TransferType::LiquidityFeePay), 2);
        assert_eq!(ft.count(TransferType::MakerFeePay), 0);
        assert_eq!(ft.transfers()[0].owner.as_str(), "seller");
    }

    #[test]
    fn frequent_batch_mode_picks_per_trade() {
        let fe = engine(dec!(0.01), dec!(0.05), dec!(0.1));
        let mut same = trade(1, dec!(100), None);
        same.buyer_auction_batch = 3;
        same.seller_auction_batch = 3;
        let mut later_buyer = trade(1, dec!(100), None);
        later_buyer.buyer_auction_batch = 4;
        later_buyer.seller_auction_batch = 3;

        let mut trades = vec![same, later_buyer];
        fe.calculate_for_frequent_batches_auction_mode(&mut trades, &FeeServices::default()).unwrap();
        assert_eq!(trades[0].seller_fee.map(|f| f.total()), Some(dec!(8)));
        let buyer_fee = trades[1].buyer_fee.unwrap();
        assert_eq!(buyer_fee.maker_fee, dec!(1));
        assert_eq!(buyer_fee.infrastructure_fee, dec!(5));
        assert_eq!(trades[1].seller_fee, Some(Fee::zero()));
    }

    #[test]
    fn discounts_apply_in_order() {
        let fe = engine(dec!(0), dec!(0.1), dec!(0));
        let seller = PartyId::from("seller");
        let services: FeeServices = StaticFeeServices::default()
            .with_referrer(&seller, &PartyId::from("ref"), dec!(0.1), dec!(0.5))
            .with_volume_discount(&seller, dec!(0.5))
            .into();
        let mut trades = vec![trade(1, dec!(1000), Some(Side::Sell))];
        let ft = fe.calculate_for_continuous_mode(&mut trades, &services).unwrap();
        let fee = trades[0].seller_fee.unwrap();

        // infra 100 -> referral 50 -> volume 25 -> reward floor(25 * 0.1) = 2
        assert_eq!(fee.referral_discount, dec!(50));
        assert_eq!(fee.volume_discount, dec!(25));
        assert_eq!(fee.referrer_reward, dec!(2));
        assert_eq!(fee.infrastructure_fee, dec!(23));
        assert_eq!(fee.total(), dec!(25));
        assert_eq!(ft.count(TransferType::FeeReferrerRewardPay), 1);
        assert_eq!(ft.count(TransferType::FeeReferrerRewardDistribute), 1);
        assert_eq!(ft.stats.referrer_rewards.get(&PartyId::from("ref")), Some(&dec!(2)));
    }

    #[test]
    fn maker_rebate_comes_from_buyback_and_treasury() {
        let fe = FeeEngine::new(
            AssetId::from("usdt"),
            FeeFactors {
                maker_fee: dec!(0.001),
                infrastructure_fee: dec!(0.001),
                liquidity_fee: dec!(0.001),
                buy_back_fee: dec!(0.003),
                treasury_fee: dec!(0.001),
            },
            Decimal::ONE,
        )
        .unwrap();
        let services: FeeServices = StaticFeeServices::default()
            .with_volume_rebate(&PartyId::from("seller"), dec!(0.002))
            .into();
        let mut trades = vec![trade(10, dec!(1000), Some(Side::Buy))];
        let ft = fe.calculate_for_continuous_mode(&mut trades, &services).unwrap();
        let fee = trades[0].buyer_fee.unwrap();

        // notional 10000: buyback 30, treasury 10, rebate 20 split 15/5
        assert_eq!(fee.high_volume_maker_fee, dec!(20));
        assert_eq!(fee.buy_back_fee, dec!(15));
        assert_eq!(fee.treasury_fee, dec!(5));
        assert_eq!(fee.maker_fee, dec!(10));
        assert_eq!(fee.total(), dec!(70));
        assert_eq!(ft.count(TransferType::HighMakerRebateReceive), 1);
        assert_eq!(ft.count(TransferType::BuyBackFeePay), 1);
    }

    #[test]
    fn rebate_is_capped_by_buyback_and_treasury() {
        let fe = FeeEngine::new(
            AssetId::from("usdt"),
            FeeFactors {
                buy_back_fee: dec!(0.001),
                ..FeeFactors::default()
            },
            Decimal::ONE,
        )
        .unwrap();
        let services: FeeServices = StaticFeeServices::default()
            .with_volume_rebate(&PartyId::from("seller"), dec!(0.5))
            .into();
        let mut trades = vec![trade(10, dec!(1000), Some(Side::Buy))];
        fe.calculate_for_continuous_mode(&mut trades, &services).unwrap();
        let fee = trades[0].buyer_fee.unwrap();
        assert_eq!(fee.high_volume_maker_fee, dec!(10));
        assert_eq!(fee.buy_back_fee, dec!(0));
    }

    #[test]
    fn liquidity_distribution_leaves_dust() {
        let fe = engine(dec!(0), dec!(0), dec!(0.1));
        let mut shares = BTreeMap::new();
        shares.insert(PartyId::from("b"), dec!(1) / dec!(3));
        shares.insert(PartyId::from("a"), dec!(2) / dec!(3));
        let ft = fe.build_liquidity_fees_distribute_transfer(&shares, dec!(100)).unwrap();
        assert_eq!(ft.transfers()[0].owner.as_str(), "a");
        assert_eq!(ft.transfers()[0].amount, dec!(66));
        assert_eq!(ft.transfers()[1].amount, dec!(33));
        assert!(fe.build_liquidity_fees_distribute_transfer(&shares, dec!(0)).is_none());
    }
}
