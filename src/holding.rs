// 3.0 holding.rs: per-order reservation of funds in the market holding account.
// records are keyed by order id. the tracker is the only thing that moves funds
// between general and holding for orders, so the sum of records per party/asset
// always equals what was moved out of general.

use crate::collateral::{CollateralError, CollateralLedger, LedgerMovement, Transfer, TransferType};
use crate::types::{AssetId, MarketId, OrderId, PartyId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingRecord {
    pub quantity: Decimal,
    pub fee: Decimal,
}

impl HoldingRecord {
    pub fn total(&self) -> Decimal {
        self.quantity + self.fee
    }

    fn is_empty(&self) -> bool {
        self.quantity.is_zero() && self.fee.is_zero()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HoldingError {
    #[error("funds for order {0} have already been transferred to the holding account")]
    AlreadyHeld(OrderId),
    #[error("fees for order {0} have already been transferred to the holding account")]
    FeeAlreadyHeld(OrderId),
    #[error("no locked fee for order {0}")]
    NoLockedFee(OrderId),
    #[error("insufficient locked quantity for order {order}: requested {requested}, locked {locked}")]
    InsufficientLockedQuantity {
        order: OrderId,
        requested: Decimal,
        locked: Decimal,
    },
    #[error("insufficient locked fee for order {order}: requested {requested}, locked {locked}")]
    InsufficientLockedFee {
        order: OrderId,
        requested: Decimal,
        locked: Decimal,
    },
    #[error(transparent)]
    Collateral(#[from] CollateralError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingEntry {
    pub order_id: OrderId,
    pub quantity: Decimal,
    pub fee: Decimal,
}

/// Serializable tracker state; entries are ordered by order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingTrackerState {
    pub market_id: MarketId,
    pub entries: Vec<HoldingEntry>,
}

#[derive(Debug, Clone)]
pub struct HoldingAccountTracker {
    market_id: MarketId,
    records: BTreeMap<OrderId, HoldingRecord>,
}

impl HoldingAccountTracker {
    pub fn new(market_id: MarketId) -> Self {
        Self {
            market_id,
            records: BTreeMap::new(),
        }
    }

    pub fn get(&self, order_id: &OrderId) -> Option<HoldingRecord> {
        self.records.get(order_id).copied()
    }

    pub fn held_quantity(&self, order_id: &OrderId) -> Decimal {
        self.records.get(order_id).map_or(Decimal::ZERO, |r| r.quantity)
    }

    pub fn held_fee(&self, order_id: &OrderId) -> Decimal {
        self.records.get(order_id).map_or(Decimal::ZERO, |r| r.fee)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 3.1: reserve quantity and fee for an order that holds nothing yet.
    pub fn transfer_to_holding_account(
        &mut self,
        ledger: &mut dyn CollateralLedger,
        order_id: &OrderId,
        party: &PartyId,
        asset: &AssetId,
        quantity: Decimal,
        fee: Decimal,
    ) -> Result<LedgerMovement, HoldingError> {
        if self.records.contains_key(order_id) {
            return Err(HoldingError::AlreadyHeld(order_id.clone()));
        }
        let transfer = Transfer::new(party, asset, quantity + fee, TransferType::HoldingLock);
        let movement = ledger.transfer_to_holding_account(&self.market_id, &transfer)?;
        let record = HoldingRecord { quantity, fee };
        if !record.is_empty() {
            self.records.insert(order_id.clone(), record);
        }
        Ok(movement)
    }

    /// Fee-only reservation; a zero fee is a no-op.
    pub fn transfer_fee_to_holding_account(
        &mut self,
        ledger: &mut dyn CollateralLedger,
        order_id: &OrderId,
        party: &PartyId,
        asset: &AssetId,
        fee: Decimal,
    ) -> Result<Option<LedgerMovement>, HoldingError> {
        if fee.is_zero() {
            return Ok(None);
        }
        if self.held_fee(order_id) > Decimal::ZERO {
            return Err(HoldingError::FeeAlreadyHeld(order_id.clone()));
        }
        let transfer = Transfer::new(party, asset, fee, TransferType::HoldingLock);
        let movement = ledger.transfer_to_holding_account(&self.market_id, &transfer)?;
        self.records.entry(order_id.clone()).or_default().fee = fee;
        Ok(Some(movement))
    }

    pub fn release_fee_from_holding_account(
        &mut self,
        ledger: &mut dyn CollateralLedger,
        order_id: &OrderId,
        party: &PartyId,
        asset: &AssetId,
    ) -> Result<LedgerMovement, HoldingError> {
        let fee = self.held_fee(order_id);
        if fee.is_zero() {
            return Err(HoldingError::NoLockedFee(order_id.clone()));
        }
        let transfer = Transfer::new(party, asset, fee, TransferType::HoldingRelease);
        let movement = ledger.release_from_holding_account(&self.market_id, &transfer)?;
        self.update(order_id, |r| r.fee = Decimal::ZERO);
        Ok(movement)
    }

    /// 3.2: partial release, e.g. the part of a buy that just traded.
    pub fn release_quantity_holding_account(
        &mut self,
        ledger: &mut dyn CollateralLedger,
        order_id: &OrderId,
        party: &PartyId,
        asset: &AssetId,
        quantity: Decimal,
        fee: Decimal,
    ) -> Result<LedgerMovement, HoldingError> {
        let record = self.get(order_id).unwrap_or_default();
        if record.quantity < quantity {
            return Err(HoldingError::InsufficientLockedQuantity {
                order: order_id.clone(),
                requested: quantity,
                locked: record.quantity,
            });
        }
        if record.fee < fee {
            return Err(HoldingError::InsufficientLockedFee {
                order: order_id.clone(),
                requested: fee,
                locked: record.fee,
            });
        }
        let transfer = Transfer::new(party, asset, quantity + fee, TransferType::HoldingRelease);
        let movement = ledger.release_from_holding_account(&self.market_id, &transfer)?;
        self.update(order_id, |r| {
            r.quantity -= quantity;
            r.fee -= fee;
        });
        Ok(movement)
    }

    /// Releases whatever is left for the order. Nothing held is not an error.
    pub fn release_all_from_holding_account(
        &mut self,
        ledger: &mut dyn CollateralLedger,
        order_id: &OrderId,
        party: &PartyId,
        asset: &AssetId,
    ) -> Result<Option<LedgerMovement>, HoldingError> {
        let Some(record) = self.records.get(order_id).copied() else {
            return Ok(None);
        };
        if record.is_empty() {
            self.records.remove(order_id);
            return Ok(None);
        }
        let transfer = Transfer::new(party, asset, record.total(), TransferType::HoldingRelease);
        let movement = ledger.release_from_holding_account(&self.market_id, &transfer)?;
        self.records.remove(order_id);
        Ok(Some(movement))
    }

    fn update(&mut self, order_id: &OrderId, f: impl FnOnce(&mut HoldingRecord)) {
        if let Some(record) = self.records.get_mut(order_id) {
            f(record);
            if record.is_empty() {
                self.records.remove(order_id);
            }
        }
    }

    pub fn state(&self) -> HoldingTrackerState {
        HoldingTrackerState {
            market_id: self.market_id.clone(),
            entries: self
                .records
                .iter()
                .map(|(id, r)| HoldingEntry {
                    order_id: id.clone(),
                    quantity: r.quantity,
                    fee: r.fee,
                })
                .collect(),
        }
    }

    pub fn restore(state: HoldingTrackerState) -> Self {
        Self {
            market_id: state.market_id,
            records: state
                .entries
                .into_iter()
                .map(|e| (e.order_id, HoldingRecord { quantity: e.quantity, fee: e.fee }))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collateral::InMemoryLedger;
    use rust_decimal_macros::dec;

    struct Fixture {
        ledger: InMemoryLedger,
        tracker: HoldingAccountTracker,
        party: PartyId,
        asset: AssetId,
        market: MarketId,
    }

    fn fixture() -> Fixture {
        let party = PartyId::from("alice");
        let asset = AssetId::from("usdt");
        let market = MarketId::from("m");
        let mut ledger = InMemoryLedger::new();
        ledger.deposit(&party, &asset, dec!(1000));
        Fixture {
            ledger,
            tracker: HoldingAccountTracker::new(market.clone()),
            party,
            asset,
            market,
        }
    }

    #[test]
    fn reserve_is_at_most_once() {
        let mut f = fixture();
        let id = OrderId::from("o1");
        f.tracker
            .transfer_to_holding_account(&mut f.ledger, &id, &f.party, &f.asset, dec!(100), dec!(5))
            .unwrap();
        assert_eq!(f.ledger.general_balance(&f.party, &f.asset), dec!(895));
        assert_eq!(f.ledger.holding_balance(&f.party, &f.market, &f.asset), dec!(105));

        let err = f
            .tracker
            .transfer_to_holding_account(&mut f.ledger, &id, &f.party, &f.asset, dec!(1), dec!(0))
            .unwrap_err();
        assert_eq!(err, HoldingError::AlreadyHeld(id));
        assert_eq!(f.ledger.general_balance(&f.party, &f.asset), dec!(895));
    }

    #[test]
    fn partial_release_then_release_all() {
        let mut f = fixture();
        let id = OrderId::from("o1");
        f.tracker
            .transfer_to_holding_account(&mut f.ledger, &id, &f.party, &f.asset, dec!(100), dec!(10))
            .unwrap();
        f.tracker
            .release_quantity_holding_account(&mut f.ledger, &id, &f.party, &f.asset, dec!(40), dec!(4))
            .unwrap();
        assert_eq!(f.tracker.get(&id), Some(HoldingRecord { quantity: dec!(60), fee: dec!(6) }));

        let err = f
            .tracker
            .release_quantity_holding_account(&mut f.ledger, &id, &f.party, &f.asset, dec!(61), dec!(0))
            .unwrap_err();
        assert!(matches!(err, HoldingError::InsufficientLockedQuantity { .. }));

        let released = f.tracker.release_all_from_holding_account(&mut f.ledger, &id, &f.party, &f.asset).unwrap();
        assert!(released.is_some());
        assert!(f.tracker.get(&id).is_none());
        assert_eq!(f.ledger.general_balance(&f.party, &f.asset), dec!(1000));

        // second release is a no-op
        let again = f.tracker.release_all_from_holding_account(&mut f.ledger, &id, &f.party, &f.asset).unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn fee_only_hold_and_release() {
        let mut f = fixture();
        let id = OrderId::from("o1");
        f.tracker
            .transfer_to_holding_account(&mut f.ledger, &id, &f.party, &f.asset, dec!(100), dec!(0))
            .unwrap();
        assert!(f
            .tracker
            .transfer_fee_to_holding_account(&mut f.ledger, &id, &f.party, &f.asset, dec!(0))
            .unwrap()
            .is_none());
        f.tracker
            .transfer_fee_to_holding_account(&mut f.ledger, &id, &f.party, &f.asset, dec!(8))
            .unwrap();
        assert!(matches!(
            f.tracker.transfer_fee_to_holding_account(&mut f.ledger, &id, &f.party, &f.asset, dec!(8)),
            Err(HoldingError::FeeAlreadyHeld(_))
        ));
        assert_eq!(f.tracker.held_fee(&id), dec!(8));

        f.tracker.release_fee_from_holding_account(&mut f.ledger, &id, &f.party, &f.asset).unwrap();
        assert_eq!(f.tracker.held_fee(&id), dec!(0));
        assert_eq!(f.tracker.held_quantity(&id), dec!(100));
        assert!(matches!(
            f.tracker.release_fee_from_holding_account(&mut f.ledger, &id, &f.party, &f.asset),
            Err(HoldingError::NoLockedFee(_))
        ));
    }

    #[test]
    fn failed_ledger_move_records_nothing() {
        let mut f = fixture();
        let id = OrderId::from("big");
        let err = f
            .tracker
            .transfer_to_holding_account(&mut f.ledger, &id, &f.party, &f.asset, dec!(5000), dec!(0))
            .unwrap_err();
        assert!(matches!(err, HoldingError::Collateral(_)));
        assert!(f.tracker.is_empty());
    }

    #[test]
    fn state_round_trip() {
        let mut f = fixture();
        for (id, q) in [("b", dec!(10)), ("a", dec!(20))] {
            f.tracker
                .transfer_to_holding_account(&mut f.ledger, &OrderId::from(id), &f.party, &f.asset, q, dec!(1))
                .unwrap();
        }
        let state = f.tracker.state();
        assert_eq!(state.entries[0].order_id.as_str(), "a");
        let restored = HoldingAccountTracker::restore(state.clone());
        assert_eq!(restored.state(), state);
    }
}
