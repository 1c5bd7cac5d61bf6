// 9.2 collateral.rs: ledger collaborator. the market only moves funds through this trait.
// InMemoryLedger is the in-process implementation: plain balances, no chain bridge.
// every multi-leg movement is applied to a scratch copy and committed whole, so a failing
// leg never leaves half a transfer behind.

use crate::types::{AssetId, MarketId, PartyId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    General,
    Holding,
    MakerFees,
    LiquidityFees,
    Infrastructure,
    BuyBackFees,
    NetworkTreasury,
    HighMakerRebate,
    ReferralReward,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    pub owner: PartyId,
    /// market scoped accounts (holding, market fee pools); None for general and network pools
    pub market: Option<MarketId>,
    pub asset: AssetId,
    pub account_type: AccountType,
}

impl AccountKey {
    pub fn general(owner: &PartyId, asset: &AssetId) -> Self {
        Self {
            owner: owner.clone(),
            market: None,
            asset: asset.clone(),
            account_type: AccountType::General,
        }
    }

    pub fn holding(owner: &PartyId, market: &MarketId, asset: &AssetId) -> Self {
        Self {
            owner: owner.clone(),
            market: Some(market.clone()),
            asset: asset.clone(),
            account_type: AccountType::Holding,
        }
    }

    pub fn market_pool(market: &MarketId, asset: &AssetId, account_type: AccountType) -> Self {
        Self {
            owner: PartyId::network(),
            market: Some(market.clone()),
            asset: asset.clone(),
            account_type,
        }
    }

    pub fn network(asset: &AssetId, account_type: AccountType) -> Self {
        Self {
            owner: PartyId::network(),
            market: None,
            asset: asset.clone(),
            account_type,
        }
    }
}

impl std::fmt::Display for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.market {
            Some(m) => write!(f, "{}/{}/{}/{:?}", self.owner, m, self.asset, self.account_type),
            None => write!(f, "{}/{}/{:?}", self.owner, self.asset, self.account_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub key: AccountKey,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    HoldingLock,
    HoldingRelease,
    Spot,
    MakerFeePay,
    MakerFeeReceive,
    InfrastructureFeePay,
    LiquidityFeePay,
    LiquidityFeeDistribute,
    BuyBackFeePay,
    TreasuryFeePay,
    HighMakerRebatePay,
    HighMakerRebateReceive,
    FeeReferrerRewardPay,
    FeeReferrerRewardDistribute,
    AutomatedPurchase,
}

impl TransferType {
    /// Pool account a fee transfer moves through, and whether the owner pays into it.
    fn fee_pool(&self) -> Option<(AccountType, bool, bool)> {
        // (pool, owner pays, market scoped)
        match self {
            TransferType::MakerFeePay => Some((AccountType::MakerFees, true, true)),
            TransferType::MakerFeeReceive => Some((AccountType::MakerFees, false, true)),
            TransferType::InfrastructureFeePay => Some((AccountType::Infrastructure, true, false)),
            TransferType::LiquidityFeePay => Some((AccountType::LiquidityFees, true, true)),
            TransferType::LiquidityFeeDistribute => Some((AccountType::LiquidityFees, false, true)),
            TransferType::BuyBackFeePay => Some((AccountType::BuyBackFees, true, false)),
            TransferType::TreasuryFeePay => Some((AccountType::NetworkTreasury, true, false)),
            TransferType::HighMakerRebatePay => Some((AccountType::HighMakerRebate, true, true)),
            TransferType::HighMakerRebateReceive => Some((AccountType::HighMakerRebate, false, true)),
            TransferType::FeeReferrerRewardPay => Some((AccountType::ReferralReward, true, true)),
            TransferType::FeeReferrerRewardDistribute => Some((AccountType::ReferralReward, false, true)),
            _ => None,
        }
    }
}

/// A requested movement for one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub owner: PartyId,
    pub asset: AssetId,
    pub amount: Decimal,
    pub transfer_type: TransferType,
}

impl Transfer {
    pub fn new(owner: &PartyId, asset: &AssetId, amount: Decimal, transfer_type: TransferType) -> Self {
        Self {
            owner: owner.clone(),
            asset: asset.clone(),
            amount,
            transfer_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub from: AccountKey,
    pub to: AccountKey,
    pub amount: Decimal,
    pub transfer_type: TransferType,
    pub from_balance: Decimal,
    pub to_balance: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMovement {
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollateralError {
    #[error("account {0} does not exist")]
    AccountNotFound(String),
    #[error("insufficient balance in {account}: required {required}, available {available}")]
    InsufficientBalance {
        account: String,
        required: Decimal,
        available: Decimal,
    },
    #[error("transfer amount must not be negative: {0}")]
    InvalidAmount(Decimal),
    #[error("transfer type {0:?} is not a fee transfer")]
    NotAFeeTransfer(TransferType),
    #[error("not enough unearmarked balance in {account}: minimum {minimum}, available {available}")]
    InsufficientEarmarkBalance {
        account: String,
        minimum: Decimal,
        available: Decimal,
    },
    #[error("cannot unearmark {requested} from {account}, only {earmarked} earmarked")]
    EarmarkUnderflow {
        account: String,
        requested: Decimal,
        earmarked: Decimal,
    },
}

/// Ledger surface consumed by the market.
pub trait CollateralLedger: std::fmt::Debug + Send {
    /// Credits a party's general account, creating it if needed.
    fn deposit(&mut self, party: &PartyId, asset: &AssetId, amount: Decimal);
    /// Sum of every account in the asset. Constant across any sequence of transfers.
    fn total_balance(&self, asset: &AssetId) -> Decimal;
    fn create_party_general_account(&mut self, party: &PartyId, asset: &AssetId);
    fn has_general_account(&self, party: &PartyId, asset: &AssetId) -> bool;
    fn get_party_general_account(&self, party: &PartyId, asset: &AssetId) -> Result<Account, CollateralError>;
    fn party_has_sufficient_balance(&self, party: &PartyId, asset: &AssetId, amount: Decimal) -> Result<(), CollateralError>;
    /// General to the party's market holding account.
    fn transfer_to_holding_account(&mut self, market: &MarketId, transfer: &Transfer) -> Result<LedgerMovement, CollateralError>;
    /// Holding back to general.
    fn release_from_holding_account(&mut self, market: &MarketId, transfer: &Transfer) -> Result<LedgerMovement, CollateralError>;
    /// General to general.
    fn transfer_spot(&mut self, from: &PartyId, to: &PartyId, asset: &AssetId, amount: Decimal) -> Result<LedgerMovement, CollateralError>;
    /// Applies fee transfers in order, all or nothing.
    fn transfer_spot_fees(&mut self, market: &MarketId, asset: &AssetId, transfers: &[Transfer]) -> Result<Vec<LedgerMovement>, CollateralError>;
    fn get_market_liquidity_fee_account(&self, market: &MarketId, asset: &AssetId) -> Result<Account, CollateralError>;
    fn move_between(&mut self, from: &AccountKey, to: &AccountKey, amount: Decimal, transfer_type: TransferType) -> Result<LedgerMovement, CollateralError>;
    fn balance(&self, key: &AccountKey) -> Decimal;
    /// Reserves up to `max` (at least `min`) of a network account; returns the amount earmarked.
    fn earmark_for_automated_purchase(&mut self, asset: &AssetId, account_type: AccountType, min: Decimal, max: Decimal) -> Result<Decimal, CollateralError>;
    fn unearmark_for_automated_purchase(&mut self, asset: &AssetId, account_type: AccountType, amount: Decimal) -> Result<(), CollateralError>;
}

/** 9.3: in-memory ledger. balances keyed by account, earmarks keyed by network account */
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryLedger {
    accounts: BTreeMap<AccountKey, Decimal>,
    earmarked: BTreeMap<AccountKey, Decimal>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit_to(&mut self, key: &AccountKey, amount: Decimal) {
        *self.accounts.entry(key.clone()).or_insert(Decimal::ZERO) += amount;
    }

    pub fn general_balance(&self, party: &PartyId, asset: &AssetId) -> Decimal {
        self.balance(&AccountKey::general(party, asset))
    }

    pub fn holding_balance(&self, party: &PartyId, market: &MarketId, asset: &AssetId) -> Decimal {
        self.balance(&AccountKey::holding(party, market, asset))
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&AccountKey, &Decimal)> {
        self.accounts.iter()
    }

    fn apply(accounts: &mut BTreeMap<AccountKey, Decimal>, from: &AccountKey, to: &AccountKey, amount: Decimal, transfer_type: TransferType) -> Result<LedgerEntry, CollateralError> {
        if amount < Decimal::ZERO {
            return Err(CollateralError::InvalidAmount(amount));
        }
        let available = *accounts.get(from).ok_or_else(|| CollateralError::AccountNotFound(from.to_string()))?;
        if available < amount {
            return Err(CollateralError::InsufficientBalance {
                account: from.to_string(),
                required: amount,
                available,
            });
        }
        let from_balance = available - amount;
        accounts.insert(from.clone(), from_balance);
        let to_entry = accounts.entry(to.clone()).or_insert(Decimal::ZERO);
        *to_entry += amount;
        Ok(LedgerEntry {
            from: from.clone(),
            to: to.clone(),
            amount,
            transfer_type,
            from_balance,
            to_balance: *to_entry,
        })
    }

    fn fee_legs(market: &MarketId, asset: &AssetId, transfer: &Transfer) -> Result<(AccountKey, AccountKey), CollateralError> {
        let (pool, owner_pays, market_scoped) = transfer
            .transfer_type
            .fee_pool()
            .ok_or(CollateralError::NotAFeeTransfer(transfer.transfer_type))?;
        let pool_key = if market_scoped {
            AccountKey::market_pool(market, asset, pool)
        } else {
            AccountKey::network(asset, pool)
        };
        let owner_key = AccountKey::general(&transfer.owner, asset);
        Ok(if owner_pays { (owner_key, pool_key) } else { (pool_key, owner_key) })
    }
}

impl CollateralLedger for InMemoryLedger {
    fn deposit(&mut self, party: &PartyId, asset: &AssetId, amount: Decimal) {
        *self.accounts.entry(AccountKey::general(party, asset)).or_insert(Decimal::ZERO) += amount;
    }

    fn total_balance(&self, asset: &AssetId) -> Decimal {
        self.accounts.iter().filter(|(k, _)| &k.asset == asset).map(|(_, v)| *v).sum()
    }

    fn create_party_general_account(&mut self, party: &PartyId, asset: &AssetId) {
        self.accounts.entry(AccountKey::general(party, asset)).or_insert(Decimal::ZERO);
    }

    fn has_general_account(&self, party: &PartyId, asset: &AssetId) -> bool {
        self.accounts.contains_key(&AccountKey::general(party, asset))
    }

    fn get_party_general_account(&self, party: &PartyId, asset: &AssetId) -> Result<Account, CollateralError> {
        let key = AccountKey::general(party, asset);
        let balance = *self.accounts.get(&key).ok_or_else(|| CollateralError::AccountNotFound(key.to_string()))?;
        Ok(Account { key, balance })
    }

    fn party_has_sufficient_balance(&self, party: &PartyId, asset: &AssetId, amount: Decimal) -> Result<(), CollateralError> {
        let account = self.get_party_general_account(party, asset)?;
        if account.balance < amount {
            return Err(CollateralError::InsufficientBalance {
                account: account.key.to_string(),
                required: amount,
                available: account.balance,
            });
        }
        Ok(())
    }

    fn transfer_to_holding_account(&mut self, market: &MarketId, transfer: &Transfer) -> Result<LedgerMovement, CollateralError> {
        let from = AccountKey::general(&transfer.owner, &transfer.asset);
        let to = AccountKey::holding(&transfer.owner, market, &transfer.asset);
        let entry = Self::apply(&mut self.accounts, &from, &to, transfer.amount, TransferType::HoldingLock)?;
        Ok(LedgerMovement { entries: vec![entry] })
    }

    fn release_from_holding_account(&mut self, market: &MarketId, transfer: &Transfer) -> Result<LedgerMovement, CollateralError> {
        let from = AccountKey::holding(&transfer.owner, market, &transfer.asset);
        let to = AccountKey::general(&transfer.owner, &transfer.asset);
        let entry = Self::apply(&mut self.accounts, &from, &to, transfer.amount, TransferType::HoldingRelease)?;
        Ok(LedgerMovement { entries: vec![entry] })
    }

    fn transfer_spot(&mut self, from: &PartyId, to: &PartyId, asset: &AssetId, amount: Decimal) -> Result<LedgerMovement, CollateralError> {
        let from = AccountKey::general(from, asset);
        let to = AccountKey::general(to, asset);
        let entry = Self::apply(&mut self.accounts, &from, &to, amount, TransferType::Spot)?;
        Ok(LedgerMovement { entries: vec![entry] })
    }

    fn transfer_spot_fees(&mut self, market: &MarketId, asset: &AssetId, transfers: &[Transfer]) -> Result<Vec<LedgerMovement>, CollateralError> {
        let mut scratch = self.accounts.clone();
        let mut movements = Vec::with_capacity(transfers.len());
        for transfer in transfers {
            if transfer.amount.is_zero() {
                continue;
            }
            let (from, to) = Self::fee_legs(market, asset, transfer)?;
            let entry = Self::apply(&mut scratch, &from, &to, transfer.amount, transfer.transfer_type)?;
            movements.push(LedgerMovement { entries: vec![entry] });
        }
        self.accounts = scratch;
        Ok(movements)
    }

    fn get_market_liquidity_fee_account(&self, market: &MarketId, asset: &AssetId) -> Result<Account, CollateralError> {
        let key = AccountKey::market_pool(market, asset, AccountType::LiquidityFees);
        let balance = *self.accounts.get(&key).ok_or_else(|| CollateralError::AccountNotFound(key.to_string()))?;
        Ok(Account { key, balance })
    }

    fn move_between(&mut self, from: &AccountKey, to: &AccountKey, amount: Decimal, transfer_type: TransferType) -> Result<LedgerMovement, CollateralError> {
        let entry = Self::apply(&mut self.accounts, from, to, amount, transfer_type)?;
        Ok(LedgerMovement { entries: vec![entry] })
    }

    fn balance(&self, key: &AccountKey) -> Decimal {
        self.accounts.get(key).copied().unwrap_or(Decimal::ZERO)
    }

    fn earmark_for_automated_purchase(&mut self, asset: &AssetId, account_type: AccountType, min: Decimal, max: Decimal) -> Result<Decimal, CollateralError> {
        let key = AccountKey::network(asset, account_type);
        let earmarked = self.earmarked.get(&key).copied().unwrap_or(Decimal::ZERO);
        let available = self.balance(&key) - earmarked;
        if available < min || available.is_zero() {
            return Err(CollateralError::InsufficientEarmarkBalance {
                account: key.to_string(),
                minimum: min,
                available,
            });
        }
        let amount = available.min(max);
        self.earmarked.insert(key, earmarked + amount);
        Ok(amount)
    }

    fn unearmark_for_automated_purchase(&mut self, asset: &AssetId, account_type: AccountType, amount: Decimal) -> Result<(), CollateralError> {
        let key = AccountKey::network(asset, account_type);
        let earmarked = self.earmarked.get(&key).copied().unwrap_or(Decimal::ZERO);
        if earmarked < amount {
            return Err(CollateralError::EarmarkUnderflow {
                account: key.to_string(),
                requested: amount,
                earmarked,
            });
        }
        let left = earmarked - amount;
        if left.is_zero() {
            self.earmarked.remove(&key);
        } else {
            self.earmarked.insert(key, left);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ids() -> (PartyId, PartyId, MarketId, AssetId) {
        (PartyId::from("alice"), PartyId::from("bob"), MarketId::from("btc-usdt"), AssetId::from("usdt"))
    }

    #[test]
    fn holding_round_trip_conserves_balance() {
        let (alice, _, market, usdt) = ids();
        let mut ledger = InMemoryLedger::new();
        ledger.deposit(&alice, &usdt, dec!(1000));

        let t = Transfer::new(&alice, &usdt, dec!(600), TransferType::HoldingLock);
        ledger.transfer_to_holding_account(&market, &t).unwrap();
        assert_eq!(ledger.general_balance(&alice, &usdt), dec!(400));
        assert_eq!(ledger.holding_balance(&alice, &market, &usdt), dec!(600));

        ledger.release_from_holding_account(&market, &t).unwrap();
        assert_eq!(ledger.general_balance(&alice, &usdt), dec!(1000));
        assert_eq!(ledger.total_balance(&usdt), dec!(1000));
    }

    #[test]
    fn insufficient_balance_leaves_state_untouched() {
        let (alice, _, market, usdt) = ids();
        let mut ledger = InMemoryLedger::new();
        ledger.deposit(&alice, &usdt, dec!(10));
        let t = Transfer::new(&alice, &usdt, dec!(11), TransferType::HoldingLock);
        let err = ledger.transfer_to_holding_account(&market, &t).unwrap_err();
        assert!(matches!(err, CollateralError::InsufficientBalance { .. }));
        assert_eq!(ledger.general_balance(&alice, &usdt), dec!(10));
    }

    #[test]
    fn fee_transfers_route_through_pools() {
        let (alice, bob, market, usdt) = ids();
        let mut ledger = InMemoryLedger::new();
        ledger.deposit(&alice, &usdt, dec!(1000));
        ledger.create_party_general_account(&bob, &usdt);

        let transfers = vec![
            Transfer::new(&alice, &usdt, dec!(125), TransferType::MakerFeePay),
            Transfer::new(&alice, &usdt, dec!(250), TransferType::InfrastructureFeePay),
            Transfer::new(&alice, &usdt, dec!(500), TransferType::LiquidityFeePay),
            Transfer::new(&bob, &usdt, dec!(125), TransferType::MakerFeeReceive),
        ];
        let movements = ledger.transfer_spot_fees(&market, &usdt, &transfers).unwrap();
        assert_eq!(movements.len(), 4);
        assert_eq!(ledger.general_balance(&alice, &usdt), dec!(125));
        assert_eq!(ledger.general_balance(&bob, &usdt), dec!(125));
        assert_eq!(ledger.get_market_liquidity_fee_account(&market, &usdt).unwrap().balance, dec!(500));
        assert_eq!(ledger.balance(&AccountKey::network(&usdt, AccountType::Infrastructure)), dec!(250));
        assert_eq!(ledger.balance(&AccountKey::market_pool(&market, &usdt, AccountType::MakerFees)), dec!(0));
    }

    #[test]
    fn fee_transfers_are_all_or_nothing() {
        let (alice, _, market, usdt) = ids();
        let mut ledger = InMemoryLedger::new();
        ledger.deposit(&alice, &usdt, dec!(100));
        let transfers = vec![
            Transfer::new(&alice, &usdt, dec!(60), TransferType::InfrastructureFeePay),
            Transfer::new(&alice, &usdt, dec!(60), TransferType::LiquidityFeePay),
        ];
        assert!(ledger.transfer_spot_fees(&market, &usdt, &transfers).is_err());
        assert_eq!(ledger.general_balance(&alice, &usdt), dec!(100));
    }

    #[test]
    fn earmarks_bound_available_balance() {
        let (_, _, _, usdt) = ids();
        let mut ledger = InMemoryLedger::new();
        ledger.deposit_to(&AccountKey::network(&usdt, AccountType::BuyBackFees), dec!(1000));

        let first = ledger.earmark_for_automated_purchase(&usdt, AccountType::BuyBackFees, dec!(100), dec!(700)).unwrap();
        assert_eq!(first, dec!(700));
        let second = ledger.earmark_for_automated_purchase(&usdt, AccountType::BuyBackFees, dec!(100), dec!(700)).unwrap();
        assert_eq!(second, dec!(300));
        assert!(ledger.earmark_for_automated_purchase(&usdt, AccountType::BuyBackFees, dec!(1), dec!(10)).is_err());

        ledger.unearmark_for_automated_purchase(&usdt, AccountType::BuyBackFees, dec!(700)).unwrap();
        let err = ledger.unearmark_for_automated_purchase(&usdt, AccountType::BuyBackFees, dec!(301)).unwrap_err();
        assert!(matches!(err, CollateralError::EarmarkUnderflow { .. }));
    }
}
