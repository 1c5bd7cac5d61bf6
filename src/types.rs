// 1.0: all the primitives live here. nothing in the market works without these types.
// ids, sides, timestamps, asset scaling and the deterministic id generator.
// ids are strings so that every ordered walk (parties, orders) is lexicographic and replica-stable.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Market identifier.
    MarketId
);
string_id!(
    /// Party (trader, liquidity provider, or the network itself).
    PartyId
);
string_id!(OrderId);
string_id!(TradeId);
string_id!(
    /// Stop order identifier. Distinct from the id of the order it submits.
    StopOrderId
);
string_id!(
    /// Asset identifier, e.g. the base or quote asset of a market.
    AssetId
);

/// Party that owns protocol accounts and places automated purchase orders.
pub const NETWORK_PARTY: &str = "network";

impl PartyId {
    pub fn network() -> Self {
        Self(NETWORK_PARTY.to_string())
    }

    pub fn is_network(&self) -> bool {
        self.0 == NETWORK_PARTY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

// 1.1: block time in millis. supplied by consensus, never read from the wall clock inside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs * 1000)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn as_secs(&self) -> i64 {
        self.0.div_euclid(1000)
    }

    pub fn add_secs(&self, secs: i64) -> Self {
        Self(self.0 + secs * 1000)
    }

    pub fn sub_secs(&self, secs: i64) -> Self {
        Self(self.0 - secs * 1000)
    }

    /// Signed distance from `earlier` to `self` in whole seconds.
    pub fn secs_since(&self, earlier: Timestamp) -> i64 {
        (self.0 - earlier.0).div_euclid(1000)
    }

    pub fn to_rfc3339(&self) -> String {
        chrono::DateTime::<chrono::Utc>::from_timestamp_millis(self.0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| self.0.to_string())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.2: asset scaling between order units and asset units.
// quote notional = floor(size × price / position_factor), base quantity = floor(size × base_factor).
// both are None when the product does not fit in a Decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetScaling {
    pub position_factor: Decimal,
    pub base_factor: Decimal,
    pub price_factor: Decimal,
}

impl AssetScaling {
    pub fn new(
        position_decimal_places: i64,
        market_decimal_places: u32,
        base_asset_decimals: u32,
        quote_asset_decimals: u32,
    ) -> Self {
        Self {
            position_factor: pow10(position_decimal_places),
            base_factor: pow10(base_asset_decimals as i64 - position_decimal_places),
            price_factor: pow10(quote_asset_decimals as i64 - market_decimal_places as i64),
        }
    }

    /// Scaling where every factor is one: sizes, prices and amounts share units.
    pub fn unit() -> Self {
        Self {
            position_factor: Decimal::ONE,
            base_factor: Decimal::ONE,
            price_factor: Decimal::ONE,
        }
    }

    pub fn quote_notional(&self, size: u64, price: Decimal) -> Option<Decimal> {
        Decimal::from(size)
            .checked_mul(price)?
            .checked_div(self.position_factor)
            .map(|n| n.floor())
    }

    pub fn base_quantity(&self, size: u64) -> Option<Decimal> {
        Decimal::from(size).checked_mul(self.base_factor).map(|q| q.floor())
    }

    /// Market price (market decimals) to asset price (quote asset decimals).
    pub fn to_asset_price(&self, market_price: Decimal) -> Option<Decimal> {
        market_price.checked_mul(self.price_factor)
    }
}

impl Default for AssetScaling {
    fn default() -> Self {
        Self::unit()
    }
}

fn pow10(exp: i64) -> Decimal {
    let mut v = Decimal::ONE;
    let ten = Decimal::TEN;
    if exp >= 0 {
        for _ in 0..exp {
            v *= ten;
        }
    } else {
        for _ in 0..(-exp) {
            v /= ten;
        }
    }
    v
}

// 1.3: deterministic ids. first id is the root, each next id is the sha256 hex of the previous one.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    next: String,
}

impl IdGenerator {
    pub fn new(root: impl Into<String>) -> Self {
        Self { next: root.into() }
    }

    pub fn next_id(&mut self) -> String {
        let hashed = hash_hex(self.next.as_bytes());
        std::mem::replace(&mut self.next, hashed)
    }
}

/// Lower-case hex sha256.
pub fn hash_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn ids_order_lexicographically() {
        let mut parties = vec![PartyId::from("charlie"), PartyId::from("alice"), PartyId::from("bob")];
        parties.sort();
        assert_eq!(parties[0].as_str(), "alice");
        assert_eq!(parties[2].as_str(), "charlie");
        assert!(PartyId::network().is_network());
    }

    #[test]
    fn timestamp_second_math() {
        let t = Timestamp::from_secs(10);
        assert_eq!(t.as_millis(), 10_000);
        assert_eq!(t.add_secs(5).as_secs(), 15);
        assert_eq!(t.add_secs(5).secs_since(t), 5);
        assert_eq!(t.sub_secs(3), Timestamp::from_secs(7));
    }

    #[test]
    fn scaling_floors() {
        let scaling = AssetScaling::new(2, 0, 4, 0);
        assert_eq!(scaling.position_factor, dec!(100));
        assert_eq!(scaling.base_factor, dec!(100));
        // 3 units at 333 with 2 position decimals: 9.99 -> 9
        assert_eq!(scaling.quote_notional(3, dec!(333)), Some(dec!(9)));
        assert_eq!(scaling.base_quantity(7), Some(dec!(700)));
    }

    #[test]
    fn unit_scaling_is_identity() {
        let scaling = AssetScaling::unit();
        assert_eq!(scaling.quote_notional(2, dec!(30000)), Some(dec!(60000)));
        assert_eq!(scaling.base_quantity(5), Some(dec!(5)));
        assert_eq!(scaling.to_asset_price(dec!(12)), Some(dec!(12)));
    }

    #[test]
    fn scaling_overflow_is_none() {
        let scaling = AssetScaling::unit();
        assert_eq!(scaling.quote_notional(100_000_000_000_000_000, dec!(1_000_000_000_000)), None);
        assert_eq!(scaling.quote_notional(u64::MAX, Decimal::MAX), None);
        let fine_base = AssetScaling::new(0, 0, 18, 0);
        assert_eq!(fine_base.base_quantity(u64::MAX), None);
        assert!(fine_base.base_quantity(1_000).is_some());
    }

    #[test]
    fn id_generator_chains_hashes() {
        let mut gen = IdGenerator::new("root");
        let first = gen.next_id();
        let second = gen.next_id();
        let third = gen.next_id();
        assert_eq!(first, "root");
        assert_eq!(second, hash_hex(b"root"));
        assert_eq!(third, hash_hex(second.as_bytes()));
        assert_eq!(second.len(), 64);

        // same root, same sequence
        let mut again = IdGenerator::new("root");
        again.next_id();
        assert_eq!(again.next_id(), second);
    }
}
