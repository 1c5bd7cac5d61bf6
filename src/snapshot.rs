// 12.0 snapshot.rs: component state as opaque payloads under stable keys.
// payloads are json bytes of the component's state struct, which only holds
// ordered vectors and btree maps, so the same state always gives the same bytes.
// the hash of a payload is the hex sha256 of those bytes.

use crate::types::{hash_hex, MarketId};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const HOLDING_ACCOUNT_TRACKER: &str = "holding-account-tracker";
pub const PRICE_MONITOR: &str = "price-monitor";
pub const EQUITY_SHARES: &str = "equity-shares";
pub const AUCTION_STATE: &str = "auction-state";
pub const FEE_SPLITTER: &str = "fee-splitter";
pub const AUTOMATED_PURCHASE: &str = "automated-purchase";
pub const STOP_ORDERS: &str = "stop-orders";

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("missing payload for key {0}")]
    MissingPayload(String),
    #[error("payload {0} belongs to another market")]
    WrongMarket(String),
}

pub fn key(namespace: &str, market: &MarketId) -> String {
    format!("{}.{}", namespace, market)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPayload {
    pub key: String,
    pub data: Vec<u8>,
}

impl SnapshotPayload {
    pub fn encode<T: Serialize>(namespace: &str, market: &MarketId, state: &T) -> Result<Self, SnapshotError> {
        Ok(Self {
            key: key(namespace, market),
            data: serde_json::to_vec(state)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SnapshotError> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    pub fn hash(&self) -> String {
        hash_hex(&self.data)
    }
}

/// Finds the payload for `namespace` among a market's payloads.
pub fn find<'a>(payloads: &'a [SnapshotPayload], namespace: &str, market: &MarketId) -> Result<&'a SnapshotPayload, SnapshotError> {
    let wanted = key(namespace, market);
    if let Some(payload) = payloads.iter().find(|p| p.key == wanted) {
        return Ok(payload);
    }
    let prefix = format!("{}.", namespace);
    if let Some(other) = payloads.iter().find(|p| p.key.starts_with(&prefix)) {
        return Err(SnapshotError::WrongMarket(other.key.clone()));
    }
    Err(SnapshotError::MissingPayload(wanted))
}
