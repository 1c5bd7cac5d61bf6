//! Trading mode and auction bookkeeping.
//!
//! `AuctionState` only records what mode the market is in and why. Deciding
//! when to enter or leave belongs to price monitoring and the market. The mode
//! changes through the start/extend/ready calls, and the market reports them
//! through [`AuctionState::auction_started`], [`AuctionState::auction_extended`]
//! and [`AuctionState::left`], which hand back the event to publish.

use crate::types::{MarketId, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Continuous,
    OpeningAuction,
    MonitoringAuction,
    BatchAuction,
    SuspendedViaGovernance,
    AutomatedPurchaseAuction,
    NoTrading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionTrigger {
    Unspecified,
    Opening,
    Price,
    Batch,
    Governance,
    AutomatedPurchase,
}

/// Mode the market falls back to after every auction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultTradingMode {
    #[default]
    Continuous,
    /// batch length in seconds
    FrequentBatchAuction { duration_secs: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketState {
    Proposed,
    Pending,
    Active,
    Suspended,
    SuspendedViaGovernance,
    TradingTerminated,
    Settled,
    Cancelled,
    Rejected,
}

impl MarketState {
    pub fn can_trade(&self) -> bool {
        matches!(
            self,
            MarketState::Active | MarketState::Pending | MarketState::Suspended | MarketState::SuspendedViaGovernance
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, MarketState::Settled | MarketState::Cancelled | MarketState::Rejected)
    }
}

impl std::fmt::Display for MarketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuctionError {
    #[error("market in state {state} cannot {operation}")]
    InvalidTransition { state: MarketState, operation: &'static str },
    #[error("market is not in a governance suspension")]
    NotSuspendedViaGovernance,
}

/// Published whenever an auction starts, is extended or ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionEvent {
    pub market_id: MarketId,
    pub opening_auction: bool,
    pub leave: bool,
    pub start: Timestamp,
    pub end: Option<Timestamp>,
    pub trigger: AuctionTrigger,
    pub extension_trigger: Option<AuctionTrigger>,
}

/** 5.0: auction state. one per market */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionState {
    market_id: MarketId,
    mode: TradingMode,
    default_mode: DefaultTradingMode,
    trigger: AuctionTrigger,
    extension: Option<AuctionTrigger>,
    begin: Option<Timestamp>,
    /// auction length in seconds from `begin`
    duration_secs: i64,
    /// set on entry, cleared once the start has been reported
    start: bool,
    /// ready to leave
    stop: bool,
}

impl AuctionState {
    /// Opens in the opening auction when `opening_duration_secs > 0`, otherwise
    /// in the default trading mode.
    pub fn new(market_id: MarketId, default_mode: DefaultTradingMode, opening_duration_secs: i64, now: Timestamp) -> Self {
        let mut state = Self {
            market_id,
            mode: TradingMode::Continuous,
            default_mode,
            trigger: AuctionTrigger::Unspecified,
            extension: None,
            begin: None,
            duration_secs: 0,
            start: false,
            stop: false,
        };
        if opening_duration_secs > 0 {
            state.enter(TradingMode::OpeningAuction, AuctionTrigger::Opening, now, opening_duration_secs);
        } else if let DefaultTradingMode::FrequentBatchAuction { duration_secs } = default_mode {
            state.enter(TradingMode::BatchAuction, AuctionTrigger::Batch, now, duration_secs);
        }
        state
    }

    fn enter(&mut self, mode: TradingMode, trigger: AuctionTrigger, now: Timestamp, duration_secs: i64) {
        self.mode = mode;
        self.trigger = trigger;
        self.extension = None;
        self.begin = Some(now);
        self.duration_secs = duration_secs;
        self.start = true;
        self.stop = false;
    }

    pub fn market_id(&self) -> &MarketId {
        &self.market_id
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    pub fn default_mode(&self) -> DefaultTradingMode {
        self.default_mode
    }

    pub fn trigger(&self) -> AuctionTrigger {
        self.trigger
    }

    pub fn extension_trigger(&self) -> Option<AuctionTrigger> {
        self.extension
    }

    pub fn in_auction(&self) -> bool {
        !matches!(self.mode, TradingMode::Continuous | TradingMode::NoTrading)
    }

    pub fn is_opening_auction(&self) -> bool {
        self.trigger == AuctionTrigger::Opening
    }

    pub fn is_price_auction(&self) -> bool {
        self.trigger == AuctionTrigger::Price
    }

    pub fn is_price_extension(&self) -> bool {
        self.extension == Some(AuctionTrigger::Price)
    }

    pub fn is_fba(&self) -> bool {
        self.trigger == AuctionTrigger::Batch
    }

    pub fn is_governance_suspension(&self) -> bool {
        self.trigger == AuctionTrigger::Governance
    }

    pub fn is_automated_purchase_auction(&self) -> bool {
        self.trigger == AuctionTrigger::AutomatedPurchase
    }

    pub fn is_monitoring_auction(&self) -> bool {
        self.mode == TradingMode::MonitoringAuction
    }

    /// True between entering an auction and reporting it.
    pub fn auction_start(&self) -> bool {
        self.start
    }

    pub fn can_leave(&self) -> bool {
        self.stop
    }

    pub fn begin(&self) -> Option<Timestamp> {
        self.begin
    }

    pub fn duration_secs(&self) -> i64 {
        self.duration_secs
    }

    pub fn expires_at(&self) -> Option<Timestamp> {
        self.begin.map(|b| b.add_secs(self.duration_secs))
    }

    /// 5.1: enter a price monitoring auction. Also used to turn a batch auction
    /// into a monitoring auction. Ignored during the opening auction or a suspension.
    pub fn start_price_auction(&mut self, now: Timestamp, duration_secs: i64) {
        if self.in_auction() && !self.is_fba() {
            warn!(market = %self.market_id, mode = ?self.mode, "price auction requested while already in auction");
            return;
        }
        self.enter(TradingMode::MonitoringAuction, AuctionTrigger::Price, now, duration_secs);
    }

    pub fn start_governance_suspension(&mut self, now: Timestamp) {
        self.enter(TradingMode::SuspendedViaGovernance, AuctionTrigger::Governance, now, 0);
    }

    /// Resuming marks the suspension ready to leave; the next tick uncrosses it.
    pub fn end_governance_suspension(&mut self) -> Result<(), AuctionError> {
        if !self.is_governance_suspension() {
            return Err(AuctionError::NotSuspendedViaGovernance);
        }
        self.stop = true;
        Ok(())
    }

    pub fn start_automated_purchase_auction(&mut self, now: Timestamp, duration_secs: i64) {
        if self.in_auction() && !self.is_fba() {
            warn!(market = %self.market_id, mode = ?self.mode, "automated purchase auction requested while already in auction");
            return;
        }
        self.enter(TradingMode::AutomatedPurchaseAuction, AuctionTrigger::AutomatedPurchase, now, duration_secs);
    }

    pub fn start_fba(&mut self, now: Timestamp, duration_secs: i64) {
        self.enter(TradingMode::BatchAuction, AuctionTrigger::Batch, now, duration_secs);
    }

    /// 5.2: lengthen the current auction because of a price bound breach.
    pub fn extend_auction_price(&mut self, delta_secs: i64) {
        self.extend_auction(AuctionTrigger::Price, delta_secs);
    }

    pub fn extend_auction(&mut self, trigger: AuctionTrigger, delta_secs: i64) {
        if !self.in_auction() {
            warn!(market = %self.market_id, "extension requested outside of an auction");
            return;
        }
        self.duration_secs += delta_secs;
        self.extension = Some(trigger);
        self.stop = false;
    }

    pub fn set_ready_to_leave(&mut self) {
        self.stop = true;
    }

    fn event(&self, now: Timestamp, leave: bool) -> AuctionEvent {
        AuctionEvent {
            market_id: self.market_id.clone(),
            opening_auction: self.is_opening_auction(),
            leave,
            start: self.begin.unwrap_or(now),
            end: if leave { Some(now) } else { self.expires_at() },
            trigger: self.trigger,
            extension_trigger: self.extension,
        }
    }

    /// 5.3: reports a pending start exactly once.
    pub fn auction_started(&mut self, now: Timestamp) -> Option<AuctionEvent> {
        if !self.start {
            return None;
        }
        self.start = false;
        debug!(market = %self.market_id, trigger = ?self.trigger, "auction started");
        Some(self.event(now, false))
    }

    /// Reports a pending extension exactly once.
    pub fn auction_extended(&mut self, now: Timestamp) -> Option<AuctionEvent> {
        self.extension?;
        let event = self.event(now, false);
        self.extension = None;
        debug!(market = %self.market_id, end = ?event.end, "auction extended");
        Some(event)
    }

    /// 5.4: leaves the auction into the default mode. A batch default starts the
    /// next batch straight away.
    pub fn left(&mut self, now: Timestamp) -> Option<AuctionEvent> {
        if !self.in_auction() {
            warn!(market = %self.market_id, "leave requested outside of an auction");
            return None;
        }
        let event = self.event(now, true);
        self.mode = TradingMode::Continuous;
        self.trigger = AuctionTrigger::Unspecified;
        self.extension = None;
        self.begin = None;
        self.duration_secs = 0;
        self.start = false;
        self.stop = false;
        if let DefaultTradingMode::FrequentBatchAuction { duration_secs } = self.default_mode {
            self.start_fba(now, duration_secs);
        }
        Some(event)
    }

    /// Trading is over for good.
    pub fn close(&mut self) {
        self.mode = TradingMode::NoTrading;
        self.trigger = AuctionTrigger::Unspecified;
        self.extension = None;
        self.begin = None;
        self.start = false;
        self.stop = false;
    }

    pub fn state(&self) -> AuctionState {
        self.clone()
    }

    pub fn restore(state: AuctionState) -> Self {
        state
    }
}
