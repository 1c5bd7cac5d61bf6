// 8.10 engine/state.rs: component snapshots. one payload per component, keyed
// by namespace and market, restored in the same order they are taken.

use super::core::SpotMarket;
use super::results::MarketError;
use crate::auction::AuctionState;
use crate::equity_shares::{EquityShares, EquitySharesState};
use crate::fee_splitter::FeeSplitter;
use crate::holding::{HoldingAccountTracker, HoldingTrackerState};
use crate::pap::ProtocolAutomatedPurchase;
use crate::price_monitor::{PriceMonitor, PriceMonitorState};
use crate::snapshot::{self, SnapshotPayload};
use crate::stop_orders::{StopOrders, StopOrdersState};
use tracing::info;

impl SpotMarket {
    pub fn snapshot(&self) -> Result<Vec<SnapshotPayload>, MarketError> {
        let market = &self.config.market_id;
        let payloads = vec![
            SnapshotPayload::encode(snapshot::HOLDING_ACCOUNT_TRACKER, market, &self.holdings.state())?,
            SnapshotPayload::encode(snapshot::PRICE_MONITOR, market, &self.price_monitor.state())?,
            SnapshotPayload::encode(snapshot::EQUITY_SHARES, market, &self.equity_shares.state())?,
            SnapshotPayload::encode(snapshot::AUCTION_STATE, market, &self.auction.state())?,
            SnapshotPayload::encode(snapshot::FEE_SPLITTER, market, &self.fee_splitter.state())?,
            SnapshotPayload::encode(
                snapshot::AUTOMATED_PURCHASE,
                market,
                &self.pap.as_ref().map(|p| p.state()),
            )?,
            SnapshotPayload::encode(snapshot::STOP_ORDERS, market, &self.stop_orders.state())?,
        ];
        Ok(payloads)
    }

    /// Replaces component state with `payloads`. Nothing changes unless every
    /// payload is present and decodes.
    pub fn restore_snapshot(&mut self, payloads: &[SnapshotPayload]) -> Result<(), MarketError> {
        let market = self.config.market_id.clone();
        let holdings: HoldingTrackerState = snapshot::find(payloads, snapshot::HOLDING_ACCOUNT_TRACKER, &market)?.decode()?;
        let monitor: PriceMonitorState = snapshot::find(payloads, snapshot::PRICE_MONITOR, &market)?.decode()?;
        let equity: EquitySharesState = snapshot::find(payloads, snapshot::EQUITY_SHARES, &market)?.decode()?;
        let auction: AuctionState = snapshot::find(payloads, snapshot::AUCTION_STATE, &market)?.decode()?;
        let splitter: FeeSplitter = snapshot::find(payloads, snapshot::FEE_SPLITTER, &market)?.decode()?;
        let pap: Option<ProtocolAutomatedPurchase> = snapshot::find(payloads, snapshot::AUTOMATED_PURCHASE, &market)?.decode()?;
        let stops: StopOrdersState = snapshot::find(payloads, snapshot::STOP_ORDERS, &market)?.decode()?;

        self.holdings = HoldingAccountTracker::restore(holdings);
        self.price_monitor = PriceMonitor::restore(monitor, Box::new(self.config.risk_model));
        self.equity_shares = EquityShares::restore(equity);
        self.auction = AuctionState::restore(auction);
        self.fee_splitter = FeeSplitter::restore(splitter);
        self.pap = pap.map(ProtocolAutomatedPurchase::restore);
        self.stop_orders = StopOrders::restore(stops);
        info!(market = %market, payloads = payloads.len(), "market state restored from snapshot");
        Ok(())
    }
}
