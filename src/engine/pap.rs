//! Protocol automated purchase: the market side of the program.
//!
//! Oracle callbacks arrive through the [`PapInbox`] and are handled here on
//! tick, so the program only ever changes on the market's single writer. A
//! round is: a volume snapshot earmarks funds in the source network account,
//! the auction schedule places one network GFA order in a dedicated auction,
//! and once that order leaves the book whatever the network party holds is
//! swept back into the network accounts.

use super::core::{fatal, SpotMarket};
use super::results::MarketError;
use crate::collateral::{AccountKey, TransferType};
use crate::events::{AutomatedPurchaseAnnouncedEvent, EventPayload};
use crate::order::{Order, OrderStatus, OrderType, TimeInForce};
use crate::pap::{AutomatedPurchaseConfig, PapCommand, PapError, PapInbox, ProtocolAutomatedPurchase};
use crate::types::{AssetId, PartyId, Side};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

impl SpotMarket {
    /// Installs a program. Fails while another one is still running.
    pub fn new_protocol_automated_purchase(&mut self, config: AutomatedPurchaseConfig) -> Result<(), MarketError> {
        if let Some(existing) = &self.pap {
            if !existing.can_be_discarded() {
                return Err(PapError::AlreadyRunning(existing.id().to_string()).into());
            }
        }
        let pap = ProtocolAutomatedPurchase::new(config, &self.config.base_asset, &self.config.quote_asset)?;
        info!(market = %self.config.market_id, id = pap.id(), side = ?pap.side(), "automated purchase program installed");
        self.pap = Some(pap);
        Ok(())
    }

    /// Queue oracle callbacks are pushed into. Safe to hand to other threads.
    pub fn pap_inbox(&self) -> PapInbox {
        self.pap_inbox.clone()
    }

    pub fn automated_purchase(&self) -> Option<&ProtocolAutomatedPurchase> {
        self.pap.as_ref()
    }

    /// Stops the program. A round already on the book finishes first.
    pub fn stop_protocol_automated_purchase(&mut self) -> Result<(), MarketError> {
        if self.pap.is_none() {
            return Err(PapError::NoProgram.into());
        }
        self.stop_pap();
        self.check_pap();
        Ok(())
    }

    pub(super) fn drain_pap_inbox(&mut self) {
        for command in self.pap_inbox.drain() {
            if self.pap.is_none() {
                debug!(market = %self.config.market_id, ?command, "automated purchase command without a program");
                continue;
            }
            match command {
                PapCommand::OraclePrice { price, published_at } => {
                    if let Some(pap) = self.pap.as_mut() {
                        pap.on_oracle_price(price, published_at);
                    }
                }
                PapCommand::VolumeSnapshot => self.pap_volume_snapshot(),
                PapCommand::AuctionSchedule => self.pap_auction_schedule(),
                PapCommand::Stop => self.stop_pap(),
            }
        }
    }

    /// Earmarks the next round's amount, replacing any stale earmark.
    fn pap_volume_snapshot(&mut self) {
        let Some(pap) = self.pap.as_mut() else {
            return;
        };
        if pap.is_ready_to_stop() || pap.active_order().is_some() {
            return;
        }
        let cfg = pap.config().clone();
        if let Some(stale) = pap.take_next_auction_amount() {
            if let Err(e) = self.ledger.unearmark_for_automated_purchase(&cfg.from_asset, cfg.from_account_type, stale) {
                fatal(&self.config.market_id, "failed to release stale automated purchase earmark", e);
            }
        }
        match self
            .ledger
            .earmark_for_automated_purchase(&cfg.from_asset, cfg.from_account_type, cfg.min_auction_size, cfg.max_auction_size)
        {
            Ok(amount) => {
                debug!(market = %self.config.market_id, id = %cfg.id, %amount, "automated purchase amount earmarked");
                if let Some(pap) = self.pap.as_mut() {
                    pap.set_next_auction_amount(amount);
                }
            }
            Err(e) => debug!(market = %self.config.market_id, id = %cfg.id, error = %e, "nothing earmarked for automated purchase"),
        }
    }

    /// Places the round's order. The earmark is always released, whether the
    /// order went out or not.
    fn pap_auction_schedule(&mut self) {
        let Some(amount) = self.pap.as_mut().and_then(|p| p.take_next_auction_amount()) else {
            debug!(market = %self.config.market_id, "automated purchase auction scheduled with nothing earmarked");
            return;
        };
        let placed = self.place_pap_order(amount);

        let Some(pap) = self.pap.as_ref() else {
            return;
        };
        let cfg = pap.config().clone();
        if let Err(e) = self.ledger.unearmark_for_automated_purchase(&cfg.from_asset, cfg.from_account_type, amount) {
            fatal(&self.config.market_id, "failed to release automated purchase earmark", e);
        }
        if let Err(e) = placed {
            warn!(market = %self.config.market_id, id = %cfg.id, error = %e, "automated purchase order not placed");
        }
    }

    fn place_pap_order(&mut self, amount: Decimal) -> Result<(), PapError> {
        if self.auction.in_auction() {
            return Err(PapError::MarketInAuction);
        }
        let pap = self.pap.as_ref().ok_or(PapError::NoProgram)?;
        if let Some(active) = pap.active_order() {
            return Err(PapError::OrderAlreadyActive(active.clone()));
        }
        let now = self.current_time;
        let price = pap.order_price(now)?;
        let asset_price = self.scaling.to_asset_price(price).ok_or(PapError::PriceOutOfRange(price))?;
        let size = pap.order_size(amount, asset_price, &self.scaling, self.fee.factors().purchase_fee_factor())?;
        let cfg = pap.config().clone();
        let side = pap.side();
        let order_id = pap.order_id();
        let network = PartyId::network();
        let (size, required) = self.fit_pap_order(&network, side, asset_price, size, amount)?;

        let source = AccountKey::network(&cfg.from_asset, cfg.from_account_type);
        let movement = self.ledger.move_between(
            &source,
            &AccountKey::general(&network, &cfg.from_asset),
            amount,
            TransferType::AutomatedPurchase,
        )?;
        self.emit_movements(vec![movement]);
        if let Err(e) = self.ledger.party_has_sufficient_balance(&network, &cfg.from_asset, required) {
            self.sweep_network_balance(&cfg.from_asset, &source);
            return Err(e.into());
        }
        let other = self.asset_for_side(side.opposite()).clone();
        self.ledger.create_party_general_account(&network, &other);

        self.auction.start_automated_purchase_auction(now, cfg.auction_duration_secs);
        self.enter_auction();

        let mut order = Order {
            id: order_id.clone(),
            market_id: self.config.market_id.clone(),
            party: network,
            side,
            price: asset_price,
            original_price: price,
            size,
            remaining: size,
            time_in_force: TimeInForce::GFA,
            order_type: OrderType::Network,
            status: OrderStatus::Active,
            reason: None,
            created_at: now,
            updated_at: None,
            expires_at: None,
            version: 1,
            batch_id: 0,
            pegged: None,
            iceberg: None,
            post_only: false,
        };
        self.transfer_to_holding_account(&order);
        let conf = match self.book.submit_order(&mut order) {
            Ok(conf) => conf,
            Err(e) => fatal(&self.config.market_id, "matching book refused the automated purchase order", e),
        };
        self.emit_order_updated(&conf.order);
        if let Some(pap) = self.pap.as_mut() {
            pap.set_active_order(order_id.clone());
        }
        info!(market = %self.config.market_id, id = %cfg.id, side = ?side, size, %price, "automated purchase order placed");
        self.emit_event(EventPayload::AutomatedPurchaseAnnounced(AutomatedPurchaseAnnouncedEvent {
            market_id: self.config.market_id.clone(),
            automated_purchase_id: cfg.id,
            from_asset: cfg.from_asset,
            side,
            amount,
            size,
            price,
            order_id,
        }));
        Ok(())
    }

    /// Largest size up to `size` whose holding, auction fee included, fits in
    /// `amount`. Returns the size and what it holds.
    fn fit_pap_order(&self, party: &PartyId, side: Side, price: Decimal, mut size: u64, amount: Decimal) -> Result<(u64, Decimal), PapError> {
        while size > 0 {
            let quantity = self.amount_by_side(side, price, size).ok_or(PapError::ZeroSize(amount))?;
            let fee = match side {
                Side::Buy => self.calculate_auction_fees(party, size, price, side)?,
                Side::Sell => Decimal::ZERO,
            };
            let required = quantity + fee;
            if required <= amount {
                return Ok((size, required));
            }
            // fee rounding overshoots by a few units at most
            size -= 1;
        }
        Err(PapError::ZeroSize(amount))
    }

    fn stop_pap(&mut self) {
        let Some(pap) = self.pap.as_mut() else {
            return;
        };
        let cfg = pap.config().clone();
        if let Some(pending) = pap.stop() {
            if let Err(e) = self.ledger.unearmark_for_automated_purchase(&cfg.from_asset, cfg.from_account_type, pending) {
                fatal(&self.config.market_id, "failed to release automated purchase earmark on stop", e);
            }
        }
        info!(market = %self.config.market_id, id = %cfg.id, "automated purchase program stopping");
    }

    /// End of round bookkeeping: expiry, sweeping the network's proceeds once
    /// the order has left the book, and discarding a stopped program.
    pub(super) fn check_pap(&mut self) {
        let now = self.current_time;
        if self.pap.as_ref().is_some_and(|p| p.is_expired(now) && !p.is_ready_to_stop()) {
            self.stop_pap();
        }

        let Some(pap) = self.pap.as_ref() else {
            return;
        };
        if let Some(order_id) = pap.active_order() {
            if self.book.get_order_by_id(order_id).is_some() {
                return;
            }
            let cfg = pap.config().clone();
            let other = self.asset_for_side(pap.side().opposite()).clone();
            self.sweep_network_balance(&cfg.from_asset, &AccountKey::network(&cfg.from_asset, cfg.from_account_type));
            self.sweep_network_balance(&other, &AccountKey::network(&other, cfg.to_account_type));
            if let Some(pap) = self.pap.as_mut() {
                pap.clear_active_order();
            }
            debug!(market = %self.config.market_id, id = %cfg.id, "automated purchase round settled");
        }

        if self.pap.as_ref().is_some_and(|p| p.can_be_discarded()) {
            info!(market = %self.config.market_id, "automated purchase program discarded");
            self.pap = None;
        }
    }

    fn sweep_network_balance(&mut self, asset: &AssetId, to: &AccountKey) {
        let from = AccountKey::general(&PartyId::network(), asset);
        let balance = self.ledger.balance(&from);
        if balance <= Decimal::ZERO {
            return;
        }
        match self.ledger.move_between(&from, to, balance, TransferType::AutomatedPurchase) {
            Ok(movement) => self.emit_movements(vec![movement]),
            Err(e) => fatal(&self.config.market_id, "failed to sweep automated purchase proceeds", e),
        }
    }
}
