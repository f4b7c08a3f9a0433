//! Matching Engine
//!
//! Discovers crossing or price-equal pairs per contract, executes trades
//! through the store's atomic transaction, and drives the quantity
//! confirmation protocol when quantities disagree.
//!
//! Two triggers run concurrently: a periodic pass over every contract with
//! live orders, and on-demand passes the order service requests after each
//! write. A per-contract async mutex serializes trade execution within a
//! contract while passes over different contracts proceed in parallel.
//! Everything the engine plans from may be a cached snapshot; the trade
//! transaction re-reads and re-validates the rows before committing, so a
//! stale plan aborts harmlessly.

use dashmap::DashMap;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::book::{ContractBook, MatchPlan};
use super::confirmation::{ConfirmationManager, PendingConfirmation, ConfirmationState};
use super::inbound::parse_reply;
use super::types::{pair_key, MatchingConfig, MatchingError, PartyRole};
use crate::cache::CacheManager;
use crate::db::{ExecutedTrade, Store, StoreError};
use crate::events::{
    ConfirmationOutcome, ConfirmationRequest, FillKind, MarketEvent, MarketUpdate,
    OrderFillNotice, TradeEvent, TradeSide,
};
use crate::models::{ContractId, Order, OrderResponse};
use crate::services::market::MarketDataService;
use crate::services::messaging::MessageSink;
use crate::websocket::SessionFanOut;

struct MirrorEntry {
    taken_at: Instant,
    orders: Vec<Order>,
}

pub struct MatchingEngine {
    store: Store,
    cache: Arc<CacheManager>,
    fanout: Arc<SessionFanOut>,
    market: Arc<MarketDataService>,
    sink: Arc<dyn MessageSink>,
    confirmations: ConfirmationManager,
    contract_locks: DashMap<ContractId, Arc<Mutex<()>>>,
    mirror: DashMap<ContractId, MirrorEntry>,
    /// Last best-price pair an alert was sent for, per (contract, order).
    alert_marks: DashMap<(ContractId, Uuid), (Decimal, Decimal)>,
    config: MatchingConfig,
}

impl MatchingEngine {
    pub fn new(
        store: Store,
        cache: Arc<CacheManager>,
        fanout: Arc<SessionFanOut>,
        market: Arc<MarketDataService>,
        sink: Arc<dyn MessageSink>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            store,
            cache,
            fanout,
            market,
            sink,
            confirmations: ConfirmationManager::new(),
            contract_locks: DashMap::new(),
            mirror: DashMap::new(),
            alert_marks: DashMap::new(),
            config,
        }
    }

    /// Spawn the periodic matching loop. Each pass is capped to a
    /// wall-clock budget; an over-budget pass simply resumes next tick.
    pub fn start(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(engine.config.interval_secs.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::info!(
                "Matching loop started (every {}s, budget {}s)",
                engine.config.interval_secs,
                engine.config.pass_budget_secs
            );

            loop {
                interval.tick().await;
                let budget = Duration::from_secs(engine.config.pass_budget_secs.max(1));
                if tokio::time::timeout(budget, engine.run_pass()).await.is_err() {
                    tracing::warn!(
                        "Match pass exceeded its {}s budget, resuming next tick",
                        engine.config.pass_budget_secs
                    );
                }
            }
        });
    }

    /// One full periodic pass: expiry sweep, activity check, then a match
    /// pass per contract, contracts in parallel.
    async fn run_pass(self: &Arc<Self>) {
        let active = match self.cache_flag_or_store().await {
            Ok(active) => active,
            Err(e) => {
                tracing::error!("Failed to check for active orders: {}", e);
                return;
            }
        };
        if !active {
            if let Some(market) = self.cache.market_opt() {
                market.record_match_pass().await;
            }
            return;
        }

        self.sweep_expired().await;

        match self.store.active_contracts().await {
            Ok(contracts) => {
                let passes = contracts
                    .into_iter()
                    .map(|contract| {
                        let engine = Arc::clone(self);
                        async move { engine.match_contract(&contract).await }
                    })
                    .collect::<Vec<_>>();
                join_all(passes).await;
            }
            Err(e) => tracing::error!("Failed to list active contracts: {}", e),
        }

        if let Some(market) = self.cache.market_opt() {
            market.record_match_pass().await;
        }
    }

    async fn cache_flag_or_store(&self) -> Result<bool, StoreError> {
        if let Some(market) = self.cache.market_opt() {
            if let Some(flag) = market.has_active_orders().await {
                return Ok(flag);
            }
        }

        let active = self.store.has_active_orders().await?;
        if let Some(market) = self.cache.market_opt() {
            market.set_has_active_orders(active).await;
        }
        Ok(active)
    }

    /// Transition overdue orders to `expired` and tell their owners.
    async fn sweep_expired(self: &Arc<Self>) {
        let expired = match self.store.expire_due_orders().await {
            Ok(expired) => expired,
            Err(e) => {
                tracing::error!("Expiry sweep failed: {}", e);
                return;
            }
        };
        if expired.is_empty() {
            return;
        }

        tracing::info!("Expired {} overdue order(s)", expired.len());

        let mut contracts: Vec<ContractId> = Vec::new();
        for order in &expired {
            self.invalidate_order(order).await;
            if !contracts.contains(&order.contract) {
                contracts.push(order.contract.clone());
            }

            if let Ok(Some(user)) = self.store.get_user(order.owner).await {
                if let Some(address) = &user.messaging_address {
                    let text = format!(
                        "Your {} for {} lots of {} at {} has expired.",
                        order.side, order.remaining_qty, order.contract, order.price
                    );
                    self.sink.send(address, &text).await;
                }
            }
        }

        for contract in contracts {
            if let Ok(orders) = self.store.load_active_orders(&contract).await {
                self.market.refresh(&contract, &orders).await;
                let update = MarketEvent::MarketUpdate(MarketUpdate {
                    contract: contract.clone(),
                    best_bid: orders_best(&orders).0,
                    best_offer: orders_best(&orders).1,
                    timestamp: chrono::Utc::now(),
                });
                self.fanout.dispatch(&update);
                self.cache.publish(&update).await;

                for order in &expired {
                    if order.contract == contract
                        && !orders.iter().any(|o| o.owner == order.owner)
                    {
                        self.fanout.revoke_market_room(order.owner, &contract);
                    }
                }
            }
        }
    }

    /// Request an on-demand pass for one contract; returns immediately.
    pub fn request_match(self: &Arc<Self>, contract: ContractId) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.match_contract(&contract).await;
        });
    }

    fn contract_lock(&self, contract: &ContractId) -> Arc<Mutex<()>> {
        self.contract_locks
            .entry(contract.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Match one contract until the book offers nothing further. At most
    /// one pass executes trades against a contract at a time.
    async fn match_contract(self: &Arc<Self>, contract: &ContractId) {
        let lock = self.contract_lock(contract);
        let _guard = lock.lock().await;

        loop {
            let orders = match self.load_book(contract).await {
                Ok(orders) => orders,
                Err(e) => {
                    tracing::warn!("Could not load book for {}: {}", contract, e);
                    return;
                }
            };

            match ContractBook::from_orders(&orders).plan() {
                MatchPlan::Idle => return,
                MatchPlan::Spread {
                    best_bid,
                    best_offer,
                    fraction,
                } => {
                    self.maybe_alert_spread(contract, &best_bid, &best_offer, fraction)
                        .await;
                    return;
                }
                MatchPlan::Execute { bid, offer, .. } => {
                    if !self.execute_pair(bid.id, offer.id).await {
                        return;
                    }
                    // A trade changed the book; look again.
                }
                MatchPlan::Confirm {
                    bid,
                    offer,
                    smaller_party,
                    smaller_qty,
                    larger_qty,
                } => {
                    self.open_confirmation(contract, &bid, &offer, smaller_party, smaller_qty, larger_qty)
                        .await;
                    return;
                }
            }
        }
    }

    /// Read the contract's live orders through the short-TTL mirror.
    async fn load_book(&self, contract: &ContractId) -> Result<Vec<Order>, StoreError> {
        let ttl = Duration::from_secs(self.config.mirror_ttl_secs);
        if let Some(entry) = self.mirror.get(contract) {
            if entry.taken_at.elapsed() < ttl {
                return Ok(entry.orders.clone());
            }
        }

        let orders = self.store.load_active_orders(contract).await?;
        self.mirror.insert(
            contract.clone(),
            MirrorEntry {
                taken_at: Instant::now(),
                orders: orders.clone(),
            },
        );
        Ok(orders)
    }

    fn invalidate_mirror(&self, contract: &ContractId) {
        self.mirror.remove(contract);
    }

    /// An order materially changed outside the engine (create, update,
    /// cancel). Drops every piece of engine state tied to it.
    pub async fn invalidate_order(&self, order: &Order) {
        self.confirmations.invalidate_order(order.id);
        self.invalidate_mirror(&order.contract);
        self.alert_marks.remove(&(order.contract.clone(), order.id));
    }

    // ==================== Trade Execution ====================

    /// Commit a trade for the pair. Returns whether a trade was executed;
    /// a stale pair is dropped and rediscovered on the next pass.
    async fn execute_pair(self: &Arc<Self>, bid_id: Uuid, offer_id: Uuid) -> bool {
        match self
            .store
            .execute_trade(bid_id, offer_id, self.config.commission_rate)
            .await
        {
            Ok(executed) => {
                self.post_trade(executed).await;
                true
            }
            Err(StoreError::Stale(order, reason)) => {
                tracing::debug!("Abandoning pair: order {} {}", order, reason);
                false
            }
            Err(e) => {
                tracing::error!("Trade transaction failed, retrying next pass: {}", e);
                false
            }
        }
    }

    /// Post-commit notifications. Best-effort: the trade is already
    /// durable, so failures here are logged and never unwound.
    async fn post_trade(self: &Arc<Self>, executed: ExecutedTrade) {
        let ExecutedTrade { trade, bid, offer } = executed;
        let contract = trade.contract.clone();

        self.invalidate_mirror(&contract);
        self.confirmations.invalidate_order(bid.id);
        self.confirmations.invalidate_order(offer.id);
        self.alert_marks.remove(&(contract.clone(), bid.id));
        self.alert_marks.remove(&(contract.clone(), offer.id));

        let fill_kind = if bid.remaining_qty == 0 && offer.remaining_qty == 0 {
            FillKind::FullMatch
        } else if offer.remaining_qty > 0 {
            FillKind::PartialFillBuyer
        } else {
            FillKind::PartialFillSeller
        };

        tracing::info!(
            "Trade executed on {}: {} lots @ {} (commission {}, {:?})",
            contract,
            trade.qty,
            trade.price,
            trade.commission,
            fill_kind
        );

        let live_orders = match self.store.load_active_orders(&contract).await {
            Ok(orders) => orders,
            Err(e) => {
                tracing::warn!("Post-trade refresh failed for {}: {}", contract, e);
                Vec::new()
            }
        };
        self.market.refresh(&contract, &live_orders).await;

        if let Some(market) = self.cache.market_opt() {
            market
                .set_has_active_orders(!live_orders.is_empty())
                .await;
        }

        let event = MarketEvent::TradeExecuted(TradeEvent {
            trade_id: trade.id,
            contract: contract.clone(),
            price: trade.price,
            qty: trade.qty,
            buyer_order: trade.buyer_order,
            seller_order: trade.seller_order,
            buyer: trade.buyer,
            seller: trade.seller,
            commission: trade.commission,
            fill_kind,
            timestamp: trade.created_at,
        });
        self.fanout.dispatch(&event);
        self.cache.publish(&event).await;

        for order in [&bid, &offer] {
            self.notify_fill(order, &trade.contract, trade.qty, trade.price)
                .await;

            if order.remaining_qty == 0 {
                let matched = MarketEvent::OrderMatched(OrderResponse::from(order));
                self.fanout.dispatch(&matched);
                self.cache.publish(&matched).await;

                if !live_orders.iter().any(|o| o.owner == order.owner) {
                    self.fanout.revoke_market_room(order.owner, &contract);
                }
            }
        }
    }

    async fn notify_fill(&self, order: &Order, contract: &ContractId, qty: i64, price: Decimal) {
        let notice = OrderFillNotice {
            order_id: order.id,
            owner: order.owner,
            contract: contract.clone(),
            side: order.side,
            qty,
            price,
            remaining_qty: order.remaining_qty,
        };

        let verb = if order.side.is_buy() { "bought" } else { "sold" };
        let (event, text) = if order.remaining_qty == 0 {
            (
                MarketEvent::OrderFilled(notice),
                format!(
                    "Trade confirmed: {} {} lots of {} at {}. Your order is fully filled.",
                    verb, qty, contract, price
                ),
            )
        } else {
            (
                MarketEvent::OrderPartialFill(notice),
                format!(
                    "Trade confirmed: {} {} lots of {} at {}. Partial fill, {} remaining.",
                    verb, qty, contract, price, order.remaining_qty
                ),
            )
        };

        self.fanout.dispatch(&event);
        self.cache.publish(&event).await;

        if let Ok(Some(user)) = self.store.get_user(order.owner).await {
            if let Some(address) = &user.messaging_address {
                self.sink.send(address, &text).await;
            }
        }
    }

    // ==================== Quantity Confirmation ====================

    async fn open_confirmation(
        self: &Arc<Self>,
        contract: &ContractId,
        bid: &Order,
        offer: &Order,
        smaller_party: PartyRole,
        smaller_qty: i64,
        larger_qty: i64,
    ) {
        let key = pair_key(contract, bid.id, offer.id);
        if self.confirmations.is_declined(&key) {
            return;
        }

        let confirmation = PendingConfirmation {
            key: key.clone(),
            contract: contract.clone(),
            bid_order: bid.id,
            offer_order: offer.id,
            bid_owner: bid.owner,
            offer_owner: offer.owner,
            smaller_party,
            smaller_qty,
            larger_qty,
            price: offer.price,
            state: ConfirmationState::AwaitingSmaller,
            deadline: chrono::Utc::now()
                + chrono::Duration::seconds(self.config.qcsm_deadline_secs as i64),
        };

        if !self.confirmations.try_open(confirmation.clone()) {
            return;
        }

        let smaller_order = match smaller_party {
            PartyRole::Buyer => bid,
            PartyRole::Seller => offer,
        };
        let additional = larger_qty - smaller_qty;
        let short_id = smaller_order.short_id();

        let text = format!(
            "Quantity mismatch on {}: you have {} lots at {} but the counterparty has {} ({} more). \
             Reply YES {} to trade all {} lots, or NO {} to pass. {}s to respond.",
            contract,
            smaller_qty,
            offer.price,
            larger_qty,
            additional,
            short_id,
            larger_qty,
            short_id,
            self.config.qcsm_deadline_secs
        );

        let request = MarketEvent::ConfirmationRequest(ConfirmationRequest {
            recipient: confirmation.smaller_owner(),
            confirmation_key: key.clone(),
            contract: contract.clone(),
            your_order_id: confirmation.smaller_order(),
            counterparty_order_id: confirmation.larger_order(),
            your_qty: smaller_qty,
            counterparty_qty: larger_qty,
            additional_qty: additional,
            price: offer.price,
            side: match smaller_party {
                PartyRole::Buyer => TradeSide::Buy,
                PartyRole::Seller => TradeSide::Sell,
            },
            message: text.clone(),
            deadline_seconds: self.config.qcsm_deadline_secs,
        });
        self.fanout.dispatch(&request);
        self.cache.publish(&request).await;

        if let Ok(Some(user)) = self.store.get_user(confirmation.smaller_owner()).await {
            if let Some(address) = &user.messaging_address {
                self.sink.send(address, &text).await;
            }
        }

        tracing::info!(
            "Opened quantity confirmation {} ({:?} asked to go from {} to {} lots)",
            key,
            smaller_party,
            smaller_qty,
            larger_qty
        );

        let engine = Arc::clone(self);
        let deadline = Duration::from_secs(self.config.qcsm_deadline_secs);
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            engine.handle_deadline(&timer_key).await;
        });
        self.confirmations.register_timer(&key, handle);
    }

    /// Deadline expiry: an implicit decline.
    async fn handle_deadline(self: &Arc<Self>, key: &str) {
        let Some(confirmation) = self.confirmations.expire(key) else {
            return;
        };

        tracing::info!("Quantity confirmation {} timed out", key);
        self.confirmations.mark_declined(key);
        self.notify_no_trade(&confirmation, true).await;
    }

    /// A response arriving over the session channel (or resolved from a
    /// messaging-channel reply). Late or foreign responses surface as
    /// protocol errors to the responder; order state is untouched.
    pub async fn handle_session_response(
        self: &Arc<Self>,
        responder: Uuid,
        key: &str,
        accepted: bool,
        new_qty: Option<i64>,
    ) -> Result<(), MatchingError> {
        let confirmation = self.confirmations.resolve(key, responder, accepted)?;

        if !accepted {
            tracing::info!("Quantity confirmation {} declined", key);
            self.confirmations.mark_declined(key);
            self.notify_no_trade(&confirmation, false).await;
            return Ok(());
        }

        let target_qty = new_qty.unwrap_or(confirmation.larger_qty);

        // Trade commits for a contract are serialized, whichever path
        // triggers them.
        let lock = self.contract_lock(&confirmation.contract);
        let _guard = lock.lock().await;

        // A YES at the current quantity is a no-op on the order; the pair
        // then trades exactly like the equal-quantity case.
        if target_qty != confirmation.smaller_qty {
            let lifted = self
                .store
                .lift_order_qty(confirmation.smaller_order(), target_qty)
                .await?;
            self.invalidate_mirror(&confirmation.contract);

            let updated = MarketEvent::OrderUpdated(OrderResponse::from(&lifted));
            self.fanout.dispatch(&updated);
            self.cache.publish(&updated).await;
        }

        let approval = MarketEvent::PartialFillApproval(ConfirmationOutcome {
            recipient: confirmation.larger_owner(),
            confirmation_key: key.to_string(),
            contract: confirmation.contract.clone(),
            order_id: confirmation.larger_order(),
            message: format!(
                "Counterparty accepted {} lots of {} at {}.",
                target_qty.max(confirmation.smaller_qty),
                confirmation.contract,
                confirmation.price
            ),
        });
        self.fanout.dispatch(&approval);
        self.cache.publish(&approval).await;

        tracing::info!(
            "Quantity confirmation {} accepted at {} lots",
            key,
            target_qty
        );

        self.execute_pair(confirmation.bid_order, confirmation.offer_order)
            .await;
        drop(_guard);

        // The book changed; let a fresh pass look for further pairs.
        self.request_match(confirmation.contract.clone());
        Ok(())
    }

    /// Resolve a free-text messaging reply to a confirmation response.
    pub async fn handle_messaging_reply(
        self: &Arc<Self>,
        sender: Uuid,
        text: &str,
    ) -> Result<(), MatchingError> {
        let reply =
            parse_reply(text).ok_or_else(|| MatchingError::UnparseableReply(text.to_string()))?;

        let key = self
            .confirmations
            .find_key_by_order_prefix(&reply.order_prefix, sender)
            .ok_or_else(|| MatchingError::UnknownConfirmation(reply.order_prefix.clone()))?;

        self.handle_session_response(sender, &key, reply.accepted, None)
            .await
    }

    /// Decline or timeout: no trade is forced; both parties are told and
    /// the pair is not re-examined until one order materially changes.
    async fn notify_no_trade(&self, confirmation: &PendingConfirmation, timed_out: bool) {
        let reason = if timed_out {
            "The confirmation timed out"
        } else {
            "The request was declined"
        };
        let smaller_msg = format!(
            "{}. No trade was executed; your order on {} remains active.",
            reason, confirmation.contract
        );
        let larger_msg = format!(
            "Counterparty declined the quantity adjustment on {}. No trade was executed; your order remains active.",
            confirmation.contract
        );

        let declined = MarketEvent::PartialFillDeclined(ConfirmationOutcome {
            recipient: confirmation.smaller_owner(),
            confirmation_key: confirmation.key.clone(),
            contract: confirmation.contract.clone(),
            order_id: confirmation.smaller_order(),
            message: smaller_msg.clone(),
        });
        let counterparty = MarketEvent::CounterpartyDeclined(ConfirmationOutcome {
            recipient: confirmation.larger_owner(),
            confirmation_key: confirmation.key.clone(),
            contract: confirmation.contract.clone(),
            order_id: confirmation.larger_order(),
            message: larger_msg.clone(),
        });

        for event in [&declined, &counterparty] {
            self.fanout.dispatch(event);
            self.cache.publish(event).await;
        }

        for (owner, text) in [
            (confirmation.smaller_owner(), smaller_msg),
            (confirmation.larger_owner(), larger_msg),
        ] {
            if let Ok(Some(user)) = self.store.get_user(owner).await {
                if let Some(address) = &user.messaging_address {
                    self.sink.send(address, &text).await;
                }
            }
        }
    }

    // ==================== Competitive Bidding Alerts ====================

    /// When the spread is within the alert cap, tell each best-price holder
    /// what edit would trade immediately. At most one alert per (contract,
    /// order) per observed best-price pair.
    async fn maybe_alert_spread(
        &self,
        contract: &ContractId,
        best_bid: &Order,
        best_offer: &Order,
        fraction: Decimal,
    ) {
        if fraction <= Decimal::ZERO || fraction > self.config.spread_alert_cap {
            return;
        }

        let prices = (best_bid.price, best_offer.price);
        let notices = [
            (
                best_bid,
                format!(
                    "Close market on {}: best offer is {} against your bid of {}. \
                     Raising your bid to {} would trade immediately.",
                    contract, best_offer.price, best_bid.price, best_offer.price
                ),
            ),
            (
                best_offer,
                format!(
                    "Close market on {}: best bid is {} against your offer of {}. \
                     Lowering your offer to {} would trade immediately.",
                    contract, best_bid.price, best_offer.price, best_bid.price
                ),
            ),
        ];

        for (order, text) in notices {
            let mark_key = (contract.clone(), order.id);
            let already_sent = self
                .alert_marks
                .get(&mark_key)
                .map(|mark| *mark.value() == prices)
                .unwrap_or(false);
            if already_sent {
                continue;
            }
            self.alert_marks.insert(mark_key, prices);

            if let Ok(Some(user)) = self.store.get_user(order.owner).await {
                if let Some(address) = &user.messaging_address {
                    self.sink.send(address, &text).await;
                }
            }
        }
    }

}

fn orders_best(orders: &[Order]) -> (Option<Decimal>, Option<Decimal>) {
    crate::services::market::best_prices(orders)
}
