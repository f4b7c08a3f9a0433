//! Order Book Service
//!
//! Single writer for order state. Every lifecycle operation validates,
//! commits to the store, then runs the same post-write sequence: engine
//! state invalidation, event publication, market projection refresh (which
//! broadcasts a price change only when a best price moved), and an
//! immediate on-demand match pass for the contract.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::cache::CacheManager;
use crate::db::{AccountSummary, Store, StoreError};
use crate::events::MarketEvent;
use crate::models::{
    ContractId, CreateOrderRequest, Order, OrderResponse, OrderSide, OrderStatus, Trade,
    UpdateOrderRequest,
};
use crate::services::market::MarketDataService;
use crate::services::matching::MatchingEngine;
use crate::websocket::SessionFanOut;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("active order limit reached ({0})")]
    LimitExceeded(i64),

    #[error("order not found")]
    NotFound,

    #[error("order is no longer active")]
    Immutable,

    #[error("store unavailable, try again")]
    Internal(#[from] StoreError),
}

/// One side of a contract's public book.
#[derive(Debug, Clone, Serialize)]
pub struct ContractMarketData {
    pub contract: ContractId,
    pub best_bid: Option<Decimal>,
    pub best_offer: Option<Decimal>,
    pub bids: Vec<OrderResponse>,
    pub offers: Vec<OrderResponse>,
}

/// One aggregated price level of a contract's book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepthLevel {
    pub price: Decimal,
    pub qty: i64,
    pub orders: usize,
}

/// Aggregated depth view of one contract.
#[derive(Debug, Clone, Serialize)]
pub struct ContractDepth {
    pub contract: ContractId,
    pub bids: Vec<DepthLevel>,
    pub offers: Vec<DepthLevel>,
}

/// Collapse live orders of one side into price levels. Bids descend,
/// offers ascend; quantities are summed per level.
fn aggregate_levels(orders: &[Order], side: OrderSide) -> Vec<DepthLevel> {
    let mut levels: Vec<DepthLevel> = Vec::new();
    let mut sorted: Vec<&Order> = orders
        .iter()
        .filter(|o| o.is_live() && o.side == side)
        .collect();
    sorted.sort_by(|a, b| match side {
        OrderSide::Bid => b.price.cmp(&a.price),
        OrderSide::Offer => a.price.cmp(&b.price),
    });

    for order in sorted {
        match levels.last_mut() {
            Some(level) if level.price == order.price => {
                level.qty += order.remaining_qty;
                level.orders += 1;
            }
            _ => levels.push(DepthLevel {
                price: order.price,
                qty: order.remaining_qty,
                orders: 1,
            }),
        }
    }
    levels
}

pub struct OrderBookService {
    store: Store,
    cache: Arc<CacheManager>,
    fanout: Arc<SessionFanOut>,
    market: Arc<MarketDataService>,
    engine: Arc<MatchingEngine>,
    max_orders_per_user: i64,
    order_expiry_hours: i64,
}

impl OrderBookService {
    pub fn new(
        store: Store,
        cache: Arc<CacheManager>,
        fanout: Arc<SessionFanOut>,
        market: Arc<MarketDataService>,
        engine: Arc<MatchingEngine>,
        max_orders_per_user: i64,
        order_expiry_hours: i64,
    ) -> Self {
        Self {
            store,
            cache,
            fanout,
            market,
            engine,
            max_orders_per_user,
            order_expiry_hours,
        }
    }

    // ==================== Lifecycle Operations ====================

    pub async fn create_order(
        &self,
        owner: Uuid,
        request: CreateOrderRequest,
    ) -> Result<Order, OrderError> {
        request
            .validate()
            .map_err(|e| OrderError::InvalidInput(e.to_string()))?;

        let contract = ContractId::new(&request.monthyear, &request.product)
            .ok_or_else(|| OrderError::InvalidInput("malformed contract identifier".into()))?;

        let now = Utc::now();
        let expires_at = match request.expires_at {
            Some(expiry) if expiry <= now => {
                return Err(OrderError::InvalidInput("expiry must be in the future".into()));
            }
            Some(expiry) => expiry,
            None => now + Duration::hours(self.order_expiry_hours),
        };

        let active = self.store.count_active_orders(owner).await?;
        if active >= self.max_orders_per_user {
            return Err(OrderError::LimitExceeded(self.max_orders_per_user));
        }

        let order = Order {
            id: Uuid::new_v4(),
            owner,
            contract: contract.clone(),
            side: request.side,
            price: request.price,
            original_qty: request.qty,
            remaining_qty: request.qty,
            status: OrderStatus::Active,
            counterparty: None,
            created_at: now,
            updated_at: now,
            expires_at,
        };

        self.store.insert_order(&order).await?;

        tracing::info!(
            "Order {} created: {} {} {} lots of {} @ {}",
            order.id,
            owner,
            order.side,
            order.original_qty,
            contract,
            order.price
        );

        if let Some(market) = self.cache.market_opt() {
            market.set_has_active_orders(true).await;
        }
        self.fanout.grant_market_room(owner, &contract);

        self.after_write(&order, MarketEvent::OrderCreated(OrderResponse::from(&order)))
            .await;

        Ok(order)
    }

    pub async fn update_order(
        &self,
        owner: Uuid,
        order_id: Uuid,
        request: UpdateOrderRequest,
    ) -> Result<Order, OrderError> {
        if request.is_empty() {
            return Err(OrderError::InvalidInput("nothing to update".into()));
        }
        if let Some(price) = request.price {
            if price <= Decimal::ZERO {
                return Err(OrderError::InvalidInput("price must be positive".into()));
            }
        }
        if let Some(qty) = request.qty {
            if qty <= 0 {
                return Err(OrderError::InvalidInput("qty must be positive".into()));
            }
        }
        if let Some(expiry) = request.expires_at {
            if expiry <= Utc::now() {
                return Err(OrderError::InvalidInput("expiry must be in the future".into()));
            }
        }

        let existing = self
            .store
            .fetch_order(order_id)
            .await?
            .filter(|o| o.owner == owner)
            .ok_or(OrderError::NotFound)?;
        if existing.status.is_terminal() {
            return Err(OrderError::Immutable);
        }
        if request.qty.is_some() && existing.remaining_qty != existing.original_qty {
            return Err(OrderError::InvalidInput(
                "quantity cannot change after fills have occurred".into(),
            ));
        }

        let updated = self
            .store
            .update_order(order_id, owner, request.price, request.qty, request.expires_at)
            .await?
            .ok_or(OrderError::Immutable)?;

        tracing::info!(
            "Order {} updated: price {} qty {}/{}",
            updated.id,
            updated.price,
            updated.remaining_qty,
            updated.original_qty
        );

        self.after_write(&updated, MarketEvent::OrderUpdated(OrderResponse::from(&updated)))
            .await;

        Ok(updated)
    }

    pub async fn cancel_order(&self, owner: Uuid, order_id: Uuid) -> Result<Order, OrderError> {
        let existing = self
            .store
            .fetch_order(order_id)
            .await?
            .filter(|o| o.owner == owner)
            .ok_or(OrderError::NotFound)?;
        if existing.status.is_terminal() {
            return Err(OrderError::Immutable);
        }

        let cancelled = self
            .store
            .cancel_order(order_id, owner)
            .await?
            .ok_or(OrderError::Immutable)?;

        tracing::info!("Order {} cancelled by {}", cancelled.id, owner);

        self.after_write(
            &cancelled,
            MarketEvent::OrderCancelled(OrderResponse::from(&cancelled)),
        )
        .await;

        Ok(cancelled)
    }

    /// Shared post-write sequence. The store commit has already happened;
    /// everything here is best-effort fan-out and cache maintenance.
    async fn after_write(&self, order: &Order, event: MarketEvent) {
        self.engine.invalidate_order(order).await;

        self.fanout.dispatch(&event);
        self.cache.publish(&event).await;

        match self.store.load_active_orders(&order.contract).await {
            Ok(live) => {
                self.market.refresh(&order.contract, &live).await;

                if !live.iter().any(|o| o.owner == order.owner) {
                    self.fanout.revoke_market_room(order.owner, &order.contract);
                }
            }
            Err(e) => {
                tracing::warn!("Post-write refresh failed for {}: {}", order.contract, e);
            }
        }

        self.engine.request_match(order.contract.clone());
    }

    // ==================== Read Views ====================

    pub async fn get_user_orders(&self, owner: Uuid) -> Result<Vec<Order>, OrderError> {
        Ok(self.store.user_orders(owner).await?)
    }

    /// Public market data: every contract with live orders, bids sorted
    /// price-descending then oldest-first, offers price-ascending then
    /// oldest-first. Dead orders never appear.
    pub async fn get_market_data(&self) -> Result<Vec<ContractMarketData>, OrderError> {
        let contracts = self.store.active_contracts().await?;

        let mut result = Vec::with_capacity(contracts.len());
        for contract in contracts {
            result.push(self.get_contract_market_data(&contract).await?);
        }
        result.sort_by(|a, b| a.contract.as_str().cmp(b.contract.as_str()));
        Ok(result)
    }

    pub async fn get_contract_market_data(
        &self,
        contract: &ContractId,
    ) -> Result<ContractMarketData, OrderError> {
        // Cache first, store on a miss.
        let orders = match self.cache.market_opt() {
            Some(market) => match market.get_orderbook(contract).await {
                Some(orders) => orders,
                None => self.store.load_active_orders(contract).await?,
            },
            None => self.store.load_active_orders(contract).await?,
        };

        let live: Vec<&Order> = orders.iter().filter(|o| o.is_live()).collect();

        let mut bids: Vec<&Order> = live
            .iter()
            .copied()
            .filter(|o| o.side == OrderSide::Bid)
            .collect();
        bids.sort_by(|a, b| {
            b.price
                .cmp(&a.price)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        let mut offers: Vec<&Order> = live
            .iter()
            .copied()
            .filter(|o| o.side == OrderSide::Offer)
            .collect();
        offers.sort_by(|a, b| {
            a.price
                .cmp(&b.price)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        Ok(ContractMarketData {
            contract: contract.clone(),
            best_bid: bids.first().map(|o| o.price),
            best_offer: offers.first().map(|o| o.price),
            bids: bids.into_iter().map(OrderResponse::from).collect(),
            offers: offers.into_iter().map(OrderResponse::from).collect(),
        })
    }

    /// Aggregated per-price-level view of one contract.
    pub async fn get_contract_depth(
        &self,
        contract: &ContractId,
    ) -> Result<ContractDepth, OrderError> {
        let orders = match self.cache.market_opt() {
            Some(market) => match market.get_orderbook(contract).await {
                Some(orders) => orders,
                None => self.store.load_active_orders(contract).await?,
            },
            None => self.store.load_active_orders(contract).await?,
        };

        Ok(ContractDepth {
            contract: contract.clone(),
            bids: aggregate_levels(&orders, OrderSide::Bid),
            offers: aggregate_levels(&orders, OrderSide::Offer),
        })
    }

    pub async fn get_recent_trades(&self, limit: i64) -> Result<Vec<Trade>, OrderError> {
        Ok(self.store.recent_trades(limit).await?)
    }

    pub async fn get_user_trades(&self, owner: Uuid, limit: i64) -> Result<Vec<Trade>, OrderError> {
        Ok(self.store.user_trades(owner, limit).await?)
    }

    pub async fn get_account_summary(&self, owner: Uuid) -> Result<AccountSummary, OrderError> {
        Ok(self.store.account_summary(owner).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(side: OrderSide, price: Decimal, remaining: i64) -> Order {
        Order {
            id: Uuid::new_v4(),
            owner: Uuid::new_v4(),
            contract: ContractId::parse("jan26-silver").unwrap(),
            side,
            price,
            original_qty: remaining.max(1),
            remaining_qty: remaining,
            status: OrderStatus::Active,
            counterparty: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(24),
        }
    }

    #[test]
    fn test_depth_aggregates_per_price_level() {
        let orders = vec![
            order(OrderSide::Bid, dec!(100.0), 10),
            order(OrderSide::Bid, dec!(100.0), 5),
            order(OrderSide::Bid, dec!(99.0), 7),
            order(OrderSide::Offer, dec!(101.0), 3),
        ];

        let bids = aggregate_levels(&orders, OrderSide::Bid);
        assert_eq!(
            bids,
            vec![
                DepthLevel { price: dec!(100.0), qty: 15, orders: 2 },
                DepthLevel { price: dec!(99.0), qty: 7, orders: 1 },
            ]
        );

        let offers = aggregate_levels(&orders, OrderSide::Offer);
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].qty, 3);
    }

    #[test]
    fn test_depth_excludes_dead_orders() {
        let mut cancelled = order(OrderSide::Bid, dec!(100.0), 10);
        cancelled.status = OrderStatus::Cancelled;
        let mut drained = order(OrderSide::Bid, dec!(100.0), 0);
        drained.status = OrderStatus::Matched;

        let orders = vec![cancelled, drained, order(OrderSide::Bid, dec!(98.0), 4)];
        let bids = aggregate_levels(&orders, OrderSide::Bid);

        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].price, dec!(98.0));
    }

    #[test]
    fn test_offer_levels_ascend() {
        let orders = vec![
            order(OrderSide::Offer, dec!(103.0), 1),
            order(OrderSide::Offer, dec!(101.0), 1),
            order(OrderSide::Offer, dec!(102.0), 1),
        ];

        let prices: Vec<Decimal> = aggregate_levels(&orders, OrderSide::Offer)
            .into_iter()
            .map(|l| l.price)
            .collect();
        assert_eq!(prices, vec![dec!(101.0), dec!(102.0), dec!(103.0)]);
    }
}
