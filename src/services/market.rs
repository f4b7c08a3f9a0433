//! Market Data Service
//!
//! Owns the per-contract best-price snapshots and the cached order-book
//! projections. Every write path (order lifecycle or trade) hands the fresh
//! set of live orders to [`MarketDataService::refresh`]; a
//! `market:price_changed` broadcast goes out only when the best bid or best
//! offer actually moved. The in-process snapshot is the comparison source;
//! the cache copy exists for lookups and survives on a TTL.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::cache::CacheManager;
use crate::events::{BestPriceChange, MarketEvent, PriceChangeKind};
use crate::models::{ContractId, Order, OrderSide};
use crate::websocket::SessionFanOut;

/// Best prices over a set of live orders: highest bid, lowest offer.
pub fn best_prices(orders: &[Order]) -> (Option<Decimal>, Option<Decimal>) {
    let best_bid = orders
        .iter()
        .filter(|o| o.is_live() && o.side == OrderSide::Bid)
        .map(|o| o.price)
        .max();
    let best_offer = orders
        .iter()
        .filter(|o| o.is_live() && o.side == OrderSide::Offer)
        .map(|o| o.price)
        .min();
    (best_bid, best_offer)
}

pub struct MarketDataService {
    cache: Arc<CacheManager>,
    fanout: Arc<SessionFanOut>,
    snapshots: DashMap<ContractId, (Option<Decimal>, Option<Decimal>)>,
}

impl MarketDataService {
    pub fn new(cache: Arc<CacheManager>, fanout: Arc<SessionFanOut>) -> Self {
        Self {
            cache,
            fanout,
            snapshots: DashMap::new(),
        }
    }

    pub fn snapshot(&self, contract: &ContractId) -> (Option<Decimal>, Option<Decimal>) {
        self.snapshots
            .get(contract)
            .map(|entry| *entry.value())
            .unwrap_or((None, None))
    }

    /// Refresh projections for a contract after a mutation and broadcast a
    /// price change when one happened. Returns the change, if any.
    pub async fn refresh(
        &self,
        contract: &ContractId,
        live_orders: &[Order],
    ) -> Option<BestPriceChange> {
        let (best_bid, best_offer) = best_prices(live_orders);

        if let Some(market) = self.cache.market_opt() {
            market.set_orderbook(contract, live_orders).await;
            market.set_best_prices(contract, best_bid, best_offer).await;
        }

        let (previous_bid, previous_offer) = self
            .snapshots
            .insert(contract.clone(), (best_bid, best_offer))
            .unwrap_or((None, None));

        let change_type = PriceChangeKind {
            bid_changed: previous_bid != best_bid,
            offer_changed: previous_offer != best_offer,
        };
        if !change_type.bid_changed && !change_type.offer_changed {
            return None;
        }

        let change = BestPriceChange {
            contract: contract.clone(),
            best_bid,
            best_offer,
            previous_best_bid: previous_bid,
            previous_best_offer: previous_offer,
            change_type,
            timestamp: chrono::Utc::now(),
        };

        let event = MarketEvent::PriceChanged(change.clone());
        self.fanout.dispatch(&event);
        self.cache.publish(&event).await;

        tracing::debug!(
            "Best prices moved for {}: bid {:?} -> {:?}, offer {:?} -> {:?}",
            contract,
            previous_bid,
            best_bid,
            previous_offer,
            best_offer
        );

        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use crate::websocket::RoomRegistry;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

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
            expires_at: Utc::now() + chrono::Duration::hours(24),
        }
    }

    fn service() -> MarketDataService {
        MarketDataService::new(
            Arc::new(CacheManager::disabled()),
            Arc::new(SessionFanOut::new(Arc::new(RoomRegistry::new()))),
        )
    }

    #[test]
    fn test_best_prices_ignore_dead_orders() {
        let mut matched = order(OrderSide::Bid, dec!(120.0), 0);
        matched.status = OrderStatus::Matched;

        let orders = vec![
            order(OrderSide::Bid, dec!(100.0), 10),
            order(OrderSide::Bid, dec!(101.0), 10),
            matched,
            order(OrderSide::Offer, dec!(103.0), 5),
        ];

        assert_eq!(best_prices(&orders), (Some(dec!(101.0)), Some(dec!(103.0))));
    }

    #[tokio::test]
    async fn test_refresh_emits_only_on_change() {
        let service = service();
        let contract = ContractId::parse("jan26-silver").unwrap();
        let orders = vec![
            order(OrderSide::Bid, dec!(100.0), 10),
            order(OrderSide::Offer, dec!(105.0), 10),
        ];

        let first = service.refresh(&contract, &orders).await;
        assert!(first.is_some());

        // Same book again: no broadcast.
        let second = service.refresh(&contract, &orders).await;
        assert!(second.is_none());

        // A new highest bid moves only the bid side.
        let mut improved = orders.clone();
        improved.push(order(OrderSide::Bid, dec!(102.0), 5));
        let third = service.refresh(&contract, &improved).await.unwrap();
        assert!(third.change_type.bid_changed);
        assert!(!third.change_type.offer_changed);
        assert_eq!(third.best_bid, Some(dec!(102.0)));
        assert_eq!(third.previous_best_bid, Some(dec!(100.0)));
    }

    #[tokio::test]
    async fn test_create_then_cancel_restores_snapshot() {
        let service = service();
        let contract = ContractId::parse("jan26-silver").unwrap();
        let base = vec![order(OrderSide::Bid, dec!(100.0), 10)];
        service.refresh(&contract, &base).await;

        let mut with_new = base.clone();
        with_new.push(order(OrderSide::Bid, dec!(110.0), 5));
        service.refresh(&contract, &with_new).await;

        let restored = service.refresh(&contract, &base).await.unwrap();
        assert_eq!(restored.best_bid, Some(dec!(100.0)));
        assert_eq!(service.snapshot(&contract), (Some(dec!(100.0)), None));
    }
}
