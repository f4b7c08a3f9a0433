//! Session Fan-Out
//!
//! Routes every [`MarketEvent`] to the rooms its kind entitles, and nothing
//! more. The contract-room scoping is the reason sessions are auto-joined:
//! a user only sees a contract's stream while they hold an order in it.
//!
//! Routing matrix:
//!
//! | event | rooms |
//! |---|---|
//! | `order:created` / `order:cancelled` / `order:matched` | owner |
//! | `order:updated` (OFFER) | owner + `market:<contract>` |
//! | `order:updated` (BID) | owner |
//! | `order:filled` / `order:partial_fill` | owner |
//! | `trade:executed` | buyer + seller + `market:<contract>` |
//! | `market:price_changed` | `market:<contract>` |
//! | `market:update` | `market:<contract>` + `admin` |
//! | `quantity:confirmation_request` | smaller party |
//! | `quantity:*` outcomes / `negotiation:your_turn` | addressed party |

use std::sync::Arc;
use uuid::Uuid;

use super::rooms::RoomRegistry;
use crate::events::MarketEvent;
use crate::models::{ContractId, OrderSide};

pub const ADMIN_ROOM: &str = "admin";

pub fn user_room(owner: Uuid) -> String {
    format!("user:{}", owner)
}

pub fn market_room(contract: &ContractId) -> String {
    format!("market:{}", contract)
}

pub struct SessionFanOut {
    rooms: Arc<RoomRegistry>,
}

impl SessionFanOut {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self { rooms }
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    /// Apply the routing matrix to one event.
    pub fn dispatch(&self, event: &MarketEvent) {
        let envelope = event.envelope();

        let mut targets: Vec<String> = Vec::with_capacity(3);
        match event {
            MarketEvent::OrderCreated(order)
            | MarketEvent::OrderCancelled(order)
            | MarketEvent::OrderMatched(order) => {
                targets.push(user_room(order.owner));
            }
            MarketEvent::OrderUpdated(order) => {
                targets.push(user_room(order.owner));
                if order.side == OrderSide::Offer {
                    targets.push(market_room(&order.contract));
                }
            }
            MarketEvent::OrderFilled(notice) | MarketEvent::OrderPartialFill(notice) => {
                targets.push(user_room(notice.owner));
            }
            MarketEvent::TradeExecuted(trade) => {
                targets.push(user_room(trade.buyer));
                targets.push(user_room(trade.seller));
                targets.push(market_room(&trade.contract));
            }
            MarketEvent::PriceChanged(change) => {
                targets.push(market_room(&change.contract));
            }
            MarketEvent::MarketUpdate(update) => {
                targets.push(market_room(&update.contract));
                targets.push(ADMIN_ROOM.to_string());
            }
            MarketEvent::ConfirmationRequest(request) => {
                targets.push(user_room(request.recipient));
            }
            MarketEvent::PartialFillApproval(outcome)
            | MarketEvent::PartialFillDeclined(outcome)
            | MarketEvent::CounterpartyDeclined(outcome) => {
                targets.push(user_room(outcome.recipient));
            }
            MarketEvent::NegotiationYourTurn(turn) => {
                targets.push(user_room(turn.recipient));
            }
        }

        let mut delivered = 0;
        for room in &targets {
            delivered += self.rooms.send_room(room, &envelope);
        }

        tracing::debug!(
            "Dispatched {} to {} room(s), {} session(s)",
            event.kind(),
            targets.len(),
            delivered
        );
    }

    /// Give every connected session of `owner` access to a contract room.
    /// Called when the owner gains a live order in the contract.
    pub fn grant_market_room(&self, owner: Uuid, contract: &ContractId) {
        self.rooms
            .mirror_members(&user_room(owner), &market_room(contract));
    }

    /// Drop every session of `owner` from a contract room. Called when the
    /// owner's last live order in the contract goes away.
    pub fn revoke_market_room(&self, owner: Uuid, contract: &ContractId) {
        let room = market_room(contract);
        for session in self.rooms.sessions_in(&user_room(owner)) {
            self.rooms.leave(&room, session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{
        BestPriceChange, PriceChangeKind, TradeEvent, FillKind,
    };
    use crate::models::{OrderResponse, OrderStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    fn contract(s: &str) -> ContractId {
        ContractId::parse(s).unwrap()
    }

    fn order_response(owner: Uuid, side: OrderSide, contract_id: &str) -> OrderResponse {
        OrderResponse {
            id: Uuid::new_v4(),
            owner,
            side,
            price: dec!(100.0),
            contract: contract(contract_id),
            original_qty: 10,
            remaining_qty: 10,
            status: OrderStatus::Active,
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::hours(24),
        }
    }

    struct Session {
        rx: mpsc::UnboundedReceiver<crate::events::EventEnvelope>,
    }

    impl Session {
        fn received(&mut self) -> Vec<String> {
            let mut kinds = Vec::new();
            while let Ok(envelope) = self.rx.try_recv() {
                kinds.push(envelope.r#type);
            }
            kinds
        }
    }

    fn attach_user(fanout: &SessionFanOut, owner: Uuid, contracts: &[&str]) -> Session {
        let session = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        fanout.rooms().join(&user_room(owner), session, tx.clone());
        for c in contracts {
            fanout.rooms().join(&market_room(&contract(c)), session, tx.clone());
        }
        Session { rx }
    }

    fn fanout() -> SessionFanOut {
        SessionFanOut::new(Arc::new(RoomRegistry::new()))
    }

    #[test]
    fn test_bid_update_stays_private() {
        let fanout = fanout();
        let owner = Uuid::new_v4();
        let mut owner_session = attach_user(&fanout, owner, &[]);
        let mut watcher = attach_user(&fanout, Uuid::new_v4(), &["jan26-silver"]);

        fanout.dispatch(&MarketEvent::OrderUpdated(order_response(
            owner,
            OrderSide::Bid,
            "jan26-silver",
        )));

        assert_eq!(owner_session.received(), vec!["order:updated"]);
        assert!(watcher.received().is_empty());
    }

    #[test]
    fn test_offer_update_reaches_contract_room() {
        let fanout = fanout();
        let owner = Uuid::new_v4();
        let mut owner_session = attach_user(&fanout, owner, &[]);
        let mut watcher = attach_user(&fanout, Uuid::new_v4(), &["jan26-silver"]);

        fanout.dispatch(&MarketEvent::OrderUpdated(order_response(
            owner,
            OrderSide::Offer,
            "jan26-silver",
        )));

        assert_eq!(owner_session.received(), vec!["order:updated"]);
        assert_eq!(watcher.received(), vec!["order:updated"]);
    }

    #[test]
    fn test_price_change_scoped_to_contract_room() {
        let fanout = fanout();
        let mut silver = attach_user(&fanout, Uuid::new_v4(), &["jan26-silver"]);
        let mut wheat = attach_user(&fanout, Uuid::new_v4(), &["dec25-wheat"]);

        fanout.dispatch(&MarketEvent::PriceChanged(BestPriceChange {
            contract: contract("jan26-silver"),
            best_bid: Some(dec!(101.0)),
            best_offer: Some(dec!(102.0)),
            previous_best_bid: Some(dec!(100.0)),
            previous_best_offer: Some(dec!(102.0)),
            change_type: PriceChangeKind {
                bid_changed: true,
                offer_changed: false,
            },
            timestamp: Utc::now(),
        }));

        assert_eq!(silver.received(), vec!["market:price_changed"]);
        assert!(wheat.received().is_empty());
    }

    #[test]
    fn test_trade_reaches_both_parties_and_room() {
        let fanout = fanout();
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let mut buyer_session = attach_user(&fanout, buyer, &[]);
        let mut seller_session = attach_user(&fanout, seller, &[]);
        let mut watcher = attach_user(&fanout, Uuid::new_v4(), &["jan26-silver"]);
        let mut outsider = attach_user(&fanout, Uuid::new_v4(), &["dec25-wheat"]);

        fanout.dispatch(&MarketEvent::TradeExecuted(TradeEvent {
            trade_id: Uuid::new_v4(),
            contract: contract("jan26-silver"),
            price: dec!(100.0),
            qty: 50,
            buyer_order: Uuid::new_v4(),
            seller_order: Uuid::new_v4(),
            buyer,
            seller,
            commission: dec!(5.00),
            fill_kind: FillKind::FullMatch,
            timestamp: Utc::now(),
        }));

        assert_eq!(buyer_session.received(), vec!["trade:executed"]);
        assert_eq!(seller_session.received(), vec!["trade:executed"]);
        assert_eq!(watcher.received(), vec!["trade:executed"]);
        assert!(outsider.received().is_empty());
    }

    #[test]
    fn test_revoke_market_room_on_last_cancel() {
        let fanout = fanout();
        let owner = Uuid::new_v4();
        let mut session = attach_user(&fanout, owner, &["jan26-silver"]);

        fanout.revoke_market_room(owner, &contract("jan26-silver"));
        fanout.dispatch(&MarketEvent::PriceChanged(BestPriceChange {
            contract: contract("jan26-silver"),
            best_bid: None,
            best_offer: None,
            previous_best_bid: Some(dec!(100.0)),
            previous_best_offer: None,
            change_type: PriceChangeKind {
                bid_changed: true,
                offer_changed: false,
            },
            timestamp: Utc::now(),
        }));

        assert!(session.received().is_empty());
    }
}
