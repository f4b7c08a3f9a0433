//! Market event definitions
//!
//! Every notification the core emits is one variant of [`MarketEvent`], so
//! event producers and consumers cannot drift apart: adding a variant forces
//! every dispatch site to handle it. On the wire each event is wrapped in
//! the `{type, data, timestamp}` envelope shared by the cache bus and the
//! session bus.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ContractId, OrderResponse, OrderSide};

/// How a trade settled relative to the two orders' quantities. Carried for
/// consumers; it does not alter settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillKind {
    FullMatch,
    PartialFillBuyer,
    PartialFillSeller,
}

/// Trade notification payload, persisted fields plus the fill label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub trade_id: Uuid,
    pub contract: ContractId,
    pub price: Decimal,
    pub qty: i64,
    pub buyer_order: Uuid,
    pub seller_order: Uuid,
    pub buyer: Uuid,
    pub seller: Uuid,
    pub commission: Decimal,
    pub fill_kind: FillKind,
    pub timestamp: DateTime<Utc>,
}

/// Per-owner fill notice (`order:filled` when the order is exhausted,
/// `order:partial_fill` otherwise).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFillNotice {
    pub order_id: Uuid,
    pub owner: Uuid,
    pub contract: ContractId,
    pub side: OrderSide,
    pub qty: i64,
    pub price: Decimal,
    pub remaining_qty: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PriceChangeKind {
    pub bid_changed: bool,
    pub offer_changed: bool,
}

/// Emitted only when a contract's best bid or best offer actually moved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestPriceChange {
    pub contract: ContractId,
    pub best_bid: Option<Decimal>,
    pub best_offer: Option<Decimal>,
    pub previous_best_bid: Option<Decimal>,
    pub previous_best_offer: Option<Decimal>,
    pub change_type: PriceChangeKind,
    pub timestamp: DateTime<Utc>,
}

/// Best-price snapshot broadcast on bulk refreshes (`market:update`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketUpdate {
    pub contract: ContractId,
    pub best_bid: Option<Decimal>,
    pub best_offer: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// Sent to the smaller party of a price-equal quantity mismatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub recipient: Uuid,
    pub confirmation_key: String,
    pub contract: ContractId,
    pub your_order_id: Uuid,
    pub counterparty_order_id: Uuid,
    pub your_qty: i64,
    pub counterparty_qty: i64,
    pub additional_qty: i64,
    pub price: Decimal,
    pub side: TradeSide,
    pub message: String,
    pub deadline_seconds: u64,
}

/// BUY/SELL from the recipient's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Terminal outcome of a confirmation, addressed to one involved party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationOutcome {
    pub recipient: Uuid,
    pub confirmation_key: String,
    pub contract: ContractId,
    pub order_id: Uuid,
    pub message: String,
}

/// Turn notification in a counter-offer negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationTurn {
    pub recipient: Uuid,
    pub key: String,
    pub contract: ContractId,
    pub message: String,
    pub deadline_seconds: u64,
}

/// The closed set of events the core publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
    OrderCreated(OrderResponse),
    OrderUpdated(OrderResponse),
    OrderCancelled(OrderResponse),
    OrderMatched(OrderResponse),
    OrderFilled(OrderFillNotice),
    OrderPartialFill(OrderFillNotice),
    TradeExecuted(TradeEvent),
    MarketUpdate(MarketUpdate),
    PriceChanged(BestPriceChange),
    ConfirmationRequest(ConfirmationRequest),
    PartialFillApproval(ConfirmationOutcome),
    PartialFillDeclined(ConfirmationOutcome),
    CounterpartyDeclined(ConfirmationOutcome),
    NegotiationYourTurn(NegotiationTurn),
}

impl MarketEvent {
    /// Canonical wire tag for the envelope and the pub/sub channel name.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketEvent::OrderCreated(_) => "order:created",
            MarketEvent::OrderUpdated(_) => "order:updated",
            MarketEvent::OrderCancelled(_) => "order:cancelled",
            MarketEvent::OrderMatched(_) => "order:matched",
            MarketEvent::OrderFilled(_) => "order:filled",
            MarketEvent::OrderPartialFill(_) => "order:partial_fill",
            MarketEvent::TradeExecuted(_) => "trade:executed",
            MarketEvent::MarketUpdate(_) => "market:update",
            MarketEvent::PriceChanged(_) => "market:price_changed",
            MarketEvent::ConfirmationRequest(_) => "quantity:confirmation_request",
            MarketEvent::PartialFillApproval(_) => "quantity:partial_fill_approval",
            MarketEvent::PartialFillDeclined(_) => "quantity:partial_fill_declined",
            MarketEvent::CounterpartyDeclined(_) => "quantity:counterparty_declined",
            MarketEvent::NegotiationYourTurn(_) => "negotiation:your_turn",
        }
    }

    /// Wrap into the `{type, data, timestamp}` wire envelope.
    pub fn envelope(&self) -> EventEnvelope {
        let data = match self {
            MarketEvent::OrderCreated(p)
            | MarketEvent::OrderUpdated(p)
            | MarketEvent::OrderCancelled(p)
            | MarketEvent::OrderMatched(p) => serde_json::to_value(p),
            MarketEvent::OrderFilled(p) | MarketEvent::OrderPartialFill(p) => {
                serde_json::to_value(p)
            }
            MarketEvent::TradeExecuted(p) => serde_json::to_value(p),
            MarketEvent::MarketUpdate(p) => serde_json::to_value(p),
            MarketEvent::PriceChanged(p) => serde_json::to_value(p),
            MarketEvent::ConfirmationRequest(p) => serde_json::to_value(p),
            MarketEvent::PartialFillApproval(p)
            | MarketEvent::PartialFillDeclined(p)
            | MarketEvent::CounterpartyDeclined(p) => serde_json::to_value(p),
            MarketEvent::NegotiationYourTurn(p) => serde_json::to_value(p),
        };

        EventEnvelope {
            r#type: self.kind().to_string(),
            data: data.unwrap_or(serde_json::Value::Null),
            timestamp: Utc::now(),
        }
    }
}

/// JSON envelope shared by the cache bus and the session bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub r#type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_envelope_tag_matches_variant() {
        let change = BestPriceChange {
            contract: ContractId::parse("jan26-silver").unwrap(),
            best_bid: Some(dec!(100.0)),
            best_offer: None,
            previous_best_bid: None,
            previous_best_offer: None,
            change_type: PriceChangeKind {
                bid_changed: true,
                offer_changed: false,
            },
            timestamp: Utc::now(),
        };

        let event = MarketEvent::PriceChanged(change);
        let envelope = event.envelope();

        assert_eq!(envelope.r#type, "market:price_changed");
        assert_eq!(envelope.data["contract"], "jan26-silver");
        assert_eq!(envelope.data["change_type"]["bid_changed"], true);
    }

    #[test]
    fn test_fill_kind_wire_format() {
        let json = serde_json::to_string(&FillKind::PartialFillBuyer).unwrap();
        assert_eq!(json, "\"PARTIAL_FILL_BUYER\"");
    }
}
