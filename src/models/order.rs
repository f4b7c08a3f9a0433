use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::contract::ContractId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Bid,
    Offer,
}

impl OrderSide {
    /// The bid side takes delivery in a trade against this order.
    pub fn is_buy(&self) -> bool {
        matches!(self, OrderSide::Bid)
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Bid => write!(f, "BID"),
            OrderSide::Offer => write!(f, "OFFER"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Active,
    Matched,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// Terminal states are absorbing: no further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Active)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Active => write!(f, "ACTIVE"),
            OrderStatus::Matched => write!(f, "MATCHED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
            OrderStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// A durable order row. `remaining_qty` only ever decreases once fills
/// begin; `price` and `original_qty` are mutable only while the order is
/// active, and `original_qty` only before the first fill.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub owner: Uuid,
    pub contract: ContractId,
    pub side: OrderSide,
    pub price: Decimal,
    pub original_qty: i64,
    pub remaining_qty: i64,
    pub status: OrderStatus,
    pub counterparty: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Order {
    /// Visible to the matcher and to market data consumers.
    pub fn is_live(&self) -> bool {
        self.status == OrderStatus::Active && self.remaining_qty > 0
    }

    /// Short hex prefix used in human-facing confirmation messages.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

fn validate_monthyear(monthyear: &str) -> Result<(), ValidationError> {
    let s = monthyear.trim().to_lowercase();
    let bytes = s.as_bytes();
    let ok = bytes.len() == 5
        && bytes[..3].iter().all(|b| b.is_ascii_lowercase())
        && bytes[3..].iter().all(|b| b.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(ValidationError::new("monthyear"))
    }
}

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price > &Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("price"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub side: OrderSide,
    #[validate(custom = "validate_price")]
    pub price: Decimal,
    #[validate(custom = "validate_monthyear")]
    pub monthyear: String,
    #[validate(length(min = 2))]
    pub product: String,
    #[validate(range(min = 1))]
    pub qty: i64,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOrderRequest {
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub qty: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl UpdateOrderRequest {
    pub fn is_empty(&self) -> bool {
        self.price.is_none() && self.qty.is_none() && self.expires_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub owner: Uuid,
    pub side: OrderSide,
    pub price: Decimal,
    pub contract: ContractId,
    pub original_qty: i64,
    pub remaining_qty: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            owner: order.owner,
            side: order.side,
            price: order.price,
            contract: order.contract.clone(),
            original_qty: order.original_qty,
            remaining_qty: order.remaining_qty,
            status: order.status,
            created_at: order.created_at,
            expires_at: order.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(price: Decimal, qty: i64) -> CreateOrderRequest {
        CreateOrderRequest {
            side: OrderSide::Bid,
            price,
            monthyear: "jan26".to_string(),
            product: "silver".to_string(),
            qty,
            expires_at: None,
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(request(dec!(100.0), 50).validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_price() {
        assert!(request(dec!(0), 50).validate().is_err());
        assert!(request(dec!(-1.5), 50).validate().is_err());
    }

    #[test]
    fn test_rejects_zero_qty() {
        assert!(request(dec!(100.0), 0).validate().is_err());
    }

    #[test]
    fn test_rejects_short_product() {
        let mut req = request(dec!(100.0), 10);
        req.product = "s".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_monthyear() {
        let mut req = request(dec!(100.0), 10);
        req.monthyear = "2026jan".to_string();
        assert!(req.validate().is_err());
    }
}
