use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::contract::ContractId;

/// An immutable trade record. `price` is always the resting offer's price
/// and `qty` never exceeds either order's remaining quantity at execution.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub contract: ContractId,
    pub price: Decimal,
    pub qty: i64,
    pub buyer_order: Uuid,
    pub seller_order: Uuid,
    pub buyer: Uuid,
    pub seller: Uuid,
    pub commission: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Commission charged per trade: `qty * price * rate`, rounded to two
/// decimal places away from zero at the midpoint.
pub fn commission_for(qty: i64, price: Decimal, rate: Decimal) -> Decimal {
    (Decimal::from(qty) * price * rate)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_commission_scenario_values() {
        // 50 lots at 100.00 with the default 0.1% rate
        assert_eq!(commission_for(50, dec!(100.00), dec!(0.001)), dec!(5.00));
    }

    #[test]
    fn test_commission_rounds_midpoint_away_from_zero() {
        // 15 * 100.10 * 0.001 = 1.5015 -> 1.50; 25 * 100.10 * 0.001 = 2.5025 -> 2.50
        assert_eq!(commission_for(15, dec!(100.10), dec!(0.001)), dec!(1.50));
        // 5 * 100.50 * 0.001 = 0.5025 -> 0.50, and the exact midpoint rounds up
        assert_eq!(commission_for(5, dec!(101.00), dec!(0.001)), dec!(0.51));
    }

    #[test]
    fn test_commission_single_lot() {
        assert_eq!(commission_for(1, dec!(50.00), dec!(0.001)), dec!(0.05));
    }
}
