//! Persistent Store Adapter
//!
//! Single owner of the durable `users`, `orders`, and `trades` relations.
//! Everything that mutates an order row goes through here so commit order
//! defines the total order of mutations every reader observes. Trade
//! execution is one transaction with row locks on both orders; the caller
//! may plan from a cached snapshot but this module re-reads the rows before
//! committing anything.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    commission_for, ContractId, Order, OrderSide, OrderStatus, Trade, User,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The row no longer satisfies the preconditions the caller planned
    /// against; the pair is abandoned and rediscovered on the next pass.
    #[error("order {0} is no longer eligible: {1}")]
    Stale(Uuid, &'static str),
}

/// Outcome of a committed trade transaction.
#[derive(Debug, Clone)]
pub struct ExecutedTrade {
    pub trade: Trade,
    pub bid: Order,
    pub offer: Order,
}

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct AccountSummary {
    pub active_orders: i64,
    pub open_bid_lots: i64,
    pub open_offer_lots: i64,
    pub trade_count: i64,
    pub traded_lots: i64,
    pub commission_paid: Decimal,
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== Users ====================

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_user_by_messaging_address(
        &self,
        address: &str,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE messaging_address = $1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    // ==================== Orders ====================

    pub async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, owner, contract, side, price, original_qty, remaining_qty, status, counterparty, created_at, updated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id)
        .bind(order.owner)
        .bind(&order.contract)
        .bind(order.side)
        .bind(order.price)
        .bind(order.original_qty)
        .bind(order.remaining_qty)
        .bind(order.status)
        .bind(order.counterparty)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fetch_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    /// Apply an owner-initiated update. Only active orders are touched and
    /// a quantity change requires an unfilled order; a qty reduction clamps
    /// `remaining_qty` to the new value. Returns the updated row, or `None`
    /// when no eligible row matched.
    pub async fn update_order(
        &self,
        id: Uuid,
        owner: Uuid,
        price: Option<Decimal>,
        qty: Option<i64>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Order>, StoreError> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET price = COALESCE($3, price),
                original_qty = COALESCE($4, original_qty),
                remaining_qty = LEAST(COALESCE($4, remaining_qty), COALESCE($4, original_qty)),
                expires_at = COALESCE($5, expires_at),
                updated_at = NOW()
            WHERE id = $1 AND owner = $2 AND status = 'active'
              AND ($4::bigint IS NULL OR remaining_qty = original_qty)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(price)
        .bind(qty)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    /// Transition an active order to `cancelled`. Returns the cancelled row,
    /// or `None` when the order was missing, foreign, or already terminal.
    pub async fn cancel_order(&self, id: Uuid, owner: Uuid) -> Result<Option<Order>, StoreError> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND owner = $2 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    pub async fn count_active_orders(&self, owner: Uuid) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE owner = $1 AND status = 'active'",
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Orders the matcher and market-data consumers may see: active, with
    /// remaining quantity, and not yet past expiry.
    pub async fn load_active_orders(&self, contract: &ContractId) -> Result<Vec<Order>, StoreError> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT * FROM orders
            WHERE contract = $1 AND status = 'active' AND remaining_qty > 0 AND expires_at > NOW()
            ORDER BY created_at ASC
            "#,
        )
        .bind(contract)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    pub async fn user_orders(&self, owner: Uuid) -> Result<Vec<Order>, StoreError> {
        let orders = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE owner = $1 ORDER BY created_at DESC LIMIT 200",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    /// Contracts that currently hold at least one live order.
    pub async fn active_contracts(&self) -> Result<Vec<ContractId>, StoreError> {
        let contracts = sqlx::query_scalar::<_, ContractId>(
            r#"
            SELECT DISTINCT contract FROM orders
            WHERE status = 'active' AND remaining_qty > 0 AND expires_at > NOW()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(contracts)
    }

    pub async fn has_active_orders(&self) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM orders WHERE status = 'active' AND remaining_qty > 0)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Sweep orders whose expiry has passed into the terminal `expired`
    /// state, returning the affected rows.
    pub async fn expire_due_orders(&self) -> Result<Vec<Order>, StoreError> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET status = 'expired', updated_at = NOW()
            WHERE status = 'active' AND expires_at <= NOW()
            RETURNING *
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    /// Contracts in which the owner still holds a live order. Used by the
    /// fan-out layer to decide room membership.
    pub async fn contracts_with_active_orders(
        &self,
        owner: Uuid,
    ) -> Result<Vec<ContractId>, StoreError> {
        let contracts = sqlx::query_scalar::<_, ContractId>(
            r#"
            SELECT DISTINCT contract FROM orders
            WHERE owner = $1 AND status = 'active' AND remaining_qty > 0 AND expires_at > NOW()
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(contracts)
    }

    // ==================== Trades ====================

    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<Trade>, StoreError> {
        let trades = sqlx::query_as::<_, Trade>(
            "SELECT * FROM trades ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await?;
        Ok(trades)
    }

    pub async fn user_trades(&self, owner: Uuid, limit: i64) -> Result<Vec<Trade>, StoreError> {
        let trades = sqlx::query_as::<_, Trade>(
            r#"
            SELECT * FROM trades
            WHERE buyer = $1 OR seller = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(owner)
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await?;
        Ok(trades)
    }

    pub async fn account_summary(&self, owner: Uuid) -> Result<AccountSummary, StoreError> {
        let summary = sqlx::query_as::<_, AccountSummary>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM orders WHERE owner = $1 AND status = 'active') AS active_orders,
                (SELECT COALESCE(SUM(remaining_qty), 0)::bigint FROM orders WHERE owner = $1 AND status = 'active' AND side = 'bid') AS open_bid_lots,
                (SELECT COALESCE(SUM(remaining_qty), 0)::bigint FROM orders WHERE owner = $1 AND status = 'active' AND side = 'offer') AS open_offer_lots,
                (SELECT COUNT(*) FROM trades WHERE buyer = $1 OR seller = $1) AS trade_count,
                (SELECT COALESCE(SUM(qty), 0)::bigint FROM trades WHERE buyer = $1 OR seller = $1) AS traded_lots,
                (SELECT COALESCE(SUM(commission), 0) FROM trades WHERE buyer = $1 OR seller = $1) AS commission_paid
            "#,
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;
        Ok(summary)
    }

    // ==================== Trade Execution ====================

    /// Execute a trade between a bid and an offer as one transaction.
    ///
    /// Both rows are re-read under `FOR UPDATE` and re-validated, so a
    /// stale plan (filled, cancelled, repriced, or expired since the
    /// snapshot) aborts with [`StoreError::Stale`] and leaves both orders
    /// untouched. Quantity and price are recomputed from the locked rows:
    /// `qty = min(remaining)`, `price = offer.price`.
    pub async fn execute_trade(
        &self,
        bid_id: Uuid,
        offer_id: Uuid,
        commission_rate: Decimal,
    ) -> Result<ExecutedTrade, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Lock in a deterministic order so concurrent commits cannot
        // deadlock on the same pair.
        let (first, second) = if bid_id < offer_id {
            (bid_id, offer_id)
        } else {
            (offer_id, bid_id)
        };

        let first_row = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(first)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::Stale(first, "missing"))?;
        let second_row = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(second)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::Stale(second, "missing"))?;

        let (mut bid, mut offer) = if first_row.id == bid_id {
            (first_row, second_row)
        } else {
            (second_row, first_row)
        };

        if bid.side != OrderSide::Bid || offer.side != OrderSide::Offer {
            return Err(StoreError::Stale(bid.id, "side mismatch"));
        }
        if !bid.is_live() || bid.expires_at <= Utc::now() {
            return Err(StoreError::Stale(bid.id, "not active"));
        }
        if !offer.is_live() || offer.expires_at <= Utc::now() {
            return Err(StoreError::Stale(offer.id, "not active"));
        }
        if bid.owner == offer.owner {
            return Err(StoreError::Stale(bid.id, "self trade"));
        }
        if bid.price < offer.price {
            return Err(StoreError::Stale(bid.id, "prices no longer cross"));
        }

        let qty = bid.remaining_qty.min(offer.remaining_qty);
        let price = offer.price;
        let commission = commission_for(qty, price, commission_rate);

        let trade = Trade {
            id: Uuid::new_v4(),
            contract: bid.contract.clone(),
            price,
            qty,
            buyer_order: bid.id,
            seller_order: offer.id,
            buyer: bid.owner,
            seller: offer.owner,
            commission,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO trades (id, contract, price, qty, buyer_order, seller_order, buyer, seller, commission, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(trade.id)
        .bind(&trade.contract)
        .bind(trade.price)
        .bind(trade.qty)
        .bind(trade.buyer_order)
        .bind(trade.seller_order)
        .bind(trade.buyer)
        .bind(trade.seller)
        .bind(trade.commission)
        .bind(trade.created_at)
        .execute(&mut *tx)
        .await?;

        for (order, counterparty) in [(&mut bid, trade.seller), (&mut offer, trade.buyer)] {
            order.remaining_qty -= qty;
            if order.remaining_qty == 0 {
                order.status = OrderStatus::Matched;
                order.counterparty = Some(counterparty);
            }

            sqlx::query(
                r#"
                UPDATE orders
                SET remaining_qty = $2, status = $3, counterparty = $4, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(order.id)
            .bind(order.remaining_qty)
            .bind(order.status)
            .bind(order.counterparty)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(ExecutedTrade { trade, bid, offer })
    }

    /// Lift an order's quantity to the counterparty's after an accepted
    /// quantity confirmation. Both `original_qty` and `remaining_qty` move
    /// to the new value; only an active order qualifies.
    pub async fn lift_order_qty(&self, id: Uuid, new_qty: i64) -> Result<Order, StoreError> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET original_qty = $2, remaining_qty = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(new_qty)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::Stale(id, "not active"))?;

        Ok(order)
    }
}
