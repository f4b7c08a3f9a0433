//! Database connection management

mod store;

pub use store::{AccountSummary, ExecutedTrade, Store, StoreError};

use sqlx::postgres::{PgPool, PgPoolOptions};

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with a bounded pool.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }
}
