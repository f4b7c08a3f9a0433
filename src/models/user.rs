use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A venue participant. Registration and credential checks happen in an
/// external identity service; this row is what the core needs to route
/// notifications and enforce ownership.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Recipient identifier for the external messaging channel, when the
    /// user has one registered.
    pub messaging_address: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}
