//! Matching engine shared types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ContractId;

/// Which side of the pair is being addressed in a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PartyRole {
    Buyer,
    Seller,
}

/// Key identifying a specific (bid, offer) pairing at matching time. Used
/// for pending confirmations and the declined set.
pub fn pair_key(contract: &ContractId, bid: Uuid, offer: Uuid) -> String {
    format!("{}:{}:{}", contract, bid, offer)
}

#[derive(Debug, thiserror::Error)]
pub enum MatchingError {
    #[error("store error: {0}")]
    Store(#[from] crate::db::StoreError),

    #[error("no confirmation found for key {0}")]
    UnknownConfirmation(String),

    #[error("responder is not a party to confirmation {0}")]
    NotAuthorized(String),

    #[error("could not parse reply: {0}")]
    UnparseableReply(String),
}

/// Tunables the engine reads at construction; see `AppConfig` for the
/// externally adjustable keys and their defaults.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub commission_rate: Decimal,
    pub interval_secs: u64,
    pub pass_budget_secs: u64,
    pub qcsm_deadline_secs: u64,
    pub spread_alert_cap: Decimal,
    pub mirror_ttl_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            commission_rate: Decimal::new(1, 3),
            interval_secs: 5,
            pass_budget_secs: 30,
            qcsm_deadline_secs: 60,
            spread_alert_cap: Decimal::new(20, 2),
            mirror_ttl_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_shape() {
        let contract = ContractId::parse("jan26-silver").unwrap();
        let bid = Uuid::new_v4();
        let offer = Uuid::new_v4();
        let key = pair_key(&contract, bid, offer);
        assert!(key.starts_with("jan26-silver:"));
        assert!(key.contains(&bid.to_string()));
        assert!(key.ends_with(&offer.to_string()));
    }
}
