//! Quantity Confirmation State Machine
//!
//! When the best bid and best offer meet on price but disagree on quantity,
//! the smaller party is asked whether to raise their order to the larger
//! quantity. A pending confirmation is `AwaitingSmaller` until exactly one
//! of: the smaller party accepts, the smaller party declines, or the
//! deadline fires. Resolution and expiry race on atomic map removal, so a
//! late response finds nothing to act on and is discarded.
//!
//! Confirmations and the declined set are process-local and owned solely by
//! the matching engine; on restart the pairs are rediscovered on the next
//! pass.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::types::{MatchingError, PartyRole};
use crate::models::ContractId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationState {
    AwaitingSmaller,
    Accepted,
    Declined,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub key: String,
    pub contract: ContractId,
    pub bid_order: Uuid,
    pub offer_order: Uuid,
    pub bid_owner: Uuid,
    pub offer_owner: Uuid,
    pub smaller_party: PartyRole,
    pub smaller_qty: i64,
    pub larger_qty: i64,
    pub price: Decimal,
    pub state: ConfirmationState,
    pub deadline: DateTime<Utc>,
}

impl PendingConfirmation {
    pub fn smaller_order(&self) -> Uuid {
        match self.smaller_party {
            PartyRole::Buyer => self.bid_order,
            PartyRole::Seller => self.offer_order,
        }
    }

    pub fn larger_order(&self) -> Uuid {
        match self.smaller_party {
            PartyRole::Buyer => self.offer_order,
            PartyRole::Seller => self.bid_order,
        }
    }

    pub fn smaller_owner(&self) -> Uuid {
        match self.smaller_party {
            PartyRole::Buyer => self.bid_owner,
            PartyRole::Seller => self.offer_owner,
        }
    }

    pub fn larger_owner(&self) -> Uuid {
        match self.smaller_party {
            PartyRole::Buyer => self.offer_owner,
            PartyRole::Seller => self.bid_owner,
        }
    }

    pub fn additional_qty(&self) -> i64 {
        self.larger_qty - self.smaller_qty
    }

    fn involves(&self, order_id: Uuid) -> bool {
        self.bid_order == order_id || self.offer_order == order_id
    }
}

/// Owner of all pending confirmations and the declined set.
#[derive(Default)]
pub struct ConfirmationManager {
    pending: DashMap<String, PendingConfirmation>,
    declined: Mutex<HashSet<String>>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ConfirmationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new confirmation. Refused when one already exists for the
    /// key or the pair was previously declined.
    pub fn try_open(&self, confirmation: PendingConfirmation) -> bool {
        if self.is_declined(&confirmation.key) {
            return false;
        }

        match self.pending.entry(confirmation.key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(confirmation);
                true
            }
        }
    }

    /// Resolve a confirmation on behalf of `responder`. Only the smaller
    /// party may answer; an answer after expiry (or for a key that never
    /// existed) is a protocol error.
    pub fn resolve(
        &self,
        key: &str,
        responder: Uuid,
        accepted: bool,
    ) -> Result<PendingConfirmation, MatchingError> {
        let removed = self
            .pending
            .remove_if(key, |_, c| c.smaller_owner() == responder);

        match removed {
            Some((_, mut confirmation)) => {
                self.abort_timer(key);
                confirmation.state = if accepted {
                    ConfirmationState::Accepted
                } else {
                    ConfirmationState::Declined
                };
                Ok(confirmation)
            }
            None if self.pending.contains_key(key) => {
                Err(MatchingError::NotAuthorized(key.to_string()))
            }
            None => Err(MatchingError::UnknownConfirmation(key.to_string())),
        }
    }

    /// Deadline expiry. Returns the confirmation if it was still awaiting a
    /// response; a resolved confirmation yields `None`.
    pub fn expire(&self, key: &str) -> Option<PendingConfirmation> {
        let (_, mut confirmation) = self.pending.remove(key)?;
        self.abort_timer(key);
        confirmation.state = ConfirmationState::TimedOut;
        Some(confirmation)
    }

    pub fn register_timer(&self, key: &str, handle: JoinHandle<()>) {
        if let Some(previous) = self.timers.lock().insert(key.to_string(), handle) {
            previous.abort();
        }
    }

    fn abort_timer(&self, key: &str) {
        if let Some(handle) = self.timers.lock().remove(key) {
            handle.abort();
        }
    }

    // ==================== Declined Set ====================

    pub fn mark_declined(&self, key: &str) {
        self.declined.lock().insert(key.to_string());
    }

    pub fn is_declined(&self, key: &str) -> bool {
        self.declined.lock().contains(key)
    }

    /// An order materially changed (price/qty update, fill, cancel,
    /// expiry): drop any pending confirmation and declined-set entry tied
    /// to it so the pair can be re-examined.
    pub fn invalidate_order(&self, order_id: Uuid) {
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().involves(order_id))
            .map(|entry| entry.key().clone())
            .collect();
        for key in stale {
            self.pending.remove(&key);
            self.abort_timer(&key);
        }

        let needle = order_id.to_string();
        self.declined.lock().retain(|key| !key.contains(&needle));
    }

    /// Resolve a messaging-channel reply: the hex token is a prefix of the
    /// responder's own order id, matched against confirmations awaiting
    /// that responder.
    pub fn find_key_by_order_prefix(&self, prefix: &str, responder: Uuid) -> Option<String> {
        let prefix = prefix.to_lowercase();
        self.pending
            .iter()
            .find(|entry| {
                let c = entry.value();
                c.smaller_owner() == responder
                    && c.smaller_order().simple().to_string().starts_with(&prefix)
            })
            .map(|entry| entry.key().clone())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::matching::types::pair_key;
    use rust_decimal_macros::dec;

    fn confirmation(smaller_owner: Uuid, larger_owner: Uuid) -> PendingConfirmation {
        let contract = ContractId::parse("jan26-silver").unwrap();
        let bid = Uuid::new_v4();
        let offer = Uuid::new_v4();
        PendingConfirmation {
            key: pair_key(&contract, bid, offer),
            contract,
            bid_order: bid,
            offer_order: offer,
            bid_owner: smaller_owner,
            offer_owner: larger_owner,
            smaller_party: PartyRole::Buyer,
            smaller_qty: 15,
            larger_qty: 50,
            price: dec!(100.00),
            state: ConfirmationState::AwaitingSmaller,
            deadline: Utc::now() + chrono::Duration::seconds(60),
        }
    }

    #[test]
    fn test_open_is_exclusive_per_key() {
        let manager = ConfirmationManager::new();
        let c = confirmation(Uuid::new_v4(), Uuid::new_v4());

        assert!(manager.try_open(c.clone()));
        assert!(!manager.try_open(c));
        assert_eq!(manager.pending_count(), 1);
    }

    #[test]
    fn test_declined_pair_is_not_reoffered() {
        let manager = ConfirmationManager::new();
        let c = confirmation(Uuid::new_v4(), Uuid::new_v4());

        manager.mark_declined(&c.key);
        assert!(!manager.try_open(c));
    }

    #[test]
    fn test_only_smaller_party_may_resolve() {
        let manager = ConfirmationManager::new();
        let smaller = Uuid::new_v4();
        let larger = Uuid::new_v4();
        let c = confirmation(smaller, larger);
        let key = c.key.clone();
        manager.try_open(c);

        assert!(matches!(
            manager.resolve(&key, larger, true),
            Err(MatchingError::NotAuthorized(_))
        ));

        let resolved = manager.resolve(&key, smaller, true).unwrap();
        assert_eq!(resolved.state, ConfirmationState::Accepted);
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_late_response_after_expiry_is_unknown() {
        let manager = ConfirmationManager::new();
        let smaller = Uuid::new_v4();
        let c = confirmation(smaller, Uuid::new_v4());
        let key = c.key.clone();
        manager.try_open(c);

        let expired = manager.expire(&key).unwrap();
        assert_eq!(expired.state, ConfirmationState::TimedOut);

        assert!(matches!(
            manager.resolve(&key, smaller, true),
            Err(MatchingError::UnknownConfirmation(_))
        ));
    }

    #[test]
    fn test_expiry_after_resolution_is_noop() {
        let manager = ConfirmationManager::new();
        let smaller = Uuid::new_v4();
        let c = confirmation(smaller, Uuid::new_v4());
        let key = c.key.clone();
        manager.try_open(c);

        manager.resolve(&key, smaller, false).unwrap();
        assert!(manager.expire(&key).is_none());
    }

    #[test]
    fn test_invalidate_order_clears_pending_and_declined() {
        let manager = ConfirmationManager::new();
        let c = confirmation(Uuid::new_v4(), Uuid::new_v4());
        let key = c.key.clone();
        let bid_order = c.bid_order;
        manager.try_open(c);
        manager.mark_declined(&key);

        manager.invalidate_order(bid_order);

        assert_eq!(manager.pending_count(), 0);
        assert!(!manager.is_declined(&key));
    }

    #[test]
    fn test_additional_qty_and_party_mapping() {
        let smaller = Uuid::new_v4();
        let larger = Uuid::new_v4();
        let c = confirmation(smaller, larger);

        assert_eq!(c.additional_qty(), 35);
        assert_eq!(c.smaller_owner(), smaller);
        assert_eq!(c.larger_owner(), larger);
        assert_eq!(c.smaller_order(), c.bid_order);
        assert_eq!(c.larger_order(), c.offer_order);
    }

    #[test]
    fn test_find_key_by_order_prefix_scopes_to_responder() {
        let manager = ConfirmationManager::new();
        let smaller = Uuid::new_v4();
        let c = confirmation(smaller, Uuid::new_v4());
        let key = c.key.clone();
        let prefix = c.bid_order.simple().to_string()[..8].to_string();
        manager.try_open(c);

        assert_eq!(
            manager.find_key_by_order_prefix(&prefix, smaller),
            Some(key)
        );
        assert_eq!(
            manager.find_key_by_order_prefix(&prefix, Uuid::new_v4()),
            None
        );
    }
}
