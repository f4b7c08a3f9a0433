//! Contract identifiers
//!
//! A contract is a (monthyear, product) pair such as `jan26-silver`. Each
//! contract has its own independent order book.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized contract identifier: `"<monthyear>-<product>"` where
/// `monthyear` is three lowercase letters followed by two digits and
/// `product` is at least two lowercase letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct ContractId(String);

impl ContractId {
    /// Build a contract id from its two components, normalizing case and
    /// whitespace. Returns `None` when either component is malformed.
    pub fn new(monthyear: &str, product: &str) -> Option<Self> {
        let monthyear = monthyear.trim().to_lowercase();
        let product = product.trim().to_lowercase();

        if !is_valid_monthyear(&monthyear) || !is_valid_product(&product) {
            return None;
        }

        Some(ContractId(format!("{}-{}", monthyear, product)))
    }

    /// Parse an already-joined identifier like `jan26-silver`.
    pub fn parse(s: &str) -> Option<Self> {
        let (monthyear, product) = s.trim().split_once('-')?;
        ContractId::new(monthyear, product)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn monthyear(&self) -> &str {
        // Constructor guarantees the "xxxNN-" prefix.
        &self.0[..5]
    }

    pub fn product(&self) -> &str {
        &self.0[6..]
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn is_valid_monthyear(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 5
        && bytes[..3].iter().all(|b| b.is_ascii_lowercase())
        && bytes[3..].iter().all(|b| b.is_ascii_digit())
}

fn is_valid_product(s: &str) -> bool {
    s.len() >= 2 && s.bytes().all(|b| b.is_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_case() {
        let id = ContractId::new("JAN26", "Silver").unwrap();
        assert_eq!(id.as_str(), "jan26-silver");
        assert_eq!(id.monthyear(), "jan26");
        assert_eq!(id.product(), "silver");
    }

    #[test]
    fn test_rejects_malformed_monthyear() {
        assert!(ContractId::new("janu26", "silver").is_none());
        assert!(ContractId::new("ja26", "silver").is_none());
        assert!(ContractId::new("jan2x", "silver").is_none());
        assert!(ContractId::new("126an", "silver").is_none());
    }

    #[test]
    fn test_rejects_malformed_product() {
        assert!(ContractId::new("jan26", "s").is_none());
        assert!(ContractId::new("jan26", "silver2").is_none());
        assert!(ContractId::new("jan26", "").is_none());
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = ContractId::parse("dec25-wheat").unwrap();
        assert_eq!(id.to_string(), "dec25-wheat");
        assert!(ContractId::parse("dec25wheat").is_none());
    }
}
