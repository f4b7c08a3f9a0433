//! Per-contract book projection and match planning
//!
//! A [`ContractBook`] is a point-in-time view of one contract's live orders
//! with deterministic ordering: price beats time, earlier time wins. The
//! planner decides what a match pass should do next without touching the
//! store; the engine then re-validates inside the trade transaction.

use rust_decimal::Decimal;

use super::types::PartyRole;
use crate::models::{Order, OrderSide};

/// What a match pass should do for a contract.
#[derive(Debug, Clone)]
pub enum MatchPlan {
    /// One side of the book is empty, or only self-owned pairs cross.
    Idle,
    /// Best prices do not cross. `fraction` is `(offer - bid) / bid`, the
    /// input to the competitive-bidding alert decision.
    Spread {
        best_bid: Order,
        best_offer: Order,
        fraction: Decimal,
    },
    /// Quantities agree; execute a trade for `qty`.
    Execute { bid: Order, offer: Order, qty: i64 },
    /// Prices meet but quantities differ; ask the smaller party.
    Confirm {
        bid: Order,
        offer: Order,
        smaller_party: PartyRole,
        smaller_qty: i64,
        larger_qty: i64,
    },
}

pub struct ContractBook {
    bids: Vec<Order>,
    offers: Vec<Order>,
}

impl ContractBook {
    /// Build from an arbitrary order set. Dead orders are dropped; bids
    /// sort price-descending then created-ascending, offers price-ascending
    /// then created-ascending.
    pub fn from_orders(orders: &[Order]) -> Self {
        let mut bids: Vec<Order> = orders
            .iter()
            .filter(|o| o.is_live() && o.side == OrderSide::Bid)
            .cloned()
            .collect();
        let mut offers: Vec<Order> = orders
            .iter()
            .filter(|o| o.is_live() && o.side == OrderSide::Offer)
            .cloned()
            .collect();

        bids.sort_by(|a, b| {
            b.price
                .cmp(&a.price)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        offers.sort_by(|a, b| {
            a.price
                .cmp(&b.price)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        Self { bids, offers }
    }

    pub fn best_bid(&self) -> Option<&Order> {
        self.bids.first()
    }

    pub fn best_offer(&self) -> Option<&Order> {
        self.offers.first()
    }

    /// Best crossing pair with distinct owners, in price-time priority.
    /// A candidate whose counterparty would be its own owner is skipped and
    /// the next-best counterparty considered.
    fn select_pair(&self) -> Option<(&Order, &Order)> {
        for bid in &self.bids {
            for offer in &self.offers {
                if offer.owner == bid.owner {
                    continue;
                }
                if bid.price >= offer.price {
                    return Some((bid, offer));
                }
                // Offers are price-ascending: nothing cheaper follows.
                break;
            }
        }
        None
    }

    /// Decide the next action for this book.
    pub fn plan(&self) -> MatchPlan {
        let (best_bid, best_offer) = match (self.best_bid(), self.best_offer()) {
            (Some(b), Some(o)) => (b, o),
            _ => return MatchPlan::Idle,
        };

        if let Some((bid, offer)) = self.select_pair() {
            let q_bid = bid.remaining_qty;
            let q_offer = offer.remaining_qty;

            if q_bid == q_offer {
                return MatchPlan::Execute {
                    bid: bid.clone(),
                    offer: offer.clone(),
                    qty: q_bid,
                };
            }

            let (smaller_party, smaller_qty, larger_qty) = if q_bid < q_offer {
                (PartyRole::Buyer, q_bid, q_offer)
            } else {
                (PartyRole::Seller, q_offer, q_bid)
            };

            return MatchPlan::Confirm {
                bid: bid.clone(),
                offer: offer.clone(),
                smaller_party,
                smaller_qty,
                larger_qty,
            };
        }

        if best_bid.price < best_offer.price {
            let fraction = (best_offer.price - best_bid.price) / best_bid.price;
            return MatchPlan::Spread {
                best_bid: best_bid.clone(),
                best_offer: best_offer.clone(),
                fraction,
            };
        }

        // Prices meet but every crossing pair is self-owned.
        MatchPlan::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContractId, OrderStatus};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn order(
        owner: Uuid,
        side: OrderSide,
        price: Decimal,
        qty: i64,
        age_secs: i64,
    ) -> Order {
        let created = Utc::now() - Duration::seconds(age_secs);
        Order {
            id: Uuid::new_v4(),
            owner,
            contract: ContractId::parse("jan26-silver").unwrap(),
            side,
            price,
            original_qty: qty,
            remaining_qty: qty,
            status: OrderStatus::Active,
            counterparty: None,
            created_at: created,
            updated_at: created,
            expires_at: Utc::now() + Duration::hours(24),
        }
    }

    #[test]
    fn test_exact_match_plan() {
        let seller = Uuid::new_v4();
        let buyer = Uuid::new_v4();
        let orders = vec![
            order(seller, OrderSide::Offer, dec!(100.00), 50, 10),
            order(buyer, OrderSide::Bid, dec!(100.00), 50, 5),
        ];

        match ContractBook::from_orders(&orders).plan() {
            MatchPlan::Execute { bid, offer, qty } => {
                assert_eq!(qty, 50);
                assert_eq!(bid.owner, buyer);
                assert_eq!(offer.owner, seller);
            }
            other => panic!("expected Execute, got {:?}", other),
        }
    }

    #[test]
    fn test_seller_exceeds_buyer_opens_confirmation_for_buyer() {
        let orders = vec![
            order(Uuid::new_v4(), OrderSide::Offer, dec!(100.00), 50, 10),
            order(Uuid::new_v4(), OrderSide::Bid, dec!(100.00), 15, 5),
        ];

        match ContractBook::from_orders(&orders).plan() {
            MatchPlan::Confirm {
                smaller_party,
                smaller_qty,
                larger_qty,
                ..
            } => {
                assert_eq!(smaller_party, PartyRole::Buyer);
                assert_eq!(smaller_qty, 15);
                assert_eq!(larger_qty, 50);
            }
            other => panic!("expected Confirm, got {:?}", other),
        }
    }

    #[test]
    fn test_buyer_exceeds_seller_opens_confirmation_for_seller() {
        let orders = vec![
            order(Uuid::new_v4(), OrderSide::Bid, dec!(100.00), 30, 10),
            order(Uuid::new_v4(), OrderSide::Offer, dec!(100.00), 12, 5),
        ];

        match ContractBook::from_orders(&orders).plan() {
            MatchPlan::Confirm {
                smaller_party,
                smaller_qty,
                larger_qty,
                ..
            } => {
                assert_eq!(smaller_party, PartyRole::Seller);
                assert_eq!(smaller_qty, 12);
                assert_eq!(larger_qty, 30);
            }
            other => panic!("expected Confirm, got {:?}", other),
        }
    }

    #[test]
    fn test_self_trade_guard() {
        let owner = Uuid::new_v4();
        let orders = vec![
            order(owner, OrderSide::Bid, dec!(50.00), 10, 10),
            order(owner, OrderSide::Offer, dec!(50.00), 10, 5),
        ];

        assert!(matches!(ContractBook::from_orders(&orders).plan(), MatchPlan::Idle));
    }

    #[test]
    fn test_self_trade_skips_to_next_counterparty() {
        let shared = Uuid::new_v4();
        let other = Uuid::new_v4();
        let orders = vec![
            order(shared, OrderSide::Bid, dec!(50.00), 10, 10),
            order(shared, OrderSide::Offer, dec!(50.00), 10, 20),
            order(other, OrderSide::Offer, dec!(50.00), 10, 5),
        ];

        match ContractBook::from_orders(&orders).plan() {
            MatchPlan::Execute { bid, offer, qty } => {
                assert_eq!(qty, 10);
                assert_eq!(bid.owner, shared);
                assert_eq!(offer.owner, other);
            }
            other => panic!("expected Execute, got {:?}", other),
        }
    }

    #[test]
    fn test_price_time_priority() {
        let early = Uuid::new_v4();
        let late = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let orders = vec![
            order(early, OrderSide::Bid, dec!(50.00), 5, 60),
            order(late, OrderSide::Bid, dec!(50.00), 5, 10),
            order(seller, OrderSide::Offer, dec!(50.00), 5, 1),
        ];

        match ContractBook::from_orders(&orders).plan() {
            MatchPlan::Execute { bid, .. } => assert_eq!(bid.owner, early),
            other => panic!("expected Execute, got {:?}", other),
        }
    }

    #[test]
    fn test_better_price_beats_earlier_time() {
        let cheap = Uuid::new_v4();
        let orders = vec![
            order(Uuid::new_v4(), OrderSide::Bid, dec!(100.00), 5, 5),
            order(Uuid::new_v4(), OrderSide::Offer, dec!(101.00), 5, 100),
            order(cheap, OrderSide::Offer, dec!(100.00), 5, 10),
        ];

        match ContractBook::from_orders(&orders).plan() {
            MatchPlan::Execute { offer, .. } => assert_eq!(offer.owner, cheap),
            other => panic!("expected Execute, got {:?}", other),
        }
    }

    #[test]
    fn test_spread_fraction() {
        let orders = vec![
            order(Uuid::new_v4(), OrderSide::Bid, dec!(100.00), 5, 5),
            order(Uuid::new_v4(), OrderSide::Offer, dec!(110.00), 5, 5),
        ];

        match ContractBook::from_orders(&orders).plan() {
            MatchPlan::Spread { fraction, .. } => assert_eq!(fraction, dec!(0.1)),
            other => panic!("expected Spread, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_side_is_idle() {
        let orders = vec![order(Uuid::new_v4(), OrderSide::Bid, dec!(100.00), 5, 5)];
        assert!(matches!(ContractBook::from_orders(&orders).plan(), MatchPlan::Idle));
    }

    #[test]
    fn test_crossed_prices_trade_at_offer_price() {
        let orders = vec![
            order(Uuid::new_v4(), OrderSide::Bid, dec!(105.00), 5, 5),
            order(Uuid::new_v4(), OrderSide::Offer, dec!(100.00), 5, 5),
        ];

        match ContractBook::from_orders(&orders).plan() {
            MatchPlan::Execute { offer, .. } => assert_eq!(offer.price, dec!(100.00)),
            other => panic!("expected Execute, got {:?}", other),
        }
    }

    #[test]
    fn test_single_lot_boundary() {
        let orders = vec![
            order(Uuid::new_v4(), OrderSide::Bid, dec!(100.00), 1, 5),
            order(Uuid::new_v4(), OrderSide::Offer, dec!(100.00), 1, 5),
        ];

        match ContractBook::from_orders(&orders).plan() {
            MatchPlan::Execute { qty, .. } => assert_eq!(qty, 1),
            other => panic!("expected Execute, got {:?}", other),
        }
    }
}
