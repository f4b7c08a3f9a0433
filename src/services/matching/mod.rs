//! Order Matching Module
//!
//! Price-time priority matching with a human-in-the-loop quantity
//! confirmation protocol.
//!
//! # Architecture
//!
//! ```text
//! OrderBookService write
//!   ↓ (on-demand)          periodic tick
//! MatchingEngine ──────────────┘
//!   ├→ ContractBook (snapshot + plan)
//!   ├→ Store::execute_trade (atomic commit, row locks)
//!   ├→ ConfirmationManager (QCSM + declined set)
//!   └→ SessionFanOut / MessageSink / cache bus (post-commit)
//! ```
//!
//! Per-contract trade commits are serialized behind an async mutex;
//! contracts never block each other. The engine is the sole owner of all
//! confirmation state, and that state is process-local.

mod book;
mod confirmation;
mod engine;
mod inbound;
mod types;

pub use book::{ContractBook, MatchPlan};
pub use confirmation::{ConfirmationManager, ConfirmationState, PendingConfirmation};
pub use engine::MatchingEngine;
pub use inbound::{parse_reply, ConfirmationReply};
pub use types::{pair_key, MatchingConfig, MatchingError, PartyRole};
