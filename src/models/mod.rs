pub mod contract;
pub mod order;
pub mod trade;
pub mod user;

pub use contract::*;
pub use order::*;
pub use trade::*;
pub use user::*;
