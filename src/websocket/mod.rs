pub mod fanout;
pub mod handler;
pub mod rooms;
pub mod routes;

pub use fanout::{market_room, user_room, SessionFanOut, ADMIN_ROOM};
pub use rooms::{RoomRegistry, SessionId};
