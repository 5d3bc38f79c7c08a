//! Types library for the DishHub staff event synchronization engine
//!
//! This library provides the domain types shared by the sync engine and the
//! staff-station binary, so both sides agree on identifiers, timestamps and
//! the shape of every message the backend can send.
//!
//! # Modules
//! - `ids`: Identifiers (EventId, OrderId, RestaurantId)
//! - `time`: Creation timestamps (CreatedAt) with lenient wire parsing
//! - `stream`: Stream kinds and their endpoint/target names
//! - `request`: Customer table requests
//! - `order`: Kitchen order details
//! - `entity`: The `StreamEntity` trait every stream record implements
//! - `message`: Typed hub messages and the per-stream inbound form
//! - `errors`: Payload error taxonomy

pub mod ids;
pub mod time;
pub mod stream;
pub mod request;
pub mod order;
pub mod entity;
pub mod message;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::entity::*;
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::message::*;
    pub use crate::order::*;
    pub use crate::request::*;
    pub use crate::stream::*;
    pub use crate::time::*;
}
