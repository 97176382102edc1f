//! Real-time core: session gate, presence tracking, delivery and
//! read-receipt fan-out, and the per-connection WebSocket loop.

pub mod connection;
pub mod delivery;
pub mod presence;
pub mod receipts;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;
