//! Postgres-facing layer: connection wrapping, slot lifecycle, catalog
//! lookup, and the replication stream's wire format.

pub mod catalog;
pub mod connection;
pub mod slot;
pub mod stream;
pub mod wire;

pub use catalog::PrimaryKeyEntry;
pub use connection::Connection;
pub use stream::{RawMessage, ReplicationStream};
