//! Node-local storage
//!
//! - `Store`: in-memory map, the source of truth for reads
//! - `DurableLog`: append-only text journal used for crash recovery
//! - `Database`: both, behind the locking discipline every writer follows

pub mod database;
pub mod log;
pub mod store;

pub use database::Database;
pub use log::DurableLog;
pub use store::{Snapshot, Store};
