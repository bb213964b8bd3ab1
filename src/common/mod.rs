//! Common utilities and types shared across meshkv

pub mod config;
pub mod error;
pub mod net;
pub mod utils;

pub use config::{NodeConfig, SyncPolicy};
pub use error::{Error, Result};
pub use net::AcceptFailures;
pub use utils::{as_millis_u64, blocking_section, parse_duration};
