//! Accept-loop error budget shared by the client and replication endpoints

use crate::common::{Error, Result};
use std::time::Duration;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Counts consecutive `accept()` failures. A single failure is logged and
/// the loop keeps going; `limit` failures in a row mean the listener cannot
/// accept at all.
#[derive(Debug)]
pub struct AcceptFailures {
    endpoint: &'static str,
    consecutive: u32,
    limit: u32,
}

impl AcceptFailures {
    pub fn new(endpoint: &'static str, limit: u32) -> Self {
        Self {
            endpoint,
            consecutive: 0,
            limit: limit.max(1),
        }
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Record a failure, back off briefly, and error out once the budget is spent.
    pub async fn record(&mut self, e: std::io::Error) -> Result<()> {
        self.consecutive += 1;
        tracing::warn!(
            "{} accept failed ({}/{}): {}",
            self.endpoint,
            self.consecutive,
            self.limit,
            e
        );
        if self.consecutive >= self.limit {
            return Err(Error::Io(e));
        }
        tokio::time::sleep(ACCEPT_BACKOFF).await;
        Ok(())
    }
}
