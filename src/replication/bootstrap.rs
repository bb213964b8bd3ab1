//! Bootstrap client: pull a full snapshot from a seed before serving.

use crate::common::{blocking_section, Error, Result};
use crate::protocol::{read_tagged_frame, read_u32, write_tagged_frame, LogEntry, BOOTSTRAP};
use crate::storage::Database;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Upper bound on up-front allocation; the seed's count is not trusted.
const MAX_PREALLOC: usize = 1024;

pub struct BootstrapClient {
    seed: SocketAddr,
    timeout: Duration,
}

impl BootstrapClient {
    pub fn new(seed: SocketAddr, timeout: Duration) -> Self {
        Self { seed, timeout }
    }

    pub fn seed(&self) -> SocketAddr {
        self.seed
    }

    /// Fetch the seed's snapshot. Any transport, framing or parse failure
    /// fails the whole bootstrap.
    pub async fn fetch(&self) -> Result<Vec<LogEntry>> {
        match tokio::time::timeout(self.timeout, self.exchange()).await {
            Ok(Ok(entries)) => Ok(entries),
            Ok(Err(e)) => Err(self.failed(e.to_string())),
            Err(_) => Err(self.failed(format!("no complete snapshot within {:?}", self.timeout))),
        }
    }

    /// Fetch and merge into `db`. Returns the number of entries received.
    pub async fn run(&self, db: &Database) -> Result<usize> {
        info!("Bootstrapping from seed {}", self.seed);
        let entries = self.fetch().await?;
        let received = entries.len();
        blocking_section(|| db.merge_bootstrap(entries))?;
        info!("Bootstrap from {} complete: {} entries", self.seed, received);
        Ok(received)
    }

    async fn exchange(&self) -> Result<Vec<LogEntry>> {
        let mut stream = TcpStream::connect(self.seed).await?;
        write_tagged_frame(&mut stream, BOOTSTRAP).await?;

        let count = read_u32(&mut stream)
            .await?
            .ok_or_else(|| Error::Protocol("seed closed before sending a count".into()))?;

        let mut entries = Vec::with_capacity((count as usize).min(MAX_PREALLOC));
        for i in 0..count {
            let text = read_tagged_frame(&mut stream).await?.ok_or_else(|| {
                Error::Protocol(format!("snapshot ended after {} of {} entries", i, count))
            })?;
            match LogEntry::parse(&text) {
                Some(entry) => entries.push(entry),
                None => {
                    warn!("Malformed snapshot entry from {}: {:?}", self.seed, text);
                    return Err(Error::Protocol(format!("malformed snapshot entry {:?}", text)));
                }
            }
        }
        Ok(entries)
    }

    fn failed(&self, reason: String) -> Error {
        Error::Bootstrap {
            seed: self.seed.to_string(),
            reason,
        }
    }
}
