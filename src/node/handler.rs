//! Client request handling
//!
//! One task per client connection. Requests are processed strictly in
//! arrival order and every request gets exactly one response frame.

use crate::common::{blocking_section, Error, Result};
use crate::protocol::{read_frame, write_frame, Command, ABSENT, OK, REJECTED};
use crate::replication::ReplicationSender;
use crate::storage::Database;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct ClientRequestHandler {
    db: Arc<Database>,
    queue: ReplicationSender,
}

impl ClientRequestHandler {
    pub fn new(db: Arc<Database>, queue: ReplicationSender) -> Self {
        Self { db, queue }
    }

    /// Execute one command and produce the response text.
    pub fn respond(&self, line: &str) -> String {
        match Command::parse(line) {
            Command::Set(entry) => {
                let queue = &self.queue;
                let committed = self.db.commit(entry, |entry| {
                    if let Err(e) = queue.send(entry) {
                        warn!("Replication queue closed, {:?} stays local", e.0.key);
                    }
                });
                match committed {
                    Ok(()) => OK.to_string(),
                    Err(e) => {
                        error!("Rejected set: {}", e);
                        REJECTED.to_string()
                    }
                }
            }
            Command::Get { key } => self.db.get(&key).unwrap_or_else(|| ABSENT.to_string()),
            Command::Unknown(raw) => {
                warn!("Unknown command: {:?}", raw);
                REJECTED.to_string()
            }
        }
    }

    /// Serve a connection until the client disconnects or shutdown is signalled.
    pub async fn run<S>(
        &self,
        mut stream: S,
        peer: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!("Client {} connected", peer);
        loop {
            let frame = tokio::select! {
                _ = shutdown.changed() => break,
                frame = read_frame(&mut stream) => frame,
            };
            let response = match frame {
                Ok(Some(line)) => blocking_section(|| self.respond(&line)),
                Ok(None) => break,
                Err(Error::InvalidText) => {
                    warn!("Client {} sent a frame that is not UTF-8", peer);
                    REJECTED.to_string()
                }
                Err(e) => return Err(e),
            };
            write_frame(&mut stream, &response).await?;
        }
        debug!("Client {} disconnected", peer);
        Ok(())
    }
}
