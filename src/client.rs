//! Client for the node's framed text protocol

use crate::common::{Error, Result};
use crate::protocol::{read_frame, write_frame, Command, LogEntry, ABSENT, OK};
use std::net::SocketAddr;
use tokio::net::{TcpStream, ToSocketAddrs};

/// One persistent connection to a node's client endpoint. Requests are
/// sent one at a time; each waits for its response.
pub struct KvClient {
    stream: TcpStream,
    peer: SocketAddr,
}

impl KvClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        Ok(Self { stream, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Store `value` under `key`. Both must be non-empty and whitespace-free.
    pub async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if !is_token(key) || !is_token(value) {
            return Err(Error::Protocol(format!(
                "keys and values must be single tokens: {:?} {:?}",
                key, value
            )));
        }
        let command = Command::Set(LogEntry::new(key, value)).to_string();
        match self.send_raw(&command).await?.as_str() {
            OK => Ok(()),
            other => Err(Error::Other(format!("set {} rejected by {}: {:?}", key, self.peer, other))),
        }
    }

    /// Fetch the value for `key`; `None` if it was never set.
    pub async fn get(&mut self, key: &str) -> Result<Option<String>> {
        if !is_token(key) {
            return Err(Error::Protocol(format!("key must be a single token: {:?}", key)));
        }
        let command = Command::Get { key: key.to_string() }.to_string();
        let response = self.send_raw(&command).await?;
        Ok((response != ABSENT).then_some(response))
    }

    /// Send any text as one frame and return the response frame.
    pub async fn send_raw(&mut self, text: &str) -> Result<String> {
        write_frame(&mut self.stream, text).await?;
        read_frame(&mut self.stream)
            .await?
            .ok_or_else(|| Error::Protocol(format!("{} closed the connection", self.peer)))
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && !s.chars().any(char::is_whitespace)
}
