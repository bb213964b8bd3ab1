//! Text commands carried inside frames.
//!
//! Client commands are `set <key> <value>` and `get <key>`. The replication
//! endpoint additionally understands `bootstrap` (case-insensitive prefix).
//! Keys and values are whitespace-free tokens.

use std::fmt;

/// Response to a successful `set`.
pub const OK: &str = "OK";
/// Response to `get` for a key that was never set.
pub const ABSENT: &str = "";
/// Response to anything the node will not execute.
pub const REJECTED: &str = "ERR";
/// Replication command requesting a full snapshot.
pub const BOOTSTRAP: &str = "bootstrap";

/// A single committed write. Rendered as `set <key> <value>` both on the
/// wire and in the durable log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogEntry {
    pub key: String,
    pub value: String,
}

impl LogEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse a `set <key> <value>` line.
    pub fn parse(line: &str) -> Option<Self> {
        match Command::parse(line) {
            Command::Set(entry) => Some(entry),
            _ => None,
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "set {} {}", self.key, self.value)
    }
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set(LogEntry),
    Get { key: String },
    /// Unknown verb or wrong argument count; carries the raw text.
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["set", key, value] => Command::Set(LogEntry::new(*key, *value)),
            ["get", key] => Command::Get {
                key: (*key).to_string(),
            },
            _ => Command::Unknown(line.to_string()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Set(entry) => write!(f, "{}", entry),
            Command::Get { key } => write!(f, "get {}", key),
            Command::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

/// A parsed inbound replication message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationRequest {
    Bootstrap,
    Set(LogEntry),
    Unknown(String),
}

impl ReplicationRequest {
    pub fn parse(line: &str) -> Self {
        if is_bootstrap(line) {
            return ReplicationRequest::Bootstrap;
        }
        match Command::parse(line) {
            Command::Set(entry) => ReplicationRequest::Set(entry),
            _ => ReplicationRequest::Unknown(line.to_string()),
        }
    }
}

/// Case-insensitive `bootstrap` prefix match.
pub fn is_bootstrap(line: &str) -> bool {
    line.len() >= BOOTSTRAP.len()
        && line.as_bytes()[..BOOTSTRAP.len()].eq_ignore_ascii_case(BOOTSTRAP.as_bytes())
}
