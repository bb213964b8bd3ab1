//! Wire protocol: framing and command text

pub mod command;
pub mod frame;

pub use command::{Command, LogEntry, ReplicationRequest, ABSENT, BOOTSTRAP, OK, REJECTED};
pub use frame::{
    read_frame, read_tagged_frame, read_u32, write_frame, write_tagged_frame, write_u32,
};
