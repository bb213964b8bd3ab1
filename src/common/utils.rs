//! Small helpers shared by the binaries and the node runtime

use crate::common::{Error, Result};
use std::time::Duration;

/// Parse a duration string such as `500ms`, `2s`, `5m` or `1h`.
/// A bare number is read as milliseconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidConfig("empty duration".into()));
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num_str, unit) = s.split_at(split);

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let duration = match unit {
        "" | "ms" => Duration::from_millis(num),
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(scale(num, 60, s)?),
        "h" => Duration::from_secs(scale(num, 3600, s)?),
        _ => {
            return Err(Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    Ok(duration)
}

fn scale(num: u64, factor: u64, input: &str) -> Result<u64> {
    num.checked_mul(factor)
        .ok_or_else(|| Error::InvalidConfig(format!("duration out of range: {}", input)))
}

/// Run blocking disk work from async code. On the multi-thread runtime the
/// worker hands its other tasks off first; elsewhere `f` runs inline.
pub fn blocking_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Duration as whole milliseconds, saturating.
pub fn as_millis_u64(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
