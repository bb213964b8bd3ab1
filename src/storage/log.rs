//! Durable log
//!
//! Append-only text journal of committed writes, one `set <key> <value>` per
//! line. Replayed sequentially at startup; the last line for a key wins.
//! A final line without its newline is a torn append that was never
//! acknowledged: replay ignores it and reopening for append cuts it off.

use crate::common::{Result, SyncPolicy};
use crate::protocol::LogEntry;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Append handle on the durable log file.
pub struct DurableLog {
    writer: BufWriter<File>,
    sync_policy: SyncPolicy,
    appended: u64,
}

impl DurableLog {
    /// Open or create the log for appending.
    pub fn open(path: impl AsRef<Path>, sync_policy: SyncPolicy) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;

        // Cut a torn tail so the next append starts on its own line.
        if let Some(kept) = Self::truncate_torn_tail(&mut file)? {
            tracing::warn!("Durable log {:?} had a torn tail, truncated to {} bytes", path, kept);
        }

        Ok(Self {
            writer: BufWriter::new(file),
            sync_policy,
            appended: 0,
        })
    }

    /// Drop bytes after the last newline. Returns the new length if anything was cut.
    fn truncate_torn_tail(file: &mut File) -> Result<Option<u64>> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(None);
        }
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        if last[0] == b'\n' {
            return Ok(None);
        }

        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut *file);
        let mut line = Vec::new();
        let mut kept = 0u64;
        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 || line.last() != Some(&b'\n') {
                break;
            }
            kept += n as u64;
        }
        drop(reader);

        file.set_len(kept)?;
        file.sync_data()?;
        Ok(Some(kept))
    }

    /// Append one entry and make it durable per the sync policy.
    pub fn append(&mut self, entry: &LogEntry) -> Result<()> {
        writeln!(self.writer, "{}", entry)?;
        self.maybe_sync()?;
        self.appended += 1;
        Ok(())
    }

    /// Append several entries with a single sync at the end.
    pub fn append_batch<'a, I>(&mut self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a LogEntry>,
    {
        let mut count = 0;
        for entry in entries {
            writeln!(self.writer, "{}", entry)?;
            count += 1;
        }
        self.maybe_sync()?;
        self.appended += count as u64;
        Ok(count)
    }

    fn maybe_sync(&mut self) -> Result<()> {
        match self.sync_policy {
            SyncPolicy::Always => self.sync(),
            SyncPolicy::Flush => {
                self.writer.flush()?;
                Ok(())
            }
        }
    }

    /// Flush and fsync.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Entries appended through this handle.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Replay the log in order. A missing file replays nothing.
    /// Returns the number of entries delivered to `callback`.
    pub fn replay<F>(path: impl AsRef<Path>, mut callback: F) -> Result<usize>
    where
        F: FnMut(LogEntry),
    {
        let file = match File::open(path.as_ref()) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let mut line_no = 0usize;
        let mut replayed = 0;

        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            line_no += 1;

            if !line.ends_with('\n') {
                tracing::warn!("Durable log replay dropped torn tail at line {}", line_no);
                break;
            }
            let text = line.trim_end();
            if text.is_empty() {
                continue;
            }
            match LogEntry::parse(text) {
                Some(entry) => {
                    callback(entry);
                    replayed += 1;
                }
                None => {
                    tracing::warn!("Durable log line {} is malformed, skipping: {:?}", line_no, text);
                }
            }
        }

        Ok(replayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn replay_all(path: &Path) -> Vec<LogEntry> {
        let mut entries = Vec::new();
        DurableLog::replay(path, |entry| entries.push(entry)).unwrap();
        entries
    }

    #[test]
    fn test_append_writes_text_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.log");

        let mut log = DurableLog::open(&path, SyncPolicy::Always).unwrap();
        log.append(&LogEntry::new("a", "1")).unwrap();
        log.append(&LogEntry::new("b", "2")).unwrap();
        assert_eq!(log.appended(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "set a 1\nset b 2\n");
    }

    #[test]
    fn test_reopen_appends_after_existing_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("kv.log");

        {
            let mut log = DurableLog::open(&path, SyncPolicy::Always).unwrap();
            log.append(&LogEntry::new("a", "1")).unwrap();
        }
        {
            let mut log = DurableLog::open(&path, SyncPolicy::Flush).unwrap();
            let batch = vec![LogEntry::new("a", "2"), LogEntry::new("c", "3")];
            assert_eq!(log.append_batch(&batch).unwrap(), 2);
        }

        let entries = replay_all(&path);
        assert_eq!(
            entries,
            vec![
                LogEntry::new("a", "1"),
                LogEntry::new("a", "2"),
                LogEntry::new("c", "3"),
            ]
        );
    }

    #[test]
    fn test_replay_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let count = DurableLog::replay(dir.path().join("absent.log"), |_| {}).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_replay_skips_garbage_and_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.log");
        std::fs::write(&path, "set a 1\nnonsense here\n\nset b 2\nset c 3").unwrap();

        let entries = replay_all(&path);
        assert_eq!(entries, vec![LogEntry::new("a", "1"), LogEntry::new("b", "2")]);
    }

    #[test]
    fn test_open_truncates_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.log");
        std::fs::write(&path, "set a 1\nset b 2").unwrap();

        let mut log = DurableLog::open(&path, SyncPolicy::Always).unwrap();
        log.append(&LogEntry::new("c", "3")).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "set a 1\nset c 3\n");
        assert_eq!(
            replay_all(&path),
            vec![LogEntry::new("a", "1"), LogEntry::new("c", "3")]
        );
    }
}
