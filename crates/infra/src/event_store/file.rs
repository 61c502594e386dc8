//! Durable event store backed by one append-only JSON-lines file.
//!
//! Format: one serialized `StoredEvent` per line, in global-position order.
//! The file is replayed into a [`LogIndex`] on open; appends write and flush
//! the new lines while the index write lock is held, then commit in memory.
//! A write that fails partway is cut back to the last committed length, so a
//! failed append leaves the file exactly as it was.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use lineage_core::{CancellationToken, ExpectedVersion, StreamId};

use super::index::LogIndex;
use super::query::{EventPage, Pagination, TimeRange};
use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Name of the log file inside the data directory.
pub const EVENT_LOG_FILE: &str = "events.jsonl";

/// Configuration for the file-backed event log.
#[derive(Debug, Clone)]
pub struct FileEventStoreConfig {
    /// Directory holding the log file; created if missing.
    pub data_dir: PathBuf,
    /// `fsync` after every append. Without it a flushed append survives a
    /// process crash but not an OS crash.
    pub fsync: bool,
}

impl FileEventStoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            fsync: true,
        }
    }
}

/// Handle the log is appended through.
trait LogFile: Write + Send + std::fmt::Debug {
    fn sync(&mut self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append side of the log: the open file and the length of its committed
/// prefix.
#[derive(Debug)]
struct LogWriter {
    file: Box<dyn LogFile>,
    committed_len: u64,
    /// Set when a failed append could not be cut back; the file holds
    /// bytes past the committed prefix and must not grow further.
    torn: bool,
}

impl LogWriter {
    fn append(&mut self, buf: &[u8], fsync: bool) -> Result<(), EventStoreError> {
        if self.torn {
            return Err(EventStoreError::Storage(
                "event log has an unrecovered partial write; reopen the store".to_string(),
            ));
        }

        let written = self
            .file
            .write_all(buf)
            .and_then(|()| self.file.flush())
            .and_then(|()| if fsync { self.file.sync() } else { Ok(()) });

        match written {
            Ok(()) => {
                self.committed_len += buf.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(cut) = self.file.truncate(self.committed_len) {
                    self.torn = true;
                    tracing::error!(
                        error = %cut,
                        committed_len = self.committed_len,
                        "could not cut failed append out of event log"
                    );
                } else {
                    tracing::warn!(error = %e, "append failed; event log restored to last commit");
                }
                Err(e.into())
            }
        }
    }
}

/// File-backed append-only event store.
#[derive(Debug)]
pub struct FileEventStore {
    path: PathBuf,
    fsync: bool,
    index: RwLock<LogIndex>,
    writer: Mutex<LogWriter>,
}

impl FileEventStore {
    /// Open or create the log, replaying and verifying every stored event.
    pub fn open(config: FileEventStoreConfig) -> Result<Self, EventStoreError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let path = config.data_dir.join(EVENT_LOG_FILE);

        let index = Self::load(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let committed_len = file.metadata()?.len();

        tracing::info!(
            path = %path.display(),
            events = index.max_position(),
            "opened event log"
        );

        Ok(Self {
            path,
            fsync: config.fsync,
            index: RwLock::new(index),
            writer: Mutex::new(LogWriter {
                file: Box::new(file),
                committed_len,
                torn: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<LogIndex, EventStoreError> {
        let mut index = LogIndex::default();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
            Err(e) => return Err(e.into()),
        };

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: StoredEvent = serde_json::from_str(&line).map_err(|e| {
                EventStoreError::Corrupt(format!("line {}: {e}", line_no + 1))
            })?;
            index.restore(event)?;
        }

        Ok(index)
    }

    fn persist(&self, events: &[StoredEvent]) -> Result<(), EventStoreError> {
        let mut buf = Vec::new();
        for e in events {
            serde_json::to_writer(&mut buf, e)?;
            buf.push(b'\n');
        }

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| EventStoreError::poisoned())?;
        writer.append(&buf, self.fsync)
    }
}

impl EventStore for FileEventStore {
    fn append(
        &self,
        stream_id: &StreamId,
        stream_type: &str,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        cancel.check()?;

        let mut index = self.index.write().map_err(|_| EventStoreError::poisoned())?;
        let committed = index.prepare(stream_id, stream_type, events, expected_version)?;
        if committed.is_empty() {
            return Ok(committed);
        }

        // Durable first; the in-memory view only advances once the lines are out.
        self.persist(&committed)?;
        index.commit(&committed);

        tracing::debug!(
            stream_id = %stream_id,
            stream_type,
            appended = committed.len(),
            last_position = index.max_position(),
            "appended events to file log"
        );

        Ok(committed)
    }

    fn read_stream(
        &self,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        cancel.check()?;
        let index = self.index.read().map_err(|_| EventStoreError::poisoned())?;
        Ok(index.read_stream(stream_id))
    }

    fn read_all(
        &self,
        from_position: u64,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        cancel.check()?;
        let index = self.index.read().map_err(|_| EventStoreError::poisoned())?;
        Ok(index.read_all(from_position, limit))
    }

    fn read_by_stream(
        &self,
        stream_id: &StreamId,
        pagination: Pagination,
        cancel: &CancellationToken,
    ) -> Result<EventPage, EventStoreError> {
        cancel.check()?;
        let index = self.index.read().map_err(|_| EventStoreError::poisoned())?;
        Ok(index.read_by_stream(stream_id, pagination))
    }

    fn read_global_by_time(
        &self,
        range: TimeRange,
        event_type: Option<&str>,
        pagination: Pagination,
        cancel: &CancellationToken,
    ) -> Result<EventPage, EventStoreError> {
        cancel.check()?;
        let index = self.index.read().map_err(|_| EventStoreError::poisoned())?;
        Ok(index.read_global_by_time(range, event_type, pagination))
    }

    fn stream_version(
        &self,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<u64, EventStoreError> {
        cancel.check()?;
        let index = self.index.read().map_err(|_| EventStoreError::poisoned())?;
        Ok(index.stream_version(stream_id))
    }

    fn max_position(&self, cancel: &CancellationToken) -> Result<u64, EventStoreError> {
        cancel.check()?;
        let index = self.index.read().map_err(|_| EventStoreError::poisoned())?;
        Ok(index.max_position())
    }
}
