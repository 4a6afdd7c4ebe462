//! Append-capable, queryable-by-key record logs.
//!
//! Every store in this crate sits on an [`AppendLog`]. Records are
//! independent units: a backend writes each one atomically with respect to
//! other appends, and never rewrites or removes a record once appended.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::StoreError;

/// A record that can be persisted in an [`AppendLog`].
pub trait Keyed: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Lookup key. Need not be unique; [`AppendLog::find`] returns all matches.
    fn key(&self) -> &str;
}

pub trait AppendLog<T: Keyed>: Send + Sync {
    fn append(&self, record: &T) -> Result<(), StoreError>;

    /// All records in append order.
    fn scan(&self) -> Result<Vec<T>, StoreError>;

    /// Records whose key equals `key`, in append order.
    fn find(&self, key: &str) -> Result<Vec<T>, StoreError> {
        Ok(self.scan()?.into_iter().filter(|r| r.key() == key).collect())
    }
}

// ── MemoryLog ──

/// Ephemeral log for tests and `--storage memory`.
pub struct MemoryLog<T> {
    records: RwLock<Vec<T>>,
}

impl<T> MemoryLog<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl<T> Default for MemoryLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed> AppendLog<T> for MemoryLog<T> {
    fn append(&self, record: &T) -> Result<(), StoreError> {
        self.records
            .write()
            .map_err(|e| StoreError::Other(format!("lock poisoned: {e}")))?
            .push(record.clone());
        Ok(())
    }

    fn scan(&self) -> Result<Vec<T>, StoreError> {
        Ok(self
            .records
            .read()
            .map_err(|e| StoreError::Other(format!("lock poisoned: {e}")))?
            .clone())
    }
}

// ── JsonlLog ──

/// One JSON document per line, appended under a mutex.
///
/// Each record is serialised in full before the lock is taken and written
/// with a single `write_all`, so concurrent appends never interleave. A line
/// that fails to parse on read (a torn write from a crash) is skipped with a
/// warning rather than failing the whole scan. When the file does not end in
/// a newline, the next append starts a fresh line first so the torn fragment
/// never swallows a good record.
pub struct JsonlLog<T> {
    path: PathBuf,
    tail: Mutex<Tail>,
    _record: PhantomData<fn() -> T>,
}

struct Tail {
    file: File,
    /// The last byte on disk is not `\n`.
    unterminated: bool,
}

impl Tail {
    fn check(&mut self) -> std::io::Result<()> {
        let len = self.file.metadata()?.len();
        self.unterminated = if len == 0 {
            false
        } else {
            let mut last = [0u8; 1];
            self.file.seek(SeekFrom::Start(len - 1))?;
            self.file.read_exact(&mut last)?;
            last[0] != b'\n'
        };
        Ok(())
    }
}

impl<T> JsonlLog<T> {
    /// Open or create the log at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;
        let mut tail = Tail {
            file,
            unterminated: false,
        };
        tail.check().map_err(|e| StoreError::io(path, e))?;
        if tail.unterminated {
            warn!(
                path = %path.display(),
                "log ends in a partial line; next append starts a new line"
            );
        }
        debug!(path = %path.display(), "opened jsonl log");
        Ok(Self {
            path: path.to_path_buf(),
            tail: Mutex::new(tail),
            _record: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T: Keyed> AppendLog<T> for JsonlLog<T> {
    fn append(&self, record: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let mut tail = self
            .tail
            .lock()
            .map_err(|e| StoreError::Other(format!("mutex poisoned: {e}")))?;
        let mut line = String::with_capacity(json.len() + 2);
        if tail.unterminated {
            line.push('\n');
        }
        line.push_str(&json);
        line.push('\n');
        let written = tail
            .file
            .write_all(line.as_bytes())
            .and_then(|()| tail.file.flush());
        match written {
            Ok(()) => {
                tail.unterminated = false;
                Ok(())
            }
            Err(e) => {
                // A short write may have left a fragment behind.
                if let Err(check) = tail.check() {
                    warn!(
                        path = %self.path.display(),
                        error = %check,
                        "could not inspect log tail"
                    );
                    tail.unterminated = true;
                }
                Err(StoreError::io(&self.path, e))
            }
        }
    }

    fn scan(&self) -> Result<Vec<T>, StoreError> {
        // Hold the writer lock so a scan never observes a half-written line.
        let _guard = self
            .tail
            .lock()
            .map_err(|e| StoreError::Other(format!("mutex poisoned: {e}")))?;
        let text = std::fs::read_to_string(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        let mut records = Vec::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = n + 1,
                    error = %e,
                    "skipping unreadable log line"
                ),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::Deserialize;
    use tempfile::TempDir;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    impl Keyed for Note {
        fn key(&self) -> &str {
            &self.id
        }
    }

    fn note(id: &str, body: &str) -> Note {
        Note {
            id: id.into(),
            body: body.into(),
        }
    }

    #[test]
    fn memory_log_find_by_key() {
        let log: MemoryLog<Note> = MemoryLog::new();
        log.append(&note("a", "1")).unwrap();
        log.append(&note("b", "2")).unwrap();
        log.append(&note("a", "3")).unwrap();
        let found = log.find("a").unwrap();
        assert_eq!(found, vec![note("a", "1"), note("a", "3")]);
        assert_eq!(log.scan().unwrap().len(), 3);
    }

    #[test]
    fn jsonl_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/notes.jsonl");
        {
            let log: JsonlLog<Note> = JsonlLog::open(&path).unwrap();
            log.append(&note("a", "first")).unwrap();
            log.append(&note("b", "second")).unwrap();
        }
        let log: JsonlLog<Note> = JsonlLog::open(&path).unwrap();
        assert_eq!(log.scan().unwrap(), vec![note("a", "first"), note("b", "second")]);
    }

    #[test]
    fn jsonl_skips_torn_trailing_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.jsonl");
        let log: JsonlLog<Note> = JsonlLog::open(&path).unwrap();
        log.append(&note("a", "ok")).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(br#"{"id":"b","bo"#)
            .unwrap();
        assert_eq!(log.scan().unwrap(), vec![note("a", "ok")]);
    }

    #[test]
    fn jsonl_append_after_torn_tail_keeps_new_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.jsonl");
        {
            let log: JsonlLog<Note> = JsonlLog::open(&path).unwrap();
            log.append(&note("a", "ok")).unwrap();
        }
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(br#"{"id":"to"#)
            .unwrap();

        let log: JsonlLog<Note> = JsonlLog::open(&path).unwrap();
        log.append(&note("c", "after crash")).unwrap();
        log.append(&note("d", "later")).unwrap();
        assert_eq!(
            log.scan().unwrap(),
            vec![note("a", "ok"), note("c", "after crash"), note("d", "later")]
        );

        let reopened: JsonlLog<Note> = JsonlLog::open(&path).unwrap();
        reopened.append(&note("e", "clean tail")).unwrap();
        assert_eq!(reopened.scan().unwrap().len(), 4);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn jsonl_concurrent_appends_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let log: Arc<JsonlLog<Note>> =
            Arc::new(JsonlLog::open(&dir.path().join("notes.jsonl")).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        log.append(&note(&format!("{t}-{i}"), &"x".repeat(512)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let records = log.scan().unwrap();
        assert_eq!(records.len(), 400);
        assert!(records.iter().all(|r| r.body.len() == 512));
    }
}
