//! Append-if-absent JSONL checkpoint logs.
//!
//! Each pipeline owns one log. The set of keys already written is rebuilt by
//! scanning the file on open and is updated only after a record has been
//! flushed and synced, so in-memory state never runs ahead of disk.
//!
//! Logs are single-writer. Two processes appending to the same log at once
//! is unsupported and not guarded against.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CheckpointError;

/// A record that can live in a checkpoint log.
pub trait CheckpointRecord: Serialize + DeserializeOwned + Clone {
    /// Unique key of the record within its log.
    fn checkpoint_key(&self) -> String;
}

/// Keys already present in a log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointSet {
    keys: HashSet<String>,
}

impl CheckpointSet {
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

/// What a scan of an existing log found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub lines: usize,
    pub corrupt: usize,
    pub duplicates: usize,
    /// An unterminated final line was found and dropped.
    pub torn_tail: bool,
}

struct Scan<R> {
    records: HashMap<String, R>,
    order: Vec<String>,
    stats: ScanStats,
    /// Byte length of the valid prefix ending in a newline.
    clean_len: u64,
    /// The file ends with a valid record lacking its newline.
    needs_newline: bool,
}

fn scan<R: CheckpointRecord>(path: &Path) -> Result<Scan<R>, CheckpointError> {
    let mut out = Scan {
        records: HashMap::new(),
        order: Vec::new(),
        stats: ScanStats::default(),
        clean_len: 0,
        needs_newline: false,
    };

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(CheckpointError::io(path, e)),
    };

    let mut offset = 0usize;
    while offset < bytes.len() {
        let (line, terminated) = match bytes[offset..].iter().position(|&b| b == b'\n') {
            Some(pos) => (&bytes[offset..offset + pos], true),
            None => (&bytes[offset..], false),
        };
        let next = offset + line.len() + usize::from(terminated);

        let trimmed = String::from_utf8_lossy(line);
        let trimmed = trimmed.trim();
        if trimmed.is_empty() {
            if terminated {
                out.clean_len = next as u64;
            }
            offset = next;
            continue;
        }

        out.stats.lines += 1;
        match serde_json::from_str::<R>(trimmed) {
            Ok(record) => {
                let key = record.checkpoint_key();
                if out.records.contains_key(&key) {
                    out.stats.duplicates += 1;
                } else {
                    out.order.push(key.clone());
                    out.records.insert(key, record);
                }
                out.clean_len = next as u64;
                out.needs_newline = !terminated;
            }
            Err(e) if !terminated => {
                debug!(path = %path.display(), error = %e, "Unterminated final line");
                out.stats.torn_tail = true;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt checkpoint line");
                out.stats.corrupt += 1;
                out.clean_len = next as u64;
            }
        }
        offset = next;
    }

    Ok(out)
}

/// Read every record of a log without opening it for writing.
///
/// Corrupt lines are skipped and the first record wins for duplicate keys.
/// A missing file reads as empty.
pub fn read_records<R: CheckpointRecord>(path: &Path) -> Result<Vec<R>, CheckpointError> {
    let Scan {
        mut records, order, ..
    } = scan::<R>(path)?;
    Ok(order
        .into_iter()
        .filter_map(|key| records.remove(&key))
        .collect())
}

/// Delete a log so the next run starts from nothing.
pub fn reset(path: &Path) -> Result<bool, CheckpointError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Removed checkpoint log");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CheckpointError::io(path, e)),
    }
}

/// An open checkpoint log for one record type.
pub struct CheckpointStore<R> {
    path: PathBuf,
    records: HashMap<String, R>,
    order: Vec<String>,
    stats: ScanStats,
    writer: Option<File>,
    needs_newline: bool,
}

impl<R: CheckpointRecord> CheckpointStore<R> {
    /// Open (or prepare to create) the log at `path`, scanning existing records.
    ///
    /// An unterminated final line that does not parse is cut off so the next
    /// append starts on a clean line.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;
        }

        let scan = scan::<R>(&path)?;
        if scan.stats.torn_tail {
            let file = OpenOptions::new()
                .write(true)
                .open(&path)
                .map_err(|e| CheckpointError::io(&path, e))?;
            file.set_len(scan.clean_len)
                .map_err(|e| CheckpointError::io(&path, e))?;
            warn!(path = %path.display(), kept_bytes = scan.clean_len, "Truncated torn checkpoint tail");
        }

        info!(
            path = %path.display(),
            records = scan.records.len(),
            corrupt = scan.stats.corrupt,
            duplicates = scan.stats.duplicates,
            "Opened checkpoint log"
        );

        Ok(Self {
            path,
            records: scan.records,
            order: scan.order,
            stats: scan.stats,
            writer: None,
            needs_newline: scan.needs_newline,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scan_stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&R> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in the order they were first written.
    pub fn records(&self) -> impl Iterator<Item = &R> {
        self.order.iter().filter_map(|k| self.records.get(k))
    }

    /// Snapshot of the keys currently on disk.
    pub fn checkpoint_set(&self) -> CheckpointSet {
        CheckpointSet {
            keys: self.records.keys().cloned().collect(),
        }
    }

    fn writer(&mut self) -> Result<&mut File, CheckpointError> {
        let file = match self.writer.take() {
            Some(file) => file,
            None => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| CheckpointError::io(&self.path, e))?,
        };
        Ok(self.writer.insert(file))
    }

    /// Append `record` unless its key is already present.
    ///
    /// Returns `true` when a line was written. The line is flushed and synced
    /// before the key is recorded as present.
    pub fn append_if_absent(&mut self, record: R) -> Result<bool, CheckpointError> {
        let key = record.checkpoint_key();
        if self.records.contains_key(&key) {
            debug!(key = %key, "Checkpoint key already present");
            return Ok(false);
        }

        let json = serde_json::to_string(&record).map_err(|source| CheckpointError::Serialize {
            key: key.clone(),
            source,
        })?;
        let mut line = String::with_capacity(json.len() + 2);
        if self.needs_newline {
            line.push('\n');
        }
        line.push_str(&json);
        line.push('\n');

        let path = self.path.clone();
        let file = self.writer()?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_data())
            .map_err(|e| CheckpointError::io(&path, e))?;

        self.needs_newline = false;
        self.order.push(key.clone());
        self.records.insert(key, record);
        Ok(true)
    }

    /// Append each record that is not yet present. Returns how many were written.
    pub fn append_all(&mut self, records: impl IntoIterator<Item = R>) -> Result<usize, CheckpointError> {
        let mut written = 0;
        for record in records {
            if self.append_if_absent(record)? {
                written += 1;
            }
        }
        Ok(written)
    }
}
