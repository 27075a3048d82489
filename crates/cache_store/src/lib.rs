//! Append-only on-disk record log with an in-memory index.
//!
//! Each record is exactly three newline-terminated lines: the request key,
//! the retrieval date (YYYYMMDD), and the raw payload text. A record's
//! identity is the byte offset of its key line. The file is written by
//! exactly one handle at a time (the cache writer); any number of read-only
//! handles may scan and look up concurrently. No file locks are taken —
//! correctness relies on the single-writer discipline and on records being
//! self-delimiting.

use chrono::Utc;
use common::{Error, Result};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const LOAD_PROGRESS_EVERY: usize = 10_000;

/// How a [`CacheStore`] handle may touch the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    Append,
}

/// Index entry: where a key's newest record starts, and its retrieval date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset: u64,
    pub date: String,
}

/// Key → newest record position. Built by one forward scan of the log.
pub type CacheIndex = HashMap<String, IndexEntry>;

/// Handle on the record log plus the index built from it.
///
/// A read-only holder's index is a point-in-time snapshot: it is never
/// refreshed after [`CacheStore::load_index`]. Only the append holder's
/// index stays live, because [`CacheStore::append`] updates it.
#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    file: File,
    mode: Mode,
    at_eof: bool,
    index: CacheIndex,
}

fn chomp(mut line: String) -> String {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}

fn valid_date(date: &str) -> bool {
    date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit())
}

impl CacheStore {
    /// Open the log at `path`. Append mode creates the file if absent.
    pub fn open(path: &Path, mode: Mode) -> Result<Self> {
        let open_result = match mode {
            Mode::ReadOnly => OpenOptions::new().read(true).open(path),
            Mode::Append => OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(path),
        };
        let file = open_result.map_err(|e| Error::StoreUnavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            mode,
            at_eof: false,
            index: CacheIndex::new(),
        })
    }

    /// Scan the whole log from byte 0 and (re)build the index.
    ///
    /// A trailing partial group of 1 or 2 lines is on-disk corruption and
    /// fails with `CacheFormat`; clean EOF after a whole number of 3-line
    /// groups is the normal termination. Leaves the cursor at end-of-file.
    pub fn load_index(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.index.clear();
        let mut reader = BufReader::new(&mut self.file);
        let mut offset = 0u64;
        let mut line_number = 0u64;
        let mut entries = 0usize;
        loop {
            let record_offset = offset;

            let mut key = String::new();
            let n = reader.read_line(&mut key)?;
            if n == 0 {
                break; // clean end: whole number of records
            }
            offset += n as u64;
            line_number += 1;

            let mut date = String::new();
            let n = reader.read_line(&mut date)?;
            if n == 0 {
                return Err(Error::CacheFormat(format!(
                    "truncated record after line {line_number}: key without date line"
                )));
            }
            offset += n as u64;
            line_number += 1;

            let mut payload = String::new();
            let n = reader.read_line(&mut payload)?;
            if n == 0 {
                return Err(Error::CacheFormat(format!(
                    "truncated record after line {line_number}: missing payload line"
                )));
            }
            offset += n as u64;
            line_number += 1;

            let key = chomp(key);
            let date = chomp(date);
            if !valid_date(&date) {
                return Err(Error::CacheFormat(format!(
                    "date not YYYYMMDD at line {}",
                    line_number - 1
                )));
            }

            // Duplicate keys are allowed in the log; the later record wins.
            self.index.insert(
                key,
                IndexEntry {
                    offset: record_offset,
                    date,
                },
            );
            entries += 1;
            if entries % LOAD_PROGRESS_EVERY == 0 {
                info!(entries, "reading existing cache");
            }
        }
        self.at_eof = true;
        info!(
            records = entries,
            keys = self.index.len(),
            path = %self.path.display(),
            "loaded cache index"
        );
        Ok(())
    }

    /// Look up `key` in the index and read its payload line from disk.
    pub fn lookup(&mut self, key: &str) -> Result<Option<String>> {
        let offset = match self.index.get(key) {
            Some(entry) => entry.offset,
            None => return Ok(None),
        };
        self.file.seek(SeekFrom::Start(offset))?;
        self.at_eof = false;
        let mut reader = BufReader::new(&mut self.file);
        let mut line = String::new();
        for _ in 0..2 {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(Error::CacheFormat(format!(
                    "record truncated at offset {offset}"
                )));
            }
        }
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(Error::CacheFormat(format!(
                "record at offset {offset} has no payload line"
            )));
        }
        Ok(Some(chomp(line)))
    }

    /// Append a record at end-of-file and update this handle's index entry.
    ///
    /// The three lines are written in a single `write_all` so no partial
    /// record is ever flushed. Returns the offset the record starts at.
    pub fn append(&mut self, key: &str, payload: &str) -> Result<u64> {
        if self.mode != Mode::Append {
            return Err(Error::StoreUnavailable {
                path: self.path.display().to_string(),
                reason: "append on a read-only handle".to_string(),
            });
        }
        if !self.at_eof {
            self.file.seek(SeekFrom::End(0))?;
            self.at_eof = true;
        }
        let offset = self.file.stream_position()?;
        let date = Utc::now().format("%Y%m%d").to_string();
        let record = format!("{key}\n{date}\n{payload}\n");
        self.file.write_all(record.as_bytes())?;
        self.file.flush()?;
        self.index.insert(
            key.to_string(),
            IndexEntry {
                offset,
                date,
            },
        );
        Ok(offset)
    }

    /// Number of distinct keys in the index.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn index(&self) -> &CacheIndex {
        &self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
