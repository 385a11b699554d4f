//! Persistent validation cache
//!
//! Two append-only text logs, one decimal track id per line: ids known to
//! decode ("good") and ids known not to ("bad"). Both logs are read once when
//! the cache is opened. After that the cache only appends, and an id that is
//! already known is never written again.
//!
//! A bad verdict is permanent. Operators who repair a file must delete its line
//! from the bad log by hand before it will be looked at again.

use crate::types::TrackId;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Validation cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to read cache log {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to append to cache log {path}")]
    Append {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What the cache knows about an id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Good,
    Bad,
    Unknown,
}

/// Outcome of validating one id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRecord {
    pub id: TrackId,
    pub decodable: bool,
}

/// One append-only log file
struct CacheLog {
    path: PathBuf,
    file: File,
}

impl CacheLog {
    /// Read every id in the log, then reopen it for appending
    fn open(path: &Path, ids: &mut HashSet<TrackId>) -> Result<Self, CacheError> {
        let read_err = |source| CacheError::Read {
            path: path.to_path_buf(),
            source,
        };

        if path.exists() {
            let reader = BufReader::new(File::open(path).map_err(read_err)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line.map_err(read_err)?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match trimmed.parse::<TrackId>() {
                    Ok(id) => {
                        ids.insert(id);
                    }
                    Err(_) => log::warn!(
                        "CacheLog::open: Ignoring malformed line {} in {:?}: {:?}",
                        line_no + 1,
                        path,
                        trimmed
                    ),
                }
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(read_err)?;

        // A crash can leave the last line without its newline; terminate it so
        // the next append starts on a fresh line.
        if needs_newline(&mut file).map_err(read_err)? {
            file.write_all(b"\n").map_err(|source| CacheError::Append {
                path: path.to_path_buf(),
                source,
            })?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Append one id as a single write and flush it to the OS
    fn append(&mut self, id: TrackId) -> Result<(), CacheError> {
        let line = format!("{}\n", id);
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|source| CacheError::Append {
                path: self.path.clone(),
                source,
            })
    }

    fn sync(&self) -> Result<(), CacheError> {
        self.file.sync_data().map_err(|source| CacheError::Append {
            path: self.path.clone(),
            source,
        })
    }
}

fn needs_newline(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Known-good and known-bad track ids, backed by two append-only logs
pub struct ValidationCache {
    good: HashSet<TrackId>,
    bad: HashSet<TrackId>,
    good_log: CacheLog,
    bad_log: CacheLog,
}

impl ValidationCache {
    /// Load both logs (missing logs start empty) and keep them open for appends
    pub fn open(good_path: &Path, bad_path: &Path) -> Result<Self, CacheError> {
        let mut good = HashSet::new();
        let mut bad = HashSet::new();
        let good_log = CacheLog::open(good_path, &mut good)?;
        let bad_log = CacheLog::open(bad_path, &mut bad)?;

        let both = good.intersection(&bad).count();
        if both > 0 {
            log::warn!(
                "ValidationCache::open: {} ids appear in both logs, treating them as bad",
                both
            );
        }

        log::info!(
            "ValidationCache::open: {} good, {} bad ids cached",
            good.len(),
            bad.len()
        );

        Ok(Self {
            good,
            bad,
            good_log,
            bad_log,
        })
    }

    /// Look up an id. Bad wins when an id was (manually) put in both logs.
    pub fn status(&self, id: TrackId) -> Validity {
        if self.bad.contains(&id) {
            Validity::Bad
        } else if self.good.contains(&id) {
            Validity::Good
        } else {
            Validity::Unknown
        }
    }

    /// Persist a validation result.
    ///
    /// Returns `Ok(false)` without touching the logs when the id is already
    /// known; cached verdicts are authoritative.
    pub fn record(&mut self, record: ValidationRecord) -> Result<bool, CacheError> {
        if self.status(record.id) != Validity::Unknown {
            log::debug!(
                "ValidationCache::record: id {} already cached, not rewriting",
                record.id
            );
            return Ok(false);
        }

        if record.decodable {
            self.good_log.append(record.id)?;
            self.good.insert(record.id);
        } else {
            self.bad_log.append(record.id)?;
            self.bad.insert(record.id);
        }
        Ok(true)
    }

    pub fn record_good(&mut self, id: TrackId) -> Result<bool, CacheError> {
        self.record(ValidationRecord { id, decodable: true })
    }

    pub fn record_bad(&mut self, id: TrackId) -> Result<bool, CacheError> {
        self.record(ValidationRecord {
            id,
            decodable: false,
        })
    }

    /// Force both logs to stable storage (end of the validation phase)
    pub fn sync(&self) -> Result<(), CacheError> {
        self.good_log.sync()?;
        self.bad_log.sync()
    }

    pub fn good_count(&self) -> usize {
        self.good.len()
    }

    pub fn bad_count(&self) -> usize {
        self.bad.len()
    }
}
