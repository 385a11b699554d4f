//! Intermediate window store
//!
//! A flat directory holding the extraction phase's output until assembly:
//!
//! ```text
//! samples/
//!   x.000002.0000.f32   window 0 of track 2 (AUDIO_LEN little-endian f32)
//!   x.000002.0001.f32   window 1 of track 2
//!   y.000002.f32        label vector of track 2 (N little-endian f32)
//!   done.000002         completion marker: number of windows written
//! ```
//!
//! Track id and window index are recovered from the file names alone. Every
//! file is written under a `.tmp` name and renamed into place, and the marker
//! is written last, so a track without a valid marker is simply not finished.
//!
//! Once a track's windows have gone into a dataset they can be consumed: the
//! sample files are deleted and the marker is rewritten as `consumed <count>`,
//! so the track still counts as processed but is not assembled again.

use crate::types::{LabelVector, TrackId, Window, WindowKey};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

const WINDOW_PREFIX: &str = "x";
const LABEL_PREFIX: &str = "y";
const MARKER_PREFIX: &str = "done";
const SAMPLE_EXT: &str = "f32";
const TMP_SUFFIX: &str = ".tmp";
const CONSUMED_TAG: &str = "consumed";

/// Window store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} holds {found} bytes, expected {expected}")]
    WrongSize {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    #[error("window {index} of track {id} has {found} samples, expected {expected}")]
    WrongWindowLength {
        id: TrackId,
        index: u32,
        expected: usize,
        found: usize,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Completion state of one track in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    /// Marker and every announced file are in place
    Present(u32),
    /// Processed and assembled; the sample files are gone
    Consumed(u32),
    /// No marker: never processed or interrupted before finishing
    Absent,
    /// Marker exists but the files behind it don't match
    Corrupt(String),
}

/// Directory of per-window and per-track sample files
#[derive(Debug, Clone)]
pub struct WindowStore {
    dir: PathBuf,
    audio_len: usize,
    n_labels: usize,
}

impl WindowStore {
    /// Open (creating if needed) a store for windows of `audio_len` samples
    /// and label vectors of `n_labels` entries
    pub fn open(dir: &Path, audio_len: usize, n_labels: usize) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            audio_len,
            n_labels,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn audio_len(&self) -> usize {
        self.audio_len
    }

    pub fn n_labels(&self) -> usize {
        self.n_labels
    }

    /// Bytes in one window file
    pub fn window_bytes(&self) -> u64 {
        (self.audio_len * std::mem::size_of::<f32>()) as u64
    }

    /// Bytes in one label file
    pub fn label_bytes(&self) -> u64 {
        (self.n_labels * std::mem::size_of::<f32>()) as u64
    }

    pub fn window_path(&self, key: WindowKey) -> PathBuf {
        self.dir.join(format!(
            "{}.{:06}.{:04}.{}",
            WINDOW_PREFIX, key.source_id, key.window_index, SAMPLE_EXT
        ))
    }

    pub fn label_path(&self, id: TrackId) -> PathBuf {
        self.dir
            .join(format!("{}.{:06}.{}", LABEL_PREFIX, id, SAMPLE_EXT))
    }

    pub fn marker_path(&self, id: TrackId) -> PathBuf {
        self.dir.join(format!("{}.{:06}", MARKER_PREFIX, id))
    }

    /// Check whether a track's output is complete
    pub fn presence(&self, id: TrackId) -> Presence {
        let marker = self.marker_path(id);
        let contents = match fs::read_to_string(&marker) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Presence::Absent,
            Err(e) => return Presence::Corrupt(format!("unreadable marker: {}", e)),
        };
        let trimmed = contents.trim();
        if let Some(count) = trimmed.strip_prefix(CONSUMED_TAG) {
            return match count.trim().parse::<u32>() {
                Ok(count) => Presence::Consumed(count),
                Err(_) => Presence::Corrupt(format!("bad marker contents {:?}", contents)),
            };
        }
        let count = match trimmed.parse::<u32>() {
            Ok(count) => count,
            Err(_) => return Presence::Corrupt(format!("bad marker contents {:?}", contents)),
        };

        if count > 0 {
            if let Err(reason) = check_size(&self.label_path(id), self.label_bytes()) {
                return Presence::Corrupt(reason);
            }
        }
        for index in 0..count {
            let path = self.window_path(WindowKey::new(id, index));
            if let Err(reason) = check_size(&path, self.window_bytes()) {
                return Presence::Corrupt(reason);
            }
        }
        Presence::Present(count)
    }

    /// Remove every file belonging to a track, including half-written ones
    pub fn purge(&self, id: TrackId) -> Result<(), StoreError> {
        remove_with_tmp(&self.marker_path(id))?;
        remove_with_tmp(&self.label_path(id))?;

        // Windows are written in index order, so the first index with neither
        // a final nor a temporary file ends the run.
        let mut index = 0u32;
        loop {
            let path = self.window_path(WindowKey::new(id, index));
            let removed = remove_with_tmp(&path)?;
            if !removed {
                break;
            }
            index += 1;
        }
        if index > 0 {
            log::debug!("WindowStore::purge: Removed {} windows of track {}", index, id);
        }
        Ok(())
    }

    /// Persist one window
    pub fn write_window(&self, window: &Window<'_>) -> Result<(), StoreError> {
        if window.samples.len() != self.audio_len {
            return Err(StoreError::WrongWindowLength {
                id: window.key.source_id,
                index: window.key.window_index,
                expected: self.audio_len,
                found: window.samples.len(),
            });
        }
        write_atomic(&self.window_path(window.key), &to_le_bytes(window.samples))
    }

    /// Persist a track's label vector
    pub fn write_label(&self, label: &LabelVector) -> Result<(), StoreError> {
        write_atomic(&self.label_path(label.source_id), &to_le_bytes(&label.onehot))
    }

    /// Record that a track is complete with `count` windows
    pub fn mark_done(&self, id: TrackId, count: u32) -> Result<(), StoreError> {
        write_atomic(&self.marker_path(id), format!("{}\n", count).as_bytes())
    }

    /// Drop the sample files of a complete track but keep it marked as processed.
    ///
    /// Returns false, touching nothing, unless the track is [`Presence::Present`].
    pub fn consume(&self, id: TrackId) -> Result<bool, StoreError> {
        let Presence::Present(count) = self.presence(id) else {
            return Ok(false);
        };
        // Marker first: an interruption below leaves stray files, never a
        // track that looks unprocessed
        write_atomic(
            &self.marker_path(id),
            format!("{} {}\n", CONSUMED_TAG, count).as_bytes(),
        )?;
        remove_with_tmp(&self.label_path(id))?;
        for index in 0..count {
            remove_with_tmp(&self.window_path(WindowKey::new(id, index)))?;
        }
        Ok(true)
    }

    /// List the windows of every complete track, sorted by key.
    ///
    /// Windows of unfinished or corrupt tracks are left out.
    pub fn enumerate(&self) -> Result<Vec<WindowKey>, StoreError> {
        let mut markers: Vec<TrackId> = Vec::new();
        let mut windows: HashMap<TrackId, Vec<u32>> = HashMap::new();

        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(key) = parse_window_file_name(name) {
                windows.entry(key.source_id).or_default().push(key.window_index);
            } else if let Some(id) = parse_marker_file_name(name) {
                markers.push(id);
            }
        }

        let mut keys = Vec::new();
        for id in markers {
            match self.presence(id) {
                Presence::Present(count) => {
                    keys.extend((0..count).map(|index| WindowKey::new(id, index)));
                    let on_disk = windows.get(&id).map_or(0, Vec::len);
                    if on_disk != count as usize {
                        log::warn!(
                            "WindowStore::enumerate: Track {} has {} window files but marker says {}",
                            id,
                            on_disk,
                            count
                        );
                    }
                }
                Presence::Corrupt(reason) => {
                    log::warn!("WindowStore::enumerate: Skipping track {}: {}", id, reason);
                }
                Presence::Consumed(_) | Presence::Absent => {}
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Read a window's raw little-endian bytes into `dest`
    pub fn read_window_bytes(&self, key: WindowKey, dest: &mut [u8]) -> Result<(), StoreError> {
        read_exact_file(&self.window_path(key), dest)
    }

    /// Read a track's label vector as raw little-endian bytes
    pub fn read_label_bytes(&self, id: TrackId) -> Result<Vec<u8>, StoreError> {
        let mut bytes = vec![0u8; self.label_bytes() as usize];
        read_exact_file(&self.label_path(id), &mut bytes)?;
        Ok(bytes)
    }

    /// Read a track's label vector
    pub fn read_label(&self, id: TrackId) -> Result<LabelVector, StoreError> {
        let bytes = self.read_label_bytes(id)?;
        Ok(LabelVector {
            source_id: id,
            onehot: from_le_bytes(&bytes),
        })
    }
}

/// `x.<id>.<index>.f32` to its key
pub fn parse_window_file_name(name: &str) -> Option<WindowKey> {
    let mut parts = name.split('.');
    if parts.next()? != WINDOW_PREFIX {
        return None;
    }
    let id = parts.next()?.parse().ok()?;
    let index = parts.next()?.parse().ok()?;
    if parts.next()? != SAMPLE_EXT || parts.next().is_some() {
        return None;
    }
    Some(WindowKey::new(id, index))
}

/// `done.<id>` to its track id
pub fn parse_marker_file_name(name: &str) -> Option<TrackId> {
    let rest = name.strip_prefix(MARKER_PREFIX)?.strip_prefix('.')?;
    rest.parse().ok()
}

/// Serialize samples as little-endian float32
pub fn to_le_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Deserialize little-endian float32 samples
pub fn from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

/// Remove a file and its temporary sibling; true if either existed
fn remove_with_tmp(path: &Path) -> Result<bool, StoreError> {
    let mut removed = false;
    for candidate in [path.to_path_buf(), tmp_path(path)] {
        match fs::remove_file(&candidate) {
            Ok(()) => removed = true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&candidate, e)),
        }
    }
    Ok(removed)
}

fn check_size(path: &Path, expected: u64) -> Result<(), String> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() == expected => Ok(()),
        Ok(meta) => Err(format!(
            "{:?} holds {} bytes, expected {}",
            path,
            meta.len(),
            expected
        )),
        Err(e) => Err(format!("{:?}: {}", path, e)),
    }
}

fn read_exact_file(path: &Path, dest: &mut [u8]) -> Result<(), StoreError> {
    let mut file = fs::File::open(path).map_err(|e| StoreError::io(path, e))?;
    let found = file.metadata().map_err(|e| StoreError::io(path, e))?.len();
    if found != dest.len() as u64 {
        return Err(StoreError::WrongSize {
            path: path.to_path_buf(),
            expected: dest.len() as u64,
            found,
        });
    }
    file.read_exact(dest).map_err(|e| StoreError::io(path, e))
}
