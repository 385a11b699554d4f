//! Catalog: which files on disk still need work
//!
//! Walks the input roots, parses each file's track id from its name and
//! cross-references the validation cache, the window store and the metadata
//! sheet. Only files that are neither known-bad nor already extracted, and
//! whose genres all resolve, come out as [`CatalogEntry`] values.

pub mod metadata;

pub use metadata::{parse_genre_list, MetadataSheet};

use crate::cache::{ValidationCache, Validity};
use crate::genre::{GenreError, GenreIndex};
use crate::store::{Presence, WindowStore};
use crate::types::{CatalogEntry, TrackId};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Catalog errors
///
/// The first three are per-file rejections; the rest stop discovery.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("file name of {path} is not a track id")]
    UnparsableId { path: PathBuf },

    #[error("track {id} has unknown category '{category}'")]
    UnknownCategory { id: TrackId, category: String },

    #[error("track {id} has no row in the metadata sheet")]
    MissingMetadataRow { id: TrackId },

    #[error("Failed to read metadata sheet {path}")]
    MetadataRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("metadata sheet has no '{0}' column")]
    MissingColumn(&'static str),

    #[error("input root {0} does not exist")]
    MissingRoot(PathBuf),
}

impl CatalogError {
    /// True for rejections of a single file, false for errors that end discovery
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            CatalogError::UnparsableId { .. }
                | CatalogError::UnknownCategory { .. }
                | CatalogError::MissingMetadataRow { .. }
        )
    }
}

/// Parse the integer track id from a file name (`000123.mp3` is track 123)
pub fn parse_track_id(path: &Path) -> Result<TrackId, CatalogError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.trim().parse::<TrackId>().ok())
        .ok_or_else(|| CatalogError::UnparsableId {
            path: path.to_path_buf(),
        })
}

/// What discovery decided for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Needs validation and/or extraction
    Enqueue(CatalogEntry),
    /// Cached as undecodable by an earlier run
    CachedBad(TrackId),
    /// The window store already holds its complete output
    AlreadyProcessed(TrackId),
}

/// Per-reason counts from one discovery walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub files_seen: usize,
    pub enqueued: usize,
    pub unparsable_id: usize,
    pub unknown_category: usize,
    pub missing_metadata: usize,
    pub cached_bad: usize,
    pub already_processed: usize,
    /// Second and later files sharing a track id
    pub duplicate_id: usize,
    /// Enqueued again because their store output was incomplete
    pub reprocessing_corrupt: usize,
}

/// Result of [`Catalog::discover`]
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub entries: Vec<CatalogEntry>,
    pub stats: DiscoveryStats,
}

/// Read-only view over everything discovery consults
pub struct Catalog<'a> {
    sheet: &'a MetadataSheet,
    genres: &'a GenreIndex,
    cache: &'a ValidationCache,
    store: &'a WindowStore,
}

impl<'a> Catalog<'a> {
    pub fn new(
        sheet: &'a MetadataSheet,
        genres: &'a GenreIndex,
        cache: &'a ValidationCache,
        store: &'a WindowStore,
    ) -> Self {
        Self {
            sheet,
            genres,
            cache,
            store,
        }
    }

    /// Decide what to do with a single file.
    ///
    /// Checks run cheapest first: id, bad cache, store marker, then metadata.
    pub fn admit(&self, path: &Path) -> Result<Admission, CatalogError> {
        let id = parse_track_id(path)?;

        if self.cache.status(id) == Validity::Bad {
            return Ok(Admission::CachedBad(id));
        }

        match self.store.presence(id) {
            Presence::Present(_) | Presence::Consumed(_) => {
                return Ok(Admission::AlreadyProcessed(id))
            }
            Presence::Corrupt(reason) => {
                log::warn!(
                    "Catalog::admit: Output of track {} is incomplete ({}), extracting again",
                    id,
                    reason
                );
            }
            Presence::Absent => {}
        }

        let raw = self
            .sheet
            .raw_genres(id)
            .ok_or(CatalogError::MissingMetadataRow { id })?;

        let categories = self
            .genres
            .resolve_all(raw.iter().map(String::as_str))
            .map_err(|e| match e {
                GenreError::UnknownCategory(category) => {
                    CatalogError::UnknownCategory { id, category }
                }
                other => CatalogError::UnknownCategory {
                    id,
                    category: other.to_string(),
                },
            })?;

        Ok(Admission::Enqueue(CatalogEntry {
            id,
            path: path.to_path_buf(),
            categories,
        }))
    }

    /// Walk every root and collect the files that still need work.
    ///
    /// Files are visited in file-name order so repeated runs see the same
    /// sequence. A missing root is an error; unreadable directory entries
    /// below a root are logged and skipped.
    pub fn discover(&self, roots: &[PathBuf]) -> Result<Discovery, CatalogError> {
        for root in roots {
            if !root.is_dir() {
                return Err(CatalogError::MissingRoot(root.clone()));
            }
        }

        let mut discovery = Discovery::default();
        let mut seen_ids: HashSet<TrackId> = HashSet::new();

        for root in roots {
            log::info!("discover: Walking {:?}", root);
            for entry in WalkDir::new(root).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        log::warn!("discover: Cannot read entry under {:?}: {}", root, e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() || !is_candidate(entry.path()) {
                    continue;
                }
                self.classify(entry.path(), &mut seen_ids, &mut discovery);
            }
        }

        let stats = &discovery.stats;
        log::info!(
            "discover: {} files seen, {} enqueued ({} cached bad, {} already processed, {} rejected)",
            stats.files_seen,
            stats.enqueued,
            stats.cached_bad,
            stats.already_processed,
            stats.unparsable_id + stats.unknown_category + stats.missing_metadata + stats.duplicate_id
        );
        Ok(discovery)
    }

    fn classify(&self, path: &Path, seen_ids: &mut HashSet<TrackId>, out: &mut Discovery) {
        let stats = &mut out.stats;
        stats.files_seen += 1;

        match self.admit(path) {
            Ok(Admission::Enqueue(entry)) => {
                if !seen_ids.insert(entry.id) {
                    log::warn!(
                        "discover: Track {} found again at {:?}, keeping the first file",
                        entry.id,
                        path
                    );
                    stats.duplicate_id += 1;
                    return;
                }
                if matches!(self.store.presence(entry.id), Presence::Corrupt(_)) {
                    stats.reprocessing_corrupt += 1;
                }
                stats.enqueued += 1;
                out.entries.push(entry);
            }
            Ok(Admission::CachedBad(id)) => {
                log::debug!("discover: Track {} is cached as bad", id);
                seen_ids.insert(id);
                stats.cached_bad += 1;
            }
            Ok(Admission::AlreadyProcessed(id)) => {
                log::debug!("discover: Track {} already processed", id);
                seen_ids.insert(id);
                stats.already_processed += 1;
            }
            Err(e) => {
                match &e {
                    CatalogError::UnparsableId { .. } => stats.unparsable_id += 1,
                    CatalogError::UnknownCategory { .. } => stats.unknown_category += 1,
                    CatalogError::MissingMetadataRow { .. } => stats.missing_metadata += 1,
                    _ => {}
                }
                log::warn!("discover: Rejecting {:?}: {}", path, e);
            }
        }
    }
}

/// Hidden files and files without an extension are never audio
fn is_candidate(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'));
    !hidden && path.extension().is_some()
}
