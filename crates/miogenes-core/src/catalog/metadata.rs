//! Metadata sheet reader
//!
//! The sheet is a CSV file with at least the columns `track_id` (integer) and
//! `track_genres_all` (a bracketed list such as `[21, 38, 1235]`). All other
//! columns are ignored.

use super::CatalogError;
use crate::types::TrackId;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

const ID_COLUMN: &str = "track_id";
const GENRES_COLUMN: &str = "track_genres_all";

#[derive(Debug, Deserialize)]
struct MetadataRow {
    track_id: TrackId,
    #[serde(default)]
    track_genres_all: String,
}

/// Raw genre lists keyed by track id
#[derive(Debug, Default)]
pub struct MetadataSheet {
    genres: HashMap<TrackId, Vec<String>>,
}

impl MetadataSheet {
    /// Read the whole sheet into memory
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        log::info!("MetadataSheet::load: Reading {:?}", path);
        let reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|source| CatalogError::MetadataRead {
                path: path.to_path_buf(),
                source,
            })?;
        let sheet = Self::from_csv(reader, path)?;
        log::info!("MetadataSheet::load: {} tracks in sheet", sheet.len());
        Ok(sheet)
    }

    /// Parse a sheet from any reader (used for in-memory sheets)
    pub fn from_reader<R: Read>(input: R) -> Result<Self, CatalogError> {
        let reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(input);
        Self::from_csv(reader, Path::new("<memory>"))
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>, path: &Path) -> Result<Self, CatalogError> {
        let headers = reader
            .headers()
            .map_err(|source| CatalogError::MetadataRead {
                path: path.to_path_buf(),
                source,
            })?
            .clone();
        for column in [ID_COLUMN, GENRES_COLUMN] {
            if !headers.iter().any(|h| h == column) {
                return Err(CatalogError::MissingColumn(column));
            }
        }

        let mut genres = HashMap::new();
        let mut skipped = 0usize;
        for (row_no, row) in reader.deserialize::<MetadataRow>().enumerate() {
            match row {
                Ok(row) => {
                    if genres
                        .insert(row.track_id, parse_genre_list(&row.track_genres_all))
                        .is_some()
                    {
                        log::warn!(
                            "MetadataSheet: track {} listed twice, keeping the later row",
                            row.track_id
                        );
                    }
                }
                Err(e) => {
                    skipped += 1;
                    log::debug!("MetadataSheet: Skipping row {}: {}", row_no + 2, e);
                }
            }
        }
        if skipped > 0 {
            log::warn!("MetadataSheet: Skipped {} unreadable rows", skipped);
        }

        Ok(Self { genres })
    }

    /// Raw genre ids listed for a track, `None` when the sheet has no row for it
    pub fn raw_genres(&self, id: TrackId) -> Option<&[String]> {
        self.genres.get(&id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.genres.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genres.is_empty()
    }
}

/// Split a bracketed genre list into raw ids.
///
/// `"[21, 38]"` gives `["21", "38"]`. Quotes around items are dropped.
/// An empty list `"[]"` gives a single empty string, the "no category"
/// placeholder the genre index skips.
pub fn parse_genre_list(field: &str) -> Vec<String> {
    let trimmed = field.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);
    inner
        .split(',')
        .map(|item| item.trim().trim_matches(|c| c == '\'' || c == '"').trim().to_string())
        .collect()
}
