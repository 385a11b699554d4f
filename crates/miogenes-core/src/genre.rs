//! Sparse genre id to dense label index mapping
//!
//! The metadata sheet refers to genres by sparse numeric ids (1, 2, ..., 1235).
//! Label vectors need a dense `[0, N)` index space, so every known id is
//! assigned its position in a fixed table. The table never changes at run time.

use std::collections::HashMap;
use thiserror::Error;

/// FMA genre ids in dense-index order (position = label index)
pub const FMA_GENRE_IDS: [u32; 163] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 25,
    26, 27, 30, 31, 32, 33, 36, 37, 38, 41, 42, 43, 45, 46, 47, 49, 53, 58, 63, 64, 65,
    66, 70, 71, 74, 76, 77, 79, 81, 83, 85, 86, 88, 89, 90, 92, 94, 97, 98, 100, 101,
    102, 103, 107, 109, 111, 113, 117, 118, 125, 130, 137, 138, 166, 167, 169, 170, 171,
    172, 173, 174, 175, 176, 177, 178, 179, 180, 181, 182, 183, 184, 185, 186, 187, 188,
    189, 214, 224, 232, 236, 240, 247, 250, 267, 286, 296, 297, 311, 314, 322, 337, 359,
    360, 361, 362, 374, 377, 378, 400, 401, 404, 428, 439, 440, 441, 442, 443, 444, 456,
    465, 468, 491, 493, 495, 502, 504, 514, 524, 538, 539, 542, 567, 580, 602, 619, 651,
    659, 693, 695, 741, 763, 808, 810, 811, 906, 1032, 1060, 1156, 1193, 1235,
];

/// Genre lookup errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenreError {
    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    #[error("category '{0}' appears more than once in the genre table")]
    DuplicateCategory(String),

    #[error("genre table is empty")]
    EmptyTable,
}

/// Bijection from raw category ids to dense label indices
#[derive(Debug, Clone)]
pub struct GenreIndex {
    lookup: HashMap<String, usize>,
    raw_ids: Vec<String>,
}

impl GenreIndex {
    /// The built-in 163-genre FMA table
    pub fn fma() -> Self {
        Self::from_raw_ids(FMA_GENRE_IDS.iter().map(|id| id.to_string()))
            .expect("built-in genre table has unique ids")
    }

    /// Build a table from raw ids in dense-index order.
    ///
    /// Fails on an empty table or a repeated id, since either would break the
    /// bijection.
    pub fn from_raw_ids<I, S>(raw_ids: I) -> Result<Self, GenreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut lookup = HashMap::new();
        let mut ordered = Vec::new();
        for raw in raw_ids {
            let raw: String = raw.into();
            let raw = raw.trim().to_string();
            if lookup.insert(raw.clone(), ordered.len()).is_some() {
                return Err(GenreError::DuplicateCategory(raw));
            }
            ordered.push(raw);
        }
        if ordered.is_empty() {
            return Err(GenreError::EmptyTable);
        }
        Ok(Self {
            lookup,
            raw_ids: ordered,
        })
    }

    /// Number of dense labels (N)
    pub fn len(&self) -> usize {
        self.raw_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw_ids.is_empty()
    }

    /// Map one raw id to its dense index
    pub fn resolve(&self, raw_id: &str) -> Result<usize, GenreError> {
        self.lookup
            .get(raw_id.trim())
            .copied()
            .ok_or_else(|| GenreError::UnknownCategory(raw_id.to_string()))
    }

    /// Resolve a track's full category list.
    ///
    /// Empty strings are the metadata sheet's "no category" placeholder and are
    /// skipped. Any other unknown id fails the whole list: a track with a
    /// partially known label set is worse than no track.
    pub fn resolve_all<'a, I>(&self, raw_ids: I) -> Result<Vec<usize>, GenreError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        raw_ids
            .into_iter()
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| self.resolve(raw))
            .collect()
    }

    /// Raw id stored at a dense index
    pub fn raw_id(&self, index: usize) -> Option<&str> {
        self.raw_ids.get(index).map(String::as_str)
    }
}

impl Default for GenreIndex {
    fn default() -> Self {
        Self::fma()
    }
}
