//! Miogenes Core - dataset preprocessing for genre classification
//!
//! Turns a directory tree of audio files plus a metadata sheet into fixed-shape
//! training tensors:
//!
//! 1. **Catalog**: discover files, parse track ids, resolve genres through the
//!    [`genre::GenreIndex`].
//! 2. **Validation cache**: remember which ids decode and which never will.
//! 3. **Windowing**: decode, normalize to `[0, 1]` and cut fixed-length windows
//!    into the intermediate [`store::WindowStore`].
//! 4. **Assembly**: copy every window into memory-mapped train/test arrays.
//!
//! Parallel scheduling lives in the `miogenes-prep` crate; everything here is
//! usable from a single thread.

pub mod audio;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod genre;
pub mod store;
pub mod types;
pub mod window;

pub use types::*;
