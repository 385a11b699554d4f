//! Two-pass assembly of the memory-mapped dataset arrays
//!
//! Pass one counts every window in the store and fixes the split. The four
//! output files are then sized up front and filled row by row in a single
//! sequential copy pass.

use super::manifest::{
    DatasetFiles, DatasetManifest, FEATURES_TEST_FILE, FEATURES_TRAIN_FILE, LABELS_TEST_FILE,
    LABELS_TRAIN_FILE, MANIFEST_FILE,
};
use super::split::{split_keys, Partition};
use super::DatasetError;
use crate::config::SplitConfig;
use crate::store::WindowStore;
use crate::types::{TrackId, WindowKey};
use memmap2::MmapMut;
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// One fixed-size row-major output file
struct MappedArray {
    path: PathBuf,
    /// None for zero-row arrays, which stay empty files
    map: Option<MmapMut>,
    row_bytes: usize,
}

impl MappedArray {
    fn create(path: PathBuf, rows: usize, row_bytes: usize) -> Result<Self, DatasetError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| DatasetError::Io {
                path: path.clone(),
                source,
            })?;
        file.set_len((rows * row_bytes) as u64)
            .map_err(|source| DatasetError::Io {
                path: path.clone(),
                source,
            })?;

        let map = if rows == 0 || row_bytes == 0 {
            None
        } else {
            // Safety: the file was just created and sized by us, and nothing
            // else truncates it while the mapping lives.
            let map = unsafe { MmapMut::map_mut(&file) }.map_err(|source| DatasetError::Map {
                path: path.clone(),
                source,
            })?;
            Some(map)
        };

        Ok(Self {
            path,
            map,
            row_bytes,
        })
    }

    fn row_mut(&mut self, row: usize) -> &mut [u8] {
        match self.map.as_mut() {
            Some(map) => &mut map[row * self.row_bytes..(row + 1) * self.row_bytes],
            None => &mut [],
        }
    }

    fn flush(&self) -> Result<(), DatasetError> {
        if let Some(map) = &self.map {
            map.flush().map_err(|source| DatasetError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Feature and label arrays of one partition plus its written-row bitmap
struct PartitionWriter {
    partition: Partition,
    features: MappedArray,
    labels: MappedArray,
    written: Vec<bool>,
}

impl PartitionWriter {
    fn create(
        partition: Partition,
        dir: &Path,
        (features_name, labels_name): (&str, &str),
        rows: usize,
        store: &WindowStore,
    ) -> Result<Self, DatasetError> {
        Ok(Self {
            partition,
            features: MappedArray::create(
                dir.join(features_name),
                rows,
                store.window_bytes() as usize,
            )?,
            labels: MappedArray::create(dir.join(labels_name), rows, store.label_bytes() as usize)?,
            written: vec![false; rows],
        })
    }

    fn write_row(
        &mut self,
        row: usize,
        key: WindowKey,
        label: &[u8],
        store: &WindowStore,
    ) -> Result<(), DatasetError> {
        store.read_window_bytes(key, self.features.row_mut(row))?;
        self.labels.row_mut(row).copy_from_slice(label);
        self.written[row] = true;
        Ok(())
    }

    /// Every row must have been written exactly once
    fn finish(self) -> Result<(), DatasetError> {
        if let Some(row) = self.written.iter().position(|w| !w) {
            return Err(DatasetError::RowGap {
                partition: self.partition,
                row,
            });
        }
        self.features.flush()?;
        self.labels.flush()
    }
}

/// Fail if the store's complete windows differ from the set assembly was sized for
fn check_store_unchanged(
    store: &WindowStore,
    sized_for: &[WindowKey],
) -> Result<(), DatasetError> {
    let now = store.enumerate()?;
    if now != sized_for {
        return Err(DatasetError::AssemblyCountMismatch {
            expected: sized_for.len(),
            found: now.len(),
        });
    }
    Ok(())
}

/// Builds the train/test arrays from a window store
pub struct DatasetAssembler<'a> {
    store: &'a WindowStore,
    split: &'a SplitConfig,
    sample_rate: u32,
    out_dir: PathBuf,
}

impl<'a> DatasetAssembler<'a> {
    pub fn new(
        store: &'a WindowStore,
        split: &'a SplitConfig,
        sample_rate: u32,
        out_dir: &Path,
    ) -> Self {
        Self {
            store,
            split,
            sample_rate,
            out_dir: out_dir.to_path_buf(),
        }
    }

    fn output_paths(&self) -> [PathBuf; 5] {
        [
            FEATURES_TRAIN_FILE,
            LABELS_TRAIN_FILE,
            FEATURES_TEST_FILE,
            LABELS_TEST_FILE,
            MANIFEST_FILE,
        ]
        .map(|name| self.out_dir.join(name))
    }

    /// Count, split, allocate, copy, verify and write the manifest.
    ///
    /// On any error the partially written arrays are removed.
    pub fn assemble(&self) -> Result<DatasetManifest, DatasetError> {
        fs::create_dir_all(&self.out_dir).map_err(|source| DatasetError::Io {
            path: self.out_dir.clone(),
            source,
        })?;

        match self.assemble_inner() {
            Ok(manifest) => Ok(manifest),
            Err(e) => {
                log::error!("assemble: {}, removing partial output", e);
                for path in self.output_paths() {
                    let _ = fs::remove_file(path);
                }
                Err(e)
            }
        }
    }

    fn assemble_inner(&self) -> Result<DatasetManifest, DatasetError> {
        let keys = self.store.enumerate()?;
        let plan = split_keys(&keys, self.split);
        log::info!(
            "assemble: {} windows ({} train, {} test) into {:?}",
            keys.len(),
            plan.train.len(),
            plan.test.len(),
            self.out_dir
        );

        let mut labels: HashMap<TrackId, Vec<u8>> = HashMap::new();

        for (partition, rows, names) in [
            (
                Partition::Train,
                &plan.train,
                (FEATURES_TRAIN_FILE, LABELS_TRAIN_FILE),
            ),
            (
                Partition::Test,
                &plan.test,
                (FEATURES_TEST_FILE, LABELS_TEST_FILE),
            ),
        ] {
            let mut writer =
                PartitionWriter::create(partition, &self.out_dir, names, rows.len(), self.store)?;
            for (row, &key) in rows.iter().enumerate() {
                if !labels.contains_key(&key.source_id) {
                    let bytes = self.store.read_label_bytes(key.source_id)?;
                    labels.insert(key.source_id, bytes);
                }
                let label = &labels[&key.source_id];
                writer.write_row(row, key, label, self.store)?;
                if (row + 1) % 10_000 == 0 {
                    log::debug!("assemble: {} {} rows copied", row + 1, partition);
                }
            }
            writer.finish()?;
        }

        check_store_unchanged(self.store, &keys)?;

        let manifest = DatasetManifest {
            n_train: plan.train.len(),
            n_test: plan.test.len(),
            audio_len: self.store.audio_len(),
            n_labels: self.store.n_labels(),
            sample_rate: self.sample_rate,
            dtype: "float32".to_string(),
            byte_order: "little".to_string(),
            split_policy: self.split.policy,
            test_fraction: self.split.test_fraction,
            seed: self.split.seed,
            files: DatasetFiles::default(),
        };
        manifest.write(&self.out_dir)?;
        log::info!("assemble: Wrote {:?}", self.out_dir.join(MANIFEST_FILE));
        Ok(manifest)
    }

    /// Delete the sample files of every track that went into the dataset.
    ///
    /// The tracks stay marked as processed, so later runs neither extract
    /// nor assemble them again.
    pub fn consume(&self) -> Result<usize, DatasetError> {
        let ids: BTreeSet<TrackId> = self
            .store
            .enumerate()?
            .into_iter()
            .map(|key| key.source_id)
            .collect();
        let mut consumed = 0;
        for &id in &ids {
            if self.store.consume(id)? {
                consumed += 1;
            }
        }
        log::info!("consume: Removed windows of {} tracks from the store", consumed);
        Ok(consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SplitPolicy;
    use crate::store::{from_le_bytes, Presence};
    use crate::types::{LabelVector, Window};

    const AUDIO_LEN: usize = 16;
    const N_LABELS: usize = 6;

    /// Fill a store: track id -> (window count, categories).
    /// Every sample of window (id, i) holds `id * 0.1 + i * 0.01`.
    fn fill_store(dir: &Path, tracks: &[(TrackId, u32, &[usize])]) -> WindowStore {
        let store = WindowStore::open(&dir.join("samples"), AUDIO_LEN, N_LABELS).unwrap();
        for &(id, count, categories) in tracks {
            for index in 0..count {
                let samples = vec![window_value(WindowKey::new(id, index)); AUDIO_LEN];
                store
                    .write_window(&Window {
                        key: WindowKey::new(id, index),
                        samples: &samples,
                    })
                    .unwrap();
            }
            if count > 0 {
                store
                    .write_label(&LabelVector::from_categories(id, categories, N_LABELS))
                    .unwrap();
            }
            store.mark_done(id, count).unwrap();
        }
        store
    }

    fn window_value(key: WindowKey) -> f32 {
        key.source_id as f32 * 0.1 + key.window_index as f32 * 0.01
    }

    fn read_rows(path: &Path, width: usize) -> Vec<Vec<f32>> {
        let values = from_le_bytes(&fs::read(path).unwrap());
        values.chunks(width).map(|c| c.to_vec()).collect()
    }

    #[test]
    fn test_interleave_assembly_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = fill_store(dir.path(), &[(1, 2, &[0, 4]), (2, 1, &[5]), (3, 0, &[1])]);
        let split = SplitConfig {
            policy: SplitPolicy::Interleave,
            test_fraction: 0.5,
            seed: 0,
        };
        let out = dir.path().join("out");
        let manifest = DatasetAssembler::new(&store, &split, 8000, &out)
            .assemble()
            .unwrap();

        assert_eq!(manifest.n_train, 1);
        assert_eq!(manifest.n_test, 2);
        assert_eq!(manifest.audio_len, AUDIO_LEN);
        assert_eq!(manifest.n_labels, N_LABELS);

        // Sorted keys (1,0) (1,1) (2,0): positions 0 and 2 are test
        let test_features = read_rows(&out.join(FEATURES_TEST_FILE), AUDIO_LEN);
        let test_labels = read_rows(&out.join(LABELS_TEST_FILE), N_LABELS);
        assert_eq!(test_features.len(), 2);
        assert!(test_features[0].iter().all(|&v| v == window_value(WindowKey::new(1, 0))));
        assert!(test_features[1].iter().all(|&v| v == window_value(WindowKey::new(2, 0))));
        assert_eq!(test_labels[0], vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(test_labels[1], vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);

        let train_features = read_rows(&out.join(FEATURES_TRAIN_FILE), AUDIO_LEN);
        assert_eq!(train_features.len(), 1);
        assert!(train_features[0].iter().all(|&v| v == window_value(WindowKey::new(1, 1))));

        assert_eq!(DatasetManifest::read(&out).unwrap(), manifest);
    }

    #[test]
    fn test_shuffle_assembly_covers_every_window_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = fill_store(
            dir.path(),
            &[(1, 3, &[0]), (2, 4, &[1]), (4, 2, &[2]), (7, 1, &[3])],
        );
        let split = SplitConfig {
            policy: SplitPolicy::Shuffle,
            test_fraction: 0.3,
            seed: 42,
        };
        let out = dir.path().join("out");
        let manifest = DatasetAssembler::new(&store, &split, 8000, &out)
            .assemble()
            .unwrap();
        assert_eq!(manifest.n_test, 3);
        assert_eq!(manifest.total(), 10);

        let mut rows: Vec<(Vec<f32>, Vec<f32>)> = Vec::new();
        for (features, labels) in [
            (FEATURES_TRAIN_FILE, LABELS_TRAIN_FILE),
            (FEATURES_TEST_FILE, LABELS_TEST_FILE),
        ] {
            let f = read_rows(&out.join(features), AUDIO_LEN);
            let l = read_rows(&out.join(labels), N_LABELS);
            assert_eq!(f.len(), l.len());
            rows.extend(f.into_iter().zip(l));
        }

        let mut expected: Vec<f32> = store
            .enumerate()
            .unwrap()
            .into_iter()
            .map(window_value)
            .collect();
        let mut found: Vec<f32> = rows.iter().map(|(f, _)| f[0]).collect();
        expected.sort_by(f32::total_cmp);
        found.sort_by(f32::total_cmp);
        assert_eq!(found, expected);

        // Features and labels stay paired: the label matches the row's track
        for (features, labels) in &rows {
            let id = (features[0] * 10.0 + 1e-3).floor() as usize;
            let category = match id {
                1 => 0,
                2 => 1,
                4 => 2,
                _ => 3,
            };
            assert_eq!(labels[category], 1.0);
            assert_eq!(labels.iter().sum::<f32>(), 1.0);
        }
    }

    #[test]
    fn test_empty_partition_writes_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = fill_store(dir.path(), &[(1, 2, &[0])]);
        let split = SplitConfig {
            test_fraction: 0.0,
            ..Default::default()
        };
        let out = dir.path().join("out");
        let manifest = DatasetAssembler::new(&store, &split, 8000, &out)
            .assemble()
            .unwrap();

        assert_eq!(manifest.n_test, 0);
        assert_eq!(fs::metadata(out.join(FEATURES_TEST_FILE)).unwrap().len(), 0);
        assert_eq!(fs::metadata(out.join(LABELS_TEST_FILE)).unwrap().len(), 0);
        assert_eq!(
            fs::metadata(out.join(FEATURES_TRAIN_FILE)).unwrap().len(),
            (2 * AUDIO_LEN * 4) as u64
        );
    }

    #[test]
    fn test_unwritten_row_is_gap() {
        let dir = tempfile::tempdir().unwrap();
        let store = fill_store(dir.path(), &[(1, 2, &[0])]);
        let mut writer = PartitionWriter::create(
            Partition::Test,
            dir.path(),
            ("f.f32", "l.f32"),
            2,
            &store,
        )
        .unwrap();
        let label = store.read_label_bytes(1).unwrap();
        writer
            .write_row(0, WindowKey::new(1, 0), &label, &store)
            .unwrap();

        match writer.finish() {
            Err(DatasetError::RowGap { partition, row }) => {
                assert_eq!(partition, Partition::Test);
                assert_eq!(row, 1);
            }
            other => panic!("expected a row gap, got {other:?}"),
        }
    }

    #[test]
    fn test_store_change_is_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = fill_store(dir.path(), &[(1, 2, &[0])]);
        let keys = store.enumerate().unwrap();
        check_store_unchanged(&store, &keys).unwrap();

        let samples = vec![0.5f32; AUDIO_LEN];
        store
            .write_window(&Window {
                key: WindowKey::new(9, 0),
                samples: &samples,
            })
            .unwrap();
        store
            .write_label(&LabelVector::from_categories(9, &[1], N_LABELS))
            .unwrap();
        store.mark_done(9, 1).unwrap();

        match check_store_unchanged(&store, &keys) {
            Err(DatasetError::AssemblyCountMismatch { expected, found }) => {
                assert_eq!(expected, 2);
                assert_eq!(found, 3);
            }
            other => panic!("expected a count mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_track_is_left_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = fill_store(dir.path(), &[(1, 2, &[0])]);
        fs::write(store.label_path(1), b"xx").unwrap();

        let out = dir.path().join("out");
        let manifest = DatasetAssembler::new(&store, &SplitConfig::default(), 8000, &out)
            .assemble()
            .unwrap();
        // Corrupt track is left out entirely, not copied with a broken label
        assert_eq!(manifest.total(), 0);
        assert!(out.join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_consume_keeps_tracks_marked_processed() {
        let dir = tempfile::tempdir().unwrap();
        let store = fill_store(dir.path(), &[(1, 2, &[0]), (2, 1, &[1])]);
        let split = SplitConfig::default();
        let assembler = DatasetAssembler::new(&store, &split, 8000, &dir.path().join("out"));
        assembler.assemble().unwrap();

        assert_eq!(assembler.consume().unwrap(), 2);
        assert!(store.enumerate().unwrap().is_empty());
        assert_eq!(store.presence(1), Presence::Consumed(2));
        assert_eq!(store.presence(2), Presence::Consumed(1));
        assert!(!store.window_path(WindowKey::new(1, 0)).exists());
    }
}
