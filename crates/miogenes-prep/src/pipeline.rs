//! Two-phase preprocessing pipeline
//!
//! Discovers files, validates the ones the cache has never seen, extracts
//! windows from every file known to decode, then assembles the dataset.
//! Phases run strictly one after the other; inside a phase, files run in
//! parallel on the [`WorkerPool`].
//!
//! # Usage
//!
//! ```ignore
//! let (progress_tx, progress_rx) = std::sync::mpsc::channel();
//! let cancel_flag = Arc::new(AtomicBool::new(false));
//!
//! std::thread::spawn(move || run_pipeline(&config, &request, progress_tx, cancel_flag));
//!
//! // Poll progress_rx for updates
//! ```

use crate::pool::{TaskOutcome, WorkerPool};
use anyhow::{Context, Result};
use miogenes_core::audio::{prober_for, Decoder, ProbeVerdict, Prober, SymphoniaDecoder};
use miogenes_core::cache::{ValidationCache, Validity};
use miogenes_core::catalog::{Catalog, DiscoveryStats, MetadataSheet};
use miogenes_core::config::PipelineConfig;
use miogenes_core::dataset::manifest::MANIFEST_FILE;
use miogenes_core::dataset::{DatasetAssembler, DatasetManifest};
use miogenes_core::genre::GenreIndex;
use miogenes_core::store::WindowStore;
use miogenes_core::window::{ExtractError, ExtractOutcome, WindowExtractor};
use miogenes_core::CatalogEntry;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Inputs of one run
#[derive(Debug, Clone)]
pub struct PrepRequest {
    /// Directories searched recursively for audio files
    pub roots: Vec<PathBuf>,
    /// CSV sheet with `track_id` and `track_genres_all`
    pub metadata: PathBuf,
    /// Stop after extraction, leaving the window store in place
    pub skip_assembly: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validation,
    Extraction,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Validation => write!(f, "validate"),
            Phase::Extraction => write!(f, "extract"),
        }
    }
}

/// Progress updates sent from the pipeline thread to the UI
#[derive(Debug, Clone)]
pub enum PipelineProgress {
    PhaseStarted {
        phase: Phase,
        total: usize,
    },
    TaskFinished {
        phase: Phase,
    },
    PhaseFinished {
        phase: Phase,
        completed: usize,
        cancelled: usize,
    },
    /// Copying windows into the dataset arrays
    Assembling {
        windows: usize,
    },
}

/// Files left out of this run, by reason
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipCounts {
    pub unparsable_id: usize,
    pub unknown_category: usize,
    pub missing_metadata: usize,
    pub duplicate_id: usize,
    pub cached_bad: usize,
    pub probe_failed: usize,
    pub probe_error: usize,
    pub decode_failed: usize,
    pub silent_or_corrupt: usize,
    pub too_short: usize,
    pub store_write_failed: usize,
    pub already_processed: usize,
    pub cancelled: usize,
}

impl SkipCounts {
    fn from_discovery(stats: &DiscoveryStats) -> Self {
        Self {
            unparsable_id: stats.unparsable_id,
            unknown_category: stats.unknown_category,
            missing_metadata: stats.missing_metadata,
            duplicate_id: stats.duplicate_id,
            cached_bad: stats.cached_bad,
            already_processed: stats.already_processed,
            ..Default::default()
        }
    }

    /// Every reason with its count, in a stable order for reporting
    pub fn by_reason(&self) -> [(&'static str, usize); 13] {
        [
            ("unparsable id", self.unparsable_id),
            ("unknown category", self.unknown_category),
            ("missing metadata", self.missing_metadata),
            ("duplicate id", self.duplicate_id),
            ("cached bad", self.cached_bad),
            ("probe failed", self.probe_failed),
            ("probe error", self.probe_error),
            ("decode failed", self.decode_failed),
            ("silent or corrupt", self.silent_or_corrupt),
            ("too short", self.too_short),
            ("store write failed", self.store_write_failed),
            ("already processed", self.already_processed),
            ("cancelled", self.cancelled),
        ]
    }

    pub fn total(&self) -> usize {
        self.by_reason().iter().map(|(_, n)| n).sum()
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    pub files_seen: usize,
    /// Files handed to the worker phases
    pub files_queued: usize,
    /// Probes run this time (cached ids are never probed)
    pub probes_run: usize,
    pub files_extracted: usize,
    pub windows_written: usize,
    pub skipped: SkipCounts,
    pub cancelled: bool,
    /// Present when the dataset was assembled
    pub manifest: Option<DatasetManifest>,
    pub elapsed: Duration,
}

/// Run the pipeline with the decoder and prober the configuration selects.
///
/// This is meant to be called from a delegation thread. Per-file problems
/// are counted in the summary; only setup failures, cache write failures
/// and assembly errors return `Err`.
pub fn run_pipeline(
    config: &PipelineConfig,
    request: &PrepRequest,
    progress_tx: Sender<PipelineProgress>,
    cancel_flag: Arc<AtomicBool>,
) -> Result<PipelineSummary> {
    let decoder = SymphoniaDecoder::new();
    let prober = prober_for(&config.probe);
    run_pipeline_with(
        config,
        request,
        &decoder,
        prober.as_ref(),
        progress_tx,
        cancel_flag,
    )
}

/// [`run_pipeline`] with explicit decode and probe backends
pub fn run_pipeline_with(
    config: &PipelineConfig,
    request: &PrepRequest,
    decoder: &dyn Decoder,
    prober: &dyn Prober,
    progress_tx: Sender<PipelineProgress>,
    cancel_flag: Arc<AtomicBool>,
) -> Result<PipelineSummary> {
    let start_time = Instant::now();
    config.validate().context("Invalid configuration")?;

    // Setup: everything here is fatal when it fails
    let sheet = MetadataSheet::load(&request.metadata)
        .with_context(|| format!("Failed to load metadata sheet {:?}", request.metadata))?;
    let genres = match &config.genres {
        Some(table) => GenreIndex::from_raw_ids(table.iter().cloned())
            .context("Invalid genre table in configuration")?,
        None => GenreIndex::fma(),
    };
    std::fs::create_dir_all(&config.paths.work_dir)
        .with_context(|| format!("Failed to create work dir {:?}", config.paths.work_dir))?;
    let mut cache = ValidationCache::open(&config.good_log_path(), &config.bad_log_path())
        .context("Failed to open validation cache")?;
    let store = WindowStore::open(&config.samples_dir(), config.audio_len(), genres.len())
        .context("Failed to open window store")?;
    let pool = WorkerPool::new(config.worker_count())?;

    // Discovery
    let discovery = Catalog::new(&sheet, &genres, &cache, &store)
        .discover(&request.roots)
        .context("File discovery failed")?;
    let mut summary = PipelineSummary {
        files_seen: discovery.stats.files_seen,
        files_queued: discovery.entries.len(),
        skipped: SkipCounts::from_discovery(&discovery.stats),
        ..Default::default()
    };

    // Phase 1: probe ids the cache has never seen
    let unknown: Vec<&CatalogEntry> = discovery
        .entries
        .iter()
        .filter(|entry| cache.status(entry.id) == Validity::Unknown)
        .collect();
    log::info!(
        "run_pipeline: Validating {} of {} queued files",
        unknown.len(),
        discovery.entries.len()
    );
    let phase = Phase::Validation;
    let _ = progress_tx.send(PipelineProgress::PhaseStarted {
        phase,
        total: unknown.len(),
    });
    let stats = pool.run_phase(
        &unknown,
        &cancel_flag,
        |entry| prober.probe(&entry.path),
        |entry, outcome| -> Result<()> {
            match outcome {
                TaskOutcome::Done(Ok(ProbeVerdict::Decodable)) => {
                    summary.probes_run += 1;
                    cache.record_good(entry.id)?;
                }
                TaskOutcome::Done(Ok(ProbeVerdict::Undecodable(reason))) => {
                    summary.probes_run += 1;
                    log::warn!("run_pipeline: {:?} is not decodable: {}", entry.path, reason);
                    cache.record_bad(entry.id)?;
                    summary.skipped.probe_failed += 1;
                }
                TaskOutcome::Done(Err(e)) => {
                    log::warn!(
                        "run_pipeline: Could not probe {:?}: {:#}",
                        entry.path,
                        anyhow::Error::new(e)
                    );
                    summary.skipped.probe_error += 1;
                }
                // A decoder that crashes on the file counts as a failed probe
                TaskOutcome::Panicked(msg) => {
                    summary.probes_run += 1;
                    log::warn!("run_pipeline: Probe of {:?} panicked: {}", entry.path, msg);
                    cache.record_bad(entry.id)?;
                    summary.skipped.probe_failed += 1;
                }
                TaskOutcome::Cancelled => summary.skipped.cancelled += 1,
            }
            let _ = progress_tx.send(PipelineProgress::TaskFinished { phase });
            Ok(())
        },
    )?;
    cache.sync().context("Failed to flush validation cache")?;
    log::info!(
        "run_pipeline: Validation done, {} probed, {} cancelled ({} good, {} bad cached in total)",
        stats.completed,
        stats.cancelled,
        cache.good_count(),
        cache.bad_count()
    );
    let _ = progress_tx.send(PipelineProgress::PhaseFinished {
        phase,
        completed: stats.completed,
        cancelled: stats.cancelled,
    });

    // Phase 2: extract every queued file now known to decode
    let good: Vec<&CatalogEntry> = discovery
        .entries
        .iter()
        .filter(|entry| cache.status(entry.id) == Validity::Good)
        .collect();
    let extractor = WindowExtractor::new(
        decoder,
        &store,
        &config.windows,
        config.audio.sampling_rate,
    );
    log::info!("run_pipeline: Extracting windows from {} files", good.len());
    let phase = Phase::Extraction;
    let _ = progress_tx.send(PipelineProgress::PhaseStarted {
        phase,
        total: good.len(),
    });
    let stats = pool.run_phase(
        &good,
        &cancel_flag,
        |entry| extractor.extract(entry),
        |entry, outcome| -> Result<()> {
            match outcome {
                TaskOutcome::Done(Ok(ExtractOutcome::Extracted { windows })) => {
                    summary.files_extracted += 1;
                    summary.windows_written += windows as usize;
                }
                TaskOutcome::Done(Ok(ExtractOutcome::Silent)) => {
                    log::warn!(
                        "run_pipeline: {:?} is silent or corrupt, no windows",
                        entry.path
                    );
                    summary.skipped.silent_or_corrupt += 1;
                }
                TaskOutcome::Done(Ok(ExtractOutcome::TooShort { len })) => {
                    log::warn!(
                        "run_pipeline: {:?} is too short ({} samples), no windows",
                        entry.path,
                        len
                    );
                    summary.skipped.too_short += 1;
                }
                TaskOutcome::Done(Err(ExtractError::Decode(e))) => {
                    log::warn!(
                        "run_pipeline: Failed to decode {:?}: {:#}",
                        entry.path,
                        anyhow::Error::new(e)
                    );
                    summary.skipped.decode_failed += 1;
                }
                TaskOutcome::Done(Err(ExtractError::Store(e))) => {
                    log::warn!(
                        "run_pipeline: Failed to store windows of {:?}: {:#}",
                        entry.path,
                        anyhow::Error::new(e)
                    );
                    summary.skipped.store_write_failed += 1;
                }
                TaskOutcome::Panicked(msg) => {
                    log::warn!("run_pipeline: Decoding {:?} panicked: {}", entry.path, msg);
                    summary.skipped.decode_failed += 1;
                }
                TaskOutcome::Cancelled => summary.skipped.cancelled += 1,
            }
            let _ = progress_tx.send(PipelineProgress::TaskFinished { phase });
            Ok(())
        },
    )?;
    let _ = progress_tx.send(PipelineProgress::PhaseFinished {
        phase,
        completed: stats.completed,
        cancelled: stats.cancelled,
    });

    // Assembly
    summary.cancelled = cancel_flag.load(Ordering::Relaxed);
    let windows = if summary.cancelled || request.skip_assembly {
        0
    } else {
        store.enumerate().context("Failed to list window store")?.len()
    };
    if summary.cancelled {
        log::info!("run_pipeline: Cancelled, skipping assembly");
    } else if request.skip_assembly {
        log::info!("run_pipeline: Assembly skipped on request");
    } else if windows == 0 && config.dataset_dir().join(MANIFEST_FILE).exists() {
        // Everything was consumed by an earlier assembly
        log::info!("run_pipeline: No windows in the store, keeping the existing dataset");
    } else {
        let _ = progress_tx.send(PipelineProgress::Assembling { windows });
        let assembler = DatasetAssembler::new(
            &store,
            &config.split,
            config.audio.sampling_rate,
            &config.dataset_dir(),
        );
        let manifest = assembler.assemble().context("Dataset assembly failed")?;
        if config.consume_windows {
            assembler
                .consume()
                .context("Failed to clear the window store")?;
        }
        summary.manifest = Some(manifest);
    }

    summary.elapsed = start_time.elapsed();
    log::info!(
        "run_pipeline: Complete in {:.1}s - {} files extracted, {} windows, {} skipped",
        summary.elapsed.as_secs_f64(),
        summary.files_extracted,
        summary.windows_written,
        summary.skipped.total()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use miogenes_core::audio::{DecodeError, DecodedAudio, ProbeError, SymphoniaProber};
    use miogenes_core::config::SplitPolicy;
    use miogenes_core::dataset::manifest::{
        FEATURES_TEST_FILE, FEATURES_TRAIN_FILE, LABELS_TEST_FILE, LABELS_TRAIN_FILE,
    };
    use miogenes_core::store::from_le_bytes;
    use std::f32::consts::PI;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    const RATE: u32 = 8000;

    fn write_wav(path: &Path, secs: u32, sample: impl Fn(usize) -> f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..(RATE * secs) as usize {
            writer
                .write_sample((sample(i) * i16::MAX as f32 * 0.5) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }

    /// The three-file corpus: a 20 s sine, 20 s of silence and a corrupt file,
    /// all tagged with genres 1 and 5.
    fn corpus(dir: &Path) -> PrepRequest {
        let root = dir.join("audio");
        fs::create_dir_all(&root).unwrap();
        write_wav(&root.join("000001.wav"), 20, |i| {
            (2.0 * PI * 440.0 * i as f32 / RATE as f32).sin()
        });
        write_wav(&root.join("000002.wav"), 20, |_| 0.0);
        fs::write(root.join("000003.mp3"), b"definitely not audio data").unwrap();

        let metadata = dir.join("tracks.csv");
        fs::write(
            &metadata,
            "track_id,title,track_genres_all\n\
             1,Sine,\"[1, 5]\"\n\
             2,Silence,\"[1, 5]\"\n\
             3,Broken,\"[1, 5]\"\n",
        )
        .unwrap();

        PrepRequest {
            roots: vec![root],
            metadata,
            skip_assembly: false,
        }
    }

    fn config_in(work_dir: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.paths.work_dir = work_dir.to_path_buf();
        config.split.test_fraction = 0.5;
        config.workers = Some(2);
        config
    }

    fn run(
        config: &PipelineConfig,
        request: &PrepRequest,
        decoder: &dyn Decoder,
        prober: &dyn Prober,
        cancel: Arc<AtomicBool>,
    ) -> PipelineSummary {
        let (tx, _rx) = mpsc::channel();
        run_pipeline_with(config, request, decoder, prober, tx, cancel).unwrap()
    }

    fn read_rows(path: &Path, width: usize) -> Vec<Vec<f32>> {
        from_le_bytes(&fs::read(path).unwrap())
            .chunks(width)
            .map(|c| c.to_vec())
            .collect()
    }

    struct CountingProber {
        inner: SymphoniaProber,
        calls: AtomicUsize,
    }

    impl Prober for CountingProber {
        fn probe(&self, path: &Path) -> Result<ProbeVerdict, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.probe(path)
        }
    }

    /// Raises the cancel flag as soon as the first file has been decoded
    struct CancelAfterFirst {
        inner: SymphoniaDecoder,
        flag: Arc<AtomicBool>,
    }

    impl Decoder for CancelAfterFirst {
        fn decode(&self, path: &Path, target_rate: u32) -> Result<DecodedAudio, DecodeError> {
            let audio = self.inner.decode(path, target_rate);
            self.flag.store(true, Ordering::SeqCst);
            audio
        }
    }

    #[test]
    fn test_end_to_end_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let request = corpus(dir.path());
        let work = dir.path().join("work");
        let config = config_in(&work);

        let (tx, rx) = mpsc::channel();
        let summary =
            run_pipeline(&config, &request, tx, Arc::new(AtomicBool::new(false))).unwrap();

        // Corrupt file is cached as bad, the other two as good
        let bad = fs::read_to_string(work.join("bad_ids.txt")).unwrap();
        assert_eq!(bad, "3\n");
        let good = fs::read_to_string(work.join("good_ids.txt")).unwrap();
        let mut good: Vec<&str> = good.lines().collect();
        good.sort();
        assert_eq!(good, vec!["1", "2"]);

        // 160000 samples, windows of 120000 every 28000: two windows
        assert_eq!(summary.windows_written, 2);
        assert_eq!(summary.files_extracted, 1);
        assert_eq!(summary.skipped.probe_failed, 1);
        assert_eq!(summary.skipped.silent_or_corrupt, 1);
        assert!(!summary.cancelled);

        let manifest = summary.manifest.unwrap();
        assert_eq!(manifest.total(), 2);
        assert_eq!(manifest.n_test, 1);
        assert_eq!(manifest.audio_len, 120_000);
        assert_eq!(manifest.n_labels, 163);

        for (features, labels) in [
            (FEATURES_TRAIN_FILE, LABELS_TRAIN_FILE),
            (FEATURES_TEST_FILE, LABELS_TEST_FILE),
        ] {
            for row in read_rows(&work.join(features), 120_000) {
                assert!(row.iter().all(|s| (0.0..=1.0).contains(s)));
            }
            for row in read_rows(&work.join(labels), 163) {
                assert_eq!(row[0], 1.0);
                assert_eq!(row[4], 1.0);
                assert_eq!(row.iter().sum::<f32>(), 2.0);
            }
        }

        let events: Vec<PipelineProgress> = rx.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineProgress::Assembling { windows: 2 })));
        let finished = events
            .iter()
            .filter(|e| matches!(e, PipelineProgress::TaskFinished { .. }))
            .count();
        // Three probes plus two extractions
        assert_eq!(finished, 5);
    }

    #[test]
    fn test_second_run_probes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let request = corpus(dir.path());
        let work = dir.path().join("work");
        let config = config_in(&work);
        let decoder = SymphoniaDecoder::new();

        let prober = CountingProber {
            inner: SymphoniaProber::default(),
            calls: AtomicUsize::new(0),
        };
        run(&config, &request, &decoder, &prober, Arc::new(AtomicBool::new(false)));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 3);
        let good_before = fs::read_to_string(work.join("good_ids.txt")).unwrap();
        let bad_before = fs::read_to_string(work.join("bad_ids.txt")).unwrap();

        let prober = CountingProber {
            inner: SymphoniaProber::default(),
            calls: AtomicUsize::new(0),
        };
        let summary = run(&config, &request, &decoder, &prober, Arc::new(AtomicBool::new(false)));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
        assert_eq!(summary.probes_run, 0);
        assert_eq!(summary.skipped.cached_bad, 1);
        assert_eq!(summary.skipped.already_processed, 2);
        assert_eq!(summary.manifest.unwrap().total(), 2);

        assert_eq!(fs::read_to_string(work.join("good_ids.txt")).unwrap(), good_before);
        assert_eq!(fs::read_to_string(work.join("bad_ids.txt")).unwrap(), bad_before);
    }

    #[test]
    fn test_interrupted_run_resumes_to_same_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let request = corpus(dir.path());
        let prober = SymphoniaProber::default();
        let decoder = SymphoniaDecoder::new();

        // Reference: one uninterrupted run
        let reference = dir.path().join("reference");
        let mut config = config_in(&reference);
        config.split.policy = SplitPolicy::Interleave;
        config.workers = Some(1);
        run(&config, &request, &decoder, &prober, Arc::new(AtomicBool::new(false)));

        // Interrupted after the first extraction, then resumed
        let resumed = dir.path().join("resumed");
        config.paths.work_dir = resumed.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let interrupting = CancelAfterFirst {
            inner: SymphoniaDecoder::new(),
            flag: cancel.clone(),
        };
        let first = run(&config, &request, &interrupting, &prober, cancel);
        assert!(first.cancelled);
        assert_eq!(first.skipped.cancelled, 1);
        assert!(first.manifest.is_none());
        assert!(!resumed.join(FEATURES_TRAIN_FILE).exists());

        let second = run(&config, &request, &decoder, &prober, Arc::new(AtomicBool::new(false)));
        assert!(!second.cancelled);
        assert_eq!(second.skipped.already_processed, 1);
        assert_eq!(second.probes_run, 0);

        for name in [
            FEATURES_TRAIN_FILE,
            LABELS_TRAIN_FILE,
            FEATURES_TEST_FILE,
            LABELS_TEST_FILE,
        ] {
            assert_eq!(
                fs::read(reference.join(name)).unwrap(),
                fs::read(resumed.join(name)).unwrap(),
                "{} differs",
                name
            );
        }
    }

    #[test]
    fn test_skip_assembly_leaves_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = corpus(dir.path());
        request.skip_assembly = true;
        let work = dir.path().join("work");
        let config = config_in(&work);

        let (tx, _rx) = mpsc::channel();
        let summary =
            run_pipeline(&config, &request, tx, Arc::new(AtomicBool::new(false))).unwrap();
        assert!(summary.manifest.is_none());
        assert_eq!(summary.windows_written, 2);
        assert!(work.join("samples").join("done.000001").exists());
        assert!(!work.join(FEATURES_TRAIN_FILE).exists());
    }

    #[test]
    fn test_missing_metadata_sheet_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = corpus(dir.path());
        request.metadata = dir.path().join("missing.csv");
        let config = config_in(&dir.path().join("work"));

        let (tx, _rx) = mpsc::channel();
        let err = run_pipeline(&config, &request, tx, Arc::new(AtomicBool::new(false)))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("metadata sheet"));
    }

    #[test]
    fn test_consume_windows_empties_store() {
        let dir = tempfile::tempdir().unwrap();
        let request = corpus(dir.path());
        let work = dir.path().join("work");
        let mut config = config_in(&work);
        config.consume_windows = true;

        let (tx, _rx) = mpsc::channel();
        let summary =
            run_pipeline(&config, &request, tx, Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(summary.manifest.unwrap().total(), 2);
        assert!(!work.join("samples").join("x.000001.0000.f32").exists());
    }

    #[test]
    fn test_consumed_tracks_are_not_extracted_again() {
        let dir = tempfile::tempdir().unwrap();
        let request = corpus(dir.path());
        let work = dir.path().join("work");
        let mut config = config_in(&work);
        config.consume_windows = true;

        let (tx, _rx) = mpsc::channel();
        run_pipeline(&config, &request, tx, Arc::new(AtomicBool::new(false))).unwrap();
        let features = fs::read(work.join(FEATURES_TRAIN_FILE)).unwrap();
        let manifest = fs::read_to_string(work.join(MANIFEST_FILE)).unwrap();

        let (tx, _rx) = mpsc::channel();
        let second =
            run_pipeline(&config, &request, tx, Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(second.files_extracted, 0);
        assert_eq!(second.windows_written, 0);
        assert_eq!(second.skipped.already_processed, 2);
        assert_eq!(second.skipped.cached_bad, 1);
        assert!(second.manifest.is_none());

        // The first run's dataset is left as it was
        assert_eq!(fs::read(work.join(FEATURES_TRAIN_FILE)).unwrap(), features);
        assert_eq!(fs::read_to_string(work.join(MANIFEST_FILE)).unwrap(), manifest);
    }

    /// Panics on one file, decodes the others normally
    struct PanicsOn {
        inner: SymphoniaDecoder,
        file_name: &'static str,
    }

    impl Decoder for PanicsOn {
        fn decode(&self, path: &Path, target_rate: u32) -> Result<DecodedAudio, DecodeError> {
            if path.ends_with(self.file_name) {
                panic!("decoder crashed on {:?}", path);
            }
            self.inner.decode(path, target_rate)
        }
    }

    impl Prober for PanicsOn {
        fn probe(&self, path: &Path) -> Result<ProbeVerdict, ProbeError> {
            if path.ends_with(self.file_name) {
                panic!("decoder crashed on {:?}", path);
            }
            SymphoniaProber::default().probe(path)
        }
    }

    #[test]
    fn test_panicking_decoder_skips_only_that_file() {
        let dir = tempfile::tempdir().unwrap();
        let request = corpus(dir.path());
        let work = dir.path().join("work");
        let config = config_in(&work);
        let decoder = PanicsOn {
            inner: SymphoniaDecoder::new(),
            file_name: "000002.wav",
        };

        let summary = run(
            &config,
            &request,
            &decoder,
            &SymphoniaProber::default(),
            Arc::new(AtomicBool::new(false)),
        );
        assert_eq!(summary.skipped.decode_failed, 1);
        assert_eq!(summary.files_extracted, 1);
        assert_eq!(summary.windows_written, 2);
        assert_eq!(summary.manifest.unwrap().total(), 2);

        // Not cached as bad; no marker, so the next run tries again
        let bad = fs::read_to_string(work.join("bad_ids.txt")).unwrap();
        assert_eq!(bad, "3\n");
        assert!(!work.join("samples").join("done.000002").exists());
    }

    #[test]
    fn test_panicking_probe_caches_file_as_bad() {
        let dir = tempfile::tempdir().unwrap();
        let request = corpus(dir.path());
        let work = dir.path().join("work");
        let config = config_in(&work);
        let prober = PanicsOn {
            inner: SymphoniaDecoder::new(),
            file_name: "000001.wav",
        };

        let summary = run(
            &config,
            &request,
            &SymphoniaDecoder::new(),
            &prober,
            Arc::new(AtomicBool::new(false)),
        );
        assert_eq!(summary.probes_run, 3);
        assert_eq!(summary.skipped.probe_failed, 2);
        let mut bad: Vec<String> = fs::read_to_string(work.join("bad_ids.txt"))
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        bad.sort();
        assert_eq!(bad, vec!["1", "3"]);

        // Only the silent file is left, and it yields no windows
        assert_eq!(summary.files_extracted, 0);
        assert_eq!(summary.skipped.silent_or_corrupt, 1);
        assert_eq!(summary.manifest.unwrap().total(), 0);
    }

    #[test]
    fn test_skip_counts_total() {
        let counts = SkipCounts {
            cached_bad: 2,
            too_short: 1,
            cancelled: 4,
            ..Default::default()
        };
        assert_eq!(counts.total(), 7);
        assert_eq!(counts.by_reason()[4], ("cached bad", 2));
    }
}
