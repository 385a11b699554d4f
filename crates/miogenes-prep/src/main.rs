//! miogenes-prep - build genre-classification tensors from an audio corpus
//!
//! ```text
//! miogenes-prep [OPTIONS] <ROOT>... <METADATA>
//! ```
//!
//! Runs the pipeline in a background thread and shows one progress bar per
//! phase. Ctrl-C stops dispatching new files; files already being processed
//! finish, and the next run picks up where this one stopped. A second Ctrl-C
//! exits immediately.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use miogenes_core::config::{default_config_path, PipelineConfig, ProbeBackend};
use miogenes_prep::{run_pipeline, Phase, PipelineProgress, PipelineSummary, PrepRequest};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

/// Exit status after a forced quit (128 + SIGINT)
const FORCE_QUIT_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProbeArg {
    Symphonia,
    Ffmpeg,
}

impl From<ProbeArg> for ProbeBackend {
    fn from(arg: ProbeArg) -> Self {
        match arg {
            ProbeArg::Symphonia => ProbeBackend::Symphonia,
            ProbeArg::Ffmpeg => ProbeBackend::Ffmpeg,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "miogenes-prep", version, about)]
struct Args {
    /// Audio root directories followed by the metadata sheet (CSV)
    #[arg(required = true, num_args = 2.., value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Configuration file (default: <config dir>/miogenes/prep.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for caches, the window store and the dataset
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Parallel workers per phase (default: one per core)
    #[arg(long)]
    workers: Option<usize>,

    /// Share of windows assigned to the test partition
    #[arg(long)]
    test_fraction: Option<f64>,

    /// Split seed
    #[arg(long)]
    seed: Option<u64>,

    /// Decodability check for new files
    #[arg(long, value_enum)]
    probe: Option<ProbeArg>,

    /// Stop after extraction and keep the window store
    #[arg(long)]
    skip_assembly: bool,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,
}

impl Args {
    fn apply_overrides(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.work_dir {
            config.paths.work_dir = dir.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let Some(fraction) = self.test_fraction {
            config.split.test_fraction = fraction;
        }
        if let Some(seed) = self.seed {
            config.split.seed = seed;
        }
        if let Some(probe) = self.probe {
            config.probe.backend = probe.into();
        }
    }

    fn request(&self) -> Result<PrepRequest> {
        let (metadata, roots) = self
            .paths
            .split_last()
            .ok_or_else(|| anyhow!("expected at least one root and a metadata sheet"))?;
        Ok(PrepRequest {
            roots: roots.to_vec(),
            metadata: metadata.clone(),
            skip_assembly: self.skip_assembly,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
enum InterruptAction {
    /// First interrupt: let running files finish
    FinishRunning,
    /// Interrupted again while still finishing
    ForceQuit,
}

fn on_interrupt(cancel_flag: &AtomicBool) -> InterruptAction {
    if cancel_flag.swap(true, Ordering::SeqCst) {
        InterruptAction::ForceQuit
    } else {
        InterruptAction::FinishRunning
    }
}

fn phase_bar(phase: Phase, total: usize) -> Result<ProgressBar> {
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template(
                "{prefix:>9.bold} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )?
            .progress_chars("#>-"),
    );
    bar.set_prefix(phase.to_string());
    Ok(bar)
}

fn print_summary(summary: &PipelineSummary, config: &PipelineConfig) {
    println!();
    println!("Files seen:      {}", summary.files_seen);
    println!("Files queued:    {}", summary.files_queued);
    println!("Probes run:      {}", summary.probes_run);
    println!("Files extracted: {}", summary.files_extracted);
    println!("Windows written: {}", summary.windows_written);

    if summary.skipped.total() > 0 {
        println!("Skipped:");
        for (reason, count) in summary.skipped.by_reason() {
            if count > 0 {
                println!("  {:<20} {}", reason, count);
            }
        }
    }

    match &summary.manifest {
        Some(manifest) => println!(
            "Dataset: {} train + {} test rows ({} samples, {} labels) in {:?}",
            manifest.n_train,
            manifest.n_test,
            manifest.audio_len,
            manifest.n_labels,
            config.dataset_dir()
        ),
        None if summary.cancelled => {
            println!("Interrupted: run again with the same arguments to continue")
        }
        None => println!("Dataset not assembled"),
    }
    println!("Finished in {:.1}s", summary.elapsed.as_secs_f64());
}

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    let request = args.request()?;

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = PipelineConfig::load(&config_path)?;
    args.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;
    if args.save_config {
        config.save(&config_path)?;
    }

    let cancel_flag = Arc::new(AtomicBool::new(false));
    {
        let cancel_flag = cancel_flag.clone();
        ctrlc::set_handler(move || match on_interrupt(&cancel_flag) {
            InterruptAction::FinishRunning => {
                log::warn!("Interrupt received, finishing files in progress (Ctrl-C again to quit)")
            }
            InterruptAction::ForceQuit => {
                log::warn!("Second interrupt, exiting without waiting for running files");
                std::process::exit(FORCE_QUIT_EXIT_CODE);
            }
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    let (progress_tx, progress_rx) = mpsc::channel();
    let handle = {
        let config = config.clone();
        let request = request.clone();
        let cancel_flag = cancel_flag.clone();
        std::thread::Builder::new()
            .name("miogenes-pipeline".to_string())
            .spawn(move || run_pipeline(&config, &request, progress_tx, cancel_flag))
            .context("Failed to start pipeline thread")?
    };

    let mut bar: Option<ProgressBar> = None;
    let mut spinner: Option<ProgressBar> = None;
    for event in progress_rx {
        match event {
            PipelineProgress::PhaseStarted { phase, total } => {
                bar = Some(phase_bar(phase, total)?);
            }
            PipelineProgress::TaskFinished { .. } => {
                if let Some(bar) = &bar {
                    bar.inc(1);
                }
            }
            PipelineProgress::PhaseFinished {
                completed,
                cancelled,
                ..
            } => {
                if let Some(bar) = bar.take() {
                    if cancelled > 0 {
                        bar.abandon_with_message(format!(
                            "{} done, {} cancelled",
                            completed, cancelled
                        ));
                    } else {
                        bar.finish_with_message("done");
                    }
                }
            }
            PipelineProgress::Assembling { windows } => {
                let assembling = ProgressBar::new_spinner();
                assembling
                    .set_style(ProgressStyle::default_spinner().template("{spinner:.blue} {msg}")?);
                assembling.set_message(format!("Assembling {} windows", windows));
                assembling.enable_steady_tick(Duration::from_millis(120));
                spinner = Some(assembling);
            }
        }
    }

    let result = handle
        .join()
        .map_err(|_| anyhow!("pipeline thread panicked"))?;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let summary = result?;

    print_summary(&summary, &config);
    Ok(())
}
