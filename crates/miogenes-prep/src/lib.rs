//! Miogenes Prep - parallel preprocessing of an audio corpus
//!
//! Drives the `miogenes-core` stages over a worker pool: validation of new
//! files, window extraction, then dataset assembly.

pub mod pipeline;
pub mod pool;

pub use pipeline::{
    run_pipeline, run_pipeline_with, Phase, PipelineProgress, PipelineSummary, PrepRequest,
    SkipCounts,
};
pub use pool::{PhaseStats, TaskOutcome, WorkerPool};
