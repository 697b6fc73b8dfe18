//! Per-session execution.
//!
//! `ExecutionPipeline` runs one session against a `Device`:
//! connect, optional calibration, goto, optional autofocus, capture, and an
//! unconditional disconnect. Its `PipelineReport` is what the scheduler
//! commits.

pub mod pipeline;
pub mod types;

pub use pipeline::{required_frames, ExecutionPipeline};
pub use types::{PipelineObserver, PipelineReport, PipelineState, Verdict};
