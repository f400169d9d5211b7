//! Pipeline orchestration and incremental processing for MediaLens.
//!
//! This crate decides which units of work exist (jobs and windows), which of
//! them are already processed (cursors), and what each invocation must do.
//! Content acquisition, model calls, rendering and transfer are delegated to
//! the [`collaborators`] traits.

pub mod aggregator;
pub mod audit;
pub mod bridge;
pub mod collaborators;
pub mod context;
pub mod cursor;
pub mod job_index;
pub mod operator;
pub mod orchestrator;
pub mod outputs;
pub mod progress;
pub mod runs;
pub mod steps;
pub mod window;

pub use aggregator::{ContentEntry, WeeklyAggregator, WindowContent};
pub use audit::{AUDIT_REPORT_FILE, AuditIssue, AuditReport, IssueKind, audit_jobs};
pub use bridge::{BridgeOptions, SubprocessBridge};
pub use collaborators::{
    Collaborators, Extractor, Harvester, Interpreter, Publisher, Renderer, Summarizer,
};
pub use context::{Clock, FixedClock, PipelineContext, SystemClock};
pub use cursor::CursorStore;
pub use job_index::{JobIndex, JobScope};
pub use operator::CursorOperator;
pub use orchestrator::{Orchestrator, RunReport, RunRequest, StepReport};
pub use progress::{ProgressReporter, SilentProgress};
pub use runs::{RunRegistry, new_run_id, run_status};
pub use steps::StepRequest;
