//! Shared types, error model, and configuration for MediaLens.
//!
//! This crate is the foundation depended on by all other MediaLens crates.
//! It provides:
//! - [`MediaLensError`], the unified error type
//! - Domain types ([`JobKey`], [`Job`], [`Window`], [`Step`], [`CursorRecord`], [`RunRecord`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BridgeConfig, DefaultsConfig, DeployConfig, PipelineConfig, QuestionsConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, render_config,
};
pub use error::{MediaLensError, Result};
pub use types::{
    AnswerSet, ArtifactKind, CURRENT_SCHEMA_VERSION, CursorRecord, DAILY_SUMMARY_FILE, JOBS_ROOT,
    Job, JobKey, Policy, QuestionAnswer, RunRecord, RunState, Step, Window, WindowKey,
    WindowStatus,
};
