//! Per-invocation context passed to every pipeline component.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use medialens_shared::PipelineConfig;
use medialens_storage::{Storage, StorageAdapter};

/// Source of "now". Every calendar computation goes through this.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Today's UTC calendar date.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Noon UTC on `date`.
    pub fn on(date: NaiveDate) -> Self {
        Self(date.and_hms_opt(12, 0, 0).unwrap_or_default().and_utc())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Everything a run needs, built once per invocation.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<PipelineConfig>,
    /// State database: cursors, window cache, runs, stage locks.
    pub state: Arc<Storage>,
    /// Job artifacts and staged output.
    pub artifacts: Arc<dyn StorageAdapter>,
    pub clock: Arc<dyn Clock>,
}

impl PipelineContext {
    pub fn new(
        config: PipelineConfig,
        state: Arc<Storage>,
        artifacts: Arc<dyn StorageAdapter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            state,
            artifacts,
            clock,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
