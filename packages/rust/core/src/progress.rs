//! Progress callbacks for long-running invocations.

use medialens_shared::Step;

use crate::orchestrator::RunReport;

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a step starts, with the number of units it will process.
    fn step_started(&self, step: Step, units: usize);
    /// Called after each unit, successful or not.
    fn unit_finished(&self, step: Step, unit: &str, ok: bool);
    /// Called once the run has finished.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn step_started(&self, _step: Step, _units: usize) {}
    fn unit_finished(&self, _step: Step, _unit: &str, _ok: bool) {}
    fn done(&self, _report: &RunReport) {}
}
