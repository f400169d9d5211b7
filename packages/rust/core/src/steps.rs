//! Step catalogue and request validation.
//!
//! Each [`Step`] maps to one static [`StepSpec`] describing its unit of work
//! and the cursor stage it advances. Execution order is the declaration order
//! of [`Step`], whatever order the caller asked in.

use std::collections::BTreeSet;

use tracing::warn;

use medialens_shared::{MediaLensError, Result, Step};

/// What one execution of a step operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Runs once and creates a new job.
    Acquisition,
    /// Runs once per selected job.
    Job,
    /// Runs once per selected window.
    Window,
}

/// Static description of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSpec {
    pub step: Step,
    pub unit: UnitKind,
    /// Cursor stage advanced by this step, if it tracks progress.
    pub cursor: Option<Step>,
    /// Stage lock held for the whole run. Every step that writes shared
    /// state (a cursor or the closed-window cache) takes one.
    pub lock: Option<Step>,
}

/// The step table, in canonical order.
pub const STEP_TABLE: [StepSpec; 10] = [
    StepSpec {
        step: Step::Harvest,
        unit: UnitKind::Acquisition,
        cursor: None,
        lock: None,
    },
    StepSpec {
        step: Step::HarvestScrape,
        unit: UnitKind::Acquisition,
        cursor: None,
        lock: None,
    },
    StepSpec {
        step: Step::ReHarvest,
        unit: UnitKind::Job,
        cursor: None,
        lock: None,
    },
    StepSpec {
        step: Step::HarvestClean,
        unit: UnitKind::Job,
        cursor: None,
        lock: None,
    },
    StepSpec {
        step: Step::Extract,
        unit: UnitKind::Job,
        cursor: Some(Step::Extract),
        lock: Some(Step::Extract),
    },
    StepSpec {
        step: Step::Interpret,
        unit: UnitKind::Job,
        cursor: Some(Step::Interpret),
        lock: Some(Step::Interpret),
    },
    StepSpec {
        step: Step::InterpretWeekly,
        unit: UnitKind::Window,
        cursor: None,
        lock: Some(Step::InterpretWeekly),
    },
    StepSpec {
        step: Step::SummarizeDaily,
        unit: UnitKind::Job,
        cursor: Some(Step::SummarizeDaily),
        lock: Some(Step::SummarizeDaily),
    },
    StepSpec {
        step: Step::Format,
        unit: UnitKind::Window,
        cursor: Some(Step::Format),
        lock: Some(Step::Format),
    },
    StepSpec {
        step: Step::Deploy,
        unit: UnitKind::Window,
        cursor: Some(Step::Deploy),
        lock: Some(Step::Deploy),
    },
];

/// Pairs that may not be requested together.
pub const CONFLICTS: [(Step, Step); 4] = [
    (Step::Harvest, Step::HarvestScrape),
    (Step::Harvest, Step::HarvestClean),
    (Step::Harvest, Step::ReHarvest),
    (Step::HarvestScrape, Step::ReHarvest),
];

/// Table entry for `step`.
pub fn spec(step: Step) -> &'static StepSpec {
    // STEP_TABLE is indexed in declaration order.
    &STEP_TABLE[step as usize]
}

/// Every step that carries a cursor.
pub fn cursor_stages() -> Vec<Step> {
    STEP_TABLE.iter().filter_map(|s| s.cursor).collect()
}

/// Check a requested set against the conflict relation.
pub fn validate(steps: &BTreeSet<Step>) -> Result<()> {
    if steps.is_empty() {
        return Err(MediaLensError::validation("no steps requested"));
    }
    for (first, second) in CONFLICTS {
        if steps.contains(&first) && steps.contains(&second) {
            return Err(MediaLensError::Conflict {
                first: first.as_str().into(),
                second: second.as_str().into(),
            });
        }
    }
    if steps.contains(&Step::HarvestClean) && !steps.contains(&Step::HarvestScrape) {
        warn!("harvest_clean requested without harvest_scrape; cleaning existing raw content");
    }
    Ok(())
}

/// A validated set of steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRequest {
    steps: BTreeSet<Step>,
}

impl StepRequest {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Result<Self> {
        let steps: BTreeSet<Step> = steps.into_iter().collect();
        validate(&steps)?;
        Ok(Self { steps })
    }

    /// Parse step names, then validate.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let steps = names
            .iter()
            .map(|n| n.as_ref().parse())
            .collect::<Result<Vec<Step>>>()?;
        Self::new(steps)
    }

    /// Requested steps in canonical order.
    pub fn ordered(&self) -> Vec<Step> {
        self.steps.iter().copied().collect()
    }

    pub fn contains(&self, step: Step) -> bool {
        self.steps.contains(&step)
    }

    /// Cursor stages this request will advance.
    pub fn cursor_stages(&self) -> Vec<Step> {
        self.steps.iter().filter_map(|s| spec(*s).cursor).collect()
    }

    /// Stage locks this request must hold while it runs.
    pub fn lock_stages(&self) -> Vec<Step> {
        self.steps.iter().filter_map(|s| spec(*s).lock).collect()
    }

    /// Whether a step in this request creates a new job.
    pub fn creates_job(&self) -> bool {
        self.steps
            .iter()
            .any(|s| spec(*s).unit == UnitKind::Acquisition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_declaration_order() {
        for (i, step) in Step::ALL.iter().enumerate() {
            assert_eq!(STEP_TABLE[i].step, *step);
            assert_eq!(spec(*step).step, *step);
        }
        assert_eq!(
            cursor_stages(),
            vec![
                Step::Extract,
                Step::Interpret,
                Step::SummarizeDaily,
                Step::Format,
                Step::Deploy
            ]
        );
    }

    #[test]
    fn harvest_and_scrape_conflict() {
        let err = StepRequest::parse(&["harvest_scrape", "harvest"]).unwrap_err();
        match err {
            MediaLensError::Conflict { first, second } => {
                assert_eq!(first, "harvest");
                assert_eq!(second, "harvest_scrape");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn separate_invocations_do_not_conflict() {
        assert!(StepRequest::parse(&["harvest_scrape"]).is_ok());
        assert!(StepRequest::parse(&["harvest_clean"]).is_ok());
        assert!(StepRequest::parse(&["harvest_scrape", "harvest_clean"]).is_ok());
    }

    #[test]
    fn every_conflict_pair_is_rejected() {
        for (a, b) in CONFLICTS {
            assert!(StepRequest::new([b, a]).is_err(), "{a} + {b}");
        }
    }

    #[test]
    fn execution_order_ignores_request_order() {
        let req = StepRequest::parse(&["deploy", "extract", "format", "harvest"]).unwrap();
        assert_eq!(
            req.ordered(),
            vec![Step::Harvest, Step::Extract, Step::Format, Step::Deploy]
        );
        assert!(req.creates_job());
        assert_eq!(
            req.cursor_stages(),
            vec![Step::Extract, Step::Format, Step::Deploy]
        );
    }

    #[test]
    fn weekly_interpretation_locks_without_a_cursor() {
        let req = StepRequest::parse(&["interpret_weekly", "format"]).unwrap();
        assert_eq!(req.cursor_stages(), vec![Step::Format]);
        assert_eq!(req.lock_stages(), vec![Step::InterpretWeekly, Step::Format]);
        for entry in STEP_TABLE {
            if entry.cursor.is_some() {
                assert_eq!(entry.lock, entry.cursor, "{}", entry.step);
            }
        }
    }

    #[test]
    fn unknown_and_empty_requests_fail() {
        assert!(StepRequest::parse(&["publish"]).is_err());
        assert!(StepRequest::new(Vec::<Step>::new()).is_err());
    }
}
