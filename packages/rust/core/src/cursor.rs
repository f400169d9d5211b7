//! Durable, monotonic per-stage progress markers.

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use tracing::{info, instrument, warn};

use medialens_shared::{CursorRecord, Job, JobKey, MediaLensError, Result, Step};
use medialens_storage::Storage;

/// What an advance request should do given the stored position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvancePlan {
    /// Write the new position.
    Write,
    /// Position unchanged; nothing to write.
    Unchanged,
}

/// Decide an advance from `current` to `requested`.
///
/// Moving backwards is a [`MediaLensError::CursorRegression`] unless `force` is set.
pub fn plan_advance(
    stage: Step,
    current: Option<JobKey>,
    requested: JobKey,
    force: bool,
) -> Result<AdvancePlan> {
    match current {
        None => Ok(AdvancePlan::Write),
        Some(cur) if cur == requested => Ok(AdvancePlan::Unchanged),
        Some(cur) if cur < requested || force => Ok(AdvancePlan::Write),
        Some(cur) => Err(MediaLensError::CursorRegression {
            stage: stage.as_str().into(),
            current: cur.to_string(),
            requested: requested.to_string(),
        }),
    }
}

/// Candidates strictly after `position`; all of them when there is no position.
pub fn select_after(position: Option<JobKey>, candidates: Vec<Job>) -> Vec<Job> {
    match position {
        None => candidates,
        Some(pos) => candidates.into_iter().filter(|job| job.key > pos).collect(),
    }
}

/// The rewind target for `days`: the latest job acquired strictly before
/// `today - days`, clamped to the earliest known job.
///
/// A cursor marks its position as processed, so the target sits on the last
/// job before the cutoff day. Every job acquired on or after `today - days`
/// is selected again; with `days = 7` on 2025-06-10 the cursor lands on the
/// 06-02 job and the 06-03 job is reprocessed.
pub fn rewind_target(days: u32, today: NaiveDate, jobs: &[Job]) -> Option<JobKey> {
    let threshold = JobKey::start_of_day(today - Days::new(u64::from(days)));
    let earliest = jobs.iter().map(|j| j.key).min()?;
    let target = jobs
        .iter()
        .map(|j| j.key)
        .filter(|k| *k < threshold)
        .max()
        .unwrap_or(earliest);
    Some(target)
}

/// Cursor operations over the state database.
#[derive(Clone)]
pub struct CursorStore {
    state: Arc<Storage>,
}

impl CursorStore {
    pub fn new(state: Arc<Storage>) -> Self {
        Self { state }
    }

    pub async fn get(&self, stage: Step) -> Result<Option<CursorRecord>> {
        self.state.get_cursor(stage).await
    }

    pub async fn get_position(&self, stage: Step) -> Result<Option<JobKey>> {
        Ok(self.get(stage).await?.map(|c| c.position))
    }

    /// Move the cursor to `position`. Returns the new record, or `None` when unchanged.
    #[instrument(skip_all, fields(stage = %stage, position = %position, force = force))]
    pub async fn advance(
        &self,
        stage: Step,
        position: JobKey,
        force: bool,
    ) -> Result<Option<CursorRecord>> {
        let current = self.get(stage).await?;
        match plan_advance(stage, current.as_ref().map(|c| c.position), position, force)? {
            AdvancePlan::Unchanged => Ok(None),
            AdvancePlan::Write => {
                let record = self
                    .state
                    .put_cursor(stage, position, current.map(|c| c.revision))
                    .await?;
                info!(revision = record.revision, "cursor advanced");
                Ok(Some(record))
            }
        }
    }

    /// Move the cursor back to `to`. Never moves it forward; absent cursors stay absent.
    pub async fn rewind(&self, stage: Step, to: JobKey) -> Result<Option<CursorRecord>> {
        let Some(current) = self.get(stage).await? else {
            info!(stage = %stage, "no cursor to rewind");
            return Ok(None);
        };
        if to >= current.position {
            info!(stage = %stage, current = %current.position, requested = %to, "rewind target not behind cursor");
            return Ok(None);
        }
        let record = self
            .state
            .put_cursor(stage, to, Some(current.revision))
            .await?;
        warn!(stage = %stage, from = %current.position, to = %to, "cursor rewound");
        Ok(Some(record))
    }

    /// Rewind by `days` relative to `today` over the known `jobs`.
    pub async fn rewind_days(
        &self,
        stage: Step,
        days: u32,
        today: NaiveDate,
        jobs: &[Job],
    ) -> Result<Option<CursorRecord>> {
        match rewind_target(days, today, jobs) {
            Some(target) => self.rewind(stage, target).await,
            None => Ok(None),
        }
    }

    /// Clear the cursor, forcing a full pass. Returns whether one existed.
    pub async fn reset(&self, stage: Step) -> Result<bool> {
        let existed = self.state.delete_cursor(stage).await?;
        if existed {
            warn!(stage = %stage, "cursor reset");
        }
        Ok(existed)
    }

    /// Filter ordered candidates down to those past the stage's cursor.
    pub async fn select_unprocessed(&self, stage: Step, candidates: Vec<Job>) -> Result<Vec<Job>> {
        Ok(select_after(self.get_position(stage).await?, candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{date, key, test_context};
    use proptest::prelude::*;

    fn job(s: &str) -> Job {
        let k = key(s);
        Job::new(k, k.storage_path())
    }

    fn daily_jobs(first: u32, last: u32) -> Vec<Job> {
        (first..=last)
            .map(|d| job(&format!("2025-06-{d:02}_080000")))
            .collect()
    }

    #[test]
    fn rewind_stops_before_the_cutoff_day_so_it_is_reprocessed() {
        let jobs = daily_jobs(1, 10);
        let target = rewind_target(7, date("2025-06-10"), &jobs).unwrap();
        // Everything from 2025-06-03 onward becomes unprocessed again.
        assert_eq!(target, key("2025-06-02_080000"));
        let unprocessed = select_after(Some(target), jobs);
        assert_eq!(unprocessed[0].key, key("2025-06-03_080000"));
    }

    #[test]
    fn rewind_clamps_to_earliest_job() {
        let jobs = daily_jobs(5, 10);
        let target = rewind_target(30, date("2025-06-10"), &jobs).unwrap();
        assert_eq!(target, key("2025-06-05_080000"));
        assert!(rewind_target(3, date("2025-06-10"), &[]).is_none());
    }

    #[test]
    fn select_after_without_position_keeps_all() {
        let jobs = daily_jobs(1, 3);
        assert_eq!(select_after(None, jobs.clone()).len(), 3);
        assert_eq!(select_after(Some(key("2025-06-03_080000")), jobs).len(), 0);
    }

    #[tokio::test]
    async fn advance_rejects_regression_unless_forced() {
        let ctx = test_context("2025-06-10").await;
        let store = CursorStore::new(ctx.state.clone());
        assert!(store.get_position(Step::Format).await.unwrap().is_none());

        store
            .advance(Step::Format, key("2025-06-05_080000"), false)
            .await
            .unwrap();
        let same = store
            .advance(Step::Format, key("2025-06-05_080000"), false)
            .await
            .unwrap();
        assert!(same.is_none());

        let err = store
            .advance(Step::Format, key("2025-06-04_080000"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaLensError::CursorRegression { .. }));

        store
            .advance(Step::Format, key("2025-06-04_080000"), true)
            .await
            .unwrap();
        assert_eq!(
            store.get_position(Step::Format).await.unwrap(),
            Some(key("2025-06-04_080000"))
        );
    }

    #[tokio::test]
    async fn rewind_never_moves_forward_and_ignores_absent() {
        let ctx = test_context("2025-06-10").await;
        let store = CursorStore::new(ctx.state.clone());
        let jobs = daily_jobs(1, 10);

        assert!(store
            .rewind_days(Step::Deploy, 7, ctx.today(), &jobs)
            .await
            .unwrap()
            .is_none());
        assert!(store.get(Step::Deploy).await.unwrap().is_none());

        store
            .advance(Step::Deploy, key("2025-06-01_080000"), false)
            .await
            .unwrap();
        // Target 2025-06-02 is ahead of the cursor: no-op.
        assert!(store
            .rewind_days(Step::Deploy, 7, ctx.today(), &jobs)
            .await
            .unwrap()
            .is_none());

        store
            .advance(Step::Deploy, key("2025-06-09_080000"), false)
            .await
            .unwrap();
        let rewound = store
            .rewind_days(Step::Deploy, 7, ctx.today(), &jobs)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rewound.position, key("2025-06-02_080000"));

        assert!(store.reset(Step::Deploy).await.unwrap());
        assert!(!store.reset(Step::Deploy).await.unwrap());
    }

    #[tokio::test]
    async fn select_unprocessed_uses_stored_position() {
        let ctx = test_context("2025-06-10").await;
        let store = CursorStore::new(ctx.state.clone());
        store
            .advance(Step::Extract, key("2025-06-07_080000"), false)
            .await
            .unwrap();
        let left = store
            .select_unprocessed(Step::Extract, daily_jobs(1, 10))
            .await
            .unwrap();
        let keys: Vec<JobKey> = left.iter().map(|j| j.key).collect();
        assert_eq!(
            keys,
            vec![
                key("2025-06-08_080000"),
                key("2025-06-09_080000"),
                key("2025-06-10_080000")
            ]
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Without force, the position never decreases over any sequence of advances.
        #[test]
        fn unforced_advances_are_monotonic(
            requests in prop::collection::vec((0u32..28, 0u32..24), 1..50)
        ) {
            let mut position: Option<JobKey> = None;
            for (day, hour) in requests {
                let requested = JobKey::new(2025, 2, day + 1, hour, 0, 0).unwrap();
                match plan_advance(Step::Format, position, requested, false) {
                    Ok(AdvancePlan::Write) => {
                        prop_assert!(position.is_none_or(|p| p < requested));
                        position = Some(requested);
                    }
                    Ok(AdvancePlan::Unchanged) => prop_assert_eq!(position, Some(requested)),
                    Err(_) => prop_assert!(position.is_some_and(|p| p > requested)),
                }
            }
        }
    }
}
