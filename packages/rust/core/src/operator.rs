//! Operator cursor actions.
//!
//! Resetting and rewinding take the stage locks of the touched cursors for
//! their duration, so they never interleave with a run advancing the same
//! stages. No collaborator is involved.

use medialens_shared::{JobKey, MediaLensError, Result, Step};
use tracing::{info, instrument};

use crate::context::PipelineContext;
use crate::cursor::CursorStore;
use crate::job_index::JobIndex;
use crate::runs::new_run_id;
use crate::steps;

pub struct CursorOperator {
    ctx: PipelineContext,
    index: JobIndex,
    cursors: CursorStore,
}

impl CursorOperator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            index: JobIndex::new(ctx.artifacts.clone()),
            cursors: CursorStore::new(ctx.state.clone()),
            ctx,
        }
    }

    /// Clear the cursors of `stages`. Returns whether each one existed.
    #[instrument(skip_all, fields(stages = ?stages))]
    pub async fn reset(&self, stages: &[Step]) -> Result<Vec<(Step, bool)>> {
        let holder = self.lock(stages).await?;
        let result = async {
            let mut out = Vec::with_capacity(stages.len());
            for stage in stages {
                out.push((*stage, self.cursors.reset(*stage).await?));
            }
            Ok::<_, MediaLensError>(out)
        }
        .await;
        self.ctx.state.release_stage_locks(&holder).await?;
        result
    }

    /// Rewind the cursors of `stages` by `days`. Cursors that did not move
    /// are reported with `None`.
    #[instrument(skip_all, fields(stages = ?stages, days = days))]
    pub async fn rewind(&self, stages: &[Step], days: u32) -> Result<Vec<(Step, Option<JobKey>)>> {
        let holder = self.lock(stages).await?;
        let today = self.ctx.today();
        let result = async {
            let jobs = self.index.scan().await?;
            let mut out = Vec::with_capacity(stages.len());
            for stage in stages {
                let moved = self.cursors.rewind_days(*stage, days, today, &jobs).await?;
                out.push((*stage, moved.map(|c| c.position)));
            }
            Ok::<_, MediaLensError>(out)
        }
        .await;
        self.ctx.state.release_stage_locks(&holder).await?;
        result
    }

    async fn lock(&self, stages: &[Step]) -> Result<String> {
        for stage in stages {
            if steps::spec(*stage).cursor.is_none() {
                return Err(MediaLensError::validation(format!(
                    "step '{stage}' has no cursor"
                )));
            }
        }
        let holder = format!("operator-{}", new_run_id());
        self.ctx.state.acquire_stage_locks(&holder, stages).await?;
        info!(%holder, "operator holds stage locks");
        Ok(holder)
    }
}
