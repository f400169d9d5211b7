//! Weekly aggregation: merge member jobs into one analysis unit per window.
//!
//! OPEN windows are rebuilt on every call. CLOSED windows are computed once
//! and then served from the state database, so archive content stays
//! byte-stable unless an overwrite is requested.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use medialens_shared::{
    Job, JobKey, MediaLensError, Policy, Result, Window, WindowKey, WindowStatus,
};
use medialens_storage::StorageAdapterExt;

use crate::context::PipelineContext;

/// Articles one site contributed in one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEntry {
    pub job: JobKey,
    pub site: String,
    /// Article records, ascending by article number.
    pub articles: Vec<serde_json::Value>,
}

/// Merged content of a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowContent {
    pub window_key: WindowKey,
    pub policy: Policy,
    pub status: WindowStatus,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub member_jobs: Vec<JobKey>,
    /// Ordered by job key, then by configured site order.
    pub entries: Vec<ContentEntry>,
}

impl WindowContent {
    /// Every article for `site` across the window, in merge order.
    pub fn site_articles(&self, site: &str) -> Vec<serde_json::Value> {
        self.entries
            .iter()
            .filter(|e| e.site == site)
            .flat_map(|e| e.articles.iter().cloned())
            .collect()
    }
}

/// Builds and caches window content.
pub struct WeeklyAggregator {
    ctx: PipelineContext,
}

impl WeeklyAggregator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Content for `window`, built from its member `jobs`.
    ///
    /// `jobs` may contain non-members; they are ignored. Fails with
    /// [`MediaLensError::InsufficientData`] when the window has no members.
    #[instrument(skip_all, fields(window = %window.key))]
    pub async fn build_window_content(
        &self,
        window: &Window,
        jobs: &[Job],
        overwrite: bool,
    ) -> Result<WindowContent> {
        if window.member_jobs.is_empty() {
            return Err(MediaLensError::InsufficientData {
                window: window.key.to_string(),
            });
        }

        let closed = window.status == WindowStatus::Closed;
        if closed && !overwrite {
            if let Some(cached) = self.get_closed_window(&window.key).await? {
                debug!("serving closed window from cache");
                return Ok(cached);
            }
        }

        let content = self.merge(window, jobs).await?;

        if closed {
            let json = serde_json::to_string(&content)
                .map_err(|e| MediaLensError::Storage(format!("serialize window: {e}")))?;
            let hash = self
                .ctx
                .state
                .put_window_cache(&window.key, window.policy, &json)
                .await?;
            info!(%hash, overwrite, "cached closed window");
        }
        Ok(content)
    }

    /// Cached content of a CLOSED window, if it has been computed.
    pub async fn get_closed_window(&self, key: &WindowKey) -> Result<Option<WindowContent>> {
        let Some(cached) = self.ctx.state.get_window_cache(key).await? else {
            return Ok(None);
        };
        let content = serde_json::from_str(&cached.content_json).map_err(|e| {
            MediaLensError::Corrupted {
                what: format!("cached window {key}: {e}"),
            }
        })?;
        Ok(Some(content))
    }

    async fn merge(&self, window: &Window, jobs: &[Job]) -> Result<WindowContent> {
        let mut members: Vec<&Job> = jobs
            .iter()
            .filter(|job| window.member_jobs.contains(&job.key))
            .collect();
        members.sort_by_key(|job| job.key);

        let mut entries = Vec::new();
        for job in members {
            for site in &self.ctx.config.sites {
                let mut articles: Vec<serde_json::Value> = Vec::new();
                for (_, path) in job.articles(site) {
                    articles.push(self.ctx.artifacts.read_json(path).await?);
                }
                if !articles.is_empty() {
                    entries.push(ContentEntry {
                        job: job.key,
                        site: site.clone(),
                        articles,
                    });
                }
            }
        }

        Ok(WindowContent {
            window_key: window.key,
            policy: window.policy,
            status: window.status,
            start: window.start,
            end: window.end,
            member_jobs: window.member_jobs.clone(),
            entries,
        })
    }
}
