//! Job discovery over the artifact store.
//!
//! Jobs live under `jobs/YYYY/MM/DD/HHMMSS`. Older runs used flat
//! `YYYY-MM-DD_HHMMSS` directories at the root; both are recognised and a key
//! present in both layouts is reported once.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, instrument};

use medialens_shared::{
    ArtifactKind, DAILY_SUMMARY_FILE, JOBS_ROOT, Job, JobKey, MediaLensError, Result,
};
use medialens_storage::{StorageAdapter, join_path};

/// Which jobs a request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobScope {
    /// Every known job ("process new").
    #[default]
    All,
    /// Jobs acquired within `[start, end]`, inclusive.
    DateRange { start: NaiveDate, end: NaiveDate },
    /// One job, by key.
    Explicit(JobKey),
}

impl JobScope {
    /// Build a date range, rejecting `start > end`.
    pub fn date_range(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(MediaLensError::validation(format!(
                "date range start {start} is after end {end}"
            )));
        }
        Ok(Self::DateRange { start, end })
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Explicit(_))
    }

    pub fn admits(&self, job: &Job) -> bool {
        match self {
            Self::All => true,
            Self::DateRange { start, end } => (*start..=*end).contains(&job.date()),
            Self::Explicit(key) => job.key == *key,
        }
    }
}

/// Read-only view of the jobs present in an artifact store.
#[derive(Clone)]
pub struct JobIndex {
    artifacts: Arc<dyn StorageAdapter>,
}

impl JobIndex {
    pub fn new(artifacts: Arc<dyn StorageAdapter>) -> Self {
        Self { artifacts }
    }

    /// All jobs, ascending by key.
    #[instrument(skip_all)]
    pub async fn scan(&self) -> Result<Vec<Job>> {
        let mut found: Vec<Job> = Vec::new();

        for (key, path) in self.hierarchical_dirs().await? {
            found.push(self.load_job(key, &path).await?);
        }
        for entry in self.artifacts.list_entries("").await? {
            if !entry.is_dir {
                continue;
            }
            if let Some((key, false)) = JobKey::parse_path(&entry.name) {
                found.push(self.load_job(key, &entry.name).await?);
            }
        }

        // Hierarchical entries come first, so they win the path on merge.
        let mut merged: BTreeMap<JobKey, Job> = BTreeMap::new();
        for job in found.into_iter().filter(Job::has_artifacts) {
            match merged.get_mut(&job.key) {
                Some(existing) => existing.merge(job),
                None => {
                    merged.insert(job.key, job);
                }
            }
        }

        debug!(count = merged.len(), "scanned jobs");
        Ok(merged.into_values().collect())
    }

    /// Jobs in `scope`, ascending by key.
    pub async fn list_jobs(&self, scope: JobScope) -> Result<Vec<Job>> {
        if let JobScope::Explicit(key) = scope {
            return Ok(vec![self.find_job(key).await?]);
        }
        let mut jobs = self.scan().await?;
        jobs.retain(|job| scope.admits(job));
        Ok(jobs)
    }

    /// The job with `key`, or [`MediaLensError::NotFound`] when it has no artifacts.
    pub async fn find_job(&self, key: JobKey) -> Result<Job> {
        self.scan()
            .await?
            .into_iter()
            .find(|job| job.key == key)
            .ok_or_else(|| MediaLensError::not_found(format!("job {key}")))
    }

    pub async fn latest_job(&self) -> Result<Option<Job>> {
        Ok(self.scan().await?.pop())
    }

    /// `jobs/YYYY/MM/DD/HHMMSS` directories, in key order.
    async fn hierarchical_dirs(&self) -> Result<Vec<(JobKey, String)>> {
        let mut dirs = Vec::new();
        for year in self.numeric_dirs(JOBS_ROOT).await? {
            let year_path = join_path(&[JOBS_ROOT, &year]);
            for month in self.numeric_dirs(&year_path).await? {
                let month_path = join_path(&[&year_path, &month]);
                for day in self.numeric_dirs(&month_path).await? {
                    let day_path = join_path(&[&month_path, &day]);
                    for time in self.numeric_dirs(&day_path).await? {
                        let path = join_path(&[&day_path, &time]);
                        match JobKey::parse_path(&path) {
                            Some((key, true)) => dirs.push((key, path)),
                            _ => debug!(%path, "ignoring malformed job directory"),
                        }
                    }
                }
            }
        }
        Ok(dirs)
    }

    async fn numeric_dirs(&self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .artifacts
            .list_entries(path)
            .await?
            .into_iter()
            .filter(|e| e.is_dir && e.name.chars().all(|c| c.is_ascii_digit()))
            .map(|e| e.name)
            .collect())
    }

    async fn load_job(&self, key: JobKey, path: &str) -> Result<Job> {
        let mut job = Job::new(key, path);
        for entry in self.artifacts.list_entries(path).await? {
            if entry.is_dir {
                continue;
            }
            let file = join_path(&[path, &entry.name]);
            if entry.name == DAILY_SUMMARY_FILE {
                job.summary = Some(file);
            } else if let Some((site, kind)) = ArtifactKind::parse_file_name(&entry.name) {
                job.add_artifact(&site, kind, file);
            }
        }
        Ok(job)
    }
}

/// Write path of an artifact inside `job`.
pub fn artifact_path(job: &Job, site: &str, kind: ArtifactKind) -> String {
    join_path(&[&job.path, &kind.file_name(site)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{date, key, seed_job, test_context};
    use medialens_storage::StorageAdapterExt;

    #[tokio::test]
    async fn lists_jobs_in_key_order() {
        let ctx = test_context("2025-06-10").await;
        seed_job(&ctx, "2025-06-09_080000").await;
        seed_job(&ctx, "2025-06-01_235959").await;
        seed_job(&ctx, "2025-06-09_070000").await;

        let index = JobIndex::new(ctx.artifacts.clone());
        let jobs = index.list_jobs(JobScope::All).await.unwrap();
        let keys: Vec<String> = jobs.iter().map(|j| j.key.to_string()).collect();
        assert_eq!(
            keys,
            vec!["2025-06-01_235959", "2025-06-09_070000", "2025-06-09_080000"]
        );
        assert_eq!(jobs[0].sites.len(), 2);
        assert_eq!(jobs[0].articles("www.bbc.com").len(), 2);
    }

    #[tokio::test]
    async fn date_range_is_inclusive() {
        let ctx = test_context("2025-06-10").await;
        for job in ["2025-06-01_080000", "2025-06-03_080000", "2025-06-05_080000"] {
            seed_job(&ctx, job).await;
        }
        let index = JobIndex::new(ctx.artifacts.clone());
        let scope = JobScope::date_range(date("2025-06-03"), date("2025-06-05")).unwrap();
        let jobs = index.list_jobs(scope).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(JobScope::date_range(date("2025-06-05"), date("2025-06-03")).is_err());
    }

    #[tokio::test]
    async fn explicit_missing_job_is_not_found() {
        let ctx = test_context("2025-06-10").await;
        seed_job(&ctx, "2025-06-01_080000").await;
        let index = JobIndex::new(ctx.artifacts.clone());

        let found = index.find_job(key("2025-06-01_080000")).await.unwrap();
        assert_eq!(found.path, "jobs/2025/06/01/080000");

        let err = index
            .list_jobs(JobScope::Explicit(key("2025-06-02_080000")))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaLensError::NotFound { .. }));
    }

    #[tokio::test]
    async fn legacy_and_hierarchical_layouts_merge() {
        let ctx = test_context("2025-06-10").await;
        seed_job(&ctx, "2025-06-01_080000").await;
        ctx.artifacts
            .write_text("2025-06-01_080000/www.extra.com.html", "<html/>")
            .await
            .unwrap();
        ctx.artifacts
            .write_text("2025-05-30_120000/daily_news.txt", "summary")
            .await
            .unwrap();
        // Empty and malformed directories are not jobs.
        ctx.artifacts.write_text("2025-05-31_120000/notes.md", "").await.unwrap();
        ctx.artifacts.write_text("jobs/2025/06/02/9999/x.html", "").await.unwrap();

        let index = JobIndex::new(ctx.artifacts.clone());
        let jobs = index.scan().await.unwrap();
        assert_eq!(jobs.len(), 2);

        assert_eq!(jobs[0].key, key("2025-05-30_120000"));
        assert_eq!(jobs[0].summary.as_deref(), Some("2025-05-30_120000/daily_news.txt"));

        let merged = &jobs[1];
        assert_eq!(merged.path, "jobs/2025/06/01/080000");
        assert!(merged.sites.contains("www.extra.com"));
        assert_eq!(
            merged.artifact("www.extra.com", ArtifactKind::Raw),
            Some("2025-06-01_080000/www.extra.com.html")
        );

        let latest = index.latest_job().await.unwrap().unwrap();
        assert_eq!(latest.key, key("2025-06-01_080000"));
    }

    #[tokio::test]
    async fn empty_store_has_no_latest_job() {
        let ctx = test_context("2025-06-10").await;
        let index = JobIndex::new(ctx.artifacts.clone());
        assert!(index.latest_job().await.unwrap().is_none());
        assert!(index.list_jobs(JobScope::All).await.unwrap().is_empty());
    }
}
