//! Job completeness audit.
//!
//! Reports, per job and configured site, which artifacts are missing or
//! unreadable. Nothing is repaired here; re-running the relevant steps for
//! the affected jobs is how repairs happen.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use medialens_shared::{ArtifactKind, Job, JobKey, MediaLensError, Result};
use medialens_storage::StorageAdapterExt;

use crate::context::PipelineContext;
use crate::job_index::{JobIndex, JobScope, artifact_path};

/// Report file written at the artifact root.
pub const AUDIT_REPORT_FILE: &str = "audit.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingRawHtml,
    MissingCleanHtml,
    MissingExtractedJson,
    MissingArticleFile,
    CorruptedExtractedJson,
    MissingInterpretation,
}

impl IssueKind {
    /// Whether re-running a step can fix it. Raw content cannot be re-acquired
    /// for a past day.
    pub fn repairable(&self) -> bool {
        !matches!(self, Self::MissingRawHtml)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditIssue {
    pub job: JobKey,
    pub site: String,
    pub kind: IssueKind,
    pub file: String,
    pub repairable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub audited_on: NaiveDate,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub jobs_audited: Vec<JobKey>,
    pub issues: Vec<AuditIssue>,
}

impl AuditReport {
    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }

    pub fn repairable(&self) -> usize {
        self.issues.iter().filter(|i| i.repairable).count()
    }
}

/// Audit every job in `scope`. Writes [`AUDIT_REPORT_FILE`] when `write_report` is set.
#[instrument(skip_all, fields(scope = ?scope, write_report = write_report))]
pub async fn audit_jobs(
    ctx: &PipelineContext,
    scope: JobScope,
    write_report: bool,
) -> Result<AuditReport> {
    let jobs = JobIndex::new(ctx.artifacts.clone()).list_jobs(scope).await?;
    let (start, end) = match scope {
        JobScope::DateRange { start, end } => (Some(start), Some(end)),
        JobScope::Explicit(key) => (Some(key.date()), Some(key.date())),
        JobScope::All => (None, None),
    };

    let mut report = AuditReport {
        audited_on: ctx.today(),
        start,
        end,
        jobs_audited: jobs.iter().map(|j| j.key).collect(),
        issues: Vec::new(),
    };
    info!(jobs = jobs.len(), "auditing jobs");

    for job in &jobs {
        for site in &ctx.config.sites {
            audit_site(ctx, job, site, &mut report.issues).await?;
        }
    }

    info!(
        problems = report.issues.len(),
        repairable = report.repairable(),
        "audit finished"
    );
    if write_report {
        ctx.artifacts.write_json(AUDIT_REPORT_FILE, &report).await?;
    }
    Ok(report)
}

async fn audit_site(
    ctx: &PipelineContext,
    job: &Job,
    site: &str,
    issues: &mut Vec<AuditIssue>,
) -> Result<()> {
    let mut flag = |kind: IssueKind, file: String| {
        if kind.repairable() {
            warn!(job = %job.key, site, ?kind, %file, "audit problem");
        } else {
            error!(job = %job.key, site, ?kind, %file, "audit problem");
        }
        issues.push(AuditIssue {
            job: job.key,
            site: site.to_string(),
            kind,
            file,
            repairable: kind.repairable(),
        });
    };

    if job.artifact(site, ArtifactKind::Raw).is_none() {
        flag(
            IssueKind::MissingRawHtml,
            artifact_path(job, site, ArtifactKind::Raw),
        );
        return Ok(());
    }
    if job.artifact(site, ArtifactKind::Clean).is_none() {
        flag(
            IssueKind::MissingCleanHtml,
            artifact_path(job, site, ArtifactKind::Clean),
        );
    }

    let Some(extracted) = job.artifact(site, ArtifactKind::Extracted) else {
        flag(
            IssueKind::MissingExtractedJson,
            artifact_path(job, site, ArtifactKind::Extracted),
        );
        return Ok(());
    };

    match ctx.artifacts.read_json::<serde_json::Value>(extracted).await {
        Ok(value) => {
            let stories = value
                .get("stories")
                .and_then(|s| s.as_array())
                .cloned()
                .unwrap_or_default();
            // One missing article is enough to flag the site.
            let missing = stories.iter().enumerate().find_map(|(idx, story)| {
                let idx = u32::try_from(idx).ok()?;
                let has_url = story.get("url").is_some_and(|u| !u.is_null());
                let kind = ArtifactKind::Article(idx);
                (has_url && job.artifact(site, kind).is_none())
                    .then(|| artifact_path(job, site, kind))
            });
            if let Some(file) = missing {
                flag(IssueKind::MissingArticleFile, file);
            }
        }
        Err(MediaLensError::Corrupted { .. }) => {
            flag(IssueKind::CorruptedExtractedJson, extracted.to_string());
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    if !job.articles(site).is_empty() && job.artifact(site, ArtifactKind::Interpreted).is_none() {
        flag(
            IssueKind::MissingInterpretation,
            artifact_path(job, site, ArtifactKind::Interpreted),
        );
    }
    Ok(())
}
