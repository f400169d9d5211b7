//! Step execution.
//!
//! For each requested step, in canonical order, the orchestrator resolves the
//! step's units (jobs or windows), runs the collaborator for each unit in
//! ascending order, and then advances the step's cursor. A cursor only moves
//! past jobs whose units all succeeded, and never when any unit of the batch
//! failed.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Span, error, info, instrument, warn};

use medialens_shared::{
    AnswerSet, ArtifactKind, DAILY_SUMMARY_FILE, Job, JobKey, MediaLensError, Result,
    RunRecord, RunState, Step, Window, WindowKey,
};
use medialens_storage::{StorageAdapterExt, join_path};

use crate::aggregator::WeeklyAggregator;
use crate::collaborators::Collaborators;
use crate::context::PipelineContext;
use crate::cursor::{CursorStore, select_after};
use crate::job_index::{JobIndex, JobScope, artifact_path};
use crate::outputs::{
    Page, PageData, PageJob, PageSite, SiteAnswers, WeeklyInterpretation, placeholder_answers,
    remote_path, staged_path, weekly_interpretation_path,
};
use crate::progress::ProgressReporter;
use crate::runs::{RunRegistry, new_run_id};
use crate::steps::{self, StepRequest};
use crate::window::{classify_windows, current_window, historical_window, iso_weeks_between, with_members};

// ---------------------------------------------------------------------------
// Requests and reports
// ---------------------------------------------------------------------------

/// One pipeline invocation.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Requested steps, in any order.
    pub steps: Vec<Step>,
    pub scope: JobScope,
    /// Cursor stages whose filter is bypassed.
    pub force: BTreeSet<Step>,
    /// Rewind every requested cursor stage by this many days before running.
    pub rewind_days: Option<u32>,
    /// Caller-chosen run id; generated when absent.
    pub run_id: Option<String>,
    /// Recompute closed windows and existing weekly interpretations.
    pub overwrite_weekly: bool,
    /// ISO weeks for `interpret_weekly`. Empty means the current window plus
    /// closed weeks not yet interpreted.
    pub weeks: Vec<WindowKey>,
}

impl RunRequest {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: JobScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: Step,
    /// Units in the order they were started.
    pub attempted: Vec<String>,
    pub succeeded: Vec<String>,
    /// Units skipped for lack of data.
    pub skipped: Vec<String>,
    /// First failing unit, if any.
    pub failed: Option<String>,
    pub error: Option<String>,
    pub cancelled: bool,
    pub cursor_before: Option<JobKey>,
    pub cursor_after: Option<JobKey>,
}

impl StepReport {
    fn new(step: Step, cursor: Option<JobKey>) -> Self {
        Self {
            step,
            attempted: Vec::new(),
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failed: None,
            error: None,
            cancelled: false,
            cursor_before: cursor,
            cursor_after: cursor,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.cancelled
    }
}

/// Outcome of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    pub steps: Vec<StepReport>,
    /// Job created by `harvest` or `harvest_scrape`.
    pub created_job: Option<JobKey>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn step(&self, step: Step) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step == step)
    }
}

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

enum Unit {
    /// Create a new job.
    Acquire,
    Job(Job),
    /// A window; `page` is set for format and deploy.
    Window { window: Window, page: Option<Page> },
}

impl Unit {
    fn label(&self) -> String {
        match self {
            Self::Acquire => "new-job".to_string(),
            Self::Job(job) => job.key.to_string(),
            Self::Window { window, .. } => window.key.to_string(),
        }
    }

    /// Jobs this unit fully processes, for cursor purposes.
    fn covered(&self) -> Vec<JobKey> {
        match self {
            Self::Acquire => Vec::new(),
            Self::Job(job) => vec![job.key],
            Self::Window {
                window,
                page: Some(Page::Archive),
            } => window.member_jobs.clone(),
            Self::Window { .. } => Vec::new(),
        }
    }
}

/// Units of one step plus the job list they were resolved from.
struct StepPlan {
    units: Vec<Unit>,
    jobs: Vec<Job>,
}

/// Jobs of `jobs` admitted by `scope`; an explicit key must exist.
fn in_scope(jobs: &[Job], scope: JobScope) -> Result<Vec<Job>> {
    let selected: Vec<Job> = jobs.iter().filter(|j| scope.admits(j)).cloned().collect();
    if let JobScope::Explicit(key) = scope {
        if selected.is_empty() {
            return Err(MediaLensError::not_found(format!("job {key}")));
        }
    }
    Ok(selected)
}

/// Furthest job reachable from `position` through consecutive covered jobs.
fn contiguous_advance(
    position: Option<JobKey>,
    jobs: &[Job],
    covered: &BTreeSet<JobKey>,
) -> Option<JobKey> {
    let mut reached = None;
    for job in jobs.iter().filter(|j| position.is_none_or(|p| j.key > p)) {
        if !covered.contains(&job.key) {
            break;
        }
        reached = Some(job.key);
    }
    reached
}

fn require_members(window: &Window) -> Result<()> {
    if window.member_jobs.is_empty() {
        return Err(MediaLensError::InsufficientData {
            window: window.key.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs step requests against one pipeline context.
pub struct Orchestrator {
    ctx: PipelineContext,
    collaborators: Collaborators,
    registry: Arc<RunRegistry>,
    index: JobIndex,
    cursors: CursorStore,
    aggregator: WeeklyAggregator,
}

impl Orchestrator {
    pub fn new(
        ctx: PipelineContext,
        collaborators: Collaborators,
        registry: Arc<RunRegistry>,
    ) -> Self {
        Self {
            index: JobIndex::new(ctx.artifacts.clone()),
            cursors: CursorStore::new(ctx.state.clone()),
            aggregator: WeeklyAggregator::new(ctx.clone()),
            ctx,
            collaborators,
            registry,
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn index(&self) -> &JobIndex {
        &self.index
    }

    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    /// Validate and run `request`.
    ///
    /// Validation failures, a missing explicit job, a reused running id and a
    /// held stage lock are returned as errors before any step runs. Failures
    /// inside steps are reported in the returned [`RunReport`].
    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn execute(
        &self,
        request: RunRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let steps = StepRequest::new(request.steps.iter().copied())?;
        for week in &request.weeks {
            if !matches!(week, WindowKey::IsoWeek { .. }) {
                return Err(MediaLensError::validation(format!(
                    "reinterpretation takes ISO weeks, got {week}"
                )));
            }
        }
        if let JobScope::Explicit(key) = request.scope {
            if !steps.creates_job() {
                self.index.find_job(key).await?;
            }
        }

        let run_id = request.run_id.clone().unwrap_or_else(new_run_id);
        Span::current().record("run_id", run_id.as_str());

        let cancel = self.registry.register(&run_id).await?;
        let result = self
            .run_registered(&run_id, &steps, &request, &cancel, progress)
            .await;
        self.registry.unregister(&run_id).await;
        result
    }

    async fn run_registered(
        &self,
        run_id: &str,
        steps: &StepRequest,
        request: &RunRequest,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let mut record = RunRecord {
            run_id: run_id.to_string(),
            steps: steps.ordered(),
            state: RunState::Running,
            completed_steps: Vec::new(),
            last_cursor: None,
            error: None,
            stop_requested: false,
            started_at: self.ctx.now(),
            finished_at: None,
        };
        self.ctx.state.insert_run(&record).await?;

        let stages = steps.lock_stages();
        if let Err(e) = self.ctx.state.acquire_stage_locks(run_id, &stages).await {
            warn!(error = %e, "stage lock unavailable");
            record.state = RunState::Failed;
            record.error = Some(e.to_string());
            record.finished_at = Some(self.ctx.now());
            self.ctx.state.update_run(&record).await?;
            return Err(e);
        }

        info!(steps = ?record.steps, scope = ?request.scope, "run started");
        let outcome = self
            .run_steps(run_id, steps, request, cancel, progress)
            .await;

        if let Err(e) = self.ctx.state.release_stage_locks(run_id).await {
            error!(error = %e, "failed to release stage locks");
        }

        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "run aborted");
                record.state = RunState::Failed;
                record.error = Some(e.to_string());
                record.finished_at = Some(self.ctx.now());
                self.ctx.state.update_run(&record).await?;
                return Err(e);
            }
        };

        record.state = report.state;
        record.error = report.error.clone();
        record.completed_steps = report
            .steps
            .iter()
            .filter(|s| s.is_success())
            .map(|s| s.step)
            .collect();
        record.last_cursor = report.steps.iter().rev().find_map(|s| {
            let stage = steps::spec(s.step).cursor?;
            let position = s.cursor_after?;
            (s.cursor_after != s.cursor_before).then_some((stage, position))
        });
        record.finished_at = Some(self.ctx.now());
        self.ctx.state.update_run(&record).await?;

        info!(state = report.state.as_str(), "run finished");
        progress.done(&report);
        Ok(report)
    }

    async fn run_steps(
        &self,
        run_id: &str,
        steps: &StepRequest,
        request: &RunRequest,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        if let Some(days) = request.rewind_days {
            let jobs = self.index.scan().await?;
            let today = self.ctx.today();
            for stage in steps.cursor_stages() {
                self.cursors.rewind_days(stage, days, today, &jobs).await?;
            }
        }

        let mut report = RunReport {
            run_id: run_id.to_string(),
            state: RunState::Completed,
            steps: Vec::new(),
            created_job: None,
            error: None,
        };
        let mut scope = request.scope;

        for step in steps.ordered() {
            if self.stop_requested(run_id, cancel).await? {
                report.state = RunState::Cancelled;
                break;
            }

            let scope_before = scope;
            let step_report = self
                .run_step(step, &mut scope, request, run_id, cancel, progress)
                .await?;
            if scope != scope_before {
                if let JobScope::Explicit(key) = scope {
                    report.created_job = Some(key);
                }
            }

            let failed = step_report.error.clone();
            let cancelled = step_report.cancelled;
            report.steps.push(step_report);

            if let Some(err) = failed {
                report.state = RunState::Failed;
                report.error = Some(format!("{step}: {err}"));
                break;
            }
            if cancelled {
                report.state = RunState::Cancelled;
                break;
            }
        }
        Ok(report)
    }

    #[instrument(skip_all, fields(step = %step))]
    async fn run_step(
        &self,
        step: Step,
        scope: &mut JobScope,
        request: &RunRequest,
        run_id: &str,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<StepReport> {
        let spec = steps::spec(step);
        let cursor_before = match spec.cursor {
            Some(stage) => self.cursors.get_position(stage).await?,
            None => None,
        };
        let force = request.force.contains(&step);

        let plan = self
            .resolve_units(step, *scope, force, cursor_before, request)
            .await?;
        info!(units = plan.units.len(), cursor = ?cursor_before, force, "step started");
        progress.step_started(step, plan.units.len());

        let mut report = StepReport::new(step, cursor_before);
        let mut covered: BTreeSet<JobKey> = BTreeSet::new();

        for unit in &plan.units {
            if self.stop_requested(run_id, cancel).await? {
                info!("stop observed at unit boundary");
                report.cancelled = true;
                break;
            }

            let label = unit.label();
            report.attempted.push(label.clone());
            match self.run_unit(step, unit, &plan, request).await {
                Ok(created) => {
                    let label = match created {
                        Some(key) => {
                            *scope = JobScope::Explicit(key);
                            key.to_string()
                        }
                        None => label,
                    };
                    covered.extend(unit.covered());
                    progress.unit_finished(step, &label, true);
                    report.succeeded.push(label);
                }
                Err(MediaLensError::InsufficientData { window }) => {
                    warn!(%window, "window has no member jobs, skipping");
                    progress.unit_finished(step, &label, false);
                    report.skipped.push(label);
                }
                Err(e) => {
                    error!(unit = %label, error = %e, "unit failed");
                    progress.unit_finished(step, &label, false);
                    let retryable = e.is_retryable();
                    if report.error.is_none() {
                        report.failed = Some(label);
                        report.error = Some(e.to_string());
                    }
                    // Transient failures let the rest of the batch run; the
                    // invocation still stops after this step.
                    if !retryable {
                        break;
                    }
                }
            }
        }

        if let Some(stage) = spec.cursor {
            if report.error.is_none() {
                if let Some(position) = contiguous_advance(cursor_before, &plan.jobs, &covered) {
                    self.cursors.advance(stage, position, false).await?;
                    report.cursor_after = Some(position);
                }
            } else {
                warn!(cursor = ?cursor_before, "batch failed, cursor held");
            }
        }

        info!(
            attempted = report.attempted.len(),
            succeeded = report.succeeded.len(),
            skipped = report.skipped.len(),
            cursor = ?report.cursor_after,
            "step finished"
        );
        Ok(report)
    }

    async fn stop_requested(&self, run_id: &str, cancel: &CancellationToken) -> Result<bool> {
        if cancel.is_cancelled() {
            return Ok(true);
        }
        if self.ctx.state.stop_requested(run_id).await? {
            cancel.cancel();
            return Ok(true);
        }
        Ok(false)
    }

    // -----------------------------------------------------------------------
    // Unit resolution
    // -----------------------------------------------------------------------

    async fn resolve_units(
        &self,
        step: Step,
        scope: JobScope,
        force: bool,
        cursor: Option<JobKey>,
        request: &RunRequest,
    ) -> Result<StepPlan> {
        let jobs = self.index.scan().await?;
        let bypass = scope.is_explicit() || force;

        let units = match step {
            Step::Harvest | Step::HarvestScrape => vec![Unit::Acquire],
            Step::ReHarvest | Step::HarvestClean => {
                let selected = match scope {
                    JobScope::All => jobs.last().cloned().into_iter().collect(),
                    other => in_scope(&jobs, other)?,
                };
                selected.into_iter().map(Unit::Job).collect()
            }
            Step::Extract | Step::Interpret | Step::SummarizeDaily => {
                let scoped = in_scope(&jobs, scope)?;
                let selected = if bypass {
                    scoped
                } else {
                    select_after(cursor, scoped)
                };
                selected.into_iter().map(Unit::Job).collect()
            }
            Step::InterpretWeekly => self.weekly_units(&jobs, scope, request).await?,
            Step::Format | Step::Deploy => {
                let scoped = in_scope(&jobs, scope)?;
                let candidates = if bypass {
                    scoped
                } else {
                    select_after(cursor, scoped)
                };
                self.page_units(&jobs, &candidates)
            }
        };
        Ok(StepPlan { units, jobs })
    }

    async fn weekly_units(
        &self,
        jobs: &[Job],
        scope: JobScope,
        request: &RunRequest,
    ) -> Result<Vec<Unit>> {
        let today = self.ctx.today();
        let mut windows = Vec::new();
        if request.weeks.is_empty() {
            let scoped = in_scope(jobs, scope)?;
            for window in classify_windows(&scoped, today).historical {
                windows.push(with_members(window, jobs));
            }
            windows.push(current_window(today, jobs));
        } else {
            for key in &request.weeks {
                windows.push(historical_window(key, today, jobs)?);
            }
        }

        let mut units = Vec::new();
        for window in windows {
            if window.is_open()
                || request.overwrite_weekly
                || !self.weekly_interpretation_is_final(&window.key).await?
            {
                units.push(Unit::Window { window, page: None });
            }
        }
        Ok(units)
    }

    /// Whether a final interpretation is stored for `key`. Records made while
    /// the week was open are partial, and unreadable ones are recomputed.
    async fn weekly_interpretation_is_final(&self, key: &WindowKey) -> Result<bool> {
        let path = weekly_interpretation_path(key);
        if !self.ctx.artifacts.exists(&path).await? {
            return Ok(false);
        }
        match self.ctx.artifacts.read_json::<WeeklyInterpretation>(&path).await {
            Ok(record) => Ok(record.is_final()),
            Err(e @ MediaLensError::Corrupted { .. }) => {
                warn!(window = %key, error = %e, "stored weekly interpretation unreadable");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Archive pages for closed weeks holding `candidates`, then the landing page.
    fn page_units(&self, jobs: &[Job], candidates: &[Job]) -> Vec<Unit> {
        let today = self.ctx.today();
        let mut units: Vec<Unit> = classify_windows(candidates, today)
            .historical
            .into_iter()
            .map(|window| Unit::Window {
                window: with_members(window, jobs),
                page: Some(Page::Archive),
            })
            .collect();
        units.push(Unit::Window {
            window: current_window(today, jobs),
            page: Some(Page::Landing),
        });
        units
    }

    // -----------------------------------------------------------------------
    // Executors
    // -----------------------------------------------------------------------

    /// Run one unit. Returns the key of a job it created.
    async fn run_unit(
        &self,
        step: Step,
        unit: &Unit,
        plan: &StepPlan,
        request: &RunRequest,
    ) -> Result<Option<JobKey>> {
        let sites = &self.ctx.config.sites;
        match (step, unit) {
            (Step::Harvest | Step::HarvestScrape, Unit::Acquire) => {
                return self.acquire(step).await.map(Some);
            }
            (Step::ReHarvest, Unit::Job(job)) => {
                self.collaborators.harvester.reharvest(job, sites).await?
            }
            (Step::HarvestClean, Unit::Job(job)) => {
                self.collaborators.harvester.clean(job, sites).await?
            }
            (Step::Extract, Unit::Job(job)) => {
                self.collaborators.extractor.extract(job, sites).await?
            }
            (Step::Interpret, Unit::Job(job)) => self.interpret_job(job).await?,
            (Step::SummarizeDaily, Unit::Job(job)) => self.summarize_job(job).await?,
            (Step::InterpretWeekly, Unit::Window { window, .. }) => {
                self.interpret_window(window, &plan.jobs, request.overwrite_weekly)
                    .await?
            }
            (Step::Format, Unit::Window { window, page: Some(page) }) => {
                self.format_page(window, *page, &plan.jobs).await?
            }
            (Step::Deploy, Unit::Window { window, page: Some(page) }) => {
                self.deploy_page(window, *page).await?
            }
            (step, unit) => {
                return Err(MediaLensError::validation(format!(
                    "step {step} cannot run on unit {}",
                    unit.label()
                )));
            }
        }
        Ok(None)
    }

    async fn acquire(&self, step: Step) -> Result<JobKey> {
        let key = JobKey::from_datetime(self.ctx.now());
        let path = key.storage_path();
        let sites = &self.ctx.config.sites;
        let harvester = &self.collaborators.harvester;
        if step == Step::Harvest {
            harvester.harvest(key, &path, sites).await?;
        } else {
            harvester.scrape(key, &path, sites).await?;
        }
        // The harvester must have left at least one artifact behind.
        self.index.find_job(key).await?;
        info!(job = %key, "job created");
        Ok(key)
    }

    async fn read_articles(&self, job: &Job, site: &str) -> Result<Vec<serde_json::Value>> {
        let mut articles = Vec::new();
        for (_, path) in job.articles(site) {
            articles.push(self.ctx.artifacts.read_json(path).await?);
        }
        Ok(articles)
    }

    async fn interpret_job(&self, job: &Job) -> Result<()> {
        let questions = &self.ctx.config.daily_questions;
        for site in &self.ctx.config.sites {
            let articles = self.read_articles(job, site).await?;
            let answers = if articles.is_empty() {
                warn!(job = %job.key, %site, "no articles, writing placeholder");
                placeholder_answers(questions, site)
            } else {
                self.collaborators
                    .interpreter
                    .interpret(site, &serde_json::Value::Array(articles), questions)
                    .await?
            };
            let path = artifact_path(job, site, ArtifactKind::Interpreted);
            self.ctx.artifacts.write_json(&path, &answers).await?;
        }
        Ok(())
    }

    async fn summarize_job(&self, job: &Job) -> Result<()> {
        let mut interpretations: Vec<(String, AnswerSet)> = Vec::new();
        for site in &self.ctx.config.sites {
            if let Some(path) = job.artifact(site, ArtifactKind::Interpreted) {
                interpretations.push((site.clone(), self.ctx.artifacts.read_json(path).await?));
            }
        }
        if interpretations.is_empty() {
            return Err(MediaLensError::not_found(format!(
                "interpretations for job {}",
                job.key
            )));
        }

        let summary = self
            .collaborators
            .summarizer
            .summarize(job, &interpretations)
            .await?;
        let path = join_path(&[&job.path, DAILY_SUMMARY_FILE]);
        self.ctx.artifacts.write_text(&path, &summary).await
    }

    async fn interpret_window(&self, window: &Window, jobs: &[Job], overwrite: bool) -> Result<()> {
        let content = self
            .aggregator
            .build_window_content(window, jobs, overwrite)
            .await?;
        let questions = &self.ctx.config.weekly_questions;

        let mut interpretation = Vec::new();
        for site in &self.ctx.config.sites {
            let articles = content.site_articles(site);
            let answers = if articles.is_empty() {
                placeholder_answers(questions, site)
            } else {
                self.collaborators
                    .interpreter
                    .interpret(site, &serde_json::Value::Array(articles), questions)
                    .await?
            };
            interpretation.push(SiteAnswers {
                site: site.clone(),
                answers,
            });
        }

        let record = WeeklyInterpretation::for_window(window, interpretation);
        self.ctx
            .artifacts
            .write_json(&weekly_interpretation_path(&window.key), &record)
            .await
    }

    async fn format_page(&self, window: &Window, page: Page, jobs: &[Job]) -> Result<()> {
        require_members(window)?;
        let data = self.page_data(window, page, jobs).await?;
        let value = serde_json::to_value(&data)
            .map_err(|e| MediaLensError::validation(format!("page data: {e}")))?;
        let bytes = self
            .collaborators
            .renderer
            .render(page.template(), &value)
            .await?;
        let path = staged_path(&page.file_name(&window.key));
        self.ctx.artifacts.write_bytes(&path, &bytes).await?;
        info!(%path, bytes = bytes.len(), "page staged");
        Ok(())
    }

    async fn deploy_page(&self, window: &Window, page: Page) -> Result<()> {
        require_members(window)?;
        let name = page.file_name(&window.key);
        let bytes = self.ctx.artifacts.read_bytes(&staged_path(&name)).await?;
        let remote = remote_path(&self.ctx.config.remote_prefix, &name);
        self.collaborators.publisher.put_object(&remote, &bytes).await?;
        info!(%remote, "page deployed");
        Ok(())
    }

    async fn page_data(&self, window: &Window, page: Page, jobs: &[Job]) -> Result<PageData> {
        let mut page_jobs = Vec::new();
        for job in jobs.iter().filter(|j| window.member_jobs.contains(&j.key)) {
            let summary = match &job.summary {
                Some(path) => Some(self.ctx.artifacts.read_text(path).await?),
                None => None,
            };
            let mut sites = Vec::new();
            for site in &self.ctx.config.sites {
                let answers = match job.artifact(site, ArtifactKind::Interpreted) {
                    Some(path) => Some(self.ctx.artifacts.read_json::<AnswerSet>(path).await?),
                    None => None,
                };
                sites.push(PageSite {
                    site: site.clone(),
                    answers,
                });
            }
            page_jobs.push(PageJob {
                job: job.key,
                summary,
                sites,
            });
        }

        let weekly_path = weekly_interpretation_path(&window.key);
        let weekly = if self.ctx.artifacts.exists(&weekly_path).await? {
            Some(self.ctx.artifacts.read_json(&weekly_path).await?)
        } else {
            None
        };

        let (as_of, archive) = match page {
            Page::Landing => {
                let today = self.ctx.today();
                let mut weeks: Vec<WindowKey> = classify_windows(jobs, today)
                    .historical
                    .into_iter()
                    .map(|w| w.key)
                    .collect();
                weeks.reverse();
                (today, weeks)
            }
            Page::Archive => (window.end, Vec::new()),
        };

        Ok(PageData {
            page: page.template(),
            window_key: window.key,
            policy: window.policy,
            start: window.start,
            end: window.end,
            as_of,
            sites: self.ctx.config.sites.clone(),
            jobs: page_jobs,
            weekly,
            archive,
        })
    }

    // -----------------------------------------------------------------------
    // Operator actions
    // -----------------------------------------------------------------------

    /// Re-run `interpret_weekly` for every ISO week from the week of `from`
    /// through the current week.
    pub async fn reinterpret_weeks(
        &self,
        from: NaiveDate,
        overwrite: bool,
        run_id: Option<String>,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let today = self.ctx.today();
        if from > today {
            return Err(MediaLensError::validation(format!(
                "start date {from} is in the future"
            )));
        }
        let request = RunRequest {
            steps: vec![Step::InterpretWeekly],
            weeks: iso_weeks_between(from, today),
            overwrite_weekly: overwrite,
            run_id,
            ..RunRequest::default()
        };
        self.execute(request, progress).await
    }

    /// Request a cooperative stop of `run_id`.
    pub async fn stop(&self, run_id: &str) -> Result<bool> {
        self.registry.stop(&self.ctx.state, run_id).await
    }
}
