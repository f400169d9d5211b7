//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use medialens_core::steps::cursor_stages;
use medialens_core::{
    BridgeOptions, Collaborators, CursorOperator, JobIndex, JobScope, Orchestrator,
    PipelineContext, ProgressReporter, RunRegistry, RunReport, RunRequest, SubprocessBridge,
    SystemClock, audit_jobs, new_run_id, run_status,
};
use medialens_shared::{
    AppConfig, JobKey, PipelineConfig, RunRecord, RunState, Step, WindowKey, init_config,
    load_config, load_config_from, render_config,
};
use medialens_storage::{LocalStorage, Storage};
use tokio::task::JoinHandle;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// MediaLens: incremental processing of daily news-site snapshots.
#[derive(Parser)]
#[command(
    name = "medialens",
    version,
    about = "Run pipeline steps over stored news snapshots and publish weekly digests.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.medialens/medialens.toml).
    #[arg(long, env = "MEDIALENS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Optional acquisition-date bounds, inclusive.
#[derive(Args, Clone, Copy)]
pub(crate) struct DateRange {
    /// First acquisition date (YYYY-MM-DD).
    #[arg(long)]
    pub start_date: Option<NaiveDate>,

    /// Last acquisition date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    pub end_date: Option<NaiveDate>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run pipeline steps.
    Run {
        /// Steps to run, in any order (e.g. extract interpret format).
        #[arg(required = true)]
        steps: Vec<Step>,

        /// Process exactly this job (YYYY-MM-DD_HHMMSS); cursors are not consulted.
        #[arg(long, conflicts_with_all = ["start_date", "end_date"])]
        job: Option<JobKey>,

        #[command(flatten)]
        range: DateRange,

        /// Bypass the cursor filter for this stage (repeatable).
        #[arg(long = "force", value_name = "STAGE")]
        force: Vec<Step>,

        /// Rewind the requested cursors by this many days first.
        #[arg(long)]
        rewind_days: Option<u32>,

        /// Run id (generated when omitted).
        #[arg(long)]
        run_id: Option<String>,

        /// Override the configured sites (comma-separated, in presentation order).
        #[arg(long, value_delimiter = ',')]
        sites: Option<Vec<String>>,

        /// Recompute weekly interpretations that already exist.
        #[arg(long)]
        overwrite_weekly: bool,

        /// Interpret these ISO weeks (YYYY-Www) instead of the default selection.
        #[arg(long = "week", value_name = "WEEK")]
        weeks: Vec<WindowKey>,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show a run, or recent runs with cursor and lock state.
    Status {
        run_id: Option<String>,

        /// Number of recent runs to list.
        #[arg(long, default_value = "10")]
        limit: u32,

        #[arg(long)]
        json: bool,
    },

    /// Ask a running invocation to stop after its current unit.
    Stop { run_id: String },

    /// Clear cursors so the next run processes every job.
    ResetCursor {
        /// Stage to reset (repeatable).
        #[arg(long = "stage", value_name = "STAGE", required_unless_present = "all")]
        stages: Vec<Step>,

        /// Reset every cursor stage.
        #[arg(long, conflicts_with = "stages")]
        all: bool,
    },

    /// Move cursors back so recent jobs are processed again.
    Rewind {
        /// Days to rewind.
        #[arg(long)]
        days: u32,

        /// Stage to rewind (repeatable). Defaults to every cursor stage.
        #[arg(long = "stage", value_name = "STAGE")]
        stages: Vec<Step>,
    },

    /// Re-run weekly interpretation for every week since a date.
    ReinterpretWeeks {
        /// Any date in the first week to reinterpret (YYYY-MM-DD).
        #[arg(long)]
        date: NaiveDate,

        /// Keep weekly interpretations that already exist.
        #[arg(long)]
        no_overwrite: bool,

        #[arg(long)]
        run_id: Option<String>,
    },

    /// Report missing or unreadable job artifacts.
    Audit {
        #[command(flatten)]
        range: DateRange,

        /// Do not write audit.json.
        #[arg(long)]
        no_report: bool,

        #[arg(long)]
        json: bool,
    },

    /// List stored jobs.
    Jobs {
        #[command(flatten)]
        range: DateRange,
    },

    /// Release a stage lock left behind by a crashed run.
    Unlock {
        #[arg(long = "stage", value_name = "STAGE", required = true)]
        stages: Vec<Step>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "medialens=info",
        1 => "medialens=debug",
        _ => "medialens=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Run {
            steps,
            job,
            range,
            force,
            rewind_days,
            run_id,
            sites,
            overwrite_weekly,
            weeks,
            json,
        } => {
            let request = RunRequest {
                steps,
                scope: scope_from(job, range)?,
                force: force.into_iter().collect(),
                rewind_days,
                run_id,
                overwrite_weekly,
                weeks,
            };
            cmd_run(&config, sites, request, json).await
        }
        Command::Status {
            run_id,
            limit,
            json,
        } => cmd_status(&config, run_id.as_deref(), limit, json).await,
        Command::Stop { run_id } => cmd_stop(&config, &run_id).await,
        Command::ResetCursor { stages, all } => {
            let stages = if all { cursor_stages() } else { stages };
            cmd_reset_cursor(&config, &stages).await
        }
        Command::Rewind { days, stages } => {
            let stages = if stages.is_empty() {
                cursor_stages()
            } else {
                stages
            };
            cmd_rewind(&config, &stages, days).await
        }
        Command::ReinterpretWeeks {
            date,
            no_overwrite,
            run_id,
        } => cmd_reinterpret_weeks(&config, date, !no_overwrite, run_id).await,
        Command::Audit {
            range,
            no_report,
            json,
        } => cmd_audit(&config, scope_from(None, range)?, !no_report, json).await,
        Command::Jobs { range } => cmd_jobs(&config, scope_from(None, range)?).await,
        Command::Unlock { stages } => cmd_unlock(&config, &stages).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

fn scope_from(job: Option<JobKey>, range: DateRange) -> Result<JobScope> {
    if let Some(key) = job {
        return Ok(JobScope::Explicit(key));
    }
    match (range.start_date, range.end_date) {
        (None, None) => Ok(JobScope::All),
        (start, end) => Ok(JobScope::date_range(
            start.unwrap_or(NaiveDate::MIN),
            end.unwrap_or_else(|| Utc::now().date_naive()),
        )?),
    }
}

// ---------------------------------------------------------------------------
// Context wiring
// ---------------------------------------------------------------------------

/// Open the state database and artifact store described by `config`.
async fn open_context(config: &AppConfig, sites: Option<Vec<String>>) -> Result<PipelineContext> {
    let mut pipeline = PipelineConfig::from(config);
    if let Some(sites) = sites {
        pipeline.sites = sites;
    }
    pipeline.validate()?;

    let state = Storage::open(&pipeline.state_db).await?;
    let artifacts = LocalStorage::new(pipeline.working_dir.clone());
    Ok(PipelineContext::new(
        pipeline,
        Arc::new(state),
        Arc::new(artifacts),
        Arc::new(SystemClock),
    ))
}

/// Start the collaborator bridge for `ctx`.
async fn spawn_bridge(config: &AppConfig, ctx: &PipelineContext) -> Result<Arc<SubprocessBridge>> {
    let root = std::path::absolute(&ctx.config.working_dir)
        .map_err(|e| eyre!("cannot resolve working directory: {e}"))?;
    let options = BridgeOptions::from_config(&config.bridge, root);
    Ok(Arc::new(SubprocessBridge::spawn(&options).await?))
}

/// An orchestrator wired to the collaborator bridge, stopped cooperatively on Ctrl-C.
struct BridgedRun {
    bridge: Arc<SubprocessBridge>,
    orchestrator: Arc<Orchestrator>,
    interrupt: JoinHandle<()>,
}

impl BridgedRun {
    async fn start(config: &AppConfig, ctx: PipelineContext, run_id: &str) -> Result<Self> {
        let bridge = spawn_bridge(config, &ctx).await?;
        let orchestrator = Arc::new(Orchestrator::new(
            ctx,
            Collaborators::from_single(bridge.clone()),
            Arc::new(RunRegistry::new()),
        ));

        let interrupt = {
            let orchestrator = orchestrator.clone();
            let run_id = run_id.to_string();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!(%run_id, "interrupted; stopping after the current unit");
                    if let Err(e) = orchestrator.stop(&run_id).await {
                        warn!(error = %e, "stop request failed");
                    }
                }
            })
        };

        Ok(Self {
            bridge,
            orchestrator,
            interrupt,
        })
    }

    async fn close(self) {
        self.interrupt.abort();
        self.bridge.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: &AppConfig,
    sites: Option<Vec<String>>,
    mut request: RunRequest,
    json: bool,
) -> Result<()> {
    let ctx = open_context(config, sites).await?;
    let run_id = request.run_id.take().unwrap_or_else(new_run_id);
    info!(%run_id, steps = ?request.steps, scope = ?request.scope, "starting run");

    let session = BridgedRun::start(config, ctx, &run_id).await?;
    let reporter = CliProgress::new();
    let result = session
        .orchestrator
        .execute(request.with_run_id(run_id), &reporter)
        .await;
    session.close().await;

    let report = result?;
    finish(&report, json)
}

async fn cmd_reinterpret_weeks(
    config: &AppConfig,
    from: NaiveDate,
    overwrite: bool,
    run_id: Option<String>,
) -> Result<()> {
    let ctx = open_context(config, None).await?;
    let run_id = run_id.unwrap_or_else(new_run_id);
    info!(%run_id, %from, overwrite, "reinterpreting weeks");

    let session = BridgedRun::start(config, ctx, &run_id).await?;
    let reporter = CliProgress::new();
    let result = session
        .orchestrator
        .reinterpret_weeks(from, overwrite, Some(run_id), &reporter)
        .await;
    session.close().await;

    let report = result?;
    finish(&report, false)
}

/// Print `report` and turn a failed run into an error exit.
fn finish(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_report(report);
    }
    match report.state {
        RunState::Failed => Err(eyre!(
            "run {} failed: {}",
            report.run_id,
            report.error.as_deref().unwrap_or("unknown error")
        )),
        _ => Ok(()),
    }
}

fn print_report(report: &RunReport) {
    println!();
    println!("  Run:    {}", report.run_id);
    println!("  State:  {}", report.state.as_str());
    if let Some(job) = report.created_job {
        println!("  Job:    {job}");
    }
    for step in &report.steps {
        let cursor = match (step.cursor_before, step.cursor_after) {
            (before, after) if before != after => format!(
                "  cursor {} -> {}",
                show(before),
                show(after)
            ),
            _ => String::new(),
        };
        println!(
            "  {:<17} {} ok, {} skipped{}",
            step.step.as_str(),
            step.succeeded.len(),
            step.skipped.len(),
            cursor
        );
        if let (Some(unit), Some(error)) = (&step.failed, &step.error) {
            println!("  {:<17} failed at {unit}: {error}", "");
        }
    }
    println!();
}

fn show(key: Option<JobKey>) -> String {
    key.map_or_else(|| "-".to_string(), |k| k.to_string())
}

async fn cmd_status(config: &AppConfig, run_id: Option<&str>, limit: u32, json: bool) -> Result<()> {
    let pipeline = PipelineConfig::from(config);
    let state = Storage::open_readonly(&pipeline.state_db).await?;

    if let Some(run_id) = run_id {
        let run = run_status(&state, run_id).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&run)?);
        } else {
            print_run(&run);
        }
        return Ok(());
    }

    let runs = state.list_runs(limit).await?;
    let cursors = state.list_cursors().await?;
    let locks = state.list_stage_locks().await?;
    if json {
        let locks: Vec<_> = locks
            .iter()
            .map(|(stage, holder)| serde_json::json!({ "stage": stage, "run_id": holder }))
            .collect();
        let status = serde_json::json!({ "runs": runs, "cursors": cursors, "locks": locks });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Cursors:");
    if cursors.is_empty() {
        println!("  (none)");
    }
    for cursor in &cursors {
        println!(
            "  {:<17} {}  rev {}",
            cursor.stage.as_str(),
            cursor.position,
            cursor.revision
        );
    }
    if !locks.is_empty() {
        println!("Locks:");
        for (stage, holder) in &locks {
            println!("  {:<17} {holder}", stage.as_str());
        }
    }
    println!("Runs:");
    if runs.is_empty() {
        println!("  (none)");
    }
    for run in &runs {
        println!(
            "  {}  {:<9}  {}  {}",
            run.run_id,
            run.state.as_str(),
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.steps
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
    }
    Ok(())
}

fn print_run(run: &RunRecord) {
    let names = |steps: &[Step]| {
        steps
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    println!("  Run:        {}", run.run_id);
    println!("  State:      {}", run.state.as_str());
    println!("  Steps:      {}", names(&run.steps));
    println!("  Completed:  {}", names(&run.completed_steps));
    if let Some((stage, position)) = &run.last_cursor {
        println!("  Cursor:     {stage} at {position}");
    }
    if let Some(error) = &run.error {
        println!("  Error:      {error}");
    }
    if run.stop_requested {
        println!("  Stop requested");
    }
    println!("  Started:    {}", run.started_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(finished) = run.finished_at {
        println!("  Finished:   {}", finished.format("%Y-%m-%d %H:%M:%S"));
    }
}

async fn cmd_stop(config: &AppConfig, run_id: &str) -> Result<()> {
    let pipeline = PipelineConfig::from(config);
    let state = Storage::open(&pipeline.state_db).await?;
    if RunRegistry::new().stop(&state, run_id).await? {
        println!("Stop requested for run {run_id}");
        Ok(())
    } else {
        Err(eyre!("no running run with id '{run_id}'"))
    }
}

async fn cmd_reset_cursor(config: &AppConfig, stages: &[Step]) -> Result<()> {
    let ctx = open_context(config, None).await?;
    for (stage, existed) in CursorOperator::new(ctx).reset(stages).await? {
        if existed {
            println!("  {:<17} reset", stage.as_str());
        } else {
            println!("  {:<17} no cursor", stage.as_str());
        }
    }
    Ok(())
}

async fn cmd_rewind(config: &AppConfig, stages: &[Step], days: u32) -> Result<()> {
    let ctx = open_context(config, None).await?;
    for (stage, moved) in CursorOperator::new(ctx).rewind(stages, days).await? {
        match moved {
            Some(position) => println!("  {:<17} -> {position}", stage.as_str()),
            None => println!("  {:<17} unchanged", stage.as_str()),
        }
    }
    Ok(())
}

async fn cmd_audit(config: &AppConfig, scope: JobScope, write_report: bool, json: bool) -> Result<()> {
    let ctx = open_context(config, None).await?;
    let report = audit_jobs(&ctx, scope, write_report).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!();
    println!("  Jobs audited: {}", report.jobs_audited.len());
    println!("  Problems:     {}", report.issues.len());
    println!("  Repairable:   {}", report.repairable());
    for issue in &report.issues {
        let marker = if issue.repairable { " " } else { "!" };
        println!(
            "  {marker} {}  {:<14} {:?}  {}",
            issue.job, issue.site, issue.kind, issue.file
        );
    }
    println!();
    Ok(())
}

async fn cmd_jobs(config: &AppConfig, scope: JobScope) -> Result<()> {
    let ctx = open_context(config, None).await?;
    let jobs = JobIndex::new(ctx.artifacts.clone()).list_jobs(scope).await?;
    if jobs.is_empty() {
        println!("No jobs found under {}", ctx.config.working_dir.display());
        return Ok(());
    }
    for job in &jobs {
        let summary = if job.summary.is_some() { "summary" } else { "" };
        println!(
            "  {}  {:<28} {} sites  {summary}",
            job.key,
            job.path,
            job.sites.len()
        );
    }
    Ok(())
}

async fn cmd_unlock(config: &AppConfig, stages: &[Step]) -> Result<()> {
    let pipeline = PipelineConfig::from(config);
    let state = Storage::open(&pipeline.state_db).await?;
    for stage in stages {
        if state.force_release_stage_lock(*stage).await? {
            warn!(stage = %stage, "stage lock released by operator");
            println!("  {:<17} unlocked", stage.as_str());
        } else {
            println!("  {:<17} not locked", stage.as_str());
        }
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    println!("{}", render_config(config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn step_started(&self, step: Step, units: usize) {
        self.spinner.set_message(format!("{step}: {units} units"));
    }

    fn unit_finished(&self, step: Step, unit: &str, ok: bool) {
        if ok {
            self.spinner.set_message(format!("{step}: {unit}"));
        } else {
            self.spinner.println(format!("  {step}: {unit} failed"));
        }
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}
