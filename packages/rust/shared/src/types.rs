//! Core domain types for the MediaLens pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MediaLensError;

/// Current schema version for persisted cursor records.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// File name of the job-level daily summary artifact.
pub const DAILY_SUMMARY_FILE: &str = "daily_news.txt";

/// Root directory of hierarchical job directories.
pub const JOBS_ROOT: &str = "jobs";

static LEGACY_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2})_(\d{6})$").expect("legacy job key pattern")
});

static HIERARCHICAL_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:jobs/)?(\d{4})/(\d{2})/(\d{2})/(\d{6})$").expect("hierarchical job key pattern")
});

static ARTICLE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)-clean-article-(\d+)\.json$").expect("article file pattern")
});

static ISO_WEEK_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-W(\d{2})$").expect("iso week key pattern"));

// ---------------------------------------------------------------------------
// JobKey
// ---------------------------------------------------------------------------

/// Identity of one acquisition run: (year, month, day, time-of-day).
///
/// Field order gives the derived `Ord` its lexicographic meaning, so keys sort
/// chronologically. `time` is packed as `HHMMSS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobKey {
    year: i32,
    month: u32,
    day: u32,
    time: u32,
}

impl JobKey {
    /// Build a key from calendar components, rejecting impossible dates and times.
    pub fn new(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    ) -> Result<Self, MediaLensError> {
        if year < 0 || year > 9999 {
            return Err(MediaLensError::validation(format!("job year {year} out of range")));
        }
        NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
            MediaLensError::validation(format!("invalid job date {year:04}-{month:02}-{day:02}"))
        })?;
        NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| {
            MediaLensError::validation(format!("invalid job time {hour:02}{minute:02}{second:02}"))
        })?;
        Ok(Self {
            year,
            month,
            day,
            time: hour * 10_000 + minute * 100 + second,
        })
    }

    /// Key for an acquisition that happened at `at` (sub-second precision is dropped).
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
            day: at.day(),
            time: at.hour() * 10_000 + at.minute() * 100 + at.second(),
        }
    }

    /// The earliest possible key on `date`. Every job acquired on `date` compares `>=`.
    pub fn start_of_day(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
            time: 0,
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    fn hms(&self) -> (u32, u32, u32) {
        (self.time / 10_000, (self.time / 100) % 100, self.time % 100)
    }

    /// Acquisition calendar date (UTC).
    pub fn date(&self) -> NaiveDate {
        // Validated in every constructor.
        NaiveDate::from_ymd_opt(self.year, self.month, self.day).unwrap_or_default()
    }

    /// Acquisition instant (UTC).
    pub fn datetime(&self) -> DateTime<Utc> {
        let (h, m, s) = self.hms();
        let time = NaiveTime::from_hms_opt(h, m, s).unwrap_or_default();
        NaiveDateTime::new(self.date(), time).and_utc()
    }

    /// Hierarchical storage path, e.g. `jobs/2025/06/07/193355`.
    pub fn storage_path(&self) -> String {
        let (h, m, s) = self.hms();
        format!(
            "{JOBS_ROOT}/{:04}/{:02}/{:02}/{h:02}{m:02}{s:02}",
            self.year, self.month, self.day
        )
    }

    /// Parse a job directory path in either hierarchical or legacy flat form.
    ///
    /// Returns the key and whether the path was hierarchical.
    pub fn parse_path(path: &str) -> Option<(Self, bool)> {
        let path = path.trim().trim_end_matches('/');
        if let Some(caps) = HIERARCHICAL_KEY.captures(path) {
            return Self::from_captures(&caps).map(|k| (k, true));
        }
        LEGACY_KEY
            .captures(path)
            .and_then(|caps| Self::from_captures(&caps))
            .map(|k| (k, false))
    }

    fn from_captures(caps: &regex::Captures<'_>) -> Option<Self> {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        let time: u32 = caps[4].parse().ok()?;
        Self::new(year, month, day, time / 10_000, (time / 100) % 100, time % 100).ok()
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, s) = self.hms();
        write!(
            f,
            "{:04}-{:02}-{:02}_{h:02}{m:02}{s:02}",
            self.year, self.month, self.day
        )
    }
}

impl FromStr for JobKey {
    type Err = MediaLensError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_path(s)
            .map(|(key, _)| key)
            .ok_or_else(|| MediaLensError::validation(format!("invalid job key '{s}'")))
    }
}

impl TryFrom<String> for JobKey {
    type Error = MediaLensError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobKey> for String {
    fn from(key: JobKey) -> Self {
        key.to_string()
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// The kinds of per-site files found inside a job directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    Raw,
    Clean,
    Extracted,
    Article(u32),
    Interpreted,
}

impl ArtifactKind {
    /// Stage label used as the key in [`Job::artifacts`].
    pub fn stage_name(&self) -> String {
        match self {
            Self::Raw => "raw".into(),
            Self::Clean => "clean".into(),
            Self::Extracted => "extracted".into(),
            Self::Article(n) => format!("article-{n}"),
            Self::Interpreted => "interpreted".into(),
        }
    }

    /// File name of this artifact for `site`.
    pub fn file_name(&self, site: &str) -> String {
        match self {
            Self::Raw => format!("{site}.html"),
            Self::Clean => format!("{site}-clean.html"),
            Self::Extracted => format!("{site}-clean-extracted.json"),
            Self::Article(n) => format!("{site}-clean-article-{n}.json"),
            Self::Interpreted => format!("{site}-interpreted.json"),
        }
    }

    /// Recognise an artifact file name, returning `(site, kind)`.
    pub fn parse_file_name(name: &str) -> Option<(String, Self)> {
        if let Some(caps) = ARTICLE_FILE.captures(name) {
            let n = caps[2].parse().ok()?;
            return Some((caps[1].to_string(), Self::Article(n)));
        }
        let suffixes = [
            ("-clean-extracted.json", Self::Extracted),
            ("-clean.html", Self::Clean),
            ("-interpreted.json", Self::Interpreted),
            (".html", Self::Raw),
        ];
        suffixes.into_iter().find_map(|(suffix, kind)| {
            name.strip_suffix(suffix)
                .filter(|site| !site.is_empty())
                .map(|site| (site.to_string(), kind))
        })
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One content-acquisition run and the artifacts later stages attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub key: JobKey,
    /// Directory holding this job's artifacts.
    pub path: String,
    /// Sites with at least one artifact in this job.
    pub sites: BTreeSet<String>,
    /// site → stage → artifact path.
    pub artifacts: BTreeMap<String, BTreeMap<String, String>>,
    /// Path of the daily summary, once written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Job {
    pub fn new(key: JobKey, path: impl Into<String>) -> Self {
        Self {
            key,
            path: path.into(),
            sites: BTreeSet::new(),
            artifacts: BTreeMap::new(),
            summary: None,
        }
    }

    /// Acquisition date (UTC).
    pub fn date(&self) -> NaiveDate {
        self.key.date()
    }

    pub fn add_artifact(&mut self, site: &str, kind: ArtifactKind, path: impl Into<String>) {
        self.sites.insert(site.to_string());
        self.artifacts
            .entry(site.to_string())
            .or_default()
            .insert(kind.stage_name(), path.into());
    }

    pub fn artifact(&self, site: &str, kind: ArtifactKind) -> Option<&str> {
        self.artifacts
            .get(site)
            .and_then(|stages| stages.get(&kind.stage_name()))
            .map(String::as_str)
    }

    pub fn has_artifacts(&self) -> bool {
        !self.artifacts.is_empty() || self.summary.is_some()
    }

    /// Article artifacts for `site`, ordered by article number.
    pub fn articles(&self, site: &str) -> Vec<(u32, &str)> {
        let mut articles: Vec<(u32, &str)> = self
            .artifacts
            .get(site)
            .into_iter()
            .flat_map(|stages| stages.iter())
            .filter_map(|(stage, path)| {
                stage
                    .strip_prefix("article-")
                    .and_then(|n| n.parse().ok())
                    .map(|n| (n, path.as_str()))
            })
            .collect();
        articles.sort_by_key(|(n, _)| *n);
        articles
    }

    /// Fold another discovery of the same key into this job.
    pub fn merge(&mut self, other: Job) {
        self.sites.extend(other.sites);
        for (site, stages) in other.artifacts {
            let entry = self.artifacts.entry(site).or_default();
            for (stage, path) in stages {
                entry.entry(stage).or_insert(path);
            }
        }
        if self.summary.is_none() {
            self.summary = other.summary;
        }
    }
}

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

/// How a window's span is derived from its reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Seven calendar days ending on the reference date.
    Rolling,
    /// The Monday–Sunday ISO week containing the reference date.
    Iso,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rolling => "rolling",
            Self::Iso => "iso",
        }
    }
}

/// Whether a window may still change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    Open,
    Closed,
}

/// Identity of an analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WindowKey {
    /// ISO-8601 week, labelled with the ISO year.
    IsoWeek { year: i32, week: u32 },
    /// Rolling seven-day window anchored at its end date.
    Rolling { end: NaiveDate },
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IsoWeek { year, week } => write!(f, "{year:04}-W{week:02}"),
            Self::Rolling { end } => write!(f, "rolling-{}", end.format("%Y-%m-%d")),
        }
    }
}

impl FromStr for WindowKey {
    type Err = MediaLensError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(caps) = ISO_WEEK_KEY.captures(s) {
            let year: i32 = caps[1]
                .parse()
                .map_err(|_| MediaLensError::validation(format!("invalid week key '{s}'")))?;
            let week: u32 = caps[2]
                .parse()
                .map_err(|_| MediaLensError::validation(format!("invalid week key '{s}'")))?;
            if NaiveDate::from_isoywd_opt(year, week, chrono::Weekday::Mon).is_none() {
                return Err(MediaLensError::validation(format!(
                    "ISO year {year} has no week {week}"
                )));
            }
            return Ok(Self::IsoWeek { year, week });
        }
        if let Some(date) = s.strip_prefix("rolling-") {
            let end = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|e| MediaLensError::validation(format!("invalid window key '{s}': {e}")))?;
            return Ok(Self::Rolling { end });
        }
        Err(MediaLensError::validation(format!("invalid window key '{s}'")))
    }
}

impl TryFrom<String> for WindowKey {
    type Error = MediaLensError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WindowKey> for String {
    fn from(key: WindowKey) -> Self {
        key.to_string()
    }
}

/// An analysis period and the jobs acquired inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub key: WindowKey,
    pub policy: Policy,
    pub status: WindowStatus,
    /// First day of the span (inclusive).
    pub start: NaiveDate,
    /// Last day of the span (inclusive).
    pub end: NaiveDate,
    /// Member job keys, ascending.
    pub member_jobs: Vec<JobKey>,
}

impl Window {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn is_open(&self) -> bool {
        self.status == WindowStatus::Open
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Named pipeline steps, declared in canonical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Harvest,
    HarvestScrape,
    #[serde(rename = "re-harvest")]
    ReHarvest,
    HarvestClean,
    Extract,
    Interpret,
    InterpretWeekly,
    SummarizeDaily,
    Format,
    Deploy,
}

impl Step {
    /// Every step, in canonical order.
    pub const ALL: [Step; 10] = [
        Step::Harvest,
        Step::HarvestScrape,
        Step::ReHarvest,
        Step::HarvestClean,
        Step::Extract,
        Step::Interpret,
        Step::InterpretWeekly,
        Step::SummarizeDaily,
        Step::Format,
        Step::Deploy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Harvest => "harvest",
            Self::HarvestScrape => "harvest_scrape",
            Self::ReHarvest => "re-harvest",
            Self::HarvestClean => "harvest_clean",
            Self::Extract => "extract",
            Self::Interpret => "interpret",
            Self::InterpretWeekly => "interpret_weekly",
            Self::SummarizeDaily => "summarize_daily",
            Self::Format => "format",
            Self::Deploy => "deploy",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = MediaLensError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| MediaLensError::validation(format!("unknown step '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Persisted progress marker for one cursor stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRecord {
    pub schema_version: u32,
    pub stage: Step,
    /// Most recent fully processed job.
    pub position: JobKey,
    /// Incremented on every write; used to detect concurrent writers.
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Lifecycle state of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for RunState {
    type Err = MediaLensError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(MediaLensError::validation(format!("unknown run state '{other}'"))),
        }
    }
}

/// Status registry entry for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub steps: Vec<Step>,
    pub state: RunState,
    /// Steps that ran to completion.
    #[serde(default)]
    pub completed_steps: Vec<Step>,
    /// Last cursor touched by this run: (stage, position).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cursor: Option<(Step, JobKey)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub stop_requested: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Interpretation
// ---------------------------------------------------------------------------

/// One question and the interpreter's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question: String,
    pub answer: String,
}

/// Answers for one site's content.
pub type AnswerSet = Vec<QuestionAnswer>;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(s: &str) -> JobKey {
        s.parse().expect("parse job key")
    }

    #[test]
    fn job_key_parses_both_layouts() {
        let legacy = key("2025-06-07_193355");
        let (hier, is_hier) = JobKey::parse_path("jobs/2025/06/07/193355").expect("hierarchical");
        assert!(is_hier);
        assert_eq!(legacy, hier);
        assert_eq!(legacy.storage_path(), "jobs/2025/06/07/193355");
        assert_eq!(legacy.to_string(), "2025-06-07_193355");
        assert_eq!(
            JobKey::parse_path("2025-06-07_193355").map(|(_, h)| h),
            Some(false)
        );
    }

    #[test]
    fn job_key_rejects_impossible_dates() {
        assert!("2025-02-30_120000".parse::<JobKey>().is_err());
        assert!("2025-06-07_246000".parse::<JobKey>().is_err());
        assert!("jobs/2025/06/07/1933".parse::<JobKey>().is_err());
        assert!("not-a-job".parse::<JobKey>().is_err());
    }

    #[test]
    fn job_key_serializes_as_string() {
        let k = key("2025-01-02_030405");
        let json = serde_json::to_string(&k).expect("serialize");
        assert_eq!(json, "\"2025-01-02_030405\"");
        let back: JobKey = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, k);
    }

    #[test]
    fn job_key_datetime_matches_components() {
        let k = key("2025-12-31_235959");
        assert_eq!(k.date(), NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
        assert_eq!(JobKey::from_datetime(k.datetime()), k);
        assert!(JobKey::start_of_day(k.date()) < k);
    }

    #[test]
    fn artifact_file_names_parse() {
        assert_eq!(
            ArtifactKind::parse_file_name("www.cnn.com.html"),
            Some(("www.cnn.com".into(), ArtifactKind::Raw))
        );
        assert_eq!(
            ArtifactKind::parse_file_name("www.cnn.com-clean.html"),
            Some(("www.cnn.com".into(), ArtifactKind::Clean))
        );
        assert_eq!(
            ArtifactKind::parse_file_name("www.bbc.com-clean-extracted.json"),
            Some(("www.bbc.com".into(), ArtifactKind::Extracted))
        );
        assert_eq!(
            ArtifactKind::parse_file_name("www.bbc.com-clean-article-12.json"),
            Some(("www.bbc.com".into(), ArtifactKind::Article(12)))
        );
        assert_eq!(
            ArtifactKind::parse_file_name("www.foxnews.com-interpreted.json"),
            Some(("www.foxnews.com".into(), ArtifactKind::Interpreted))
        );
        assert_eq!(ArtifactKind::parse_file_name("daily_news.txt"), None);
        assert_eq!(ArtifactKind::parse_file_name(".html"), None);
    }

    #[test]
    fn job_articles_sorted_numerically() {
        let mut job = Job::new(key("2025-06-07_193355"), "jobs/2025/06/07/193355");
        for n in [10, 2, 0] {
            job.add_artifact("a.com", ArtifactKind::Article(n), format!("p{n}"));
        }
        let numbers: Vec<u32> = job.articles("a.com").into_iter().map(|(n, _)| n).collect();
        assert_eq!(numbers, vec![0, 2, 10]);
        assert!(job.articles("missing.com").is_empty());
    }

    #[test]
    fn window_key_display_and_parse() {
        let iso = WindowKey::IsoWeek { year: 2026, week: 1 };
        assert_eq!(iso.to_string(), "2026-W01");
        assert_eq!("2026-W01".parse::<WindowKey>().unwrap(), iso);

        let rolling = WindowKey::Rolling {
            end: NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
        };
        assert_eq!(rolling.to_string(), "rolling-2025-06-10");
        assert_eq!("rolling-2025-06-10".parse::<WindowKey>().unwrap(), rolling);

        // 2025 has 52 ISO weeks.
        assert!("2025-W53".parse::<WindowKey>().is_err());
        assert!("2026-W53".parse::<WindowKey>().is_ok());
    }

    #[test]
    fn step_names_roundtrip() {
        for step in Step::ALL {
            assert_eq!(step.as_str().parse::<Step>().unwrap(), step);
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(json, format!("\"{}\"", step.as_str()));
        }
        assert!("publish".parse::<Step>().is_err());
    }

    proptest! {
        /// Sorting keys orders them by (year, month, day, time) compared as integers.
        #[test]
        fn job_key_order_is_chronological(
            raw in prop::collection::vec((2000i32..2100, 1u32..13, 1u32..29, 0u32..24, 0u32..60, 0u32..60), 1..40)
        ) {
            let mut keys: Vec<JobKey> = raw
                .iter()
                .map(|&(y, mo, d, h, mi, s)| JobKey::new(y, mo, d, h, mi, s).unwrap())
                .collect();
            keys.sort();
            keys.dedup();
            for pair in keys.windows(2) {
                prop_assert!(pair[0] < pair[1]);
                prop_assert!(pair[0].datetime() < pair[1].datetime());
                prop_assert!(pair[0].to_string() < pair[1].to_string());
            }
        }
    }
}
