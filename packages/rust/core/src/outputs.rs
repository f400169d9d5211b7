//! Names and shapes of the files the pipeline writes outside job directories.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use medialens_shared::{
    AnswerSet, JobKey, Policy, QuestionAnswer, Window, WindowKey, WindowStatus,
};
use medialens_storage::join_path;

/// Weekly interpretations.
pub const INTERMEDIATE_DIR: &str = "intermediate";
/// Rendered pages waiting for deploy.
pub const STAGING_DIR: &str = "staging";
/// Landing page file name.
pub const LANDING_PAGE: &str = "index.html";
/// Template for the live landing page.
pub const LANDING_TEMPLATE: &str = "landing";
/// Template for archived weeks.
pub const ARCHIVE_TEMPLATE: &str = "archive";

/// Which page a window renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    /// Current rolling window.
    Landing,
    /// One closed ISO week.
    Archive,
}

impl Page {
    pub fn template(&self) -> &'static str {
        match self {
            Self::Landing => LANDING_TEMPLATE,
            Self::Archive => ARCHIVE_TEMPLATE,
        }
    }

    /// Page file name for `window`.
    pub fn file_name(&self, window: &WindowKey) -> String {
        match self {
            Self::Landing => LANDING_PAGE.to_string(),
            Self::Archive => format!("weekly-{window}.html"),
        }
    }
}

/// Staged path of a page.
pub fn staged_path(file_name: &str) -> String {
    join_path(&[STAGING_DIR, file_name])
}

/// Remote path of a page under `prefix`.
pub fn remote_path(prefix: &str, file_name: &str) -> String {
    join_path(&[prefix, file_name])
}

/// Stored path of the weekly interpretation for `window`.
pub fn weekly_interpretation_path(window: &WindowKey) -> String {
    join_path(&[INTERMEDIATE_DIR, &format!("weekly-{window}-interpreted.json")])
}

/// Answers for one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteAnswers {
    pub site: String,
    pub answers: AnswerSet,
}

/// Interpretation of one window, as written under [`INTERMEDIATE_DIR`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyInterpretation {
    pub window_key: WindowKey,
    pub policy: Policy,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Window status when the interpretation was made. A record made while
    /// the window was open covers only the jobs known at that time.
    pub status: WindowStatus,
    pub member_jobs: Vec<JobKey>,
    pub interpretation: Vec<SiteAnswers>,
}

impl WeeklyInterpretation {
    pub fn for_window(window: &Window, interpretation: Vec<SiteAnswers>) -> Self {
        Self {
            window_key: window.key,
            policy: window.policy,
            start: window.start,
            end: window.end,
            status: window.status,
            member_jobs: window.member_jobs.clone(),
            interpretation,
        }
    }

    /// Whether this record is final and need not be recomputed.
    pub fn is_final(&self) -> bool {
        self.status == WindowStatus::Closed
    }
}

/// Answer set recorded for a site that had nothing to interpret.
pub fn placeholder_answers(questions: &[String], site: &str) -> AnswerSet {
    questions
        .iter()
        .map(|q| QuestionAnswer {
            question: q.clone(),
            answer: format!("No content was available from {site}."),
        })
        .collect()
}

/// One job as it appears on a page.
#[derive(Debug, Clone, Serialize)]
pub struct PageJob {
    pub job: JobKey,
    pub summary: Option<String>,
    pub sites: Vec<PageSite>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageSite {
    pub site: String,
    pub answers: Option<AnswerSet>,
}

/// Everything handed to the renderer for one page.
///
/// Contains no wall-clock values, so rendering the same inputs twice gives
/// the same bytes.
#[derive(Debug, Clone, Serialize)]
pub struct PageData {
    pub page: &'static str,
    pub window_key: WindowKey,
    pub policy: Policy,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Evaluation date for the landing page; window end for archives.
    pub as_of: NaiveDate,
    pub sites: Vec<String>,
    pub jobs: Vec<PageJob>,
    pub weekly: Option<WeeklyInterpretation>,
    /// Archived weeks, newest first. Landing page only.
    pub archive: Vec<WindowKey>,
}
