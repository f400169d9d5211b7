//! Temporal window resolution.
//!
//! This module is the only place that decides whether a window is OPEN or
//! CLOSED and whether it uses the ROLLING or ISO policy. The live landing view
//! always uses the rolling window ending today; archives always use ISO weeks,
//! labelled with the ISO year so week 1 of 2026 never reads as 2025.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate, Weekday};

use medialens_shared::{
    Job, JobKey, MediaLensError, Policy, Result, Window, WindowKey, WindowStatus,
};

/// Length of every window in days.
pub const WINDOW_DAYS: u64 = 7;

/// Current and historical windows at one evaluation instant.
#[derive(Debug, Clone)]
pub struct Classification {
    /// Rolling window ending today. The only OPEN window.
    pub current: Window,
    /// CLOSED ISO weeks that have member jobs, ascending.
    pub historical: Vec<Window>,
}

/// Window descriptor for `reference` under `policy`, with no members yet.
pub fn resolve_window(reference: NaiveDate, policy: Policy, today: NaiveDate) -> Window {
    match policy {
        Policy::Rolling => {
            let start = reference - Days::new(WINDOW_DAYS - 1);
            Window {
                key: WindowKey::Rolling { end: reference },
                policy,
                status: if reference >= today {
                    WindowStatus::Open
                } else {
                    WindowStatus::Closed
                },
                start,
                end: reference,
                member_jobs: Vec::new(),
            }
        }
        Policy::Iso => {
            let week = reference.iso_week();
            let start = reference - Days::new(u64::from(reference.weekday().num_days_from_monday()));
            let end = start + Days::new(WINDOW_DAYS - 1);
            Window {
                key: WindowKey::IsoWeek {
                    year: week.year(),
                    week: week.week(),
                },
                policy,
                status: if today > end {
                    WindowStatus::Closed
                } else {
                    WindowStatus::Open
                },
                start,
                end,
                member_jobs: Vec::new(),
            }
        }
    }
}

/// Window for a stored key.
pub fn window_for_key(key: &WindowKey, today: NaiveDate) -> Result<Window> {
    match *key {
        WindowKey::Rolling { end } => Ok(resolve_window(end, Policy::Rolling, today)),
        WindowKey::IsoWeek { year, week } => {
            let monday = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).ok_or_else(|| {
                MediaLensError::validation(format!("ISO year {year} has no week {week}"))
            })?;
            Ok(resolve_window(monday, Policy::Iso, today))
        }
    }
}

/// Fill `window.member_jobs` from `jobs` (any order).
pub fn with_members(mut window: Window, jobs: &[Job]) -> Window {
    let mut members: Vec<JobKey> = jobs
        .iter()
        .filter(|job| window.contains(job.date()))
        .map(|job| job.key)
        .collect();
    members.sort();
    members.dedup();
    window.member_jobs = members;
    window
}

/// The live window: rolling, ending today, always OPEN.
pub fn current_window(today: NaiveDate, jobs: &[Job]) -> Window {
    with_members(resolve_window(today, Policy::Rolling, today), jobs)
}

/// The ISO archive window for `key`, with members.
pub fn historical_window(key: &WindowKey, today: NaiveDate, jobs: &[Job]) -> Result<Window> {
    if !matches!(key, WindowKey::IsoWeek { .. }) {
        return Err(MediaLensError::validation(format!(
            "archive windows are ISO weeks, got {key}"
        )));
    }
    Ok(with_members(window_for_key(key, today)?, jobs))
}

/// Split `jobs` into the current rolling window and closed ISO weeks.
///
/// Jobs in the still-open ISO week only appear in `current`.
pub fn classify_windows(jobs: &[Job], today: NaiveDate) -> Classification {
    let mut weeks: BTreeMap<WindowKey, Window> = BTreeMap::new();
    for job in jobs {
        let window = resolve_window(job.date(), Policy::Iso, today);
        if window.status == WindowStatus::Closed {
            weeks.entry(window.key).or_insert(window);
        }
    }

    Classification {
        current: current_window(today, jobs),
        historical: weeks
            .into_values()
            .map(|window| with_members(window, jobs))
            .collect(),
    }
}

/// ISO week keys from the week containing `from` through the week containing `to`.
pub fn iso_weeks_between(from: NaiveDate, to: NaiveDate) -> Vec<WindowKey> {
    let mut keys = Vec::new();
    let mut cursor = from;
    while cursor <= to || same_iso_week(cursor, to) {
        let week = cursor.iso_week();
        keys.push(WindowKey::IsoWeek {
            year: week.year(),
            week: week.week(),
        });
        cursor = cursor + Days::new(WINDOW_DAYS);
    }
    keys
}

fn same_iso_week(a: NaiveDate, b: NaiveDate) -> bool {
    a.iso_week() == b.iso_week()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{date, key};

    fn job(s: &str) -> Job {
        let k = key(s);
        Job::new(k, k.storage_path())
    }

    #[test]
    fn rolling_window_spans_seven_days() {
        let today = date("2025-06-10");
        let w = resolve_window(today, Policy::Rolling, today);
        assert_eq!(w.start, date("2025-06-04"));
        assert_eq!(w.end, today);
        assert_eq!(w.status, WindowStatus::Open);
        assert_eq!(w.key.to_string(), "rolling-2025-06-10");

        let past = resolve_window(date("2025-06-01"), Policy::Rolling, today);
        assert_eq!(past.status, WindowStatus::Closed);
    }

    #[test]
    fn open_window_membership_is_last_seven_days() {
        // D-10, D-6, D-3, D with D = 2025-06-10.
        let jobs = vec![
            job("2025-05-31_090000"),
            job("2025-06-04_090000"),
            job("2025-06-07_090000"),
            job("2025-06-10_090000"),
        ];
        let w = current_window(date("2025-06-10"), &jobs);
        assert_eq!(
            w.member_jobs,
            vec![
                key("2025-06-04_090000"),
                key("2025-06-07_090000"),
                key("2025-06-10_090000")
            ]
        );
    }

    #[test]
    fn iso_week_is_monday_to_sunday() {
        // Wednesday.
        let w = resolve_window(date("2025-06-11"), Policy::Iso, date("2025-06-11"));
        assert_eq!(w.start, date("2025-06-09"));
        assert_eq!(w.end, date("2025-06-15"));
        assert_eq!(w.key.to_string(), "2025-W24");
        assert_eq!(w.status, WindowStatus::Open);

        // Still open on its own Sunday, closed the Monday after.
        assert!(resolve_window(date("2025-06-11"), Policy::Iso, date("2025-06-15")).is_open());
        assert!(!resolve_window(date("2025-06-11"), Policy::Iso, date("2025-06-16")).is_open());
    }

    #[test]
    fn iso_key_uses_iso_year_across_boundaries() {
        // 2024-12-30 is Monday of 2025-W01.
        let w = resolve_window(date("2024-12-30"), Policy::Iso, date("2025-03-01"));
        assert_eq!(w.key.to_string(), "2025-W01");
        // 2021-01-01 belongs to 2020-W53.
        let w = resolve_window(date("2021-01-01"), Policy::Iso, date("2021-03-01"));
        assert_eq!(w.key.to_string(), "2020-W53");
        assert_eq!(w.start, date("2020-12-28"));

        let back = window_for_key(&w.key, date("2021-03-01")).unwrap();
        assert_eq!(back.start, w.start);
        assert_eq!(back.end, date("2021-01-03"));
    }

    #[test]
    fn sunday_tie_break_prefers_rolling_for_current() {
        // 2025-06-15 is the Sunday closing 2025-W24.
        let sunday = date("2025-06-15");
        let jobs = vec![
            job("2025-06-08_090000"), // Sunday of W23
            job("2025-06-09_090000"), // Monday of W24
            job("2025-06-15_090000"),
        ];

        let classified = classify_windows(&jobs, sunday);
        assert_eq!(classified.current.policy, Policy::Rolling);
        assert_eq!(classified.current.start, date("2025-06-09"));
        assert!(classified.current.is_open());
        // W24 is not final yet; only W23 is archived.
        let archived: Vec<String> = classified
            .historical
            .iter()
            .map(|w| w.key.to_string())
            .collect();
        assert_eq!(archived, vec!["2025-W23"]);

        // Once the week has elapsed, the archive for W24 is the ISO-bounded closed window.
        let w24: WindowKey = "2025-W24".parse().unwrap();
        let archive = historical_window(&w24, date("2025-06-16"), &jobs).unwrap();
        assert_eq!(archive.status, WindowStatus::Closed);
        assert_eq!(archive.start, date("2025-06-09"));
        assert_eq!(archive.end, sunday);
        assert_eq!(archive.member_jobs.len(), 2);
    }

    #[test]
    fn only_current_window_is_open() {
        let jobs: Vec<Job> = (1..=28)
            .map(|d| job(&format!("2025-05-{d:02}_120000")))
            .collect();
        let classified = classify_windows(&jobs, date("2025-05-28"));
        assert!(classified.current.is_open());
        assert!(classified.historical.iter().all(|w| !w.is_open()));
        assert!(classified
            .historical
            .iter()
            .all(|w| !w.member_jobs.is_empty() && w.policy == Policy::Iso));
    }

    #[test]
    fn historical_window_rejects_rolling_keys() {
        let k = WindowKey::Rolling {
            end: date("2025-06-10"),
        };
        assert!(historical_window(&k, date("2025-06-10"), &[]).is_err());
    }

    #[test]
    fn iso_weeks_between_covers_both_ends() {
        let weeks: Vec<String> = iso_weeks_between(date("2025-12-24"), date("2026-01-06"))
            .into_iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(weeks, vec!["2025-W52", "2026-W01", "2026-W02"]);

        let one = iso_weeks_between(date("2025-06-15"), date("2025-06-09"));
        assert_eq!(one.len(), 1);
    }
}
