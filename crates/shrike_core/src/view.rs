//! View naming and time-quantum expansion.
//!
//! A frame stores its data in named views: `standard` (row-major), `inverse`
//! (column-major, when enabled), and time-bucketed derivatives of either,
//! named by truncated timestamp (`standard_2017`, `standard_201701`,
//! `standard_20170102`, `standard_2017010200`). A write carrying a timestamp
//! lands in one time view per quantum unit; a range read expands its interval
//! at the quantum's finest granularity.

use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Row-major orientation.
pub const VIEW_STANDARD: &str = "standard";

/// Column-major orientation, present only when the frame enables inverse
/// storage.
pub const VIEW_INVERSE: &str = "inverse";

/// Granularities at which a frame buckets writes by time: an ordered subset
/// of `"YMDH"`, coarse to fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeQuantum(String);

impl TimeQuantum {
    /// Validates that `s` is a non-empty, ordered subset of `"YMDH"`.
    pub fn new(s: &str) -> Option<TimeQuantum> {
        if s.is_empty() {
            return None;
        }
        let mut order = "YMDH".chars();
        for unit in s.chars() {
            if !order.any(|c| c == unit) {
                return None;
            }
        }
        Some(TimeQuantum(s.to_string()))
    }

    /// Units coarse to fine.
    pub fn units(&self) -> impl Iterator<Item = char> + '_ {
        self.0.chars()
    }

    /// The finest unit present.
    pub fn finest(&self) -> char {
        // new() guarantees non-empty.
        self.0.chars().next_back().unwrap_or('Y')
    }
}

impl fmt::Display for TimeQuantum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the time view for `t` truncated to `unit`, derived from `name`.
pub fn view_by_time_unit(name: &str, t: NaiveDateTime, unit: char) -> String {
    let stamp = match unit {
        'Y' => t.format("%Y"),
        'M' => t.format("%Y%m"),
        'D' => t.format("%Y%m%d"),
        _ => t.format("%Y%m%d%H"),
    };
    format!("{}_{}", name, stamp)
}

/// Views a timestamped write lands in: one per quantum unit.
pub fn views_by_time(name: &str, t: NaiveDateTime, q: &TimeQuantum) -> Vec<String> {
    q.units().map(|unit| view_by_time_unit(name, t, unit)).collect()
}

/// Views covering `[start, end)` at the quantum's finest granularity.
///
/// Every timestamped write populates all quantum granularities, so reading
/// only the finest buckets unions to the same bitmap the mixed-granularity
/// cover would.
pub fn views_by_time_range(
    name: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    q: &TimeQuantum,
) -> Vec<String> {
    let unit = q.finest();
    let mut views = Vec::new();
    let mut t = truncate(start, unit);
    while t < end {
        views.push(view_by_time_unit(name, t, unit));
        match step(t, unit) {
            Some(next) => t = next,
            None => break,
        }
    }
    views
}

fn truncate(t: NaiveDateTime, unit: char) -> NaiveDateTime {
    let fallback = t;
    let date = t.date();
    match unit {
        'H' => date.and_hms_opt(t.hour(), 0, 0),
        'D' => date.and_hms_opt(0, 0, 0),
        'M' => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0)),
        _ => NaiveDate::from_ymd_opt(date.year(), 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0)),
    }
    .unwrap_or(fallback)
}

fn step(t: NaiveDateTime, unit: char) -> Option<NaiveDateTime> {
    match unit {
        'H' => t.checked_add_signed(Duration::hours(1)),
        'D' => t.checked_add_signed(Duration::days(1)),
        'M' => {
            let (year, month) = if t.month() == 12 {
                (t.year() + 1, 1)
            } else {
                (t.year(), t.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
        }
        _ => NaiveDate::from_ymd_opt(t.year() + 1, 1, 1)?.and_hms_opt(0, 0, 0),
    }
}
