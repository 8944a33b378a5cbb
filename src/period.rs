use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use tracing::warn;

use crate::error::{ReportError, ReportResult};
use crate::format::ordinal;

/// `Mon/YY`, e.g. `Jan/24`.
pub const LABEL_FORMAT: &str = "%b/%y";

/// A calendar month window plus its current/historical status.
///
/// When the month is the current one, rows dated before `cutoff_date` are
/// settled history and rows from `cutoff_date` on are still arriving (T+1
/// settlement lag). `day_limit` truncates a comparison month to the first
/// N days so that a partial current month is compared like for like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Period {
    pub label: String,
    pub start_of_month: NaiveDate,
    pub is_current_reference_period: bool,
    pub cutoff_date: Option<NaiveDate>,
    pub recent_window_start: Option<NaiveDate>,
    pub day_limit: Option<u32>,
}

pub fn month_label(date: NaiveDate) -> String {
    date.format(LABEL_FORMAT).to_string()
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

pub fn days_in_month(date: NaiveDate) -> u32 {
    let start = first_of_month(date);
    let next = start + Months::new(1);
    (next - start).num_days() as u32
}

pub fn parse_month_label(label: &str) -> ReportResult<NaiveDate> {
    let text = label.trim();
    if text.len() != 6 || text.as_bytes().get(3) != Some(&b'/') {
        return Err(ReportError::InvalidPeriodLabel(label.to_string()));
    }
    NaiveDate::parse_from_str(&format!("01/{text}"), &format!("%d/{LABEL_FORMAT}"))
        .map_err(|_| ReportError::InvalidPeriodLabel(label.to_string()))
}

pub fn resolve(label: &str, today: NaiveDate) -> ReportResult<Period> {
    let start = parse_month_label(label)?;
    Ok(Period::for_month(start, today))
}

/// Falls back to `default_label`, and then to today's month, instead of
/// propagating `InvalidPeriodLabel`.
pub fn resolve_or_default(label: &str, today: NaiveDate, default_label: &str) -> Period {
    match resolve(label, today) {
        Ok(period) => period,
        Err(err) => {
            warn!(label, default_label, error = %err, "falling back to default period");
            resolve(default_label, today)
                .unwrap_or_else(|_| Period::for_month(first_of_month(today), today))
        }
    }
}

impl Period {
    fn for_month(start_of_month: NaiveDate, today: NaiveDate) -> Period {
        let is_current = start_of_month == first_of_month(today);
        let cutoff = is_current.then(|| today - Days::new(1));
        Period {
            label: month_label(start_of_month),
            start_of_month,
            is_current_reference_period: is_current,
            cutoff_date: cutoff,
            recent_window_start: cutoff,
            day_limit: None,
        }
    }

    pub fn next_month_start(&self) -> NaiveDate {
        self.start_of_month + Months::new(1)
    }

    pub fn days_in_month(&self) -> u32 {
        days_in_month(self.start_of_month)
    }

    /// Exclusive upper bound of the calendar window, honoring `day_limit`.
    pub fn window_end(&self) -> NaiveDate {
        match self.day_limit {
            Some(limit) => {
                let limit = limit.min(self.days_in_month());
                self.start_of_month + Days::new(u64::from(limit))
            }
            None => self.next_month_start(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_of_month && date < self.window_end()
    }

    fn comparison(&self, start_of_month: NaiveDate, today: NaiveDate) -> Period {
        let mut period = Period::for_month(start_of_month, today);
        if self.is_current_reference_period {
            period.day_limit = Some(today.day().min(days_in_month(start_of_month)));
        }
        period
    }

    /// Previous calendar month, day-limited to today's day number when
    /// this period is the current one.
    pub fn previous_month(&self, today: NaiveDate) -> Period {
        self.comparison(self.start_of_month - Months::new(1), today)
    }

    /// Same month one year earlier; a Feb-29 limit clamps to the 28th.
    pub fn same_month_last_year(&self, today: NaiveDate) -> Period {
        self.comparison(self.start_of_month - Months::new(12), today)
    }
}

/// "Nth weekday of the month" position of a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NthWeekday {
    pub n: u32,
    pub weekday: Weekday,
}

impl NthWeekday {
    pub fn of(date: NaiveDate) -> NthWeekday {
        NthWeekday {
            n: date.day0() / 7 + 1,
            weekday: date.weekday(),
        }
    }

    fn sort_key(&self) -> (u32, u32) {
        (self.n, self.weekday.num_days_from_monday())
    }
}

impl Ord for NthWeekday {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for NthWeekday {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

impl fmt::Display for NthWeekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", ordinal(self.n), weekday_name(self.weekday))
    }
}

impl Serialize for NthWeekday {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Scans the month of `month_start` from day 1 for the n-th `weekday`.
pub fn nth_weekday_in_month(month_start: NaiveDate, position: NthWeekday) -> Option<NaiveDate> {
    let month_start = first_of_month(month_start);
    let mut seen = 0;
    for offset in 0..days_in_month(month_start) {
        let day = month_start + Days::new(u64::from(offset));
        if day.weekday() == position.weekday {
            seen += 1;
            if seen == position.n {
                return Some(day);
            }
        }
    }
    None
}

/// The date in the previous month holding the same "Nth weekday" position.
pub fn weekday_aligned_date(date: NaiveDate) -> ReportResult<NaiveDate> {
    let position = NthWeekday::of(date);
    let previous_start = first_of_month(date) - Months::new(1);
    nth_weekday_in_month(previous_start, position).ok_or_else(|| {
        ReportError::AlignmentUndefined(format!("{position} of {}", month_label(previous_start)))
    })
}
