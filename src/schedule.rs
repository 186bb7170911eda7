use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::HashSet;

/// Weekday listing order used everywhere in the app (week starts Saturday).
pub const WEEKDAY_ORDER: [Weekday; 7] = [
    Weekday::Sat,
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];

/// Accepts full names and 3-letter abbreviations, case-insensitive.
/// Anything else is no-match: malformed schedule entries must degrade to
/// "never scheduled" rather than fail the whole tuition.
pub fn parse_weekday(raw: &str) -> Option<Weekday> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        _ => None,
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
    }
}

/// Parses the stored comma-separated teaching-day list. Unrecognized
/// entries are dropped, duplicates keep their first occurrence.
pub fn parse_teaching_days(raw: &str) -> Vec<Weekday> {
    let mut out: Vec<Weekday> = Vec::new();
    for part in raw.split(',') {
        if let Some(day) = parse_weekday(part) {
            if !out.contains(&day) {
                out.push(day);
            }
        }
    }
    out
}

pub fn is_scheduled_day(teaching_days: &[Weekday], date: NaiveDate) -> bool {
    teaching_days.contains(&date.weekday())
}

/// A class counts as conducted iff at least one student was present.
/// No records collapses to false; there is no "unknown" state.
pub fn was_conducted<I>(present_flags: I) -> bool
where
    I: IntoIterator<Item = bool>,
{
    present_flags.into_iter().any(|present| present)
}

/// Merges the two conducted signals: attendance rows are authoritative
/// whenever any exist for the date, the manual log flag covers the rest.
pub fn conducted_from_signals(attendance: Option<bool>, log: Option<bool>) -> bool {
    match attendance {
        Some(derived) => derived,
        None => log.unwrap_or(false),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayStatus {
    Conducted,
    Missed,
    Scheduled,
    None,
}

impl DayStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DayStatus::Conducted => "conducted",
            DayStatus::Missed => "missed",
            DayStatus::Scheduled => "scheduled",
            DayStatus::None => "none",
        }
    }
}

/// Conducted dominates everything; a scheduled day strictly before
/// `today` without a class is missed. Today itself is never missed.
pub fn classify_day(
    scheduled: bool,
    conducted: bool,
    date: NaiveDate,
    today: NaiveDate,
) -> DayStatus {
    if conducted {
        return DayStatus::Conducted;
    }
    if scheduled && date < today {
        return DayStatus::Missed;
    }
    if scheduled {
        return DayStatus::Scheduled;
    }
    DayStatus::None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonthStats {
    pub scheduled: u32,
    pub conducted: u32,
    pub missed: u32,
    pub remaining: u32,
}

#[derive(Debug, Clone)]
pub struct MonthClassification {
    pub per_day: Vec<(NaiveDate, DayStatus)>,
    pub stats: MonthStats,
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => 30,
    }
}

/// Classifies every date of the month. `conducted_days` holds the
/// day-of-month numbers the caller derived as conducted, from whichever
/// source (attendance or logs) is authoritative for its view.
///
/// `stats.scheduled` counts scheduled dates regardless of their final
/// status; `stats.remaining` counts the today-or-future ones among them.
pub fn classify_month(
    teaching_days: &[Weekday],
    year: i32,
    month: u32,
    conducted_days: &HashSet<u32>,
    today: NaiveDate,
) -> MonthClassification {
    let mut per_day = Vec::new();
    let mut stats = MonthStats::default();

    for day in 1..=days_in_month(year, month) {
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            continue;
        };
        let scheduled = is_scheduled_day(teaching_days, date);
        let conducted = conducted_days.contains(&day);
        let status = classify_day(scheduled, conducted, date, today);

        if scheduled {
            stats.scheduled += 1;
            if date >= today {
                stats.remaining += 1;
            }
        }
        match status {
            DayStatus::Conducted => stats.conducted += 1,
            DayStatus::Missed => stats.missed += 1,
            _ => {}
        }
        per_day.push((date, status));
    }

    MonthClassification { per_day, stats }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

pub fn parse_month_key(raw: &str) -> Option<(i32, u32)> {
    let (y, m) = raw.trim().split_once('-')?;
    let year = y.parse::<i32>().ok()?;
    let month = m.parse::<u32>().ok()?;
    if (1..=12).contains(&month) {
        Some((year, month))
    } else {
        None
    }
}
