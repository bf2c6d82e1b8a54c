use chrono::{Datelike, NaiveDate, Weekday};
use regex::Regex;
use std::sync::OnceLock;

/// Duration returned when a phase's dates cannot be read.
pub const DEFAULT_PHASE_DAYS: u32 = 20;

fn iso_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([0-9]{4})-([0-9]{2})-([0-9]{2})").unwrap())
}

fn slash_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([0-9]{1,2})/([0-9]{1,2})/([0-9]{4})").unwrap())
}

fn digits_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[0-9]+").unwrap())
}

/// Pulls the first date out of free text.
///
/// `YYYY-MM-DD` is returned as written; `D/M/YYYY` is zero-padded to
/// `DD/MM/YYYY`. Text shorter than six characters, or without either
/// pattern, yields an empty string.
pub fn extract_date(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() < 6 {
        return String::new();
    }

    if let Some(found) = iso_date_pattern().find(trimmed) {
        return found.as_str().to_string();
    }

    if let Some(caps) = slash_date_pattern().captures(trimmed) {
        return format!("{:0>2}/{:0>2}/{}", &caps[1], &caps[2], &caps[3]);
    }

    String::new()
}

/// Reads the first integer out of an amount such as `"15k€"` or `"1,200"`.
///
/// Spaces, commas and `€` are dropped and `k` becomes `000` before the first
/// digit run is taken. No digits (or a run too large for `u64`) yields 0.
pub fn extract_number(text: &str) -> u64 {
    let cleaned = text
        .replace([' ', ',', '€'], "")
        .replace('k', "000");

    digits_pattern()
        .find(&cleaned)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Parses `DD/MM/YYYY` (any text containing `/`) or the first ten
/// characters as `YYYY-MM-DD`.
pub fn parse_flexible_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();

    if text.contains('/') {
        let parts: Vec<&str> = text.split('/').collect();
        if parts.len() != 3 {
            return None;
        }
        let day: u32 = parts[0].trim().parse().ok()?;
        let month: u32 = parts[1].trim().parse().ok()?;
        let year: i32 = parts[2].trim().parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    let head: String = text.chars().take(10).collect();
    NaiveDate::parse_from_str(&head, "%Y-%m-%d").ok()
}

pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Counts Monday-Friday days in the inclusive range, never less than 1.
pub fn count_business_days(start: NaiveDate, end: NaiveDate) -> u32 {
    let days = start
        .iter_days()
        .take_while(|day| *day <= end)
        .filter(|day| is_business_day(*day))
        .count() as u32;

    days.max(1)
}

/// Business days between two textual dates, or [`DEFAULT_PHASE_DAYS`] when
/// either side does not parse.
pub fn business_days_between(start: &str, end: &str) -> u32 {
    match (parse_flexible_date(start), parse_flexible_date(end)) {
        (Some(start), Some(end)) => count_business_days(start, end),
        _ => DEFAULT_PHASE_DAYS,
    }
}

/// Renders an amount without a fractional part when it is whole.
pub fn format_amount(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{}", value.round() as i64)
    } else {
        format!("{:.2}", value)
    }
}

/// Three-step scale used for criticality, probability and impact columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    Medium,
    High,
}

const LOW_WORDS: [&str; 3] = ["faible", "bas", "low"];
const HIGH_WORDS: [&str; 4] = ["élevé", "elevé", "haut", "high"];

impl Level {
    /// Case-insensitive keyword match; low words are checked first and
    /// anything unmatched is `Medium`.
    pub fn classify(text: &str, extra_high: &[&str]) -> Self {
        let text = text.trim().to_lowercase();
        if LOW_WORDS.iter().any(|w| text.contains(w)) {
            Level::Low
        } else if HIGH_WORDS
            .iter()
            .chain(extra_high.iter())
            .any(|w| text.contains(w))
        {
            Level::High
        } else {
            Level::Medium
        }
    }

    /// Label agreeing with a masculine noun (criticité, impact).
    pub fn masculine(self) -> &'static str {
        match self {
            Level::Low => "Faible",
            Level::Medium => "Moyen",
            Level::High => "Élevé",
        }
    }

    /// Label agreeing with a feminine noun (probabilité).
    pub fn feminine(self) -> &'static str {
        match self {
            Level::Low => "Faible",
            Level::Medium => "Moyenne",
            Level::High => "Élevée",
        }
    }
}

pub fn map_criticality(text: &str) -> &'static str {
    Level::classify(text, &["critique"]).masculine()
}

pub fn map_probability(text: &str) -> &'static str {
    Level::classify(text, &[]).feminine()
}

pub fn map_impact(text: &str) -> &'static str {
    Level::classify(text, &["majeur"]).masculine()
}
