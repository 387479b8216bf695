//! Visit scheduling: parsing dates from informal Spanish messages.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use regex::Regex;

/// Hour used when the lead names a day but no time.
const DEFAULT_HOUR: u32 = 15;

static TIME_HM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,2}):(\d{2})").unwrap());
static TIME_HS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:a las\s+)?(\d{1,2})\s*(?:hs\b|h\b)").unwrap());
static TIME_ALAS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"a las\s+(\d{1,2})").unwrap());
static TIME_AMPM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})\s*(am|pm)\b").unwrap());
static DATE_DM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})/(\d{1,2})(?:/(\d{4}))?").unwrap());

const WEEKDAYS: &[(&str, Weekday)] = &[
    ("lunes", Weekday::Mon),
    ("martes", Weekday::Tue),
    ("miércoles", Weekday::Wed),
    ("miercoles", Weekday::Wed),
    ("jueves", Weekday::Thu),
    ("viernes", Weekday::Fri),
    ("sábado", Weekday::Sat),
    ("sabado", Weekday::Sat),
    ("domingo", Weekday::Sun),
];

/// Parses a visit date out of a free-form message.
pub trait VisitDateParser: Send + Sync {
    /// `now` anchors relative expressions. Returns `None` when no concrete
    /// day can be read; a bare time with no day is not enough.
    fn parse(&self, text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Informal Argentine Spanish: weekday names, "hoy"/"mañana", `dd/mm`, and
/// times as "a las 15", "15hs", "15:30" or "3pm".
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanishDateParser;

impl VisitDateParser for SpanishDateParser {
    fn parse(&self, text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let text = text.to_lowercase();
        let date = parse_day(&text, now)?;
        let (hour, minute) = parse_time(&text).unwrap_or((DEFAULT_HOUR, 0));
        date.and_hms_opt(hour, minute, 0).map(|dt| dt.and_utc())
    }
}

fn parse_day(text: &str, now: DateTime<Utc>) -> Option<NaiveDate> {
    let today = now.date_naive();

    if text.contains("pasado mañana") || text.contains("pasado manana") {
        return Some(today + Duration::days(2));
    }
    // "mañana" alone is ambiguous with "por la mañana"; treat it as tomorrow
    // only when no other day indicator is present.
    let says_tomorrow = text.contains("mañana") || text.contains("manana");
    if text.contains("hoy") {
        return Some(today);
    }

    for (name, weekday) in WEEKDAYS {
        if text.contains(name) {
            let mut ahead =
                (weekday.num_days_from_monday() + 7 - today.weekday().num_days_from_monday()) % 7;
            if ahead == 0 {
                ahead = 7;
            }
            return Some(today + Duration::days(i64::from(ahead)));
        }
    }

    if let Some(captures) = DATE_DM_RE.captures(text) {
        let day: u32 = captures.get(1)?.as_str().parse().ok()?;
        let month: u32 = captures.get(2)?.as_str().parse().ok()?;
        let year: i32 = match captures.get(3) {
            Some(m) => m.as_str().parse().ok()?,
            None => today.year(),
        };
        let mut date = NaiveDate::from_ymd_opt(year, month, day)?;
        // No explicit year and the date already passed: they mean next year.
        if captures.get(3).is_none() && date < today {
            date = NaiveDate::from_ymd_opt(year + 1, month, day)?;
        }
        return Some(date);
    }

    says_tomorrow.then(|| today + Duration::days(1))
}

fn parse_time(text: &str) -> Option<(u32, u32)> {
    if let Some(captures) = TIME_HM_RE.captures(text) {
        let hour: u32 = captures.get(1)?.as_str().parse().ok()?;
        let minute: u32 = captures.get(2)?.as_str().parse().ok()?;
        if hour < 24 && minute < 60 {
            return Some((hour, minute));
        }
    }
    if let Some(captures) = TIME_AMPM_RE.captures(text) {
        let hour: u32 = captures.get(1)?.as_str().parse().ok()?;
        if (1..=12).contains(&hour) {
            let hour = match (captures.get(2)?.as_str(), hour) {
                ("am", 12) => 0,
                ("am", h) => h,
                ("pm", 12) => 12,
                ("pm", h) => h + 12,
                _ => return None,
            };
            return Some((hour, 0));
        }
    }
    for re in [&*TIME_HS_RE, &*TIME_ALAS_RE] {
        if let Some(captures) = re.captures(text) {
            let hour: u32 = captures.get(1)?.as_str().parse().ok()?;
            if hour < 24 {
                return Some((hour, 0));
            }
        }
    }
    None
}
