//! Travel-date parsing: canonical formats plus a small set of relative phrases.

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, Offset, Utc, Weekday};
use thiserror::Error;

pub const ACCEPTED_FORMATS: &str = "MM/DD/YYYY or YYYY-MM-DD";

/// Mountain Standard Time.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = -420;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DateParseError {
    #[error("`{0}` is ambiguous; use MM/DD/YYYY or YYYY-MM-DD.")]
    Ambiguous(String),
    #[error("`{0}` is not a date; use MM/DD/YYYY or YYYY-MM-DD.")]
    Unparsable(String),
}

/// Source of "today" for a conversation.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall clock pinned to a fixed UTC offset.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Falls back to UTC when the offset is out of chrono's range.
    pub fn from_offset_minutes(minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| Utc.fix());
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// A date phrase found inside a token stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DateHit {
    pub start: usize,
    pub len: usize,
    pub value: Result<NaiveDate, DateParseError>,
}

/// Parses a whole answer as a date.
pub fn parse_date(input: &str, today: NaiveDate) -> Result<NaiveDate, DateParseError> {
    let lowered = input.trim().to_ascii_lowercase();
    let tokens = tokenize(&lowered);
    match scan_tokens(&tokens, today) {
        Some(hit) if hit.start == 0 && hit.len == tokens.len() => hit.value,
        Some(DateHit { value: Err(error), .. }) => Err(error),
        _ => Err(DateParseError::Unparsable(input.trim().to_string())),
    }
}

/// Lower-cases and splits on whitespace, dropping trailing punctuation.
pub fn tokenize(text: &str) -> Vec<&str> {
    text.split_whitespace()
        .map(|token| token.trim_end_matches([',', ';', '!', '?']))
        .map(|token| token.strip_suffix('.').unwrap_or(token))
        .filter(|token| !token.is_empty())
        .collect()
}

/// Finds the first date phrase in already lower-cased tokens.
pub fn scan_tokens(tokens: &[&str], today: NaiveDate) -> Option<DateHit> {
    for (start, token) in tokens.iter().enumerate() {
        match *token {
            "today" => return Some(hit(start, 1, Ok(today))),
            "yesterday" => return Some(hit(start, 1, Ok(today - Duration::days(1)))),
            "tomorrow" => return Some(hit(start, 1, Ok(today + Duration::days(1)))),
            "last" | "next" | "this" => {
                if let Some(weekday) = tokens.get(start + 1).and_then(|next| weekday(next)) {
                    let date = relative_weekday(token, weekday, today);
                    return Some(hit(start, 2, Ok(date)));
                }
            }
            _ => {}
        }

        if weekday(token).is_some() {
            let preceded = start > 0 && matches!(tokens[start - 1], "last" | "next" | "this");
            if !preceded {
                return Some(hit(start, 1, Err(DateParseError::Ambiguous((*token).to_string()))));
            }
        }

        if is_date_shaped(token) {
            return Some(hit(start, 1, parse_canonical(token)));
        }
    }
    None
}

fn hit(start: usize, len: usize, value: Result<NaiveDate, DateParseError>) -> DateHit {
    DateHit { start, len, value }
}

fn weekday(token: &str) -> Option<Weekday> {
    let weekday = match token {
        "monday" | "mon" => Weekday::Mon,
        "tuesday" | "tue" | "tues" => Weekday::Tue,
        "wednesday" | "wed" => Weekday::Wed,
        "thursday" | "thu" | "thur" | "thurs" => Weekday::Thu,
        "friday" | "fri" => Weekday::Fri,
        "saturday" | "sat" => Weekday::Sat,
        "sunday" | "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

/// `last` is strictly before today, `next` strictly after, `this` is the next occurrence
/// counting today.
fn relative_weekday(direction: &str, target: Weekday, today: NaiveDate) -> NaiveDate {
    let today_index = i64::from(today.weekday().num_days_from_monday());
    let target_index = i64::from(target.num_days_from_monday());
    let ahead = (target_index - today_index).rem_euclid(7);
    match direction {
        "last" => {
            let back = (today_index - target_index).rem_euclid(7);
            today - Duration::days(if back == 0 { 7 } else { back })
        }
        "next" => today + Duration::days(if ahead == 0 { 7 } else { ahead }),
        _ => today + Duration::days(ahead),
    }
}

/// Slash dates, or three dash-separated numeric parts.
fn is_date_shaped(token: &str) -> bool {
    let numeric = |part: &str| !part.is_empty() && part.bytes().all(|byte| byte.is_ascii_digit());
    if token.contains('/') {
        return token.split('/').all(numeric);
    }
    let parts = token.split('-').collect::<Vec<_>>();
    parts.len() == 3 && parts.iter().all(|part| numeric(part))
}

fn parse_canonical(token: &str) -> Result<NaiveDate, DateParseError> {
    let slash = token.split('/').collect::<Vec<_>>();
    if slash.len() == 3 && slash[2].len() == 4 && slash[0].len() <= 2 && slash[1].len() <= 2 {
        return NaiveDate::parse_from_str(token, "%m/%d/%Y")
            .map_err(|_| DateParseError::Unparsable(token.to_string()));
    }
    let dash = token.split('-').collect::<Vec<_>>();
    if dash.len() == 3 && dash[0].len() == 4 && dash[1].len() <= 2 && dash[2].len() <= 2 {
        return NaiveDate::parse_from_str(token, "%Y-%m-%d")
            .map_err(|_| DateParseError::Unparsable(token.to_string()));
    }
    Err(DateParseError::Ambiguous(token.to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{parse_date, scan_tokens, tokenize, DateParseError};

    fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("date")
    }

    // 2026-02-19 is a Thursday.
    fn today() -> NaiveDate {
        ymd(2026, 2, 19)
    }

    #[test]
    fn canonical_formats_parse() {
        assert_eq!(parse_date("02/03/2026", today()), Ok(ymd(2026, 2, 3)));
        assert_eq!(parse_date("2/3/2026", today()), Ok(ymd(2026, 2, 3)));
        assert_eq!(parse_date("2026-02-03", today()), Ok(ymd(2026, 2, 3)));
    }

    #[test]
    fn relative_phrases_resolve_against_today() {
        assert_eq!(parse_date("today", today()), Ok(today()));
        assert_eq!(parse_date("Yesterday", today()), Ok(ymd(2026, 2, 18)));
        assert_eq!(parse_date("last tuesday", today()), Ok(ymd(2026, 2, 17)));
        assert_eq!(parse_date("last thursday", today()), Ok(ymd(2026, 2, 12)));
        assert_eq!(parse_date("next thu", today()), Ok(ymd(2026, 2, 26)));
        assert_eq!(parse_date("this thursday", today()), Ok(today()));
        assert_eq!(parse_date("this mon", today()), Ok(ymd(2026, 2, 23)));
        assert_eq!(parse_date("next friday", today()), Ok(ymd(2026, 2, 20)));
    }

    #[test]
    fn ambiguous_and_malformed_dates_name_both_formats() {
        let ambiguous = parse_date("03-04-2026", today()).expect_err("ambiguous");
        assert!(matches!(ambiguous, DateParseError::Ambiguous(_)));
        assert!(ambiguous.to_string().contains("MM/DD/YYYY or YYYY-MM-DD"));

        assert!(matches!(parse_date("3/4", today()), Err(DateParseError::Ambiguous(_))));
        assert!(matches!(parse_date("tuesday", today()), Err(DateParseError::Ambiguous(_))));
        assert!(matches!(parse_date("13/45/2026", today()), Err(DateParseError::Unparsable(_))));
        assert!(matches!(parse_date("soon", today()), Err(DateParseError::Unparsable(_))));
    }

    #[test]
    fn scanning_finds_a_date_inside_combined_text() {
        let text = "80128 last tuesday 2 days";
        let tokens = tokenize(text);
        let hit = scan_tokens(&tokens, today()).expect("date phrase");
        assert_eq!((hit.start, hit.len), (1, 2));
        assert_eq!(hit.value, Ok(ymd(2026, 2, 17)));
    }

    #[test]
    fn work_order_ids_are_not_mistaken_for_dates() {
        let tokens = tokenize("hotel wo 88-12");
        assert!(scan_tokens(&tokens, today()).is_none());
    }
}
