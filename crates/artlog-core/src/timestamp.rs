//! Timestamp grammars of the runner, engine and host logs.
//!
//! Every parser returns `Option`; a line that does not match a grammar simply
//! has no timestamp.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Wall-clock time as written by the CI hosts (no timezone information).
pub type Timestamp = NaiveDateTime;

/// Separator between the timestamp and the message in runner log lines.
const RUNNER_SEPARATOR: &str = " - ";

/// Field separator used by runner debug-style lines.
const DEBUG_FIELD_SEPARATOR: &str = "::";

/// Maximum number of fraction digits (microseconds).
const MAX_FRACTION_DIGITS: usize = 6;

/// A grammar attempt over a raw line.
type Grammar = fn(&str) -> Option<Timestamp>;

/// Grammars for auxiliary (engine and host) logs, in the order they are tried.
const AUX_GRAMMARS: &[Grammar] = &[debug_field_timestamp, leading_tokens_timestamp];

/// A line of text plus the timestamp it carries, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedLine {
    pub text: String,
    pub timestamp: Option<Timestamp>,
}

impl TimestampedLine {
    /// Parses an auxiliary log line.
    pub fn parse(text: String) -> Self {
        let timestamp = parse_aux_timestamp(&text);
        Self { text, timestamp }
    }
}

/// Parses `YYYY-MM-DD HH:MM:SS,ffffff` where the fraction has 1 to 6 digits.
pub fn parse_timestamp(s: &str) -> Option<Timestamp> {
    let (date_time, fraction) = s.split_once(',')?;
    let (date, time) = date_time.split_once(' ')?;

    if fraction.is_empty()
        || fraction.len() > MAX_FRACTION_DIGITS
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let padding = u32::try_from(MAX_FRACTION_DIGITS - fraction.len()).ok()?;
    let micros = fraction.parse::<u32>().ok()? * 10u32.pow(padding);

    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
        .ok()?
        .with_nanosecond(micros * 1000)?;
    Some(date.and_time(time))
}

/// Parses the timestamp at the head of a runner log line.
pub fn parse_runner_timestamp(line: &str) -> Option<Timestamp> {
    let head = line.split(RUNNER_SEPARATOR).next()?;
    parse_timestamp(head.trim_end_matches(['\r', '\n']))
}

/// Parses an engine, host or runner-debug line by trying each grammar in turn.
pub fn parse_aux_timestamp(line: &str) -> Option<Timestamp> {
    AUX_GRAMMARS.iter().find_map(|grammar| grammar(line))
}

/// Timestamp carried as the third `::`-delimited field.
fn debug_field_timestamp(line: &str) -> Option<Timestamp> {
    let field = line.split(DEBUG_FIELD_SEPARATOR).nth(2)?;
    parse_timestamp(field)
}

/// Timestamp carried as the first two whitespace-delimited tokens, with any
/// `+`/`-` timezone suffix on the time token dropped.
fn leading_tokens_timestamp(line: &str) -> Option<Timestamp> {
    let mut tokens = line.split_whitespace();
    let date = tokens.next()?;
    let time = tokens.next()?;
    let time = ['+', '-']
        .iter()
        .find_map(|sign| time.split_once(*sign).map(|(head, _)| head))
        .unwrap_or(time);
    parse_timestamp(&format!("{date} {time}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    #[test]
    fn parses_full_microseconds() {
        assert_eq!(
            parse_timestamp("2024-03-01 10:00:00,123456"),
            Some(ts("2024-03-01 10:00:00.123456"))
        );
    }

    #[test]
    fn short_fraction_is_right_padded() {
        assert_eq!(
            parse_timestamp("2024-03-01 10:00:00,5"),
            Some(ts("2024-03-01 10:00:00.5"))
        );
        assert_eq!(
            parse_timestamp("2024-03-01 10:00:00,123"),
            Some(ts("2024-03-01 10:00:00.123"))
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse_timestamp("2024-03-01 10:00:00"), None);
        assert_eq!(parse_timestamp("2024-03-01 10:00:00,"), None);
        assert_eq!(parse_timestamp("2024-03-01 10:00:00,1234567"), None);
        assert_eq!(parse_timestamp("2024-03-01 25:00:00,000"), None);
        assert_eq!(parse_timestamp("not a timestamp"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn runner_line_timestamp() {
        let line = "2024-03-01 10:00:00,000001 - MainThread - art.runner - INFO - SETUP <Test>";
        assert_eq!(
            parse_runner_timestamp(line),
            Some(ts("2024-03-01 10:00:00.000001"))
        );
        assert_eq!(parse_runner_timestamp("    continuation"), None);
    }

    #[test]
    fn engine_line_with_timezone_suffix() {
        let line = "2024-03-01 10:00:00,123+02 INFO  [org.ovirt.engine] (default task-1) started";
        assert_eq!(
            parse_aux_timestamp(line),
            Some(ts("2024-03-01 10:00:00.123"))
        );

        let line = "2024-03-01 10:00:00,123-0500 WARN something";
        assert_eq!(
            parse_aux_timestamp(line),
            Some(ts("2024-03-01 10:00:00.123"))
        );
    }

    #[test]
    fn host_line_with_debug_fields() {
        let line = "MainThread::INFO::2024-03-01 10:00:00,250::vdsm::started";
        assert_eq!(
            parse_aux_timestamp(line),
            Some(ts("2024-03-01 10:00:00.25"))
        );
    }

    #[test]
    fn debug_grammar_falls_back_to_leading_tokens() {
        let line = "2024-03-01 10:00:00,000 INFO (jsonrpc/1) [api] FINISH :: result";
        assert_eq!(
            parse_aux_timestamp(line),
            Some(ts("2024-03-01 10:00:00.0"))
        );
    }

    #[test]
    fn continuation_lines_have_no_timestamp() {
        let line = TimestampedLine::parse("Traceback (most recent call last):".to_string());
        assert_eq!(line.timestamp, None);
        let line = TimestampedLine::parse("\tat org.ovirt.Foo.bar(Foo.java:42)".to_string());
        assert_eq!(line.timestamp, None);
        let line = TimestampedLine::parse(String::new());
        assert_eq!(line.timestamp, None);
    }
}
