//! GRBL Response Parser
//!
//! Classifies the lines GRBL sends back and parses the `$$` settings block.

use super::error_decoder::{format_alarm, format_error};
use std::collections::BTreeMap;
use std::fmt;

/// One line of controller output
#[derive(Debug, Clone, PartialEq)]
pub enum GrblResponse {
    /// OK acknowledgment
    Ok,
    /// Error response with error code
    Error(u8),
    /// Alarm response with alarm code
    Alarm(u8),
    /// Bracketed status report, without the brackets
    Status(String),
    /// Setting line (`$n=value`)
    Setting { number: u16, value: String },
    /// Startup banner
    Banner(String),
    /// Bracketed feedback message (`[MSG:...]`, `[GC:...]`, `[G54:...]`)
    Feedback(String),
    /// Anything else
    Message(String),
}

impl fmt::Display for GrblResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error(code) => write!(f, "{}", format_error(*code)),
            Self::Alarm(code) => write!(f, "{}", format_alarm(*code)),
            Self::Status(status) => write!(f, "<{status}>"),
            Self::Setting { number, value } => write!(f, "${number}={value}"),
            Self::Banner(banner) => write!(f, "{banner}"),
            Self::Feedback(msg) => write!(f, "[{msg}]"),
            Self::Message(msg) => write!(f, "{msg}"),
        }
    }
}

impl GrblResponse {
    /// True for `error:` lines and anything [`is_alarm`](Self::is_alarm) accepts
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error(_)) || self.is_alarm()
    }

    /// True for `ALARM:` lines and status reports in the Alarm state
    pub fn is_alarm(&self) -> bool {
        match self {
            Self::Alarm(_) => true,
            Self::Status(report) => report
                .get(..5)
                .is_some_and(|state| state.eq_ignore_ascii_case("alarm")),
            _ => false,
        }
    }
}

/// Classify one line; `None` for blank lines
pub fn parse_line(line: &str) -> Option<GrblResponse> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let lower = line.to_lowercase();
    if lower == "ok" {
        return Some(GrblResponse::Ok);
    }
    if let Some(code) = lower.strip_prefix("error:").and_then(|c| c.trim().parse().ok()) {
        return Some(GrblResponse::Error(code));
    }
    if let Some(code) = lower.strip_prefix("alarm:").and_then(|c| c.trim().parse().ok()) {
        return Some(GrblResponse::Alarm(code));
    }
    if line.starts_with('<') && line.ends_with('>') {
        return Some(GrblResponse::Status(line[1..line.len() - 1].to_string()));
    }
    if line.starts_with('[') && line.ends_with(']') {
        return Some(GrblResponse::Feedback(line[1..line.len() - 1].to_string()));
    }
    if line.contains("Grbl") {
        return Some(GrblResponse::Banner(line.to_string()));
    }
    if let Some((key, value)) = line.split_once('=') {
        if let Some(number) = key.trim().strip_prefix('$').and_then(|n| n.parse().ok()) {
            return Some(GrblResponse::Setting {
                number,
                value: value.trim().to_string(),
            });
        }
    }
    Some(GrblResponse::Message(line.to_string()))
}

/// True when every non-blank line of `text` is `ok` (and there is at least one)
pub fn is_ack_only(text: &str) -> bool {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();
    lines.peek().is_some() && lines.all(|l| l.eq_ignore_ascii_case("ok"))
}

/// Whether any line of `text` is an error, an alarm or an Alarm-state report
pub fn contains_failure(text: &str) -> bool {
    text.lines().filter_map(parse_line).any(|line| line.is_failure())
}

/// Whether any line of `text` is an alarm or an Alarm-state report
pub fn contains_alarm(text: &str) -> bool {
    text.lines().filter_map(parse_line).any(|line| line.is_alarm())
}

/// Parse the lines of a `$$` reply into a `$n`-keyed map.
///
/// Stops at the first `ok`. Blank lines, banners and bracketed messages are
/// ignored; lines without `=` are skipped with a warning.
pub fn parse_settings_block<I, S>(lines: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut settings = BTreeMap::new();
    for line in lines {
        let line = line.as_ref().trim();
        if line == "ok" {
            break;
        }
        if line.is_empty() || line.starts_with("[MSG") || line.contains("Grbl") {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => {
                settings.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => tracing::warn!(line = %line, "Skipping malformed settings line"),
        }
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("ok\r"), Some(GrblResponse::Ok));
        assert_eq!(parse_line("error:22"), Some(GrblResponse::Error(22)));
        assert_eq!(parse_line("ALARM:1"), Some(GrblResponse::Alarm(1)));
        assert_eq!(
            parse_line("<Idle|WPos:0.000,0.000,0.000|FS:0,0>"),
            Some(GrblResponse::Status("Idle|WPos:0.000,0.000,0.000|FS:0,0".to_string()))
        );
        assert_eq!(
            parse_line("$130=415.000"),
            Some(GrblResponse::Setting {
                number: 130,
                value: "415.000".to_string()
            })
        );
        assert!(matches!(
            parse_line("Grbl 1.1h ['$' for help]"),
            Some(GrblResponse::Banner(_))
        ));
        assert!(matches!(
            parse_line("[MSG:Caution: Unlocked]"),
            Some(GrblResponse::Feedback(_))
        ));
        assert_eq!(parse_line("   "), None);
    }

    #[test]
    fn test_failure_display() {
        let response = parse_line("error:9").unwrap();
        assert!(response.is_failure());
        assert!(response.to_string().contains("locked out"));
    }

    #[test]
    fn test_failure_classification() {
        assert!(contains_failure("ok\r\nerror:22\r\n"));
        assert!(contains_failure("<Alarm|MPos:0.000,0.000,0.000|FS:0,0>"));
        assert!(contains_alarm("ALARM:1\r\n"));
        assert!(!contains_alarm("error:9"));
        assert!(!contains_failure("ok\r\n<Idle|WPos:0,0,0>"));
        // Free text mentioning the words is not a reply code.
        assert!(!contains_failure("[MSG:Check Door]\r\nerrors reset"));
        assert!(!parse_line("<Idle|WPos:0,0,0>").unwrap().is_alarm());
    }

    #[test]
    fn test_ack_only() {
        assert!(is_ack_only("ok\r\n"));
        assert!(is_ack_only("ok\r\nok\r\n"));
        assert!(!is_ack_only(""));
        assert!(!is_ack_only("ok\r\n<Idle|WPos:0,0,0>"));
    }

    #[test]
    fn test_settings_block() {
        let lines = [
            "",
            "Grbl 1.1h ['$' for help]",
            "[MSG:'$H'|'$X' to unlock]",
            "$0=10",
            "garbage",
            "$27 = 1.000",
            "ok",
            "$99=ignored",
        ];
        let settings = parse_settings_block(lines);
        assert_eq!(settings.len(), 2);
        assert_eq!(settings.get("$27").map(String::as_str), Some("1.000"));
        assert!(!settings.contains_key("$99"));
    }
}
