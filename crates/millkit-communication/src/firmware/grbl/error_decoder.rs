//! GRBL error and alarm codes
//!
//! Converts the numeric codes of GRBL 1.1 into the text shown to operators.

/// Undefined feed rate
pub const ERROR_UNDEFINED_FEED_RATE: u8 = 22;

/// `error:<n>` descriptions from the GRBL 1.1 interface documentation
const ERROR_TEXT: &[(u8, &str)] = &[
    (1, "G-code words consist of a letter and a value. Letter was not found."),
    (2, "Numeric value format is not valid or missing an expected value."),
    (3, "Grbl '$' system command was not recognized or supported."),
    (4, "Negative value received for an expected positive value."),
    (5, "Homing cycle is not enabled via settings."),
    (6, "Minimum step pulse time must be greater than 3µs."),
    (7, "EEPROM read failed. Reset and restored to default values."),
    (8, "Grbl '$' command cannot be used unless Grbl is IDLE. Ensures smooth operation during a job."),
    (9, "G-code locked out during alarm or jog state."),
    (10, "Soft limits cannot be enabled without homing also enabled."),
    (11, "Max characters per line exceeded. Line was not processed and executed."),
    (12, "Grbl '$' setting value exceeds the maximum step rate supported."),
    (13, "Safety door detected as opened and door state initiated."),
    (14, "Build info or startup line exceeded EEPROM line length limit."),
    (15, "Jog target exceeds machine travel. Command ignored."),
    (16, "Jog command with no '=' or contains prohibited g-code."),
    (17, "Laser mode requires PWM output."),
    (20, "Unsupported or invalid g-code command found in block."),
    (21, "More than one g-code command from same modal group found in block."),
    (22, "Feed rate has not yet been set or is undefined."),
    (23, "G-code command in block requires an integer value."),
    (24, "Two G-code commands that both require the use of the XYZ axis words were detected in the block."),
    (25, "A G-code word was repeated in the block."),
    (26, "A G-code command implicitly or explicitly requires XYZ axis words in the block, but none were detected."),
    (27, "N line number value is not within the valid range of 1 - 9,999,999."),
    (28, "A G-code command was sent, but is missing some required P or L value words in the line."),
    (29, "Grbl supports six work coordinate systems G54-G59. G59.1, G59.2, and G59.3 are not supported."),
    (30, "The G53 G-code command requires either a G0 seek or G1 feed motion mode to be active."),
    (31, "There are unused axis words in the block and G80 motion mode cancel is active."),
    (32, "A G2 or G3 arc was commanded but there are no XYZ axis words in the selected plane to trace the arc."),
    (33, "The motion command has an invalid target. G2, G3, and G38.2 generates this error if the arc is impossible to generate or if the probe target is the current position."),
    (34, "A G2 or G3 arc, traced with the radius definition, had a mathematical error when computing the arc geometry."),
    (35, "A G2 or G3 arc, traced with the offset definition, is missing the IJK offset word in the selected plane to trace the arc."),
    (36, "There are unused, leftover G-code words that aren't used by any command in the block."),
    (37, "The G43.1 dynamic tool length offset command cannot apply an offset to an axis other than its configured axis."),
    (38, "Tool number greater than max supported value."),
];

/// `ALARM:<n>` descriptions, indexed from alarm 1
const ALARM_TEXT: [&str; 9] = [
    "Hard limit triggered. Machine position is likely lost due to sudden and immediate halt. Re-homing is highly recommended.",
    "Soft limit: G-code motion target exceeds machine travel. Machine position safely retained. Alarm may be unlocked.",
    "Reset while in motion. Grbl cannot guarantee position. Lost steps are likely. Re-homing is highly recommended.",
    "Probe fail. The probe is not in the expected initial state before starting probe cycle, where G38.2 and G38.3 is not triggered and G38.4 and G38.5 is triggered.",
    "Probe fail. Probe did not contact the workpiece within the programmed travel for G38.2 and G38.4.",
    "Homing fail. Reset during active homing cycle.",
    "Homing fail. Safety door was opened during active homing cycle.",
    "Homing fail. Cycle failed to clear limit switch when pulling off. Try increasing pull-off setting or check wiring.",
    "Homing fail. Could not find limit switch within search distance. Defined as 1.5 * max_travel on search and 5 * pulloff on locate phases.",
];

/// Description of an error code, if GRBL defines it
pub fn error_text(code: u8) -> Option<&'static str> {
    ERROR_TEXT
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, text)| *text)
}

/// Description of an alarm code, if GRBL defines it
pub fn alarm_text(code: u8) -> Option<&'static str> {
    let index = usize::from(code).checked_sub(1)?;
    ALARM_TEXT.get(index).copied()
}

/// Decode GRBL error code to human-readable message
pub fn decode_error(code: u8) -> String {
    error_text(code).map_or_else(|| format!("Unknown error code: {code}"), str::to_string)
}

/// Decode GRBL alarm code to human-readable message
pub fn decode_alarm(code: u8) -> String {
    alarm_text(code).map_or_else(|| format!("Unknown alarm code: {code}"), str::to_string)
}

/// Format error message with code and description
pub fn format_error(code: u8) -> String {
    format!("error:{code} - {}", decode_error(code))
}

/// Format alarm message with code and description
pub fn format_alarm(code: u8) -> String {
    format!("ALARM:{code} - {}", decode_alarm(code))
}

/// A numeric code found in a device reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    /// `error:<n>`
    Error(u8),
    /// `ALARM:<n>`
    Alarm(u8),
}

impl ReplyCode {
    /// Code with its description
    pub fn describe(&self) -> String {
        match self {
            ReplyCode::Error(code) => format_error(*code),
            ReplyCode::Alarm(code) => format_alarm(*code),
        }
    }
}

fn code_after(lower: &str, marker: &str) -> Option<u8> {
    let start = lower.find(marker)? + marker.len();
    let digits: String = lower[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// First `error:<n>` or `ALARM:<n>` code in `text`, case-insensitive
pub fn find_code(text: &str) -> Option<ReplyCode> {
    let lower = text.to_lowercase();
    let error = lower.find("error:").and_then(|i| Some((i, code_after(&lower, "error:")?)));
    let alarm = lower.find("alarm:").and_then(|i| Some((i, code_after(&lower, "alarm:")?)));
    match (error, alarm) {
        (Some((ei, e)), Some((ai, a))) => Some(if ei <= ai {
            ReplyCode::Error(e)
        } else {
            ReplyCode::Alarm(a)
        }),
        (Some((_, e)), None) => Some(ReplyCode::Error(e)),
        (None, Some((_, a))) => Some(ReplyCode::Alarm(a)),
        (None, None) => None,
    }
}

/// Raw reply followed by the description of its code, if it carries one
pub fn describe_response(text: &str) -> String {
    let raw = text.trim();
    match find_code(raw) {
        Some(code) => format!("{raw} ({})", code.describe()),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error() {
        assert_eq!(
            decode_error(1),
            "G-code words consist of a letter and a value. Letter was not found."
        );
        assert_eq!(
            decode_error(9),
            "G-code locked out during alarm or jog state."
        );
        assert_eq!(
            decode_error(ERROR_UNDEFINED_FEED_RATE),
            "Feed rate has not yet been set or is undefined."
        );
        assert!(decode_error(53).contains("Unknown error code"));
        assert!(decode_error(255).contains("Unknown error code"));
    }

    #[test]
    fn test_unassigned_codes_have_no_text() {
        assert_eq!(error_text(0), None);
        assert_eq!(error_text(18), None);
        assert_eq!(alarm_text(0), None);
        assert_eq!(alarm_text(10), None);
        assert_eq!(alarm_text(9).map(|t| t.starts_with("Homing fail")), Some(true));
    }

    #[test]
    fn test_decode_alarm() {
        assert!(decode_alarm(1).contains("Hard limit"));
        assert!(decode_alarm(2).contains("Soft limit"));
        assert!(decode_alarm(9).contains("Homing fail"));
        assert!(decode_alarm(12).contains("Unknown alarm code"));
        assert!(decode_alarm(255).contains("Unknown alarm code"));
    }

    #[test]
    fn test_format_error() {
        let msg = format_error(1);
        assert!(msg.starts_with("error:1"));
        assert!(msg.contains("Letter was not found"));
    }

    #[test]
    fn test_format_alarm() {
        let msg = format_alarm(1);
        assert!(msg.starts_with("ALARM:1"));
        assert!(msg.contains("Hard limit"));
    }

    #[test]
    fn test_find_code() {
        assert_eq!(find_code("ok"), None);
        assert_eq!(find_code("error:22\r\n"), Some(ReplyCode::Error(22)));
        assert_eq!(find_code("ALARM:1"), Some(ReplyCode::Alarm(1)));
        assert_eq!(
            find_code("ALARM:2\nerror:9"),
            Some(ReplyCode::Alarm(2))
        );
        assert_eq!(find_code("error:"), None);
    }

    #[test]
    fn test_describe_response() {
        assert_eq!(
            describe_response("error:22\r\n"),
            "error:22 (error:22 - Feed rate has not yet been set or is undefined.)"
        );
        assert_eq!(describe_response(" <Idle|WPos:0,0,0> "), "<Idle|WPos:0,0,0>");
    }
}
