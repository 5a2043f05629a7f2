//! Reading and validating JSONL tracer logs.
//!
//! Provides:
//! - [`validate_log_line`]: check a single line against the record schema
//! - [`validate_session`]: check ordering rules across a whole session
//! - [`validate_log_file`]: both, for a file on disk
//! - [`read_log`]: strict parse of a file into [`TraceRecord`]s

use std::path::Path;

use memtrace_membrane::{TraceEvent, TraceRecord};

use crate::error::HarnessError;

/// Every event kind the tracer can emit.
pub const EVENT_KINDS: [&str; 12] = [
    "session_start",
    "session_end",
    "allocated",
    "zeroed_allocated",
    "reallocated",
    "free_requested",
    "illegal_free",
    "double_free",
    "stale_record_retired",
    "leak_summary_start",
    "leak_block",
    "final_statistics",
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validation error for a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl LogValidationError {
    fn new(line_number: usize, field: &str, message: impl Into<String>) -> Self {
        Self {
            line_number,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<TraceRecord, Vec<LogValidationError>> {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return Err(vec![LogValidationError::new(
                line_number,
                "<json>",
                format!("invalid JSON: {e}"),
            )]);
        }
    };

    let Some(obj) = value.as_object() else {
        return Err(vec![LogValidationError::new(
            line_number,
            "<root>",
            "expected JSON object",
        )]);
    };

    let mut errors = Vec::new();
    for field in ["seq", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(LogValidationError::new(
                line_number,
                field,
                "required field missing",
            ));
        }
    }

    if let Some(seq) = obj.get("seq")
        && !seq.as_u64().is_some_and(|s| s > 0)
    {
        errors.push(LogValidationError::new(
            line_number,
            "seq",
            format!("expected positive integer, got {seq}"),
        ));
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !["info", "warn", "error"].contains(&level)
    {
        errors.push(LogValidationError::new(
            line_number,
            "level",
            format!("invalid level: '{level}'"),
        ));
    }

    if let Some(kind) = obj.get("event").and_then(|v| v.as_str())
        && !EVENT_KINDS.contains(&kind)
    {
        errors.push(LogValidationError::new(
            line_number,
            "event",
            format!("unknown event: '{kind}'"),
        ));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let record = match serde_json::from_value::<TraceRecord>(value) {
        Ok(record) => record,
        Err(e) => {
            return Err(vec![LogValidationError::new(
                line_number,
                "<deserialization>",
                format!("failed to deserialize: {e}"),
            )]);
        }
    };

    if record.level != record.event.level() {
        return Err(vec![LogValidationError::new(
            line_number,
            "level",
            format!(
                "level {:?} does not match event '{}'",
                record.level,
                record.event.kind()
            ),
        )]);
    }

    Ok(record)
}

/// Check cross-line rules of one session.
///
/// `records` pairs each record with its line number. The rules: sequence
/// numbers are consecutive from 1; the session opens with `session_start`
/// and closes with `session_end`; `final_statistics` appears once, before
/// the leak table; `leak_block` lines follow a single `leak_summary_start`.
pub fn validate_session(records: &[(usize, TraceRecord)]) -> Vec<LogValidationError> {
    let mut errors = Vec::new();
    let Some(&(first_line, first)) = records.first() else {
        return errors;
    };

    if first.event != TraceEvent::SessionStart {
        errors.push(LogValidationError::new(
            first_line,
            "event",
            "session must open with 'session_start'",
        ));
    }

    let mut expected_seq = 1;
    let mut statistics_seen = false;
    let mut leak_header_seen = false;
    for &(line, record) in records {
        if record.seq != expected_seq {
            errors.push(LogValidationError::new(
                line,
                "seq",
                format!("expected {expected_seq}, got {}", record.seq),
            ));
        }
        expected_seq = record.seq + 1;

        match record.event {
            TraceEvent::FinalStatistics(_) if statistics_seen => {
                errors.push(LogValidationError::new(
                    line,
                    "event",
                    "duplicate 'final_statistics'",
                ));
            }
            TraceEvent::FinalStatistics(_) => statistics_seen = true,
            TraceEvent::LeakSummaryStart if leak_header_seen => {
                errors.push(LogValidationError::new(
                    line,
                    "event",
                    "duplicate 'leak_summary_start'",
                ));
            }
            TraceEvent::LeakSummaryStart => {
                if !statistics_seen {
                    errors.push(LogValidationError::new(
                        line,
                        "event",
                        "leak table before 'final_statistics'",
                    ));
                }
                leak_header_seen = true;
            }
            TraceEvent::LeakBlock { .. } if !leak_header_seen => {
                errors.push(LogValidationError::new(
                    line,
                    "event",
                    "'leak_block' without 'leak_summary_start'",
                ));
            }
            _ => {}
        }
    }

    if let Some(&(last_line, last)) = records.last()
        && last.event != TraceEvent::SessionEnd
    {
        errors.push(LogValidationError::new(
            last_line,
            "event",
            "session must close with 'session_end'",
        ));
    }

    errors
}

/// Validate an entire JSONL file.
///
/// Returns the non-empty line count and every validation error found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    Ok(validate_log_str(&content))
}

/// [`validate_log_file`] over an in-memory log.
#[must_use]
pub fn validate_log_str(content: &str) -> (usize, Vec<LogValidationError>) {
    let mut all_errors = Vec::new();
    let mut records = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        match validate_log_line(line, i + 1) {
            Ok(record) => records.push((i + 1, record)),
            Err(errs) => all_errors.extend(errs),
        }
    }

    if all_errors.is_empty() {
        all_errors = validate_session(&records);
    }
    (line_count, all_errors)
}

/// Parse a log without schema checks beyond deserialization.
pub fn read_log(path: &Path) -> Result<Vec<TraceRecord>, HarnessError> {
    let content = std::fs::read_to_string(path)?;
    parse_log(&content)
}

/// [`read_log`] over an in-memory log.
pub fn parse_log(content: &str) -> Result<Vec<TraceRecord>, HarnessError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| HarnessError::Json {
                line: i + 1,
                source,
            })
        })
        .collect()
}
