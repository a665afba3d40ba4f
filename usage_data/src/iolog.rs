//! Parser for the NFS I/O histogram logs.
//!
//! A snapshot looks like
//!
//! ```text
//! Log: 2025-03-01 12:00:00 (1740830400)
//! @rd_client(tikgpu01,gpu)[alice(phd/itet)]:
//! [512, 1K)  120 |@@@@
//! [1K, 2K)   3 |
//! ```
//!
//! Lines are classified in priority order (timestamp header, session header, histogram line);
//! anything else is ignored. The writer in the `database` crate folds the resulting
//! [`LogLine`]s into relational rows.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::size::SizeRange;

pub const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";

#[allow(clippy::unwrap_used)]
static TIMESTAMP_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Log: (\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) \((\d+)\)").unwrap());
#[allow(clippy::unwrap_used)]
static SESSION_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@rd_client\(([^,]+),([^)]+)\)\[([^(]+)\(([^)]+)\)\]:").unwrap());
#[allow(clippy::unwrap_used)]
static HISTOGRAM_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[([^,]+), ([^)]+)\)\s+(\d+) \|").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogTimestamp {
    /// Wall clock time as written in the log.
    pub timestamp: NaiveDateTime,
    pub unix_timestamp: i64,
}

impl LogTimestamp {
    pub fn timestamp_text(&self) -> String {
        self.timestamp.format(TIMESTAMP_FMT).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionHeader {
    pub machine: String,
    pub machine_type: String,
    pub user: String,
    pub role: Option<String>,
    pub affiliation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramBucket {
    pub range: SizeRange,
    pub operation_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LogLine {
    Timestamp(LogTimestamp),
    Session(SessionHeader),
    Histogram(HistogramBucket),
}

#[derive(Debug, Error)]
pub enum IoLogError {
    #[error("line {line}: invalid timestamp {text:?}: {source}")]
    Timestamp {
        line: usize,
        text: String,
        source: chrono::ParseError,
    },
    #[error("line {line}: invalid unix timestamp {text:?}: {source}")]
    UnixTimestamp {
        line: usize,
        text: String,
        source: std::num::ParseIntError,
    },
    #[error("line {line}: invalid operation count {text:?}: {source}")]
    OperationCount {
        line: usize,
        text: String,
        source: std::num::ParseIntError,
    },
}

impl LogLine {
    /// Classifies one (untrimmed) line. `line_number` is only used for error messages.
    pub fn parse(line_number: usize, line: &str) -> Result<Option<LogLine>, IoLogError> {
        let line = line.trim();

        if let Some(captures) = TIMESTAMP_HEADER.captures(line) {
            let text = &captures[1];
            let timestamp =
                NaiveDateTime::parse_from_str(text, TIMESTAMP_FMT).map_err(|source| IoLogError::Timestamp {
                    line: line_number,
                    text: text.to_owned(),
                    source,
                })?;
            let unix_timestamp = captures[2].parse().map_err(|source| IoLogError::UnixTimestamp {
                line: line_number,
                text: captures[2].to_owned(),
                source,
            })?;
            return Ok(Some(LogLine::Timestamp(LogTimestamp { timestamp, unix_timestamp })));
        }

        if let Some(captures) = SESSION_HEADER.captures(line) {
            let mut status = captures[4].split('/');
            let role = status.next().map(str::to_owned);
            let affiliation = status.next().map(str::to_owned);
            return Ok(Some(LogLine::Session(SessionHeader {
                machine: captures[1].to_owned(),
                machine_type: captures[2].to_owned(),
                user: captures[3].to_owned(),
                role,
                affiliation,
            })));
        }

        if let Some(captures) = HISTOGRAM_LINE.captures(line) {
            let operation_count = captures[3].parse().map_err(|source| IoLogError::OperationCount {
                line: line_number,
                text: captures[3].to_owned(),
                source,
            })?;
            return Ok(Some(LogLine::Histogram(HistogramBucket {
                range: SizeRange::from_tokens(&captures[1], &captures[2]),
                operation_count,
            })));
        }

        Ok(None)
    }
}

/// Parses a whole snapshot. Unrecognised lines are dropped, a malformed timestamp header fails
/// the whole snapshot since nothing after it could be attributed to a point in time.
pub fn parse_log(content: &str) -> Result<Vec<LogLine>, IoLogError> {
    content
        .lines()
        .enumerate()
        .filter_map(|(i, line)| LogLine::parse(i + 1, line).transpose())
        .collect()
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::size::ByteSize;

    #[test]
    fn LogLine__parse__timestamp() {
        let line = LogLine::parse(1, "Log: 2025-03-01 12:00:00 (1740830400)").unwrap();
        assert_eq!(
            line,
            Some(LogLine::Timestamp(LogTimestamp {
                timestamp: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap().and_hms_opt(12, 0, 0).unwrap(),
                unix_timestamp: 1740830400,
            }))
        );
    }

    #[test]
    fn LogLine__parse__invalid_timestamp() {
        let err = LogLine::parse(7, "Log: 2025-13-45 12:00:00 (1740830400)").unwrap_err();
        assert!(matches!(err, IoLogError::Timestamp { line: 7, .. }), "{err}");

        let err = LogLine::parse(2, "Log: 2025-03-01 12:00:00 (99999999999999999999999)").unwrap_err();
        assert!(matches!(err, IoLogError::UnixTimestamp { line: 2, .. }), "{err}");
    }

    #[test]
    fn LogLine__parse__session() {
        let line = LogLine::parse(1, "  @rd_client(tikgpu01,gpu)[alice(phd/itet)]:").unwrap();
        assert_eq!(
            line,
            Some(LogLine::Session(SessionHeader {
                machine: "tikgpu01".into(),
                machine_type: "gpu".into(),
                user: "alice".into(),
                role: Some("phd".into()),
                affiliation: Some("itet".into()),
            }))
        );

        let Some(LogLine::Session(header)) = LogLine::parse(1, "@rd_client(node,cpu)[bob(staff)]:").unwrap() else {
            panic!("expected a session header");
        };
        assert_eq!(header.role.as_deref(), Some("staff"));
        assert_eq!(header.affiliation, None);
    }

    #[test]
    fn LogLine__parse__histogram() {
        let Some(LogLine::Histogram(bucket)) = LogLine::parse(1, "[512, 1K)  120 |@@@@@@@@").unwrap() else {
            panic!("expected a histogram line");
        };
        assert_eq!(bucket.operation_count, 120);
        assert_eq!(bucket.range.min, ByteSize(512));
        assert_eq!(bucket.range.max, ByteSize(1024));
        assert_eq!(bucket.range.display_text, "[512, 1K)");
    }

    #[test]
    fn LogLine__parse__histogram_malformed_size_is_zero() {
        let Some(LogLine::Histogram(bucket)) = LogLine::parse(1, "[abc, 1K)  3 |").unwrap() else {
            panic!("expected a histogram line");
        };
        assert_eq!(bucket.range.min, ByteSize(0));
        assert_eq!(bucket.range.display_text, "[abc, 1K)");
    }

    #[test]
    fn LogLine__parse__ignored() {
        for line in ["", "   ", "-----------", "some text", "[512, 1K) |", "Log: yesterday"] {
            assert_eq!(LogLine::parse(1, line).unwrap(), None, "{line:?}");
        }
    }

    #[test]
    fn parse_log__sequence() {
        let content = "\
Log: 2025-03-01 12:00:00 (1740830400)

@rd_client(tikgpu01,gpu)[alice(phd/itet)]:
[512, 1K)  120 |@@@@
[1K, 2K)  3 |
=====
@rd_client(tikgpu02,gpu)[bob(staff/dinfk)]:
[4M, 8M)  7 |@
";
        let lines = parse_log(content).unwrap();
        assert_eq!(lines.len(), 6);
        assert!(matches!(lines[0], LogLine::Timestamp(_)));
        assert!(matches!(lines[1], LogLine::Session(_)));
        assert!(matches!(lines[5], LogLine::Histogram(HistogramBucket { operation_count: 7, .. })));
    }

    #[test]
    fn parse_log__malformed_timestamp_fails_everything() {
        let content = "\
Log: 2025-03-01 12:00:00 (1740830400)
@rd_client(tikgpu01,gpu)[alice(phd/itet)]:
[512, 1K)  120 |@@@@
Log: 2025-02-30 12:00:00 (1740830401)
";
        assert!(matches!(parse_log(content), Err(IoLogError::Timestamp { line: 4, .. })));
    }
}
