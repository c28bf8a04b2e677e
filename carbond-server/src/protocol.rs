//! Plaintext line protocol: `<metric> <value> <timestamp>\n`

use tracing::warn;

use carbond_core::{Error, Result, Timestamp};
use carbond_storage::MetricDatabase;

/// One parsed sample, borrowing the metric name from the input line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<'a> {
    pub name: &'a str,
    pub value: f64,
    pub timestamp: Timestamp,
}

pub fn parse_line(line: &str) -> Result<Sample<'_>> {
    let malformed = |reason: &str| Error::Protocol {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    let mut fields = line.split_whitespace();
    let (Some(name), Some(value), Some(timestamp), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(malformed("expected exactly three fields"));
    };

    let value: f64 = value.parse().map_err(|_| malformed("value is not a number"))?;
    let timestamp: Timestamp = timestamp
        .parse()
        .map_err(|_| malformed("timestamp is not an unsigned 32-bit integer"))?;

    Ok(Sample {
        name,
        value,
        timestamp,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadReport {
    pub accepted: usize,
    pub rejected: usize,
}

/// Parse every line of a datagram or segment and buffer the valid samples
pub fn process_payload(db: &MetricDatabase, payload: &str) -> PayloadReport {
    let mut report = PayloadReport::default();

    for line in payload.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result = parse_line(line)
            .and_then(|sample| db.append(sample.name, sample.timestamp, sample.value));
        match result {
            Ok(()) => report.accepted += 1,
            Err(e) => {
                db.stats().record_malformed_line();
                warn!(code = e.error_code(), "rejected line: {}", e);
                report.rejected += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbond_core::Metrics;

    #[test]
    fn test_parse_line() {
        let sample = parse_line("servers.web1.cpu 42.5 1700000040").unwrap();
        assert_eq!(sample.name, "servers.web1.cpu");
        assert_eq!(sample.value, 42.5);
        assert_eq!(sample.timestamp, 1_700_000_040);

        let sample = parse_line("  a.b\t-1e3   60 ").unwrap();
        assert_eq!(sample.value, -1000.0);
    }

    #[test]
    fn test_parse_line_rejects_malformed() {
        assert!(parse_line("a.b 1").is_err());
        assert!(parse_line("a.b 1 60 extra").is_err());
        assert!(parse_line("a.b one 60").is_err());
        assert!(parse_line("a.b 1 -60").is_err());
        assert!(parse_line("a.b 1 4294967296").is_err());
        assert!(parse_line("a.b 1 60.5").is_err());
    }

    #[test]
    fn test_process_payload() {
        let db = MetricDatabase::new(Metrics::new());
        let payload = "a.b 1 60\n\na.c 2 120\r\nbroken line\na..d 3 60\na.b 4 120\n";

        let report = process_payload(&db, payload);
        assert_eq!(report, PayloadReport { accepted: 3, rejected: 2 });
        assert_eq!(db.get("a.b").unwrap().pending(), 2);
        assert_eq!(db.get("a.c").unwrap().pending(), 1);

        let stats = db.stats().snapshot();
        assert_eq!(stats.points_received, 3);
        assert_eq!(stats.malformed_lines, 2);
    }
}
