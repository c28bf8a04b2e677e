//! # Rule Files
//!
//! Parsers for `storage-schemas.conf` and `storage-aggregation.conf`.
//!
//! ```text
//! [cpu]
//! pattern = \.cpu$
//! retentions = 60:1d,1h:7d
//!
//! [default]
//! pattern = .*
//! xFilesFactor = 0.5
//! aggregationMethod = average
//! ```
//!
//! Sections keep their file order, which is the rule matching order.

use std::path::Path;

use crate::error::{Error, Result, ResultExt};
use crate::rules::{AggregationRule, Pattern, RetentionRule};
use crate::types::{AggregationMethod, Retention};

pub const STORAGE_SCHEMAS_FILE: &str = "storage-schemas.conf";
pub const STORAGE_AGGREGATION_FILE: &str = "storage-aggregation.conf";

const DEFAULT_X_FILES_FACTOR: f32 = 0.5;

struct Entry {
    key: String,
    value: String,
    line: usize,
}

struct Section {
    name: String,
    line: usize,
    entries: Vec<Entry>,
}

impl Section {
    fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.key.eq_ignore_ascii_case(key))
    }
}

fn config_error(origin: &str, line: usize, message: impl std::fmt::Display) -> Error {
    Error::Configuration {
        message: format!("{}:{}: {}", origin, line, message),
    }
}

fn parse_sections(origin: &str, text: &str) -> Result<Vec<Section>> {
    let mut sections: Vec<Section> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let name = rest
                .strip_suffix(']')
                .ok_or_else(|| config_error(origin, line_no, "unterminated section header"))?;
            sections.push(Section {
                name: name.trim().to_string(),
                line: line_no,
                entries: Vec::new(),
            });
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| config_error(origin, line_no, format!("expected key=value, got {:?}", line)))?;
        let key = key.trim();

        // Entries before any header form an unnamed section
        let section = match sections.last_mut() {
            Some(section) => section,
            None => {
                sections.push(Section {
                    name: String::new(),
                    line: line_no,
                    entries: Vec::new(),
                });
                let last = sections.len() - 1;
                &mut sections[last]
            }
        };
        if section.get(key).is_some() {
            return Err(config_error(origin, line_no, format!("duplicate key {:?}", key)));
        }
        section.entries.push(Entry {
            key: key.to_string(),
            value: value.trim().to_string(),
            line: line_no,
        });
    }

    Ok(sections)
}

/// Parse a duration like `60`, `60s`, `5m`, `1h`, `7d`, `2w` or `1y` into seconds
pub fn parse_duration(text: &str) -> Result<u32> {
    let text = text.trim();
    let (digits, multiplier) = match text.chars().last() {
        Some('s') => (&text[..text.len() - 1], 1u64),
        Some('m') => (&text[..text.len() - 1], 60),
        Some('h') => (&text[..text.len() - 1], 3600),
        Some('d') => (&text[..text.len() - 1], 86_400),
        Some('w') => (&text[..text.len() - 1], 7 * 86_400),
        Some('y') => (&text[..text.len() - 1], 365 * 86_400),
        _ => (text, 1),
    };

    let amount: u64 = digits.parse().map_err(|_| Error::Configuration {
        message: format!("invalid duration {:?}", text),
    })?;
    let seconds = amount.checked_mul(multiplier).ok_or_else(|| Error::Configuration {
        message: format!("duration {:?} overflows", text),
    })?;
    u32::try_from(seconds).map_err(|_| Error::Configuration {
        message: format!("duration {:?} does not fit in 32 bits", text),
    })
}

/// Parse `spp:keep[,spp:keep...]` into ordered tiers
pub fn parse_retentions(text: &str) -> Result<Vec<Retention>> {
    text.split(',')
        .map(|item| {
            let (spp, keep) = item.trim().split_once(':').ok_or_else(|| Error::Configuration {
                message: format!("invalid retention {:?}, expected secondsPerPoint:secondsToStore", item),
            })?;
            Retention::new(parse_duration(spp)?, parse_duration(keep)?)
        })
        .collect()
}

pub fn parse_storage_schemas(origin: &str, text: &str) -> Result<Vec<RetentionRule>> {
    let mut rules = Vec::new();

    for section in parse_sections(origin, text)? {
        let pattern = section
            .get("pattern")
            .ok_or_else(|| config_error(origin, section.line, format!("[{}] has no pattern", section.name)))?;
        let retentions = section
            .get("retentions")
            .ok_or_else(|| config_error(origin, section.line, format!("[{}] has no retentions", section.name)))?;

        let tiers = parse_retentions(&retentions.value)
            .map_err(|e| config_error(origin, retentions.line, e))?;
        let rule = RetentionRule::new(section.name.clone(), Pattern::new(pattern.value.as_str()), tiers)
            .map_err(|e| config_error(origin, retentions.line, e))?;
        rules.push(rule);
    }

    Ok(rules)
}

pub fn parse_storage_aggregation(origin: &str, text: &str) -> Result<Vec<AggregationRule>> {
    let mut rules = Vec::new();

    for section in parse_sections(origin, text)? {
        let pattern = section
            .get("pattern")
            .ok_or_else(|| config_error(origin, section.line, format!("[{}] has no pattern", section.name)))?;

        let x_files_factor = match section.get("xFilesFactor") {
            Some(entry) => entry.value.parse::<f32>().map_err(|_| {
                config_error(origin, entry.line, format!("invalid xFilesFactor {:?}", entry.value))
            })?,
            None => DEFAULT_X_FILES_FACTOR,
        };
        let method = match section.get("aggregationMethod") {
            Some(entry) => entry
                .value
                .parse::<AggregationMethod>()
                .map_err(|e| config_error(origin, entry.line, e))?,
            None => AggregationMethod::Average,
        };

        let rule = AggregationRule::new(
            section.name.clone(),
            Pattern::new(pattern.value.as_str()),
            x_files_factor,
            method,
        )
        .map_err(|e| config_error(origin, pattern.line, e))?;
        rules.push(rule);
    }

    Ok(rules)
}

pub fn load_storage_schemas(path: &Path) -> Result<Vec<RetentionRule>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    parse_storage_schemas(&path.display().to_string(), &text)
}

pub fn load_storage_aggregation(path: &Path) -> Result<Vec<AggregationRule>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    parse_storage_aggregation(&path.display().to_string(), &text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("60").unwrap(), 60);
        assert_eq!(parse_duration("60s").unwrap(), 60);
        assert_eq!(parse_duration("5m").unwrap(), 300);
        assert_eq!(parse_duration("1h").unwrap(), 3600);
        assert_eq!(parse_duration("1d").unwrap(), 86_400);
        assert_eq!(parse_duration("1w").unwrap(), 604_800);
        assert_eq!(parse_duration("1y").unwrap(), 31_536_000);
        assert!(parse_duration("").is_err());
        assert!(parse_duration("d").is_err());
        assert!(parse_duration("-5").is_err());
        assert!(parse_duration("500y").is_err());
    }

    #[test]
    fn test_parse_retentions() {
        let tiers = parse_retentions("60:86400,3600:604800").unwrap();
        assert_eq!(tiers.len(), 2);
        assert_eq!(tiers[0].points(), 1440);
        assert_eq!(tiers[1].points(), 168);

        let tiers = parse_retentions("1m:1d, 1h:7d").unwrap();
        assert_eq!(tiers, parse_retentions("60:86400,3600:604800").unwrap());

        assert!(parse_retentions("60").is_err());
        assert!(parse_retentions("60:30").is_err());
    }

    #[test]
    fn test_parse_storage_schemas() {
        let text = "\
# carbon schemas
[carbon]
pattern = ^carbond\\.
retentions = 60:90d

[cpu]
pattern = \\.cpu$
retentions = 60:1d,1h:7d

[default_1min_for_1day]
pattern = .*
retentions = 60s:1d
";
        let rules = parse_storage_schemas("test", text).unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].name, "carbon");
        assert_eq!(rules[1].pattern().as_str(), "\\.cpu$");
        assert_eq!(rules[1].tiers().len(), 2);
        assert_eq!(rules[2].tiers()[0].seconds_to_store, 86_400);
    }

    #[test]
    fn test_schema_errors_carry_line() {
        let err = parse_storage_schemas("schemas", "[a]\npattern=.*\nretentions=60:1d,90:7d\n")
            .unwrap_err();
        assert!(err.to_string().contains("schemas:3"), "{}", err);

        assert!(parse_storage_schemas("schemas", "[a]\npattern=.*\n").is_err());
        assert!(parse_storage_schemas("schemas", "[a\npattern=.*\n").is_err());
        assert!(parse_storage_schemas("schemas", "[a]\npattern .*\n").is_err());
    }

    #[test]
    fn test_schema_keeps_invalid_regex() {
        let rules = parse_storage_schemas("schemas", "[a]\npattern=*.cpu\nretentions=60:1d\n")
            .unwrap();
        assert!(!rules[0].pattern().is_valid());
    }

    #[test]
    fn test_parse_storage_aggregation() {
        let text = "\
[min]
pattern = \\.min$
xFilesFactor = 0.1
aggregationMethod = min

[sum]
pattern = \\.count$
aggregationMethod = sum

[default]
pattern = .*
";
        let rules = parse_storage_aggregation("test", text).unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].method(), AggregationMethod::Min);
        assert!((rules[0].x_files_factor() - 0.1).abs() < f32::EPSILON);
        assert_eq!(rules[1].x_files_factor(), DEFAULT_X_FILES_FACTOR);
        assert_eq!(rules[2].method(), AggregationMethod::Average);

        assert!(parse_storage_aggregation("agg", "[a]\npattern=.*\naggregationMethod=median\n")
            .is_err());
        assert!(parse_storage_aggregation("agg", "[a]\npattern=.*\nxFilesFactor=2\n").is_err());
    }
}
