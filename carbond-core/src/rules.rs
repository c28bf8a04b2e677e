//! # Rule Resolver
//!
//! Maps a metric name to its retention tiers and aggregation settings.
//!
//! Rules are tested in declaration order and the first match wins. A pattern
//! that failed to compile stops the whole lookup instead of being skipped, so
//! a broken rule can never let a later, broader rule claim its metrics.

use regex::Regex;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::types::{validate_tiers, AggregationMethod, Retention};

/// A regular expression matched anywhere in the metric name
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    compiled: std::result::Result<Regex, String>,
}

impl Pattern {
    /// Compile `source`. Compilation failures are kept, not returned.
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let compiled = Regex::new(&source).map_err(|e| e.to_string());
        if let Err(message) = &compiled {
            error!(pattern = %source, "pattern compilation failed: {}", message);
        }
        Self { source, compiled }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_valid(&self) -> bool {
        self.compiled.is_ok()
    }

    pub fn matches(&self, name: &str) -> Result<bool> {
        match &self.compiled {
            Ok(re) => Ok(re.is_match(name)),
            Err(message) => Err(Error::Pattern {
                pattern: self.source.clone(),
                message: message.clone(),
            }),
        }
    }
}

/// Storage schema: which tiers a matching metric gets
#[derive(Debug, Clone)]
pub struct RetentionRule {
    pub name: String,
    pattern: Pattern,
    tiers: Vec<Retention>,
}

impl RetentionRule {
    pub fn new(name: impl Into<String>, pattern: Pattern, tiers: Vec<Retention>) -> Result<Self> {
        let name = name.into();
        validate_tiers(&tiers).map_err(|e| Error::Configuration {
            message: format!("schema [{}]: {}", name, e),
        })?;
        Ok(Self {
            name,
            pattern,
            tiers,
        })
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn tiers(&self) -> &[Retention] {
        &self.tiers
    }
}

/// Storage aggregation: how coarser tiers are derived for a matching metric
#[derive(Debug, Clone)]
pub struct AggregationRule {
    pub name: String,
    pattern: Pattern,
    x_files_factor: f32,
    method: AggregationMethod,
}

impl AggregationRule {
    pub fn new(
        name: impl Into<String>,
        pattern: Pattern,
        x_files_factor: f32,
        method: AggregationMethod,
    ) -> Result<Self> {
        let name = name.into();
        if !(0.0..=1.0).contains(&x_files_factor) {
            return Err(Error::Configuration {
                message: format!(
                    "aggregation [{}]: xFilesFactor {} outside [0, 1]",
                    name, x_files_factor
                ),
            });
        }
        Ok(Self {
            name,
            pattern,
            x_files_factor,
            method,
        })
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn x_files_factor(&self) -> f32 {
        self.x_files_factor
    }

    pub fn method(&self) -> AggregationMethod {
        self.method
    }
}

trait PatternRule {
    fn pattern(&self) -> &Pattern;
}

impl PatternRule for RetentionRule {
    fn pattern(&self) -> &Pattern {
        &self.pattern
    }
}

impl PatternRule for AggregationRule {
    fn pattern(&self) -> &Pattern {
        &self.pattern
    }
}

fn first_match<'a, R: PatternRule>(rules: &'a [R], metric: &str) -> Option<&'a R> {
    for rule in rules {
        match rule.pattern().matches(metric) {
            Ok(true) => {
                debug!(metric, pattern = rule.pattern().as_str(), "rule matched");
                return Some(rule);
            }
            Ok(false) => {}
            Err(e) => {
                error!(metric, "aborting rule lookup: {}", e);
                return None;
            }
        }
    }
    debug!(metric, "no rule matched");
    None
}

/// Ordered retention and aggregation rules, replaced as a whole on reload
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    retentions: Vec<RetentionRule>,
    aggregations: Vec<AggregationRule>,
}

impl RuleSet {
    pub fn new(retentions: Vec<RetentionRule>, aggregations: Vec<AggregationRule>) -> Self {
        Self {
            retentions,
            aggregations,
        }
    }

    pub fn retention_rules(&self) -> &[RetentionRule] {
        &self.retentions
    }

    pub fn aggregation_rules(&self) -> &[AggregationRule] {
        &self.aggregations
    }

    pub fn resolve_retention(&self, metric: &str) -> Option<&[Retention]> {
        first_match(&self.retentions, metric).map(RetentionRule::tiers)
    }

    pub fn resolve_aggregation(&self, metric: &str) -> Option<(f32, AggregationMethod)> {
        first_match(&self.aggregations, metric).map(|r| (r.x_files_factor, r.method))
    }
}
