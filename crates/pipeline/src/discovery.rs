//! Matching source index names and naming their destinations.
//!
//! A source name is kept when it matches the filter regex and a date can be
//! decoded from the whole name with the input layout. The destination name
//! is that date rendered with the output layout, so several daily sources
//! can land in one monthly destination.

use std::fmt::Write;

use chrono::format::{parse, Parsed, StrftimeItems};
use chrono::{NaiveDateTime, NaiveTime};
use regex::Regex;
use tracing::{debug, warn};

use esrollup_core::{ConfigError, IndexTask, RollupConfig};

#[derive(Debug, Clone)]
pub struct IndexMatcher {
    filter: Regex,
    in_pattern: String,
    out_pattern: String,
}

impl IndexMatcher {
    pub fn new(filter: Regex, in_pattern: impl Into<String>, out_pattern: impl Into<String>) -> Self {
        Self {
            filter,
            in_pattern: in_pattern.into(),
            out_pattern: out_pattern.into(),
        }
    }

    /// Validate `config` and build a matcher from it.
    pub fn from_config(config: &RollupConfig) -> Result<Self, ConfigError> {
        let filter = config.validate()?;
        Ok(Self::new(filter, &config.in_pattern, &config.out_pattern))
    }

    /// Decode the date embedded in a source index name.
    ///
    /// Layouts without a day or month (monthly, yearly indexes) default the
    /// missing fields to 1.
    pub fn decode(&self, name: &str) -> Option<NaiveDateTime> {
        let mut parsed = Parsed::new();
        parse(&mut parsed, name, StrftimeItems::new(&self.in_pattern)).ok()?;

        if let Ok(datetime) = parsed.to_naive_datetime_with_offset(0) {
            return Some(datetime);
        }
        if let Ok(date) = parsed.to_naive_date() {
            return Some(date.and_time(NaiveTime::MIN));
        }
        // Setters refuse to overwrite a parsed value, so these only fill gaps.
        let _ = parsed.set_month(1);
        let _ = parsed.set_day(1);
        parsed
            .to_naive_date()
            .ok()
            .map(|date| date.and_time(NaiveTime::MIN))
    }

    /// Destination index name for a decoded date.
    pub fn destination(&self, date: &NaiveDateTime) -> Result<String, ConfigError> {
        let mut out = String::new();
        write!(out, "{}", date.format(&self.out_pattern)).map_err(|_| {
            ConfigError::InvalidPattern {
                name: "output pattern (outpattern)",
                layout: self.out_pattern.clone(),
            }
        })?;
        Ok(out)
    }

    /// Filter `names` into tasks sorted by source name, tickets 1..n.
    /// A name listed more than once yields one task.
    pub fn match_names<I, S>(&self, names: I) -> Result<Vec<IndexTask>, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matched = Vec::new();
        for name in names {
            let name = name.as_ref();
            if !self.filter.is_match(name) {
                continue;
            }
            let Some(date) = self.decode(name) else {
                debug!(index = name, layout = %self.in_pattern, "no date in matching index, skipped");
                continue;
            };
            matched.push(IndexTask {
                source_name: name.to_string(),
                dest_name: self.destination(&date)?,
                ticket: 0,
            });
        }

        Ok(number_tasks(matched))
    }
}

/// Sort `tasks` by source name, drop repeated sources, and number the rest
/// with tickets 1..n. Incoming tickets are ignored.
pub(crate) fn number_tasks(mut tasks: Vec<IndexTask>) -> Vec<IndexTask> {
    tasks.sort_by(|a, b| a.source_name.cmp(&b.source_name));
    tasks.dedup_by(|later, kept| {
        let repeated = later.source_name == kept.source_name;
        if repeated {
            warn!(source = %later.source_name, "index listed twice, reading it once");
        }
        repeated
    });
    for (task, ticket) in tasks.iter_mut().zip(1u64..) {
        task.ticket = ticket;
    }
    tasks
}
