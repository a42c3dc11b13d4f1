//! Run log domain model.
//!
//! The execution logger is a faithful, append-only recorder of the actions
//! taken during one run. It makes no decisions and performs no retries;
//! the synthesizer reads it through a read-only iterator once the run has
//! terminated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Tool that was invoked.
    pub tool_name: String,
    /// Parameters passed to the tool.
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Result returned by the tool.
    pub result: serde_json::Value,
    /// Whether the invocation reported success.
    pub success: bool,
    /// When the record was appended.
    pub recorded_at: DateTime<Utc>,
}

impl ActionRecord {
    /// Build a record stamped with the current time.
    pub fn new(
        tool_name: impl Into<String>,
        parameters: BTreeMap<String, serde_json::Value>,
        result: serde_json::Value,
        success: bool,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
            result,
            success,
            recorded_at: Utc::now(),
        }
    }
}

/// Ordered, append-only record of one run's actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    started_at: Option<DateTime<Utc>>,
    records: Vec<ActionRecord>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. The first append stamps the run start.
    pub fn append(&mut self, record: ActionRecord) {
        if self.started_at.is_none() {
            self.started_at = Some(record.recorded_at);
        }
        self.records.push(record);
    }

    /// Convenience: build and append a record in one call.
    pub fn record(
        &mut self,
        tool_name: impl Into<String>,
        parameters: BTreeMap<String, serde_json::Value>,
        result: serde_json::Value,
        success: bool,
    ) {
        self.append(ActionRecord::new(tool_name, parameters, result, success));
    }

    /// Read-only iterator over the records in append order.
    pub fn iter(&self) -> std::slice::Iter<'_, ActionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Wall-clock span covered by the log, in seconds.
    pub fn duration_secs(&self) -> f64 {
        match (self.started_at, self.records.last()) {
            (Some(start), Some(last)) => {
                (last.recorded_at - start).num_milliseconds() as f64 / 1000.0
            }
            _ => 0.0,
        }
    }
}

impl<'a> IntoIterator for &'a RunLog {
    type Item = &'a ActionRecord;
    type IntoIter = std::slice::Iter<'a, ActionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let mut log = RunLog::new();
        log.record("first", BTreeMap::new(), serde_json::json!(1), true);
        log.record("second", BTreeMap::new(), serde_json::json!(2), true);

        let names: Vec<&str> = log.iter().map(|r| r.tool_name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_empty_log() {
        let log = RunLog::new();
        assert!(log.is_empty());
        assert!((log.duration_secs() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_iterates_by_reference() {
        let mut log = RunLog::new();
        log.record("tool", BTreeMap::new(), serde_json::json!("out"), true);

        let mut count = 0;
        for record in &log {
            assert_eq!(record.tool_name, "tool");
            count += 1;
        }
        assert_eq!(count, 1);
    }
}
