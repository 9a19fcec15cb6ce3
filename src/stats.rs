use crate::parser::Record;
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountedValue {
    pub value: String,
    pub count: usize,
}

/// Frequency table that remembers first-seen order, so top-N ties resolve
/// toward the value that appeared earliest in the input.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FreqTable {
    entries: Vec<CountedValue>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl FreqTable {
    pub fn observe(&mut self, value: &str) {
        if value.is_empty() {
            return;
        }
        if let Some(&i) = self.index.get(value) {
            self.entries[i].count += 1;
        } else {
            self.index.insert(value.to_string(), self.entries.len());
            self.entries.push(CountedValue { value: value.to_string(), count: 1 });
        }
    }

    pub fn observe_n(&mut self, value: &str, n: usize) {
        if value.is_empty() || n == 0 {
            return;
        }
        if let Some(&i) = self.index.get(value) {
            self.entries[i].count += n;
        } else {
            self.index.insert(value.to_string(), self.entries.len());
            self.entries.push(CountedValue { value: value.to_string(), count: n });
        }
    }

    pub fn get(&self, value: &str) -> usize {
        self.index.get(value).map(|&i| self.entries[i].count).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> usize {
        self.entries.iter().map(|e| e.count).sum()
    }

    /// Entries in first-seen order.
    pub fn entries(&self) -> &[CountedValue] {
        &self.entries
    }

    /// Top `n` entries by count, descending; stable, so ties keep first-seen
    /// order.
    pub fn top_n(&self, n: usize) -> Vec<CountedValue> {
        self.entries
            .iter()
            .sorted_by(|a, b| b.count.cmp(&a.count))
            .take(n)
            .cloned()
            .collect()
    }
}

impl FromIterator<(String, usize)> for FreqTable {
    fn from_iter<T: IntoIterator<Item = (String, usize)>>(iter: T) -> Self {
        let mut table = FreqTable::default();
        for (value, count) in iter {
            table.observe_n(&value, count);
        }
        table
    }
}

/// Running per-record frequency counters. Callers feed it retained records
/// only; empty field values are skipped.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    pub process_field: String,
    pub operation_field: String,
    pub result_field: String,
    pub by_process: FreqTable,
    pub by_operation: FreqTable,
    pub by_result: FreqTable,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self {
            process_field: "Process Name".to_string(),
            operation_field: "Operation".to_string(),
            result_field: crate::pipeline::DEFAULT_RESULT_FIELD.to_string(),
            by_process: FreqTable::default(),
            by_operation: FreqTable::default(),
            by_result: FreqTable::default(),
        }
    }
}

impl StatsAggregator {
    pub fn observe(&mut self, record: &Record) {
        if let Some(v) = record.get(&self.process_field) {
            self.by_process.observe(v);
        }
        if let Some(v) = record.get(&self.operation_field) {
            self.by_operation.observe(v);
        }
        if let Some(v) = record.get(&self.result_field) {
            self.by_result.observe(v);
        }
    }
}
