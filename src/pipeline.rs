use crate::parser::Record;
use ahash::{AHashSet, RandomState};
use serde::Serialize;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hasher};

pub const DEFAULT_REQUIRED_FIELDS: &[&str] = &["Process Name", "Operation", "Path", "Result"];
pub const DEFAULT_DEDUP_FIELDS: &[&str] =
    &["Time of Day", "Process Name", "PID", "Operation", "Path"];
pub const DEFAULT_SUCCESS_INDICATORS: &[&str] = &["SUCCESS"];
pub const DEFAULT_RESULT_FIELD: &str = "Result";

// Fixed seeds so fingerprints are stable across runs and processes.
const FP_SEEDS: (u64, u64, u64, u64) = (
    0x9e37_79b9_7f4a_7c15,
    0x85eb_ca6b_2d8e_4f33,
    0xc2b2_ae35_6c62_272d,
    0x27d4_eb2f_1656_67c5,
);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub required_fields: Vec<String>,
    pub dedup_fields: Vec<String>,
    pub success_indicators: Vec<String>,
    pub result_field: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            required_fields: DEFAULT_REQUIRED_FIELDS.iter().map(|s| s.to_string()).collect(),
            dedup_fields: DEFAULT_DEDUP_FIELDS.iter().map(|s| s.to_string()).collect(),
            success_indicators: DEFAULT_SUCCESS_INDICATORS.iter().map(|s| s.to_string()).collect(),
            result_field: DEFAULT_RESULT_FIELD.to_string(),
        }
    }
}

/// Per-record classification; exactly one is assigned per processed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Retained,
    ArchivedSuccess,
    DroppedDuplicate,
    DroppedInvalid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub retained: usize,
    pub archived_success: usize,
    pub dropped_duplicate: usize,
    pub dropped_invalid: usize,
    pub records_sanitized: usize,
    /// Result codes removed by the success filter, by occurrence count.
    pub filtered_results: HashMap<String, usize>,
}

impl PipelineSummary {
    pub fn total(&self) -> usize {
        self.retained + self.archived_success + self.dropped_duplicate + self.dropped_invalid
    }
}

/// Stateful post-processing chain: validate, sanitize, deduplicate, filter
/// uninteresting outcomes. The duplicate seen-set is scoped to one run;
/// `reset` starts a fresh file.
pub struct Pipeline {
    config: PipelineConfig,
    lowered_indicators: Vec<String>,
    seen: AHashSet<u64>,
    hash_state: RandomState,
    summary: PipelineSummary,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let lowered_indicators = config
            .success_indicators
            .iter()
            .map(|s| s.to_lowercase())
            .collect();
        Self {
            config,
            lowered_indicators,
            seen: AHashSet::new(),
            hash_state: RandomState::with_seeds(FP_SEEDS.0, FP_SEEDS.1, FP_SEEDS.2, FP_SEEDS.3),
            summary: PipelineSummary::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn summary(&self) -> &PipelineSummary {
        &self.summary
    }

    pub fn into_summary(self) -> PipelineSummary {
        self.summary
    }

    pub fn reset(&mut self) {
        self.seen.clear();
        self.summary = PipelineSummary::default();
    }

    /// Run one record through all stages. Sanitization mutates the record in
    /// place; stages after it only read.
    pub fn process(&mut self, record: &mut Record) -> Outcome {
        if !self.validate(record) {
            self.summary.dropped_invalid += 1;
            return Outcome::DroppedInvalid;
        }
        if sanitize_record(record) {
            self.summary.records_sanitized += 1;
        }
        let fp = self.fingerprint(record);
        if !self.seen.insert(fp) {
            self.summary.dropped_duplicate += 1;
            return Outcome::DroppedDuplicate;
        }
        if let Some(code) = self.success_match(record) {
            self.summary.archived_success += 1;
            *self.summary.filtered_results.entry(code).or_insert(0) += 1;
            return Outcome::ArchivedSuccess;
        }
        self.summary.retained += 1;
        Outcome::Retained
    }

    fn validate(&self, record: &Record) -> bool {
        for field in &self.config.required_fields {
            match record.get(field) {
                Some(v) if !v.trim().is_empty() => {}
                _ => return false,
            }
        }
        true
    }

    fn fingerprint(&self, record: &Record) -> u64 {
        let mut hasher = self.hash_state.build_hasher();
        for field in &self.config.dedup_fields {
            hasher.write(record.get(field).unwrap_or("").as_bytes());
            // unit separator keeps ("ab","c") distinct from ("a","bc")
            hasher.write_u8(0x1f);
        }
        hasher.finish()
    }

    fn success_match(&self, record: &Record) -> Option<String> {
        let value = record.get(&self.config.result_field)?;
        if value.is_empty() {
            return None;
        }
        let lowered = value.to_lowercase();
        for indicator in &self.lowered_indicators {
            if lowered == *indicator || lowered.contains(indicator.as_str()) {
                return Some(value.to_string());
            }
        }
        None
    }
}

/// Sanitize every field: trim surrounding whitespace, drop non-printable
/// control characters (tab/CR/LF survive into the collapse step), and
/// collapse whitespace runs to a single space. Returns whether anything
/// changed. Never rejects a record.
pub fn sanitize_record(record: &mut Record) -> bool {
    let mut changed = false;
    for value in record.values_mut() {
        let cleaned = sanitize_field(value);
        if cleaned != *value {
            *value = cleaned;
            changed = true;
        }
    }
    changed
}

pub fn sanitize_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_run = false;
    for c in value.trim().chars() {
        if c.is_control() && c != '\t' && c != '\r' && c != '\n' {
            continue;
        }
        if c.is_whitespace() {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}
