use crate::stats::{CountedValue, FreqTable};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::json;

static RE_SUCCESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)success").unwrap());
static RE_ACCESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)access|denied|privilege|permission").unwrap());
static RE_FILESYSTEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)not\s+found|no\s+such|file|path").unwrap());
static RE_REGISTRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)registry|key|hive").unwrap());
static RE_DENIED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)denied").unwrap());
static RE_NOT_FOUND: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)not\s+found|no\s+such").unwrap());
static RE_SECURITY_KEYWORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)access|denied|privilege|permission|security").unwrap());

pub const HIGH_FREQUENCY_RATIO: f64 = 5.0;
pub const DENIED_CODE_THRESHOLD: usize = 50;
pub const NOT_FOUND_CODE_THRESHOLD: usize = 100;
pub const SECURITY_ALERT_THRESHOLD: usize = 100;
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;
const TYPICAL_TOP_N: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            Severity::High
        } else if confidence >= 0.6 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PatternKind {
    HighFrequency,
    Security,
    FileSystem,
    SecurityAlert,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pattern {
    pub kind: PatternKind,
    pub description: String,
    pub data: serde_json::Value,
    pub confidence: f64,
    pub severity: Severity,
}

impl Pattern {
    fn new(kind: PatternKind, description: String, data: serde_json::Value, confidence: f64) -> Self {
        Self { kind, description, data, confidence, severity: Severity::from_confidence(confidence) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendDirection {
    Stable,
    Increasing,
    Spiky,
}

/// Trend and seasonality derived from the dispersion of per-process activity
/// counts, not from event timestamps; a proxy signal, not time-series
/// analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalPattern {
    pub trend: TrendDirection,
    pub seasonality: f64,
    pub pattern_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterCharacteristics {
    pub average_activity: f64,
    pub member_count: usize,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessCluster {
    pub name: String,
    pub members: Vec<String>,
    pub activity_score: usize,
    pub characteristics: ClusterCharacteristics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorCorrelation {
    pub category: String,
    pub members: Vec<CountedValue>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehaviorBaseline {
    pub normal_process_count: usize,
    pub normal_operation_count: usize,
    pub baseline_error_rate: f64,
    pub typical_processes: Vec<CountedValue>,
    pub typical_operations: Vec<CountedValue>,
    pub mean_activity: f64,
    pub max_activity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub detected_patterns: Vec<Pattern>,
    pub clusters: Vec<ProcessCluster>,
    pub temporal: TemporalPattern,
    pub error_correlations: Vec<ErrorCorrelation>,
    pub baseline: BehaviorBaseline,
    pub overall_confidence: f64,
}

/// Full analysis over the final frequency tables. Pure: no I/O, never fails;
/// empty tables yield empty clusters, a Stable trend, and the neutral 0.5
/// confidence.
pub fn analyze(
    processes: &FreqTable,
    operations: &FreqTable,
    results: &FreqTable,
) -> AnalysisResult {
    let detected_patterns = detect_patterns(processes, results);
    let overall_confidence = if detected_patterns.is_empty() {
        NEUTRAL_CONFIDENCE
    } else {
        let sum: f64 = detected_patterns.iter().map(|p| p.confidence).sum();
        sum / detected_patterns.len() as f64
    };
    AnalysisResult {
        clusters: cluster_processes(processes),
        temporal: temporal_proxy(processes),
        error_correlations: correlate_errors(results),
        baseline: build_baseline(processes, operations, results),
        detected_patterns,
        overall_confidence,
    }
}

/// Partition processes into high/medium/low activity buckets relative to the
/// mean: high above 2x, medium above 0.5x, low otherwise. Exactly three
/// clusters for a non-empty table; empty input yields none.
pub fn cluster_processes(processes: &FreqTable) -> Vec<ProcessCluster> {
    if processes.is_empty() {
        return Vec::new();
    }
    let mean = processes.total() as f64 / processes.len() as f64;
    let mut high = Vec::new();
    let mut medium = Vec::new();
    let mut low = Vec::new();
    for entry in processes.entries() {
        let count = entry.count as f64;
        if count > 2.0 * mean {
            high.push(entry);
        } else if count > 0.5 * mean {
            medium.push(entry);
        } else {
            low.push(entry);
        }
    }
    vec![
        build_cluster("High Activity", "high", high),
        build_cluster("Medium Activity", "medium", medium),
        build_cluster("Low Activity", "low", low),
    ]
}

fn build_cluster(name: &str, category: &str, members: Vec<&CountedValue>) -> ProcessCluster {
    let activity_score: usize = members.iter().map(|m| m.count).sum();
    let average = if members.is_empty() {
        0.0
    } else {
        activity_score as f64 / members.len() as f64
    };
    ProcessCluster {
        name: name.to_string(),
        members: members.iter().map(|m| m.value.clone()).collect(),
        activity_score,
        characteristics: ClusterCharacteristics {
            average_activity: round2(average),
            member_count: members.len(),
            category: category.to_string(),
        },
    }
}

pub fn temporal_proxy(processes: &FreqTable) -> TemporalPattern {
    let pattern_type = "activity-dispersion".to_string();
    if processes.is_empty() {
        return TemporalPattern { trend: TrendDirection::Stable, seasonality: 0.0, pattern_type };
    }
    let counts = processes.entries().iter().map(|e| e.count);
    let max = counts.clone().max().unwrap_or(0) as f64;
    let min = counts.clone().min().unwrap_or(0) as f64;
    let mean = processes.total() as f64 / processes.len() as f64;
    let trend = if max > 3.0 * mean {
        TrendDirection::Spiky
    } else if max > 1.5 * mean {
        TrendDirection::Increasing
    } else {
        TrendDirection::Stable
    };
    TemporalPattern { trend, seasonality: round2((max - min) / mean.max(1.0)), pattern_type }
}

/// Group non-success result codes into fixed categories. A code joins the
/// first category it matches; codes matching none are excluded.
pub fn correlate_errors(results: &FreqTable) -> Vec<ErrorCorrelation> {
    let categories: [(&str, &Lazy<Regex>); 3] = [
        ("access", &RE_ACCESS),
        ("filesystem", &RE_FILESYSTEM),
        ("registry", &RE_REGISTRY),
    ];
    let mut buckets: Vec<Vec<CountedValue>> = vec![Vec::new(); categories.len()];
    for entry in results.entries() {
        if RE_SUCCESS.is_match(&entry.value) {
            continue;
        }
        for (i, (_, re)) in categories.iter().enumerate() {
            if re.is_match(&entry.value) {
                buckets[i].push(entry.clone());
                break;
            }
        }
    }
    categories
        .iter()
        .zip(buckets)
        .filter(|(_, members)| !members.is_empty())
        .map(|((name, _), members)| {
            let total = members.iter().map(|m| m.count).sum();
            ErrorCorrelation { category: name.to_string(), members, total }
        })
        .collect()
}

pub fn build_baseline(
    processes: &FreqTable,
    operations: &FreqTable,
    results: &FreqTable,
) -> BehaviorBaseline {
    let total_results = results.total();
    let error_total: usize = results
        .entries()
        .iter()
        .filter(|e| !RE_SUCCESS.is_match(&e.value))
        .map(|e| e.count)
        .sum();
    let baseline_error_rate = if total_results == 0 {
        0.0
    } else {
        round4(error_total as f64 / total_results as f64)
    };
    let mean_activity = if processes.is_empty() {
        0.0
    } else {
        round2(processes.total() as f64 / processes.len() as f64)
    };
    BehaviorBaseline {
        normal_process_count: processes.len(),
        normal_operation_count: operations.len(),
        baseline_error_rate,
        typical_processes: processes.top_n(TYPICAL_TOP_N),
        typical_operations: operations.top_n(TYPICAL_TOP_N),
        mean_activity,
        max_activity: processes.entries().iter().map(|e| e.count).max().unwrap_or(0),
    }
}

/// Threshold-based detections over the tables; deterministic order:
/// high-frequency processes first, then error-code patterns, then the
/// aggregate security alert.
pub fn detect_patterns(processes: &FreqTable, results: &FreqTable) -> Vec<Pattern> {
    let mut out = Vec::new();

    if !processes.is_empty() {
        let mean = processes.total() as f64 / processes.len() as f64;
        for entry in processes.entries() {
            if entry.count as f64 > HIGH_FREQUENCY_RATIO * mean {
                out.push(Pattern::new(
                    PatternKind::HighFrequency,
                    format!(
                        "Process '{}' generated {} events, over {}x the mean activity of {:.1}",
                        entry.value, entry.count, HIGH_FREQUENCY_RATIO as usize, mean
                    ),
                    json!({
                        "process": entry.value,
                        "count": entry.count,
                        "mean_activity": round2(mean),
                    }),
                    0.9,
                ));
            }
        }
    }

    for entry in results.entries() {
        if RE_SUCCESS.is_match(&entry.value) {
            continue;
        }
        if RE_DENIED.is_match(&entry.value) && entry.count > DENIED_CODE_THRESHOLD {
            out.push(Pattern::new(
                PatternKind::Security,
                format!("Result '{}' occurred {} times", entry.value, entry.count),
                json!({ "result": entry.value, "count": entry.count }),
                0.85,
            ));
        }
        // not exclusive with the denied check: a code can belong to both
        if RE_NOT_FOUND.is_match(&entry.value) && entry.count > NOT_FOUND_CODE_THRESHOLD {
            out.push(Pattern::new(
                PatternKind::FileSystem,
                format!("Result '{}' occurred {} times", entry.value, entry.count),
                json!({ "result": entry.value, "count": entry.count }),
                0.8,
            ));
        }
    }

    // Each code contributes once even when it matches several keywords.
    let security_total: usize = results
        .entries()
        .iter()
        .filter(|e| RE_SECURITY_KEYWORDS.is_match(&e.value))
        .map(|e| e.count)
        .sum();
    if security_total > SECURITY_ALERT_THRESHOLD {
        out.push(Pattern::new(
            PatternKind::SecurityAlert,
            format!("{} security-related results across the capture", security_total),
            json!({ "total": security_total }),
            0.9,
        ));
    }

    out
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
