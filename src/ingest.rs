use crate::assembler::{LineAssembler, LogicalLine};
use crate::parser::{self, Record};
use crate::pipeline::{Outcome, Pipeline, PipelineConfig, PipelineSummary};
use crate::stats::{CountedValue, FreqTable, StatsAggregator};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_PROGRESS_INTERVAL: usize = 10_000;
pub const DEFAULT_RELIEF_INTERVAL: usize = 50_000;
pub const DEFAULT_ERROR_CAP: usize = 100;
pub const DEFAULT_TOP_N: usize = 10;
const READ_BUFFER_BYTES: usize = 1 << 20;
const WRITE_BUFFER_BYTES: usize = 1 << 18;
const ERROR_CONTEXT_CHARS: usize = 120;

/// Fatal setup and stream failures. Per-line problems never become one of
/// these; they land in the bounded error list instead.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("input file has no header line: {0}")]
    EmptyFile(String),
    #[error("input header line is empty")]
    EmptyHeader,
    #[error("read failed at line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: io::Error,
    },
    #[error("failed to create {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("write failed on {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub delimiter: char,
    pub batch_size: usize,
    /// Progress callback period, in physical input lines.
    pub progress_interval: usize,
    /// Batch-buffer relief period, in retained records.
    pub relief_interval: usize,
    pub error_cap: usize,
    pub top_n: usize,
    pub process_field: String,
    pub operation_field: String,
    pub pipeline: PipelineConfig,
    pub cleaned_path: Option<PathBuf>,
    pub archive_path: Option<PathBuf>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            batch_size: DEFAULT_BATCH_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            relief_interval: DEFAULT_RELIEF_INTERVAL,
            error_cap: DEFAULT_ERROR_CAP,
            top_n: DEFAULT_TOP_N,
            process_field: "Process Name".to_string(),
            operation_field: "Operation".to_string(),
            pipeline: PipelineConfig::default(),
            cleaned_path: None,
            archive_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub lines: usize,
    pub records: usize,
    pub retained: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchInfo {
    /// 1-based flush counter.
    pub index: usize,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineError {
    pub line: usize,
    pub message: String,
    /// Offending line, truncated for the report.
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Performance {
    pub started_at: String,
    pub duration_secs: f64,
    pub records_per_sec: f64,
    pub bytes_read: u64,
    pub mb_per_sec: f64,
    pub peak_memory_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionStatistics {
    pub processes: FreqTable,
    pub operations: FreqTable,
    pub results: FreqTable,
    pub top_processes: Vec<CountedValue>,
    pub top_operations: Vec<CountedValue>,
    pub top_results: Vec<CountedValue>,
    pub records_processed: usize,
    pub lines_processed: usize,
    pub batches_processed: usize,
    pub relief_cycles: usize,
    pub performance: Performance,
}

/// Complete outcome of one file's run. Always fully populated: a failed run
/// keeps whatever was accumulated before the failure, with `succeeded` false
/// and the error message set.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub succeeded: bool,
    pub error: Option<String>,
    pub statistics: IngestionStatistics,
    pub post_processing: PipelineSummary,
    /// Result codes for every deduplicated record, successes included; the
    /// full denominator for baseline error rates.
    pub result_breakdown: FreqTable,
    pub errors: Vec<LineError>,
    pub errors_truncated: bool,
}

struct Destination {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Destination {
    fn create(path: &Path) -> Result<Self, IngestError> {
        let file = File::create(path).map_err(|e| IngestError::Create {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Self { path: path.to_path_buf(), writer: BufWriter::with_capacity(WRITE_BUFFER_BYTES, file) })
    }

    fn write_line(&mut self, line: &str) -> Result<(), IngestError> {
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .map_err(|e| IngestError::Write { path: self.path.display().to_string(), source: e })
    }

    fn flush(&mut self) -> Result<(), IngestError> {
        self.writer
            .flush()
            .map_err(|e| IngestError::Write { path: self.path.display().to_string(), source: e })
    }
}

struct Accumulator {
    pipeline: Pipeline,
    stats: StatsAggregator,
    result_breakdown: FreqTable,
    result_field: String,
    errors: Vec<LineError>,
    errors_truncated: bool,
    lines: usize,
    records: usize,
    batches: usize,
    relief_cycles: usize,
    retained_at_relief: usize,
    bytes_read: u64,
    cleaned: Option<Destination>,
    archive: Option<Destination>,
}

impl Accumulator {
    fn new(opts: &IngestOptions) -> Self {
        let mut stats = StatsAggregator::default();
        stats.process_field = opts.process_field.clone();
        stats.operation_field = opts.operation_field.clone();
        stats.result_field = opts.pipeline.result_field.clone();
        Self {
            pipeline: Pipeline::new(opts.pipeline.clone()),
            stats,
            result_breakdown: FreqTable::default(),
            result_field: opts.pipeline.result_field.clone(),
            errors: Vec::new(),
            errors_truncated: false,
            lines: 0,
            records: 0,
            batches: 0,
            relief_cycles: 0,
            retained_at_relief: 0,
            bytes_read: 0,
            cleaned: None,
            archive: None,
        }
    }

    fn record_line_error(&mut self, line: usize, message: String, content: &str, cap: usize) {
        if self.errors.len() >= cap {
            // tracking stops at the cap; nothing is evicted
            self.errors_truncated = true;
            return;
        }
        self.errors.push(LineError {
            line,
            message,
            content: content.chars().take(ERROR_CONTEXT_CHARS).collect(),
        });
    }

    fn observe_result(&mut self, record: &Record) {
        if let Some(v) = record.get(&self.result_field) {
            self.result_breakdown.observe(v);
        }
    }

    fn finalize(
        mut self,
        outcome: Result<(), IngestError>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        top_n: usize,
    ) -> IngestReport {
        // best-effort close of destination streams on every path
        if let Some(d) = &mut self.cleaned {
            let _ = d.flush();
        }
        if let Some(d) = &mut self.archive {
            let _ = d.flush();
        }
        let duration_secs = elapsed.as_secs_f64();
        let records_per_sec =
            if duration_secs > 0.0 { self.records as f64 / duration_secs } else { 0.0 };
        // bytes actually read, so a run that dies mid-file reports the
        // throughput it achieved rather than the whole file's size
        let mb = self.bytes_read as f64 / (1024.0 * 1024.0);
        let mb_per_sec = if duration_secs > 0.0 { mb / duration_secs } else { 0.0 };
        let performance = Performance {
            started_at: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_secs,
            records_per_sec,
            bytes_read: self.bytes_read,
            mb_per_sec,
            peak_memory_bytes: peak_rss_bytes(),
        };
        let statistics = IngestionStatistics {
            top_processes: self.stats.by_process.top_n(top_n),
            top_operations: self.stats.by_operation.top_n(top_n),
            top_results: self.stats.by_result.top_n(top_n),
            processes: self.stats.by_process,
            operations: self.stats.by_operation,
            results: self.stats.by_result,
            records_processed: self.records,
            lines_processed: self.lines,
            batches_processed: self.batches,
            relief_cycles: self.relief_cycles,
            performance,
        };
        IngestReport {
            succeeded: outcome.is_ok(),
            error: outcome.err().map(|e| e.to_string()),
            statistics,
            post_processing: self.pipeline.into_summary(),
            result_breakdown: self.result_breakdown,
            errors: self.errors,
            errors_truncated: self.errors_truncated,
        }
    }
}

/// Streaming engine for one delimited trace file: header, batched record
/// flow through the pipeline, statistics for retained records, bounded error
/// capture, periodic progress, and the two destination streams.
pub struct Ingestor<'a> {
    opts: IngestOptions,
    on_progress: Option<Box<dyn FnMut(&Progress) + 'a>>,
    on_batch: Option<Box<dyn FnMut(&BatchInfo) + 'a>>,
}

impl<'a> Ingestor<'a> {
    pub fn new(opts: IngestOptions) -> Self {
        Self { opts, on_progress: None, on_batch: None }
    }

    pub fn on_progress(mut self, hook: impl FnMut(&Progress) + 'a) -> Self {
        self.on_progress = Some(Box::new(hook));
        self
    }

    pub fn on_batch(mut self, hook: impl FnMut(&BatchInfo) + 'a) -> Self {
        self.on_batch = Some(Box::new(hook));
        self
    }

    /// Process one file end to end. Never panics and never loses partial
    /// work: fatal errors surface in the report next to whatever statistics
    /// were accumulated before the failure.
    pub fn run(&mut self, path: &Path) -> IngestReport {
        let started = Instant::now();
        let started_at = Utc::now();
        let mut acc = Accumulator::new(&self.opts);
        let outcome = self.stream(path, &mut acc);
        acc.finalize(outcome, started_at, started.elapsed(), self.opts.top_n)
    }

    fn stream(&mut self, path: &Path, acc: &mut Accumulator) -> Result<(), IngestError> {
        let file = File::open(path)
            .map_err(|e| IngestError::Open { path: path.display().to_string(), source: e })?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, file);

        if let Some(p) = &self.opts.cleaned_path {
            acc.cleaned = Some(Destination::create(p)?);
        }
        if let Some(p) = &self.opts.archive_path {
            acc.archive = Some(Destination::create(p)?);
        }

        let mut assembler = LineAssembler::new(self.opts.delimiter);
        let mut header: Option<Arc<Vec<String>>> = None;
        let mut batch: Vec<Record> = Vec::with_capacity(self.opts.batch_size);
        let mut raw = String::new();

        loop {
            raw.clear();
            let n = reader
                .read_line(&mut raw)
                .map_err(|e| IngestError::Read { line: acc.lines + 1, source: e })?;
            if n == 0 {
                break;
            }
            acc.lines += 1;
            acc.bytes_read += n as u64;
            let physical = raw.trim_end_matches(&['\r', '\n'][..]);
            let had_header = header.is_some();
            for entry in assembler.push(physical) {
                self.handle_entry(&entry, &mut header, &mut batch, acc)?;
            }
            if !had_header {
                if let Some(columns) = &header {
                    assembler.set_max_fields(columns.len());
                }
            }
            if self.opts.progress_interval > 0 && acc.lines % self.opts.progress_interval == 0 {
                if let Some(hook) = &mut self.on_progress {
                    hook(&Progress {
                        lines: acc.lines,
                        records: acc.records,
                        retained: acc.pipeline.summary().retained,
                    });
                }
            }
        }
        for entry in assembler.finish() {
            self.handle_entry(&entry, &mut header, &mut batch, acc)?;
        }
        if header.is_none() {
            return Err(IngestError::EmptyFile(path.display().to_string()));
        }
        // drain the final partial batch exactly like a full one
        self.flush_batch(acc, &mut batch)?;
        if let Some(d) = &mut acc.cleaned {
            d.flush()?;
        }
        if let Some(d) = &mut acc.archive {
            d.flush()?;
        }
        Ok(())
    }

    fn handle_entry(
        &mut self,
        entry: &LogicalLine,
        header: &mut Option<Arc<Vec<String>>>,
        batch: &mut Vec<Record>,
        acc: &mut Accumulator,
    ) -> Result<(), IngestError> {
        let Some(columns) = header else {
            let line = parser::strip_bom(&entry.text);
            if line.trim().is_empty() {
                return Err(IngestError::EmptyHeader);
            }
            let fields = parser::split_line(line, self.opts.delimiter);
            let row = parser::write_row(&fields, self.opts.delimiter);
            if let Some(d) = &mut acc.cleaned {
                d.write_line(&row)?;
            }
            if let Some(d) = &mut acc.archive {
                d.write_line(&row)?;
            }
            *header = Some(Arc::new(fields));
            return Ok(());
        };
        if entry.text.trim().is_empty() {
            return Ok(());
        }
        let values = parser::split_line(&entry.text, self.opts.delimiter);
        match Record::new(columns.clone(), values) {
            Ok(record) => {
                batch.push(record);
                if batch.len() >= self.opts.batch_size {
                    self.flush_batch(acc, batch)?;
                }
            }
            Err(e) => {
                // entry.line is where the record started, not where the
                // last joined physical line landed
                acc.record_line_error(entry.line, e.to_string(), &entry.text, self.opts.error_cap);
            }
        }
        Ok(())
    }

    fn flush_batch(&mut self, acc: &mut Accumulator, batch: &mut Vec<Record>) -> Result<(), IngestError> {
        if batch.is_empty() {
            return Ok(());
        }
        let size = batch.len();
        for mut record in batch.drain(..) {
            let outcome = acc.pipeline.process(&mut record);
            acc.records += 1;
            match outcome {
                Outcome::Retained => {
                    acc.stats.observe(&record);
                    acc.observe_result(&record);
                    if let Some(d) = &mut acc.cleaned {
                        d.write_line(&parser::write_row(record.values(), self.opts.delimiter))?;
                    }
                }
                Outcome::ArchivedSuccess => {
                    acc.observe_result(&record);
                    if let Some(d) = &mut acc.archive {
                        d.write_line(&parser::write_row(record.values(), self.opts.delimiter))?;
                    }
                }
                Outcome::DroppedDuplicate | Outcome::DroppedInvalid => {}
            }
        }
        acc.batches += 1;
        if let Some(hook) = &mut self.on_batch {
            hook(&BatchInfo { index: acc.batches, size });
        }
        let retained = acc.pipeline.summary().retained;
        if self.opts.relief_interval > 0 && retained - acc.retained_at_relief >= self.opts.relief_interval
        {
            // the original's periodic GC hint becomes buffer reuse here
            batch.shrink_to(self.opts.batch_size);
            acc.relief_cycles += 1;
            acc.retained_at_relief = retained;
        }
        Ok(())
    }
}

/// One-shot convenience over `Ingestor` with no hooks.
pub fn ingest_file(path: &Path, opts: IngestOptions) -> IngestReport {
    Ingestor::new(opts).run(path)
}

#[cfg(target_os = "linux")]
fn peak_rss_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmHWM:") {
            let kb: u64 = rest.trim().strip_suffix("kB")?.trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn peak_rss_bytes() -> Option<u64> {
    None
}
