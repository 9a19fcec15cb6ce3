use anyhow::Context;
use clap::Parser;
use procsift::cache::PatternEngine;
use procsift::ingest::{IngestOptions, Ingestor};
use procsift::pipeline::PipelineConfig;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "procsift", version, about = "Process-monitor trace import and analysis")]
struct Cli {
    /// Input trace file (delimited, first line is the header)
    input: PathBuf,

    /// Write retained records to this file
    #[arg(long)]
    cleaned: Option<PathBuf>,
    /// Write success-filtered records to this file
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Field delimiter
    #[arg(long, default_value_t = ',')]
    delimiter: char,
    #[arg(long = "batch-size", default_value_t = procsift::ingest::DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Top-N size for the frequency summaries
    #[arg(long = "top", default_value_t = procsift::ingest::DEFAULT_TOP_N)]
    top: usize,

    /// Required field (repeatable; replaces the defaults)
    #[arg(long = "required-field")]
    required_field: Vec<String>,
    /// Deduplication field (repeatable; replaces the defaults)
    #[arg(long = "dedup-field")]
    dedup_field: Vec<String>,
    /// Result value treated as uninteresting noise (repeatable)
    #[arg(long = "success-indicator")]
    success_indicator: Vec<String>,

    /// Run pattern analysis on the final statistics
    #[arg(long, default_value_t = false)]
    analyze: bool,
    /// Suppress progress output on stderr
    #[arg(long, short = 'q', default_value_t = false)]
    quiet: bool,
}

#[derive(Serialize)]
struct Output {
    report: procsift::ingest::IngestReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis: Option<procsift::patterns::AnalysisResult>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut pipeline = PipelineConfig::default();
    if !cli.required_field.is_empty() {
        pipeline.required_fields = cli.required_field.clone();
    }
    if !cli.dedup_field.is_empty() {
        pipeline.dedup_fields = cli.dedup_field.clone();
    }
    if !cli.success_indicator.is_empty() {
        pipeline.success_indicators = cli.success_indicator.clone();
    }

    let opts = IngestOptions {
        delimiter: cli.delimiter,
        batch_size: cli.batch_size,
        top_n: cli.top,
        pipeline,
        cleaned_path: cli.cleaned.clone(),
        archive_path: cli.archive.clone(),
        ..IngestOptions::default()
    };

    let quiet = cli.quiet;
    let mut ingestor = Ingestor::new(opts).on_progress(move |p| {
        if !quiet {
            eprintln!("[ingest] lines={} records={} retained={}", p.lines, p.records, p.retained);
        }
    });
    let report = ingestor.run(&cli.input);

    let analysis = cli.analyze.then(|| {
        let mut engine = PatternEngine::default();
        engine.analyze(
            &report.statistics.processes,
            &report.statistics.operations,
            &report.result_breakdown,
        )
    });

    let failed = !report.succeeded;
    let out = Output { report, analysis };
    println!("{}", serde_json::to_string_pretty(&out).context("serializing report")?);

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
