use procsift::ingest::{ingest_file, IngestOptions, Ingestor};
use procsift::parser::split_line;
use procsift::patterns::{analyze, PatternKind, NEUTRAL_CONFIDENCE};
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

const HEADER: &str = "Time of Day,Process Name,PID,Operation,Path,Result";

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("procsift-{}-{}", std::process::id(), name))
}

fn write_input(name: &str, content: &str) -> PathBuf {
    let path = temp_path(name);
    fs::write(&path, content).unwrap();
    path
}

fn row(time: &str, process: &str, path: &str, result: &str) -> String {
    format!("{time},{process},100,ReadFile,{path},{result}")
}

#[test]
fn ingests_a_small_file_end_to_end() {
    let input = write_input(
        "basic.csv",
        &format!(
            "{HEADER}\n{}\n{}\n{}\n",
            row("10:00:00", "cmd.exe", r"C:\a", "ACCESS DENIED"),
            row("10:00:01", "cmd.exe", r"C:\b", "NAME NOT FOUND"),
            row("10:00:02", "svchost.exe", r"C:\c", "ACCESS DENIED"),
        ),
    );
    let report = ingest_file(&input, IngestOptions::default());
    let _ = fs::remove_file(&input);

    assert!(report.succeeded);
    assert!(report.error.is_none());
    assert_eq!(report.post_processing.retained, 3);
    assert_eq!(report.statistics.records_processed, 3);
    assert_eq!(report.statistics.lines_processed, 4);
    assert_eq!(report.statistics.batches_processed, 1);
    assert_eq!(report.statistics.processes.get("cmd.exe"), 2);
    assert_eq!(report.statistics.operations.get("ReadFile"), 3);
    assert_eq!(report.statistics.results.get("ACCESS DENIED"), 2);
    assert_eq!(report.statistics.top_processes[0].value, "cmd.exe");
    assert!(report.statistics.performance.duration_secs >= 0.0);
}

#[test]
fn duplicate_rows_are_removed_once() {
    let dup = row("10:00:00", "cmd.exe", r"C:\a", "ACCESS DENIED");
    let input = write_input("dedup.csv", &format!("{HEADER}\n{dup}\n{dup}\n"));
    let report = ingest_file(&input, IngestOptions::default());
    let _ = fs::remove_file(&input);

    assert_eq!(report.post_processing.retained, 1);
    assert_eq!(report.post_processing.dropped_duplicate, 1);
}

#[test]
fn rerunning_the_same_file_is_deterministic() {
    let mut content = format!("{HEADER}\n");
    for i in 0..50 {
        content.push_str(&row("10:00:00", "cmd.exe", &format!(r"C:\p{i}"), "ACCESS DENIED"));
        content.push('\n');
    }
    let input = write_input("determinism.csv", &content);
    let first = ingest_file(&input, IngestOptions::default());
    let second = ingest_file(&input, IngestOptions::default());
    let _ = fs::remove_file(&input);

    assert_eq!(first.post_processing, second.post_processing);
    assert_eq!(first.statistics.processes, second.statistics.processes);
}

#[test]
fn success_noise_is_archived_and_kept_out_of_statistics() {
    let mut content = format!("{HEADER}\n");
    for i in 0..100 {
        content.push_str(&row("10:00:00", "cmd.exe", &format!(r"C:\s{i}"), "SUCCESS"));
        content.push('\n');
    }
    for i in 0..10 {
        content.push_str(&row("10:00:01", "cmd.exe", &format!(r"C:\d{i}"), "ACCESS DENIED"));
        content.push('\n');
    }
    let input = write_input("success-filter.csv", &content);
    let report = ingest_file(&input, IngestOptions::default());
    let _ = fs::remove_file(&input);

    assert_eq!(report.post_processing.archived_success, 100);
    assert_eq!(report.post_processing.retained, 10);
    assert_eq!(report.post_processing.filtered_results.get("SUCCESS"), Some(&100));
    // retained-only statistics exclude the successes
    assert_eq!(report.statistics.results.get("SUCCESS"), 0);
    // the raw breakdown keeps them for baseline math
    assert_eq!(report.result_breakdown.get("SUCCESS"), 100);
    assert_eq!(report.result_breakdown.get("ACCESS DENIED"), 10);

    // 10 denied results stay under the security-pattern threshold
    let analysis = analyze(
        &report.statistics.processes,
        &report.statistics.operations,
        &report.result_breakdown,
    );
    assert!(!analysis.detected_patterns.iter().any(|p| p.kind == PatternKind::Security));
}

#[test]
fn header_only_file_succeeds_with_zero_counts() {
    let input = write_input("empty.csv", &format!("{HEADER}\n"));
    let report = ingest_file(&input, IngestOptions::default());
    let _ = fs::remove_file(&input);

    assert!(report.succeeded);
    assert_eq!(report.statistics.records_processed, 0);
    assert_eq!(report.post_processing.total(), 0);

    let analysis = analyze(
        &report.statistics.processes,
        &report.statistics.operations,
        &report.result_breakdown,
    );
    assert!(analysis.clusters.is_empty());
    assert_eq!(analysis.overall_confidence, NEUTRAL_CONFIDENCE);
}

#[test]
fn missing_file_fails_but_returns_a_report() {
    let report = ingest_file(&temp_path("does-not-exist.csv"), IngestOptions::default());
    assert!(!report.succeeded);
    assert!(report.error.as_deref().unwrap().contains("failed to open"));
    assert_eq!(report.statistics.records_processed, 0);
}

#[test]
fn zero_byte_file_fails_with_header_error() {
    let input = write_input("zero.csv", "");
    let report = ingest_file(&input, IngestOptions::default());
    let _ = fs::remove_file(&input);

    assert!(!report.succeeded);
    assert!(report.error.as_deref().unwrap().contains("no header"));
}

#[test]
fn malformed_lines_are_logged_and_skipped() {
    let input = write_input(
        "malformed.csv",
        &format!(
            "{HEADER}\nshort,line\n{}\n",
            row("10:00:00", "cmd.exe", r"C:\a", "ACCESS DENIED")
        ),
    );
    let report = ingest_file(&input, IngestOptions::default());
    let _ = fs::remove_file(&input);

    assert!(report.succeeded);
    assert_eq!(report.post_processing.retained, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].line, 2);
    assert!(report.errors[0].message.contains("field count mismatch"));
    assert_eq!(report.errors[0].content, "short,line");
}

#[test]
fn error_log_stops_at_the_cap() {
    let input = write_input("cap.csv", &format!("{HEADER}\nbad\nbad,line\nworse\n"));
    let opts = IngestOptions { error_cap: 2, ..IngestOptions::default() };
    let report = ingest_file(&input, opts);
    let _ = fs::remove_file(&input);

    assert_eq!(report.errors.len(), 2);
    assert!(report.errors_truncated);
}

#[test]
fn bom_header_is_tolerated() {
    let input = write_input(
        "bom.csv",
        &format!(
            "\u{feff}{HEADER}\n{}\n",
            row("10:00:00", "cmd.exe", r"C:\a", "ACCESS DENIED")
        ),
    );
    let report = ingest_file(&input, IngestOptions::default());
    let _ = fs::remove_file(&input);

    assert_eq!(report.statistics.processes.get("cmd.exe"), 1);
}

#[test]
fn destination_streams_split_retained_and_archived() {
    let input = write_input(
        "split.csv",
        &format!(
            "{HEADER}\n{}\n{}\n10:00:02,quote.exe,100,ReadFile,\"C:\\with,comma\",ACCESS DENIED\n",
            row("10:00:00", "cmd.exe", r"C:\a", "SUCCESS"),
            row("10:00:01", "cmd.exe", r"C:\b", "ACCESS DENIED"),
        ),
    );
    let cleaned = temp_path("split-cleaned.csv");
    let archive = temp_path("split-archive.csv");
    let opts = IngestOptions {
        cleaned_path: Some(cleaned.clone()),
        archive_path: Some(archive.clone()),
        ..IngestOptions::default()
    };
    let report = ingest_file(&input, opts);
    let cleaned_text = fs::read_to_string(&cleaned).unwrap();
    let archive_text = fs::read_to_string(&archive).unwrap();
    let _ = fs::remove_file(&input);
    let _ = fs::remove_file(&cleaned);
    let _ = fs::remove_file(&archive);

    assert!(report.succeeded);
    let cleaned_lines: Vec<&str> = cleaned_text.lines().collect();
    assert_eq!(cleaned_lines[0], HEADER);
    assert_eq!(cleaned_lines.len(), 3); // header + two retained
    let archive_lines: Vec<&str> = archive_text.lines().collect();
    assert_eq!(archive_lines[0], HEADER);
    assert_eq!(archive_lines.len(), 2); // header + one success

    // quoting survives the round trip
    let quoted = cleaned_lines.iter().find(|l| l.contains("quote.exe")).unwrap();
    let fields = split_line(quoted, ',');
    assert_eq!(fields[4], r"C:\with,comma");
}

#[test]
fn quoted_newline_records_survive_ingestion() {
    let input = write_input(
        "multiline.csv",
        &format!(
            "{HEADER}\n10:00:00,cmd.exe,100,ReadFile,\"C:\\line\nbreak\",ACCESS DENIED\n"
        ),
    );
    let report = ingest_file(&input, IngestOptions::default());
    let _ = fs::remove_file(&input);

    assert!(report.succeeded);
    assert_eq!(report.post_processing.retained, 1);
    assert!(report.errors.is_empty());
}

#[test]
fn hooks_observe_progress_and_batches() {
    let mut content = format!("{HEADER}\n");
    for i in 0..5 {
        content.push_str(&row("10:00:00", "cmd.exe", &format!(r"C:\p{i}"), "ACCESS DENIED"));
        content.push('\n');
    }
    let input = write_input("hooks.csv", &content);

    let progress_lines = RefCell::new(Vec::new());
    let batch_sizes = RefCell::new(Vec::new());
    let opts = IngestOptions {
        batch_size: 2,
        progress_interval: 2,
        ..IngestOptions::default()
    };
    let report = Ingestor::new(opts)
        .on_progress(|p| progress_lines.borrow_mut().push(p.lines))
        .on_batch(|b| batch_sizes.borrow_mut().push(b.size))
        .run(&input);
    let _ = fs::remove_file(&input);

    assert!(report.succeeded);
    assert_eq!(batch_sizes.into_inner(), vec![2, 2, 1]);
    assert_eq!(progress_lines.into_inner(), vec![2, 4, 6]);
    assert_eq!(report.statistics.batches_processed, 3);
}

#[test]
fn stray_quote_does_not_swallow_the_rest_of_the_file() {
    let mut content = format!("{HEADER}\n");
    content.push_str("10:00:00,bad\"proc,100,ReadFile,C:\\s,ACCESS DENIED\n");
    for i in 0..20 {
        content.push_str(&row("10:00:01", "cmd.exe", &format!(r"C:\p{i}"), "ACCESS DENIED"));
        content.push('\n');
    }
    let input = write_input("strayquote.csv", &content);
    let report = ingest_file(&input, IngestOptions::default());
    let _ = fs::remove_file(&input);

    assert!(report.succeeded);
    // only the stray-quote row is lost; every following row still lands
    assert_eq!(report.post_processing.retained, 20);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].line, 2);
}

#[test]
fn multiline_entry_errors_point_at_the_starting_line() {
    let content = format!(
        "{HEADER}\n10:00:00,\"cmd\nexe\",ReadFile\n{}\n",
        row("10:00:01", "cmd.exe", r"C:\a", "ACCESS DENIED"),
    );
    let input = write_input("multiline-error.csv", &content);
    let report = ingest_file(&input, IngestOptions::default());
    let _ = fs::remove_file(&input);

    assert!(report.succeeded);
    assert_eq!(report.post_processing.retained, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].line, 2);
    assert!(report.errors[0].content.starts_with("10:00:00,\"cmd"));
}

#[test]
fn throughput_reflects_bytes_actually_read() {
    let content = format!("{HEADER}\n{}\n", row("10:00:00", "cmd.exe", r"C:\a", "ACCESS DENIED"));
    let input = write_input("bytes.csv", &content);
    let report = ingest_file(&input, IngestOptions::default());
    let _ = fs::remove_file(&input);
    assert_eq!(report.statistics.performance.bytes_read, content.len() as u64);

    let missing = ingest_file(&temp_path("does-not-exist.csv"), IngestOptions::default());
    assert!(!missing.succeeded);
    assert_eq!(missing.statistics.performance.bytes_read, 0);
    assert_eq!(missing.statistics.performance.mb_per_sec, 0.0);
}
