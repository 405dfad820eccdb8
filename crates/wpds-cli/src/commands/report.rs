use std::fmt::Write;
use std::time::Duration;

use wpds::{BatchSummary, CatalogKind, RunReport, StatsSummary, SyncMode, SyncOutcome};

/// Failed slugs listed individually before collapsing to a count.
const MAX_LISTED_FAILURES: usize = 10;

pub fn print_outcome(kind: CatalogKind, outcome: &SyncOutcome, stats: &StatsSummary) {
    print!("{}", render(kind, outcome, stats));
}

pub fn render(kind: CatalogKind, outcome: &SyncOutcome, stats: &StatsSummary) -> String {
    match outcome {
        SyncOutcome::UpToDate { current, latest } if current == latest => {
            format!("{kind} already up to date at revision {current}.\n")
        }
        SyncOutcome::UpToDate { current, latest } => format!(
            "{kind} already up to date: local revision {current} is ahead of remote {latest}.\n"
        ),
        SyncOutcome::Completed(report) => render_report(report, stats),
    }
}

fn render_report(report: &RunReport, stats: &StatsSummary) -> String {
    let mut out = String::new();

    let _ = match (report.mode, report.from_position) {
        (SyncMode::Resume, Some(from)) => writeln!(
            out,
            "Updated {} from revision {from} to {}.",
            report.kind, report.to_position
        ),
        _ => writeln!(
            out,
            "Fetched {} at revision {}.",
            report.kind, report.to_position
        ),
    };

    let _ = writeln!(out, "  {}", batch_line("Downloaded", &report.main));
    if let Some(retry) = &report.retry {
        let _ = writeln!(out, "  {}", batch_line("Retried", retry));
    }
    let _ = writeln!(
        out,
        "  {} transferred in {}",
        human_bytes(stats.bytes),
        human_duration(stats.elapsed)
    );

    if report.is_partial() {
        let failed = report
            .retry
            .as_ref()
            .map_or(&report.main.failed, |retry| &retry.failed);
        let _ = writeln!(
            out,
            "{} {} failed and will be retried on the next run{}",
            report.pending_failures,
            plural(report.pending_failures),
            failure_list(failed)
        );
    }

    out
}

fn batch_line(verb: &str, batch: &BatchSummary) -> String {
    let mut line = format!(
        "{verb} {} of {} {}",
        batch.succeeded,
        batch.attempted,
        plural(batch.attempted)
    );
    if batch.failure_count() > 0 {
        let _ = write!(line, " ({} failed)", batch.failure_count());
    }
    line
}

fn failure_list(failed: &[wpds::CatalogItem]) -> String {
    if failed.is_empty() {
        return ".".into();
    }

    let mut names: Vec<&str> = failed.iter().map(|i| i.as_str()).collect();
    names.sort_unstable();

    let shown = names
        .iter()
        .take(MAX_LISTED_FAILURES)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    if names.len() > MAX_LISTED_FAILURES {
        format!(": {shown}, and {} more.", names.len() - MAX_LISTED_FAILURES)
    } else {
        format!(": {shown}.")
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "item" } else { "items" }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}

fn human_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}
