//! Markdown report generation
//!
//! This module renders a run report as a human-readable markdown document.

use crate::output::report::{OutputResult, RunReport};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes a run report as markdown
///
/// # Arguments
///
/// * `report` - The run report
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote the report
/// * `Err(OutputError)` - Failed to write the report
pub fn write_markdown_report(report: &RunReport, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_report(report);

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a run report as markdown
pub fn format_markdown_report(report: &RunReport) -> String {
    let mut md = String::new();

    md.push_str("# Gleaner Run Report\n\n");

    md.push_str("## Run Information\n\n");
    if let Some(run_id) = report.run_id {
        md.push_str(&format!("- **Run ID**: {}\n", run_id));
    }
    md.push_str(&format!("- **Source**: {}\n", report.source_id));
    md.push_str(&format!("- **Started**: {}\n", report.started_at.to_rfc3339()));
    md.push_str(&format!("- **Finished**: {}\n", report.finished_at.to_rfc3339()));
    md.push_str(&format!(
        "- **Duration**: {} seconds\n",
        report.duration_seconds()
    ));
    md.push_str(&format!("- **Status**: {}\n", report.status().to_db_string()));
    md.push_str(&format!("- **Config Hash**: {}\n\n", report.config_hash));

    md.push_str("## Totals\n\n");
    md.push_str(&format!("- **Pages Fetched**: {}\n", report.total_pages()));
    md.push_str(&format!("- **Requests Made**: {}\n", report.total_requests()));
    md.push_str(&format!("- **Listings Saved**: {}\n", report.total_saved()));
    md.push_str(&format!("- **Listings Skipped**: {}\n", report.total_skipped()));
    md.push_str(&format!("- **Listings Dropped**: {}\n\n", report.total_dropped()));

    md.push_str("## Sessions\n\n");
    if report.sessions.is_empty() {
        md.push_str("*No sessions ran.*\n\n");
    } else {
        md.push_str("| Query | Outcome | Reason | Pages | Requests | Saved | Skipped | Dropped |\n");
        md.push_str("|-------|---------|--------|-------|----------|-------|---------|---------|\n");
        for session in &report.sessions {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
                session.query,
                session.outcome,
                session.reason.to_string().replace('|', "\\|"),
                session.pages_fetched,
                session.requests_made,
                session.saved,
                session.skipped,
                session.dropped
            ));
        }
        md.push('\n');
    }

    md.push_str("## Challenges\n\n");
    md.push_str(&format!("- **Detected**: {}\n", report.challenges.detected));
    md.push_str(&format!(
        "- **Resolved**: {}\n",
        report.challenges.total_resolved()
    ));
    md.push_str(&format!("- **Failed**: {}\n", report.challenges.failed));
    md.push_str(&format!("- **Skipped**: {}\n\n", report.challenges.skipped));

    if !report.challenges.attempted.is_empty() {
        md.push_str("| Strategy | Attempted | Resolved |\n");
        md.push_str("|----------|-----------|----------|\n");
        for (strategy, attempted) in &report.challenges.attempted {
            let resolved = report.challenges.resolved.get(strategy).unwrap_or(&0);
            md.push_str(&format!("| {} | {} | {} |\n", strategy, attempted, resolved));
        }
        md.push('\n');
    }

    md.push_str("## Egress Pool\n\n");
    md.push_str(&format!("- **Points**: {}\n", report.pool.total));
    md.push_str(&format!("- **Active**: {}\n", report.pool.active));
    md.push_str(&format!("- **Quarantined**: {}\n", report.pool.quarantined));
    md.push_str(&format!(
        "- **Quarantine Events**: {}\n",
        report.pool.quarantine_events
    ));
    md.push_str(&format!("- **Reactivations**: {}\n", report.pool.reactivations));

    md
}
