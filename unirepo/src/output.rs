//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.

use anyhow::Result;
use serde::Serialize;
use std::io::{self, Write};
use unirepo_core::{
    CheckReport, CheckStatus, DeflateReport, DeflateStatus, ExportReport, InflateReport,
    InflateStatus, PruneReport, StoreReport, StoreStatus, UsageReport, format_watermark,
};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    /// Create a new OutputWriter.
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    /// Write output using the configured format.
    ///
    /// The `data` parameter must be a serializable struct that includes
    /// `success: bool` and `result_code: u8` fields.
    ///
    /// The `text_fn` closure is called only in text mode to generate the
    /// human-readable output.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write an error message to stderr.
    ///
    /// In JSON mode, writes a JSON error object with success=false.
    /// In text mode, writes the error message directly.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

/// Error output structure.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// Output for `init` command.
#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub result_code: u8,
    pub root: String,
    pub algorithm: String,
}

/// Output for commands that return a core report, flattened next to the status fields.
#[derive(Debug, Serialize)]
pub struct ReportOutput<'a, T: Serialize> {
    pub success: bool,
    pub result_code: u8,
    #[serde(flatten)]
    pub report: &'a T,
}

impl<'a, T: Serialize> ReportOutput<'a, T> {
    pub fn ok(report: &'a T) -> Self {
        Self {
            success: true,
            result_code: 0,
            report,
        }
    }
}

/// Output for `collect` command.
#[derive(Debug, Serialize)]
pub struct CollectOutput<'a> {
    pub success: bool,
    pub result_code: u8,
    pub consumers: usize,
    pub skipped: usize,
    pub entries: usize,
    pub unique_digests: usize,
    pub dependencies: &'a [unirepo_core::UsageEntry],
}

impl<'a> CollectOutput<'a> {
    pub fn new(report: &'a UsageReport) -> Self {
        Self {
            success: true,
            result_code: 0,
            consumers: report.consumers,
            skipped: report.skipped,
            entries: report.entries.len(),
            unique_digests: report.unique_digests(),
            dependencies: &report.entries,
        }
    }
}

// ============================================================================
// Text renderings
// ============================================================================

pub fn store_text(report: &StoreReport) -> String {
    let mut out = String::new();
    for file in &report.files {
        match file.status {
            StoreStatus::Linked => {
                out.push_str(&format!("{} {}\n", file.hash, file.path.display()));
            }
            StoreStatus::Conflict { registered } => {
                out.push_str(&format!(
                    "conflict {} (registered {}, current {})\n",
                    file.path.display(),
                    registered,
                    file.hash
                ));
            }
        }
    }
    for failure in &report.failures {
        out.push_str(&format!("failed {}: {}\n", failure.path.display(), failure.error));
    }
    out.push_str(&format!(
        "Stored {} files ({} new objects), {} conflicts, {} links skipped, {} failures\n",
        report.linked(),
        report.created(),
        report.conflicts(),
        report.skipped.len(),
        report.failures.len()
    ));
    out
}

pub fn inflate_text(report: &InflateReport) -> String {
    if !report.registry_found {
        return format!("No dependency registry in {}\n", report.consumer.display());
    }
    let mut out = String::new();
    for item in &report.items {
        match item.status {
            InflateStatus::Linked => out.push_str(&format!("linked {}\n", item.filename)),
            InflateStatus::MissingObject => {
                out.push_str(&format!("missing object for {}\n", item.filename))
            }
            InflateStatus::AlreadyPresent => {}
        }
    }
    out.push_str(&format!(
        "Linked {}, already present {}, missing objects {}\n",
        report.count(InflateStatus::Linked),
        report.count(InflateStatus::AlreadyPresent),
        report.count(InflateStatus::MissingObject)
    ));
    out
}

pub fn deflate_text(report: &DeflateReport) -> String {
    if !report.registry_found {
        return format!("No dependency registry in {}\n", report.consumer.display());
    }
    let mut out = String::new();
    for item in &report.items {
        match item.status {
            DeflateStatus::Removed => out.push_str(&format!("removed {}\n", item.filename)),
            DeflateStatus::NotALink => {
                out.push_str(&format!("not a link, kept {}\n", item.filename))
            }
            DeflateStatus::Missing => {}
        }
    }
    out.push_str(&format!(
        "Removed {}, not links {}, missing {}\n",
        report.count(DeflateStatus::Removed),
        report.count(DeflateStatus::NotALink),
        report.count(DeflateStatus::Missing)
    ));
    out
}

pub fn check_text(report: &CheckReport) -> String {
    let mut out = String::new();
    for consumer in &report.consumers {
        out.push_str(&format!("{}\n", consumer.consumer.display()));
        if let Some(error) = &consumer.error {
            out.push_str(&format!("  error: {}\n", error));
            continue;
        }
        if !consumer.registry_found {
            out.push_str("  no dependency registry\n");
            continue;
        }
        for result in &consumer.results {
            out.push_str(&format!("  {:<8} {}", result.status.as_str(), result.filename));
            match result.status {
                CheckStatus::Invalid | CheckStatus::Repaired | CheckStatus::Dropped => {
                    out.push_str(&format!(" (registered {}", result.registered));
                    if let Some(current) = result.current {
                        out.push_str(&format!(", current {}", current));
                    }
                    out.push(')');
                }
                CheckStatus::Stored => {
                    if let Some(current) = result.current {
                        out.push_str(&format!(" (now {})", current));
                    }
                }
                CheckStatus::Valid | CheckStatus::Missing => {}
            }
            if let Some(detail) = &result.detail {
                out.push_str(&format!(": {}", detail));
            }
            out.push('\n');
        }
    }

    let s = &report.summary;
    out.push_str(&format!(
        "Checked {} files in {} directories: {} valid, {} invalid, {} missing",
        report.files_checked(),
        report.consumers.len(),
        s.valid,
        s.invalid,
        s.missing
    ));
    for (count, label) in [(s.repaired, "repaired"), (s.dropped, "dropped"), (s.stored, "stored")] {
        if count > 0 {
            out.push_str(&format!(", {} {}", count, label));
        }
    }
    out.push('\n');
    out
}

pub fn collect_text(report: &UsageReport) -> String {
    let mut out = String::new();
    for entry in &report.entries {
        out.push_str(&format!(
            "{} {}\n",
            entry.hash,
            entry.consumer.join(&entry.filename).display()
        ));
    }
    out.push_str(&format!(
        "{} dependencies in {} directories, {} unique digests\n",
        report.entries.len(),
        report.consumers,
        report.unique_digests()
    ));
    out
}

pub fn prune_text(report: &PruneReport) -> String {
    let mut out = String::new();
    for orphan in &report.orphans {
        out.push_str(&format!("{} {}\n", orphan.size, orphan.path.display()));
    }
    for failure in &report.failures {
        out.push_str(&format!("failed {}: {}\n", failure.path.display(), failure.error));
    }
    if report.dry_run {
        out.push_str("Dry run - no objects deleted\n");
        out.push_str(&format!(
            "Would delete {} of {} objects\n",
            report.orphans.len(),
            report.scanned
        ));
        out.push_str(&format!("Would free {} bytes\n", report.orphan_bytes()));
    } else {
        out.push_str(&format!(
            "Deleted {} of {} objects\n",
            report.deleted, report.scanned
        ));
        out.push_str(&format!("Freed {} bytes\n", report.bytes_freed));
    }
    out
}

pub fn export_text(report: &ExportReport) -> String {
    let mut out = String::new();
    for path in &report.exported {
        out.push_str(&format!("{}\n", path.display()));
    }
    for failure in &report.failures {
        out.push_str(&format!("failed {}: {}\n", failure.path.display(), failure.error));
    }
    if let Some(previous) = &report.previous_watermark {
        out.push_str(&format!("Previous export: {}\n", format_watermark(previous)));
    }
    out.push_str(&format!(
        "Exported {} of {} objects to {} ({} already exported, {} failed)\n",
        report.exported.len(),
        report.scanned,
        report.output.display(),
        report.skipped,
        report.failures.len()
    ));
    out.push_str(&format!("Watermark: {}\n", format_watermark(&report.watermark)));
    out
}
