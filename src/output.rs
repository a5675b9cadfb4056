// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use serde::Serialize;
use std::time::Instant;

use crate::report::{ReportEntry, RunReport};

/// Lines of tool output shown for each failed unit.
const OUTPUT_TAIL_LINES: usize = 10;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON documents for scripting
    Json,
}

impl OutputMode {
    pub fn from_flags(quiet: bool, json: bool) -> Self {
        if json {
            OutputMode::Json
        } else if quiet {
            OutputMode::Quiet
        } else {
            OutputMode::Normal
        }
    }
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => {
                println!("{message}");
            }
            OutputMode::Json => self.emit_event("success", message, false),
        }
    }

    /// Print a warning (suppressed in quiet mode).
    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => eprintln!("Warning: {message}"),
            OutputMode::Quiet => {}
            OutputMode::Json => self.emit_event("warning", message, true),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => self.emit_event("error", message, true),
        }
    }

    /// Print any serializable value as pretty JSON.
    pub fn json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error: failed to encode output: {e}"),
        }
    }

    /// Print the final report of a run.
    pub fn report(&self, report: &RunReport) {
        match self.mode {
            OutputMode::Json => self.json(report),
            OutputMode::Quiet => println!("{}", summary_line(report)),
            OutputMode::Normal => {
                for entry in &report.successful {
                    println!("  ✓ {}", entry_line(entry));
                }
                for entry in &report.skipped {
                    println!("  - {}", entry_line(entry));
                }
                for entry in &report.failed {
                    println!("  ✗ {}", entry_line(entry));
                    if let Some(error) = &entry.error {
                        println!("      {error}");
                    }
                    if entry.status.requires_operator()
                        && let Some(location) = &entry.backup_location
                    {
                        println!("      backup kept at {location}; restore manually");
                    }
                    let lines: Vec<&str> = entry.output.lines().collect();
                    for line in &lines[lines.len().saturating_sub(OUTPUT_TAIL_LINES)..] {
                        println!("      | {line}");
                    }
                }
                for entry in report.successful.iter().chain(&report.failed) {
                    for warning in &entry.warnings {
                        eprintln!("Warning: {}", warning.message);
                    }
                }
                println!();
                println!("{}", summary_line(report));
            }
        }
    }

    fn emit_event(&self, event: &str, message: &str, to_stderr: bool) {
        let event = JsonEvent {
            event,
            message,
            duration_secs: if self.start_time.is_some() {
                Some(self.elapsed_secs())
            } else {
                None
            },
        };
        if let Ok(json) = serde_json::to_string(&event) {
            if to_stderr {
                eprintln!("{json}");
            } else {
                println!("{json}");
            }
        }
    }
}

fn entry_line(entry: &ReportEntry) -> String {
    let mut line = format!("{} [{}] {}", entry.unit, entry.shard_key, entry.status);
    if let Some(audit) = &entry.audit_ref {
        line.push_str(&format!(" (audit: {audit})"));
    }
    line
}

fn summary_line(report: &RunReport) -> String {
    let s = &report.summary;
    let mut line = format!(
        "{} units: {} succeeded, {} skipped (locked), {} rolled back, {} failed",
        s.total, s.succeeded, s.skipped_locked, s.rolled_back, s.failed
    );
    for (count, label) in [
        (s.manual_intervention_required, "need manual intervention"),
        (s.pending_migration, "pending migration"),
        (s.policy_rejected, "rejected by policy"),
        (s.cancelled, "cancelled"),
        (s.audit_missing, "missing audit records"),
    ] {
        if count > 0 {
            line.push_str(&format!(", {count} {label}"));
        }
    }
    line.push_str(&format!(" ({:.1}s)", s.duration_secs));
    line
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}
