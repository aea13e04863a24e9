//! Import progress reporting.
//!
//! The feeder calls a [`ProgressSink`] after every batch. The CLI picks a
//! sink from `--progress`; output goes to **stderr** so stdout stays
//! parseable for scripts.

use std::io::Write;
use std::str::FromStr;

use anyhow::bail;
use site_catalog_core::feed::{ProgressReport, ProgressSink};

/// Human-friendly progress: `import  1,500 / 12,000  (+1,480 added, 20 dup, 0 err)  3.2s`.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn report(&self, report: &ProgressReport) {
        let line = format!(
            "import  {} / {}  (+{} added, {} dup, {} err)  {:.1}s\n",
            format_number(report.processed),
            format_number(report.total),
            format_number(report.added_count),
            format_number(report.duplicate_count),
            format_number(report.error_count),
            report.elapsed_ms as f64 / 1000.0
        );
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line.
pub struct JsonProgress;

impl ProgressSink for JsonProgress {
    fn report(&self, report: &ProgressReport) {
        let mut obj = match serde_json::to_value(report) {
            Ok(v) => v,
            Err(_) => return,
        };
        obj["event"] = serde_json::json!("progress");
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _report: &ProgressReport) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human, or JSON.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn sink(&self) -> Box<dyn ProgressSink> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => bail!(
                "Unknown progress mode: '{}'. Must be human, json, or off.",
                other
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn progress_mode_parses() {
        assert_eq!("json".parse::<ProgressMode>().unwrap(), ProgressMode::Json);
        assert_eq!("off".parse::<ProgressMode>().unwrap(), ProgressMode::Off);
        assert!("verbose".parse::<ProgressMode>().is_err());
    }
}
