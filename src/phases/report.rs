//! Phase 4: Report
//!
//! Renders the matrix results: errors first, then the logs of failed runs
//! (every run's log when verbose), then one table row per run.
//!
//! ```text
//! ok    example.com/m  v0.4.3  0.912s
//! FAIL  example.com/m  v0.5.0  1.044s  +14.474%  v0.4.3
//! ```
//!
//! The last two columns compare each run's duration with the first run of
//! the same module, and are blank on that first run.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use super::{Outcome, TestResult};
use crate::error::{Error, Result};
use crate::output::{paint, OutputConfig, Tone};

#[derive(Debug, Clone)]
pub struct Report {
    results: Vec<TestResult>,
}

fn percent_change(base: Duration, now: Duration) -> f64 {
    let base = base.as_secs_f64();
    if base == 0.0 {
        return 0.0;
    }
    (now.as_secs_f64() - base) / base * 100.0
}

impl Report {
    pub fn new(results: Vec<TestResult>) -> Self {
        Self { results }
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.passed()).count()
    }

    /// `Err(TestsFailed)` when any run failed or errored.
    pub fn verdict(&self) -> Result<()> {
        if self.failures() > 0 {
            Err(Error::TestsFailed)
        } else {
            Ok(())
        }
    }

    pub fn render(&self, config: &OutputConfig, verbose: bool) -> String {
        let mut out = String::new();
        for r in &self.results {
            if let Outcome::Errored(message) = &r.outcome {
                let _ = writeln!(
                    out,
                    "{} {} at {}: {}",
                    paint(config, "error:", Tone::Fail),
                    r.module,
                    r.requested,
                    message
                );
            }
        }
        for r in &self.results {
            if (verbose || r.outcome == Outcome::Failed) && !r.log.is_empty() {
                out.push_str(&r.log);
                if !r.log.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
        out.push_str(&self.table(config));
        out
    }

    fn table(&self, config: &OutputConfig) -> String {
        let mut first: HashMap<&str, &TestResult> = HashMap::new();
        for r in &self.results {
            first.entry(r.module.as_str()).or_insert(r);
        }
        let rows: Vec<_> = self
            .results
            .iter()
            .map(|r| {
                let base = first[r.module.as_str()];
                let (delta, base_version) = if std::ptr::eq(base, r) {
                    (String::new(), "")
                } else {
                    (
                        format!("{:+.3}%", percent_change(base.duration, r.duration)),
                        base.resolved.as_str(),
                    )
                };
                (r, format!("{:.3}s", r.duration.as_secs_f64()), delta, base_version)
            })
            .collect();
        let module_w = rows.iter().map(|row| row.0.module.len()).max().unwrap_or(0);
        let version_w = rows.iter().map(|row| row.0.resolved.len()).max().unwrap_or(0);
        let time_w = rows.iter().map(|row| row.1.len()).max().unwrap_or(0);
        let delta_w = rows.iter().map(|row| row.2.len()).max().unwrap_or(0);

        let mut out = String::new();
        for (r, time, delta, base_version) in &rows {
            let status = if r.passed() {
                paint(config, "ok  ", Tone::Pass)
            } else {
                paint(config, "FAIL", Tone::Fail)
            };
            let base_version = if base_version.is_empty() {
                String::new()
            } else {
                paint(config, base_version, Tone::Muted)
            };
            let line = format!(
                "{status}  {:<module_w$}  {:<version_w$}  {:>time_w$}  {:>delta_w$}  {}",
                r.module, r.resolved, time, delta, base_version,
            );
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(module: &str, version: &str, outcome: Outcome, millis: u64, log: &str) -> TestResult {
        TestResult {
            module: module.to_string(),
            requested: version.to_string(),
            resolved: version.to_string(),
            outcome,
            log: log.to_string(),
            duration: Duration::from_millis(millis),
        }
    }

    #[test]
    fn test_percent_change() {
        assert_eq!(percent_change(Duration::ZERO, Duration::from_secs(1)), 0.0);
        let d = percent_change(Duration::from_millis(1000), Duration::from_millis(1250));
        assert!((d - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_table_rows() {
        let report = Report::new(vec![
            result("example.com/m", "v0.1.0", Outcome::Passed, 1000, ""),
            result("example.com/m", "v0.2.0", Outcome::Failed, 1500, "--- FAIL: x\n"),
            result("other", "v0.1.0", Outcome::Passed, 200, ""),
        ]);
        let text = report.render(&OutputConfig::plain(), false);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "--- FAIL: x");
        assert_eq!(
            lines[1],
            "ok    example.com/m  v0.1.0  1.000s"
        );
        assert_eq!(
            lines[2],
            "FAIL  example.com/m  v0.2.0  1.500s  +50.000%  v0.1.0"
        );
        assert_eq!(
            lines[3],
            "ok    other          v0.1.0  0.200s"
        );
    }

    #[test]
    fn test_errors_printed_once_and_verdict() {
        let report = Report::new(vec![result(
            "m",
            "v9.9.9",
            Outcome::Errored("no such release".to_string()),
            0,
            "",
        )]);
        let text = report.render(&OutputConfig::plain(), true);
        assert_eq!(text.matches("no such release").count(), 1);
        assert!(text.starts_with("error: m at v9.9.9: no such release\n"));
        assert!(report.verdict().unwrap_err().is_tests_failed());
    }

    #[test]
    fn test_passing_logs_only_when_verbose() {
        let report = Report::new(vec![result("m", "v0.1.0", Outcome::Passed, 10, "--- PASS: m/a/v0.1.0\n")]);
        assert!(!report
            .render(&OutputConfig::plain(), false)
            .contains("--- PASS"));
        assert!(report
            .render(&OutputConfig::plain(), true)
            .contains("--- PASS"));
        assert!(report.verdict().is_ok());
    }
}
