//! Progress reporting and the suite summary.

use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::runner::{TestOutcome, Verdict};

/// Sink for per-case progress.
pub trait Reporter: Send + Sync {
    /// Called before case `index` (1-based) of `total` starts.
    fn case_started(&self, _index: usize, _total: usize, _name: &str) {}

    /// Called once the case, including its cleanup, has finished.
    fn case_finished(&self, index: usize, total: usize, outcome: &TestOutcome);
}

/// Writes one line per finished case:
/// `[NN/TT] Name: Passed` or `[NN/TT] Name: Failed (phase): error`.
pub struct ConsoleReporter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl Reporter for ConsoleReporter {
    fn case_finished(&self, index: usize, total: usize, outcome: &TestOutcome) {
        let mut out = self.out.lock().expect("reporter mutex poisoned");
        // A closed stdout is not worth aborting the run for.
        let _ = writeln!(out, "{}", format_line(index, total, outcome));
        if let Some(cleanup) = &outcome.cleanup_error {
            let _ = writeln!(out, "        cleanup: {cleanup}");
        }
        let _ = out.flush();
    }
}

/// The progress line for one finished case.
pub fn format_line(index: usize, total: usize, outcome: &TestOutcome) -> String {
    let width = total.to_string().len().max(2);
    let prefix = format!("[{index:0width$}/{total:0width$}] {}", outcome.name);
    match (&outcome.verdict, &outcome.error) {
        (Verdict::Pass, _) => format!("{prefix}: Passed"),
        (verdict, Some(error)) => format!("{prefix}: Failed ({}): {error}", verdict.phase_label()),
        (verdict, None) => format!("{prefix}: Failed ({})", verdict.phase_label()),
    }
}

/// Every outcome of one run, in execution order.
#[derive(Debug, Default)]
pub struct SuiteReport {
    pub outcomes: Vec<TestOutcome>,
    pub elapsed: Duration,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    /// True when every case passed.
    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    pub fn summary(&self) -> SuiteSummary {
        SuiteSummary {
            total: self.outcomes.len(),
            passed: self.passed(),
            failed: self.failed(),
            elapsed_ms: self.elapsed.as_millis() as u64,
            cases: self.outcomes.iter().map(CaseSummary::from).collect(),
        }
    }
}

/// Machine-readable run summary (`--json`).
#[derive(Debug, Serialize)]
pub struct SuiteSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub cases: Vec<CaseSummary>,
}

#[derive(Debug, Serialize)]
pub struct CaseSummary {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,
    pub elapsed_ms: u64,
}

impl From<&TestOutcome> for CaseSummary {
    fn from(outcome: &TestOutcome) -> Self {
        Self {
            name: outcome.name.clone(),
            passed: outcome.passed(),
            phase: match outcome.verdict {
                Verdict::Pass => None,
                ref verdict => Some(verdict.phase_label()),
            },
            error: outcome.error.as_ref().map(ToString::to_string),
            cleanup_error: outcome.cleanup_error.as_ref().map(ToString::to_string),
            elapsed_ms: outcome.elapsed.as_millis() as u64,
        }
    }
}
