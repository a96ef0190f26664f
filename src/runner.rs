//! Test case and suite execution.
//!
//! A [`TestCase`] goes through Setup, then one Sign+Execute+Verify round per
//! [`Exchange`], then Cleanup.  Cleanup runs whenever setup succeeded; its
//! failure is recorded next to, never instead of, an earlier failure.
//! [`Suite::run`] executes cases strictly one after another.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::errors::Error;
use crate::fixtures::{self, FixtureSet};
use crate::report::{Reporter, SuiteReport};
use crate::request::RequestDescriptor;
use crate::verify::{verify, Expectation};
use crate::Env;

/// Boxed future returned by the object-safe [`TestCase`] hooks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One request under test and the response it must produce.
#[derive(Debug)]
pub struct Exchange {
    pub label: String,
    pub request: RequestDescriptor,
    pub expect: Expectation,
}

impl Exchange {
    pub fn new(label: impl Into<String>, request: RequestDescriptor, expect: Expectation) -> Self {
        Self {
            label: label.into(),
            request,
            expect,
        }
    }
}

/// One conformance check against the server.
pub trait TestCase: Send + Sync {
    fn name(&self) -> &str;

    /// Create the fixtures the exchanges need.
    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>>;

    /// Build the requests under test.  Called once per run of the case and
    /// always returns fresh descriptors.
    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error>;

    /// Remove the fixtures.  Only called when setup succeeded.
    fn cleanup<'a>(
        &'a self,
        env: &'a Env,
        fixtures: &'a FixtureSet,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(fixtures::teardown(env, fixtures))
    }
}

/// Phase of a test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    /// Building, signing and sending a request.
    Request,
    Verify,
    Cleanup,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Request => "request",
            Phase::Verify => "verify",
            Phase::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Terminal state of a test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every phase, cleanup included, succeeded.
    Pass,
    /// The named phase failed first.  `Fail(Cleanup)` means only cleanup failed.
    Fail(Phase),
    /// Setup failed; nothing was sent and cleanup was skipped.
    SetupFailed,
}

impl Verdict {
    /// Label of the failing phase; empty for a pass.
    pub fn phase_label(&self) -> &'static str {
        match self {
            Verdict::Pass => "",
            Verdict::Fail(phase) => phase.label(),
            Verdict::SetupFailed => Phase::Setup.label(),
        }
    }
}

/// Result of one test case.
#[derive(Debug)]
pub struct TestOutcome {
    pub name: String,
    pub verdict: Verdict,
    /// The earliest failure, other than a cleanup failure.
    pub error: Option<Error>,
    /// Cleanup failure, reported alongside `error`.
    pub cleanup_error: Option<Error>,
    pub elapsed: Duration,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

/// Run one case through all its phases.
pub async fn run_case(env: &Env, case: &dyn TestCase) -> TestOutcome {
    let started = Instant::now();
    let name = case.name().to_string();
    debug!("{name}: setup");

    let fixtures = match case.setup(env).await {
        Ok(fixtures) => fixtures,
        Err(error) => {
            warn!("{name}: setup failed: {error}");
            return TestOutcome {
                name,
                verdict: Verdict::SetupFailed,
                error: Some(error),
                cleanup_error: None,
                elapsed: started.elapsed(),
            };
        }
    };

    let primary = run_exchanges(env, case, &fixtures).await;

    debug!("{name}: cleanup");
    let cleanup_error = case.cleanup(env, &fixtures).await.err();
    if let Some(error) = &cleanup_error {
        warn!("{name}: cleanup failed: {error}");
    }

    let (verdict, error) = match primary {
        Err((phase, error)) => (Verdict::Fail(phase), Some(error)),
        Ok(()) if cleanup_error.is_some() => (Verdict::Fail(Phase::Cleanup), None),
        Ok(()) => (Verdict::Pass, None),
    };
    TestOutcome {
        name,
        verdict,
        error,
        cleanup_error,
        elapsed: started.elapsed(),
    }
}

async fn run_exchanges(
    env: &Env,
    case: &dyn TestCase,
    fixtures: &FixtureSet,
) -> Result<(), (Phase, Error)> {
    let exchanges = case
        .exchanges(fixtures)
        .map_err(|error| (Phase::Request, error))?;
    for exchange in exchanges {
        debug!("{}: {}", case.name(), exchange.label);
        let response = env
            .send(exchange.request)
            .await
            .map_err(|error| (Phase::Request, error))?;
        verify(&response, &exchange.expect).map_err(|mismatch| {
            debug!("{}: {} did not match", case.name(), exchange.label);
            (Phase::Verify, Error::from(mismatch))
        })?;
    }
    Ok(())
}

/// The ordered list of cases of one run.
#[derive(Default)]
pub struct Suite {
    cases: Vec<Box<dyn TestCase>>,
    filter: Option<String>,
}

impl Suite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a case; cases run in registration order.
    pub fn register(&mut self, case: Box<dyn TestCase>) -> &mut Self {
        self.cases.push(case);
        self
    }

    /// Only run cases whose name contains `filter` (case-insensitive).
    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter.map(|f| f.to_ascii_lowercase());
        self
    }

    /// Names of the cases that would run.
    pub fn selected(&self) -> Vec<&str> {
        self.selected_cases().map(|c| c.name()).collect()
    }

    fn selected_cases(&self) -> impl Iterator<Item = &dyn TestCase> {
        self.cases
            .iter()
            .map(|c| c.as_ref())
            .filter(|c| match &self.filter {
                Some(filter) => c.name().to_ascii_lowercase().contains(filter),
                None => true,
            })
    }

    /// Run every selected case, one at a time.
    pub async fn run(&self, env: &Env, reporter: &dyn Reporter) -> SuiteReport {
        let started = Instant::now();
        let cases: Vec<&dyn TestCase> = self.selected_cases().collect();
        let total = cases.len();
        info!("running {total} test case(s)");

        let mut outcomes = Vec::with_capacity(total);
        for (i, case) in cases.into_iter().enumerate() {
            reporter.case_started(i + 1, total, case.name());
            let outcome = run_case(env, case).await;
            reporter.case_finished(i + 1, total, &outcome);
            outcomes.push(outcome);
        }

        let report = SuiteReport {
            outcomes,
            elapsed: started.elapsed(),
        };
        info!(
            "{} passed, {} failed in {:.1}s",
            report.passed(),
            report.failed(),
            report.elapsed.as_secs_f64()
        );
        report
    }
}
