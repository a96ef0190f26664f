//! s3verify library: conformance tests for S3-compatible servers.
//!
//! The crate signs requests with AWS Signature V4, sends them to the server
//! under test, and checks the responses against expectations.  Fixtures
//! (buckets, objects, multipart uploads) are created concurrently through
//! the [`orchestrator`] and torn down after every test case.

use std::sync::Arc;

pub mod auth;
pub mod cases;
pub mod config;
pub mod errors;
pub mod executor;
pub mod fixtures;
pub mod orchestrator;
pub mod report;
pub mod request;
pub mod runner;
pub mod trace;
pub mod verify;
pub mod xml;

#[cfg(test)]
pub(crate) mod testing;

use crate::auth::{Clock, Credentials, SystemClock};
use crate::errors::Error;
use crate::executor::Executor;
use crate::fixtures::FixtureSet;
use crate::request::{RequestDescriptor, ResponseRecord, SignedRequest};

/// Default number of concurrent fixture operations.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default number of objects per test case.
pub const DEFAULT_OBJECTS: usize = 3;

/// Everything a test case needs to talk to the server under test.
///
/// Cloned into every fixture unit; all fields are cheap to clone.
#[derive(Clone)]
pub struct Env {
    credentials: Arc<Credentials>,
    executor: Executor,
    clock: Arc<dyn Clock>,
    concurrency: usize,
    objects: usize,
    shared: Option<Arc<FixtureSet>>,
}

impl Env {
    pub fn new(credentials: Credentials, executor: Executor) -> Self {
        Self {
            credentials: Arc::new(credentials),
            executor,
            clock: Arc::new(SystemClock),
            concurrency: DEFAULT_CONCURRENCY,
            objects: DEFAULT_OBJECTS,
            shared: None,
        }
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Maximum fixture operations in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Number of objects seeded per test case.
    pub fn with_objects(mut self, objects: usize) -> Self {
        self.objects = objects.max(1);
        self
    }

    /// Fixtures created once for the whole run (prepared mode).
    pub fn with_shared(mut self, fixtures: FixtureSet) -> Self {
        self.shared = Some(Arc::new(fixtures));
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn objects(&self) -> usize {
        self.objects
    }

    /// Shared fixtures, when the run was prepared.
    pub fn shared_fixtures(&self) -> Option<&FixtureSet> {
        self.shared.as_deref()
    }

    /// Sign `request` at the clock's current time.
    pub fn sign(&self, request: RequestDescriptor) -> Result<SignedRequest, Error> {
        auth::sign(request, &self.credentials, self.clock.now())
    }

    /// Sign and send `request`.
    pub async fn send(&self, request: RequestDescriptor) -> Result<ResponseRecord, Error> {
        let signed = self.sign(request)?;
        self.executor.execute(signed).await
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("credentials", &self.credentials)
            .field("concurrency", &self.concurrency)
            .field("objects", &self.objects)
            .field("prepared", &self.shared.is_some())
            .finish()
    }
}
