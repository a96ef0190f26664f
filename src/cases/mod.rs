//! The conformance cases, one [`TestCase`] per checked behaviour.
//!
//! Read-only cases come in two flavours.  [`Provision::Fresh`] creates a
//! bucket and objects for the case alone; [`Provision::Shared`] reads the
//! fixtures prepared once for the whole run and never deletes them.

pub mod bucket;
pub mod conditional;
pub mod multipart;
pub mod object;

use crate::errors::Error;
use crate::fixtures::{self, FixtureSet};
use crate::runner::{Suite, TestCase};
use crate::Env;

/// HTTP date before any object could have been written.
pub const EPOCH_DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Where a read-only case gets its fixtures from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provision {
    /// Create them for this case and delete them afterwards.
    Fresh,
    /// Borrow the run's prepared fixtures.
    Shared,
}

impl Provision {
    /// Case name for this flavour of `base`.
    pub fn name(&self, base: &str) -> String {
        match self {
            Provision::Fresh => base.to_string(),
            Provision::Shared => format!("{base} (prepared)"),
        }
    }
}

/// A bucket for the case.
pub(crate) async fn provision_bucket(env: &Env, provision: Provision) -> Result<FixtureSet, Error> {
    match (provision, env.shared_fixtures()) {
        (Provision::Shared, Some(shared)) => Ok(shared.borrowed()),
        _ => fixtures::seed_bucket(env).await,
    }
}

/// A bucket holding the configured number of objects.
pub(crate) async fn provision_objects(env: &Env, provision: Provision) -> Result<FixtureSet, Error> {
    match (provision, env.shared_fixtures()) {
        (Provision::Shared, Some(shared)) if !shared.objects.is_empty() => Ok(shared.borrowed()),
        _ => fixtures::seed_objects(env, env.objects()).await,
    }
}

/// Create the fixtures shared by every prepared case.
pub async fn prepare_shared(env: &Env) -> Result<FixtureSet, Error> {
    let set = fixtures::seed_objects(env, env.objects()).await?;
    tracing::info!(
        "prepared {} with {} object(s)",
        set.bucket,
        set.objects.len()
    );
    Ok(set)
}

/// Attach shared fixtures to `env` when they can be prepared.
///
/// A failed preparation is logged and the run continues without them; the
/// prepared cases then create fresh fixtures of their own.
pub async fn prepare_env(env: Env) -> (Env, Option<FixtureSet>) {
    match prepare_shared(&env).await {
        Ok(set) => (env.with_shared(set.clone()), Some(set)),
        Err(e) => {
            tracing::warn!("Failed to prepare shared fixtures, running prepared cases on fresh ones: {e}");
            (env, None)
        }
    }
}

/// Every case, in execution order.  With `prepared`, the read-only cases
/// also run against the shared fixtures.
pub fn registry(prepared: bool) -> Suite {
    let mut suite = Suite::new();
    let mut flavours = vec![Provision::Fresh];
    if prepared {
        flavours.push(Provision::Shared);
    }

    suite
        .register(Box::new(bucket::MakeBucket::new()))
        .register(Box::new(bucket::RemoveBucket::new()));
    for &p in &flavours {
        suite
            .register(Box::new(bucket::HeadBucket::new(p)))
            .register(Box::new(bucket::ListBuckets::new(p)));
    }

    suite.register(Box::new(object::PutObject::new()));
    for &p in &flavours {
        let cases: [Box<dyn TestCase>; 5] = [
            Box::new(object::HeadObject::new(p)),
            Box::new(object::GetObject::new(p)),
            Box::new(object::GetObjectOverrides::new(p)),
            Box::new(object::GetObjectRange::new(p)),
            Box::new(object::ListObjects::new(p)),
        ];
        for case in cases {
            suite.register(case);
        }
    }
    suite.register(Box::new(object::RemoveObject::new()));

    for &p in &flavours {
        let cases: [Box<dyn TestCase>; 4] = [
            Box::new(conditional::IfModifiedSince::new(p)),
            Box::new(conditional::IfUnmodifiedSince::new(p)),
            Box::new(conditional::IfMatch::new(p)),
            Box::new(conditional::IfNoneMatch::new(p)),
        ];
        for case in cases {
            suite.register(case);
        }
    }

    suite
        .register(Box::new(multipart::InitiateMultipartUpload::new()))
        .register(Box::new(multipart::UploadPart::new()))
        .register(Box::new(multipart::ListParts::new()))
        .register(Box::new(multipart::CompleteMultipartUpload::new()))
        .register(Box::new(multipart::AbortMultipartUpload::new()));
    suite
}
