//! Bucket operations: MakeBucket, HeadBucket, ListBuckets, RemoveBucket.

use http::StatusCode;

use super::{provision_bucket, Provision};
use crate::errors::Error;
use crate::fixtures::{self, random_name, FixtureSet, BUCKET_PREFIX};
use crate::request::RequestDescriptor;
use crate::runner::{BoxFuture, Exchange, TestCase};
use crate::verify::Expectation;
use crate::Env;

/// PUT on a new bucket name creates it.
#[derive(Default)]
pub struct MakeBucket;

impl MakeBucket {
    pub fn new() -> Self {
        Self
    }
}

impl TestCase for MakeBucket {
    fn name(&self) -> &str {
        "MakeBucket"
    }

    fn setup<'a>(&'a self, _env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        // Nothing exists yet; the set only names the bucket so cleanup removes it.
        Box::pin(async { Ok(FixtureSet::new(random_name(BUCKET_PREFIX))) })
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        Ok(vec![
            Exchange::new(
                "PUT bucket",
                RequestDescriptor::put().bucket(&fixtures.bucket),
                Expectation::status(StatusCode::OK),
            ),
            Exchange::new(
                "HEAD new bucket",
                RequestDescriptor::head().bucket(&fixtures.bucket),
                Expectation::status(StatusCode::OK).empty_body(),
            ),
        ])
    }
}

/// DELETE on an empty bucket removes it.
#[derive(Default)]
pub struct RemoveBucket;

impl RemoveBucket {
    pub fn new() -> Self {
        Self
    }
}

impl TestCase for RemoveBucket {
    fn name(&self) -> &str {
        "RemoveBucket"
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(fixtures::seed_bucket(env))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        Ok(vec![
            Exchange::new(
                "DELETE bucket",
                RequestDescriptor::delete().bucket(&fixtures.bucket),
                Expectation::status(StatusCode::NO_CONTENT).empty_body(),
            ),
            Exchange::new(
                "HEAD removed bucket",
                RequestDescriptor::head().bucket(&fixtures.bucket),
                Expectation::status(StatusCode::NOT_FOUND),
            ),
        ])
    }
}

/// HEAD answers 200 for an existing bucket and 404 for a missing one.
pub struct HeadBucket {
    name: String,
    provision: Provision,
}

impl HeadBucket {
    pub fn new(provision: Provision) -> Self {
        Self {
            name: provision.name("HeadBucket"),
            provision,
        }
    }
}

impl TestCase for HeadBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(provision_bucket(env, self.provision))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        Ok(vec![
            Exchange::new(
                "HEAD bucket",
                RequestDescriptor::head().bucket(&fixtures.bucket),
                Expectation::status(StatusCode::OK).empty_body(),
            ),
            Exchange::new(
                "HEAD missing bucket",
                RequestDescriptor::head().bucket(random_name(BUCKET_PREFIX)),
                Expectation::status(StatusCode::NOT_FOUND),
            ),
        ])
    }
}

/// GET on the service lists the fixture bucket.
pub struct ListBuckets {
    name: String,
    provision: Provision,
}

impl ListBuckets {
    pub fn new(provision: Provision) -> Self {
        Self {
            name: provision.name("ListBuckets"),
            provision,
        }
    }
}

impl TestCase for ListBuckets {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(provision_bucket(env, self.provision))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        Ok(vec![Exchange::new(
            "GET service",
            RequestDescriptor::get(),
            Expectation::status(StatusCode::OK).xml_contains("Name", [fixtures.bucket.as_str()]),
        )])
    }
}
