//! Object operations.

use http::StatusCode;

use super::{provision_objects, Provision};
use crate::errors::Error;
use crate::fixtures::{
    self, content_md5, expected_etag, random_name, random_object_body, FixtureSet, BUCKET_PREFIX,
};
use crate::request::RequestDescriptor;
use crate::runner::{BoxFuture, Exchange, TestCase};
use crate::verify::Expectation;
use crate::Env;

/// Response-override parameters sent by [`GetObjectOverrides`] and the
/// values the server must echo.
pub const OVERRIDES: &[(&str, &str)] = &[
    ("response-content-type", "image/gif"),
    ("response-content-language", "en-US"),
    ("response-expires", "Thu, 01 Dec 1994 16:00:00 GMT"),
    ("response-cache-control", "no-cache"),
    ("response-content-disposition", "attachment; filename=\"s3verify.gif\""),
];

/// PUT stores the body under the quoted-MD5 ETag; GET returns it unchanged.
#[derive(Default)]
pub struct PutObject;

impl PutObject {
    pub fn new() -> Self {
        Self
    }
}

impl TestCase for PutObject {
    fn name(&self) -> &str {
        "PutObject"
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(fixtures::seed_bucket(env))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        let key = random_name(BUCKET_PREFIX);
        let body = random_object_body();
        Ok(vec![
            Exchange::new(
                "PUT object",
                RequestDescriptor::put()
                    .bucket(&fixtures.bucket)
                    .object(&key)
                    .header("Content-MD5", content_md5(&body))
                    .body(body.clone()),
                Expectation::status(StatusCode::OK).header("ETag", expected_etag(&body)),
            ),
            Exchange::new(
                "GET uploaded object",
                RequestDescriptor::get().bucket(&fixtures.bucket).object(&key),
                Expectation::status(StatusCode::OK)
                    .header("ETag", expected_etag(&body))
                    .body(body),
            ),
        ])
    }
}

/// HEAD reports the object's ETag and Last-Modified without a body.
pub struct HeadObject {
    name: String,
    provision: Provision,
}

impl HeadObject {
    pub fn new(provision: Provision) -> Self {
        Self {
            name: provision.name("HeadObject"),
            provision,
        }
    }
}

impl TestCase for HeadObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(provision_objects(env, self.provision))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        let mut exchanges: Vec<Exchange> = fixtures
            .objects
            .iter()
            .map(|object| {
                Exchange::new(
                    format!("HEAD {}", object.key),
                    RequestDescriptor::head()
                        .bucket(&fixtures.bucket)
                        .object(&object.key),
                    Expectation::status(StatusCode::OK)
                        .header("ETag", object.etag.clone())
                        .header("Last-Modified", object.last_modified.clone())
                        .empty_body(),
                )
            })
            .collect();
        exchanges.push(Exchange::new(
            "HEAD missing object",
            RequestDescriptor::head()
                .bucket(&fixtures.bucket)
                .object(random_name(BUCKET_PREFIX)),
            Expectation::status(StatusCode::NOT_FOUND),
        ));
        Ok(exchanges)
    }
}

/// GET returns every seeded object byte for byte.
pub struct GetObject {
    name: String,
    provision: Provision,
}

impl GetObject {
    pub fn new(provision: Provision) -> Self {
        Self {
            name: provision.name("GetObject"),
            provision,
        }
    }
}

impl TestCase for GetObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(provision_objects(env, self.provision))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        Ok(fixtures
            .objects
            .iter()
            .map(|object| {
                Exchange::new(
                    format!("GET {}", object.key),
                    RequestDescriptor::get()
                        .bucket(&fixtures.bucket)
                        .object(&object.key),
                    Expectation::status(StatusCode::OK)
                        .header("ETag", object.etag.clone())
                        .body(object.body.clone()),
                )
            })
            .collect())
    }
}

/// GET with `response-*` query parameters sets the matching headers.
pub struct GetObjectOverrides {
    name: String,
    provision: Provision,
}

impl GetObjectOverrides {
    pub fn new(provision: Provision) -> Self {
        Self {
            name: provision.name("GetObject (response headers)"),
            provision,
        }
    }
}

impl TestCase for GetObjectOverrides {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(provision_objects(env, self.provision))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        let object = fixtures.first_object()?;
        let mut request = RequestDescriptor::get()
            .bucket(&fixtures.bucket)
            .object(&object.key);
        for (param, value) in OVERRIDES {
            request = request.query(*param, *value);
        }
        let expect = Expectation::status(StatusCode::OK).headers(request.query_params());
        Ok(vec![Exchange::new(
            "GET with response overrides",
            request,
            expect.body(object.body.clone()),
        )])
    }
}

/// GET with `Range` answers 206 with the requested slice.
pub struct GetObjectRange {
    name: String,
    provision: Provision,
}

impl GetObjectRange {
    pub fn new(provision: Provision) -> Self {
        Self {
            name: provision.name("GetObject (range)"),
            provision,
        }
    }
}

impl TestCase for GetObjectRange {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(provision_objects(env, self.provision))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        let object = fixtures.first_object()?;
        let len = object.body.len();
        if len == 0 {
            return Err(Error::Internal(anyhow::anyhow!(
                "object {} is empty, nothing to range over",
                object.key
            )));
        }
        let (start, end) = (len / 4, len / 2);
        let suffix = 1024.min(len);
        Ok(vec![
            Exchange::new(
                "GET bounded range",
                RequestDescriptor::get()
                    .bucket(&fixtures.bucket)
                    .object(&object.key)
                    .header("Range", format!("bytes={start}-{end}")),
                Expectation::status(StatusCode::PARTIAL_CONTENT)
                    .header("Content-Range", format!("bytes {start}-{end}/{len}"))
                    .body(object.body.slice(start..=end)),
            ),
            Exchange::new(
                "GET suffix range",
                RequestDescriptor::get()
                    .bucket(&fixtures.bucket)
                    .object(&object.key)
                    .header("Range", format!("bytes=-{suffix}")),
                Expectation::status(StatusCode::PARTIAL_CONTENT)
                    .body(object.body.slice(len - suffix..)),
            ),
        ])
    }
}

/// GET on the bucket lists every seeded key.
pub struct ListObjects {
    name: String,
    provision: Provision,
}

impl ListObjects {
    pub fn new(provision: Provision) -> Self {
        Self {
            name: provision.name("ListObjects"),
            provision,
        }
    }
}

impl TestCase for ListObjects {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(provision_objects(env, self.provision))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        Ok(vec![Exchange::new(
            "GET bucket",
            RequestDescriptor::get().bucket(&fixtures.bucket),
            Expectation::status(StatusCode::OK)
                .xml_contains("Key", fixtures.objects.iter().map(|o| o.key.clone())),
        )])
    }
}

/// DELETE removes an object; a later HEAD answers 404.
#[derive(Default)]
pub struct RemoveObject;

impl RemoveObject {
    pub fn new() -> Self {
        Self
    }
}

impl TestCase for RemoveObject {
    fn name(&self) -> &str {
        "RemoveObject"
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(fixtures::seed_objects(env, 1))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        let object = fixtures.first_object()?;
        Ok(vec![
            Exchange::new(
                "DELETE object",
                RequestDescriptor::delete()
                    .bucket(&fixtures.bucket)
                    .object(&object.key),
                Expectation::status(StatusCode::NO_CONTENT).empty_body(),
            ),
            Exchange::new(
                "HEAD removed object",
                RequestDescriptor::head()
                    .bucket(&fixtures.bucket)
                    .object(&object.key),
                Expectation::status(StatusCode::NOT_FOUND),
            ),
        ])
    }
}
