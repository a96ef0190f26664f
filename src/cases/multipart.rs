//! Multipart upload operations.

use bytes::{Bytes, BytesMut};
use http::StatusCode;

use crate::errors::{BatchFailure, Error, IndexedError};
use crate::fixtures::{
    self, expected_etag, multipart_etag, random_body, random_name, FixtureSet, BUCKET_PREFIX,
    MIN_PART_SIZE,
};
use crate::request::RequestDescriptor;
use crate::runner::{BoxFuture, Exchange, TestCase};
use crate::verify::Expectation;
use crate::{xml, Env};

/// Size of parts that are never completed.
const SMALL_PART: usize = 32 * 1024;

/// POST `?uploads` returns an InitiateMultipartUploadResult naming the key.
#[derive(Default)]
pub struct InitiateMultipartUpload;

impl InitiateMultipartUpload {
    pub fn new() -> Self {
        Self
    }
}

impl TestCase for InitiateMultipartUpload {
    fn name(&self) -> &str {
        "InitiateMultipartUpload"
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(fixtures::seed_bucket(env))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        let key = random_name(BUCKET_PREFIX);
        Ok(vec![Exchange::new(
            "POST ?uploads",
            RequestDescriptor::post()
                .bucket(&fixtures.bucket)
                .object(&key)
                .query("uploads", ""),
            Expectation::status(StatusCode::OK).xml_contains("Key", [key]),
        )])
    }

    fn cleanup<'a>(
        &'a self,
        env: &'a Env,
        fixtures: &'a FixtureSet,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            // The exchange created an upload the fixture set never saw.
            let mut set = fixtures.clone();
            let listing = match fixtures::list_uploads(env, &set.bucket).await {
                Ok(pending) => {
                    for (key, upload_id) in pending {
                        set.uploads.push(fixtures::UploadInfo {
                            key,
                            upload_id,
                            parts: Vec::new(),
                        });
                    }
                    None
                }
                Err(e) => {
                    tracing::warn!("could not list uploads in {}: {e}", set.bucket);
                    Some(e)
                }
            };
            let torn_down = fixtures::teardown(env, &set).await;
            match listing {
                None => torn_down,
                Some(error) => Err(prepend_failure(error, torn_down)),
            }
        })
    }
}

/// A cleanup failure that starts with `error` and continues with whatever
/// the teardown reported.
fn prepend_failure(error: Error, torn_down: Result<(), Error>) -> Error {
    let mut batch = BatchFailure {
        total: 1,
        failures: vec![IndexedError {
            index: 0,
            error: Box::new(error),
        }],
    };
    match torn_down {
        Ok(()) => {}
        Err(Error::FixtureCleanup(rest)) => {
            batch.total += rest.total;
            batch.failures.extend(rest.failures.into_iter().map(|f| IndexedError {
                index: f.index + 1,
                error: f.error,
            }));
        }
        Err(other) => {
            batch.total += 1;
            batch.failures.push(IndexedError {
                index: 1,
                error: Box::new(other),
            });
        }
    }
    Error::FixtureCleanup(batch)
}

/// PUT `?partNumber&uploadId` stores a part under its quoted-MD5 ETag.
#[derive(Default)]
pub struct UploadPart;

impl UploadPart {
    pub fn new() -> Self {
        Self
    }
}

impl TestCase for UploadPart {
    fn name(&self) -> &str {
        "UploadPart"
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(fixtures::seed_upload(env, &[]))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        let upload = fixtures.first_upload()?;
        let body = random_body(SMALL_PART);
        Ok(vec![Exchange::new(
            "PUT part 1",
            fixtures::upload_part_request(&fixtures.bucket, upload, 1, body.clone()),
            Expectation::status(StatusCode::OK).header("ETag", expected_etag(&body)),
        )])
    }
}

/// GET `?uploadId` lists every uploaded part.
#[derive(Default)]
pub struct ListParts;

impl ListParts {
    pub fn new() -> Self {
        Self
    }
}

impl TestCase for ListParts {
    fn name(&self) -> &str {
        "ListParts"
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(fixtures::seed_upload(env, &[SMALL_PART; 3]))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        let upload = fixtures.first_upload()?;
        Ok(vec![Exchange::new(
            "GET ?uploadId",
            RequestDescriptor::get()
                .bucket(&fixtures.bucket)
                .object(&upload.key)
                .query("uploadId", &upload.upload_id),
            Expectation::status(StatusCode::OK).xml_contains(
                "PartNumber",
                upload.parts.iter().map(|p| p.number.to_string()),
            ),
        )])
    }
}

/// POST `?uploadId` assembles the parts into one object.
#[derive(Default)]
pub struct CompleteMultipartUpload;

impl CompleteMultipartUpload {
    pub fn new() -> Self {
        Self
    }
}

impl TestCase for CompleteMultipartUpload {
    fn name(&self) -> &str {
        "CompleteMultipartUpload"
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(fixtures::seed_upload(env, &[MIN_PART_SIZE, SMALL_PART]))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        let upload = fixtures.first_upload()?;
        let parts: Vec<(u32, &str)> = upload
            .parts
            .iter()
            .map(|p| (p.number, p.etag.as_str()))
            .collect();
        let etag = multipart_etag(upload.parts.iter().map(|p| p.body.as_ref()));
        let mut assembled = BytesMut::new();
        for part in &upload.parts {
            assembled.extend_from_slice(&part.body);
        }
        let assembled: Bytes = assembled.freeze();

        Ok(vec![
            Exchange::new(
                "POST ?uploadId",
                RequestDescriptor::post()
                    .bucket(&fixtures.bucket)
                    .object(&upload.key)
                    .query("uploadId", &upload.upload_id)
                    .header("Content-Type", "application/xml")
                    .body(xml::render_complete_multipart_upload(&parts)),
                Expectation::status(StatusCode::OK).xml_contains("ETag", [etag.clone()]),
            ),
            Exchange::new(
                "GET assembled object",
                RequestDescriptor::get()
                    .bucket(&fixtures.bucket)
                    .object(&upload.key),
                Expectation::status(StatusCode::OK)
                    .header("ETag", etag)
                    .body(assembled),
            ),
        ])
    }
}

/// DELETE `?uploadId` discards the upload; listing its parts then fails.
#[derive(Default)]
pub struct AbortMultipartUpload;

impl AbortMultipartUpload {
    pub fn new() -> Self {
        Self
    }
}

impl TestCase for AbortMultipartUpload {
    fn name(&self) -> &str {
        "AbortMultipartUpload"
    }

    fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
        Box::pin(fixtures::seed_upload(env, &[SMALL_PART]))
    }

    fn exchanges(&self, fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
        let upload = fixtures.first_upload()?;
        Ok(vec![
            Exchange::new(
                "DELETE ?uploadId",
                RequestDescriptor::delete()
                    .bucket(&fixtures.bucket)
                    .object(&upload.key)
                    .query("uploadId", &upload.upload_id),
                Expectation::status(StatusCode::NO_CONTENT).empty_body(),
            ),
            Exchange::new(
                "GET ?uploadId after abort",
                RequestDescriptor::get()
                    .bucket(&fixtures.bucket)
                    .object(&upload.key)
                    .query("uploadId", &upload.upload_id),
                Expectation::status(StatusCode::NOT_FOUND).xml_contains("Code", ["NoSuchUpload"]),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Mismatch;
    use crate::runner::{run_case, Phase, Verdict};
    use crate::testing::{MockOptions, MockServer};

    #[tokio::test]
    async fn test_multipart_cases_pass_against_mock() {
        let server = MockServer::start().await;
        let env = server.env();
        let cases: Vec<Box<dyn TestCase>> = vec![
            Box::new(UploadPart::new()),
            Box::new(ListParts::new()),
            Box::new(CompleteMultipartUpload::new()),
            Box::new(AbortMultipartUpload::new()),
        ];
        for case in &cases {
            let outcome = run_case(&env, case.as_ref()).await;
            assert!(outcome.passed(), "{}: {:?}", outcome.name, outcome.error);
        }
        assert_eq!(server.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_complete_body_lists_parts_in_order() {
        let server = MockServer::start().await;
        let env = server.env();
        let set = fixtures::seed_upload(&env, &[SMALL_PART, SMALL_PART]).await.unwrap();
        let exchanges = CompleteMultipartUpload::new().exchanges(&set).unwrap();
        let body = exchanges[0].request.body_bytes();
        assert_eq!(
            xml::element_values(body, "PartNumber").unwrap(),
            vec!["1", "2"]
        );
        fixtures::teardown(&env, &set).await.unwrap();
    }

    #[tokio::test]
    async fn test_initiate_aborts_the_upload_it_created() {
        let server = MockServer::start().await;
        let outcome = run_case(&server.env(), &InitiateMultipartUpload::new()).await;
        assert!(outcome.passed(), "{:?}", outcome.cleanup_error);
        assert_eq!(server.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_listing_fails_cleanup() {
        let server = MockServer::start_with(MockOptions {
            reject_upload_listing: true,
            ..Default::default()
        })
        .await;
        let outcome = run_case(&server.env(), &InitiateMultipartUpload::new()).await;
        assert_eq!(outcome.verdict, Verdict::Fail(Phase::Cleanup));
        assert!(outcome.error.is_none());
        match outcome.cleanup_error {
            Some(Error::FixtureCleanup(batch)) => {
                assert_eq!(batch.total, 1);
                assert_eq!(batch.failures.len(), 1);
                assert!(matches!(
                    *batch.failures[0].error,
                    Error::Verification(Mismatch::Status {
                        actual: StatusCode::INTERNAL_SERVER_ERROR,
                        ..
                    })
                ));
            }
            other => panic!("expected cleanup failure, got {other:?}"),
        }
    }

    #[test]
    fn test_listing_failure_leads_teardown_failures() {
        let teardown_failure = Error::FixtureCleanup(BatchFailure {
            total: 3,
            failures: vec![IndexedError {
                index: 2,
                error: Box::new(Error::Protocol("bucket".into())),
            }],
        });
        match prepend_failure(Error::Protocol("listing".into()), Err(teardown_failure)) {
            Error::FixtureCleanup(batch) => {
                assert_eq!(batch.total, 4);
                let indices: Vec<usize> = batch.failures.iter().map(|f| f.index).collect();
                assert_eq!(indices, vec![0, 3]);
            }
            other => panic!("expected cleanup failure, got {other:?}"),
        }
    }
}
