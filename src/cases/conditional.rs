//! Conditional GET: If-Modified-Since, If-Unmodified-Since, If-Match,
//! If-None-Match.
//!
//! Each case sends one request whose precondition holds and one whose
//! precondition fails, against the first seeded object.

use http::StatusCode;

use super::{provision_objects, Provision, EPOCH_DATE};
use crate::errors::Error;
use crate::fixtures::{FixtureSet, ObjectInfo};
use crate::request::RequestDescriptor;
use crate::runner::{BoxFuture, Exchange, TestCase};
use crate::verify::Expectation;
use crate::Env;

/// An ETag no object carries.
const FOREIGN_ETAG: &str = "\"1f2a3b4c5d6e7f8091a2b3c4d5e6f708\"";

fn get(fixtures: &FixtureSet, object: &ObjectInfo, header: &str, value: &str) -> RequestDescriptor {
    RequestDescriptor::get()
        .bucket(&fixtures.bucket)
        .object(&object.key)
        .header(header, value)
}

fn full_object(object: &ObjectInfo) -> Expectation {
    Expectation::status(StatusCode::OK)
        .header("ETag", object.etag.clone())
        .body(object.body.clone())
}

fn not_modified(object: &ObjectInfo) -> Expectation {
    Expectation::status(StatusCode::NOT_MODIFIED)
        .header("ETag", object.etag.clone())
        .empty_body()
}

fn precondition_failed() -> Expectation {
    Expectation::status(StatusCode::PRECONDITION_FAILED).xml_contains("Code", ["PreconditionFailed"])
}

macro_rules! conditional_case {
    ($(#[$doc:meta])* $case:ident, $label:literal, |$fixtures:ident, $object:ident| $body:expr) => {
        $(#[$doc])*
        pub struct $case {
            name: String,
            provision: Provision,
        }

        impl $case {
            pub fn new(provision: Provision) -> Self {
                Self {
                    name: provision.name($label),
                    provision,
                }
            }
        }

        impl TestCase for $case {
            fn name(&self) -> &str {
                &self.name
            }

            fn setup<'a>(&'a self, env: &'a Env) -> BoxFuture<'a, Result<FixtureSet, Error>> {
                Box::pin(provision_objects(env, self.provision))
            }

            fn exchanges(&self, $fixtures: &FixtureSet) -> Result<Vec<Exchange>, Error> {
                let $object = $fixtures.first_object()?;
                Ok($body)
            }
        }
    };
}

conditional_case!(
    /// Not modified since its own Last-Modified: 304.  Modified since 1970: 200.
    IfModifiedSince,
    "GetObjectIfModifiedSince",
    |fixtures, object| vec![
        Exchange::new(
            "If-Modified-Since: Last-Modified",
            get(fixtures, object, "If-Modified-Since", &object.last_modified),
            not_modified(object),
        ),
        Exchange::new(
            "If-Modified-Since: epoch",
            get(fixtures, object, "If-Modified-Since", EPOCH_DATE),
            full_object(object),
        ),
    ]
);

conditional_case!(
    /// Modified since 1970: 412.  Unmodified since its own Last-Modified: 200.
    IfUnmodifiedSince,
    "GetObjectIfUnmodifiedSince",
    |fixtures, object| vec![
        Exchange::new(
            "If-Unmodified-Since: epoch",
            get(fixtures, object, "If-Unmodified-Since", EPOCH_DATE),
            precondition_failed(),
        ),
        Exchange::new(
            "If-Unmodified-Since: Last-Modified",
            get(fixtures, object, "If-Unmodified-Since", &object.last_modified),
            full_object(object),
        ),
    ]
);

conditional_case!(
    /// Matching ETag: 200.  Foreign ETag: 412.
    IfMatch,
    "GetObjectIfMatch",
    |fixtures, object| vec![
        Exchange::new(
            "If-Match: own ETag",
            get(fixtures, object, "If-Match", &object.etag),
            full_object(object),
        ),
        Exchange::new(
            "If-Match: foreign ETag",
            get(fixtures, object, "If-Match", FOREIGN_ETAG),
            precondition_failed(),
        ),
    ]
);

conditional_case!(
    /// Matching ETag: 304.  Foreign ETag: 200.
    IfNoneMatch,
    "GetObjectIfNoneMatch",
    |fixtures, object| vec![
        Exchange::new(
            "If-None-Match: own ETag",
            get(fixtures, object, "If-None-Match", &object.etag),
            not_modified(object),
        ),
        Exchange::new(
            "If-None-Match: foreign ETag",
            get(fixtures, object, "If-None-Match", FOREIGN_ETAG),
            full_object(object),
        ),
    ]
);
