//! Request and response values exchanged with the endpoint under test.
//!
//! A [`RequestDescriptor`] is built fresh for every call and describes the
//! request before authentication.  Signing consumes it and yields a
//! [`SignedRequest`], which the executor consumes in turn, so a signature
//! can never be reused after the request it covers has changed.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, Method, StatusCode};
use reqwest::Url;
use sha2::{Digest, Sha256};

/// Hex SHA-256 of `data`.
pub fn payload_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// An unsigned request against one bucket and/or object.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    bucket: String,
    object: String,
    /// Lower-cased header name -> value.  Keys are unique.
    headers: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
    body: Bytes,
    content_hash: String,
}

impl RequestDescriptor {
    /// Start a request with the given method and an empty body.
    pub fn new(method: Method) -> Self {
        Self {
            method,
            bucket: String::new(),
            object: String::new(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: Bytes::new(),
            content_hash: payload_hash(&[]),
        }
    }

    /// `GET` request.
    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    /// `PUT` request.
    pub fn put() -> Self {
        Self::new(Method::PUT)
    }

    /// `HEAD` request.
    pub fn head() -> Self {
        Self::new(Method::HEAD)
    }

    /// `DELETE` request.
    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    /// `POST` request.
    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    /// Target bucket.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Target object key (requires a bucket).
    pub fn object(mut self, object: impl Into<String>) -> Self {
        self.object = object.into();
        self
    }

    /// Set a header, replacing any previous value under the same
    /// case-insensitive name.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set a query parameter.  Use an empty value for flag parameters such
    /// as `?uploads`.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Attach a body and recompute its content hash.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.content_hash = payload_hash(&body);
        self.body = body;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    pub fn object_name(&self) -> &str {
        &self.object
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn query_params(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Value sent as `X-Amz-Content-Sha256`.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub(crate) fn into_body(self) -> Bytes {
        self.body
    }
}

/// A request carrying its SigV4 `Authorization` header.
///
/// Immutable once produced and consumed by [`crate::executor::Executor::execute`].
#[derive(Debug)]
pub struct SignedRequest {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) timestamp: DateTime<Utc>,
}

impl SignedRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// All headers, including `Host`, `X-Amz-Date`, `X-Amz-Content-Sha256`
    /// and `Authorization`.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The signing time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The `Authorization` header value.
    pub fn authorization(&self) -> &str {
        self.headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseRecord {
    /// Header value as a string, if present and valid ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
