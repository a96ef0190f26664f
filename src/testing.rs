//! In-process mock S3 endpoint for tests.
//!
//! Serves a small in-memory S3 over axum on `127.0.0.1:0`.  Every request
//! must carry a valid SigV4 signature for the mock's key pair; anything
//! else gets `403 SignatureDoesNotMatch`.  [`MockOptions`] switches on
//! deliberate misbehaviour so failure paths can be exercised.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{DefaultBodyLimit, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::auth::{self, Credentials};
use crate::executor::Executor;
use crate::fixtures::{expected_etag, multipart_etag};
use crate::verify::RESPONSE_OVERRIDES;
use crate::{xml, Env};

pub const ACCESS_KEY: &str = "s3verify-access";
pub const SECRET_KEY: &str = "s3verify-secret/KEY";
pub const REGION: &str = "us-east-1";

/// Deliberate deviations from S3 behaviour.
#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    /// Object PUTs beyond this many fail with 500.
    pub fail_put_after: Option<usize>,
    /// Every DELETE fails with 500.
    pub reject_deletes: bool,
    /// These `response-*` query parameters are not applied.
    pub ignored_overrides: Vec<&'static str>,
    /// Conditional headers are not evaluated.
    pub ignore_conditionals: bool,
    /// Listing a bucket's multipart uploads fails with 500.
    pub reject_upload_listing: bool,
}

struct MockObject {
    body: Bytes,
    etag: String,
    content_type: String,
    last_modified: SystemTime,
}

struct MockUpload {
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Default)]
struct MockBucket {
    objects: BTreeMap<String, MockObject>,
    uploads: HashMap<String, MockUpload>,
}

#[derive(Default)]
struct MockState {
    options: MockOptions,
    buckets: BTreeMap<String, MockBucket>,
    object_puts: usize,
}

type Shared = Arc<Mutex<MockState>>;

/// A running mock endpoint.  Stops when dropped.
pub struct MockServer {
    addr: SocketAddr,
    state: Shared,
    _shutdown_tx: oneshot::Sender<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(options: MockOptions) -> Self {
        let state: Shared = Arc::new(Mutex::new(MockState {
            options,
            ..Default::default()
        }));
        let app = Router::new()
            .fallback(handle)
            .layer(DefaultBodyLimit::disable())
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server error");
        });

        Self {
            addr,
            state,
            _shutdown_tx: shutdown_tx,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.endpoint(), ACCESS_KEY, SECRET_KEY, REGION)
            .expect("valid mock endpoint")
    }

    /// An environment pointed at this server.
    pub fn env(&self) -> Env {
        let executor = Executor::new(Duration::from_secs(10)).expect("http client");
        Env::new(self.credentials(), executor)
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.lock().buckets.contains_key(bucket)
    }

    pub fn bucket_count(&self) -> usize {
        self.lock().buckets.len()
    }

    pub fn object_count(&self, bucket: &str) -> Option<usize> {
        self.lock().buckets.get(bucket).map(|b| b.objects.len())
    }

    /// Change the misbehaviour switches of a running server.
    pub fn set_options(&self, options: MockOptions) {
        self.lock().options = options;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }
}

// ── Request handling ────────────────────────────────────────────────

struct Incoming {
    method: Method,
    bucket: String,
    key: String,
    query: BTreeMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
}

impl Incoming {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn has_query(&self, name: &str) -> bool {
        self.query.contains_key(name)
    }
}

struct Reply {
    status: StatusCode,
    headers: Vec<(HeaderName, String)>,
    body: Bytes,
}

impl Reply {
    fn status(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    fn xml(status: StatusCode, body: String) -> Self {
        Self::status(status)
            .header(http::header::CONTENT_TYPE, "application/xml")
            .body(body)
    }

    fn error(status: StatusCode, code: &str) -> Self {
        Self::xml(
            status,
            format!("<Error><Code>{code}</Code><Message>{code}</Message></Error>"),
        )
    }

    fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        if let Ok(date) = HeaderValue::from_str(&httpdate::fmt_http_date(SystemTime::now())) {
            headers.insert(http::header::DATE, date);
        }
        for (name, value) in self.headers {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }
        (self.status, headers, self.body).into_response()
    }
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let query = parse_query(uri.query().unwrap_or_default());
    let pairs: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(n, v)| Some((n.as_str().to_string(), v.to_str().ok()?.to_string())))
        .collect();
    if !auth::verify_header_auth(method.as_str(), uri.path(), &query, &pairs, SECRET_KEY) {
        return Reply::error(StatusCode::FORBIDDEN, "SignatureDoesNotMatch").into_response();
    }

    let path = uri.path().trim_start_matches('/');
    let (bucket, key) = path.split_once('/').unwrap_or((path, ""));
    let incoming = Incoming {
        method,
        bucket: decode(bucket),
        key: decode(key),
        query,
        headers,
        body,
    };

    let mut state = state.lock().expect("mock state poisoned");
    dispatch(&mut state, &incoming).into_response()
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn parse_query(raw: &str) -> BTreeMap<String, String> {
    raw.split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(k), decode(v))
        })
        .collect()
}

fn dispatch(state: &mut MockState, req: &Incoming) -> Reply {
    if req.method == Method::DELETE && state.options.reject_deletes {
        return Reply::error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError");
    }
    if req.bucket.is_empty() {
        return match req.method {
            Method::GET => list_buckets(state),
            _ => Reply::error(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed"),
        };
    }
    if req.key.is_empty() {
        let listing = req.method == Method::GET && req.has_query("uploads");
        if listing && state.options.reject_upload_listing {
            return Reply::error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError");
        }
        return bucket_request(state, req);
    }
    if req.has_query("uploads") || req.has_query("uploadId") {
        return multipart_request(state, req);
    }
    object_request(state, req)
}

fn list_buckets(state: &MockState) -> Reply {
    let names: String = state
        .buckets
        .keys()
        .map(|name| format!("<Bucket><Name>{name}</Name></Bucket>"))
        .collect();
    Reply::xml(
        StatusCode::OK,
        format!("<ListAllMyBucketsResult><Buckets>{names}</Buckets></ListAllMyBucketsResult>"),
    )
}

fn bucket_request(state: &mut MockState, req: &Incoming) -> Reply {
    match req.method {
        Method::PUT => {
            if state.buckets.contains_key(&req.bucket) {
                return Reply::error(StatusCode::CONFLICT, "BucketAlreadyOwnedByYou");
            }
            state.buckets.insert(req.bucket.clone(), MockBucket::default());
            Reply::status(StatusCode::OK)
        }
        Method::HEAD if state.buckets.contains_key(&req.bucket) => Reply::status(StatusCode::OK),
        Method::HEAD => Reply::status(StatusCode::NOT_FOUND),
        Method::DELETE => match state.buckets.get(&req.bucket) {
            None => Reply::error(StatusCode::NOT_FOUND, "NoSuchBucket"),
            Some(b) if !b.objects.is_empty() => {
                Reply::error(StatusCode::CONFLICT, "BucketNotEmpty")
            }
            Some(_) => {
                state.buckets.remove(&req.bucket);
                Reply::status(StatusCode::NO_CONTENT)
            }
        },
        Method::GET => match state.buckets.get(&req.bucket) {
            None => Reply::error(StatusCode::NOT_FOUND, "NoSuchBucket"),
            Some(b) if req.has_query("uploads") => {
                let uploads: String = b
                    .uploads
                    .iter()
                    .map(|(id, u)| {
                        format!("<Upload><Key>{}</Key><UploadId>{id}</UploadId></Upload>", u.key)
                    })
                    .collect();
                Reply::xml(
                    StatusCode::OK,
                    format!("<ListMultipartUploadsResult>{uploads}</ListMultipartUploadsResult>"),
                )
            }
            Some(b) => {
                let contents: String = b
                    .objects
                    .iter()
                    .map(|(key, o)| {
                        format!(
                            "<Contents><Key>{key}</Key><ETag>{}</ETag><Size>{}</Size></Contents>",
                            escape(&o.etag),
                            o.body.len()
                        )
                    })
                    .collect();
                Reply::xml(
                    StatusCode::OK,
                    format!(
                        "<ListBucketResult><Name>{}</Name>{contents}</ListBucketResult>",
                        req.bucket
                    ),
                )
            }
        },
        _ => Reply::error(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed"),
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Current time truncated to whole seconds, as HTTP dates carry.
fn now_seconds() -> SystemTime {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn object_request(state: &mut MockState, req: &Incoming) -> Reply {
    let options = state.options.clone();
    let Some(bucket) = state.buckets.get_mut(&req.bucket) else {
        return Reply::error(StatusCode::NOT_FOUND, "NoSuchBucket");
    };

    match req.method {
        Method::PUT => {
            state.object_puts += 1;
            if options.fail_put_after.is_some_and(|n| state.object_puts > n) {
                return Reply::error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError");
            }
            if let Some(md5) = req.header("content-md5") {
                if md5 != crate::fixtures::content_md5(&req.body) {
                    return Reply::error(StatusCode::BAD_REQUEST, "BadDigest");
                }
            }
            let etag = expected_etag(&req.body);
            bucket.objects.insert(
                req.key.clone(),
                MockObject {
                    body: req.body.clone(),
                    etag: etag.clone(),
                    content_type: req
                        .header("content-type")
                        .unwrap_or("binary/octet-stream")
                        .to_string(),
                    last_modified: now_seconds(),
                },
            );
            Reply::status(StatusCode::OK).header(http::header::ETAG, etag)
        }
        Method::DELETE => {
            bucket.objects.remove(&req.key);
            Reply::status(StatusCode::NO_CONTENT)
        }
        Method::GET | Method::HEAD => {
            let Some(object) = bucket.objects.get(&req.key) else {
                return match req.method {
                    Method::HEAD => Reply::status(StatusCode::NOT_FOUND),
                    _ => Reply::error(StatusCode::NOT_FOUND, "NoSuchKey"),
                };
            };
            read_object(object, req, &options)
        }
        _ => Reply::error(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed"),
    }
}

fn read_object(object: &MockObject, req: &Incoming, options: &MockOptions) -> Reply {
    let last_modified = httpdate::fmt_http_date(object.last_modified);
    let base = |status: StatusCode| {
        Reply::status(status)
            .header(http::header::ETAG, object.etag.clone())
            .header(http::header::LAST_MODIFIED, last_modified.clone())
    };

    if !options.ignore_conditionals {
        if let Some(status) = evaluate_conditionals(object, req) {
            return match status {
                StatusCode::NOT_MODIFIED => base(status),
                _ => Reply::error(status, "PreconditionFailed"),
            };
        }
    }

    let mut reply = base(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, object.content_type.clone())
        .header(http::header::ACCEPT_RANGES, "bytes");
    let mut body = object.body.clone();

    if let Some(range) = req.header("range") {
        let Some((start, end)) = parse_range(range, body.len()) else {
            return Reply::error(StatusCode::RANGE_NOT_SATISFIABLE, "InvalidRange");
        };
        reply.status = StatusCode::PARTIAL_CONTENT;
        reply = reply.header(
            http::header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{}", body.len()),
        );
        body = body.slice(start..=end);
    }

    if req.method == Method::GET {
        for (param, header) in RESPONSE_OVERRIDES {
            if options.ignored_overrides.contains(param) {
                continue;
            }
            if let Some(value) = req.query.get(*param) {
                if let Ok(name) = HeaderName::from_bytes(header.as_bytes()) {
                    reply = reply.header(name, value.clone());
                }
            }
        }
    }

    if req.method == Method::HEAD {
        body = Bytes::new();
    }
    reply.body(body)
}

/// The status a failed precondition yields, if any.
fn evaluate_conditionals(object: &MockObject, req: &Incoming) -> Option<StatusCode> {
    let etag_matches = |list: &str| {
        let etag = object.etag.trim_matches('"');
        list.split(',')
            .map(str::trim)
            .any(|candidate| candidate == "*" || candidate.trim_matches('"') == etag)
    };
    let date = |name: &str| req.header(name).and_then(|v| httpdate::parse_http_date(v).ok());

    if let Some(list) = req.header("if-match") {
        if !etag_matches(list) {
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    } else if let Some(since) = date("if-unmodified-since") {
        if object.last_modified > since {
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    }

    if let Some(list) = req.header("if-none-match") {
        if etag_matches(list) {
            return Some(StatusCode::NOT_MODIFIED);
        }
    } else if let Some(since) = date("if-modified-since") {
        if object.last_modified <= since {
            return Some(StatusCode::NOT_MODIFIED);
        }
    }
    None
}

/// Inclusive byte bounds of a single `bytes=` range.
fn parse_range(header: &str, len: usize) -> Option<(usize, usize)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    if len == 0 {
        return None;
    }
    let (start, end) = match (start.trim(), end.trim()) {
        ("", suffix) => {
            let n: usize = suffix.parse().ok()?;
            if n == 0 {
                return None;
            }
            (len.saturating_sub(n), len - 1)
        }
        (start, "") => (start.parse().ok()?, len - 1),
        (start, end) => (start.parse().ok()?, end.parse::<usize>().ok()?.min(len - 1)),
    };
    (start <= end && start < len).then_some((start, end))
}

fn multipart_request(state: &mut MockState, req: &Incoming) -> Reply {
    let Some(bucket) = state.buckets.get_mut(&req.bucket) else {
        return Reply::error(StatusCode::NOT_FOUND, "NoSuchBucket");
    };

    if req.method == Method::POST && req.has_query("uploads") {
        let upload_id = Uuid::new_v4().to_string();
        bucket.uploads.insert(
            upload_id.clone(),
            MockUpload {
                key: req.key.clone(),
                parts: BTreeMap::new(),
            },
        );
        return Reply::xml(
            StatusCode::OK,
            format!(
                "<InitiateMultipartUploadResult><Bucket>{}</Bucket><Key>{}</Key><UploadId>{upload_id}</UploadId></InitiateMultipartUploadResult>",
                req.bucket, req.key
            ),
        );
    }

    let upload_id = req.query.get("uploadId").cloned().unwrap_or_default();
    let Some(upload) = bucket.uploads.get_mut(&upload_id) else {
        return Reply::error(StatusCode::NOT_FOUND, "NoSuchUpload");
    };
    if upload.key != req.key {
        return Reply::error(StatusCode::NOT_FOUND, "NoSuchUpload");
    }

    match req.method {
        Method::PUT => {
            let Some(number) = req
                .query
                .get("partNumber")
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| (1..=10_000).contains(n))
            else {
                return Reply::error(StatusCode::BAD_REQUEST, "InvalidArgument");
            };
            let etag = expected_etag(&req.body);
            upload.parts.insert(number, (etag.clone(), req.body.clone()));
            Reply::status(StatusCode::OK).header(http::header::ETAG, etag)
        }
        Method::GET => {
            let parts: String = upload
                .parts
                .iter()
                .map(|(n, (etag, body))| {
                    format!(
                        "<Part><PartNumber>{n}</PartNumber><ETag>{}</ETag><Size>{}</Size></Part>",
                        escape(etag),
                        body.len()
                    )
                })
                .collect();
            Reply::xml(
                StatusCode::OK,
                format!(
                    "<ListPartsResult><Bucket>{}</Bucket><Key>{}</Key><UploadId>{upload_id}</UploadId>{parts}</ListPartsResult>",
                    req.bucket, req.key
                ),
            )
        }
        Method::DELETE => {
            bucket.uploads.remove(&upload_id);
            Reply::status(StatusCode::NO_CONTENT)
        }
        Method::POST => complete_upload(bucket, req, &upload_id),
        _ => Reply::error(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed"),
    }
}

fn complete_upload(bucket: &mut MockBucket, req: &Incoming, upload_id: &str) -> Reply {
    let (Ok(numbers), Ok(etags)) = (
        xml::element_values(&req.body, "PartNumber"),
        xml::element_values(&req.body, "ETag"),
    ) else {
        return Reply::error(StatusCode::BAD_REQUEST, "MalformedXML");
    };
    let Some(upload) = bucket.uploads.get(upload_id) else {
        return Reply::error(StatusCode::NOT_FOUND, "NoSuchUpload");
    };
    if numbers.is_empty() || numbers.len() != etags.len() {
        return Reply::error(StatusCode::BAD_REQUEST, "MalformedXML");
    }

    let mut bodies = Vec::with_capacity(numbers.len());
    for (number, etag) in numbers.iter().zip(&etags) {
        let part = number.parse::<u32>().ok().and_then(|n| upload.parts.get(&n));
        match part {
            Some((stored, body)) if stored.trim_matches('"') == etag.trim_matches('"') => {
                bodies.push(body.clone())
            }
            _ => return Reply::error(StatusCode::BAD_REQUEST, "InvalidPart"),
        }
    }

    let etag = multipart_etag(bodies.iter().map(|b| b.as_ref()));
    let body: Vec<u8> = bodies.iter().flat_map(|b| b.iter().copied()).collect();
    bucket.objects.insert(
        req.key.clone(),
        MockObject {
            body: Bytes::from(body),
            etag: etag.clone(),
            content_type: "binary/octet-stream".to_string(),
            last_modified: now_seconds(),
        },
    );
    bucket.uploads.remove(upload_id);

    Reply::xml(
        StatusCode::OK,
        format!(
            "<CompleteMultipartUploadResult><Bucket>{}</Bucket><Key>{}</Key><ETag>{}</ETag></CompleteMultipartUploadResult>",
            req.bucket,
            req.key,
            escape(&etag)
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("bytes=0-9", 100), Some((0, 9)));
        assert_eq!(parse_range("bytes=90-", 100), Some((90, 99)));
        assert_eq!(parse_range("bytes=-10", 100), Some((90, 99)));
        assert_eq!(parse_range("bytes=50-500", 100), Some((50, 99)));
        assert_eq!(parse_range("bytes=100-", 100), None);
        assert_eq!(parse_range("items=0-1", 100), None);
    }

    #[tokio::test]
    async fn test_rejects_bad_signature() {
        let server = MockServer::start().await;
        let creds =
            Credentials::new(&server.endpoint(), ACCESS_KEY, "wrong-secret", REGION).unwrap();
        let env = Env::new(creds, Executor::new(Duration::from_secs(5)).unwrap());
        let response = env
            .send(crate::request::RequestDescriptor::get())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::FORBIDDEN);
    }
}
