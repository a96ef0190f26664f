//! AWS Signature Version 4 request signing.
//!
//! Turns a [`RequestDescriptor`] into a [`SignedRequest`] carrying the
//! `Authorization`, `X-Amz-Date` and `X-Amz-Content-Sha256` headers.
//!
//! The algorithm follows the AWS SigV4 specification:
//! 1. Build a canonical request
//! 2. Build a string-to-sign
//! 3. Derive a signing key via HMAC chain
//! 4. Compute the signature and assemble the header
//!
//! Signing is pure: the timestamp is an argument, so the same descriptor,
//! credentials and timestamp always produce the same signature.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use http::HeaderMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::errors::Error;
use crate::request::{RequestDescriptor, SignedRequest};

type HmacSha256 = Hmac<Sha256>;

/// Signature algorithm identifier.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Service name in the credential scope.
pub const SERVICE: &str = "s3";

/// Headers that are sent but never signed. Proxies and the HTTP client are
/// free to rewrite them.
const UNSIGNED_HEADERS: &[&str] = &["authorization", "user-agent", "content-length", "expect"];

/// Characters left untouched by URI encoding: `A-Z a-z 0-9 - _ . ~`.
const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

// ── Credentials and clock ───────────────────────────────────────────

/// Endpoint and key pair used for a whole run.
#[derive(Clone)]
pub struct Credentials {
    /// Base URL of the server under test.
    pub endpoint: Url,
    /// Region in the credential scope.
    pub region: String,
    /// Access key ID.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
}

impl Credentials {
    /// Build credentials, validating the endpoint URL.
    pub fn new(
        endpoint: &str,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| anyhow::anyhow!("invalid endpoint URL {endpoint:?}: {e}"))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            anyhow::bail!("endpoint must use http or https, got {}", endpoint.scheme());
        }
        if endpoint.host_str().is_none() {
            anyhow::bail!("endpoint {endpoint} has no host");
        }
        Ok(Self {
            endpoint,
            region: region.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"**REDACTED**")
            .finish()
    }
}

/// Source of signing timestamps.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ── Authorization header parsing ────────────────────────────────────

/// The fields of a SigV4 `Authorization` header.
#[derive(Debug, Clone)]
pub struct ParsedAuthorization {
    pub access_key_id: String,
    /// `YYYYMMDD`.
    pub date_stamp: String,
    pub region: String,
    pub service: String,
    /// Semicolon-separated, lowercase.
    pub signed_headers: String,
    /// Lowercase hex.
    pub signature: String,
    /// `date/region/service/aws4_request`.
    pub credential_scope: String,
}

/// Split an `Authorization` value of the form
///
/// ```text
/// AWS4-HMAC-SHA256 Credential=AKID/20261017/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature=0123...
/// ```
pub fn parse_authorization_header(header: &str) -> Result<ParsedAuthorization, String> {
    let fields = header
        .trim()
        .strip_prefix(ALGORITHM)
        .ok_or_else(|| format!("unsupported algorithm in {header:?}"))?;

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;
    for field in fields.split(',') {
        let Some((key, value)) = field.trim().split_once('=') else {
            continue;
        };
        let slot = match key {
            "Credential" => &mut credential,
            "SignedHeaders" => &mut signed_headers,
            "Signature" => &mut signature,
            _ => continue,
        };
        *slot = Some(value.trim().to_string());
    }
    let missing = |name: &str| format!("Authorization has no {name}");
    let credential = credential.ok_or_else(|| missing("Credential"))?;
    let signed_headers = signed_headers.ok_or_else(|| missing("SignedHeaders"))?;
    let signature = signature.ok_or_else(|| missing("Signature"))?;

    let (access_key_id, scope) = credential
        .split_once('/')
        .ok_or_else(|| format!("malformed Credential {credential:?}"))?;
    let scope_parts: Vec<&str> = scope.split('/').collect();
    let [date_stamp, region, service, terminator] = scope_parts[..] else {
        return Err(format!("malformed credential scope {scope:?}"));
    };
    if terminator != "aws4_request" {
        return Err(format!("credential scope {scope:?} does not end in aws4_request"));
    }

    Ok(ParsedAuthorization {
        access_key_id: access_key_id.to_string(),
        date_stamp: date_stamp.to_string(),
        region: region.to_string(),
        service: service.to_string(),
        signed_headers,
        signature,
        credential_scope: scope.to_string(),
    })
}

// ── Canonical request construction ──────────────────────────────────

/// Build the canonical request string.
///
/// ```text
/// HTTPMethod + '\n' +
/// CanonicalURI + '\n' +
/// CanonicalQueryString + '\n' +
/// CanonicalHeaders + '\n' +
/// SignedHeaders + '\n' +
/// HashedPayload
/// ```
///
/// `headers` are (lowercase name, value) pairs; only those named in
/// `signed_headers_str` are included, in that order.
pub fn build_canonical_request(
    method: &str,
    canonical_uri: &str,
    canonical_query: &str,
    headers: &[(String, String)],
    signed_headers_str: &str,
    payload_hash: &str,
) -> String {
    let canonical_uri = if canonical_uri.is_empty() {
        "/"
    } else {
        canonical_uri
    };

    let mut canonical_headers = String::new();
    for name in signed_headers_str.split(';') {
        if let Some((hname, hval)) = headers.iter().find(|(n, _)| n == name) {
            canonical_headers.push_str(hname);
            canonical_headers.push(':');
            canonical_headers.push_str(&collapse_whitespace(hval));
            canonical_headers.push('\n');
        }
    }

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers_str}\n{payload_hash}"
    )
}

/// Build the canonical query string from decoded parameters.
///
/// Names and values are URI-encoded, sorted by encoded name then value, and
/// joined with `&`.  Parameters without a value still carry `=`: `acl=`.
pub fn build_canonical_query_string(params: &BTreeMap<String, String>) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (s3_uri_encode(k, true), s3_uri_encode(v, true)))
        .collect();
    encoded.sort();

    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Path-style canonical URI for a bucket and optional object key.
pub fn canonical_path(bucket: &str, object: &str) -> Result<String, Error> {
    if bucket.is_empty() {
        if !object.is_empty() {
            return Err(Error::Signing(format!(
                "object {object:?} given without a bucket"
            )));
        }
        return Ok("/".to_string());
    }
    if bucket.contains('/') {
        return Err(Error::Signing(format!(
            "bucket name {bucket:?} contains '/'"
        )));
    }
    if matches!(bucket, "." | "..") || object.split('/').any(|seg| matches!(seg, "." | "..")) {
        return Err(Error::Signing(format!(
            "path /{bucket}/{object} has a dot segment that HTTP clients rewrite"
        )));
    }
    let mut path = format!("/{}", s3_uri_encode(bucket, true));
    if !object.is_empty() {
        path.push('/');
        path.push_str(&s3_uri_encode(object, false));
    }
    Ok(path)
}

// ── String to sign ──────────────────────────────────────────────────

/// Build the string to sign.
///
/// ```text
/// AWS4-HMAC-SHA256 + '\n' +
/// Timestamp + '\n' +
/// CredentialScope + '\n' +
/// HexEncode(SHA256(CanonicalRequest))
/// ```
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request: &str,
) -> String {
    let hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("{ALGORITHM}\n{timestamp}\n{credential_scope}\n{hash}")
}

// ── Signing key derivation ──────────────────────────────────────────

/// Derive the signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC-SHA256("AWS4" + secret, dateStamp)
/// kRegion  = HMAC-SHA256(kDate, region)
/// kService = HMAC-SHA256(kRegion, "s3")
/// kSigning = HMAC-SHA256(kService, "aws4_request")
/// ```
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute the signature: HexEncode(HMAC-SHA256(SigningKey, StringToSign)).
pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

// ── Signing ─────────────────────────────────────────────────────────

/// Sign `request` for `credentials` at `timestamp`.
///
/// The descriptor is consumed: change a header or parameter and you must
/// build and sign a new one.
pub fn sign(
    request: RequestDescriptor,
    credentials: &Credentials,
    timestamp: DateTime<Utc>,
) -> Result<SignedRequest, Error> {
    let path = canonical_path(request.bucket_name(), request.object_name())?;
    let query = build_canonical_query_string(request.query_params());
    let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = timestamp.format("%Y%m%d").to_string();
    let host = host_header(&credentials.endpoint)?;
    let content_hash = request.content_hash().to_string();

    let mut signed: BTreeMap<String, String> = request
        .headers()
        .iter()
        .filter(|(name, _)| !UNSIGNED_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    signed.insert("host".to_string(), host);
    signed.insert("x-amz-content-sha256".to_string(), content_hash.clone());
    signed.insert("x-amz-date".to_string(), amz_date.clone());

    let signed_pairs: Vec<(String, String)> = signed.into_iter().collect();
    let signed_headers = signed_pairs
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = build_canonical_request(
        request.method().as_str(),
        &path,
        &query,
        &signed_pairs,
        &signed_headers,
        &content_hash,
    );
    let credential_scope = format!(
        "{date_stamp}/{}/{SERVICE}/aws4_request",
        credentials.region
    );
    let string_to_sign = build_string_to_sign(&amz_date, &credential_scope, &canonical_request);
    let signing_key = derive_signing_key(
        &credentials.secret_key,
        &date_stamp,
        &credentials.region,
        SERVICE,
    );
    let signature = compute_signature(&signing_key, &string_to_sign);
    let authorization = format!(
        "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key
    );

    let mut headers = HeaderMap::new();
    let unsigned = request
        .headers()
        .iter()
        .filter(|(name, _)| {
            UNSIGNED_HEADERS.contains(&name.as_str()) && name.as_str() != "authorization"
        })
        .map(|(name, value)| (name.clone(), value.clone()));
    for (name, value) in signed_pairs.into_iter().chain(unsigned) {
        insert_header(&mut headers, &name, &value)?;
    }
    insert_header(&mut headers, AUTHORIZATION.as_str(), &authorization)?;

    let mut url = credentials.endpoint.clone();
    url.set_path(&path);
    if url.path() != path {
        return Err(Error::Signing(format!(
            "path {path} would be sent as {}",
            url.path()
        )));
    }
    url.set_query(if query.is_empty() { None } else { Some(&query) });

    let method = request.method().clone();
    Ok(SignedRequest {
        method,
        url,
        headers,
        body: request.into_body(),
        timestamp,
    })
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), Error> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| Error::Signing(format!("invalid header name {name:?}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| Error::Signing(format!("invalid value for header {name}")))?;
    headers.insert(name, value);
    Ok(())
}

/// `Host` value for the endpoint: host, plus port when not the scheme default.
fn host_header(endpoint: &Url) -> Result<String, Error> {
    let host = endpoint
        .host_str()
        .ok_or_else(|| Error::Signing(format!("endpoint {endpoint} has no host")))?;
    Ok(match endpoint.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

// ── URI encoding ────────────────────────────────────────────────────

/// S3-compatible URI encoding (RFC 3986 with S3 exceptions).
///
/// - Characters A-Z, a-z, 0-9, -, _, ., ~ are NOT encoded.
/// - All other characters are percent-encoded with uppercase hex.
/// - If `encode_slash` is false, `/` is NOT encoded (for object keys in paths).
pub fn s3_uri_encode(input: &str, encode_slash: bool) -> String {
    if encode_slash {
        return utf8_percent_encode(input, URI_ENCODE_SET).to_string();
    }
    input
        .split('/')
        .map(|segment| utf8_percent_encode(segment, URI_ENCODE_SET).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Trim a header value and fold internal whitespace runs into one space.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Recompute the signature of a received request and compare it with the
/// one in its `Authorization` header.  Used by the mock endpoint in tests.
#[cfg(test)]
pub(crate) fn verify_header_auth(
    method: &str,
    raw_path: &str,
    query: &BTreeMap<String, String>,
    request_headers: &[(String, String)],
    secret_key: &str,
) -> bool {
    let Some(header) = request_headers
        .iter()
        .find(|(n, _)| n == "authorization")
        .map(|(_, v)| v.as_str())
    else {
        return false;
    };
    let Ok(parsed) = parse_authorization_header(header) else {
        return false;
    };
    let Some(timestamp) = request_headers
        .iter()
        .find(|(n, _)| n == "x-amz-date")
        .map(|(_, v)| v.as_str())
    else {
        return false;
    };
    let payload_hash = request_headers
        .iter()
        .find(|(n, _)| n == "x-amz-content-sha256")
        .map(|(_, v)| v.as_str())
        .unwrap_or_default();

    let canonical_request = build_canonical_request(
        method,
        raw_path,
        &build_canonical_query_string(query),
        request_headers,
        &parsed.signed_headers,
        payload_hash,
    );
    let string_to_sign =
        build_string_to_sign(timestamp, &parsed.credential_scope, &canonical_request);
    let signing_key = derive_signing_key(
        secret_key,
        &parsed.date_stamp,
        &parsed.region,
        &parsed.service,
    );
    compute_signature(&signing_key, &string_to_sign) == parsed.signature
}

// ── Tests ───────────────────────────────────────────────────────────
