//! Redacted request/response tracing, enabled with `--trace`.

use std::fmt::Write as _;

use http::{HeaderMap, StatusCode};
use tracing::info;

use crate::auth::parse_authorization_header;
use crate::executor::Observer;
use crate::request::{ResponseRecord, SignedRequest};

const REDACTED: &str = "**REDACTED**";

/// Logs every exchange with the access key and signature hidden.
#[derive(Debug, Default)]
pub struct TraceObserver;

impl TraceObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Observer for TraceObserver {
    fn on_request(&self, request: &SignedRequest) -> anyhow::Result<()> {
        info!(target: "s3verify::trace", "\n{}", render_request(request));
        Ok(())
    }

    fn on_response(&self, response: &ResponseRecord) -> anyhow::Result<()> {
        info!(target: "s3verify::trace", "\n{}", render_response(response));
        Ok(())
    }
}

/// The `Authorization` value with its access key and signature replaced.
///
/// Values that do not parse as SigV4 are hidden entirely.
pub fn redact_authorization(value: &str) -> String {
    match parse_authorization_header(value) {
        Ok(parsed) => format!(
            "{} Credential={REDACTED}/{}, SignedHeaders={}, Signature={REDACTED}",
            crate::auth::ALGORITHM,
            parsed.credential_scope,
            parsed.signed_headers
        ),
        Err(_) => REDACTED.to_string(),
    }
}

/// Request line and headers; the body is never dumped.
pub fn render_request(request: &SignedRequest) -> String {
    let url = request.url();
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    let mut out = format!("{} {} HTTP/1.1\n", request.method(), target);
    write_headers(&mut out, request.headers());
    out
}

/// Status line and headers, plus the body for anything but 200, 204 and 206.
pub fn render_response(response: &ResponseRecord) -> String {
    let mut out = format!("HTTP/1.1 {}\n", response.status);
    write_headers(&mut out, &response.headers);
    if !matches!(
        response.status,
        StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::PARTIAL_CONTENT
    ) && !response.body.is_empty()
    {
        out.push('\n');
        out.push_str(&String::from_utf8_lossy(&response.body));
        out.push('\n');
    }
    out
}

fn write_headers(out: &mut String, headers: &HeaderMap) {
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        let value = if *name == http::header::AUTHORIZATION {
            redact_authorization(&value)
        } else {
            value.into_owned()
        };
        let _ = writeln!(out, "{name}: {value}");
    }
}
