//! Response verification.
//!
//! An [`Expectation`] names the status, the headers the caller cares about,
//! and optionally the body.  [`verify`] checks headers first (the standard
//! ones every response carries, then the expected ones), then status, then
//! body, and reports the first divergence.

use bytes::Bytes;
use http::StatusCode;

use crate::errors::Mismatch;
use crate::request::ResponseRecord;
use crate::xml;

/// Query parameters that ask the server to override a response header,
/// mapped to the header they override.
///
/// See <http://docs.aws.amazon.com/AmazonS3/latest/API/RESTObjectGET.html>.
pub const RESPONSE_OVERRIDES: &[(&str, &str)] = &[
    ("response-content-type", "Content-Type"),
    ("response-content-language", "Content-Language"),
    ("response-expires", "Expires"),
    ("response-cache-control", "Cache-Control"),
    ("response-content-disposition", "Content-Disposition"),
    ("response-content-encoding", "Content-Encoding"),
];

/// The response header a name refers to: override query parameters are
/// translated, anything else is taken as a header name already.
pub fn response_header_name(name: &str) -> &str {
    RESPONSE_OVERRIDES
        .iter()
        .find(|(param, _)| param.eq_ignore_ascii_case(name))
        .map(|(_, header)| *header)
        .unwrap_or(name)
}

/// What the body must look like.
#[derive(Debug, Clone, Default)]
pub enum BodyExpectation {
    /// The body is not checked.
    #[default]
    Any,
    /// Byte-for-byte equality.
    Exact(Bytes),
    /// Every listed value appears as the text of an `element` in the XML body.
    XmlContains {
        element: String,
        values: Vec<String>,
    },
}

/// Expected response for one request.
#[derive(Debug, Clone)]
pub struct Expectation {
    pub status: StatusCode,
    /// (response header name, expected value).
    pub headers: Vec<(String, String)>,
    pub body: BodyExpectation,
}

impl Expectation {
    /// Expect `status`; nothing else is checked until added.
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: BodyExpectation::Any,
        }
    }

    /// Expect a header value.  Response-override parameter names are
    /// translated to the header they set.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .push((response_header_name(name).to_string(), value.into()));
        self
    }

    /// Expect every (parameter-or-header, value) pair.
    pub fn headers<'a, I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (name, value) in pairs {
            self = self.header(name, value.clone());
        }
        self
    }

    /// Expect exactly `body`.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = BodyExpectation::Exact(body.into());
        self
    }

    /// Expect an empty body.
    pub fn empty_body(self) -> Self {
        self.body(Bytes::new())
    }

    /// Expect each of `values` as the text of some `element`.
    pub fn xml_contains<I, S>(mut self, element: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.body = BodyExpectation::XmlContains {
            element: element.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        };
        self
    }
}

/// Check `response` against `expected`, returning the first mismatch.
pub fn verify(response: &ResponseRecord, expected: &Expectation) -> Result<(), Mismatch> {
    verify_standard_headers(response)?;
    verify_headers(response, &expected.headers)?;
    verify_status(response.status, expected.status)?;
    verify_body(&response.body, &expected.body)
}

/// Every response must carry a parseable `Date`.
fn verify_standard_headers(response: &ResponseRecord) -> Result<(), Mismatch> {
    match response.header("Date") {
        Some(date) if httpdate::parse_http_date(date).is_ok() => Ok(()),
        actual => Err(Mismatch::StandardHeader {
            name: "Date".to_string(),
            actual: actual.map(str::to_string),
        }),
    }
}

fn verify_headers(response: &ResponseRecord, expected: &[(String, String)]) -> Result<(), Mismatch> {
    for (name, value) in expected {
        let actual = response.header(name);
        if actual != Some(value.as_str()) {
            return Err(Mismatch::Header {
                name: name.clone(),
                expected: value.clone(),
                actual: actual.map(str::to_string),
            });
        }
    }
    Ok(())
}

fn verify_status(actual: StatusCode, expected: StatusCode) -> Result<(), Mismatch> {
    if actual != expected {
        return Err(Mismatch::Status { expected, actual });
    }
    Ok(())
}

fn verify_body(actual: &[u8], expected: &BodyExpectation) -> Result<(), Mismatch> {
    match expected {
        BodyExpectation::Any => Ok(()),
        BodyExpectation::Exact(want) => {
            if actual == want.as_ref() {
                return Ok(());
            }
            let first_difference = actual
                .iter()
                .zip(want.iter())
                .position(|(a, b)| a != b)
                .unwrap_or_else(|| actual.len().min(want.len()));
            Err(Mismatch::Body {
                expected_len: want.len(),
                actual_len: actual.len(),
                first_difference,
            })
        }
        BodyExpectation::XmlContains { element, values } => {
            let found =
                xml::element_values(actual, element).map_err(Mismatch::MalformedXml)?;
            match values.iter().find(|v| !found.contains(v)) {
                Some(missing) => Err(Mismatch::XmlValue {
                    element: element.clone(),
                    value: missing.clone(),
                }),
                None => Ok(()),
            }
        }
    }
}
