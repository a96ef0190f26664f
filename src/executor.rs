//! Request execution over HTTP.
//!
//! [`Executor`] sends a [`SignedRequest`] with `reqwest`, buffers the whole
//! response, and hands both sides to an optional [`Observer`].  There are
//! no retries at this layer.

use std::sync::Arc;
use std::time::Duration;

use http::header::HOST;
use tracing::{debug, warn};

use crate::errors::Error;
use crate::request::{ResponseRecord, SignedRequest};

/// Callback invoked around every request.
///
/// Receives the real, unredacted values; any redaction is the observer's
/// job.  Errors are logged and otherwise ignored.
pub trait Observer: Send + Sync {
    /// Called just before the request is sent.
    fn on_request(&self, request: &SignedRequest) -> anyhow::Result<()>;

    /// Called after the response has been fully read.
    fn on_response(&self, response: &ResponseRecord) -> anyhow::Result<()>;
}

/// Sends signed requests to the endpoint under test.
#[derive(Clone)]
pub struct Executor {
    client: reqwest::Client,
    observer: Option<Arc<dyn Observer>>,
}

impl Executor {
    /// Create an executor whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            client,
            observer: None,
        })
    }

    /// Attach an observer.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Send `request` and buffer the response.
    ///
    /// Consumes the request: a signed request is executed at most once.
    pub async fn execute(&self, request: SignedRequest) -> Result<ResponseRecord, Error> {
        if let Some(observer) = &self.observer {
            if let Err(e) = observer.on_request(&request) {
                warn!("request observer failed: {e}");
            }
        }

        debug!("{} {}", request.method, request.url);

        let SignedRequest {
            method,
            url,
            mut headers,
            body,
            ..
        } = request;
        // The client derives Host from the URL; sending ours too would duplicate it.
        headers.remove(HOST);

        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(Error::transport)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(Error::transport)?;

        let record = ResponseRecord {
            status,
            headers,
            body,
        };
        debug!("response {} ({} bytes)", record.status, record.body.len());

        if let Some(observer) = &self.observer {
            if let Err(e) = observer.on_response(&record) {
                warn!("response observer failed: {e}");
            }
        }

        Ok(record)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{sign, Credentials};
    use crate::errors::TransportKind;
    use crate::request::RequestDescriptor;
    use crate::testing::MockServer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingObserver {
        requests: AtomicUsize,
        responses: AtomicUsize,
    }

    impl Observer for CountingObserver {
        fn on_request(&self, _request: &SignedRequest) -> anyhow::Result<()> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("observer is broken")
        }

        fn on_response(&self, _response: &ResponseRecord) -> anyhow::Result<()> {
            self.responses.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("observer is broken")
        }
    }

    #[tokio::test]
    async fn test_observer_failures_are_not_fatal() {
        let server = MockServer::start().await;
        let observer = Arc::new(CountingObserver {
            requests: AtomicUsize::new(0),
            responses: AtomicUsize::new(0),
        });
        let executor = Executor::new(Duration::from_secs(5))
            .unwrap()
            .with_observer(observer.clone());
        let creds = server.credentials();
        let signed = sign(RequestDescriptor::get(), &creds, chrono::Utc::now()).unwrap();

        let response = executor.execute(signed).await.unwrap();
        assert_eq!(response.status, http::StatusCode::OK);
        assert_eq!(observer.requests.load(Ordering::SeqCst), 1);
        assert_eq!(observer.responses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Bind then drop a listener to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let creds = Credentials::new(&format!("http://{addr}"), "a", "b", "us-east-1").unwrap();
        let executor = Executor::new(Duration::from_secs(5)).unwrap();
        let signed = sign(RequestDescriptor::get(), &creds, chrono::Utc::now()).unwrap();
        match executor.execute(signed).await {
            Err(Error::Transport { kind, .. }) => assert_eq!(kind, TransportKind::Connect),
            other => panic!("expected transport error, got {other:?}"),
        }
    }
}
