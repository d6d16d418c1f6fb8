//! Real HTTP client used when recording

use std::time::Duration;

use futures_util::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request as HttpRequest, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cassette::{Request, Response};
use crate::{DvrError, Result};

/// Response head and body returned by a real client
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Response head
    pub response: Response,
    /// Response body
    pub body: Option<Bytes>,
}

/// Capability that performs real network calls
///
/// An `Err` means the transport produced no response at all.
pub trait RealClient: Send + Sync + 'static {
    /// Send a request and wait for the whole response
    fn perform(&self, request: Request) -> BoxFuture<'static, Result<Exchange>>;

    /// Abort every in-flight call
    fn cancel_all(&self);

    /// Headers merged into every outgoing request
    fn default_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// HTTP/1.1 and HTTP/2 client over plain TCP
///
/// There is no TLS connector, so `https://` requests fail with a
/// `Transport` error. Record HTTPS traffic through your own [`RealClient`].
pub struct HyperClient {
    client: Client<HttpConnector, Full<Bytes>>,
    default_headers: Vec<(String, String)>,
    cancel_tx: broadcast::Sender<()>,
}

impl HyperClient {
    /// Create a new HTTP client
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build_http();
        let (cancel_tx, _) = broadcast::channel(1);

        Self {
            client,
            default_headers: Vec::new(),
            cancel_tx,
        }
    }

    /// Add a header sent with every request
    #[must_use]
    pub fn with_default_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }
}

impl Default for HyperClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RealClient for HyperClient {
    fn perform(&self, request: Request) -> BoxFuture<'static, Result<Exchange>> {
        let client = self.client.clone();
        let mut cancel_rx = self.cancel_tx.subscribe();

        Box::pin(async move {
            tokio::select! {
                result = send(&client, &request) => result,
                _ = cancel_rx.recv() => {
                    warn!("Request cancelled: {} {}", request.method, request.url);
                    Err(DvrError::Transport("request cancelled".to_string()))
                }
            }
        })
    }

    fn cancel_all(&self) {
        // No receivers simply means nothing is in flight
        let _ = self.cancel_tx.send(());
    }

    fn default_headers(&self) -> Vec<(String, String)> {
        self.default_headers.clone()
    }
}

async fn send(client: &Client<HttpConnector, Full<Bytes>>, request: &Request) -> Result<Exchange> {
    let http_request = build_request(request)?;

    debug!("Forwarding {} to {}", request.method, request.url);

    let response = client.request(http_request).await.map_err(|e| {
        warn!("Request failed: {e}");
        DvrError::Transport(format!("Request failed: {e}"))
    })?;

    let status = response.status().as_u16();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                value.to_str().unwrap_or("<invalid>").to_string(),
            )
        })
        .collect();

    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| DvrError::Transport(format!("Failed to read response body: {e}")))?
        .to_bytes();

    Ok(Exchange {
        response: Response {
            url: Some(request.url.clone()),
            status,
            headers,
        },
        body: (!body.is_empty()).then_some(body),
    })
}

/// Convert a recorded request into a hyper request
fn build_request(request: &Request) -> Result<HttpRequest<Full<Bytes>>> {
    let method = request.method.parse::<Method>().map_err(|e| {
        DvrError::Transport(format!("Invalid HTTP method '{}': {e}", request.method))
    })?;

    let uri = request
        .url
        .parse::<Uri>()
        .map_err(|e| DvrError::Transport(format!("Invalid URI '{}': {e}", request.url)))?;

    let mut builder = HttpRequest::builder().method(method).uri(uri);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }

    builder
        .body(Full::new(request.body.clone().unwrap_or_default()))
        .map_err(|e| DvrError::Transport(format!("Failed to build request: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request() {
        let request = Request::new("POST", "http://example.com/api/items?limit=5")
            .with_header("Content-Type", "application/json")
            .with_body(&b"{}"[..]);

        let http_request = build_request(&request).unwrap();
        assert_eq!(http_request.method(), Method::POST);
        assert_eq!(
            http_request.uri().to_string(),
            "http://example.com/api/items?limit=5"
        );
        assert_eq!(
            http_request.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_build_request_invalid_method() {
        let request = Request::new("GE T", "http://example.com/");
        assert!(matches!(
            build_request(&request),
            Err(DvrError::Transport(_))
        ));
    }

    #[test]
    fn test_default_headers() {
        let client = HyperClient::new().with_default_header("User-Agent", "dvr-tests");
        assert_eq!(
            client.default_headers(),
            vec![("User-Agent".to_string(), "dvr-tests".to_string())]
        );
    }

    #[tokio::test]
    async fn test_https_is_not_supported() {
        let client = HyperClient::new();
        let result = client
            .perform(Request::get("https://127.0.0.1:9/items"))
            .await;
        assert!(matches!(result, Err(DvrError::Transport(_))));
    }

    #[tokio::test]
    async fn test_cancel_all_aborts_in_flight_call() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept the connection but never answer
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let client = HyperClient::new();
        let call = client.perform(Request::get(&format!("http://{addr}/slow")));
        let handle = tokio::spawn(call);

        tokio::time::sleep(Duration::from_millis(50)).await;
        client.cancel_all();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(DvrError::Transport(_))));
        server.abort();
    }
}
