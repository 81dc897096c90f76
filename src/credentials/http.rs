//! One-shot HTTP requests to credential endpoints

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::time::Duration;

pub(crate) struct Response {
    pub status: StatusCode,
    pub body: Bytes,
}

pub(crate) enum FetchError {
    /// Could not connect (or timed out) before any response
    Unreachable(String),
    Other(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Unreachable(msg) => write!(f, "unreachable: {msg}"),
            FetchError::Other(msg) => f.write_str(msg),
        }
    }
}

pub(crate) async fn fetch(
    method: Method,
    url: &str,
    headers: &[(&str, String)],
    body: Bytes,
    timeout: Duration,
) -> Result<Response, FetchError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(timeout));

    let tls = TlsConnector::new().map_err(|e| FetchError::Other(format!("TLS setup: {e}")))?;
    let https = HttpsConnector::from((http, tls.into()));
    let client: HyperClient<_, Full<Bytes>> = HyperClient::builder(TokioExecutor::new())
        .pool_max_idle_per_host(0)
        .build(https);

    let mut req = Request::builder().method(method).uri(url);
    for (name, value) in headers {
        req = req.header(*name, value);
    }
    let request = req
        .body(Full::new(body))
        .map_err(|e| FetchError::Other(format!("request build error: {e}")))?;

    let exchange = async {
        let response = client.request(request).await.map_err(|e| {
            if e.is_connect() {
                FetchError::Unreachable(e.to_string())
            } else {
                FetchError::Other(format!("request failed: {e}"))
            }
        })?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| FetchError::Other(format!("body error: {e}")))?
            .to_bytes();
        Ok(Response { status, body })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Unreachable(format!(
            "no response within {}ms",
            timeout.as_millis()
        ))),
    }
}
