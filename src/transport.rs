//! Transport adapter
//!
//! A `Transport` performs exactly one HTTP exchange; the retry policy is
//! layered on top by [`send`], which every session operation goes
//! through. `HttpTransport` is the reqwest-backed implementation with
//! mutual-TLS support; tests substitute their own `Transport`.

use crate::auth::AuthTokenGenerator;
use crate::config::MailboxConfig;
use crate::error::{MeshboxError, Result};
use crate::retry::{self, RetryPolicy};
use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, Method};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Media type for v2 protocol responses
pub const ACCEPT_V2: &str = "application/vnd.mesh.v2+json";

const CLIENT_VERSION: &str = concat!("meshbox==", env!("CARGO_PKG_VERSION"));

/// A single request as seen by the transport. Header names are
/// lower-case by convention; bodies are complete byte payloads or a
/// single chunk.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl TransportRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// A completed HTTP exchange. Header names are lower-cased.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// First present header among `names` (canonical name plus aliases).
    pub fn header_any(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.header(name))
    }

    /// Deserialize the body as JSON, mapping failures to protocol errors.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            MeshboxError::Protocol(format!("malformed response body: {e}"))
        })
    }
}

/// One request/response exchange. Implementations perform no retries;
/// connection-level failures map to `MeshboxError::Transport`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Issue a request under a retry policy.
///
/// Non-2xx responses become `HttpStatus` errors before classification,
/// so the policy sees terminal 4xx immediately and retries only its
/// configured status/method pairs and connection failures.
pub async fn send(
    transport: &dyn Transport,
    policy: &RetryPolicy,
    request: TransportRequest,
) -> Result<TransportResponse> {
    let method = request.method.clone();
    let operation = format!("{} {}", request.method, request.path);

    retry::with_policy(policy, &method, &operation, || {
        let request = request.clone();
        async move {
            let response = transport.exchange(request).await?;
            if response.is_success() {
                Ok(response)
            } else {
                Err(MeshboxError::HttpStatus {
                    status: response.status,
                    body: String::from_utf8_lossy(&response.body).into_owned(),
                })
            }
        }
    })
    .await
}

/// reqwest-backed transport with mutual TLS and per-request auth tokens.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    auth: AuthTokenGenerator,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &MailboxConfig) -> Result<Self> {
        let auth = AuthTokenGenerator::new(
            &config.shared_key,
            config.mailbox_id.clone(),
            config.password.clone(),
        )?;

        let mut builder = Client::builder().use_rustls_tls();

        match (&config.identity_pem, config.environment.requires_client_cert()) {
            (Some(pem), _) => {
                let identity = Identity::from_pem(pem)?;
                builder = builder.identity(identity);
            }
            (None, true) => {
                return Err(MeshboxError::Config(format!(
                    "environment {:?} requires a TLS client certificate",
                    config.environment
                )));
            }
            (None, false) => {}
        }

        if let Some(pem) = &config.ca_bundle_pem {
            let ca = Certificate::from_pem(pem)?;
            builder = builder.add_root_certificate(ca);
        }

        let client = builder.build()?;

        Ok(Self {
            client,
            base_url: config.environment.base_url().to_string(),
            auth,
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(&self, request: TransportRequest) -> Result<TransportResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!(method = %request.method, url = %url, "Issuing request");

        let mut req = self
            .client
            .request(request.method.clone(), &url)
            .timeout(self.timeout)
            .header("authorization", self.auth.token())
            .header("accept", ACCEPT_V2)
            .header("mex-clientversion", CLIENT_VERSION)
            .header("mex-osname", std::env::consts::OS)
            .header("mex-osarchitecture", std::env::consts::ARCH);

        if !request.query.is_empty() {
            req = req.query(&request.query);
        }
        for (name, value) in &request.headers {
            req = req.header(name, value);
        }
        if let Some(body) = request.body {
            req = req.body(body);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                MeshboxError::Transport(e.to_string())
            } else {
                MeshboxError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTransport {
        calls: AtomicU32,
        fail_first: u32,
        fail_status: u16,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn exchange(&self, _request: TransportRequest) -> Result<TransportResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Ok(TransportResponse {
                    status: self.fail_status,
                    headers: HashMap::new(),
                    body: b"busy".to_vec(),
                })
            } else {
                Ok(TransportResponse {
                    status: 200,
                    headers: HashMap::new(),
                    body: b"ok".to_vec(),
                })
            }
        }
    }

    #[tokio::test]
    async fn send_retries_retryable_statuses() {
        let transport = FlakyTransport {
            calls: AtomicU32::new(0),
            fail_first: 2,
            fail_status: 503,
        };
        let policy = RetryPolicy::new(3, 0.0, [503], [Method::GET]).unwrap();

        let response = send(
            &transport,
            &policy,
            TransportRequest::new(Method::GET, "/messageexchange/BOX1/inbox"),
        )
        .await
        .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn send_does_not_retry_terminal_statuses() {
        let transport = FlakyTransport {
            calls: AtomicU32::new(0),
            fail_first: 10,
            fail_status: 403,
        };
        let policy = RetryPolicy::default();

        let err = send(
            &transport,
            &policy,
            TransportRequest::new(Method::GET, "/messageexchange/BOX1/inbox"),
        )
        .await
        .unwrap_err();

        assert_eq!(err.status(), Some(403));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_identity_for_cert_requiring_environment_is_rejected() {
        let config =
            MailboxConfig::new(Environment::Live, "X26ABC1", "password", "key");
        assert!(matches!(
            HttpTransport::new(&config),
            Err(MeshboxError::Config(_))
        ));
    }

    #[test]
    fn response_header_alias_lookup() {
        let mut headers = HashMap::new();
        headers.insert("mex-workflow-id".to_string(), "WF1".to_string());
        let response = TransportResponse {
            status: 200,
            headers,
            body: Vec::new(),
        };
        assert_eq!(
            response.header_any(&["mex-workflowid", "mex-workflow-id"]),
            Some("WF1")
        );
    }
}
