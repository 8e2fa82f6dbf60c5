//! Session configuration
//!
//! Named environments map to base URLs and their client-certificate
//! requirement. The table is explicit configuration passed into the
//! session constructor; there is no global endpoint state.

use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::error::{MeshboxError, Result};
use crate::retry::RetryPolicy;
use std::time::Duration;

/// Named service environments.
///
/// Each variant carries its base URL and whether the endpoint requires
/// mutual TLS with a client certificate. `Custom` covers test servers
/// and deployments not in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    /// Local sandbox server (no client certificate)
    LocalSandbox,
    /// Development environment
    Development,
    /// Integration test environment
    Integration,
    /// Training environment
    Training,
    /// Production
    Live,
    /// Internet-facing gateway (production)
    InternetGateway,
    /// Internet-facing gateway (integration)
    InternetGatewayIntegration,
    /// Explicit base URL with its own certificate requirement
    Custom {
        base_url: String,
        requires_client_cert: bool,
    },
}

impl Environment {
    /// Base URL for this environment, without a trailing slash.
    pub fn base_url(&self) -> &str {
        match self {
            Environment::LocalSandbox => "https://localhost:8700",
            Environment::Development => "https://msg.dev.spine2.ncrs.nhs.uk",
            Environment::Integration => "https://msg.int.spine2.ncrs.nhs.uk",
            Environment::Training => "https://msg.train.spine2.ncrs.nhs.uk",
            Environment::Live => "https://mesh-sync.national.ncrs.nhs.uk",
            Environment::InternetGateway => "https://mesh.spineservices.nhs.uk",
            Environment::InternetGatewayIntegration => "https://msg.intspineservices.nhs.uk",
            Environment::Custom { base_url, .. } => base_url.trim_end_matches('/'),
        }
    }

    /// Whether the endpoint requires a TLS client certificate.
    pub fn requires_client_cert(&self) -> bool {
        match self {
            Environment::LocalSandbox => false,
            Environment::Custom {
                requires_client_cert,
                ..
            } => *requires_client_cert,
            _ => true,
        }
    }
}

/// Configuration for a mailbox session.
///
/// Created by the caller, immutable for the life of the session.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub environment: Environment,
    pub mailbox_id: String,
    pub password: String,
    /// Shared key used by the authorization token scheme
    pub shared_key: String,
    /// Split threshold for outbound payloads
    pub max_chunk_size: usize,
    /// Gzip payloads transparently before sending
    pub transparent_compress: bool,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retry policy for reads and chunk continuation requests
    pub retry_policy: RetryPolicy,
    /// PEM-encoded client certificate + private key for mutual TLS
    pub identity_pem: Option<Vec<u8>>,
    /// PEM-encoded CA bundle overriding the system roots
    pub ca_bundle_pem: Option<Vec<u8>>,
}

impl MailboxConfig {
    /// Minimal configuration; everything else takes defaults.
    pub fn new(
        environment: Environment,
        mailbox_id: impl Into<String>,
        password: impl Into<String>,
        shared_key: impl Into<String>,
    ) -> Self {
        Self {
            environment,
            mailbox_id: mailbox_id.into(),
            password: password.into(),
            shared_key: shared_key.into(),
            max_chunk_size: DEFAULT_CHUNK_SIZE,
            transparent_compress: false,
            timeout: Duration::from_secs(10 * 60),
            retry_policy: RetryPolicy::default(),
            identity_pem: None,
            ca_bundle_pem: None,
        }
    }

    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    pub fn with_transparent_compress(mut self, transparent_compress: bool) -> Self {
        self.transparent_compress = transparent_compress;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_identity_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.identity_pem = Some(pem.into());
        self
    }

    pub fn with_ca_bundle_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_bundle_pem = Some(pem.into());
        self
    }

    /// Validate construction input. Called by the session constructor.
    pub fn validate(&self) -> Result<()> {
        if self.mailbox_id.is_empty() {
            return Err(MeshboxError::Config("mailbox_id must not be empty".into()));
        }
        if self.max_chunk_size == 0 {
            return Err(MeshboxError::Config(
                "max_chunk_size must be non-zero".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(MeshboxError::Config("timeout must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_table() {
        assert!(!Environment::LocalSandbox.requires_client_cert());
        assert!(Environment::Live.requires_client_cert());
        assert_eq!(
            Environment::LocalSandbox.base_url(),
            "https://localhost:8700"
        );

        let custom = Environment::Custom {
            base_url: "https://mesh.example.test/".to_string(),
            requires_client_cert: false,
        };
        assert_eq!(custom.base_url(), "https://mesh.example.test");
        assert!(!custom.requires_client_cert());
    }

    #[test]
    fn validation_rejects_bad_input() {
        let good = MailboxConfig::new(Environment::LocalSandbox, "X26ABC1", "password", "key");
        assert!(good.validate().is_ok());

        let empty_mailbox = MailboxConfig::new(Environment::LocalSandbox, "", "password", "key");
        assert!(empty_mailbox.validate().is_err());

        let zero_chunk = MailboxConfig::new(Environment::LocalSandbox, "X26ABC1", "pw", "key")
            .with_max_chunk_size(0);
        assert!(zero_chunk.validate().is_err());
    }
}
