//! Credential provider configuration.

use std::path::PathBuf;
use std::time::Duration;
use thingshadow_protocol::ThingName;

/// Header carrying the thing name on credential requests.
pub const THING_NAME_HEADER: &str = "x-amzn-iot-thingname";

/// Configuration for the credentials provider client.
#[derive(Debug, Clone)]
pub struct CredentialsConfig {
    /// `https://<endpoint>/role-aliases/<alias>/credentials`
    pub url: String,
    /// Thing name sent in the [`THING_NAME_HEADER`] header.
    pub thing_name: ThingName,
    /// PEM client certificate.
    pub cert_path: PathBuf,
    /// PEM private key.
    pub key_path: PathBuf,
    /// Extra trust root for the provider endpoint.
    pub ca_path: Option<PathBuf>,
    /// Request timeout.
    pub timeout: Duration,
}

impl CredentialsConfig {
    /// Creates a new configuration.
    pub fn new(
        url: impl Into<String>,
        thing_name: ThingName,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            url: url.into(),
            thing_name,
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_path: None,
            timeout: Duration::from_secs(10),
        }
    }

    /// Adds a trust root.
    pub fn with_ca(mut self, ca_path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(ca_path.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
