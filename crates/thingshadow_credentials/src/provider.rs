//! Client for the IoT credentials provider.

use crate::config::{CredentialsConfig, THING_NAME_HEADER};
use crate::credentials::{Credentials, CredentialsEnvelope};
use crate::error::{CredentialsError, CredentialsResult};
use reqwest::{Certificate, Client, Identity, StatusCode};
use std::path::Path;

/// Exchanges the device certificate for temporary AWS credentials.
#[derive(Debug, Clone)]
pub struct CredentialsProvider {
    client: Client,
    url: String,
    thing_name: String,
}

impl CredentialsProvider {
    /// Loads the certificate material and builds the HTTPS client.
    pub fn new(config: &CredentialsConfig) -> CredentialsResult<Self> {
        let mut pem = read(&config.cert_path)?;
        pem.push(b'\n');
        pem.extend(read(&config.key_path)?);

        let identity = Identity::from_pem(&pem).map_err(|e| CredentialsError::Certificate {
            path: config.key_path.clone(),
            reason: e.to_string(),
        })?;

        let mut builder = Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .timeout(config.timeout);

        if let Some(ca_path) = &config.ca_path {
            let ca = Certificate::from_pem(&read(ca_path)?).map_err(|e| {
                CredentialsError::Certificate {
                    path: ca_path.clone(),
                    reason: e.to_string(),
                }
            })?;
            builder = builder.add_root_certificate(ca);
        }

        let client = builder
            .build()
            .map_err(|e| CredentialsError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            thing_name: config.thing_name.to_string(),
        })
    }

    /// Returns the provider URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Requests a fresh set of credentials.
    pub async fn fetch(&self) -> CredentialsResult<Credentials> {
        tracing::debug!(url = %self.url, thing = %self.thing_name, "requesting credentials");

        let response = self
            .client
            .get(&self.url)
            .header(THING_NAME_HEADER, &self.thing_name)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if status != StatusCode::OK {
            return Err(CredentialsError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let envelope: CredentialsEnvelope = serde_json::from_slice(&body)?;
        tracing::info!(expiration = %envelope.credentials.expiration, "credentials issued");
        Ok(envelope.credentials)
    }
}

fn read(path: &Path) -> CredentialsResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| CredentialsError::Certificate {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
