//! CLI command implementations.

pub mod credentials;
pub mod shadow;
pub mod topic;

use clap::{Args, ValueEnum};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use thingshadow_session::{
    MqttTransport, Qos, SessionConfig, Shadow, ShadowSession, ThingName, TlsMaterial,
};

/// Result type shared by the commands.
pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Device identity and broker connection settings.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Thing whose shadow is addressed
    #[arg(long, env = "THINGSHADOW_THING", global = true)]
    pub thing: Option<String>,

    /// Broker endpoint host name
    #[arg(long, env = "THINGSHADOW_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// Broker port
    #[arg(long, env = "THINGSHADOW_PORT", global = true,
          default_value_t = thingshadow_session::DEFAULT_PORT)]
    pub port: u16,

    /// Client certificate (PEM)
    #[arg(long, env = "THINGSHADOW_CERT", global = true)]
    pub cert: Option<PathBuf>,

    /// Private key (PEM)
    #[arg(long, env = "THINGSHADOW_KEY", global = true)]
    pub key: Option<PathBuf>,

    /// CA bundle (PEM); the bundled web roots are used when omitted
    #[arg(long, env = "THINGSHADOW_CA", global = true)]
    pub ca: Option<PathBuf>,

    /// Seconds to wait for an accepted/rejected answer (0 waits forever)
    #[arg(long, env = "THINGSHADOW_TIMEOUT", global = true, default_value_t = 30)]
    pub timeout: u64,

    /// Use QoS 0 instead of QoS 1
    #[arg(long, global = true)]
    pub qos0: bool,
}

impl ConnectArgs {
    /// Validated thing name.
    pub fn thing_name(&self) -> Result<ThingName, Box<dyn std::error::Error>> {
        let thing = required(self.thing.as_deref(), "--thing")?;
        Ok(ThingName::new(thing)?)
    }

    /// Certificate and key paths.
    pub fn identity(&self) -> Result<(PathBuf, PathBuf), Box<dyn std::error::Error>> {
        let cert = required(self.cert.as_ref(), "--cert")?;
        let key = required(self.key.as_ref(), "--key")?;
        Ok((cert.clone(), key.clone()))
    }

    /// Builds the session configuration.
    pub fn session_config(&self) -> Result<SessionConfig, Box<dyn std::error::Error>> {
        let thing = self.thing_name()?;
        let endpoint = required(self.endpoint.as_deref(), "--endpoint")?;
        let (cert, key) = self.identity()?;

        let mut tls = TlsMaterial::new(cert, key);
        if let Some(ca) = &self.ca {
            tls = tls.with_ca(ca);
        }

        let qos = if self.qos0 {
            Qos::AtMostOnce
        } else {
            Qos::AtLeastOnce
        };

        let config = SessionConfig::new(thing, endpoint, tls)
            .with_port(self.port)
            .with_qos(qos);

        Ok(if self.timeout == 0 {
            config.without_request_timeout()
        } else {
            config.with_request_timeout(Duration::from_secs(self.timeout))
        })
    }

    /// Connects a session.
    pub async fn connect(&self) -> Result<ShadowSession<MqttTransport>, Box<dyn std::error::Error>> {
        let config = self.session_config()?;
        tracing::debug!(url = %config.broker_url(), thing = %config.thing_name, "connecting");
        Ok(ShadowSession::connect(config).await?)
    }
}

fn required<'a, T: ?Sized>(value: Option<&'a T>, flag: &str) -> Result<&'a T, String> {
    value.ok_or_else(|| format!("missing required option {flag}"))
}

/// How payloads are printed.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Payload bytes as received
    #[default]
    Raw,
    /// Pretty-printed JSON (falls back to raw)
    Json,
}

/// Renders a payload for printing.
pub fn render(shadow: &Shadow, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(shadow.as_bytes()) {
            if let Ok(pretty) = serde_json::to_string_pretty(&value) {
                return pretty;
            }
        }
    }
    shadow.to_string()
}

/// Reads a payload from the argument, a file, or stdin, in that order.
pub fn read_payload(
    payload: Option<String>,
    file: Option<PathBuf>,
) -> Result<Shadow, Box<dyn std::error::Error>> {
    if let Some(payload) = payload {
        return Ok(Shadow::from(payload));
    }
    if let Some(file) = file {
        return Ok(Shadow::from(std::fs::read(&file)?));
    }

    let mut buf = Vec::new();
    std::io::stdin().read_to_end(&mut buf)?;
    Ok(Shadow::from(buf))
}
