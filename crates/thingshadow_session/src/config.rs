//! Configuration for shadow sessions.

use crate::tls::TlsMaterial;
use std::time::Duration;
use thingshadow_protocol::ThingName;

/// Default MQTT-over-TLS port.
pub const DEFAULT_PORT: u16 = 8883;

/// Quality of service for subscriptions and publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qos {
    /// Fire and forget; a publish completes once written to the socket.
    AtMostOnce,
    /// Acknowledged by the broker with PUBACK / SUBACK.
    #[default]
    AtLeastOnce,
}

/// Options that apply to any session, regardless of transport.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound on how long a get or delete waits for an answer.
    /// `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl SessionOptions {
    /// Creates options with default values.
    pub fn new() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Waits for correlated answers without a deadline.
    pub fn without_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for connecting a session to the broker.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Thing name, also used as the MQTT client id.
    pub thing_name: ThingName,
    /// Broker host name (without scheme or port).
    pub endpoint: String,
    /// Broker port.
    pub port: u16,
    /// Client certificate, key and optional CA bundle.
    pub tls: TlsMaterial,
    /// QoS for subscriptions and publishes.
    pub qos: Qos,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Delay between reconnection attempts after the link drops.
    pub reconnect_interval: Duration,
    /// How long `connect` waits for CONNACK.
    pub connect_timeout: Duration,
    /// How long a subscribe/publish/unsubscribe waits for its acknowledgement.
    pub ack_timeout: Duration,
    /// Grace period for a clean disconnect.
    pub disconnect_grace: Duration,
    /// Request an MQTT clean session.
    pub clean_session: bool,
    /// Capacity of the client request queue.
    pub request_capacity: usize,
    /// Options shared with non-MQTT transports.
    pub options: SessionOptions,
}

impl SessionConfig {
    /// Creates a new session configuration.
    pub fn new(thing_name: ThingName, endpoint: impl Into<String>, tls: TlsMaterial) -> Self {
        Self {
            thing_name,
            endpoint: endpoint.into(),
            port: DEFAULT_PORT,
            tls,
            qos: Qos::default(),
            keep_alive: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            disconnect_grace: Duration::from_millis(250),
            clean_session: true,
            request_capacity: 64,
            options: SessionOptions::default(),
        }
    }

    /// Sets the broker port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the QoS level.
    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    /// Sets the keep-alive interval.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the reconnection interval.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the acknowledgement timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets the disconnect grace period.
    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    /// Sets whether to request a clean session.
    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Sets the correlated request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_request_timeout(timeout);
        self
    }

    /// Waits for correlated answers without a deadline.
    pub fn without_request_timeout(mut self) -> Self {
        self.options = self.options.without_request_timeout();
        self
    }

    /// Returns the broker URL for logging, e.g. `ssl://host:8883`.
    pub fn broker_url(&self) -> String {
        format!("ssl://{}:{}", self.endpoint, self.port)
    }
}
