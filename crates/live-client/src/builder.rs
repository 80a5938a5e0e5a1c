//! Session builder pattern

use live_core::{
    Participant, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HEARTBEAT_INTERVAL_MS,
    DEFAULT_RECONNECT_PERIOD_MS,
};
use live_transport::{compose_url, BrokerUrl, PubSubTransport, Scheme};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{ClientError, Result};
use crate::events::{Emitter, LogCallback, LogLevel};
use crate::session::{Session, SessionSettings};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Builder for a receiver [`Session`]
pub struct SessionBuilder {
    server: String,
    channel: String,
    client_id: Option<String>,
    name: String,
    image: String,
    username: String,
    password: String,
    scheme: String,
    heartbeat_interval: Duration,
    reconnect_period: Duration,
    connect_timeout: Duration,
    keep_alive: Duration,
    verify_certificates: bool,
    log: Option<LogCallback>,
    event_capacity: usize,
}

impl SessionBuilder {
    /// Create a new builder for `channel` on the broker at `server`
    pub fn new(server: &str, channel: &str) -> Self {
        Self {
            server: server.to_string(),
            channel: channel.to_string(),
            client_id: None,
            name: String::new(),
            image: String::new(),
            username: String::new(),
            password: String::new(),
            scheme: Scheme::Mqtts.as_str().to_string(),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            reconnect_period: Duration::from_millis(DEFAULT_RECONNECT_PERIOD_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            keep_alive: Duration::from_secs(60),
            verify_certificates: false,
            log: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Start from a loaded configuration
    pub fn from_config(config: &SessionConfig) -> Self {
        let mut builder = Self::new(&config.server, &config.channel)
            .name(&config.name)
            .image(&config.image)
            .credentials(&config.username, &config.password)
            .scheme(&config.scheme)
            .heartbeat_interval(Duration::from_millis(config.interval))
            .reconnect_period(Duration::from_millis(config.reconnect_period))
            .connect_timeout(Duration::from_millis(config.connect_timeout))
            .keep_alive(Duration::from_secs(config.keep_alive))
            .verify_certificates(config.verify_certificates);

        if let Some(client) = config.client.as_deref().filter(|c| !c.is_empty()) {
            builder = builder.client_id(client);
        }
        builder
    }

    /// Use a fixed client identity instead of a generated one
    pub fn client_id(mut self, client_id: &str) -> Self {
        self.client_id = Some(client_id.to_string());
        self
    }

    /// Set the display name announced with attendance
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the display image announced with attendance
    pub fn image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    /// Set the broker credentials
    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    /// Set the URL scheme (`mqtts` by default)
    pub fn scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn reconnect_period(mut self, period: Duration) -> Self {
        self.reconnect_period = period;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn verify_certificates(mut self, verify: bool) -> Self {
        self.verify_certificates = verify;
        self
    }

    /// Receive every session diagnostic
    pub fn log<F>(mut self, callback: F) -> Self
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        self.log = Some(Arc::new(callback));
        self
    }

    /// Capacity of the notification channel
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Build a session over MQTT
    #[cfg(feature = "mqtt")]
    pub fn build(self) -> Result<Session<live_transport::MqttTransport>> {
        self.build_with(live_transport::MqttTransport::new())
    }

    /// Build a session over the given transport
    pub fn build_with<T: PubSubTransport>(self, transport: T) -> Result<Session<T>> {
        if self.heartbeat_interval.is_zero() {
            return Err(ClientError::Config(
                "heartbeat interval must be positive".to_string(),
            ));
        }

        if !self.keep_alive.is_zero() && self.keep_alive < Duration::from_secs(1) {
            return Err(ClientError::Config(
                "keep alive must be zero or at least one second".to_string(),
            ));
        }

        let url = compose_url(&self.scheme, &self.username, &self.password, &self.server);
        let broker = BrokerUrl::parse(&url)?;
        let client_id = self
            .client_id
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        Session::new(
            transport,
            broker,
            client_id,
            self.channel,
            Participant::new(self.name, self.image),
            SessionSettings {
                heartbeat_interval: self.heartbeat_interval,
                reconnect_period: self.reconnect_period,
                connect_timeout: self.connect_timeout,
                keep_alive: self.keep_alive,
                verify_certificates: self.verify_certificates,
            },
            Emitter::new(self.event_capacity, self.log),
        )
    }
}
