// Weathercheck - Weather station recorder and MQTT scraper
//
// Copyright 2025 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! Publishing station reports to, and watching them from, an MQTT broker.
//!
//! The client side is split in two. [`MqttLink`] is a cheap handle used from the
//! control loop to enqueue publishes without blocking. [`MqttTransport`] owns the
//! network connection and must be driven on the async runtime; it reconnects with
//! exponential backoff and gives up after a bounded number of failed attempts,
//! after which every publish through the link fails.

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, Transport};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{self, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8883;
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
pub const CA_FILE: &str = "ca.pem";
pub const CERT_FILE: &str = "client.pem";
pub const KEY_FILE: &str = "client.key";

const REQUEST_CAPACITY: usize = 32;
const MESSAGE_PREFIX: &str = "messages:";

/// Error setting up an MQTT client
#[derive(Debug)]
pub enum MqttError {
    Certificate(PathBuf, std::io::Error),
}

impl fmt::Display for MqttError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MqttError::Certificate(path, e) => write!(f, "unable to read {}: {}", path.display(), e),
        }
    }
}

impl Error for MqttError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MqttError::Certificate(_, e) => Some(e),
        }
    }
}

/// Destination for serialized feed reports.
pub trait ReportSink {
    /// Publish `payload` to `topic`, returning `true` if it was accepted for delivery.
    fn publish(&self, topic: &str, payload: &str) -> bool;
}

/// Exponential backoff between reconnection attempts, bounded in both the delay
/// and the number of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    first_delay: Duration,
    rate: u32,
    max_delay: Duration,
    max_attempts: u32,
    attempts: u32,
    current: Duration,
}

impl ReconnectPolicy {
    pub fn new(first_delay: Duration, rate: u32, max_delay: Duration, max_attempts: u32) -> Self {
        ReconnectPolicy {
            first_delay,
            rate,
            max_delay,
            max_attempts,
            attempts: 0,
            current: first_delay,
        }
    }

    /// Delay before the next attempt or `None` when attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }

        let delay = self.current;
        self.attempts += 1;
        self.current = (self.current * self.rate).min(self.max_delay);
        Some(delay)
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = self.first_delay;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2, Duration::from_secs(60), 12)
    }
}

/// CA certificate, client certificate, and client key used for mutual TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsFiles {
    /// Use the conventionally named files `ca.pem`, `client.pem`, and `client.key` in `dir`.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        TlsFiles {
            ca: dir.join(CA_FILE),
            cert: dir.join(CERT_FILE),
            key: dir.join(KEY_FILE),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub client_id: String,
    pub broker: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub tls: Option<TlsFiles>,
}

fn read_pem(path: &Path) -> Result<Vec<u8>, MqttError> {
    fs::read(path).map_err(|e| MqttError::Certificate(path.to_path_buf(), e))
}

#[derive(Debug, Default)]
struct LinkState {
    connected: AtomicBool,
    failed: AtomicBool,
}

/// Handle for publishing through a connection owned by an [`MqttTransport`].
#[derive(Debug, Clone)]
pub struct MqttLink {
    client: AsyncClient,
    state: Arc<LinkState>,
}

impl MqttLink {
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// True once the transport has given up reconnecting.
    pub fn has_failed(&self) -> bool {
        self.state.failed.load(Ordering::Acquire)
    }
}

impl ReportSink for MqttLink {
    fn publish(&self, topic: &str, payload: &str) -> bool {
        if !self.is_connected() {
            tracing::warn!(message = "not connected to broker, dropping report", topic = topic);
            return false;
        }

        match self
            .client
            .try_publish(topic.to_owned(), QoS::AtLeastOnce, false, payload.to_owned())
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(message = "unable to publish report", topic = topic, error = %e);
                false
            }
        }
    }
}

/// Owner of the network connection to the broker.
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    state: Arc<LinkState>,
    policy: ReconnectPolicy,
    subscriptions: Vec<String>,
}

impl MqttTransport {
    /// Subscribe to `filter` every time the connection is (re)established.
    pub fn subscribe<S: Into<String>>(mut self, filter: S) -> Self {
        self.subscriptions.push(filter.into());
        self
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Drive the connection until reconnection attempts are exhausted, calling
    /// `on_message` with the topic and payload of each message received.
    pub async fn run<F>(mut self, mut on_message: F)
    where
        F: FnMut(&str, &[u8]),
    {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    tracing::info!(message = "connected to broker", code = ?ack.code);
                    self.state.connected.store(true, Ordering::Release);
                    self.policy.reset();

                    for filter in &self.subscriptions {
                        if let Err(e) = self.client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
                            tracing::warn!(message = "unable to subscribe", topic = %filter, error = %e);
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    on_message(&publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    self.state.connected.store(false, Ordering::Release);
                    match self.policy.next_delay() {
                        Some(delay) => {
                            tracing::warn!(
                                message = "broker connection failed, retrying",
                                error = %e,
                                attempt = self.policy.attempts(),
                                delay = ?delay,
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(message = "giving up connecting to broker", error = %e);
                            self.state.failed.store(true, Ordering::Release);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Create a link for publishing and the transport that must be run to deliver its messages.
pub fn connect(settings: &MqttSettings) -> Result<(MqttLink, MqttTransport), MqttError> {
    let mut options = MqttOptions::new(settings.client_id.clone(), settings.broker.clone(), settings.port);
    options.set_keep_alive(settings.keep_alive);

    if let Some(tls) = &settings.tls {
        let ca = read_pem(&tls.ca)?;
        let cert = read_pem(&tls.cert)?;
        let key = read_pem(&tls.key)?;
        options.set_transport(Transport::tls(ca, Some((cert, key)), None));
    }

    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let state = Arc::new(LinkState::default());

    let link = MqttLink {
        client: client.clone(),
        state: state.clone(),
    };
    let transport = MqttTransport {
        client,
        eventloop,
        state,
        policy: ReconnectPolicy::default(),
        subscriptions: Vec::new(),
    };

    Ok((link, transport))
}

/// Decode a report received from a broker.
///
/// Reports are flat JSON objects of numbers and strings, optionally preceded by a
/// `messages:` label. Anything else is rejected.
pub fn decode_payload(payload: &[u8]) -> Option<Map<String, Value>> {
    let text = std::str::from_utf8(payload).ok()?.trim();
    let text = text.strip_prefix(MESSAGE_PREFIX).unwrap_or(text).trim_start();

    match serde_json::from_str::<Value>(text).ok()? {
        Value::Object(map) if map.values().all(|v| v.is_number() || v.is_string()) => Some(map),
        _ => None,
    }
}
