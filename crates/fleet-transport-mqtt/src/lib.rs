// # MQTT Transport
//
// This crate connects the fleet engine to an MQTT broker.
//
// ## Purpose
//
// One broker connection serves both directions:
// - **Inbound**: telemetry on `devices/+/health`, `devices/+/status` and
//   `devices/+/ota/status`, exposed as a [`TelemetrySource`]
// - **Outbound**: LED commands and OTA URLs, published through [`Transport`]
//
// ## Architecture
//
// `MqttConnection::connect` creates the client and spawns one task that
// drives the rumqttc event loop. The task re-subscribes on every ConnAck
// (sessions are clean), forwards incoming publishes to a bounded channel,
// and backs off for `reconnect_delay` after a connection error; the next
// poll reconnects. `shutdown()` cancels the task, sends a DISCONNECT and
// waits for the task to exit.
//
// ## Security
//
// The broker password never appears in logs or `Debug` output.

use async_trait::async_trait;
use fleet_core::telemetry::TELEMETRY_FILTERS;
use fleet_core::traits::{InboundMessage, TelemetrySource, Transport};
use fleet_core::{Error, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTTS_PORT: u16 = 8883;

/// Capacity of rumqttc's request queue
const REQUEST_QUEUE_CAPACITY: usize = 100;

/// Broker connection settings
#[derive(Clone)]
pub struct MqttConfig {
    /// `mqtt://host[:port]`, `tcp://host[:port]` or `mqtts://host[:port]`
    pub url: String,
    pub username: Option<String>,
    /// ⚠️ NEVER log this value
    pub password: Option<String>,
    /// Generated when `None`
    pub client_id: Option<String>,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
    /// Longest a publish may wait for room in the request queue
    pub publish_timeout: Duration,
    /// Inbound messages buffered before the pump waits for the engine
    pub inbound_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: format!("mqtt://localhost:{}", DEFAULT_MQTT_PORT),
            username: None,
            password: None,
            client_id: None,
            keep_alive: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(2),
            publish_timeout: Duration::from_secs(5),
            inbound_capacity: 1024,
        }
    }
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<REDACTED>"))
            .field("client_id", &self.client_id)
            .field("keep_alive", &self.keep_alive)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("publish_timeout", &self.publish_timeout)
            .field("inbound_capacity", &self.inbound_capacity)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BrokerAddress {
    host: String,
    port: u16,
    tls: bool,
}

fn parse_broker_url(url: &str) -> Result<BrokerAddress> {
    let url = url.trim();
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| Error::config(format!("Broker URL {:?} has no scheme", url)))?;

    let (tls, default_port) = match scheme {
        "mqtt" | "tcp" => (false, DEFAULT_MQTT_PORT),
        "mqtts" | "ssl" => (true, DEFAULT_MQTTS_PORT),
        other => {
            return Err(Error::config(format!(
                "Unsupported broker scheme {:?} (use mqtt://, tcp:// or mqtts://)",
                other
            )));
        }
    };

    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(Error::config(format!("Broker URL {:?} has no host", url)));
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::config(format!("Invalid broker port {:?}", port)))?;
            (host.to_string(), port)
        }
        None => (authority.to_string(), default_port),
    };
    if host.is_empty() {
        return Err(Error::config(format!("Broker URL {:?} has no host", url)));
    }

    Ok(BrokerAddress { host, port, tls })
}

fn generate_client_id() -> String {
    // Short suffix keeps the id within the 23 bytes every broker accepts
    let short = uuid::Uuid::new_v4().simple().to_string();
    format!("fleetd-{}", &short[..8])
}

fn build_options(config: &MqttConfig) -> Result<MqttOptions> {
    let address = parse_broker_url(&config.url)?;
    let client_id = config.client_id.clone().unwrap_or_else(generate_client_id);

    let mut options = MqttOptions::new(client_id, address.host, address.port);
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(true);

    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.clone().unwrap_or_default());
    }
    if address.tls {
        options.set_transport(rumqttc::Transport::tls_with_default_config());
    }

    Ok(options)
}

fn inbound_from_publish(publish: &Publish) -> InboundMessage {
    InboundMessage::new(publish.topic.clone(), publish.payload.to_vec())
}

/// Outbound half: publishes commands with at-least-once delivery
///
/// While the broker is unreachable the client's request queue fills up; a
/// publish that cannot be queued within `publish_timeout` fails instead of
/// waiting for the connection to come back.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    publish_timeout: Duration,
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let queued = tokio::time::timeout(
            self.publish_timeout,
            self.client
                .publish(topic, QoS::AtLeastOnce, false, payload.to_vec()),
        )
        .await
        .map_err(|_| {
            Error::transport(format!(
                "publish to {} timed out after {:?} (broker unreachable?)",
                topic, self.publish_timeout
            ))
        })?;
        queued.map_err(|e| Error::transport(format!("publish to {} failed: {}", topic, e)))?;
        debug!("Published {} bytes to {}", payload.len(), topic);
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "mqtt"
    }
}

/// Inbound half: the telemetry stream
///
/// The stream can be taken once; later calls get an empty stream.
pub struct MqttTelemetrySource {
    rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
}

impl TelemetrySource for MqttTelemetrySource {
    fn messages(&self) -> Pin<Box<dyn Stream<Item = InboundMessage> + Send + 'static>> {
        let taken = match self.rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match taken {
            Some(rx) => Box::pin(ReceiverStream::new(rx)),
            None => {
                warn!("MQTT telemetry stream already taken; returning an empty stream");
                Box::pin(tokio_stream::empty())
            }
        }
    }
}

/// A live broker connection
pub struct MqttConnection {
    transport: MqttTransport,
    source: MqttTelemetrySource,
    cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MqttConnection {
    /// Create the client and start the event loop
    ///
    /// Returns as soon as the task is spawned; the first connection attempt
    /// happens in the background. Must be called from within a tokio runtime.
    pub fn connect(config: &MqttConfig) -> Result<Self> {
        if config.inbound_capacity == 0 {
            return Err(Error::config("MQTT inbound capacity must be > 0"));
        }
        if config.publish_timeout.is_zero() {
            return Err(Error::config("MQTT publish timeout must be > 0"));
        }
        let options = build_options(config)?;
        info!("Connecting to MQTT broker {}", config.url);

        let (client, event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);
        let (tx, rx) = mpsc::channel(config.inbound_capacity);
        let cancel = CancellationToken::new();

        let pump = tokio::spawn(pump_events(
            client.clone(),
            event_loop,
            tx,
            config.reconnect_delay,
            cancel.clone(),
        ));

        Ok(Self {
            transport: MqttTransport {
                client,
                publish_timeout: config.publish_timeout,
            },
            source: MqttTelemetrySource {
                rx: Mutex::new(Some(rx)),
            },
            cancel,
            pump: Mutex::new(Some(pump)),
        })
    }

    pub fn transport(&self) -> MqttTransport {
        self.transport.clone()
    }

    pub fn telemetry(&self) -> &MqttTelemetrySource {
        &self.source
    }

    /// Disconnect and wait for the event loop task to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let pump = match self.pump.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                warn!("MQTT event loop task ended abnormally: {}", e);
            }
            info!("MQTT connection closed");
        }
    }
}

/// Queue the telemetry subscriptions without waiting
///
/// Runs on the event loop task, the only task draining the request queue,
/// so it must never wait for room in that queue.
fn subscribe_telemetry(client: &AsyncClient) {
    for filter in TELEMETRY_FILTERS {
        match client.try_subscribe(filter, QoS::AtLeastOnce) {
            Ok(()) => debug!("Subscribed to {}", filter),
            // The next ConnAck retries
            Err(e) => warn!("Failed to subscribe to {}: {}", filter, e),
        }
    }
}

async fn pump_events(
    client: AsyncClient,
    mut event_loop: EventLoop,
    tx: mpsc::Sender<InboundMessage>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("MQTT event loop cancelled, disconnecting");
                if client.try_disconnect().is_ok() {
                    // Let the DISCONNECT reach the socket
                    let _ = tokio::time::timeout(Duration::from_secs(1), event_loop.poll()).await;
                }
                break;
            }
            polled = event_loop.poll() => match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT connection established");
                    subscribe_telemetry(&client);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if tx.send(inbound_from_publish(&publish)).await.is_err() {
                        debug!("Telemetry receiver dropped; discarding message on {}", publish.topic);
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("MQTT broker sent DISCONNECT");
                }
                Ok(event) => {
                    debug!("MQTT event: {:?}", event);
                }
                Err(e) => {
                    warn!("MQTT connection error: {}; retrying in {:?}", e, reconnect_delay);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(reconnect_delay) => {}
                    }
                }
            }
        }
    }
    info!("MQTT event loop stopped");
}
