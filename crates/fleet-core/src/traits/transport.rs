// # Transport Traits
//
// Defines the pub/sub seam between the core and the broker connection.
//
// - `Transport`: outbound publishing of device commands
// - `TelemetrySource`: inbound stream of device messages
//
// One long-lived broker connection usually implements both. It is created
// once by the process (explicit connect/shutdown lifecycle) and injected
// into the engine as a capability; there is no global client.
//
// ## Ordering
//
// A `TelemetrySource` must yield messages in the order the connection
// received them. The engine consumes the stream on a single task, so
// per-connection FIFO is preserved all the way to the state machine.

use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

/// A message received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Outbound publishing capability
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Hand a message to the broker connection
///
/// ## Forbidden Capabilities
/// - ❌ Retry or queue on its own (callers decide)
/// - ❌ Touch device state
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload on a topic
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The broker connection accepted the message
    /// - `Err(Error::Transport)`: The message could not be handed over
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), crate::Error>;

    /// Transport name (for logging/debugging)
    fn transport_name(&self) -> &'static str;
}

/// Inbound telemetry capability
pub trait TelemetrySource: Send + Sync {
    /// Stream of inbound messages
    ///
    /// The stream ends when the underlying connection is shut down.
    /// Must be cancellation-safe (dropping the stream cleans up resources).
    fn messages(&self) -> Pin<Box<dyn Stream<Item = InboundMessage> + Send + 'static>>;
}
