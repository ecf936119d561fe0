//! Headless, typed, topic-based publish/subscribe bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Events`] | Controller events (valve states, cover limit switches, …) |
//! | [`Topic::Telemetry`] | Periodic pressure and load-cell samples |
//! | [`Topic::CommandAcks`] | Operator-facing command progress |
//! | [`Topic::SystemAlerts`] | Lost connections and summary-state faults |

use atpneumatics_types::{Envelope, PneumaticsError};
use futures_util::stream::{self, BoxStream};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered messages before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing topics on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Events,
    Telemetry,
    CommandAcks,
    SystemAlerts,
}

/// Shared bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    events: broadcast::Sender<Envelope>,
    telemetry: broadcast::Sender<Envelope>,
    command_acks: broadcast::Sender<Envelope>,
    system_alerts: broadcast::Sender<Envelope>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (telemetry, _) = broadcast::channel(capacity);
        let (command_acks, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            events,
            telemetry,
            command_acks,
            system_alerts,
        }
    }

    /// Publish `envelope` to `topic`.
    ///
    /// Returns the number of receivers handed the message, or
    /// [`PneumaticsError::Channel`] when nobody is subscribed.
    pub fn publish_to(&self, topic: Topic, envelope: Envelope) -> Result<usize, PneumaticsError> {
        self.topic_sender(topic)
            .send(envelope)
            .map_err(|_| PneumaticsError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Subscribe to a single topic.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Envelope> {
        match topic {
            Topic::Events => &self.events,
            Topic::Telemetry => &self.telemetry,
            Topic::CommandAcks => &self.command_acks,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Envelope>,
}

impl TopicReceiver {
    /// Wait for the next message on this topic.
    ///
    /// `Err(RecvError::Lagged(n))` means the subscriber fell behind and `n`
    /// messages were dropped; `Err(RecvError::Closed)` means the bus is gone.
    pub async fn recv(&mut self) -> Result<Envelope, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<Envelope, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Turn the receiver into a stream that skips over lag and ends when the
    /// bus is dropped.
    pub fn into_stream(self) -> BoxStream<'static, Envelope> {
        Box::pin(stream::unfold(self, |mut rx| async move {
            loop {
                match rx.receiver.recv().await {
                    Ok(envelope) => return Some((envelope, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = ?rx.topic, skipped = n, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }))
    }
}
