//! Embedded durable pub/sub with named streams.
//!
//! Serves the same contract an external broker would: streams are declared
//! before first publish with bounded retention, delivery is at-least-once
//! with explicit acknowledgement, and consumers are either durable (the
//! stream tracks their cursor under a name) or ephemeral (fresh cursor per
//! attach). Replay for a durable consumer resumes from its cursor as long
//! as the retention window still holds the messages; an unacknowledged
//! message is redelivered when the consumer re-attaches.

use crate::domain::errors::{BusError, PublishError};
use crate::infrastructure::bus::subject_matches;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

/// Declaration of one named stream
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub name: String,
    /// Subject filters this stream captures, wildcards allowed
    pub subjects: Vec<String>,
    /// Time-bounded retention window
    pub max_age: Duration,
    /// Hard cap on retained messages
    pub max_messages: usize,
}

impl StreamConfig {
    pub fn new(name: &str, subjects: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            max_age: Duration::from_secs(3600),
            max_messages: 100_000,
        }
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }
}

/// One published message, shared between retention and live fan-out
#[derive(Debug)]
pub struct Message {
    pub subject: String,
    pub payload: Vec<u8>,
    pub seq: u64,
    received_at: Instant,
}

/// Cursor start position for a fresh consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverPolicy {
    /// Replay everything still retained, then follow live
    All,
    /// Only messages published after the attach
    New,
}

#[derive(Debug, Clone)]
pub enum ConsumerKind {
    Durable { name: String, deliver: DeliverPolicy },
    Ephemeral { deliver: DeliverPolicy },
}

#[derive(Debug)]
struct StreamInner {
    messages: VecDeque<Arc<Message>>,
    next_seq: u64,
    cursors: HashMap<String, u64>,
}

#[derive(Debug)]
struct StreamState {
    config: StreamConfig,
    inner: Mutex<StreamInner>,
    live: broadcast::Sender<Arc<Message>>,
}

impl StreamState {
    fn retained_from(&self, seq: u64) -> Option<Arc<Message>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let front_seq = inner.messages.front()?.seq;
        let index = seq.saturating_sub(front_seq) as usize;
        inner.messages.get(index).cloned()
    }

    fn advance_cursor(&self, consumer: &str, acked_seq: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let cursor = inner.cursors.entry(consumer.to_string()).or_insert(0);
        *cursor = (*cursor).max(acked_seq + 1);
    }
}

/// The process-wide bus: a registry of named streams
pub struct StreamBus {
    streams: RwLock<HashMap<String, Arc<StreamState>>>,
}

impl StreamBus {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Declare a stream. Must happen before the first publish to any of its
    /// subjects; redeclaring a name is an error.
    pub fn add_stream(&self, config: StreamConfig) -> Result<(), BusError> {
        let mut streams = self
            .streams
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if streams.contains_key(&config.name) {
            return Err(BusError::DuplicateStream {
                name: config.name.clone(),
            });
        }

        debug!(
            "StreamBus: declared stream {} over {:?} (max_age {:?}, max_messages {})",
            config.name, config.subjects, config.max_age, config.max_messages
        );

        let (live, _) = broadcast::channel(4096);
        streams.insert(
            config.name.clone(),
            Arc::new(StreamState {
                config,
                inner: Mutex::new(StreamInner {
                    messages: VecDeque::new(),
                    next_seq: 0,
                    cursors: HashMap::new(),
                }),
                live,
            }),
        );
        Ok(())
    }

    /// Publish a payload under a subject. The subject must be captured by a
    /// declared stream; publishing into the void is a permanent error.
    pub fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<u64, PublishError> {
        let state = self
            .find_stream_for_subject(subject)
            .ok_or_else(|| PublishError::Permanent(format!("no stream for subject {}", subject)))?;

        let message = {
            let mut inner = state.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let seq = inner.next_seq;
            inner.next_seq += 1;

            let message = Arc::new(Message {
                subject: subject.to_string(),
                payload,
                seq,
                received_at: Instant::now(),
            });
            inner.messages.push_back(Arc::clone(&message));

            while inner.messages.len() > state.config.max_messages {
                inner.messages.pop_front();
            }
            while inner
                .messages
                .front()
                .is_some_and(|front| front.received_at.elapsed() > state.config.max_age)
            {
                inner.messages.pop_front();
            }

            message
        };

        // No live receivers is fine; retention still serves late consumers.
        let seq = message.seq;
        let _ = state.live.send(message);
        Ok(seq)
    }

    /// Attach a consumer to a stream
    pub fn subscribe(
        &self,
        stream_name: &str,
        consumer: ConsumerKind,
    ) -> Result<Subscription, BusError> {
        let state = {
            let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);
            streams
                .get(stream_name)
                .cloned()
                .ok_or_else(|| BusError::UnknownStream {
                    name: stream_name.to_string(),
                })?
        };

        // Subscribe to the live channel before reading the cursor so no
        // message can slip between the two.
        let live = state.live.subscribe();

        let (durable, deliver) = match consumer {
            ConsumerKind::Durable { name, deliver } => (Some(name), deliver),
            ConsumerKind::Ephemeral { deliver } => (None, deliver),
        };

        let next_seq = {
            let inner = state.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let resumed = durable
                .as_ref()
                .and_then(|name| inner.cursors.get(name).copied());
            match (resumed, deliver) {
                (Some(cursor), _) => cursor,
                (None, DeliverPolicy::All) => {
                    inner.messages.front().map(|m| m.seq).unwrap_or(inner.next_seq)
                }
                (None, DeliverPolicy::New) => inner.next_seq,
            }
        };

        Ok(Subscription {
            state,
            live,
            next_seq,
            durable,
        })
    }

    /// Number of messages currently retained by a stream
    pub fn retained_count(&self, stream_name: &str) -> Result<usize, BusError> {
        let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);
        let state = streams
            .get(stream_name)
            .ok_or_else(|| BusError::UnknownStream {
                name: stream_name.to_string(),
            })?;
        let inner = state.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.messages.len())
    }

    fn find_stream_for_subject(&self, subject: &str) -> Option<Arc<StreamState>> {
        let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);
        streams
            .values()
            .find(|state| {
                state
                    .config
                    .subjects
                    .iter()
                    .any(|pattern| subject_matches(pattern, subject))
            })
            .cloned()
    }
}

impl Default for StreamBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumer's attachment to one stream
#[derive(Debug)]
pub struct Subscription {
    state: Arc<StreamState>,
    live: broadcast::Receiver<Arc<Message>>,
    next_seq: u64,
    durable: Option<String>,
}

impl Subscription {
    /// Receive the next message: retained replay first, then live tail.
    ///
    /// A lagged live receiver falls back to the retained buffer, so delivery
    /// stays at-least-once as long as retention covers the backlog.
    pub async fn next(&mut self) -> Delivery {
        loop {
            if let Some(message) = self.state.retained_from(self.next_seq) {
                self.next_seq = message.seq + 1;
                return Delivery {
                    message,
                    state: Arc::clone(&self.state),
                    durable: self.durable.clone(),
                };
            }

            match self.live.recv().await {
                Ok(message) => {
                    if message.seq < self.next_seq {
                        continue; // already delivered through replay
                    }
                    self.next_seq = message.seq + 1;
                    return Delivery {
                        message,
                        state: Arc::clone(&self.state),
                        durable: self.durable.clone(),
                    };
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    // The stream owns the sender; closed means the bus itself
                    // is gone. Park until the task is cancelled from outside.
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

/// One delivered message awaiting acknowledgement
pub struct Delivery {
    message: Arc<Message>,
    state: Arc<StreamState>,
    durable: Option<String>,
}

impl Delivery {
    pub fn subject(&self) -> &str {
        &self.message.subject
    }

    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    pub fn seq(&self) -> u64 {
        self.message.seq
    }

    /// Acknowledge processing. For a durable consumer this advances the
    /// stream-held cursor; without an ack the message is redelivered on the
    /// next attach.
    pub fn ack(self) {
        if let Some(consumer) = &self.durable {
            self.state.advance_cursor(consumer, self.message.seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus_with_stream(name: &str, subjects: &[&str]) -> StreamBus {
        let bus = StreamBus::new();
        bus.add_stream(StreamConfig::new(name, subjects)).unwrap();
        bus
    }

    #[test]
    fn test_duplicate_stream_rejected() {
        let bus = bus_with_stream("BARS", &["candles.1m.*"]);
        let err = bus
            .add_stream(StreamConfig::new("BARS", &["candles.1m.*"]))
            .unwrap_err();
        assert!(matches!(err, BusError::DuplicateStream { .. }));
    }

    #[test]
    fn test_publish_without_stream_is_permanent() {
        let bus = StreamBus::new();
        let err = bus.publish("metrics.calculated", vec![1]).unwrap_err();
        assert!(matches!(err, PublishError::Permanent(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_publish_routes_by_wildcard() {
        let bus = bus_with_stream("BARS", &["candles.1m.*"]);
        bus.publish("candles.1m.BTCUSDT", vec![1]).unwrap();
        bus.publish("candles.1m.ETHUSDT", vec![2]).unwrap();
        assert_eq!(bus.retained_count("BARS").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ephemeral_new_sees_only_new_messages() {
        let bus = bus_with_stream("METRICS", &["metrics.calculated"]);
        bus.publish("metrics.calculated", vec![1]).unwrap();

        let mut sub = bus
            .subscribe(
                "METRICS",
                ConsumerKind::Ephemeral {
                    deliver: DeliverPolicy::New,
                },
            )
            .unwrap();

        bus.publish("metrics.calculated", vec![2]).unwrap();
        let delivery = sub.next().await;
        assert_eq!(delivery.payload(), &[2]);
        delivery.ack();
    }

    #[tokio::test]
    async fn test_ephemeral_all_replays_retained() {
        let bus = bus_with_stream("METRICS", &["metrics.calculated"]);
        bus.publish("metrics.calculated", vec![1]).unwrap();
        bus.publish("metrics.calculated", vec![2]).unwrap();

        let mut sub = bus
            .subscribe(
                "METRICS",
                ConsumerKind::Ephemeral {
                    deliver: DeliverPolicy::All,
                },
            )
            .unwrap();

        assert_eq!(sub.next().await.payload(), &[1]);
        assert_eq!(sub.next().await.payload(), &[2]);
    }

    #[tokio::test]
    async fn test_durable_cursor_survives_reattach() {
        let bus = bus_with_stream("METRICS", &["metrics.calculated"]);
        for i in 0..3u8 {
            bus.publish("metrics.calculated", vec![i]).unwrap();
        }

        let consumer = ConsumerKind::Durable {
            name: "alert-engine".to_string(),
            deliver: DeliverPolicy::All,
        };

        {
            let mut sub = bus.subscribe("METRICS", consumer.clone()).unwrap();
            sub.next().await.ack();
            sub.next().await.ack();
            // Third delivery is received but never acked
            let unacked = sub.next().await;
            assert_eq!(unacked.payload(), &[2]);
        }

        // Reattach: the unacked message comes back
        let mut sub = bus.subscribe("METRICS", consumer).unwrap();
        let redelivered = sub.next().await;
        assert_eq!(redelivered.payload(), &[2]);
        redelivered.ack();
    }

    #[tokio::test]
    async fn test_retention_bounded_by_count() {
        let bus = StreamBus::new();
        bus.add_stream(StreamConfig::new("METRICS", &["metrics.calculated"]).max_messages(2))
            .unwrap();

        for i in 0..5u8 {
            bus.publish("metrics.calculated", vec![i]).unwrap();
        }
        assert_eq!(bus.retained_count("METRICS").unwrap(), 2);

        // DeliverAll starts from the earliest still retained
        let mut sub = bus
            .subscribe(
                "METRICS",
                ConsumerKind::Ephemeral {
                    deliver: DeliverPolicy::All,
                },
            )
            .unwrap();
        assert_eq!(sub.next().await.payload(), &[3]);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_stream() {
        let bus = StreamBus::new();
        let err = bus
            .subscribe(
                "NOPE",
                ConsumerKind::Ephemeral {
                    deliver: DeliverPolicy::New,
                },
            )
            .unwrap_err();
        assert!(matches!(err, BusError::UnknownStream { .. }));
    }

    #[tokio::test]
    async fn test_typed_payload_round_trip() {
        use crate::domain::market::Bar;
        use chrono::{TimeZone, Utc};

        let bus = bus_with_stream("BARS", &["candles.1m.*"]);
        let bar = Bar {
            symbol: "BTCUSDT".to_string(),
            open_time: Utc.timestamp_opt(1_704_067_200, 0).unwrap(),
            close_time: Utc.timestamp_opt(1_704_067_260, 0).unwrap(),
            open: 42000.0,
            high: 42100.0,
            low: 41900.0,
            close: 42050.0,
            volume: 12.5,
            quote_volume: 525_000.0,
            trade_count: 340,
            is_closed: true,
        };

        bus.publish(
            "candles.1m.BTCUSDT",
            serde_json::to_vec(&bar).unwrap(),
        )
        .unwrap();

        let mut sub = bus
            .subscribe(
                "BARS",
                ConsumerKind::Ephemeral {
                    deliver: DeliverPolicy::All,
                },
            )
            .unwrap();
        let delivery = sub.next().await;
        let decoded: Bar = serde_json::from_slice(delivery.payload()).unwrap();
        assert_eq!(decoded, bar);
        assert_eq!(delivery.subject(), "candles.1m.BTCUSDT");
    }
}
