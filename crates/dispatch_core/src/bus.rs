//! Message bus seam between the rider gateway and the geo matcher.
//!
//! Records are keyed by request id and carry JSON payloads. The in-memory
//! broker gives each topic one bounded channel; a publisher that cannot get
//! capacity within the send timeout fails instead of waiting forever.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::BusError;

pub const DEFAULT_TOPIC_CAPACITY: usize = 1_024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    DriverSearchRequest,
    DriverSearchResponse,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::DriverSearchRequest, Topic::DriverSearchResponse];

    pub fn name(self) -> &'static str {
        match self {
            Self::DriverSearchRequest => "driver-search-request",
            Self::DriverSearchResponse => "driver-search-response",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRecord {
    pub topic: Topic,
    /// Partition key; always the request id.
    pub key: String,
    pub payload: Vec<u8>,
}

impl BusRecord {
    pub fn json<T: Serialize>(topic: Topic, key: &str, value: &T) -> Result<Self, BusError> {
        let payload = serde_json::to_vec(value).map_err(|err| BusError::Encode(err.to_string()))?;
        Ok(Self {
            topic,
            key: key.to_string(),
            payload,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, record: BusRecord) -> Result<(), BusError>;
}

/// Encode `value` as JSON and publish it keyed by `key`.
pub async fn publish_json<T: Serialize + Sync>(
    bus: &dyn MessageBus,
    topic: Topic,
    key: &str,
    value: &T,
) -> Result<(), BusError> {
    let record = BusRecord::json(topic, key, value)?;
    bus.publish(record).await
}

/// [`publish_json`] bounded by `wait`, for buses that do not time out on
/// their own.
pub async fn publish_within<T: Serialize + Sync>(
    bus: &dyn MessageBus,
    topic: Topic,
    key: &str,
    value: &T,
    wait: Duration,
) -> Result<(), BusError> {
    match tokio::time::timeout(wait, publish_json(bus, topic, key, value)).await {
        Ok(result) => result,
        Err(_) => Err(BusError::Timeout {
            topic: topic.to_string(),
            waited_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Single-process broker with one bounded queue per topic.
pub struct InMemoryBus {
    senders: HashMap<Topic, mpsc::Sender<BusRecord>>,
    receivers: Mutex<HashMap<Topic, mpsc::Receiver<BusRecord>>>,
    send_timeout: Duration,
}

impl InMemoryBus {
    pub fn new(capacity: usize, send_timeout: Duration) -> Self {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for topic in Topic::ALL {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            senders.insert(topic, tx);
            receivers.insert(topic, rx);
        }
        Self {
            senders,
            receivers: Mutex::new(receivers),
            send_timeout,
        }
    }

    /// Hands out the consumer end of a topic. Each topic has exactly one
    /// consumer; later calls return `None`.
    pub fn subscribe(&self, topic: Topic) -> Option<mpsc::Receiver<BusRecord>> {
        self.receivers.lock().remove(&topic)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, record: BusRecord) -> Result<(), BusError> {
        let topic = record.topic;
        let sender = self
            .senders
            .get(&topic)
            .ok_or_else(|| BusError::Closed(topic.to_string()))?;

        match tokio::time::timeout(self.send_timeout, sender.send(record)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(BusError::Closed(topic.to_string())),
            Err(_) => Err(BusError::Timeout {
                topic: topic.to_string(),
                waited_ms: u64::try_from(self.send_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_contract::DriverSearchResponse;

    #[tokio::test]
    async fn published_record_reaches_topic_consumer() {
        let bus = InMemoryBus::new(4, Duration::from_secs(1));
        let mut rx = bus.subscribe(Topic::DriverSearchResponse).expect("receiver");
        assert!(bus.subscribe(Topic::DriverSearchResponse).is_none());

        let response = DriverSearchResponse::timeout("req-1", "user-1");
        publish_json(&bus, Topic::DriverSearchResponse, "req-1", &response)
            .await
            .expect("publish");

        let record = rx.recv().await.expect("record");
        assert_eq!(record.key, "req-1");
        let decoded: DriverSearchResponse = record.decode().expect("decode");
        assert_eq!(decoded, response);
    }

    #[tokio::test(start_paused = true)]
    async fn full_topic_times_out_after_send_timeout() {
        let bus = InMemoryBus::new(1, Duration::from_secs(10));
        let _rx = bus.subscribe(Topic::DriverSearchRequest).expect("receiver");

        let first = BusRecord::json(Topic::DriverSearchRequest, "a", &"one").expect("encode");
        bus.publish(first).await.expect("first fits");

        let second = BusRecord::json(Topic::DriverSearchRequest, "b", &"two").expect("encode");
        let error = bus.publish(second).await.expect_err("queue is full");
        assert_eq!(
            error,
            BusError::Timeout {
                topic: "driver-search-request".to_string(),
                waited_ms: 10_000,
            }
        );
    }

    #[tokio::test]
    async fn dropped_consumer_closes_topic() {
        let bus = InMemoryBus::new(1, Duration::from_secs(1));
        drop(bus.subscribe(Topic::DriverSearchRequest));

        let record = BusRecord::json(Topic::DriverSearchRequest, "a", &1).expect("encode");
        assert_eq!(
            bus.publish(record).await,
            Err(BusError::Closed("driver-search-request".to_string()))
        );
    }
}
