use std::collections::VecDeque;

use async_trait::async_trait;
use dispatch_contract::DriverSearchResponse;
use dispatch_core::bus::{BusRecord, MessageBus, Topic};
use dispatch_core::BusError;
use parking_lot::Mutex;

/// How the recording bus answers `publish`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMode {
    Deliver,
    Fail(BusError),
    /// Never completes; exercises the caller's send timeout.
    Stall,
}

/// Bus that queues records for the test to pump by hand and keeps a copy of
/// everything ever published.
pub struct RecordingBus {
    queue: Mutex<VecDeque<BusRecord>>,
    history: Mutex<Vec<BusRecord>>,
    mode: Mutex<BusMode>,
}

impl Default for RecordingBus {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            history: Mutex::new(Vec::new()),
            mode: Mutex::new(BusMode::Deliver),
        }
    }
}

impl RecordingBus {
    pub fn set_mode(&self, mode: BusMode) {
        *self.mode.lock() = mode;
    }

    pub fn pop(&self) -> Option<BusRecord> {
        self.queue.lock().pop_front()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn history(&self, topic: Topic) -> Vec<BusRecord> {
        self.history
            .lock()
            .iter()
            .filter(|record| record.topic == topic)
            .cloned()
            .collect()
    }

    /// Every response published for `request_id`, in publish order.
    pub fn responses_for(&self, request_id: &str) -> Vec<DriverSearchResponse> {
        self.history(Topic::DriverSearchResponse)
            .iter()
            .filter(|record| record.key == request_id)
            .map(|record| record.decode().expect("response payload"))
            .collect()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, record: BusRecord) -> Result<(), BusError> {
        let mode = self.mode.lock().clone();
        match mode {
            BusMode::Deliver => {
                self.history.lock().push(record.clone());
                self.queue.lock().push_back(record);
                Ok(())
            }
            BusMode::Fail(err) => Err(err),
            BusMode::Stall => std::future::pending().await,
        }
    }
}
