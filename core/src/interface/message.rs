use crate::interface::routing::RoutingKey;
use crate::prelude::{PipelineResult, WaveformPacket};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Body carried on the partitioned topics: data, or the termination sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Data(WaveformPacket),
    Stop,
}

impl Message {
    pub fn is_stop(&self) -> bool {
        matches!(self, Message::Stop)
    }
}

/// One message as handed to a worker. The tag identifies it for acknowledgement.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub key: RoutingKey,
    pub message: Message,
}

/// Sink for outgoing messages on a partitioned topic.
pub trait Publisher: Send + Sync {
    fn publish(&self, key: RoutingKey, message: Message) -> PipelineResult<()>;
}

/// Publisher that keeps everything it is given, in order.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(RoutingKey, Message)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<(RoutingKey, Message)> {
        self.published
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, key: RoutingKey, message: Message) -> PipelineResult<()> {
        if let Ok(mut guard) = self.published.lock() {
            guard.push((key, message));
        }
        Ok(())
    }
}
