use crate::interface::{Delivery, Message, Publisher, RoutingKey};
use crate::prelude::{PipelineError, PipelineResult};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// FNV-1a over the station id. Stable across runs and builds, unlike the std hasher.
pub fn station_partition(station: &str, partitions: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in station.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % partitions.max(1) as u64) as usize
}

/// Deliveries published to a worker queue and not yet settled, across every
/// partitioned topic. A station delivery settles only after its fan-out has been
/// published, so the count reaches zero only once all ingested data is applied.
#[derive(Default)]
pub struct InFlight {
    pending: AtomicUsize,
    abandoned: AtomicBool,
    idle: Notify,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Marks one received (or never queued) delivery as done.
    pub fn settle(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Queue depth across all partitions.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// A worker stopped with deliveries still queued; they will never settle.
    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
        self.idle.notify_waiters();
    }

    /// Resolves once nothing is pending. Returns `false` if a worker abandoned its
    /// queue first.
    pub async fn wait_idle(&self) -> bool {
        loop {
            let mut notified = std::pin::pin!(self.idle.notified());
            notified.as_mut().enable();
            if self.abandoned.load(Ordering::Acquire) {
                return false;
            }
            if self.pending() == 0 {
                return true;
            }
            notified.await;
        }
    }
}

/// Fixed set of queues, one per worker. Every key maps to exactly one queue, so
/// deliveries for a key keep their publish order.
#[derive(Clone)]
pub struct PartitionRouter {
    queues: Arc<Vec<mpsc::UnboundedSender<Delivery>>>,
    next_tag: Arc<AtomicU64>,
    in_flight: Arc<InFlight>,
}

impl PartitionRouter {
    pub fn new(
        partitions: usize,
        in_flight: Arc<InFlight>,
    ) -> (Self, Vec<mpsc::UnboundedReceiver<Delivery>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..partitions.max(1)).map(|_| mpsc::unbounded_channel()).unzip();
        let router = Self {
            queues: Arc::new(senders),
            next_tag: Arc::new(AtomicU64::new(0)),
            in_flight,
        };
        (router, receivers)
    }

    pub fn partitions(&self) -> usize {
        self.queues.len()
    }

    /// Station keys hash on the station id; point-addressed keys go by index.
    pub fn partition_of(&self, key: &RoutingKey) -> usize {
        match key {
            RoutingKey::Station(station) => station_partition(station, self.partitions()),
            RoutingKey::StationPoint { point, .. } | RoutingKey::Point(point) => {
                point % self.partitions()
            }
        }
    }
}

impl Publisher for PartitionRouter {
    fn publish(&self, key: RoutingKey, message: Message) -> PipelineResult<()> {
        let partition = self.partition_of(&key);
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let queue = &self.queues[partition];
        self.in_flight.enter();
        queue
            .send(Delivery { tag, key, message })
            .map_err(|err| {
                self.in_flight.settle();
                PipelineError::ChannelClosed(format!(
                    "partition {partition} gone, dropped {}",
                    err.0.key
                ))
            })
    }
}

/// Terminal topic: stacked output and stack sentinels, in emission order.
pub struct StackSink {
    tx: mpsc::UnboundedSender<(RoutingKey, Message)>,
}

impl StackSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(RoutingKey, Message)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Publisher for StackSink {
    fn publish(&self, key: RoutingKey, message: Message) -> PipelineResult<()> {
        self.tx
            .send((key, message))
            .map_err(|_| PipelineError::ChannelClosed("stack consumer dropped".into()))
    }
}
