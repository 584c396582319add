use crate::distribution::{Distributor, IngestOutcome, StationProcessor};
use crate::interface::{ControlSignal, Delivery, Message, Publisher, RoutingKey};
use crate::prelude::{PipelineError, PipelineResult, StackConfig, WaveformPacket};
use crate::processing::FilterSpec;
use crate::runtime::router::{InFlight, PartitionRouter, StackSink};
use crate::stacking::{PointOutcome, PointProcessor};
use crate::telemetry::{LogManager, Metrics, MetricsRecorder};
use crate::traveltime::{ReloadCoordinator, TravelTimeSource, TravelTimeStore, TravelTimeTable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Stacked packets and per-point sentinels, keyed by point.
pub type StackStream = mpsc::UnboundedReceiver<(RoutingKey, Message)>;

const CONTROL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub stack: StackConfig,
    /// Stations whose sentinels `shutdown` sends.
    pub stations: Vec<String>,
    pub distributor_workers: usize,
    pub point_workers: usize,
    #[serde(default)]
    pub preprocessing: Vec<FilterSpec>,
}

impl PipelineConfig {
    pub fn new(stack: StackConfig, stations: Vec<String>) -> Self {
        Self {
            stack,
            stations,
            distributor_workers: 4,
            point_workers: 10,
            preprocessing: Vec::new(),
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.stack.validate()?;
        if self.distributor_workers == 0 || self.point_workers == 0 {
            return Err(PipelineError::InvalidInput(
                "worker pools need at least one worker each".into(),
            ));
        }
        Ok(())
    }
}

/// Running pipeline: ingestion queues, both worker pools and the reload coordinator.
pub struct Pipeline {
    ingest: PartitionRouter,
    control: broadcast::Sender<ControlSignal>,
    store: Arc<TravelTimeStore>,
    metrics: Arc<MetricsRecorder>,
    in_flight: Arc<InFlight>,
    stations: Vec<String>,
    stacks: Option<StackStream>,
    workers: Vec<JoinHandle<PipelineResult<()>>>,
    coordinator: JoinHandle<()>,
    logger: LogManager,
}

impl Pipeline {
    /// Loads the initial travel times and spawns every task. Must run inside a
    /// tokio runtime.
    pub fn start(config: PipelineConfig, source: Arc<dyn TravelTimeSource>) -> PipelineResult<Self> {
        config.validate()?;
        let logger = LogManager::new("pipeline");
        let metrics = Arc::new(MetricsRecorder::new());
        let store = Arc::new(TravelTimeStore::open(source)?);
        // the store refuses reloads that would change what the accumulators hold
        let initial = store.snapshot();

        let in_flight = Arc::new(InFlight::new());
        let (stack_sink, stacks) = StackSink::new();
        let stack_sink: Arc<dyn Publisher> = Arc::new(stack_sink);
        let (fanout, point_queues) =
            PartitionRouter::new(config.point_workers, Arc::clone(&in_flight));
        let (ingest, station_queues) =
            PartitionRouter::new(config.distributor_workers, Arc::clone(&in_flight));

        let mut workers = Vec::with_capacity(point_queues.len() + station_queues.len());
        for (index, queue) in point_queues.into_iter().enumerate() {
            let processor = PointProcessor::new(
                owned_points(&initial, index, config.point_workers),
                initial.stations(),
                &config.stack,
                Arc::clone(&stack_sink),
            );
            workers.push(tokio::spawn(run_point_worker(
                index,
                queue,
                processor,
                Arc::clone(&metrics),
                Arc::clone(&in_flight),
            )));
        }

        let fanout: Arc<dyn Publisher> = Arc::new(fanout);
        for (index, queue) in station_queues.into_iter().enumerate() {
            let distributor = Distributor::new(Arc::clone(&store), Arc::clone(&fanout));
            let processor = StationProcessor::new(distributor, config.preprocessing.clone())?;
            workers.push(tokio::spawn(run_station_worker(
                index,
                queue,
                processor,
                Arc::clone(&metrics),
                Arc::clone(&in_flight),
            )));
        }

        let (control, control_rx) = broadcast::channel(CONTROL_CAPACITY);
        let coordinator = ReloadCoordinator::new(Arc::clone(&store), Arc::clone(&metrics));
        let coordinator = tokio::spawn(coordinator.run(control_rx));

        logger.record(&format!(
            "started {} distributor and {} point workers for {} stations x {} points",
            config.distributor_workers,
            config.point_workers,
            initial.nsta(),
            initial.npts()
        ));
        Ok(Self {
            ingest,
            control,
            store,
            metrics,
            in_flight,
            stations: config.stations,
            stacks: Some(stacks),
            workers,
            coordinator,
            logger,
        })
    }

    pub fn ingest(&self, packet: WaveformPacket) -> PipelineResult<()> {
        let key = RoutingKey::Station(packet.station().to_string());
        self.ingest.publish(key, Message::Data(packet))
    }

    /// Sends the end-of-stream sentinel for `station`.
    pub fn stop_station(&self, station: &str) -> PipelineResult<()> {
        self.ingest
            .publish(RoutingKey::Station(station.to_string()), Message::Stop)
    }

    pub fn broadcast(&self, signal: ControlSignal) -> PipelineResult<()> {
        self.control
            .send(signal)
            .map(|_| ())
            .map_err(|_| PipelineError::ChannelClosed("no control subscribers".into()))
    }

    /// Sender side of the control topic, for components outside the pipeline.
    pub fn control(&self) -> broadcast::Sender<ControlSignal> {
        self.control.clone()
    }

    /// The stack output. Handed out once.
    pub fn stacks(&mut self) -> Option<StackStream> {
        self.stacks.take()
    }

    pub fn store(&self) -> Arc<TravelTimeStore> {
        Arc::clone(&self.store)
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            in_flight: self.in_flight.pending(),
            ..self.metrics.snapshot()
        }
    }

    /// Resolves once every delivery ingested so far, and everything it fanned out
    /// to, has been acknowledged or rejected. Fails if a worker died first.
    pub async fn settled(&self) -> PipelineResult<()> {
        if self.in_flight.wait_idle().await {
            Ok(())
        } else {
            Err(PipelineError::ChannelClosed(format!(
                "a worker stopped with {} deliveries outstanding",
                self.in_flight.pending()
            )))
        }
    }

    /// Waits for ingested data to settle, sends every configured station's
    /// sentinel, stops the coordinator, and waits for all workers. The first worker
    /// failure is returned.
    pub async fn shutdown(self) -> PipelineResult<Metrics> {
        // a station's sentinel closes points that other partitions may still feed
        if let Err(err) = self.settled().await {
            self.logger.warn(&format!("sending sentinels unsettled: {err}"));
        }
        for station in &self.stations {
            // a dead worker's queue is closed; its failure surfaces on join
            if let Err(err) = self.stop_station(station) {
                self.logger.warn(&format!("sentinel for {station} not sent: {err}"));
            }
        }
        // nobody listening means the coordinator is already gone
        let _ = self.control.send(ControlSignal::Shutdown);

        let Pipeline {
            ingest,
            metrics,
            in_flight,
            workers,
            coordinator,
            logger,
            ..
        } = self;
        drop(ingest);

        let mut failure = None;
        for worker in workers {
            let outcome = match worker.await {
                Ok(result) => result,
                Err(err) => Err(PipelineError::Internal(format!("worker panicked: {err}"))),
            };
            if let Err(err) = outcome {
                logger.error(&format!("worker failed: {err}"));
                failure.get_or_insert(err);
            }
        }
        if let Err(err) = coordinator.await {
            logger.warn(&format!("reload coordinator aborted: {err}"));
        }

        let totals = Metrics {
            in_flight: in_flight.pending(),
            ..metrics.snapshot()
        };
        logger.record(&format!(
            "shut down: {} acked, {} rejected, {} stacks, {} sentinels forwarded",
            totals.acked, totals.rejected, totals.stacks_emitted, totals.sentinels_forwarded
        ));
        match failure {
            Some(err) => Err(err),
            None => Ok(totals),
        }
    }
}

fn owned_points(table: &TravelTimeTable, worker: usize, workers: usize) -> Vec<usize> {
    (0..table.npts()).filter(|ip| ip % workers == worker).collect()
}

/// Per-worker view of the shared counters.
struct Settler {
    metrics: Arc<MetricsRecorder>,
    in_flight: Arc<InFlight>,
    logger: LogManager,
}

impl Settler {
    /// Ack, reject or fail one delivery according to how the handler came back.
    fn settle<T>(&self, result: PipelineResult<T>, delivery: &Delivery) -> PipelineResult<Option<T>> {
        let settled = match result {
            Ok(outcome) => {
                self.metrics.record_ack();
                Ok(Some(outcome))
            }
            Err(err) if err.is_recoverable() => {
                self.logger.warn(&format!(
                    "rejected delivery {} ({}): {err}",
                    delivery.tag, delivery.key
                ));
                self.metrics.record_rejected();
                Ok(None)
            }
            Err(err) => {
                self.logger.error(&format!(
                    "fatal on delivery {} ({}): {err}",
                    delivery.tag, delivery.key
                ));
                // whatever is still queued behind this delivery is never handled
                self.in_flight.abandon();
                Err(err)
            }
        };
        self.in_flight.settle();
        settled
    }
}

async fn run_station_worker(
    index: usize,
    mut queue: mpsc::UnboundedReceiver<Delivery>,
    mut processor: StationProcessor,
    metrics: Arc<MetricsRecorder>,
    in_flight: Arc<InFlight>,
) -> PipelineResult<()> {
    let settler = Settler {
        metrics,
        in_flight,
        logger: LogManager::new(format!("distributor-{index}")),
    };
    while let Some(delivery) = queue.recv().await {
        let result = processor.handle(&delivery);
        if let Some(IngestOutcome::Terminated(sent)) = settler.settle(result, &delivery)? {
            settler.metrics.record_sentinels(sent);
        }
    }
    settler.logger.trace_packet("ingestion queue closed");
    Ok(())
}

async fn run_point_worker(
    index: usize,
    mut queue: mpsc::UnboundedReceiver<Delivery>,
    mut processor: PointProcessor,
    metrics: Arc<MetricsRecorder>,
    in_flight: Arc<InFlight>,
) -> PipelineResult<()> {
    let settler = Settler {
        metrics,
        in_flight,
        logger: LogManager::new(format!("points-{index}")),
    };
    let mut finished = processor.is_finished();
    while let Some(delivery) = queue.recv().await {
        let result = processor.handle(&delivery);
        match settler.settle(result, &delivery)? {
            Some(PointOutcome::Stacked) => settler.metrics.record_stack(),
            Some(PointOutcome::Terminated) if !finished && processor.is_finished() => {
                finished = true;
                settler.logger.record("all owned points closed");
            }
            _ => {}
        }
    }
    Ok(())
}
