use crate::generator::profile::{station_packets, GeneratorConfig};
use crate::gui_bridge::model::{BoardSnapshot, StackBoard};
use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use migcore::runtime::Pipeline;
use migcore::telemetry::Metrics;
use migcore::traveltime::TravelTimeSource;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct WorkflowResult {
    pub board: BoardSnapshot,
    pub metrics: Metrics,
    pub packets: usize,
}

/// Data handed to the pipeline plus the task copying its output onto the board.
pub struct Feed {
    drain: JoinHandle<()>,
    packets: usize,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    pub fn start(&self, source: Arc<dyn TravelTimeSource>) -> anyhow::Result<Pipeline> {
        let pipeline_config = self.config.pipeline_config()?;
        Pipeline::start(pipeline_config, source).context("starting pipeline")
    }

    /// Streams the synthetic event through `pipeline`, station packets interleaved in
    /// time order, and waits until every delivery has been settled.
    pub async fn feed(
        &self,
        pipeline: &mut Pipeline,
        generator: &GeneratorConfig,
        board: Arc<StackBoard>,
    ) -> anyhow::Result<Feed> {
        let mut stacks = pipeline
            .stacks()
            .context("stack output already taken")?;
        let drain = tokio::spawn(async move {
            while let Some((key, message)) = stacks.recv().await {
                board.apply(&key, &message);
            }
        });

        let table = pipeline.store().snapshot();
        let mut streams = Vec::new();
        for station in &self.config.stations {
            if table.station_index(station).is_none() {
                log::warn!("[runner] {station} has no travel times, not generating data");
                continue;
            }
            streams.push(station_packets(&table, station, self.config.dt, generator)?);
        }

        let rounds = streams.iter().map(Vec::len).max().unwrap_or(0);
        let mut packets = 0;
        for round in 0..rounds {
            for stream in &streams {
                if let Some(packet) = stream.get(round) {
                    pipeline
                        .ingest(packet.clone())
                        .context("ingesting synthetic packet")?;
                    packets += 1;
                }
            }
        }
        log::info!(
            "[runner] ingested {packets} packets from {} stations",
            streams.len()
        );

        pipeline
            .settled()
            .await
            .context("waiting for ingested packets to settle")?;
        Ok(Feed { drain, packets })
    }

    /// Sends the sentinels, joins the pipeline and summarises the board.
    pub async fn finish(
        &self,
        pipeline: Pipeline,
        feed: Feed,
        board: &StackBoard,
    ) -> anyhow::Result<WorkflowResult> {
        let metrics = pipeline.shutdown().await.context("shutting down pipeline")?;
        feed.drain.await.context("draining stack output")?;
        Ok(WorkflowResult {
            board: board.snapshot(),
            metrics,
            packets: feed.packets,
        })
    }

    pub async fn execute(
        &self,
        source: Arc<dyn TravelTimeSource>,
        generator: &GeneratorConfig,
        board: Arc<StackBoard>,
    ) -> anyhow::Result<WorkflowResult> {
        let mut pipeline = self.start(source)?;
        let feed = self.feed(&mut pipeline, generator, board.clone()).await?;
        self.finish(pipeline, feed, &board).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::profile::{homogeneous_grid, GridConfig};
    use migcore::traveltime::{InMemorySource, JsonDirectorySource};
    use tempfile::tempdir;

    fn config() -> WorkflowConfig {
        WorkflowConfig {
            point_workers: 3,
            distributor_workers: 2,
            ..WorkflowConfig::synthetic()
        }
    }

    fn quiet_event() -> GeneratorConfig {
        GeneratorConfig {
            duration: 20.0,
            source_point: 12,
            noise: 0.0,
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runner_locates_synthetic_event_horizontally() {
        let cfg = config();
        let rows = homogeneous_grid(&cfg.stations, &GridConfig::default()).unwrap();
        let source = Arc::new(InMemorySource::new(rows));
        let board = Arc::new(StackBoard::new());
        let result = Runner::new(cfg)
            .execute(source, &quiet_event(), board)
            .await
            .unwrap();

        assert_eq!(result.packets, 80);
        assert_eq!(result.metrics.rejected, 0);
        assert_eq!(result.metrics.sentinels_forwarded, 4 * 75);
        assert_eq!(result.board.points.len(), 75);
        assert!(result.board.points.iter().all(|p| p.closed));
        // the centre column is 12, 37, 62
        assert_eq!(result.board.best_point.map(|p| p % 25), Some(12));
        assert!(result.board.max_stack > 3.5);
    }

    #[tokio::test]
    async fn runner_reads_travel_times_from_directory() {
        let cfg = config();
        let dir = tempdir().unwrap();
        let store = JsonDirectorySource::new(dir.path(), cfg.time_grid.clone());
        for row in homogeneous_grid(&cfg.stations, &GridConfig::default()).unwrap() {
            store.write(&row).unwrap();
        }
        let generator = GeneratorConfig {
            duration: 5.0,
            ..quiet_event()
        };
        let result = Runner::new(cfg)
            .execute(Arc::new(store), &generator, Arc::new(StackBoard::new()))
            .await
            .unwrap();
        assert_eq!(result.packets, 20);
        assert_eq!(result.metrics.acked, 20 * 76 + 4 + 4 * 75);
    }
}
