use crate::interface::ControlSignal;
use crate::prelude::{PipelineError, PipelineResult};
use crate::telemetry::{LogManager, MetricsRecorder};
use crate::traveltime::source::TravelTimeSource;
use crate::traveltime::table::{Geometry, TravelTimeTable};
use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Holds the current travel-time snapshot and rebuilds it on demand.
///
/// Readers take a lock-free reference to whichever snapshot is current. Rebuilds
/// are serialised and publish with one atomic swap; a failed rebuild leaves the
/// previous snapshot in place, and so does one whose geometry differs from the
/// snapshot the store was opened with.
pub struct TravelTimeStore {
    current: ArcSwap<TravelTimeTable>,
    geometry: Geometry,
    source: Arc<dyn TravelTimeSource>,
    rebuild: Mutex<()>,
    logger: LogManager,
}

impl TravelTimeStore {
    /// Initial load; any failure here is fatal to startup.
    pub fn open(source: Arc<dyn TravelTimeSource>) -> PipelineResult<Self> {
        let table = TravelTimeTable::build(source.load()?)?;
        let logger = LogManager::new("traveltimes");
        logger.record(&format!(
            "loaded {} stations x {} points from {}",
            table.nsta(),
            table.npts(),
            source.describe()
        ));
        Ok(Self {
            geometry: table.geometry(),
            current: ArcSwap::from_pointee(table),
            source,
            rebuild: Mutex::new(()),
            logger,
        })
    }

    pub fn snapshot(&self) -> Arc<TravelTimeTable> {
        self.current.load_full()
    }

    /// Geometry fixed at open; every later snapshot has it too.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Builds a fresh snapshot from the source and swaps it in.
    pub fn reload(&self) -> PipelineResult<Arc<TravelTimeTable>> {
        let _guard = self
            .rebuild
            .lock()
            .map_err(|_| PipelineError::Internal("travel-time rebuild lock poisoned".into()))?;
        let table = Arc::new(TravelTimeTable::build(self.source.load()?)?);
        let geometry = table.geometry();
        if geometry != self.geometry {
            return Err(PipelineError::TravelTime(format!(
                "reloaded tables cover {geometry}, pipeline runs on {}",
                self.geometry
            )));
        }
        self.current.store(Arc::clone(&table));
        self.logger.record(&format!(
            "reloaded {} stations x {} points",
            table.nsta(),
            table.npts()
        ));
        Ok(table)
    }
}

/// Listens on the control topic and rebuilds the store when told to.
pub struct ReloadCoordinator {
    store: Arc<TravelTimeStore>,
    metrics: Arc<MetricsRecorder>,
    logger: LogManager,
}

impl ReloadCoordinator {
    pub fn new(store: Arc<TravelTimeStore>, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            store,
            metrics,
            logger: LogManager::new("reload"),
        }
    }

    /// Runs until a shutdown signal arrives or the control topic closes.
    pub async fn run(self, mut control: broadcast::Receiver<ControlSignal>) {
        self.logger.record("ready to receive control signals");
        loop {
            match control.recv().await {
                Ok(ControlSignal::ReloadTravelTimes) => self.reload().await,
                Ok(ControlSignal::Shutdown) => {
                    self.logger.record("received shutdown");
                    break;
                }
                Ok(ControlSignal::Other(body)) => {
                    self.logger.record(&format!("received {body:?}, no action taken"));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.logger
                        .warn(&format!("missed {skipped} control signals"));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn reload(&self) {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.reload()).await {
            Ok(Ok(_)) => self.metrics.record_reload(),
            Ok(Err(err)) => self
                .logger
                .warn(&format!("reload failed, keeping previous snapshot: {err}")),
            Err(err) => self.logger.warn(&format!("reload task aborted: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traveltime::source::InMemorySource;
    use crate::traveltime::table::tests::row;

    fn source() -> Arc<InMemorySource> {
        Arc::new(InMemorySource::new(vec![
            row("A", vec![0.0, 0.1, 0.2]),
            row("B", vec![0.3, 0.2, 0.1]),
        ]))
    }

    #[test]
    fn reload_from_unchanged_tables_is_idempotent() {
        let store = TravelTimeStore::open(source()).unwrap();
        let before = store.snapshot();
        let after = store.reload().unwrap();
        assert_eq!(*before, *after);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn failed_reload_keeps_previous_snapshot() {
        let src = source();
        let store = TravelTimeStore::open(src.clone()).unwrap();
        let before = store.snapshot();
        src.replace(vec![row("A", vec![0.0]), row("B", vec![0.0, 1.0])]);
        assert!(store.reload().is_err());
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn readers_keep_their_snapshot_across_a_swap() {
        let src = source();
        let store = TravelTimeStore::open(src.clone()).unwrap();
        let held = store.snapshot();
        src.replace(vec![
            row("B", vec![1.0, 1.0, 1.0]),
            row("A", vec![0.5, 0.5, 0.5]),
        ]);
        store.reload().unwrap();
        assert_eq!(held.travel_time("A", 1), Some(0.1));
        assert_eq!(store.snapshot().travel_time("A", 1), Some(0.5));
    }

    #[test]
    fn reload_with_different_geometry_is_refused() {
        let src = source();
        let store = TravelTimeStore::open(src.clone()).unwrap();
        let before = store.snapshot();

        src.replace(vec![row("A", vec![0.0]), row("B", vec![0.0])]);
        assert!(matches!(store.reload(), Err(PipelineError::TravelTime(_))));
        src.replace(vec![row("A", vec![1.0, 1.0, 1.0])]);
        assert!(store.reload().is_err());
        src.replace(vec![
            row("A", vec![0.0, 0.1, 0.2]),
            row("C", vec![0.3, 0.2, 0.1]),
        ]);
        assert!(store.reload().is_err());

        assert!(Arc::ptr_eq(&before, &store.snapshot()));
        assert_eq!(store.geometry().npts(), 3);
        assert!(store.geometry().contains("B"));
    }

    #[test]
    fn startup_without_tables_is_fatal() {
        let empty = Arc::new(InMemorySource::new(Vec::new()));
        assert!(TravelTimeStore::open(empty).is_err());
    }

    #[tokio::test]
    async fn coordinator_reloads_on_signal_and_stops_on_shutdown() {
        let src = source();
        let store = Arc::new(TravelTimeStore::open(src.clone()).unwrap());
        let metrics = Arc::new(MetricsRecorder::new());
        let (tx, rx) = broadcast::channel(8);
        let task = tokio::spawn(ReloadCoordinator::new(store.clone(), metrics.clone()).run(rx));

        src.replace(vec![
            row("A", vec![0.5, 0.5, 0.5]),
            row("B", vec![0.5, 0.5, 0.5]),
        ]);
        tx.send(ControlSignal::Other("ping".into())).unwrap();
        tx.send(ControlSignal::ReloadTravelTimes).unwrap();
        tx.send(ControlSignal::Shutdown).unwrap();
        task.await.unwrap();

        assert_eq!(store.snapshot().travel_time("B", 2), Some(0.5));
        assert_eq!(metrics.snapshot().reloads, 1);
    }
}
