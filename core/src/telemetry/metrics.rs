use std::sync::Mutex;

/// Pipeline-wide delivery counters, shared by every worker.
pub struct MetricsRecorder {
    inner: Mutex<Metrics>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    pub acked: usize,
    pub rejected: usize,
    pub stacks_emitted: usize,
    pub sentinels_forwarded: usize,
    pub reloads: usize,
    /// Deliveries queued or being handled when the snapshot was taken.
    pub in_flight: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics::default()),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut Metrics)) {
        if let Ok(mut metrics) = self.inner.lock() {
            apply(&mut metrics);
        }
    }

    pub fn record_ack(&self) {
        self.update(|m| m.acked += 1);
    }

    pub fn record_rejected(&self) {
        self.update(|m| m.rejected += 1);
    }

    pub fn record_stack(&self) {
        self.update(|m| m.stacks_emitted += 1);
    }

    pub fn record_sentinels(&self, count: usize) {
        self.update(|m| m.sentinels_forwarded += count);
    }

    pub fn record_reload(&self) {
        self.update(|m| m.reloads += 1);
    }

    pub fn snapshot(&self) -> Metrics {
        self.inner.lock().map(|m| *m).unwrap_or_default()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
