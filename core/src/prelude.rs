use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Contiguous block of evenly sampled data from one station (or one stacked point).
///
/// Packets are immutable: every transform produces a new packet. Samples sit behind
/// an `Arc` so the per-point fan-out only copies the header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformPacket {
    station: String,
    start_time: f64,
    dt: f64,
    samples: Arc<[f64]>,
}

impl WaveformPacket {
    pub fn new(station: impl Into<String>, start_time: f64, dt: f64, samples: Vec<f64>) -> Self {
        Self {
            station: station.into(),
            start_time,
            dt,
            samples: samples.into(),
        }
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    /// Time of the first sample, in seconds.
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Time of the last sample. For an empty packet this is `start_time - dt`, so
    /// `end_time() + dt` is always the start of the next abutting packet.
    pub fn end_time(&self) -> f64 {
        self.start_time + (self.samples.len() as f64 - 1.0) * self.dt
    }

    /// Same header, new data.
    pub fn with_samples(&self, samples: Vec<f64>) -> Self {
        Self {
            station: self.station.clone(),
            start_time: self.start_time,
            dt: self.dt,
            samples: samples.into(),
        }
    }

    /// Same data, start time moved by `offset` seconds.
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            station: self.station.clone(),
            start_time: self.start_time + offset,
            dt: self.dt,
            samples: Arc::clone(&self.samples),
        }
    }
}

/// Shared parameters for the stacking stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Sample interval in seconds, shared by every stream.
    pub dt: f64,
    /// Longest span, in seconds, a per-station point buffer keeps before evicting.
    pub max_length: f64,
    /// Look-ahead a station needs past the common start before it is trusted.
    pub safety_margin: f64,
    /// Allowed slack, in seconds, for every time comparison.
    pub tolerance: f64,
}

impl StackConfig {
    pub fn new(dt: f64, max_length: f64, safety_margin: f64) -> Self {
        Self {
            dt,
            max_length,
            safety_margin,
            tolerance: dt / 2.0,
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(PipelineError::InvalidInput(format!(
                "dt must be positive, got {}",
                self.dt
            )));
        }
        if !(self.max_length.is_finite() && self.max_length >= self.dt) {
            return Err(PipelineError::InvalidInput(format!(
                "max_length {} shorter than one sample",
                self.max_length
            )));
        }
        if !(self.safety_margin.is_finite() && self.safety_margin >= 0.0) {
            return Err(PipelineError::InvalidInput(
                "safety_margin must be non-negative".into(),
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0 && self.tolerance < self.dt) {
            return Err(PipelineError::InvalidInput(format!(
                "tolerance {} must lie in [0, dt)",
                self.tolerance
            )));
        }
        Ok(())
    }

    /// Buffer capacity in samples derived from `max_length`.
    pub fn capacity(&self) -> usize {
        ((self.max_length / self.dt).round() as usize).max(1)
    }
}

/// Common error type for every stage of the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("gap/overlap on {station}: expected start {expected:.4}, found {found:.4}")]
    GapOverlap {
        station: String,
        expected: f64,
        found: f64,
    },
    #[error("numeric domain error: {0}")]
    NumericDomain(String),
    #[error("travel-time table: {0}")]
    TravelTime(String),
    #[error("unknown station: {0}")]
    UnknownStation(String),
    #[error("channel closed: {0}")]
    ChannelClosed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("internal failure: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Per-packet errors are reported and the stream carries on; everything else
    /// takes the worker down.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidInput(_)
                | PipelineError::GapOverlap { .. }
                | PipelineError::NumericDomain(_)
                | PipelineError::UnknownStation(_)
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// An online transform that carries its own memory from one packet to the next.
pub trait RealtimeFilter: Send {
    fn name(&self) -> &'static str;
    fn apply(&mut self, packet: &WaveformPacket) -> PipelineResult<WaveformPacket>;
    fn reset(&mut self);
    /// Copy with the same memory, for trial runs that may be thrown away.
    fn box_clone(&self) -> Box<dyn RealtimeFilter>;
}
