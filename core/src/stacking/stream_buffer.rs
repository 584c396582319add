use crate::prelude::{PipelineError, PipelineResult, WaveformPacket};
use std::collections::VecDeque;

/// Bounded, append-only sample buffer for one `(point, station)` stream.
///
/// Once `capacity` is exceeded the oldest samples are evicted and the start time
/// moves forward with them. Times are derived from an origin plus a sample count,
/// so repeated eviction never accumulates rounding drift.
#[derive(Debug, Clone)]
pub struct PointStreamBuffer {
    station: String,
    dt: f64,
    capacity: usize,
    origin: Option<f64>,
    evicted: u64,
    samples: VecDeque<f64>,
}

impl PointStreamBuffer {
    pub fn with_capacity(station: impl Into<String>, dt: f64, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            station: station.into(),
            dt,
            capacity,
            origin: None,
            evicted: 0,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn start_time(&self) -> Option<f64> {
        self.origin
            .map(|origin| origin + self.evicted as f64 * self.dt)
    }

    /// Time of the newest sample.
    pub fn end_time(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        self.start_time()
            .map(|start| start + (self.samples.len() - 1) as f64 * self.dt)
    }

    /// Appends a packet that must abut the current end within `tolerance`.
    ///
    /// A gap or overlap is rejected and leaves the buffer untouched. Returns the
    /// number of samples evicted to stay within capacity.
    pub fn append(&mut self, packet: &WaveformPacket, tolerance: f64) -> PipelineResult<usize> {
        if packet.is_empty() {
            return Ok(0);
        }
        if (packet.dt() - self.dt).abs() > self.dt * 1e-9 {
            return Err(PipelineError::InvalidInput(format!(
                "{}: packet dt {} differs from stream dt {}",
                self.station,
                packet.dt(),
                self.dt
            )));
        }
        match self.end_time() {
            Some(end) => {
                let expected = end + self.dt;
                if (packet.start_time() - expected).abs() > tolerance {
                    return Err(PipelineError::GapOverlap {
                        station: self.station.clone(),
                        expected,
                        found: packet.start_time(),
                    });
                }
            }
            None => {
                self.origin = Some(packet.start_time());
                self.evicted = 0;
            }
        }

        self.samples.extend(packet.samples().iter().copied());
        let overflow = self.samples.len().saturating_sub(self.capacity);
        self.samples.drain(..overflow);
        self.evicted += overflow as u64;
        Ok(overflow)
    }

    /// Copies the inclusive time range `[from, to]`, or `None` if any part of it is
    /// not held in the buffer.
    pub fn slice(&self, from: f64, to: f64) -> Option<Vec<f64>> {
        let start = self.start_time()?;
        let first = ((from - start) / self.dt).round();
        let last = ((to - start) / self.dt).round();
        if first < 0.0 || last < first || last as usize >= self.samples.len() {
            return None;
        }
        Some(
            self.samples
                .range(first as usize..=last as usize)
                .copied()
                .collect(),
        )
    }
}
