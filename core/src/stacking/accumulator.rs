use crate::prelude::{PipelineError, PipelineResult, StackConfig, WaveformPacket};
use crate::stacking::stream_buffer::PointStreamBuffer;
use crate::telemetry::log::LogManager;
use ndarray::{Array2, Axis};

/// Forward-only marker of the last time already stacked for a point.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StackCursor {
    last_common_end_stack: Option<f64>,
}

impl StackCursor {
    /// Start of the next segment that may be emitted, if anything was emitted yet.
    pub fn position(&self) -> Option<f64> {
        self.last_common_end_stack
    }

    fn advance(&mut self, to: f64) {
        match self.last_common_end_stack {
            Some(current) if to <= current => {}
            _ => self.last_common_end_stack = Some(to),
        }
    }
}

/// Multi-station buffers and stacking state for one grid point.
///
/// Exactly one worker owns a given accumulator, so no locking happens here.
pub struct PointAccumulator {
    point: usize,
    buffers: Vec<PointStreamBuffer>,
    cursor: StackCursor,
    config: StackConfig,
    closed: bool,
    logger: LogManager,
}

impl PointAccumulator {
    pub fn new(point: usize, stations: &[String], config: &StackConfig) -> Self {
        let capacity = config.capacity();
        Self {
            point,
            buffers: stations
                .iter()
                .map(|sta| PointStreamBuffer::with_capacity(sta.as_str(), config.dt, capacity))
                .collect(),
            cursor: StackCursor::default(),
            config: config.clone(),
            closed: false,
            logger: LogManager::new(format!("point-{point}")),
        }
    }

    pub fn point(&self) -> usize {
        self.point
    }

    pub fn cursor(&self) -> StackCursor {
        self.cursor
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn buffer(&self, station: &str) -> Option<&PointStreamBuffer> {
        self.buffers.iter().find(|b| b.station() == station)
    }

    /// Adds a shifted packet for one station and stacks if every station is ready.
    pub fn append(&mut self, packet: &WaveformPacket) -> PipelineResult<Option<WaveformPacket>> {
        if self.closed {
            self.logger.warn(&format!(
                "dropping data from {} after termination",
                packet.station()
            ));
            return Ok(None);
        }
        let buffer = self
            .buffers
            .iter_mut()
            .find(|b| b.station() == packet.station())
            .ok_or_else(|| PipelineError::UnknownStation(packet.station().to_string()))?;
        let evicted = buffer.append(packet, self.config.tolerance)?;
        if evicted > 0 {
            self.logger.trace_packet(&format!(
                "{} evicted {} samples",
                packet.station(),
                evicted
            ));
        }
        Ok(self.update_stack())
    }

    /// Marks the point terminated. Returns `true` only for the first call.
    pub fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }

    fn update_stack(&mut self) -> Option<WaveformPacket> {
        let mut common_start = f64::NEG_INFINITY;
        for buffer in &self.buffers {
            common_start = common_start.max(buffer.start_time()?);
        }
        if let Some(position) = self.cursor.position() {
            common_start = common_start.max(position);
        }

        let mut common_end = f64::INFINITY;
        for buffer in &self.buffers {
            let end = buffer.end_time()?;
            if end - common_start <= self.config.safety_margin {
                return None;
            }
            common_end = common_end.min(end);
        }

        let width = ((common_end - common_start) / self.config.dt).round() as usize + 1;
        let mut rows = Vec::with_capacity(self.buffers.len() * width);
        for buffer in &self.buffers {
            let slice = buffer.slice(common_start, common_end)?;
            if slice.len() != width {
                return None;
            }
            rows.extend(slice);
        }
        let matrix = Array2::from_shape_vec((self.buffers.len(), width), rows).ok()?;
        let stack = matrix.sum_axis(Axis(0)).to_vec();

        self.cursor.advance(common_end + self.config.dt);
        let packet = WaveformPacket::new(self.point.to_string(), common_start, self.config.dt, stack);
        self.logger.record(&format!(
            "stacked {:.3} - {:.3} ({} samples)",
            packet.start_time(),
            packet.end_time(),
            packet.len()
        ));
        Some(packet)
    }
}
