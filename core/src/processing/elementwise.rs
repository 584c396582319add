use crate::prelude::{PipelineError, PipelineResult, RealtimeFilter, WaveformPacket};

/// `max(x, 0)` per sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClampNegative;

impl RealtimeFilter for ClampNegative {
    fn name(&self) -> &'static str {
        "neg_to_zero"
    }

    fn apply(&mut self, packet: &WaveformPacket) -> PipelineResult<WaveformPacket> {
        Ok(packet.with_samples(packet.samples().iter().map(|&x| x.max(0.0)).collect()))
    }

    fn reset(&mut self) {}

    fn box_clone(&self) -> Box<dyn RealtimeFilter> {
        Box::new(*self)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Scale {
    pub factor: f64,
}

impl RealtimeFilter for Scale {
    fn name(&self) -> &'static str {
        "scale"
    }

    fn apply(&mut self, packet: &WaveformPacket) -> PipelineResult<WaveformPacket> {
        Ok(packet.with_samples(packet.samples().iter().map(|&x| x * self.factor).collect()))
    }

    fn reset(&mut self) {}

    fn box_clone(&self) -> Box<dyn RealtimeFilter> {
        Box::new(*self)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Offset {
    pub value: f64,
}

impl RealtimeFilter for Offset {
    fn name(&self) -> &'static str {
        "offset"
    }

    fn apply(&mut self, packet: &WaveformPacket) -> PipelineResult<WaveformPacket> {
        Ok(packet.with_samples(packet.samples().iter().map(|&x| x + self.value).collect()))
    }

    fn reset(&mut self) {}

    fn box_clone(&self) -> Box<dyn RealtimeFilter> {
        Box::new(*self)
    }
}

/// First difference over `dt`. The very first sample differences against itself.
#[derive(Debug, Clone, Default)]
pub struct Differentiate {
    last: Option<f64>,
}

impl RealtimeFilter for Differentiate {
    fn name(&self) -> &'static str {
        "differentiate"
    }

    fn apply(&mut self, packet: &WaveformPacket) -> PipelineResult<WaveformPacket> {
        let samples = packet.samples();
        let Some(&first) = samples.first() else {
            return Ok(packet.with_samples(Vec::new()));
        };
        let dt = packet.dt();
        if !(dt.is_finite() && dt > 0.0) {
            return Err(PipelineError::InvalidInput(format!(
                "sample interval must be positive, got {dt}"
            )));
        }
        let mut previous = self.last.unwrap_or(first);
        let out = samples
            .iter()
            .map(|&x| {
                let slope = (x - previous) / dt;
                previous = x;
                slope
            })
            .collect();
        self.last = Some(previous);
        Ok(packet.with_samples(out))
    }

    fn reset(&mut self) {
        self.last = None;
    }

    fn box_clone(&self) -> Box<dyn RealtimeFilter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_zeroes_negatives_only() {
        let packet = WaveformPacket::new("ST", 0.0, 1.0, vec![-1.0, 0.0, 2.5, -0.1]);
        let out = ClampNegative.apply(&packet).unwrap();
        assert_eq!(out.samples(), &[0.0, 0.0, 2.5, 0.0]);
    }

    #[test]
    fn scale_then_offset() {
        let packet = WaveformPacket::new("ST", 0.0, 1.0, vec![1.0, -2.0]);
        let scaled = Scale { factor: 3.0 }.apply(&packet).unwrap();
        let shifted = Offset { value: 500.0 }.apply(&scaled).unwrap();
        assert_eq!(shifted.samples(), &[503.0, 494.0]);
    }

    #[test]
    fn differentiate_carries_last_sample() {
        let mut filter = Differentiate::default();
        let first = WaveformPacket::new("ST", 0.0, 0.5, vec![1.0, 2.0, 4.0]);
        assert_eq!(filter.apply(&first).unwrap().samples(), &[0.0, 2.0, 4.0]);
        let second = WaveformPacket::new("ST", 1.5, 0.5, vec![3.0]);
        assert_eq!(filter.apply(&second).unwrap().samples(), &[-2.0]);
    }
}
