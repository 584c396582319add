use crate::math::StatsHelper;
use crate::prelude::{PipelineError, PipelineResult, RealtimeFilter, WaveformPacket};

/// Excess kurtosis over a sliding window of `round(win/dt)` samples, aligned so
/// output `i` covers the window ending at input `i`.
///
/// The first packet seeds the lead-in with its own first `npts-1` samples in
/// reverse order, so output length always matches input length.
#[derive(Debug, Clone)]
pub struct SlidingKurtosis {
    win: f64,
    window: Option<usize>,
    memory: Vec<f64>,
}

impl SlidingKurtosis {
    pub fn new(win: f64) -> PipelineResult<Self> {
        if !(win.is_finite() && win > 0.0) {
            return Err(PipelineError::InvalidInput(format!(
                "kurtosis window must be positive, got {win}"
            )));
        }
        Ok(Self {
            win,
            window: None,
            memory: Vec::new(),
        })
    }

    fn window_len(&self, dt: f64) -> PipelineResult<usize> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(PipelineError::InvalidInput(format!(
                "sample interval must be positive, got {dt}"
            )));
        }
        let npts = (self.win / dt).round() as usize;
        if npts < 2 {
            return Err(PipelineError::InvalidInput(format!(
                "kurtosis window {}s spans fewer than two samples",
                self.win
            )));
        }
        match self.window {
            Some(known) if known != npts => Err(PipelineError::InvalidInput(format!(
                "sample interval changed: window was {known} samples, now {npts}"
            ))),
            _ => Ok(npts),
        }
    }

    fn seed(samples: &[f64], size: usize) -> Vec<f64> {
        let take = size.min(samples.len());
        let mut memory = vec![0.0; size - take];
        memory.extend(samples[..take].iter().rev());
        memory
    }
}

impl RealtimeFilter for SlidingKurtosis {
    fn name(&self) -> &'static str {
        "kurtosis"
    }

    fn apply(&mut self, packet: &WaveformPacket) -> PipelineResult<WaveformPacket> {
        if packet.is_empty() {
            return Ok(packet.with_samples(Vec::new()));
        }
        let npts = self.window_len(packet.dt())?;
        let mem = npts - 1;
        let memory = match self.window {
            Some(_) => std::mem::take(&mut self.memory),
            None => Self::seed(packet.samples(), mem),
        };

        let mut extended = memory;
        extended.extend_from_slice(packet.samples());
        let out = extended
            .windows(npts)
            .map(StatsHelper::excess_kurtosis)
            .collect();

        self.memory = extended.split_off(extended.len() - mem);
        self.window = Some(npts);
        Ok(packet.with_samples(out))
    }

    fn reset(&mut self) {
        self.window = None;
        self.memory.clear();
    }

    fn box_clone(&self) -> Box<dyn RealtimeFilter> {
        Box::new(self.clone())
    }
}
