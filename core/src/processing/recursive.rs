//! Exponentially weighted running statistics.
//!
//! Each filter keeps a single-sample memory per moment, so feeding a signal in
//! arbitrary slices gives the same output as feeding it whole.

use crate::prelude::{PipelineError, PipelineResult, RealtimeFilter, WaveformPacket};

/// Smoothing weights for a window of `win` seconds at sample interval `dt`.
#[derive(Debug, Clone, Copy)]
struct Weights {
    c1: f64,
    a1: f64,
    c2: f64,
}

impl Weights {
    fn new(dt: f64, win: f64) -> PipelineResult<Self> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(PipelineError::InvalidInput(format!(
                "sample interval must be positive, got {dt}"
            )));
        }
        // a = 1 - dt/win must stay inside (-1, 1] for the recursion to settle
        let c1 = dt / win;
        if c1 >= 2.0 {
            return Err(PipelineError::InvalidInput(format!(
                "window {win}s is not longer than half a sample ({dt}s)"
            )));
        }
        let a1 = 1.0 - c1;
        Ok(Self {
            c1,
            a1,
            c2: (1.0 - a1 * a1) / 2.0,
        })
    }
}

fn check_window(win: f64) -> PipelineResult<f64> {
    if win.is_finite() && win > 0.0 {
        Ok(win)
    } else {
        Err(PipelineError::InvalidInput(format!(
            "window must be positive, got {win}"
        )))
    }
}

/// First and second running moments shared by the variance-type filters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentState {
    pub mu1: f64,
    pub mu2: f64,
}

impl MomentState {
    fn seeded(first: f64) -> Self {
        Self {
            mu1: 0.0,
            mu2: first * first,
        }
    }

    /// Advances both moments by one sample and returns the squared deviation.
    fn step(&mut self, x: f64, w: Weights) -> f64 {
        self.mu1 = w.a1 * self.mu1 + w.c1 * x;
        let dx2 = (x - self.mu1) * (x - self.mu1);
        self.mu2 = w.a1 * self.mu2 + w.c2 * dx2;
        dx2
    }
}

/// `mu[i] = a*mu[i-1] + C*x[i]` with `C = dt/win`.
#[derive(Debug, Clone)]
pub struct RecursiveMean {
    win: f64,
    mu1: Option<f64>,
}

impl RecursiveMean {
    pub fn new(win: f64) -> PipelineResult<Self> {
        Ok(Self {
            win: check_window(win)?,
            mu1: None,
        })
    }

    pub fn state(&self) -> Option<f64> {
        self.mu1
    }
}

impl RealtimeFilter for RecursiveMean {
    fn name(&self) -> &'static str {
        "mean"
    }

    fn apply(&mut self, packet: &WaveformPacket) -> PipelineResult<WaveformPacket> {
        if packet.is_empty() {
            return Ok(packet.with_samples(Vec::new()));
        }
        let w = Weights::new(packet.dt(), self.win)?;
        let mut last = self.mu1.unwrap_or(0.0);
        let out = packet
            .samples()
            .iter()
            .map(|&x| {
                last = w.a1 * last + w.c1 * x;
                last
            })
            .collect();
        self.mu1 = Some(last);
        Ok(packet.with_samples(out))
    }

    fn reset(&mut self) {
        self.mu1 = None;
    }

    fn box_clone(&self) -> Box<dyn RealtimeFilter> {
        Box::new(self.clone())
    }
}

/// Running variance `mu2` around the running mean.
#[derive(Debug, Clone)]
pub struct RecursiveVariance {
    win: f64,
    state: Option<MomentState>,
}

impl RecursiveVariance {
    pub fn new(win: f64) -> PipelineResult<Self> {
        Ok(Self {
            win: check_window(win)?,
            state: None,
        })
    }

    pub fn state(&self) -> Option<MomentState> {
        self.state
    }
}

impl RealtimeFilter for RecursiveVariance {
    fn name(&self) -> &'static str {
        "variance"
    }

    fn apply(&mut self, packet: &WaveformPacket) -> PipelineResult<WaveformPacket> {
        let samples = packet.samples();
        let Some(&first) = samples.first() else {
            return Ok(packet.with_samples(Vec::new()));
        };
        let w = Weights::new(packet.dt(), self.win)?;
        let mut state = self.state.unwrap_or_else(|| MomentState::seeded(first));
        let out = samples
            .iter()
            .map(|&x| {
                state.step(x, w);
                state.mu2
            })
            .collect();
        self.state = Some(state);
        Ok(packet.with_samples(out))
    }

    fn reset(&mut self) {
        self.state = None;
    }

    fn box_clone(&self) -> Box<dyn RealtimeFilter> {
        Box::new(self.clone())
    }
}

/// Squared deviation from the running mean, normalised by the previous running
/// variance: `dx[i]^2 / mu2[i-1]`. Spikes stand out against the background level.
#[derive(Debug, Clone)]
pub struct NormalizedDeviation {
    win: f64,
    state: Option<MomentState>,
}

impl NormalizedDeviation {
    pub fn new(win: f64) -> PipelineResult<Self> {
        Ok(Self {
            win: check_window(win)?,
            state: None,
        })
    }

    pub fn state(&self) -> Option<MomentState> {
        self.state
    }
}

impl RealtimeFilter for NormalizedDeviation {
    fn name(&self) -> &'static str {
        "dx2"
    }

    fn apply(&mut self, packet: &WaveformPacket) -> PipelineResult<WaveformPacket> {
        let samples = packet.samples();
        let Some(&first) = samples.first() else {
            return Ok(packet.with_samples(Vec::new()));
        };
        let w = Weights::new(packet.dt(), self.win)?;
        // Work on a copy; a failed packet must not advance the memory.
        let mut state = self.state.unwrap_or_else(|| MomentState::seeded(first));
        let mut out = Vec::with_capacity(samples.len());
        for (i, &x) in samples.iter().enumerate() {
            let previous = state.mu2;
            if previous == 0.0 || !previous.is_finite() {
                return Err(PipelineError::NumericDomain(format!(
                    "running variance is {previous} at sample {i} of {}",
                    packet.station()
                )));
            }
            let dx2 = state.step(x, w);
            out.push(dx2 / previous);
        }
        self.state = Some(state);
        Ok(packet.with_samples(out))
    }

    fn reset(&mut self) {
        self.state = None;
    }

    fn box_clone(&self) -> Box<dyn RealtimeFilter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (i as f64 * 0.37).sin() * 3.0 + (i as f64 * 0.05).cos() + 0.5)
            .collect()
    }

    fn run_split(filter: &mut dyn RealtimeFilter, data: &[f64], cuts: &[usize]) -> Vec<f64> {
        let dt = 0.01;
        let mut out = Vec::new();
        let mut start = 0;
        for &end in cuts.iter().chain(std::iter::once(&data.len())) {
            let packet = WaveformPacket::new("ST", start as f64 * dt, dt, data[start..end].to_vec());
            out.extend_from_slice(filter.apply(&packet).unwrap().samples());
            start = end;
        }
        out
    }

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() <= 1e-9 * x.abs().max(1.0), "{x} != {y}");
        }
    }

    #[test]
    fn mean_matches_closed_form_step_response() {
        let mut filter = RecursiveMean::new(1.0).unwrap();
        let packet = WaveformPacket::new("ST", 0.0, 0.1, vec![1.0; 20]);
        let out = filter.apply(&packet).unwrap();
        // mu[n] = 1 - a^(n+1) for a unit step from zero
        for (n, &value) in out.samples().iter().enumerate() {
            let expected = 1.0 - 0.9f64.powi(n as i32 + 1);
            assert!((value - expected).abs() < 1e-12);
        }
        assert_eq!(filter.state(), out.samples().last().copied());
    }

    #[test]
    fn mean_and_variance_are_split_invariant() {
        let data = signal(500);
        for cuts in [vec![1, 2, 3], vec![250], vec![17, 101, 102, 480]] {
            let mut whole = RecursiveMean::new(0.5).unwrap();
            let mut split = RecursiveMean::new(0.5).unwrap();
            assert_close(
                &run_split(&mut whole, &data, &[]),
                &run_split(&mut split, &data, &cuts),
            );

            let mut whole = RecursiveVariance::new(0.5).unwrap();
            let mut split = RecursiveVariance::new(0.5).unwrap();
            assert_close(
                &run_split(&mut whole, &data, &[]),
                &run_split(&mut split, &data, &cuts),
            );
        }
    }

    #[test]
    fn variance_seeds_from_first_sample() {
        let mut filter = RecursiveVariance::new(1.0).unwrap();
        let packet = WaveformPacket::new("ST", 0.0, 0.1, vec![2.0]);
        let out = filter.apply(&packet).unwrap();
        // mu1 = 0.2, dx2 = 3.24, C2 = (1 - 0.81)/2
        let expected = 0.9 * 4.0 + 0.095 * 3.24;
        assert!((out.samples()[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn normalized_deviation_is_split_invariant() {
        let data = signal(300);
        let mut whole = NormalizedDeviation::new(0.2).unwrap();
        let mut split = NormalizedDeviation::new(0.2).unwrap();
        assert_close(
            &run_split(&mut whole, &data, &[]),
            &run_split(&mut split, &data, &[5, 150, 151]),
        );
    }

    #[test]
    fn normalized_deviation_rejects_zero_variance() {
        let mut filter = NormalizedDeviation::new(1.0).unwrap();
        let packet = WaveformPacket::new("ST", 0.0, 0.1, vec![0.0; 10]);
        assert!(matches!(
            filter.apply(&packet),
            Err(PipelineError::NumericDomain(_))
        ));
        assert!(filter.state().is_none());
    }

    #[test]
    fn empty_packet_is_a_no_op() {
        let mut filter = RecursiveVariance::new(1.0).unwrap();
        let packet = WaveformPacket::new("ST", 0.0, 0.1, Vec::new());
        assert!(filter.apply(&packet).unwrap().is_empty());
        assert!(filter.state().is_none());
    }

    #[test]
    fn window_of_half_a_sample_or_less_is_invalid() {
        let mut filter = RecursiveMean::new(0.05).unwrap();
        let packet = WaveformPacket::new("ST", 0.0, 0.1, vec![1.0]);
        assert!(matches!(
            filter.apply(&packet),
            Err(PipelineError::InvalidInput(_))
        ));
        assert!(RecursiveMean::new(0.0).is_err());
    }

    #[test]
    fn window_between_half_and_one_sample_still_settles() {
        let mut filter = RecursiveMean::new(0.08).unwrap();
        let packet = WaveformPacket::new("ST", 0.0, 0.1, vec![1.0; 40]);
        let out = filter.apply(&packet).unwrap();
        // a = -0.25, so the step response oscillates around 1 and converges
        let expected = 1.0 - (-0.25f64).powi(40);
        assert!((out.samples()[39] - expected).abs() < 1e-12);
        assert!(out.samples().iter().all(|v| (0.0..=1.25 + 1e-12).contains(v)));
    }
}
