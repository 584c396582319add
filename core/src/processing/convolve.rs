use crate::math::FftHelper;
use crate::prelude::{PipelineError, PipelineResult, RealtimeFilter, WaveformPacket};
use num_complex::Complex64;

/// Real part of a centred ("same") convolution with an odd-length complex kernel,
/// made continuous across packets by a trailing `3N+1` sample memory.
///
/// With a `2N+1` kernel every output sample lags the input by `N` samples; callers
/// that need true timing move the packet start back by [`ConvolutionFilter::delay`].
#[derive(Clone)]
pub struct ConvolutionFilter {
    kernel: Vec<Complex64>,
    memory: Vec<f64>,
    fft: FftHelper,
}

impl ConvolutionFilter {
    pub fn new(kernel: Vec<Complex64>) -> PipelineResult<Self> {
        if kernel.len() % 2 == 0 {
            return Err(PipelineError::InvalidInput(format!(
                "convolution kernel length must be odd, got {}",
                kernel.len()
            )));
        }
        let half = (kernel.len() - 1) / 2;
        Ok(Self {
            kernel,
            memory: vec![0.0; 3 * half + 1],
            fft: FftHelper::new(),
        })
    }

    pub fn real(kernel: &[f64]) -> PipelineResult<Self> {
        Self::new(kernel.iter().map(|&k| Complex64::new(k, 0.0)).collect())
    }

    /// Half-width `N` of the kernel, i.e. the lag in samples.
    pub fn delay(&self) -> usize {
        (self.kernel.len() - 1) / 2
    }

    pub fn memory(&self) -> &[f64] {
        &self.memory
    }
}

impl RealtimeFilter for ConvolutionFilter {
    fn name(&self) -> &'static str {
        "convolve"
    }

    fn apply(&mut self, packet: &WaveformPacket) -> PipelineResult<WaveformPacket> {
        if packet.is_empty() {
            return Ok(packet.with_samples(Vec::new()));
        }
        let mem = self.memory.len();
        let mut extended = Vec::with_capacity(mem + packet.len());
        extended.extend_from_slice(&self.memory);
        extended.extend_from_slice(packet.samples());

        // "same" output i is full output i + N; the packet starts at same index mem - N.
        let full = self.fft.convolve_full(&extended, &self.kernel);
        let out = full[mem..mem + packet.len()]
            .iter()
            .map(|value| value.re)
            .collect();

        self.memory = extended.split_off(extended.len() - mem);
        Ok(packet.with_samples(out))
    }

    fn reset(&mut self) {
        self.memory.iter_mut().for_each(|v| *v = 0.0);
    }

    fn box_clone(&self) -> Box<dyn RealtimeFilter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_kernel_is_rejected() {
        assert!(matches!(
            ConvolutionFilter::real(&[0.5, 0.5]),
            Err(PipelineError::InvalidInput(_))
        ));
        assert!(ConvolutionFilter::real(&[]).is_err());
    }

    #[test]
    fn centred_delta_delays_by_half_width() {
        let mut filter = ConvolutionFilter::real(&[0.0, 0.0, 1.0, 0.0, 0.0]).unwrap();
        assert_eq!(filter.delay(), 2);
        assert_eq!(filter.memory().len(), 7);
        let packet = WaveformPacket::new("ST", 0.0, 0.1, vec![1.0, 2.0, 3.0, 4.0]);
        let out = filter.apply(&packet).unwrap();
        let expected = [0.0, 0.0, 1.0, 2.0];
        for (a, b) in out.samples().iter().zip(expected) {
            assert!((a - b).abs() < 1e-9);
        }
        let next = packet.with_samples(vec![5.0, 6.0]);
        let out = filter.apply(&next).unwrap();
        assert!((out.samples()[0] - 3.0).abs() < 1e-9);
        assert!((out.samples()[1] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn packet_splits_do_not_change_output() {
        let kernel = vec![
            Complex64::new(0.1, 0.3),
            Complex64::new(0.2, -0.1),
            Complex64::new(0.4, 0.0),
            Complex64::new(0.2, 0.1),
            Complex64::new(0.1, -0.3),
        ];
        let data: Vec<f64> = (0..64).map(|i| ((i * 7) % 11) as f64 - 5.0).collect();

        let mut whole = ConvolutionFilter::new(kernel.clone()).unwrap();
        let single = whole
            .apply(&WaveformPacket::new("ST", 0.0, 0.1, data.clone()))
            .unwrap();

        let mut split = ConvolutionFilter::new(kernel).unwrap();
        let mut pieces = Vec::new();
        for chunk in [&data[..1], &data[1..30], &data[30..31], &data[31..]] {
            let packet = WaveformPacket::new("ST", 0.0, 0.1, chunk.to_vec());
            pieces.extend_from_slice(split.apply(&packet).unwrap().samples());
        }

        assert_eq!(single.len(), pieces.len());
        for (a, b) in single.samples().iter().zip(&pieces) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
