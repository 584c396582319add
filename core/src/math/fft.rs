use num_complex::Complex64;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Wraps the `rustfft` planner and keeps the last forward/inverse plan pair.
#[derive(Clone, Default)]
pub struct FftHelper {
    plan: Option<CachedPlan>,
}

#[derive(Clone)]
struct CachedPlan {
    size: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl FftHelper {
    pub fn new() -> Self {
        Self::default()
    }

    fn plan(&mut self, size: usize) -> (Arc<dyn Fft<f64>>, Arc<dyn Fft<f64>>) {
        match &self.plan {
            Some(plan) if plan.size == size => {
                (Arc::clone(&plan.forward), Arc::clone(&plan.inverse))
            }
            _ => {
                let mut planner = FftPlanner::new();
                let forward = planner.plan_fft_forward(size);
                let inverse = planner.plan_fft_inverse(size);
                self.plan = Some(CachedPlan {
                    size,
                    forward: Arc::clone(&forward),
                    inverse: Arc::clone(&inverse),
                });
                (forward, inverse)
            }
        }
    }

    /// Full linear convolution of a real signal with a complex kernel
    /// (`signal.len() + kernel.len() - 1` outputs).
    pub fn convolve_full(&mut self, signal: &[f64], kernel: &[Complex64]) -> Vec<Complex64> {
        if signal.is_empty() || kernel.is_empty() {
            return Vec::new();
        }
        let size = signal.len() + kernel.len() - 1;
        let (forward, inverse) = self.plan(size);

        let mut lhs = vec![Complex64::zero(); size];
        for (slot, &value) in lhs.iter_mut().zip(signal) {
            *slot = Complex64::new(value, 0.0);
        }
        let mut rhs = vec![Complex64::zero(); size];
        rhs[..kernel.len()].copy_from_slice(kernel);

        forward.process(&mut lhs);
        forward.process(&mut rhs);
        for (l, r) in lhs.iter_mut().zip(&rhs) {
            *l *= *r;
        }
        inverse.process(&mut lhs);

        let scale = 1.0 / size as f64;
        lhs.iter_mut().for_each(|value| *value *= scale);
        lhs
    }
}
