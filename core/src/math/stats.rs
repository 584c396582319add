pub struct StatsHelper;

impl StatsHelper {
    pub fn mean(samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    /// Biased excess (Fisher) kurtosis, `m4 / m2^2 - 3`.
    ///
    /// A window with zero spread carries no outlier and yields `0.0`.
    pub fn excess_kurtosis(window: &[f64]) -> f64 {
        if window.len() < 2 {
            return 0.0;
        }
        let mean = Self::mean(window);
        let n = window.len() as f64;
        let (m2, m4) = window.iter().fold((0.0, 0.0), |(m2, m4), &v| {
            let d2 = (v - mean) * (v - mean);
            (m2 + d2, m4 + d2 * d2)
        });
        let m2 = m2 / n;
        let m4 = m4 / n;
        let floor = f64::EPSILON * mean.abs();
        if m2 <= floor * floor {
            return 0.0;
        }
        m4 / (m2 * m2) - 3.0
    }
}
