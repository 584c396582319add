use std::f64::consts::PI;

/// Ricker (Mexican hat) wavelet with peak frequency `frequency`, centred on `t = 0`.
pub fn ricker(t: f64, frequency: f64) -> f64 {
    let arg = (PI * frequency * t).powi(2);
    (1.0 - 2.0 * arg) * (-arg).exp()
}
