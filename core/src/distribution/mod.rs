pub mod distributor;
pub mod station;

pub use distributor::{fan_out, sample_shift, Distributor};
pub use station::{IngestOutcome, StationProcessor};
