//! Core of the real-time migration stack.
//!
//! Station waveforms are conditioned by recursive filters, fanned out to every
//! grid point with a travel-time shift, and summed per point into a contiguous
//! stack. The travel-time table can be rebuilt while data flows, and a per-station
//! sentinel drains the whole pipeline.

pub mod distribution;
pub mod interface;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod runtime;
pub mod stacking;
pub mod telemetry;
pub mod traveltime;

pub use prelude::{PipelineError, PipelineResult, RealtimeFilter, StackConfig, WaveformPacket};
pub use runtime::{Pipeline, PipelineConfig};
