//! In-process transport: partitioned queues, the two worker pools, and the
//! control topic, wired together behind [`Pipeline`].

pub mod pipeline;
pub mod router;

pub use pipeline::{Pipeline, PipelineConfig, StackStream};
pub use router::{station_partition, InFlight, PartitionRouter, StackSink};
