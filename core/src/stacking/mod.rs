pub mod accumulator;
pub mod processor;
pub mod stream_buffer;

pub use accumulator::{PointAccumulator, StackCursor};
pub use processor::{PointOutcome, PointProcessor};
pub use stream_buffer::PointStreamBuffer;
