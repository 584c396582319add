//! Topic and routing contract shared by every stage. Transport mechanics live in
//! [`crate::runtime`]; this module only fixes what travels where.

pub mod message;
pub mod routing;

pub use message::{Delivery, Message, Publisher, RecordingPublisher};
pub use routing::{ControlSignal, RoutingKey, Topic};
