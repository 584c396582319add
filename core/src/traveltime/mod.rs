pub mod reload;
pub mod source;
pub mod table;

pub use reload::{ReloadCoordinator, TravelTimeStore};
pub use source::{InMemorySource, JsonDirectorySource, TravelTimeSource};
pub use table::{Geometry, GridPoint, StationTravelTimes, TravelTimeTable};
