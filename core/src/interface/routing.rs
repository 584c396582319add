use crate::prelude::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four topics every stage publishes to or consumes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// Raw (or preprocessed) station packets, keyed by station id.
    Ingestion,
    /// Time-shifted packets, keyed by `<station>.<point>`.
    PointFanout,
    /// Stacked packets, keyed by point index.
    StackOutput,
    /// Broadcast signals delivered to every listener.
    Control,
}

/// Routing key for a partitioned topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingKey {
    Station(String),
    StationPoint { station: String, point: usize },
    Point(usize),
}

impl RoutingKey {
    pub fn station_point(station: impl Into<String>, point: usize) -> Self {
        RoutingKey::StationPoint {
            station: station.into(),
            point,
        }
    }

    pub fn topic(&self) -> Topic {
        match self {
            RoutingKey::Station(_) => Topic::Ingestion,
            RoutingKey::StationPoint { .. } => Topic::PointFanout,
            RoutingKey::Point(_) => Topic::StackOutput,
        }
    }

    pub fn point(&self) -> Option<usize> {
        match self {
            RoutingKey::StationPoint { point, .. } | RoutingKey::Point(point) => Some(*point),
            RoutingKey::Station(_) => None,
        }
    }

    pub fn station(&self) -> Option<&str> {
        match self {
            RoutingKey::Station(station) | RoutingKey::StationPoint { station, .. } => {
                Some(station.as_str())
            }
            RoutingKey::Point(_) => None,
        }
    }

    /// Parses the wire form of a key on `topic`.
    pub fn parse(topic: Topic, raw: &str) -> PipelineResult<Self> {
        let invalid = || PipelineError::InvalidInput(format!("bad {topic:?} routing key {raw:?}"));
        match topic {
            Topic::Ingestion if !raw.is_empty() => Ok(RoutingKey::Station(raw.to_string())),
            Topic::PointFanout => {
                let (station, point) = raw.rsplit_once('.').ok_or_else(invalid)?;
                let point = point.parse().map_err(|_| invalid())?;
                if station.is_empty() {
                    return Err(invalid());
                }
                Ok(RoutingKey::station_point(station, point))
            }
            Topic::StackOutput => raw.parse().map(RoutingKey::Point).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingKey::Station(station) => write!(f, "{station}"),
            RoutingKey::StationPoint { station, point } => write!(f, "{station}.{point}"),
            RoutingKey::Point(point) => write!(f, "{point}"),
        }
    }
}

/// Out-of-band signal on the control topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlSignal {
    ReloadTravelTimes,
    Shutdown,
    Other(String),
}

impl ControlSignal {
    pub const RELOAD_WIRE: &'static str = "SYN_TTIMES_CHANGED";
    pub const SHUTDOWN_WIRE: &'static str = "STOP";

    pub fn as_wire(&self) -> &str {
        match self {
            ControlSignal::ReloadTravelTimes => Self::RELOAD_WIRE,
            ControlSignal::Shutdown => Self::SHUTDOWN_WIRE,
            ControlSignal::Other(body) => body,
        }
    }
}

impl FromStr for ControlSignal {
    type Err = std::convert::Infallible;

    fn from_str(body: &str) -> Result<Self, Self::Err> {
        Ok(match body {
            Self::RELOAD_WIRE => ControlSignal::ReloadTravelTimes,
            Self::SHUTDOWN_WIRE => ControlSignal::Shutdown,
            other => ControlSignal::Other(other.to_string()),
        })
    }
}
