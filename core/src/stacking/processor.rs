use crate::interface::{Delivery, Message, Publisher, RoutingKey};
use crate::prelude::{PipelineError, PipelineResult, StackConfig};
use crate::stacking::accumulator::PointAccumulator;
use crate::telemetry::log::LogManager;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What happened to one point-fanout delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointOutcome {
    Buffered,
    Stacked,
    Terminated,
    Ignored,
}

/// Accumulators for the partition of grid points owned by one worker.
pub struct PointProcessor {
    points: BTreeMap<usize, PointAccumulator>,
    output: Arc<dyn Publisher>,
    logger: LogManager,
}

impl PointProcessor {
    pub fn new(
        owned: impl IntoIterator<Item = usize>,
        stations: &[String],
        config: &StackConfig,
        output: Arc<dyn Publisher>,
    ) -> Self {
        let points = owned
            .into_iter()
            .map(|ip| (ip, PointAccumulator::new(ip, stations, config)))
            .collect::<BTreeMap<_, _>>();
        let logger = LogManager::new(format!("points[{}]", points.len()));
        Self {
            points,
            output,
            logger,
        }
    }

    pub fn owned(&self) -> impl Iterator<Item = usize> + '_ {
        self.points.keys().copied()
    }

    pub fn accumulator(&self, point: usize) -> Option<&PointAccumulator> {
        self.points.get(&point)
    }

    /// True once every owned point has received its sentinel.
    pub fn is_finished(&self) -> bool {
        self.points.values().all(PointAccumulator::is_closed)
    }

    pub fn handle(&mut self, delivery: &Delivery) -> PipelineResult<PointOutcome> {
        let RoutingKey::StationPoint { station, point } = &delivery.key else {
            return Err(PipelineError::InvalidInput(format!(
                "point fan-out got key {}",
                delivery.key
            )));
        };
        let accumulator = self
            .points
            .get_mut(point)
            .ok_or_else(|| PipelineError::InvalidInput(format!("point {point} not owned here")))?;

        match &delivery.message {
            Message::Stop => {
                if !accumulator.close() {
                    return Ok(PointOutcome::Ignored);
                }
                self.logger
                    .record(&format!("point {point} terminated by {station}"));
                self.output.publish(RoutingKey::Point(*point), Message::Stop)?;
                Ok(PointOutcome::Terminated)
            }
            Message::Data(packet) => {
                if accumulator.is_closed() {
                    return Ok(PointOutcome::Ignored);
                }
                match accumulator.append(packet)? {
                    Some(stack) => {
                        self.output
                            .publish(RoutingKey::Point(*point), Message::Data(stack))?;
                        Ok(PointOutcome::Stacked)
                    }
                    None => Ok(PointOutcome::Buffered),
                }
            }
        }
    }
}
