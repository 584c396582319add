use crate::interface::{Message, Publisher, RoutingKey};
use crate::prelude::{PipelineError, PipelineResult, WaveformPacket};
use crate::telemetry::log::LogManager;
use crate::traveltime::{TravelTimeStore, TravelTimeTable};
use std::sync::Arc;

/// Fans each station packet out to every grid point, shifted by the travel time
/// rounded to whole samples. Holds no per-point state.
pub struct Distributor {
    store: Arc<TravelTimeStore>,
    publisher: Arc<dyn Publisher>,
    logger: LogManager,
}

impl Distributor {
    pub fn new(store: Arc<TravelTimeStore>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            store,
            publisher,
            logger: LogManager::new("distribute"),
        }
    }

    /// Publishes one shifted copy per point using the current snapshot. Returns the
    /// number of copies; a station missing from the table feeds no points.
    pub fn distribute(&self, packet: &WaveformPacket) -> PipelineResult<usize> {
        let table = self.store.snapshot();
        let sent = fan_out(&table, packet, self.publisher.as_ref())?;
        if sent == 0 {
            self.logger.trace_packet(&format!(
                "no travel times for {}, skipped",
                packet.station()
            ));
        } else {
            self.logger.trace_packet(&format!(
                "distributed {} samples of {} to {} points",
                packet.len(),
                packet.station(),
                sent
            ));
        }
        Ok(sent)
    }

    /// Whether `station` is part of the geometry the points were built on.
    pub fn feeds(&self, station: &str) -> bool {
        self.store.geometry().contains(station)
    }

    /// Forwards the sentinel once to every point `station` feeds. Goes by the
    /// store's fixed geometry so every point is reached whatever snapshot is current.
    pub fn terminate(&self, station: &str) -> PipelineResult<usize> {
        let geometry = self.store.geometry();
        let npts = if geometry.contains(station) {
            geometry.npts()
        } else {
            0
        };
        for point in 0..npts {
            self.publisher
                .publish(RoutingKey::station_point(station, point), Message::Stop)?;
        }
        self.logger
            .record(&format!("{station} terminated, sentinel sent to {npts} points"));
        Ok(npts)
    }
}

/// Shift that aligns `station` on `point`: the travel time quantised to samples.
pub fn sample_shift(travel_time: f64, dt: f64) -> i64 {
    (travel_time / dt).round() as i64
}

pub fn fan_out(
    table: &TravelTimeTable,
    packet: &WaveformPacket,
    publisher: &dyn Publisher,
) -> PipelineResult<usize> {
    let dt = packet.dt();
    if !(dt.is_finite() && dt > 0.0) {
        return Err(PipelineError::InvalidInput(format!(
            "{} packet has sample interval {dt}",
            packet.station()
        )));
    }
    let Some(row) = table.row(packet.station()) else {
        return Ok(0);
    };
    for (point, &travel_time) in row.iter().enumerate() {
        let shift = sample_shift(travel_time, dt) as f64 * dt;
        publisher.publish(
            RoutingKey::station_point(packet.station(), point),
            Message::Data(packet.shifted(-shift)),
        )?;
    }
    Ok(row.len())
}
