use crate::generator::template::ricker;
use anyhow::Context;
use migcore::traveltime::{StationTravelTimes, TravelTimeTable};
use migcore::WaveformPacket;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Regular grid under a ring of surface stations, homogeneous velocity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Node spacing in km.
    pub spacing: f64,
    /// Velocity in km/s.
    pub velocity: f64,
    /// Radius, in km, of the innermost station around the grid centre.
    pub station_radius: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            nx: 5,
            ny: 5,
            nz: 3,
            spacing: 1.0,
            velocity: 3.5,
            station_radius: 4.0,
        }
    }
}

impl GridConfig {
    pub fn npts(&self) -> usize {
        self.nx.max(1) * self.ny.max(1) * self.nz.max(1)
    }

    fn node(&self, index: usize) -> (f64, f64, f64) {
        let nx = self.nx.max(1);
        let ny = self.ny.max(1);
        let ix = index % nx;
        let iy = (index / nx) % ny;
        let iz = index / (nx * ny);
        (
            ix as f64 * self.spacing,
            iy as f64 * self.spacing,
            iz as f64 * self.spacing,
        )
    }

    fn station_position(&self, index: usize, count: usize) -> (f64, f64) {
        let cx = (self.nx.max(1) - 1) as f64 * self.spacing / 2.0;
        let cy = (self.ny.max(1) - 1) as f64 * self.spacing / 2.0;
        let fraction = index as f64 / count.max(1) as f64;
        let angle = 2.0 * PI * fraction;
        // uneven radii keep the centre column from aligning at every depth
        let radius = self.station_radius * (1.0 + 0.5 * fraction);
        (cx + radius * angle.cos(), cy + radius * angle.sin())
    }
}

/// Straight-ray travel times from every grid node to each station.
pub fn homogeneous_grid(
    stations: &[String],
    grid: &GridConfig,
) -> anyhow::Result<Vec<StationTravelTimes>> {
    if !(grid.velocity.is_finite() && grid.velocity > 0.0) {
        anyhow::bail!("grid velocity must be positive, got {}", grid.velocity);
    }
    let nodes: Vec<(f64, f64, f64)> = (0..grid.npts()).map(|ip| grid.node(ip)).collect();
    let rows = stations
        .iter()
        .enumerate()
        .map(|(ista, station)| {
            let (sx, sy) = grid.station_position(ista, stations.len());
            let ttimes = nodes
                .iter()
                .map(|&(x, y, z)| {
                    ((x - sx).powi(2) + (y - sy).powi(2) + z.powi(2)).sqrt() / grid.velocity
                })
                .collect();
            StationTravelTimes {
                station: station.clone(),
                x: nodes.iter().map(|n| n.0).collect(),
                y: nodes.iter().map(|n| n.1).collect(),
                z: nodes.iter().map(|n| n.2).collect(),
                ttimes,
            }
        })
        .collect();
    Ok(rows)
}

/// Synthetic event: one wavelet from `source_point` at `origin_time`, seen by every
/// station after its travel time, plus uniform noise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub duration: f64,
    pub packet_seconds: f64,
    pub origin_time: f64,
    pub source_point: usize,
    pub frequency: f64,
    pub amplitude: f64,
    pub noise: f64,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            duration: 30.0,
            packet_seconds: 1.0,
            origin_time: 10.0,
            source_point: 0,
            frequency: 5.0,
            amplitude: 1.0,
            noise: 0.05,
            seed: 0,
        }
    }
}

/// Packets for one station, contiguous from t = 0, in arrival order.
pub fn station_packets(
    table: &TravelTimeTable,
    station: &str,
    dt: f64,
    config: &GeneratorConfig,
) -> anyhow::Result<Vec<WaveformPacket>> {
    let ista = table
        .station_index(station)
        .with_context(|| format!("station {station} has no travel times"))?;
    let travel_time = table
        .travel_time(station, config.source_point)
        .with_context(|| format!("source point {} outside the grid", config.source_point))?;
    let total = (config.duration / dt).round() as usize;
    let per_packet = ((config.packet_seconds / dt).round() as usize).max(1);
    let arrival = config.origin_time + travel_time;

    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(ista as u64));
    let trace: Vec<f64> = (0..total)
        .map(|i| {
            let t = i as f64 * dt;
            let jitter = if config.noise > 0.0 {
                rng.gen_range(-config.noise..config.noise)
            } else {
                0.0
            };
            config.amplitude * ricker(t - arrival, config.frequency) + jitter
        })
        .collect();

    Ok(trace
        .chunks(per_packet)
        .enumerate()
        .map(|(k, chunk)| {
            WaveformPacket::new(station, (k * per_packet) as f64 * dt, dt, chunk.to_vec())
        })
        .collect())
}
