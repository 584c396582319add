use crate::prelude::{PipelineError, PipelineResult};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One station's travel-time row as stored on disk, with the grid it refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationTravelTimes {
    pub station: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub ttimes: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Immutable snapshot of station-to-point travel times over a shared grid.
///
/// Every station has exactly one row of length `npts`. Reloading builds a new
/// table; an existing one is never edited.
#[derive(Debug, Clone, PartialEq)]
pub struct TravelTimeTable {
    stations: Vec<String>,
    x: Array1<f64>,
    y: Array1<f64>,
    z: Array1<f64>,
    times: Array2<f64>,
}

/// Station set and point count of a snapshot. Per-point buffers are sized on
/// this, so a running pipeline only accepts snapshots with the same geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    stations: BTreeSet<String>,
    npts: usize,
}

impl Geometry {
    pub fn npts(&self) -> usize {
        self.npts
    }

    pub fn nsta(&self) -> usize {
        self.stations.len()
    }

    pub fn contains(&self, station: &str) -> bool {
        self.stations.contains(station)
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stations x {} points", self.nsta(), self.npts)
    }
}

const GRID_TOLERANCE: f64 = 1e-9;

fn same_axis(reference: &Array1<f64>, candidate: &[f64]) -> bool {
    reference.len() == candidate.len()
        && reference
            .iter()
            .zip(candidate)
            .all(|(a, b)| (a - b).abs() <= GRID_TOLERANCE * a.abs().max(1.0))
}

impl TravelTimeTable {
    /// Assembles a snapshot from per-station rows, checking they share one grid.
    pub fn build(rows: Vec<StationTravelTimes>) -> PipelineResult<Self> {
        let first = rows
            .first()
            .ok_or_else(|| PipelineError::TravelTime("no travel-time tables found".into()))?;
        let npts = first.x.len();
        if npts == 0 || first.y.len() != npts || first.z.len() != npts {
            return Err(PipelineError::TravelTime(format!(
                "grid of {} has inconsistent coordinate lengths",
                first.station
            )));
        }
        let x = Array1::from(first.x.clone());
        let y = Array1::from(first.y.clone());
        let z = Array1::from(first.z.clone());

        let mut stations: Vec<String> = Vec::with_capacity(rows.len());
        let mut flat = Vec::with_capacity(rows.len() * npts);
        for row in &rows {
            if stations.contains(&row.station) {
                return Err(PipelineError::TravelTime(format!(
                    "station {} listed twice",
                    row.station
                )));
            }
            if !(same_axis(&x, &row.x) && same_axis(&y, &row.y) && same_axis(&z, &row.z)) {
                return Err(PipelineError::TravelTime(format!(
                    "grid of {} differs from grid of {}",
                    row.station, first.station
                )));
            }
            if row.ttimes.len() != npts {
                return Err(PipelineError::TravelTime(format!(
                    "{} has {} travel times for {} points",
                    row.station,
                    row.ttimes.len(),
                    npts
                )));
            }
            if let Some(bad) = row.ttimes.iter().find(|t| !(t.is_finite() && **t >= 0.0)) {
                return Err(PipelineError::TravelTime(format!(
                    "{} has invalid travel time {}",
                    row.station, bad
                )));
            }
            stations.push(row.station.clone());
            flat.extend_from_slice(&row.ttimes);
        }

        let times = Array2::from_shape_vec((stations.len(), npts), flat)
            .map_err(|err| PipelineError::Internal(err.to_string()))?;
        Ok(Self {
            stations,
            x,
            y,
            z,
            times,
        })
    }

    pub fn stations(&self) -> &[String] {
        &self.stations
    }

    pub fn nsta(&self) -> usize {
        self.stations.len()
    }

    pub fn npts(&self) -> usize {
        self.times.ncols()
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            stations: self.stations.iter().cloned().collect(),
            npts: self.npts(),
        }
    }

    pub fn station_index(&self, station: &str) -> Option<usize> {
        self.stations.iter().position(|s| s == station)
    }

    /// Travel times from `station` to every grid point.
    pub fn row(&self, station: &str) -> Option<ArrayView1<'_, f64>> {
        self.station_index(station).map(|ista| self.times.row(ista))
    }

    pub fn travel_time(&self, station: &str, point: usize) -> Option<f64> {
        let ista = self.station_index(station)?;
        self.times.get((ista, point)).copied()
    }

    pub fn point(&self, index: usize) -> Option<GridPoint> {
        Some(GridPoint {
            x: *self.x.get(index)?,
            y: *self.y.get(index)?,
            z: *self.z.get(index)?,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn row(station: &str, ttimes: Vec<f64>) -> StationTravelTimes {
        let n = ttimes.len();
        StationTravelTimes {
            station: station.to_string(),
            x: (0..n).map(|i| i as f64).collect(),
            y: vec![0.0; n],
            z: vec![1.5; n],
            ttimes,
        }
    }

    #[test]
    fn builds_matrix_in_station_order() {
        let table =
            TravelTimeTable::build(vec![row("A", vec![0.0, 1.0]), row("B", vec![0.5, 0.25])])
                .unwrap();
        assert_eq!(table.nsta(), 2);
        assert_eq!(table.npts(), 2);
        assert_eq!(table.stations(), &["A".to_string(), "B".to_string()]);
        assert_eq!(table.travel_time("B", 1), Some(0.25));
        assert_eq!(table.travel_time("C", 0), None);
        assert_eq!(table.travel_time("A", 2), None);
        assert_eq!(
            table.point(1),
            Some(GridPoint {
                x: 1.0,
                y: 0.0,
                z: 1.5
            })
        );
    }

    #[test]
    fn empty_input_is_fatal() {
        assert!(matches!(
            TravelTimeTable::build(Vec::new()),
            Err(PipelineError::TravelTime(_))
        ));
    }

    #[test]
    fn mismatched_grids_are_rejected() {
        let mut other = row("B", vec![0.0, 1.0]);
        other.x[1] = 7.0;
        assert!(TravelTimeTable::build(vec![row("A", vec![0.0, 1.0]), other]).is_err());

        let short = row("B", vec![0.0, 1.0, 2.0]);
        assert!(TravelTimeTable::build(vec![row("A", vec![0.0, 1.0]), short]).is_err());
    }

    #[test]
    fn duplicate_or_negative_rows_are_rejected() {
        assert!(
            TravelTimeTable::build(vec![row("A", vec![0.0]), row("A", vec![0.0])]).is_err()
        );
        assert!(TravelTimeTable::build(vec![row("A", vec![-1.0])]).is_err());
    }
}
