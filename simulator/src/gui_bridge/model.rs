use migcore::interface::{Message, RoutingKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Running summary of one point's stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointSummary {
    pub point: usize,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub samples: usize,
    pub max_value: f64,
    pub max_time: Option<f64>,
    pub closed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub points: Vec<PointSummary>,
    pub best_point: Option<usize>,
    pub max_stack: f64,
}

/// Latest per-point stack state as seen on the output topic.
#[derive(Debug, Default)]
pub struct StackBoard {
    points: RwLock<BTreeMap<usize, PointSummary>>,
}

impl StackBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, key: &RoutingKey, message: &Message) {
        let Some(point) = key.point() else {
            log::warn!("[board] ignoring output keyed {key}");
            return;
        };
        let Ok(mut points) = self.points.write() else {
            return;
        };
        let summary = points.entry(point).or_insert_with(|| PointSummary {
            point,
            max_value: f64::NEG_INFINITY,
            ..Default::default()
        });
        match message {
            Message::Stop => summary.closed = true,
            Message::Data(stack) => {
                if stack.is_empty() {
                    return;
                }
                summary.start_time.get_or_insert(stack.start_time());
                summary.end_time = Some(stack.end_time());
                summary.samples += stack.len();
                for (i, &value) in stack.samples().iter().enumerate() {
                    if value > summary.max_value {
                        summary.max_value = value;
                        summary.max_time = Some(stack.start_time() + i as f64 * stack.dt());
                    }
                }
            }
        }
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        let points: Vec<PointSummary> = self
            .points
            .read()
            .map(|guard| guard.values().cloned().collect())
            .unwrap_or_default();
        let best = points
            .iter()
            .filter(|p| p.samples > 0)
            .max_by(|a, b| a.max_value.total_cmp(&b.max_value));
        BoardSnapshot {
            best_point: best.map(|p| p.point),
            max_stack: best.map(|p| p.max_value).unwrap_or(0.0),
            points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migcore::WaveformPacket;

    fn stack(point: usize, start: f64, samples: Vec<f64>) -> (RoutingKey, Message) {
        (
            RoutingKey::Point(point),
            Message::Data(WaveformPacket::new(point.to_string(), start, 0.5, samples)),
        )
    }

    #[test]
    fn board_tracks_extent_and_maximum() {
        let board = StackBoard::new();
        for (key, message) in [
            stack(3, 0.0, vec![1.0, 4.0]),
            stack(3, 1.0, vec![2.0]),
            stack(1, 0.0, vec![5.0, 0.0, 0.0]),
        ] {
            board.apply(&key, &message);
        }
        board.apply(&RoutingKey::Point(3), &Message::Stop);

        let snapshot = board.snapshot();
        assert_eq!(snapshot.best_point, Some(1));
        assert_eq!(snapshot.max_stack, 5.0);
        let three = &snapshot.points[1];
        assert_eq!(three.point, 3);
        assert_eq!(three.samples, 3);
        assert_eq!(three.start_time, Some(0.0));
        assert_eq!(three.end_time, Some(1.0));
        assert_eq!(three.max_time, Some(0.5));
        assert!(three.closed);
    }

    #[test]
    fn empty_board_has_no_best_point() {
        let board = StackBoard::new();
        board.apply(&RoutingKey::Point(0), &Message::Stop);
        let snapshot = board.snapshot();
        assert_eq!(snapshot.best_point, None);
        assert_eq!(snapshot.points.len(), 1);
    }
}
