use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Look-back of the scrolling trace, in seconds.
pub const WINDOW_SECONDS: f64 = 10.0;

/// One plotted instant. Pedals are 0..100, `steer` is -100..100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TracePoint {
    pub t: f64,
    pub throttle: f64,
    pub brake: f64,
    pub steer: f64,
}

/// Time-windowed trace history shared by the refresh loop (writer) and the
/// renderer (reader). Each append-and-prune and each snapshot runs under the
/// same lock.
#[derive(Debug, Default)]
pub struct TraceBuffer {
    points: Mutex<VecDeque<TracePoint>>,
}

impl TraceBuffer {
    pub fn new() -> Self {
        Self { points: Mutex::new(VecDeque::with_capacity(1024)) }
    }

    pub fn append(&self, point: TracePoint) {
        let mut points = self.points.lock().unwrap_or_else(PoisonError::into_inner);
        points.push_back(point);
        while let Some(head) = points.front() {
            if point.t - head.t > WINDOW_SECONDS {
                points.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn snapshot(&self) -> Vec<TracePoint> {
        let points = self.points.lock().unwrap_or_else(PoisonError::into_inner);
        points.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.points.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.points.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(t: f64) -> TracePoint {
        TracePoint { t, throttle: 0.0, brake: 0.0, steer: 0.0 }
    }

    #[test]
    fn retained_points_stay_within_window() {
        let buf = TraceBuffer::new();
        for i in 0..300 {
            buf.append(pt(f64::from(i) * 0.1));
        }
        let snap = buf.snapshot();
        let last = snap.last().unwrap().t;
        assert!(snap.iter().all(|p| last - p.t <= WINDOW_SECONDS));
        // ordering is preserved
        assert!(snap.windows(2).all(|w| w[0].t < w[1].t));
    }

    #[test]
    fn point_exactly_at_window_edge_is_kept() {
        let buf = TraceBuffer::new();
        buf.append(pt(0.0));
        buf.append(pt(10.0));
        assert_eq!(buf.len(), 2);
        buf.append(pt(10.5));
        let ts: Vec<f64> = buf.snapshot().iter().map(|p| p.t).collect();
        assert_eq!(ts, vec![10.0, 10.5]);
    }

    #[test]
    fn old_head_is_evicted() {
        let buf = TraceBuffer::new();
        for t in [0.0, 1.0, 2.0, 3.0] {
            buf.append(pt(t));
        }
        buf.append(pt(12.0));
        let ts: Vec<f64> = buf.snapshot().iter().map(|p| p.t).collect();
        assert_eq!(ts, vec![2.0, 3.0, 12.0]);
    }

    #[test]
    fn snapshot_is_detached_from_later_appends() {
        let buf = TraceBuffer::new();
        buf.append(pt(1.0));
        let snap = buf.snapshot();
        buf.append(pt(2.0));
        assert_eq!(snap.len(), 1);
        assert_eq!(buf.len(), 2);
        buf.clear();
        assert!(buf.is_empty());
    }
}
