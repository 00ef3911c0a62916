use serde::{Deserialize, Serialize};

/// A landmark in frame pixel coordinates; `z` is detector-relative depth.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Point3 { x, y, z }
    }

    pub fn distance(&self, other: &Point3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn midpoint(&self, other: &Point3) -> Point3 {
        Point3 {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
            z: (self.z + other.z) / 2.0,
        }
    }
}

/// Ordered landmark points indexed by a fixed anatomical scheme.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LandmarkSet {
    points: Vec<Point3>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Point3>) -> Self {
        LandmarkSet { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Point3> {
        self.points.get(index)
    }

    /// Fetches several indices at once, `None` if any is out of range.
    pub fn select<const N: usize>(&self, indices: [usize; N]) -> Option<[Point3; N]> {
        let mut out = [Point3::default(); N];
        for (slot, idx) in out.iter_mut().zip(indices) {
            *slot = *self.points.get(idx)?;
        }
        Some(out)
    }
}

/// Bounded FIFO of scalar samples; the oldest sample falls out when full.
#[derive(Debug, Clone)]
pub struct RingHistory {
    capacity: usize,
    samples: std::collections::VecDeque<f32>,
}

impl RingHistory {
    pub fn new(capacity: usize) -> Self {
        RingHistory {
            capacity,
            samples: std::collections::VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn amplitude(&self) -> f32 {
        let (min, max) = self
            .samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if self.samples.is_empty() { 0.0 } else { max - min }
    }

    /// Number of direction reversals between consecutive non-zero differences.
    pub fn direction_switches(&self) -> usize {
        let directions: Vec<f32> = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .map(|(a, b)| b - a)
            .filter(|d| *d != 0.0)
            .map(f32::signum)
            .collect();

        directions.windows(2).filter(|w| w[0] != w[1]).count()
    }
}
