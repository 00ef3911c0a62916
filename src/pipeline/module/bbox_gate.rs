use serde::{Deserialize, Serialize};
use crate::error::liveness_error::LivenessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub fn area(&self) -> u32 {
        self.w.saturating_mul(self.h)
    }

    /// Builds a box from corner coordinates, clamped to the frame. `None` when
    /// nothing of it lies inside the frame.
    pub fn from_corners(left: f32, top: f32, right: f32, bottom: f32, frame_w: u32, frame_h: u32) -> Option<Self> {
        let max_x = frame_w.saturating_sub(1) as f32;
        let max_y = frame_h.saturating_sub(1) as f32;
        let left = left.clamp(0.0, max_x);
        let top = top.clamp(0.0, max_y);
        let right = right.clamp(0.0, max_x);
        let bottom = bottom.clamp(0.0, max_y);

        let w = (right - left + 1.0) as u32;
        let h = (bottom - top + 1.0) as u32;
        if right <= left || bottom <= top || w == 0 || h == 0 {
            return None;
        }
        Some(BoundingBox { x: left as u32, y: top as u32, w, h })
    }
}

/// Rejects frames whose face is missing or too small for the classifiers.
#[derive(Debug, Clone)]
pub struct BBoxGate {
    min_bbox_area: u32,
}

impl BBoxGate {
    pub fn new(min_bbox_area: u32) -> Self {
        BBoxGate { min_bbox_area }
    }

    pub fn call(&self, bbox: Option<BoundingBox>) -> Result<BoundingBox, LivenessError> {
        let bbox = bbox.ok_or(LivenessError::NoFaceDetected)?;
        let area = bbox.area();
        if area < self.min_bbox_area {
            return Err(LivenessError::FaceTooSmall {
                area,
                min: self.min_bbox_area,
            });
        }
        Ok(bbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_box_rejected() {
        let gate = BBoxGate::new(6400);
        assert_eq!(gate.call(None), Err(LivenessError::NoFaceDetected));
    }

    #[test]
    fn test_small_box_rejected() {
        let gate = BBoxGate::new(6400);
        let bbox = BoundingBox { x: 0, y: 0, w: 79, h: 80 };
        assert_eq!(gate.call(Some(bbox)), Err(LivenessError::FaceTooSmall { area: 6320, min: 6400 }));
    }

    #[test]
    fn test_exact_minimum_passes() {
        let gate = BBoxGate::new(6400);
        let bbox = BoundingBox { x: 10, y: 10, w: 80, h: 80 };
        assert_eq!(gate.call(Some(bbox)), Ok(bbox));
    }

    #[test]
    fn test_from_corners_clamps_to_frame() {
        let bbox = BoundingBox::from_corners(-20.0, 10.0, 99.0, 500.0, 640, 480).unwrap();
        assert_eq!(bbox, BoundingBox { x: 0, y: 10, w: 100, h: 470 });
        assert!(BoundingBox::from_corners(50.0, 50.0, 40.0, 60.0, 640, 480).is_none());
    }
}
