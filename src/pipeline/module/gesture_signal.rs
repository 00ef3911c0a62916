//! Gesture signals derived from per-frame landmark geometry.
//!
//! Everything here is a pure function of the current landmarks except the
//! blink edge detector and the wave/nod oscillation windows, which read and
//! update the [`GestureState`] of the session the frame belongs to.

use serde::Serialize;
use crate::pipeline::model_config::config::{face_mesh, hand, GestureKind, GestureThresholds, GESTURE_HISTORY_CAPACITY, GESTURE_MIN_SAMPLES};
use crate::pipeline::utils::geometry::{LandmarkSet, Point3, RingHistory};

const MIN_DISTANCE: f32 = 1e-6;

/// Carried gesture history of one session.
#[derive(Debug, Clone)]
pub struct GestureState {
    pub prev_eye_closed: bool,
    pub blink_count: u32,
    pub wave_history: RingHistory,
    pub nod_history: RingHistory,
}

impl Default for GestureState {
    fn default() -> Self {
        GestureState {
            prev_eye_closed: false,
            blink_count: 0,
            wave_history: RingHistory::new(GESTURE_HISTORY_CAPACITY),
            nod_history: RingHistory::new(GESTURE_HISTORY_CAPACITY),
        }
    }
}

impl GestureState {
    pub fn reset(&mut self) {
        *self = GestureState::default();
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct GestureSignals {
    pub blink_detected: bool,
    pub smile_detected: bool,
    pub head_turn_left: bool,
    pub head_turn_right: bool,
    pub wave_detected: bool,
    pub nod_detected: bool,
}

impl GestureSignals {
    pub fn satisfies(&self, gesture: GestureKind) -> bool {
        match gesture {
            GestureKind::Blink => self.blink_detected,
            GestureKind::Smile => self.smile_detected,
            GestureKind::TurnLeft => self.head_turn_left,
            GestureKind::TurnRight => self.head_turn_right,
            GestureKind::Wave => self.wave_detected,
            GestureKind::Nod => self.nod_detected,
        }
    }
}

/// `(|p1-p5| + |p2-p4|) / (2 |p0-p3|)` over a six point eye contour.
pub fn eye_aspect_ratio(eye: &[Point3; 6]) -> Option<f32> {
    let vertical_1 = eye[1].distance(&eye[5]);
    let vertical_2 = eye[2].distance(&eye[4]);
    let horizontal = eye[0].distance(&eye[3]);
    if horizontal <= MIN_DISTANCE {
        return None;
    }
    Some((vertical_1 + vertical_2) / (2.0 * horizontal))
}

pub fn average_eye_aspect_ratio(face: &LandmarkSet) -> Option<f32> {
    let left = eye_aspect_ratio(&face.select(face_mesh::LEFT_EYE)?)?;
    let right = eye_aspect_ratio(&face.select(face_mesh::RIGHT_EYE)?)?;
    Some((left + right) / 2.0)
}

/// Angle of the nose tip around the midpoint of the outer eye corners.
///
/// This is a 2-D stand-in for yaw rather than a pose estimate; it drifts with
/// roll and with how far the nose sits below the eyes.
pub fn head_turn_angle(face: &LandmarkSet) -> Option<f32> {
    let [nose, left_eye, right_eye] = face.select([face_mesh::NOSE_TIP, face_mesh::LEFT_EYE_OUTER, face_mesh::RIGHT_EYE_OUTER])?;
    let eye_center = left_eye.midpoint(&right_eye);
    Some((nose.y - eye_center.y).atan2(nose.x - eye_center.x))
}

/// Nose drop below the eye line, normalised by the inter-ocular distance.
pub fn head_pitch_ratio(face: &LandmarkSet) -> Option<f32> {
    let [nose, left_eye, right_eye] = face.select([face_mesh::NOSE_TIP, face_mesh::LEFT_EYE_OUTER, face_mesh::RIGHT_EYE_OUTER])?;
    let inter_ocular = left_eye.distance(&right_eye);
    if inter_ocular <= MIN_DISTANCE {
        return None;
    }
    Some((nose.y - left_eye.midpoint(&right_eye).y) / inter_ocular)
}

#[derive(Debug, Clone, Default)]
pub struct GestureSignalExtractor {
    thresholds: GestureThresholds,
}

impl GestureSignalExtractor {
    pub fn new(thresholds: GestureThresholds) -> Self {
        GestureSignalExtractor { thresholds }
    }

    pub fn thresholds(&self) -> &GestureThresholds {
        &self.thresholds
    }

    /// Feeds one averaged EAR sample. Fires only when the eyes go from open to
    /// closed, so a held closure counts once.
    pub fn observe_eye_aspect_ratio(&self, state: &mut GestureState, avg_ear: Option<f32>) -> bool {
        let eye_closed = avg_ear.map_or(false, |ear| ear < self.thresholds.ear_threshold);
        let blink_event = eye_closed && !state.prev_eye_closed;
        state.prev_eye_closed = eye_closed;
        if blink_event {
            state.blink_count += 1;
        }
        blink_event
    }

    pub fn detect_blink(&self, state: &mut GestureState, face: &LandmarkSet) -> bool {
        self.observe_eye_aspect_ratio(state, average_eye_aspect_ratio(face))
    }

    pub fn detect_smile(&self, face: &LandmarkSet) -> bool {
        let Some([left, right, top, bottom]) = face.select([
            face_mesh::MOUTH_LEFT,
            face_mesh::MOUTH_RIGHT,
            face_mesh::UPPER_LIP,
            face_mesh::LOWER_LIP,
        ]) else {
            return false;
        };

        let width = left.distance(&right);
        let height = top.distance(&bottom);
        if height <= MIN_DISTANCE {
            return false;
        }
        width / height > self.thresholds.smile_threshold
    }

    /// Returns `(turn_left, turn_right)`.
    pub fn detect_head_turn(&self, face: &LandmarkSet) -> (bool, bool) {
        match head_turn_angle(face) {
            Some(angle) => (angle < -self.thresholds.turn_threshold, angle > self.thresholds.turn_threshold),
            None => (false, false),
        }
    }

    /// Lateral wrist oscillation while the hand is held up. Lowering the hand
    /// or losing it clears the window.
    pub fn detect_wave(&self, state: &mut GestureState, hand_landmarks: Option<&LandmarkSet>, frame_width: u32, frame_height: u32) -> bool {
        let raised_wrist = hand_landmarks
            .and_then(|h| h.select([hand::WRIST, hand::MIDDLE_FINGER_TIP]))
            .filter(|[wrist, tip]| wrist.y < frame_height as f32 / 2.0 && tip.y < wrist.y)
            .map(|[wrist, _]| wrist);

        let Some(wrist) = raised_wrist else {
            state.wave_history.clear();
            return false;
        };

        state.wave_history.push(wrist.x);
        if state.wave_history.len() < GESTURE_MIN_SAMPLES {
            return false;
        }

        let min_amplitude = f32::max(
            self.thresholds.wave_min_amplitude_px,
            self.thresholds.wave_min_amplitude_ratio * frame_width as f32,
        );
        state.wave_history.amplitude() > min_amplitude
            && state.wave_history.direction_switches() >= self.thresholds.wave_min_switches
    }

    /// Vertical nose oscillation relative to the eye line.
    pub fn detect_nod(&self, state: &mut GestureState, face: Option<&LandmarkSet>) -> bool {
        let Some(pitch) = face.and_then(head_pitch_ratio) else {
            state.nod_history.clear();
            return false;
        };

        state.nod_history.push(pitch);
        if state.nod_history.len() < GESTURE_MIN_SAMPLES {
            return false;
        }
        state.nod_history.amplitude() > self.thresholds.nod_threshold
            && state.nod_history.direction_switches() >= self.thresholds.nod_min_switches
    }

    pub fn extract(
        &self,
        state: &mut GestureState,
        face: Option<&LandmarkSet>,
        hand_landmarks: Option<&LandmarkSet>,
        frame_width: u32,
        frame_height: u32,
    ) -> GestureSignals {
        let mut signals = GestureSignals::default();

        if let Some(face) = face {
            signals.blink_detected = self.detect_blink(state, face);
            signals.smile_detected = self.detect_smile(face);
            let (left, right) = self.detect_head_turn(face);
            signals.head_turn_left = left;
            signals.head_turn_right = right;
        }
        signals.nod_detected = self.detect_nod(state, face);
        signals.wave_detected = self.detect_wave(state, hand_landmarks, frame_width, frame_height);

        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{face_with, hand_at, with_nose};

    fn extractor() -> GestureSignalExtractor {
        GestureSignalExtractor::new(GestureThresholds::default())
    }

    #[test]
    fn test_blink_is_edge_triggered() {
        let extractor = extractor();
        let mut state = GestureState::default();
        let events: Vec<bool> = [0.30, 0.15, 0.15, 0.30]
            .into_iter()
            .map(|ear| extractor.observe_eye_aspect_ratio(&mut state, Some(ear)))
            .collect();
        assert_eq!(events, vec![false, true, false, false]);
        assert_eq!(state.blink_count, 1);
    }

    #[test]
    fn test_closed_first_frame_counts_once() {
        let extractor = extractor();
        let mut state = GestureState::default();
        assert!(extractor.observe_eye_aspect_ratio(&mut state, Some(0.1)));
        assert!(!extractor.observe_eye_aspect_ratio(&mut state, Some(0.1)));
        assert!(!extractor.observe_eye_aspect_ratio(&mut state, Some(0.3)));
        assert!(extractor.observe_eye_aspect_ratio(&mut state, Some(0.1)));
        assert_eq!(state.blink_count, 2);
    }

    #[test]
    fn test_eye_aspect_ratio() {
        let eye = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(3.0, -2.0, 0.0),
            Point3::new(7.0, -2.0, 0.0),
            Point3::new(10.0, 0.0, 0.0),
            Point3::new(7.0, 2.0, 0.0),
            Point3::new(3.0, 2.0, 0.0),
        ];
        assert!((eye_aspect_ratio(&eye).unwrap() - 0.4).abs() < 1e-6);
        assert!(eye_aspect_ratio(&[Point3::default(); 6]).is_none());
    }

    #[test]
    fn test_blink_from_landmarks() {
        let extractor = extractor();
        let mut state = GestureState::default();
        assert!(!extractor.detect_blink(&mut state, &face_with(0.35, 2.0)));
        assert!(extractor.detect_blink(&mut state, &face_with(0.05, 2.0)));
        assert!(!extractor.detect_blink(&mut state, &face_with(0.05, 2.0)));
    }

    #[test]
    fn test_smile_ratio() {
        let extractor = extractor();
        assert!(extractor.detect_smile(&face_with(0.3, 4.0)));
        assert!(!extractor.detect_smile(&face_with(0.3, 2.0)));
    }

    #[test]
    fn test_closed_lips_are_not_a_smile() {
        let extractor = extractor();
        assert!(!extractor.detect_smile(&face_with(0.3, f32::INFINITY)));
    }

    #[test]
    fn test_truncated_landmarks_yield_nothing() {
        let extractor = extractor();
        let mut state = GestureState::default();
        let sparse = LandmarkSet::new(vec![Point3::default(); 10]);
        let signals = extractor.extract(&mut state, Some(&sparse), None, 640, 480);
        assert_eq!(signals, GestureSignals::default());
    }

    #[test]
    fn test_head_turn_directions() {
        let extractor = extractor();
        // eye centre sits at (210, 200)
        let face = with_nose(face_with(0.3, 2.0), 180.0, 180.0);
        assert_eq!(extractor.detect_head_turn(&face), (true, false));
        let face = with_nose(face_with(0.3, 2.0), 240.0, 230.0);
        assert_eq!(extractor.detect_head_turn(&face), (false, true));
        let face = with_nose(face_with(0.3, 2.0), 240.0, 205.0);
        assert_eq!(extractor.detect_head_turn(&face), (false, false));
    }

    #[test]
    fn test_frontal_face_reads_as_right_turn() {
        let extractor = extractor();
        let angle = head_turn_angle(&face_with(0.3, 2.0)).unwrap();
        assert!((angle - std::f32::consts::FRAC_PI_2).abs() < 1e-4);
        assert_eq!(extractor.detect_head_turn(&face_with(0.3, 2.0)), (false, true));
    }

    #[test]
    fn test_wave_requires_raised_hand() {
        let extractor = extractor();
        let xs = [300.0, 360.0, 300.0, 360.0, 300.0, 360.0];

        let mut raised = GestureState::default();
        let waved: Vec<bool> = xs
            .iter()
            .map(|x| extractor.detect_wave(&mut raised, Some(&hand_at(*x, 100.0, 40.0)), 640, 480))
            .collect();
        assert_eq!(waved.last(), Some(&true));

        let mut lowered = GestureState::default();
        let waved = xs
            .iter()
            .any(|x| extractor.detect_wave(&mut lowered, Some(&hand_at(*x, 400.0, 350.0)), 640, 480));
        assert!(!waved);
        assert_eq!(lowered.wave_history.len(), 0);
    }

    #[test]
    fn test_wave_needs_minimum_samples_and_amplitude() {
        let extractor = extractor();
        let mut state = GestureState::default();
        for x in [300.0, 360.0, 300.0, 360.0] {
            assert!(!extractor.detect_wave(&mut state, Some(&hand_at(x, 100.0, 40.0)), 640, 480));
        }

        let mut small = GestureState::default();
        let waved = [300.0, 310.0, 300.0, 310.0, 300.0, 310.0]
            .iter()
            .any(|x| extractor.detect_wave(&mut small, Some(&hand_at(*x, 100.0, 40.0)), 640, 480));
        assert!(!waved);
    }

    #[test]
    fn test_wave_threshold_scales_with_frame_width() {
        let extractor = extractor();
        // 4% of 1920 is 76.8px, more than the 60px swing
        let mut wide = GestureState::default();
        let waved = [500.0, 560.0, 500.0, 560.0, 500.0, 560.0]
            .iter()
            .any(|x| extractor.detect_wave(&mut wide, Some(&hand_at(*x, 100.0, 40.0)), 1920, 1080));
        assert!(!waved);
    }

    #[test]
    fn test_losing_hand_resets_history() {
        let extractor = extractor();
        let mut state = GestureState::default();
        for x in [300.0, 360.0, 300.0] {
            extractor.detect_wave(&mut state, Some(&hand_at(x, 100.0, 40.0)), 640, 480);
        }
        assert_eq!(state.wave_history.len(), 3);
        extractor.detect_wave(&mut state, None, 640, 480);
        assert_eq!(state.wave_history.len(), 0);
    }

    #[test]
    fn test_nod_oscillation() {
        let extractor = extractor();
        let mut state = GestureState::default();
        let nodded: Vec<bool> = [220.0, 220.0, 240.0, 240.0, 220.0]
            .iter()
            .map(|nose_y| extractor.detect_nod(&mut state, Some(&with_nose(face_with(0.3, 2.0), 210.0, *nose_y))))
            .collect();
        assert_eq!(nodded, vec![false, false, false, false, true]);

        let mut still = GestureState::default();
        let nodded = (0..6).any(|_| extractor.detect_nod(&mut still, Some(&face_with(0.3, 2.0))));
        assert!(!nodded);
    }

    #[test]
    fn test_signals_satisfy_requested_gesture() {
        let signals = GestureSignals { smile_detected: true, ..Default::default() };
        assert!(signals.satisfies(GestureKind::Smile));
        assert!(!signals.satisfies(GestureKind::Blink));
    }
}
