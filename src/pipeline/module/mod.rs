pub mod bbox_gate;
pub mod face_antispoofing;
pub mod face_detection;
pub mod gesture_signal;
pub mod landmark_detection;
