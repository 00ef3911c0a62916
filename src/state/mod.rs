pub mod liveness_state;
