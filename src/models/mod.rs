pub mod liveness_model;
