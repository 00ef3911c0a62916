pub mod errors;
pub mod liveness_error;
