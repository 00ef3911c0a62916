pub mod liveness_service;
