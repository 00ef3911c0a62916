pub mod inference;
pub mod liveness_pipeline;
pub mod model_config;
pub mod module;
pub mod session;
pub mod token;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
