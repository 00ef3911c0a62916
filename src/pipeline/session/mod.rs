pub mod challenge;
pub mod session_store;
