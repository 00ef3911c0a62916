pub mod root;
pub mod v1;
