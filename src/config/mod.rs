pub mod parameter;
pub mod settings;
