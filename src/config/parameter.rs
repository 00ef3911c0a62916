use std::path::PathBuf;
use dotenv::dotenv;

/// Loads a `.env` file into the process environment, returning where it was found.
pub fn init() -> Option<PathBuf> {
    dotenv().ok()
}

/// Non-blank environment variable.
pub fn get(parameter: &str) -> Option<String> {
    std::env::var(parameter).ok().filter(|v| !v.trim().is_empty())
}
