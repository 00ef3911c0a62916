use config::{Config, ConfigError, Environment, File, FileFormat};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::fmt;
use crate::config::parameter;

pub static SETTINGS: Lazy<Settings> = Lazy::new(|| Settings::new().expect("Failed to setup settings"));

#[derive(Debug, Clone, Deserialize)]
pub struct App {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub http_port: u16,
    pub api_key: Option<String>,
    pub request_timeout: Option<u64>,
    pub allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tracer {
    pub uri: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Triton {
    pub http_url: String,
    #[serde(default = "default_inference_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    /// Model name as registered on the inference server.
    pub name: String,
    /// Structured filename encoding input size, variant and crop scale.
    pub descriptor: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AntiSpoofing {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_min_bbox_area")]
    pub min_bbox_area: u32,
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Detection {
    pub face_model: String,
    #[serde(default = "default_face_input_size")]
    pub face_input_size: u32,
    #[serde(default = "default_face_confidence")]
    pub face_confidence: f32,
    pub face_mesh_model: String,
    pub hand_model: String,
    #[serde(default = "default_hand_presence")]
    pub hand_presence: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Gesture {
    pub ear_threshold: f32,
    pub smile_threshold: f32,
    pub turn_threshold: f32,
    pub wave_min_amplitude_px: f32,
    pub wave_min_amplitude_ratio: f32,
    pub wave_min_switches: usize,
    pub nod_threshold: f32,
    pub nod_min_switches: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Token {
    pub secret_key: Option<String>,
    pub expiry_hours: i64,
    pub issuer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub environment: Option<String>,
    pub app: App,
    pub server: Server,
    pub logger: Option<Logger>,
    pub tracer: Tracer,
    pub triton: Triton,
    pub antispoofing: AntiSpoofing,
    pub detection: Detection,
    pub gesture: Gesture,
    pub session: Session,
    pub token: Token,
}

fn default_inference_timeout_ms() -> u64 { 5000 }
fn default_min_confidence() -> f32 { 0.98 }
fn default_min_bbox_area() -> u32 { 6400 }
fn default_face_input_size() -> u32 { 640 }
fn default_face_confidence() -> f32 { 0.6 }
fn default_hand_presence() -> f32 { 0.5 }

/// Flat variables accepted next to the `__`-separated ones.
const FLAT_OVERRIDES: [(&str, &str); 5] = [
    ("PORT", "server.http_port"),
    ("MIN_CONFIDENCE", "antispoofing.min_confidence"),
    ("MIN_BBOX_AREA", "antispoofing.min_bbox_area"),
    ("TOKEN_EXPIRY_HOURS", "token.expiry_hours"),
    ("JWT_SECRET_KEY", "token.secret_key"),
];

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = parameter::get("RUN_MODE").unwrap_or_else(|| "development".into());

        let mut builder = Config::builder()
            .add_source(File::with_name("conf/config.toml").format(FileFormat::Toml))
            .add_source(File::with_name("conf/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("conf/local").required(false))
            .add_source(Environment::default().separator("__"));

        for (var, key) in FLAT_OVERRIDES {
            if let Some(value) = parameter::get(var) {
                builder = builder.set_override(key, value)?;
            }
        }

        builder.build()?.try_deserialize()
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "http://localhost:{}", &self.http_port)
    }
}
