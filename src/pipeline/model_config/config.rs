use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::config::settings::{AntiSpoofing, Gesture, ModelEntry};
use crate::error::liveness_error::LivenessError;

/// Width of every anti-spoofing model output.
pub const NUM_CLASSES: usize = 3;
/// Output slot holding the "live" probability.
pub const REAL_INDEX: usize = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FaceAntiSpoofingClass {
    Spoof,
    Real,
}

pub fn match_face_anti_spoofing(q: usize) -> FaceAntiSpoofingClass {
    match q {
        REAL_INDEX => FaceAntiSpoofingClass::Real,
        _ => FaceAntiSpoofingClass::Spoof,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ArchitectureVariant {
    MiniFASNetV1,
    MiniFASNetV2,
    MiniFASNetV1SE,
    MiniFASNetV2SE,
}

impl FromStr for ArchitectureVariant {
    type Err = LivenessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MiniFASNetV1" => Ok(ArchitectureVariant::MiniFASNetV1),
            "MiniFASNetV2" => Ok(ArchitectureVariant::MiniFASNetV2),
            "MiniFASNetV1SE" => Ok(ArchitectureVariant::MiniFASNetV1SE),
            "MiniFASNetV2SE" => Ok(ArchitectureVariant::MiniFASNetV2SE),
            other => Err(LivenessError::ConfigurationError(format!("unknown architecture variant `{other}`"))),
        }
    }
}

/// One ensemble member. Built once at startup from a structured filename such
/// as `2.7_80x80_MiniFASNetV2.pth` or `org_1_80x60_MiniFASNetV1SE.pth`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelDescriptor {
    pub model_name: String,
    pub input_height: u32,
    pub input_width: u32,
    pub architecture_variant: ArchitectureVariant,
    pub crop_scale: Option<f32>,
}

impl ModelDescriptor {
    pub fn parse(model_name: &str, encoded: &str) -> Result<Self, LivenessError> {
        let malformed = |why: &str| LivenessError::ConfigurationError(format!("malformed model descriptor `{encoded}`: {why}"));

        let stem = encoded.strip_suffix(".pth").unwrap_or(encoded);
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() < 3 {
            return Err(malformed("expected <scale>_<H>x<W>_<variant>"));
        }

        let architecture_variant = parts[parts.len() - 1].parse::<ArchitectureVariant>()?;
        let info = &parts[..parts.len() - 1];

        let (h, w) = info[info.len() - 1]
            .split_once('x')
            .ok_or_else(|| malformed("missing <H>x<W> input size"))?;
        let input_height = h.parse::<u32>().map_err(|_| malformed("input height is not an integer"))?;
        let input_width = w.parse::<u32>().map_err(|_| malformed("input width is not an integer"))?;
        if input_height == 0 || input_width == 0 {
            return Err(malformed("input size must be positive"));
        }

        let crop_scale = match info[0] {
            "org" => None,
            scale => {
                let scale = scale.parse::<f32>().map_err(|_| malformed("crop scale is not a number"))?;
                if !(scale.is_finite() && scale > 0.0) {
                    return Err(malformed("crop scale must be positive"));
                }
                Some(scale)
            }
        };

        Ok(ModelDescriptor {
            model_name: model_name.to_string(),
            input_height,
            input_width,
            architecture_variant,
            crop_scale,
        })
    }
}

/// Parses every configured model; any malformed entry or an empty list is fatal.
pub fn load_model_descriptors(entries: &[ModelEntry]) -> Result<Vec<ModelDescriptor>, LivenessError> {
    if entries.is_empty() {
        return Err(LivenessError::ConfigurationError("no anti-spoofing models configured".to_string()));
    }
    entries
        .iter()
        .map(|entry| ModelDescriptor::parse(&entry.name, &entry.descriptor))
        .collect()
}

#[derive(Debug, Clone)]
pub struct FaceAntiSpoofingConfig {
    pub models: Vec<ModelDescriptor>,
    pub min_confidence: f32,
    pub min_bbox_area: u32,
    pub inference_timeout: Duration,
}

impl FaceAntiSpoofingConfig {
    pub fn from_settings(settings: &AntiSpoofing, inference_timeout: Duration) -> Result<Self, LivenessError> {
        if !(0.0..=1.0).contains(&settings.min_confidence) {
            return Err(LivenessError::ConfigurationError(format!(
                "min_confidence must lie in [0, 1], got {}",
                settings.min_confidence
            )));
        }
        Ok(FaceAntiSpoofingConfig {
            models: load_model_descriptors(&settings.models)?,
            min_confidence: settings.min_confidence,
            min_bbox_area: settings.min_bbox_area,
            inference_timeout,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GestureKind {
    Blink,
    Smile,
    TurnLeft,
    TurnRight,
    Wave,
    Nod,
}

impl GestureKind {
    pub const CATALOG: [GestureKind; 6] = [
        GestureKind::Blink,
        GestureKind::Smile,
        GestureKind::TurnLeft,
        GestureKind::TurnRight,
        GestureKind::Wave,
        GestureKind::Nod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GestureKind::Blink => "blink",
            GestureKind::Smile => "smile",
            GestureKind::TurnLeft => "turn_left",
            GestureKind::TurnRight => "turn_right",
            GestureKind::Wave => "wave",
            GestureKind::Nod => "nod",
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            GestureKind::Blink => "Blink your eyes",
            GestureKind::Smile => "Smile at the camera",
            GestureKind::TurnLeft => "Turn your head slightly to the left",
            GestureKind::TurnRight => "Turn your head slightly to the right",
            GestureKind::Wave => "Raise your hand and wave",
            GestureKind::Nod => "Nod your head",
        }
    }
}

impl fmt::Display for GestureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GestureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GestureKind::CATALOG
            .into_iter()
            .find(|g| g.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown gesture `{s}`"))
    }
}

/// Face-mesh (468 point) indices.
pub mod face_mesh {
    pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
    pub const RIGHT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];
    pub const MOUTH_LEFT: usize = 61;
    pub const MOUTH_RIGHT: usize = 291;
    pub const UPPER_LIP: usize = 0;
    pub const LOWER_LIP: usize = 17;
    pub const NOSE_TIP: usize = 1;
    pub const LEFT_EYE_OUTER: usize = 33;
    pub const RIGHT_EYE_OUTER: usize = 263;
    pub const NUM_POINTS: usize = 468;
}

/// Hand (21 point) indices.
pub mod hand {
    pub const WRIST: usize = 0;
    pub const MIDDLE_FINGER_TIP: usize = 12;
    pub const NUM_POINTS: usize = 21;
}

pub const GESTURE_HISTORY_CAPACITY: usize = 15;
pub const GESTURE_MIN_SAMPLES: usize = 5;

#[derive(Debug, Clone)]
pub struct GestureThresholds {
    pub ear_threshold: f32,
    pub smile_threshold: f32,
    pub turn_threshold: f32,
    pub wave_min_amplitude_px: f32,
    pub wave_min_amplitude_ratio: f32,
    pub wave_min_switches: usize,
    pub nod_threshold: f32,
    pub nod_min_switches: usize,
}

impl Default for GestureThresholds {
    fn default() -> Self {
        GestureThresholds {
            ear_threshold: 0.20,
            smile_threshold: 3.5,
            turn_threshold: 0.3,
            wave_min_amplitude_px: 30.0,
            wave_min_amplitude_ratio: 0.04,
            wave_min_switches: 2,
            nod_threshold: 0.12,
            nod_min_switches: 1,
        }
    }
}

impl From<&Gesture> for GestureThresholds {
    fn from(g: &Gesture) -> Self {
        GestureThresholds {
            ear_threshold: g.ear_threshold,
            smile_threshold: g.smile_threshold,
            turn_threshold: g.turn_threshold,
            wave_min_amplitude_px: g.wave_min_amplitude_px,
            wave_min_amplitude_ratio: g.wave_min_amplitude_ratio,
            wave_min_switches: g.wave_min_switches,
            nod_threshold: g.nod_threshold,
            nod_min_switches: g.nod_min_switches,
        }
    }
}
