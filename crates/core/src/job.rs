//! Serverless job envelopes.
//!
//! A job arrives as `{"id": "...", "input": {...}}`. The `input` object is
//! parsed into [`JobInput`]; the handler answers with a [`JobOutput`].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::media::MediaSource;

/// Relative motion modes accepted by the `LivePortraitProcess` node.
pub const MOTION_MODES: &[&str] = &[
    "relative",
    "source_video_smoothed",
    "relative_rotation_only",
    "single_frame",
    "off",
];

/// Default relative motion mode.
pub const DEFAULT_MOTION_MODE: &str = "relative";

/// Incoming job envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    /// Platform job id. Generated locally when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Raw `input` object; parsed later so that schema errors become job errors.
    #[serde(default)]
    pub input: serde_json::Value,
}

/// The `input` object of a job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobInput {
    #[serde(default)]
    pub source_image: Option<String>,
    #[serde(default)]
    pub source_image_url: Option<String>,
    #[serde(default)]
    pub driving_video: Option<String>,
    #[serde(default)]
    pub driving_video_url: Option<String>,
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default = "default_true")]
    pub flag_relative: bool,
    #[serde(default = "default_true")]
    pub flag_do_crop: bool,
    #[serde(default = "default_true")]
    pub flag_pasteback: bool,
    #[serde(default = "default_true")]
    pub driving_smooth: bool,
    #[serde(default = "default_multiplier")]
    pub driving_multiplier: f64,
    #[serde(default)]
    pub relative_motion_mode: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_multiplier() -> f64 {
    1.0
}

/// First non-empty value of a field and its `_url` alias.
fn pick<'a>(primary: &'a Option<String>, alias: &'a Option<String>) -> Option<&'a str> {
    primary
        .as_deref()
        .filter(|s| !s.is_empty())
        .or_else(|| alias.as_deref().filter(|s| !s.is_empty()))
}

impl JobInput {
    /// Parse a raw `input` value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, CoreError> {
        let value = if value.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            value
        };
        serde_json::from_value(value)
            .map_err(|e| CoreError::Validation(format!("malformed job input: {e}")))
    }

    pub fn source_image(&self) -> Option<MediaSource> {
        pick(&self.source_image, &self.source_image_url).map(MediaSource::parse)
    }

    pub fn driving_video(&self) -> Option<MediaSource> {
        pick(&self.driving_video, &self.driving_video_url).map(MediaSource::parse)
    }

    pub fn audio(&self) -> Option<MediaSource> {
        pick(&self.audio, &self.audio_url).map(MediaSource::parse)
    }

    /// Effective relative motion mode.
    ///
    /// An explicit `relative_motion_mode` wins; otherwise `flag_relative =
    /// false` turns relative motion off.
    pub fn motion_mode(&self) -> &str {
        match self.relative_motion_mode.as_deref() {
            Some(mode) => mode,
            None if !self.flag_relative => "off",
            None => DEFAULT_MOTION_MODE,
        }
    }

    /// Check required inputs and parameter ranges.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.source_image().is_none() {
            return Err(CoreError::Validation(
                "source_image or source_image_url is required".to_string(),
            ));
        }
        if self.driving_video().is_none() {
            return Err(CoreError::Validation(
                "driving_video or driving_video_url is required".to_string(),
            ));
        }
        if !self.driving_multiplier.is_finite() || self.driving_multiplier <= 0.0 {
            return Err(CoreError::Validation(format!(
                "driving_multiplier must be a positive number, got {}",
                self.driving_multiplier
            )));
        }
        let mode = self.motion_mode();
        if !MOTION_MODES.contains(&mode) {
            return Err(CoreError::Validation(format!(
                "relative_motion_mode '{mode}' is not one of {}",
                MOTION_MODES.join(", ")
            )));
        }
        Ok(())
    }
}

/// Handler result, serialized as either `{"video_base64": ...}` or `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutput {
    VideoBase64(String),
    Error(String),
}

impl JobOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}
