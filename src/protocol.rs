//! WebSocket control protocol
//!
//! Server → client: one `meta` text message after connecting, then one binary
//! message per broadcast tick holding a complete JPEG.
//!
//! Client → server: `{"type":"config", ...}` text messages. Each recognised
//! field is validated and applied on its own, so one bad field never blocks
//! the others. Unknown fields and unknown message types are ignored.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::capture::SharedCaptureConfig;
use crate::processing::Processing;

/// Messages sent by the server as text frames
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Meta { width: u32, height: u32, fps: u32 },
}

impl ServerMessage {
    /// Metadata describing the current stream parameters
    pub fn meta(config: &SharedCaptureConfig) -> Self {
        let snapshot = config.snapshot();
        ServerMessage::Meta {
            width: snapshot.width,
            height: snapshot.height,
            fps: snapshot.fps,
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing a plain enum of integers cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Why a client text message was dropped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Malformed(String),

    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Message has no type")]
    MissingType,
}

/// Parsed client message
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Config(ConfigRequest),
    /// Any other message type, ignored by the server
    Other(String),
}

/// A configuration request. Fields that failed validation are listed in
/// `rejected` and left as `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigRequest {
    pub resolution: Option<(i64, i64)>,
    pub fps: Option<i64>,
    pub jpeg_quality: Option<i64>,
    pub processing: Option<Processing>,
    pub rejected: Vec<&'static str>,
}

/// Effective values after clamping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedConfig {
    pub resolution: Option<(u32, u32)>,
    pub fps: Option<u32>,
    pub jpeg_quality: Option<u8>,
    pub processing: Option<Processing>,
}

impl AppliedConfig {
    pub fn is_empty(&self) -> bool {
        self.resolution.is_none()
            && self.fps.is_none()
            && self.jpeg_quality.is_none()
            && self.processing.is_none()
    }
}

/// Parse a client text message
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;

    match kind {
        "config" => Ok(ClientMessage::Config(ConfigRequest::from_object(object))),
        other => Ok(ClientMessage::Other(other.to_string())),
    }
}

/// Read a JSON integer, saturating values outside the `i64` range so they
/// clamp instead of being rejected. Fractional numbers are not integers.
fn integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    if value.as_u64().is_some() {
        return Some(i64::MAX);
    }
    // Integers beyond u64 parse as f64
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() >= i64::MAX as f64 => Some(f as i64),
        _ => None,
    }
}

impl ConfigRequest {
    fn from_object(object: &Map<String, Value>) -> Self {
        let mut request = ConfigRequest::default();

        if let Some(value) = object.get("resolution") {
            match value.as_array().map(Vec::as_slice) {
                Some([w, h]) => match (integer(w), integer(h)) {
                    (Some(w), Some(h)) => request.resolution = Some((w, h)),
                    _ => request.rejected.push("resolution"),
                },
                _ => request.rejected.push("resolution"),
            }
        }

        if let Some(value) = object.get("fps") {
            match integer(value) {
                Some(fps) => request.fps = Some(fps),
                None => request.rejected.push("fps"),
            }
        }

        if let Some(value) = object.get("jpeg_quality") {
            match integer(value) {
                Some(quality) => request.jpeg_quality = Some(quality),
                None => request.rejected.push("jpeg_quality"),
            }
        }

        if let Some(value) = object.get("processing") {
            match serde_json::from_value::<Processing>(value.clone()) {
                Ok(processing) => request.processing = Some(processing),
                Err(_) => request.rejected.push("processing"),
            }
        }

        request
    }

    /// Apply every valid field to the shared capture configuration
    pub fn apply(&self, config: &SharedCaptureConfig) -> AppliedConfig {
        AppliedConfig {
            resolution: self.resolution.map(|(w, h)| config.set_resolution(w, h)),
            fps: self.fps.map(|fps| config.set_fps(fps)),
            jpeg_quality: self.jpeg_quality.map(|q| config.set_quality(q)),
            processing: self.processing.clone().map(|p| {
                config.set_processing(p.clone());
                p
            }),
        }
    }
}
