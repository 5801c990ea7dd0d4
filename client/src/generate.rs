//! Request and response bodies for the generative-image endpoint.
//!
//! The HTTP call itself belongs to the host: the browser build sends it with
//! `fetch`, native hosts bring their own client and hand the status and body
//! to [`parse_generate_response`].

use serde::{Deserialize, Serialize};

use crate::assets::data_uri;
use crate::error::SessionError;

const GENERIC_FAILURE: &str = "image generation failed";
const DEFAULT_MIME: &str = "image/png";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GenerateConfig {
    pub endpoint: String,
    pub api_key: String,
}

impl GenerateConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if !(self.endpoint.starts_with("https://") || self.endpoint.starts_with("http://")) {
            return Err(SessionError::Configuration(format!(
                "generate endpoint must be an http(s) url, got {:?}",
                self.endpoint
            )));
        }
        if self.api_key.trim().is_empty() {
            return Err(SessionError::Configuration(
                "generate api key is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{separator}key={}", self.endpoint, self.api_key.trim())
    }
}

#[derive(Serialize, Debug, PartialEq)]
pub struct GenerateRequest {
    instances: Instances,
    parameters: Parameters,
}

#[derive(Serialize, Debug, PartialEq)]
struct Instances {
    prompt: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct Parameters {
    #[serde(rename = "sampleCount")]
    sample_count: u32,
}

impl GenerateRequest {
    pub fn new(prompt: &str) -> Result<Self, SessionError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SessionError::ExternalService("prompt is empty".to_string()));
        }
        Ok(Self {
            instances: Instances {
                prompt: prompt.to_string(),
            },
            parameters: Parameters { sample_count: 1 },
        })
    }

    pub fn to_json(&self) -> Result<String, SessionError> {
        serde_json::to_string(self)
            .map_err(|error| SessionError::ExternalService(error.to_string()))
    }
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
    error: Option<UpstreamError>,
}

#[derive(Deserialize)]
struct Prediction {
    #[serde(rename = "bytesBase64Encoded")]
    bytes_base64_encoded: Option<String>,
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
}

#[derive(Deserialize)]
struct UpstreamError {
    message: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedImage {
    pub base64: String,
    pub mime: String,
}

impl GeneratedImage {
    pub fn data_uri(&self) -> String {
        data_uri(&self.mime, &self.base64)
    }
}

/// Reads the first prediction's image. Non-2xx statuses and bodies without
/// image bytes fail with the upstream error message when there is one.
pub fn parse_generate_response(status: u16, body: &str) -> Result<GeneratedImage, SessionError> {
    let parsed: Option<GenerateResponse> = serde_json::from_str(body).ok();
    let upstream_message = || {
        parsed
            .as_ref()
            .and_then(|response| response.error.as_ref())
            .and_then(|error| error.message.clone())
            .filter(|message| !message.trim().is_empty())
    };
    if !(200..300).contains(&status) {
        let message =
            upstream_message().unwrap_or_else(|| format!("{GENERIC_FAILURE} (HTTP {status})"));
        return Err(SessionError::ExternalService(message));
    }
    let prediction = parsed
        .as_ref()
        .and_then(|response| response.predictions.first());
    match prediction {
        Some(Prediction {
            bytes_base64_encoded: Some(base64),
            mime_type,
        }) if !base64.is_empty() => Ok(GeneratedImage {
            base64: base64.clone(),
            mime: mime_type.clone().unwrap_or_else(|| DEFAULT_MIME.to_string()),
        }),
        _ => Err(SessionError::ExternalService(
            upstream_message().unwrap_or_else(|| GENERIC_FAILURE.to_string()),
        )),
    }
}
