//! Moondream-compatible HTTP vision service.
//!
//! - `POST {endpoint}/query` `{image_url, question}` -> `{answer}`
//! - `POST {endpoint}/detect` `{image_url, object}` -> `{objects: [{x_min, ...}]}`
//!
//! Frames are JPEG-encoded in memory and sent as base64 data URLs. The key
//! travels in the `X-Moondream-Auth` header.

use base64::Engine;
use image::RgbImage;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::{InferenceError, LocalizedRegion, VisionService};
use crate::frame::encode_jpeg;

pub const DEFAULT_ENDPOINT: &str = "https://api.moondream.ai/v1";

#[derive(Clone, Debug)]
pub struct MoondreamSettings {
    pub endpoint: String,
    pub api_key: String,
    /// Transport-level timeout. The adapter applies its own bound on top.
    pub timeout: Duration,
    pub jpeg_quality: u8,
}

impl Default for MoondreamSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            jpeg_quality: 85,
        }
    }
}

pub struct MoondreamService {
    agent: ureq::Agent,
    settings: MoondreamSettings,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    answer: String,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    objects: Vec<DetectedObject>,
}

#[derive(Debug, Deserialize)]
struct DetectedObject {
    x_min: f32,
    y_min: f32,
    x_max: f32,
    y_max: f32,
    #[serde(default)]
    confidence: Option<f32>,
}

impl MoondreamService {
    pub fn new(settings: MoondreamSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(settings.timeout)
            .timeout(settings.timeout)
            .build();
        Self { agent, settings }
    }

    fn image_url(&self, image: &RgbImage) -> Result<String, InferenceError> {
        let jpeg = encode_jpeg(image, self.settings.jpeg_quality)
            .map_err(|e| InferenceError::Unavailable(format!("encode frame: {}", e)))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(jpeg);
        Ok(format!("data:image/jpeg;base64,{}", encoded))
    }

    fn post<R: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<R, InferenceError> {
        let url = format!("{}/{}", self.settings.endpoint.trim_end_matches('/'), path);
        let response = self
            .agent
            .post(&url)
            .set("X-Moondream-Auth", &self.settings.api_key)
            .send_json(body)
            .map_err(map_ureq_error)?;
        response
            .into_json::<R>()
            .map_err(|e| InferenceError::Unavailable(format!("decode {} response: {}", path, e)))
    }
}

impl VisionService for MoondreamService {
    fn name(&self) -> &'static str {
        "moondream"
    }

    fn describe(&self, image: &RgbImage, prompt: &str) -> Result<String, InferenceError> {
        let body = serde_json::json!({
            "image_url": self.image_url(image)?,
            "question": prompt,
            "stream": false,
        });
        let response: QueryResponse = self.post("query", body)?;
        Ok(response.answer)
    }

    fn localize(
        &self,
        image: &RgbImage,
        label: &str,
    ) -> Result<Vec<LocalizedRegion>, InferenceError> {
        let body = serde_json::json!({
            "image_url": self.image_url(image)?,
            "object": label,
        });
        let response: DetectResponse = self.post("detect", body)?;
        log::debug!(
            "moondream detect '{}': {} object(s)",
            label,
            response.objects.len()
        );
        Ok(regions_from_objects(label, response.objects))
    }
}

fn regions_from_objects(label: &str, objects: Vec<DetectedObject>) -> Vec<LocalizedRegion> {
    objects
        .into_iter()
        .filter_map(|obj| {
            let mut region =
                LocalizedRegion::new(label, obj.x_min, obj.y_min, obj.x_max, obj.y_max);
            region.confidence = obj.confidence;
            let normalized = region.normalized();
            if normalized.is_none() {
                log::warn!(
                    "moondream returned a non-finite box for '{}', ignoring",
                    label
                );
            }
            normalized
        })
        .collect()
}

fn map_ureq_error(err: ureq::Error) -> InferenceError {
    match err {
        ureq::Error::Status(code, response) => {
            InferenceError::Unavailable(format!("http {} {}", code, response.status_text()))
        }
        ureq::Error::Transport(transport) => {
            if is_timeout(&transport) {
                InferenceError::Timeout
            } else {
                InferenceError::Unavailable(transport.to_string())
            }
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    use std::error::Error;
    transport
        .source()
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .map(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_detect_payload() {
        let payload = r#"{"request_id":"r1","objects":[
            {"x_min":0.1,"y_min":0.2,"x_max":0.4,"y_max":0.6},
            {"x_min":0.9,"y_min":0.1,"x_max":0.7,"y_max":0.3,"confidence":0.4}
        ]}"#;
        let response: DetectResponse = serde_json::from_str(payload).unwrap();
        let regions = regions_from_objects("person", response.objects);
        assert_eq!(regions.len(), 2);
        assert_eq!(
            regions[0],
            LocalizedRegion::new("person", 0.1, 0.2, 0.4, 0.6)
        );
        assert_eq!(regions[1].x_min, 0.7);
        assert_eq!(regions[1].confidence, Some(0.4));
    }

    #[test]
    fn missing_objects_is_empty_success() {
        let response: DetectResponse = serde_json::from_str(r#"{"request_id":"r2"}"#).unwrap();
        assert!(regions_from_objects("person", response.objects).is_empty());
    }

    #[test]
    fn parses_query_payload() {
        let response: QueryResponse =
            serde_json::from_str(r#"{"answer":"a man at the door","request_id":"r3"}"#).unwrap();
        assert_eq!(response.answer, "a man at the door");
    }

    #[test]
    fn unreachable_endpoint_is_unavailable() {
        let service = MoondreamService::new(MoondreamSettings {
            endpoint: "http://127.0.0.1:9".to_string(),
            api_key: "test".to_string(),
            timeout: Duration::from_secs(2),
            jpeg_quality: 80,
        });
        let image = RgbImage::new(8, 8);
        let err = service.describe(&image, "describe").unwrap_err();
        assert!(matches!(err, InferenceError::Unavailable(_)));
    }
}
