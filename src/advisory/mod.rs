//! Bridge to a hosted vision-language model for freeform plant advice.

pub mod models;
pub mod transcript;

use std::{sync::Arc, time::Duration};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{header::CONTENT_TYPE, Client};
use tracing::{debug, info, warn};

use crate::{config::Config, error::AdvisoryError};

use self::models::{
    default_safety_settings, Content, GenerateRequest, GenerateResponse, GenerationConfig,
    InlineData, RequestPart,
};

/// Key value shipped in templates; treated as no key at all.
pub const PLACEHOLDER_API_KEY: &str = "YOUR_GEMINI_API_KEY_HERE";

pub const DEFAULT_PROMPT: &str = "You are an expert mycologist and mushroom growing specialist. \
Analyze this mushroom growing image and provide a detailed assessment including:\n\n\
1. **Growth Stage**: Identify the current stage of mushroom development\n\
2. **Health Assessment**: Evaluate the overall health and condition\n\
3. **Environmental Analysis**: Assess moisture, lighting, and growing conditions\n\
4. **Contamination Check**: Look for any signs of mold, bacteria, or other issues\n\
5. **Specific Recommendations**: Provide actionable advice for care and improvement\n\
6. **Harvest Timing**: Advise when to harvest if applicable\n\
7. **Problem Identification**: Identify any visible problems or concerns\n\n\
Please format your response with clear sections using markdown-style headers and bullet points. \
Be specific, practical, and focus on actionable insights. \
If you cannot clearly see mushrooms in the image, please indicate that and ask for a clearer photo.";

const DEMO_ANALYSIS: &str = "Vision API key not configured. Set GEMINI_API_KEY to enable real analysis.\n\n\
Sample analysis:\n\n\
**Growth Stage:** Mature fruiting bodies visible\n\
**Health Status:** Appears healthy with good coloration\n\
**Environmental Conditions:** Suitable moisture levels detected\n\
**Recommendations:**\n\
- Maintain current humidity levels (60-80%)\n\
- Ensure adequate ventilation\n\
- Monitor for any signs of contamination\n\
- Harvest when caps begin to flatten\n\n\
**Note:** This is a demo response.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub text: String,
    /// True when no credential is configured and `text` is canned.
    pub is_placeholder: bool,
}

#[derive(Debug, Clone)]
pub struct AdvisoryClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    generation: GenerationConfig,
}

impl AdvisoryClient {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AdvisoryError> {
        let http = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| AdvisoryError::ServiceUnavailable(e.to_string()))?;

        let api_key = api_key.filter(|k| !k.trim().is_empty() && k.as_str() != PLACEHOLDER_API_KEY);
        if api_key.is_none() {
            warn!("No vision API key configured; image analysis returns a demo answer");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                endpoint: endpoint.to_owned(),
                api_key,
                generation: GenerationConfig::default(),
            }),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AdvisoryError> {
        Self::new(
            &config.gemini_endpoint,
            config.gemini_api_key.clone(),
            config.advisory_timeout,
        )
    }

    pub fn is_configured(&self) -> bool {
        self.inner.api_key.is_some()
    }

    /// Send `image` with `prompt` and return the model's answer.
    pub async fn analyze(&self, image: &[u8], prompt: &str) -> Result<Analysis, AdvisoryError> {
        let Some(api_key) = &self.inner.api_key else {
            return Ok(Analysis { text: DEMO_ANALYSIS.to_owned(), is_placeholder: true });
        };

        let mime_type = detect_mime(image);
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    RequestPart::Text { text: prompt.to_owned() },
                    RequestPart::Image {
                        inline_data: InlineData { mime_type, data: BASE64.encode(image) },
                    },
                ],
            }],
            generation_config: self.inner.generation,
            safety_settings: default_safety_settings(),
        };

        info!(bytes = image.len(), mime_type, "Requesting image analysis");
        let url = format!("{}?key={}", self.inner.endpoint, api_key);

        let resp = self
            .inner
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| AdvisoryError::ServiceUnavailable(e.without_url().to_string()))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| AdvisoryError::ServiceUnavailable(e.without_url().to_string()))?;

        if !status.is_success() {
            warn!(status = %status, body = %String::from_utf8_lossy(&body), "Vision endpoint returned error status");
            return Err(AdvisoryError::ServiceUnavailable(format!("HTTP {status}")));
        }

        let text = extract_text(&body)?;
        debug!(chars = text.len(), "Image analysis received");
        Ok(Analysis { text, is_placeholder: false })
    }
}

/// First candidate's first text part.
pub fn extract_text(body: &[u8]) -> Result<String, AdvisoryError> {
    let resp: GenerateResponse =
        serde_json::from_slice(body).map_err(|e| AdvisoryError::ParseError(e.to_string()))?;

    let candidate = resp.candidates.into_iter().next().ok_or(AdvisoryError::EmptyResponse)?;
    let part = candidate.content.parts.into_iter().next().ok_or(AdvisoryError::EmptyResponse)?;

    match part.text {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(AdvisoryError::EmptyResponse),
    }
}

/// MIME type from the image's magic bytes; JPEG when unrecognised.
pub fn detect_mime(image: &[u8]) -> &'static str {
    match image {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_from_magic_bytes() {
        assert_eq!(detect_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(detect_mime(b"\x89PNG\r\n\x1a\n...."), "image/png");
        assert_eq!(detect_mime(b"RIFF\x00\x00\x00\x00WEBPVP8 "), "image/webp");
        assert_eq!(detect_mime(b""), "image/jpeg");
    }

    #[test]
    fn extracts_first_text_part() {
        let body = br#"{"candidates":[{"content":{"parts":[{"text":"Looks healthy."},{"text":"ignored"}]}}]}"#;
        assert_eq!(extract_text(body).unwrap(), "Looks healthy.");
    }

    #[test]
    fn empty_candidates_is_empty_response() {
        assert_eq!(extract_text(br#"{"candidates":[]}"#), Err(AdvisoryError::EmptyResponse));
        assert_eq!(
            extract_text(br#"{"promptFeedback":{"blockReason":"SAFETY"}}"#),
            Err(AdvisoryError::EmptyResponse)
        );
    }

    #[test]
    fn empty_parts_or_blank_text_is_empty_response() {
        let no_parts = br#"{"candidates":[{"content":{"parts":[]}}]}"#;
        let blank = br#"{"candidates":[{"content":{"parts":[{"text":"  "}]}}]}"#;
        assert_eq!(extract_text(no_parts), Err(AdvisoryError::EmptyResponse));
        assert_eq!(extract_text(blank), Err(AdvisoryError::EmptyResponse));
    }

    #[test]
    fn wrong_shape_is_parse_error() {
        assert!(matches!(extract_text(b"<html>"), Err(AdvisoryError::ParseError(_))));
        assert!(matches!(
            extract_text(br#"{"candidates":[{"nope":1}]}"#),
            Err(AdvisoryError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn placeholder_key_returns_demo_without_network() {
        // Unroutable endpoint: any request would fail.
        let client = AdvisoryClient::new(
            "http://127.0.0.1:9/never",
            Some(PLACEHOLDER_API_KEY.to_owned()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(!client.is_configured());

        let analysis = client.analyze(&[0xFF, 0xD8], DEFAULT_PROMPT).await.unwrap();
        assert!(analysis.is_placeholder);
        assert!(analysis.text.contains("demo"));
    }
}
