use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request: POST {endpoint}?key={api_key}
//
// {
//   "contents": [{ "parts": [ { "text": "..." },
//                             { "inline_data": { "mime_type": "image/jpeg", "data": "<base64>" } } ] }],
//   "generationConfig": { "temperature": 0.7, "topK": 40, "topP": 0.95, "maxOutputTokens": 1024 },
//   "safetySettings": [ { "category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE" }, ... ]
// }
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
    pub safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RequestPart {
    Text { text: String },
    Image { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
pub struct InlineData {
    pub mime_type: &'static str,
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 1024,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SafetySetting {
    pub category: &'static str,
    pub threshold: &'static str,
}

pub const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

pub fn default_safety_settings() -> Vec<SafetySetting> {
    SAFETY_CATEGORIES
        .into_iter()
        .map(|category| SafetySetting { category, threshold: "BLOCK_MEDIUM_AND_ABOVE" })
        .collect()
}

// ---------------------------------------------------------------------------
// Response
//
//   { "candidates": [ { "content": { "parts": [ { "text": "..." } ] } } ] }
//
// `candidates` is omitted entirely when the prompt is blocked.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: CandidateContent,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
pub struct ResponsePart {
    pub text: Option<String>,
}
