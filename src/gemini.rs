use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{GeminiConfig, GenerationConfig};
use crate::history::{Role, Turn};

/// Used when a failed response carries no `error.message` of its own.
pub const GENERIC_API_ERROR: &str = "API error";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Anything that can turn a conversation history into the next model reply.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, history: &[Turn]) -> Result<String, ApiError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationParams,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: Role,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
}

impl From<&GenerationConfig> for GenerationParams {
    fn from(config: &GenerationConfig) -> Self {
        GenerationParams {
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn build_request<'a>(history: &'a [Turn], generation: &GenerationConfig) -> GenerateContentRequest<'a> {
    GenerateContentRequest {
        contents: history
            .iter()
            .map(|turn| Content {
                role: turn.role(),
                parts: vec![Part { text: turn.text() }],
            })
            .collect(),
        generation_config: generation.into(),
    }
}

/// Extract the reply text from a raw response, or classify the failure.
fn parse_reply(status: u16, body: &[u8]) -> Result<String, ApiError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_slice::<ErrorEnvelope>(body)
            .ok()
            .and_then(|envelope| envelope.error)
            .and_then(|error| error.message)
            .unwrap_or_else(|| GENERIC_API_ERROR.to_string());
        return Err(ApiError::Status { status, message });
    }

    let response: GenerateContentResponse = serde_json::from_slice(body)
        .map_err(|e| ApiError::Malformed(e.to_string()))?;

    response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text)
        .ok_or_else(|| ApiError::Malformed("missing candidates[0].content.parts[0].text".to_string()))
}

pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    generation: GenerationConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Build a client, reading the API key from the environment variable the
    /// config names. Without a key the client talks to `base_url` as-is,
    /// which is how a credential-injecting proxy is used.
    pub fn from_config(config: &GeminiConfig, generation: GenerationConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());

        if api_key.is_none() {
            warn!(
                "{} is not set; sending requests to {} without an API key",
                config.api_key_env, config.base_url
            );
        }

        Self::with_api_key(config, generation, api_key)
    }

    pub fn with_api_key(config: &GeminiConfig, generation: GenerationConfig, api_key: Option<String>) -> Self {
        GeminiClient {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            generation,
            client: reqwest::Client::new(),
        }
    }

    pub fn get_model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    /// The key travels as the `key` query parameter; without one the request
    /// goes to `base_url` untouched.
    fn request(&self, history: &[Turn]) -> reqwest::RequestBuilder {
        let body = build_request(history, &self.generation);
        let builder = self.client.post(self.endpoint()).json(&body);
        match &self.api_key {
            Some(key) => builder.query(&[("key", key.as_str())]),
            None => builder,
        }
    }
}

#[async_trait]
impl Completion for GeminiClient {
    async fn complete(&self, history: &[Turn]) -> Result<String, ApiError> {
        debug!(turns = history.len(), model = %self.model, "sending generateContent request");

        let response = self
            .request(history)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        debug!(status, bytes = body.len(), "received generateContent response");
        parse_reply(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let history = vec![Turn::user("hello"), Turn::model("hi"), Turn::user("write python")];
        let request = build_request(&history, &GenerationConfig::default());
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(
            value["contents"],
            json!([
                {"role": "user", "parts": [{"text": "hello"}]},
                {"role": "model", "parts": [{"text": "hi"}]},
                {"role": "user", "parts": [{"text": "write python"}]},
            ])
        );
        let generation = &value["generationConfig"];
        assert_eq!(generation["topK"], 40);
        assert_eq!(generation["maxOutputTokens"], 2048);
        assert!((generation["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert!((generation["topP"].as_f64().unwrap() - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_parse_success() {
        let body = json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Hello!"}]}}]
        });
        let reply = parse_reply(200, body.to_string().as_bytes()).unwrap();
        assert_eq!(reply, "Hello!");
    }

    #[test]
    fn test_parse_error_uses_server_message() {
        let body = json!({"error": {"code": 429, "message": "quota exceeded"}});
        let err = parse_reply(429, body.to_string().as_bytes()).unwrap_err();
        assert_eq!(
            err,
            ApiError::Status { status: 429, message: "quota exceeded".to_string() }
        );
    }

    #[test]
    fn test_parse_error_without_message_uses_generic() {
        let err = parse_reply(500, b"<html>oops</html>").unwrap_err();
        assert_eq!(
            err,
            ApiError::Status { status: 500, message: GENERIC_API_ERROR.to_string() }
        );
    }

    #[test]
    fn test_parse_missing_reply_path_is_malformed() {
        let body = json!({"candidates": [], "promptFeedback": {"blockReason": "SAFETY"}});
        let err = parse_reply(200, body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ApiError::Malformed(_)));

        let body = json!({"candidates": [{"finishReason": "SAFETY"}]});
        let err = parse_reply(200, body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ApiError::Malformed(_)));
    }

    #[test]
    fn test_parse_non_json_success_is_malformed() {
        let err = parse_reply(200, b"not json").unwrap_err();
        assert!(matches!(err, ApiError::Malformed(_)));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = GeminiConfig {
            base_url: "http://localhost:9000/v1beta/".to_string(),
            ..GeminiConfig::default()
        };
        let client = GeminiClient::with_api_key(&config, GenerationConfig::default(), None);
        assert_eq!(
            client.endpoint(),
            "http://localhost:9000/v1beta/models/gemini-2.0-flash-exp:generateContent"
        );
        assert_eq!(client.get_model(), "gemini-2.0-flash-exp");
    }

    fn request_body(request: &reqwest::Request) -> serde_json::Value {
        let bytes = request.body().and_then(|body| body.as_bytes()).unwrap();
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_request_carries_key_as_query_parameter() {
        let client = GeminiClient::with_api_key(
            &GeminiConfig::default(),
            GenerationConfig::default(),
            Some("secret-123".to_string()),
        );
        let history = vec![Turn::user("hello")];

        let request = client.request(&history).build().unwrap();

        assert_eq!(request.method(), &reqwest::Method::POST);
        assert_eq!(request.url().query(), Some("key=secret-123"));
        assert_eq!(
            request.url().path(),
            "/v1beta/models/gemini-2.0-flash-exp:generateContent"
        );
        let expected = serde_json::to_value(build_request(&history, &GenerationConfig::default())).unwrap();
        assert_eq!(request_body(&request), expected);
    }

    #[test]
    fn test_request_without_key_goes_to_base_url_as_is() {
        let config = GeminiConfig {
            base_url: "http://localhost:8080/proxy".to_string(),
            ..GeminiConfig::default()
        };
        let client = GeminiClient::with_api_key(&config, GenerationConfig::default(), None);
        let history = vec![Turn::user("hi"), Turn::model("hello"), Turn::user("again")];

        let request = client.request(&history).build().unwrap();

        assert_eq!(request.url().query(), None);
        assert_eq!(
            request.url().as_str(),
            "http://localhost:8080/proxy/models/gemini-2.0-flash-exp:generateContent"
        );
        let expected = serde_json::to_value(build_request(&history, &GenerationConfig::default())).unwrap();
        assert_eq!(request_body(&request), expected);
    }
}
