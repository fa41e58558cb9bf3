//! Gemini API backend.

use serde_json::{Value, json};
use storage::{Content, Part};
use tracing::debug;

use super::{ModelBackend, ModelError, ModelRequest, ModelResponse};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Builder for creating a Gemini backend.
#[derive(Debug, Clone)]
pub struct GeminiBackendBuilder {
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl GeminiBackendBuilder {
    /// Create a new builder with an API key and model name.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Set the maximum output tokens for responses.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Build the backend.
    pub fn build(self) -> GeminiBackend {
        GeminiBackend {
            http: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            max_tokens: self.max_tokens,
        }
    }
}

/// Gemini API backend.
pub struct GeminiBackend {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl GeminiBackend {
    /// Create a builder for the Gemini backend.
    pub fn builder(
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> GeminiBackendBuilder {
        GeminiBackendBuilder::new(api_key, model)
    }

    fn api_url(&self) -> String {
        format!("{GEMINI_API_BASE}/{}:generateContent", self.model)
    }

    fn build_request_body(&self, request: &ModelRequest<'_>) -> Value {
        let contents: Vec<Value> = request.history.iter().map(content_to_json).collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": self.max_tokens,
            }
        });

        if let Some(system) = request.system {
            body["systemInstruction"] = json!({
                "parts": [{ "text": system }]
            });
        }

        if !request.declarations.is_empty() {
            body["tools"] = json!([{ "functionDeclarations": request.declarations }]);
            body["toolConfig"] = json!({
                "functionCallingConfig": { "mode": "AUTO" }
            });
        }

        body
    }

    fn parse_response(&self, json: Value) -> Result<ModelResponse, ModelError> {
        if let Some(usage) = json.get("usageMetadata") {
            debug!(
                input_tokens = usage["promptTokenCount"].as_u64().unwrap_or(0),
                output_tokens = usage["candidatesTokenCount"].as_u64().unwrap_or(0),
                "model usage"
            );
        }

        // No candidates or an empty part list is not a protocol violation:
        // the engine nudges the model to continue.
        let Some(first) = json["candidates"].as_array().and_then(|c| c.first()) else {
            return Ok(ModelResponse::default());
        };

        let raw_parts = first["content"]["parts"].as_array().cloned().unwrap_or_default();

        let mut parts = Vec::new();
        for raw in &raw_parts {
            if let Some(text) = raw["text"].as_str() {
                parts.push(Part::text(text));
            }
            if let Some(call) = raw.get("functionCall") {
                let name = call["name"]
                    .as_str()
                    .ok_or_else(|| {
                        ModelError::InvalidResponse("function call without a name".to_string())
                    })?
                    .to_string();
                let args = call
                    .get("args")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                parts.push(Part::FunctionCall(storage::FunctionCall { name, args }));
            }
        }

        Ok(ModelResponse { parts })
    }
}

fn content_to_json(content: &Content) -> Value {
    let parts: Vec<Value> = content
        .parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => json!({ "text": text }),
            Part::FunctionCall(call) => json!({
                "functionCall": { "name": call.name, "args": call.args }
            }),
            Part::FunctionResponse(response) => json!({
                "functionResponse": {
                    "name": response.name,
                    "response": response.response,
                }
            }),
        })
        .collect();

    json!({ "role": content.role.as_str(), "parts": parts })
}

impl ModelBackend for GeminiBackend {
    async fn generate(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let body = self.build_request_body(&request);

        debug!(model = %self.model, turns = request.history.len(), "model request");

        let response = self
            .http
            .post(self.api_url())
            .header("content-type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{status}: {text}")));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        self.parse_response(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use storage::{FunctionResponse, Role};
    use toolserver::{FunctionDeclaration, Schema};

    fn backend() -> GeminiBackend {
        GeminiBackend::builder("test-key", "gemini-2.0-flash-lite").build()
    }

    #[test]
    fn request_body_maps_roles_and_parts() {
        let mut response = Map::new();
        response.insert("is_error".to_string(), json!(false));

        let history = vec![
            Content::user_text("hello"),
            Content::new(
                Role::Model,
                vec![Part::FunctionCall(storage::FunctionCall {
                    name: "git_status".to_string(),
                    args: Map::new(),
                })],
            ),
            Content::new(
                Role::User,
                vec![Part::FunctionResponse(FunctionResponse {
                    name: "git_status".to_string(),
                    response,
                })],
            ),
        ];
        let declarations = vec![FunctionDeclaration {
            name: "git_status".to_string(),
            description: "Run git status".to_string(),
            parameters: Schema::object([], []),
        }];

        let body = backend().build_request_body(&ModelRequest {
            history: &history,
            system: Some("You are an AI assistant."),
            declarations: &declarations,
        });

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(
            body["contents"][1]["parts"][0]["functionCall"]["name"],
            "git_status"
        );
        assert_eq!(
            body["contents"][2]["parts"][0]["functionResponse"]["response"]["is_error"],
            json!(false)
        );
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "You are an AI assistant."
        );
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            "git_status"
        );
    }

    #[test]
    fn tools_omitted_when_no_declarations() {
        let history = vec![Content::user_text("hi")];
        let body = backend().build_request_body(&ModelRequest {
            history: &history,
            system: None,
            declarations: &[],
        });
        assert!(body.get("tools").is_none());
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn parses_text_and_function_calls_in_order() {
        let response = backend()
            .parse_response(json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [
                            {"text": "Running it."},
                            {"functionCall": {"name": "git_status", "args": {"path_to_status": "."}}}
                        ]
                    }
                }],
                "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5}
            }))
            .unwrap();

        assert_eq!(response.parts.len(), 2);
        assert_eq!(response.parts[0].as_text(), Some("Running it."));
        let calls = response.function_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "git_status");
        assert_eq!(calls[0].args["path_to_status"], json!("."));
    }

    #[test]
    fn empty_candidates_parse_to_empty_response() {
        let response = backend().parse_response(json!({"candidates": []})).unwrap();
        assert!(response.parts.is_empty());

        let response = backend().parse_response(json!({})).unwrap();
        assert!(response.parts.is_empty());
    }

    #[test]
    fn function_call_without_name_is_invalid() {
        let result = backend().parse_response(json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {"args": {}}}]}
            }]
        }));
        assert!(matches!(result, Err(ModelError::InvalidResponse(_))));
    }
}
