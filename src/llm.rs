use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Ai,
}

/// A role-tagged chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self { role: Role::Human, content: content.into() }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self { role: Role::Ai, content: content.into() }
    }
}

/// Chat completion backend
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send an ordered list of messages and return the model's text reply.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}

/// Gemini `generateContent` client
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, model_path(&self.model))
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = build_request_body(messages);
        debug!(model = %self.model, messages = messages.len(), "Sending generateContent request");

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AssistantError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        extract_response_text(&response_json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Gemini model ids are addressed as `models/<name>`.
pub(crate) fn model_path(model: &str) -> String {
    if model.starts_with("models/") || model.starts_with("tunedModels/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

/// System messages become the `systemInstruction`; the rest become `contents`.
fn build_request_body(messages: &[ChatMessage]) -> serde_json::Value {
    let system_text: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let contents: Vec<serde_json::Value> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = match m.role {
                Role::Ai => "model",
                _ => "user",
            };
            serde_json::json!({
                "role": role,
                "parts": [{ "text": m.content }],
            })
        })
        .collect();

    let mut body = serde_json::json!({ "contents": contents });
    if !system_text.is_empty() {
        body["systemInstruction"] = serde_json::json!({
            "parts": [{ "text": system_text.join("\n\n") }],
        });
    }
    body
}

fn extract_response_text(response_json: &serde_json::Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(AssistantError::Llm(format!("LLM API error: {}", message)));
    }

    if let Some(reason) = response_json
        .get("promptFeedback")
        .and_then(|f| f.get("blockReason"))
        .and_then(|r| r.as_str())
    {
        return Err(AssistantError::Llm(format!("Prompt was blocked: {}", reason)));
    }

    let candidate = response_json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| AssistantError::Llm(format!("No candidates in LLM response: {}", response_json)))?;

    match candidate.get("finishReason").and_then(|r| r.as_str()) {
        Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT") => {
            return Err(AssistantError::Llm(format!(
                "LLM response was filtered ({})",
                candidate["finishReason"]
            )));
        }
        Some("MAX_TOKENS") => warn!("LLM response was truncated due to length limit"),
        _ => {}
    }

    let text: String = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| parts.iter().filter_map(|p| p.get("text").and_then(|t| t.as_str())).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AssistantError::Llm("Empty content in LLM response".to_string()));
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_path() {
        assert_eq!(model_path("gemini-1.5-pro"), "models/gemini-1.5-pro");
        assert_eq!(model_path("models/embedding-001"), "models/embedding-001");
    }

    #[test]
    fn test_request_body_splits_system_instruction() {
        let body = build_request_body(&[
            ChatMessage::system("rules"),
            ChatMessage::human("List all customers"),
            ChatMessage::ai("SELECT 1"),
        ]);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "rules");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], "List all customers");
        assert_eq!(contents[1]["role"], "model");
    }

    #[test]
    fn test_request_body_without_system() {
        let body = build_request_body(&[ChatMessage::human("hi")]);
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "SELECT * " }, { "text": "FROM customers" }] },
                "finishReason": "STOP"
            }]
        });
        assert_eq!(extract_response_text(&response).unwrap(), "SELECT * FROM customers");
    }

    #[test]
    fn test_extract_text_errors() {
        let api_error = json!({ "error": { "code": 400, "message": "API key not valid" } });
        let err = extract_response_text(&api_error).unwrap_err();
        assert!(err.to_string().contains("API key not valid"));

        let blocked = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(extract_response_text(&blocked).is_err());

        let filtered = json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        assert!(extract_response_text(&filtered).is_err());

        let empty = json!({ "candidates": [{ "content": { "parts": [{ "text": "  " }] } }] });
        assert!(matches!(extract_response_text(&empty), Err(AssistantError::Llm(_))));

        assert!(extract_response_text(&json!({ "candidates": [] })).is_err());
    }
}
