//! Per-provider request shapes: endpoint, headers, body, and the
//! extractor that pulls a text delta out of one SSE frame.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use serde_json::{Value, json};

use super::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "google" | "gemini" => Ok(Self::Google),
            other => Err(anyhow!("unknown provider '{other}' (openai, anthropic, google)")),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub provider: Provider,
    pub model_id: String,
    pub api_key: String,
}

/// One turn of conversation context sent with a request.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: ChatRole::User, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, text: text.into() }
    }
}

/// A fully prepared streaming request, provider differences already baked
/// in. The transport only needs to POST it and hand frames to `extract`.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub extract: fn(&Value) -> Option<String>,
}

const TEMPERATURE: f64 = 0.3;
const MAX_OUTPUT_TOKENS: u32 = 16384;

/// Build the streaming completion request for the configured provider.
pub fn build_request(
    settings: &ProviderSettings,
    system: &str,
    messages: &[ChatMessage],
) -> ProviderRequest {
    match settings.provider {
        Provider::OpenAi => {
            let mut wire = vec![json!({"role": "system", "content": system})];
            wire.extend(messages.iter().map(|m| {
                json!({
                    "role": match m.role { ChatRole::User => "user", ChatRole::Assistant => "assistant" },
                    "content": m.text,
                })
            }));
            ProviderRequest {
                url: "https://api.openai.com/v1/chat/completions".into(),
                headers: vec![
                    ("Authorization".into(), format!("Bearer {}", settings.api_key)),
                    ("Content-Type".into(), "application/json".into()),
                ],
                body: json!({
                    "model": settings.model_id,
                    "messages": wire,
                    "stream": true,
                    "temperature": TEMPERATURE,
                    "max_tokens": MAX_OUTPUT_TOKENS,
                }),
                extract: extract_openai,
            }
        }
        Provider::Anthropic => {
            let wire: Vec<Value> = messages
                .iter()
                .map(|m| {
                    json!({
                        "role": match m.role { ChatRole::User => "user", ChatRole::Assistant => "assistant" },
                        "content": m.text,
                    })
                })
                .collect();
            ProviderRequest {
                url: "https://api.anthropic.com/v1/messages".into(),
                headers: vec![
                    ("x-api-key".into(), settings.api_key.clone()),
                    ("anthropic-version".into(), "2023-06-01".into()),
                    ("Content-Type".into(), "application/json".into()),
                ],
                body: json!({
                    "model": settings.model_id,
                    "system": system,
                    "messages": wire,
                    "stream": true,
                    "temperature": TEMPERATURE,
                    "max_tokens": MAX_OUTPUT_TOKENS,
                }),
                extract: extract_anthropic,
            }
        }
        Provider::Google => {
            let contents: Vec<Value> = messages
                .iter()
                .map(|m| {
                    json!({
                        "role": match m.role { ChatRole::User => "user", ChatRole::Assistant => "model" },
                        "parts": [{"text": m.text}],
                    })
                })
                .collect();
            ProviderRequest {
                url: format!(
                    "https://generativelanguage.googleapis.com/v1beta/models/{}:streamGenerateContent?key={}&alt=sse",
                    settings.model_id, settings.api_key
                ),
                headers: vec![("Content-Type".into(), "application/json".into())],
                body: json!({
                    "systemInstruction": {"parts": [{"text": system}]},
                    "contents": contents,
                    "generationConfig": {
                        "temperature": TEMPERATURE,
                        "maxOutputTokens": MAX_OUTPUT_TOKENS,
                    },
                }),
                extract: extract_google,
            }
        }
    }
}

fn extract_openai(frame: &Value) -> Option<String> {
    frame["choices"][0]["delta"]["content"].as_str().map(str::to_string)
}

fn extract_anthropic(frame: &Value) -> Option<String> {
    if frame["type"] != "content_block_delta" {
        return None;
    }
    frame["delta"]["text"].as_str().map(str::to_string)
}

fn extract_google(frame: &Value) -> Option<String> {
    frame["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .map(str::to_string)
}

/// Turn a non-2xx response into a typed API error, pulling the message out
/// of the provider's JSON error envelope when it has one.
pub(crate) fn parse_api_error(status: u16, body: &str) -> StreamError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["message"].as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            let snippet: String = body.chars().take(200).collect();
            if snippet.is_empty() { format!("HTTP {status}") } else { snippet }
        });
    StreamError::Api { status: Some(status), message }
}

/// A selectable model as reported by the provider's listing endpoint.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub label: String,
}

/// Fetch the provider's model list, filtered down to chat-capable models
/// and sorted newest-looking first.
pub async fn list_models(settings: &ProviderSettings) -> anyhow::Result<Vec<ModelInfo>> {
    let client = reqwest::Client::new();
    let mut models = match settings.provider {
        Provider::OpenAi => {
            let body: Value = client
                .get("https://api.openai.com/v1/models")
                .header("Authorization", format!("Bearer {}", settings.api_key))
                .send()
                .await
                .context("model list request failed")?
                .error_for_status()
                .context("model list request rejected")?
                .json()
                .await
                .context("model list response was not JSON")?;
            body["data"]
                .as_array()
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter_map(|m| m["id"].as_str())
                .filter(|id| id.starts_with("gpt") || id.starts_with('o'))
                .filter(|id| !id.contains("audio") && !id.contains("realtime"))
                .map(|id| ModelInfo { id: id.into(), label: id.into() })
                .collect::<Vec<_>>()
        }
        Provider::Anthropic => {
            let body: Value = client
                .get("https://api.anthropic.com/v1/models")
                .header("x-api-key", settings.api_key.clone())
                .header("anthropic-version", "2023-06-01")
                .send()
                .await
                .context("model list request failed")?
                .error_for_status()
                .context("model list request rejected")?
                .json()
                .await
                .context("model list response was not JSON")?;
            body["data"]
                .as_array()
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter_map(|m| {
                    let id = m["id"].as_str()?;
                    let label = m["display_name"].as_str().unwrap_or(id);
                    Some(ModelInfo { id: id.into(), label: label.into() })
                })
                .collect()
        }
        Provider::Google => {
            let body: Value = client
                .get(format!(
                    "https://generativelanguage.googleapis.com/v1beta/models?key={}",
                    settings.api_key
                ))
                .send()
                .await
                .context("model list request failed")?
                .error_for_status()
                .context("model list request rejected")?
                .json()
                .await
                .context("model list response was not JSON")?;
            body["models"]
                .as_array()
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter(|m| {
                    m["supportedGenerationMethods"]
                        .as_array()
                        .is_some_and(|ms| ms.iter().any(|v| v == "generateContent"))
                })
                .filter_map(|m| {
                    let name = m["name"].as_str()?;
                    let id = name.strip_prefix("models/").unwrap_or(name);
                    let label = m["displayName"].as_str().unwrap_or(id);
                    Some(ModelInfo { id: id.into(), label: label.into() })
                })
                .collect()
        }
    };
    models.sort_by(|a, b| b.id.cmp(&a.id));
    Ok(models)
}
