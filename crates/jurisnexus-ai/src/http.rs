//! Live HTTP backends: Hugging Face text-generation endpoints and the
//! Anthropic Messages API.

use async_trait::async_trait;
use jurisnexus_core::{ApiStyle, CoreError, Tier, TierConfig};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::CallError;
use crate::backend::{ModelBackend, ModelRequest};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-latest";

pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
    api_key: String,
    style: ApiStyle,
    label: String,
}

impl HttpBackend {
    pub fn new(
        endpoint: impl Into<String>,
        model: Option<String>,
        api_key: impl Into<String>,
        style: ApiStyle,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let label = match style {
            ApiStyle::HuggingFace => "hugging_face",
            ApiStyle::Anthropic => "anthropic",
        };
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
            api_key: api_key.into(),
            style,
            label: label.to_string(),
        }
    }

    /// Build from a tier's configuration. Missing endpoint or credentials is a
    /// configuration error.
    pub fn from_config(
        tier: Tier,
        cfg: &TierConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, CoreError> {
        let endpoint = cfg
            .resolved_endpoint(tier)
            .ok_or_else(|| CoreError::Config(format!("{tier}: no endpoint configured")))?;
        let api_key = cfg.resolve_api_key(tier, env).ok_or_else(|| {
            CoreError::Config(format!("{tier}: no api_key and ${} is unset", cfg.key_env(tier)))
        })?;
        info!(%tier, endpoint = %endpoint, style = ?cfg.style(tier), "configured live model backend");
        Ok(Self::new(endpoint, cfg.model.clone(), api_key, cfg.style(tier)))
    }

    fn body(&self, request: &ModelRequest) -> Value {
        match self.style {
            ApiStyle::HuggingFace => {
                let mut body = json!({
                    "inputs": request.prompt,
                    "parameters": {
                        "max_new_tokens": request.max_tokens,
                        "temperature": request.temperature,
                        "return_full_text": false,
                    },
                });
                if let Some(model) = &self.model {
                    body["model"] = json!(model);
                }
                body
            }
            ApiStyle::Anthropic => json!({
                "model": self.model.as_deref().unwrap_or(DEFAULT_ANTHROPIC_MODEL),
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
                "messages": [{ "role": "user", "content": request.prompt }],
            }),
        }
    }
}

#[async_trait]
impl ModelBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, CallError> {
        let builder = self.client.post(&self.endpoint).json(&self.body(request));
        let builder = match self.style {
            ApiStyle::HuggingFace => builder.bearer_auth(&self.api_key),
            ApiStyle::Anthropic => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
        };

        let resp = builder.send().await.map_err(classify_send_error)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let reason = format!("{} returned {}: {}", self.label, status.as_u16(), body);
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                CallError::Transient(reason)
            } else {
                CallError::UpstreamRejection(reason)
            });
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| CallError::UpstreamRejection(format!("malformed response body: {e}")))?;
        match self.style {
            ApiStyle::HuggingFace => parse_hugging_face(&value),
            ApiStyle::Anthropic => parse_anthropic(&value),
        }
    }
}

fn classify_send_error(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        CallError::Timeout(e.to_string())
    } else {
        CallError::Transient(e.to_string())
    }
}

#[derive(Deserialize)]
struct Generated {
    generated_text: String,
}

/// Accepts `[{"generated_text": ..}]` or a bare `{"generated_text": ..}`.
pub fn parse_hugging_face(value: &Value) -> Result<String, CallError> {
    let generated = match value {
        Value::Array(items) => items
            .first()
            .cloned()
            .map(serde_json::from_value::<Generated>)
            .transpose(),
        other => serde_json::from_value::<Generated>(other.clone()).map(Some),
    }
    .map_err(|e| CallError::UpstreamRejection(format!("unexpected response shape: {e}")))?;
    non_empty(generated.map(|g| g.generated_text))
}

/// Concatenates the `text` blocks of a Messages API response.
pub fn parse_anthropic(value: &Value) -> Result<String, CallError> {
    let blocks = value
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| CallError::UpstreamRejection("response has no content array".into()))?;
    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    non_empty(Some(text))
}

fn non_empty(text: Option<String>) -> Result<String, CallError> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t),
        _ => Err(CallError::UpstreamRejection("empty completion".into())),
    }
}
