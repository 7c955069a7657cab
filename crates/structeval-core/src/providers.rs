//! HTTP model clients for the supported providers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{ModelConfig, Provider};
use crate::model::ModelClient;

/// Builds the client for `config`. Fails early when a required API key is
/// missing.
pub fn build_client(config: &ModelConfig, timeout: Duration) -> crate::Result<Arc<dyn ModelClient>> {
    let api_key = config.api_key()?;
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(crate::Error::external)?;
    let client: Arc<dyn ModelClient> = match config.provider {
        Provider::Ollama => Arc::new(OllamaClient { http, config: config.clone() }),
        Provider::OpenAi => Arc::new(OpenAiClient { http, config: config.clone(), api_key }),
        Provider::Anthropic => Arc::new(AnthropicClient {
            http,
            config: config.clone(),
            api_key: api_key.unwrap_or_default(),
        }),
    };
    Ok(client)
}

async fn post_json(request: reqwest::RequestBuilder, body: &Value) -> Result<Value> {
    let resp = request.json(body).send().await?;
    let status = resp.status();
    let v = resp.json::<Value>().await.context("response body is not JSON")?;
    if !status.is_success() {
        bail!("HTTP {}: {}", status.as_u16(), v);
    }
    Ok(v)
}

fn text_at<'a>(v: &'a Value, pointer: &str) -> Result<&'a str> {
    v.pointer(pointer)
        .and_then(Value::as_str)
        .with_context(|| format!("no text at {pointer} in provider response"))
}

/// OpenAI's `json_schema` mode needs an object at the top level. Other schemas
/// are wrapped as the `items` property; the flag says whether they were.
fn top_level_object(schema: &Value) -> (Value, bool) {
    if schema.get("type").and_then(Value::as_str) == Some("object") {
        return (schema.clone(), false);
    }
    let wrapped = json!({
        "type": "object",
        "properties": { "items": schema },
        "required": ["items"],
        "additionalProperties": false,
    });
    (wrapped, true)
}

/// Reverses [`top_level_object`] on the reply. Anything that does not look
/// wrapped is returned as sent, for the validator to judge.
fn unwrap_items(content: &str) -> String {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(mut obj)) if obj.len() == 1 => match obj.remove("items") {
            Some(items) => items.to_string(),
            None => content.to_string(),
        },
        _ => content.to_string(),
    }
}

/// Any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    config: ModelConfig,
    api_key: Option<String>,
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(&self, prompt: &str, schema: Option<&Value>) -> Result<String> {
        let mut body = json!({
            "model": self.config.name,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": [
                { "role": "system", "content": "You are a helpful assistant." },
                { "role": "user", "content": prompt },
            ],
        });
        let mut wrapped = false;
        if let Some(schema) = schema {
            let (schema, was_wrapped) = top_level_object(schema);
            wrapped = was_wrapped;
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": "response", "schema": schema },
            });
        }
        let mut request = self.http.post(format!("{}/chat/completions", self.config.base_url()));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let v = post_json(request, &body).await?;
        let content = text_at(&v, "/choices/0/message/content")?;
        Ok(if wrapped { unwrap_items(content) } else { content.to_string() })
    }
}

/// Ollama's `/api/chat`; `format` carries the schema for structured decoding.
pub struct OllamaClient {
    http: reqwest::Client,
    config: ModelConfig,
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn complete(&self, prompt: &str, schema: Option<&Value>) -> Result<String> {
        let mut body = json!({
            "model": self.config.name,
            "stream": false,
            "options": { "temperature": self.config.temperature },
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(schema) = schema {
            body["format"] = schema.clone();
        }
        let request = self.http.post(format!("{}/api/chat", self.config.base_url()));
        let v = post_json(request, &body).await?;
        Ok(text_at(&v, "/message/content")?.to_string())
    }
}

/// Anthropic Messages API. It has no schema-constrained mode, so the schema is ignored.
pub struct AnthropicClient {
    http: reqwest::Client,
    config: ModelConfig,
    api_key: String,
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn complete(&self, prompt: &str, schema: Option<&Value>) -> Result<String> {
        if schema.is_some() {
            tracing::debug!(model = %self.config.name, "anthropic has no structured decoding; sending plain prompt");
        }
        let body = json!({
            "model": self.config.name,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let request = self
            .http
            .post(format!("{}/messages", self.config.base_url()))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01");
        let v = post_json(request, &body).await?;
        Ok(text_at(&v, "/content/0/text")?.to_string())
    }
}
