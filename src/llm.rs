use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cost::CostLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Fast,
    Quality,
}

/// Token usage in the one shape the pipeline understands. Adapters convert
/// provider payloads into this before returning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse<T> {
    pub data: T,
    pub usage: Usage,
    pub cost: f64,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct TextRequest {
    pub task: &'static str,
    pub tier: ModelTier,
    pub prompt: String,
    /// Image URLs attached for vision calls.
    pub images: Vec<String>,
    /// Sampling temperature. Adapters may ignore it for models that reject it.
    pub temperature: Option<f32>,
}

impl TextRequest {
    pub fn new(task: &'static str, tier: ModelTier, prompt: impl Into<String>) -> Self {
        Self {
            task,
            tier,
            prompt: prompt.into(),
            images: Vec::new(),
            temperature: None,
        }
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.images.push(url.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub task: &'static str,
    pub tier: ModelTier,
    pub prompt: String,
    pub schema_name: &'static str,
    pub schema: serde_json::Value,
}

impl JsonRequest {
    pub fn new(
        task: &'static str,
        tier: ModelTier,
        prompt: impl Into<String>,
        schema_name: &'static str,
        schema: serde_json::Value,
    ) -> Self {
        Self {
            task,
            tier,
            prompt: prompt.into(),
            schema_name,
            schema,
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn run_text(&self, request: TextRequest) -> anyhow::Result<LlmResponse<String>>;

    async fn run_json(
        &self,
        request: JsonRequest,
    ) -> anyhow::Result<LlmResponse<serde_json::Value>>;
}

/// A model handle that books every completed call into the session ledger.
#[derive(Clone)]
pub struct MeteredModel {
    model: Arc<dyn LanguageModel>,
    ledger: Arc<CostLedger>,
}

impl MeteredModel {
    pub fn new(model: Arc<dyn LanguageModel>, ledger: Arc<CostLedger>) -> Self {
        Self { model, ledger }
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub async fn text(&self, request: TextRequest) -> anyhow::Result<String> {
        let task = request.task;
        let response = self
            .model
            .run_text(request)
            .await
            .with_context(|| format!("llm call: {task}"))?;
        self.record(task, &response);
        Ok(response.data)
    }

    pub async fn json<T: DeserializeOwned>(&self, request: JsonRequest) -> anyhow::Result<T> {
        let task = request.task;
        let response = self
            .model
            .run_json(request)
            .await
            .with_context(|| format!("llm call: {task}"))?;
        self.record(task, &response);
        serde_json::from_value(response.data)
            .with_context(|| format!("llm call: {task}: response does not match schema"))
    }

    fn record<T>(&self, task: &str, response: &LlmResponse<T>) {
        self.ledger
            .add_cost(response.cost, Some(response.usage.total_tokens));
        tracing::debug!(
            task,
            model = self.model.name(),
            tokens = response.usage.total_tokens,
            cost = response.cost,
            duration_ms = response.duration.as_millis() as u64,
            "llm call complete"
        );
    }
}

/// Parses model output that should be JSON but may arrive wrapped in prose or
/// Markdown fences.
pub fn parse_json_output(text: &str) -> anyhow::Result<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Ok(value);
    }
    let span = extract_json_span(text)?;
    serde_json::from_str(span).context("parse json output")
}

fn extract_json_span(text: &str) -> anyhow::Result<&str> {
    let start = text
        .find(['{', '['])
        .ok_or_else(|| anyhow::anyhow!("missing `{{` or `[` in model output"))?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text
        .rfind(close)
        .ok_or_else(|| anyhow::anyhow!("missing `{close}` in model output"))?;
    if end <= start {
        anyhow::bail!("invalid json span in model output");
    }
    Ok(&text[start..=end])
}
