use std::time::{Duration, Instant};

use anyhow::Context as _;
use async_trait::async_trait;

use crate::llm::{
    JsonRequest, LanguageModel, LlmResponse, ModelTier, TextRequest, Usage, parse_json_output,
};
use crate::rag::Embedder;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenPrice {
    /// USD per 1M input tokens.
    pub input_per_million: f64,
    /// USD per 1M output tokens.
    pub output_per_million: f64,
}

impl TokenPrice {
    pub fn cost(&self, usage: &Usage) -> f64 {
        (usage.input_tokens as f64 * self.input_per_million
            + usage.output_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub fast_model: String,
    pub quality_model: String,
    pub embedding_model: String,
    pub fast_price: TokenPrice,
    pub quality_price: TokenPrice,
    pub embedding_price: TokenPrice,
    pub timeout: Duration,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("fast_model", &self.fast_model)
            .field("quality_model", &self.quality_model)
            .field("embedding_model", &self.embedding_model)
            .field("fast_price", &self.fast_price)
            .field("quality_price", &self.quality_price)
            .field("embedding_price", &self.embedding_price)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            fast_model: "gpt-4o-mini".to_owned(),
            quality_model: "gpt-4o".to_owned(),
            embedding_model: "text-embedding-3-small".to_owned(),
            fast_price: TokenPrice {
                input_per_million: 0.15,
                output_per_million: 0.60,
            },
            quality_price: TokenPrice {
                input_per_million: 2.50,
                output_per_million: 10.00,
            },
            embedding_price: TokenPrice {
                input_per_million: 0.02,
                output_per_million: 0.0,
            },
            timeout: Duration::from_secs(300),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        let base_url = std::env::var("ARTICLEFORGE_OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());

        let mut config = Self::new(api_key, base_url);
        if let Ok(model) = std::env::var("ARTICLEFORGE_FAST_MODEL") {
            config.fast_model = model;
        }
        if let Ok(model) = std::env::var("ARTICLEFORGE_QUALITY_MODEL") {
            config.quality_model = model;
        }
        if let Ok(model) = std::env::var("ARTICLEFORGE_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        config.fast_price.input_per_million =
            env_price("ARTICLEFORGE_FAST_PRICE_IN", config.fast_price.input_per_million)?;
        config.fast_price.output_per_million =
            env_price("ARTICLEFORGE_FAST_PRICE_OUT", config.fast_price.output_per_million)?;
        config.quality_price.input_per_million = env_price(
            "ARTICLEFORGE_QUALITY_PRICE_IN",
            config.quality_price.input_per_million,
        )?;
        config.quality_price.output_per_million = env_price(
            "ARTICLEFORGE_QUALITY_PRICE_OUT",
            config.quality_price.output_per_million,
        )?;
        config.embedding_price.input_per_million = env_price(
            "ARTICLEFORGE_EMBEDDING_PRICE_IN",
            config.embedding_price.input_per_million,
        )?;
        Ok(config)
    }

    fn model_for(&self, tier: ModelTier) -> (&str, TokenPrice) {
        match tier {
            ModelTier::Fast => (&self.fast_model, self.fast_price),
            ModelTier::Quality => (&self.quality_model, self.quality_price),
        }
    }
}

fn env_price(key: &str, default: f64) -> anyhow::Result<f64> {
    match std::env::var(key) {
        Ok(raw) => {
            let price: f64 = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid {key}={raw:?}"))?;
            if !price.is_finite() || price < 0.0 {
                anyhow::bail!("invalid {key}={raw:?}: must be a non-negative number");
            }
            Ok(price)
        }
        Err(_) => Ok(default),
    }
}

pub fn responses_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/responses")
}

pub fn embeddings_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/embeddings")
}

#[derive(Debug, Clone)]
pub struct OpenAiModel {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiModel {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("build http client")?;
        Ok(Self { client, config })
    }

    async fn post_responses(
        &self,
        tier: ModelTier,
        input: serde_json::Value,
        format: serde_json::Value,
        temperature: Option<f32>,
    ) -> anyhow::Result<LlmResponse<String>> {
        let (model, price) = self.config.model_for(tier);
        let endpoint = responses_endpoint(&self.config.base_url);

        let mut body = serde_json::json!({
            "model": model,
            "input": input,
            "text": { "format": format },
            "store": false,
        });

        // NOTE: GPT-5 models reject sampling params like `temperature`.
        if let Some(temperature) = temperature
            && !model.starts_with("gpt-5")
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert("temperature".to_owned(), serde_json::json!(temperature));
        }

        let started_at = Instant::now();
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;

        let status = response.status();
        let raw = response.text().await.context("read OpenAI response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            anyhow::bail!("OpenAI API error ({status}): {message}");
        }

        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse OpenAI response")?;
        let text = extract_output_text(&value).context("extract output text")?;
        let usage = usage_from_response(&value);

        Ok(LlmResponse {
            data: text,
            usage,
            cost: price.cost(&usage),
            duration: started_at.elapsed(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn name(&self) -> &str {
        "openai"
    }

    async fn run_text(&self, request: TextRequest) -> anyhow::Result<LlmResponse<String>> {
        let input = if request.images.is_empty() {
            serde_json::json!(request.prompt)
        } else {
            let mut content = vec![serde_json::json!({
                "type": "input_text",
                "text": request.prompt,
            })];
            for url in &request.images {
                content.push(serde_json::json!({
                    "type": "input_image",
                    "image_url": url,
                }));
            }
            serde_json::json!([{ "role": "user", "content": content }])
        };

        tracing::debug!(task = request.task, tier = ?request.tier, "openai text call");
        self.post_responses(
            request.tier,
            input,
            serde_json::json!({ "type": "text" }),
            request.temperature,
        )
        .await
    }

    async fn run_json(
        &self,
        request: JsonRequest,
    ) -> anyhow::Result<LlmResponse<serde_json::Value>> {
        tracing::debug!(task = request.task, tier = ?request.tier, "openai json call");
        let format = serde_json::json!({
            "type": "json_schema",
            "name": request.schema_name,
            "schema": request.schema,
            "strict": false,
        });
        let response = self
            .post_responses(request.tier, serde_json::json!(request.prompt), format, None)
            .await?;
        let data = parse_json_output(&response.data).context("parse structured output")?;
        Ok(LlmResponse {
            data,
            usage: response.usage,
            cost: response.cost,
            duration: response.duration,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiModel {
    async fn embed_texts(&self, texts: &[String]) -> anyhow::Result<LlmResponse<Vec<Vec<f32>>>> {
        if texts.is_empty() {
            return Ok(LlmResponse {
                data: Vec::new(),
                usage: Usage::default(),
                cost: 0.0,
                duration: Duration::ZERO,
            });
        }
        let endpoint = embeddings_endpoint(&self.config.base_url);
        let body = serde_json::json!({
            "model": self.config.embedding_model,
            "input": texts,
        });

        let started_at = Instant::now();
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;
        let status = response.status();
        let raw = response.text().await.context("read embeddings response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            anyhow::bail!("OpenAI API error ({status}): {message}");
        }

        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse embeddings response")?;
        let data = extract_embeddings(&value, texts.len())?;
        let usage = embedding_usage(&value);
        Ok(LlmResponse {
            data,
            usage,
            cost: self.config.embedding_price.cost(&usage),
            duration: started_at.elapsed(),
        })
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_output_text(value: &serde_json::Value) -> anyhow::Result<String> {
    let output = value
        .get("output")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `output` array in response"))?;

    let mut text = String::new();
    for item in output {
        if item.get("type").and_then(|v| v.as_str()) != Some("message") {
            continue;
        }
        let Some(content) = item.get("content").and_then(|v| v.as_array()) else {
            continue;
        };
        for part in content {
            if part.get("type").and_then(|v| v.as_str()) != Some("output_text") {
                continue;
            }
            let Some(part_text) = part.get("text").and_then(|v| v.as_str()) else {
                continue;
            };
            text.push_str(part_text);
        }
    }

    if text.trim().is_empty() {
        anyhow::bail!("OpenAI output text is empty");
    }
    Ok(text)
}

/// The only place provider usage fields are interpreted.
fn usage_from_response(value: &serde_json::Value) -> Usage {
    let Some(usage) = value.get("usage") else {
        return Usage::default();
    };
    let field = |name: &str| usage.get(name).and_then(|v| v.as_u64()).unwrap_or(0);
    let mut normalized = Usage::new(field("input_tokens"), field("output_tokens"));
    let total = field("total_tokens");
    if total > normalized.total_tokens {
        normalized.total_tokens = total;
    }
    normalized
}

/// Embeddings report `prompt_tokens` only; there is no output side.
fn embedding_usage(value: &serde_json::Value) -> Usage {
    let field = |name: &str| {
        value
            .get("usage")
            .and_then(|usage| usage.get(name))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };
    let mut usage = Usage::new(field("prompt_tokens"), 0);
    usage.total_tokens = usage.total_tokens.max(field("total_tokens"));
    usage
}

fn extract_embeddings(value: &serde_json::Value, expected: usize) -> anyhow::Result<Vec<Vec<f32>>> {
    let data = value
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `data` array in embeddings response"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("missing `embedding` at index {index}"))?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| anyhow::anyhow!("non-numeric embedding at index {index}"))?;
        indexed.push((index, embedding));
    }
    indexed.sort_by_key(|(index, _)| *index);

    if indexed.len() != expected {
        anyhow::bail!(
            "embeddings response has {} vectors; expected {expected}",
            indexed.len()
        );
    }
    Ok(indexed.into_iter().map(|(_, embedding)| embedding).collect())
}
