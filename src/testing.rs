use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{JsonRequest, LanguageModel, LlmResponse, TextRequest, Usage};

type JsonHandler = Box<dyn Fn(&str) -> anyhow::Result<serde_json::Value> + Send + Sync>;
type TextHandler = Box<dyn Fn(&str) -> anyhow::Result<String> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub task: &'static str,
    pub prompt: String,
    pub images: Vec<String>,
    pub temperature: Option<f32>,
}

/// In-memory `LanguageModel` answering by task name. Unscripted tasks fail.
#[derive(Default)]
pub struct ScriptedModel {
    json: HashMap<&'static str, JsonHandler>,
    text: HashMap<&'static str, TextHandler>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    pub const TOKENS_PER_CALL: u64 = 30;
    pub const COST_PER_CALL: f64 = 0.01;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_json<F>(mut self, task: &'static str, handler: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
    {
        self.json.insert(task, Box::new(handler));
        self
    }

    pub fn on_text<F>(mut self, task: &'static str, handler: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.text.insert(task, Box::new(handler));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, task: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.task == task)
            .collect()
    }

    fn record(&self, task: &'static str, prompt: &str, images: &[String], temperature: Option<f32>) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                task,
                prompt: prompt.to_owned(),
                images: images.to_vec(),
                temperature,
            });
        }
    }

    fn respond<T>(data: T) -> LlmResponse<T> {
        LlmResponse {
            data,
            usage: Usage::new(20, 10),
            cost: Self::COST_PER_CALL,
            duration: Duration::from_millis(1),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run_text(&self, request: TextRequest) -> anyhow::Result<LlmResponse<String>> {
        self.record(
            request.task,
            &request.prompt,
            &request.images,
            request.temperature,
        );
        let handler = self
            .text
            .get(request.task)
            .ok_or_else(|| anyhow::anyhow!("unscripted text task: {}", request.task))?;
        handler(&request.prompt).map(Self::respond)
    }

    async fn run_json(
        &self,
        request: JsonRequest,
    ) -> anyhow::Result<LlmResponse<serde_json::Value>> {
        self.record(request.task, &request.prompt, &[], None);
        let handler = self
            .json
            .get(request.task)
            .ok_or_else(|| anyhow::anyhow!("unscripted json task: {}", request.task))?;
        handler(&request.prompt).map(Self::respond)
    }
}
