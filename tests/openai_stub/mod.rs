use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct OpenAiStubConfig {
    /// Section titles returned by the structure analysis.
    pub sections: Vec<String>,
    /// Answer the structure analysis with an API error.
    pub fail_structure: bool,
}

/// Records every request body and answers by the requested output format.
pub struct OpenAiStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Value>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl OpenAiStub {
    pub fn spawn(config: OpenAiStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start openai stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v1");

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().to_string();
                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }
                let parsed: Value = match serde_json::from_str(&body) {
                    Ok(value) => value,
                    Err(_) => {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid json").with_status_code(400),
                        );
                        continue;
                    }
                };
                recorded.lock().expect("requests lock").push(parsed.clone());

                let (status, response_body) = match path.as_str() {
                    "/v1/responses" => responses_reply(&config, &parsed),
                    "/v1/embeddings" => (200, embeddings_reply(&parsed)),
                    _ => (404, serde_json::json!({ "error": { "message": "not found" } })),
                };

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                let response = tiny_http::Response::from_string(response_body.to_string())
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    #[allow(dead_code)]
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Requests whose structured output format has the given schema name.
    #[allow(dead_code)]
    pub fn requests_for_format(&self, name: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.pointer("/text/format/name").and_then(|v| v.as_str()) == Some(name))
            .collect()
    }
}

impl Drop for OpenAiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn responses_reply(config: &OpenAiStubConfig, parsed: &Value) -> (u16, Value) {
    let format_name = parsed
        .pointer("/text/format/name")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let prompt = parsed.get("input").and_then(|v| v.as_str()).unwrap_or("");

    let output_text = match format_name {
        "reference_structure" if config.fail_structure => {
            return (
                500,
                serde_json::json!({ "error": { "message": "stub structure failure" } }),
            );
        }
        "reference_structure" => {
            let sections = config
                .sections
                .iter()
                .enumerate()
                .map(|(idx, title)| {
                    serde_json::json!({
                        "title": title,
                        "narrative_plan": [format!("Explain {title}.")],
                        "key_facts": [format!("fact-{idx}")]
                    })
                })
                .collect::<Vec<_>>();
            serde_json::json!({ "structure": sections, "general_plan": ["Be concrete."] })
                .to_string()
        }
        "section_draft" => {
            let title = prompt
                .lines()
                .find_map(|line| line.strip_prefix("- Section title: "))
                .unwrap_or("Unknown");
            // Some models fence JSON output.
            format!(
                "```json\n{}\n```",
                serde_json::json!({
                    "content": format!("Stub body for {title}."),
                    "usedPoints": [],
                    "injectedCount": 0
                })
            )
        }
        "keyword_plans" => serde_json::json!({ "plans": [] }).to_string(),
        "product_brief" => serde_json::json!({ "product_name": "StubKit" }).to_string(),
        "problem_product_mapping" => serde_json::json!({ "mappings": [] }).to_string(),
        "authority_analysis" => {
            serde_json::json!({ "relevant_terms": [], "combination_strategies": [] }).to_string()
        }
        _ => "Stub visual style.".to_owned(),
    };

    (
        200,
        serde_json::json!({
            "id": "resp_stub",
            "object": "response",
            "model": parsed.get("model").cloned().unwrap_or(Value::String("stub-model".to_owned())),
            "output": [
                {
                    "type": "message",
                    "role": "assistant",
                    "content": [
                        { "type": "output_text", "text": output_text }
                    ]
                }
            ],
            "usage": { "input_tokens": 100, "output_tokens": 50, "total_tokens": 150 }
        }),
    )
}

fn embeddings_reply(parsed: &Value) -> Value {
    let inputs = parsed
        .get("input")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let data = inputs
        .iter()
        .enumerate()
        .rev()
        .map(|(index, text)| {
            let len = text.as_str().map(str::len).unwrap_or(0) as f64;
            serde_json::json!({ "object": "embedding", "index": index, "embedding": [1.0, len] })
        })
        .collect::<Vec<_>>();
    let tokens = inputs.len() as u64 * 4;
    serde_json::json!({
        "object": "list",
        "data": data,
        "usage": { "prompt_tokens": tokens, "total_tokens": tokens }
    })
}
