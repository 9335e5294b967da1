mod openai_stub;

use articleforge::llm::{JsonRequest, LanguageModel as _, ModelTier, TextRequest};
use articleforge::openai::{OpenAiConfig, OpenAiModel, TokenPrice};
use articleforge::rag::Embedder as _;
use openai_stub::{OpenAiStub, OpenAiStubConfig};

fn model(stub: &OpenAiStub) -> anyhow::Result<OpenAiModel> {
    let mut config = OpenAiConfig::new("test-key", &stub.base_url);
    config.fast_price = TokenPrice {
        input_per_million: 1.0,
        output_per_million: 2.0,
    };
    OpenAiModel::new(config)
}

#[tokio::test]
async fn json_calls_parse_fenced_output_and_price_usage() -> anyhow::Result<()> {
    let stub = OpenAiStub::spawn(OpenAiStubConfig::default());
    let model = model(&stub)?;

    let response = model
        .run_json(JsonRequest::new(
            "section",
            ModelTier::Fast,
            "- Section title: Intro\n",
            "section_draft",
            serde_json::json!({ "type": "object" }),
        ))
        .await?;

    assert_eq!(response.data["content"], "Stub body for Intro.");
    assert_eq!(response.usage.total_tokens, 150);
    // 100 input at $1/M plus 50 output at $2/M.
    assert!((response.cost - 0.0002).abs() < 1e-12);

    let requests = stub.requests_for_format("section_draft");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["model"], "gpt-4o-mini");
    assert_eq!(requests[0]["text"]["format"]["type"], "json_schema");
    Ok(())
}

#[tokio::test]
async fn vision_calls_send_image_parts() -> anyhow::Result<()> {
    let stub = OpenAiStub::spawn(OpenAiStubConfig::default());
    let model = model(&stub)?;

    let response = model
        .run_text(
            TextRequest::new("image_description", ModelTier::Fast, "Describe.")
                .with_image("https://example.com/a.png")
                .with_temperature(0.2),
        )
        .await?;
    assert_eq!(response.data, "Stub visual style.");

    let requests = stub.requests();
    let temperature = requests[0]["temperature"].as_f64().unwrap_or_default();
    assert!((temperature - 0.2).abs() < 1e-6);
    let content = &requests[0]["input"][0]["content"];
    assert_eq!(content[0]["type"], "input_text");
    assert_eq!(content[1]["type"], "input_image");
    assert_eq!(content[1]["image_url"], "https://example.com/a.png");
    Ok(())
}

#[tokio::test]
async fn api_errors_surface_the_provider_message() -> anyhow::Result<()> {
    let stub = OpenAiStub::spawn(OpenAiStubConfig {
        fail_structure: true,
        ..OpenAiStubConfig::default()
    });
    let model = model(&stub)?;

    let err = model
        .run_json(JsonRequest::new(
            "structure",
            ModelTier::Quality,
            "analyze",
            "reference_structure",
            serde_json::json!({ "type": "object" }),
        ))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("stub structure failure"));
    Ok(())
}

#[tokio::test]
async fn embeddings_are_returned_in_input_order() -> anyhow::Result<()> {
    let stub = OpenAiStub::spawn(OpenAiStubConfig::default());
    let model = model(&stub)?;

    let response = model
        .embed_texts(&["a".to_owned(), "bbb".to_owned()])
        .await?;
    assert_eq!(response.data, vec![vec![1.0f32, 1.0], vec![1.0, 3.0]]);
    assert_eq!(response.usage.total_tokens, 8);
    // 8 prompt tokens at the default $0.02/M.
    assert!((response.cost - 8.0 * 0.02 / 1_000_000.0).abs() < 1e-15);

    let empty = model.embed_texts(&[]).await?;
    assert!(empty.data.is_empty());
    assert_eq!(empty.usage.total_tokens, 0);
    assert_eq!(stub.requests().len(), 1);
    Ok(())
}
