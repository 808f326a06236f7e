use std::sync::Arc;

use mockito::Matcher;
use newscast::llm::remote::RemoteLlmProvider;
use newscast::llm::{LlmProvider, LlmRequest, Summarizer};
use newscast::stage::StageErrorKind;

fn completion(content: &str) -> String {
    serde_json::json!({
        "model": "test-model",
        "choices": [{
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
    })
    .to_string()
}

#[tokio::test]
async fn test_remote_provider_with_mock() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer fake-api-key")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "model": "test-model",
            "max_tokens": 100,
            "messages": [
                { "role": "system", "content": "Be brief." },
                { "role": "user", "content": "Test prompt" }
            ]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion("  This is a test response \n"))
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(reqwest::Client::new(), server.url(), "fake-api-key", "test-model");

    let request = LlmRequest {
        prompt: "Test prompt".to_string(),
        system: Some("Be brief.".to_string()),
        max_tokens: Some(100),
        temperature: Some(0.7),
        timeout_seconds: Some(10),
    };

    let response = provider.generate(request).await.unwrap();
    assert_eq!(response.content, "This is a test response");
    assert_eq!(response.usage.prompt_tokens, 10);
    assert_eq!(response.usage.total_tokens, 15);
    assert_eq!(response.model, "test-model");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_error_status() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .with_body("rate limited")
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(reqwest::Client::new(), server.url(), "key", "test-model");
    let err = provider
        .generate(LlmRequest {
            prompt: "hi".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("429"), "unexpected error: {}", message);
    assert!(message.contains("rate limited"));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_summarizer_over_remote_provider() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::Regex("Summarize the following news article".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion("Central bank holds rates steady."))
        .create_async()
        .await;

    let provider: Arc<dyn LlmProvider> = Arc::new(RemoteLlmProvider::new(
        reqwest::Client::new(),
        server.url(),
        "key",
        "test-model",
    ));
    let summarizer = Summarizer::new(Some(provider));

    let summary = summarizer
        .summarize("The central bank left its benchmark rate unchanged on Thursday.")
        .await
        .unwrap();
    assert_eq!(summary, "Central bank holds rates steady.");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_empty_completion_is_invalid_response() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion("   "))
        .create_async()
        .await;

    let provider: Arc<dyn LlmProvider> = Arc::new(RemoteLlmProvider::new(
        reqwest::Client::new(),
        server.url(),
        "key",
        "test-model",
    ));
    let summarizer = Summarizer::new(Some(provider));

    let err = summarizer.meta_summarize(&["One story.".to_string()]).await.unwrap_err();
    assert_eq!(err.kind, StageErrorKind::InvalidResponse);
}
