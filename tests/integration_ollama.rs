#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Integration tests that require a local Ollama instance
// Run with: cargo test --test integration_ollama -- --ignored

use rag_chat::config::OllamaConfig;
use rag_chat::llm::{
    AssistantReply, ChatMessage, EmbeddingProvider, GenerationOptions, GenerationProvider,
    OllamaClient,
};
use rag_chat::rag::cosine_similarity;
use std::env;
use std::time::Duration;
use tracing::info;

const TEST_EMBEDDING_MODEL: &str = "nomic-embed-text:latest";
const TEST_CHAT_MODEL: &str = "qwen2.5:3b";

fn create_integration_test_client() -> OllamaClient {
    let mut config = OllamaConfig {
        embedding_model: env::var("OLLAMA_EMBEDDING_MODEL")
            .unwrap_or_else(|_| TEST_EMBEDDING_MODEL.to_string()),
        ..OllamaConfig::default()
    };
    if let Ok(url) = env::var("OLLAMA_URL") {
        config.set_url(&url).expect("OLLAMA_URL is a valid URL");
    }

    OllamaClient::new(&config)
        .expect("Failed to create Ollama client")
        .with_timeout(Duration::from_secs(120))
        .with_retry_attempts(3)
}

fn chat_options() -> GenerationOptions {
    GenerationOptions {
        model: env::var("OLLAMA_MODEL").unwrap_or_else(|_| TEST_CHAT_MODEL.to_string()),
        temperature: 0.0,
        top_p: 0.9,
    }
}

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_health_check() {
    init_test_tracing();

    let client = create_integration_test_client();
    let result = client.health_check(&[TEST_EMBEDDING_MODEL]);

    assert!(
        result.is_ok(),
        "Health check should succeed with local Ollama: {:?}",
        result
    );
}

#[tokio::test]
#[ignore = "requires a local Ollama instance"]
async fn real_ollama_embeddings_rank_related_text_higher() {
    init_test_tracing();

    let client = create_integration_test_client();
    let query = client
        .embed("How do I borrow a value in Rust?")
        .await
        .expect("query embedding");
    let related = client
        .embed("References let you borrow a value without taking ownership.")
        .await
        .expect("related embedding");
    let unrelated = client
        .embed("The recipe calls for two cups of flour.")
        .await
        .expect("unrelated embedding");

    let related_score = cosine_similarity(&query, &related).expect("defined");
    let unrelated_score = cosine_similarity(&query, &unrelated).expect("defined");
    info!(
        "related {:.3}, unrelated {:.3}",
        related_score, unrelated_score
    );
    assert!(related_score > unrelated_score);
}

#[tokio::test]
#[ignore = "requires a local Ollama instance"]
async fn real_ollama_generate_and_chat() {
    init_test_tracing();

    let client = create_integration_test_client();
    let options = chat_options();

    let generation = client
        .generate("Reply with the single word: ready", &options)
        .await
        .expect("generation succeeds");
    assert!(!generation.text.trim().is_empty());

    let reply = client
        .converse(&[ChatMessage::user("Say hello.")], &options, &[])
        .await
        .expect("chat succeeds");
    assert!(matches!(reply, AssistantReply::Text(text) if !text.trim().is_empty()));
}
