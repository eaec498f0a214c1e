//! Typed parsing through the client.

mod support;

use std::sync::Arc;

use bhumi::prelude::*;
use serde::Deserialize;
use serde_json::{Value, json};
use support::*;

#[derive(Debug, Deserialize, PartialEq)]
struct CityReport {
    city: String,
    population: u64,
}

impl StructuredOutput for CityReport {
    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": {"type": "string"},
                "population": {"type": "integer", "minimum": 0}
            },
            "required": ["city", "population"],
            "additionalProperties": false
        })
    }
}

fn client_answering(text: &str) -> (Arc<ScriptedEngine>, LlmClient) {
    let engine = Arc::new(ScriptedEngine::new().with_response(openai_text(text)));
    let client = LlmClient::with_engine(weather_config(), engine.clone()).unwrap();
    (engine, client)
}

#[tokio::test]
async fn fenced_json_is_parsed_into_the_type() {
    let (engine, client) = client_answering(
        "Here you go:\n```json\n{\"city\": \"Tokyo\", \"population\": 13960000}\n```",
    );
    let report: CityReport = client
        .parse(CompletionRequest::from_input("Largest city in Japan?"))
        .await
        .unwrap();
    assert_eq!(
        report,
        CityReport {
            city: "Tokyo".to_string(),
            population: 13_960_000
        }
    );

    let body = engine.last_body().unwrap();
    assert_eq!(body["response_format"]["type"], "json_schema");
    assert_eq!(body["response_format"]["json_schema"]["name"], "CityReport");
    let system = &body["messages"][0];
    assert_eq!(system["role"], "system");
    assert!(system["content"].as_str().unwrap().contains("JSON Schema"));
}

#[tokio::test]
async fn schema_mismatch_is_a_validation_error() {
    let (_, client) = client_answering("{\"city\": \"Tokyo\", \"population\": -5}");
    let err = client
        .parse::<CityReport>(CompletionRequest::from_input("city?"))
        .await
        .unwrap_err();
    match err {
        LlmError::SchemaValidation(message) => assert!(message.contains("population")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn prose_without_json_is_an_extraction_error() {
    let (_, client) = client_answering("I'm not sure which city you mean.");
    let err = client
        .parse::<CityReport>(CompletionRequest::from_input("city?"))
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::ExtractionError(_)));
}

#[tokio::test]
async fn anthropic_requests_carry_no_response_format() {
    let engine = Arc::new(ScriptedEngine::new().with_response(
        json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "{\"city\": \"Paris\", \"population\": 2100000}"}],
            "stop_reason": "end_turn"
        })
        .to_string(),
    ));
    let config = LlmConfig::new("test-key", "anthropic/claude-3-5-sonnet-latest")
        .with_poll_interval(std::time::Duration::from_millis(1));
    let client = LlmClient::with_engine(config, engine.clone()).unwrap();

    let report: CityReport = client
        .parse(CompletionRequest::from_input("Capital of France?"))
        .await
        .unwrap();
    assert_eq!(report.city, "Paris");
    let body = engine.last_body().unwrap();
    assert!(body.get("response_format").is_none());
    assert!(body["system"].as_str().unwrap().contains("JSON Schema"));
}
