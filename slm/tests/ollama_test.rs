use slm::{CachedGenerator, ConceptGenerator, OllamaGenerator, ResponseCache};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ndjson(chunks: &[&str]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&serde_json::json!({ "response": chunk, "done": false }).to_string());
        body.push('\n');
    }
    body.push_str(&serde_json::json!({ "response": "", "done": true }).to_string());
    body.push('\n');
    body
}

fn generator_for(server: &MockServer) -> OllamaGenerator {
    OllamaGenerator::new(
        format!("{}/api/generate", server.uri()),
        "test-model",
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_related_concepts_from_stream() {
    let mock_server = MockServer::start().await;
    let body = ndjson(&[
        "[{\"name\": \"Neural Network\", \"relation\": \"HAS_PART\", ",
        "\"relatedTo\": \"Deep Learning\"}, {\"name\": \"Backpropagation\", ",
        "\"relation\": \"USES\", \"relatedTo\": \"Deep Learning\"}]",
    ]);

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({ "model": "test-model" })))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let related = generator_for(&mock_server)
        .related_concepts("Deep Learning")
        .await
        .unwrap();

    assert_eq!(related.len(), 2);
    assert_eq!(related[0].name, "Neural Network");
    assert_eq!(related[1].relation, "USES");
}

#[tokio::test]
async fn test_no_relationship_maps_to_none() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(ndjson(&["{\"name\": \"\", \"relation\": \"\", \"relatedTo\": \"\"}"])),
        )
        .mount(&mock_server)
        .await;

    let mined = generator_for(&mock_server)
        .mine_relationship("Opera", "Thermodynamics")
        .await
        .unwrap();
    assert!(mined.is_none());
}

#[tokio::test]
async fn test_status_codes_classify_retryability() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({ "model": "test-model" })))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad prompt"))
        .mount(&mock_server)
        .await;

    let generator = generator_for(&mock_server);
    let server_error = generator.related_concepts("Physics").await.unwrap_err();
    assert!(server_error.is_retryable());
    assert!(server_error.to_string().contains("503"));

    let client_error = generator.related_concepts("Physics").await.unwrap_err();
    assert!(!client_error.is_retryable());
}

#[tokio::test]
async fn test_cached_generator_avoids_second_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
            "{\"name\": \"Glacier\", \"relation\": \"FORMS_FROM\", \"relatedTo\": \"Snow\"}",
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempdir().unwrap();
    let cache = Arc::new(ResponseCache::open(dir.path()).await.unwrap());
    let generator = CachedGenerator::new(Arc::new(generator_for(&mock_server)), cache);

    let first = generator.mine_relationship("Glacier", "Snow").await.unwrap();
    let second = generator.mine_relationship("Glacier", "Snow").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.unwrap().relation, "FORMS_FROM");
    assert!(dir.path().join("rel_Glacier_Snow.json").exists());
}
