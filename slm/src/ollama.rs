//! Client for an Ollama-style `/api/generate` endpoint.

use crate::generator::ConceptGenerator;
use async_trait::async_trait;
use kgraph_core::config::LlmConfig;
use kgraph_core::model::{MinedRelationship, RelatedConcept};
use kgraph_core::{KgError, KgResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const NO_RELATIONSHIP: &str = "no relationship";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct GenerateFrame {
    #[serde(default)]
    response: String,
}

pub struct OllamaGenerator {
    client: Client,
    url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> KgResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KgError::config("failed to create HTTP client").with_source(e))?;
        let url = url.into();
        let model = model.into();

        info!("Initializing Ollama generator: url={}, model={}", url, model);
        Ok(Self { client, url, model })
    }

    pub fn from_config(config: &LlmConfig) -> KgResult<Self> {
        Self::new(&config.url, &config.model, config.request_timeout())
    }

    /// Sends one prompt and returns the concatenated `response` fields of the NDJSON stream.
    async fn generate(&self, prompt: &str) -> KgResult<String> {
        let start = Instant::now();
        let request = GenerateRequest {
            model: &self.model,
            prompt,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| KgError::generative_text("request failed").with_source(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(
                KgError::generative_text(format!("service returned {}: {}", status, body))
                    .with_retryable(status.is_server_error()),
            );
        }

        let body = response
            .text()
            .await
            .map_err(|e| KgError::generative_text("error reading response").with_source(e))?;

        let text = collect_frames(&body);
        debug!(
            response_len = text.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "generation complete"
        );
        Ok(text)
    }
}

#[async_trait]
impl ConceptGenerator for OllamaGenerator {
    async fn related_concepts(&self, concept: &str) -> KgResult<Vec<RelatedConcept>> {
        let text = self.generate(&related_prompt(concept)).await?;
        parse_related(&text)
    }

    async fn mine_relationship(
        &self,
        source: &str,
        target: &str,
    ) -> KgResult<Option<MinedRelationship>> {
        let text = self.generate(&relationship_prompt(source, target)).await?;
        parse_relationship(&text)
    }
}

fn related_prompt(concept: &str) -> String {
    format!(
        "You are an ontologist and answer only in JSON.\n\
         List 5 concepts related to '{concept}'. For each give the relationship type \
         from '{concept}' to it.\n\
         Return ONLY a JSON array of objects with 'name', 'relation' and 'relatedTo' keys, \
         for example:\n\
         [{{\"name\": \"Related Concept\", \"relation\": \"RELATION_TYPE\", \"relatedTo\": \"{concept}\"}}]\n\
         No explanations, no markdown."
    )
}

fn relationship_prompt(source: &str, target: &str) -> String {
    format!(
        "You are an ontologist and answer only in JSON.\n\
         Is there a relationship from '{source}' to '{target}'? If so give its type.\n\
         Return ONLY a JSON object with 'name', 'relation' and 'relatedTo' keys, for example:\n\
         {{\"name\": \"{target}\", \"relation\": \"RELATION_TYPE\", \"relatedTo\": \"{source}\"}}\n\
         If there is none, return {{\"name\": \"\", \"relation\": \"\", \"relatedTo\": \"\"}}.\n\
         No explanations, no markdown."
    )
}

/// Joins the `response` field of every NDJSON line. Lines that are not frames are skipped.
pub fn collect_frames(body: &str) -> String {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<GenerateFrame>(line).ok())
        .map(|frame| frame.response)
        .collect()
}

/// Slice from the first `open` to the last `close`, ignoring prose or fences around it.
pub fn extract_json(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_related(text: &str) -> KgResult<Vec<RelatedConcept>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let json = extract_json(text, '[', ']').ok_or_else(|| unparsable("concept list", text))?;
    serde_json::from_str(json).map_err(|e| unparsable("concept list", text).with_source(e))
}

pub fn parse_relationship(text: &str) -> KgResult<Option<MinedRelationship>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let Some(json) = extract_json(trimmed, '{', '}') else {
        if trimmed.to_lowercase().contains(NO_RELATIONSHIP) {
            return Ok(None);
        }
        return Err(unparsable("relationship", text));
    };

    let mined: MinedRelationship =
        serde_json::from_str(json).map_err(|e| unparsable("relationship", text).with_source(e))?;
    let relation = mined.relation.trim();
    if relation.is_empty() || relation.eq_ignore_ascii_case(NO_RELATIONSHIP) {
        return Ok(None);
    }
    Ok(Some(mined))
}

fn unparsable(what: &str, raw: &str) -> KgError {
    warn!("raw generative response: {}", raw);
    KgError::generative_text(format!("unparsable {} in response", what)).with_retryable(false)
}
