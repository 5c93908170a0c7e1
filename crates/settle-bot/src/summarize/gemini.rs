//! Gemini (Generative Language API) summarizer.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Value, json};
use settle_core::config::{Config, resolve_secret};
use tracing::debug;

use super::{GroupAnalysis, Summarizer, ThreadAnalysis};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const MAX_OUTPUT_TOKENS: u32 = 2048;
const THREAD_TEMPERATURE: f64 = 0.4;
const GROUP_TEMPERATURE: f64 = 0.3;

const THREAD_PROMPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/thread_analysis.md"
));
const GROUP_PROMPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/group_analysis.md"
));

/// Persona primer sent ahead of each request.
struct Primer {
    role: &'static str,
    acknowledgement: &'static str,
    transcript_heading: &'static str,
}

const THREAD_PRIMER: Primer = Primer {
    role: "You are an expert at analyzing Slack threads.",
    acknowledgement: "Understood. I will analyze the thread and return its summary, key points, \
                      decisions and action items as structured JSON.",
    transcript_heading: "=== Thread ===",
};

const GROUP_PRIMER: Primer = Primer {
    role: "You are an expert at analyzing groups of Slack messages.",
    acknowledgement: "Understood. I will classify the message group and extract Q&A, decisions \
                      and required actions as structured JSON.",
    transcript_heading: "=== Message group ===",
};

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, base_url: Option<&str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model,
        }
    }

    /// Builds a client from `[summarizer]`, falling back to `SETTLE_GEMINI_API_KEY`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = resolve_secret(config.summarizer.api_key.as_deref(), "SETTLE_GEMINI_API_KEY")
            .ok_or_else(|| anyhow!("summarizer.api_key or SETTLE_GEMINI_API_KEY is required"))?;
        Ok(Self::new(
            api_key,
            config.summarizer.model.clone(),
            config.summarizer.base_url.as_deref(),
        ))
    }

    async fn generate(
        &self,
        primer: &Primer,
        instructions: &str,
        transcript: &str,
        temperature: f64,
    ) -> Result<String> {
        let prompt = format!(
            "{}\n\n{}\n{}",
            instructions.trim(),
            primer.transcript_heading,
            transcript
        );
        let request = json!({
            "contents": [
                {"role": "user", "parts": [{"text": primer.role}]},
                {"role": "model", "parts": [{"text": primer.acknowledgement}]},
                {"role": "user", "parts": [{"text": prompt}]}
            ],
            "generationConfig": {
                "temperature": temperature,
                "topP": 0.8,
                "topK": 40,
                "maxOutputTokens": MAX_OUTPUT_TOKENS
            }
        });
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .http
            .post(url)
            .headers(build_headers(&self.api_key))
            .json(&request)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("read Gemini response body")?;
        if !status.is_success() {
            bail!("Gemini returned {status}: {body}");
        }

        let value: Value = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse Gemini response JSON: {body}"))?;
        let text = response_text(&value)
            .ok_or_else(|| anyhow!("Gemini response has no text candidate"))?;
        debug!(model = %self.model, chars = text.len(), "received Gemini reply");
        Ok(text)
    }
}

#[async_trait]
impl Summarizer for GeminiClient {
    async fn analyze_thread(&self, transcript: &str) -> Result<ThreadAnalysis> {
        let reply = self
            .generate(&THREAD_PRIMER, THREAD_PROMPT, transcript, THREAD_TEMPERATURE)
            .await?;
        Ok(ThreadAnalysis::parse(&reply))
    }

    async fn analyze_group(&self, transcript: &str) -> Result<GroupAnalysis> {
        let reply = self
            .generate(&GROUP_PRIMER, GROUP_PROMPT, transcript, GROUP_TEMPERATURE)
            .await?;
        Ok(GroupAnalysis::parse(&reply))
    }
}

fn build_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-goog-api-key",
        HeaderValue::from_str(api_key).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers
}

/// Concatenated text parts of the first candidate.
fn response_text(value: &Value) -> Option<String> {
    let parts = value
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}
