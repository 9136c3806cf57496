//! Shared client for the external LLM used by the Sanitiser and
//! PolicyClassifier stages. Both call an OpenAI-compatible
//! `/v1/chat/completions` endpoint and both need a hard per-call timeout,
//! grounded in the teacher's `external_guardrail::check_with_timeout`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

const CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier request timed out after {0:?}")]
    Timeout(Duration),
    #[error("classifier transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("classifier returned malformed response")]
    MalformedResponse,
}

#[derive(Debug, Deserialize, Default)]
pub struct SensitiveDataReport {
    #[serde(default)]
    pub email: Vec<String>,
    #[serde(default)]
    pub ipv4: Vec<String>,
    #[serde(default)]
    pub iban: Vec<String>,
}

#[derive(Clone)]
pub struct ClassifierClient {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl ClassifierClient {
    pub fn new(http: reqwest::Client, api_url: String, api_key: Option<String>) -> Self {
        Self { http, api_url, api_key }
    }

    async fn chat_completion(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String, ClassifierError> {
        let call = async {
            let mut req = self.http.post(&self.api_url).json(&serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": prompt}],
                "max_tokens": max_tokens,
                "temperature": temperature,
            }));
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req.send().await?;
            let status = resp.status();
            let raw: Value = resp.json().await?;

            if !status.is_success() {
                return Err(ClassifierError::MalformedResponse);
            }

            raw.get("choices")
                .and_then(|c| c.as_array())
                .and_then(|a| a.first())
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
                .map(|s| s.trim().to_string())
                .ok_or(ClassifierError::MalformedResponse)
        };

        tokio::time::timeout(CLASSIFIER_TIMEOUT, call)
            .await
            .unwrap_or(Err(ClassifierError::Timeout(CLASSIFIER_TIMEOUT)))
    }

    /// Ask the classifier which sensitive-data categories appear in `text`.
    /// Returns the three category lists exactly as the classifier reports
    /// them; callers validate each element against its category's own
    /// pattern before trusting it (the classifier's categorisation can be
    /// wrong about format, never about presence).
    pub async fn detect_sensitive_data(&self, text: &str) -> Result<SensitiveDataReport, ClassifierError> {
        let prompt = format!(
            "Identify sensitive data in the text below. Respond with ONLY a JSON object \
             of the form {{\"email\":[...],\"ipv4\":[...],\"iban\":[...]}} listing every \
             matching substring found for each category. Use empty arrays for categories \
             with no matches. Do not include any other text.\n\nTEXT:\n{text}"
        );

        let content = self.chat_completion(&prompt, 0.0, 512).await?;
        serde_json::from_str(&content).map_err(|_| ClassifierError::MalformedResponse)
    }

    /// Single-token FINANCIAL / NON_FINANCIAL classification at temperature 0.
    pub async fn classify_financial(&self, text: &str, strict: bool) -> Result<bool, ClassifierError> {
        let prompt = if strict {
            format!(
                "You are a strict financial-content classifier. Reply with exactly one \
                 word, FINANCIAL or NON_FINANCIAL. Only reply FINANCIAL if the text \
                 unambiguously discusses a financial transaction, account, or instrument.\n\n{text}"
            )
        } else {
            format!(
                "Classify the following text. Reply with exactly one word, FINANCIAL or \
                 NON_FINANCIAL.\n\n{text}"
            )
        };

        let content = self.chat_completion(&prompt, 0.0, 10).await?;
        Ok(content.trim().eq_ignore_ascii_case("FINANCIAL"))
    }
}
