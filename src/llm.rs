use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Machine-readable opinion extracted from the analysis' final line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComplianceOpinion {
    Compliant,
    NonCompliant,
    /// The analysis did not end with a verdict line.
    Unstated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceAnalysis {
    pub text: String,
    pub opinion: ComplianceOpinion,
}

/// External compliance reviewer. Callers bound each call with their own
/// timeout and treat errors as "still in progress", never as rejection.
#[async_trait]
pub trait ComplianceAnalyst: Send + Sync {
    async fn analyze(&self, document_text: &str) -> Result<ComplianceAnalysis>;
}

pub fn compliance_prompt(document_text: &str) -> String {
    format!(
        "Please verify this legal document for compliance and notary standards.\n\
         Focus on:\n\
         1. Presence and completeness of notary acknowledgment\n\
         2. Legal formatting and structure\n\
         3. Required signature blocks\n\
         4. Date and witness information\n\
         5. Any missing crucial legal elements\n\
         \n\
         Document Content:\n\
         {document_text}\n\
         \n\
         Provide a detailed analysis of compliance and validity. \
         End your answer with exactly one line: \
         `VERDICT: COMPLIANT` or `VERDICT: NON-COMPLIANT`."
    )
}

/// Read the last `VERDICT:` line of an analysis.
pub fn parse_opinion(analysis: &str) -> ComplianceOpinion {
    analysis
        .lines()
        .rev()
        .map(|line| line.trim().trim_matches(|c| c == '*' || c == '`').trim())
        .find_map(|line| {
            let upper = line.to_ascii_uppercase();
            let verdict = upper.strip_prefix("VERDICT:")?.trim().to_string();
            Some(match verdict.as_str() {
                "COMPLIANT" => ComplianceOpinion::Compliant,
                "NON-COMPLIANT" | "NONCOMPLIANT" | "NOT COMPLIANT" => ComplianceOpinion::NonCompliant,
                _ => ComplianceOpinion::Unstated,
            })
        })
        .unwrap_or(ComplianceOpinion::Unstated)
}

/// OpenAI-compatible chat completions client.
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:1234/v1".to_string());
        let model =
            dotenv::var("LLM_MODEL").unwrap_or_else(|_| "qwen/qwen3-8b".to_string());
        let api_key = dotenv::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            model,
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    /// Non-streaming chat completion.
    pub async fn chat(&self, messages: &[Message]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.7,
            "top_p": 0.8,
            "max_tokens": 8192,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("LLM request failed")?;
        let resp = resp.error_for_status().context("LLM endpoint returned an error")?;
        let text = resp.text().await.context("Failed to read LLM response")?;
        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse LLM JSON")?;

        // choices[0].message.content may be null
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .unwrap_or("")
            .to_string();

        Ok(content)
    }
}

#[async_trait]
impl ComplianceAnalyst for LlmClient {
    async fn analyze(&self, document_text: &str) -> Result<ComplianceAnalysis> {
        let messages = vec![Message {
            role: "user".to_string(),
            content: compliance_prompt(document_text),
        }];
        let text = self.chat(&messages).await?;
        if text.trim().is_empty() {
            anyhow::bail!("LLM returned an empty analysis");
        }
        let opinion = parse_opinion(&text);
        debug!(model = %self.model, ?opinion, chars = text.len(), "compliance analysis received");
        Ok(ComplianceAnalysis { text, opinion })
    }
}
