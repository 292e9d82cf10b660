use std::time::Duration;

use serde_json::json;
use tracing::warn;

use crate::types::anomaly::{Anomaly, ExplanationOutcome, PlaceholderReason};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const MAX_COMPLETION_TOKENS: u32 = 256;

#[derive(Debug, Clone)]
pub struct ExplainerConfig {
    /// Skip the external service entirely; every anomaly gets a
    /// placeholder and zero calls are made.
    pub disabled: bool,
    /// Explain at most this many anomalies; `None` explains all.
    pub max_anomalies: Option<usize>,
    pub model: String,
    pub endpoint: String,
    /// Bound on each individual call.
    pub timeout: Duration,
    /// Free-form context line woven into every prompt.
    pub context: String,
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            max_anomalies: Some(100),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
            context: "metric export validation".to_string(),
        }
    }
}

/// How the explanation pass went, for the run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExplainStats {
    pub generated: usize,
    pub placeholders: usize,
    pub unexplained: usize,
}

/// Attach an explanation outcome to every anomaly, in input order.
///
/// The first `max_anomalies` anomalies are sent to the service one at a
/// time, each call bounded by the configured timeout; every failure
/// degrades to a typed placeholder rather than an error. Anomalies past
/// the cap stay `Unexplained`. Service errors never propagate.
pub async fn explain_anomalies(
    anomalies: &[Anomaly],
    config: &ExplainerConfig,
) -> (Vec<ExplanationOutcome>, ExplainStats) {
    let mut stats = ExplainStats::default();

    if config.disabled {
        stats.placeholders = anomalies.len();
        let outcomes =
            vec![ExplanationOutcome::Placeholder(PlaceholderReason::Disabled); anomalies.len()];
        return (outcomes, stats);
    }

    let cap = config.max_anomalies.unwrap_or(anomalies.len());
    let provider = HttpExplainer::from_env(config);
    if let Err(reason) = &provider {
        warn!("explanation service unavailable ({reason:?}); using placeholders");
    }

    let mut outcomes = Vec::with_capacity(anomalies.len());
    for (index, anomaly) in anomalies.iter().enumerate() {
        if index >= cap {
            stats.unexplained += 1;
            outcomes.push(ExplanationOutcome::Unexplained);
            continue;
        }

        let outcome = match &provider {
            Ok(p) => p.explain(anomaly, &config.context).await,
            Err(reason) => Err(reason.clone()),
        };
        match outcome {
            Ok(text) => {
                stats.generated += 1;
                outcomes.push(ExplanationOutcome::Generated(text));
            }
            Err(reason) => {
                warn!(
                    "explanation for {} at {} degraded to placeholder: {reason:?}",
                    anomaly.series_id, anomaly.timestamp
                );
                stats.placeholders += 1;
                outcomes.push(ExplanationOutcome::Placeholder(reason));
            }
        }
    }

    (outcomes, stats)
}

/// OpenAI-compatible chat-completions caller. Construction fails softly
/// (as a placeholder reason) so offline runs degrade instead of erroring.
struct HttpExplainer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl HttpExplainer {
    fn from_env(config: &ExplainerConfig) -> Result<Self, PlaceholderReason> {
        let api_key =
            std::env::var("OPENAI_API_KEY").map_err(|_| PlaceholderReason::MissingApiKey)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|_| PlaceholderReason::Network)?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            timeout: config.timeout,
        })
    }

    async fn explain(&self, anomaly: &Anomaly, context: &str) -> Result<String, PlaceholderReason> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": build_prompt(anomaly, context)}],
            "max_tokens": MAX_COMPLETION_TOKENS,
        });

        let send = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Err(_) => return Err(PlaceholderReason::Timeout),
            Ok(Err(e)) if e.is_timeout() => return Err(PlaceholderReason::Timeout),
            Ok(Err(_)) => return Err(PlaceholderReason::Network),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(PlaceholderReason::AuthFailed);
        }
        if !status.is_success() {
            return Err(PlaceholderReason::HttpStatus(status.as_u16()));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|_| PlaceholderReason::InvalidResponse)?;
        extract_content(&value).ok_or(PlaceholderReason::InvalidResponse)
    }
}

fn build_prompt(anomaly: &Anomaly, context: &str) -> String {
    format!(
        "The metric '{}' changed by {} (from {} to {}) at timestamp {}. \
         Context: {}. In two or three sentences, explain plausible causes.",
        anomaly.series_id,
        anomaly.change_label(),
        anomaly.previous_value,
        anomaly.value,
        anomaly.timestamp,
        context
    )
}

/// Pull the completion text out of the response. SDK response shapes
/// drift, so accept both the chat and the legacy `text` layout.
fn extract_content(value: &serde_json::Value) -> Option<String> {
    let choice = value.get("choices")?.get(0)?;
    if let Some(content) = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    {
        return Some(content.to_string());
    }
    choice
        .get("text")
        .and_then(|t| t.as_str())
        .map(str::to_string)
}
