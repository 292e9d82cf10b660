use serde::{Deserialize, Serialize};

/// A point flagged because its change rate crossed the threshold.
/// Produced only by the detector; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub series_id: String,
    pub timestamp: i64,
    pub value: f64,
    pub previous_value: f64,
    /// Relative change from the previous point. Infinite when the
    /// previous value was zero and this one is not.
    pub change_rate: f64,
    /// The threshold in force when this point was flagged.
    pub threshold: f64,
    pub source_file: String,
}

impl Anomaly {
    /// Human-readable change rate, e.g. `-12.50%`. A transition from
    /// zero has no finite rate and is labelled as such.
    pub fn change_label(&self) -> String {
        if self.change_rate.is_infinite() {
            if self.change_rate > 0.0 {
                "jump from zero".to_string()
            } else {
                "drop from zero".to_string()
            }
        } else {
            format!("{:+.2}%", self.change_rate * 100.0)
        }
    }
}

/// Why a placeholder explanation was attached instead of generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderReason {
    /// Explanations were disabled for the run.
    Disabled,
    MissingApiKey,
    Timeout,
    AuthFailed,
    HttpStatus(u16),
    InvalidResponse,
    Network,
}

impl PlaceholderReason {
    /// The fixed text substituted for a generated explanation.
    pub fn text(&self) -> &'static str {
        match self {
            PlaceholderReason::Disabled => "Explanations disabled; none generated.",
            PlaceholderReason::MissingApiKey => "Explanation skipped (no OPENAI_API_KEY).",
            PlaceholderReason::Timeout => "Explanation request timed out.",
            PlaceholderReason::AuthFailed => "Explanation service rejected the API key.",
            PlaceholderReason::HttpStatus(_) => "Explanation service returned an error.",
            PlaceholderReason::InvalidResponse => {
                "Explanation service returned an unexpected response."
            }
            PlaceholderReason::Network => "Explanation service unreachable.",
        }
    }
}

/// Explanation state of a single anomaly. Anomalies past the explanation
/// cap stay `Unexplained`, which is distinct from a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationOutcome {
    Generated(String),
    Placeholder(PlaceholderReason),
    Unexplained,
}

impl ExplanationOutcome {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, ExplanationOutcome::Placeholder(_))
    }

    /// Text to show in the report, if any.
    pub fn display_text(&self) -> Option<&str> {
        match self {
            ExplanationOutcome::Generated(text) => Some(text),
            ExplanationOutcome::Placeholder(reason) => Some(reason.text()),
            ExplanationOutcome::Unexplained => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_anomaly(change_rate: f64) -> Anomaly {
        Anomaly {
            series_id: "checkout_latency".to_string(),
            timestamp: 1706800000,
            value: 40.0,
            previous_value: 80.0,
            change_rate,
            threshold: 0.05,
            source_file: "day1.csv".to_string(),
        }
    }

    #[test]
    fn change_label_formats_percent() {
        assert_eq!(sample_anomaly(-0.5).change_label(), "-50.00%");
        assert_eq!(sample_anomaly(0.125).change_label(), "+12.50%");
    }

    #[test]
    fn change_label_handles_infinite_rates() {
        assert_eq!(sample_anomaly(f64::INFINITY).change_label(), "jump from zero");
        assert_eq!(sample_anomaly(f64::NEG_INFINITY).change_label(), "drop from zero");
    }

    #[test]
    fn unexplained_has_no_display_text() {
        assert_eq!(ExplanationOutcome::Unexplained.display_text(), None);
        assert!(!ExplanationOutcome::Unexplained.is_placeholder());
    }

    #[test]
    fn placeholder_displays_fixed_text() {
        let outcome = ExplanationOutcome::Placeholder(PlaceholderReason::Disabled);
        assert!(outcome.is_placeholder());
        assert_eq!(
            outcome.display_text(),
            Some("Explanations disabled; none generated.")
        );
    }
}
