use std::io;
use std::path::Path;

use crate::explainer::ExplainStats;
use crate::types::anomaly::{Anomaly, ExplanationOutcome};
use crate::types::summary::LoadSummary;

/// Where the report lands, relative to the working directory.
pub const REPORT_RELATIVE_PATH: &str = "reports/driftwatch_report.html";

/// Render the whole run as a static HTML document. Anomalies and
/// outcomes are positionally paired; a missing outcome renders as
/// unexplained.
pub fn render_report(
    summary: &LoadSummary,
    anomalies: &[Anomaly],
    explanations: &[ExplanationOutcome],
    stats: &ExplainStats,
) -> String {
    let mut html = String::new();
    html.push_str(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Metric drift report</title>\n<style>\n\
         body { font-family: sans-serif; margin: 2rem; }\n\
         table { border-collapse: collapse; width: 100%; }\n\
         th, td { border: 1px solid #ccc; padding: 0.4rem 0.6rem; text-align: left; }\n\
         th { background: #f0f0f0; }\n\
         .placeholder { color: #8a6d3b; }\n\
         .unexplained { color: #999; font-style: italic; }\n\
         .notice { background: #fcf8e3; padding: 0.6rem; border: 1px solid #faebcc; }\n\
         </style>\n</head>\n<body>\n<h1>Metric drift report</h1>\n",
    );

    if summary.truncated {
        html.push_str(
            "<p class=\"notice\">Partial coverage: loading was cut short by \
             sample/file limits or skipped files. Figures below reflect only \
             the data that was read.</p>\n",
        );
    }

    html.push_str("<h2>Load summary</h2>\n<ul>\n");
    html.push_str(&format!(
        "<li>Files attempted: {} (succeeded: {}, skipped: {})</li>\n",
        summary.files_attempted, summary.files_succeeded, summary.files_skipped
    ));
    html.push_str(&format!(
        "<li>Rows read: {} (malformed rows dropped: {})</li>\n",
        summary.rows_read, summary.rows_skipped
    ));
    html.push_str(&format!(
        "<li>Load mode: {}</li>\n",
        if summary.streaming { "streaming" } else { "eager" }
    ));
    if summary.cache_hits > 0 {
        html.push_str(&format!("<li>Tile cache hits: {}</li>\n", summary.cache_hits));
    }
    html.push_str("</ul>\n");

    if anomalies.is_empty() {
        html.push_str("<p>No anomalies detected.</p>\n</body>\n</html>\n");
        return html;
    }

    html.push_str(&format!(
        "<h2>Anomalies ({})</h2>\n\
         <p>Explanations: {} generated, {} placeholder, {} unexplained.</p>\n",
        anomalies.len(),
        stats.generated,
        stats.placeholders,
        stats.unexplained
    ));
    html.push_str(
        "<table>\n<tr><th>Series</th><th>Timestamp</th><th>Previous</th>\
         <th>Value</th><th>Change</th><th>Source</th><th>Explanation</th></tr>\n",
    );

    for (index, anomaly) in anomalies.iter().enumerate() {
        let explanation_cell = match explanations.get(index) {
            Some(ExplanationOutcome::Generated(text)) => escape(text),
            Some(ExplanationOutcome::Placeholder(reason)) => {
                format!("<span class=\"placeholder\">{}</span>", escape(reason.text()))
            }
            Some(ExplanationOutcome::Unexplained) | None => {
                "<span class=\"unexplained\">unexplained</span>".to_string()
            }
        };

        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&anomaly.series_id),
            escape(&format_timestamp(anomaly.timestamp)),
            anomaly.previous_value,
            anomaly.value,
            escape(&anomaly.change_label()),
            escape(&anomaly.source_file),
            explanation_cell
        ));
    }

    html.push_str("</table>\n</body>\n</html>\n");
    html
}

/// Write the report, creating parent directories as needed.
pub fn write_report(path: &Path, html: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, html)
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
