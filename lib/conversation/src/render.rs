//! Transcript rendering.

use crate::error::RenderError;
use crate::log::{LogRecord, names, read_log};
use crate::message::SILENCE_MARKER;
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::fmt::Write as _;
use std::path::Path;
use tracing::instrument;

/// Turns a finished log into a readable transcript.
#[async_trait]
pub trait TranscriptRenderer: Send + Sync {
    /// Renders the log at `log_path` into `output_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or the output written.
    async fn render(&self, log_path: &Path, output_path: &Path) -> Result<(), Report<RenderError>>;
}

/// Renders a standalone HTML page.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

const STYLE: &str = "body{font-family:sans-serif;max-width:50rem;margin:2rem auto;line-height:1.5}\
.record{margin:1rem 0;padding:.5rem 1rem;border-radius:.5rem}\
.openai{background:#eef6ee}.anthropic{background:#f6efe8}.moderator{background:#eee;font-size:.9em}\
.meta{color:#666;font-size:.8em}.silence{color:#888}pre{white-space:pre-wrap}";

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn pretty(record: &LogRecord) -> String {
    record
        .payload()
        .and_then(|p| serde_json::to_string_pretty(&p).ok())
        .unwrap_or_else(|| record.text.clone())
}

fn render_record(out: &mut String, record: &LogRecord) {
    let name = escape(&record.name);
    let date = escape(&record.date);
    if let Some(side) = record.speaker() {
        let body = if record.text.trim().is_empty() {
            format!("<em class=\"silence\">{SILENCE_MARKER}</em>")
        } else {
            escape(&record.text).replace('\n', "<br>\n")
        };
        let _ = writeln!(
            out,
            "<div class=\"record {}\"><div class=\"meta\">{name} &middot; {date}</div><p>{body}</p></div>",
            side.as_str()
        );
    } else if record.name == names::MODERATOR {
        let _ = writeln!(
            out,
            "<div class=\"record moderator\"><div class=\"meta\">{name} &middot; {date}</div><p>{}</p></div>",
            escape(&record.text)
        );
    } else {
        let _ = writeln!(
            out,
            "<details class=\"record\"><summary class=\"meta\">{name} &middot; {date}</summary><pre>{}</pre></details>",
            escape(&pretty(record))
        );
    }
}

/// Renders records into an HTML page.
#[must_use]
pub fn render_html(title: &str, records: &[LogRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{0}</title><style>{STYLE}</style></head><body>\n<h1>{0}</h1>",
        escape(title)
    );
    let headline = records
        .iter()
        .rev()
        .find(|r| r.name == names::POSTPROC_SUMMARY)
        .and_then(LogRecord::payload)
        .and_then(|p| p.get("title").and_then(|t| t.as_str()).map(str::to_string));
    if let Some(headline) = headline {
        let _ = writeln!(out, "<h2>{}</h2>", escape(&headline));
    }
    for record in records {
        render_record(&mut out, record);
    }
    out.push_str("</body></html>\n");
    out
}

#[async_trait]
impl TranscriptRenderer for HtmlRenderer {
    #[instrument(skip(self), fields(log = %log_path.display()))]
    async fn render(&self, log_path: &Path, output_path: &Path) -> Result<(), Report<RenderError>> {
        let failed = |reason: String| RenderError::Failed {
            path: output_path.display().to_string(),
            reason,
        };
        let records = read_log(log_path).await.map_err(|e| failed(e.to_string()))?;
        let title = log_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("conversation");
        tokio::fs::write(output_path, render_html(title, &records))
            .await
            .map_err(|e| failed(e.to_string()))?;
        Ok(())
    }
}
