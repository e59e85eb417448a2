//! Conversation log.
//!
//! Every run appends `{date, name, text}` records, one JSON object per line,
//! to `<log_dir>/<run_id>.jsonl`. The log is the system of record: the
//! transcript renderer, the summary lookup, theme comparison and tool usage
//! statistics all read it back.

use crate::error::LogError;
use chrono::Local;
use colloquy_core::{RunId, Side};
use rootcause::prelude::Report;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::{instrument, warn};

/// Record names that are not a side speaking.
pub mod names {
    /// Moderator remarks.
    pub const MODERATOR: &str = "Moderator";
    /// The structured summary.
    pub const POSTPROC_SUMMARY: &str = "POSTPROC_SUMMARY";
    /// The extracted graph.
    pub const POSTPROC_GRAPH: &str = "POSTPROC_GRAPH";
    /// Graph write statistics.
    pub const POSTPROC_NEO4J: &str = "POSTPROC_NEO4J";
    /// A postprocessing failure.
    pub const POSTPROC_ERROR: &str = "POSTPROC_ERROR";
    /// Terminal record with run statistics.
    pub const EOF: &str = "EOF";
}

const TOOL_CALL_SUFFIX: &str = " (tool call)";
const TOOL_RESULT_SUFFIX: &str = " (tool result)";
const THINKING_SUFFIX: &str = " (thinking)";

/// Name of a side's tool call record.
#[must_use]
pub fn tool_call_name(side: Side) -> String {
    format!("{}{TOOL_CALL_SUFFIX}", side.display_name())
}

/// Name of a side's tool result record.
#[must_use]
pub fn tool_result_name(side: Side) -> String {
    format!("{}{TOOL_RESULT_SUFFIX}", side.display_name())
}

/// Name of a side's thinking record.
#[must_use]
pub fn thinking_name(side: Side) -> String {
    format!("{}{THINKING_SUFFIX}", side.display_name())
}

/// Accepts `text` either as a string or as inline JSON.
fn text_or_json<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => s,
        JsonValue::Null => String::new(),
        other => other.to_string(),
    })
}

/// One line of the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// RFC 3339 local timestamp.
    pub date: String,
    /// Who or what the record is about.
    pub name: String,
    /// Utterance text, or a JSON document for structured records.
    #[serde(default, deserialize_with = "text_or_json")]
    pub text: String,
}

impl LogRecord {
    /// Creates a record stamped now.
    #[must_use]
    pub fn now(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            date: Local::now().to_rfc3339(),
            name: name.into(),
            text: text.into(),
        }
    }

    /// Parses the text as JSON.
    #[must_use]
    pub fn payload(&self) -> Option<JsonValue> {
        serde_json::from_str(&self.text).ok()
    }

    /// Returns the side if this is an utterance.
    #[must_use]
    pub fn speaker(&self) -> Option<Side> {
        Side::ALL.into_iter().find(|s| s.display_name() == self.name)
    }

    /// Returns the side if this is a tool call record.
    #[must_use]
    pub fn tool_caller(&self) -> Option<Side> {
        Side::from_name(self.name.strip_suffix(TOOL_CALL_SUFFIX)?)
    }
}

/// Returns the log path of a run.
#[must_use]
pub fn log_path(log_dir: &Path, run_id: &RunId) -> PathBuf {
    log_dir.join(format!("{run_id}.jsonl"))
}

/// Appends records to one run's log.
///
/// Clones share the sealed flag: once any clone seals the log, all of them
/// refuse further records.
#[derive(Debug, Clone)]
pub struct LogWriter {
    path: PathBuf,
    sealed: Arc<AtomicBool>,
}

impl LogWriter {
    /// Creates a writer for `path`. The file is created on first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sealed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a writer for a run under `log_dir`.
    #[must_use]
    pub fn for_run(log_dir: &Path, run_id: &RunId) -> Self {
        Self::new(log_path(log_dir, run_id))
    }

    /// Returns the log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stops accepting records.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    /// Returns true once sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns an error once sealed or when the file cannot be written.
    #[instrument(skip(self, text), fields(path = %self.path.display()))]
    pub async fn append(&self, name: &str, text: &str) -> Result<(), Report<LogError>> {
        let path = self.path.display().to_string();
        if self.is_sealed() {
            return Err(LogError::Sealed { path }.into());
        }
        let write_failed = |e: String| LogError::WriteFailed {
            path: path.clone(),
            reason: e,
        };

        let mut line = serde_json::to_string(&LogRecord::now(name, text))
            .map_err(|e| write_failed(e.to_string()))?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_failed(e.to_string()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| write_failed(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| write_failed(e.to_string()))?;
        file.flush().await.map_err(|e| write_failed(e.to_string()))?;
        Ok(())
    }

    /// Appends a record, downgrading failures to a warning.
    ///
    /// Used on the turn path, where a log hiccup must not cost the turn.
    pub async fn record(&self, name: &str, text: &str) {
        if self.is_sealed() {
            return;
        }
        if let Err(e) = self.append(name, text).await {
            warn!(error = %e, name, "failed to append log record");
        }
    }

    /// Appends a record whose text is a JSON document.
    pub async fn record_json(&self, name: &str, value: &JsonValue) {
        self.record(name, &value.to_string()).await;
    }
}

/// Reads every record of a log. Lines that are not records are skipped.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn read_log(path: &Path) -> Result<Vec<LogRecord>, Report<LogError>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| LogError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping malformed log line");
                None
            }
        })
        .collect())
}

/// Lists the runs that have a log under `log_dir`, newest first.
///
/// Files whose stem is not a run id are ignored.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub async fn list_runs(log_dir: &Path) -> Result<Vec<RunId>, Report<LogError>> {
    let read_failed = |e: std::io::Error| LogError::ReadFailed {
        path: log_dir.display().to_string(),
        reason: e.to_string(),
    };
    let mut entries = match tokio::fs::read_dir(log_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(read_failed(e).into()),
    };

    let mut runs = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_failed)? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        if let Some(run_id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<RunId>().ok())
        {
            runs.push(run_id);
        }
    }
    // Run ids are timestamps, so lexical order is chronological.
    runs.sort_by(|a, b| b.as_str().cmp(a.as_str()));
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_are_appended_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_id = RunId::generate();
        let writer = LogWriter::for_run(dir.path(), &run_id);

        writer.append("OpenAI", "hello").await.expect("append");
        writer
            .append(&tool_call_name(Side::Anthropic), r#"{"tool":"sleep","args":{}}"#)
            .await
            .expect("append");

        let records = read_log(writer.path()).await.expect("read");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].speaker(), Some(Side::OpenAi));
        assert_eq!(records[1].tool_caller(), Some(Side::Anthropic));
        assert_eq!(records[1].payload().expect("json")["tool"], "sleep");
        assert!(chrono::DateTime::parse_from_rfc3339(&records[0].date).is_ok());
    }

    #[tokio::test]
    async fn sealed_log_refuses_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = LogWriter::new(dir.path().join("x.jsonl"));
        writer.append("OpenAI", "before").await.expect("append");

        let clone = writer.clone();
        writer.seal();
        assert!(clone.append("OpenAI", "after").await.is_err());
        clone.record("OpenAI", "after").await;

        assert_eq!(read_log(writer.path()).await.expect("read").len(), 1);
    }

    #[tokio::test]
    async fn reader_accepts_inline_json_text_and_skips_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("x.jsonl");
        std::fs::write(
            &path,
            "{\"date\":\"2025-01-01T00:00:00+00:00\",\"name\":\"EOF\",\"text\":{\"reason\":\"token_limit\"}}\nnot json\n\n",
        )
        .expect("write");

        let records = read_log(&path).await.expect("read");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload().expect("json")["reason"], "token_limit");
    }

    #[tokio::test]
    async fn runs_are_listed_newest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in [
            "20250101-120000-000.jsonl",
            "20250301-120000-000.jsonl",
            "20250201-120000-000.jsonl",
            "20250201-120000-000.tools.json",
            "notes.jsonl",
        ] {
            std::fs::write(dir.path().join(name), "").expect("write");
        }

        let runs = list_runs(dir.path()).await.expect("list");
        let ids: Vec<&str> = runs.iter().map(RunId::as_str).collect();
        assert_eq!(
            ids,
            vec!["20250301-120000-000", "20250201-120000-000", "20250101-120000-000"]
        );
        assert!(list_runs(&dir.path().join("missing")).await.expect("list").is_empty());
    }
}
