//! Inspecting the program's own source and past conversation logs.

use super::{ToolServices, object_schema};
use crate::error::ToolError;
use crate::log::{LogRecord, list_runs, log_path, names, read_log};
use crate::postprocess::ConversationSummary;
use crate::tool::{ToolContext, ToolDefinition, ToolHandler, ToolRegistry, arg_i64, arg_str, failure};
use async_trait::async_trait;
use colloquy_core::RunId;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Runs compared when no ids are given.
const DEFAULT_THEME_RUNS: usize = 5;
const DEFAULT_LIST_LIMIT: i64 = 10;
const MAX_LIST_LIMIT: i64 = 50;
const SKIPPED_DIRS: &[&str] = &["target", "examples", "node_modules"];
const SOURCE_EXTENSIONS: &[&str] = &["rs", "toml"];

pub(super) fn register(registry: &mut ToolRegistry, services: &ToolServices) {
    registry.register(
        ToolDefinition::new(
            "get_main_source_codes",
            "Read the source code of the program that runs this conversation.",
        ),
        Arc::new(SourceCodes {
            source_dir: services.source_dir.clone(),
            max_bytes: services.max_source_bytes,
        }),
    );
    registry.register(
        ToolDefinition::new(
            "list_conversations",
            "List past conversations, newest first, with their titles when summarized.",
        )
        .with_parameters(object_schema(
            json!({ "limit": { "type": "integer", "description": "1 to 50, default 10." } }),
            &[],
        ))
        .lenient(),
        Arc::new(ListConversations {
            log_dir: services.log_dir.clone(),
        }),
    );
    registry.register(
        ToolDefinition::new(
            "get_conversation_summary",
            "Read the summary of a past conversation by run id.",
        )
        .with_parameters(object_schema(
            json!({ "run_id": { "type": "string" } }),
            &["run_id"],
        )),
        Arc::new(ConversationSummaryLookup {
            log_dir: services.log_dir.clone(),
        }),
    );
    registry.register(
        ToolDefinition::new(
            "compare_conversation_themes",
            "Compare the topics of several past conversations and list the topics they share. \
             Without run ids, the most recent summarized conversations are compared.",
        )
        .with_parameters(object_schema(
            json!({ "run_ids": { "type": "array", "items": { "type": "string" } } }),
            &[],
        ))
        .lenient(),
        Arc::new(CompareThemes {
            log_dir: services.log_dir.clone(),
        }),
    );
    registry.register(
        ToolDefinition::new(
            "get_tool_usage_stats",
            "Count tool calls per participant in a conversation, the latest one by default.",
        )
        .with_parameters(object_schema(
            json!({ "run_id": { "type": "string" } }),
            &[],
        ))
        .lenient(),
        Arc::new(ToolUsageStats {
            log_dir: services.log_dir.clone(),
        }),
    );
}

/// The latest summary recorded in a log.
fn summary_of(records: &[LogRecord]) -> Option<ConversationSummary> {
    records
        .iter()
        .rev()
        .find(|r| r.name == names::POSTPROC_SUMMARY)
        .and_then(|r| serde_json::from_str(&r.text).ok())
}

fn parse_run_id(raw: &str) -> Result<RunId, JsonValue> {
    raw.trim()
        .parse()
        .map_err(|e| failure(format!("invalid run id '{raw}': {e}")))
}

async fn records_of(log_dir: &Path, run_id: &RunId) -> Result<Vec<LogRecord>, JsonValue> {
    read_log(&log_path(log_dir, run_id))
        .await
        .map_err(|e| failure(format!("no log for run {run_id}: {e}")))
}

struct SourceCodes {
    source_dir: PathBuf,
    max_bytes: usize,
}

#[derive(Debug, Serialize)]
struct SourceFile {
    path: String,
    content: String,
}

/// Collects source files under `root`, sorted by path, within `max_bytes`.
async fn collect_sources(
    root: &Path,
    max_bytes: usize,
) -> std::io::Result<(Vec<SourceFile>, bool)> {
    let mut paths = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if !name.starts_with('.') && !SKIPPED_DIRS.contains(&name.as_str()) {
                    pending.push(path);
                }
            } else if file_type.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e))
            {
                paths.push(path);
            }
        }
    }
    paths.sort();

    let mut files = Vec::new();
    let mut total = 0;
    for path in paths {
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unreadable source file");
                continue;
            }
        };
        if total + content.len() > max_bytes {
            return Ok((files, true));
        }
        total += content.len();
        let relative = path.strip_prefix(root).unwrap_or(&path);
        files.push(SourceFile {
            path: relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            content,
        });
    }
    Ok((files, false))
}

#[async_trait]
impl ToolHandler for SourceCodes {
    #[instrument(skip_all, fields(side = %ctx.side))]
    async fn call(
        &self,
        ctx: &mut ToolContext<'_>,
        _args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        Ok(match collect_sources(&self.source_dir, self.max_bytes).await {
            Ok((files, truncated)) => {
                debug!(files = files.len(), truncated, "source files collected");
                json!({ "success": true, "files": files, "truncated": truncated })
            }
            Err(e) => failure(format!(
                "cannot read source directory {}: {e}",
                self.source_dir.display()
            )),
        })
    }
}

struct ListConversations {
    log_dir: PathBuf,
}

#[async_trait]
impl ToolHandler for ListConversations {
    async fn call(
        &self,
        _ctx: &mut ToolContext<'_>,
        args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        let limit = arg_i64(&args, "limit")
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let runs = match list_runs(&self.log_dir).await {
            Ok(runs) => runs,
            Err(e) => return Ok(failure(e)),
        };

        let mut conversations = Vec::new();
        for run_id in runs.into_iter().take(usize::try_from(limit).unwrap_or(1)) {
            let Ok(records) = records_of(&self.log_dir, &run_id).await else {
                continue;
            };
            let mut entry = json!({
                "run_id": run_id.as_str(),
                "messages": records.iter().filter(|r| r.speaker().is_some()).count(),
                "finished": records.iter().any(|r| r.name == names::EOF),
            });
            if let Some(summary) = summary_of(&records) {
                entry["title"] = json!(summary.title);
            }
            conversations.push(entry);
        }
        Ok(json!({ "success": true, "conversations": conversations }))
    }
}

struct ConversationSummaryLookup {
    log_dir: PathBuf,
}

#[async_trait]
impl ToolHandler for ConversationSummaryLookup {
    async fn call(
        &self,
        _ctx: &mut ToolContext<'_>,
        args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        let run_id = match parse_run_id(arg_str(&args, "run_id").unwrap_or_default()) {
            Ok(run_id) => run_id,
            Err(result) => return Ok(result),
        };
        let records = match records_of(&self.log_dir, &run_id).await {
            Ok(records) => records,
            Err(result) => return Ok(result),
        };
        Ok(match summary_of(&records) {
            Some(summary) => json!({ "success": true, "run_id": run_id.as_str(), "summary": summary }),
            None => failure(format!("run {run_id} has no summary")),
        })
    }
}

struct CompareThemes {
    log_dir: PathBuf,
}

impl CompareThemes {
    async fn recent_summaries(&self) -> Result<Vec<(RunId, ConversationSummary)>, JsonValue> {
        let runs = list_runs(&self.log_dir).await.map_err(failure)?;
        let mut found = Vec::new();
        for run_id in runs {
            if found.len() == DEFAULT_THEME_RUNS {
                break;
            }
            if let Ok(records) = records_of(&self.log_dir, &run_id).await
                && let Some(summary) = summary_of(&records)
            {
                found.push((run_id, summary));
            }
        }
        Ok(found)
    }

    async fn requested_summaries(
        &self,
        ids: &[JsonValue],
    ) -> Result<(Vec<(RunId, ConversationSummary)>, Vec<String>), JsonValue> {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for raw in ids.iter().filter_map(JsonValue::as_str) {
            let run_id = parse_run_id(raw)?;
            match records_of(&self.log_dir, &run_id).await {
                Ok(records) => match summary_of(&records) {
                    Some(summary) => found.push((run_id, summary)),
                    None => missing.push(run_id.to_string()),
                },
                Err(_) => missing.push(run_id.to_string()),
            }
        }
        Ok((found, missing))
    }
}

/// Topics that appear in at least two runs, normalized and sorted.
fn shared_topics(summaries: &[(RunId, ConversationSummary)]) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for (_, summary) in summaries {
        let topics: BTreeSet<String> = summary
            .topics
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        for topic in topics {
            *counts.entry(topic).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n >= 2)
        .map(|(topic, _)| topic)
        .collect()
}

#[async_trait]
impl ToolHandler for CompareThemes {
    async fn call(
        &self,
        _ctx: &mut ToolContext<'_>,
        args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        let requested = args
            .get("run_ids")
            .and_then(JsonValue::as_array)
            .filter(|ids| !ids.is_empty());
        let (summaries, missing) = match requested {
            Some(ids) => match self.requested_summaries(ids).await {
                Ok(found) => found,
                Err(result) => return Ok(result),
            },
            None => match self.recent_summaries().await {
                Ok(found) => (found, Vec::new()),
                Err(result) => return Ok(result),
            },
        };

        let runs: Vec<JsonValue> = summaries
            .iter()
            .map(|(run_id, summary)| {
                json!({ "run_id": run_id.as_str(), "title": summary.title, "topics": summary.topics })
            })
            .collect();
        Ok(json!({
            "success": true,
            "runs": runs,
            "shared_topics": shared_topics(&summaries),
            "missing": missing,
        }))
    }
}

/// Tool call counts keyed by actor, then tool.
pub type ToolUsage = BTreeMap<String, BTreeMap<String, u64>>;

#[derive(Debug, Serialize, Deserialize)]
struct UsageCache {
    log_bytes: u64,
    usage: ToolUsage,
}

/// Counts tool call records per actor and tool.
#[must_use]
pub fn count_tool_usage(records: &[LogRecord]) -> ToolUsage {
    let mut usage = ToolUsage::new();
    for record in records {
        let Some(side) = record.tool_caller() else {
            continue;
        };
        let tool = record
            .payload()
            .and_then(|p| p.get("tool").and_then(JsonValue::as_str).map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        *usage
            .entry(side.display_name().to_string())
            .or_default()
            .entry(tool)
            .or_default() += 1;
    }
    usage
}

struct ToolUsageStats {
    log_dir: PathBuf,
}

impl ToolUsageStats {
    fn cache_path(&self, run_id: &RunId) -> PathBuf {
        self.log_dir.join(format!("{run_id}.tools.json"))
    }

    async fn cached(&self, run_id: &RunId, log_bytes: u64) -> Option<ToolUsage> {
        let raw = tokio::fs::read_to_string(self.cache_path(run_id)).await.ok()?;
        let cache: UsageCache = serde_json::from_str(&raw).ok()?;
        (cache.log_bytes == log_bytes).then_some(cache.usage)
    }

    async fn store(&self, run_id: &RunId, cache: &UsageCache) {
        let path = self.cache_path(run_id);
        let result = match serde_json::to_string(cache) {
            Ok(body) => tokio::fs::write(&path, body).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to write tool usage cache");
        }
    }
}

#[async_trait]
impl ToolHandler for ToolUsageStats {
    async fn call(
        &self,
        _ctx: &mut ToolContext<'_>,
        args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        let run_id = match arg_str(&args, "run_id").filter(|s| !s.trim().is_empty()) {
            Some(raw) => match parse_run_id(raw) {
                Ok(run_id) => run_id,
                Err(result) => return Ok(result),
            },
            None => match list_runs(&self.log_dir).await {
                Ok(runs) => match runs.into_iter().next() {
                    Some(run_id) => run_id,
                    None => return Ok(failure("there are no conversations yet")),
                },
                Err(e) => return Ok(failure(e)),
            },
        };

        let path = log_path(&self.log_dir, &run_id);
        let log_bytes = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) => return Ok(failure(format!("no log for run {run_id}: {e}"))),
        };
        let usage = match self.cached(&run_id, log_bytes).await {
            Some(usage) => usage,
            None => {
                let records = match records_of(&self.log_dir, &run_id).await {
                    Ok(records) => records,
                    Err(result) => return Ok(result),
                };
                let usage = count_tool_usage(&records);
                self.store(
                    &run_id,
                    &UsageCache {
                        log_bytes,
                        usage: usage.clone(),
                    },
                )
                .await;
                usage
            }
        };
        Ok(json!({ "success": true, "run_id": run_id.as_str(), "usage": usage }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogWriter, tool_call_name, tool_result_name};
    use crate::tools::{build_registry, testing};
    use colloquy_core::Side;

    async fn write_run(log_dir: &Path, id: &str, summary: Option<JsonValue>, finished: bool) -> RunId {
        let run_id: RunId = id.parse().expect("run id");
        let writer = LogWriter::for_run(log_dir, &run_id);
        writer.append("OpenAI", "hello").await.expect("append");
        writer.append("Anthropic", "").await.expect("append");
        writer
            .append(&tool_call_name(Side::OpenAi), r#"{"tool":"sleep","args":{"seconds":1}}"#)
            .await
            .expect("append");
        writer
            .append(&tool_result_name(Side::OpenAi), r#"{"tool":"sleep","result":{}}"#)
            .await
            .expect("append");
        if let Some(summary) = summary {
            writer
                .append(names::POSTPROC_SUMMARY, &summary.to_string())
                .await
                .expect("append");
        }
        if finished {
            writer.append(names::EOF, "{}").await.expect("append");
        }
        run_id
    }

    fn summary(title: &str, topics: &[&str]) -> JsonValue {
        json!({ "title": title, "topics": topics, "japanese_summary": "要約" })
    }

    #[tokio::test]
    async fn lists_and_summarizes_runs() {
        let fixture = testing::fixture();
        let log_dir = fixture.services.log_dir.clone();
        write_run(&log_dir, "20250101-100000-000", None, false).await;
        write_run(&log_dir, "20250102-100000-000", Some(summary("Tea", &["tea"])), true).await;

        let registry = build_registry(&fixture.services);
        let mut state = testing::state();
        let mut ctx = ToolContext {
            side: Side::OpenAi,
            state: &mut state,
        };

        let listed = registry
            .dispatch(&mut ctx, "list_conversations", json!({}))
            .await
            .expect("list");
        let conversations = listed["conversations"].as_array().expect("array");
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[0]["run_id"], "20250102-100000-000");
        assert_eq!(conversations[0]["title"], "Tea");
        assert_eq!(conversations[0]["messages"], 2);
        assert_eq!(conversations[0]["finished"], true);
        assert!(conversations[1].get("title").is_none());

        let limited = registry
            .dispatch(&mut ctx, "list_conversations", json!({ "limit": 0 }))
            .await
            .expect("list");
        assert_eq!(limited["conversations"].as_array().expect("array").len(), 1);

        let found = registry
            .dispatch(&mut ctx, "get_conversation_summary", json!({ "run_id": "20250102-100000-000" }))
            .await
            .expect("summary");
        assert_eq!(found["summary"]["title"], "Tea");

        for run_id in ["20250101-100000-000", "../secrets", "20991231-000000-000"] {
            let result = registry
                .dispatch(&mut ctx, "get_conversation_summary", json!({ "run_id": run_id }))
                .await
                .expect("summary");
            assert_eq!(result["success"], false, "{run_id}");
        }
    }

    #[tokio::test]
    async fn shared_topics_need_two_runs() {
        let fixture = testing::fixture();
        let log_dir = fixture.services.log_dir.clone();
        write_run(&log_dir, "20250101-100000-000", Some(summary("A", &["Free will", "tea"])), true).await;
        write_run(&log_dir, "20250102-100000-000", Some(summary("B", &["free will ", "coffee"])), true).await;
        write_run(&log_dir, "20250103-100000-000", Some(summary("C", &["coffee", "Coffee"])), true).await;
        write_run(&log_dir, "20250104-100000-000", None, true).await;

        let registry = build_registry(&fixture.services);
        let mut state = testing::state();
        let mut ctx = ToolContext {
            side: Side::Anthropic,
            state: &mut state,
        };

        let all = registry
            .dispatch(&mut ctx, "compare_conversation_themes", json!({}))
            .await
            .expect("compare");
        assert_eq!(all["runs"].as_array().expect("runs").len(), 3);
        assert_eq!(all["shared_topics"], json!(["coffee", "free will"]));

        let pair = registry
            .dispatch(
                &mut ctx,
                "compare_conversation_themes",
                json!({ "run_ids": ["20250101-100000-000", "20250103-100000-000", "20250104-100000-000"] }),
            )
            .await
            .expect("compare");
        assert_eq!(pair["shared_topics"], json!([]));
        assert_eq!(pair["missing"], json!(["20250104-100000-000"]));
    }

    #[tokio::test]
    async fn tool_usage_is_counted_and_cached() {
        let fixture = testing::fixture();
        let log_dir = fixture.services.log_dir.clone();
        let run_id = write_run(&log_dir, "20250101-100000-000", None, false).await;

        let registry = build_registry(&fixture.services);
        let mut state = testing::state();
        let mut ctx = ToolContext {
            side: Side::OpenAi,
            state: &mut state,
        };

        let stats = registry
            .dispatch(&mut ctx, "get_tool_usage_stats", json!({}))
            .await
            .expect("stats");
        assert_eq!(stats["run_id"], "20250101-100000-000");
        assert_eq!(stats["usage"], json!({ "OpenAI": { "sleep": 1 } }));
        let cache_path = log_dir.join("20250101-100000-000.tools.json");
        assert!(cache_path.exists());

        LogWriter::for_run(&log_dir, &run_id)
            .append(&tool_call_name(Side::Anthropic), r#"{"tool":"ask_gemini","args":{}}"#)
            .await
            .expect("append");
        let stats = registry
            .dispatch(&mut ctx, "get_tool_usage_stats", json!({ "run_id": "20250101-100000-000" }))
            .await
            .expect("stats");
        assert_eq!(stats["usage"]["Anthropic"]["ask_gemini"], 1);

        let cached: JsonValue =
            serde_json::from_str(&std::fs::read_to_string(&cache_path).expect("cache")).expect("json");
        assert_eq!(cached["usage"]["Anthropic"]["ask_gemini"], 1);
    }

    #[tokio::test]
    async fn source_files_are_collected_and_capped() {
        let fixture = testing::fixture();
        let src = &fixture.services.source_dir;
        std::fs::create_dir_all(src.join("lib/core/src")).expect("mkdir");
        std::fs::create_dir_all(src.join("target/debug")).expect("mkdir");
        std::fs::create_dir_all(src.join(".git")).expect("mkdir");
        std::fs::write(src.join("Cargo.toml"), "[workspace]\n").expect("write");
        std::fs::write(src.join("lib/core/src/lib.rs"), "pub fn f() {}\n").expect("write");
        std::fs::write(src.join("target/debug/build.rs"), "junk").expect("write");
        std::fs::write(src.join(".git/config.toml"), "junk").expect("write");
        std::fs::write(src.join("README.md"), "# readme").expect("write");

        let registry = build_registry(&fixture.services);
        let mut state = testing::state();
        let mut ctx = ToolContext {
            side: Side::OpenAi,
            state: &mut state,
        };
        let result = registry
            .dispatch(&mut ctx, "get_main_source_codes", json!({}))
            .await
            .expect("sources");
        let paths: Vec<&str> = result["files"]
            .as_array()
            .expect("files")
            .iter()
            .map(|f| f["path"].as_str().expect("path"))
            .collect();
        assert_eq!(paths, vec!["Cargo.toml", "lib/core/src/lib.rs"]);
        assert_eq!(result["truncated"], false);

        let capped = build_registry(&fixture.services.clone().with_max_source_bytes(15));
        let result = capped
            .dispatch(&mut ctx, "get_main_source_codes", json!({}))
            .await
            .expect("sources");
        assert_eq!(result["files"].as_array().expect("files").len(), 1);
        assert_eq!(result["truncated"], true);
    }
}
