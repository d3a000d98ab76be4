//! Builtin tool set: filesystem access plus the system-health probe.
//!
//! Path safety (forbidden/allowed globs, size caps) is enforced by the
//! execution layer's policy check before these bodies run; the bodies only
//! do the work and shape structured JSON results.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::fs;

use helm_domain::{Mode, ParamType, RiskLevel, ToolDefinition, ToolParameter};
use helm_sensors::SensorHub;

use crate::registry::{ToolExec, ToolRegistry};

const FS_MODES: [Mode; 2] = [Mode::Normal, Mode::Alert];
const READ_MODES: [Mode; 3] = [Mode::Normal, Mode::Alert, Mode::Degraded];

fn string_param(name: &str, required: bool, description: &str) -> ToolParameter {
    ToolParameter {
        name: name.into(),
        kind: ParamType::String,
        required,
        default: None,
        description: description.into(),
    }
}

fn arg_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("argument '{key}' must be a string"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ReadFileTool;

#[async_trait]
impl ToolExec for ReadFileTool {
    async fn run(&self, args: Map<String, Value>) -> Result<Value, String> {
        let path = arg_str(&args, "path")?;
        let max_lines = args
            .get("max_lines")
            .and_then(Value::as_u64)
            .map(|n| n as usize);

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| format!("failed to read '{path}': {e}"))?;

        let total_lines = content.lines().count();
        let body = match max_lines {
            Some(limit) if total_lines > limit => {
                content.lines().take(limit).collect::<Vec<_>>().join("\n")
            }
            _ => content,
        };

        Ok(json!({
            "path": path,
            "content": body,
            "total_lines": total_lines,
            "truncated": max_lines.map(|l| total_lines > l).unwrap_or(false),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct WriteFileTool;

#[async_trait]
impl ToolExec for WriteFileTool {
    async fn run(&self, args: Map<String, Value>) -> Result<Value, String> {
        let path = arg_str(&args, "path")?;
        let content = arg_str(&args, "content")?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("failed to create parent of '{path}': {e}"))?;
        }

        // Write to a temp sibling and rename so readers never see a torn file.
        let tmp = format!("{path}.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| format!("failed to write '{path}': {e}"))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| format!("failed to move '{tmp}' into place: {e}"))?;

        Ok(json!({"path": path, "bytes_written": content.len()}))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// list_directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ListDirectoryTool;

#[async_trait]
impl ToolExec for ListDirectoryTool {
    async fn run(&self, args: Map<String, Value>) -> Result<Value, String> {
        let path = arg_str(&args, "path")?;
        let include_hidden = args
            .get("include_hidden")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut reader = fs::read_dir(path)
            .await
            .map_err(|e| format!("failed to list '{path}': {e}"))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| format!("failed to read entry in '{path}': {e}"))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !include_hidden && name.starts_with('.') {
                continue;
            }
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| format!("failed to stat '{name}': {e}"))?;
            entries.push(json!({
                "name": name,
                "is_dir": metadata.is_dir(),
                "size": metadata.len(),
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        Ok(json!({
            "path": path,
            "entries": entries,
            "count": entries.len(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// system_health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SystemHealthTool {
    hub: Arc<SensorHub>,
}

#[async_trait]
impl ToolExec for SystemHealthTool {
    async fn run(&self, _args: Map<String, Value>) -> Result<Value, String> {
        let metrics = self.hub.metrics_snapshot();
        Ok(json!({"metrics": metrics}))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Register the builtin tool set on a registry.
pub fn register_builtins(registry: &ToolRegistry, hub: Arc<SensorHub>) {
    registry.register_async(
        ToolDefinition {
            name: "read_file".into(),
            description: "Read a text file, optionally limited to the first N lines".into(),
            category: "filesystem".into(),
            parameters: vec![
                string_param("path", true, "Absolute path of the file to read"),
                ToolParameter {
                    name: "max_lines".into(),
                    kind: ParamType::Integer,
                    required: false,
                    default: None,
                    description: "Return at most this many lines".into(),
                },
            ],
            risk_level: RiskLevel::Low,
            allowed_modes: READ_MODES.to_vec(),
            timeout_seconds: 10,
            rate_limit_per_hour: None,
        },
        Arc::new(ReadFileTool),
    );

    registry.register_async(
        ToolDefinition {
            name: "write_file".into(),
            description: "Write text content to a file (atomic replace)".into(),
            category: "filesystem".into(),
            parameters: vec![
                string_param("path", true, "Absolute path of the file to write"),
                string_param("content", true, "Full file content"),
            ],
            risk_level: RiskLevel::Medium,
            allowed_modes: FS_MODES.to_vec(),
            timeout_seconds: 10,
            rate_limit_per_hour: None,
        },
        Arc::new(WriteFileTool),
    );

    registry.register_async(
        ToolDefinition {
            name: "list_directory".into(),
            description: "List directory entries with size and type".into(),
            category: "filesystem".into(),
            parameters: vec![
                string_param("path", true, "Directory to list"),
                ToolParameter {
                    name: "include_hidden".into(),
                    kind: ParamType::Boolean,
                    required: false,
                    default: Some(Value::Bool(false)),
                    description: "Include dotfiles".into(),
                },
            ],
            risk_level: RiskLevel::Low,
            allowed_modes: READ_MODES.to_vec(),
            timeout_seconds: 10,
            rate_limit_per_hour: None,
        },
        Arc::new(ListDirectoryTool),
    );

    registry.register_async(
        ToolDefinition {
            name: "system_health".into(),
            description: "Detailed system metrics snapshot (CPU, memory, disk, GPU)".into(),
            category: "diagnostics".into(),
            parameters: vec![],
            risk_level: RiskLevel::Low,
            allowed_modes: Mode::ALL.to_vec(),
            timeout_seconds: 15,
            rate_limit_per_hour: None,
        },
        Arc::new(SystemHealthTool { hub }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_sensors::SysinfoProbe;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn read_file_truncates_at_max_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();

        let result = ReadFileTool
            .run(args(json!({"path": path.to_str().unwrap(), "max_lines": 2})))
            .await
            .unwrap();
        assert_eq!(result["content"], "one\ntwo");
        assert_eq!(result["total_lines"], 3);
        assert_eq!(result["truncated"], true);
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/data.txt");
        let path_str = path.to_str().unwrap();

        let written = WriteFileTool
            .run(args(json!({"path": path_str, "content": "hello"})))
            .await
            .unwrap();
        assert_eq!(written["bytes_written"], 5);

        let read = ReadFileTool
            .run(args(json!({"path": path_str})))
            .await
            .unwrap();
        assert_eq!(read["content"], "hello");
    }

    #[tokio::test]
    async fn list_directory_skips_hidden_by_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("visible.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();

        let result = ListDirectoryTool
            .run(args(json!({"path": dir.path().to_str().unwrap()})))
            .await
            .unwrap();
        assert_eq!(result["count"], 1);
        assert_eq!(result["entries"][0]["name"], "visible.txt");

        let with_hidden = ListDirectoryTool
            .run(args(json!({
                "path": dir.path().to_str().unwrap(),
                "include_hidden": true
            })))
            .await
            .unwrap();
        assert_eq!(with_hidden["count"], 2);
    }

    #[tokio::test]
    async fn missing_file_is_a_string_error() {
        let err = ReadFileTool
            .run(args(json!({"path": "/nonexistent/definitely/missing"})))
            .await
            .unwrap_err();
        assert!(err.contains("failed to read"));
    }

    #[test]
    fn builtins_register_expected_names() {
        let registry = ToolRegistry::new();
        let hub = SensorHub::new(Box::new(SysinfoProbe::new()), None).into_shared();
        register_builtins(&registry, hub);
        assert_eq!(
            registry.list_names(),
            vec!["list_directory", "read_file", "system_health", "write_file"]
        );
    }
}
