mod lifecycle;
mod llm;
mod scheduler;
mod telemetry;

pub use lifecycle::*;
pub use llm::*;
pub use scheduler::*;
pub use telemetry::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    Staging,
    Production,
    Test,
}

impl Default for AppEnv {
    fn default() -> Self {
        AppEnv::Development
    }
}

impl std::str::FromStr for AppEnv {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(AppEnv::Development),
            "staging" => Ok(AppEnv::Staging),
            "production" => Ok(AppEnv::Production),
            "test" => Ok(AppEnv::Test),
            other => Err(crate::Error::Config(format!("unknown APP_ENV \"{other}\""))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runtime settings, overridable through `AGENT_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app_env: AppEnv,
    /// Root of all persisted state (`telemetry/`, `costs.sqlite3`).
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
    /// Directory holding `modes.yaml`, `tools.yaml`, `models.yaml`,
    /// `safety.yaml`. Missing files are fatal at startup.
    #[serde(default = "d_governance_dir")]
    pub governance_dir: PathBuf,
    #[serde(default = "d_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub monitoring: MonitoringSettings,
    #[serde(default)]
    pub lifecycle: LifecycleSettings,
}

fn d_data_dir() -> PathBuf {
    PathBuf::from(".")
}
fn d_governance_dir() -> PathBuf {
    PathBuf::from("config/governance")
}
fn d_log_level() -> String {
    "info".into()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_env: AppEnv::default(),
            data_dir: d_data_dir(),
            governance_dir: d_governance_dir(),
            log_level: d_log_level(),
            llm: LlmSettings::default(),
            telemetry: TelemetrySettings::default(),
            scheduler: SchedulerSettings::default(),
            monitoring: MonitoringSettings::default(),
            lifecycle: LifecycleSettings::default(),
        }
    }
}

/// Request-monitor settings (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSettings {
    #[serde(default = "d_interval")]
    pub interval_seconds: f64,
    #[serde(default = "d_true")]
    pub include_gpu: bool,
}

fn d_interval() -> f64 {
    5.0
}
fn d_true() -> bool {
    true
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            interval_seconds: d_interval(),
            include_gpu: d_true(),
        }
    }
}

impl Settings {
    /// Apply `AGENT_*` / `APP_ENV` environment overrides on top of the
    /// current values. Unset variables leave settings untouched; malformed
    /// values are reported as issues by `validate()` rather than panicking.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("APP_ENV") {
            if let Ok(env) = v.parse() {
                self.app_env = env;
            } else {
                tracing::warn!(value = %v, "ignoring unknown APP_ENV");
            }
        }
        if let Ok(v) = std::env::var("AGENT_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AGENT_GOVERNANCE_DIR") {
            self.governance_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AGENT_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("AGENT_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("AGENT_INDEX_URL") {
            self.telemetry.index_url = Some(v);
        }
        if let Ok(v) = std::env::var("AGENT_SECOND_BRAIN_ENABLED") {
            match v.as_str() {
                "1" | "true" | "yes" => self.scheduler.second_brain_enabled = true,
                "0" | "false" | "no" => self.scheduler.second_brain_enabled = false,
                other => tracing::warn!(value = %other, "ignoring AGENT_SECOND_BRAIN_ENABLED"),
            }
        }
    }

    // ── Derived paths ──────────────────────────────────────────────

    pub fn telemetry_root(&self) -> PathBuf {
        self.data_dir.join("telemetry")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.telemetry_root().join("logs")
    }

    pub fn captains_log_dir(&self) -> PathBuf {
        self.telemetry_root().join("captains_log")
    }

    pub fn captures_dir(&self) -> PathBuf {
        self.captains_log_dir().join("captures")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.telemetry_root().join("archive")
    }

    pub fn cost_db_path(&self) -> PathBuf {
        self.data_dir.join("costs.sqlite3")
    }

    /// Validate the settings and return a list of issues; startup aborts
    /// when any has `Error` severity.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.llm.base_url.is_empty() {
            issues.push(ConfigIssue::error("llm.base_url", "must not be empty"));
        } else if !self.llm.base_url.starts_with("http://")
            && !self.llm.base_url.starts_with("https://")
        {
            issues.push(ConfigIssue::error(
                "llm.base_url",
                format!("must start with http:// or https:// (got \"{}\")", self.llm.base_url),
            ));
        }

        if let Some(url) = &self.telemetry.index_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                issues.push(ConfigIssue::error(
                    "telemetry.index_url",
                    format!("must start with http:// or https:// (got \"{url}\")"),
                ));
            }
        } else {
            issues.push(ConfigIssue::warning(
                "telemetry.index_url",
                "no search index configured; events stay local and backfill is a no-op",
            ));
        }

        if self.monitoring.interval_seconds <= 0.0 {
            issues.push(ConfigIssue::error(
                "monitoring.interval_seconds",
                "must be greater than 0",
            ));
        }

        if self.scheduler.check_interval_seconds == 0 {
            issues.push(ConfigIssue::error(
                "scheduler.check_interval_seconds",
                "must be greater than 0",
            ));
        }

        if !(0.0..=100.0).contains(&self.lifecycle.disk_usage_alert_percent) {
            issues.push(ConfigIssue::error(
                "lifecycle.disk_usage_alert_percent",
                "must be within 0-100",
            ));
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}
