use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const ENABLED_KEYS: [&str; 2] = ["AGENT_SDK_OBSERVABILITY_ENABLED", "AGENT_SDK_OBSERVABILITY"];
const LOG_LEVEL_KEY: &str = "AGENT_SDK_LOG_LEVEL";
const JSON_LOG_PATH_KEY: &str = "AGENT_SDK_JSON_LOG_PATH";
const DEFAULT_LOG_FILE: &str = "agent-sdk.logs.jsonl";

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservabilitySettings {
    pub enabled: bool,
    /// Filter directive; `None` falls back to `RUST_LOG`, then `info`.
    pub level: Option<String>,
    /// JSONL output file; `None` logs compactly to stderr.
    pub json_log_path: Option<PathBuf>,
}

impl ObservabilitySettings {
    /// Reads the settings from process environment variables:
    ///
    /// - `AGENT_SDK_OBSERVABILITY_ENABLED` / `AGENT_SDK_OBSERVABILITY`: enable flag (default on).
    /// - `AGENT_SDK_LOG_LEVEL`: level or filter override (`info`, `agent_sdk=debug`, ...).
    /// - `AGENT_SDK_JSON_LOG_PATH`: write JSONL logs to this file instead of stderr.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = ENABLED_KEYS
            .iter()
            .find_map(|key| lookup(key))
            .map(|value| parse_bool_env(&value).unwrap_or(true))
            .unwrap_or(true);
        Self {
            enabled,
            level: lookup(LOG_LEVEL_KEY).filter(|v| !v.trim().is_empty()),
            json_log_path: lookup(JSON_LOG_PATH_KEY)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Splits a log path into the directory and file name the appender wants.
fn log_file_parts(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}

/// Installs the tracing subscriber once per process, configured from the
/// environment (see [`ObservabilitySettings::from_env`]).
pub fn init_observability() {
    init_observability_with(ObservabilitySettings::from_env());
}

/// Installs the tracing subscriber once per process. Later calls, and calls
/// made after another global subscriber was installed, do nothing.
pub fn init_observability_with(settings: ObservabilitySettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }
        let env_filter = settings.env_filter();
        match &settings.json_log_path {
            Some(path) => {
                let (dir, file_name) = log_file_parts(path);
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            None => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> ObservabilitySettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ObservabilitySettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_enabled_console_logging() {
        let resolved = settings(&[]);
        assert!(resolved.enabled);
        assert_eq!(resolved.level, None);
        assert_eq!(resolved.json_log_path, None);
    }

    #[test]
    fn first_enable_key_wins_and_garbage_means_enabled() {
        assert!(!settings(&[("AGENT_SDK_OBSERVABILITY_ENABLED", "off")]).enabled);
        assert!(
            settings(&[
                ("AGENT_SDK_OBSERVABILITY_ENABLED", "yes"),
                ("AGENT_SDK_OBSERVABILITY", "0"),
            ])
            .enabled
        );
        assert!(settings(&[("AGENT_SDK_OBSERVABILITY", "maybe")]).enabled);
    }

    #[test]
    fn reads_level_and_json_path() {
        let resolved = settings(&[
            ("AGENT_SDK_LOG_LEVEL", "agent_sdk=debug"),
            ("AGENT_SDK_JSON_LOG_PATH", "/var/log/sdk/run.jsonl"),
        ]);
        assert_eq!(resolved.level.as_deref(), Some("agent_sdk=debug"));
        let (dir, file) = log_file_parts(resolved.json_log_path.as_deref().expect("path"));
        assert_eq!(dir, PathBuf::from("/var/log/sdk"));
        assert_eq!(file, "run.jsonl");
    }

    #[test]
    fn bare_file_name_logs_to_current_dir() {
        let (dir, file) = log_file_parts(Path::new("sdk.jsonl"));
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(file, "sdk.jsonl");
    }
}
