use std::path::PathBuf;

use indexmap::IndexMap;

use crate::errors::SdkError;

const DEFAULT_EXECUTABLE: &str = "kimi";

/// How to launch the `kimi` agent process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KimiCliConfig {
    /// Program to run. Resolved through `PATH` when not absolute.
    pub executable: PathBuf,
    /// Extra arguments appended after the session flags.
    pub args: Vec<String>,
    /// Extra environment for the child process.
    pub env: IndexMap<String, String>,
    /// Overrides the provider base URL (`KIMI_BASE_URL` in the child).
    pub base_url: Option<String>,
    /// Overrides the provider API key (`KIMI_API_KEY` in the child).
    pub api_key: Option<String>,
}

impl Default for KimiCliConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(DEFAULT_EXECUTABLE),
            args: Vec::new(),
            env: IndexMap::new(),
            base_url: None,
            api_key: None,
        }
    }
}

impl KimiCliConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Builds a config from `KIMI_CLI_PATH`, `KIMI_BASE_URL` and `KIMI_API_KEY`.
    /// All three are optional.
    pub fn from_env() -> Result<Self, SdkError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SdkError> {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();
        if let Some(path) = non_blank("KIMI_CLI_PATH") {
            config.executable = PathBuf::from(path);
        }
        config.base_url = non_blank("KIMI_BASE_URL");
        config.api_key = non_blank("KIMI_API_KEY");
        config.validate()?;
        Ok(config)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), SdkError> {
        if self.executable.as_os_str().is_empty() {
            return Err(SdkError::Config("kimi executable path must not be empty".into()));
        }
        if self.env.keys().any(|key| key.is_empty() || key.contains('=')) {
            return Err(SdkError::Config(
                "kimi environment keys must be non-empty and must not contain '='".into(),
            ));
        }
        Ok(())
    }

    /// Environment passed to the child on top of the inherited one.
    pub(crate) fn child_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(base_url) = &self.base_url {
            env.push(("KIMI_BASE_URL".into(), base_url.clone()));
        }
        if let Some(api_key) = &self.api_key {
            env.push(("KIMI_API_KEY".into(), api_key.clone()));
        }
        env
    }
}
