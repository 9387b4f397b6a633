//! Agent configuration, mirroring the agent's own config file.
//!
//! A config is either passed inline or read from a `.toml` / `.json` file.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::errors::SdkError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Kimi,
    OpenaiLegacy,
    OpenaiResponses,
    Anthropic,
    /// Alias of `gemini`, kept for older config files.
    GoogleGenai,
    Gemini,
    Vertexai,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCapability {
    ImageIn,
    VideoIn,
    Thinking,
}

impl ModelCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImageIn => "image_in",
            Self::VideoIn => "video_in",
            Self::Thinking => "thinking",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LlmProvider {
    #[serde(rename = "type")]
    pub kind: ProviderType,
    pub base_url: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub custom_headers: IndexMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LlmModel {
    /// Key into [`Config::providers`].
    pub provider: String,
    pub model: String,
    pub max_context_size: u64,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub capabilities: IndexMap<String, bool>,
}

impl LlmModel {
    pub fn supports(&self, capability: ModelCapability) -> bool {
        self.capabilities
            .get(capability.as_str())
            .copied()
            .unwrap_or(false)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LoopControl {
    #[serde(default)]
    pub max_steps_per_run: u32,
    #[serde(default)]
    pub max_retries_per_step: u32,
}

/// Endpoint of an auxiliary web service (search, fetch).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ServiceEndpoint {
    pub base_url: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub custom_headers: IndexMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Services {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moonshot_search: Option<ServiceEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moonshot_fetch: Option<ServiceEndpoint>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct McpClientConfig {
    #[serde(default)]
    pub tool_call_timeout_ms: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct McpSettings {
    #[serde(default)]
    pub client: McpClientConfig,
}

/// Full agent configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default_model: String,
    #[serde(default)]
    pub models: IndexMap<String, LlmModel>,
    #[serde(default)]
    pub providers: IndexMap<String, LlmProvider>,
    #[serde(default)]
    pub loop_control: LoopControl,
    #[serde(default)]
    pub services: Services,
    #[serde(default)]
    pub mcp: McpSettings,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, SdkError> {
        toml::from_str(text).map_err(|e| SdkError::Config(format!("invalid TOML config: {e}")))
    }

    pub fn from_json_str(text: &str) -> Result<Self, SdkError> {
        serde_json::from_str(text).map_err(|e| SdkError::Config(format!("invalid JSON config: {e}")))
    }

    /// Reads a config file; the format follows the extension (`.json`,
    /// anything else is parsed as TOML).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SdkError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SdkError::Config(format!("failed to read config {}: {e}", path.display()))
        })?;
        let parsed = if is_json(path) {
            Self::from_json_str(&text)
        } else {
            Self::from_toml_str(&text)
        };
        parsed.map_err(|err| match err {
            SdkError::Config(msg) => SdkError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn to_json_string(&self) -> Result<String, SdkError> {
        serde_json::to_string(self)
            .map_err(|e| SdkError::Config(format!("failed to serialize config: {e}")))
    }

    /// Resolves a model by name, falling back to `default_model`.
    pub fn model(&self, name: Option<&str>) -> Option<&LlmModel> {
        let name = name.unwrap_or(&self.default_model);
        self.models.get(name)
    }

    /// Checks that every model references a known provider and that the
    /// default model, when set, exists.
    pub fn validate(&self) -> Result<(), SdkError> {
        if !self.default_model.is_empty() && !self.models.contains_key(&self.default_model) {
            return Err(SdkError::Config(format!(
                "default model {} is not defined",
                self.default_model
            )));
        }
        for (name, model) in &self.models {
            if !self.providers.contains_key(&model.provider) {
                return Err(SdkError::Config(format!(
                    "model {name} references unknown provider {}",
                    model.provider
                )));
            }
        }
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Where a session's configuration comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    Inline(Box<Config>),
    File(PathBuf),
}

impl ConfigSource {
    /// Returns the config, reading it from disk for [`ConfigSource::File`].
    pub fn resolve(&self) -> Result<Config, SdkError> {
        match self {
            Self::Inline(config) => Ok(config.as_ref().clone()),
            Self::File(path) => Config::load(path),
        }
    }
}

impl From<Config> for ConfigSource {
    fn from(value: Config) -> Self {
        Self::Inline(Box::new(value))
    }
}

impl From<PathBuf> for ConfigSource {
    fn from(value: PathBuf) -> Self {
        Self::File(value)
    }
}

impl From<&Path> for ConfigSource {
    fn from(value: &Path) -> Self {
        Self::File(value.to_path_buf())
    }
}
