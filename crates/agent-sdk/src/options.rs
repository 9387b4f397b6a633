use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::config::ConfigSource;
use crate::errors::SdkError;
use crate::tools::{ExternalTool, ToolRegistry};

/// Extra iterations the agent may run in Ralph mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum RalphIterations {
    Limited(u32),
    Unlimited,
}

impl RalphIterations {
    /// Value passed on the command line; `-1` means unlimited.
    pub fn as_arg(&self) -> i64 {
        match self {
            Self::Limited(n) => i64::from(*n),
            Self::Unlimited => -1,
        }
    }
}

impl TryFrom<i64> for RalphIterations {
    type Error = String;

    /// `-1` is unlimited; other values must fit in `0..=u32::MAX`.
    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value == -1 {
            return Ok(Self::Unlimited);
        }
        u32::try_from(value)
            .map(Self::Limited)
            .map_err(|_| format!("max_ralph_iterations must be -1 or 0..={}, got {value}", u32::MAX))
    }
}

impl From<RalphIterations> for i64 {
    fn from(value: RalphIterations) -> Self {
        value.as_arg()
    }
}

/// One MCP server the agent should connect to.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum McpServer {
    /// Remote server reached over HTTP.
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transport: Option<String>,
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        headers: IndexMap<String, String>,
    },
    /// Local server spawned as a subprocess.
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        env: IndexMap<String, String>,
    },
}

/// MCP server set in the `{"mcpServers": {...}}` layout.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: IndexMap<String, McpServer>,
}

impl McpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(mut self, name: impl Into<String>, server: McpServer) -> Self {
        self.mcp_servers.insert(name.into(), server);
        self
    }

    pub fn stdio(self, name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        self.server(
            name,
            McpServer::Stdio {
                command: command.into(),
                args,
                env: IndexMap::new(),
            },
        )
    }

    pub fn http(self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.server(
            name,
            McpServer::Http {
                url: url.into(),
                transport: None,
                headers: IndexMap::new(),
            },
        )
    }
}

/// Knobs used to create or resume a session.
///
/// Every field is optional; unset values fall back to the runtime's own
/// configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionOptions {
    /// Working directory. Defaults to the current directory.
    pub work_dir: Option<PathBuf>,
    /// Session id. `create` uses it as the new id; `resume` looks it up, and
    /// resumes the most recent session when unset.
    pub session_id: Option<String>,
    pub config: Option<ConfigSource>,
    pub model: Option<String>,
    pub thinking: bool,
    /// Runtime-level auto approval of every gated action.
    pub yolo: bool,
    pub agent_file: Option<PathBuf>,
    pub mcp_configs: Vec<McpConfig>,
    pub skills_dir: Option<PathBuf>,
    pub max_steps_per_turn: Option<u32>,
    pub max_retries_per_step: Option<u32>,
    pub max_ralph_iterations: Option<RalphIterations>,
    /// Tools the agent may call back into this process.
    pub tools: ToolRegistry,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn config(mut self, config: impl Into<ConfigSource>) -> Self {
        self.config = Some(config.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Enables thinking mode (the model must support it).
    pub fn thinking(mut self, thinking: bool) -> Self {
        self.thinking = thinking;
        self
    }

    pub fn yolo(mut self, yolo: bool) -> Self {
        self.yolo = yolo;
        self
    }

    pub fn agent_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.agent_file = Some(path.into());
        self
    }

    pub fn mcp_config(mut self, config: McpConfig) -> Self {
        self.mcp_configs.push(config);
        self
    }

    pub fn skills_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.skills_dir = Some(dir.into());
        self
    }

    pub fn max_steps_per_turn(mut self, steps: u32) -> Self {
        self.max_steps_per_turn = Some(steps);
        self
    }

    pub fn max_retries_per_step(mut self, retries: u32) -> Self {
        self.max_retries_per_step = Some(retries);
        self
    }

    pub fn max_ralph_iterations(mut self, iterations: RalphIterations) -> Self {
        self.max_ralph_iterations = Some(iterations);
        self
    }

    /// Registers an external tool for the session.
    pub fn tool(mut self, tool: impl ExternalTool + 'static) -> Self {
        self.tools.register(tool);
        self
    }

    /// Returns the working directory, resolving the default.
    pub fn resolved_work_dir(&self) -> Result<PathBuf, SdkError> {
        match &self.work_dir {
            Some(dir) => Ok(expand_home(dir)),
            None => std::env::current_dir()
                .map_err(|e| SdkError::Config(format!("failed to resolve current dir: {e}"))),
        }
    }

    /// Rejects values no runtime can honor.
    pub fn validate(&self) -> Result<(), SdkError> {
        if self.max_steps_per_turn == Some(0) {
            return Err(SdkError::Config(
                "max_steps_per_turn must be greater than 0".into(),
            ));
        }
        if let Some(id) = &self.session_id
            && id.trim().is_empty()
        {
            return Err(SdkError::Config("session_id must not be empty".into()));
        }
        if let Some(model) = &self.model
            && model.trim().is_empty()
        {
            return Err(SdkError::Config("model must not be empty".into()));
        }
        self.tools.validate()
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}
