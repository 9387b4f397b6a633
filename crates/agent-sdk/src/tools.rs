//! Tools implemented by the caller and executed in this process when the
//! agent calls them.
//!
//! ```
//! use agent_sdk::tools::{ToolRegistry, tool_fn};
//! use serde_json::json;
//!
//! #[derive(serde::Deserialize)]
//! struct Weather {
//!     city: String,
//! }
//!
//! let mut tools = ToolRegistry::new();
//! tools.register(tool_fn(
//!     "get_weather",
//!     "Current weather for a city",
//!     json!({
//!         "type": "object",
//!         "properties": {"city": {"type": "string"}},
//!         "required": ["city"]
//!     }),
//!     |args: Weather| async move { Ok::<_, String>(format!("sunny in {}", args.city)) },
//! ));
//! assert_eq!(tools.names().collect::<Vec<_>>(), ["get_weather"]);
//! ```

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::errors::SdkError;
use crate::message::ToolReturnValue;

/// Tool the agent may call. Runs inside the SDK process.
#[async_trait::async_trait]
pub trait ExternalTool: Send + Sync {
    /// Name the model calls the tool by.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameter_schema(&self) -> Value;

    /// Runs the tool. `Err` is reported to the model as a failed tool result.
    async fn call(&self, arguments: Value) -> Result<String, String>;

    /// Definition in the OpenAI function calling layout.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: self.parameter_schema(),
            },
        }
    }
}

/// `{"type": "function", "function": {...}}` as sent to the agent.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: Value,
}

type Handler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<String, String>> + Send + Sync>;

/// [`ExternalTool`] built from an async closure over typed arguments.
pub struct FnTool<T> {
    name: String,
    description: String,
    schema: Value,
    handler: Handler<T>,
    _args: PhantomData<fn(T)>,
}

impl<T> Clone for FnTool<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            schema: self.schema.clone(),
            handler: self.handler.clone(),
            _args: PhantomData,
        }
    }
}

impl<T> fmt::Debug for FnTool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Creates a tool whose arguments are decoded into `T` before `handler` runs.
///
/// Arguments that do not decode are reported to the model as a failed call.
pub fn tool_fn<T, F, Fut, E>(
    name: impl Into<String>,
    description: impl Into<String>,
    schema: Value,
    handler: F,
) -> FnTool<T>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, E>> + Send + 'static,
    E: fmt::Display + 'static,
{
    let handler = Arc::new(move |args: T| {
        handler(args)
            .map(|result| result.map_err(|e| e.to_string()))
            .boxed()
    });
    FnTool {
        name: name.into(),
        description: description.into(),
        schema,
        handler,
        _args: PhantomData,
    }
}

#[async_trait::async_trait]
impl<T> ExternalTool for FnTool<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameter_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn call(&self, arguments: Value) -> Result<String, String> {
        let args: T = serde_json::from_value(arguments)
            .map_err(|e| format!("invalid arguments for {}: {e}", self.name))?;
        (self.handler)(args).await
    }
}

/// Named set of external tools offered to the agent, in registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn ExternalTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: impl ExternalTool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn ExternalTool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            debug!(tool = %name, "replaced external tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ExternalTool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    /// Every tool needs a name and an object schema.
    pub fn validate(&self) -> Result<(), SdkError> {
        for (name, tool) in &self.tools {
            if name.trim().is_empty() {
                return Err(SdkError::Config("external tool name must not be empty".into()));
            }
            let schema = tool.parameter_schema();
            if schema.get("type").and_then(Value::as_str) != Some("object") {
                return Err(SdkError::Config(format!(
                    "parameters of external tool {name} must be an object schema"
                )));
            }
        }
        Ok(())
    }

    /// Runs `name` with the raw JSON argument payload. `None` when no such
    /// tool is registered.
    pub async fn invoke(&self, name: &str, arguments: Option<&str>) -> Option<ToolReturnValue> {
        let tool = self.tools.get(name)?;
        let arguments = match arguments.map(str::trim) {
            None | Some("") => Value::Object(serde_json::Map::new()),
            Some(raw) => match serde_json::from_str(raw) {
                Ok(value) => value,
                Err(e) => return Some(failed(format!("invalid JSON arguments: {e}"))),
            },
        };
        let outcome = match tool.call(arguments).await {
            Ok(output) => ToolReturnValue::ok(output),
            Err(message) => failed(message),
        };
        Some(outcome)
    }
}

/// Failed outcome carrying the error text as both output and note.
fn failed(message: String) -> ToolReturnValue {
    let mut value = ToolReturnValue::error(message.clone());
    value.output = message.into();
    value
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl PartialEq for ToolRegistry {
    fn eq(&self, other: &Self) -> bool {
        self.definitions() == other.definitions()
    }
}
