//! Runtime that drives the `kimi` CLI agent as a subprocess.
//!
//! The agent is started as `kimi --wire` and spoken to with line-delimited
//! JSON-RPC 2.0 over its stdin/stdout. Session options map onto command-line
//! flags; see [`KimiCliConfig`] for the process-level settings.
mod config;
mod connection;
mod protocol;
mod runtime;

pub use config::KimiCliConfig;
pub use runtime::{KimiCliRunLoop, KimiCliRuntime};
