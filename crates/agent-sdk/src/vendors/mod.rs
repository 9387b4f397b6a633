//! Concrete agent runtimes.
pub mod kimi_cli;
