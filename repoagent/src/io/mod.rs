//! I/O adapters for agent commands.

pub mod apply;
pub mod config;
pub mod context;
pub mod engine;
pub mod process;
pub mod prompt;
pub mod test_runner;
pub mod transcript;
