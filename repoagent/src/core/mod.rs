//! Deterministic, pure logic shared by the agent.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod filters;
pub mod history;
pub mod patch;
pub mod paths;
pub mod plan;
pub mod response;
pub mod types;
