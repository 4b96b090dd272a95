//! Repository agent driving an external code-generation engine.
//!
//! The crate turns a repository into a bounded prompt, asks the engine, and
//! applies the complete-file replacements it proposes. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (patch tokenizer, plan extraction,
//!   filters, history, output cleaning). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (repository scan, prompt rendering,
//!   process execution, file writes). Behind traits where tests need fakes.
//!
//! Orchestration modules ([`session`], [`agent`]) coordinate core logic with I/O
//! to implement CLI commands.

pub mod agent;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
