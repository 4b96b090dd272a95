//! Prompt compiler: one document from mode instructions, recent history, the
//! context snapshot and the task.
//!
//! The edit and agent instruction blocks are the only place the replacement
//! grammar is taught; they are rendered from the same marker constants the
//! patch scanner uses.

use std::borrow::Cow;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::history::{History, PROMPT_EXCHANGES, preview_response};
use crate::core::patch::{END_MARKER, FILE_MARKER, START_MARKER, TAG_CLOSE};
use crate::core::types::Mode;

const FRAME_TEMPLATE: &str = include_str!("prompts/frame.txt");
const PREAMBLE_TEMPLATE: &str = include_str!("prompts/preamble.txt");
const GRAMMAR_TEMPLATE: &str = include_str!("prompts/grammar.txt");
const OVERVIEW_TEMPLATE: &str = include_str!("prompts/overview.txt");
const EDIT_TEMPLATE: &str = include_str!("prompts/edit.txt");
const AGENT_TEMPLATE: &str = include_str!("prompts/agent.txt");
const PLAN_TASK_TEMPLATE: &str = include_str!("prompts/plan_task.txt");
const EDIT_TASK_TEMPLATE: &str = include_str!("prompts/edit_task.txt");

/// History entry as rendered: the response may be a shortened preview.
#[derive(Debug, Serialize)]
struct ExchangeView<'a> {
    task: &'a str,
    response: Cow<'a, str>,
}

/// Template engine wrapper around minijinja.
pub struct PromptCompiler {
    env: Environment<'static>,
}

impl PromptCompiler {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_keep_trailing_newline(true);
        for (name, source) in [
            ("frame", FRAME_TEMPLATE),
            ("preamble", PREAMBLE_TEMPLATE),
            ("grammar", GRAMMAR_TEMPLATE),
            ("overview", OVERVIEW_TEMPLATE),
            ("edit", EDIT_TEMPLATE),
            ("agent", AGENT_TEMPLATE),
            ("plan_task", PLAN_TASK_TEMPLATE),
            ("edit_task", EDIT_TASK_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load prompt template {name}"))?;
        }
        Ok(Self { env })
    }

    /// Mode-specific system instruction block.
    pub fn instructions(&self, mode: Mode) -> Result<String> {
        let rendered = self.env.get_template(mode.as_str())?.render(context! {
            file_marker => FILE_MARKER,
            tag_close => TAG_CLOSE,
            start_marker => START_MARKER,
            end_marker => END_MARKER,
        })?;
        Ok(rendered.trim().to_string())
    }

    /// Assemble the full prompt. Pure function of its inputs.
    pub fn compile(
        &self,
        mode: Mode,
        task: &str,
        history: &History,
        context_snapshot: &str,
    ) -> Result<String> {
        let exchanges: Vec<ExchangeView<'_>> = history
            .recent(PROMPT_EXCHANGES)
            .map(|exchange| ExchangeView {
                task: &exchange.task,
                response: preview_response(&exchange.response),
            })
            .collect();

        let rendered = self.env.get_template("frame")?.render(context! {
            instructions => self.instructions(mode)?,
            history => exchanges,
            context => context_snapshot,
            task => task.trim(),
        })?;
        debug!(mode = %mode, prompt_bytes = rendered.len(), "prompt compiled");
        Ok(rendered)
    }

    /// Task text for the agent's planning phase.
    pub fn plan_task(&self, task: &str) -> Result<String> {
        let rendered = self
            .env
            .get_template("plan_task")?
            .render(context! { task => task.trim() })?;
        Ok(rendered.trim_end().to_string())
    }

    /// Task text for editing one planned file (`position` is 1-based).
    pub fn edit_task(&self, task: &str, path: &str, position: usize, total: usize) -> Result<String> {
        let rendered = self.env.get_template("edit_task")?.render(context! {
            task => task.trim(),
            path => path,
            position => position,
            total => total,
        })?;
        Ok(rendered.trim_end().to_string())
    }
}
