//! Cleaning of raw engine output into the generated response text.
//!
//! The engine echoes startup diagnostics, sometimes the prompt itself, and
//! a timing footer around the completion. Only the completion is kept.

const ASSISTANT_TAG: &str = "<|assistant|>";

const DIAGNOSTIC_PREFIXES: &[&str] = &[
    "llama_",
    "llm_",
    "ggml_",
    "sampling:",
    "loaded ",
    "system_info:",
    "build:",
    "main:",
];

const END_SENTINELS: &[&str] = &["<|endoftext|>", "<|end|>", "[end of text]"];

const FOOTER_PREFIXES: &[&str] = &["llama_print_timings:", "llama_perf_"];

/// Extract the completion from `raw`, given the `prompt` that produced it.
///
/// Order: drop an echoed prompt (or everything up to the last assistant
/// tag), else leading diagnostic lines; then cut at the first end-of-text
/// sentinel or footer line; then trim trailing whitespace.
pub fn clean_engine_output(raw: &str, prompt: &str) -> String {
    let body = strip_preamble(raw, prompt);
    let end = completion_end(body);
    body[..end].trim_end().to_string()
}

fn strip_preamble<'a>(raw: &'a str, prompt: &str) -> &'a str {
    let prompt = prompt.trim_end();
    if !prompt.is_empty()
        && let Some(idx) = raw.find(prompt)
    {
        return raw[idx + prompt.len()..].trim_start_matches(['\n', '\r', ' ']);
    }
    if let Some(idx) = raw.rfind(ASSISTANT_TAG) {
        return raw[idx + ASSISTANT_TAG.len()..].trim_start_matches(['\n', '\r', ' ']);
    }
    skip_diagnostic_lines(raw)
}

fn skip_diagnostic_lines(raw: &str) -> &str {
    let mut rest = raw;
    while DIAGNOSTIC_PREFIXES
        .iter()
        .any(|prefix| rest.starts_with(prefix))
    {
        match rest.find('\n') {
            Some(idx) => rest = &rest[idx + 1..],
            None => return "",
        }
    }
    rest
}

fn completion_end(body: &str) -> usize {
    let mut end = END_SENTINELS
        .iter()
        .filter_map(|sentinel| body.find(sentinel))
        .min()
        .unwrap_or(body.len());

    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if offset >= end {
            break;
        }
        if FOOTER_PREFIXES.iter().any(|prefix| line.starts_with(prefix)) {
            end = offset;
            break;
        }
        offset += line.len();
    }
    end
}
