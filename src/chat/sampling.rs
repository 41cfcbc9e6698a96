//! Per-request sampling parameters: token budget and stop conditions.

use serde::Deserialize;

use super::templates::GenerationConfig;
use crate::error::{Error, Result};

/// Smallest token budget a request may ask for.
pub const MIN_MAX_TOKENS: u32 = 128;

/// Caller-supplied stop condition: a single string, a list, or absent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StopInput {
    Single(String),
    Many(Vec<String>),
}

impl StopInput {
    /// Collapse the tagged variants into a canonical sequence. An empty
    /// string counts as "not supplied", matching the falsy check the stop
    /// precedence is defined over.
    pub fn normalize(input: Option<Self>) -> Vec<String> {
        match input {
            None => Vec::new(),
            Some(StopInput::Single(s)) => {
                if s.is_empty() {
                    Vec::new()
                } else {
                    vec![s]
                }
            }
            Some(StopInput::Many(v)) => v,
        }
    }
}

/// Validate the token budget at the API boundary: `128 <= max_tokens <=
/// bound`. Out-of-range requests are rejected before the engine is invoked.
pub fn validate_max_tokens(max_tokens: u32, bound: u32) -> Result<()> {
    if max_tokens < MIN_MAX_TOKENS || max_tokens > bound {
        return Err(Error::InvalidParameter {
            got: max_tokens,
            min: MIN_MAX_TOKENS,
            max: bound,
        });
    }
    Ok(())
}

/// Stop-sequence precedence for chat requests:
/// 1. a non-empty explicit caller stop list, verbatim;
/// 2. else the active community template's stop string;
/// 3. else (no template) the tokenizer's EOS token string;
/// 4. else nothing.
///
/// A template that is active but defines no stop string blocks the EOS
/// fallback.
pub fn resolve_stop(
    explicit: Vec<String>,
    template: Option<&GenerationConfig>,
    eos_token: Option<&str>,
) -> Vec<String> {
    if !explicit.is_empty() {
        return explicit;
    }
    match template {
        Some(config) => match &config.stop_str {
            Some(stop) => vec![stop.clone()],
            None => Vec::new(),
        },
        None => match eos_token {
            Some(eos) => vec![eos.to_string()],
            None => Vec::new(),
        },
    }
}

/// Engine-ready sampling parameters for one request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub stop: Vec<String>,
    pub stop_token_ids: Vec<u32>,
}

impl SamplingParams {
    /// `max_tokens` is trusted here; [`validate_max_tokens`] runs at the API
    /// boundary first. Absent `stop_token_ids` normalizes to the empty set —
    /// the engine never sees an unset value.
    pub fn new(max_tokens: u32, stop: Vec<String>, stop_token_ids: Option<Vec<u32>>) -> Self {
        Self {
            max_tokens,
            stop,
            stop_token_ids: stop_token_ids.unwrap_or_default(),
        }
    }
}
