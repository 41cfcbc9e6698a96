//! Error taxonomy for the serving kernel.
//!
//! Config errors are startup-fatal; template errors are fatal for every
//! request until the deployment is fixed; the remaining variants are scoped
//! to a single request stream.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or incomplete static configuration. The process must not
    /// start serving when this is returned.
    #[error("invalid service constants: {0}")]
    Config(String),

    /// The template descriptor or template-text asset does not exist.
    #[error("chat template `{name}` not found ({path})")]
    TemplateNotFound { name: String, path: String },

    /// The template descriptor exists but is missing required fields or is
    /// not valid JSON.
    #[error("chat template `{name}` is malformed: {reason}")]
    TemplateMalformed { name: String, reason: String },

    /// `max_tokens` outside the accepted range. Rejected before the engine
    /// is invoked; no partial generation is performed.
    #[error("max_tokens must be within [{min}, {max}], got {got}")]
    InvalidParameter { got: u32, min: u32, max: u32 },

    /// The engine produced a snapshot whose text is not a prefix-extension
    /// of the previous one. Fatal for the affected request only.
    #[error("engine protocol violation: cumulative text shrank from {cursor} to {len} bytes")]
    EngineProtocolViolation { cursor: usize, len: usize },

    /// The engine reported a fault mid-stream. Propagated as-is; retrying
    /// is a caller decision since regeneration is nondeterministic.
    #[error("engine failure: {0}")]
    EngineFailure(String),

    /// Chat-template rendering failed.
    #[error("prompt rendering failed: {0}")]
    Render(String),
}

pub type Result<T> = std::result::Result<T, Error>;
