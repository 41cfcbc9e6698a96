//! Streaming serving kernel for LLM text and chat completion.
//!
//! The inference engine and the HTTP surface are external collaborators;
//! this crate owns the layer between them: turning the engine's cumulative
//! output snapshots into incremental fragments each emitted exactly once,
//! resolving and caching community chat templates, rendering message lists
//! into prompts, and building bounded sampling parameters.
//!
//! The entry point is [`service::ChatService`], generic over an
//! [`engine::AsyncEngine`] and a [`chat::PromptRenderer`].

pub mod chat;
pub mod config;
pub mod engine;
pub mod error;
pub mod service;

pub use chat::{
    build_chat_prompt, delta_stream, resolve_stop, validate_max_tokens, GenerationConfig,
    JinjaRenderer, Message, PromptRenderer, SamplingParams, StopInput, StreamMode, TemplateCache,
    MIN_MAX_TOKENS,
};
pub use config::{Constants, EngineConfig, ServiceConfig};
pub use engine::{
    snapshot_channel, AsyncEngine, GenerationSnapshot, RequestId, SnapshotSender, SnapshotStream,
};
pub use error::{Error, Result};
pub use service::{ChatRequest, ChatService, CompletionRequest, FragmentStream};
