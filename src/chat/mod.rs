// Chat pipeline modules:
// - templates.rs: community chat-template loading and memoization
// - prompt.rs: system-prompt injection and Jinja2 rendering
// - sampling.rs: token budget validation and stop resolution
// - delta.rs: cumulative snapshot → incremental fragment assembly

mod delta;
mod prompt;
mod sampling;
mod templates;

pub use delta::{delta_stream, StreamMode};
pub use prompt::{build_chat_prompt, JinjaRenderer, Message, PromptRenderer};
pub use sampling::{
    resolve_stop, validate_max_tokens, SamplingParams, StopInput, MIN_MAX_TOKENS,
};
pub use templates::{GenerationConfig, TemplateCache};
