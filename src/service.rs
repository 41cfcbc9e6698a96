//! The service layer: request validation, prompt/stop resolution, engine
//! dispatch, and fragment streaming.

use std::sync::Arc;

use async_stream::try_stream;
use futures_util::stream::BoxStream;
use futures_util::{pin_mut, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::chat::{
    build_chat_prompt, delta_stream, resolve_stop, validate_max_tokens, JinjaRenderer, Message,
    PromptRenderer, SamplingParams, StopInput, StreamMode, TemplateCache,
};
use crate::config::Constants;
use crate::engine::{AsyncEngine, RequestId};
use crate::error::Result;

/// Finite, non-restartable stream of incremental text fragments.
pub type FragmentStream = BoxStream<'static, Result<String>>;

fn default_prompt() -> String {
    "Explain superconductors like I'm five years old".to_string()
}

fn default_messages() -> Vec<Message> {
    vec![Message::user("What is the meaning of life?")]
}

/// Plain text completion request. `max_tokens` defaults to the context bound.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRequest {
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Vec<String>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            max_tokens: None,
            stop: Vec::new(),
        }
    }
}

/// Chat request. `model` is informational only; the loaded model serves
/// every request.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default = "default_messages")]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Option<StopInput>,
    #[serde(default)]
    pub stop_token_ids: Option<Vec<u32>>,
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self {
            messages: default_messages(),
            model: String::new(),
            max_tokens: None,
            stop: None,
            stop_token_ids: None,
        }
    }
}

/// Tells the engine to stop generating when the fragment stream is dropped
/// before the engine finished. Disarmed on natural completion.
struct AbortOnDrop<E: AsyncEngine> {
    engine: Arc<E>,
    request_id: RequestId,
    armed: bool,
}

impl<E: AsyncEngine> AbortOnDrop<E> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<E: AsyncEngine> Drop for AbortOnDrop<E> {
    fn drop(&mut self) {
        if self.armed {
            debug!(request_id = %self.request_id, "aborting engine request");
            self.engine.abort(&self.request_id);
        }
    }
}

/// The serving kernel: owns the engine handle, the prompt renderer, the
/// static constants, and the template cache. All per-request state lives in
/// the streams it hands out.
pub struct ChatService<E, R = JinjaRenderer> {
    engine: Arc<E>,
    renderer: R,
    constants: Constants,
    templates: TemplateCache,
}

impl<E, R> ChatService<E, R>
where
    E: AsyncEngine,
    R: PromptRenderer,
{
    pub fn new(engine: Arc<E>, renderer: R, constants: Constants, templates: TemplateCache) -> Self {
        Self {
            engine,
            renderer,
            constants,
            templates,
        }
    }

    /// Service over the bundled constants and template assets.
    pub fn bundled(engine: Arc<E>, renderer: R) -> Result<Self> {
        Ok(Self::new(
            engine,
            renderer,
            Constants::bundled()?,
            TemplateCache::bundled(),
        ))
    }

    pub fn constants(&self) -> &Constants {
        &self.constants
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    fn context_bound(&self) -> u32 {
        self.constants.engine_config.max_model_len
    }

    /// Plain completion: the prompt passes through untouched, deltas stream
    /// unfiltered.
    pub fn generate(&self, request: CompletionRequest) -> Result<FragmentStream> {
        let max_tokens = request.max_tokens.unwrap_or_else(|| self.context_bound());
        validate_max_tokens(max_tokens, self.context_bound())?;

        let params = SamplingParams::new(max_tokens, request.stop, None);
        self.dispatch(&request.prompt, params, StreamMode::Raw)
    }

    /// Chat completion: template resolution, system-prompt injection, stop
    /// precedence, and leading-whitespace suppression on the output.
    pub fn chat(&self, request: ChatRequest) -> Result<FragmentStream> {
        let max_tokens = request.max_tokens.unwrap_or_else(|| self.context_bound());
        validate_max_tokens(max_tokens, self.context_bound())?;

        let gen_config = match self.constants.chat_template_name() {
            Some(name) => Some(self.templates.resolve(name)?),
            None => None,
        };

        let explicit = StopInput::normalize(request.stop);
        let stop = resolve_stop(explicit, gen_config.as_deref(), self.renderer.eos_token());
        let params = SamplingParams::new(max_tokens, stop, request.stop_token_ids);

        let prompt = build_chat_prompt(&self.renderer, &request.messages, gen_config.as_deref())?;
        self.dispatch(&prompt, params, StreamMode::Chat)
    }

    fn dispatch(
        &self,
        prompt: &str,
        params: SamplingParams,
        mode: StreamMode,
    ) -> Result<FragmentStream> {
        let request_id = RequestId::mint();
        debug!(
            request_id = %request_id,
            max_tokens = params.max_tokens,
            ?mode,
            "submitting engine request"
        );

        let snapshots = self.engine.add_request(&request_id, prompt, params)?;
        let deltas = delta_stream(snapshots, mode);
        let mut guard = AbortOnDrop {
            engine: Arc::clone(&self.engine),
            request_id,
            armed: true,
        };

        Ok(Box::pin(try_stream! {
            pin_mut!(deltas);
            while let Some(fragment) = deltas.next().await {
                let fragment = fragment?;
                yield fragment;
            }
            guard.disarm();
        }))
    }
}
