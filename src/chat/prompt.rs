//! Prompt construction: system-prompt injection plus Jinja2 rendering.

use minijinja::{context, Environment, Error as JinjaError, ErrorKind};
use serde::{Deserialize, Serialize};

use super::templates::GenerationConfig;
use crate::error::{Error, Result};

/// One conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// External tokenizer/template renderer seam.
///
/// `template` overrides the renderer's own default chat template when the
/// configured community template is active.
pub trait PromptRenderer: Send + Sync {
    fn render(&self, template: Option<&str>, messages: &[Message]) -> Result<String>;

    /// End-of-sequence token string, if the tokenizer defines one.
    fn eos_token(&self) -> Option<&str>;
}

/// Render a message list into the final prompt string.
///
/// When the generation config carries a system prompt and the conversation
/// does not already open with a system turn, a synthetic system message is
/// prepended. The caller's list is never mutated.
pub fn build_chat_prompt<R: PromptRenderer + ?Sized>(
    renderer: &R,
    messages: &[Message],
    gen_config: Option<&GenerationConfig>,
) -> Result<String> {
    let template = gen_config.map(|c| c.template.as_str());
    let system_prompt = gen_config.and_then(|c| c.system_prompt.as_deref());

    match system_prompt {
        Some(prompt) if messages.first().map(|m| m.role.as_str()) != Some("system") => {
            let mut with_system = Vec::with_capacity(messages.len() + 1);
            with_system.push(Message::system(prompt));
            with_system.extend_from_slice(messages);
            renderer.render(template, &with_system)
        }
        _ => renderer.render(template, messages),
    }
}

/// Fix Python-specific Jinja syntax that minijinja doesn't support. The
/// published community templates are written for the transformers renderer.
fn preprocess_template(template: &str) -> String {
    use regex::Regex;

    let mut result = template
        .replace("tojson(ensure_ascii=False)", "tojson")
        .replace("tojson(ensure_ascii=True)", "tojson")
        .replace(".strip()", " | trim");

    if let Ok(re) = Regex::new(r"\.endswith\(") {
        result = re.replace_all(&result, " is endingwith(").to_string();
    }
    if let Ok(re) = Regex::new(r"\.startswith\(") {
        result = re.replace_all(&result, " is startingwith(").to_string();
    }

    result
}

/// Jinja2-backed [`PromptRenderer`].
///
/// Holds the tokenizer-level facts the templates need: the default chat
/// template (when the model ships one) and the BOS/EOS token strings.
pub struct JinjaRenderer {
    default_template: Option<String>,
    bos_token: String,
    eos_token: Option<String>,
}

impl JinjaRenderer {
    pub fn new(
        default_template: Option<String>,
        bos_token: impl Into<String>,
        eos_token: Option<String>,
    ) -> Self {
        Self {
            default_template,
            bos_token: bos_token.into(),
            eos_token,
        }
    }
}

impl PromptRenderer for JinjaRenderer {
    fn render(&self, template: Option<&str>, messages: &[Message]) -> Result<String> {
        let source = template
            .or(self.default_template.as_deref())
            .ok_or_else(|| Error::Render("no chat template available".to_string()))?;
        let processed = preprocess_template(source);

        let mut env = Environment::new();
        // raise_exception(msg) — community templates use it for validation
        env.add_function("raise_exception", |msg: String| -> std::result::Result<String, JinjaError> {
            Err(JinjaError::new(ErrorKind::InvalidOperation, msg))
        });
        env.add_template("chat_template", &processed)
            .map_err(|e| Error::Render(e.to_string()))?;

        let tmpl = env
            .get_template("chat_template")
            .map_err(|e| Error::Render(e.to_string()))?;
        tmpl.render(context! {
            messages => messages,
            add_generation_prompt => true,
            bos_token => &self.bos_token,
            eos_token => self.eos_token.as_deref().unwrap_or(""),
        })
        .map_err(|e| Error::Render(e.to_string()))
    }

    fn eos_token(&self) -> Option<&str> {
        self.eos_token.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the message list it was asked to render.
    struct RecordingRenderer {
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl RecordingRenderer {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }

        fn last(&self) -> Vec<Message> {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl PromptRenderer for RecordingRenderer {
        fn render(&self, _template: Option<&str>, messages: &[Message]) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok("rendered".to_string())
        }

        fn eos_token(&self) -> Option<&str> {
            Some("</s>")
        }
    }

    fn config_with_system(prompt: &str) -> GenerationConfig {
        GenerationConfig {
            system_prompt: Some(prompt.to_string()),
            stop_str: None,
            template: "{{ messages }}".to_string(),
        }
    }

    #[test]
    fn test_system_prompt_injected_for_user_opening() {
        let renderer = RecordingRenderer::new();
        let messages = vec![Message::user("hi")];
        let config = config_with_system("be terse");

        build_chat_prompt(&renderer, &messages, Some(&config)).unwrap();
        assert_eq!(
            renderer.last(),
            vec![Message::system("be terse"), Message::user("hi")]
        );
        // Caller's list untouched
        assert_eq!(messages, vec![Message::user("hi")]);
    }

    #[test]
    fn test_no_injection_when_conversation_has_system_turn() {
        let renderer = RecordingRenderer::new();
        let messages = vec![Message::system("x"), Message::user("hi")];
        let config = config_with_system("be terse");

        build_chat_prompt(&renderer, &messages, Some(&config)).unwrap();
        assert_eq!(renderer.last(), messages);
    }

    #[test]
    fn test_no_injection_without_generation_config() {
        let renderer = RecordingRenderer::new();
        let messages = vec![Message::user("hi")];

        build_chat_prompt(&renderer, &messages, None).unwrap();
        assert_eq!(renderer.last(), messages);
    }

    #[test]
    fn test_jinja_renders_chatml_with_generation_prompt() {
        let template = "{% for m in messages %}<|im_start|>{{ m.role }}\n{{ m.content }}<|im_end|>\n{% endfor %}{% if add_generation_prompt %}<|im_start|>assistant\n{% endif %}";
        let renderer = JinjaRenderer::new(Some(template.to_string()), "<s>", Some("</s>".to_string()));

        let prompt = renderer
            .render(None, &[Message::system("You are helpful."), Message::user("Hello!")])
            .unwrap();
        assert!(prompt.contains("<|im_start|>system\nYou are helpful.<|im_end|>"));
        assert!(prompt.contains("<|im_start|>user\nHello!<|im_end|>"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn test_explicit_template_overrides_default() {
        let renderer = JinjaRenderer::new(
            Some("default".to_string()),
            "<s>",
            Some("</s>".to_string()),
        );
        let prompt = renderer
            .render(Some("{{ eos_token }}"), &[Message::user("x")])
            .unwrap();
        assert_eq!(prompt, "</s>");
    }

    #[test]
    fn test_render_without_any_template_fails() {
        let renderer = JinjaRenderer::new(None, "<s>", None);
        assert!(matches!(
            renderer.render(None, &[Message::user("x")]),
            Err(Error::Render(_))
        ));
    }

    #[test]
    fn test_raise_exception_surfaces_as_render_error() {
        let renderer = JinjaRenderer::new(None, "<s>", None);
        let result = renderer.render(
            Some(r#"{{ raise_exception("roles must alternate") }}"#),
            &[Message::user("x")],
        );
        match result {
            Err(Error::Render(msg)) => assert!(msg.contains("roles must alternate")),
            other => panic!("expected render error, got {other:?}"),
        }
    }

    #[test]
    fn test_preprocess_strips_python_isms() {
        assert_eq!(
            preprocess_template("{{ t | tojson(ensure_ascii=False) }}"),
            "{{ t | tojson }}"
        );
        assert_eq!(
            preprocess_template("{{ content.strip() }}"),
            "{{ content | trim }}"
        );
        assert_eq!(
            preprocess_template(r#"m.content.startswith('<tool>')"#),
            r#"m.content is startingwith('<tool>')"#
        );
    }
}
