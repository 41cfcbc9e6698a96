//! Static service configuration, parsed once at process start.
//!
//! The constants payload is bundled into the binary. A broken payload is a
//! deployment error, not a runtime error: construction fails and the caller
//! is expected to refuse to start.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::chat::MIN_MAX_TOKENS;
use crate::error::{Error, Result};

const BUNDLED_CONSTANTS: &str = include_str!("../assets/service-constants.json");

/// Engine construction options. `model` and `max_model_len` are required;
/// everything else is forwarded to the engine untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub model: String,
    pub max_model_len: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Options controlling API exposure. Opaque to the serving kernel, passed
/// through to whatever hosts it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig(pub Map<String, Value>);

/// The parsed constants payload: engine options, service options, and the
/// optional community chat-template name.
#[derive(Debug, Clone, Deserialize)]
pub struct Constants {
    pub engine_config: EngineConfig,
    #[serde(default)]
    pub service_config: ServiceConfig,
    #[serde(default)]
    pub chat_template: Option<String>,
}

impl Constants {
    /// Parse the compiled-in constants asset.
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_CONSTANTS)
    }

    /// Parse a constants payload from a JSON string.
    pub fn from_json(payload: &str) -> Result<Self> {
        let constants: Constants =
            serde_json::from_str(payload).map_err(|e| Error::Config(e.to_string()))?;
        if constants.engine_config.model.is_empty() {
            return Err(Error::Config("engine_config.model is empty".to_string()));
        }
        // A bound below the request minimum would make every request invalid.
        if constants.engine_config.max_model_len < MIN_MAX_TOKENS {
            return Err(Error::Config(format!(
                "engine_config.max_model_len must be at least {}, got {}",
                MIN_MAX_TOKENS, constants.engine_config.max_model_len
            )));
        }
        Ok(constants)
    }

    /// Configured community template name, if one is set and non-empty.
    pub fn chat_template_name(&self) -> Option<&str> {
        self.chat_template.as_deref().filter(|name| !name.is_empty())
    }
}
