//! Configuration types.

use secrecy::SecretString;

use crate::error::ConfigError;

/// Agent configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Agency name used in prompts.
    pub agency_name: String,
    /// Agent persona name used in prompts.
    pub agent_name: String,
    /// Path to the libSQL database file.
    pub db_path: String,
    /// Port for the webhook server.
    pub port: u16,
    /// OpenAI API key. Absent is a normal configuration — the bot runs
    /// rule-only with deterministic replies.
    pub openai_api_key: Option<SecretString>,
    /// Completion model name.
    pub model: String,
    /// How many property suggestions to offer at most.
    pub max_suggestions: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            agency_name: "Compromiso Inmobiliario".to_string(),
            agent_name: "Gonzalo".to_string(),
            db_path: "./data/propleads.db".to_string(),
            port: 8080,
            openai_api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_suggestions: 3,
        }
    }
}

impl BotConfig {
    /// Build a config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("PROPLEADS_AGENCY_NAME") {
            config.agency_name = name;
        }
        if let Ok(name) = std::env::var("PROPLEADS_AGENT_NAME") {
            config.agent_name = name;
        }
        if let Ok(path) = std::env::var("PROPLEADS_DB_PATH") {
            config.db_path = path;
        }
        if let Ok(port) = std::env::var("PROPLEADS_PORT") {
            config.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PROPLEADS_PORT".to_string(),
                message: format!("not a valid port: {port}"),
            })?;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                config.openai_api_key = Some(SecretString::from(key));
            }
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            config.model = model;
        }

        Ok(config)
    }
}
