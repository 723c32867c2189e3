//! Process configuration
//!
//! Everything is read from the environment (after `.env` is applied by the
//! binary). Secrets are optional at load time; each entry point validates
//! the subset it needs and refuses to start without it.

use thiserror::Error;
use url::Url;

use crate::session::{SessionOptions, VoicemailProfile, DEFAULT_MAX_ATTEMPTS};

pub const DEFAULT_DAILY_API_URL: &str = "https://api.daily.co/v1";
pub const DEFAULT_PIPECAT_API_URL: &str = "https://api.pipecat.daily.co/v1/public";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 7860;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings
#[derive(Clone)]
pub struct Settings {
    pub daily_api_key: Option<String>,
    pub daily_api_url: Url,
    pub openai_api_key: Option<String>,
    pub cartesia_api_key: Option<String>,
    pub pipecat_api_key: Option<String>,
    /// Pipecat Cloud agent name that serves sessions
    pub pipecat_service: Option<String>,
    pub pipecat_api_url: Url,
    pub host: String,
    pub port: u16,
    pub dialout_max_attempts: u32,
    pub record_calls: bool,
    pub voicemail: VoicemailProfile,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Settings")
            .field("daily_api_key", &redact(&self.daily_api_key))
            .field("daily_api_url", &self.daily_api_url.as_str())
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("cartesia_api_key", &redact(&self.cartesia_api_key))
            .field("pipecat_api_key", &redact(&self.pipecat_api_key))
            .field("pipecat_service", &self.pipecat_service)
            .field("pipecat_api_url", &self.pipecat_api_url.as_str())
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dialout_max_attempts", &self.dialout_max_attempts)
            .field("record_calls", &self.record_calls)
            .field("voicemail", &self.voicemail)
            .finish()
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable source. Blank values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = VoicemailProfile::default();
        let voicemail = VoicemailProfile {
            recipient_name: get("VOICEMAIL_RECIPIENT_NAME").unwrap_or(defaults.recipient_name),
            caller_name: get("VOICEMAIL_CALLER_NAME").unwrap_or(defaults.caller_name),
            callback_number: get("VOICEMAIL_CALLBACK_NUMBER").unwrap_or(defaults.callback_number),
        };

        let dialout_max_attempts = match get("DIALOUT_MAX_ATTEMPTS") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n,
                Ok(_) => return Err(invalid("DIALOUT_MAX_ATTEMPTS", &raw, "must be at least 1")),
                Err(e) => return Err(invalid("DIALOUT_MAX_ATTEMPTS", &raw, e)),
            },
            None => DEFAULT_MAX_ATTEMPTS,
        };

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| invalid("PORT", &raw, e))?,
            None => DEFAULT_PORT,
        };

        let record_calls = match get("RECORD_CALLS") {
            Some(raw) => parse_bool("RECORD_CALLS", &raw)?,
            None => true,
        };

        Ok(Self {
            daily_api_key: get("DAILY_API_KEY"),
            daily_api_url: parse_url("DAILY_API_URL", get("DAILY_API_URL"), DEFAULT_DAILY_API_URL)?,
            openai_api_key: get("OPENAI_API_KEY"),
            cartesia_api_key: get("CARTESIA_API_KEY"),
            pipecat_api_key: get("PIPECAT_API_KEY"),
            pipecat_service: get("PIPECAT_SERVICE"),
            pipecat_api_url: parse_url(
                "PIPECAT_API_URL",
                get("PIPECAT_API_URL"),
                DEFAULT_PIPECAT_API_URL,
            )?,
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            dialout_max_attempts,
            record_calls,
            voicemail,
        })
    }

    /// The webhook server needs the provisioning credentials.
    pub fn validate_for_server(&self) -> Result<(), ConfigError> {
        require(&self.pipecat_api_key, "PIPECAT_API_KEY")?;
        require(&self.pipecat_service, "PIPECAT_SERVICE")?;
        Ok(())
    }

    /// A session needs the calling provider, LLM and TTS credentials.
    pub fn validate_for_session(&self) -> Result<(), ConfigError> {
        require(&self.daily_api_key, "DAILY_API_KEY")?;
        require(&self.openai_api_key, "OPENAI_API_KEY")?;
        require(&self.cartesia_api_key, "CARTESIA_API_KEY")?;
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            max_dialout_attempts: self.dialout_max_attempts,
            record_calls: self.record_calls,
            voicemail: self.voicemail.clone(),
        }
    }
}

fn require(value: &Option<String>, var: &'static str) -> Result<(), ConfigError> {
    match value {
        Some(_) => Ok(()),
        None => Err(ConfigError::Missing(var)),
    }
}

fn invalid(var: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_url(var: &'static str, raw: Option<String>, default: &str) -> Result<Url, ConfigError> {
    let raw = raw.unwrap_or_else(|| default.to_string());
    let url = Url::parse(&raw).map_err(|e| invalid(var, &raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(var, &raw, format!("unsupported scheme '{}'", other))),
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, raw, "expected true or false")),
    }
}
