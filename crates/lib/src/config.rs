//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.line-gemini-bot/config.json`) and environment.
//! Credentials are normally supplied through the environment; the file is optional.

use crate::session::SessionMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const ENV_CHANNEL_SECRET: &str = "LINE_CHANNEL_SECRET";
pub const ENV_CHANNEL_ACCESS_TOKEN: &str = "LINE_CHANNEL_ACCESS_TOKEN";
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_PORT: &str = "PORT";
pub const ENV_CONFIG_PATH: &str = "LINE_BOT_CONFIG_PATH";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// LINE Messaging API channel settings.
    #[serde(default)]
    pub line: LineConfig,

    /// Generative backend settings.
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Reply behaviour (persona, session mode).
    #[serde(default)]
    pub bot: BotConfig,
}

/// Bind address and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Listening port (default 8000). Overridden by PORT env.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"; the webhook must be reachable by the platform).
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_port() -> u16 {
    8000
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

/// LINE channel credentials and endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineConfig {
    /// Channel secret used to verify `x-line-signature`. Overridden by LINE_CHANNEL_SECRET env.
    pub channel_secret: Option<String>,
    /// Long-lived channel access token for the reply API. Overridden by LINE_CHANNEL_ACCESS_TOKEN env.
    pub channel_access_token: Option<String>,
    /// Messaging API base URL (default https://api.line.me). Useful for tests or proxies.
    pub api_base: Option<String>,
}

/// Generative Language API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiConfig {
    /// API key. Overridden by GEMINI_API_KEY env.
    pub api_key: Option<String>,
    /// Model name as used in the `models/{model}:generateContent` path.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Upper bound for one generation call; on expiry the fallback reply is sent.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// API base URL (default https://generativelanguage.googleapis.com).
    pub api_base: Option<String>,
}

fn default_model() -> String {
    "gemma-3n-e4b-it".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_timeout_secs(),
            api_base: None,
        }
    }
}

/// Reply behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Persona preamble placed before the user's text. When unset the built-in persona is used.
    pub persona: Option<String>,
    /// "singleShot" (default): every message is a fresh prompt. "sharedChat": one history shared by all users.
    #[serde(default)]
    pub session_mode: SessionMode,
    /// Turns (user + model pair) kept in the shared chat history. Only used in sharedChat mode.
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

fn default_max_history_turns() -> usize {
    20
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            persona: None,
            session_mode: SessionMode::default(),
            max_history_turns: default_max_history_turns(),
        }
    }
}

/// Secrets required to serve webhooks. Resolved once at startup and never logged.
#[derive(Clone)]
pub struct Credentials {
    pub channel_secret: String,
    pub channel_access_token: String,
    pub gemini_api_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("channel_secret", &"<redacted>")
            .field("channel_access_token", &"<redacted>")
            .field("gemini_api_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Resolve all three secrets (env first, then config). Fails listing every missing value.
    pub fn resolve(config: &Config) -> Result<Self> {
        Self::resolve_with(config, &process_env)
    }

    fn resolve_with(config: &Config, env: EnvLookup<'_>) -> Result<Self> {
        let channel_secret = channel_secret_with(config, env);
        let channel_access_token = channel_access_token_with(config, env);
        let gemini_api_key = gemini_api_key_with(config, env);
        match (channel_secret, channel_access_token, gemini_api_key) {
            (Some(channel_secret), Some(channel_access_token), Some(gemini_api_key)) => Ok(Self {
                channel_secret,
                channel_access_token,
                gemini_api_key,
            }),
            (secret, token, key) => {
                let missing: Vec<&str> = [
                    (secret.is_none(), ENV_CHANNEL_SECRET),
                    (token.is_none(), ENV_CHANNEL_ACCESS_TOKEN),
                    (key.is_none(), ENV_GEMINI_API_KEY),
                ]
                .into_iter()
                .filter_map(|(absent, name)| absent.then_some(name))
                .collect();
                anyhow::bail!("missing required configuration: {}", missing.join(", "))
            }
        }
    }
}

/// Environment variable lookup; the process environment outside tests.
type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Trimmed, non-empty env value.
fn env_value(env: EnvLookup<'_>, name: &str) -> Option<String> {
    env(name).and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn channel_secret_with(config: &Config, env: EnvLookup<'_>) -> Option<String> {
    env_value(env, ENV_CHANNEL_SECRET).or_else(|| non_empty(config.line.channel_secret.as_ref()))
}

fn channel_access_token_with(config: &Config, env: EnvLookup<'_>) -> Option<String> {
    env_value(env, ENV_CHANNEL_ACCESS_TOKEN)
        .or_else(|| non_empty(config.line.channel_access_token.as_ref()))
}

fn gemini_api_key_with(config: &Config, env: EnvLookup<'_>) -> Option<String> {
    env_value(env, ENV_GEMINI_API_KEY).or_else(|| non_empty(config.gemini.api_key.as_ref()))
}

fn port_with(config: &Config, env: EnvLookup<'_>) -> Result<u16> {
    match env_value(env, ENV_PORT) {
        Some(p) => p
            .parse()
            .with_context(|| format!("{} must be a port number, got {:?}", ENV_PORT, p)),
        None => Ok(config.server.port),
    }
}

/// Resolve the channel secret: env LINE_CHANNEL_SECRET overrides config.
pub fn resolve_channel_secret(config: &Config) -> Option<String> {
    channel_secret_with(config, &process_env)
}

/// Resolve the channel access token: env LINE_CHANNEL_ACCESS_TOKEN overrides config.
pub fn resolve_channel_access_token(config: &Config) -> Option<String> {
    channel_access_token_with(config, &process_env)
}

/// Resolve the Gemini API key: env GEMINI_API_KEY overrides config.
pub fn resolve_gemini_api_key(config: &Config) -> Option<String> {
    gemini_api_key_with(config, &process_env)
}

/// Resolve the listening port: env PORT overrides config. A PORT that is not a port number is an error.
pub fn resolve_port(config: &Config) -> Result<u16> {
    port_with(config, &process_env)
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var(ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".line-gemini-bot").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
