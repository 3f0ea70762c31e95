use std::{collections::HashMap, path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File};
use relay::{GenerationSettings, RelayConfig};
use serde::Deserialize;
use shared::domain::DEFAULT_MAX_IMAGE_BYTES;

pub const SETTINGS_FILE: &str = "relay.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub upstream_url: String,
    pub model: String,
    pub prompt: String,
    pub max_image_bytes: usize,
    pub upstream_timeout_secs: u64,
    pub allowed_origins: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for Settings {
    fn default() -> Self {
        let relay = RelayConfig::default();
        Self {
            bind_host: "0.0.0.0".into(),
            port: 3001,
            api_key: None,
            upstream_url: relay.upstream_url,
            model: relay.model,
            prompt: relay.prompt,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            upstream_timeout_secs: relay.upstream_timeout.as_secs(),
            allowed_origins: vec!["http://localhost:5173".into()],
            max_tokens: relay.generation.max_tokens,
            temperature: relay.generation.temperature,
            top_p: relay.generation.top_p,
        }
    }
}

impl Settings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            api_key: self
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string),
            upstream_url: self.upstream_url.clone(),
            model: self.model.clone(),
            prompt: self.prompt.clone(),
            max_image_bytes: self.max_image_bytes,
            upstream_timeout: Duration::from_secs(self.upstream_timeout_secs.max(1)),
            generation: GenerationSettings {
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                top_p: self.top_p,
            },
        }
    }
}

/// Loads settings from `relay.toml` (optional) and the process environment.
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_settings_from(Path::new(SETTINGS_FILE), None)
}

/// Layers, lowest first: defaults, the settings file, `APP__*` variables, then
/// the bare `NVIDIA_API_KEY`, `PORT` and `ALLOWED_ORIGINS` variables. `env`
/// replaces the process environment when given.
pub fn load_settings_from(
    file: &Path,
    env: Option<HashMap<String, String>>,
) -> Result<Settings, ConfigError> {
    let lookup = |name: &str| match &env {
        Some(vars) => vars.get(name).cloned(),
        None => std::env::var(name).ok(),
    };

    Config::builder()
        .add_source(File::from(file).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("allowed_origins")
                .try_parsing(true)
                .source(env.clone()),
        )
        .set_override_option("api_key", lookup("NVIDIA_API_KEY"))?
        .set_override_option("port", lookup("PORT"))?
        .set_override_option(
            "allowed_origins",
            lookup("ALLOWED_ORIGINS").map(|origins| split_origins(&origins)),
        )?
        .build()?
        .try_deserialize()
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;
