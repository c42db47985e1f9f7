use serde::{Deserialize, Serialize};
use std::{
  env, fs,
  path::{Path, PathBuf},
  str::FromStr,
};

use crate::error::ConfigError;
use crate::types::*;

pub const CONFIG_PATH_ENV: &str = "BRACKET_ENGINE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "bracket-engine.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
  pub cache_ttl_secs: u64,
  pub shuffle_seed: Option<u64>,
  pub format: FormatConfig,
  pub log_dir: String,
  pub log_filter: String,
  pub notification_buffer: usize,
  pub demo_event_id: EventId,
  pub demo_entrants: Vec<TeamId>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    EngineConfig {
      cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
      shuffle_seed: None,
      format: FormatConfig::default(),
      log_dir: "logs".to_string(),
      log_filter: "info".to_string(),
      notification_buffer: 64,
      demo_event_id: 1,
      demo_entrants: (1..=8).collect(),
    }
  }
}

pub fn config_path() -> PathBuf {
  env_default(CONFIG_PATH_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

pub fn env_default(key: &str) -> Option<String> {
  env::var(key)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

fn parse_value<T: FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
  value
    .parse::<T>()
    .map_err(|_| ConfigError::InvalidEnv { key: key.to_string(), value })
}

/// Environment values win over the file. `lookup` is `env_default` outside tests.
pub fn apply_env_overrides<F>(mut config: EngineConfig, lookup: F) -> Result<EngineConfig, ConfigError>
where
  F: Fn(&str) -> Option<String>,
{
  if let Some(value) = lookup("BRACKET_CACHE_TTL_SECS") {
    config.cache_ttl_secs = parse_value("BRACKET_CACHE_TTL_SECS", value)?;
  }
  if let Some(value) = lookup("BRACKET_SHUFFLE_SEED") {
    config.shuffle_seed = Some(parse_value("BRACKET_SHUFFLE_SEED", value)?);
  }
  if let Some(value) = lookup("BRACKET_LOG_DIR") {
    config.log_dir = value;
  }
  if let Some(value) = lookup("BRACKET_LOG_FILTER") {
    config.log_filter = value;
  }
  Ok(config)
}

pub fn load_config_from(path: &Path) -> Result<EngineConfig, ConfigError> {
  if !path.is_file() {
    return Ok(EngineConfig::default());
  }
  let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.display().to_string(),
    source,
  })?;
  serde_json::from_str::<EngineConfig>(&data).map_err(|source| ConfigError::Parse {
    path: path.display().to_string(),
    source,
  })
}

/// Loads `.env`, the JSON config file (missing file means defaults), then env overrides.
pub fn load_config() -> Result<EngineConfig, ConfigError> {
  dotenvy::dotenv().ok();
  let config = load_config_from(&config_path())?;
  let config = apply_env_overrides(config, env_default)?;
  config.format.validate()?;
  Ok(config)
}
