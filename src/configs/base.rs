use serde::{Deserialize, Serialize};

use crate::configs::*;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
  pub logging: Option<LoggingConfig>,
  #[serde(default)]
  pub http: HttpConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub sources: SourcesConfig,
  #[serde(default)]
  pub youtube: Option<YouTubeConfig>,
  #[serde(default)]
  pub spotify: Option<SpotifyConfig>,
  #[serde(default)]
  pub speech: Option<SpeechConfig>,
}

use crate::common::types::AnyResult;

impl Config {
  pub fn load() -> AnyResult<Self> {
    let config_path = if std::path::Path::new("config.toml").exists() {
      "config.toml"
    } else if std::path::Path::new("config.default.toml").exists() {
      "config.default.toml"
    } else {
      return Err("config.toml or config.default.toml not found".into());
    };

    eprintln!("Loading configuration from: {}", config_path);

    let config_str = std::fs::read_to_string(config_path)?;
    if config_str.is_empty() {
      return Err(format!("{} is empty", config_path).into());
    }

    Self::from_toml_str(&config_str)
  }

  pub fn from_toml_str(input: &str) -> AnyResult<Self> {
    let config: Config = toml::from_str(input)?;
    Ok(config)
  }
}
