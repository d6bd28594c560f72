use serde::{Deserialize, Serialize};

/// Which resolvers the registry should construct.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourcesConfig {
    #[serde(default = "enabled")]
    pub spotify: bool,
    #[serde(default = "enabled")]
    pub clypit: bool,
    #[serde(default = "enabled")]
    pub speech: bool,
    #[serde(default = "enabled")]
    pub pornhub: bool,
    #[serde(default = "enabled")]
    pub mixcloud: bool,
    #[serde(default = "enabled")]
    pub tiktok: bool,
    #[serde(default = "enabled")]
    pub reddit: bool,
    #[serde(default = "enabled")]
    pub getyarn: bool,
    #[serde(default = "enabled")]
    pub ocremix: bool,
    #[serde(default = "enabled")]
    pub youtube: bool,
}

fn enabled() -> bool {
    true
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            spotify: true,
            clypit: true,
            speech: true,
            pornhub: true,
            mixcloud: true,
            tiktok: true,
            reddit: true,
            getyarn: true,
            ocremix: true,
            youtube: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetryConfig {
    /// Leave unset to retry transient failures without a bound.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YouTubeConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_playlist_page_count")]
    pub playlist_page_count: usize,
    #[serde(default = "enabled")]
    pub update_context: bool,
    #[serde(default = "default_context_refresh_interval_secs")]
    pub context_refresh_interval_secs: u64,
}

fn default_playlist_page_count() -> usize {
    6
}

fn default_context_refresh_interval_secs() -> u64 {
    86_400
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            playlist_page_count: default_playlist_page_count(),
            update_context: true,
            context_refresh_interval_secs: default_context_refresh_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    #[serde(default = "default_playlist_limit")]
    pub playlist_limit: usize,
    #[serde(default = "default_track_resolve_concurrency")]
    pub track_resolve_concurrency: usize,
    #[serde(default = "default_token_refresh_interval_secs")]
    pub token_refresh_interval_secs: u64,
}

fn default_playlist_limit() -> usize {
    100
}

fn default_track_resolve_concurrency() -> usize {
    10
}

fn default_token_refresh_interval_secs() -> u64 {
    3_600
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            playlist_limit: default_playlist_limit(),
            track_resolve_concurrency: default_track_resolve_concurrency(),
            token_refresh_interval_secs: default_token_refresh_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SpeechConfig {
    #[serde(default = "default_speech_language")]
    pub language: String,
}

fn default_speech_language() -> String {
    "en-AU".to_string()
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            language: default_speech_language(),
        }
    }
}
