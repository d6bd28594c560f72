use std::sync::Arc;

use tracing::{debug, warn};

use super::{
  clypit::ClypitSource,
  context::ContextStore,
  getyarn::GetyarnSource,
  mixcloud::MixcloudSource,
  ocremix::OcremixSource,
  plugin::{AudioTrack, BoxedSource, LoadOptions, OpenedStream},
  pornhub::PornHubSource,
  reddit::RedditSource,
  speech::SpeechSource,
  spotify::SpotifySource,
  stream::HttpStreamOpener,
  tiktok::TikTokSource,
  youtube::{YouTubeSource, api::YouTubeApi, context::YoutubeVersionData},
};
use crate::{
  common::{
    HttpClient, LoadFailure, SourceError, SourceResult,
    retry::{RetryPolicy, retry_transient},
  },
  configs::Config,
  protocol::tracks::{self, LoadError, LoadResult},
};

/// Source Manager
pub struct SourceManager {
  sources: Vec<BoxedSource>,
  retry: RetryPolicy,
  opener: HttpStreamOpener,
}

impl SourceManager {
  /// Create a new SourceManager with every enabled source. Sources that fail
  /// to initialize are logged and left out.
  pub fn new(config: &Config) -> SourceResult<Self> {
    Self::with_shared_youtube_context(config, None)
  }

  /// Like `new`, but reads YouTube context from a store refreshed by the
  /// caller instead of starting a refresher here.
  pub fn with_shared_youtube_context(
    config: &Config,
    shared_context: Option<Arc<ContextStore<YoutubeVersionData>>>,
  ) -> SourceResult<Self> {
    let mut sources: Vec<BoxedSource> = Vec::new();
    let http = &config.http;

    let youtube_config = config.youtube.clone().unwrap_or_default();
    let owns_context = shared_context.is_none();
    let context = shared_context.unwrap_or_else(ContextStore::new);
    // One client for every resolver that talks to the Data API.
    let youtube_api = match youtube_config.api_key.as_deref() {
      Some(key) => YouTubeApi::new(http, key, context.clone()).map(Arc::new),
      None => Err(SourceError::Misconfigured("youtube.api_key is not set".into())),
    };
    let shared_api = || {
      youtube_api
        .as_ref()
        .map(Arc::clone)
        .map_err(|e| SourceError::Misconfigured(format!("youtube api unavailable: {}", e)))
    };

    macro_rules! register_source {
      ($enabled:expr, $name:literal, $ctor:expr) => {
        if $enabled {
          match $ctor {
            Ok(src) => {
              tracing::info!("Loaded source: {}", $name);
              sources.push(Box::new(src));
            }
            Err(e) => {
              tracing::error!("{} source failed to initialize: {}", $name, e);
            }
          }
        }
      };
    }

    register_source!(
      config.sources.spotify,
      "Spotify",
      shared_api().and_then(|api| {
        SpotifySource::new(http, &config.spotify.clone().unwrap_or_default(), api)
      })
    );
    register_source!(config.sources.clypit, "Clyp.it", ClypitSource::new(http));
    register_source!(
      config.sources.speech,
      "Speech",
      Ok::<_, SourceError>(SpeechSource::new(&config.speech.clone().unwrap_or_default()))
    );
    register_source!(config.sources.pornhub, "PornHub", PornHubSource::new(http));
    register_source!(config.sources.mixcloud, "Mixcloud", MixcloudSource::new(http));
    register_source!(config.sources.tiktok, "TikTok", TikTokSource::new(http));
    register_source!(config.sources.reddit, "Reddit", RedditSource::new(http));
    register_source!(config.sources.getyarn, "Getyarn", GetyarnSource::new(http));
    register_source!(config.sources.ocremix, "OC ReMix", OcremixSource::new(http));
    register_source!(
      config.sources.youtube,
      "YouTube",
      shared_api().and_then(|api| {
        YouTubeSource::from_api(http, &youtube_config, api, context.clone(), owns_context)
      })
    );

    Self::from_sources(sources, RetryPolicy::from(&config.retry), HttpClient::builder().timeouts(http).build()?)
  }

  /// Registry over an explicit list, tried in the given order.
  pub fn from_sources(sources: Vec<BoxedSource>, retry: RetryPolicy, stream_client: HttpClient) -> SourceResult<Self> {
    Ok(Self {
      sources,
      retry,
      opener: HttpStreamOpener::new(stream_client),
    })
  }

  pub fn source_names(&self) -> Vec<&str> {
    self.sources.iter().map(|s| s.name()).collect()
  }

  fn source(&self, name: &str) -> Option<&BoxedSource> {
    self.sources.iter().find(|s| s.name() == name)
  }

  /// Hands the identifier to the first source that claims it. Transient
  /// failures are retried per the configured policy.
  pub async fn resolve(&self, identifier: &str, options: &LoadOptions) -> Result<LoadResult, LoadFailure> {
    let Some(source) = self.sources.iter().find(|s| s.can_handle(identifier)) else {
      debug!("No source matched {}", identifier);
      return Ok(LoadResult::Empty {});
    };

    let label = format!("{} load of {}", source.name(), identifier);
    retry_transient(&self.retry, &label, || source.load(identifier, options))
      .await
      .map_err(|error| LoadFailure {
        source_name: source.name().to_string(),
        identifier: identifier.to_string(),
        error,
      })
  }

  /// `resolve` with failures rendered as `LoadResult::Error`.
  pub async fn load(&self, identifier: &str, options: &LoadOptions) -> LoadResult {
    match self.resolve(identifier, options).await {
      Ok(result) => result,
      Err(failure) => {
        warn!("{}", failure);
        LoadResult::Error(LoadError::from(&failure))
      }
    }
  }

  /// Base64 of the shared track fields plus the owning source's payload.
  pub fn encode_track(&self, track: &AudioTrack) -> SourceResult<String> {
    let source = self
      .source(&track.info.source_name)
      .ok_or_else(|| SourceError::InvalidInput(format!("no source named {}", track.info.source_name)))?;
    if !source.is_encodable(track) {
      return Err(SourceError::InvalidInput(format!(
        "{} track {} cannot be encoded",
        source.name(),
        track.info.identifier
      )));
    }

    let data = tracks::encode_track(&track.info, &source.encode_track(track))?;
    Ok(tracks::to_base64(&data))
  }

  pub fn decode_track(&self, encoded: &str) -> SourceResult<AudioTrack> {
    let (info, payload) = tracks::decode_track(&tracks::from_base64(encoded)?)?;
    let source = self
      .source(&info.source_name)
      .ok_or_else(|| SourceError::InvalidInput(format!("no source named {}", info.source_name)))?;
    source.decode_track(info, &payload)
  }

  /// Opens the track's bytes, with the shared HTTP opener as the default.
  pub async fn open_stream(&self, track: &AudioTrack) -> SourceResult<OpenedStream> {
    track.open_stream(&self.opener).await
  }

  /// Stops every source's background work.
  pub fn shutdown(&self) {
    for source in &self.sources {
      source.shutdown();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  use async_trait::async_trait;
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::{
    common::Severity,
    configs::YouTubeConfig,
    protocol::tracks::TrackInfo,
    sources::plugin::{SourcePlugin, TemplatePlayback},
  };

  #[test]
  fn test_registration_skips_sources_without_credentials() {
    let manager = SourceManager::new(&Config::default()).unwrap();
    assert_eq!(
      manager.source_names(),
      vec!["clypit", "speech", "pornhub", "mixcloud", "tiktok", "reddit", "getyarn", "ocremix"]
    );
  }

  #[tokio::test]
  async fn test_registration_order_and_flags() {
    let mut config = Config::from_toml_str(
      r#"
      [sources]
      pornhub = false
      getyarn = false
      "#,
    )
    .unwrap();
    config.youtube = Some(YouTubeConfig {
      api_key: Some("key".into()),
      update_context: false,
      ..Default::default()
    });

    let manager = SourceManager::new(&config).unwrap();
    assert_eq!(
      manager.source_names(),
      vec!["clypit", "speech", "mixcloud", "tiktok", "reddit", "ocremix", "youtube"]
    );
    manager.shutdown();
  }

  #[tokio::test]
  async fn test_speech_encode_decode() {
    let manager = SourceManager::new(&Config::default()).unwrap();
    let LoadResult::Track(track) = manager.load("speak:hello there", &LoadOptions::default()).await else {
      panic!("expected a track");
    };

    let encoded = manager.encode_track(&track).unwrap();
    let decoded = manager.decode_track(&encoded).unwrap();
    assert_eq!(decoded.info, track.info);
    assert_eq!(decoded.playback_url().await.unwrap(), track.playback_url().await.unwrap());
  }

  #[tokio::test]
  async fn test_unmatched_and_failed_loads() {
    let manager = SourceManager::new(&Config::default()).unwrap();
    assert!(manager.load("https://example.com/song.mp3", &LoadOptions::default()).await.is_empty());

    let long_text = format!("speak:{}", "a".repeat(201));
    match manager.load(&long_text, &LoadOptions::default()).await {
      LoadResult::Error(error) => assert_eq!(error.severity, Severity::Common),
      other => panic!("expected an error, got {other:?}"),
    }

    let failure = manager.resolve(&long_text, &LoadOptions::default()).await.unwrap_err();
    assert_eq!(failure.source_name, "speech");
  }

  #[test]
  fn test_decode_for_unregistered_source() {
    let manager = SourceManager::new(&Config::default()).unwrap();
    let info = TrackInfo::new("bandcamp", "x", "t", "a", 0, "https://example.bandcamp.com/track/x");
    let encoded = tracks::to_base64(&tracks::encode_track(&info, &[]).unwrap());
    assert!(matches!(manager.decode_track(&encoded), Err(SourceError::InvalidInput(_))));
  }

  /// Answers with a 503 until `failures` attempts have been made.
  struct FlakySource {
    attempts: AtomicU32,
    failures: u32,
  }

  #[async_trait]
  impl SourcePlugin for FlakySource {
    fn name(&self) -> &str {
      "flaky"
    }

    fn can_handle(&self, identifier: &str) -> bool {
      identifier.starts_with("flaky:")
    }

    async fn load(&self, identifier: &str, _options: &LoadOptions) -> SourceResult<LoadResult> {
      if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
        return Err(SourceError::ServerError {
          status: 503,
          url: identifier.to_string(),
        });
      }
      let info = TrackInfo::new("flaky", identifier, "t", "a", 0, identifier);
      Ok(LoadResult::Track(AudioTrack::new(
        info,
        TemplatePlayback::new(|info| info.identifier.clone(), crate::common::AudioFormat::Mp3),
      )))
    }

    fn decode_track(&self, info: TrackInfo, _payload: &[u8]) -> SourceResult<AudioTrack> {
      Err(SourceError::InvalidInput(info.identifier))
    }
  }

  #[tokio::test]
  async fn test_transient_failures_are_retried() {
    let retry = RetryPolicy {
      max_attempts: None,
      base_delay: Duration::from_millis(1),
      max_delay: Duration::from_millis(1),
    };
    let manager = SourceManager::from_sources(
      vec![Box::new(FlakySource {
        attempts: AtomicU32::new(0),
        failures: 3,
      })],
      retry,
      HttpClient::new().unwrap(),
    )
    .unwrap();

    let result = manager.resolve("flaky:1", &LoadOptions::default()).await.unwrap();
    assert!(matches!(result, LoadResult::Track(_)));
  }
}
