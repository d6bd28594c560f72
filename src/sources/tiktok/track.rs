use std::{
    io::{Cursor, Read, Write},
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{
    common::{AudioFormat, HttpClient, SourceError, SourceResult},
    configs::HttpConfig,
    protocol::tracks::TrackInfo,
    sources::{
        plugin::{PlaybackAttempt, PlaybackStrategy},
        stream::{HttpStreamOpener, StreamOpener},
    },
};

const PAIR_FORMAT_VERSION: u8 = 1;

/// Primary video URL with the optional audio-only fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPair {
    pub video_url: String,
    pub music_url: Option<String>,
}

impl UrlPair {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Writes into a Vec cannot fail.
        let _ = write_pair(&mut out, self);
        out
    }

    /// An empty payload means the pair was never resolved.
    pub fn decode(payload: &[u8]) -> SourceResult<Option<Self>> {
        if payload.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(payload);
        let version = cursor.read_u8()?;
        if version != PAIR_FORMAT_VERSION {
            return Err(SourceError::Decode(format!("unknown tiktok payload version {}", version)));
        }
        let video_url = read_str(&mut cursor)?;
        let music_url = match cursor.read_u8()? {
            0 => None,
            _ => Some(read_str(&mut cursor)?),
        };
        Ok(Some(Self { video_url, music_url }))
    }
}

fn write_pair(out: &mut Vec<u8>, pair: &UrlPair) -> std::io::Result<()> {
    out.write_u8(PAIR_FORMAT_VERSION)?;
    write_str(out, &pair.video_url)?;
    match &pair.music_url {
        Some(url) => {
            out.write_u8(1)?;
            write_str(out, url)
        }
        None => out.write_u8(0),
    }
}

fn write_str(out: &mut Vec<u8>, s: &str) -> std::io::Result<()> {
    out.write_u32::<BigEndian>(s.len() as u32)?;
    out.write_all(s.as_bytes())
}

fn read_str(cursor: &mut Cursor<&[u8]>) -> SourceResult<String> {
    let len = cursor.read_u32::<BigEndian>()? as usize;
    let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
    if len > remaining {
        return Err(SourceError::Decode("tiktok payload truncated".into()));
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| SourceError::Decode(e.to_string()))
}

/// Per-track playback state: its own cookie session, and the URL pair
/// fetched on first play. The stream opener shares the session's jar.
pub struct TikTokPlayback {
    http: HttpConfig,
    base_url: String,
    session: OnceLock<(HttpClient, HttpStreamOpener)>,
    pair: OnceCell<UrlPair>,
}

impl TikTokPlayback {
    pub fn new(http: HttpConfig, base_url: String, pair: Option<UrlPair>) -> Self {
        Self {
            http,
            base_url,
            session: OnceLock::new(),
            pair: OnceCell::new_with(pair),
        }
    }

    fn session(&self) -> SourceResult<&(HttpClient, HttpStreamOpener)> {
        if let Some(session) = self.session.get() {
            return Ok(session);
        }
        let client = super::build_client(&self.http, &self.base_url, true)?;
        // A concurrent caller may win the race; its pair is the one kept.
        let _ = self
            .session
            .set((client.clone(), HttpStreamOpener::new(client)));
        self.session
            .get()
            .ok_or_else(|| SourceError::Misconfigured("tiktok session unavailable".into()))
    }

    /// Collects cookies from the landing page, then re-reads the video page
    /// with them.
    async fn resolve_pair(&self, info: &TrackInfo) -> SourceResult<UrlPair> {
        let (client, _) = self.session()?;

        let landing = format!("{}/", self.base_url);
        let response = client.execute(client.get(&landing)).await?;
        debug!("TikTok cookie bootstrap returned {}", response.status());

        let page_url = format!("{}/@{}/video/{}", self.base_url, info.author, info.identifier);
        let meta = super::fetch_metadata(client, &page_url)
            .await?
            .ok_or_else(|| SourceError::NotFound { url: page_url.clone() })?;
        Ok(meta.url_pair())
    }

    pub fn cached_pair(&self) -> Option<&UrlPair> {
        self.pair.get()
    }
}

#[async_trait]
impl PlaybackStrategy for TikTokPlayback {
    async fn playback_url(&self, info: &TrackInfo, attempt: PlaybackAttempt) -> SourceResult<String> {
        let pair = self.pair.get_or_try_init(|| self.resolve_pair(info)).await?;
        match attempt {
            PlaybackAttempt::Primary => Ok(pair.video_url.clone()),
            PlaybackAttempt::Fallback => pair
                .music_url
                .clone()
                .ok_or_else(|| SourceError::shape("music.playUrl", info.uri.clone().unwrap_or_default())),
        }
    }

    fn container(&self, url: &str) -> AudioFormat {
        if url.contains(".mp3") {
            AudioFormat::Mp3
        } else {
            AudioFormat::Mp4
        }
    }

    fn has_fallback(&self) -> bool {
        self.pair.get().is_some_and(|pair| pair.music_url.is_some())
    }

    /// The CDN answers 403 with a playable body.
    fn accepted_statuses(&self) -> &[u16] {
        &[403]
    }

    fn stream_opener(&self) -> Option<&dyn StreamOpener> {
        self.session()
            .ok()
            .map(|(_, opener)| opener as &dyn StreamOpener)
    }

    fn encode_state(&self) -> Vec<u8> {
        self.pair.get().map(UrlPair::encode).unwrap_or_default()
    }

    fn fresh(&self) -> Arc<dyn PlaybackStrategy> {
        Arc::new(Self::new(self.http.clone(), self.base_url.clone(), None))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;
    use crate::protocol::tracks::LoadResult;
    use crate::sources::{
        plugin::{AudioTrack, LoadOptions, SourcePlugin},
        stream::{SeekableStream, StreamRequest},
        tiktok::{TikTokSource, tests::next_data_page},
    };

    #[test]
    fn test_pair_payload() {
        let pair = UrlPair {
            video_url: "https://v16.tiktokcdn.com/play.mp4".into(),
            music_url: Some("https://sf16.tiktokcdn.com/music.mp3".into()),
        };
        assert_eq!(UrlPair::decode(&pair.encode()).unwrap(), Some(pair));
        assert_eq!(UrlPair::decode(&[]).unwrap(), None);
        assert!(UrlPair::decode(&[1, 0, 0, 0, 9, b'x']).is_err());
    }

    #[test]
    fn test_session_and_opener_built_together() {
        let playback = TikTokPlayback::new(HttpConfig::default(), "https://www.tiktok.com".into(), None);
        assert!(playback.session.get().is_none());

        let first = playback.stream_opener().unwrap() as *const dyn StreamOpener as *const ();
        assert!(playback.session.get().is_some());
        let second = playback.stream_opener().unwrap() as *const dyn StreamOpener as *const ();
        assert_eq!(first, second);

        let (_, opener) = playback.session().unwrap();
        assert_eq!(opener as *const HttpStreamOpener as *const (), first);
    }

    struct NeverOpener(AtomicUsize);

    #[async_trait]
    impl StreamOpener for NeverOpener {
        async fn open(&self, _request: StreamRequest<'_>) -> SourceResult<Box<dyn SeekableStream>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Decode("default opener must not be used".into()))
        }
    }

    #[tokio::test]
    async fn test_playback_bootstraps_cookies_and_falls_back() {
        let server = MockServer::start().await;
        let video_url = format!("{}/cdn/play.mp4", server.uri());
        let music_url = format!("{}/cdn/music.mp3", server.uri());

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "tt_webid=abc; Path=/"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/@chef.example/video/7234567890123456789"))
            .respond_with(ResponseTemplate::new(200).set_body_string(next_data_page(&video_url, &music_url)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cdn/play.mp4"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cdn/music.mp3"))
            .respond_with(ResponseTemplate::new(403).set_body_bytes(b"ID3".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let source = TikTokSource::with_base_url(&HttpConfig::default(), &server.uri()).unwrap();
        let LoadResult::Track(track) = source
            .load(
                "https://www.tiktok.com/@chef.example/video/7234567890123456789",
                &LoadOptions::default(),
            )
            .await
            .unwrap()
        else {
            panic!("expected a track");
        };

        let default_opener = NeverOpener(AtomicUsize::new(0));
        let opened = track.open_stream(&default_opener).await.unwrap();

        assert_eq!(opened.url, music_url);
        assert_eq!(opened.format, AudioFormat::Mp3);
        assert_eq!(default_opener.0.load(Ordering::SeqCst), 0);

        // The resolved pair travels with the encoded track.
        let payload = source.encode_track(&track);
        let restored: AudioTrack = source.decode_track(track.info.clone(), &payload).unwrap();
        assert_eq!(restored.playback_url().await.unwrap(), video_url);
    }
}
