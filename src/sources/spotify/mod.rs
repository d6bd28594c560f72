//! Spotify metadata resolved to playable YouTube videos.

use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::{
    common::{HttpClient, SourceError, SourceResult},
    configs::{HttpConfig, SpotifyConfig},
    protocol::tracks::{LoadResult, PlaylistData, PlaylistInfo, TrackInfo},
    sources::{
        context::RefreshSchedule,
        plugin::{AudioTrack, LoadOptions, PlaybackStrategy, SourcePlugin},
        youtube::{
            api::{Video, YouTubeApi, thumbnail_url},
            track::DelegatedPlayback,
        },
    },
};

pub mod token;

use token::{ClientCredentialsFetcher, SpotifyTokenTracker};

const API_URL: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const TOKEN_RETRY_DELAY: Duration = Duration::from_secs(10);

static TRACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:spotify:track:|https?://[a-z]+\.spotify\.com/(?:intl-[a-z]+/)?track/)(?P<id>[a-zA-Z0-9]+)").unwrap()
});

static ALBUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:spotify:album:|https?://[a-z]+\.spotify\.com/(?:intl-[a-z]+/)?album/)(?P<id>[a-zA-Z0-9]+)").unwrap()
});

static PLAYLIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:spotify:(?:user:[^:]+:)?playlist:|https?://[a-z]+\.spotify\.com/(?:intl-[a-z]+/)?(?:user/[^/]+/)?playlist/)(?P<id>[a-zA-Z0-9]+)",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotifyReference<'a> {
    Track(&'a str),
    Album(&'a str),
    Playlist(&'a str),
}

pub fn parse_reference(identifier: &str) -> Option<SpotifyReference<'_>> {
    let id = |re: &Regex| {
        re.captures(identifier)
            .and_then(|caps| caps.name("id"))
            .map(|m| m.as_str())
    };

    id(&ALBUM_RE)
        .map(SpotifyReference::Album)
        .or_else(|| id(&PLAYLIST_RE).map(SpotifyReference::Playlist))
        .or_else(|| id(&TRACK_RE).map(SpotifyReference::Track))
}

/// Title plus first artist, the query used to find the matching video.
fn search_query(track: &Value, fallback_artist: Option<&str>) -> Option<String> {
    let name = track["name"].as_str()?;
    let artist = fallback_artist.or_else(|| track["artists"][0]["name"].as_str())?;
    Some(format!("{} {}", name, artist))
}

fn first_image(images: &Value) -> Option<String> {
    images[0]["url"].as_str().map(str::to_string)
}

pub struct SpotifySource {
    client: HttpClient,
    api_url: String,
    tokens: SpotifyTokenTracker,
    youtube: Arc<YouTubeApi>,
    playlist_limit: usize,
    concurrency: usize,
    playback: Arc<dyn PlaybackStrategy>,
}

impl SpotifySource {
    /// Starts the hourly token refresher, so this needs a tokio runtime.
    pub fn new(http: &HttpConfig, config: &SpotifyConfig, youtube: Arc<YouTubeApi>) -> SourceResult<Self> {
        let schedule = RefreshSchedule {
            interval: Duration::from_secs(config.token_refresh_interval_secs),
            retry_after_failure: Some(TOKEN_RETRY_DELAY),
        };
        Self::with_endpoints(http, config, youtube, API_URL, TOKEN_URL, Some(schedule))
    }

    pub fn with_endpoints(
        http: &HttpConfig,
        config: &SpotifyConfig,
        youtube: Arc<YouTubeApi>,
        api_url: &str,
        token_url: &str,
        schedule: Option<RefreshSchedule>,
    ) -> SourceResult<Self> {
        let (Some(client_id), Some(client_secret)) =
            (config.client_id.as_deref(), config.client_secret.as_deref())
        else {
            return Err(SourceError::Misconfigured(
                "spotify.client_id and spotify.client_secret are required".into(),
            ));
        };

        let client = HttpClient::builder().timeouts(http).build()?;
        let fetcher = ClientCredentialsFetcher::new(client.clone(), token_url, client_id, client_secret);

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            tokens: SpotifyTokenTracker::new(fetcher, schedule),
            youtube,
            playlist_limit: config.playlist_limit,
            concurrency: config.track_resolve_concurrency.max(1),
            playback: DelegatedPlayback::shared(),
        })
    }

    /// `Ok(None)` for a 404.
    async fn api_get(&self, path: &str) -> SourceResult<Option<Value>> {
        self.api_get_url(&format!("{}{}", self.api_url, path)).await
    }

    /// Like `api_get`, for the absolute `next` links of paged responses.
    async fn api_get_url(&self, url: &str) -> SourceResult<Option<Value>> {
        let token = self.tokens.access_token().await?;
        let result = self
            .client
            .fetch_json(self.client.get(url).bearer_auth(token))
            .await;

        if let Err(SourceError::UpstreamRejected { status: 401, .. }) = &result {
            self.tokens.invalidate();
        }
        result
    }

    fn track(&self, video: &Video, artwork: Option<&str>) -> AudioTrack {
        let info = video
            .to_track_info("spotify")
            .with_artwork(Some(artwork.map_or_else(|| thumbnail_url(&video.id), str::to_string)));
        AudioTrack::new(info, self.playback.clone())
    }

    /// Searches every query in parallel; misses are skipped and the order of
    /// the hits follows `queries`.
    async fn resolve_video_ids(&self, queries: Vec<String>) -> SourceResult<Vec<String>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let futs = queries.into_iter().map(|query| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| SourceError::InvalidInput(e.to_string()))?;
                self.youtube.search_first(&query).await
            }
        });

        let results = join_all(futs).await;
        let mut ids = Vec::with_capacity(results.len());
        for result in results {
            if let Some(id) = result? {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn collection(&self, name: String, queries: Vec<String>, images: &Value) -> SourceResult<LoadResult> {
        let ids = self.resolve_video_ids(queries).await?;
        let videos = self.youtube.videos(&ids).await?;
        if videos.is_empty() {
            return Ok(LoadResult::Empty {});
        }

        let artwork = first_image(images);
        Ok(LoadResult::Playlist(PlaylistData {
            info: PlaylistInfo {
                name,
                selected_track: -1,
            },
            tracks: videos
                .iter()
                .map(|video| self.track(video, artwork.as_deref()))
                .collect(),
        }))
    }

    async fn load_track(&self, id: &str) -> SourceResult<LoadResult> {
        let Some(track) = self.api_get(&format!("/tracks/{}", id)).await? else {
            return Ok(LoadResult::Empty {});
        };
        let query = search_query(&track, None).ok_or_else(|| SourceError::shape("track.name", id))?;

        let Some(video_id) = self.youtube.search_first(&query).await? else {
            debug!("No YouTube match for Spotify track {}", id);
            return Ok(LoadResult::Empty {});
        };
        let Some(video) = self.youtube.video(&video_id).await? else {
            return Ok(LoadResult::Empty {});
        };

        let artwork = first_image(&track["album"]["images"]);
        Ok(LoadResult::Track(self.track(&video, artwork.as_deref())))
    }

    async fn load_album(&self, id: &str) -> SourceResult<LoadResult> {
        let Some(album) = self.api_get(&format!("/albums/{}", id)).await? else {
            return Ok(LoadResult::Empty {});
        };

        let artist = album["artists"][0]["name"].as_str();
        let queries: Vec<String> = album["tracks"]["items"]
            .as_array()
            .map(|items| items.iter().filter_map(|t| search_query(t, artist)).collect())
            .unwrap_or_default();
        if queries.is_empty() {
            return Ok(LoadResult::Empty {});
        }

        let name = album["name"].as_str().unwrap_or_default().to_string();
        self.collection(name, queries, &album["images"]).await
    }

    async fn load_playlist(&self, id: &str, options: &LoadOptions) -> SourceResult<LoadResult> {
        let Some(playlist) = self.api_get(&format!("/playlists/{}", id)).await? else {
            return Ok(LoadResult::Empty {});
        };

        let mut items = playlist["tracks"]["items"].as_array().cloned().unwrap_or_default();
        if items.is_empty() {
            return Ok(LoadResult::Empty {});
        }

        let size = playlist["tracks"]["total"]
            .as_u64()
            .map_or(items.len(), |total| total as usize);
        if size > self.playlist_limit && !options.limit_exempt {
            return Err(SourceError::LimitExceeded {
                size,
                limit: self.playlist_limit,
            });
        }

        // The first response only carries one page of items.
        let mut next = playlist["tracks"]["next"].as_str().map(str::to_string);
        while let Some(url) = next.take() {
            if items.len() >= size {
                break;
            }
            let Some(page) = self.api_get_url(&url).await? else {
                break;
            };
            let page_items = page["items"].as_array().cloned().unwrap_or_default();
            if page_items.is_empty() {
                break;
            }
            debug!("Spotify playlist {} page added {} items", id, page_items.len());
            items.extend(page_items);
            next = page["next"].as_str().map(str::to_string);
        }

        let queries: Vec<String> = items
            .iter()
            .filter(|item| !item["is_local"].as_bool().unwrap_or(false))
            .filter_map(|item| search_query(&item["track"], None))
            .collect();

        let name = playlist["name"].as_str().unwrap_or_default().to_string();
        self.collection(name, queries, &playlist["images"]).await
    }
}

#[async_trait]
impl SourcePlugin for SpotifySource {
    fn name(&self) -> &str {
        "spotify"
    }

    fn can_handle(&self, identifier: &str) -> bool {
        parse_reference(identifier).is_some()
    }

    async fn load(&self, identifier: &str, options: &LoadOptions) -> SourceResult<LoadResult> {
        match parse_reference(identifier) {
            Some(SpotifyReference::Track(id)) => self.load_track(id).await,
            Some(SpotifyReference::Album(id)) => self.load_album(id).await,
            Some(SpotifyReference::Playlist(id)) => self.load_playlist(id, options).await,
            None => Ok(LoadResult::Empty {}),
        }
    }

    fn decode_track(&self, info: TrackInfo, _payload: &[u8]) -> SourceResult<AudioTrack> {
        Ok(AudioTrack::new(info, self.playback.clone()))
    }

    fn shutdown(&self) {
        self.tokens.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path, query_param},
    };

    use super::*;
    use crate::sources::{
        context::ContextStore,
        spotify::token::tests::mount_token,
        youtube::api::tests::video_json,
    };

    fn config(limit: usize) -> SpotifyConfig {
        SpotifyConfig {
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            playlist_limit: limit,
            ..Default::default()
        }
    }

    async fn source(spotify: &MockServer, youtube: &MockServer, limit: usize) -> SpotifySource {
        mount_token(spotify).await;
        let youtube_api = YouTubeApi::with_base_url(
            &HttpConfig::default(),
            "yt-key",
            ContextStore::new(),
            &youtube.uri(),
        )
        .unwrap();
        SpotifySource::with_endpoints(
            &HttpConfig::default(),
            &config(limit),
            Arc::new(youtube_api),
            &spotify.uri(),
            &format!("{}/api/token", spotify.uri()),
            None,
        )
        .unwrap()
    }

    fn playlist_item(name: &str, artist: &str, local: bool) -> Value {
        json!({ "is_local": local, "track": { "name": name, "artists": [{ "name": artist }] } })
    }

    async fn mount_search(server: &MockServer, query: &str, video_id: Option<&str>) {
        let items = match video_id {
            Some(id) => json!([{ "id": { "videoId": id } }]),
            None => json!([]),
        };
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", query))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": items })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_reference_patterns() {
        assert_eq!(
            parse_reference("https://open.spotify.com/track/4cOdK2wGLETKBW3PvgPWqT?si=x"),
            Some(SpotifyReference::Track("4cOdK2wGLETKBW3PvgPWqT"))
        );
        assert_eq!(
            parse_reference("spotify:track:4cOdK2wGLETKBW3PvgPWqT"),
            Some(SpotifyReference::Track("4cOdK2wGLETKBW3PvgPWqT"))
        );
        assert_eq!(
            parse_reference("https://open.spotify.com/album/1DFixLWuPkv3KT3TnV35m3"),
            Some(SpotifyReference::Album("1DFixLWuPkv3KT3TnV35m3"))
        );
        assert_eq!(
            parse_reference("https://open.spotify.com/user/someone/playlist/37i9dQZF1DXcBWIGoYBM5M"),
            Some(SpotifyReference::Playlist("37i9dQZF1DXcBWIGoYBM5M"))
        );
        assert_eq!(
            parse_reference("spotify:user:someone:playlist:37i9dQZF1DXcBWIGoYBM5M"),
            Some(SpotifyReference::Playlist("37i9dQZF1DXcBWIGoYBM5M"))
        );
        assert_eq!(parse_reference("https://open.spotify.com/artist/0OdUWJ0sBjDrqHygGUXeCF"), None);
    }

    #[test]
    fn test_missing_credentials() {
        let err = SpotifySource::with_endpoints(
            &HttpConfig::default(),
            &SpotifyConfig::default(),
            Arc::new(
                YouTubeApi::with_base_url(&HttpConfig::default(), "k", ContextStore::new(), "http://127.0.0.1")
                    .unwrap(),
            ),
            API_URL,
            TOKEN_URL,
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(err, SourceError::Misconfigured(_)));
    }

    #[tokio::test]
    async fn test_playlist_keeps_order_and_skips_misses() {
        let spotify = MockServer::start().await;
        let youtube = MockServer::start().await;
        let source = source(&spotify, &youtube, 100).await;

        Mock::given(method("GET"))
            .and(path("/playlists/PL1"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Mix",
                "images": [{ "url": "https://i.scdn.co/image/cover" }],
                "tracks": {
                    "total": 4,
                    "items": [
                        playlist_item("One", "A", false),
                        playlist_item("Two", "B", false),
                        playlist_item("Home demo", "Me", true),
                        playlist_item("Three", "C", false),
                    ],
                },
            })))
            .mount(&spotify)
            .await;

        mount_search(&youtube, "One A", Some("vid00000001")).await;
        mount_search(&youtube, "Two B", None).await;
        mount_search(&youtube, "Three C", Some("vid00000003")).await;
        Mock::given(method("GET"))
            .and(path("/videos"))
            .and(query_param("id", "vid00000001,vid00000003"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [video_json("vid00000003", "Three"), video_json("vid00000001", "One")]
            })))
            .expect(1)
            .mount(&youtube)
            .await;

        let LoadResult::Playlist(playlist) = source
            .load("https://open.spotify.com/playlist/PL1", &LoadOptions::default())
            .await
            .unwrap()
        else {
            panic!("expected a playlist");
        };

        assert_eq!(playlist.info.name, "Mix");
        let titles: Vec<&str> = playlist.tracks.iter().map(|t| t.info.title.as_str()).collect();
        assert_eq!(titles, vec!["One", "Three"]);
        assert_eq!(playlist.tracks[0].info.source_name, "spotify");
        assert_eq!(
            playlist.tracks[0].info.artwork_url.as_deref(),
            Some("https://i.scdn.co/image/cover")
        );
    }

    #[tokio::test]
    async fn test_playlist_limit_and_paging() {
        let spotify = MockServer::start().await;
        let youtube = MockServer::start().await;
        let source = source(&spotify, &youtube, 2).await;

        Mock::given(method("GET"))
            .and(path("/playlists/BIG"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Huge",
                "images": [],
                "tracks": {
                    "total": 3,
                    "items": [playlist_item("One", "A", false), playlist_item("Two", "B", false)],
                    "next": format!("{}/playlists/BIG/tracks?offset=2&limit=2", spotify.uri()),
                },
            })))
            .expect(2)
            .mount(&spotify)
            .await;
        // Only the exempt load reaches the second page.
        Mock::given(method("GET"))
            .and(path("/playlists/BIG/tracks"))
            .and(query_param("offset", "2"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 3,
                "items": [playlist_item("Three", "C", false)],
                "next": null,
            })))
            .expect(1)
            .mount(&spotify)
            .await;

        mount_search(&youtube, "One A", Some("vid00000001")).await;
        mount_search(&youtube, "Two B", Some("vid00000002")).await;
        mount_search(&youtube, "Three C", Some("vid00000003")).await;
        Mock::given(method("GET"))
            .and(path("/videos"))
            .and(query_param("id", "vid00000001,vid00000002,vid00000003"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    video_json("vid00000001", "One"),
                    video_json("vid00000002", "Two"),
                    video_json("vid00000003", "Three"),
                ]
            })))
            .expect(1)
            .mount(&youtube)
            .await;

        let err = source
            .load("spotify:playlist:BIG", &LoadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::LimitExceeded { size: 3, limit: 2 }));

        let LoadResult::Playlist(playlist) = source
            .load("spotify:playlist:BIG", &LoadOptions { limit_exempt: true })
            .await
            .unwrap()
        else {
            panic!("expected a playlist");
        };
        let titles: Vec<&str> = playlist.tracks.iter().map(|t| t.info.title.as_str()).collect();
        assert_eq!(titles, vec!["One", "Two", "Three"]);
    }

    #[tokio::test]
    async fn test_track_falls_back_to_thumbnail() {
        let spotify = MockServer::start().await;
        let youtube = MockServer::start().await;
        let source = source(&spotify, &youtube, 100).await;

        Mock::given(method("GET"))
            .and(path("/tracks/T1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Song",
                "artists": [{ "name": "Band" }],
                "album": { "images": [] },
            })))
            .mount(&spotify)
            .await;
        Mock::given(method("GET"))
            .and(path("/tracks/GONE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&spotify)
            .await;
        mount_search(&youtube, "Song Band", Some("vid00000009")).await;
        Mock::given(method("GET"))
            .and(path("/videos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [video_json("vid00000009", "Song (Official)")]
            })))
            .mount(&youtube)
            .await;

        let LoadResult::Track(track) = source
            .load("spotify:track:T1", &LoadOptions::default())
            .await
            .unwrap()
        else {
            panic!("expected a track");
        };
        assert_eq!(track.info.identifier, "vid00000009");
        assert_eq!(
            track.info.artwork_url.as_deref(),
            Some("https://i.ytimg.com/vi/vid00000009/hq720.jpg")
        );

        assert!(source.load("spotify:track:GONE", &LoadOptions::default()).await.unwrap().is_empty());
    }
}
