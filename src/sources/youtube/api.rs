//! Minimal YouTube Data API v3 client.

use std::{collections::HashMap, sync::Arc};

use serde::Deserialize;
use tracing::debug;

use crate::{
    common::{HttpClient, SourceError, SourceResult, text::parse_iso8601_duration},
    configs::HttpConfig,
    protocol::tracks::{PlaylistPage, TrackInfo},
    sources::context::ContextStore,
};

use super::context::{ContextHeaderFilter, YoutubeVersionData};

const API_URL: &str = "https://www.googleapis.com/youtube/v3";
const VIDEO_BATCH_SIZE: usize = 50;
const PLAYLIST_PAGE_SIZE: u32 = 20;

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    pub id: String,
    pub snippet: VideoSnippet,
    #[serde(rename = "contentDetails")]
    pub content_details: VideoContentDetails,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    pub title: String,
    pub channel_title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoContentDetails {
    pub duration: String,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: SearchResultId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Playlist {
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
struct PlaylistSnippet {
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    content_details: PlaylistItemDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemDetails {
    video_id: String,
}

pub fn thumbnail_url(video_id: &str) -> String {
    format!("https://i.ytimg.com/vi/{}/hq720.jpg", video_id)
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

impl Video {
    pub fn duration_ms(&self) -> u64 {
        parse_iso8601_duration(&self.content_details.duration).unwrap_or(0)
    }

    pub fn to_track_info(&self, source_name: &str) -> TrackInfo {
        TrackInfo::new(
            source_name,
            &self.id,
            &self.snippet.title,
            &self.snippet.channel_title,
            self.duration_ms(),
            watch_url(&self.id),
        )
        .with_artwork(Some(thumbnail_url(&self.id)))
    }
}

/// Shared by the `youtube` and `spotify` resolvers.
pub struct YouTubeApi {
    client: HttpClient,
    api_key: String,
    base_url: String,
}

impl YouTubeApi {
    pub fn new(
        http: &HttpConfig,
        api_key: impl Into<String>,
        context: Arc<ContextStore<YoutubeVersionData>>,
    ) -> SourceResult<Self> {
        Self::with_base_url(http, api_key, context, API_URL)
    }

    pub fn with_base_url(
        http: &HttpConfig,
        api_key: impl Into<String>,
        context: Arc<ContextStore<YoutubeVersionData>>,
        base_url: &str,
    ) -> SourceResult<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(SourceError::Misconfigured("youtube.api_key is empty".into()));
        }

        let client = HttpClient::builder()
            .timeouts(http)
            .filter(Arc::new(ContextHeaderFilter::new(context)))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn list<T: serde::de::DeserializeOwned>(
        &self,
        resource: &str,
        params: &[(&str, &str)],
    ) -> SourceResult<Option<ListResponse<T>>> {
        let url = format!("{}/{}", self.base_url, resource);
        let request = self
            .client
            .get(&url)
            .query(params)
            .query(&[("key", self.api_key.as_str())]);
        self.client.fetch_json(request).await
    }

    pub async fn video(&self, video_id: &str) -> SourceResult<Option<Video>> {
        Ok(self
            .videos(&[video_id.to_string()])
            .await?
            .into_iter()
            .next())
    }

    /// Looks up videos in batches, keeping the order of `ids`. Unknown ids
    /// are dropped.
    pub async fn videos(&self, ids: &[String]) -> SourceResult<Vec<Video>> {
        let mut found: HashMap<String, Video> = HashMap::with_capacity(ids.len());

        for batch in ids.chunks(VIDEO_BATCH_SIZE) {
            let joined = batch.join(",");
            let response = self
                .list::<Video>(
                    "videos",
                    &[
                        ("part", "id,snippet,contentDetails"),
                        ("id", joined.as_str()),
                        (
                            "fields",
                            "items(id,snippet/title,snippet/channelTitle,contentDetails/duration)",
                        ),
                    ],
                )
                .await?;

            for video in response.map(|r| r.items).unwrap_or_default() {
                found.insert(video.id.clone(), video);
            }
        }

        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }

    /// Id of the best video match for `query`.
    pub async fn search_first(&self, query: &str) -> SourceResult<Option<String>> {
        let response = self
            .list::<SearchResult>(
                "search",
                &[("part", "id"), ("q", query), ("type", "video"), ("maxResults", "1")],
            )
            .await?;

        Ok(response
            .and_then(|r| r.items.into_iter().next())
            .and_then(|item| item.id.video_id))
    }

    /// `Ok(None)` when the playlist does not exist.
    pub async fn playlist_title(&self, playlist_id: &str) -> SourceResult<Option<String>> {
        let response = self
            .list::<Playlist>("playlists", &[("part", "snippet"), ("id", playlist_id)])
            .await?;

        Ok(response
            .and_then(|r| r.items.into_iter().next())
            .map(|playlist| playlist.snippet.title))
    }

    /// Loads one page of playlist items. With `with_title` the playlist name
    /// is looked up as well, and a missing playlist yields `Ok(None)`.
    pub async fn playlist_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
        with_title: bool,
    ) -> SourceResult<Option<PlaylistPage>> {
        let title = if with_title {
            match self.playlist_title(playlist_id).await? {
                Some(title) => Some(title),
                None => return Ok(None),
            }
        } else {
            None
        };

        let page_size = PLAYLIST_PAGE_SIZE.to_string();
        let mut params = vec![
            ("part", "contentDetails"),
            ("playlistId", playlist_id),
            ("maxResults", page_size.as_str()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let Some(response) = self.list::<PlaylistItem>("playlistItems", &params).await? else {
            return Ok(None);
        };

        let ids: Vec<String> = response
            .items
            .into_iter()
            .map(|item| item.content_details.video_id)
            .collect();
        let videos = self.videos(&ids).await?;
        if videos.len() < ids.len() {
            debug!(
                "Skipped {} unavailable videos in playlist {}",
                ids.len() - videos.len(),
                playlist_id
            );
        }

        Ok(Some(PlaylistPage {
            id: playlist_id.to_string(),
            title,
            next_page_token: response.next_page_token,
            tracks: videos.iter().map(|v| v.to_track_info("youtube")).collect(),
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param},
    };

    use super::*;

    pub(crate) fn video_json(id: &str, title: &str) -> Value {
        json!({
            "id": id,
            "snippet": { "title": title, "channelTitle": "Some Channel" },
            "contentDetails": { "duration": "PT3M5S" },
        })
    }

    pub(crate) fn api(server: &MockServer) -> YouTubeApi {
        YouTubeApi::with_base_url(&HttpConfig::default(), "test-key", ContextStore::new(), &server.uri()).unwrap()
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let err = YouTubeApi::new(&HttpConfig::default(), "", ContextStore::new()).err().unwrap();
        assert!(matches!(err, SourceError::Misconfigured(_)));
    }

    #[tokio::test]
    async fn test_videos_keep_request_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos"))
            .and(query_param("id", "aaa,bbb,ccc"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [video_json("ccc", "Third"), video_json("aaa", "First")]
            })))
            .mount(&server)
            .await;

        let videos = api(&server)
            .videos(&["aaa".into(), "bbb".into(), "ccc".into()])
            .await
            .unwrap();
        let ids: Vec<&str> = videos.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["aaa", "ccc"]);
        assert_eq!(videos[0].duration_ms(), 185_000);
    }

    #[tokio::test]
    async fn test_videos_are_batched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .expect(2)
            .mount(&server)
            .await;

        let ids: Vec<String> = (0..51).map(|i| format!("v{}", i)).collect();
        assert!(api(&server).videos(&ids).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "never gonna give you up rick astley"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "id": { "kind": "youtube#video", "videoId": "dQw4w9WgXcQ" } }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "nothing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .mount(&server)
            .await;

        let api = api(&server);
        assert_eq!(
            api.search_first("never gonna give you up rick astley").await.unwrap().as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(api.search_first("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bad_key_is_rejected_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = api(&server).search_first("anything").await.unwrap_err();
        assert!(matches!(err, SourceError::UpstreamRejected { status: 403, .. }));
    }
}
