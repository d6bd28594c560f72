use tracing::debug;

use crate::{
    common::SourceResult,
    protocol::tracks::{PlaylistInfo, TrackInfo},
};

use super::api::YouTubeApi;

/// Loads the first page and then follows page tokens until `page_count`
/// pages are loaded. `Ok(None)` when the playlist does not exist.
pub async fn load_playlist(
    api: &YouTubeApi,
    playlist_id: &str,
    selected_video: Option<&str>,
    page_count: usize,
) -> SourceResult<Option<(PlaylistInfo, Vec<TrackInfo>)>> {
    let Some(first) = api.playlist_page(playlist_id, None, true).await? else {
        return Ok(None);
    };

    let mut tracks = first.tracks;
    let mut next_page = first.next_page_token;
    let mut loaded = 1;

    while let Some(token) = next_page.take() {
        if loaded >= page_count {
            debug!("Playlist {} truncated after {} pages", playlist_id, loaded);
            break;
        }
        loaded += 1;

        if let Some(page) = api.playlist_page(playlist_id, Some(&token), false).await? {
            tracks.extend(page.tracks);
            next_page = page.next_page_token;
        }
    }

    let selected_track = selected_video
        .and_then(|id| tracks.iter().position(|t| t.identifier == id))
        .map_or(-1, |index| index as i32);

    Ok(Some((
        PlaylistInfo {
            name: first.title.unwrap_or_default(),
            selected_track,
        },
        tracks,
    )))
}
