use scrapelink::{
    common::{logger, types::AnyResult},
    configs::Config,
    protocol::tracks::LoadResult,
    sources::{LoadOptions, SourceManager},
};
use serde_json::json;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Config::load()?;
    logger::init(&config);

    let identifiers: Vec<String> = std::env::args().skip(1).collect();
    if identifiers.is_empty() {
        return Err("usage: scrapelink <identifier>...".into());
    }

    let manager = SourceManager::new(&config)?;
    info!("Sources: {}", manager.source_names().join(", "));

    let options = LoadOptions::default();
    for identifier in &identifiers {
        let result = manager.load(identifier, &options).await;

        let tracks = match &result {
            LoadResult::Track(track) => vec![track],
            LoadResult::Playlist(playlist) => playlist.tracks.iter().collect(),
            LoadResult::Search(tracks) => tracks.iter().collect(),
            LoadResult::Empty {} | LoadResult::Error(_) => Vec::new(),
        };
        let encoded: Vec<String> = tracks
            .into_iter()
            .filter_map(|track| match manager.encode_track(track) {
                Ok(encoded) => Some(encoded),
                Err(e) => {
                    warn!("Could not encode {}: {}", track.info.identifier, e);
                    None
                }
            })
            .collect();

        let output = json!({
            "identifier": identifier,
            "result": result,
            "encoded": encoded,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    manager.shutdown();
    Ok(())
}
