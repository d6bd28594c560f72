use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::{
    common::{HttpClient, SourceError, SourceResult},
    sources::context::{ContextFetcher, ContextRefresher, ContextStore, RefreshSchedule},
};

#[derive(Clone, Deserialize)]
pub struct SpotifyToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
}

impl std::fmt::Debug for SpotifyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyToken")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Client-credentials grant against the accounts service.
#[derive(Clone)]
pub struct ClientCredentialsFetcher {
    client: HttpClient,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl ClientCredentialsFetcher {
    pub fn new(client: HttpClient, token_url: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            client,
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }
}

#[async_trait]
impl ContextFetcher for ClientCredentialsFetcher {
    type Data = SpotifyToken;

    fn name(&self) -> &str {
        "spotify"
    }

    async fn fetch(&self) -> SourceResult<SpotifyToken> {
        let request = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")]);

        let response = self.client.execute(request).await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(SourceError::from_status(status, &self.token_url));
        }

        let token: SpotifyToken = serde_json::from_slice(&response.bytes().await?)?;
        debug!("Retrieved a Spotify access token, expires in {}s", token.expires_in);
        Ok(token)
    }
}

/// Keeps an access token fresh in the background and fetches one on demand
/// when none is held yet.
pub struct SpotifyTokenTracker {
    fetcher: ClientCredentialsFetcher,
    store: Arc<ContextStore<SpotifyToken>>,
    refresher: Option<ContextRefresher<ClientCredentialsFetcher>>,
}

impl SpotifyTokenTracker {
    /// With a schedule, a refresher task is spawned; this needs a tokio runtime.
    pub fn new(fetcher: ClientCredentialsFetcher, schedule: Option<RefreshSchedule>) -> Self {
        let store = ContextStore::new();
        let refresher = schedule
            .map(|schedule| ContextRefresher::spawn_into(fetcher.clone(), store.clone(), schedule));

        Self {
            fetcher,
            store,
            refresher,
        }
    }

    pub async fn access_token(&self) -> SourceResult<String> {
        if let Some(token) = self.store.get() {
            return Ok(token.access_token.clone());
        }

        debug!("No Spotify token held, fetching one now");
        let token = self.fetcher.fetch().await?;
        let access_token = token.access_token.clone();
        self.store.replace(token);
        Ok(access_token)
    }

    /// Drops the held token so the next call fetches a new one.
    pub fn invalidate(&self) {
        self.store.clear();
    }

    pub fn shutdown(&self) {
        if let Some(refresher) = &self.refresher {
            refresher.shutdown();
        }
    }
}
