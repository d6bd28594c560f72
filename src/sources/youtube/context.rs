//! Client version data scraped from the YouTube landing page and sent as
//! `x-youtube-*` headers.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    Request, StatusCode,
    header::{HeaderName, HeaderValue},
};
use serde::Deserialize;

use crate::{
    common::{HttpClient, RequestFilter, SourceError, SourceResult, text::extract_between},
    configs::HttpConfig,
    sources::context::{ContextFetcher, ContextStore},
};

const LANDING_URL: &str = "https://www.youtube.com/";
const LANDING_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/78.0.3904.108 Safari/537.36";
const CONFIG_START: &str = "window.ytplayer = {};ytcfg.set(";
const CONFIG_END: &str = ");ytcfg.set(";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct YoutubeVersionData {
    #[serde(rename = "INNERTUBE_CONTEXT_CLIENT_VERSION")]
    pub client_version: Option<String>,
    #[serde(rename = "VARIANTS_CHECKSUM")]
    pub variants_checksum: Option<String>,
    #[serde(rename = "PAGE_BUILD_LABEL")]
    pub page_label: Option<String>,
    #[serde(rename = "PAGE_CL", default, deserialize_with = "string_or_number")]
    pub page_cl: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl YoutubeVersionData {
    /// Pulls the first `ytcfg.set(...)` object out of the landing page.
    pub fn from_landing_page(html: &str, url: &str) -> SourceResult<Self> {
        let raw = extract_between(html, CONFIG_START, CONFIG_END)
            .ok_or_else(|| SourceError::shape("ytcfg.set", url))?;
        Ok(serde_json::from_str(raw)?)
    }

    fn headers(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("x-youtube-client-version", self.client_version.as_deref()),
            ("x-youtube-page-cl", self.page_cl.as_deref()),
            ("x-youtube-page-label", self.page_label.as_deref()),
            ("x-youtube-variants-checksum", self.variants_checksum.as_deref()),
        ]
    }
}

pub struct YoutubeContextFetcher {
    client: HttpClient,
    landing_url: String,
}

impl YoutubeContextFetcher {
    pub fn new(http: &HttpConfig) -> SourceResult<Self> {
        Self::with_landing_url(http, LANDING_URL)
    }

    pub fn with_landing_url(http: &HttpConfig, landing_url: &str) -> SourceResult<Self> {
        Ok(Self {
            client: HttpClient::builder()
                .timeouts(http)
                .user_agent(LANDING_USER_AGENT)
                .build()?,
            landing_url: landing_url.to_string(),
        })
    }
}

#[async_trait]
impl ContextFetcher for YoutubeContextFetcher {
    type Data = YoutubeVersionData;

    fn name(&self) -> &str {
        "youtube"
    }

    async fn fetch(&self) -> SourceResult<YoutubeVersionData> {
        let (status, html) = self
            .client
            .fetch_text(self.client.get(&self.landing_url))
            .await?;
        if status != StatusCode::OK {
            return Err(SourceError::from_status(status, &self.landing_url));
        }
        YoutubeVersionData::from_landing_page(&html, &self.landing_url)
    }
}

/// Adds the current version headers. Nothing is added until the first
/// refresh lands, and absent fields are skipped.
pub struct ContextHeaderFilter {
    store: Arc<ContextStore<YoutubeVersionData>>,
}

impl ContextHeaderFilter {
    pub fn new(store: Arc<ContextStore<YoutubeVersionData>>) -> Self {
        Self { store }
    }
}

impl RequestFilter for ContextHeaderFilter {
    fn on_request(&self, request: &mut Request) {
        let Some(data) = self.store.get() else {
            return;
        };
        for (name, value) in data.headers() {
            let Some(value) = value.and_then(|v| HeaderValue::from_str(v).ok()) else {
                continue;
            };
            request
                .headers_mut()
                .insert(HeaderName::from_static(name), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header_regex, method},
    };

    use super::*;

    const LANDING: &str = r#"<script>window.ytplayer = {};ytcfg.set({"INNERTUBE_CONTEXT_CLIENT_VERSION":"2.20240101.00.00","VARIANTS_CHECKSUM":"abc123","PAGE_BUILD_LABEL":"youtube.desktop.web_20240101_00_RC00","PAGE_CL":596034212});ytcfg.set({"MSG":"x"});</script>"#;

    #[test]
    fn test_parse_landing_page() {
        let data = YoutubeVersionData::from_landing_page(LANDING, LANDING_URL).unwrap();
        assert_eq!(
            data,
            YoutubeVersionData {
                client_version: Some("2.20240101.00.00".into()),
                variants_checksum: Some("abc123".into()),
                page_label: Some("youtube.desktop.web_20240101_00_RC00".into()),
                page_cl: Some("596034212".into()),
            }
        );

        let err = YoutubeVersionData::from_landing_page("<html></html>", LANDING_URL).unwrap_err();
        assert!(matches!(err, SourceError::ContentShapeChanged { .. }));
    }

    #[test]
    fn test_filter_omits_headers_until_populated() {
        let store = ContextStore::new();
        let client = HttpClient::builder()
            .filter(Arc::new(ContextHeaderFilter::new(store.clone())))
            .build()
            .unwrap();

        let bare = client.prepare(client.get("https://www.googleapis.com/")).unwrap();
        assert!(!bare.headers().contains_key("x-youtube-client-version"));

        store.replace(YoutubeVersionData {
            client_version: Some("2.1".into()),
            page_label: None,
            ..Default::default()
        });
        let signed = client.prepare(client.get("https://www.googleapis.com/")).unwrap();
        assert_eq!(signed.headers()["x-youtube-client-version"], "2.1");
        assert!(!signed.headers().contains_key("x-youtube-page-label"));
    }

    #[tokio::test]
    async fn test_fetcher_reads_landing_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_regex(
                "user-agent",
                &format!("^{}$", regex::escape(LANDING_USER_AGENT)),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string(LANDING))
            .mount(&server)
            .await;

        let fetcher = YoutubeContextFetcher::with_landing_url(&HttpConfig::default(), &server.uri()).unwrap();
        let data = fetcher.fetch().await.unwrap();
        assert_eq!(data.variants_checksum.as_deref(), Some("abc123"));
    }
}
