use std::{sync::Arc, time::Duration};

use reqwest::{
  Client, Request, RequestBuilder, Response, StatusCode, Url,
  cookie::{CookieStore, Jar},
  header::{COOKIE, HeaderValue, REFERER, USER_AGENT},
};
use serde::de::DeserializeOwned;

use crate::{
  common::{
    errors::{SourceError, SourceResult},
    text::{CHROME_USER_AGENT, fake_chrome_headers, fake_user_agent},
  },
  configs::HttpConfig,
};

const DEFAULT_USER_AGENT: &str = CHROME_USER_AGENT;

/// Hook that can rewrite every outgoing request of a client.
pub trait RequestFilter: Send + Sync {
  fn on_request(&self, request: &mut Request);
}

/// Adds the fabricated desktop Chrome header set.
pub struct FakeBrowserFilter {
  user_agent: String,
}

impl FakeBrowserFilter {
  pub fn new() -> Self {
    Self {
      user_agent: DEFAULT_USER_AGENT.to_string(),
    }
  }

  pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
    Self {
      user_agent: user_agent.into(),
    }
  }
}

impl Default for FakeBrowserFilter {
  fn default() -> Self {
    Self::new()
  }
}

impl RequestFilter for FakeBrowserFilter {
  fn on_request(&self, request: &mut Request) {
    fake_chrome_headers(request.headers_mut(), &self.user_agent);
  }
}

/// Picks a fresh user agent for every request.
pub struct UserAgentRotationFilter;

impl RequestFilter for UserAgentRotationFilter {
  fn on_request(&self, request: &mut Request) {
    if let Ok(value) = HeaderValue::from_str(&fake_user_agent()) {
      request.headers_mut().insert(USER_AGENT, value);
    }
  }
}

pub struct RefererFilter(pub HeaderValue);

impl RequestFilter for RefererFilter {
  fn on_request(&self, request: &mut Request) {
    request.headers_mut().insert(REFERER, self.0.clone());
  }
}

/// Sends a fixed cookie string unless the request already carries cookies.
pub struct CookieHeaderFilter(pub HeaderValue);

impl RequestFilter for CookieHeaderFilter {
  fn on_request(&self, request: &mut Request) {
    if !request.headers().contains_key(COOKIE) {
      request.headers_mut().insert(COOKIE, self.0.clone());
    }
  }
}

/// Thin facade over `reqwest::Client` with request filters and an optional
/// cookie jar. Cheap to clone.
#[derive(Clone)]
pub struct HttpClient {
  client: Client,
  filters: Arc<Vec<Arc<dyn RequestFilter>>>,
  jar: Option<Arc<Jar>>,
}

pub struct HttpClientBuilder {
  user_agent: String,
  timeout: Duration,
  connect_timeout: Duration,
  cookies: bool,
  follow_redirects: bool,
  filters: Vec<Arc<dyn RequestFilter>>,
}

impl HttpClient {
  pub fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
  }

  pub fn builder() -> HttpClientBuilder {
    HttpClientBuilder {
      user_agent: Self::default_user_agent(),
      timeout: Duration::from_secs(10),
      connect_timeout: Duration::from_secs(5),
      cookies: false,
      follow_redirects: true,
      filters: Vec::new(),
    }
  }

  pub fn new() -> SourceResult<Self> {
    Self::builder().build()
  }

  pub fn get(&self, url: &str) -> RequestBuilder {
    self.client.get(url)
  }

  pub fn post(&self, url: &str) -> RequestBuilder {
    self.client.post(url)
  }

  /// Builds the request, runs it through every filter in order, and sends it.
  pub async fn execute(&self, builder: RequestBuilder) -> SourceResult<Response> {
    let request = self.prepare(builder)?;
    Ok(self.client.execute(request).await?)
  }

  pub fn prepare(&self, builder: RequestBuilder) -> SourceResult<Request> {
    let mut request = builder.build()?;
    for filter in self.filters.iter() {
      filter.on_request(&mut request);
    }
    Ok(request)
  }

  /// Sends the request and returns the status with the full body.
  pub async fn fetch_text(&self, builder: RequestBuilder) -> SourceResult<(StatusCode, String)> {
    let response = self.execute(builder).await?;
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
  }

  /// Like `fetch_text` but only accepts 200 and decodes the body as JSON.
  /// A 404 becomes `Ok(None)`.
  pub async fn fetch_json<T: DeserializeOwned>(
    &self,
    builder: RequestBuilder,
  ) -> SourceResult<Option<T>> {
    let response = self.execute(builder).await?;
    let status = response.status();
    let url = response.url().to_string();

    if status == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    if status != StatusCode::OK {
      return Err(SourceError::from_status(status, url));
    }

    let body = response.bytes().await?;
    Ok(Some(serde_json::from_slice(&body)?))
  }

  /// Cookies the jar would send to `url`.
  pub fn cookie_header(&self, url: &str) -> Option<String> {
    let jar = self.jar.as_ref()?;
    let url = Url::parse(url).ok()?;
    jar
      .cookies(&url)
      .and_then(|value| value.to_str().ok().map(str::to_string))
  }

  pub fn inner(&self) -> &Client {
    &self.client
  }
}

impl HttpClientBuilder {
  pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
    self.user_agent = user_agent.into();
    self
  }

  pub fn timeouts(mut self, config: &HttpConfig) -> Self {
    self.timeout = Duration::from_secs(config.timeout_secs);
    self.connect_timeout = Duration::from_secs(config.connect_timeout_secs);
    self
  }

  pub fn cookie_store(mut self, enabled: bool) -> Self {
    self.cookies = enabled;
    self
  }

  /// With redirects off, 3xx statuses reach the caller.
  pub fn follow_redirects(mut self, enabled: bool) -> Self {
    self.follow_redirects = enabled;
    self
  }

  pub fn filter(mut self, filter: Arc<dyn RequestFilter>) -> Self {
    self.filters.push(filter);
    self
  }

  pub fn build(self) -> SourceResult<HttpClient> {
    let mut builder = Client::builder()
      .user_agent(self.user_agent)
      .timeout(self.timeout)
      .connect_timeout(self.connect_timeout);

    if !self.follow_redirects {
      builder = builder.redirect(reqwest::redirect::Policy::none());
    }

    let jar = if self.cookies {
      let jar = Arc::new(Jar::default());
      builder = builder.cookie_provider(jar.clone());
      Some(jar)
    } else {
      None
    };

    Ok(HttpClient {
      client: builder.build()?,
      filters: Arc::new(self.filters),
      jar,
    })
  }
}

/// A status counts as success when it is 2xx or explicitly allowed by the site.
pub fn status_is_acceptable(status: StatusCode, accepted: &[u16]) -> bool {
  status.is_success() || accepted.contains(&status.as_u16())
}
