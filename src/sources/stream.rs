use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Response, StatusCode, header::RANGE};
use tracing::{debug, warn};

use crate::common::{
    CONTENT_LENGTH_UNKNOWN, FailureClass, HttpClient, SourceError, SourceResult, classify,
    status_is_acceptable,
};

/// What the host asks an opener for.
#[derive(Debug, Clone, Copy)]
pub struct StreamRequest<'a> {
    pub url: &'a str,
    /// `CONTENT_LENGTH_UNKNOWN` when the site cannot tell up front.
    pub content_length: u64,
    pub accepted_statuses: &'a [u16],
}

#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open(&self, request: StreamRequest<'_>) -> SourceResult<Box<dyn SeekableStream>>;
}

/// Byte stream handed to the host's demuxer.
#[async_trait]
pub trait SeekableStream: Send {
    fn content_length(&self) -> u64;

    fn position(&self) -> u64;

    /// True when any position can be reached with a new ranged request.
    fn can_seek_hard(&self) -> bool;

    async fn read(&mut self, buf: &mut [u8]) -> SourceResult<usize>;

    async fn seek(&mut self, position: u64) -> SourceResult<()>;
}

pub struct HttpStreamOpener {
    client: HttpClient,
}

impl HttpStreamOpener {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamOpener for HttpStreamOpener {
    async fn open(&self, request: StreamRequest<'_>) -> SourceResult<Box<dyn SeekableStream>> {
        let mut stream = HttpStream::new(
            self.client.clone(),
            request.url,
            request.content_length,
            request.accepted_statuses,
        );
        stream.connect().await?;
        Ok(Box::new(stream))
    }
}

/// HTTP body reader that reconnects with a `Range` header to seek or to
/// recover from a dropped connection.
pub struct HttpStream {
    client: HttpClient,
    url: String,
    accepted_statuses: Vec<u16>,
    position: u64,
    content_length: u64,
    response: Option<Response>,
    pending: Bytes,
    /// Bytes still to drop because the server ignored the range.
    skip: u64,
}

impl HttpStream {
    pub fn new(client: HttpClient, url: &str, content_length: u64, accepted_statuses: &[u16]) -> Self {
        Self {
            client,
            url: url.to_string(),
            accepted_statuses: accepted_statuses.to_vec(),
            position: 0,
            content_length,
            response: None,
            pending: Bytes::new(),
            skip: 0,
        }
    }

    async fn connect(&mut self) -> SourceResult<()> {
        let mut builder = self.client.get(&self.url);
        if self.position > 0 {
            builder = builder.header(RANGE, format!("bytes={}-", self.position));
        }

        let response = self.client.execute(builder).await?;
        let status = response.status();
        if !status_is_acceptable(status, &self.accepted_statuses) {
            return Err(SourceError::from_status(status, &self.url));
        }

        self.skip = if self.position > 0 && status == StatusCode::OK {
            self.position
        } else {
            0
        };

        if self.content_length == CONTENT_LENGTH_UNKNOWN {
            if let Some(len) = response.content_length() {
                let base = if status == StatusCode::PARTIAL_CONTENT { self.position } else { 0 };
                self.content_length = base + len;
            }
        }

        debug!("Opened {} at {} ({})", self.url, self.position, status);
        self.response = Some(response);
        Ok(())
    }

    async fn next_chunk(&mut self) -> SourceResult<Option<Bytes>> {
        let mut reconnected = false;
        loop {
            if self.response.is_none() {
                self.connect().await?;
            }
            let Some(response) = self.response.as_mut() else {
                return Ok(None);
            };

            match response.chunk().await {
                Ok(chunk) => return Ok(chunk),
                Err(e) => {
                    let error = SourceError::from(e);
                    if reconnected || classify(&error) != FailureClass::Transient {
                        return Err(error);
                    }
                    warn!("Stream {} dropped at {}, reconnecting: {}", self.url, self.position, error);
                    self.response = None;
                    reconnected = true;
                }
            }
        }
    }
}

#[async_trait]
impl SeekableStream for HttpStream {
    fn content_length(&self) -> u64 {
        self.content_length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn can_seek_hard(&self) -> bool {
        self.content_length != CONTENT_LENGTH_UNKNOWN
    }

    async fn read(&mut self, buf: &mut [u8]) -> SourceResult<usize> {
        while self.pending.is_empty() {
            if self.can_seek_hard() && self.position >= self.content_length {
                return Ok(0);
            }
            match self.next_chunk().await? {
                Some(mut chunk) => {
                    if self.skip > 0 {
                        let skipped = self.skip.min(chunk.len() as u64) as usize;
                        let _ = chunk.split_to(skipped);
                        self.skip -= skipped as u64;
                    }
                    self.pending = chunk;
                }
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        self.position += n as u64;
        Ok(n)
    }

    async fn seek(&mut self, position: u64) -> SourceResult<()> {
        if position == self.position {
            return Ok(());
        }

        if self.can_seek_hard() {
            self.response = None;
            self.pending = Bytes::new();
            self.skip = 0;
            self.position = position;
            return Ok(());
        }

        if position < self.position {
            return Err(SourceError::InvalidInput(format!(
                "cannot seek backwards in {} without a known length",
                self.url
            )));
        }

        let mut scratch = vec![0u8; 8192];
        while self.position < position {
            let want = ((position - self.position) as usize).min(scratch.len());
            if self.read(&mut scratch[..want]).await? == 0 {
                break;
            }
        }
        Ok(())
    }
}
