use std::io::{self, Cursor, Read, Write};

use base64::prelude::*;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::{
    common::{Severity, SourceError, SourceResult},
    sources::plugin::AudioTrack,
};

const TRACK_INFO_VERSIONED: u32 = 1;
const TRACK_INFO_VERSION: u8 = 4;

/// Metadata for an audio track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Duration in milliseconds. 0 when unknown.
    pub length: u64,
    pub is_stream: bool,
    pub title: String,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
    pub source_name: String,
}

impl TrackInfo {
    /// A finite, seekable item.
    pub fn new(
        source_name: &str,
        identifier: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        length: u64,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            is_seekable: true,
            author: author.into(),
            length,
            is_stream: false,
            title: title.into(),
            uri: Some(uri.into()),
            artwork_url: None,
            source_name: source_name.to_string(),
        }
    }

    pub fn with_artwork(mut self, artwork_url: Option<String>) -> Self {
        self.artwork_url = artwork_url;
        self
    }
}

/// Encodes track metadata followed by the resolver's own payload.
///
/// Binary format (version 4):
///   [u32 header: (body_size) | (flags << 30)]
///   [u8  version = 4]
///   [utf title]
///   [utf author]
///   [u64 length ms]
///   [utf identifier]
///   [u8  is_stream: 0/1]
///   [u8  is_seekable: 0/1]
///   [opt_utf uri]
///   [opt_utf artwork_url]
///   [utf source_name]
///   [u32 payload length][payload]
pub fn encode_track(info: &TrackInfo, payload: &[u8]) -> SourceResult<Vec<u8>> {
    let mut body = Vec::new();
    body.write_u8(TRACK_INFO_VERSION)?;

    write_utf(&mut body, &info.title)?;
    write_utf(&mut body, &info.author)?;
    body.write_u64::<BigEndian>(info.length)?;
    write_utf(&mut body, &info.identifier)?;
    body.write_u8(u8::from(info.is_stream))?;
    body.write_u8(u8::from(info.is_seekable))?;
    write_opt_utf(&mut body, info.uri.as_deref())?;
    write_opt_utf(&mut body, info.artwork_url.as_deref())?;
    write_utf(&mut body, &info.source_name)?;

    body.write_u32::<BigEndian>(payload.len() as u32)?;
    body.write_all(payload)?;

    if body.len() >= 1 << 30 {
        return Err(SourceError::Decode("track body too large".into()));
    }

    let mut out = Vec::with_capacity(body.len() + 4);
    out.write_u32::<BigEndian>(body.len() as u32 | (TRACK_INFO_VERSIONED << 30))?;
    out.extend_from_slice(&body);
    Ok(out)
}

/// Reverses `encode_track`, returning the metadata and the resolver payload.
pub fn decode_track(data: &[u8]) -> SourceResult<(TrackInfo, Vec<u8>)> {
    if data.len() < 4 {
        return Err(SourceError::Decode("input shorter than the header".into()));
    }

    let mut cursor = Cursor::new(data);
    let header = cursor.read_u32::<BigEndian>()?;
    let flags = (header >> 30) & 0x03;
    let size = (header & 0x3FFF_FFFF) as usize;
    if size != data.len() - 4 {
        return Err(SourceError::Decode(format!(
            "header declares {} bytes, found {}",
            size,
            data.len() - 4
        )));
    }
    if flags & TRACK_INFO_VERSIONED == 0 {
        return Err(SourceError::Decode("unversioned track data".into()));
    }

    let version = cursor.read_u8()?;
    if version != TRACK_INFO_VERSION {
        return Err(SourceError::Decode(format!("unsupported version {}", version)));
    }

    let title = read_utf(&mut cursor)?;
    let author = read_utf(&mut cursor)?;
    let length = cursor.read_u64::<BigEndian>()?;
    let identifier = read_utf(&mut cursor)?;
    let is_stream = cursor.read_u8()? != 0;
    let is_seekable = cursor.read_u8()? != 0;
    let uri = read_opt_utf(&mut cursor)?;
    let artwork_url = read_opt_utf(&mut cursor)?;
    let source_name = read_utf(&mut cursor)?;

    let payload_len = cursor.read_u32::<BigEndian>()? as usize;
    let remaining = data.len().saturating_sub(cursor.position() as usize);
    if payload_len > remaining {
        return Err(SourceError::Decode(format!(
            "payload declares {} bytes, {} left",
            payload_len, remaining
        )));
    }
    let mut payload = vec![0u8; payload_len];
    cursor.read_exact(&mut payload)?;

    Ok((
        TrackInfo {
            identifier,
            is_seekable,
            author,
            length,
            is_stream,
            title,
            uri,
            artwork_url,
            source_name,
        },
        payload,
    ))
}

pub fn to_base64(data: &[u8]) -> String {
    BASE64_STANDARD.encode(data)
}

pub fn from_base64(encoded: &str) -> SourceResult<Vec<u8>> {
    BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| SourceError::Decode(e.to_string()))
}

fn write_utf(w: &mut Vec<u8>, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string too long"))?;
    w.write_u16::<BigEndian>(len)?;
    w.write_all(bytes)
}

fn write_opt_utf(w: &mut Vec<u8>, s: Option<&str>) -> io::Result<()> {
    match s {
        Some(s) => {
            w.write_u8(1)?;
            write_utf(w, s)
        }
        None => w.write_u8(0),
    }
}

fn read_utf<R: Read>(r: &mut R) -> SourceResult<String> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| SourceError::Decode(e.to_string()))
}

fn read_opt_utf<R: Read>(r: &mut R) -> SourceResult<Option<String>> {
    if r.read_u8()? != 0 {
        read_utf(r).map(Some)
    } else {
        Ok(None)
    }
}

/// One page of a paginated collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistPage {
    pub id: String,
    pub title: Option<String>,
    pub next_page_token: Option<String>,
    pub tracks: Vec<TrackInfo>,
}

/// Result of a track load operation.
#[derive(Debug, Serialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    /// A single track was loaded.
    Track(AudioTrack),
    /// A playlist was loaded.
    Playlist(PlaylistData),
    /// A search returned results.
    Search(Vec<AudioTrack>),
    /// No matches found.
    Empty {},
    /// An error occurred during loading.
    Error(LoadError),
}

impl LoadResult {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty {})
    }
}

/// Playlist data returned from a load operation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistData {
    pub info: PlaylistInfo,
    pub tracks: Vec<AudioTrack>,
}

/// Playlist metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    /// Index of the selected track, or -1 if none.
    pub selected_track: i32,
}

/// Error from a failed track load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadError {
    pub message: Option<String>,
    pub severity: Severity,
    /// Short cause description.
    pub cause: String,
}

impl From<&crate::common::LoadFailure> for LoadError {
    fn from(failure: &crate::common::LoadFailure) -> Self {
        Self {
            message: Some(failure.to_string()),
            severity: failure.error.severity(),
            cause: failure.error.to_string(),
        }
    }
}
