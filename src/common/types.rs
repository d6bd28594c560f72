/// A generic boxed error type.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// A convenient Result alias returning `AnyError`.
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Sentinel for streams whose total size is not known up front.
pub const CONTENT_LENGTH_UNKNOWN: u64 = u64::MAX;

/// Container the host should use to demux a playback stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Mp4,
    Webm,
    Ogg,
    /// HLS playlist rather than a single file.
    Hls,
    /// Playback is handed to the host's own pipeline for another site.
    Delegated,
    Unknown,
}

impl AudioFormat {
    pub fn as_ext(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Ogg => "ogg",
            Self::Hls => "m3u8",
            Self::Delegated | Self::Unknown => "",
        }
    }

    pub fn from_ext(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "mp3" => Self::Mp3,
            "mp4" | "m4a" => Self::Mp4,
            "webm" => Self::Webm,
            "ogg" | "opus" => Self::Ogg,
            "m3u8" => Self::Hls,
            _ => Self::Unknown,
        }
    }

    /// Guesses the container from the path extension of a URL.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let file = path.rsplit('/').next().unwrap_or(path);
        match file.rsplit_once('.') {
            Some((_, ext)) => Self::from_ext(ext),
            None => Self::Unknown,
        }
    }
}
