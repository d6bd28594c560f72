//! Text-to-speech through the public Google translate endpoint.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    common::{AudioFormat, SourceError, SourceResult, text::url_encode},
    configs::SpeechConfig,
    protocol::tracks::{LoadResult, TrackInfo},
    sources::plugin::{AudioTrack, LoadOptions, PlaybackStrategy, SourcePlugin, TemplatePlayback},
};

const PREFIX: &str = "speak:";
const MAX_TEXT_LENGTH: usize = 200;
const TTS_URL: &str = "https://translate.google.com/translate_tts";

pub fn tts_url(text: &str, language: &str) -> String {
    format!(
        "{}?ie=UTF-8&total=1&idx=0&textlen={}&client=tw-ob&q={}&tl={}",
        TTS_URL,
        text.chars().count(),
        url_encode(text),
        url_encode(language)
    )
}

pub struct SpeechSource {
    language: String,
    playback: Arc<dyn PlaybackStrategy>,
}

impl SpeechSource {
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            language: config.language.clone(),
            // The uri already is the rendered TTS request.
            playback: TemplatePlayback::new(|info| info.uri.clone().unwrap_or_default(), AudioFormat::Mp3),
        }
    }
}

#[async_trait]
impl SourcePlugin for SpeechSource {
    fn name(&self) -> &str {
        "speech"
    }

    fn can_handle(&self, identifier: &str) -> bool {
        identifier.starts_with(PREFIX)
    }

    async fn load(&self, identifier: &str, _options: &LoadOptions) -> SourceResult<LoadResult> {
        let Some(text) = identifier.strip_prefix(PREFIX) else {
            return Ok(LoadResult::Empty {});
        };
        let text = text.trim();
        if text.is_empty() {
            return Ok(LoadResult::Empty {});
        }
        if text.chars().count() > MAX_TEXT_LENGTH {
            return Err(SourceError::InvalidInput(format!(
                "speech text is limited to {} characters",
                MAX_TEXT_LENGTH
            )));
        }

        let info = TrackInfo::new(
            "speech",
            identifier,
            text,
            "Speaker",
            0,
            tts_url(text, &self.language),
        );

        Ok(LoadResult::Track(AudioTrack::new(info, self.playback.clone())))
    }

    fn decode_track(&self, info: TrackInfo, _payload: &[u8]) -> SourceResult<AudioTrack> {
        Ok(AudioTrack::new(info, self.playback.clone()))
    }
}
