//! Request and response descriptors
//!
//! A streaming transcription is parameterized entirely through
//! `x-amzn-transcribe-*` headers. Results come back as JSON
//! `TranscriptEvent` payloads inside event-stream messages.

use crate::http::Headers;
use serde::{Deserialize, Serialize};

pub const LANGUAGE_CODE: &str = "x-amzn-transcribe-language-code";
pub const SAMPLE_RATE: &str = "x-amzn-transcribe-sample-rate";
pub const MEDIA_ENCODING: &str = "x-amzn-transcribe-media-encoding";
pub const VOCABULARY_NAME: &str = "x-amzn-transcribe-vocabulary-name";
pub const SESSION_ID: &str = "x-amzn-transcribe-session-id";
pub const VOCABULARY_FILTER_NAME: &str = "x-amzn-transcribe-vocabulary-filter-name";
pub const VOCABULARY_FILTER_METHOD: &str = "x-amzn-transcribe-vocabulary-filter-method";
pub const REQUEST_ID: &str = "x-amzn-request-id";

/// Parameters of a streaming transcription
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartStreamTranscriptionRequest {
    pub language_code: Option<String>,
    pub media_sample_rate_hz: Option<u32>,
    /// `pcm`, `ogg-opus` or `flac`
    pub media_encoding: Option<String>,
    pub vocabulary_name: Option<String>,
    pub session_id: Option<String>,
    pub vocabulary_filter_name: Option<String>,
    /// `remove`, `mask` or `tag`
    pub vocabulary_filter_method: Option<String>,
}

impl StartStreamTranscriptionRequest {
    /// Request with the three parameters every transcription needs
    pub fn new(
        language_code: impl Into<String>,
        media_sample_rate_hz: u32,
        media_encoding: impl Into<String>,
    ) -> Self {
        StartStreamTranscriptionRequest {
            language_code: Some(language_code.into()),
            media_sample_rate_hz: Some(media_sample_rate_hz),
            media_encoding: Some(media_encoding.into()),
            ..Default::default()
        }
    }

    pub fn vocabulary_name(mut self, name: impl Into<String>) -> Self {
        self.vocabulary_name = Some(name.into());
        self
    }

    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn vocabulary_filter_name(mut self, name: impl Into<String>) -> Self {
        self.vocabulary_filter_name = Some(name.into());
        self
    }

    pub fn vocabulary_filter_method(mut self, method: impl Into<String>) -> Self {
        self.vocabulary_filter_method = Some(method.into());
        self
    }

    /// Request headers, one per field that is set
    pub fn to_headers(&self) -> Vec<(String, String)> {
        let fields = [
            (LANGUAGE_CODE, self.language_code.clone()),
            (SAMPLE_RATE, self.media_sample_rate_hz.map(|hz| hz.to_string())),
            (MEDIA_ENCODING, self.media_encoding.clone()),
            (VOCABULARY_NAME, self.vocabulary_name.clone()),
            (SESSION_ID, self.session_id.clone()),
            (VOCABULARY_FILTER_NAME, self.vocabulary_filter_name.clone()),
            (VOCABULARY_FILTER_METHOD, self.vocabulary_filter_method.clone()),
        ];
        fields
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name.to_string(), v)))
            .collect()
    }
}

/// Parameters the service echoed back for an accepted transcription
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartStreamTranscriptionResponse {
    pub request_id: Option<String>,
    pub language_code: Option<String>,
    pub media_sample_rate_hz: Option<u32>,
    pub media_encoding: Option<String>,
    pub vocabulary_name: Option<String>,
    pub session_id: Option<String>,
    pub vocabulary_filter_name: Option<String>,
    pub vocabulary_filter_method: Option<String>,
}

impl StartStreamTranscriptionResponse {
    /// Read the response fields out of `headers`
    ///
    /// Headers it does not know are ignored, as is a sample rate that is
    /// not a number.
    pub fn from_headers(headers: &Headers) -> Self {
        let field = |name: &str| headers.get(name).map(str::to_string);
        StartStreamTranscriptionResponse {
            request_id: field(REQUEST_ID),
            language_code: field(LANGUAGE_CODE),
            media_sample_rate_hz: headers
                .get(SAMPLE_RATE)
                .and_then(|v| v.trim().parse().ok()),
            media_encoding: field(MEDIA_ENCODING),
            vocabulary_name: field(VOCABULARY_NAME),
            session_id: field(SESSION_ID),
            vocabulary_filter_name: field(VOCABULARY_FILTER_NAME),
            vocabulary_filter_method: field(VOCABULARY_FILTER_METHOD),
        }
    }
}

/// One `TranscriptEvent` payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TranscriptEvent {
    #[serde(default)]
    pub transcript: Transcript,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transcript {
    #[serde(default)]
    pub results: Vec<TranscriptResult>,
}

/// A span of audio with its candidate transcriptions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TranscriptResult {
    pub result_id: Option<String>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    /// Partial results are revised by later events with the same id
    #[serde(default)]
    pub is_partial: bool,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Alternative {
    pub transcript: Option<String>,
    #[serde(default)]
    pub items: Vec<Item>,
}

/// A word or punctuation mark
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Item {
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    /// `pronunciation` or `punctuation`
    #[serde(rename = "Type")]
    pub item_type: Option<String>,
    pub content: Option<String>,
    pub vocabulary_filter_match: Option<bool>,
}
