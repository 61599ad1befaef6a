//! Streaming transcription client
//!
//! Ties the pieces together: the [`ConnectionManager`] supplies an HTTP/2
//! connection for the endpoint, the request descriptor becomes headers, an
//! [`AudioStream`] feeds the request body and a [`TranscriptResultStream`]
//! decodes the response body into [`TranscriptEvent`]s.

use crate::audio::AudioStream;
use crate::config::ClientConfig;
use crate::eventstream::{
    self, Message, MessageDecoder, ERROR_CODE, ERROR_MESSAGE, EVENT_TYPE, EXCEPTION_TYPE,
    MESSAGE_TYPE,
};
use crate::http::origin::request_path;
use crate::http::{BodyStream, ConnectionManager, Headers, Origin, Request, StreamingResponse};
use crate::model::{StartStreamTranscriptionRequest, StartStreamTranscriptionResponse, TranscriptEvent};
use crate::{Error, Result};
use log::{debug, warn};
use serde::Deserialize;
use url::Url;

/// Path of the streaming transcription operation
pub const STREAM_TRANSCRIPTION_PATH: &str = "/stream-transcription";

/// Header naming the modeled error of a rejected request
const ERROR_TYPE_HEADER: &str = "x-amzn-errortype";

/// Client for streaming transcriptions against one endpoint
pub struct TranscribeStreamingClient {
    config: ClientConfig,
    url: Url,
    origin: Origin,
    connections: ConnectionManager,
}

impl TranscribeStreamingClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let url = Url::parse(&config.endpoint())
            .map_err(crate::http::Error::from)?
            .join(STREAM_TRANSCRIPTION_PATH)
            .map_err(crate::http::Error::from)?;
        let origin = Origin::from_url(&url)?;
        let connections = ConnectionManager::new(config.connection().clone());
        debug!("transcription client for {} ({})", origin, config.region());
        Ok(TranscribeStreamingClient {
            config,
            url,
            origin,
            connections,
        })
    }

    /// Client configured from `AWS_REGION` and friends
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Audio producer and the request body it feeds
    pub fn audio_stream(&self) -> (AudioStream, BodyStream) {
        AudioStream::channel(self.config.body_capacity())
    }

    /// Start a transcription
    ///
    /// `body` is the request body, usually the second half of
    /// [`audio_stream`](Self::audio_stream). Returns once the service has
    /// accepted the request; results then arrive on the returned stream
    /// while audio is still being sent.
    pub async fn start_stream_transcription(
        &self,
        request: &StartStreamTranscriptionRequest,
        body: BodyStream,
    ) -> Result<(StartStreamTranscriptionResponse, TranscriptResultStream)> {
        let connection = self.connections.get_connection(&self.origin).await?;

        let http_request = Request::post(request_path(&self.url))
            .header("content-type", eventstream::CONTENT_TYPE)
            .headers(request.to_headers())
            .body(body);
        let response = connection.submit(http_request)?;

        let status = response.status().await?;
        let headers = response.headers().await?;
        if status != 200 {
            return Err(rejection(status, &headers, &response).await);
        }

        let descriptor = StartStreamTranscriptionResponse::from_headers(&headers);
        debug!(
            "transcription started (request id {})",
            descriptor.request_id.as_deref().unwrap_or("-")
        );
        Ok((descriptor, TranscriptResultStream::new(response)))
    }
}

/// Error for a request the service refused
async fn rejection(status: u16, headers: &Headers, response: &StreamingResponse) -> Error {
    let body = match response.collect_body().await {
        Ok(body) => String::from_utf8_lossy(&body).into_owned(),
        Err(e) => return e.into(),
    };
    warn!("transcription rejected with {}: {}", status, body);

    match headers.get(ERROR_TYPE_HEADER) {
        Some(error_type) => Error::Service {
            // "BadRequestException:http://internal.amazon.com/..." carries a suffix
            exception_type: error_type.split(':').next().unwrap_or(error_type).to_string(),
            message: service_message(body.as_bytes()),
        },
        None => Error::UnexpectedStatus { status, body },
    }
}

#[derive(Deserialize)]
struct ServiceMessage {
    #[serde(alias = "message")]
    #[serde(rename = "Message")]
    message: String,
}

/// Message of an exception payload, or the raw payload when it is not JSON
fn service_message(payload: &[u8]) -> String {
    serde_json::from_slice::<ServiceMessage>(payload)
        .map(|m| m.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(payload).into_owned())
}

/// Transcript events decoded from a response body
pub struct TranscriptResultStream {
    response: StreamingResponse,
    decoder: MessageDecoder,
    /// How the body ended, once it has
    end: Option<std::result::Result<(), eventstream::Error>>,
}

impl TranscriptResultStream {
    pub fn new(response: StreamingResponse) -> Self {
        TranscriptResultStream {
            response,
            decoder: MessageDecoder::new(),
            end: None,
        }
    }

    pub fn response(&self) -> &StreamingResponse {
        &self.response
    }

    /// Next transcript event, or `None` once the response has ended
    ///
    /// Exceptions sent by the service surface as [`Error::Service`]. A body
    /// that ends in the middle of a message is an error, returned again by
    /// every later call.
    pub async fn next_event(&mut self) -> Result<Option<TranscriptEvent>> {
        loop {
            while let Some(message) = self.decoder.next_message()? {
                if let Some(event) = decode_event(message)? {
                    return Ok(Some(event));
                }
            }
            if let Some(end) = &self.end {
                return end.clone().map(|()| None).map_err(Error::from);
            }

            let chunk = self.response.next_chunk().await?;
            if chunk.is_empty() {
                let end = self.decoder.finish();
                self.end = Some(end.clone());
                end?;
                return Ok(None);
            }
            self.decoder.feed(&chunk);
        }
    }
}

/// Interpret one response message; events other than transcripts are skipped
fn decode_event(message: Message) -> Result<Option<TranscriptEvent>> {
    match message.header_str(MESSAGE_TYPE) {
        Some("event") => match message.header_str(EVENT_TYPE) {
            Some("TranscriptEvent") => Ok(Some(serde_json::from_slice(message.payload())?)),
            other => {
                debug!("skipping event {:?}", other);
                Ok(None)
            }
        },
        Some("exception") => Err(Error::Service {
            exception_type: message
                .header_str(EXCEPTION_TYPE)
                .unwrap_or("UnknownException")
                .to_string(),
            message: service_message(message.payload()),
        }),
        Some("error") => Err(Error::Service {
            exception_type: message
                .header_str(ERROR_CODE)
                .unwrap_or("UnknownError")
                .to_string(),
            message: message.header_str(ERROR_MESSAGE).unwrap_or_default().to_string(),
        }),
        other => Err(Error::UnexpectedMessage(format!(
            "message type {:?}",
            other
        ))),
    }
}
