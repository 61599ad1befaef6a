//! transcribe-stream - bidirectional streaming transcription over HTTP/2
//!
//! Audio goes up as event-stream messages in the body of one long-lived
//! HTTP/2 request while transcript events come back in the body of its
//! response, on the same stream and at the same time.
//!
//! - [`http`]: connections, negotiation, streaming requests and responses
//! - [`eventstream`]: binary message framing for both directions
//! - [`audio`]: the producer side of the request body
//! - [`model`]: header descriptors and transcript types
//! - [`client`]: the composed transcription client
//!
//! ```no_run
//! use transcribe_stream::{ClientConfig, StartStreamTranscriptionRequest, TranscribeStreamingClient};
//!
//! # async fn run(pcm: Vec<Vec<u8>>) -> transcribe_stream::Result<()> {
//! let client = TranscribeStreamingClient::new(ClientConfig::builder("us-east-1").build()?)?;
//! let (mut audio, body) = client.audio_stream();
//!
//! let request = StartStreamTranscriptionRequest::new("en-US", 16000, "pcm");
//! let (_, mut results) = client.start_stream_transcription(&request, body).await?;
//!
//! tokio::spawn(async move {
//!     for chunk in pcm {
//!         if audio.send(chunk).await.is_err() {
//!             break;
//!         }
//!     }
//!     audio.close();
//! });
//!
//! while let Some(event) = results.next_event().await? {
//!     for result in event.transcript.results {
//!         println!("{:?}", result.alternatives.first().and_then(|a| a.transcript.as_ref()));
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod eventstream;
pub mod http;
pub mod model;

pub use audio::AudioStream;
pub use client::{TranscribeStreamingClient, TranscriptResultStream};
pub use config::{ClientConfig, ConnectionConfig};
pub use error::{Error, Result};
pub use model::{StartStreamTranscriptionRequest, StartStreamTranscriptionResponse, TranscriptEvent};
