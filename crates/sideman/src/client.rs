//! Streaming chat-completion client.
//!
//! Speaks the OpenAI-compatible `/v1/chat/completions` contract. Streaming
//! responses arrive as server-sent events: `data: {json}` frames with a
//! terminal `data: [DONE]`. Non-streaming servers answering the same call
//! with a plain JSON body are accepted too. Abort is cooperative via a
//! `CancellationToken` and yields a sentinel, not an error.

use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::{ChatCompletion, ChatMessage, ChatRequest};

/// Transport-level failures. Parse-level noise inside the stream is logged
/// and skipped, never surfaced here.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    /// The user aborted mid-stream; whatever was parsed so far stands.
    Aborted,
}

pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
}

impl LlmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature,
        }
    }

    /// Open a streaming completion and hand every content delta to
    /// `on_delta` as it arrives.
    pub async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
        mut on_delta: impl FnMut(&str),
    ) -> Result<StreamOutcome, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: self.model.clone(),
            stream: true,
            temperature: self.temperature,
            messages: messages.to_vec(),
        };

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(StreamOutcome::Aborted),
            response = request.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let streaming = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/event-stream"))
            .unwrap_or(false);

        if !streaming {
            // Non-streaming endpoint: the whole completion in one body.
            let text = tokio::select! {
                _ = cancel.cancelled() => return Ok(StreamOutcome::Aborted),
                text = response.text() => text?,
            };
            match serde_json::from_str::<ChatCompletion>(&text) {
                Ok(completion) => {
                    if let Some(content) = completion.content() {
                        on_delta(content);
                    }
                }
                Err(e) => tracing::warn!(%e, "unparseable non-streaming completion body"),
            }
            return Ok(StreamOutcome::Completed);
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Ok(StreamOutcome::Aborted),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                match decode_sse_line(line.trim()) {
                    SseLine::Done => return Ok(StreamOutcome::Completed),
                    SseLine::Delta(content) => on_delta(&content),
                    SseLine::Skip => {}
                }
            }
        }

        Ok(StreamOutcome::Completed)
    }
}

enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// Decode one line of an event stream. Blank lines, comments, `event:`
/// fields, and non-JSON payloads all decode to `Skip`.
fn decode_sse_line(line: &str) -> SseLine {
    let Some(payload) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let payload = payload.trim();

    if payload == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<ChatCompletion>(payload) {
        Ok(frame) => match frame.content() {
            Some(content) if !content.is_empty() => SseLine::Delta(content.to_string()),
            _ => SseLine::Skip,
        },
        Err(e) => {
            tracing::debug!(%e, payload, "skipping non-JSON stream payload");
            SseLine::Skip
        }
    }
}
