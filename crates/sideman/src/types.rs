//! OpenAI-compatible chat-completion wire types.
//!
//! Only the fields this client touches are modelled; everything else in
//! the server's JSON is ignored on deserialization.

use serde::{Deserialize, Serialize};

/// A chat message in OpenAI format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user", or "assistant".
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub stream: bool,
    pub temperature: f32,
    pub messages: Vec<ChatMessage>,
}

/// One decoded frame of a streaming response, or the whole body of a
/// non-streaming one — both carry a `choices` array.
#[derive(Debug, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    /// Streaming shape: incremental delta.
    #[serde(default)]
    pub delta: Option<ChatDelta>,
    /// Non-streaming shape: the full message.
    #[serde(default)]
    pub message: Option<ChatMessageBody>,
}

#[derive(Debug, Deserialize)]
pub struct ChatDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessageBody {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletion {
    /// Text carried by this frame, under either response shape.
    pub fn content(&self) -> Option<&str> {
        let choice = self.choices.first()?;
        if let Some(delta) = &choice.delta {
            return delta.content.as_deref();
        }
        choice.message.as_ref()?.content.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_delta_shape() {
        let frame: ChatCompletion =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"C2:80\n"}}]}"#).unwrap();
        assert_eq!(frame.content(), Some("C2:80\n"));
    }

    #[test]
    fn test_non_streaming_message_shape() {
        let body: ChatCompletion =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":"BASS"}}]}"#)
                .unwrap();
        assert_eq!(body.content(), Some("BASS"));
    }

    #[test]
    fn test_empty_delta() {
        let frame: ChatCompletion =
            serde_json::from_str(r#"{"choices":[{"delta":{}}]}"#).unwrap();
        assert_eq!(frame.content(), None);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let frame: ChatCompletion = serde_json::from_str(
            r#"{"id":"x","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"hi"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(frame.content(), Some("hi"));
    }
}
