use crate::error::WireError;
use crate::framing::LineParser;
use crate::state::MessageRole;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Prior turn forwarded as context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One self-delimited unit on the transport, carrying exactly one fragment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireRecord {
    #[serde(default)]
    pub content: String,
}

/// Encode a fragment as a single JSON line.
pub fn encode_record(fragment: &str) -> Bytes {
    let record = WireRecord {
        content: fragment.to_string(),
    };
    // A struct holding one String cannot fail to serialize.
    let mut line = serde_json::to_vec(&record).unwrap_or_default();
    line.push(b'\n');
    Bytes::from(line)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ChatTurn>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("temperature {0} is outside 0.0..=2.0")]
    Temperature(f32),
}

impl GenerationRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.unwrap_or(false)
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.message.trim().is_empty() {
            return Err(RequestError::EmptyMessage);
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(RequestError::Temperature(temperature));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    pub role: MessageRole,
    pub content: String,
    pub id: String,
    pub created_at: String,
}

/// Body returned for a non-streaming generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationResponse {
    pub id: String,
    pub messages: Vec<ResponseMessage>,
}

/// Client-side decoder for the newline-delimited record stream.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    lines: LineParser,
    decoded: u64,
}

impl RecordDecoder {
    /// Decode every complete record in `chunk`. Malformed lines come back as
    /// `WireError::Parse` and do not disturb the records around them.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<WireRecord, WireError>> {
        self.lines
            .feed(chunk)
            .into_iter()
            .map(|line| {
                serde_json::from_str::<WireRecord>(&line)
                    .map(|record| {
                        self.decoded += 1;
                        record
                    })
                    .map_err(|err| WireError::Parse(err.to_string()))
            })
            .collect()
    }

    /// Called when the transport closes normally. A pending partial line means
    /// the relay never finished writing its last record.
    pub fn finish(&mut self) -> Result<(), WireError> {
        match self.lines.finish() {
            Some(tail) => Err(WireError::Truncated(tail.len())),
            None => Ok(()),
        }
    }

    pub fn decoded(&self) -> u64 {
        self.decoded
    }
}
