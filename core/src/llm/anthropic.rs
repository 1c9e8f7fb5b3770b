use super::{
    endpoint, ensure_success, fragments_from_bytes, FragmentStream, Frame, FrameDecoder,
    GenerationOptions, LanguageModelProvider, ProviderKind,
};
use crate::error::ProviderError;
use crate::framing::SseParser;
use crate::state::MessageRole;
use crate::wire::ChatTurn;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use url::Url;

const API_VERSION: &str = "2023-06-01";

/// Messages API binding. Unlike chat completions, text arrives inside typed
/// `content_block_delta` events and the system prompt is a top-level field.
pub struct AnthropicProvider {
    http: Client,
    url: Url,
    api_key: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a ChatTurn>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

impl AnthropicProvider {
    pub fn new(base_url: &str, api_key: String) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::Misconfigured(
                "missing claude api key".to_string(),
            ));
        }
        Ok(Self {
            http: Client::new(),
            url: endpoint(ProviderKind::Claude, base_url, "v1/messages")?,
            api_key,
        })
    }
}

fn split_system(turns: &[ChatTurn]) -> (Option<String>, Vec<&ChatTurn>) {
    let system: Vec<&str> = turns
        .iter()
        .filter(|turn| turn.role == MessageRole::System)
        .map(|turn| turn.content.as_str())
        .collect();
    let conversation = turns
        .iter()
        .filter(|turn| turn.role != MessageRole::System)
        .collect();
    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, conversation)
}

#[async_trait]
impl LanguageModelProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    async fn stream(
        &self,
        turns: &[ChatTurn],
        options: &GenerationOptions,
    ) -> Result<FragmentStream, ProviderError> {
        let (system, messages) = split_system(turns);
        let body = MessagesRequest {
            model: options.model_or_default(),
            system,
            messages,
            temperature: options.temperature.min(1.0),
            max_tokens: options.max_tokens,
            stream: true,
        };
        let response = self
            .http
            .post(self.url.clone())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::unavailable(ProviderKind::Claude, err))?;
        let response = ensure_success(ProviderKind::Claude, response).await?;
        Ok(fragments_from_bytes(
            ProviderKind::Claude,
            response.bytes_stream(),
            MessageEventDecoder::default(),
        ))
    }
}

#[derive(Debug, Default)]
pub(crate) struct MessageEventDecoder {
    sse: SseParser,
}

impl FrameDecoder for MessageEventDecoder {
    fn decode(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for payload in self.sse.feed(chunk) {
            let Ok(value) = serde_json::from_str::<Value>(&payload) else {
                tracing::debug!("dropping garbled message event");
                continue;
            };
            match value.get("type").and_then(Value::as_str) {
                Some("content_block_delta") => {
                    if let Some(text) = value.pointer("/delta/text").and_then(Value::as_str) {
                        frames.push(Frame::Text(text.to_string()));
                    }
                }
                Some("message_stop") => frames.push(Frame::Done),
                Some("error") => {
                    let message = value
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    frames.push(Frame::Failed(message.to_string()));
                }
                _ => {}
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_text_deltas_become_fragments() {
        let mut decoder = MessageEventDecoder::default();
        let frames = decoder.decode(
            b"event: message_start\ndata: {\"type\":\"message_start\"}\n\n\
              event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n\
              event: ping\ndata: {\"type\":\"ping\"}\n\n\
              event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        );
        assert_eq!(frames, vec![Frame::Text("Hi".into()), Frame::Done]);
    }

    #[test]
    fn error_event_is_a_failure() {
        let mut decoder = MessageEventDecoder::default();
        let frames = decoder.decode(
            b"data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        );
        assert_eq!(frames, vec![Frame::Failed("Overloaded".into())]);
    }

    #[test]
    fn system_turns_are_hoisted() {
        let turns = vec![
            ChatTurn::new(MessageRole::System, "be terse"),
            ChatTurn::new(MessageRole::User, "hi"),
        ];
        let (system, rest) = split_system(&turns);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(rest.len(), 1);
    }
}
