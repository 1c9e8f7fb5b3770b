use super::{
    endpoint, ensure_success, fragments_from_bytes, FragmentStream, Frame, FrameDecoder,
    GenerationOptions, LanguageModelProvider, ProviderKind,
};
use crate::error::ProviderError;
use crate::framing::LineParser;
use crate::wire::ChatTurn;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use url::Url;

/// Local Ollama chat binding; the body is newline-delimited JSON rather than SSE.
pub struct OllamaProvider {
    http: Client,
    url: Url,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
    options: ChatRequestOptions,
}

#[derive(Serialize)]
struct ChatRequestOptions {
    temperature: f32,
    num_predict: u32,
}

impl OllamaProvider {
    pub fn new(base_url: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            http: Client::new(),
            url: endpoint(ProviderKind::Ollama, base_url, "api/chat")?,
        })
    }
}

#[async_trait]
impl LanguageModelProvider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn stream(
        &self,
        turns: &[ChatTurn],
        options: &GenerationOptions,
    ) -> Result<FragmentStream, ProviderError> {
        let body = ChatRequest {
            model: options.model_or_default(),
            messages: turns,
            stream: true,
            options: ChatRequestOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };
        let response = self
            .http
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::unavailable(ProviderKind::Ollama, err))?;
        let response = ensure_success(ProviderKind::Ollama, response).await?;
        Ok(fragments_from_bytes(
            ProviderKind::Ollama,
            response.bytes_stream(),
            ChatLineDecoder::default(),
        ))
    }
}

#[derive(Debug, Default)]
pub(crate) struct ChatLineDecoder {
    lines: LineParser,
}

impl FrameDecoder for ChatLineDecoder {
    fn decode(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for line in self.lines.feed(chunk) {
            let Ok(value) = serde_json::from_str::<Value>(&line) else {
                tracing::debug!("dropping garbled ollama line");
                continue;
            };
            if let Some(error) = value.get("error").and_then(Value::as_str) {
                frames.push(Frame::Failed(error.to_string()));
                continue;
            }
            if let Some(text) = value.pointer("/message/content").and_then(Value::as_str) {
                if !text.is_empty() {
                    frames.push(Frame::Text(text.to_string()));
                }
            }
            if value.get("done").and_then(Value::as_bool) == Some(true) {
                frames.push(Frame::Done);
            }
        }
        frames
    }
}
