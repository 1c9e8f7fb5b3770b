use super::{
    endpoint, ensure_success, fragments_from_bytes, FragmentStream, Frame, FrameDecoder,
    GenerationOptions, LanguageModelProvider, ProviderKind,
};
use crate::error::ProviderError;
use crate::framing::SseParser;
use crate::wire::ChatTurn;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use url::Url;

/// Chat-completions binding shared by every OpenAI-compatible vendor
/// (DeepSeek, OpenAI, Perplexity, Kimi).
pub struct OpenAiCompatibleProvider {
    kind: ProviderKind,
    http: Client,
    url: Url,
    api_key: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

impl OpenAiCompatibleProvider {
    pub fn new(kind: ProviderKind, base_url: &str, api_key: String) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::Misconfigured(format!("missing {kind} api key")));
        }
        Ok(Self {
            kind,
            http: Client::new(),
            url: endpoint(kind, base_url, "chat/completions")?,
            api_key,
        })
    }

    async fn send(
        &self,
        turns: &[ChatTurn],
        options: &GenerationOptions,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let body = CompletionRequest {
            model: options.model_or_default(),
            messages: turns,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream,
        };
        let response = self
            .http
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::unavailable(self.kind, err))?;
        ensure_success(self.kind, response).await
    }
}

#[async_trait]
impl LanguageModelProvider for OpenAiCompatibleProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn stream(
        &self,
        turns: &[ChatTurn],
        options: &GenerationOptions,
    ) -> Result<FragmentStream, ProviderError> {
        let response = self.send(turns, options, true).await?;
        Ok(fragments_from_bytes(
            self.kind,
            response.bytes_stream(),
            ChatCompletionDecoder::default(),
        ))
    }

    async fn complete(
        &self,
        turns: &[ChatTurn],
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let response = self.send(turns, options, false).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|err| ProviderError::interrupted(self.kind, err))?;
        Ok(value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

/// Decodes `choices[0].delta.content` out of chat-completion chunks.
#[derive(Debug, Default)]
pub(crate) struct ChatCompletionDecoder {
    sse: SseParser,
}

impl FrameDecoder for ChatCompletionDecoder {
    fn decode(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.sse
            .feed(chunk)
            .into_iter()
            .filter_map(|payload| {
                let value: Value = match serde_json::from_str(&payload) {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::debug!(%err, "dropping garbled completion chunk");
                        return None;
                    }
                };
                if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
                    return Some(Frame::Failed(message.to_string()));
                }
                value
                    .pointer("/choices/0/delta/content")
                    .and_then(Value::as_str)
                    .filter(|content| !content.is_empty())
                    .map(|content| Frame::Text(content.to_string()))
            })
            .collect()
    }
}
