use crate::error::StreamError;
use crate::llm::LlmDriver;
use crate::relay::{relay_body, RelayError};
use crate::wire::GenerationRequest;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use url::Url;

/// Raw wire bytes for one generation.
pub type ByteStream = BoxStream<'static, Result<Bytes, StreamError>>;

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn open(&self, request: GenerationRequest) -> Result<ByteStream, StreamError>;
}

/// Talks to `POST /api/chat` on a relay server.
pub struct HttpBackend {
    http: Client,
    url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)?;
        Ok(Self {
            http: Client::new(),
            url: base.join("api/chat")?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn open(&self, mut request: GenerationRequest) -> Result<ByteStream, StreamError> {
        request.streaming = Some(true);
        let response = self
            .http
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|err| StreamError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                StreamError::ProviderUnavailable(format!("{status}: {body}"))
            } else {
                StreamError::Transport(format!("{status}: {body}"))
            });
        }
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| StreamError::StreamInterrupted(err.to_string())))
            .boxed())
    }
}

/// Runs the driver in-process and feeds the store the same bytes a relay
/// would have sent.
pub struct EmbeddedBackend {
    driver: LlmDriver,
}

impl EmbeddedBackend {
    pub fn new(driver: LlmDriver) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &LlmDriver {
        &self.driver
    }
}

#[async_trait]
impl GenerationBackend for EmbeddedBackend {
    async fn open(&self, request: GenerationRequest) -> Result<ByteStream, StreamError> {
        let fragments = self.driver.stream(&request).await?;
        Ok(relay_body(fragments)
            .map(|item| {
                item.map_err(|err| match err {
                    RelayError::Upstream(err) => StreamError::from(err),
                    RelayError::Io(err) => StreamError::StreamInterrupted(err.to_string()),
                })
            })
            .boxed())
    }
}
