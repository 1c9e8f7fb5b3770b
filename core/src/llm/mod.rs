mod anthropic;
mod mock;
mod ollama;
mod openai;

pub use anthropic::AnthropicProvider;
pub use mock::{MockProvider, MockScript};
pub use ollama::OllamaProvider;
pub use openai::OpenAiCompatibleProvider;

use crate::config::AiRuntimeSettings;
use crate::error::ProviderError;
use crate::state::MessageRole;
use crate::wire::{ChatTurn, GenerationRequest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

pub const SYSTEM_PROMPT: &str = "You are an expert React/TypeScript developer for Comet Studio, \
an AI-powered component and app builder.\n\
- Generate clean, production-ready React/TypeScript code.\n\
- Always output runnable code in ```tsx code blocks.\n\
- When asked for a component, output a complete, self-contained component with a default export.\n\
- When asked for a full app, use a project structure with multiple files.\n\
- Use Tailwind CSS utility classes and icons from 'lucide-react'.\n\
- Keep components accessible: ARIA labels, focus states, semantic HTML.";

/// Ordered text fragments; the stream ending is the completion signal.
pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    DeepSeek,
    OpenAi,
    Claude,
    Perplexity,
    Kimi,
    Ollama,
    Mock,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 7] = [
        Self::DeepSeek,
        Self::OpenAi,
        Self::Claude,
        Self::Perplexity,
        Self::Kimi,
        Self::Ollama,
        Self::Mock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeepSeek => "deepseek",
            Self::OpenAi => "openai",
            Self::Claude => "claude",
            Self::Perplexity => "perplexity",
            Self::Kimi => "kimi",
            Self::Ollama => "ollama",
            Self::Mock => "mock",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::DeepSeek => "deepseek-chat",
            Self::OpenAi => "gpt-4-turbo-preview",
            Self::Claude => "claude-3-5-sonnet-20241022",
            Self::Perplexity => "llama-3.1-sonar-large-128k-online",
            Self::Kimi => "moonshot-v1-8k",
            Self::Ollama => "deepseek-coder",
            Self::Mock => "mock",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::DeepSeek => "https://api.deepseek.com",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Claude => "https://api.anthropic.com",
            Self::Perplexity => "https://api.perplexity.ai",
            Self::Kimi => "https://api.moonshot.cn/v1",
            Self::Ollama => "http://localhost:11434",
            Self::Mock => "http://localhost",
        }
    }

    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Claude => Some("ANTHROPIC_API_KEY"),
            Self::Perplexity => Some("PERPLEXITY_API_KEY"),
            Self::Kimi => Some("MOONSHOT_API_KEY"),
            Self::Ollama | Self::Mock => None,
        }
    }

    pub fn from_environment() -> Option<Self> {
        std::env::var("COMET_PROVIDER")
            .ok()
            .and_then(|value| value.parse().ok())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
            .or_else(|| match value.to_ascii_lowercase().as_str() {
                "anthropic" => Some(Self::Claude),
                "moonshot" => Some(Self::Kimi),
                _ => None,
            })
            .ok_or_else(|| format!("unknown provider `{value}`"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub provider: ProviderKind,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

impl GenerationOptions {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            stream: true,
        }
    }

    pub fn model_or_default(&self) -> &str {
        self.model
            .as_deref()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_model())
    }
}

#[async_trait]
pub trait LanguageModelProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Open a fragment stream. Errors returned here happen before any output.
    async fn stream(
        &self,
        turns: &[ChatTurn],
        options: &GenerationOptions,
    ) -> Result<FragmentStream, ProviderError>;

    async fn complete(
        &self,
        turns: &[ChatTurn],
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let mut fragments = self.stream(turns, options).await?;
        let mut text = String::new();
        while let Some(fragment) = fragments.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

#[derive(Clone)]
pub struct LlmDriver {
    default_provider: ProviderKind,
    default_temperature: f32,
    default_max_tokens: u32,
    history_window: usize,
    system_prompt: String,
    providers: HashMap<ProviderKind, Arc<dyn LanguageModelProvider>>,
    models: HashMap<ProviderKind, String>,
}

impl LlmDriver {
    pub fn new(default_provider: ProviderKind) -> Self {
        let mut providers: HashMap<ProviderKind, Arc<dyn LanguageModelProvider>> =
            HashMap::new();
        providers.insert(ProviderKind::Mock, Arc::new(MockProvider::default()));
        Self {
            default_provider,
            default_temperature: DEFAULT_TEMPERATURE,
            default_max_tokens: DEFAULT_MAX_TOKENS,
            history_window: DEFAULT_HISTORY_WINDOW,
            system_prompt: SYSTEM_PROMPT.to_string(),
            providers,
            models: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &AiRuntimeSettings) -> Self {
        let mut driver = Self::new(settings.default_provider);
        driver.default_temperature = settings.temperature;
        driver.default_max_tokens = settings.max_tokens;
        driver.history_window = settings.history_window;
        if let Some(prompt) = &settings.system_prompt {
            driver.system_prompt = prompt.clone();
        }

        for (kind, section) in &settings.providers {
            if let Some(model) = section.model.as_deref().filter(|model| !model.trim().is_empty()) {
                driver.models.insert(*kind, model.to_string());
            }
            let base_url = section
                .base_url
                .clone()
                .unwrap_or_else(|| kind.default_base_url().to_string());
            let api_key = section.api_key.clone().unwrap_or_default();
            let provider: Result<Arc<dyn LanguageModelProvider>, ProviderError> = match kind {
                ProviderKind::Claude => AnthropicProvider::new(&base_url, api_key)
                    .map(|provider| Arc::new(provider) as Arc<dyn LanguageModelProvider>),
                ProviderKind::Ollama => OllamaProvider::new(&base_url)
                    .map(|provider| Arc::new(provider) as Arc<dyn LanguageModelProvider>),
                ProviderKind::Mock => Ok(Arc::new(MockProvider::default())),
                openai_compatible => {
                    OpenAiCompatibleProvider::new(*openai_compatible, &base_url, api_key)
                        .map(|provider| Arc::new(provider) as Arc<dyn LanguageModelProvider>)
                }
            };
            match provider {
                Ok(provider) => {
                    driver.providers.insert(*kind, provider);
                }
                Err(err) => {
                    tracing::warn!(provider = %kind, %err, "skipping provider binding");
                }
            }
        }

        if !driver.providers.contains_key(&driver.default_provider) {
            tracing::warn!(
                provider = %driver.default_provider,
                "default provider is not configured, falling back to mock"
            );
            driver.default_provider = ProviderKind::Mock;
        }
        driver
    }

    pub fn fake() -> Self {
        Self::new(ProviderKind::Mock)
    }

    pub fn with_provider(mut self, provider: Arc<dyn LanguageModelProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn default_provider(&self) -> ProviderKind {
        self.default_provider
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    pub fn configured_providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn options_for(&self, request: &GenerationRequest) -> GenerationOptions {
        let provider = request
            .provider
            .as_deref()
            .and_then(|value| match value.parse::<ProviderKind>() {
                Ok(kind) => Some(kind),
                Err(err) => {
                    tracing::debug!(%err, "using default provider");
                    None
                }
            })
            .unwrap_or(self.default_provider);
        let model = request
            .model
            .clone()
            .filter(|model| !model.trim().is_empty())
            .or_else(|| self.models.get(&provider).cloned());
        GenerationOptions {
            provider,
            model,
            temperature: request
                .temperature
                .unwrap_or(self.default_temperature)
                .clamp(0.0, 2.0),
            max_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
            stream: request.is_streaming(),
        }
    }

    /// System prompt, the most recent `history_window` prior turns, then the new message.
    pub fn build_context(&self, request: &GenerationRequest) -> Vec<ChatTurn> {
        let skip = request.messages.len().saturating_sub(self.history_window);
        let mut turns = Vec::with_capacity(self.history_window + 2);
        turns.push(ChatTurn::new(MessageRole::System, self.system_prompt.clone()));
        turns.extend(
            request
                .messages
                .iter()
                .skip(skip)
                .filter(|turn| turn.role != MessageRole::System)
                .cloned(),
        );
        turns.push(ChatTurn::new(MessageRole::User, request.message.clone()));
        turns
    }

    fn provider(&self, kind: ProviderKind) -> Result<&Arc<dyn LanguageModelProvider>, ProviderError> {
        self.providers
            .get(&kind)
            .ok_or_else(|| ProviderError::unavailable(kind, "provider is not configured"))
    }

    pub async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, ProviderError> {
        let options = self.options_for(request);
        let turns = self.build_context(request);
        let provider = self.provider(options.provider)?;
        tracing::info!(
            provider = %options.provider,
            model = options.model_or_default(),
            turns = turns.len(),
            "opening provider stream"
        );
        let fragments = provider.stream(&turns, &options).await?;
        Ok(normalize(options.provider, fragments))
    }

    pub async fn complete(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let options = self.options_for(request);
        let turns = self.build_context(request);
        let provider = self.provider(options.provider)?;
        provider.complete(&turns, &options).await
    }
}

/// Enforce the fragment contract on a binding's raw output: empty fragments are
/// skipped, an error before the first fragment becomes `Unavailable`, one after
/// becomes `Interrupted`, and nothing is yielded after an error.
pub fn normalize(provider: ProviderKind, inner: FragmentStream) -> FragmentStream {
    stream::unfold(Some((inner, false)), move |state| async move {
        let (mut inner, delivered) = state?;
        loop {
            match inner.next().await {
                None => return None,
                Some(Ok(fragment)) if fragment.is_empty() => continue,
                Some(Ok(fragment)) => return Some((Ok(fragment), Some((inner, true)))),
                Some(Err(err)) => {
                    let reason = match err {
                        ProviderError::Unavailable { reason, .. }
                        | ProviderError::Interrupted { reason, .. }
                        | ProviderError::Misconfigured(reason) => reason,
                    };
                    let err = if delivered {
                        ProviderError::interrupted(provider, reason)
                    } else {
                        ProviderError::unavailable(provider, reason)
                    };
                    tracing::warn!(provider = %provider, %err, "provider stream failed");
                    return Some((Err(err), None));
                }
            }
        }
    })
    .boxed()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    Text(String),
    Failed(String),
    Done,
}

pub(crate) trait FrameDecoder: Send + 'static {
    fn decode(&mut self, chunk: &[u8]) -> Vec<Frame>;
}

struct DecodeState<D> {
    bytes: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: D,
    pending: VecDeque<Frame>,
}

pub(crate) fn fragments_from_bytes<S, D>(provider: ProviderKind, bytes: S, decoder: D) -> FragmentStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    D: FrameDecoder,
{
    let state = DecodeState {
        bytes: bytes.boxed(),
        decoder,
        pending: VecDeque::new(),
    };
    stream::unfold(Some(state), move |state| async move {
        let mut state = state?;
        loop {
            match state.pending.pop_front() {
                Some(Frame::Text(text)) => return Some((Ok(text), Some(state))),
                Some(Frame::Failed(reason)) => {
                    return Some((Err(ProviderError::interrupted(provider, reason)), None))
                }
                Some(Frame::Done) => return None,
                None => {}
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.decoder.decode(&chunk);
                    state.pending.extend(frames);
                }
                Some(Err(err)) => {
                    return Some((Err(ProviderError::interrupted(provider, err)), None));
                }
                None => return None,
            }
        }
    })
    .boxed()
}

pub(crate) fn endpoint(provider: ProviderKind, base_url: &str, path: &str) -> Result<Url, ProviderError> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base)
        .and_then(|base| base.join(path))
        .map_err(|err| ProviderError::Misconfigured(format!("{provider} base url `{base_url}`: {err}")))
}

pub(crate) async fn ensure_success(
    provider: ProviderKind,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("request failed").to_string());
    Err(ProviderError::unavailable(
        provider,
        format!("HTTP {}: {}", status.as_u16(), body.trim()),
    ))
}
