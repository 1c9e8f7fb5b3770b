use super::{FragmentStream, GenerationOptions, LanguageModelProvider, ProviderKind};
use crate::error::ProviderError;
use crate::state::MessageRole;
use crate::wire::ChatTurn;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::time::Duration;

/// Scripted behaviour for the mock provider.
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    /// Fragments to emit. When empty the provider echoes the last user turn.
    pub fragments: Vec<String>,
    /// Refuse the request before producing anything.
    pub unavailable: bool,
    /// Fail mid-stream after this many fragments.
    pub fail_after: Option<usize>,
    /// Pause before each fragment.
    pub delay: Option<Duration>,
}

impl MockScript {
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    script: MockScript,
}

impl MockProvider {
    pub fn scripted(script: MockScript) -> Self {
        Self { script }
    }

    pub fn unavailable() -> Self {
        Self::scripted(MockScript {
            unavailable: true,
            ..MockScript::default()
        })
    }

    fn echo(turns: &[ChatTurn], options: &GenerationOptions) -> Vec<String> {
        let prompt = turns
            .iter()
            .rev()
            .find(|turn| turn.role == MessageRole::User)
            .map(|turn| turn.content.clone())
            .unwrap_or_else(|| "How can I help you today?".to_string());
        let reply = format!(
            "[Mock] Model {:?}: received '{}'.",
            options.model_or_default(),
            prompt
        );
        reply
            .split_inclusive(' ')
            .map(ToString::to_string)
            .collect()
    }
}

#[async_trait]
impl LanguageModelProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn stream(
        &self,
        turns: &[ChatTurn],
        options: &GenerationOptions,
    ) -> Result<FragmentStream, ProviderError> {
        if self.script.unavailable {
            return Err(ProviderError::unavailable(
                ProviderKind::Mock,
                "scripted outage",
            ));
        }
        let fragments = if self.script.fragments.is_empty() {
            Self::echo(turns, options)
        } else {
            self.script.fragments.clone()
        };
        let limit = self.script.fail_after.unwrap_or(fragments.len());
        let mut items: Vec<Result<String, ProviderError>> =
            fragments.into_iter().take(limit).map(Ok).collect();
        if self.script.fail_after.is_some() {
            items.push(Err(ProviderError::interrupted(
                ProviderKind::Mock,
                "scripted disconnect",
            )));
        }

        let delay = self.script.delay;
        Ok(stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed())
    }
}
