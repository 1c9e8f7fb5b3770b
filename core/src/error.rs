use crate::llm::ProviderKind;

/// Failure raised by a provider binding.
///
/// `Unavailable` is only produced before the first fragment; once any text has
/// been delivered an upstream failure is reported as `Interrupted`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider} is unavailable: {reason}")]
    Unavailable {
        provider: ProviderKind,
        reason: String,
    },
    #[error("{provider} stream interrupted: {reason}")]
    Interrupted {
        provider: ProviderKind,
        reason: String,
    },
    #[error("provider misconfigured: {0}")]
    Misconfigured(String),
}

impl ProviderError {
    pub fn unavailable(provider: ProviderKind, reason: impl ToString) -> Self {
        Self::Unavailable {
            provider,
            reason: reason.to_string(),
        }
    }

    pub fn interrupted(provider: ProviderKind, reason: impl ToString) -> Self {
        Self::Interrupted {
            provider,
            reason: reason.to_string(),
        }
    }

    pub fn provider(&self) -> Option<ProviderKind> {
        match self {
            Self::Unavailable { provider, .. } | Self::Interrupted { provider, .. } => {
                Some(*provider)
            }
            Self::Misconfigured(_) => None,
        }
    }
}

/// Failure of a generation as seen by the session store.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl StreamError {
    /// Short text shown in place of the failed assistant message.
    pub fn user_message(&self) -> String {
        match self {
            Self::ProviderUnavailable(_) | Self::Transport(_) => {
                "Error: Failed to connect to AI service.".to_string()
            }
            Self::StreamInterrupted(_) => {
                "Error: The response was interrupted. Please try again.".to_string()
            }
        }
    }
}

impl From<ProviderError> for StreamError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable { .. } | ProviderError::Misconfigured(_) => {
                Self::ProviderUnavailable(err.to_string())
            }
            ProviderError::Interrupted { .. } => Self::StreamInterrupted(err.to_string()),
        }
    }
}

/// Problems decoding the newline-delimited wire format.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("malformed wire record: {0}")]
    Parse(String),
    #[error("transport closed mid-record ({0} bytes pending)")]
    Truncated(usize),
}
