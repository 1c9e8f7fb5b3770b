use crate::llm::{ProviderKind, DEFAULT_HISTORY_WINDOW, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use directories::BaseDirs;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AiRuntimeSettings {
    pub default_provider: ProviderKind,
    pub temperature: f32,
    pub max_tokens: u32,
    pub history_window: usize,
    pub system_prompt: Option<String>,
    pub providers: BTreeMap<ProviderKind, ProviderSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum AiConfigError {
    #[error("AI not configured: create comet.yaml or set a provider API key.")]
    Missing,
    #[error("AI configuration invalid: {0}")]
    Invalid(String),
}

impl AiConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Missing => {
                "AI not configured: create comet.yaml or set a provider API key.".to_string()
            }
            Self::Invalid(detail) => {
                format!("AI not configured: {detail}. Update comet.yaml.")
            }
        }
    }
}

impl Default for AiRuntimeSettings {
    fn default() -> Self {
        Self {
            default_provider: ProviderKind::Mock,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            history_window: DEFAULT_HISTORY_WINDOW,
            system_prompt: None,
            providers: BTreeMap::new(),
        }
    }
}

impl AiRuntimeSettings {
    pub fn load() -> Result<Self, AiConfigError> {
        dotenvy::dotenv().ok();
        let app = match locate_config_file() {
            Some(path) => {
                let contents = fs::read_to_string(&path).map_err(|err| {
                    AiConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
                })?;
                let config: CometConfig = serde_yaml::from_str(&contents)
                    .map_err(|err| AiConfigError::Invalid(format!("invalid comet.yaml: {err}")))?;
                config
                    .app
                    .ok_or_else(|| AiConfigError::Invalid("missing `app` section".to_string()))?
            }
            None => AppSection::default(),
        };
        resolve_app_settings(app, |key| std::env::var(key).ok())
    }

    /// Like [`load`](Self::load) but never fails: an unusable configuration
    /// degrades to the offline mock provider.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(%err, "{}", err.user_message());
                Self::default()
            }
        }
    }
}

fn resolve_app_settings<F>(app: AppSection, env: F) -> Result<AiRuntimeSettings, AiConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let temperature = app.temperature.unwrap_or(DEFAULT_TEMPERATURE);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(AiConfigError::Invalid(format!(
            "temperature {temperature} must be between 0.0 and 2.0"
        )));
    }

    let mut providers = BTreeMap::new();
    for kind in ProviderKind::ALL {
        let declared = app.sections.get(kind.as_str()).cloned();
        let env_key = kind
            .api_key_env()
            .and_then(&env)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let settings = match (declared, kind) {
            (Some(section), _) => {
                let api_key = non_empty(section.api_key).or(env_key);
                if kind.api_key_env().is_some() && api_key.is_none() {
                    return Err(AiConfigError::Invalid(format!(
                        "missing {kind} api key in comet.yaml"
                    )));
                }
                ProviderSettings {
                    api_key,
                    base_url: non_empty(section.base_url),
                    model: non_empty(section.model),
                }
            }
            (None, ProviderKind::Ollama) => match env("OLLAMA_BASE_URL").and_then(non_empty_str) {
                Some(base_url) => ProviderSettings {
                    base_url: Some(base_url),
                    ..ProviderSettings::default()
                },
                None => continue,
            },
            (None, _) => match env_key {
                Some(api_key) => ProviderSettings {
                    api_key: Some(api_key),
                    ..ProviderSettings::default()
                },
                None => continue,
            },
        };
        providers.insert(kind, settings);
    }

    let default_provider = match app.provider.or_else(|| env("COMET_PROVIDER")) {
        Some(name) => name
            .parse::<ProviderKind>()
            .map_err(AiConfigError::Invalid)?,
        None => providers
            .keys()
            .copied()
            .next()
            .ok_or(AiConfigError::Missing)?,
    };

    Ok(AiRuntimeSettings {
        default_provider,
        temperature,
        max_tokens: app.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        history_window: app.history_window.unwrap_or(DEFAULT_HISTORY_WINDOW),
        system_prompt: non_empty(app.system_prompt),
        providers,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(non_empty_str)
}

fn non_empty_str(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn locate_config_file() -> Option<PathBuf> {
    comet_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn comet_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("comet");
        paths.push(config_dir.join("comet.yaml"));
        paths.push(config_dir.join("comet.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".comet").join("comet.yaml"));
    }
    paths.push(PathBuf::from("comet.yaml"));
    paths.push(PathBuf::from("comet.yml"));
    paths
}

#[derive(Debug, Deserialize)]
struct CometConfig {
    app: Option<AppSection>,
}

#[derive(Debug, Default, Deserialize)]
struct AppSection {
    provider: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    history_window: Option<usize>,
    system_prompt: Option<String>,
    #[serde(flatten)]
    sections: BTreeMap<String, ProviderSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProviderSection {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    model: Option<String>,
}
