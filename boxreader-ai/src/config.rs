use std::path::PathBuf;

use anyhow::Result;
use boxreader_core::store::{read_json, write_json};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AnnotateError;

/// Connection settings for the chat-completions service, stored as `ai.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub show_boxes: bool,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            temperature: Some(0.2),
            max_tokens: Some(1024),
            show_boxes: true,
        }
    }
}

impl AiConfig {
    pub fn validate(&self) -> Result<(), AnnotateError> {
        if self.api_key.trim().is_empty() {
            return Err(AnnotateError::MissingConfig("api_key"));
        }
        if self.base_url.trim().is_empty() {
            return Err(AnnotateError::MissingConfig("base_url"));
        }
        if self.model.trim().is_empty() {
            return Err(AnnotateError::MissingConfig("model"));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim().trim_end_matches('/'))
    }
}

pub trait AiConfigStore: Send + Sync {
    fn load(&self) -> Result<Option<AiConfig>>;
    fn save(&self, config: &AiConfig) -> Result<()>;
}

pub struct JsonAiConfigStore {
    path: PathBuf,
}

impl JsonAiConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl AiConfigStore for JsonAiConfigStore {
    fn load(&self) -> Result<Option<AiConfig>> {
        read_json(&self.path)
    }

    fn save(&self, config: &AiConfig) -> Result<()> {
        write_json(&self.path, config)
    }
}

#[derive(Default)]
pub struct MemoryAiConfigStore {
    inner: Mutex<Option<AiConfig>>,
}

impl AiConfigStore for MemoryAiConfigStore {
    fn load(&self) -> Result<Option<AiConfig>> {
        Ok(self.inner.lock().clone())
    }

    fn save(&self, config: &AiConfig) -> Result<()> {
        *self.inner.lock() = Some(config.clone());
        Ok(())
    }
}

/// Loads the stored configuration, falling back to defaults on any failure.
pub fn load_or_default(store: &dyn AiConfigStore) -> AiConfig {
    match store.load() {
        Ok(Some(config)) => config,
        Ok(None) => AiConfig::default(),
        Err(err) => {
            warn!(?err, "failed to load AI configuration, using defaults");
            AiConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_fields_take_defaults() {
        let config: AiConfig =
            serde_json::from_str(r#"{"model":"m","base_url":"http://x","api_key":"k"}"#).unwrap();
        assert!(config.show_boxes);
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.max_tokens, Some(1024));
    }

    #[test]
    fn explicit_nulls_are_kept() {
        let config: AiConfig = serde_json::from_str(
            r#"{"model":"m","base_url":"http://x","api_key":"k","temperature":null,"max_tokens":null,"show_boxes":false}"#,
        )
        .unwrap();
        assert_eq!(config.temperature, None);
        assert_eq!(config.max_tokens, None);
        assert!(!config.show_boxes);
    }

    #[test]
    fn validation_names_the_missing_field() {
        let mut config = AiConfig::default();
        assert_eq!(config.validate(), Err(AnnotateError::MissingConfig("api_key")));
        config.api_key = "secret".to_string();
        assert!(config.validate().is_ok());
        config.model = " ".to_string();
        assert_eq!(config.validate(), Err(AnnotateError::MissingConfig("model")));
    }

    #[test]
    fn endpoint_strips_trailing_slashes() {
        let config = AiConfig {
            base_url: "https://example.com/v1///".to_string(),
            ..AiConfig::default()
        };
        assert_eq!(config.endpoint(), "https://example.com/v1/chat/completions");
    }

    #[test]
    fn json_store_round_trips() {
        let dir = tempdir().unwrap();
        let store = JsonAiConfigStore::new(dir.path().join("ai.json"));
        assert_eq!(load_or_default(&store), AiConfig::default());

        let config = AiConfig {
            api_key: "k".to_string(),
            max_tokens: None,
            ..AiConfig::default()
        };
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), Some(config));

        std::fs::write(dir.path().join("ai.json"), "not json").unwrap();
        assert_eq!(load_or_default(&store), AiConfig::default());
    }
}
