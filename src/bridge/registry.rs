//! Provider Registry and Model Registry.
//!
//! Writes are infrequent (construction-time seeding plus explicit
//! `register_provider`/`register_model` calls) while reads must stay safe
//! under concurrent `chat`/`stream` calls, so both registries guard their
//! maps with `tokio::sync::RwLock`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::bridge::error::{BridgeError, ErrorKind};
use crate::bridge::plugin::ProviderPlugin;

/// `(providerId, version) -> ProviderPlugin`, with a semantic-version
/// ordering for "latest" lookups.
pub struct ProviderRegistry {
    entries: RwLock<HashMap<(String, String), Arc<dyn ProviderPlugin>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, plugin: Arc<dyn ProviderPlugin>) {
        let key = (plugin.id().to_string(), plugin.version().to_string());
        self.entries.write().await.insert(key, plugin);
    }

    pub async fn get(&self, id: &str, version: &str) -> Option<Arc<dyn ProviderPlugin>> {
        self.entries
            .read()
            .await
            .get(&(id.to_string(), version.to_string()))
            .cloned()
    }

    /// Resolves `"<id>-<version>"` as used by `Model.metadata.providerPlugin`.
    pub async fn get_by_qualified(&self, qualified: &str) -> Option<Arc<dyn ProviderPlugin>> {
        let (id, version) = qualified.rsplit_once('-')?;
        self.get(id, version).await
    }

    /// Latest-registered plugin for a given provider id, ordered by
    /// semantic version.
    pub async fn latest(&self, id: &str) -> Option<Arc<dyn ProviderPlugin>> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|((pid, _), _)| pid == id)
            .max_by(|(( _, v1), _), ((_, v2), _)| compare_semver(v1, v2))
            .map(|(_, plugin)| plugin.clone())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn compare_semver(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |s: &str| -> Vec<u64> {
        s.split('.').map(|p| p.parse().unwrap_or(0)).collect()
    };
    parse(a).cmp(&parse(b))
}

/// Capability flags the Model Registry attaches to each model entry.
#[derive(Debug, Clone, Default)]
pub struct ModelCapabilities {
    pub streaming: bool,
    pub tool_calls: bool,
    pub images: bool,
    pub documents: bool,
    pub temperature: bool,
    pub max_tokens: Option<u32>,
    pub supported_content_types: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ModelRecord {
    pub id: String,
    pub name: String,
    pub provider_id: String,
    pub capabilities: ModelCapabilities,
    /// `"<providerId>-<version>"`; the authoritative routing key — a
    /// plugin's own `supportsModel` is advisory only, this field is not.
    pub provider_plugin: String,
}

/// `modelId -> ModelRecord`.
pub struct ModelRegistry {
    entries: RwLock<HashMap<String, ModelRecord>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        ModelRegistry {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, record: ModelRecord) {
        self.entries.write().await.insert(record.id.clone(), record);
    }

    pub async fn get(&self, model_id: &str) -> Option<ModelRecord> {
        self.entries.read().await.get(model_id).cloned()
    }

    pub async fn seed_builtin(&self, allowed_provider_ids: &[String]) {
        for record in builtin_catalog() {
            if allowed_provider_ids.contains(&record.provider_id) {
                self.register(record).await;
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The packaged, read-only model catalog — the only process-wide global
/// state, alongside the registries owned by one Bridge Client instance. A
/// handful of well-known models per provider family — callers
/// needing exhaustive catalogs supply their own via
/// `modelSeed: { data: ... }` / `{ path: ... }`.
fn builtin_catalog() -> Vec<ModelRecord> {
    vec![
        ModelRecord {
            id: "openai:gpt-4o".to_string(),
            name: "GPT-4o".to_string(),
            provider_id: "openai".to_string(),
            capabilities: ModelCapabilities {
                streaming: true,
                tool_calls: true,
                images: true,
                documents: false,
                temperature: true,
                max_tokens: Some(128_000),
                supported_content_types: vec!["text".to_string(), "image".to_string()],
            },
            provider_plugin: "openai-1.0.0".to_string(),
        },
        ModelRecord {
            id: "openai:gpt-4".to_string(),
            name: "GPT-4".to_string(),
            provider_id: "openai".to_string(),
            capabilities: ModelCapabilities {
                streaming: true,
                tool_calls: true,
                images: false,
                documents: false,
                temperature: true,
                max_tokens: Some(8_192),
                supported_content_types: vec!["text".to_string()],
            },
            provider_plugin: "openai-1.0.0".to_string(),
        },
        ModelRecord {
            id: "anthropic:claude-3-5-sonnet".to_string(),
            name: "Claude 3.5 Sonnet".to_string(),
            provider_id: "anthropic".to_string(),
            capabilities: ModelCapabilities {
                streaming: true,
                tool_calls: true,
                images: true,
                documents: true,
                temperature: true,
                max_tokens: Some(200_000),
                supported_content_types: vec!["text".to_string(), "image".to_string(), "document".to_string()],
            },
            provider_plugin: "anthropic-1.0.0".to_string(),
        },
        ModelRecord {
            id: "gemini:gemini-2.0-flash".to_string(),
            name: "Gemini 2.0 Flash".to_string(),
            provider_id: "gemini".to_string(),
            capabilities: ModelCapabilities {
                streaming: true,
                tool_calls: true,
                images: true,
                documents: false,
                temperature: true,
                max_tokens: Some(1_000_000),
                supported_content_types: vec!["text".to_string(), "image".to_string()],
            },
            provider_plugin: "gemini-1.0.0".to_string(),
        },
        ModelRecord {
            id: "xai:grok-4".to_string(),
            name: "Grok 4".to_string(),
            provider_id: "xai".to_string(),
            capabilities: ModelCapabilities {
                streaming: true,
                tool_calls: true,
                images: false,
                documents: false,
                temperature: true,
                max_tokens: Some(131_072),
                supported_content_types: vec!["text".to_string()],
            },
            provider_plugin: "xai-1.0.0".to_string(),
        },
    ]
}

pub fn builtin_provider_ids() -> Vec<String> {
    vec![
        "openai".to_string(),
        "anthropic".to_string(),
        "gemini".to_string(),
        "xai".to_string(),
    ]
}

pub fn unknown_model_error(model: &str) -> BridgeError {
    BridgeError::new(ErrorKind::Validation, format!("unknown model: {}", model))
        .with_context("model", model.to_string())
}
