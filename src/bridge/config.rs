//! Bridge Client configuration: a small, explicit,
//! validate-once-at-construction config type covering the provider map,
//! default-provider resolution, timeout, and model-seed surface this
//! bridge needs — frozen (no setters) once built.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::bridge::error::{BridgeError, ErrorKind};
use crate::bridge::plugin::ProviderConfig;

const MIN_TIMEOUT_MS: u64 = 1_000;
const MAX_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// How the Model Registry is populated at construction time.
#[derive(Debug, Clone)]
pub enum ModelSeed {
    /// Seed from the packaged catalog (`registry::builtin_catalog`),
    /// filtered to the provider ids actually configured.
    Builtin,
    /// Seed nothing; callers register models themselves after construction.
    None,
    /// Raw model records as JSON, in `ModelRecordWire` shape (see
    /// `bridge::client`).
    Custom(serde_json::Value),
    /// A filesystem path to a JSON file in the same shape as `Custom`.
    Path(PathBuf),
}

impl Default for ModelSeed {
    fn default() -> Self {
        ModelSeed::Builtin
    }
}

/// One MCP server to bring up when the client is constructed.
#[derive(Debug, Clone)]
pub enum McpServerSpec {
    Http { name: String, url: String },
    Stdio { name: String, command: String, args: Vec<String> },
}

/// The validated, immutable configuration a `BridgeClient` is built from.
/// Every field is private; the only way to produce one is
/// [`BridgeClientConfig::from_value`], which validates and freezes it in
/// one step. There is deliberately no setter — a config caller wants to
/// change is a new config, not a mutation of a live client's.
#[derive(Debug, Clone)]
pub struct BridgeClientConfig {
    providers: Vec<(String, ProviderConfig)>,
    default_provider: String,
    timeout_ms: u64,
    tools_enabled: bool,
    model_seed: ModelSeed,
    mcp_servers: Vec<McpServerSpec>,
}

impl BridgeClientConfig {
    pub fn providers(&self) -> &[(String, ProviderConfig)] {
        &self.providers
    }

    pub fn provider_config(&self, key: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn tools_enabled(&self) -> bool {
        self.tools_enabled
    }

    pub fn model_seed(&self) -> &ModelSeed {
        &self.model_seed
    }

    pub fn mcp_servers(&self) -> &[McpServerSpec] {
        &self.mcp_servers
    }

    /// Parses and validates a raw JSON configuration blob into a frozen
    /// `BridgeClientConfig`. Shape:
    /// ```json
    /// {
    ///   "providers": { "openai": { "apiKey": "..." },
    ///                  "anthropic": { "work": { "apiKey": "..." }, "personal": { "apiKey": "..." } } },
    ///   "defaultProvider": "openai",
    ///   "timeoutMs": 30000,
    ///   "toolsEnabled": true,
    ///   "modelSeed": "builtin" | "none" | { "data": [...] } | { "path": "..." },
    ///   "mcpServers": [ { "name": "...", "url": "..." } ]
    /// }
    /// ```
    pub fn from_value(raw: &serde_json::Value) -> Result<Self, BridgeError> {
        let providers = flatten_providers(raw.get("providers"))?;
        if providers.is_empty() {
            return Err(BridgeError::new(ErrorKind::InvalidConfig, "'providers' must configure at least one provider"));
        }

        let default_provider = resolve_default_provider(raw.get("defaultProvider"), &providers)?;

        let timeout_ms = match raw.get("timeoutMs") {
            None => DEFAULT_TIMEOUT_MS,
            Some(v) => {
                let n = v
                    .as_u64()
                    .ok_or_else(|| BridgeError::new(ErrorKind::InvalidConfig, "'timeoutMs' must be a positive integer"))?;
                if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&n) {
                    return Err(BridgeError::new(
                        ErrorKind::InvalidConfig,
                        format!("'timeoutMs' must be between {} and {}", MIN_TIMEOUT_MS, MAX_TIMEOUT_MS),
                    ));
                }
                n
            }
        };

        let tools_enabled = raw.get("toolsEnabled").and_then(|v| v.as_bool()).unwrap_or(true);

        let model_seed = match raw.get("modelSeed") {
            None => ModelSeed::Builtin,
            Some(serde_json::Value::String(s)) if s == "builtin" => ModelSeed::Builtin,
            Some(serde_json::Value::String(s)) if s == "none" => ModelSeed::None,
            Some(serde_json::Value::String(other)) => {
                return Err(BridgeError::new(
                    ErrorKind::InvalidConfig,
                    format!("'modelSeed' string must be 'builtin' or 'none', got '{}'", other),
                ))
            }
            Some(obj) if obj.get("path").is_some() => {
                let path = obj.get("path").and_then(|v| v.as_str()).ok_or_else(|| {
                    BridgeError::new(ErrorKind::InvalidConfig, "'modelSeed.path' must be a string")
                })?;
                ModelSeed::Path(PathBuf::from(path))
            }
            Some(obj) if obj.get("data").is_some() => ModelSeed::Custom(obj.get("data").cloned().unwrap()),
            Some(_) => {
                return Err(BridgeError::new(
                    ErrorKind::InvalidConfig,
                    "'modelSeed' object must have a 'data' or 'path' field",
                ))
            }
        };

        let mcp_servers = match raw.get("mcpServers") {
            None => Vec::new(),
            Some(v) => parse_mcp_servers(v)?,
        };

        Ok(BridgeClientConfig {
            providers,
            default_provider,
            timeout_ms,
            tools_enabled,
            model_seed,
            mcp_servers,
        })
    }
}

/// `{type: {..opts}}` is a flat single config (key = `type`); `{type:
/// {name: {..opts}, name2: {..opts}}}` is a named-config map (keys =
/// `type.name`). Distinguished by whether the provider's value object looks
/// like a leaf provider config (carries an `apiKey`) or a map of named
/// sub-configs (every value is itself an object, none of them `apiKey`).
fn flatten_providers(value: Option<&serde_json::Value>) -> Result<Vec<(String, ProviderConfig)>, BridgeError> {
    let obj = match value {
        Some(serde_json::Value::Object(obj)) => obj,
        Some(_) => return Err(BridgeError::new(ErrorKind::InvalidConfig, "'providers' must be an object")),
        None => return Ok(Vec::new()),
    };

    let mut flattened = Vec::new();
    for (provider_type, entry) in obj.iter() {
        let entry_obj = entry
            .as_object()
            .ok_or_else(|| BridgeError::new(ErrorKind::InvalidConfig, format!("providers.{} must be an object", provider_type)))?;

        if entry_obj.contains_key("apiKey") {
            flattened.push((provider_type.clone(), to_provider_config(entry_obj)));
            continue;
        }

        if entry_obj.is_empty() {
            return Err(BridgeError::new(
                ErrorKind::InvalidConfig,
                format!("providers.{} has no named configurations", provider_type),
            ));
        }

        for (name, sub_entry) in entry_obj.iter() {
            let sub_obj = sub_entry.as_object().ok_or_else(|| {
                BridgeError::new(ErrorKind::InvalidConfig, format!("providers.{}.{} must be an object", provider_type, name))
            })?;
            flattened.push((format!("{}.{}", provider_type, name), to_provider_config(sub_obj)));
        }
    }
    Ok(flattened)
}

fn to_provider_config(obj: &serde_json::Map<String, serde_json::Value>) -> ProviderConfig {
    obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<HashMap<_, _>>()
}

/// Resolution precedence: exact flattened-key match, then a
/// single-config-per-type rewrite, then ambiguous/not-found errors, then
/// (when `default_provider` is absent entirely) the first configured key.
fn resolve_default_provider(
    requested: Option<&serde_json::Value>,
    providers: &[(String, ProviderConfig)],
) -> Result<String, BridgeError> {
    let requested = match requested {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(_) => return Err(BridgeError::new(ErrorKind::InvalidConfig, "'defaultProvider' must be a string")),
        None => return Ok(providers[0].0.clone()),
    };

    if providers.iter().any(|(k, _)| k == &requested) {
        return Ok(requested);
    }

    let matches_under_type: Vec<&str> = providers
        .iter()
        .filter(|(k, _)| k.starts_with(&format!("{}.", requested)))
        .map(|(k, _)| k.as_str())
        .collect();

    match matches_under_type.len() {
        0 => Err(BridgeError::new(
            ErrorKind::InvalidConfig,
            format!("'defaultProvider' '{}' does not match any configured provider", requested),
        )
        .with_context("defaultProvider", requested.clone())),
        1 => Ok(matches_under_type[0].to_string()),
        _ => Err(BridgeError::new(
            ErrorKind::InvalidConfig,
            format!("'defaultProvider' '{}' is ambiguous: multiple named configurations exist", requested),
        )
        .with_context("defaultProvider", requested.clone())),
    }
}

fn parse_mcp_servers(value: &serde_json::Value) -> Result<Vec<McpServerSpec>, BridgeError> {
    let array = value
        .as_array()
        .ok_or_else(|| BridgeError::new(ErrorKind::InvalidConfig, "'mcpServers' must be an array"))?;
    array
        .iter()
        .map(|entry| {
            let name = entry
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| BridgeError::new(ErrorKind::InvalidConfig, "each mcpServers entry needs a 'name'"))?
                .to_string();
            if let Some(url) = entry.get("url").and_then(|v| v.as_str()) {
                Ok(McpServerSpec::Http { name, url: url.to_string() })
            } else if let Some(command) = entry.get("command").and_then(|v| v.as_str()) {
                let args = entry
                    .get("args")
                    .and_then(|v| v.as_array())
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                Ok(McpServerSpec::Stdio { name, command: command.to_string(), args })
            } else {
                Err(BridgeError::new(ErrorKind::InvalidConfig, format!("mcpServers.{} needs a 'url' or 'command'", name)))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_provider_config_uses_the_bare_type_as_key() {
        let raw = serde_json::json!({ "providers": { "openai": { "apiKey": "sk-test" } } });
        let config = BridgeClientConfig::from_value(&raw).unwrap();
        assert_eq!(config.default_provider(), "openai");
        assert!(config.provider_config("openai").is_some());
    }

    #[test]
    fn nested_named_configs_flatten_to_type_dot_name() {
        let raw = serde_json::json!({
            "providers": { "anthropic": { "work": { "apiKey": "a" }, "personal": { "apiKey": "b" } } },
            "defaultProvider": "anthropic.work",
        });
        let config = BridgeClientConfig::from_value(&raw).unwrap();
        assert_eq!(config.default_provider(), "anthropic.work");
        assert!(config.provider_config("anthropic.personal").is_some());
    }

    #[test]
    fn default_provider_rewrites_to_the_sole_named_config() {
        let raw = serde_json::json!({
            "providers": { "anthropic": { "work": { "apiKey": "a" } } },
            "defaultProvider": "anthropic",
        });
        let config = BridgeClientConfig::from_value(&raw).unwrap();
        assert_eq!(config.default_provider(), "anthropic.work");
    }

    #[test]
    fn default_provider_ambiguous_across_multiple_named_configs_fails() {
        let raw = serde_json::json!({
            "providers": { "anthropic": { "work": { "apiKey": "a" }, "personal": { "apiKey": "b" } } },
            "defaultProvider": "anthropic",
        });
        let err = BridgeClientConfig::from_value(&raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn default_provider_not_found_fails() {
        let raw = serde_json::json!({
            "providers": { "openai": { "apiKey": "a" } },
            "defaultProvider": "gemini",
        });
        assert!(BridgeClientConfig::from_value(&raw).is_err());
    }

    #[test]
    fn missing_default_provider_falls_back_to_first_key() {
        let raw = serde_json::json!({ "providers": { "openai": { "apiKey": "a" } } });
        let config = BridgeClientConfig::from_value(&raw).unwrap();
        assert_eq!(config.default_provider(), "openai");
    }

    #[test]
    fn timeout_out_of_range_fails() {
        let raw = serde_json::json!({ "providers": { "openai": { "apiKey": "a" } }, "timeoutMs": 500 });
        assert!(BridgeClientConfig::from_value(&raw).is_err());
    }

    #[test]
    fn timeout_defaults_to_thirty_seconds() {
        let raw = serde_json::json!({ "providers": { "openai": { "apiKey": "a" } } });
        let config = BridgeClientConfig::from_value(&raw).unwrap();
        assert_eq!(config.timeout_ms(), 30_000);
    }

    #[test]
    fn empty_named_config_map_is_rejected() {
        let raw = serde_json::json!({ "providers": { "openai": {} } });
        assert!(BridgeClientConfig::from_value(&raw).is_err());
    }

    #[test]
    fn no_providers_at_all_is_rejected() {
        let raw = serde_json::json!({});
        assert!(BridgeClientConfig::from_value(&raw).is_err());
    }
}
