use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use scout_core::orchestrator::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use scout_core::{OrchestratorConfig, DEFAULT_MAX_ITERATIONS};
use scout_tools::ToolsConfig;

const ENV_PREFIX: &str = "SCOUT_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub orchestrator: OrchestratorSection,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Only "anthropic" is supported.
    pub provider: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            api_key: None,
            base_url: None,
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_iterations: usize,
    pub enable_streaming: bool,
    /// Wall-clock limit for one research run. Unset or 0 means no limit.
    pub timeout_secs: Option<u64>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            enable_streaming: false,
            timeout_secs: None,
        }
    }
}

impl Config {
    /// Load defaults, then the config file, then `SCOUT_` environment variables.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::config_path().ok(),
        };

        let mut figment = Self::base_figment();
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config = Self::from_figment(figment)?;
        config.apply_fallbacks(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("scout").join("config.toml"))
    }

    fn base_figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        figment.extract().context("Failed to load configuration")
    }

    /// Fill unset credentials from the providers' conventional variables.
    fn apply_fallbacks(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fill(&mut self.llm.api_key, lookup("ANTHROPIC_API_KEY"));
        fill(&mut self.tools.perplexity_api_key, lookup("PERPLEXITY_API_KEY"));
        fill(&mut self.tools.apify_token, lookup("APIFY_TOKEN"));
    }

    fn validate(&self) -> Result<()> {
        if self.llm.provider != "anthropic" {
            anyhow::bail!(
                "Unsupported llm.provider '{}' (supported: anthropic)",
                self.llm.provider
            );
        }
        if self.orchestrator.max_iterations == 0 {
            anyhow::bail!("orchestrator.max_iterations must be at least 1");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.orchestrator
            .timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::new()
            .with_max_tokens(self.llm.max_tokens)
            .with_temperature(self.llm.temperature)
            .with_max_iterations(self.orchestrator.max_iterations)
            .with_streaming(self.orchestrator.enable_streaming);
        if let Some(model) = &self.llm.model {
            config = config.with_model(model.clone());
        }
        if let Some(timeout) = self.timeout() {
            config = config.with_timeout(timeout);
        }
        config
    }

    /// The merged configuration as TOML, with credentials masked.
    pub fn to_masked_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        for secret in [
            &mut shown.llm.api_key,
            &mut shown.tools.perplexity_api_key,
            &mut shown.tools.apify_token,
        ] {
            if let Some(value) = secret.as_mut() {
                *value = mask(value);
            }
        }
        toml::to_string_pretty(&shown).context("Failed to serialize configuration")
    }
}

fn fill(slot: &mut Option<String>, fallback: Option<String>) {
    let unset = slot.as_deref().map_or(true, |s| s.trim().is_empty());
    if unset {
        if let Some(value) = fallback.filter(|v| !v.trim().is_empty()) {
            *slot = Some(value);
        }
    }
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        Config::from_figment(Config::base_figment().merge(Toml::string(toml))).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.orchestrator.max_iterations, 10);
        assert!(!config.orchestrator.enable_streaming);
        assert!(config.timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let config = parse(
            r#"
            [llm]
            api_key = "sk-ant-test"
            model = "claude-haiku"
            temperature = 0.1

            [orchestrator]
            max_iterations = 6
            enable_streaming = true
            timeout_secs = 120

            [tools]
            apify_token = "apify_api_abc"
            check_reachability = true
            "#,
        );

        assert_eq!(config.llm.api_key.as_deref(), Some("sk-ant-test"));
        assert_eq!(config.llm.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.orchestrator.max_iterations, 6);
        assert_eq!(config.timeout(), Some(Duration::from_secs(120)));
        assert!(config.tools.check_reachability);
        assert_eq!(config.tools.http_timeout_secs, 30);

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.model.as_deref(), Some("claude-haiku"));
        assert_eq!(orchestrator.max_iterations, 6);
        assert!(orchestrator.enable_streaming);
        assert_eq!(orchestrator.timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_zero_timeout_means_unlimited() {
        let config = parse("[orchestrator]\ntimeout_secs = 0\n");
        assert!(config.timeout().is_none());
        assert!(config.orchestrator_config().timeout.is_none());
    }

    #[test]
    fn test_fallbacks_only_fill_gaps() {
        let mut config = parse("[llm]\napi_key = \"from-file\"\n");
        config.apply_fallbacks(|key| match key {
            "ANTHROPIC_API_KEY" => Some("from-env".to_string()),
            "APIFY_TOKEN" => Some("apify-env".to_string()),
            "PERPLEXITY_API_KEY" => Some("  ".to_string()),
            _ => None,
        });

        assert_eq!(config.llm.api_key.as_deref(), Some("from-file"));
        assert_eq!(config.tools.apify_token.as_deref(), Some("apify-env"));
        assert!(config.tools.perplexity_api_key.is_none());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let config = parse("[llm]\nprovider = \"ollama\"\n");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ollama"));
    }

    #[test]
    fn test_masked_toml() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-ant-api03-secret".to_string());
        config.tools.apify_token = Some("short".to_string());

        let rendered = config.to_masked_toml().unwrap();
        assert!(rendered.contains("sk-a****"));
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("short"));
        assert!(rendered.contains("[orchestrator]"));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scout.toml");
        std::fs::write(&path, "[orchestrator]\nmax_iterations = 3\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.orchestrator.max_iterations, 3);

        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
