use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::claude::{ClaudeConfig, CLAUDE_MODEL};
use crate::providers::configs::{AnthropicProviderConfig, ANTHROPIC_HOST, ANTHROPIC_VERSION};

pub const ENV_PREFIX: &str = "CLAUDE_FC";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: set {env_var}")]
    MissingEnvVar { env_var: String },

    #[error(transparent)]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets a dotted settings key, e.g. `provider.api_key`
pub fn to_env_var(field: &str) -> String {
    format!("{}_{}", ENV_PREFIX, field.replace('.', "__")).to_uppercase()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub provider: AnthropicProviderConfig,
    #[serde(default)]
    pub claude: ClaudeConfig,
}

impl Settings {
    /// Defaults overridden by `CLAUDE_FC_*` environment variables
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Defaults, then the TOML file, then `CLAUDE_FC_*` environment variables
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load(Some(path.as_ref()))
    }

    fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Provider defaults
            .set_default("provider.host", ANTHROPIC_HOST)?
            .set_default("provider.api_key", "")?
            .set_default("provider.version", ANTHROPIC_VERSION)?
            .set_default("provider.timeout_secs", 600)?
            // Model defaults
            .set_default("claude.model", CLAUDE_MODEL)?
            .set_default("claude.max_tokens", 1024)?
            .set_default("claude.run_tools", true)?
            .set_default("claude.show_tool_calls", false)?
            .set_default("claude.max_rounds", 10)?;

        if let Some(path) = path {
            tracing::debug!("Loading settings from {}", path.display());
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("claude.stop_sequences"),
            )
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(settings) if settings.provider.api_key.trim().is_empty() => {
                Err(ConfigError::MissingEnvVar {
                    env_var: to_env_var("provider.api_key"),
                })
            }
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if let Some(field) = missing_field(&error_str) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

/// Dotted key from a message like "missing field `api_key` for key `provider`"
fn missing_field(message: &str) -> Option<String> {
    let rest = message.strip_prefix("missing field `")?;
    let (field, rest) = rest.split_once('`')?;
    match rest
        .strip_prefix(" for key `")
        .and_then(|parent| parent.split_once('`'))
    {
        Some((parent, _)) => Some(format!("{parent}.{field}")),
        None => Some(field.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("CLAUDE_FC_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();
        env::set_var("CLAUDE_FC_PROVIDER__API_KEY", "test-key");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.provider.host, "https://api.anthropic.com");
        assert_eq!(settings.provider.api_key, "test-key");
        assert_eq!(settings.provider.version, "2023-06-01");
        assert_eq!(settings.provider.timeout_secs, 600);
        assert_eq!(settings.claude, ClaudeConfig::default());

        env::remove_var("CLAUDE_FC_PROVIDER__API_KEY");
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clean_env();
        env::set_var("CLAUDE_FC_PROVIDER__API_KEY", "test-key");
        env::set_var("CLAUDE_FC_PROVIDER__HOST", "http://localhost:8080");
        env::set_var("CLAUDE_FC_CLAUDE__MODEL", "claude-3-haiku-20240307");
        env::set_var("CLAUDE_FC_CLAUDE__TEMPERATURE", "0.7");
        env::set_var("CLAUDE_FC_CLAUDE__MAX_ROUNDS", "3");
        env::set_var("CLAUDE_FC_CLAUDE__SHOW_TOOL_CALLS", "true");
        env::set_var("CLAUDE_FC_CLAUDE__STOP_SEQUENCES", "STOP,END");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.provider.host, "http://localhost:8080");
        assert_eq!(settings.claude.model, "claude-3-haiku-20240307");
        assert_eq!(settings.claude.temperature, Some(0.7));
        assert_eq!(settings.claude.max_rounds, 3);
        assert!(settings.claude.show_tool_calls);
        assert!(settings.claude.run_tools);
        assert_eq!(settings.claude.stop_sequences, vec!["STOP", "END"]);

        clean_env();
    }

    #[test]
    #[serial]
    fn test_missing_api_key() {
        clean_env();

        match Settings::new() {
            Err(ConfigError::MissingEnvVar { env_var }) => {
                assert_eq!(env_var, "CLAUDE_FC_PROVIDER__API_KEY");
            }
            other => panic!("Expected MissingEnvVar error, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_file_then_env() {
        clean_env();
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("claude-fc.toml");
        fs::write(
            &path,
            r#"
[provider]
api_key = "file-key"
timeout_secs = 30

[claude]
model = "claude-3-sonnet-20240229"
max_tokens = 2048
run_tools = false
"#,
        )
        .unwrap();
        env::set_var("CLAUDE_FC_CLAUDE__MAX_TOKENS", "512");

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.provider.api_key, "file-key");
        assert_eq!(settings.provider.timeout_secs, 30);
        assert_eq!(settings.provider.host, "https://api.anthropic.com");
        assert_eq!(settings.claude.model, "claude-3-sonnet-20240229");
        assert_eq!(settings.claude.max_tokens, 512);
        assert!(!settings.claude.run_tools);

        clean_env();
        temp_dir.close().unwrap();
    }

    #[test]
    #[serial]
    fn test_missing_file_is_an_error() {
        clean_env();
        env::set_var("CLAUDE_FC_PROVIDER__API_KEY", "test-key");
        let result = Settings::from_file("does-not-exist.toml");
        assert!(matches!(result, Err(ConfigError::Other(_))));
        clean_env();
    }

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("provider.api_key"), "CLAUDE_FC_PROVIDER__API_KEY");
        assert_eq!(to_env_var("api_key"), "CLAUDE_FC_API_KEY");
    }

    #[test]
    fn test_missing_field_message() {
        assert_eq!(
            missing_field("missing field `api_key` for key `provider`").as_deref(),
            Some("provider.api_key")
        );
        assert_eq!(missing_field("missing field `provider`").as_deref(), Some("provider"));
        assert_eq!(missing_field("invalid type"), None);
    }
}
