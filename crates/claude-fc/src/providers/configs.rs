use serde::Deserialize;

pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnthropicProviderConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub api_key: String,
    /// Value of the `anthropic-version` header
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl AnthropicProviderConfig {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            host: default_host(),
            api_key: api_key.into(),
            version: default_version(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }
}

fn default_host() -> String {
    ANTHROPIC_HOST.to_string()
}

fn default_version() -> String {
    ANTHROPIC_VERSION.to_string()
}

fn default_timeout_secs() -> u64 {
    600
}
