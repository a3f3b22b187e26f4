//! Server Configuration
//!
//! Everything is read from the environment (after `.env` is loaded).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use assistant_core::provider::{DEFAULT_FALLBACK_MODEL, DEFAULT_PRIMARY_MODEL, ModelConfig};
use assistant_core::{AccountType, SessionConfig};
use assistant_runtime::LlmConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Root for conversation files and the local cache
    pub data_dir: PathBuf,
    pub session: SessionConfig,
    pub llm: LlmConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ModelConfig::default();
        let models = ModelConfig {
            primary_model: lookup("ASSISTANT_PRIMARY_MODEL")
                .unwrap_or_else(|| DEFAULT_PRIMARY_MODEL.into()),
            fallback_model: lookup("ASSISTANT_FALLBACK_MODEL")
                .unwrap_or_else(|| DEFAULT_FALLBACK_MODEL.into()),
            temperature: parse_or(&lookup, "ASSISTANT_TEMPERATURE", defaults.temperature),
            max_tokens: parse_or(&lookup, "ASSISTANT_MAX_TOKENS", defaults.max_tokens),
        };
        let account_type = lookup("ACCOUNT_TYPE")
            .map(|a| AccountType::from_str_lossy(&a))
            .unwrap_or_default();

        let llm = LlmConfig::from_lookup(&lookup);

        Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            data_dir: lookup("ASSISTANT_DATA_DIR").map_or_else(|| PathBuf::from("./data"), PathBuf::from),
            session: SessionConfig::new(account_type, models),
            llm,
        }
    }

    /// Parsed bind address
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        self.bind_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid BIND_ADDR {:?}: {e}", self.bind_addr))
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparsable setting");
            default
        }),
        None => default,
    }
}
