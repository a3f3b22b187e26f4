//! Session Configuration
//!
//! Everything the engine needs to know about the user's session, passed in
//! explicitly at construction: the broker account in use, the models to call
//! and the persisted preference flags.

use serde::{Deserialize, Serialize};

use crate::provider::ModelConfig;
use crate::store::LocalCache;

/// Local cache key for the control-mode flag
pub const CONTROL_MODE_KEY: &str = "assistant.control_mode";
/// Local cache key for the auto-refresh flag
pub const AUTO_REFRESH_KEY: &str = "assistant.auto_refresh";

/// Kind of broker account the session trades on
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Demo,
    Live,
}

impl AccountType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Demo => "Demo",
            Self::Live => "Live",
        }
    }

    /// Parse "demo"/"live"; anything else is treated as demo
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "live" | "real" => Self::Live,
            _ => Self::Demo,
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Process-wide flags that outlive any one conversation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Allow the assistant to propose executable trades
    pub control_mode: bool,
    /// Keep the market snapshot refreshing in the background
    pub auto_refresh: bool,
}

impl Preferences {
    /// Read flags from the local cache; missing or unreadable entries are off
    pub async fn load(cache: &dyn LocalCache) -> Self {
        Self {
            control_mode: read_flag(cache, CONTROL_MODE_KEY).await,
            auto_refresh: read_flag(cache, AUTO_REFRESH_KEY).await,
        }
    }

    /// Mirror flags into the local cache
    pub async fn save(&self, cache: &dyn LocalCache) -> crate::Result<()> {
        cache.set(CONTROL_MODE_KEY, &self.control_mode.to_string()).await?;
        cache.set(AUTO_REFRESH_KEY, &self.auto_refresh.to_string()).await?;
        Ok(())
    }
}

async fn read_flag(cache: &dyn LocalCache, key: &str) -> bool {
    match cache.get(key).await {
        Ok(Some(value)) => value == "true",
        Ok(None) => false,
        Err(e) => {
            tracing::warn!(key, error = %e, "Failed to read preference");
            false
        }
    }
}

/// Explicit session context injected into the engine
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Account of the connected broker
    pub account_type: AccountType,

    /// Models used for completions
    #[serde(default)]
    pub models: ModelConfig,
}

impl SessionConfig {
    pub fn new(account_type: AccountType, models: ModelConfig) -> Self {
        Self {
            account_type,
            models,
        }
    }
}
