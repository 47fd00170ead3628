use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use crate::quest::{DispatchSettings, QuestConfig, QuestSettings};

/// Required; the app refuses to start without it.
pub const CLIENT_ID_VAR: &str = "QUEST_CLIENT_ID";
pub const PRIVATE_KEY_VAR: &str = "QUEST_PRIVATE_KEY";
pub const RPC_URL_VAR: &str = "QUEST_RPC_URL";
pub const WS_URL_VAR: &str = "QUEST_WS_URL";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub progress: ProgressSettings,
    #[serde(default)]
    pub quests: Vec<QuestConfig>,
    /// Filled from the environment, never from the file.
    #[serde(skip)]
    pub credentials: Credentials,
}

#[derive(Debug, Default)]
pub struct Credentials {
    pub client_id: String,
    pub private_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct General {
    pub log_level: String,
}

impl Default for General {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub chain_id: u64,
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            ws_url: None,
            chain_id: 1,
            confirmation_timeout_secs: 120,
            poll_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub stale_time_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { stale_time_secs: 30 }
    }
}

impl CacheSettings {
    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(self.stale_time_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ProgressSettings {
    pub base_percentage: f64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            base_percentage: 10.0,
        }
    }
}

impl Config {
    /// Load `path`, then overlay the environment (`.env` included).
    pub fn load(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read config {}", path))?;
        Self::from_parts(&contents, |name| std::env::var(name).ok())
    }

    /// Parse file contents and apply environment values from `env`.
    pub fn from_parts(contents: &str, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;

        let client_id = env(CLIENT_ID_VAR)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("{} must be set", CLIENT_ID_VAR))?;
        config.credentials = Credentials {
            client_id,
            private_key: env(PRIVATE_KEY_VAR).filter(|v| !v.trim().is_empty()),
        };
        if let Some(url) = env(RPC_URL_VAR) {
            config.network.rpc_url = url;
        }
        if let Some(url) = env(WS_URL_VAR) {
            config.network.ws_url = Some(url);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let base = self.progress.base_percentage;
        if !(0.0..=100.0).contains(&base) {
            bail!("progress.base_percentage must be within 0..=100, got {}", base);
        }

        let mut ids = HashSet::new();
        for quest in &self.quests {
            if !ids.insert(quest.id.as_str()) {
                bail!("duplicate quest id {}", quest.id);
            }
            let mut names = HashSet::new();
            for criterion in &quest.criteria {
                if !names.insert(criterion.name.as_str()) {
                    bail!("quest {}: duplicate criterion {}", quest.id, criterion.name);
                }
            }
        }
        Ok(())
    }

    pub fn quest_settings(&self) -> QuestSettings {
        QuestSettings {
            base_percentage: self.progress.base_percentage,
            dispatch: self.dispatch,
        }
    }
}
