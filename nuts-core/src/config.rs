//! Configuration management
//!
//! Settings live in `settings.json` inside the data directory:
//! ```json
//! {
//!   "userId": "6f1c...",
//!   "providers": {
//!     "enabled": ["teller", "mono"],
//!     "teller": { "environment": "sandbox", "baseUrl": "https://api.teller.io" },
//!     "mono": { "secretKey": "live_sk_..." }
//!   },
//!   "sync": { "workers": 3, "incrementalCount": 100 }
//! }
//! ```
//! Keys this crate does not manage are preserved on save.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<Uuid>,
    #[serde(default)]
    providers: ProvidersConfig,
    #[serde(default)]
    sync: SyncConfig,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Which providers are enabled and how to reach them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersConfig {
    #[serde(default = "default_enabled")]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub teller: TellerConfig,
    #[serde(default)]
    pub mono: MonoConfig,
}

fn default_enabled() -> Vec<String> {
    vec!["simplefin".to_string(), "demo".to_string()]
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            teller: TellerConfig::default(),
            mono: MonoConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TellerConfig {
    /// `sandbox`, `development` or `production`; only sandbox runs without a client certificate
    #[serde(default = "default_teller_environment")]
    pub environment: String,
    #[serde(default = "default_teller_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

fn default_teller_environment() -> String {
    "sandbox".to_string()
}

fn default_teller_base_url() -> String {
    "https://api.teller.io".to_string()
}

impl Default for TellerConfig {
    fn default() -> Self {
        Self {
            environment: default_teller_environment(),
            base_url: default_teller_base_url(),
            cert_path: None,
            key_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonoConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default = "default_mono_base_url")]
    pub base_url: String,
}

fn default_mono_base_url() -> String {
    "https://api.withmono.com/v2".to_string()
}

impl Default for MonoConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            base_url: default_mono_base_url(),
        }
    }
}

/// Sync worker pool and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Transactions requested per account on an incremental sync
    #[serde(default = "default_incremental_count")]
    pub incremental_count: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_workers() -> usize {
    3
}

fn default_incremental_count() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            incremental_count: default_incremental_count(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

/// Nuts configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub user_id: Uuid,
    pub providers: ProvidersConfig,
    pub sync: SyncConfig,
    /// Passphrase for the credential cipher; environment only, never saved
    pub encryption_key: Option<String>,
    // Keep the raw settings for preservation when saving
    _raw_settings: SettingsFile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_id: Uuid::new_v4(),
            providers: ProvidersConfig::default(),
            sync: SyncConfig::default(),
            encryption_key: None,
            _raw_settings: SettingsFile::default(),
        }
    }
}

impl Config {
    /// Load config from the data directory, applying environment overrides:
    ///
    /// - `NUTS_PROVIDERS`: comma-separated enabled provider list
    /// - `NUTS_MONO_SECRET_KEY`: Mono secret key
    /// - `NUTS_TELLER_ENV`: Teller environment
    /// - `NUTS_ENCRYPTION_KEY`: credential cipher passphrase
    ///
    /// A user id is generated and saved on first load.
    pub fn load(nuts_dir: &Path) -> Result<Self> {
        Self::load_with_env(nuts_dir, |key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] with an injectable environment lookup
    pub fn load_with_env(nuts_dir: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let settings_path = nuts_dir.join("settings.json");

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content)?
        } else {
            SettingsFile::default()
        };

        let mut providers = raw.providers.clone();
        if let Some(list) = env("NUTS_PROVIDERS") {
            providers.enabled = list
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(key) = env("NUTS_MONO_SECRET_KEY").filter(|k| !k.is_empty()) {
            providers.mono.secret_key = Some(key);
        }
        if let Some(environment) = env("NUTS_TELLER_ENV").filter(|e| !e.is_empty()) {
            providers.teller.environment = environment;
        }

        let user_id = raw.user_id;
        let mut config = Self {
            user_id: user_id.unwrap_or_else(Uuid::new_v4),
            providers,
            sync: raw.sync.clone(),
            encryption_key: env("NUTS_ENCRYPTION_KEY").filter(|k| !k.is_empty()),
            _raw_settings: raw,
        };

        if user_id.is_none() {
            config.save(nuts_dir)?;
        }

        Ok(config)
    }

    /// Save config to the data directory
    ///
    /// Only the user id is written back. Provider settings stay as the user
    /// wrote them so environment overrides never leak into the file.
    pub fn save(&mut self, nuts_dir: &Path) -> Result<()> {
        let settings_path = nuts_dir.join("settings.json");

        // Load existing settings to preserve fields we don't manage
        let mut settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<SettingsFile>(&content)?
        } else {
            self._raw_settings.clone()
        };

        settings.user_id = Some(self.user_id);

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        self._raw_settings = settings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_settings_file() {
        let dir = tempdir().unwrap();
        let config = Config::load_with_env(dir.path(), no_env).unwrap();

        assert_eq!(config.providers.enabled, vec!["simplefin", "demo"]);
        assert_eq!(config.sync.workers, 3);
        assert_eq!(config.sync.incremental_count, 100);
        assert_eq!(config.providers.teller.environment, "sandbox");
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn test_user_id_is_generated_once() {
        let dir = tempdir().unwrap();
        let first = Config::load_with_env(dir.path(), no_env).unwrap();
        let second = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(first.user_id, second.user_id);
    }

    #[test]
    fn test_unknown_keys_survive_save() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"theme": "dark", "providers": {"enabled": ["mono"], "mono": {"secretKey": "sk"}}}"#,
        )
        .unwrap();

        let config = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(config.providers.enabled, vec!["mono"]);
        assert_eq!(config.providers.mono.secret_key.as_deref(), Some("sk"));

        let content = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["theme"], "dark");
        assert!(value["userId"].is_string());
    }

    #[test]
    fn test_environment_overrides() {
        let dir = tempdir().unwrap();
        let env = |key: &str| match key {
            "NUTS_PROVIDERS" => Some("Teller, mono".to_string()),
            "NUTS_MONO_SECRET_KEY" => Some("from-env".to_string()),
            "NUTS_ENCRYPTION_KEY" => Some("passphrase".to_string()),
            _ => None,
        };
        let config = Config::load_with_env(dir.path(), env).unwrap();

        assert_eq!(config.providers.enabled, vec!["teller", "mono"]);
        assert_eq!(config.providers.mono.secret_key.as_deref(), Some("from-env"));
        assert_eq!(config.encryption_key.as_deref(), Some("passphrase"));

        let content = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
        assert!(!content.contains("from-env"));
    }
}
