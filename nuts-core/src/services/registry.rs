//! Provider registry
//!
//! Built once at startup from the enabled provider list and read-only after
//! that, so sync workers share it without locking.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::demo::DemoProvider;
use crate::adapters::mono::MonoProvider;
use crate::adapters::simplefin::SimpleFINProvider;
use crate::adapters::teller::TellerProvider;
use crate::config::ProvidersConfig;
use crate::domain::result::{Error, Result};
use crate::ports::BankDataProvider;

type ProviderFactory = fn(&ProvidersConfig) -> Result<Arc<dyn BankDataProvider>>;

/// Every provider this build knows how to construct
const FACTORIES: &[(&str, ProviderFactory)] = &[
    ("teller", teller),
    ("mono", mono),
    ("simplefin", simplefin),
    ("demo", demo),
];

fn teller(config: &ProvidersConfig) -> Result<Arc<dyn BankDataProvider>> {
    Ok(Arc::new(TellerProvider::new(&config.teller)?))
}

fn mono(config: &ProvidersConfig) -> Result<Arc<dyn BankDataProvider>> {
    Ok(Arc::new(MonoProvider::new(&config.mono)?))
}

fn simplefin(_: &ProvidersConfig) -> Result<Arc<dyn BankDataProvider>> {
    Ok(Arc::new(SimpleFINProvider::new()))
}

fn demo(_: &ProvidersConfig) -> Result<Arc<dyn BankDataProvider>> {
    Ok(Arc::new(DemoProvider::new()))
}

/// Names accepted in `providers.enabled`
pub fn known_providers() -> impl Iterator<Item = &'static str> {
    FACTORIES.iter().map(|(name, _)| *name)
}

/// Name to adapter lookup
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn BankDataProvider>>,
}

impl ProviderRegistry {
    /// Construct every enabled provider
    ///
    /// An unknown name or a provider missing its configuration fails here,
    /// never later inside a sync job.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        if config.enabled.is_empty() {
            tracing::warn!("no providers enabled; linking and syncing will fail");
        }

        let mut providers = HashMap::new();
        for name in &config.enabled {
            let name = name.trim().to_lowercase();
            let factory = FACTORIES
                .iter()
                .find(|(known, _)| *known == name)
                .map(|(_, factory)| factory)
                .ok_or_else(|| {
                    Error::config(format!(
                        "unknown provider '{}' (known: {})",
                        name,
                        known_providers().collect::<Vec<_>>().join(", ")
                    ))
                })?;
            let provider = factory(config)?;
            tracing::debug!(provider = %name, "provider registered");
            providers.insert(name, provider);
        }
        Ok(Self { providers })
    }

    /// Registry over explicit adapter instances
    pub fn from_providers(providers: Vec<Arc<dyn BankDataProvider>>) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.name().to_string(), p))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn BankDataProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::config(format!("provider '{}' is not enabled", name)))
    }

    /// Enabled provider names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonoConfig;

    fn config(enabled: &[&str]) -> ProvidersConfig {
        ProvidersConfig {
            enabled: enabled.iter().map(|s| s.to_string()).collect(),
            ..ProvidersConfig::default()
        }
    }

    #[test]
    fn test_default_providers_build() {
        let registry = ProviderRegistry::from_config(&ProvidersConfig::default()).unwrap();
        assert_eq!(registry.names(), vec!["demo", "simplefin"]);
        assert_eq!(registry.get("demo").unwrap().name(), "demo");
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let result = ProviderRegistry::from_config(&config(&["plaid"]));
        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("plaid")),
            _ => panic!("expected config error"),
        }
    }

    #[test]
    fn test_provider_missing_config_fails_at_startup() {
        assert!(matches!(
            ProviderRegistry::from_config(&config(&["mono"])),
            Err(Error::Config(_))
        ));

        let mut with_key = config(&["Mono"]);
        with_key.mono = MonoConfig {
            secret_key: Some("sk".to_string()),
            ..MonoConfig::default()
        };
        let registry = ProviderRegistry::from_config(&with_key).unwrap();
        assert!(registry.get("mono").is_ok());
    }

    #[test]
    fn test_lookup_of_disabled_provider() {
        let registry = ProviderRegistry::from_config(&config(&["demo"])).unwrap();
        assert!(matches!(registry.get("teller"), Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_list_is_allowed() {
        let registry = ProviderRegistry::from_config(&config(&[])).unwrap();
        assert!(registry.names().is_empty());
    }
}
