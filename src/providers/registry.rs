//! Service registry mapping names to provider factories.
//!
//! The registry is built once at startup; there is no global mutable state.
//! Lookups are case-insensitive and aliases may point at the same factory.

use std::collections::BTreeMap;

use super::guerrillamail::GuerrillaMailProvider;
use super::mailtm::MailTmProvider;
use super::tempmail_plus::TempMailPlusProvider;
use super::traits::{MailProvider, ProviderError, Result};

/// Constructor for a fresh, unconnected provider instance.
pub type ProviderFactory = fn() -> Box<dyn MailProvider>;

struct RegistryEntry {
    canonical: &'static str,
    description: &'static str,
    factory: ProviderFactory,
}

/// Name-to-factory table for the supported mail services.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registry preloaded with every built-in provider.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(|| Box::new(MailTmProvider::new()));
        registry.register(|| Box::new(GuerrillaMailProvider::new()));
        registry.register(|| Box::new(TempMailPlusProvider::new()));
        registry.register_alias("tempmail", || Box::new(TempMailPlusProvider::new()));
        registry
    }

    /// Registers a factory under the provider's canonical service name.
    pub fn register(&mut self, factory: ProviderFactory) {
        // One probe instance fixes the canonical name and description.
        let probe = factory();
        self.entries.insert(
            probe.service_name().to_lowercase(),
            RegistryEntry {
                canonical: probe.service_name(),
                description: probe.description(),
                factory,
            },
        );
    }

    /// Registers a factory under an additional alias.
    pub fn register_alias(&mut self, alias: &str, factory: ProviderFactory) {
        let probe = factory();
        self.entries.insert(
            alias.to_lowercase(),
            RegistryEntry {
                canonical: probe.service_name(),
                description: probe.description(),
                factory,
            },
        );
    }

    /// Instantiates a fresh provider for `service`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownService`] for unregistered names.
    pub fn create(&self, service: &str) -> Result<Box<dyn MailProvider>> {
        self.entries
            .get(&service.to_lowercase())
            .map(|entry| (entry.factory)())
            .ok_or_else(|| ProviderError::UnknownService(service.to_string()))
    }

    pub fn contains(&self, service: &str) -> bool {
        self.entries.contains_key(&service.to_lowercase())
    }

    /// Lists `(canonical name, description)` pairs, one per provider, sorted
    /// by name.
    pub fn list(&self) -> Vec<(&'static str, &'static str)> {
        let mut services: Vec<_> = self
            .entries
            .values()
            .map(|entry| (entry.canonical, entry.description))
            .collect();
        services.sort();
        services.dedup();
        services
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtin_lists_each_service_once() {
        let registry = ProviderRegistry::builtin();
        let names: Vec<_> = registry.list().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["guerrillamail", "mailtm", "tempmail.plus"]);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = ProviderRegistry::builtin();
        assert!(registry.contains("MailTM"));
        let provider = registry.create("MailTM").unwrap();
        assert_eq!(provider.service_name(), "mailtm");
    }

    #[test]
    fn alias_resolves_to_canonical_provider() {
        let registry = ProviderRegistry::builtin();
        let provider = registry.create("tempmail").unwrap();
        assert_eq!(provider.service_name(), "tempmail.plus");
    }

    #[test]
    fn unknown_service_is_an_error() {
        let registry = ProviderRegistry::builtin();
        let err = registry.create("doesnotexist").unwrap_err();
        assert!(matches!(err, ProviderError::UnknownService(_)));
        assert!(err.to_string().contains("doesnotexist"));
    }

    #[test]
    fn create_returns_fresh_instances() {
        let registry = ProviderRegistry::builtin();
        let a = registry.create("mailtm").unwrap();
        let b = registry.create("mailtm").unwrap();
        // Two distinct boxes; provider state is never shared.
        let a_addr = Box::into_raw(a) as *const () as usize;
        let b_addr = Box::into_raw(b) as *const () as usize;
        assert_ne!(a_addr, b_addr);
    }
}
