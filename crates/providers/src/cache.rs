//! Memoised classifier provider.
//!
//! The effective classifier settings are re-read on every call (static
//! config merged with the runtime KV), so the provider is cached on the
//! full settings triple and rebuilt lazily when any component changes.
//! The build runs outside the lock; only the assignment is the critical
//! section.

use std::sync::Arc;

use parking_lot::RwLock;

use rk_domain::error::Result;

use crate::client::NlpClient;

/// The triple that keys the memoised provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
}

/// Lazily rebuilt provider cache.
#[derive(Default)]
pub struct ProviderCache {
    inner: RwLock<Option<(ClassifierSettings, Arc<NlpClient>)>>,
}

impl ProviderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached client when the settings still match, otherwise
    /// build a fresh one and swap it in.
    pub fn get_or_build(&self, settings: &ClassifierSettings) -> Result<Arc<NlpClient>> {
        {
            let cached = self.inner.read();
            if let Some((key, client)) = cached.as_ref() {
                if key == settings {
                    return Ok(client.clone());
                }
            }
        }

        // Build outside the critical section; NlpClient::new is I/O-free.
        let client = Arc::new(NlpClient::new(settings.clone())?);
        let mut cached = self.inner.write();
        *cached = Some((settings.clone(), client.clone()));
        tracing::info!(
            endpoint = %settings.endpoint,
            model = %settings.model,
            "classifier provider (re)built"
        );
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(model: &str) -> ClassifierSettings {
        ClassifierSettings {
            endpoint: "http://localhost:11434/v1".into(),
            model: model.into(),
            api_key: String::new(),
        }
    }

    #[test]
    fn same_settings_reuse_the_client() {
        let cache = ProviderCache::new();
        let a = cache.get_or_build(&settings("llama3")).unwrap();
        let b = cache.get_or_build(&settings("llama3")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn changed_settings_rebuild() {
        let cache = ProviderCache::new();
        let a = cache.get_or_build(&settings("llama3")).unwrap();
        let b = cache.get_or_build(&settings("qwen2")).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.settings().model, "qwen2");

        // The new triple is now the cached one.
        let c = cache.get_or_build(&settings("qwen2")).unwrap();
        assert!(Arc::ptr_eq(&b, &c));
    }

    #[test]
    fn api_key_change_also_rebuilds() {
        let cache = ProviderCache::new();
        let a = cache.get_or_build(&settings("llama3")).unwrap();
        let mut with_key = settings("llama3");
        with_key.api_key = "sk-test".into();
        let b = cache.get_or_build(&with_key).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
