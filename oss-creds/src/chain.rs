use std::sync::Arc;

use crate::{Credentials, CredentialsProvider, StaticProvider};

/// Ordered list of credential providers.
///
/// `resolve` returns the first usable snapshot; when no provider yields one
/// the request goes out anonymously with an empty snapshot.
#[derive(Default)]
pub struct CredentialsChain {
    providers: Vec<Box<dyn CredentialsProvider>>,
}

impl CredentialsChain {
    pub fn new() -> Self {
        CredentialsChain::default()
    }

    /// Chain with a single in-memory provider holding the given keys.
    pub fn from_static(access_key: &str, secret_key: &str, security_token: Option<&str>) -> Self {
        CredentialsChain::new().with_provider(StaticProvider::new(
            access_key,
            secret_key,
            security_token,
        ))
    }

    pub fn with_provider<P: CredentialsProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn push<P: CredentialsProvider + 'static>(&mut self, provider: P) {
        self.providers.push(Box::new(provider));
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn resolve(&self) -> Arc<Credentials> {
        for (idx, provider) in self.providers.iter().enumerate() {
            match provider.credentials() {
                Ok(credentials) if credentials.is_usable() => return credentials,
                Ok(_) => log::trace!("Credentials provider #{} returned empty keys", idx),
                Err(e) => log::debug!("Credentials provider #{} failed: {}", idx, e),
            }
        }
        Arc::new(Credentials::anonymous())
    }

    /// Hand new keys to the first provider that accepts a refresh. Returns
    /// `false` when none of them does.
    pub fn refresh(&self, access_key: &str, secret_key: &str, security_token: Option<&str>) -> bool {
        let refreshed = self
            .providers
            .iter()
            .any(|provider| provider.refresh(access_key, secret_key, security_token));
        if !refreshed {
            log::warn!("No refreshable credentials provider in chain");
        }
        refreshed
    }
}
