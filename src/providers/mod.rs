//! The capability contract between the dispatcher and network-specific
//! senders. The core never speaks a social network's wire protocol; it loads
//! the stored credentials, asks the provider to validate them, and hands over
//! text and attachment paths. Adapters are registered at bootstrap, the
//! registry itself starts empty.

pub mod credentials;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Named credential map loaded for one network and handed to its provider.
pub type TokenMap = BTreeMap<String, String>;

/// The fixed set of destination kinds. `Custom` covers self-hosted webhook
/// style targets with free-form credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Facebook,
    Instagram,
    Threads,
    Twitter,
    Bluesky,
    Mastodon,
    Custom,
}

impl NetworkKind {
    pub const ALL: [NetworkKind; 7] = [
        NetworkKind::Facebook,
        NetworkKind::Instagram,
        NetworkKind::Threads,
        NetworkKind::Twitter,
        NetworkKind::Bluesky,
        NetworkKind::Mastodon,
        NetworkKind::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NetworkKind::Facebook => "facebook",
            NetworkKind::Instagram => "instagram",
            NetworkKind::Threads => "threads",
            NetworkKind::Twitter => "twitter",
            NetworkKind::Bluesky => "bluesky",
            NetworkKind::Mastodon => "mastodon",
            NetworkKind::Custom => "custom",
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown network kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for NetworkKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NetworkKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Required credential names that are absent or empty in the token map.
    #[error("missing credentials: {}", .0.join(", "))]
    MissingTokens(Vec<String>),

    /// The provider answered with a hard error.
    #[error("{0}")]
    Failure(String),
}

/// One network adapter. Validation always precedes sending; the dispatcher
/// enforces the order.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Named credentials this provider needs before it can send.
    fn required_tokens(&self) -> &[&str];

    /// Check the token map against `required_tokens`, listing every required
    /// name that is missing or empty.
    fn validate_tokens(&self, tokens: &TokenMap) -> Result<(), ProviderError> {
        let missing: Vec<String> = self
            .required_tokens()
            .iter()
            .filter(|name| {
                tokens
                    .get(**name)
                    .map(|value| value.trim().is_empty())
                    .unwrap_or(true)
            })
            .map(|name| name.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ProviderError::MissingTokens(missing))
        }
    }

    /// Send one post. `Ok(None)` is a soft failure: the provider responded
    /// but produced no external id, and the caller may retry later.
    async fn send_post(
        &self,
        text: &str,
        attachments: &[PathBuf],
        tokens: &TokenMap,
    ) -> Result<Option<String>, ProviderError>;

    /// Point-in-time engagement metrics for an already-posted item, returned
    /// as the provider's JSON verbatim.
    async fn metrics(
        &self,
        external_post_id: &str,
        tokens: &TokenMap,
    ) -> Result<serde_json::Value, ProviderError>;
}

pub type DynProvider = Arc<dyn Provider>;

/// Maps network kinds to their adapters. Built once at bootstrap and shared
/// read-only behind an `Arc` afterwards.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<NetworkKind, DynProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: NetworkKind, provider: DynProvider) {
        self.providers.insert(kind, provider);
    }

    pub fn get(&self, kind: NetworkKind) -> Option<DynProvider> {
        self.providers.get(&kind).cloned()
    }

    pub fn supported_kinds(&self) -> Vec<NetworkKind> {
        let mut kinds: Vec<NetworkKind> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl Provider for FixedProvider {
        fn required_tokens(&self) -> &[&str] {
            &["base_url", "access_token"]
        }

        async fn send_post(
            &self,
            _text: &str,
            _attachments: &[PathBuf],
            _tokens: &TokenMap,
        ) -> Result<Option<String>, ProviderError> {
            Ok(Some("ext-1".to_string()))
        }

        async fn metrics(
            &self,
            _external_post_id: &str,
            _tokens: &TokenMap,
        ) -> Result<serde_json::Value, ProviderError> {
            Ok(serde_json::json!({ "likes": 0 }))
        }
    }

    #[test]
    fn kind_strings_round_trip() {
        for kind in NetworkKind::ALL {
            assert_eq!(kind.as_str().parse::<NetworkKind>().unwrap(), kind);
        }
        assert!("friendster".parse::<NetworkKind>().is_err());
    }

    #[test]
    fn validate_tokens_flags_missing_and_empty() {
        let provider = FixedProvider;

        let mut tokens = TokenMap::new();
        tokens.insert("base_url".into(), "https://fosstodon.org".into());
        tokens.insert("access_token".into(), "   ".into());

        let err = provider.validate_tokens(&tokens).unwrap_err();
        match err {
            ProviderError::MissingTokens(missing) => {
                assert_eq!(missing, vec!["access_token".to_string()]);
            }
            other => panic!("expected missing tokens, got {:?}", other),
        }

        tokens.insert("access_token".into(), "tok".into());
        provider.validate_tokens(&tokens).unwrap();
    }

    #[test]
    fn registry_starts_empty_and_registers() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get(NetworkKind::Mastodon).is_none());

        registry.register(NetworkKind::Mastodon, Arc::new(FixedProvider));
        assert!(registry.get(NetworkKind::Mastodon).is_some());
        assert!(registry.get(NetworkKind::Bluesky).is_none());
        assert_eq!(registry.supported_kinds(), vec![NetworkKind::Mastodon]);
    }
}
