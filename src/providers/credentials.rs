//! Typed credential submission, one variant per network kind. The stored
//! names match what the kind's provider asks for at send time, so a payload
//! that validates here will pass `validate_tokens` later, assuming the values
//! themselves are good.

use std::collections::BTreeMap;

use serde::Deserialize;
use url::Url;

use super::NetworkKind;
use crate::error::{AppError, AppResult};

/// Tagged credential payload, e.g. `{"kind": "mastodon", "base_url": ...,
/// "access_token": ...}`. Fixed kinds replace a network's stored set
/// wholesale; `custom` merges by name.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CredentialPayload {
    Facebook {
        page_id: String,
        access_token: String,
    },
    Instagram {
        account_id: String,
        access_token: String,
    },
    Threads {
        account_id: String,
        access_token: String,
    },
    Twitter {
        api_key: String,
        api_secret: String,
        access_token: String,
        access_token_secret: String,
    },
    Bluesky {
        identifier: String,
        app_password: String,
    },
    Mastodon {
        base_url: String,
        access_token: String,
    },
    Custom {
        endpoint: Option<String>,
        #[serde(default)]
        tokens: BTreeMap<String, String>,
    },
}

impl CredentialPayload {
    pub fn kind(&self) -> NetworkKind {
        match self {
            CredentialPayload::Facebook { .. } => NetworkKind::Facebook,
            CredentialPayload::Instagram { .. } => NetworkKind::Instagram,
            CredentialPayload::Threads { .. } => NetworkKind::Threads,
            CredentialPayload::Twitter { .. } => NetworkKind::Twitter,
            CredentialPayload::Bluesky { .. } => NetworkKind::Bluesky,
            CredentialPayload::Mastodon { .. } => NetworkKind::Mastodon,
            CredentialPayload::Custom { .. } => NetworkKind::Custom,
        }
    }

    /// Whether storing this payload replaces the network's whole credential
    /// set. The custom kind instead merges entry by entry.
    pub fn replaces_existing(&self) -> bool {
        !matches!(self, CredentialPayload::Custom { .. })
    }

    /// Reject blank required fields, naming every one that is missing, and
    /// malformed URLs where a variant carries one.
    pub fn validate(&self) -> AppResult<()> {
        let mut missing = Vec::new();
        let mut require = |name: &str, value: &str| {
            if value.trim().is_empty() {
                missing.push(name.to_string());
            }
        };

        match self {
            CredentialPayload::Facebook {
                page_id,
                access_token,
            } => {
                require("page_id", page_id);
                require("access_token", access_token);
            }
            CredentialPayload::Instagram {
                account_id,
                access_token,
            }
            | CredentialPayload::Threads {
                account_id,
                access_token,
            } => {
                require("account_id", account_id);
                require("access_token", access_token);
            }
            CredentialPayload::Twitter {
                api_key,
                api_secret,
                access_token,
                access_token_secret,
            } => {
                require("api_key", api_key);
                require("api_secret", api_secret);
                require("access_token", access_token);
                require("access_token_secret", access_token_secret);
            }
            CredentialPayload::Bluesky {
                identifier,
                app_password,
            } => {
                require("identifier", identifier);
                require("app_password", app_password);
            }
            CredentialPayload::Mastodon {
                base_url,
                access_token,
            } => {
                require("base_url", base_url);
                require("access_token", access_token);
                if !base_url.trim().is_empty() && Url::parse(base_url).is_err() {
                    return Err(AppError::BadRequest(format!(
                        "base_url is not a valid URL: {base_url}"
                    )));
                }
            }
            CredentialPayload::Custom { endpoint, tokens } => {
                if let Some(endpoint) = endpoint {
                    if Url::parse(endpoint).is_err() {
                        return Err(AppError::BadRequest(format!(
                            "endpoint is not a valid URL: {endpoint}"
                        )));
                    }
                }
                for (name, value) in tokens {
                    if name.trim().is_empty() {
                        return Err(AppError::BadRequest(
                            "credential names cannot be empty".into(),
                        ));
                    }
                    require(name, value);
                }
                if endpoint.is_none() && tokens.is_empty() {
                    return Err(AppError::BadRequest(
                        "custom credentials need an endpoint or at least one token".into(),
                    ));
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::ProviderRejected {
                kind: self.kind().as_str().to_string(),
                missing,
            })
        }
    }

    /// Flatten to (name, value) rows for the credential store.
    pub fn entries(&self) -> Vec<(String, String)> {
        let pairs: Vec<(&str, &str)> = match self {
            CredentialPayload::Facebook {
                page_id,
                access_token,
            } => vec![("page_id", page_id), ("access_token", access_token)],
            CredentialPayload::Instagram {
                account_id,
                access_token,
            }
            | CredentialPayload::Threads {
                account_id,
                access_token,
            } => vec![("account_id", account_id), ("access_token", access_token)],
            CredentialPayload::Twitter {
                api_key,
                api_secret,
                access_token,
                access_token_secret,
            } => vec![
                ("api_key", api_key),
                ("api_secret", api_secret),
                ("access_token", access_token),
                ("access_token_secret", access_token_secret),
            ],
            CredentialPayload::Bluesky {
                identifier,
                app_password,
            } => vec![("identifier", identifier), ("app_password", app_password)],
            CredentialPayload::Mastodon {
                base_url,
                access_token,
            } => vec![("base_url", base_url), ("access_token", access_token)],
            CredentialPayload::Custom { endpoint, tokens } => {
                let mut pairs: Vec<(&str, &str)> = tokens
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str()))
                    .collect();
                if let Some(endpoint) = endpoint {
                    pairs.push(("endpoint", endpoint));
                }
                pairs
            }
        };
        pairs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }
}
