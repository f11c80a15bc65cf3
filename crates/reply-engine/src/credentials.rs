use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dashmap::DashMap;

/// Durable store of per-account access tokens, written by the provisioning
/// endpoint and read-only from the dispatch side. Backed by a JSON file that
/// is rewritten in full on every update; the map is small enough that an
/// incremental format is not worth it.
pub struct CredentialStore {
    tokens: DashMap<String, String>,
    path: PathBuf,
}

impl CredentialStore {
    /// Load the store from disk. A missing file starts empty; an unreadable
    /// one is logged and also starts empty rather than refusing to boot.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let tokens = DashMap::new();
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(map) => {
                    for (account_id, token) in map {
                        tokens.insert(account_id, token);
                    }
                    tracing::info!(count = tokens.len(), path = %path.display(), "account credentials loaded");
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "failed to parse credential file, starting empty");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no credential file yet, starting empty");
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to read credential file, starting empty");
            }
        }
        Self { tokens, path }
    }

    /// Access token for an account, if provisioned.
    pub fn get(&self, account_id: &str) -> Option<String> {
        self.tokens.get(account_id).map(|t| t.clone())
    }

    /// Insert or replace an account's token and persist the store.
    pub async fn set(&self, account_id: &str, access_token: &str) -> Result<()> {
        self.tokens
            .insert(account_id.to_string(), access_token.to_string());
        self.persist().await
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    async fn persist(&self) -> Result<()> {
        // BTreeMap for stable key order in the snapshot
        let map: BTreeMap<String, String> = self
            .tokens
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let bytes = serde_json::to_vec_pretty(&map)?;
        tokio::fs::write(&self.path, bytes)
            .await
            .with_context(|| format!("writing credential file {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("credentials-test-{}.json", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let store = CredentialStore::load(temp_path()).await;
        assert!(store.is_empty());
        assert!(store.get("acct").is_none());
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let path = temp_path();
        let store = CredentialStore::load(&path).await;
        store.set("acct-1", "token-abc").await.unwrap();
        assert_eq!(store.get("acct-1").as_deref(), Some("token-abc"));
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_round_trip_through_file() {
        let path = temp_path();
        {
            let store = CredentialStore::load(&path).await;
            store.set("acct-1", "token-abc").await.unwrap();
            store.set("acct-2", "token-def").await.unwrap();
        }
        let reloaded = CredentialStore::load(&path).await;
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("acct-2").as_deref(), Some("token-def"));
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let path = temp_path();
        let store = CredentialStore::load(&path).await;
        store.set("acct-1", "old").await.unwrap();
        store.set("acct-1", "new").await.unwrap();
        assert_eq!(store.get("acct-1").as_deref(), Some("new"));
        assert_eq!(store.len(), 1);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let path = temp_path();
        tokio::fs::write(&path, b"not json").await.unwrap();
        let store = CredentialStore::load(&path).await;
        assert!(store.is_empty());
        let _ = tokio::fs::remove_file(&path).await;
    }
}
