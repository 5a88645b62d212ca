//! Credential storage for OAuth tokens
//!
//! The store maps `environment -> key -> CredentialRecord` and is persisted
//! wholesale through a [`StorageBackend`]. Every mutation is a locked
//! read-modify-write: the in-process mutex serializes writers sharing one
//! store, the backend lock serializes writers in other processes, and the
//! map is re-read under both so no concurrent update is lost.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backend::{FileBackend, MemoryBackend, StorageBackend};
use crate::environment::Environment;
use crate::error::{Error, Result};

/// One token grant for one (environment, key) pair.
///
/// `expires_at` is an absolute unix timestamp in seconds, computed when the
/// grant is stored from the endpoint's `expires_in` delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub secret: Secret<String>,
    pub redirect_uri: String,
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub expires_at: u64,
}

impl CredentialRecord {
    /// Reject records with any empty field.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.secret.is_blank() {
            missing.push("secret");
        }
        if self.redirect_uri.trim().is_empty() {
            missing.push("redirect_uri");
        }
        if self.access_token.is_blank() {
            missing.push("access_token");
        }
        if self.refresh_token.is_blank() {
            missing.push("refresh_token");
        }
        if self.expires_at == 0 {
            missing.push("expires_at");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::IncompleteRecord(format!(
                "missing {}",
                missing.join(", ")
            )))
        }
    }
}

/// Full persisted mapping, ordered so iteration is deterministic.
pub type CredentialMap = BTreeMap<String, BTreeMap<String, CredentialRecord>>;

/// Fields rewritten by a refresh-token grant.
#[derive(Debug, Clone)]
pub struct TokenUpdate {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub expires_at: u64,
}

/// Credential store over an injectable backend.
pub struct CredentialStore {
    backend: Arc<dyn StorageBackend>,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    /// Open the file-backed store at `path`, creating it if absent.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let backend = FileBackend::create(path).await?;
        info!(path = %backend.path().display(), "opened credential store");
        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// Open the store at the per-user default location.
    pub async fn open_default() -> Result<Self> {
        Self::open(FileBackend::default_path()?).await
    }

    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    /// Where the store lives, for logs.
    pub fn location(&self) -> String {
        self.backend.describe()
    }

    /// Read the full mapping. Empty storage is an empty store.
    pub async fn load(&self) -> Result<CredentialMap> {
        let bytes = self.backend.read().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(CredentialMap::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            Error::StoreCorrupt(format!("parsing {}: {e}", self.backend.describe()))
        })
    }

    pub async fn get(&self, environment: &Environment, key: &str) -> Result<Option<CredentialRecord>> {
        let map = self.load().await?;
        Ok(map
            .get(environment.as_str())
            .and_then(|keys| keys.get(key))
            .cloned())
    }

    /// Insert or replace the record for `(environment, key)`.
    ///
    /// The record is validated before any I/O, so a rejected upsert leaves
    /// the store untouched.
    pub async fn upsert(
        &self,
        environment: &Environment,
        key: &str,
        record: CredentialRecord,
    ) -> Result<()> {
        record.validate()?;
        self.modify(|map| {
            let entry = map
                .entry(environment.as_str().to_owned())
                .or_default()
                .entry(key.to_owned());
            match entry {
                std::collections::btree_map::Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    existing.secret = record.secret;
                    existing.redirect_uri = record.redirect_uri;
                    existing.access_token = record.access_token;
                    existing.refresh_token = record.refresh_token;
                    existing.expires_at = record.expires_at;
                }
                std::collections::btree_map::Entry::Vacant(slot) => {
                    slot.insert(record);
                }
            }
            Ok(())
        })
        .await?;
        debug!(environment = %environment, key, "upserted credential");
        Ok(())
    }

    /// Rewrite the token fields of an existing record after a refresh.
    ///
    /// `secret` and `redirect_uri` are left as stored. Updating an absent
    /// record would persist a partial one, so it is rejected.
    pub async fn update_tokens(
        &self,
        environment: &Environment,
        key: &str,
        update: TokenUpdate,
    ) -> Result<()> {
        if update.access_token.is_blank() || update.refresh_token.is_blank() || update.expires_at == 0 {
            return Err(Error::IncompleteRecord(
                "token update requires access_token, refresh_token and expires_at".into(),
            ));
        }
        self.modify(|map| {
            let existing = map
                .get_mut(environment.as_str())
                .and_then(|keys| keys.get_mut(key))
                .ok_or_else(|| {
                    Error::IncompleteRecord(format!(
                        "no stored record for {key} in {environment} to update"
                    ))
                })?;
            existing.access_token = update.access_token;
            existing.refresh_token = update.refresh_token;
            existing.expires_at = update.expires_at;
            existing.validate()
        })
        .await?;
        debug!(environment = %environment, key, "updated tokens");
        Ok(())
    }

    /// Persist tokens rotated by a refresh.
    ///
    /// An existing entry only has its token fields rewritten. An entry removed
    /// since the session loaded it is recreated from `record`, so the rotated
    /// refresh token is never lost.
    pub async fn save_rotated(
        &self,
        environment: &Environment,
        key: &str,
        record: CredentialRecord,
    ) -> Result<()> {
        record.validate()?;
        let mut recreated = false;
        self.modify(|map| {
            let keys = map.entry(environment.as_str().to_owned()).or_default();
            match keys.get_mut(key) {
                Some(existing) => {
                    existing.access_token = record.access_token;
                    existing.refresh_token = record.refresh_token;
                    existing.expires_at = record.expires_at;
                    existing.validate()
                }
                None => {
                    keys.insert(key.to_owned(), record);
                    recreated = true;
                    Ok(())
                }
            }
        })
        .await?;
        if recreated {
            info!(environment = %environment, key, "recreated removed credential with rotated tokens");
        } else {
            debug!(environment = %environment, key, "saved rotated tokens");
        }
        Ok(())
    }

    /// Remove a record, pruning its environment when it becomes empty.
    pub async fn remove(&self, environment: &Environment, key: &str) -> Result<Option<CredentialRecord>> {
        let mut removed = None;
        self.modify(|map| {
            if let Some(keys) = map.get_mut(environment.as_str()) {
                removed = keys.remove(key);
                if keys.is_empty() {
                    map.remove(environment.as_str());
                }
            }
            Ok(())
        })
        .await?;
        if removed.is_some() {
            debug!(environment = %environment, key, "removed credential");
        }
        Ok(removed)
    }

    /// Locked load-modify-store. Nothing is written if `apply` fails.
    async fn modify<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut CredentialMap) -> Result<()>,
    {
        let _process_guard = self.write_lock.lock().await;
        let _backend_guard = self.backend.lock().await?;

        let mut map = self.load().await?;
        apply(&mut map)?;

        let json = serde_json::to_vec_pretty(&map)
            .map_err(|e| Error::Io(format!("serializing credentials: {e}")))?;
        self.backend.write(&json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(suffix: &str) -> CredentialRecord {
        CredentialRecord {
            secret: Secret::from(format!("secret_{suffix}")),
            redirect_uri: format!("https://app.example.com/{suffix}"),
            access_token: Secret::from(format!("at_{suffix}")),
            refresh_token: Secret::from(format!("rt_{suffix}")),
            expires_at: 1_735_500_000,
        }
    }

    fn qa4() -> Environment {
        Environment::from("qa4")
    }

    #[tokio::test]
    async fn save_rotated_keeps_app_fields_of_existing_entry() {
        let store = CredentialStore::in_memory();
        store.upsert(&qa4(), "k1", record("1")).await.unwrap();

        let mut rotated = record("2");
        rotated.expires_at = 1_735_600_000;
        store.save_rotated(&qa4(), "k1", rotated).await.unwrap();

        let saved = store.get(&qa4(), "k1").await.unwrap().unwrap();
        assert_eq!(saved.access_token.expose(), "at_2");
        assert_eq!(saved.refresh_token.expose(), "rt_2");
        assert_eq!(saved.expires_at, 1_735_600_000);
        assert_eq!(saved.secret.expose(), "secret_1");
        assert_eq!(saved.redirect_uri, "https://app.example.com/1");
    }

    #[tokio::test]
    async fn save_rotated_recreates_removed_entry() {
        let store = CredentialStore::in_memory();
        store.upsert(&qa4(), "k1", record("1")).await.unwrap();
        store.remove(&qa4(), "k1").await.unwrap();

        store.save_rotated(&qa4(), "k1", record("2")).await.unwrap();

        assert_eq!(store.get(&qa4(), "k1").await.unwrap(), Some(record("2")));
    }

    #[tokio::test]
    async fn roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::open(path.clone()).await.unwrap();
        store.upsert(&qa4(), "k1", record("1")).await.unwrap();

        let reopened = CredentialStore::open(path).await.unwrap();
        let map = reopened.load().await.unwrap();
        assert_eq!(map["qa4"]["k1"], record("1"));
    }

    #[tokio::test]
    async fn zero_length_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, b"").unwrap();

        let store = CredentialStore::open(path).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn garbage_file_is_corrupt() {
        let backend = Arc::new(MemoryBackend::with_contents(&b"\x80\x04not json"[..]));
        let store = CredentialStore::with_backend(backend);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::StoreCorrupt(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn wrong_shape_is_corrupt() {
        let backend = Arc::new(MemoryBackend::with_contents(&br#"{"prod": ["a", "b"]}"#[..]));
        let store = CredentialStore::with_backend(backend);
        assert!(matches!(store.load().await, Err(Error::StoreCorrupt(_))));
    }

    #[tokio::test]
    async fn incomplete_record_is_rejected_without_write() {
        let backend = Arc::new(MemoryBackend::new());
        let store = CredentialStore::with_backend(backend.clone());
        store.upsert(&qa4(), "k1", record("1")).await.unwrap();
        let before = backend.contents();

        for broken in [
            CredentialRecord { secret: Secret::from(""), ..record("2") },
            CredentialRecord { redirect_uri: String::new(), ..record("2") },
            CredentialRecord { access_token: Secret::from(""), ..record("2") },
            CredentialRecord { refresh_token: Secret::from(" "), ..record("2") },
            CredentialRecord { expires_at: 0, ..record("2") },
        ] {
            let err = store.upsert(&qa4(), "k1", broken).await.unwrap_err();
            assert!(matches!(err, Error::IncompleteRecord(_)), "got: {err:?}");
        }

        assert_eq!(backend.contents(), before, "rejected upserts must not write");
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_entry() {
        let store = CredentialStore::in_memory();
        store.upsert(&qa4(), "k1", record("old")).await.unwrap();
        store.upsert(&qa4(), "k1", record("new")).await.unwrap();

        let stored = store.get(&qa4(), "k1").await.unwrap().unwrap();
        assert_eq!(stored, record("new"));
    }

    #[tokio::test]
    async fn keys_are_case_sensitive() {
        let store = CredentialStore::in_memory();
        store.upsert(&qa4(), "Key", record("upper")).await.unwrap();
        assert!(store.get(&qa4(), "key").await.unwrap().is_none());
        assert!(store.get(&qa4(), "Key").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_tokens_leaves_secret_and_redirect() {
        let store = CredentialStore::in_memory();
        store.upsert(&qa4(), "k1", record("1")).await.unwrap();

        store
            .update_tokens(
                &qa4(),
                "k1",
                TokenUpdate {
                    access_token: Secret::from("at_new"),
                    refresh_token: Secret::from("rt_new"),
                    expires_at: 1_900_000_000,
                },
            )
            .await
            .unwrap();

        let stored = store.get(&qa4(), "k1").await.unwrap().unwrap();
        assert_eq!(stored.access_token.expose(), "at_new");
        assert_eq!(stored.refresh_token.expose(), "rt_new");
        assert_eq!(stored.expires_at, 1_900_000_000);
        assert_eq!(stored.secret, record("1").secret);
        assert_eq!(stored.redirect_uri, record("1").redirect_uri);
    }

    #[tokio::test]
    async fn update_tokens_for_missing_record_errors() {
        let store = CredentialStore::in_memory();
        let result = store
            .update_tokens(
                &qa4(),
                "nobody",
                TokenUpdate {
                    access_token: Secret::from("at"),
                    refresh_token: Secret::from("rt"),
                    expires_at: 1,
                },
            )
            .await;
        assert!(matches!(result, Err(Error::IncompleteRecord(_))));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_prunes_empty_environment() {
        let store = CredentialStore::in_memory();
        store.upsert(&qa4(), "k1", record("1")).await.unwrap();

        let removed = store.remove(&qa4(), "k1").await.unwrap();
        assert_eq!(removed, Some(record("1")));
        assert!(store.load().await.unwrap().is_empty());

        assert!(store.remove(&qa4(), "k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_upserts_of_different_keys_all_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = Arc::new(CredentialStore::open(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert(&Environment::from("qa4"), &format!("k{i}"), record(&i.to_string()))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.load().await.unwrap()["qa4"].len(), 10);
    }

    #[tokio::test]
    async fn separate_store_handles_on_one_file_do_not_lose_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let mut handles = vec![];
        for i in 0..6 {
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                let store = CredentialStore::open(path).await.unwrap();
                store
                    .upsert(&Environment::production(), &format!("app-{i}"), record(&i.to_string()))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let store = CredentialStore::open(path).await.unwrap();
        assert_eq!(store.load().await.unwrap()["prod"].len(), 6);
    }

    #[test]
    fn record_debug_is_redacted() {
        let debug = format!("{:?}", record("1"));
        assert!(!debug.contains("at_1"), "got: {debug}");
        assert!(!debug.contains("secret_1"), "got: {debug}");
    }
}
