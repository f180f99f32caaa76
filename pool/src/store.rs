//! Persistence port for account records.
//!
//! The pool is the single writer; the store only needs load/save of the
//! whole record set. The JSON file layout (`{"accounts": [...]}`) matches
//! what the login tooling writes.

use std::future::Future;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::account::Account;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read account store: {0}")]
    Io(#[from] std::io::Error),
    #[error("account store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Document store the pool persists through. Implementations must be safe
/// to call from concurrent tasks; the pool serializes calls itself.
pub trait AccountStore: Send + Sync + 'static {
    fn load(&self) -> impl Future<Output = Result<Vec<Account>, StoreError>> + Send;
    fn save(&self, accounts: &[Account]) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct AccountsDocument {
    #[serde(default)]
    accounts: Vec<Account>,
}

/// Accounts file on disk. Writes go through a sibling temp file and a
/// rename, so a crash mid-write never corrupts the store.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl AccountStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<Account>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };
        let document: AccountsDocument = serde_json::from_slice(&bytes)?;
        Ok(document.accounts)
    }

    async fn save(&self, accounts: &[Account]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let document = AccountsDocument {
            accounts: accounts.to_vec(),
        };
        let body = serde_json::to_vec_pretty(&document)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: std::sync::Mutex<Vec<Account>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            accounts: std::sync::Mutex::new(accounts),
        }
    }
}

impl AccountStore for MemoryStore {
    async fn load(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.accounts.lock().expect("store lock").clone())
    }

    async fn save(&self, accounts: &[Account]) -> Result<(), StoreError> {
        *self.accounts.lock().expect("store lock") = accounts.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::TokenBundle;
    use chrono::{Duration, Utc};

    fn account(email: &str) -> Account {
        Account::new(
            email,
            TokenBundle {
                access_token: "at".into(),
                refresh_token: "rt".into(),
                expires_at: Utc::now() + Duration::hours(1),
            },
        )
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("accounts.json"));

        let accounts = vec![account("a@example.com"), account("b@example.com")];
        store.save(&accounts).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, accounts);
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nope.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error_not_a_wipe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.load().await,
            Err(StoreError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let store = JsonFileStore::new(&path);
        store.save(&[account("a@example.com")]).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
