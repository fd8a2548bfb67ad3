//! The signed-in account, kept next to the guest cart between runs.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use duka_cart::{GuestStorage, StorageError};
use duka_core::AccountId;

const SESSION_KEY: &str = "session";

/// Persisted session, stored under the `session` key.
#[derive(Debug, Clone)]
pub struct SessionFile {
    storage: Arc<dyn GuestStorage>,
    writer: Uuid,
}

impl SessionFile {
    #[must_use]
    pub const fn new(storage: Arc<dyn GuestStorage>, writer: Uuid) -> Self {
        Self { storage, writer }
    }

    /// The stored account. An unreadable session counts as signed out.
    #[must_use]
    pub fn load(&self) -> Option<AccountId> {
        let raw = match self.storage.read(SESSION_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Failed to read session");
                return None;
            }
        };
        let value: Value = serde_json::from_str(&raw).ok()?;
        value
            .get("account")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|account| !account.is_empty())
            .map(AccountId::new)
    }

    /// Remember `account` as signed in.
    ///
    /// # Errors
    ///
    /// Returns an error if the session can't be written.
    pub fn save(&self, account: &AccountId) -> Result<(), StorageError> {
        let body = json!({ "account": account.as_str() }).to_string();
        self.storage.write(SESSION_KEY, &body, self.writer)
    }

    /// Forget the signed-in account.
    ///
    /// # Errors
    ///
    /// Returns an error if the session can't be removed.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(SESSION_KEY, self.writer)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use duka_cart::MemoryStorage;

    use super::*;

    fn session() -> (Arc<MemoryStorage>, SessionFile) {
        let storage = Arc::new(MemoryStorage::new());
        let file = SessionFile::new(storage.clone(), Uuid::new_v4());
        (storage, file)
    }

    #[test]
    fn test_save_load_clear() {
        let (_, file) = session();
        assert_eq!(file.load(), None);

        file.save(&AccountId::new("acct-1")).unwrap();
        assert_eq!(file.load(), Some(AccountId::new("acct-1")));

        file.clear().unwrap();
        assert_eq!(file.load(), None);
    }

    #[test]
    fn test_garbage_session_is_signed_out() {
        let (storage, file) = session();
        storage.write(SESSION_KEY, "not json", Uuid::new_v4()).unwrap();
        assert_eq!(file.load(), None);

        storage
            .write(SESSION_KEY, r#"{"account": "  "}"#, Uuid::new_v4())
            .unwrap();
        assert_eq!(file.load(), None);
    }
}
