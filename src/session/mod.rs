/// Broker token/session management: mint-once-per-day with filesystem reuse.
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::Session;

/// Guarantees at most one in-flight mint per (environment, app key) by
/// serialising callers through a single critical section: the first caller
/// to enter either reuses a cached token or mints; everyone else waits for
/// that result instead of minting independently.
pub struct SessionManager {
    cached: Mutex<Option<Session>>,
    file_path: PathBuf,
    safety_margin: chrono::Duration,
}

impl SessionManager {
    pub fn new(file_path: PathBuf, safety_margin_minutes: i64) -> Self {
        SessionManager {
            cached: Mutex::new(None),
            file_path,
            safety_margin: chrono::Duration::minutes(safety_margin_minutes),
        }
    }

    /// Returns a non-expired token, minting via `mint` only if neither the
    /// in-memory nor the on-disk cache holds a still-valid one.
    pub async fn acquire<F, Fut>(&self, mint: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Session>>,
    {
        let mut guard = self.cached.lock().await;

        if let Some(session) = guard.as_ref() {
            if !session.is_expired(self.safety_margin) {
                return Ok(session.token.clone());
            }
        }

        if guard.is_none() {
            if let Some(loaded) = self.load_from_file().await {
                if !loaded.is_expired(self.safety_margin) {
                    let token = loaded.token.clone();
                    *guard = Some(loaded);
                    return Ok(token);
                }
                debug!("discarding expired token file");
                let _ = tokio::fs::remove_file(&self.file_path).await;
            }
        }

        let session = mint().await?;
        self.save_to_file(&session).await?;
        let token = session.token.clone();
        *guard = Some(session);
        Ok(token)
    }

    pub async fn clear(&self) {
        *self.cached.lock().await = None;
        let _ = tokio::fs::remove_file(&self.file_path).await;
        warn!("session cleared");
    }

    async fn load_from_file(&self) -> Option<Session> {
        let content = tokio::fs::read_to_string(&self.file_path).await.ok()?;
        serde_json::from_str(&content).ok()
    }

    async fn save_to_file(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&self.file_path, json).await?;
        Ok(())
    }
}

/// Short hex digest of an app key, used to namespace the token cache file
/// without writing the key itself to disk.
pub fn hash_app_key(app_key: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    app_key.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn session(minutes_valid: i64) -> Session {
        let now = chrono::Utc::now();
        Session {
            token: "tok".to_string(),
            issued_at: now,
            expires_at: now + chrono::Duration::minutes(minutes_valid),
        }
    }

    #[tokio::test]
    async fn reuses_unexpired_session_without_minting() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path().join("token.json"), 5);
        let mint_calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = mint_calls.clone();
            let token = manager
                .acquire(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(session(60))
                })
                .await
                .unwrap();
            assert_eq!(token, "tok");
        }

        assert_eq!(mint_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reloads_from_file_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");

        {
            let manager = SessionManager::new(path.clone(), 5);
            manager.acquire(|| async { Ok(session(60)) }).await.unwrap();
        }

        let manager = SessionManager::new(path, 5);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        manager
            .acquire(|| async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(session(60))
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
