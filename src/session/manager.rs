//! C4 — the in-memory session manager (spec.md §4.4).
//!
//! Grounded on the teacher's `agents::lifecycle::AgentRegistry` for the
//! shape of an in-memory `RwLock<HashMap<Id, Record>>` registry with a
//! reaper sweep, and on the teacher's old DB-backed `SessionManager`
//! (`mod.rs`, now replaced) for the `create`/`get`/`close`/`list` surface.
//! Unlike either teacher source, this manager holds no database handle and
//! no broadcaster — state lives only as long as the process does, per
//! spec.md's non-goal on durable persistence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{Session, SessionConfig, SessionInfo, SessionStatus};
use crate::error::{Result, SupervisorError};

#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Maximum number of concurrently tracked sessions. Enforced both
    /// before and after spawn, under the same lock, so two racing
    /// `create` calls cannot both observe room and both proceed past
    /// the cap (spec.md §4.4 invariant).
    pub max_sessions: usize,
    /// A session idle (no activity) longer than this is closed by the
    /// reaper sweep. `None` disables idle reaping.
    pub idle_ttl: Option<Duration>,
    pub reap_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 32,
            idle_ttl: Some(Duration::from_secs(30 * 60)),
            reap_interval: Duration::from_secs(60),
        }
    }
}

/// Owns every live `Session` this process created. Cheap to clone (an
/// `Arc` wrapper internally); clones share the same registry.
pub struct SessionManager {
    config: ManagerConfig,
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    closed: AtomicBool,
}

impl SessionManager {
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            closed: AtomicBool::new(false),
        });
        manager.clone().spawn_reaper();
        manager
    }

    fn spawn_reaper(self: Arc<Self>) {
        let Some(ttl) = self.config.idle_ttl else {
            return;
        };
        let interval = self.config.reap_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.reap_idle(ttl).await;
            }
        });
    }

    async fn reap_idle(&self, ttl: Duration) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let stale: Vec<Arc<Session>> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| {
                    let info_age = now.saturating_sub(s.shared.last_activity.load(
                        std::sync::atomic::Ordering::Relaxed,
                    ));
                    info_age as u64 > ttl.as_secs()
                })
                .cloned()
                .collect()
        };
        for session in stale {
            warn!(session = %session.id(), "reaping idle session");
            let _ = session.close().await;
            self.sessions.write().await.remove(session.id());
        }
    }

    /// Spawn a new session under `id`. Fails with `NotActive` if the
    /// manager is already at `max_sessions` capacity — checked once before
    /// the (possibly slow) spawn, and once more after acquiring the write
    /// lock, so a racing pair of `create` calls cannot both slip past a
    /// capacity check performed only up front.
    pub async fn create(&self, id: impl Into<String>, config: SessionConfig) -> Result<Arc<Session>> {
        let id = id.into();
        if self.closed.load(Ordering::Acquire) {
            return Err(SupervisorError::not_active("session manager is closed"));
        }
        if self.sessions.read().await.len() >= self.config.max_sessions {
            return Err(SupervisorError::not_active("session manager at capacity"));
        }

        let session = Session::spawn(id.clone(), config).await?;

        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.config.max_sessions {
            drop(sessions);
            let _ = session.close().await;
            return Err(SupervisorError::not_active("session manager at capacity"));
        }
        sessions.insert(id.clone(), session.clone());
        drop(sessions);

        self.spawn_removal_watcher(id);
        Ok(session)
    }

    /// Remove a session from the registry once its supervising task
    /// signals done, regardless of whether the caller ever called `close`
    /// explicitly (e.g. the child crashed on its own).
    fn spawn_removal_watcher(&self, id: String) {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let session = {
                let guard = sessions.read().await;
                guard.get(&id).cloned()
            };
            if let Some(session) = session {
                session.wait().await;
                sessions.write().await.remove(&id);
                info!(session = %id, "removed from session manager");
            }
        });
    }

    /// Returns the session only when its status is `Active`; a stale entry
    /// (`Closing`/`Closed`/`Error`, still present only until the removal
    /// watcher catches up) is treated as absent for this lookup.
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.read().await.get(id).cloned()?;
        if session.status().await == SessionStatus::Active {
            Some(session)
        } else {
            None
        }
    }

    /// Resume a session under `id`: if one is already tracked and `Active`,
    /// return it unchanged; otherwise spawn a fresh one from `config`, which
    /// the caller builds with a resume option prepended to its own options
    /// (spec.md §4.4 `Resume`).
    pub async fn resume(&self, id: impl Into<String>, config: SessionConfig) -> Result<Arc<Session>> {
        let id = id.into();
        if let Some(session) = self.get(&id).await {
            return Ok(session);
        }
        self.create(id, config).await
    }

    pub async fn close(&self, id: &str) -> Result<()> {
        let session = self
            .get(id)
            .await
            .ok_or_else(|| SupervisorError::not_active(format!("no session {id}")))?;
        session.close().await
    }

    /// Idempotent: marks the manager closed (so subsequent `create` calls
    /// are rejected), then closes every currently-tracked session,
    /// returning the last non-`Ok` result observed, if any.
    pub async fn close_all(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut last_err = None;
        for session in sessions {
            if let Err(e) = session.close().await {
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(sessions.len());
        for s in sessions {
            infos.push(s.info().await);
        }
        infos
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_config(script: &str) -> SessionConfig {
        SessionConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..Default::default()
        }
    }

    async fn wait_until_active(session: &Session) {
        for _ in 0..200 {
            if session.status().await == SessionStatus::Active {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session never became active");
    }

    #[tokio::test]
    async fn create_get_and_close_round_trip() {
        let manager = SessionManager::new(ManagerConfig {
            idle_ttl: None,
            ..Default::default()
        });
        let session = manager
            .create("s1", sh_config("sleep 5"))
            .await
            .expect("create");
        wait_until_active(&session).await;
        assert!(manager.get("s1").await.is_some());
        manager.close("s1").await.expect("close");
        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn get_treats_a_stale_session_as_absent() {
        let manager = SessionManager::new(ManagerConfig {
            idle_ttl: None,
            ..Default::default()
        });
        let session = manager.create("s1", sh_config("true")).await.expect("create");
        session.wait().await;
        // The removal watcher hasn't necessarily run yet, but `get` must
        // already refuse to hand back a non-Active entry.
        assert!(manager.get("s1").await.is_none());
        let _ = session;
    }

    #[tokio::test]
    async fn resume_returns_existing_active_session_without_respawning() {
        let manager = SessionManager::new(ManagerConfig {
            idle_ttl: None,
            ..Default::default()
        });
        let first = manager.create("s1", sh_config("sleep 5")).await.expect("create");
        wait_until_active(&first).await;

        let resumed = manager.resume("s1", sh_config("sleep 5")).await.expect("resume");
        assert!(Arc::ptr_eq(&first, &resumed));
        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn resume_spawns_a_new_session_when_none_is_active() {
        let manager = SessionManager::new(ManagerConfig {
            idle_ttl: None,
            ..Default::default()
        });
        let session = manager.resume("s1", sh_config("sleep 5")).await.expect("resume");
        wait_until_active(&session).await;
        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let manager = SessionManager::new(ManagerConfig {
            max_sessions: 1,
            idle_ttl: None,
            ..Default::default()
        });
        manager
            .create("a", sh_config("sleep 5"))
            .await
            .expect("first session fits");
        let err = manager
            .create("b", sh_config("sleep 5"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotActive);
    }

    #[tokio::test]
    async fn close_all_rejects_further_creates() {
        let manager = SessionManager::new(ManagerConfig {
            idle_ttl: None,
            ..Default::default()
        });
        manager.create("a", sh_config("sleep 5")).await.expect("create");
        manager.close_all().await.expect("close_all");
        assert_eq!(manager.count().await, 1);

        let err = manager.create("b", sh_config("true")).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotActive);

        // Idempotent: a second call is a no-op, not an error.
        manager.close_all().await.expect("second close_all is a no-op");
    }

    #[tokio::test]
    async fn exited_session_is_removed_from_registry() {
        let manager = SessionManager::new(ManagerConfig {
            idle_ttl: None,
            ..Default::default()
        });
        let session = manager.create("c", sh_config("true")).await.unwrap();
        session.wait().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.count().await, 0);
    }
}
