//! Per-user browser sessions.
//!
//! Each user id maps to a slot guarded by its own async mutex. Whoever holds
//! the slot's [`SessionGuard`] is the only party allowed to open, drive or
//! close that user's browser, so two concurrent invocations for one user
//! queue up instead of both believing they own the page.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use uuid::Uuid;

use super::{BrowserPage, BrowserPool, BrowserResult, LeasedPage, LIVENESS_PROBE};
use crate::utils::logging::{log_browser_event, log_timeout};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(15);

/// One open browser and page owned by one user.
pub struct BrowserSession {
    id: Uuid,
    lease: LeasedPage,
    last_active: Instant,
}

impl BrowserSession {
    fn new(lease: LeasedPage) -> Self {
        Self {
            id: Uuid::new_v4(),
            lease,
            last_active: Instant::now(),
        }
    }

    /// Owner token. A parked session may only be resumed by a caller
    /// presenting this id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn page(&self) -> &dyn BrowserPage {
        self.lease.page()
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    /// A session whose page cannot evaluate a trivial expression is dead.
    pub async fn is_alive(&self) -> bool {
        self.page().evaluate(LIVENESS_PROBE).await.is_ok()
    }

    async fn close(self) -> BrowserResult<()> {
        self.lease.close().await
    }
}

type Slot = Arc<Mutex<Option<BrowserSession>>>;

/// Exclusive access to one user's session slot.
pub struct SessionGuard {
    user_id: i64,
    pool: BrowserPool,
    slot: OwnedMutexGuard<Option<BrowserSession>>,
}

impl SessionGuard {
    /// Closes any session this user still has, then opens a fresh one.
    pub async fn acquire(&mut self) -> BrowserResult<&mut BrowserSession> {
        if self.release().await {
            log_browser_event("replaced stale session", Some(self.user_id), None);
        }

        let lease = self.pool.launch().await?;
        let session = BrowserSession::new(lease);
        log_browser_event("session opened", Some(self.user_id), Some(&session.id.to_string()));

        Ok(self.slot.insert(session))
    }

    /// Gracefully closes the session. Returns whether one was open; calling
    /// it again is a no-op.
    pub async fn release(&mut self) -> bool {
        match self.slot.take() {
            Some(session) => {
                close_logged(self.user_id, session).await;
                true
            }
            None => false,
        }
    }

    pub fn session(&self) -> Option<&BrowserSession> {
        self.slot.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut BrowserSession> {
        self.slot.as_mut()
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }
}

async fn close_logged(user_id: i64, session: BrowserSession) {
    let id = session.id.to_string();
    match tokio::time::timeout(CLOSE_TIMEOUT, session.close()).await {
        Ok(Ok(())) => log_browser_event("session closed", Some(user_id), Some(&id)),
        Ok(Err(e)) => tracing::warn!("Closing browser for chat {} failed: {}", user_id, e),
        Err(_) => log_timeout("closing browser", CLOSE_TIMEOUT.as_secs(), Some(&format!("chat {user_id}"))),
    }
}

/// Registry of per-user browser sessions.
pub struct BrowserSessionManager {
    pool: BrowserPool,
    slots: StdMutex<HashMap<i64, Slot>>,
}

impl BrowserSessionManager {
    pub fn new(pool: BrowserPool) -> Self {
        Self {
            pool,
            slots: StdMutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &BrowserPool {
        &self.pool
    }

    fn slot(&self, user_id: i64) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.entry(user_id).or_default().clone()
    }

    fn all_slots(&self) -> Vec<(i64, Slot)> {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.iter().map(|(id, slot)| (*id, slot.clone())).collect()
    }

    /// Waits for exclusive access to the user's slot.
    pub async fn lock(&self, user_id: i64) -> SessionGuard {
        SessionGuard {
            user_id,
            pool: self.pool.clone(),
            slot: self.slot(user_id).lock_owned().await,
        }
    }

    /// Opens a fresh session for the user, closing any prior one first.
    /// Returns the new owner token.
    pub async fn acquire(&self, user_id: i64) -> BrowserResult<Uuid> {
        let mut guard = self.lock(user_id).await;
        Ok(guard.acquire().await?.id())
    }

    pub async fn release(&self, user_id: i64) -> bool {
        self.lock(user_id).await.release().await
    }

    /// Best-effort parallel close of every tracked session. Returns how many
    /// were open.
    pub async fn close_all(&self) -> usize {
        let closes = self.all_slots().into_iter().map(|(user_id, slot)| async move {
            let session = match tokio::time::timeout(CLOSE_TIMEOUT, slot.lock()).await {
                Ok(mut guard) => guard.take(),
                Err(_) => {
                    tracing::warn!("Session for chat {} stayed busy during shutdown", user_id);
                    None
                }
            };
            match session {
                Some(session) => {
                    close_logged(user_id, session).await;
                    1
                }
                None => 0,
            }
        });

        let closed: usize = join_all(closes).await.into_iter().sum();
        log_browser_event("closed all sessions", None, Some(&closed.to_string()));
        closed
    }

    /// Closes sessions idle longer than `max_idle` and returns their user
    /// ids. Slots currently held by a running operation are skipped.
    pub async fn reap_idle(&self, max_idle: Duration) -> Vec<i64> {
        let mut reaped = Vec::new();
        for (user_id, slot) in self.all_slots() {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let expired = guard.as_ref().is_some_and(|s| s.idle_for() >= max_idle);
            if !expired {
                continue;
            }
            if let Some(session) = guard.take() {
                drop(guard);
                close_logged(user_id, session).await;
                reaped.push(user_id);
            }
        }
        reaped
    }

    /// Sessions currently open. Slots busy with an operation count as open.
    pub fn open_sessions(&self) -> usize {
        self.all_slots()
            .into_iter()
            .filter(|(_, slot)| match slot.try_lock() {
                Ok(guard) => guard.is_some(),
                Err(_) => true,
            })
            .count()
    }

    /// Owner token of the user's session, if one is open and not busy.
    pub fn session_id(&self, user_id: i64) -> Option<Uuid> {
        let slot = self.slot(user_id);
        let guard = slot.try_lock().ok()?;
        guard.as_ref().map(BrowserSession::id)
    }
}
