use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::bot::keyboards::{dates_keyboard, new_dates_message};
use crate::bot::transport::Transport;
use crate::database::models::UserSession;
use crate::scanner::{new_dates, snapshot_of, AvailableDate, Scanner};
use crate::utils::datetime::{can_donate, next_eligible_date, today};
use crate::utils::logging::log_system_event;

/// Scan anchor for a user the poller should check, `None` when the user
/// is skipped this tick. The inner `None` means "from tomorrow".
pub fn poll_anchor(session: &UserSession, today: NaiveDate) -> Option<Option<NaiveDate>> {
    if !session.checking_enabled || !session.is_registered() || session.state.in_captcha_round() {
        return None;
    }
    let last = session.last_donation_date?;
    let kind = session.donation_type?;
    if can_donate(last, kind, today) {
        Some(None)
    } else {
        Some(Some(next_eligible_date(last, kind)))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub users: usize,
    pub scans: usize,
    pub failed_scans: usize,
    pub notified: usize,
}

struct PollerInner {
    db: SqlitePool,
    scanner: Scanner,
    transport: Arc<dyn Transport>,
    snapshots: StdMutex<HashMap<i64, BTreeSet<NaiveDate>>>,
    running: Mutex<()>,
}

/// Scans availability for every eligible user and announces dates each
/// user has not been shown before.
#[derive(Clone)]
pub struct AvailabilityPoller {
    inner: Arc<PollerInner>,
}

impl AvailabilityPoller {
    pub fn new(db: SqlitePool, scanner: Scanner, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                db,
                scanner,
                transport,
                snapshots: StdMutex::new(HashMap::new()),
                running: Mutex::new(()),
            }),
        }
    }

    /// One polling pass. A pass still in progress makes this a no-op.
    pub async fn tick(&self, today: NaiveDate) -> Result<TickReport, sqlx::Error> {
        let Ok(_running) = self.inner.running.try_lock() else {
            tracing::warn!("Previous availability check still running, skipping tick");
            return Ok(TickReport::default());
        };

        let sessions = UserSession::find_all(&self.inner.db).await?;
        let mut by_anchor: BTreeMap<Option<NaiveDate>, Vec<i64>> = BTreeMap::new();
        for session in &sessions {
            if let Some(anchor) = poll_anchor(session, today) {
                by_anchor.entry(anchor).or_default().push(session.chat_id);
            }
        }

        let mut report = TickReport {
            users: by_anchor.values().map(Vec::len).sum(),
            ..Default::default()
        };

        for (anchor, users) in by_anchor {
            report.scans += 1;
            let dates = match self.inner.scanner.try_scan(anchor, today).await {
                Ok(dates) => dates,
                Err(e) => {
                    // Snapshots stay as they were so a recovering site does not re-announce.
                    tracing::warn!("Availability scan for {} users failed: {}", users.len(), e);
                    report.failed_scans += 1;
                    continue;
                }
            };
            let current = snapshot_of(&dates);

            for chat_id in users {
                let fresh = {
                    let mut snapshots = self.lock_snapshots();
                    let previous = snapshots.get(&chat_id).cloned().unwrap_or_default();
                    snapshots.insert(chat_id, current.clone());
                    new_dates(&previous, &dates)
                };
                if fresh.is_empty() {
                    continue;
                }

                match self
                    .inner
                    .transport
                    .send_text(chat_id, &new_dates_message(anchor), Some(dates_keyboard(&fresh)))
                    .await
                {
                    Ok(()) => report.notified += 1,
                    Err(e) => tracing::warn!("Failed to announce new dates to chat {}: {}", chat_id, e),
                }
            }
        }

        tracing::info!(
            "Availability check done: {} users, {} scans ({} failed), {} notified",
            report.users,
            report.scans,
            report.failed_scans,
            report.notified
        );
        Ok(report)
    }

    /// Records dates the user was just shown, so the next check does not
    /// announce them again.
    pub fn remember(&self, chat_id: i64, dates: &[AvailableDate]) {
        self.lock_snapshots().insert(chat_id, snapshot_of(dates));
    }

    /// Drops the user's snapshot, so the next check announces everything.
    pub fn forget(&self, chat_id: i64) {
        self.lock_snapshots().remove(&chat_id);
    }

    pub fn snapshot(&self, chat_id: i64) -> Option<BTreeSet<NaiveDate>> {
        self.lock_snapshots().get(&chat_id).cloned()
    }

    fn lock_snapshots(&self) -> std::sync::MutexGuard<'_, HashMap<i64, BTreeSet<NaiveDate>>> {
        self.inner.snapshots.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub struct PollerService {
    poller: AvailabilityPoller,
    interval: Duration,
    scheduler: JobScheduler,
}

impl PollerService {
    pub async fn new(
        poller: AvailabilityPoller,
        interval: Duration,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            poller,
            interval,
            scheduler,
        })
    }

    pub async fn start(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let poller = self.poller.clone();

        let poll_job = Job::new_repeated_async(self.interval, move |_uuid, _l| {
            let poller = poller.clone();
            Box::pin(async move {
                if let Err(e) = poller.tick(today()).await {
                    tracing::error!("Availability check failed: {}", e);
                }
            })
        })?;

        self.scheduler.add(poll_job).await?;
        self.scheduler.start().await?;

        log_system_event(
            "poller started",
            Some(&format!("checking every {} minutes", self.interval.as_secs() / 60)),
        );
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.scheduler.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{ConversationState, DonationType};

    fn registered(chat_id: i64, last: NaiveDate, kind: DonationType) -> UserSession {
        let mut session = UserSession::new(chat_id);
        session.state = ConversationState::Ready;
        session.donation_type = Some(kind);
        session.last_donation_date = Some(last);
        session.donor.name = Some("Иванов Иван".into());
        session.donor.phone = Some("+7 (999) 123-45-67".into());
        session.donor.email = Some("ivan@example.com".into());
        session.donor.birth_date = Some("01.01.1990".into());
        session.donor.snils = Some("123-456-789 01".into());
        session
    }

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[test]
    fn test_eligible_user_scans_from_tomorrow() {
        let session = registered(1, day(3, 1), DonationType::Plasma);
        assert_eq!(poll_anchor(&session, day(3, 15)), Some(None));
    }

    #[test]
    fn test_waiting_user_scans_from_next_eligible_date() {
        let session = registered(1, day(3, 10), DonationType::Blood);
        assert_eq!(poll_anchor(&session, day(3, 15)), Some(Some(day(4, 9))));
    }

    #[test]
    fn test_skipped_users() {
        let mut disabled = registered(1, day(3, 1), DonationType::Plasma);
        disabled.checking_enabled = false;
        assert_eq!(poll_anchor(&disabled, day(3, 15)), None);

        let mut in_round = registered(2, day(3, 1), DonationType::Plasma);
        in_round.state = ConversationState::WaitingCaptchaInput;
        assert_eq!(poll_anchor(&in_round, day(3, 15)), None);

        assert_eq!(poll_anchor(&UserSession::new(3), day(3, 15)), None);
    }
}
