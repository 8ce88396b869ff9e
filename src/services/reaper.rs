use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::booking::BookingOrchestrator;
use crate::utils::logging::log_system_event;

const REAP_EVERY: Duration = Duration::from_secs(60);

/// Closes parked sessions idle longer than `max_idle` and expires their
/// captcha rounds. Returns the affected chats.
pub async fn reap_once(orchestrator: &BookingOrchestrator, max_idle: Duration) -> Vec<i64> {
    let reaped = orchestrator.sessions().reap_idle(max_idle).await;
    for &chat_id in &reaped {
        if let Err(e) = orchestrator.expire(chat_id).await {
            tracing::error!("Failed to expire captcha round for chat {}: {}", chat_id, e);
        }
    }
    if !reaped.is_empty() {
        tracing::info!("Closed {} idle booking sessions", reaped.len());
    }
    reaped
}

pub struct ReaperService {
    orchestrator: Arc<BookingOrchestrator>,
    max_idle: Duration,
    scheduler: JobScheduler,
}

impl ReaperService {
    pub async fn new(
        orchestrator: Arc<BookingOrchestrator>,
        max_idle: Duration,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            orchestrator,
            max_idle,
            scheduler,
        })
    }

    pub async fn start(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let orchestrator = self.orchestrator.clone();
        let max_idle = self.max_idle;

        let reap_job = Job::new_repeated_async(REAP_EVERY, move |_uuid, _l| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                reap_once(&orchestrator, max_idle).await;
            })
        })?;

        self.scheduler.add(reap_job).await?;
        self.scheduler.start().await?;

        log_system_event(
            "reaper started",
            Some(&format!("parked sessions expire after {} minutes", self.max_idle.as_secs() / 60)),
        );
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.scheduler.shutdown().await?;
        Ok(())
    }
}
