//! Booking orchestrator.
//!
//! A booking attempt runs `Init → NavigatingForm → AwaitingCaptcha`, then
//! returns with the browser parked in the user's session slot. Each captcha
//! answer re-enters through [`BookingOrchestrator::submit`], which runs
//! `Submitting → Result` against the same page and either finishes the
//! round or parks again for another captcha.

use chrono::{Datelike, NaiveDate, NaiveTime};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use uuid::Uuid;

use super::classify::{MarkupClassifier, Outcome, PageSnapshot, SubmissionClassifier, SubmissionResult};
use super::error::{BookingError, ErrorClass};
use super::state::{finish_captcha_round, park_for_captcha, Action};
use crate::bot::transport::{CaptchaRequester, Keyboard, Transport};
use crate::browser::sessions::{BrowserSessionManager, SessionGuard};
use crate::browser::{BrowserPage, BrowserResult};
use crate::database::models::{CompleteDonorData, UserSession};
use crate::scanner::show_month;
use crate::site;
use crate::utils::datetime::{first_of_month, format_display_date, format_time};
use crate::utils::feedback::{format_feedback, FeedbackType};
use crate::utils::logging::{log_booking_phase, log_browser_event};
use crate::utils::validation::phone_form_digits;

const CAPTCHA_TIMEOUT: Duration = Duration::from_secs(10);
const TIME_SELECT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingPhase {
    Init,
    NavigatingForm,
    AwaitingCaptcha,
    Submitting,
    Result,
}

impl BookingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingPhase::Init => "init",
            BookingPhase::NavigatingForm => "navigating_form",
            BookingPhase::AwaitingCaptcha => "awaiting_captcha",
            BookingPhase::Submitting => "submitting",
            BookingPhase::Result => "result",
        }
    }
}

/// How the birth date field finally took its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BirthDateStrategy {
    TypeAndTab,
    ScriptedValue,
    FillAndTab,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Booked,
    /// Captcha rejected; a fresh image was sent for this attempt number.
    Retry { attempt: u32 },
    /// The site refused the booking for a non-captcha reason.
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct BookingSettings {
    pub captcha_dir: PathBuf,
    pub max_captcha_attempts: u32,
    /// Wait after submitting before the page is classified
    pub submit_settle: Duration,
    /// Pause between widget interactions
    pub step_delay: Duration,
    /// Receives layout-mismatch alerts
    pub operator_chat_id: Option<i64>,
}

impl BookingSettings {
    pub fn new(captcha_dir: PathBuf, max_captcha_attempts: u32) -> Self {
        Self {
            captcha_dir,
            max_captcha_attempts: max_captcha_attempts.max(1),
            submit_settle: Duration::from_secs(3),
            step_delay: Duration::from_secs(1),
            operator_chat_id: None,
        }
    }
}

pub struct BookingOrchestrator {
    db: SqlitePool,
    sessions: Arc<BrowserSessionManager>,
    transport: Arc<dyn Transport>,
    captcha: Arc<dyn CaptchaRequester>,
    classifier: Arc<dyn SubmissionClassifier>,
    settings: BookingSettings,
    cancelled: StdMutex<HashSet<i64>>,
}

fn dates_keyboard() -> Keyboard {
    Keyboard::single("🔙 К выбору дат", Action::BackToDates.to_payload())
}

async fn remove_captcha_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to delete captcha image {}: {}", path.display(), e);
        }
    }
}

impl BookingOrchestrator {
    pub fn new(
        db: SqlitePool,
        sessions: Arc<BrowserSessionManager>,
        transport: Arc<dyn Transport>,
        captcha: Arc<dyn CaptchaRequester>,
        settings: BookingSettings,
    ) -> Self {
        Self {
            db,
            sessions,
            transport,
            captcha,
            classifier: Arc::new(MarkupClassifier),
            settings,
            cancelled: StdMutex::new(HashSet::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn SubmissionClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn sessions(&self) -> &Arc<BrowserSessionManager> {
        &self.sessions
    }

    /// Opens a browser for the user's selected slot, fills the form and
    /// sends the captcha. Returns once the session is parked.
    pub async fn begin(&self, user_id: i64) -> Result<(), BookingError> {
        let mut guard = self.sessions.lock(user_id).await;
        let result = self.begin_locked(&mut guard).await;
        if let Err(e) = &result {
            guard.release().await;
            drop(guard);
            self.abort_round(user_id, e).await;
        }
        result
    }

    async fn begin_locked(&self, guard: &mut SessionGuard) -> Result<(), BookingError> {
        let user_id = guard.user_id();
        let record = UserSession::find(&self.db, user_id)
            .await?
            .ok_or(BookingError::MissingData("регистрация"))?;
        let donor = record
            .donor
            .complete()
            .ok_or(BookingError::MissingData("данные донора"))?;
        let date = record.selected_date.ok_or(BookingError::MissingData("дата"))?;
        let time = record.selected_time.ok_or(BookingError::MissingData("время"))?;

        let slot = format!("{} {}", date, format_time(time));
        log_booking_phase(user_id, BookingPhase::Init.as_str(), Some(&slot));
        let session = guard.acquire().await?;
        let token = session.id();
        self.checkpoint(user_id)?;

        log_booking_phase(user_id, BookingPhase::NavigatingForm.as_str(), None);
        self.open_form(session.page(), date, time).await?;
        self.checkpoint(user_id)?;
        self.fill_form(session.page(), &donor).await?;
        self.checkpoint(user_id)?;

        log_booking_phase(user_id, BookingPhase::AwaitingCaptcha.as_str(), None);
        let image = self.capture_captcha(session.page(), user_id).await?;
        let parked = self.park(user_id, token, &image, 1).await;
        if parked.is_err() {
            remove_captcha_file(&image).await;
        }
        parked?;

        session.touch();
        Ok(())
    }

    /// Records the parked round, then sends the captcha image. The record
    /// is saved first so an instant answer already finds the owner token.
    async fn park(&self, user_id: i64, token: Uuid, image: &Path, attempt: u32) -> Result<(), BookingError> {
        let mut record = UserSession::find_or_new(&self.db, user_id).await?;
        self.checkpoint(user_id)?;
        park_for_captcha(&mut record, token, image.to_path_buf(), attempt);
        record.save(&self.db).await?;

        self.captcha.request_captcha(user_id, image, attempt).await?;
        Ok(())
    }

    /// Submits the captcha text typed by the user into the parked page.
    pub async fn submit(&self, user_id: i64, text: &str) -> Result<SubmitOutcome, BookingError> {
        let mut guard = self.sessions.lock(user_id).await;
        let result = self.submit_locked(&mut guard, text).await;
        if let Err(e) = &result {
            guard.release().await;
            drop(guard);
            self.abort_round(user_id, e).await;
        }
        result
    }

    async fn submit_locked(&self, guard: &mut SessionGuard, text: &str) -> Result<SubmitOutcome, BookingError> {
        let user_id = guard.user_id();
        let record = UserSession::find(&self.db, user_id)
            .await?
            .ok_or(BookingError::SessionDesync)?;
        let token = record.booking_token.ok_or(BookingError::SessionDesync)?;

        let Some(session) = guard.session_mut() else {
            return Err(BookingError::SessionDesync);
        };
        if session.id() != token || !session.is_alive().await {
            return Err(BookingError::SessionDesync);
        }
        session.touch();

        let attempt = record.captcha_attempts.max(1);
        let details = format!("attempt {attempt}");
        log_booking_phase(user_id, BookingPhase::Submitting.as_str(), Some(&details));

        let page = session.page();
        page.fill(site::CAPTCHA_FIELD, text).await?;
        let via = submit_form(page).await?;
        log_browser_event("form submitted", Some(user_id), Some(&via));

        tokio::time::sleep(self.settings.submit_settle).await;
        let snapshot = page
            .evaluate(&site::snapshot_script())
            .await
            .ok()
            .and_then(PageSnapshot::from_value)
            .ok_or(BookingError::BrowserUnreachable)?;
        let outcome = self.classifier.classify(&snapshot);
        let result = SubmissionResult::from(&outcome);
        log_booking_phase(user_id, BookingPhase::Result.as_str(), Some(&result.describe()));

        match outcome {
            Outcome::CaptchaRetry(reason) => {
                if attempt >= self.settings.max_captcha_attempts {
                    return Err(BookingError::CaptchaAttemptsExhausted(attempt));
                }
                tracing::info!("Captcha rejected for chat {}: {}", user_id, reason);
                self.notify(
                    user_id,
                    &format_feedback(FeedbackType::Error, "Неверная капча. Попробуем ещё раз..."),
                    None,
                )
                .await;

                if let Some(old) = record.captcha_image_path.as_deref() {
                    remove_captcha_file(old).await;
                }
                // Same page, no reload: the donor fields stay filled.
                let image = self.capture_captcha(page, user_id).await?;
                let next = attempt + 1;
                let parked = self.park(user_id, token, &image, next).await;
                if parked.is_err() {
                    remove_captcha_file(&image).await;
                }
                parked?;

                session.touch();
                Ok(SubmitOutcome::Retry { attempt: next })
            }
            Outcome::Success => {
                guard.release().await;
                let summary = success_message(&record);
                self.finish_latest(user_id).await?;
                self.notify(user_id, &summary, None).await;
                Ok(SubmitOutcome::Booked)
            }
            Outcome::Fatal(message) => {
                guard.release().await;
                self.finish_latest(user_id).await?;
                let text = format!(
                    "Ошибка при записи\n\n{message}\n\n💡 Попробуйте записаться позже или обратитесь в центр напрямую."
                );
                self.notify(
                    user_id,
                    &format_feedback(FeedbackType::Error, &text),
                    Some(dates_keyboard()),
                )
                .await;
                Ok(SubmitOutcome::Rejected(message))
            }
        }
    }

    /// Force-releases the user's browser and clears the captcha round,
    /// whatever phase it is in. Returns whether there was a round to cancel.
    pub async fn cancel(&self, user_id: i64) -> Result<bool, BookingError> {
        self.set_cancelled(user_id, true);
        let released = self.sessions.release(user_id).await;

        let result: Result<bool, BookingError> = async {
            let mut record = UserSession::find_or_new(&self.db, user_id).await?;
            // A stale cancel button must not cut a registration short.
            let open_round = released || record.state.in_captcha_round();
            if open_round {
                self.finish_round(&mut record).await?;
            }
            Ok(open_round)
        }
        .await;

        self.set_cancelled(user_id, false);
        log_booking_phase(user_id, "cancelled", Some(if released { "browser closed" } else { "no browser" }));
        result
    }

    /// Clears a round whose browser the idle reaper already closed.
    pub async fn expire(&self, user_id: i64) -> Result<bool, BookingError> {
        let Some(mut record) = UserSession::find(&self.db, user_id).await? else {
            return Ok(false);
        };
        if !record.state.in_captcha_round() {
            return Ok(false);
        }

        self.finish_round(&mut record).await?;
        log_booking_phase(user_id, "expired", None);
        self.notify(
            user_id,
            &format_feedback(
                FeedbackType::Warning,
                "Время ожидания капчи истекло, запись отменена.\n\n💡 Выберите дату заново, чтобы попробовать ещё раз.",
            ),
            Some(dates_keyboard()),
        )
        .await;
        Ok(true)
    }

    fn set_cancelled(&self, user_id: i64, cancelled: bool) {
        let mut set = self.cancelled.lock().unwrap_or_else(|p| p.into_inner());
        if cancelled {
            set.insert(user_id);
        } else {
            set.remove(&user_id);
        }
    }

    fn checkpoint(&self, user_id: i64) -> Result<(), BookingError> {
        let set = self.cancelled.lock().unwrap_or_else(|p| p.into_inner());
        if set.contains(&user_id) {
            Err(BookingError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Ends the round on the record as stored now, so changes saved while
    /// the page was being worked on survive.
    async fn finish_latest(&self, user_id: i64) -> Result<(), BookingError> {
        let mut record = UserSession::find_or_new(&self.db, user_id).await?;
        self.finish_round(&mut record).await
    }

    async fn finish_round(&self, record: &mut UserSession) -> Result<(), BookingError> {
        let image = finish_captcha_round(record);
        record.save(&self.db).await?;
        if let Some(image) = image {
            remove_captcha_file(&image).await;
        }
        Ok(())
    }

    /// Resets the conversation after a failed attempt and tells the user.
    async fn abort_round(&self, user_id: i64, error: &BookingError) {
        if matches!(error, BookingError::Cancelled) {
            return;
        }
        log_booking_phase(user_id, "failed", Some(&error.to_string()));

        match UserSession::find(&self.db, user_id).await {
            Ok(Some(mut record)) => {
                if let Err(e) = self.finish_round(&mut record).await {
                    tracing::error!("Failed to reset booking round for chat {}: {}", user_id, e);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!("Failed to load session for chat {}: {}", user_id, e),
        }

        self.notify(
            user_id,
            &format_feedback(FeedbackType::Error, &error.user_message()),
            Some(dates_keyboard()),
        )
        .await;

        if error.class() == ErrorClass::Layout {
            if let Some(operator) = self.settings.operator_chat_id {
                let alert = format!("⚠️ Возможно, изменилась вёрстка сайта записи: {error} (чат {user_id})");
                self.notify(operator, &alert, None).await;
            }
        }
    }

    async fn notify(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) {
        if let Err(e) = self.transport.send_text(chat_id, text, keyboard).await {
            tracing::warn!("Failed to notify chat {}: {}", chat_id, e);
        }
    }

    /// Loads the form with the slot selected, through the widget first and
    /// the direct URL second. The name field showing up is what counts.
    async fn open_form(&self, page: &dyn BrowserPage, date: NaiveDate, time: NaiveTime) -> Result<(), BookingError> {
        page.goto(site::FORM_URL).await?;
        site::dismiss_modal(page).await;

        match self.select_via_widget(page, date, time).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!("Widget selection of {} {} failed, using direct URL: {}", date, format_time(time), e);
            }
        }

        let url = site::direct_form_url(date, time);
        page.goto(&url)
            .await
            .map_err(|_| BookingError::DateTimeSelectionFailed)?;
        site::dismiss_modal(page).await;
        page.wait_for(site::NAME_FIELD, site::FORM_TIMEOUT)
            .await
            .map_err(|_| BookingError::DateTimeSelectionFailed)
    }

    async fn select_via_widget(
        &self,
        page: &dyn BrowserPage,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<(), BookingError> {
        page.wait_for(site::CALENDARS, site::CALENDAR_TIMEOUT).await?;
        if show_month(page, first_of_month(date), self.settings.step_delay)
            .await?
            .is_none()
        {
            return Err(BookingError::DateTimeSelectionFailed);
        }

        let day_clicked = page
            .evaluate(&site::select_day_script(date.day()))
            .await?
            .as_bool()
            .unwrap_or(false);
        if !day_clicked {
            return Err(BookingError::DateTimeSelectionFailed);
        }

        let mut time_clicked = false;
        for _ in 0..TIME_SELECT_ATTEMPTS {
            tokio::time::sleep(self.settings.step_delay).await;
            time_clicked = page
                .evaluate(&site::select_time_script(time))
                .await?
                .as_bool()
                .unwrap_or(false);
            if time_clicked {
                break;
            }
        }
        if !time_clicked {
            return Err(BookingError::DateTimeSelectionFailed);
        }

        page.wait_for(site::NAME_FIELD, site::FORM_TIMEOUT).await?;
        Ok(())
    }

    async fn fill_form(&self, page: &dyn BrowserPage, donor: &CompleteDonorData) -> Result<(), BookingError> {
        page.wait_for(site::NAME_FIELD, site::FORM_TIMEOUT).await?;
        page.fill(site::NAME_FIELD, &donor.name).await?;
        page.fill(site::PHONE_FIELD, &phone_form_digits(&donor.phone)).await?;
        page.fill(site::EMAIL_FIELD, &donor.email).await?;
        match fill_birth_date(page, &donor.birth_date).await {
            Some(strategy) => tracing::debug!("Birth date filled via {:?}", strategy),
            None => tracing::warn!("Birth date field never matched {}", donor.birth_date),
        }
        page.fill(site::SNILS_FIELD, &donor.snils).await?;
        Ok(())
    }

    async fn capture_captcha(&self, page: &dyn BrowserPage, user_id: i64) -> Result<PathBuf, BookingError> {
        page.wait_for(site::CAPTCHA_IMAGE, CAPTCHA_TIMEOUT)
            .await
            .map_err(|_| BookingError::CaptchaNotFound)?;

        tokio::fs::create_dir_all(&self.settings.captcha_dir).await?;
        let path = self
            .settings
            .captcha_dir
            .join(format!("captcha_{}_{}.png", user_id, Uuid::new_v4().simple()));
        page.screenshot_element(site::CAPTCHA_IMAGE, &path)
            .await
            .map_err(|_| BookingError::CaptchaNotFound)?;

        log_browser_event("captcha captured", Some(user_id), Some(&path.display().to_string()));
        Ok(path)
    }
}

/// Fills the birth date, escalating until the field reads back exactly
/// `value`. Returns the strategy that stuck.
pub async fn fill_birth_date(page: &dyn BrowserPage, value: &str) -> Option<BirthDateStrategy> {
    let field = site::BIRTH_DATE_FIELD;
    let reads_back = |read: Option<String>| read.as_deref() == Some(value);

    let typed: BrowserResult<Option<String>> = async {
        page.click(field).await?;
        page.type_text(field, value).await?;
        page.press_key(field, "Tab").await?;
        page.input_value(field).await
    }
    .await;
    if typed.is_ok_and(reads_back) {
        return Some(BirthDateStrategy::TypeAndTab);
    }

    let scripted = page.evaluate(&site::set_value_script(field, value)).await;
    if scripted.is_ok() && page.input_value(field).await.is_ok_and(reads_back) {
        return Some(BirthDateStrategy::ScriptedValue);
    }

    let filled: BrowserResult<Option<String>> = async {
        page.fill(field, value).await?;
        page.press_key(field, "Tab").await?;
        page.input_value(field).await
    }
    .await;
    if filled.is_ok_and(reads_back) {
        return Some(BirthDateStrategy::FillAndTab);
    }

    None
}

/// Clicks the first visible submit control, then falls back to a script
/// search and plain form submission. Returns how the form was sent.
pub async fn submit_form(page: &dyn BrowserPage) -> Result<String, BookingError> {
    for selector in site::SUBMIT_SELECTORS {
        if !matches!(page.is_visible(selector).await, Ok(true)) {
            continue;
        }
        if page.click(selector).await.is_ok() {
            return Ok(selector.to_string());
        }
    }

    match page.evaluate(&site::submit_fallback_script()).await {
        Ok(serde_json::Value::String(how)) => Ok(how),
        _ => Err(BookingError::SubmitControlNotFound),
    }
}

fn success_message(record: &UserSession) -> String {
    let date = record
        .selected_date
        .map(format_display_date)
        .unwrap_or_default();
    let time = record.selected_time.map(format_time).unwrap_or_default();
    format!(
        "✅ Успешная запись!\n\n\
         📅 Дата: {date}\n\
         ⏰ Время: {time}\n\n\
         📋 Данные записи:\n\
         👤 {}\n\
         📞 {}\n\n\
         💡 Не забудьте взять с собой паспорт и СНИЛС!",
        record.donor.name.as_deref().unwrap_or_default(),
        record.donor.phone.as_deref().unwrap_or_default(),
    )
}
