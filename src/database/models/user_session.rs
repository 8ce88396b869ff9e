use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::path::PathBuf;
use uuid::Uuid;

/// Where the user is in the conversation.
///
/// Registration runs `AskDonationType` through `AskSnils` and ends in
/// `Ready`. Booking runs `SelectingDate` through `Confirming`, then the
/// captcha round alternates between `WaitingCaptchaInput` and
/// `CaptchaReceived` until it resolves back to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    AskDonationType,
    AskLastDonationDate,
    AskName,
    AskPhone,
    AskEmail,
    AskBirthDate,
    AskSnils,
    Ready,
    SelectingDate,
    SelectingTime,
    Confirming,
    WaitingCaptchaInput,
    CaptchaReceived,
    TestingCaptcha,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::AskDonationType => "ask_donation_type",
            ConversationState::AskLastDonationDate => "ask_last_donation_date",
            ConversationState::AskName => "ask_name",
            ConversationState::AskPhone => "ask_phone",
            ConversationState::AskEmail => "ask_email",
            ConversationState::AskBirthDate => "ask_birth_date",
            ConversationState::AskSnils => "ask_snils",
            ConversationState::Ready => "ready",
            ConversationState::SelectingDate => "selecting_date",
            ConversationState::SelectingTime => "selecting_time",
            ConversationState::Confirming => "confirming",
            ConversationState::WaitingCaptchaInput => "waiting_captcha_input",
            ConversationState::CaptchaReceived => "captcha_received",
            ConversationState::TestingCaptcha => "testing_captcha",
        }
    }

    pub fn is_registration(&self) -> bool {
        matches!(
            self,
            ConversationState::AskDonationType
                | ConversationState::AskLastDonationDate
                | ConversationState::AskName
                | ConversationState::AskPhone
                | ConversationState::AskEmail
                | ConversationState::AskBirthDate
                | ConversationState::AskSnils
        )
    }

    pub fn in_captcha_round(&self) -> bool {
        matches!(
            self,
            ConversationState::WaitingCaptchaInput | ConversationState::CaptchaReceived
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationType {
    Blood,
    Plasma,
}

impl DonationType {
    pub fn from_payload(value: &str) -> Option<Self> {
        match value {
            "blood" => Some(DonationType::Blood),
            "plasma" => Some(DonationType::Plasma),
            _ => None,
        }
    }

    pub fn as_payload(&self) -> &'static str {
        match self {
            DonationType::Blood => "blood",
            DonationType::Plasma => "plasma",
        }
    }

    /// Accusative form used in replies ("сдавали кровь/плазму").
    pub fn display_accusative(&self) -> &'static str {
        match self {
            DonationType::Blood => "кровь",
            DonationType::Plasma => "плазму",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorData {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// Normalized as `DD.MM.YYYY`
    pub birth_date: Option<String>,
    pub snils: Option<String>,
}

/// Donor data with every field present, ready for the booking form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteDonorData {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub birth_date: String,
    pub snils: String,
}

impl DonorData {
    pub fn complete(&self) -> Option<CompleteDonorData> {
        Some(CompleteDonorData {
            name: self.name.clone()?,
            phone: self.phone.clone()?,
            email: self.email.clone()?,
            birth_date: self.birth_date.clone()?,
            snils: self.snils.clone()?,
        })
    }
}

fn default_true() -> bool {
    true
}

/// Per-chat conversation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    pub chat_id: i64,
    #[serde(default)]
    pub state: ConversationState,
    pub donation_type: Option<DonationType>,
    pub last_donation_date: Option<NaiveDate>,
    #[serde(default)]
    pub donor: DonorData,
    pub selected_date: Option<NaiveDate>,
    pub selected_time: Option<NaiveTime>,
    #[serde(default = "default_true")]
    pub checking_enabled: bool,
    /// Captcha screenshot shown to the user for the outstanding round
    pub captcha_image_path: Option<PathBuf>,
    pub manual_captcha_text: Option<String>,
    /// Owner token of the parked browser session this round resumes
    pub booking_token: Option<Uuid>,
    #[serde(default)]
    pub captcha_attempts: u32,
}

impl UserSession {
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            state: ConversationState::default(),
            donation_type: None,
            last_donation_date: None,
            donor: DonorData::default(),
            selected_date: None,
            selected_time: None,
            checking_enabled: true,
            captcha_image_path: None,
            manual_captcha_text: None,
            booking_token: None,
            captcha_attempts: 0,
        }
    }

    /// Registration finished: donation history and all donor fields present.
    pub fn is_registered(&self) -> bool {
        self.donation_type.is_some()
            && self.last_donation_date.is_some()
            && self.donor.complete().is_some()
            && !self.state.is_registration()
    }

    /// Drops every captcha-round field. Returns the screenshot path so the
    /// caller can delete the file.
    pub fn clear_captcha(&mut self) -> Option<PathBuf> {
        self.manual_captcha_text = None;
        self.booking_token = None;
        self.captcha_attempts = 0;
        self.captcha_image_path.take()
    }

    pub async fn find(pool: &sqlx::SqlitePool, chat_id: i64) -> Result<Option<Self>, sqlx::Error> {
        let row = sqlx::query("SELECT data FROM user_sessions WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_optional(pool)
            .await?;

        match row {
            Some(row) => {
                let data: String = row.try_get("data")?;
                let session = serde_json::from_str(&data)
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    pub async fn find_or_new(pool: &sqlx::SqlitePool, chat_id: i64) -> Result<Self, sqlx::Error> {
        Ok(Self::find(pool, chat_id).await?.unwrap_or_else(|| Self::new(chat_id)))
    }

    pub async fn save(&self, pool: &sqlx::SqlitePool) -> Result<(), sqlx::Error> {
        let data = serde_json::to_string(self).map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO user_sessions (chat_id, data, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
            "#,
        )
        .bind(self.chat_id)
        .bind(data)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn find_all(pool: &sqlx::SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query("SELECT data FROM user_sessions ORDER BY chat_id")
            .fetch_all(pool)
            .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let data: String = row.try_get("data")?;
            match serde_json::from_str(&data) {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!("Skipping unreadable session record: {}", e),
            }
        }
        Ok(sessions)
    }

    pub async fn delete(pool: &sqlx::SqlitePool, chat_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE chat_id = ?")
            .bind(chat_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
