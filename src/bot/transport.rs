//! Outbound messaging seam.
//!
//! The booking core only ever talks to the chat through [`Transport`] and
//! [`CaptchaRequester`]; [`TelegramTransport`] is the production
//! implementation.

use async_trait::async_trait;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to deliver message: {0}")]
    Delivery(String),
    #[error("attachment missing: {0}")]
    MissingAttachment(String),
}

impl From<teloxide::RequestError> for TransportError {
    fn from(err: teloxide::RequestError) -> Self {
        TransportError::Delivery(err.to_string())
    }
}

pub type TransportResult = Result<(), TransportError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub payload: String,
}

impl Button {
    pub fn new(label: impl Into<String>, payload: impl Into<String>) -> Self {
        Self { label: label.into(), payload: payload.into() }
    }
}

/// Inline keyboard as rows of buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(label: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new().row(vec![Button::new(label, payload)])
    }

    pub fn row(mut self, row: Vec<Button>) -> Self {
        if !row.is_empty() {
            self.rows.push(row);
        }
        self
    }

    pub fn payloads(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().flatten().map(|b| b.payload.as_str())
    }

    fn to_markup(&self) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup::new(self.rows.iter().map(|row| {
            row.iter()
                .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.payload.clone()))
                .collect::<Vec<_>>()
        }))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> TransportResult;

    async fn send_photo(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
        keyboard: Option<Keyboard>,
    ) -> TransportResult;
}

/// Presents a captcha image to the human; the typed answer comes back
/// later as an ordinary text message for the same chat.
#[async_trait]
pub trait CaptchaRequester: Send + Sync {
    async fn request_captcha(&self, chat_id: i64, image_path: &Path, attempt: u32) -> TransportResult;
}

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> TransportResult {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(keyboard.to_markup());
        }
        request.await?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
        keyboard: Option<Keyboard>,
    ) -> TransportResult {
        if !path.exists() {
            return Err(TransportError::MissingAttachment(path.display().to_string()));
        }

        let mut request = self
            .bot
            .send_photo(ChatId(chat_id), InputFile::file(path.to_path_buf()))
            .caption(caption);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(keyboard.to_markup());
        }
        request.await?;
        Ok(())
    }
}

/// Caption and buttons shown with every captcha image.
pub fn captcha_prompt(attempt: u32) -> (String, Keyboard) {
    let mut caption = String::from(
        "🔤 Подтверждение записи\n\n\
         📝 Введите текст с картинки, чтобы завершить запись.\n\
         💡 Обычно это 4-6 символов (буквы и цифры).",
    );
    if attempt > 1 {
        caption.push_str(&format!("\n\n🔁 Попытка {attempt}"));
    }
    (caption, Keyboard::single("❌ Отменить запись", "cancel_captcha"))
}

#[async_trait]
impl CaptchaRequester for TelegramTransport {
    async fn request_captcha(&self, chat_id: i64, image_path: &Path, attempt: u32) -> TransportResult {
        let (caption, keyboard) = captcha_prompt(attempt);
        self.send_photo(chat_id, image_path, &caption, Some(keyboard)).await
    }
}
