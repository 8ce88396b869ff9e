use thiserror::Error;

use crate::bot::transport::TransportError;
use crate::browser::BrowserError;

/// How a failure should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Site unreachable; the next poll retries.
    Transient,
    /// An expected element is gone; the site probably changed.
    Layout,
    /// The parked browser no longer matches the conversation.
    Desync,
    /// The captcha round could not be completed.
    Captcha,
    /// Missing user data or a local fault.
    Internal,
    /// The user cancelled the round.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("browser page is unreachable")]
    BrowserUnreachable,

    #[error("parked browser session does not match the booking round")]
    SessionDesync,

    #[error("captcha image not found")]
    CaptchaNotFound,

    #[error("submit control not found")]
    SubmitControlNotFound,

    #[error("date/time selection failed through both the widget and the direct URL")]
    DateTimeSelectionFailed,

    #[error("captcha rejected {0} times")]
    CaptchaAttemptsExhausted(u32),

    #[error("missing booking data: {0}")]
    MissingData(&'static str),

    #[error("booking cancelled by user")]
    Cancelled,

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("failed to deliver captcha: {0}")]
    Delivery(#[from] TransportError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BookingError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BookingError::BrowserUnreachable | BookingError::SessionDesync => ErrorClass::Desync,
            BookingError::CaptchaNotFound
            | BookingError::SubmitControlNotFound
            | BookingError::DateTimeSelectionFailed => ErrorClass::Layout,
            BookingError::CaptchaAttemptsExhausted(_) => ErrorClass::Captcha,
            BookingError::Cancelled => ErrorClass::Cancelled,
            BookingError::Browser(e) if e.is_transient_network() => ErrorClass::Transient,
            BookingError::Browser(BrowserError::Launch(_)) => ErrorClass::Transient,
            BookingError::Browser(BrowserError::ElementNotFound(_)) => ErrorClass::Layout,
            BookingError::Browser(_) => ErrorClass::Desync,
            BookingError::MissingData(_)
            | BookingError::Delivery(_)
            | BookingError::Database(_)
            | BookingError::Io(_) => ErrorClass::Internal,
        }
    }

    /// What the user is told.
    pub fn user_message(&self) -> String {
        match self {
            BookingError::BrowserUnreachable | BookingError::SessionDesync => {
                "Сессия записи прервалась.\n\n🔄 Начните запись заново: выберите дату ещё раз.".to_string()
            }
            BookingError::CaptchaNotFound => {
                "Не удалось получить капчу.\n\n🔧 Возможно, сайт временно недоступен.\n💡 Попробуйте позже.".to_string()
            }
            BookingError::SubmitControlNotFound | BookingError::DateTimeSelectionFailed => {
                "Технические трудности на сайте записи.\n\n💡 Попробуйте позже или выберите другое время.".to_string()
            }
            BookingError::CaptchaAttemptsExhausted(n) => format!(
                "Капча не принята {n} раз подряд.\n\n💡 Попробуйте записаться заново чуть позже."
            ),
            BookingError::MissingData(what) => {
                format!("Не хватает данных для записи: {what}.\n\n💡 Пройдите регистрацию командой /start.")
            }
            BookingError::Cancelled => "Запись отменена.".to_string(),
            other => match other.class() {
                ErrorClass::Transient => {
                    "Сайт записи временно недоступен.\n\n💡 Попробуйте позже или выберите другое время.".to_string()
                }
                ErrorClass::Layout => {
                    "Технические трудности на сайте записи.\n\n💡 Попробуйте позже.".to_string()
                }
                _ => "Произошла ошибка при записи.\n\n💡 Попробуйте позже или обратитесь в центр напрямую.".to_string(),
            },
        }
    }
}
