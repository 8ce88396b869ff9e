//! Submission outcome classification.
//!
//! The booking site has no single reliable success signal, so the decision
//! is made from a [`PageSnapshot`] in tiers. The heuristic sits behind
//! [`SubmissionClassifier`] and can be replaced without touching the
//! orchestrator.

use serde::Deserialize;

/// Page state captured a moment after the form was submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PageSnapshot {
    #[serde(default)]
    pub url: String,
    /// Text of the visible success marker, if any
    pub success_text: Option<String>,
    /// Text of the first visible error marker, if any
    pub error_text: Option<String>,
    #[serde(default)]
    pub body_text: String,
    /// Current captcha input value; `None` when the field is gone
    pub captcha_field: Option<String>,
}

impl PageSnapshot {
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    CaptchaRetry(String),
    Fatal(String),
}

/// Result of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionResult {
    pub success: bool,
    pub captcha_error: bool,
    pub error_message: Option<String>,
}

impl SubmissionResult {
    /// Short form for the booking log.
    pub fn describe(&self) -> String {
        match (self.success, self.captcha_error, self.error_message.as_deref()) {
            (true, _, _) => "success".to_string(),
            (false, true, reason) => format!("captcha error: {}", reason.unwrap_or_default()),
            (false, false, reason) => format!("error: {}", reason.unwrap_or_default()),
        }
    }
}

impl From<&Outcome> for SubmissionResult {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Success => Self {
                success: true,
                captcha_error: false,
                error_message: None,
            },
            Outcome::CaptchaRetry(message) => Self {
                success: false,
                captcha_error: true,
                error_message: Some(message.clone()),
            },
            Outcome::Fatal(message) => Self {
                success: false,
                captcha_error: false,
                error_message: Some(message.clone()),
            },
        }
    }
}

pub trait SubmissionClassifier: Send + Sync {
    fn classify(&self, snapshot: &PageSnapshot) -> Outcome;
}

const URL_MARKERS: [&str; 3] = ["send", "success", "thank"];
const SUCCESS_PHRASES: [&str; 4] = [
    "заявка отправлена",
    "заявка принята",
    "вы записаны",
    "спасибо",
];
const CAPTCHA_KEYWORDS: [&str; 5] = ["капч", "captcha", "код", "символ", "изображени"];

pub const FORM_NOT_SUBMITTED: &str = "Форма не была отправлена";
pub const UNDETERMINED: &str = "Не удалось определить результат отправки";

/// Tiered markup heuristic for the centre's form.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupClassifier;

impl SubmissionClassifier for MarkupClassifier {
    fn classify(&self, snapshot: &PageSnapshot) -> Outcome {
        if snapshot.success_text.is_some() {
            return Outcome::Success;
        }

        let url = snapshot.url.to_lowercase();
        let body = snapshot.body_text.to_lowercase();
        if URL_MARKERS.iter().any(|m| url.contains(m)) && SUCCESS_PHRASES.iter().any(|p| body.contains(p)) {
            return Outcome::Success;
        }

        if let Some(error) = &snapshot.error_text {
            let lowered = error.to_lowercase();
            return if CAPTCHA_KEYWORDS.iter().any(|k| lowered.contains(k)) {
                Outcome::CaptchaRetry(error.clone())
            } else {
                Outcome::Fatal(error.clone())
            };
        }

        match snapshot.captcha_field.as_deref() {
            Some(value) if value.trim().is_empty() => {
                Outcome::CaptchaRetry("Капча не принята".to_string())
            }
            Some(_) => Outcome::Fatal(FORM_NOT_SUBMITTED.to_string()),
            None => Outcome::Fatal(UNDETERMINED.to_string()),
        }
    }
}
