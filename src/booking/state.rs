//! Conversation transition table.
//!
//! [`apply`] is the single place that decides what an input means in a given
//! state. It mutates only the [`UserSession`] it is handed and performs no
//! I/O; the returned [`Effect`] tells the caller what to do next.

use chrono::{NaiveDate, NaiveTime};
use std::path::PathBuf;
use uuid::Uuid;

use crate::database::models::{ConversationState, DonationType, UserSession};
use crate::utils::datetime::{format_time, parse_iso_date, parse_time};
use crate::utils::validation::{
    normalize_phone, parse_donation_date, validate_birth_date, validate_captcha_text, validate_email,
    validate_name, validate_snils,
};

/// Button payloads understood by the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    DonationType(DonationType),
    SelectDate(NaiveDate),
    SelectTime(NaiveTime),
    ConfirmBooking(bool),
    RefreshDates,
    BackToDates,
    RefreshTimes(NaiveDate),
    CancelCaptcha,
    CancelCaptchaTest,
    BackToMain,
}

impl Action {
    pub fn parse(payload: &str) -> Option<Self> {
        let action = match payload {
            "refresh_dates" => Action::RefreshDates,
            "back_to_dates" => Action::BackToDates,
            "cancel_captcha" => Action::CancelCaptcha,
            "cancel_captcha_test" => Action::CancelCaptchaTest,
            "back_to_main" => Action::BackToMain,
            "confirm_booking_yes" => Action::ConfirmBooking(true),
            "confirm_booking_no" => Action::ConfirmBooking(false),
            _ => {
                if let Some(kind) = payload.strip_prefix("donation_type_") {
                    Action::DonationType(DonationType::from_payload(kind)?)
                } else if let Some(date) = payload.strip_prefix("select_date_") {
                    Action::SelectDate(parse_iso_date(date)?)
                } else if let Some(time) = payload.strip_prefix("select_time_") {
                    Action::SelectTime(parse_time(time)?)
                } else if let Some(date) = payload.strip_prefix("refresh_times_") {
                    Action::RefreshTimes(parse_iso_date(date)?)
                } else {
                    return None;
                }
            }
        };
        Some(action)
    }

    pub fn to_payload(&self) -> String {
        match self {
            Action::DonationType(kind) => format!("donation_type_{}", kind.as_payload()),
            Action::SelectDate(date) => format!("select_date_{}", date.format("%Y-%m-%d")),
            Action::SelectTime(time) => format!("select_time_{}", format_time(*time)),
            Action::ConfirmBooking(true) => "confirm_booking_yes".to_string(),
            Action::ConfirmBooking(false) => "confirm_booking_no".to_string(),
            Action::RefreshDates => "refresh_dates".to_string(),
            Action::BackToDates => "back_to_dates".to_string(),
            Action::RefreshTimes(date) => format!("refresh_times_{}", date.format("%Y-%m-%d")),
            Action::CancelCaptcha => "cancel_captcha".to_string(),
            Action::CancelCaptchaTest => "cancel_captcha_test".to_string(),
            Action::BackToMain => "back_to_main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input<'a> {
    Text(&'a str),
    Action(Action),
}

/// What the caller should do after an accepted input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Ask the question belonging to the new state.
    Prompt(ConversationState),
    RegistrationComplete,
    ShowDates,
    ShowTimes(NaiveDate),
    ConfirmBooking,
    StartBooking,
    SubmitCaptcha(String),
    CancelBooking,
    CaptchaTestPassed(String),
    ShowMain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Right kind of input, bad value. Re-prompt with the reason.
    Invalid(String),
    /// Input the current state does not accept.
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Advanced(Effect),
    Rejected(Rejection),
}

fn advance(session: &mut UserSession, next: ConversationState, effect: Effect) -> Transition {
    session.state = next;
    Transition::Advanced(effect)
}

fn invalid(err: anyhow::Error) -> Transition {
    Transition::Rejected(Rejection::Invalid(err.to_string()))
}

fn donation_type_from_text(text: &str) -> Option<DonationType> {
    match text.trim().to_lowercase().as_str() {
        "кровь" | "🩸 кровь" => Some(DonationType::Blood),
        "плазма" | "плазму" | "🟡 плазма" => Some(DonationType::Plasma),
        _ => None,
    }
}

/// Applies one user input to the session.
pub fn apply(session: &mut UserSession, input: Input<'_>, today: NaiveDate) -> Transition {
    use ConversationState as S;

    // Cancelling a booking round is accepted in every state.
    if input == Input::Action(Action::CancelCaptcha) {
        return Transition::Advanced(Effect::CancelBooking);
    }

    match (session.state, input) {
        (S::AskDonationType, Input::Action(Action::DonationType(kind))) => {
            session.donation_type = Some(kind);
            advance(session, S::AskLastDonationDate, Effect::Prompt(S::AskLastDonationDate))
        }
        (S::AskDonationType, Input::Text(text)) => match donation_type_from_text(text) {
            Some(kind) => {
                session.donation_type = Some(kind);
                advance(session, S::AskLastDonationDate, Effect::Prompt(S::AskLastDonationDate))
            }
            None => Transition::Rejected(Rejection::Invalid(
                "Выберите тип донации кнопкой: кровь или плазма".to_string(),
            )),
        },
        (S::AskLastDonationDate, Input::Text(text)) => match parse_donation_date(text, today) {
            Ok(date) => {
                session.last_donation_date = Some(date);
                advance(session, S::AskName, Effect::Prompt(S::AskName))
            }
            Err(e) => invalid(e),
        },
        (S::AskName, Input::Text(text)) => match validate_name(text) {
            Ok(name) => {
                session.donor.name = Some(name);
                advance(session, S::AskPhone, Effect::Prompt(S::AskPhone))
            }
            Err(e) => invalid(e),
        },
        (S::AskPhone, Input::Text(text)) => match normalize_phone(text) {
            Ok(phone) => {
                session.donor.phone = Some(phone);
                advance(session, S::AskEmail, Effect::Prompt(S::AskEmail))
            }
            Err(e) => invalid(e),
        },
        (S::AskEmail, Input::Text(text)) => match validate_email(text) {
            Ok(email) => {
                session.donor.email = Some(email);
                advance(session, S::AskBirthDate, Effect::Prompt(S::AskBirthDate))
            }
            Err(e) => invalid(e),
        },
        (S::AskBirthDate, Input::Text(text)) => match validate_birth_date(text, today) {
            Ok(birth_date) => {
                session.donor.birth_date = Some(birth_date);
                advance(session, S::AskSnils, Effect::Prompt(S::AskSnils))
            }
            Err(e) => invalid(e),
        },
        (S::AskSnils, Input::Text(text)) => match validate_snils(text) {
            Ok(snils) => {
                session.donor.snils = Some(snils);
                advance(session, S::Ready, Effect::RegistrationComplete)
            }
            Err(e) => invalid(e),
        },

        (
            S::Ready | S::SelectingDate | S::SelectingTime | S::Confirming,
            Input::Action(Action::RefreshDates | Action::BackToDates),
        ) => {
            session.selected_date = None;
            session.selected_time = None;
            advance(session, S::SelectingDate, Effect::ShowDates)
        }
        (
            S::Ready | S::SelectingDate | S::SelectingTime | S::Confirming,
            Input::Action(Action::SelectDate(date)),
        ) => {
            session.selected_date = Some(date);
            session.selected_time = None;
            advance(session, S::SelectingTime, Effect::ShowTimes(date))
        }
        (S::SelectingTime | S::Confirming, Input::Action(Action::RefreshTimes(date))) => {
            session.selected_date = Some(date);
            session.selected_time = None;
            advance(session, S::SelectingTime, Effect::ShowTimes(date))
        }
        (S::SelectingTime, Input::Action(Action::SelectTime(time))) => {
            if session.selected_date.is_none() {
                return Transition::Rejected(Rejection::Unexpected);
            }
            session.selected_time = Some(time);
            advance(session, S::Confirming, Effect::ConfirmBooking)
        }
        (S::Confirming, Input::Action(Action::ConfirmBooking(true))) => {
            if session.selected_date.is_none() || session.selected_time.is_none() {
                return Transition::Rejected(Rejection::Unexpected);
            }
            if !session.is_registered() {
                return Transition::Rejected(Rejection::Invalid(
                    "Сначала завершите регистрацию командой /start".to_string(),
                ));
            }
            session.captcha_attempts = 0;
            session.manual_captcha_text = None;
            advance(session, S::WaitingCaptchaInput, Effect::StartBooking)
        }
        (S::Confirming, Input::Action(Action::ConfirmBooking(false))) => {
            session.selected_time = None;
            advance(session, S::SelectingDate, Effect::ShowDates)
        }

        (S::WaitingCaptchaInput, Input::Text(text)) => {
            if session.booking_token.is_none() {
                return Transition::Rejected(Rejection::Invalid(
                    "Капча ещё готовится, подождите несколько секунд".to_string(),
                ));
            }
            match validate_captcha_text(text) {
                Ok(captcha) => {
                    session.manual_captcha_text = Some(captcha.clone());
                    advance(session, S::CaptchaReceived, Effect::SubmitCaptcha(captcha))
                }
                Err(e) => invalid(e),
            }
        }
        (S::CaptchaReceived, Input::Text(_)) => Transition::Rejected(Rejection::Invalid(
            "Капча уже отправляется, дождитесь результата".to_string(),
        )),

        (S::TestingCaptcha, Input::Text(text)) => match validate_captcha_text(text) {
            Ok(captcha) => advance(session, S::Ready, Effect::CaptchaTestPassed(captcha)),
            Err(e) => invalid(e),
        },
        (S::TestingCaptcha, Input::Action(Action::CancelCaptchaTest)) => {
            advance(session, S::Ready, Effect::ShowMain)
        }

        (state, Input::Action(Action::BackToMain))
            if !state.is_registration() && !state.in_captcha_round() =>
        {
            session.selected_date = None;
            session.selected_time = None;
            advance(session, S::Ready, Effect::ShowMain)
        }

        _ => Transition::Rejected(Rejection::Unexpected),
    }
}

/// Restarts registration from the first question, keeping the check flag.
pub fn begin_registration(session: &mut UserSession) {
    let checking_enabled = session.checking_enabled;
    *session = UserSession::new(session.chat_id);
    session.checking_enabled = checking_enabled;
}

/// Puts the session into the captcha wait owned by `token`.
pub fn park_for_captcha(session: &mut UserSession, token: Uuid, image: PathBuf, attempt: u32) {
    session.state = ConversationState::WaitingCaptchaInput;
    session.booking_token = Some(token);
    session.captcha_image_path = Some(image);
    session.captcha_attempts = attempt;
    session.manual_captcha_text = None;
}

/// Ends a captcha round on any terminal outcome, dropping the slot it was
/// for. Returns the screenshot path for the caller to delete.
pub fn finish_captcha_round(session: &mut UserSession) -> Option<PathBuf> {
    session.state = ConversationState::Ready;
    session.selected_date = None;
    session.selected_time = None;
    session.clear_captcha()
}

/// Enters `/testcaptcha` mode from a steady state.
pub fn start_captcha_test(session: &mut UserSession) -> bool {
    if session.state.is_registration() || session.state.in_captcha_round() {
        return false;
    }
    session.state = ConversationState::TestingCaptcha;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 20).unwrap()
    }

    #[test]
    fn test_action_payloads_parse_back() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        for action in [
            Action::DonationType(DonationType::Plasma),
            Action::SelectDate(date),
            Action::SelectTime(time),
            Action::ConfirmBooking(true),
            Action::RefreshTimes(date),
            Action::CancelCaptchaTest,
        ] {
            assert_eq!(Action::parse(&action.to_payload()), Some(action));
        }
        assert_eq!(Action::parse("select_date_2024-13-01"), None);
        assert_eq!(Action::parse("unknown"), None);
    }

    #[test]
    fn test_invalid_phone_keeps_state() {
        let mut session = UserSession::new(1);
        session.state = ConversationState::AskPhone;

        let result = apply(&mut session, Input::Text("123"), today());
        assert!(matches!(result, Transition::Rejected(Rejection::Invalid(_))));
        assert_eq!(session.state, ConversationState::AskPhone);
        assert!(session.donor.phone.is_none());
    }

    #[test]
    fn test_select_time_requires_selecting_time_state() {
        let mut session = UserSession::new(1);
        session.state = ConversationState::Ready;
        let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();

        let result = apply(&mut session, Input::Action(Action::SelectTime(time)), today());
        assert_eq!(result, Transition::Rejected(Rejection::Unexpected));
        assert_eq!(session.state, ConversationState::Ready);
    }

    #[test]
    fn test_cancel_accepted_everywhere() {
        let mut session = UserSession::new(1);
        for state in [ConversationState::AskName, ConversationState::CaptchaReceived, ConversationState::Ready] {
            session.state = state;
            assert_eq!(
                apply(&mut session, Input::Action(Action::CancelCaptcha), today()),
                Transition::Advanced(Effect::CancelBooking)
            );
        }
    }

    #[test]
    fn test_finished_round_drops_slot_and_captcha() {
        let mut session = UserSession::new(1);
        session.selected_date = NaiveDate::from_ymd_opt(2024, 3, 15);
        session.selected_time = NaiveTime::from_hms_opt(9, 0, 0);
        park_for_captcha(&mut session, Uuid::new_v4(), PathBuf::from("/tmp/c.png"), 2);

        assert_eq!(finish_captcha_round(&mut session), Some(PathBuf::from("/tmp/c.png")));
        assert_eq!(session.state, ConversationState::Ready);
        assert_eq!(session.selected_date, None);
        assert_eq!(session.selected_time, None);
        assert_eq!(session.booking_token, None);
        assert_eq!(session.captcha_attempts, 0);
    }

    #[test]
    fn test_begin_registration_keeps_check_flag() {
        let mut session = UserSession::new(9);
        session.checking_enabled = false;
        session.state = ConversationState::Ready;
        session.donor.name = Some("Иванов Иван".into());

        begin_registration(&mut session);
        assert_eq!(session.state, ConversationState::AskDonationType);
        assert!(session.donor.name.is_none());
        assert!(!session.checking_enabled);
    }
}
