mod common;

use chrono::NaiveTime;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::*;
use donor_booking_bot::booking::{Action, BookingOrchestrator, BookingSettings, Input, Rejection, Transition};
use donor_booking_bot::bot::commands::Command;
use donor_booking_bot::bot::handlers::conversation::{
    handle_input, BOOKING_DECLINED, CAPTCHA_TEST_CANCELLED, NOTHING_TO_CANCEL,
};
use donor_booking_bot::bot::handlers::message::{run_command, run_text};
use donor_booking_bot::bot::handlers::AppContext;
use donor_booking_bot::bot::keyboards::NO_DATES;
use donor_booking_bot::browser::sessions::BrowserSessionManager;
use donor_booking_bot::browser::BrowserPool;
use donor_booking_bot::database::models::{ConversationState, DonationType, UserSession};
use donor_booking_bot::scanner::Scanner;
use donor_booking_bot::services::AvailabilityPoller;

const CHAT: i64 = 100;

struct App {
    ctx: AppContext,
    site: FakeSite,
    transport: Arc<RecordingTransport>,
    _dirs: (TempDir, TempDir),
}

async fn app() -> App {
    let (db, db_dir) = test_db().await;
    let captcha_dir = TempDir::new().unwrap();
    let site = FakeSite::new();

    let pool = BrowserPool::new(site.launcher(), 2);
    let sessions = Arc::new(BrowserSessionManager::new(pool.clone()));
    let scanner = Scanner::new(pool).with_settle(Duration::ZERO);
    let transport = Arc::new(RecordingTransport::default());

    let mut settings = BookingSettings::new(captcha_dir.path().to_path_buf(), 5);
    settings.submit_settle = Duration::ZERO;
    settings.step_delay = Duration::ZERO;
    let orchestrator = Arc::new(BookingOrchestrator::new(
        db.pool.clone(),
        sessions,
        transport.clone(),
        transport.clone(),
        settings,
    ));
    let poller = AvailabilityPoller::new(db.pool.clone(), scanner.clone(), transport.clone());

    let ctx = AppContext {
        db: db.pool.clone(),
        transport: transport.clone(),
        orchestrator,
        scanner,
        poller,
    };
    App {
        ctx,
        site,
        transport,
        _dirs: (db_dir, captcha_dir),
    }
}

impl App {
    async fn record(&self) -> UserSession {
        UserSession::find(&self.ctx.db, CHAT).await.unwrap().unwrap()
    }

    async fn text(&self, text: &str) -> Transition {
        handle_input(&self.ctx, CHAT, Input::Text(text)).await.unwrap()
    }

    async fn press(&self, action: Action) -> Transition {
        handle_input(&self.ctx, CHAT, Input::Action(action)).await.unwrap()
    }

    fn last_text(&self) -> String {
        self.transport.texts().last().cloned().unwrap_or_default()
    }
}

#[tokio::test]
async fn test_full_registration() {
    let app = app().await;

    run_command(&app.ctx, CHAT, Command::Start).await.unwrap();
    let prompt = app.transport.messages().pop().unwrap();
    let payloads: Vec<String> = prompt.keyboard.unwrap().payloads().map(str::to_string).collect();
    assert!(payloads.contains(&"donation_type_plasma".to_string()));
    assert_eq!(app.record().await.state, ConversationState::AskDonationType);

    app.press(Action::DonationType(DonationType::Plasma)).await;
    assert!(app.last_text().contains("плазму"));

    for answer in [
        "01.01.2024",
        "Иванов Иван Иванович",
        "89991234567",
        "ivanov@mail.ru",
        "27.07.1992",
    ] {
        assert!(matches!(app.text(answer).await, Transition::Advanced(_)), "{answer}");
    }
    app.text("123-456-789 01").await;

    let record = app.record().await;
    assert!(record.is_registered());
    assert_eq!(record.state, ConversationState::Ready);
    assert_eq!(record.donor.phone.as_deref(), Some("+7 (999) 123-45-67"));
    assert_eq!(record.last_donation_date, Some(day(2024, 1, 1)));

    app.transport.wait_for(|m| m.text.contains("Спасибо за регистрацию")).await;
    app.transport.wait_for(|m| m.text == NO_DATES).await;
}

#[tokio::test]
async fn test_invalid_phone_keeps_asking() {
    let app = app().await;
    let mut session = registered_user(CHAT);
    session.state = ConversationState::AskPhone;
    session.donor.phone = None;
    session.save(&app.ctx.db).await.unwrap();

    let transition = app.text("123").await;

    assert!(matches!(transition, Transition::Rejected(Rejection::Invalid(_))));
    assert_eq!(app.record().await.state, ConversationState::AskPhone);
    assert!(app.last_text().starts_with("❌"));

    app.text("+7 999 123 45 67").await;
    assert_eq!(app.record().await.state, ConversationState::AskEmail);
}

#[tokio::test]
async fn test_unknown_donation_type_resends_buttons() {
    let app = app().await;
    UserSession::new(CHAT).save(&app.ctx.db).await.unwrap();

    app.text("молоко").await;

    let reply = app.transport.messages().pop().unwrap();
    assert!(reply.keyboard.is_some());
    assert_eq!(app.record().await.state, ConversationState::AskDonationType);
}

#[tokio::test]
async fn test_captcha_test_mode() {
    let app = app().await;
    registered_user(CHAT).save(&app.ctx.db).await.unwrap();

    run_command(&app.ctx, CHAT, Command::TestCaptcha).await.unwrap();
    assert_eq!(app.record().await.state, ConversationState::TestingCaptcha);

    run_text(&app.ctx, CHAT, "  x7Kp2 ").await.unwrap();
    assert!(app.last_text().contains("Вы ввели: \"x7Kp2\""));
    assert_eq!(app.record().await.state, ConversationState::Ready);

    run_command(&app.ctx, CHAT, Command::TestCaptcha).await.unwrap();
    app.press(Action::CancelCaptchaTest).await;
    assert_eq!(app.last_text(), CAPTCHA_TEST_CANCELLED);
    assert_eq!(app.record().await.state, ConversationState::Ready);
}

#[tokio::test]
async fn test_captcha_test_refused_during_registration() {
    let app = app().await;
    UserSession::new(CHAT).save(&app.ctx.db).await.unwrap();

    run_command(&app.ctx, CHAT, Command::TestCaptcha).await.unwrap();

    assert!(app.last_text().contains("Тест недоступен"));
    assert_eq!(app.record().await.state, ConversationState::AskDonationType);
}

#[tokio::test]
async fn test_booking_through_the_conversation() {
    let app = app().await;
    registered_user(CHAT).save(&app.ctx.db).await.unwrap();
    let date = day(2024, 3, 15);
    let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();

    app.press(Action::SelectDate(date)).await;
    let times = app
        .transport
        .wait_for(|m| m.keyboard.as_ref().is_some_and(|k| k.payloads().any(|p| p == "select_time_09:00")))
        .await;
    assert!(times.text.contains("15 марта"));

    app.press(Action::SelectTime(nine)).await;
    assert!(app.last_text().contains("Подтвердите запись"));

    app.press(Action::ConfirmBooking(true)).await;
    app.transport.wait_for(|m| m.photo.is_some()).await;

    let parked = app.record().await;
    assert_eq!(parked.state, ConversationState::WaitingCaptchaInput);
    assert!(parked.booking_token.is_some());

    app.site.push_snapshot(success_snapshot());
    run_text(&app.ctx, CHAT, "x7Kp2").await.unwrap();
    app.transport.wait_for(|m| m.text.contains("Успешная запись")).await;

    let done = app.record().await;
    assert_eq!(done.state, ConversationState::Ready);
    assert_eq!(done.booking_token, None);
    assert_eq!(app.site.with(|s| s.fields.get(donor_booking_bot::site::CAPTCHA_FIELD).cloned()), Some("x7Kp2".to_string()));
}

#[tokio::test]
async fn test_cancel_command_during_captcha_wait() {
    let app = app().await;
    let mut session = registered_user(CHAT);
    session.state = ConversationState::Confirming;
    session.selected_date = Some(day(2024, 3, 15));
    session.selected_time = NaiveTime::from_hms_opt(9, 0, 0);
    session.save(&app.ctx.db).await.unwrap();

    app.press(Action::ConfirmBooking(true)).await;
    app.transport.wait_for(|m| m.photo.is_some()).await;

    run_command(&app.ctx, CHAT, Command::Cancel).await.unwrap();
    app.transport.wait_for(|m| m.text == BOOKING_DECLINED).await;

    assert_eq!(app.record().await.state, ConversationState::Ready);
    assert_eq!(app.site.with(|s| s.closes), 1);
}

#[tokio::test]
async fn test_declining_confirmation_returns_to_dates() {
    let app = app().await;
    let mut session = registered_user(CHAT);
    session.state = ConversationState::Confirming;
    session.selected_date = Some(day(2024, 3, 15));
    session.selected_time = NaiveTime::from_hms_opt(9, 0, 0);
    session.save(&app.ctx.db).await.unwrap();

    app.press(Action::ConfirmBooking(false)).await;

    assert_eq!(app.last_text(), BOOKING_DECLINED);
    let record = app.record().await;
    assert_eq!(record.state, ConversationState::SelectingDate);
    assert_eq!(record.selected_time, None);
    assert_eq!(app.site.with(|s| s.launches), 0);
}

#[tokio::test]
async fn test_start_during_captcha_round_warns() {
    let app = app().await;
    let mut session = registered_user(CHAT);
    session.state = ConversationState::WaitingCaptchaInput;
    session.save(&app.ctx.db).await.unwrap();

    run_command(&app.ctx, CHAT, Command::Start).await.unwrap();

    assert!(app.last_text().contains("/cancel"));
    assert_eq!(app.record().await.state, ConversationState::WaitingCaptchaInput);
}

#[tokio::test]
async fn test_unexpected_text_gets_a_hint() {
    let app = app().await;
    registered_user(CHAT).save(&app.ctx.db).await.unwrap();

    run_text(&app.ctx, CHAT, "привет").await.unwrap();
    assert!(app.last_text().contains("/help"));

    run_text(&app.ctx, CHAT, "/unknown now").await.unwrap();
    assert!(app.last_text().contains("Неизвестная команда: /unknown"));
}

#[tokio::test]
async fn test_status_and_check_toggles() {
    let app = app().await;
    registered_user(CHAT).save(&app.ctx.db).await.unwrap();

    run_command(&app.ctx, CHAT, Command::Status).await.unwrap();
    assert!(app.last_text().contains("Фоновая проверка: активна"));

    run_command(&app.ctx, CHAT, Command::StopCheck).await.unwrap();
    assert!(!app.record().await.checking_enabled);

    run_command(&app.ctx, CHAT, Command::StartCheck).await.unwrap();
    assert!(app.record().await.checking_enabled);
}

#[tokio::test]
async fn test_stale_cancel_button_during_registration() {
    let app = app().await;
    let mut session = UserSession::new(CHAT);
    session.state = ConversationState::AskName;
    session.save(&app.ctx.db).await.unwrap();

    app.press(Action::CancelCaptcha).await;
    app.transport.wait_for(|m| m.text.contains(NOTHING_TO_CANCEL)).await;

    assert_eq!(app.record().await.state, ConversationState::AskName);
    assert!(!app.transport.texts().iter().any(|t| t == BOOKING_DECLINED));
}
