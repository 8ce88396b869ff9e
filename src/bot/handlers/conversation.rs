//! Transport-independent conversation handling.
//!
//! Every inbound text or button press goes through [`handle_input`], which
//! runs the transition table and turns the resulting [`Effect`] into
//! replies. Browser work is spawned so the dispatcher keeps serving the
//! chat while a scan or booking step runs.

use chrono::NaiveDate;

use super::{AppContext, HandlerError};
use crate::booking::{apply, Action, Effect, Input, Rejection, SubmitOutcome, Transition};
use crate::bot::keyboards::{
    back_to_main_keyboard, confirm_keyboard, dates_keyboard, donation_type_keyboard, main_menu_keyboard,
    no_times_keyboard, refresh_dates_keyboard, registration_prompt, retry_dates_keyboard, times_keyboard,
    times_message, DATES_FOUND, NO_DATES, SITE_UNAVAILABLE,
};
use crate::database::models::{ConversationState, UserSession};
use crate::utils::datetime::{can_donate, format_display_date, format_ru_date, format_time, next_eligible_date, today};
use crate::utils::feedback::{format_feedback, CommandFeedback, FeedbackType};
use crate::utils::logging::{log_booking_phase, log_validation_error};

pub const BOOKING_DECLINED: &str = "❌ Запись отменена. Я продолжу проверять новые даты.";
pub const CAPTCHA_TEST_CANCELLED: &str = "❌ Тест капчи отменен";
pub const NOTHING_TO_CANCEL: &str = "Активной записи нет, отменять нечего.";

/// Scan anchor for a manual date request: the next eligible date while
/// the donor is still waiting, otherwise tomorrow.
pub fn dates_anchor(session: &UserSession, today: NaiveDate) -> Option<NaiveDate> {
    let last = session.last_donation_date?;
    let kind = session.donation_type?;
    (!can_donate(last, kind, today)).then(|| next_eligible_date(last, kind))
}

/// Applies one input for `chat_id`, persists the result and replies.
pub async fn handle_input(ctx: &AppContext, chat_id: i64, input: Input<'_>) -> Result<Transition, HandlerError> {
    let mut session = UserSession::find_or_new(&ctx.db, chat_id).await?;
    let state_before = session.state;
    let transition = apply(&mut session, input, today());

    match &transition {
        Transition::Advanced(effect) => {
            // Cancel leaves the record to the orchestrator, which may be saving it.
            if *effect != Effect::CancelBooking {
                session.save(&ctx.db).await?;
            }

            match input {
                Input::Action(Action::ConfirmBooking(false)) => {
                    ctx.transport
                        .send_text(chat_id, BOOKING_DECLINED, Some(refresh_dates_keyboard()))
                        .await?;
                }
                Input::Action(Action::CancelCaptchaTest) => {
                    ctx.transport
                        .send_text(chat_id, CAPTCHA_TEST_CANCELLED, Some(main_menu_keyboard()))
                        .await?;
                }
                _ => run_effect(ctx, &session, effect.clone()).await?,
            }
        }
        Transition::Rejected(Rejection::Invalid(reason)) => {
            if let Input::Text(text) = input {
                log_validation_error(state_before.as_str(), text, reason, chat_id);
            }
            let keyboard = (state_before == ConversationState::AskDonationType).then(donation_type_keyboard);
            ctx.transport
                .send_text(chat_id, &format_feedback(FeedbackType::Error, reason), keyboard)
                .await?;
        }
        Transition::Rejected(Rejection::Unexpected) => {
            tracing::debug!("Chat {} sent {:?} in state {}", chat_id, input, state_before.as_str());
        }
    }

    Ok(transition)
}

async fn run_effect(ctx: &AppContext, session: &UserSession, effect: Effect) -> Result<(), HandlerError> {
    let chat_id = session.chat_id;
    match effect {
        Effect::Prompt(state) => {
            let keyboard = (state == ConversationState::AskDonationType).then(donation_type_keyboard);
            ctx.transport
                .send_text(chat_id, &registration_prompt(state, session.donation_type), keyboard)
                .await?;
        }
        Effect::RegistrationComplete => {
            ctx.transport.send_text(chat_id, &registration_summary(session), None).await?;
            let anchor = dates_anchor(session, today());
            if let Some(from) = anchor {
                ctx.transport.send_text(chat_id, &waiting_period_message(from), None).await?;
            }
            spawn_show_dates(ctx, chat_id, anchor);
        }
        Effect::ShowDates => spawn_show_dates(ctx, chat_id, dates_anchor(session, today())),
        Effect::ShowTimes(date) => spawn_show_times(ctx, chat_id, date),
        Effect::ConfirmBooking => {
            ctx.transport
                .send_text(chat_id, &confirm_message(session), Some(confirm_keyboard()))
                .await?;
        }
        Effect::StartBooking => {
            ctx.transport
                .send_text(
                    chat_id,
                    &format_feedback(
                        FeedbackType::Processing,
                        "Начинаю запись: открываю форму и заполняю данные. Через минуту пришлю капчу.",
                    ),
                    None,
                )
                .await?;
            spawn_begin_booking(ctx, chat_id);
        }
        Effect::SubmitCaptcha(text) => {
            ctx.transport
                .send_text(chat_id, &format_feedback(FeedbackType::Processing, "Отправляю форму..."), None)
                .await?;
            spawn_submit_captcha(ctx, chat_id, text);
        }
        Effect::CancelBooking => spawn_cancel_booking(ctx, chat_id),
        Effect::CaptchaTestPassed(text) => {
            let message = format!(
                "✅ Тест капчи успешен!\n\nВы ввели: \"{}\"\nДлина: {} символов",
                text,
                text.chars().count()
            );
            ctx.transport
                .send_text(chat_id, &message, Some(back_to_main_keyboard()))
                .await?;
        }
        Effect::ShowMain => {
            ctx.transport
                .send_text(chat_id, MAIN_MENU, Some(main_menu_keyboard()))
                .await?;
        }
    }
    Ok(())
}

pub const MAIN_MENU: &str = "🏠 Главное меню\n\n\
     📅 Нажмите кнопку ниже, чтобы посмотреть свободные даты.\n\
     ℹ️ /status покажет состояние проверки, /help перечислит команды.";

/// Scans dates on a spawned task and replies with the date buttons.
pub fn spawn_show_dates(ctx: &AppContext, chat_id: i64, anchor: Option<NaiveDate>) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = show_dates(&ctx, chat_id, anchor).await {
            tracing::warn!("Failed to show dates to chat {}: {}", chat_id, e);
        }
    });
}

pub async fn show_dates(ctx: &AppContext, chat_id: i64, anchor: Option<NaiveDate>) -> Result<(), HandlerError> {
    ctx.transport
        .send_text(
            chat_id,
            &format_feedback(FeedbackType::Processing, "Проверяю доступные даты..."),
            None,
        )
        .await?;

    match ctx.scanner.try_scan(anchor, today()).await {
        Ok(dates) if !dates.is_empty() => {
            ctx.poller.remember(chat_id, &dates);
            ctx.transport
                .send_text(chat_id, DATES_FOUND, Some(dates_keyboard(&dates)))
                .await?;
        }
        Ok(_) => {
            ctx.transport
                .send_text(chat_id, NO_DATES, Some(refresh_dates_keyboard()))
                .await?;
        }
        Err(e) => {
            tracing::warn!("Date scan for chat {} failed: {}", chat_id, e);
            ctx.transport
                .send_text(chat_id, SITE_UNAVAILABLE, Some(retry_dates_keyboard()))
                .await?;
        }
    }
    Ok(())
}

fn spawn_show_times(ctx: &AppContext, chat_id: i64, date: NaiveDate) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = show_times(&ctx, chat_id, date).await {
            tracing::warn!("Failed to show times to chat {}: {}", chat_id, e);
        }
    });
}

pub async fn show_times(ctx: &AppContext, chat_id: i64, date: NaiveDate) -> Result<(), HandlerError> {
    ctx.transport
        .send_text(
            chat_id,
            &format_feedback(
                FeedbackType::Processing,
                &format!("Проверяю свободное время на {}...", format_display_date(date)),
            ),
            None,
        )
        .await?;

    match ctx.scanner.try_scan_times(date).await {
        Ok(times) if !times.is_empty() => {
            ctx.transport
                .send_text(chat_id, &times_message(date, &times), Some(times_keyboard(date, &times)))
                .await?;
        }
        Ok(_) => {
            let text = format!(
                "😔 На {} свободного времени нет.\n\n💡 Выберите другую дату или обновите список позже.",
                format_display_date(date)
            );
            ctx.transport
                .send_text(chat_id, &text, Some(no_times_keyboard(date)))
                .await?;
        }
        Err(e) => {
            tracing::warn!("Time scan for chat {} on {} failed: {}", chat_id, date, e);
            ctx.transport
                .send_text(chat_id, SITE_UNAVAILABLE, Some(no_times_keyboard(date)))
                .await?;
        }
    }
    Ok(())
}

fn spawn_begin_booking(ctx: &AppContext, chat_id: i64) {
    let orchestrator = ctx.orchestrator.clone();
    tokio::spawn(async move {
        // Failures were already reported to the user by the orchestrator.
        if let Err(e) = orchestrator.begin(chat_id).await {
            tracing::warn!("Booking for chat {} did not reach the captcha: {}", chat_id, e);
        }
    });
}

fn spawn_submit_captcha(ctx: &AppContext, chat_id: i64, text: String) {
    let orchestrator = ctx.orchestrator.clone();
    tokio::spawn(async move {
        match orchestrator.submit(chat_id, &text).await {
            Ok(SubmitOutcome::Booked) => log_booking_phase(chat_id, "booked", None),
            Ok(SubmitOutcome::Retry { attempt }) => {
                log_booking_phase(chat_id, "captcha retry", Some(&format!("attempt {attempt}")))
            }
            Ok(SubmitOutcome::Rejected(reason)) => log_booking_phase(chat_id, "rejected", Some(&reason)),
            Err(e) => tracing::warn!("Captcha submission for chat {} failed: {}", chat_id, e),
        }
    });
}

/// Force-cancels the user's booking round on a spawned task.
pub fn spawn_cancel_booking(ctx: &AppContext, chat_id: i64) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let reply = match ctx.orchestrator.cancel(chat_id).await {
            Ok(true) => ctx
                .transport
                .send_text(chat_id, BOOKING_DECLINED, Some(refresh_dates_keyboard()))
                .await,
            Ok(false) => {
                CommandFeedback::new(ctx.transport.clone(), chat_id)
                    .info(NOTHING_TO_CANCEL)
                    .await
            }
            Err(e) => {
                tracing::error!("Failed to cancel booking for chat {}: {}", chat_id, e);
                CommandFeedback::new(ctx.transport.clone(), chat_id)
                    .error(&e.user_message())
                    .await
            }
        };
        if let Err(e) = reply {
            tracing::warn!("Failed to confirm cancellation to chat {}: {}", chat_id, e);
        }
    });
}

fn registration_summary(session: &UserSession) -> String {
    format!(
        "✅ Спасибо за регистрацию!\n\n\
         📋 Ваши данные сохранены:\n\
         👤 ФИО: {}\n\
         📞 Телефон: {}\n\
         📧 Email: {}\n\
         🎂 Дата рождения: {}\n\
         🆔 СНИЛС: {}",
        session.donor.name.as_deref().unwrap_or_default(),
        session.donor.phone.as_deref().unwrap_or_default(),
        session.donor.email.as_deref().unwrap_or_default(),
        session.donor.birth_date.as_deref().unwrap_or_default(),
        session.donor.snils.as_deref().unwrap_or_default(),
    )
}

pub fn waiting_period_message(from: NaiveDate) -> String {
    format!(
        "⏳ Период ожидания\n\n\
         📅 Записаться можно не раньше {}.\n\n\
         🔍 Я буду проверять доступные даты начиная с этого числа и сообщу, когда появятся свободные места.",
        format_ru_date(from)
    )
}

fn confirm_message(session: &UserSession) -> String {
    format!(
        "📋 Подтвердите запись\n\n\
         📅 Дата: {}\n\
         ⏰ Время: {}\n\
         👤 {}\n\
         📞 {}\n\n\
         Записать вас на это время?",
        session.selected_date.map(format_display_date).unwrap_or_default(),
        session.selected_time.map(format_time).unwrap_or_default(),
        session.donor.name.as_deref().unwrap_or_default(),
        session.donor.phone.as_deref().unwrap_or_default(),
    )
}
