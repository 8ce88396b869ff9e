use crate::booking::state::begin_registration;
use crate::bot::handlers::conversation::{dates_anchor, spawn_show_dates, waiting_period_message};
use crate::bot::handlers::{AppContext, HandlerResult};
use crate::bot::keyboards::{donation_type_keyboard, registration_prompt};
use crate::database::models::{ConversationState, UserSession};
use crate::utils::datetime::today;
use crate::utils::feedback::CommandFeedback;

/// Starts registration for new users; registered users get the dates list,
/// or the waiting period while they cannot donate yet.
pub async fn handle_start(ctx: &AppContext, chat_id: i64) -> HandlerResult {
    let mut session = UserSession::find_or_new(&ctx.db, chat_id).await?;
    let feedback = CommandFeedback::new(ctx.transport.clone(), chat_id);

    if session.state.in_captcha_round() {
        feedback
            .warning("Сейчас идёт запись. Введите капчу или отмените запись командой /cancel.")
            .await?;
        return Ok(());
    }

    if !session.is_registered() {
        begin_registration(&mut session);
        session.save(&ctx.db).await?;

        ctx.transport
            .send_text(chat_id, "Здравствуйте! Расскажите немного о себе:", None)
            .await?;
        ctx.transport
            .send_text(
                chat_id,
                &registration_prompt(ConversationState::AskDonationType, None),
                Some(donation_type_keyboard()),
            )
            .await?;
        return Ok(());
    }

    session.selected_date = None;
    session.selected_time = None;
    session.state = ConversationState::SelectingDate;
    session.save(&ctx.db).await?;

    let anchor = dates_anchor(&session, today());
    if let Some(from) = anchor {
        ctx.transport
            .send_text(chat_id, &waiting_period_message(from), None)
            .await?;
    }
    spawn_show_dates(ctx, chat_id, anchor);
    Ok(())
}
