use crate::booking::state::start_captcha_test;
use crate::bot::handlers::conversation::spawn_cancel_booking;
use crate::bot::handlers::{AppContext, HandlerResult};
use crate::bot::keyboards::captcha_test_keyboard;
use crate::database::models::UserSession;
use crate::utils::feedback::CommandFeedback;

pub const CAPTCHA_TEST_PROMPT: &str = "🧪 Тест ввода капчи\n\n\
     Введите любой текст так, как ввели бы капчу с картинки.\n\
     Бот покажет, что получил.";

pub async fn handle_test_captcha(ctx: &AppContext, chat_id: i64) -> HandlerResult {
    let mut session = UserSession::find_or_new(&ctx.db, chat_id).await?;

    if !start_captcha_test(&mut session) {
        CommandFeedback::new(ctx.transport.clone(), chat_id)
            .warning("Тест недоступен: сначала завершите регистрацию или текущую запись.")
            .await?;
        return Ok(());
    }

    session.save(&ctx.db).await?;
    ctx.transport
        .send_text(chat_id, CAPTCHA_TEST_PROMPT, Some(captcha_test_keyboard()))
        .await?;
    Ok(())
}

pub async fn handle_cancel(ctx: &AppContext, chat_id: i64) -> HandlerResult {
    CommandFeedback::new(ctx.transport.clone(), chat_id)
        .processing("Отменяю запись...")
        .await?;
    spawn_cancel_booking(ctx, chat_id);
    Ok(())
}
