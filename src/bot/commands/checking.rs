use crate::bot::handlers::conversation::dates_anchor;
use crate::bot::handlers::{AppContext, HandlerResult};
use crate::database::models::UserSession;
use crate::utils::datetime::{format_ru_date, today};
use crate::utils::feedback::CommandFeedback;

pub async fn handle_start_check(ctx: &AppContext, chat_id: i64) -> HandlerResult {
    let mut session = UserSession::find_or_new(&ctx.db, chat_id).await?;
    let feedback = CommandFeedback::new(ctx.transport.clone(), chat_id);

    if session.checking_enabled {
        feedback.info("Фоновая проверка уже работает.").await?;
        return Ok(());
    }

    session.checking_enabled = true;
    session.save(&ctx.db).await?;
    feedback.success("Фоновая проверка снова активна.").await?;
    Ok(())
}

pub async fn handle_stop_check(ctx: &AppContext, chat_id: i64) -> HandlerResult {
    let mut session = UserSession::find_or_new(&ctx.db, chat_id).await?;
    session.checking_enabled = false;
    session.save(&ctx.db).await?;
    ctx.poller.forget(chat_id);

    CommandFeedback::new(ctx.transport.clone(), chat_id)
        .info("Фоновая проверка остановлена. Включить снова: /startcheck")
        .await?;
    Ok(())
}

pub async fn handle_status(ctx: &AppContext, chat_id: i64) -> HandlerResult {
    let session = UserSession::find_or_new(&ctx.db, chat_id).await?;
    let browser_open = ctx.orchestrator.sessions().session_id(chat_id).is_some();
    ctx.transport
        .send_text(chat_id, &status_message(&session, browser_open), None)
        .await?;
    Ok(())
}

pub fn status_message(session: &UserSession, browser_open: bool) -> String {
    let checking = if session.checking_enabled { "активна" } else { "остановлена" };
    let mut lines = vec![
        "📊 Статус".to_string(),
        String::new(),
        format!("🔍 Фоновая проверка: {checking}"),
    ];

    if !session.is_registered() {
        lines.push("📝 Регистрация не завершена: /start".to_string());
        return lines.join("\n");
    }

    if let (Some(kind), Some(last)) = (session.donation_type, session.last_donation_date) {
        lines.push(format!("🩸 Последняя донация: {} ({})", format_ru_date(last), kind.display_accusative()));
    }
    match dates_anchor(session, today()) {
        Some(from) => lines.push(format!("⏳ Записаться можно с {}", format_ru_date(from))),
        None => lines.push("✅ Можно записываться".to_string()),
    }

    if session.state.in_captcha_round() {
        lines.push(format!(
            "🔤 Идёт запись, ожидается капча (попытка {})",
            session.captcha_attempts.max(1)
        ));
    }
    if browser_open {
        lines.push("🌐 Браузер записи открыт".to_string());
    }
    lines.join("\n")
}
