use teloxide::prelude::*;

use super::conversation::handle_input;
use super::AppContext;
use crate::booking::{Action, Input, Rejection, Transition};

pub async fn callback_handler(bot: Bot, q: CallbackQuery, ctx: AppContext) -> ResponseResult<()> {
    let username = q.from.username.as_deref().unwrap_or("unknown");
    let chat_id = q
        .message
        .as_ref()
        .map(|m| m.chat.id.0)
        .unwrap_or(q.from.id.0 as i64);

    let Some(data) = q.data.as_deref() else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };
    tracing::info!("Callback received: '{}' from {} in chat {}", data, username, chat_id);

    let Some(action) = Action::parse(data) else {
        bot.answer_callback_query(q.id.clone())
            .text("Неизвестная кнопка")
            .await?;
        return Ok(());
    };

    match handle_input(&ctx, chat_id, Input::Action(action)).await {
        Ok(Transition::Rejected(Rejection::Unexpected)) => {
            bot.answer_callback_query(q.id.clone())
                .text("Эта кнопка сейчас неактивна")
                .await?;
        }
        Ok(_) => {
            bot.answer_callback_query(q.id.clone()).await?;
        }
        Err(e) => {
            tracing::error!("Callback '{}' for chat {} failed: {}", data, chat_id, e);
            bot.answer_callback_query(q.id.clone())
                .text("Произошла ошибка, попробуйте ещё раз")
                .await?;
        }
    }

    Ok(())
}
