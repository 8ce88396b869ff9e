use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use super::conversation::handle_input;
use super::{AppContext, HandlerError, HandlerResult};
use crate::booking::{Input, Rejection, Transition};
use crate::bot::commands::{self, Command};
use crate::utils::feedback::CommandFeedback;
use crate::utils::logging::{log_command_error, log_command_start, log_database_error};

fn sender_name(msg: &Message) -> String {
    msg.from()
        .and_then(|user| user.username.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn command_handler(bot: Bot, msg: Message, cmd: Command, ctx: AppContext) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    log_command_start(&format!("{cmd:?}"), &sender_name(&msg), chat_id, None);

    if let Err(e) = run_command(&ctx, chat_id, cmd.clone()).await {
        match &e {
            HandlerError::Database(db) => log_database_error(&format!("{cmd:?}"), &db.to_string(), chat_id),
            HandlerError::Transport(_) => log_command_error(&format!("{cmd:?}"), chat_id, &e.to_string()),
        }
        bot.send_message(msg.chat.id, "❌ Произошла ошибка. Попробуйте ещё раз.")
            .await?;
    }
    Ok(())
}

pub async fn run_command(ctx: &AppContext, chat_id: i64, cmd: Command) -> HandlerResult {
    match cmd {
        Command::Start => commands::start::handle_start(ctx, chat_id).await,
        Command::StartCheck => commands::checking::handle_start_check(ctx, chat_id).await,
        Command::StopCheck => commands::checking::handle_stop_check(ctx, chat_id).await,
        Command::Status => commands::checking::handle_status(ctx, chat_id).await,
        Command::TestCaptcha => commands::booking::handle_test_captcha(ctx, chat_id).await,
        Command::Cancel => commands::booking::handle_cancel(ctx, chat_id).await,
        Command::Help => {
            ctx.transport
                .send_text(chat_id, &Command::descriptions().to_string(), None)
                .await?;
            Ok(())
        }
    }
}

pub async fn text_handler(bot: Bot, msg: Message, ctx: AppContext) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0;

    if let Err(e) = run_text(&ctx, chat_id, text).await {
        tracing::error!("Handling text from chat {} failed: {}", chat_id, e);
        bot.send_message(msg.chat.id, "❌ Произошла ошибка. Попробуйте ещё раз.")
            .await?;
    }
    Ok(())
}

/// Routes free text into the conversation; hints when nothing expects it.
pub async fn run_text(ctx: &AppContext, chat_id: i64, text: &str) -> HandlerResult {
    let transition = handle_input(ctx, chat_id, Input::Text(text)).await?;
    if transition != Transition::Rejected(Rejection::Unexpected) {
        return Ok(());
    }

    let feedback = CommandFeedback::new(ctx.transport.clone(), chat_id);
    if text.starts_with('/') {
        let command = text.split_whitespace().next().unwrap_or(text);
        feedback
            .validation_error(&format!("Неизвестная команда: {command}"), "Список команд: /help")
            .await?;
    } else {
        feedback
            .info("Я жду нажатия кнопки. /start покажет доступные даты, /help перечислит команды.")
            .await?;
    }
    Ok(())
}
