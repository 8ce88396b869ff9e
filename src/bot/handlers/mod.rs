pub mod callback;
pub mod conversation;
pub mod message;

use sqlx::SqlitePool;
use std::sync::Arc;
use teloxide::{dispatching::UpdateHandler, prelude::*};
use thiserror::Error;

use crate::booking::BookingOrchestrator;
use crate::bot::commands::Command;
use crate::bot::transport::{Transport, TransportError};
use crate::scanner::Scanner;
use crate::services::poller::AvailabilityPoller;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type HandlerResult = Result<(), HandlerError>;

/// Everything a handler needs, cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct AppContext {
    pub db: SqlitePool,
    pub transport: Arc<dyn Transport>,
    pub orchestrator: Arc<BookingOrchestrator>,
    pub scanner: Scanner,
    pub poller: AvailabilityPoller,
}

type SchemaError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub struct BotHandler {
    pub ctx: AppContext,
}

impl BotHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub fn schema(&self) -> UpdateHandler<SchemaError> {
        let ctx_command = self.ctx.clone();
        let ctx_text = self.ctx.clone();
        let ctx_callback = self.ctx.clone();

        dptree::entry()
            .branch(
                Update::filter_message()
                    .filter_command::<Command>()
                    .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
                        let ctx = ctx_command.clone();
                        async move {
                            message::command_handler(bot, msg, cmd, ctx).await?;
                            Ok::<(), SchemaError>(())
                        }
                    }),
            )
            .branch(Update::filter_message().endpoint(move |bot: Bot, msg: Message| {
                let ctx = ctx_text.clone();
                async move {
                    message::text_handler(bot, msg, ctx).await?;
                    Ok::<(), SchemaError>(())
                }
            }))
            .branch(Update::filter_callback_query().endpoint(move |bot: Bot, q: CallbackQuery| {
                let ctx = ctx_callback.clone();
                async move {
                    callback::callback_handler(bot, q, ctx).await?;
                    Ok::<(), SchemaError>(())
                }
            }))
    }
}
