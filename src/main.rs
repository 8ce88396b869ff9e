//! # Donor Booking Bot Main Entry Point
//!
//! Initializes logging, loads configuration, sets up the session store and
//! the browser pool, starts the poller and the idle-session reaper, and runs
//! the Telegram bot next to the health endpoint.

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use donor_booking_bot::booking::{BookingOrchestrator, BookingSettings};
use donor_booking_bot::bot::handlers::{AppContext, BotHandler};
use donor_booking_bot::bot::transport::{CaptchaRequester, TelegramTransport, Transport};
use donor_booking_bot::browser::chromium::ChromiumLauncher;
use donor_booking_bot::browser::sessions::BrowserSessionManager;
use donor_booking_bot::browser::BrowserPool;
use donor_booking_bot::config::Config;
use donor_booking_bot::database::connection::DatabaseManager;
use donor_booking_bot::scanner::Scanner;
use donor_booking_bot::services::{AvailabilityPoller, HealthService, PollerService, ReaperService};
use donor_booking_bot::utils::logging::{install_panic_hook, log_system_event};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "donor_booking_bot=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut fault_rx = install_panic_hook();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!("Starting Donor Booking Bot v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded - Database: {}, HTTP Port: {}, check every {} min, {} browsers max",
        config.database_url,
        config.http_port,
        config.check_interval.as_secs() / 60,
        config.max_browsers
    );

    // Initialize database
    info!("Initializing database connection...");
    let db_manager = DatabaseManager::new(&config.database_url).await?;
    db_manager.run_migrations().await?;
    let db_arc = Arc::new(db_manager);
    info!("Database initialized successfully");

    // Browser pool shared by scans and booking sessions
    let launcher = Arc::new(ChromiumLauncher::new(config.browser_headless, config.chrome_path.clone()));
    let pool = BrowserPool::new(launcher, config.max_browsers);
    let sessions = Arc::new(BrowserSessionManager::new(pool.clone()));
    let scanner = Scanner::new(pool);

    let bot = Bot::new(&config.bot_token);
    let telegram = Arc::new(TelegramTransport::new(bot.clone()));
    let transport: Arc<dyn Transport> = telegram.clone();
    let captcha: Arc<dyn CaptchaRequester> = telegram;

    let mut settings = BookingSettings::new(config.captcha_dir.clone(), config.captcha_max_attempts);
    settings.operator_chat_id = Some(config.operator_chat_id);
    let orchestrator = Arc::new(BookingOrchestrator::new(
        db_arc.pool.clone(),
        sessions.clone(),
        transport.clone(),
        captcha,
        settings,
    ));

    let poller = AvailabilityPoller::new(db_arc.pool.clone(), scanner.clone(), transport.clone());
    let handler = BotHandler::new(AppContext {
        db: db_arc.pool.clone(),
        transport: transport.clone(),
        orchestrator: orchestrator.clone(),
        scanner,
        poller: poller.clone(),
    });

    // Background services
    let mut poller_service = PollerService::new(poller, config.check_interval)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create poller service: {}", e))?;
    if let Err(e) = poller_service.start().await {
        tracing::error!("Failed to start poller service: {}", e);
    }

    let mut reaper_service = ReaperService::new(orchestrator.clone(), config.captcha_idle)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create reaper service: {}", e))?;
    if let Err(e) = reaper_service.start().await {
        tracing::error!("Failed to start reaper service: {}", e);
    }

    // Health endpoint
    let health_service = HealthService::new(db_arc.clone(), sessions.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to port {}: {}", config.http_port, e))?;
    info!("Health check server starting on port {}", config.http_port);

    notify_operator(transport.as_ref(), config.operator_chat_id, "🚀 Бот запущен").await;

    let bot_task = tokio::spawn(async move {
        Dispatcher::builder(bot, handler.schema())
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    });

    let health_task = tokio::spawn(async move {
        let router = health_service.router.layer(TraceLayer::new_for_http());
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("Health server error: {}", e);
        }
    });

    // Wait for either task to complete or a fault (which would indicate shutdown)
    let mut fault = None;
    tokio::select! {
        result = bot_task => {
            if let Err(e) = result {
                tracing::error!("Bot task error: {}", e);
            }
        }
        result = health_task => {
            if let Err(e) = result {
                tracing::error!("Health task error: {}", e);
            }
        }
        Some(reason) = fault_rx.recv() => {
            log_system_event("fault", Some(&reason));
            fault = Some(reason);
        }
    }

    log_system_event("shutting down", None);
    if let Err(e) = poller_service.stop().await {
        tracing::warn!("Error stopping poller service: {}", e);
    }
    if let Err(e) = reaper_service.stop().await {
        tracing::warn!("Error stopping reaper service: {}", e);
    }

    let closed = sessions.close_all().await;
    log_system_event("browser sessions closed", Some(&closed.to_string()));
    notify_operator(transport.as_ref(), config.operator_chat_id, "🛑 Бот остановлен").await;

    info!("Application stopped");
    match fault {
        Some(reason) => Err(anyhow::anyhow!("Stopped after a fault: {}", reason)),
        None => Ok(()),
    }
}

async fn notify_operator(transport: &dyn Transport, chat_id: i64, text: &str) {
    if let Err(e) = transport.send_text(chat_id, text, None).await {
        tracing::warn!("Failed to notify operator: {}", e);
    }
}
