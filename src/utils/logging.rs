use tracing::{debug, error, info, warn};

/// Logs command start with consistent format
pub fn log_command_start(command: &str, user: &str, chat_id: i64, details: Option<&str>) {
    match details {
        Some(d) => info!("CMD_START: {} by {} in chat {} - {}", command, user, chat_id, d),
        None => info!("CMD_START: {} by {} in chat {}", command, user, chat_id),
    }
}

/// Logs command errors with consistent format
pub fn log_command_error(command: &str, chat_id: i64, error: &str) {
    error!("CMD_ERROR: {} in chat {} - {}", command, chat_id, error);
}

/// Logs rejected conversation input
pub fn log_validation_error(state: &str, value: &str, error: &str, chat_id: i64) {
    warn!(
        "VALIDATION_ERROR: state '{}' rejected '{}': {} - chat {}",
        state, value, error, chat_id
    );
}

/// Logs a booking orchestrator phase transition
pub fn log_booking_phase(chat_id: i64, phase: &str, details: Option<&str>) {
    match details {
        Some(d) => info!("BOOKING: chat {} -> {} - {}", chat_id, phase, d),
        None => info!("BOOKING: chat {} -> {}", chat_id, phase),
    }
}

/// Logs browser session lifecycle events
pub fn log_browser_event(event: &str, chat_id: Option<i64>, details: Option<&str>) {
    match (chat_id, details) {
        (Some(id), Some(d)) => debug!("BROWSER: {} for chat {} - {}", event, id, d),
        (Some(id), None) => debug!("BROWSER: {} for chat {}", event, id),
        (None, Some(d)) => debug!("BROWSER: {} - {}", event, d),
        (None, None) => debug!("BROWSER: {}", event),
    }
}

/// Logs the outcome of an availability scan
pub fn log_scan_result(anchor: &str, dates_found: usize, error: Option<&str>) {
    match error {
        Some(e) => warn!("SCAN_FAILED: anchor {} - {}", anchor, e),
        None => info!("SCAN: anchor {} - {} dates with free slots", anchor, dates_found),
    }
}

/// Logs database errors with consistent format
pub fn log_database_error(operation: &str, error: &str, chat_id: i64) {
    error!("DB_ERROR: {} for chat {} failed: {}", operation, chat_id, error);
}

/// Logs timeout events with consistent format
pub fn log_timeout(operation: &str, duration_secs: u64, details: Option<&str>) {
    match details {
        Some(d) => warn!("TIMEOUT: {} after {}s - {}", operation, duration_secs, d),
        None => warn!("TIMEOUT: {} after {}s", operation, duration_secs),
    }
}

/// Logs system events with consistent format
pub fn log_system_event(event: &str, details: Option<&str>) {
    match details {
        Some(d) => info!("SYSTEM: {} - {}", event, d),
        None => info!("SYSTEM: {}", event),
    }
}

/// Logs every panic and forwards its message on the returned channel, so
/// the main loop can run its shutdown path.
pub fn install_panic_hook() -> tokio::sync::mpsc::UnboundedReceiver<String> {
    let (fault_tx, fault_rx) = tokio::sync::mpsc::unbounded_channel();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!("PANIC: {}", panic_info);
        let _ = fault_tx.send(panic_info.to_string());
        default_hook(panic_info);
    }));
    fault_rx
}
