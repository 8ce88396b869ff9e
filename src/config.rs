use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DATABASE_URL: &str = "sqlite:./data/donor-bot.db";

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    /// Operator chat for startup, shutdown and site-layout alerts
    pub operator_chat_id: i64,
    pub check_interval: Duration,
    pub database_url: String,
    pub http_port: u16,
    pub browser_headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub max_browsers: usize,
    pub captcha_max_attempts: u32,
    pub captcha_idle: Duration,
    pub captcha_dir: PathBuf,
}

/// Trimmed value of `name`, `None` when unset or blank.
fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match optional_var(name) {
        Some(value) => value.parse().map_err(|_| anyhow!("Invalid {name}: {value}")),
        None => Ok(default),
    }
}

fn positive_var<T: FromStr + PartialOrd + From<u8>>(name: &str, default: T) -> Result<T> {
    let value = parsed_var(name, default)?;
    if value < T::from(1) {
        return Err(anyhow!("Invalid {name}: must be at least 1"));
    }
    Ok(value)
}

fn bool_var(name: &str, default: bool) -> Result<bool> {
    match optional_var(name).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(anyhow!("Invalid {name}: {v}")),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bot_token = optional_var("BOT_TOKEN").ok_or_else(|| anyhow!("BOT_TOKEN must be set"))?;

        let operator = optional_var("TELEGRAM_USER_ID").ok_or_else(|| anyhow!("TELEGRAM_USER_ID must be set"))?;
        let operator_chat_id = operator
            .parse()
            .map_err(|_| anyhow!("Invalid TELEGRAM_USER_ID: {operator}"))?;

        let check_minutes: u64 = positive_var("CHECK_INTERVAL_MINUTES", 60)?;
        let http_port = parsed_var("HTTP_PORT", 3000u16)?;
        let max_browsers: usize = positive_var("MAX_BROWSERS", 4usize)?;
        let captcha_max_attempts: u32 = positive_var("CAPTCHA_MAX_ATTEMPTS", 5)?;
        let captcha_idle_minutes: u64 = positive_var("CAPTCHA_IDLE_MINUTES", 10)?;

        Ok(Config {
            bot_token,
            operator_chat_id,
            check_interval: Duration::from_secs(check_minutes * 60),
            database_url: Self::database_url_from_env(),
            http_port,
            browser_headless: bool_var("BROWSER_HEADLESS", true)?,
            chrome_path: optional_var("CHROME_PATH").map(PathBuf::from),
            max_browsers,
            captcha_max_attempts,
            captcha_idle: Duration::from_secs(captcha_idle_minutes * 60),
            captcha_dir: optional_var("CAPTCHA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("donor-captcha")),
        })
    }

    /// `DATABASE_URL` or the default; needs no bot credentials.
    pub fn database_url_from_env() -> String {
        optional_var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
    }
}
