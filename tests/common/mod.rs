#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use donor_booking_bot::bot::transport::{
    CaptchaRequester, Keyboard, Transport, TransportResult,
};
use donor_booking_bot::browser::{BrowserError, BrowserLauncher, BrowserPage, BrowserResult};
use donor_booking_bot::database::connection::DatabaseManager;
use donor_booking_bot::database::models::{ConversationState, DonationType, UserSession};
use donor_booking_bot::site::{self, scripts};

/// One calendar month as the widget renders it.
#[derive(Debug, Clone)]
pub struct FakeMonth {
    pub name: &'static str,
    pub year: &'static str,
    /// `(day text, classes)`
    pub cells: Vec<(String, String)>,
}

impl FakeMonth {
    /// Days `open` are bookable, every other day up to `days` is `busy`.
    pub fn new(name: &'static str, year: &'static str, days: u32, open: &[u32]) -> Self {
        let cells = (1..=days)
            .map(|d| {
                let classes = if open.contains(&d) {
                    "donorform-calendar__day".to_string()
                } else {
                    "donorform-calendar__day busy".to_string()
                };
                (d.to_string(), classes)
            })
            .collect();
        Self { name, year, cells }
    }
}

/// Mutable behaviour and counters of the fake booking site.
#[derive(Debug, Default)]
pub struct SiteState {
    pub months: Vec<FakeMonth>,
    pub month_index: usize,
    /// Month navigation clicks are ignored
    pub nav_stuck: bool,
    /// Interval markup by `yyyy-mm-dd`
    pub intervals: HashMap<String, String>,
    pub modal: bool,
    pub offline: bool,
    pub widget_works: bool,
    pub direct_url_works: bool,
    pub captcha_present: bool,
    pub alive: bool,
    pub form_open: bool,
    pub snapshots: VecDeque<Value>,
    /// The input mask swallows typed characters
    pub typing_ignored: bool,
    /// DOM-level value assignment does not stick
    pub script_value_ignored: bool,
    /// No submit selector matches a visible button
    pub submit_hidden: bool,
    /// The submit fallback script finds neither a button nor a form
    pub form_missing: bool,
    /// Every navigation takes this long
    pub goto_delay: Duration,

    pub launches: usize,
    pub closes: usize,
    pub gotos: Vec<String>,
    /// `(page id, selector, value)`
    pub fills: Vec<(usize, String, String)>,
    /// `(page id, path)`
    pub screenshots: Vec<(usize, PathBuf)>,
    pub submits: usize,
    pub fields: HashMap<String, String>,
}

#[derive(Clone)]
pub struct FakeSite {
    pub state: Arc<Mutex<SiteState>>,
}

impl FakeSite {
    /// A site with March and April 2024, where the widget, the direct URL
    /// and the captcha all work.
    pub fn new() -> Self {
        let state = SiteState {
            months: vec![
                FakeMonth::new("Март", "2024", 31, &[15]),
                FakeMonth::new("Апрель", "2024", 30, &[]),
            ],
            widget_works: true,
            direct_url_works: true,
            captcha_present: true,
            alive: true,
            ..Default::default()
        };
        let site = Self {
            state: Arc::new(Mutex::new(state)),
        };
        site.set_slots("2024-03-15", "09:00 <span class=\"count\">(2)</span> 13:30 <span class=\"count\">(1)</span>");
        site
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut SiteState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn set_slots(&self, date: &str, markup: &str) {
        self.with(|s| s.intervals.insert(date.to_string(), markup.to_string()));
    }

    pub fn open_day(&self, month_index: usize, day: u32) {
        self.with(|s| {
            if let Some(cell) = s.months[month_index].cells.get_mut(day as usize - 1) {
                cell.1 = "donorform-calendar__day".to_string();
            }
        });
    }

    pub fn push_snapshot(&self, snapshot: Value) {
        self.with(|s| s.snapshots.push_back(snapshot));
    }

    pub fn launcher(&self) -> Arc<FakeLauncher> {
        Arc::new(FakeLauncher { site: self.clone() })
    }

    pub fn fill_count(&self, selector: &str) -> usize {
        self.with(|s| s.fills.iter().filter(|(_, sel, _)| sel == selector).count())
    }
}

pub fn success_snapshot() -> Value {
    json!({
        "url": site::FORM_URL,
        "success_text": "Заявка отправлена",
        "error_text": null,
        "body_text": "Заявка отправлена",
        "captcha_field": null
    })
}

pub fn captcha_error_snapshot() -> Value {
    json!({
        "url": site::FORM_URL,
        "success_text": null,
        "error_text": "Неверный код с картинки",
        "body_text": "",
        "captcha_field": ""
    })
}

pub fn fatal_snapshot(message: &str) -> Value {
    json!({
        "url": site::FORM_URL,
        "success_text": null,
        "error_text": message,
        "body_text": "",
        "captcha_field": "abc"
    })
}

pub struct FakeLauncher {
    pub site: FakeSite,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserPage>> {
        let id = self.site.with(|s| {
            s.launches += 1;
            s.month_index = 0;
            s.form_open = false;
            s.launches
        });
        Ok(Box::new(FakePage {
            id,
            site: self.site.clone(),
        }))
    }
}

pub struct FakePage {
    pub id: usize,
    site: FakeSite,
}

/// JSON literal found between `before` and `after` in a generated script.
fn script_literal(script: &str, before: &str, after: &str) -> Option<String> {
    let start = script.find(before)? + before.len();
    let rest = script.get(start..)?;
    let end = rest.find(after)?;
    serde_json::from_str(&rest[..end]).ok()
}

fn date_param(script: &str) -> Option<String> {
    let start = script.find("date=")? + "date=".len();
    script.get(start..start + 10).map(str::to_string)
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str) -> BrowserResult<()> {
        let delay = self.site.with(|s| s.goto_delay);
        tokio::time::sleep(delay).await;
        self.site.with(|s| {
            s.gotos.push(url.to_string());
            if s.offline {
                return Err(BrowserError::Navigation {
                    url: url.to_string(),
                    reason: "net::ERR_CONNECTION_REFUSED".to_string(),
                });
            }
            s.month_index = 0;
            s.form_open = url.contains("date=") && s.direct_url_works;
            Ok(())
        })
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        let found = self.site.with(|s| match selector {
            site::MODAL => s.modal,
            site::CALENDARS => !s.months.is_empty(),
            site::NAME_FIELD => s.form_open,
            site::CAPTCHA_IMAGE => s.form_open && s.captcha_present,
            _ => true,
        });
        if found {
            Ok(())
        } else {
            Err(BrowserError::Timeout {
                what: selector.to_string(),
                secs: timeout.as_secs(),
            })
        }
    }

    async fn is_visible(&self, selector: &str) -> BrowserResult<bool> {
        Ok(self.site.with(|s| {
            if site::MODAL_CLOSE_SELECTORS.contains(&selector) {
                s.modal
            } else {
                selector == site::SUBMIT_SELECTORS[0] && s.form_open && !s.submit_hidden
            }
        }))
    }

    async fn click(&self, selector: &str) -> BrowserResult<()> {
        self.site.with(|s| {
            match selector {
                site::NEXT_MONTH if !s.nav_stuck => {
                    s.month_index = (s.month_index + 1).min(s.months.len().saturating_sub(1));
                }
                site::PREV_MONTH if !s.nav_stuck => {
                    s.month_index = s.month_index.saturating_sub(1);
                }
                _ if site::SUBMIT_SELECTORS.contains(&selector) => s.submits += 1,
                _ if site::MODAL_CLOSE_SELECTORS.contains(&selector) => s.modal = false,
                _ => {}
            }
            Ok(())
        })
    }

    async fn fill(&self, selector: &str, value: &str) -> BrowserResult<()> {
        self.site.with(|s| {
            s.fills.push((self.id, selector.to_string(), value.to_string()));
            s.fields.insert(selector.to_string(), value.to_string());
        });
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> BrowserResult<()> {
        self.site.with(|s| {
            if !s.typing_ignored {
                s.fields.entry(selector.to_string()).or_default().push_str(text);
            }
        });
        Ok(())
    }

    async fn press_key(&self, _selector: &str, _key: &str) -> BrowserResult<()> {
        Ok(())
    }

    async fn input_value(&self, selector: &str) -> BrowserResult<Option<String>> {
        Ok(self.site.with(|s| s.fields.get(selector).cloned()))
    }

    async fn evaluate(&self, script: &str) -> BrowserResult<Value> {
        let tag = site::script_tag(script).map(str::to_string);
        self.site.with(|s| {
            if !s.alive {
                return Err(BrowserError::Script("page crashed".to_string()));
            }
            let value = match tag.as_deref() {
                Some(scripts::CALENDAR) => {
                    let month = &s.months[s.month_index];
                    json!({
                        "month": month.name,
                        "year": month.year,
                        "cells": month.cells.iter()
                            .map(|(text, classes)| json!({"text": text, "classes": classes}))
                            .collect::<Vec<_>>(),
                    })
                }
                Some(scripts::INTERVALS) => {
                    let markup = date_param(script)
                        .and_then(|d| s.intervals.get(&d).cloned())
                        .unwrap_or_default();
                    Value::String(markup)
                }
                Some(scripts::SELECT_DAY) => Value::Bool(s.widget_works),
                Some(scripts::SELECT_TIME) => {
                    if s.widget_works {
                        s.form_open = true;
                    }
                    Value::Bool(s.widget_works)
                }
                Some(scripts::SET_VALUE) => {
                    let selector = script_literal(script, "document.querySelector(", ");");
                    let value = script_literal(script, "el.value = ", ";");
                    match (selector, value) {
                        (Some(selector), Some(value)) => {
                            if !s.script_value_ignored {
                                s.fields.insert(selector.clone(), value);
                            }
                            s.fields.get(&selector).cloned().map_or(Value::Null, Value::String)
                        }
                        _ => Value::Null,
                    }
                }
                Some(scripts::SUBMIT_FALLBACK) => {
                    if s.form_missing {
                        Value::Null
                    } else {
                        s.submits += 1;
                        Value::String("form".to_string())
                    }
                }
                Some(scripts::SNAPSHOT) => s.snapshots.pop_front().unwrap_or(Value::Null),
                _ => json!(2),
            };
            Ok(value)
        })
    }

    async fn screenshot_element(&self, _selector: &str, path: &Path) -> BrowserResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, b"png").await?;
        self.site.with(|s| s.screenshots.push((self.id, path.to_path_buf())));
        Ok(())
    }

    async fn close(&self) -> BrowserResult<()> {
        self.site.with(|s| s.closes += 1);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub chat_id: i64,
    pub text: String,
    pub keyboard: Option<Keyboard>,
    pub photo: Option<PathBuf>,
}

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<Sent>>,
}

impl RecordingTransport {
    pub fn messages(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.text).collect()
    }

    pub fn photos(&self) -> Vec<Sent> {
        self.messages().into_iter().filter(|m| m.photo.is_some()).collect()
    }

    /// Waits until some message satisfies `pred`, for spawned handlers.
    pub async fn wait_for(&self, pred: impl Fn(&Sent) -> bool) -> Sent {
        for _ in 0..200 {
            if let Some(found) = self.messages().into_iter().find(|m| pred(m)) {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected message never arrived; got {:?}", self.texts());
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> TransportResult {
        self.sent.lock().unwrap().push(Sent {
            chat_id,
            text: text.to_string(),
            keyboard,
            photo: None,
        });
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
        keyboard: Option<Keyboard>,
    ) -> TransportResult {
        self.sent.lock().unwrap().push(Sent {
            chat_id,
            text: caption.to_string(),
            keyboard,
            photo: Some(path.to_path_buf()),
        });
        Ok(())
    }
}

#[async_trait]
impl CaptchaRequester for RecordingTransport {
    async fn request_captcha(&self, chat_id: i64, image_path: &Path, attempt: u32) -> TransportResult {
        self.send_photo(chat_id, image_path, &format!("captcha attempt {attempt}"), None)
            .await
    }
}

pub async fn test_db() -> (DatabaseManager, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_url = format!("sqlite://{}", temp_dir.path().join("test.db").display());
    let db = DatabaseManager::new(&db_url)
        .await
        .expect("Failed to create test database");
    db.run_migrations().await.expect("Failed to run migrations");
    (db, temp_dir)
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A fully registered donor who may donate today.
pub fn registered_user(chat_id: i64) -> UserSession {
    let mut session = UserSession::new(chat_id);
    session.state = ConversationState::Ready;
    session.donation_type = Some(DonationType::Plasma);
    session.last_donation_date = Some(day(2020, 1, 1));
    session.donor.name = Some("Иванов Иван Иванович".into());
    session.donor.phone = Some("+7 (999) 123-45-67".into());
    session.donor.email = Some("ivanov@mail.ru".into());
    session.donor.birth_date = Some("27.07.1992".into());
    session.donor.snils = Some("123-456-789 01".into());
    session
}
