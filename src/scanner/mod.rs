//! Availability scanning of the centre's booking calendar.
//!
//! A scan launches its own short-lived browser, reads the two calendar
//! months of the scan window and asks the interval endpoint about every
//! bookable day. It never touches a user's booking session and keeps no
//! state between calls.

pub mod calendar;
pub mod intervals;

use chrono::{Datelike, NaiveDate, NaiveTime};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::browser::{BrowserError, BrowserPage, BrowserPool, BrowserResult};
use crate::site;
use crate::utils::datetime::{format_display_date, today};
use crate::utils::logging::{log_browser_event, log_scan_result};

pub use calendar::{CalendarView, DayCell, ScanWindow};
pub use intervals::{CountTokenHeuristic, SlotHeuristic};

/// Month navigation clicks before a month is given up on.
const MAX_NAV_ATTEMPTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AvailableDate {
    /// `yyyy-mm-dd`
    pub date_string: String,
    /// `15 марта (пт)`
    pub display_text: String,
    pub day: u32,
    pub month: u32,
    pub year: i32,
}

impl AvailableDate {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date_string: date.format("%Y-%m-%d").to_string(),
            display_text: format_display_date(date),
            day: date.day(),
            month: date.month(),
            year: date.year(),
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }
}

/// Dates in `current` that were not in the previous snapshot.
pub fn new_dates(previous: &BTreeSet<NaiveDate>, current: &[AvailableDate]) -> Vec<AvailableDate> {
    current
        .iter()
        .filter(|d| d.date().is_some_and(|date| !previous.contains(&date)))
        .cloned()
        .collect()
}

pub fn snapshot_of(dates: &[AvailableDate]) -> BTreeSet<NaiveDate> {
    dates.iter().filter_map(AvailableDate::date).collect()
}

pub async fn read_calendar(page: &dyn BrowserPage) -> BrowserResult<Option<CalendarView>> {
    let value = page.evaluate(&site::calendar_script()).await?;
    Ok(CalendarView::from_value(value))
}

/// Navigates the widget until its header shows `month`. Gives up after a
/// bounded number of clicks and returns `None`.
pub async fn show_month(
    page: &dyn BrowserPage,
    month: NaiveDate,
    settle: Duration,
) -> BrowserResult<Option<CalendarView>> {
    for attempt in 0..=MAX_NAV_ATTEMPTS {
        let Some(view) = read_calendar(page).await? else {
            return Ok(None);
        };
        let Some(shown) = view.shown_month() else {
            return Ok(None);
        };
        if shown == month {
            return Ok(Some(view));
        }
        if attempt == MAX_NAV_ATTEMPTS {
            break;
        }

        let control = if month > shown { site::NEXT_MONTH } else { site::PREV_MONTH };
        log_browser_event("calendar navigation", None, Some(control));
        if let Err(e) = page.click(control).await {
            tracing::debug!("Calendar navigation click failed: {}", e);
            return Ok(None);
        }
        tokio::time::sleep(settle).await;
    }
    Ok(None)
}

#[derive(Clone)]
pub struct Scanner {
    pool: BrowserPool,
    heuristic: Arc<dyn SlotHeuristic>,
    settle: Duration,
}

impl Scanner {
    pub fn new(pool: BrowserPool) -> Self {
        Self {
            pool,
            heuristic: Arc::new(CountTokenHeuristic),
            settle: Duration::from_secs(1),
        }
    }

    pub fn with_heuristic(mut self, heuristic: Arc<dyn SlotHeuristic>) -> Self {
        self.heuristic = heuristic;
        self
    }

    /// Pause after page transitions such as month navigation.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Open dates from `anchor` (or tomorrow) through the end of the
    /// following month. Failures are logged and yield an empty list.
    pub async fn scan(&self, anchor: Option<NaiveDate>) -> Vec<AvailableDate> {
        self.try_scan(anchor, today()).await.unwrap_or_default()
    }

    /// Like [`Scanner::scan`] but reports the failure, so callers can tell
    /// "nothing open" from "site unreachable".
    pub async fn try_scan(
        &self,
        anchor: Option<NaiveDate>,
        today: NaiveDate,
    ) -> BrowserResult<Vec<AvailableDate>> {
        let window = ScanWindow::new(anchor, today);
        let anchor_label = window.start.to_string();

        let lease = self.pool.launch().await;
        let result = match lease {
            Ok(lease) => {
                let result = self.scan_page(lease.page(), window).await;
                if let Err(e) = lease.close().await {
                    tracing::debug!("Closing scan browser failed: {}", e);
                }
                result
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(dates) => log_scan_result(&anchor_label, dates.len(), None),
            Err(e) => log_scan_result(&anchor_label, 0, Some(&e.to_string())),
        }
        result
    }

    async fn scan_page(&self, page: &dyn BrowserPage, window: ScanWindow) -> BrowserResult<Vec<AvailableDate>> {
        page.goto(site::FORM_URL).await?;
        site::dismiss_modal(page).await;
        page.wait_for(site::CALENDARS, site::CALENDAR_TIMEOUT).await?;

        let mut found = BTreeSet::new();
        for month in window.months() {
            let Some(view) = show_month(page, month, self.settle).await? else {
                tracing::warn!("Calendar did not reach {}, skipping month", month.format("%m.%Y"));
                continue;
            };

            for date in view.bookable_dates().into_iter().filter(|d| window.contains(*d)) {
                let markup = self.fetch_intervals(page, date).await?;
                if self.heuristic.has_free_slots(&markup) {
                    tracing::debug!("{} has free slots", date);
                    found.insert(date);
                } else {
                    tracing::debug!("{} has no free slots", date);
                }
            }
        }

        Ok(found.into_iter().map(AvailableDate::new).collect())
    }

    async fn fetch_intervals(&self, page: &dyn BrowserPage, date: NaiveDate) -> BrowserResult<String> {
        let value = page.evaluate(&site::intervals_script(date)).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Free times for one date, ascending. Failures yield an empty list.
    pub async fn scan_times(&self, date: NaiveDate) -> Vec<NaiveTime> {
        match self.try_scan_times(date).await {
            Ok(times) => times,
            Err(e) => {
                tracing::warn!("Time scan for {} failed: {}", date, e);
                Vec::new()
            }
        }
    }

    pub async fn try_scan_times(&self, date: NaiveDate) -> BrowserResult<Vec<NaiveTime>> {
        let lease = self.pool.launch().await?;
        let page = lease.page();

        let result: Result<String, BrowserError> = async {
            page.goto(site::FORM_URL).await?;
            site::dismiss_modal(page).await;
            self.fetch_intervals(page, date).await
        }
        .await;

        if let Err(e) = lease.close().await {
            tracing::debug!("Closing scan browser failed: {}", e);
        }

        let times = self.heuristic.free_times(&result?);
        tracing::info!("{} free times on {}", times.len(), date);
        Ok(times)
    }
}
