use chrono::{Datelike, Duration, NaiveDate};
use serde::Deserialize;

use crate::site::UNAVAILABLE_DAY_FLAGS;
use crate::utils::datetime::{end_of_following_month, first_of_month, first_of_next_month, month_from_name};

/// What the calendar script reports for the active month.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CalendarView {
    pub month: Option<String>,
    pub year: Option<String>,
    #[serde(default)]
    pub cells: Vec<DayCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DayCell {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub classes: String,
}

impl DayCell {
    pub fn is_bookable(&self) -> bool {
        !UNAVAILABLE_DAY_FLAGS.iter().any(|flag| self.classes.contains(flag))
    }

    pub fn day(&self) -> Option<u32> {
        self.text.trim().parse().ok().filter(|d| (1..=31).contains(d))
    }
}

impl CalendarView {
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    /// First day of the month named in the header.
    pub fn shown_month(&self) -> Option<NaiveDate> {
        let month = month_from_name(self.month.as_deref()?)?;
        let year: i32 = self
            .year
            .as_deref()?
            .chars()
            .filter(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .ok()?;
        NaiveDate::from_ymd_opt(year, month, 1)
    }

    /// Bookable day cells as calendar dates, in cell order.
    pub fn bookable_dates(&self) -> Vec<NaiveDate> {
        let Some(month) = self.shown_month() else {
            return Vec::new();
        };
        self.cells
            .iter()
            .filter(|cell| cell.is_bookable())
            .filter_map(DayCell::day)
            .filter_map(|day| NaiveDate::from_ymd_opt(month.year(), month.month(), day))
            .collect()
    }
}

/// Range of dates a scan reports: from the anchor (never earlier than
/// tomorrow) through the end of the month after the anchor's month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ScanWindow {
    pub fn new(anchor: Option<NaiveDate>, today: NaiveDate) -> Self {
        let tomorrow = today + Duration::days(1);
        let start = anchor.map_or(tomorrow, |a| a.max(tomorrow));
        Self {
            start,
            end: end_of_following_month(start),
        }
    }

    /// The two calendar months the widget has to show.
    pub fn months(&self) -> [NaiveDate; 2] {
        let first = first_of_month(self.start);
        [first, first_of_next_month(first)]
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn cell(text: &str, classes: &str) -> DayCell {
        DayCell { text: text.into(), classes: classes.into() }
    }

    #[test]
    fn test_bookable_dates_skip_flagged_cells() {
        let view = CalendarView {
            month: Some("Март".into()),
            year: Some("2024".into()),
            cells: vec![
                cell("14", "donorform-calendar__day donorform-calendar__day--past"),
                cell("15", "donorform-calendar__day"),
                cell("", "donorform-calendar__day donorform-calendar__day--empty"),
                cell("16", "donorform-calendar__day donorform-calendar__day--busy"),
                cell("18", "donorform-calendar__day is-disabled"),
                cell("19", "donorform-calendar__day"),
            ],
        };

        assert_eq!(view.shown_month(), Some(day(2024, 3, 1)));
        assert_eq!(view.bookable_dates(), vec![day(2024, 3, 15), day(2024, 3, 19)]);
    }

    #[test]
    fn test_unknown_header_yields_nothing() {
        let view = CalendarView {
            month: Some("Mars".into()),
            year: Some("2024".into()),
            cells: vec![cell("15", "")],
        };
        assert!(view.bookable_dates().is_empty());
    }

    #[test]
    fn test_from_value_tolerates_missing_cells() {
        let view = CalendarView::from_value(serde_json::json!({"month": "Декабрь", "year": " 2024 г."}))
            .unwrap();
        assert_eq!(view.shown_month(), Some(day(2024, 12, 1)));
        assert!(view.cells.is_empty());
    }

    #[test]
    fn test_window_defaults_to_tomorrow() {
        let window = ScanWindow::new(None, day(2024, 3, 10));
        assert_eq!(window.start, day(2024, 3, 11));
        assert_eq!(window.end, day(2024, 4, 30));
        assert_eq!(window.months(), [day(2024, 3, 1), day(2024, 4, 1)]);
    }

    #[test]
    fn test_window_anchored_across_year_end() {
        let window = ScanWindow::new(Some(day(2024, 12, 20)), day(2024, 12, 1));
        assert_eq!(window.end, day(2025, 1, 31));
        assert_eq!(window.months(), [day(2024, 12, 1), day(2025, 1, 1)]);
        assert!(window.contains(day(2024, 12, 20)));
        assert!(!window.contains(day(2024, 12, 19)));
    }

    #[test]
    fn test_past_anchor_clamped_to_tomorrow() {
        let window = ScanWindow::new(Some(day(2024, 1, 1)), day(2024, 3, 10));
        assert_eq!(window.start, day(2024, 3, 11));
    }
}
