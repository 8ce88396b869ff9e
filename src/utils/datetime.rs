use chrono::{Datelike, Duration, Local, NaiveDate, NaiveTime, Timelike, Weekday};
use crate::database::models::DonationType;

const MONTHS_NOMINATIVE: [&str; 12] = [
    "Январь", "Февраль", "Март", "Апрель", "Май", "Июнь",
    "Июль", "Август", "Сентябрь", "Октябрь", "Ноябрь", "Декабрь",
];

const MONTHS_GENITIVE: [&str; 12] = [
    "января", "февраля", "марта", "апреля", "мая", "июня",
    "июля", "августа", "сентября", "октября", "ноября", "декабря",
];

/// Today's date in the server's local timezone.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Days that must pass after a donation before the next one.
pub fn required_days(donation_type: DonationType) -> i64 {
    match donation_type {
        DonationType::Blood => 30,
        DonationType::Plasma => 14,
    }
}

/// Whether enough whole days have elapsed since the last donation.
///
/// Both sides are calendar dates, so the time of day never matters.
pub fn can_donate(last_donation: NaiveDate, donation_type: DonationType, today: NaiveDate) -> bool {
    (today - last_donation).num_days() >= required_days(donation_type)
}

pub fn next_eligible_date(last_donation: NaiveDate, donation_type: DonationType) -> NaiveDate {
    last_donation + Duration::days(required_days(donation_type))
}

/// Month number (1-12) for a calendar header such as `Март`.
pub fn month_from_name(name: &str) -> Option<u32> {
    let name = name.trim().to_lowercase();
    MONTHS_NOMINATIVE
        .iter()
        .position(|m| m.to_lowercase() == name)
        .map(|i| i as u32 + 1)
}

pub fn month_genitive(month: u32) -> &'static str {
    MONTHS_GENITIVE
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("")
}

fn weekday_short(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "пн",
        Weekday::Tue => "вт",
        Weekday::Wed => "ср",
        Weekday::Thu => "чт",
        Weekday::Fri => "пт",
        Weekday::Sat => "сб",
        Weekday::Sun => "вс",
    }
}

/// `15 марта`
pub fn format_day_month(date: NaiveDate) -> String {
    format!("{} {}", date.day(), month_genitive(date.month()))
}

/// `15 марта (пт)`
pub fn format_display_date(date: NaiveDate) -> String {
    format!("{} ({})", format_day_month(date), weekday_short(date.weekday()))
}

/// `15.03.2024`
pub fn format_ru_date(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub fn parse_time(input: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M").ok()
}

pub fn parse_iso_date(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").ok()
}

pub fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// First day of the month following `date`'s month.
pub fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Last day of the month after `date`'s month.
pub fn end_of_following_month(date: NaiveDate) -> NaiveDate {
    first_of_next_month(first_of_next_month(date)) - Duration::days(1)
}
