//! Inline keyboards and the longer reply texts.

use chrono::{NaiveDate, NaiveTime, Timelike};

use super::transport::{Button, Keyboard};
use crate::booking::Action;
use crate::database::models::{ConversationState, DonationType};
use crate::scanner::AvailableDate;
use crate::utils::datetime::{format_day_month, format_time};

fn button(label: impl Into<String>, action: Action) -> Button {
    Button::new(label, action.to_payload())
}

pub fn donation_type_keyboard() -> Keyboard {
    Keyboard::new()
        .row(vec![button("🩸 Кровь", Action::DonationType(DonationType::Blood))])
        .row(vec![button("🟡 Плазму", Action::DonationType(DonationType::Plasma))])
}

/// One button per date, then a refresh button.
pub fn dates_keyboard(dates: &[AvailableDate]) -> Keyboard {
    let mut keyboard = Keyboard::new();
    for date in dates {
        if let Some(day) = date.date() {
            keyboard = keyboard.row(vec![button(
                format!("📅 {}", date.display_text),
                Action::SelectDate(day),
            )]);
        }
    }
    keyboard.row(vec![button("🔄 Обновить список", Action::RefreshDates)])
}

pub const DATES_FOUND: &str =
    "🎉 Найдены доступные даты для записи!\n\n📋 Выберите подходящую дату из списка ниже:";
pub const NO_DATES: &str = "😔 Пока нет доступных дат для записи\n\n\
     🔍 Я продолжу проверять автоматически.\n\
     💡 Вы также можете проверить вручную:";
pub const SITE_UNAVAILABLE: &str = "🌐 Сайт записи временно недоступен\n\n\
     ⏰ Попробую снова при следующей проверке.\n\
     🔄 Или попробуйте обновить вручную:";

/// Announcement for dates the user has not been shown yet.
pub fn new_dates_message(anchor: Option<NaiveDate>) -> String {
    match anchor {
        Some(from) => format!(
            "🔔 Появились новые даты для записи, начиная с {}!\n\n📋 Выберите подходящую дату:",
            format_day_month(from)
        ),
        None => "🔔 Появились новые даты для записи!\n\n📋 Выберите подходящую дату:".to_string(),
    }
}

pub fn refresh_dates_keyboard() -> Keyboard {
    Keyboard::new().row(vec![button("🔄 Проверить снова", Action::RefreshDates)])
}

pub fn retry_dates_keyboard() -> Keyboard {
    Keyboard::new().row(vec![button("🔄 Попробовать снова", Action::RefreshDates)])
}

pub fn main_menu_keyboard() -> Keyboard {
    Keyboard::new().row(vec![button("📅 Показать доступные даты", Action::RefreshDates)])
}

pub fn back_to_dates_keyboard() -> Keyboard {
    Keyboard::new().row(vec![button("🔙 К выбору дат", Action::BackToDates)])
}

pub fn back_to_main_keyboard() -> Keyboard {
    Keyboard::new().row(vec![button("🔙 В главное меню", Action::BackToMain)])
}

pub fn captcha_test_keyboard() -> Keyboard {
    Keyboard::new().row(vec![button("❌ Отменить тест", Action::CancelCaptchaTest)])
}

pub fn confirm_keyboard() -> Keyboard {
    Keyboard::new()
        .row(vec![button("✅ Да, записать", Action::ConfirmBooking(true))])
        .row(vec![button("❌ Нет, отменить", Action::ConfirmBooking(false))])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPart {
    Morning,
    Afternoon,
    Evening,
}

impl DayPart {
    /// Slots before 08:00 are listed with the morning ones.
    pub fn of(time: NaiveTime) -> Self {
        match time.hour() {
            h if h < 12 => DayPart::Morning,
            h if h < 17 => DayPart::Afternoon,
            _ => DayPart::Evening,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            DayPart::Morning => "🌅",
            DayPart::Afternoon => "☀️",
            DayPart::Evening => "🌆",
        }
    }
}

/// Time buttons grouped morning, afternoon, evening, plus navigation.
pub fn times_keyboard(date: NaiveDate, times: &[NaiveTime]) -> Keyboard {
    let mut keyboard = Keyboard::new();
    for part in [DayPart::Morning, DayPart::Afternoon, DayPart::Evening] {
        for time in times.iter().filter(|t| DayPart::of(**t) == part) {
            keyboard = keyboard.row(vec![button(
                format!("{} {}", part.emoji(), format_time(*time)),
                Action::SelectTime(*time),
            )]);
        }
    }
    keyboard.row(vec![
        button("🔙 Выбрать другую дату", Action::BackToDates),
        button("🔄 Обновить время", Action::RefreshTimes(date)),
    ])
}

pub fn times_message(date: NaiveDate, times: &[NaiveTime]) -> String {
    let count = |part: DayPart| times.iter().filter(|t| DayPart::of(**t) == part).count();
    format!(
        "⏰ Доступное время на {}:\n\n\
         🌅 Утро: {} слотов\n\
         ☀️ День: {} слотов\n\
         🌆 Вечер: {} слотов\n\n\
         👆 Выберите удобное время:",
        format_day_month(date),
        count(DayPart::Morning),
        count(DayPart::Afternoon),
        count(DayPart::Evening),
    )
}

pub fn no_times_keyboard(date: NaiveDate) -> Keyboard {
    Keyboard::new()
        .row(vec![button("🔙 Выбрать другую дату", Action::BackToDates)])
        .row(vec![button("🔄 Обновить время", Action::RefreshTimes(date))])
}

/// Question asked on entering a registration state.
pub fn registration_prompt(state: ConversationState, donation_type: Option<DonationType>) -> String {
    match state {
        ConversationState::AskDonationType => "Вы сдавали кровь или плазму в последний раз?".to_string(),
        ConversationState::AskLastDonationDate => format!(
            "Когда вы последний раз сдавали {}?\n\n📝 Введите дату в формате ДД.ММ.ГГГГ, например 15.03.2024",
            donation_type.map_or("кровь или плазму", |t| t.display_accusative())
        ),
        ConversationState::AskName => "✅ Дата сохранена!\n\nВведите ваше ФИО:".to_string(),
        ConversationState::AskPhone => "✅ ФИО сохранено!\n\nВведите ваш телефон:".to_string(),
        ConversationState::AskEmail => "✅ Телефон сохранён!\n\nВведите ваш email:".to_string(),
        ConversationState::AskBirthDate => "✅ Email сохранён!\n\nДата рождения (ДД.ММ.ГГГГ):".to_string(),
        ConversationState::AskSnils => "✅ Дата рождения сохранена!\n\nВведите ваш СНИЛС:".to_string(),
        _ => "Пожалуйста, следуйте инструкциям выше.".to_string(),
    }
}
