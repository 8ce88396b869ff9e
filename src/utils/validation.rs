use anyhow::{anyhow, Result};
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

/// Youngest and oldest accepted donor age, inclusive.
pub const MIN_DONOR_AGE: u32 = 18;
pub const MAX_DONOR_AGE: u32 = 100;

static STRICT_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2})\.(\d{2})\.(\d{4})$").unwrap_or_else(|_| unreachable!())
});

static SEPARATED_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})[./-](\d{1,2})[./-](\d{4})$").unwrap_or_else(|_| unreachable!())
});

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap_or_else(|_| unreachable!())
});

static SNILS_FORMATTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{3}-\d{3}-\d{3}\s?\d{2}$").unwrap_or_else(|_| unreachable!())
});

fn digits_only(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Parses the last donation date, which must be typed as `ДД.ММ.ГГГГ`
/// and must not lie in the future.
pub fn parse_donation_date(input: &str, today: NaiveDate) -> Result<NaiveDate> {
    let input = input.trim();
    let caps = STRICT_DATE
        .captures(input)
        .ok_or_else(|| anyhow!("Формат даты должен быть: ДД.ММ.ГГГГ, например 15.03.2024"))?;

    let date = date_from_parts(&caps[1], &caps[2], &caps[3])
        .ok_or_else(|| anyhow!("Неверная дата. Попробуйте ещё раз в формате ДД.ММ.ГГГГ"))?;

    if date > today {
        return Err(anyhow!("Дата последней сдачи не может быть в будущем"));
    }

    Ok(date)
}

fn date_from_parts(day: &str, month: &str, year: &str) -> Option<NaiveDate> {
    let day = day.parse().ok()?;
    let month = month.parse().ok()?;
    let year = year.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Normalizes a phone number.
///
/// Russian mobile numbers (`8 999 …`, `+7 999 …`, `999 …`) come back as
/// `+7 (999) 123-45-67`. Anything else with 10 or 11 digits is kept as typed,
/// since the booking form accepts free-form numbers. Fewer than 10 or more
/// than 11 digits is rejected.
pub fn normalize_phone(input: &str) -> Result<String> {
    let raw = input.trim();
    let mut digits = digits_only(raw);

    if digits.len() < 10 {
        return Err(anyhow!("Номер телефона слишком короткий. Введите полный номер телефона"));
    }
    if digits.len() > 11 {
        return Err(anyhow!("Номер телефона слишком длинный. Введите корректный номер"));
    }

    if digits.len() == 11 && (digits.starts_with('8') || digits.starts_with('7')) {
        digits.remove(0);
    }

    if digits.len() == 10 && digits.starts_with('9') {
        return Ok(format!(
            "+7 ({}) {}-{}-{}",
            &digits[0..3],
            &digits[3..6],
            &digits[6..8],
            &digits[8..10]
        ));
    }

    Ok(raw.to_string())
}

/// Digits the booking form expects in its phone field: the national
/// number without the `+7` country code.
pub fn phone_form_digits(phone: &str) -> String {
    let digits = digits_only(phone);
    if digits.len() == 11 && (digits.starts_with('7') || digits.starts_with('8')) {
        digits[1..].to_string()
    } else {
        digits
    }
}

pub fn validate_email(email: &str) -> Result<String> {
    let email = email.trim();
    if !EMAIL.is_match(email) {
        return Err(anyhow!("Некорректный email. Пример: ivanov@mail.ru"));
    }
    Ok(email.to_string())
}

/// Normalizes a birth date typed as `DDMMYYYY`, `DD.MM.YYYY`, `DD/MM/YYYY`
/// or `DD-MM-YYYY` (single-digit day and month allowed with separators)
/// into `DD.MM.YYYY`. Returns `None` for anything that is not a real date.
pub fn normalize_birth_date(input: &str) -> Option<String> {
    let input = input.trim();
    let digits = digits_only(input);

    if digits.len() == 8 && (digits.len() == input.len() || SEPARATED_DATE.is_match(input)) {
        if let Some(date) = date_from_parts(&digits[0..2], &digits[2..4], &digits[4..8]) {
            return Some(date.format("%d.%m.%Y").to_string());
        }
    }

    let caps = SEPARATED_DATE.captures(input)?;
    let date = date_from_parts(&caps[1], &caps[2], &caps[3])?;
    Some(date.format("%d.%m.%Y").to_string())
}

/// Parses a date previously produced by [`normalize_birth_date`].
pub fn parse_normalized_date(normalized: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(normalized, "%d.%m.%Y").ok()
}

/// Full years between `birth` and `today`.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age
}

/// Normalizes a birth date and enforces the donor age range.
pub fn validate_birth_date(input: &str, today: NaiveDate) -> Result<String> {
    let normalized = normalize_birth_date(input).ok_or_else(|| {
        anyhow!("Неверный формат даты рождения. Введите дату в формате ДД.ММ.ГГГГ, например 27.07.1992")
    })?;
    let birth = parse_normalized_date(&normalized)
        .ok_or_else(|| anyhow!("Неверная дата рождения"))?;

    let age = age_on(birth, today);
    if age < MIN_DONOR_AGE as i32 {
        return Err(anyhow!("Возраст должен быть не менее {} лет", MIN_DONOR_AGE));
    }
    if age > MAX_DONOR_AGE as i32 {
        return Err(anyhow!("Проверьте правильность введённой даты рождения"));
    }

    Ok(normalized)
}

/// Accepts SNILS as eleven digits or as `XXX-XXX-XXX YY`.
pub fn validate_snils(input: &str) -> Result<String> {
    let snils = input.trim();
    let compact: String = snils.chars().filter(|c| !c.is_whitespace()).collect();

    let plain_digits = compact.len() == 11 && compact.chars().all(|c| c.is_ascii_digit());
    if !plain_digits && !SNILS_FORMATTED.is_match(snils) {
        return Err(anyhow!("СНИЛС должен содержать 11 цифр, например 123-456-789 01"));
    }

    Ok(snils.to_string())
}

pub fn validate_name(input: &str) -> Result<String> {
    let name = input.trim();
    if name.chars().count() < 2 {
        return Err(anyhow!("ФИО не может быть пустым"));
    }
    if name.chars().count() > 150 {
        return Err(anyhow!("ФИО слишком длинное"));
    }
    if name.contains('\n') {
        return Err(anyhow!("ФИО должно быть в одну строку"));
    }
    Ok(name.to_string())
}

pub fn validate_captcha_text(input: &str) -> Result<String> {
    let text = input.trim();
    if text.is_empty() {
        return Err(anyhow!("Пустой текст. Введите символы с картинки"));
    }
    if text.chars().count() > 32 {
        return Err(anyhow!("Слишком длинный текст для капчи"));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
    }

    #[test]
    fn test_phone_mobile_variants() {
        assert_eq!(normalize_phone("89991234567").unwrap_or_default(), "+7 (999) 123-45-67");
        assert_eq!(normalize_phone("+7 999 123 45 67").unwrap_or_default(), "+7 (999) 123-45-67");
        assert_eq!(normalize_phone("9991234567").unwrap_or_default(), "+7 (999) 123-45-67");
        assert_eq!(normalize_phone("8 (999) 123-45-67").unwrap_or_default(), "+7 (999) 123-45-67");
    }

    #[test]
    fn test_phone_non_mobile_kept_raw() {
        assert_eq!(normalize_phone(" 4951234567 ").unwrap_or_default(), "4951234567");
        assert_eq!(normalize_phone("+1 202 555 0123").unwrap_or_default(), "+1 202 555 0123");
    }

    #[test]
    fn test_phone_twelve_digits_rejected() {
        assert!(normalize_phone("+44 2071234567").is_err_and(|e| e.to_string().contains("длинный")));
    }

    #[test]
    fn test_phone_length_bounds() {
        assert!(normalize_phone("12345").is_err());
        assert!(normalize_phone("+7 999 123 45 67 89").is_err());
    }

    #[test]
    fn test_phone_form_digits() {
        assert_eq!(phone_form_digits("+7 (999) 123-45-67"), "9991234567");
        assert_eq!(phone_form_digits("4951234567"), "4951234567");
    }

    #[test]
    fn test_birth_date_formats() {
        for input in ["05031990", "05.03.1990", "05/03/1990", "05-03-1990", "5.3.1990"] {
            assert_eq!(normalize_birth_date(input).as_deref(), Some("05.03.1990"), "{input}");
        }
        assert_eq!(normalize_birth_date("31.02.1990"), None);
        assert_eq!(normalize_birth_date("1990-03-05"), None);
        assert_eq!(normalize_birth_date("abc"), None);
    }

    #[test]
    fn test_birth_date_age_range() {
        let today = day(2024, 6, 1);
        assert!(validate_birth_date("01.06.2006", today).is_ok());
        assert!(validate_birth_date("02.06.2006", today).is_err());
        assert!(validate_birth_date("01.06.1924", today).is_ok());
        assert!(validate_birth_date("01.06.1923", today).is_err());
    }

    #[test]
    fn test_donation_date() {
        let today = day(2024, 3, 20);
        assert_eq!(parse_donation_date("15.03.2024", today).ok(), Some(day(2024, 3, 15)));
        assert!(parse_donation_date("15.3.2024", today).is_err());
        assert!(parse_donation_date("30.02.2024", today).is_err());
        assert!(parse_donation_date("21.03.2024", today).is_err());
    }

    #[test]
    fn test_snils_and_email() {
        assert!(validate_snils("12345678901").is_ok());
        assert!(validate_snils("123-456-789 01").is_ok());
        assert!(validate_snils("123-456").is_err());
        assert!(validate_email("donor@example.ru").is_ok());
        assert!(validate_email("donor@").is_err());
    }
}
