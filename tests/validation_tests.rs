use chrono::NaiveDate;
use donor_booking_bot::utils::validation::*;

#[cfg(test)]
mod validation_tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 20).unwrap()
    }

    // Name validation tests
    #[test]
    fn test_valid_names() {
        let valid_names = vec![
            "Иванов Иван Иванович".to_string(),
            "Ли".to_string(),
            "Анна-Мария Петрова".to_string(),
            "А".repeat(150),
        ];

        for name in valid_names {
            assert!(validate_name(&name).is_ok(), "Should accept name: {}", name);
        }
        assert_eq!(validate_name("  Иванов Иван  ").unwrap(), "Иванов Иван");
    }

    #[test]
    fn test_invalid_names() {
        let invalid_names = vec![
            "".to_string(),
            " ".to_string(),
            "Я".to_string(),
            "А".repeat(151),
            "Иванов\nИван".to_string(),
        ];

        for name in invalid_names {
            assert!(validate_name(&name).is_err(), "Should reject name: {:?}", name);
        }
    }

    // Phone normalization tests
    #[test]
    fn test_mobile_numbers_normalized() {
        for input in ["89991234567", "79991234567", "+7 (999) 123-45-67", "999-123-45-67"] {
            assert_eq!(normalize_phone(input).unwrap(), "+7 (999) 123-45-67", "{input}");
        }
    }

    #[test]
    fn test_phone_errors_name_the_problem() {
        let short = normalize_phone("123").unwrap_err().to_string();
        assert!(short.contains("короткий"));

        let long = normalize_phone("123456789012").unwrap_err().to_string();
        assert!(long.contains("длинный"));
    }

    // Email validation tests
    #[test]
    fn test_emails() {
        assert_eq!(validate_email(" ivanov@mail.ru ").unwrap(), "ivanov@mail.ru");
        for invalid in ["", "ivanov", "ivanov@mail", "iva nov@mail.ru", "@mail.ru"] {
            assert!(validate_email(invalid).is_err(), "Should reject email: {}", invalid);
        }
    }

    // Birth date tests
    #[test]
    fn test_birth_date_normalized() {
        assert_eq!(validate_birth_date("27071992", today()).unwrap(), "27.07.1992");
        assert_eq!(validate_birth_date("27/07/1992", today()).unwrap(), "27.07.1992");
        assert_eq!(validate_birth_date("7-7-1992", today()).unwrap(), "07.07.1992");
    }

    #[test]
    fn test_birth_date_age_limits() {
        let young = validate_birth_date("21.03.2006", today()).unwrap_err().to_string();
        assert!(young.contains("18"));
        assert!(validate_birth_date("20.03.2006", today()).is_ok());
        assert!(validate_birth_date("19.03.1923", today()).is_err());
    }

    #[test]
    fn test_birth_date_rejects_garbage() {
        for invalid in ["", "1992", "32.01.1992", "27.13.1992", "1992.07.27"] {
            assert!(validate_birth_date(invalid, today()).is_err(), "Should reject: {}", invalid);
        }
    }

    // Last donation date tests
    #[test]
    fn test_donation_date_is_strict() {
        assert!(parse_donation_date("20.03.2024", today()).is_ok());
        assert!(parse_donation_date(" 01.01.2024 ", today()).is_ok());

        for invalid in ["1.1.2024", "01/01/2024", "2024-01-01", "01012024"] {
            let err = parse_donation_date(invalid, today()).unwrap_err().to_string();
            assert!(err.contains("ДД.ММ.ГГГГ"), "{invalid}: {err}");
        }

        let future = parse_donation_date("21.03.2024", today()).unwrap_err().to_string();
        assert!(future.contains("будущем"));
    }

    // SNILS tests
    #[test]
    fn test_snils_formats() {
        assert_eq!(validate_snils(" 123-456-789 01 ").unwrap(), "123-456-789 01");
        assert!(validate_snils("123-456-78901").is_ok());
        assert!(validate_snils("1234567890").is_err());
        assert!(validate_snils("123-456-789-01").is_err());
        assert!(validate_snils("abc-def-ghi jk").is_err());
    }

    // Captcha text tests
    #[test]
    fn test_captcha_text() {
        assert_eq!(validate_captcha_text("  aB3x ").unwrap(), "aB3x");
        assert!(validate_captcha_text("x".repeat(32).as_str()).is_ok());
        assert!(validate_captcha_text("x".repeat(33).as_str()).is_err());
        assert!(validate_captcha_text("   ").is_err());
    }
}
