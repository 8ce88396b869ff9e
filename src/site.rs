//! Selectors, URLs and in-page scripts for the donation centre's booking
//! widget.
//!
//! Every script is prefixed with a `/*name*/` tag naming what it does, which
//! keeps browser logs readable and lets scripted test pages dispatch on it.

use chrono::{NaiveDate, NaiveTime};
use std::time::Duration;

use crate::browser::{js_string, BrowserPage};
use crate::utils::logging::log_browser_event;

pub const FORM_URL: &str = "https://xn--66-6kcadbg3avshsx1aj7aza.xn--p1ai/donorform/";
pub const INTERVALS_REFERENCE: &str = "109270";

pub const MODAL: &str = ".donorform-modal";
pub const MODAL_CLOSE_SELECTORS: [&str; 3] = [
    ".js-donorform-modal-close",
    ".close",
    ".donorform-modal-firsttime",
];

pub const CALENDARS: &str = ".donorform-calendars";
pub const CALENDAR_MONTH: &str = ".slick-active .donorform-calendar__month";
pub const CALENDAR_YEAR: &str = ".slick-active .donorform-calendar__year";
pub const CALENDAR_DAY: &str = ".slick-active .donorform-calendar__day";
pub const NEXT_MONTH: &str = ".slick-next";
pub const PREV_MONTH: &str = ".slick-prev";

/// Class fragments marking a day cell that cannot be booked.
pub const UNAVAILABLE_DAY_FLAGS: [&str; 4] = ["past", "empty", "busy", "disabled"];

pub const NAME_FIELD: &str = "input[name=\"name\"]";
pub const PHONE_FIELD: &str = "input[name=\"phone\"]";
pub const EMAIL_FIELD: &str = "input[name=\"email\"]";
pub const BIRTH_DATE_FIELD: &str = "input[name=\"birth_date\"]";
pub const SNILS_FIELD: &str = "input[name=\"snils\"]";
pub const CAPTCHA_FIELD: &str = "input[name=\"captcha\"]";
pub const CAPTCHA_IMAGE: &str = ".captcha_item img";

pub const SUCCESS_MARKER: &str = ".uss_ok_form";
pub const ERROR_MARKERS: [&str; 4] = [".uss_error_form", ".error", ".alert-error", ".message-error"];

/// Tried in order before falling back to a script search.
pub const SUBMIT_SELECTORS: [&str; 5] = [
    "button[type=\"submit\"]",
    "input[type=\"submit\"]",
    ".donorform__submit",
    ".js-donorform-submit",
    "form button:not([type=\"button\"])",
];

pub const MODAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const CALENDAR_TIMEOUT: Duration = Duration::from_secs(10);
pub const FORM_TIMEOUT: Duration = Duration::from_secs(10);

pub mod scripts {
    pub const CALENDAR: &str = "calendar";
    pub const INTERVALS: &str = "intervals";
    pub const SELECT_DAY: &str = "select-day";
    pub const SELECT_TIME: &str = "select-time";
    pub const SET_VALUE: &str = "set-value";
    pub const SUBMIT_FALLBACK: &str = "submit-fallback";
    pub const SNAPSHOT: &str = "snapshot";
}

fn tagged(name: &str, body: String) -> String {
    format!("/*{name}*/ {body}")
}

/// Tag of a script built by this module.
pub fn script_tag(script: &str) -> Option<&str> {
    let rest = script.strip_prefix("/*")?;
    rest.split_once("*/").map(|(tag, _)| tag)
}

pub fn intervals_url(date: NaiveDate) -> String {
    format!(
        "{FORM_URL}?donorform_intervals&reference={INTERVALS_REFERENCE}&date={}&time=",
        date.format("%Y-%m-%d")
    )
}

/// Direct form URL with the slot preselected, used when clicking through
/// the widget fails.
pub fn direct_form_url(date: NaiveDate, time: NaiveTime) -> String {
    format!(
        "{FORM_URL}?date={}&time={}",
        date.format("%Y-%m-%d"),
        time.format("%H:%M")
    )
}

/// Header text plus every day cell of the active calendar month.
pub fn calendar_script() -> String {
    tagged(
        scripts::CALENDAR,
        format!(
            r#"(() => {{
    const month = document.querySelector({month});
    const year = document.querySelector({year});
    const cells = Array.from(document.querySelectorAll({day})).map(cell => ({{
        text: (cell.textContent || '').trim(),
        classes: cell.className || ''
    }}));
    return {{
        month: month ? month.textContent.trim() : null,
        year: year ? year.textContent.trim() : null,
        cells
    }};
}})()"#,
            month = js_string(CALENDAR_MONTH),
            year = js_string(CALENDAR_YEAR),
            day = js_string(CALENDAR_DAY),
        ),
    )
}

/// Same-origin fetch of the interval markup for one date. Resolves to an
/// empty string on network failure.
pub fn intervals_script(date: NaiveDate) -> String {
    tagged(
        scripts::INTERVALS,
        format!(
            r#"(async () => {{
    try {{
        const response = await fetch({url});
        return await response.text();
    }} catch (e) {{
        return '';
    }}
}})()"#,
            url = js_string(&intervals_url(date)),
        ),
    )
}

/// Clicks the active month's cell for `day`. Resolves to whether a
/// bookable cell was found.
pub fn select_day_script(day: u32) -> String {
    let flags = UNAVAILABLE_DAY_FLAGS
        .iter()
        .map(|f| js_string(f))
        .collect::<Vec<_>>()
        .join(", ");
    tagged(
        scripts::SELECT_DAY,
        format!(
            r#"(() => {{
    const flags = [{flags}];
    const cells = Array.from(document.querySelectorAll({day_sel}));
    const cell = cells.find(c => (c.textContent || '').trim() === {day}
        && !flags.some(f => (c.className || '').includes(f)));
    if (!cell) return false;
    const link = cell.querySelector('a');
    (link || cell).click();
    return true;
}})()"#,
            day_sel = js_string(CALENDAR_DAY),
            day = js_string(&day.to_string()),
        ),
    )
}

/// Clicks the time slot matching `time` by `data-value` or visible text.
pub fn select_time_script(time: NaiveTime) -> String {
    tagged(
        scripts::SELECT_TIME,
        format!(
            r#"(() => {{
    const target = {time};
    let el = document.querySelector('[data-value="' + target + '"]');
    if (!el) {{
        el = Array.from(document.querySelectorAll('a, button, span, div, li'))
            .find(e => e.children.length === 0 && (e.textContent || '').trim().startsWith(target));
    }}
    if (!el) return false;
    el.click();
    return true;
}})()"#,
            time = js_string(&time.format("%H:%M").to_string()),
        ),
    )
}

/// Assigns an input's value at DOM level and fires the events input masks
/// listen to. Resolves to the value the field ends up with.
pub fn set_value_script(selector: &str, value: &str) -> String {
    tagged(
        scripts::SET_VALUE,
        format!(
            r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) return null;
    el.focus();
    el.value = {value};
    for (const type of ['input', 'change', 'blur']) {{
        el.dispatchEvent(new Event(type, {{ bubbles: true }}));
    }}
    return el.value;
}})()"#,
            sel = js_string(selector),
            value = js_string(value),
        ),
    )
}

/// Looks for any submit-like button, then falls back to submitting the
/// form directly. Resolves to `"button"`, `"form"` or `null`.
pub fn submit_fallback_script() -> String {
    tagged(
        scripts::SUBMIT_FALLBACK,
        format!(
            r#"(() => {{
    const captcha = document.querySelector({captcha});
    const form = captcha ? captcha.closest('form') : document.querySelector('form');
    const scope = form || document;
    const button = Array.from(scope.querySelectorAll('button, input[type="submit"], a.button'))
        .find(b => /отправ|запис|submit/i.test((b.textContent || b.value || '').trim()));
    if (button) {{
        button.click();
        return 'button';
    }}
    if (form) {{
        if (typeof form.requestSubmit === 'function') form.requestSubmit();
        else form.submit();
        return 'form';
    }}
    return null;
}})()"#,
            captcha = js_string(CAPTCHA_FIELD),
        ),
    )
}

/// Everything the submission classifier looks at.
pub fn snapshot_script() -> String {
    let errors = ERROR_MARKERS
        .iter()
        .map(|s| js_string(s))
        .collect::<Vec<_>>()
        .join(", ");
    tagged(
        scripts::SNAPSHOT,
        format!(
            r#"(() => {{
    const visibleText = sel => {{
        const el = document.querySelector(sel);
        if (!el) return null;
        const style = window.getComputedStyle(el);
        if (style.display === 'none' || style.visibility === 'hidden') return null;
        const text = (el.textContent || '').trim();
        return text.length ? text : null;
    }};
    const errorText = [{errors}].map(visibleText).find(t => t !== null) || null;
    const captcha = document.querySelector({captcha});
    return {{
        url: window.location.href,
        success_text: visibleText({success}),
        error_text: errorText,
        body_text: document.body ? document.body.innerText : '',
        captcha_field: captcha ? String(captcha.value || '') : null
    }};
}})()"#,
            success = js_string(SUCCESS_MARKER),
            captcha = js_string(CAPTCHA_FIELD),
        ),
    )
}

/// Closes the first-visit modal when it shows up. Returns whether a modal
/// was found; its absence is not an error.
pub async fn dismiss_modal(page: &dyn BrowserPage) -> bool {
    if page.wait_for(MODAL, MODAL_TIMEOUT).await.is_err() {
        log_browser_event("no modal", None, None);
        return false;
    }

    for selector in MODAL_CLOSE_SELECTORS {
        if !matches!(page.is_visible(selector).await, Ok(true)) {
            continue;
        }
        if page.click(selector).await.is_ok() {
            log_browser_event("modal closed", None, Some(selector));
            return true;
        }
    }

    if let Err(e) = page.press_key("body", "Escape").await {
        tracing::debug!("Escape on modal failed: {}", e);
    }
    log_browser_event("modal closed", None, Some("Escape"));
    true
}
