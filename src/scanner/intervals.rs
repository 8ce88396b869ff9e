use chrono::NaiveTime;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::datetime::{minute_of_day, parse_time};

/// `09:00 <span class="...">(3)</span>`
static TIME_SLOT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2}:\d{2})\s*<span[^>]*>\((\d+)\)</span>").unwrap_or_else(|_| unreachable!())
});

static COUNT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\d+)\)").unwrap_or_else(|_| unreachable!()));

/// Phrases the interval endpoint uses when a day has nothing left.
pub const UNAVAILABLE_PHRASES: [&str; 5] = [
    "нет свободного времени",
    "нет доступного времени",
    "нет свободных мест",
    "запись закрыта",
    "запись недоступна",
];

/// Decides slot availability from interval endpoint markup.
pub trait SlotHeuristic: Send + Sync {
    fn has_free_slots(&self, markup: &str) -> bool;

    /// Free times, ascending by minute of day.
    fn free_times(&self, markup: &str) -> Vec<NaiveTime>;
}

/// Counts `(n)` tokens: a day is open if any token is positive and none of
/// the unavailable phrases appear.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountTokenHeuristic;

impl SlotHeuristic for CountTokenHeuristic {
    fn has_free_slots(&self, markup: &str) -> bool {
        let lowered = markup.to_lowercase();
        if UNAVAILABLE_PHRASES.iter().any(|p| lowered.contains(p)) {
            return false;
        }
        COUNT_TOKEN
            .captures_iter(markup)
            .filter_map(|c| c[1].parse::<u32>().ok())
            .any(|n| n > 0)
    }

    fn free_times(&self, markup: &str) -> Vec<NaiveTime> {
        let mut times: Vec<NaiveTime> = TIME_SLOT
            .captures_iter(markup)
            .filter(|c| c[2].parse::<u32>().is_ok_and(|n| n > 0))
            .filter_map(|c| parse_time(&c[1]))
            .collect();
        times.sort_by_key(|t| minute_of_day(*t));
        times.dedup();
        times
    }
}
