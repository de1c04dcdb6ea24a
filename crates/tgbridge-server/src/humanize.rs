//! Relative time phrases such as "in 2 hours" or "vor 5 Minuten".

use chrono::DateTime;
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    En,
    De,
}

impl Locale {
    /// Matches on the language part, so `de-AT` is German. Unknown
    /// languages fall back to English.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        let language = tag.split(['-', '_']).next().unwrap_or_default();
        if language.eq_ignore_ascii_case("de") {
            Locale::De
        } else {
            Locale::En
        }
    }
}

enum Span {
    Now,
    Seconds,
    Minute,
    Minutes(i64),
    Hour,
    Hours(i64),
    Day,
    Days(i64),
}

fn span(seconds: i64) -> Span {
    match seconds {
        0..=9 => Span::Now,
        10..=44 => Span::Seconds,
        45..=89 => Span::Minute,
        90..=2699 => Span::Minutes((seconds / 60).max(2)),
        2700..=5399 => Span::Hour,
        5400..=86_399 => Span::Hours((seconds / 3600).max(2)),
        86_400..=172_799 => Span::Day,
        _ => Span::Days(seconds / 86_400),
    }
}

/// Describes `then` relative to `now`.
#[must_use]
pub fn humanize(then: DateTime<Tz>, now: DateTime<Tz>, locale: Locale) -> String {
    let delta = then.signed_duration_since(now).num_seconds();
    let future = delta >= 0;
    let span = span(delta.saturating_abs());

    match locale {
        Locale::En => {
            let amount = match span {
                Span::Now => return "just now".to_string(),
                Span::Seconds => "seconds".to_string(),
                Span::Minute => "a minute".to_string(),
                Span::Minutes(n) => format!("{n} minutes"),
                Span::Hour => "an hour".to_string(),
                Span::Hours(n) => format!("{n} hours"),
                Span::Day => "a day".to_string(),
                Span::Days(n) => format!("{n} days"),
            };
            if future {
                format!("in {amount}")
            } else {
                format!("{amount} ago")
            }
        }
        Locale::De => {
            let amount = match span {
                Span::Now => return "gerade eben".to_string(),
                Span::Seconds => "Sekunden".to_string(),
                Span::Minute => "einer Minute".to_string(),
                Span::Minutes(n) => format!("{n} Minuten"),
                Span::Hour => "einer Stunde".to_string(),
                Span::Hours(n) => format!("{n} Stunden"),
                Span::Day => "einem Tag".to_string(),
                Span::Days(n) => format!("{n} Tagen"),
            };
            if future {
                format!("in {amount}")
            } else {
                format!("vor {amount}")
            }
        }
    }
}
