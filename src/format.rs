use chrono::NaiveDate;
use serde::Serialize;

pub fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

/// `743` -> `"743"`, `1340` -> `"1.34k"`.
pub fn format_number(value: i64) -> String {
    if value >= 1000 {
        format!("{:.2}k", value as f64 / 1000.0)
    } else {
        value.to_string()
    }
}

pub fn format_display_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Good,
    Bad,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeDisplay {
    pub text: String,
    pub trend: Trend,
    pub tone: Tone,
}

/// Arrow plus absolute percentage with one decimal. With `inverse`, growth
/// is rendered as bad (used for the unpaid funnel).
pub fn format_change(percent: f64, inverse: bool) -> ChangeDisplay {
    let (arrow, trend) = if percent > 0.0 {
        ("↑", Trend::Up)
    } else if percent < 0.0 {
        ("↓", Trend::Down)
    } else {
        ("-", Trend::Flat)
    };
    let tone = match (trend, inverse) {
        (Trend::Flat, _) => Tone::Neutral,
        (Trend::Up, false) | (Trend::Down, true) => Tone::Good,
        (Trend::Up, true) | (Trend::Down, false) => Tone::Bad,
    };
    ChangeDisplay {
        text: format!("{arrow} {:.1}%", percent.abs()),
        trend,
        tone,
    }
}

pub fn format_share(percent: f64) -> String {
    format!("{percent:.1}%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_switch_to_k_notation_at_one_thousand() {
        assert_eq!(format_number(743), "743");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1.00k");
        assert_eq!(format_number(1340), "1.34k");
        assert_eq!(format_number(0), "0");
    }

    #[test]
    fn ordinals() {
        let rendered = [1, 2, 3, 4, 5, 11, 12, 13, 21, 22]
            .into_iter()
            .map(ordinal)
            .collect::<Vec<_>>();
        assert_eq!(
            rendered,
            ["1st", "2nd", "3rd", "4th", "5th", "11th", "12th", "13th", "21st", "22nd"]
        );
    }

    #[test]
    fn change_display_respects_inverse_tone() {
        let up = format_change(12.345, false);
        assert_eq!(up.text, "↑ 12.3%");
        assert_eq!(up.tone, Tone::Good);

        let unpaid_up = format_change(12.345, true);
        assert_eq!(unpaid_up.trend, Trend::Up);
        assert_eq!(unpaid_up.tone, Tone::Bad);

        let down = format_change(-4.0, false);
        assert_eq!(down.text, "↓ 4.0%");
        assert_eq!(down.tone, Tone::Bad);

        let flat = format_change(0.0, true);
        assert_eq!(flat.text, "- 0.0%");
        assert_eq!(flat.tone, Tone::Neutral);
    }

    #[test]
    fn display_date_is_day_first() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 9).expect("date");
        assert_eq!(format_display_date(date), "09/01/2024");
    }
}
