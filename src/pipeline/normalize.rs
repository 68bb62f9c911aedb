//! Field normalization: free-text model answers → typed values.
//!
//! The model answers in whatever shape the receipt printed — `"$12.50
//! total"`, `"December 22, 2014"`, sometimes `"N/A"` or pure noise. This
//! module converts those answers into a decimal amount and an ISO-8601 date
//! where it can, and **passes the original text through unchanged** where it
//! cannot. Passthrough is a deliberate policy, not a fallback of last
//! resort: an unparsable answer still lands in the CSV for a human to read,
//! and normalization never raises and never drops a record.
//!
//! ## Date pattern order
//!
//! The candidate formats are ambiguous against each other (`"06/14/29"`
//! reads as day/month/year *and* month/day/2-digit-year), so they are tried
//! in a fixed priority order and the first successful parse wins. Later
//! patterns only see answers every earlier pattern rejected.

use chrono::{Datelike, Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A monetary amount: parsed when the answer was numeric enough, otherwise
/// the model's original text verbatim.
///
/// Serializes as a plain string either way, so the ledger CSV holds `12.50`
/// next to `N/A` in the same column and round-trips on reload.
#[derive(Debug, Clone, PartialEq)]
pub enum AmountField {
    Parsed(Decimal),
    Raw(String),
}

impl fmt::Display for AmountField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmountField::Parsed(d) => write!(f, "{d}"),
            AmountField::Raw(s) => f.write_str(s),
        }
    }
}

impl Serialize for AmountField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AmountField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match Decimal::from_str(s.trim()) {
            Ok(d) => AmountField::Parsed(d),
            Err(_) => AmountField::Raw(s),
        })
    }
}

/// A receipt date: canonical ISO-8601 when one of the known patterns
/// matched, otherwise the model's original text verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum DateField {
    Parsed(NaiveDate),
    Raw(String),
}

impl fmt::Display for DateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateField::Parsed(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            DateField::Raw(s) => f.write_str(s),
        }
    }
}

impl Serialize for DateField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DateField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
            Ok(d) => DateField::Parsed(d),
            Err(_) => DateField::Raw(s),
        })
    }
}

// ── Amount normalization ─────────────────────────────────────────────────

static RE_NON_AMOUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9.]").unwrap());

/// Normalize a free-text amount answer.
///
/// Strips every character that is not a digit or a period (currency symbols,
/// thousands separators, trailing words) and parses the remainder as a
/// decimal. `"$12.50 total"` → `12.50`; `"N/A"` → passthrough.
pub fn normalize_amount(raw: &str) -> AmountField {
    let scrubbed = RE_NON_AMOUNT.replace_all(raw, "");
    match Decimal::from_str(&scrubbed) {
        Ok(d) => AmountField::Parsed(d),
        Err(_) => AmountField::Raw(raw.to_string()),
    }
}

// ── Date normalization ───────────────────────────────────────────────────

/// Year-carrying formats, in priority order. The year-less month-day form is
/// handled separately below because it needs a year substituted.
const DATE_FORMATS: &[&str] = &[
    "%B %d, %Y", // December 22, 2014
    "%B %d %Y",  // December 22 2014
    "%d/%m/%Y",  // 26/08/2002
    "%m/%d/%y",  // 06/14/29
];

/// Normalize a free-text date answer to ISO-8601 (`YYYY-MM-DD`).
///
/// Tries the fixed pattern list in order; a year-less `"June 14"` gets the
/// current calendar year; anything unmatched passes through unchanged.
pub fn normalize_date(raw: &str) -> DateField {
    normalize_date_with_year(raw, Local::now().year())
}

/// The `current_year` parameter exists so tests are not tied to the clock.
pub(crate) fn normalize_date_with_year(raw: &str, current_year: i32) -> DateField {
    let trimmed = raw.trim();
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
            return DateField::Parsed(d);
        }
    }
    // Month-day with no year ("June 14"): substitute the current year.
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{trimmed} {current_year}"), "%B %d %Y") {
        return DateField::Parsed(d);
    }
    DateField::Raw(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Amounts ──────────────────────────────────────────────────────────

    #[test]
    fn amount_with_symbol_and_suffix() {
        assert_eq!(
            normalize_amount("$12.50 total"),
            AmountField::Parsed(Decimal::from_str("12.50").unwrap())
        );
    }

    #[test]
    fn amount_with_thousands_separator() {
        assert_eq!(
            normalize_amount("$1,234.56"),
            AmountField::Parsed(Decimal::from_str("1234.56").unwrap())
        );
    }

    #[test]
    fn amount_unparsable_passes_through() {
        assert_eq!(normalize_amount("N/A"), AmountField::Raw("N/A".into()));
        // Two periods survive the scrub and defeat the decimal parse.
        assert_eq!(
            normalize_amount("12.50.30"),
            AmountField::Raw("12.50.30".into())
        );
    }

    #[test]
    fn amount_display_keeps_scale() {
        assert_eq!(normalize_amount("$12.50").to_string(), "12.50");
    }

    // ── Dates ────────────────────────────────────────────────────────────

    #[test]
    fn date_full_month_with_comma() {
        assert_eq!(
            normalize_date("December 22, 2014"),
            DateField::Parsed(NaiveDate::from_ymd_opt(2014, 12, 22).unwrap())
        );
    }

    #[test]
    fn date_full_month_without_comma() {
        assert_eq!(
            normalize_date("December 22 2014"),
            DateField::Parsed(NaiveDate::from_ymd_opt(2014, 12, 22).unwrap())
        );
    }

    #[test]
    fn date_day_month_year_slashes() {
        assert_eq!(
            normalize_date("26/08/2002"),
            DateField::Parsed(NaiveDate::from_ymd_opt(2002, 8, 26).unwrap())
        );
    }

    #[test]
    fn date_ambiguous_slash_prefers_day_month_year() {
        // 04/05/2002 parses under both slash formats; the d/m/Y pattern is
        // earlier in the list and must win.
        assert_eq!(
            normalize_date("04/05/2002"),
            DateField::Parsed(NaiveDate::from_ymd_opt(2002, 5, 4).unwrap())
        );
    }

    #[test]
    fn date_us_two_digit_year_fallback() {
        // Month 14 is impossible, so d/m/Y fails and m/d/y catches it.
        assert_eq!(
            normalize_date("06/14/29"),
            DateField::Parsed(NaiveDate::from_ymd_opt(2029, 6, 14).unwrap())
        );
    }

    #[test]
    fn date_without_year_gets_current_year() {
        assert_eq!(
            normalize_date_with_year("June 14", 2025),
            DateField::Parsed(NaiveDate::from_ymd_opt(2025, 6, 14).unwrap())
        );
    }

    #[test]
    fn date_garbage_passes_through() {
        assert_eq!(normalize_date("garbage"), DateField::Raw("garbage".into()));
        assert_eq!(normalize_date(""), DateField::Raw("".into()));
    }

    #[test]
    fn date_display_is_iso() {
        assert_eq!(normalize_date("December 22, 2014").to_string(), "2014-12-22");
        assert_eq!(normalize_date("garbage").to_string(), "garbage");
    }

    // ── Serde round-trips (ledger reload) ────────────────────────────────

    #[test]
    fn amount_field_round_trips_through_string() {
        let json = serde_json::to_string(&normalize_amount("$9.99")).unwrap();
        assert_eq!(json, "\"9.99\"");
        let back: AmountField = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AmountField::Parsed(Decimal::from_str("9.99").unwrap()));

        let raw: AmountField = serde_json::from_str("\"N/A\"").unwrap();
        assert_eq!(raw, AmountField::Raw("N/A".into()));
    }

    #[test]
    fn date_field_round_trips_through_string() {
        let json = serde_json::to_string(&normalize_date("26/08/2002")).unwrap();
        assert_eq!(json, "\"2002-08-26\"");
        let back: DateField = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back,
            DateField::Parsed(NaiveDate::from_ymd_opt(2002, 8, 26).unwrap())
        );
    }
}
