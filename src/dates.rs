//! Effective-date handling
//!
//! Spreadsheet hosts hand dates over either as text or as a day-count serial
//! counted from 1899-12-30. Both are turned into a validated `YYYY-MM-DD`
//! date before anything goes on the wire.

use crate::error::{Result, TaxError};
use chrono::{Duration, NaiveDate};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Largest serial a host can produce (9999-12-31)
const MAX_SERIAL: f64 = 2_958_465.0;

/// Wire format for dates
pub const DATE_FORMAT: &str = "%Y-%m-%d";

fn iso_date_regex() -> &'static Regex {
    static ISO_DATE: OnceLock<Regex> = OnceLock::new();
    ISO_DATE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"))
}

fn serial_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).expect("valid epoch")
}

/// Raw date argument as the caller supplied it
#[derive(Debug, Clone, PartialEq)]
pub enum DateInput {
    Text(String),
    Serial(f64),
}

impl From<&str> for DateInput {
    fn from(value: &str) -> Self {
        DateInput::Text(value.to_string())
    }
}

impl From<String> for DateInput {
    fn from(value: String) -> Self {
        DateInput::Text(value)
    }
}

impl From<f64> for DateInput {
    fn from(value: f64) -> Self {
        DateInput::Serial(value)
    }
}

impl From<i64> for DateInput {
    fn from(value: i64) -> Self {
        DateInput::Serial(value as f64)
    }
}

impl DateInput {
    /// Parse a command-line style argument: numbers are serials, anything else is text
    pub fn parse_arg(arg: &str) -> Self {
        match arg.trim().parse::<f64>() {
            Ok(serial) => DateInput::Serial(serial),
            Err(_) => DateInput::Text(arg.to_string()),
        }
    }

    /// True when the argument carries nothing usable (blank text)
    pub fn is_blank(&self) -> bool {
        matches!(self, DateInput::Text(s) if s.trim().is_empty())
    }
}

/// A validated calendar date
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EffectiveDate(NaiveDate);

impl EffectiveDate {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(EffectiveDate)
    }

    /// Convert a host date serial. Fractional parts (time of day) are dropped.
    pub fn from_serial(serial: f64) -> Result<Self> {
        if !serial.is_finite() || serial.abs() > MAX_SERIAL {
            return Err(TaxError::invalid_date());
        }
        let days = serial.floor() as i64;
        serial_epoch()
            .checked_add_signed(Duration::days(days))
            .map(EffectiveDate)
            .ok_or_else(TaxError::invalid_date)
    }

    /// Parse `YYYY-MM-DD` text
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if !iso_date_regex().is_match(text) {
            return Err(TaxError::invalid_date());
        }
        NaiveDate::parse_from_str(text, DATE_FORMAT)
            .map(EffectiveDate)
            .map_err(|_| TaxError::invalid_date())
    }

    pub fn from_input(input: &DateInput) -> Result<Self> {
        let date = match input {
            DateInput::Serial(serial) => Self::from_serial(*serial)?,
            DateInput::Text(text) => Self::parse(text)?,
        };
        // Serials far in the past format with a sign or short year
        if !iso_date_regex().is_match(&date.to_string()) {
            return Err(TaxError::invalid_date());
        }
        Ok(date)
    }

    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for EffectiveDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

/// Validate an optional date argument: absent or blank means "no date"
pub fn optional_date(input: Option<&DateInput>) -> Result<Option<EffectiveDate>> {
    match input {
        None => Ok(None),
        Some(d) if d.is_blank() => Ok(None),
        Some(d) => EffectiveDate::from_input(d).map(Some),
    }
}

/// Validate a required date argument
pub fn required_date(input: Option<&DateInput>) -> Result<EffectiveDate> {
    match input {
        None => Err(TaxError::date_required()),
        Some(d) if d.is_blank() => Err(TaxError::date_required()),
        Some(d) => EffectiveDate::from_input(d),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_45000() {
        let date = EffectiveDate::from_serial(45000.0).unwrap();
        assert_eq!(date.to_string(), "2023-03-15");
    }

    #[test]
    fn test_serial_epoch_and_fraction() {
        assert_eq!(
            EffectiveDate::from_serial(0.0).unwrap().to_string(),
            "1899-12-30"
        );
        // 45000.75 is 6pm on the same day
        assert_eq!(
            EffectiveDate::from_serial(45000.75).unwrap().to_string(),
            "2023-03-15"
        );
    }

    #[test]
    fn test_serial_out_of_range() {
        assert!(EffectiveDate::from_serial(f64::NAN).is_err());
        assert!(EffectiveDate::from_serial(f64::INFINITY).is_err());
        assert!(EffectiveDate::from_serial(1.0e9).is_err());
        assert!(EffectiveDate::from_input(&DateInput::Serial(-700_000.0)).is_err());
    }

    #[test]
    fn test_parse_iso_text() {
        assert_eq!(
            EffectiveDate::parse("2025-06-15").unwrap(),
            EffectiveDate::from_ymd(2025, 6, 15).unwrap()
        );
        assert_eq!(
            EffectiveDate::parse(" 2024-01-01 ").unwrap().to_string(),
            "2024-01-01"
        );
    }

    #[test]
    fn test_parse_rejects_other_layouts() {
        for bad in ["2024/01/01", "01-15-2024", "2024-1-1", "20240101", "yesterday"] {
            let err = EffectiveDate::parse(bad).unwrap_err();
            assert_eq!(err, TaxError::invalid_date(), "{bad}");
        }
        // Right shape, impossible day
        assert!(EffectiveDate::parse("2024-02-30").is_err());
    }

    #[test]
    fn test_parse_arg_picks_serial_for_numbers() {
        assert_eq!(DateInput::parse_arg("45000"), DateInput::Serial(45000.0));
        assert_eq!(
            DateInput::parse_arg("2025-06-15"),
            DateInput::Text("2025-06-15".to_string())
        );
    }

    #[test]
    fn test_optional_and_required() {
        assert_eq!(optional_date(None).unwrap(), None);
        assert_eq!(optional_date(Some(&DateInput::from("  "))).unwrap(), None);
        assert_eq!(
            required_date(Some(&DateInput::from(""))).unwrap_err(),
            TaxError::date_required()
        );
        assert_eq!(required_date(None).unwrap_err(), TaxError::date_required());
        assert_eq!(
            required_date(Some(&DateInput::from(45000i64)))
                .unwrap()
                .to_string(),
            "2023-03-15"
        );
    }
}
