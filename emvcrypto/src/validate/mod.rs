//! Character-class predicates and field contracts checked inside the algorithms.

use chrono::NaiveDate;

use crate::{Error, Result};

pub const MIN_PAN_LENGTH: usize = 13;
pub const MAX_PAN_LENGTH: usize = 19;

pub fn is_numeric(data: &str) -> bool {
    !data.is_empty() && data.bytes().all(|c| c.is_ascii_digit())
}

pub fn is_hexadecimal(data: &str) -> bool {
    !data.is_empty() && data.bytes().all(|c| c.is_ascii_hexdigit())
}

fn check_length(field: &'static str, data: &str, min: usize, max: usize) -> Result<()> {
    if data.len() < min || data.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(Error::format(
            field,
            format!("{} characters expected, received {}", expected, data.len()),
        ));
    }

    Ok(())
}

pub fn check_numeric(field: &'static str, data: &str, min: usize, max: usize) -> Result<()> {
    check_length(field, data, min, max)?;
    if !is_numeric(data) {
        return Err(Error::format(field, "numeric value expected"));
    }

    Ok(())
}

pub fn check_hexadecimal(field: &'static str, data: &str, min: usize, max: usize) -> Result<()> {
    check_length(field, data, min, max)?;
    if !is_hexadecimal(data) {
        return Err(Error::format(field, "hexadecimal value expected"));
    }

    Ok(())
}

pub fn check_pan(pan: &str) -> Result<()> {
    check_numeric("PAN", pan, MIN_PAN_LENGTH, MAX_PAN_LENGTH)
}

/// Double length TDEA key, 32 hexadecimal digits
pub fn check_key(field: &'static str, key: &str) -> Result<()> {
    check_hexadecimal(field, key, 32, 32)
}

pub fn left_pad(data: &str, width: usize, pad: char) -> String {
    let mut padded: String = std::iter::repeat(pad)
        .take(width.saturating_sub(data.len()))
        .collect();
    padded.push_str(data);
    padded
}

/// Converts an ISO `YYYY-MM-DD` date into the `YYMMDD` order of EMV tag 9A.
pub fn iso_date_to_yymmdd(field: &'static str, date: &str) -> Result<String> {
    if date.len() != 10 {
        return Err(Error::format(field, "ISO date YYYY-MM-DD expected"));
    }

    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(date) => Ok(date.format("%y%m%d").to_string()),
        Err(err) => Err(Error::format(
            field,
            format!("ISO date YYYY-MM-DD expected ({})", err),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(is_numeric("0123456789"));
        assert!(!is_numeric(""));
        assert!(!is_numeric("12A4"));

        assert!(is_hexadecimal("0123456789abcdefABCDEF"));
        assert!(!is_hexadecimal(""));
        assert!(!is_hexadecimal("12G4"));
    }

    #[test]
    fn test_field_contracts() {
        assert!(check_pan("4761739001010119").is_ok());
        assert!(check_pan("4111111111111").is_ok());
        assert!(check_pan("411111111111").is_err());
        assert!(check_pan("41111111111111111111").is_err());
        assert!(check_pan("476173900101011X").is_err());

        assert!(check_key("MDK", "0123456789ABCDEFFEDCBA9876543210").is_ok());
        assert!(check_key("MDK", "0123456789ABCDEF").is_err());

        match check_hexadecimal("TVR", "00000000", 10, 10) {
            Err(Error::Format { field, reason }) => {
                assert_eq!(field, "TVR");
                assert_eq!(reason, "10 characters expected, received 8");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_left_pad() {
        assert_eq!(left_pad("840", 4, '0'), "0840");
        assert_eq!(left_pad("0840", 4, '0'), "0840");
        assert_eq!(left_pad("12345", 4, '0'), "12345");
    }

    #[test]
    fn test_iso_date() -> Result<()> {
        assert_eq!(iso_date_to_yymmdd("Date", "2024-03-15")?, "240315");
        assert_eq!(iso_date_to_yymmdd("Date", "1999-12-31")?, "991231");

        assert!(iso_date_to_yymmdd("Date", "2024-02-30").is_err());
        assert!(iso_date_to_yymmdd("Date", "240315").is_err());
        assert!(iso_date_to_yymmdd("Date", "2024-3-15").is_err());

        Ok(())
    }
}
