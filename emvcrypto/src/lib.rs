use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

pub mod bcdutil;
pub mod cryptogram;
pub mod cvx;
pub mod hexutil;
pub mod iad;
pub mod keys;
pub mod pin;
pub mod tdes;
pub mod validate;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure aborts the whole computation, no partial cryptographic output is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A field does not satisfy its numeric/hexadecimal/length contract
    #[error("{field}: {reason}")]
    Format { field: &'static str, reason: String },

    /// CVN, derivation option, IAD layout or PIN block format outside the supported set
    #[error("Unsupported {kind}: {value:?}")]
    UnsupportedVariant { kind: &'static str, value: String },

    /// Invalid key length, misaligned data or an OpenSSL failure
    #[error("Cryptographic primitive failure: {0}")]
    CryptoPrimitive(String),
}

impl Error {
    pub(crate) fn format(field: &'static str, reason: impl Into<String>) -> Error {
        Error::Format {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(kind: &'static str, value: impl Into<String>) -> Error {
        Error::UnsupportedVariant {
            kind,
            value: value.into(),
        }
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Error::CryptoPrimitive(err.to_string())
    }
}

/// Recoverable input problems which are corrected to a safe default.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    DefaultDecimalizationTable { reason: String },
    PinLengthClamped { requested: usize, applied: usize },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Warning::DefaultDecimalizationTable { reason } => {
                write!(f, "{}, using default decimalization table", reason)
            }
            Warning::PinLengthClamped { requested, applied } => write!(
                f,
                "PIN length {} is out of range, using PIN length {}",
                requested, applied
            ),
        }
    }
}

// PCI SSC PAN truncation rules ref. https://d30000001huxdea4.my.salesforce-sites.com/faq/articles/Frequently_Asked_Question/What-are-acceptable-formats-for-truncation-of-primary-account-numbers
pub fn get_truncated_pan(pan: &str) -> String {
    let uncensored_bin_prefix_length = if pan.len() > 15 { 8 } else { 6 };

    let truncated_pan: String = pan
        .chars()
        .enumerate()
        .map(|(i, c)| {
            if i >= uncensored_bin_prefix_length && i + 4 < pan.len() {
                '*'
            } else {
                c
            }
        })
        .collect();

    truncated_pan
}

pub fn is_visa_pan(pan: &str) -> bool {
    pan.starts_with('4')
}

fn track2_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^;?(\d{13,19})(=|D)(\d{2})(\d{2})(\d{3})(\d*)F?\??$")
            .expect("Track 2 pattern is a valid regex")
    })
}

#[derive(Debug, Clone)]
pub struct Track2 {
    pub primary_account_number: String,
    pub expiry_year: String,
    pub expiry_month: String,
    pub service_code: String,
    pub discretionary_data: String,
}

impl Track2 {
    pub fn new(track_data: &str) -> Result<Track2> {
        // Supports human readable and ICC formats
        // human readable: ;4321432143214321=2612101123456789123?
        // ICC: 4321432143214321D2612101123456789123F

        let cap = match track2_pattern().captures(track_data) {
            Some(cap) => cap,
            None => {
                return Err(Error::format(
                    "Track2",
                    "Track 2 equivalent data expected",
                ))
            }
        };

        let group = |i: usize| cap.get(i).map_or("", |m| m.as_str()).to_string();

        Ok(Track2 {
            primary_account_number: group(1),
            expiry_year: group(3),
            expiry_month: group(4),
            service_code: group(5),
            discretionary_data: group(6),
        })
    }

    /// Expiry date in the YYMM order used by card verification values
    pub fn expiry_date(&self) -> String {
        format!("{}{}", self.expiry_year, self.expiry_month)
    }

    pub fn censor(&mut self) {
        self.primary_account_number = get_truncated_pan(&self.primary_account_number);
        self.discretionary_data = self.discretionary_data.replace(|_c: char| true, "*");
    }
}

impl fmt::Display for Track2 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            ";{}={}{}{}{}?",
            self.primary_account_number,
            self.expiry_year,
            self.expiry_month,
            self.service_code,
            self.discretionary_data
        )
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use log::LevelFilter;
    use log4rs::{
        append::console::ConsoleAppender,
        config::{Appender, Root},
    };
    use std::sync::Once;

    static LOGGING: Once = Once::new();

    pub const TEST_KEY: &str = "0123456789ABCDEFFEDCBA9876543210";

    pub fn init_logging() {
        LOGGING.call_once(|| {
            let stdout: ConsoleAppender = ConsoleAppender::builder().build();
            let config = log4rs::config::Config::builder()
                .appender(Appender::builder().build("stdout", Box::new(stdout)))
                .build(Root::builder().appender("stdout").build(LevelFilter::Trace))
                .unwrap();
            log4rs::init_config(config).unwrap();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track2_human_readable() -> Result<()> {
        let track2_data = ";4321432143214321=2612101123456789123?";
        let track2_data_censored = ";43214321****4321=2612101************?";

        let mut track2: Track2 = Track2::new(track2_data)?;
        assert_eq!(format!("{}", track2), track2_data);

        assert_eq!(track2.primary_account_number, "4321432143214321");
        assert_eq!(track2.expiry_date(), "2612");
        assert_eq!(track2.service_code, "101");
        assert_eq!(track2.discretionary_data, "123456789123");

        track2.censor();
        assert_eq!(format!("{}", track2), track2_data_censored);

        Ok(())
    }

    #[test]
    fn test_track2_icc() -> Result<()> {
        let track2 = Track2::new("4321432143214321D2612101123456789123F")?;

        assert_eq!(
            format!("{}", track2),
            ";4321432143214321=2612101123456789123?"
        );
        assert_eq!(track2.expiry_year, "26");
        assert_eq!(track2.expiry_month, "12");

        Ok(())
    }

    #[test]
    fn test_track2_rejects_garbage() {
        assert!(matches!(
            Track2::new("%B4321432143214321^DOE/JOHN^2609101?"),
            Err(Error::Format { field: "Track2", .. })
        ));
    }

    #[test]
    fn test_track2_pattern_compiled_once() -> Result<()> {
        assert!(std::ptr::eq(track2_pattern(), track2_pattern()));

        Track2::new(";4321432143214321=2612101123456789123?")?;
        Track2::new("4321432143214321D2612101123456789123F")?;
        assert!(std::ptr::eq(track2_pattern(), track2_pattern()));

        Ok(())
    }

    #[test]
    fn test_pan_truncation() {
        assert_eq!(get_truncated_pan("0000000000000000"), "00000000****0000");
        assert_eq!(get_truncated_pan("000000000000000"), "000000*****0000");
        assert_eq!(get_truncated_pan("00000000000000"), "000000****0000");
        assert_eq!(get_truncated_pan("1234"), "1234");
    }

    #[test]
    fn test_visa_pan() {
        assert!(is_visa_pan("4761739001010119"));
        assert!(!is_visa_pan("5413330089010434"));
    }

    #[test]
    fn test_warning_messages() {
        let warning = Warning::PinLengthClamped {
            requested: 2,
            applied: 4,
        };
        assert_eq!(
            warning.to_string(),
            "PIN length 2 is out of range, using PIN length 4"
        );
    }
}
