//! PIN transforms: IBM 3624 natural PIN and offset, ISO 9564 PIN blocks and the Visa PVV.

use log::warn;
use std::fmt;

use crate::validate::is_numeric;
use crate::{Error, Result, Warning};

pub mod ibm3624;
pub mod pinblock;
pub mod pvv;

pub const MIN_PIN_LENGTH: usize = 4;
pub const MAX_PIN_LENGTH: usize = 16;

const DEFAULT_DECIMALIZATION_TABLE: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 1, 2, 3, 4, 5];

/// Maps each hex nibble to a decimal digit, entry `i` is the digit for nibble `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalizationTable([u8; 16]);

impl Default for DecimalizationTable {
    fn default() -> Self {
        DecimalizationTable(DEFAULT_DECIMALIZATION_TABLE)
    }
}

impl DecimalizationTable {
    pub fn parse(table: &str) -> Result<DecimalizationTable> {
        if table.len() != 16 || !is_numeric(table) {
            return Err(Error::format(
                "Decimalization table",
                "16 decimal digits expected",
            ));
        }

        let mut entries = [0u8; 16];
        for (entry, c) in entries.iter_mut().zip(table.bytes()) {
            *entry = c - b'0';
        }

        Ok(DecimalizationTable(entries))
    }

    /// Falls back to the default table when the given one is missing or malformed.
    pub fn or_default(table: Option<&str>, warnings: &mut Vec<Warning>) -> DecimalizationTable {
        let table = match table {
            Some(table) => table,
            None => return DecimalizationTable::default(),
        };

        match DecimalizationTable::parse(table) {
            Ok(table) => table,
            Err(err) => {
                let warning = Warning::DefaultDecimalizationTable {
                    reason: err.to_string(),
                };
                warn!("{}", warning);
                warnings.push(warning);
                DecimalizationTable::default()
            }
        }
    }

    pub fn decimalize(&self, hex_data: &str) -> Result<String> {
        hex_data
            .chars()
            .map(|c| match c.to_digit(16) {
                Some(nibble) => Ok(char::from(b'0' + self.0[nibble as usize])),
                None => Err(Error::format(
                    "Decimalization input",
                    "hexadecimal value expected",
                )),
            })
            .collect()
    }
}

impl fmt::Display for DecimalizationTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for digit in self.0.iter() {
            write!(f, "{}", digit)?;
        }
        Ok(())
    }
}

/// Clamps the PIN length into 4..=16, reporting the correction.
pub fn clamp_pin_length(requested: usize, warnings: &mut Vec<Warning>) -> usize {
    let applied = requested.clamp(MIN_PIN_LENGTH, MAX_PIN_LENGTH);
    if applied != requested {
        let warning = Warning::PinLengthClamped { requested, applied };
        warn!("{}", warning);
        warnings.push(warning);
    }

    applied
}

fn digitwise(
    field: &'static str,
    a: &str,
    b: &str,
    op: impl Fn(u8, u8) -> u8,
) -> Result<String> {
    if !is_numeric(a) || !is_numeric(b) {
        return Err(Error::format(field, "decimal digits expected"));
    }
    if a.len() != b.len() {
        return Err(Error::format(
            field,
            format!("equal lengths expected, received {} and {}", a.len(), b.len()),
        ));
    }

    Ok(a.bytes()
        .zip(b.bytes())
        .map(|(x, y)| char::from(b'0' + op(x - b'0', y - b'0')))
        .collect())
}

/// Digit-wise addition modulo 10 without carry.
pub fn add_digits(field: &'static str, a: &str, b: &str) -> Result<String> {
    digitwise(field, a, b, |x, y| (x + y) % 10)
}

/// Digit-wise subtraction modulo 10, a borrow adds 10 to the digit.
pub fn subtract_digits(field: &'static str, a: &str, b: &str) -> Result<String> {
    digitwise(field, a, b, |x, y| (x + 10 - y) % 10)
}
