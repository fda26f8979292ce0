//! EMV card key derivation: Unique DEA Key (UDK) from the issuer master key and the per
//! transaction session key from the UDK.
//!
//! Reference: EMV Book 2 Annex A1.4 (master key derivation) and A1.3 (common session key
//! derivation) as profiled by the Visa and Mastercard cryptogram versions 10, 14, 18 and 22.

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::hexutil::{decode_hex, encode_hex, extract_digits, xor};
use crate::tdes;
use crate::validate::{check_hexadecimal, check_key, check_numeric, check_pan, left_pad};
use crate::{get_truncated_pan, Error, Result};

const UDK_INPUT_DIGITS: usize = 16;
const INVERSION_MASK: [u8; 8] = [0xFF; 8];

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum UdkDerivationOption {
    #[default]
    A,
    B,
}

impl UdkDerivationOption {
    /// Option A for PANs of up to 16 digits, option B for the longer ones.
    pub fn for_pan(pan: &str) -> UdkDerivationOption {
        if pan.len() > UDK_INPUT_DIGITS {
            UdkDerivationOption::B
        } else {
            UdkDerivationOption::A
        }
    }
}

impl FromStr for UdkDerivationOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "A" | "a" => Ok(UdkDerivationOption::A),
            "B" | "b" => Ok(UdkDerivationOption::B),
            _ => Err(Error::unsupported("UDK derivation option", s)),
        }
    }
}

impl fmt::Display for UdkDerivationOption {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UdkDerivationOption::A => write!(f, "A"),
            UdkDerivationOption::B => write!(f, "B"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(try_from = "u8", into = "u8")]
pub enum CryptogramVersionNumber {
    Cvn10,
    Cvn14,
    Cvn18,
    Cvn22,
}

impl CryptogramVersionNumber {
    pub fn from_number(number: u8) -> Option<CryptogramVersionNumber> {
        match number {
            10 => Some(CryptogramVersionNumber::Cvn10),
            14 => Some(CryptogramVersionNumber::Cvn14),
            18 => Some(CryptogramVersionNumber::Cvn18),
            22 => Some(CryptogramVersionNumber::Cvn22),
            _ => None,
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            CryptogramVersionNumber::Cvn10 => 10,
            CryptogramVersionNumber::Cvn14 => 14,
            CryptogramVersionNumber::Cvn18 => 18,
            CryptogramVersionNumber::Cvn22 => 22,
        }
    }

    /// CVN 10 and 14 use the UDK as such, 18 and 22 derive a key per ATC
    pub fn derives_session_key(&self) -> bool {
        match self {
            CryptogramVersionNumber::Cvn10 | CryptogramVersionNumber::Cvn14 => false,
            CryptogramVersionNumber::Cvn18 | CryptogramVersionNumber::Cvn22 => true,
        }
    }

    /// Byte appended to the transaction data before zero padding
    pub fn padding_trailer(&self) -> u8 {
        if self.derives_session_key() {
            0x80
        } else {
            0x00
        }
    }
}

impl TryFrom<u8> for CryptogramVersionNumber {
    type Error = Error;

    fn try_from(number: u8) -> Result<Self> {
        CryptogramVersionNumber::from_number(number)
            .ok_or_else(|| Error::unsupported("cryptogram version number", number.to_string()))
    }
}

impl From<CryptogramVersionNumber> for u8 {
    fn from(cvn: CryptogramVersionNumber) -> u8 {
        cvn.number()
    }
}

impl FromStr for CryptogramVersionNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u8>()
            .ok()
            .and_then(CryptogramVersionNumber::from_number)
            .ok_or_else(|| Error::unsupported("cryptogram version number", s))
    }
}

impl fmt::Display for CryptogramVersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Double length TDEA key held by value for the duration of one computation.
#[derive(Clone, PartialEq, Eq)]
pub struct DoubleLengthKey([u8; 16]);

impl DoubleLengthKey {
    pub fn from_halves(left: &[u8], right: &[u8]) -> Result<DoubleLengthKey> {
        if left.len() != 8 || right.len() != 8 {
            return Err(Error::CryptoPrimitive(format!(
                "8 byte key halves expected, received {} and {} bytes",
                left.len(),
                right.len()
            )));
        }

        let mut key = [0u8; 16];
        key[..8].copy_from_slice(left);
        key[8..].copy_from_slice(right);
        Ok(DoubleLengthKey(key))
    }

    /// Keys entering from requests have their parity bits set to odd parity, DES ignores them.
    pub fn from_hex(field: &'static str, key: &str) -> Result<DoubleLengthKey> {
        check_key(field, key)?;
        let mut key = decode_hex(field, key)?;
        if !has_odd_parity(&key) {
            warn!("{} does not have odd parity, adjusting", field);
            adjust_odd_parity(&mut key);
        }

        DoubleLengthKey::from_halves(&key[..8], &key[8..])
    }

    pub fn left(&self) -> &[u8] {
        &self.0[..8]
    }

    pub fn right(&self) -> &[u8] {
        &self.0[8..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }

    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

impl fmt::Debug for DoubleLengthKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DoubleLengthKey(<redacted>)")
    }
}

/// Rightmost 16 digits of `PAN || PSN`, left padded with zeros for short PANs.
pub fn udk_input(pan: &str, pan_sequence_number: &str) -> Result<String> {
    check_pan(pan)?;
    check_numeric("PAN sequence number", pan_sequence_number, 1, 2)?;

    let data = format!("{}{}", pan, left_pad(pan_sequence_number, 2, '0'));
    let data = &data[data.len().saturating_sub(UDK_INPUT_DIGITS)..];

    Ok(left_pad(data, UDK_INPUT_DIGITS, '0'))
}

// SHA-1 runs over the 16 ASCII digits of the option A input
fn option_b_input(udk_input: &str) -> Result<Vec<u8>> {
    let hash = encode_hex(&tdes::digest(udk_input.as_bytes()));
    trace!("UDK option B hash: {}", hash);

    let digits = extract_digits(&hash, UDK_INPUT_DIGITS);
    decode_hex("UDK option B input", &digits)
}

pub fn derive_udk(
    master_key: &DoubleLengthKey,
    pan: &str,
    pan_sequence_number: &str,
    option: UdkDerivationOption,
) -> Result<DoubleLengthKey> {
    let input = udk_input(pan, pan_sequence_number)?;

    let left = match option {
        UdkDerivationOption::A => decode_hex("UDK input", &input)?,
        UdkDerivationOption::B => option_b_input(&input)?,
    };
    let right = xor(&left, &INVERSION_MASK)?;

    debug!(
        "Deriving UDK option {} for PAN {}",
        option,
        get_truncated_pan(pan)
    );

    DoubleLengthKey::from_halves(
        &tdes::encrypt_block(&left, master_key.as_bytes())?,
        &tdes::encrypt_block(&right, master_key.as_bytes())?,
    )
}

/// Session key for the cryptogram version, the UDK itself for CVN 10 and 14.
pub fn derive_session_key(
    udk: &DoubleLengthKey,
    cvn: CryptogramVersionNumber,
    atc: &[u8; 2],
) -> Result<DoubleLengthKey> {
    if !cvn.derives_session_key() {
        return Ok(udk.clone());
    }

    debug!("Deriving CVN {} session key", cvn);

    let mut left = [0u8; 8];
    left[..2].copy_from_slice(atc);
    left[2] = 0xF0;

    let mut right = [0u8; 8];
    right[..2].copy_from_slice(atc);
    right[2] = 0x0F;

    DoubleLengthKey::from_halves(
        &tdes::encrypt_block(&left, udk.as_bytes())?,
        &tdes::encrypt_block(&right, udk.as_bytes())?,
    )
}

/// Application Transaction Counter of 1 to 4 hex digits, left padded to 2 bytes.
pub fn parse_atc(atc: &str) -> Result<[u8; 2]> {
    check_hexadecimal("ATC", atc, 1, 4)?;
    let data = decode_hex("ATC", &left_pad(atc, 4, '0'))?;

    Ok([data[0], data[1]])
}

pub fn derive_udk_hex(
    master_key: &str,
    pan: &str,
    pan_sequence_number: &str,
    option: UdkDerivationOption,
) -> Result<String> {
    let master_key = DoubleLengthKey::from_hex("Master key", master_key)?;

    Ok(derive_udk(&master_key, pan, pan_sequence_number, option)?.to_hex())
}

pub fn derive_session_key_hex(
    udk: &str,
    cvn: CryptogramVersionNumber,
    atc: &str,
) -> Result<String> {
    let udk = DoubleLengthKey::from_hex("UDK", udk)?;

    Ok(derive_session_key(&udk, cvn, &parse_atc(atc)?)?.to_hex())
}

pub fn has_odd_parity(key: &[u8]) -> bool {
    key.iter().all(|b| b.count_ones() % 2 == 1)
}

/// Sets the low bit of every byte so that each byte has an odd number of one bits.
pub fn adjust_odd_parity(key: &mut [u8]) {
    for b in key.iter_mut() {
        let high_bits = *b & 0xFE;
        *b = if high_bits.count_ones() % 2 == 0 {
            high_bits | 0x01
        } else {
            high_bits
        };
    }
}
