//! Card verification values: CVV on the magnetic stripe, CVV2 printed on the card and iCVV in
//! the chip's Track 2 equivalent data. The three share one algorithm and differ by service code.

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hexutil::{decimal_digits, decode_hex, encode_hex, xor};
use crate::keys::DoubleLengthKey;
use crate::tdes;
use crate::validate::{check_numeric, check_pan};
use crate::{get_truncated_pan, Result, Track2};

const CVX_DIGITS: usize = 3;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum CvxType {
    Cvv,
    Cvv2,
    Icvv,
}

impl CvxType {
    pub fn for_service_code(service_code: &str) -> CvxType {
        match service_code {
            "000" => CvxType::Cvv2,
            "999" => CvxType::Icvv,
            _ => CvxType::Cvv,
        }
    }
}

impl fmt::Display for CvxType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CvxType::Cvv => write!(f, "CVV"),
            CvxType::Cvv2 => write!(f, "CVV2"),
            CvxType::Icvv => write!(f, "iCVV"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone)]
pub struct CvxRequest {
    pub pan: String,
    /// YYMM
    pub expiry_date: String,
    pub service_code: String,
    pub card_verification_key: String,
}

impl CvxRequest {
    /// Takes PAN, expiry date and service code from Track 2 data. An iCVV service code has to
    /// be set by the caller as the track carries the card's real one.
    pub fn from_track2(track2: &Track2, card_verification_key: &str) -> CvxRequest {
        CvxRequest {
            pan: track2.primary_account_number.clone(),
            expiry_date: track2.expiry_date(),
            service_code: track2.service_code.clone(),
            card_verification_key: card_verification_key.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CvxResponse {
    pub cvx_type: CvxType,
    pub value: String,
}

/// The value is made of the first three decimal digits of the final block, hex letters are
/// skipped. A block holding fewer than three decimal digits gives a shorter value.
pub fn generate_cvx(request: &CvxRequest) -> Result<CvxResponse> {
    check_pan(&request.pan)?;
    check_numeric("Expiry date", &request.expiry_date, 4, 4)?;
    check_numeric("Service code", &request.service_code, 3, 3)?;
    let key = DoubleLengthKey::from_hex("CVK", &request.card_verification_key)?;

    let mut data = format!(
        "{}{}{}",
        request.pan, request.expiry_date, request.service_code
    );
    data.extend(std::iter::repeat('0').take(32 - data.len()));
    let data = decode_hex("CVX data", &data)?;

    let (key_a, key_b) = (key.left(), key.right());

    let block = tdes::encrypt_block(&data[..8], key_a)?;
    let block = xor(&block, &data[8..])?;
    let block = tdes::encrypt_block(&block, key_a)?;
    let block = tdes::decrypt_block(&block, key_b)?;
    let block = tdes::encrypt_block(&block, key_a)?;

    let cvx_type = CvxType::for_service_code(&request.service_code);
    debug!(
        "Generated {} for PAN {}",
        cvx_type,
        get_truncated_pan(&request.pan)
    );

    Ok(CvxResponse {
        cvx_type,
        value: decimal_digits(&encode_hex(&block), CVX_DIGITS),
    })
}

pub fn verify_cvx(request: &CvxRequest, value: &str) -> Result<bool> {
    check_numeric("CVX", value, 1, CVX_DIGITS)?;

    Ok(generate_cvx(request)?.value == value)
}
