//! Visa PIN Verification Value.

use log::debug;
use serde::{Deserialize, Serialize};

use super::pinblock::{MAX_PIN_BLOCK_PIN_LENGTH, MIN_PIN_BLOCK_PIN_LENGTH};
use crate::hexutil::{decode_hex, encode_hex, extract_digits};
use crate::keys::DoubleLengthKey;
use crate::tdes;
use crate::validate::{check_numeric, check_pan};
use crate::{get_truncated_pan, Result};

const PVV_DIGITS: usize = 4;

#[derive(Deserialize, Serialize, Clone)]
pub struct PvvRequest {
    pub pan: String,
    pub pin_verification_key_index: String,
    pub pin: String,
    pub pin_verification_key: String,
}

/// TSP: rightmost 11 PAN digits excluding the check digit, PVKI and the leftmost 4 PIN digits.
pub fn transformation_security_parameter(
    pan: &str,
    pin_verification_key_index: &str,
    pin: &str,
) -> Result<String> {
    check_pan(pan)?;
    check_numeric("PVKI", pin_verification_key_index, 1, 1)?;
    check_numeric(
        "PIN",
        pin,
        MIN_PIN_BLOCK_PIN_LENGTH,
        MAX_PIN_BLOCK_PIN_LENGTH,
    )?;

    Ok(format!(
        "{}{}{}",
        &pan[pan.len() - 12..pan.len() - 1],
        pin_verification_key_index,
        &pin[..4]
    ))
}

pub fn generate_pvv(request: &PvvRequest) -> Result<String> {
    let tsp = transformation_security_parameter(
        &request.pan,
        &request.pin_verification_key_index,
        &request.pin,
    )?;
    let key = DoubleLengthKey::from_hex("PVK", &request.pin_verification_key)?;

    let encrypted = tdes::encrypt_block(&decode_hex("TSP", &tsp)?, key.as_bytes())?;

    debug!(
        "Generated PVV for PAN {} with PVKI {}",
        get_truncated_pan(&request.pan),
        request.pin_verification_key_index
    );

    Ok(extract_digits(&encode_hex(&encrypted), PVV_DIGITS))
}

pub fn verify_pvv(request: &PvvRequest, pvv: &str) -> Result<bool> {
    check_numeric("PVV", pvv, PVV_DIGITS, PVV_DIGITS)?;

    Ok(generate_pvv(request)? == pvv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{init_logging, TEST_KEY};
    use crate::Error;

    fn request(pan: &str, pvki: &str, pin: &str) -> PvvRequest {
        PvvRequest {
            pan: pan.to_string(),
            pin_verification_key_index: pvki.to_string(),
            pin: pin.to_string(),
            pin_verification_key: TEST_KEY.to_string(),
        }
    }

    #[test]
    fn test_tsp() -> Result<()> {
        assert_eq!(
            transformation_security_parameter("4123456789012345", "1", "1234")?,
            "4567890123411234"
        );
        assert_eq!(
            transformation_security_parameter("4761739001010119", "0", "987654")?,
            "7390010101109876"
        );

        Ok(())
    }

    #[test]
    fn test_pvv() -> Result<()> {
        init_logging();

        assert_eq!(generate_pvv(&request("4123456789012345", "1", "1234"))?, "1894");
        assert_eq!(generate_pvv(&request("4761739001010119", "0", "9876"))?, "7717");

        Ok(())
    }

    #[test]
    fn test_pvv_letter_fallback() -> Result<()> {
        // encrypted TSP CEEFAF6ACDCEF24C holds three decimal digits only
        assert_eq!(generate_pvv(&request("4123456789000000", "1", "4511"))?, "6242");

        Ok(())
    }

    #[test]
    fn test_verify_pvv() -> Result<()> {
        let request = request("4123456789012345", "1", "1234");
        assert!(verify_pvv(&request, "1894")?);
        assert!(!verify_pvv(&request, "1895")?);
        assert!(verify_pvv(&request, "189").is_err());

        Ok(())
    }

    #[test]
    fn test_rejected_fields() {
        assert!(matches!(
            generate_pvv(&request("4123456789012345", "12", "1234")),
            Err(Error::Format { field: "PVKI", .. })
        ));
        assert!(matches!(
            generate_pvv(&request("4123456789012345", "1", "123")),
            Err(Error::Format { field: "PIN", .. })
        ));
    }
}
