use log::debug;
use serde::{Deserialize, Serialize};

use super::{add_digits, clamp_pin_length, subtract_digits, DecimalizationTable};
use crate::hexutil::{decode_hex, encode_hex};
use crate::keys::DoubleLengthKey;
use crate::tdes;
use crate::validate::{check_numeric, check_pan};
use crate::{get_truncated_pan, Error, Result, Warning};

const VALIDATION_DATA_DIGITS: usize = 16;

#[derive(Deserialize, Serialize, Clone)]
pub struct Ibm3624Request {
    pub pan: String,
    pub pin_verification_key: String,
    pub pin_length: usize,
    #[serde(default)]
    pub decimalization_table: Option<String>,
    #[serde(default)]
    pub offset: Option<String>,
}

#[derive(Serialize, Clone, PartialEq, Eq)]
pub struct PinResponse {
    pub pin: String,
    pub natural_pin: String,
    pub warnings: Vec<Warning>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct OffsetResponse {
    pub offset: String,
    pub warnings: Vec<Warning>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PinVerification {
    pub verified: bool,
    pub warnings: Vec<Warning>,
}

/// PAN truncated on the right to 16 digits, right padded with zeros when shorter.
pub fn pin_validation_data(pan: &str) -> Result<String> {
    check_pan(pan)?;

    let mut data: String = pan.chars().take(VALIDATION_DATA_DIGITS).collect();
    data.extend(std::iter::repeat('0').take(VALIDATION_DATA_DIGITS - data.len()));

    Ok(data)
}

pub fn natural_pin(
    pan: &str,
    pin_verification_key: &DoubleLengthKey,
    pin_length: usize,
    table: &DecimalizationTable,
) -> Result<String> {
    let data = decode_hex("PIN validation data", &pin_validation_data(pan)?)?;
    let encrypted = tdes::encrypt_block(&data, pin_verification_key.as_bytes())?;

    let decimalized = table.decimalize(&encode_hex(&encrypted))?;

    Ok(decimalized.chars().take(pin_length).collect())
}

struct Prepared {
    pin_length: usize,
    natural_pin: String,
    warnings: Vec<Warning>,
}

fn prepare(request: &Ibm3624Request) -> Result<Prepared> {
    let key = DoubleLengthKey::from_hex("PVK", &request.pin_verification_key)?;

    let mut warnings: Vec<Warning> = Vec::new();
    let pin_length = clamp_pin_length(request.pin_length, &mut warnings);
    let table =
        DecimalizationTable::or_default(request.decimalization_table.as_deref(), &mut warnings);

    let natural_pin = natural_pin(&request.pan, &key, pin_length, &table)?;
    debug!(
        "IBM 3624 natural PIN computed for PAN {}",
        get_truncated_pan(&request.pan)
    );

    Ok(Prepared {
        pin_length,
        natural_pin,
        warnings,
    })
}

/// The rightmost `pin_length` digits of the offset.
fn offset_digits(offset: &str, pin_length: usize) -> Result<&str> {
    check_numeric("Offset", offset, 1, VALIDATION_DATA_DIGITS)?;
    if offset.len() < pin_length {
        return Err(Error::format(
            "Offset",
            format!(
                "at least {} digits expected, received {}",
                pin_length,
                offset.len()
            ),
        ));
    }

    Ok(&offset[offset.len() - pin_length..])
}

/// Natural PIN, or the customer PIN when the request carries an offset.
pub fn generate_pin(request: &Ibm3624Request) -> Result<PinResponse> {
    let prepared = prepare(request)?;

    let pin = match &request.offset {
        Some(offset) => add_digits(
            "PIN",
            &prepared.natural_pin,
            offset_digits(offset, prepared.pin_length)?,
        )?,
        None => prepared.natural_pin.clone(),
    };

    Ok(PinResponse {
        pin,
        natural_pin: prepared.natural_pin,
        warnings: prepared.warnings,
    })
}

/// Offset turning the natural PIN into the customer selected one.
pub fn derive_offset(customer_pin: &str, natural_pin: &str) -> Result<String> {
    subtract_digits("Offset", customer_pin, natural_pin)
}

pub fn derive_natural_pin(customer_pin: &str, offset: &str) -> Result<String> {
    subtract_digits("Natural PIN", customer_pin, offset)
}

pub fn generate_offset(request: &Ibm3624Request, customer_pin: &str) -> Result<OffsetResponse> {
    let prepared = prepare(request)?;
    check_numeric(
        "Customer PIN",
        customer_pin,
        prepared.pin_length,
        prepared.pin_length,
    )?;

    Ok(OffsetResponse {
        offset: derive_offset(customer_pin, &prepared.natural_pin)?,
        warnings: prepared.warnings,
    })
}

/// Checks the customer PIN against the natural PIN and the request's offset, a request without
/// an offset compares the natural PIN itself.
pub fn verify_pin(request: &Ibm3624Request, customer_pin: &str) -> Result<PinVerification> {
    let prepared = prepare(request)?;
    check_numeric(
        "Customer PIN",
        customer_pin,
        prepared.pin_length,
        prepared.pin_length,
    )?;

    let expected = match &request.offset {
        Some(offset) => add_digits(
            "PIN",
            &prepared.natural_pin,
            offset_digits(offset, prepared.pin_length)?,
        )?,
        None => prepared.natural_pin,
    };

    Ok(PinVerification {
        verified: expected == customer_pin,
        warnings: prepared.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{init_logging, TEST_KEY};

    const PAN: &str = "4000001234562000";

    fn request(pin_length: usize, offset: Option<&str>) -> Ibm3624Request {
        Ibm3624Request {
            pan: PAN.to_string(),
            pin_verification_key: TEST_KEY.to_string(),
            pin_length,
            decimalization_table: None,
            offset: offset.map(str::to_string),
        }
    }

    #[test]
    fn test_validation_data() -> Result<()> {
        assert_eq!(pin_validation_data(PAN)?, PAN);
        assert_eq!(
            pin_validation_data("4000001234562000123")?,
            "4000001234562000"
        );
        assert_eq!(pin_validation_data("4000001234562")?, "4000001234562000");
        assert!(pin_validation_data("400000123456").is_err());

        Ok(())
    }

    #[test]
    fn test_natural_pin() -> Result<()> {
        init_logging();

        let key = DoubleLengthKey::from_hex("PVK", TEST_KEY)?;
        let table = DecimalizationTable::default();

        assert_eq!(natural_pin(PAN, &key, 4, &table)?, "7011");
        assert_eq!(natural_pin(PAN, &key, 16, &table)?, "7011422238600073");
        assert_eq!(
            natural_pin("4000001234562000123", &key, 4, &table)?,
            "7011"
        );
        assert_eq!(natural_pin("4000001234562", &key, 4, &table)?, "7011");
        assert_eq!(
            natural_pin(
                PAN,
                &key,
                4,
                &DecimalizationTable::parse("9876543210123456")?
            )?,
            "2928"
        );

        Ok(())
    }

    #[test]
    fn test_pin_with_offset() -> Result<()> {
        let response = generate_pin(&request(4, Some("1111")))?;
        assert_eq!(response.natural_pin, "7011");
        assert_eq!(response.pin, "8122");
        assert!(response.warnings.is_empty());

        let response = generate_pin(&request(6, Some("123456")))?;
        assert_eq!(response.natural_pin, "701142");
        assert_eq!(response.pin, "824598");

        // rightmost digits of a longer offset
        let response = generate_pin(&request(4, Some("00001111")))?;
        assert_eq!(response.pin, "8122");

        let response = generate_pin(&request(4, None))?;
        assert_eq!(response.pin, "7011");

        assert!(matches!(
            generate_pin(&request(6, Some("1111"))),
            Err(Error::Format { field: "Offset", .. })
        ));

        Ok(())
    }

    #[test]
    fn test_warnings() -> Result<()> {
        let mut bad_table = request(2, None);
        bad_table.decimalization_table = Some("01234567890123".to_string());

        let response = generate_pin(&bad_table)?;
        assert_eq!(response.pin, "7011");
        assert_eq!(response.warnings.len(), 2);
        assert_eq!(
            response.warnings[0],
            Warning::PinLengthClamped {
                requested: 2,
                applied: 4
            }
        );
        assert!(matches!(
            response.warnings[1],
            Warning::DefaultDecimalizationTable { .. }
        ));

        Ok(())
    }

    #[test]
    fn test_offset_arithmetic() -> Result<()> {
        assert_eq!(derive_offset("2345", "1234")?, "1111");
        assert_eq!(derive_offset("1234", "2345")?, "9999");
        assert_eq!(derive_natural_pin("2345", "1111")?, "1234");

        Ok(())
    }

    #[test]
    fn test_generate_offset() -> Result<()> {
        assert_eq!(generate_offset(&request(4, None), "8122")?.offset, "1111");
        assert!(generate_offset(&request(4, None), "81220").is_err());

        Ok(())
    }

    #[test]
    fn test_verify_pin() -> Result<()> {
        assert!(verify_pin(&request(4, Some("1111")), "8122")?.verified);
        assert!(!verify_pin(&request(4, Some("1111")), "7011")?.verified);
        assert!(verify_pin(&request(4, None), "7011")?.verified);

        Ok(())
    }
}
