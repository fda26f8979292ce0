//! ISO 9564-1 PIN block formats 0 and 1.

use log::debug;
use rand::prelude::*;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::bcdutil::{ascii_to_bcd_cn, bcd_digits};
use crate::hexutil::{decode_hex, encode_hex, xor};
use crate::keys::DoubleLengthKey;
use crate::tdes;
use crate::validate::{check_hexadecimal, check_numeric, check_pan};
use crate::{Error, Result};

pub const MIN_PIN_BLOCK_PIN_LENGTH: usize = 4;
pub const MAX_PIN_BLOCK_PIN_LENGTH: usize = 12;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum PinBlockFormat {
    /// ISO 9564 format 0 (ANSI X9.8), PIN XORed with the PAN
    Iso0,
    /// ISO 9564 format 1, random fill and no PAN
    Iso1,
}

impl PinBlockFormat {
    pub fn from_nibble(nibble: u8) -> Result<PinBlockFormat> {
        match nibble {
            0x0 => Ok(PinBlockFormat::Iso0),
            0x1 => Ok(PinBlockFormat::Iso1),
            _ => Err(Error::unsupported("PIN block format", format!("{:X}", nibble))),
        }
    }

    pub fn nibble(&self) -> u8 {
        match self {
            PinBlockFormat::Iso0 => 0x0,
            PinBlockFormat::Iso1 => 0x1,
        }
    }
}

impl FromStr for PinBlockFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "0" => Ok(PinBlockFormat::Iso0),
            "1" => Ok(PinBlockFormat::Iso1),
            _ => Err(Error::unsupported("PIN block format", s)),
        }
    }
}

impl fmt::Display for PinBlockFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ISO-{}", self.nibble())
    }
}

/// `0000 || rightmost 12 PAN digits excluding the check digit`
///
/// ISO 9564-1 takes the account number from the right end of the PAN, so for 17 to 19 digit
/// PANs the leading digits past the third one are left out as well.
pub fn pan_operand(pan: &str) -> Result<Vec<u8>> {
    check_pan(pan)?;

    let account_number = &pan[pan.len() - 13..pan.len() - 1];
    decode_hex("PAN", &format!("0000{}", account_number))
}

fn fill_random(data: &mut [u8]) -> Result<()> {
    let mut rng = ChaCha20Rng::from_entropy();
    rng.try_fill(data)
        .map_err(|err| Error::CryptoPrimitive(err.to_string()))
}

/// Clear PIN block before the PAN operand: control nibbles, PIN digits and fill.
pub fn plain_block(format: PinBlockFormat, pin: &str) -> Result<Vec<u8>> {
    check_numeric(
        "PIN",
        pin,
        MIN_PIN_BLOCK_PIN_LENGTH,
        MAX_PIN_BLOCK_PIN_LENGTH,
    )?;

    let mut block: Vec<u8> = Vec::with_capacity(8);
    block.push((format.nibble() << 4) | pin.len() as u8);
    block.extend(ascii_to_bcd_cn("PIN", pin.as_bytes(), 7)?);

    if format == PinBlockFormat::Iso1 {
        let mut fill = [0u8; 8];
        fill_random(&mut fill)?;

        for nibble in 2 + pin.len()..16 {
            let i = nibble / 2;
            block[i] = if nibble % 2 == 0 {
                (fill[i] & 0xF0) | (block[i] & 0x0F)
            } else {
                (block[i] & 0xF0) | (fill[i] & 0x0F)
            };
        }
    }

    Ok(block)
}

/// Encrypted PIN block as 16 hex digits, the PAN is needed by format 0 only.
pub fn encode_pin_block(
    format: PinBlockFormat,
    pin: &str,
    pan: Option<&str>,
    zone_pin_key: &str,
) -> Result<String> {
    let key = DoubleLengthKey::from_hex("ZPK", zone_pin_key)?;
    let plain = plain_block(format, pin)?;

    let clear = match format {
        PinBlockFormat::Iso0 => {
            let pan = pan.ok_or_else(|| Error::format("PAN", "format 0 needs the PAN"))?;
            xor(&plain, &pan_operand(pan)?)?
        }
        PinBlockFormat::Iso1 => plain,
    };

    debug!("Encoding {} PIN block", format);

    Ok(encode_hex(&tdes::encrypt_block(&clear, key.as_bytes())?))
}

#[derive(Serialize, Clone, PartialEq, Eq)]
pub struct DecodedPinBlock {
    pub format: PinBlockFormat,
    pub pin: String,
    pub pin_length: usize,
    /// Decrypted block, after the PAN operand is removed for format 0
    pub clear_block: String,
}

pub fn decode_pin_block(
    pin_block: &str,
    pan: Option<&str>,
    zone_pin_key: &str,
) -> Result<DecodedPinBlock> {
    check_hexadecimal("PIN block", pin_block, 16, 16)?;
    let key = DoubleLengthKey::from_hex("ZPK", zone_pin_key)?;

    let decrypted = tdes::decrypt_block(&decode_hex("PIN block", pin_block)?, key.as_bytes())?;
    let format = PinBlockFormat::from_nibble(decrypted[0] >> 4)?;

    let clear = match format {
        PinBlockFormat::Iso0 => {
            let pan = pan.ok_or_else(|| Error::format("PAN", "format 0 needs the PAN"))?;
            xor(&decrypted, &pan_operand(pan)?)?
        }
        PinBlockFormat::Iso1 => decrypted,
    };

    let pin_length = usize::from(clear[0] & 0x0F);
    if !(MIN_PIN_BLOCK_PIN_LENGTH..=MAX_PIN_BLOCK_PIN_LENGTH).contains(&pin_length) {
        return Err(Error::format(
            "PIN block",
            format!("PIN length {} is out of range", pin_length),
        ));
    }

    let pin = bcd_digits("PIN block", &clear, 2, pin_length)?;

    if format == PinBlockFormat::Iso0 {
        let fill_is_valid = (2 + pin_length..16).all(|nibble| {
            let b = clear[nibble / 2];
            let value = if nibble % 2 == 0 { b >> 4 } else { b & 0x0F };
            value == 0xF
        });
        if !fill_is_valid {
            return Err(Error::format("PIN block", "format 0 fill must be F"));
        }
    }

    debug!("Decoded {} PIN block", format);

    Ok(DecodedPinBlock {
        format,
        pin,
        pin_length,
        clear_block: encode_hex(&clear),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{init_logging, TEST_KEY};

    #[test]
    fn test_pan_operand() -> Result<()> {
        assert_eq!(
            hex::encode_upper(pan_operand("4123456789012345")?),
            "0000345678901234"
        );
        assert_eq!(
            hex::encode_upper(pan_operand("4123456789012345678")?),
            "0000678901234567"
        );
        assert_eq!(
            hex::encode_upper(pan_operand("4123456789012")?),
            "0000412345678901"
        );

        Ok(())
    }

    #[test]
    fn test_long_pan_operand_skips_leading_digits() -> Result<()> {
        // the fixed window from the fourth digit matches for 16 digit PANs only
        let pan = "4123456789012345";
        assert_eq!(hex::encode_upper(pan_operand(pan)?), format!("0000{}", &pan[3..15]));

        let pan = "4123456789012345678";
        assert_ne!(hex::encode_upper(pan_operand(pan)?), format!("0000{}", &pan[3..15]));
        assert_eq!(
            hex::encode_upper(pan_operand(pan)?),
            format!("0000{}", &pan[pan.len() - 13..pan.len() - 1])
        );

        Ok(())
    }

    #[test]
    fn test_iso0_known_answer() -> Result<()> {
        init_logging();

        let plain = plain_block(PinBlockFormat::Iso0, "1234")?;
        let clear = xor(&plain, &pan_operand("4123456789012345")?)?;
        assert_eq!(hex::encode_upper(&clear), "041200A9876FEDCB");

        assert_eq!(
            encode_pin_block(
                PinBlockFormat::Iso0,
                "1234",
                Some("4123456789012345"),
                TEST_KEY
            )?,
            "DDDED427C7FC1DC9"
        );
        assert_eq!(
            encode_pin_block(
                PinBlockFormat::Iso0,
                "123456789012",
                Some("4123456789012345678"),
                TEST_KEY
            )?,
            "0A40B30625DB2086"
        );

        let decoded = decode_pin_block("DDDED427C7FC1DC9", Some("4123456789012345"), TEST_KEY)?;
        assert_eq!(decoded.format, PinBlockFormat::Iso0);
        assert_eq!(decoded.pin, "1234");
        assert_eq!(decoded.pin_length, 4);
        assert_eq!(decoded.clear_block, "041234FFFFFFFFFF");

        Ok(())
    }

    #[test]
    fn test_round_trip() -> Result<()> {
        let pans = [
            "4123456789012345",
            "41234567890123456",
            "412345678901234567",
            "4123456789012345678",
        ];

        for format in [PinBlockFormat::Iso0, PinBlockFormat::Iso1] {
            for (i, pan) in pans.iter().enumerate() {
                for pin_length in 4..=12 {
                    let pin: String = (0..pin_length)
                        .map(|d| char::from(b'0' + ((d + i) % 10) as u8))
                        .collect();

                    let block = encode_pin_block(format, &pin, Some(pan), TEST_KEY)?;
                    let decoded = decode_pin_block(&block, Some(pan), TEST_KEY)?;
                    assert_eq!(decoded.format, format);
                    assert_eq!(decoded.pin, pin);
                    assert_eq!(decoded.pin_length, pin_length);
                }
            }
        }

        Ok(())
    }

    #[test]
    fn test_iso1_fill() -> Result<()> {
        let block = plain_block(PinBlockFormat::Iso1, "1234")?;
        assert_eq!(&block[..3], [0x14, 0x12, 0x34]);

        let block = encode_pin_block(PinBlockFormat::Iso1, "1234", None, TEST_KEY)?;
        let decoded = decode_pin_block(&block, None, TEST_KEY)?;
        assert_eq!(decoded.pin, "1234");
        assert!(decoded.clear_block.starts_with("141234"));

        Ok(())
    }

    #[test]
    fn test_format_selection() {
        assert!(matches!("0".parse::<PinBlockFormat>(), Ok(PinBlockFormat::Iso0)));
        assert!(matches!("1".parse::<PinBlockFormat>(), Ok(PinBlockFormat::Iso1)));
        assert!(matches!(
            "3".parse::<PinBlockFormat>(),
            Err(Error::UnsupportedVariant { .. })
        ));
        assert_eq!(PinBlockFormat::Iso0.to_string(), "ISO-0");
    }

    #[test]
    fn test_rejected_pins() {
        for pin in ["123", "1234567890123", "12A4"] {
            assert!(matches!(
                encode_pin_block(PinBlockFormat::Iso0, pin, Some("4123456789012345"), TEST_KEY),
                Err(Error::Format { field: "PIN", .. })
            ));
        }
        assert!(encode_pin_block(PinBlockFormat::Iso0, "1234", None, TEST_KEY).is_err());
    }

    #[test]
    fn test_rejected_blocks() -> Result<()> {
        let key = hex::decode(TEST_KEY).unwrap();
        let encrypt = |clear: &str| {
            hex::encode_upper(tdes::encrypt_block(&hex::decode(clear).unwrap(), &key).unwrap())
        };

        // format 3
        assert!(matches!(
            decode_pin_block(&encrypt("341234FFFFFFFFFF"), None, TEST_KEY),
            Err(Error::UnsupportedVariant { .. })
        ));
        // length nibble 2
        assert!(matches!(
            decode_pin_block(&encrypt("121234FFFFFFFFFF"), None, TEST_KEY),
            Err(Error::Format { .. })
        ));
        // non-digit PIN character
        assert!(matches!(
            decode_pin_block(&encrypt("14123AFFFFFFFFFF"), None, TEST_KEY),
            Err(Error::Format { .. })
        ));

        // format 0 decoded with the wrong PAN leaves the fill broken
        let block = encode_pin_block(
            PinBlockFormat::Iso0,
            "1234",
            Some("4123456789012345"),
            TEST_KEY,
        )?;
        assert!(decode_pin_block(&block, Some("4123456789000000"), TEST_KEY).is_err());

        Ok(())
    }
}
