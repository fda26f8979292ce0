//! Issuer Application Data (tag 9F10) decomposition.
//!
//! Visa layouts ref. VIS 1.6 Table A-1, Common Core Definitions ref. EMV Book 2 Annex C,
//! Mastercard layouts ref. M/Chip 2.05, 2.1/2.2 and M/Chip 4 card application specifications.

use log::debug;
use serde::Serialize;
use std::fmt;

use crate::hexutil::{decode_hex, encode_hex};
use crate::keys::CryptogramVersionNumber;
use crate::validate::check_hexadecimal;
use crate::{is_visa_pan, Error, Result};

const MCHIP_22_LENGTH: usize = 8;
const MCHIP_205_LENGTH: usize = 9;
const MCHIP_4_LENGTH: usize = 18;
const MCHIP_4_WITH_ATC_LENGTH: usize = 20;
const CCD_LENGTH: usize = 32;
const CCD_LENGTH_INDICATOR: u8 = 0x0F;
const VISA_FORMAT_2_LENGTH_INDICATOR: u8 = 0x1F;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MChipData {
    pub derivation_key_index: u8,
    pub cryptogram_version: u8,
    pub card_verification_results: Vec<u8>,
    pub dac_idn: Vec<u8>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MChip4Data {
    pub derivation_key_index: u8,
    pub cryptogram_version: u8,
    pub card_verification_results: Vec<u8>,
    pub dac_idn: Vec<u8>,
    pub counters: Vec<u8>,
    pub last_online_atc: Option<Vec<u8>>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CcdData {
    pub length_indicator: u8,
    pub common_core_identifier: u8,
    pub derivation_key_index: u8,
    pub card_verification_results: Vec<u8>,
    pub counters: Vec<u8>,
    pub issuer_discretionary_data_length: u8,
    pub issuer_discretionary_data: Vec<u8>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VisaData {
    pub length_indicator: u8,
    pub derivation_key_index: u8,
    pub cryptogram_version: u8,
    /// Includes the leading CVR length byte
    pub card_verification_results: Vec<u8>,
    pub issuer_discretionary_data_length: Option<u8>,
    pub issuer_discretionary_data: Vec<u8>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VisaFormat2Data {
    pub length_indicator: u8,
    /// High nibble IAD format, low nibble CVN
    pub cryptogram_version: u8,
    pub derivation_key_index: u8,
    pub card_verification_results: Vec<u8>,
    pub issuer_discretionary_data: Vec<u8>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub enum IadFields {
    MChip22(MChipData),
    MChip205(MChipData),
    MChip4(MChip4Data),
    CcdFormatA(CcdData),
    VisaFormat013(VisaData),
    VisaFormat2(VisaFormat2Data),
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct IssuerApplicationData {
    pub raw: Vec<u8>,
    pub fields: IadFields,
}

fn require_length(layout: &'static str, iad: &[u8], minimum: usize) -> Result<()> {
    if iad.len() < minimum {
        return Err(Error::format(
            "IAD",
            format!(
                "{} layout needs at least {} bytes, received {}",
                layout,
                minimum,
                iad.len()
            ),
        ));
    }

    Ok(())
}

// Mastercard and Visa Format 2 carry the CVN as two decimal digits in the nibbles, 0x10 = 10
fn decimal_nibbles(b: u8) -> Option<u8> {
    let (high, low) = (b >> 4, b & 0x0F);
    if high > 9 || low > 9 {
        return None;
    }

    Some(high * 10 + low)
}

fn parse_mchip(iad: &[u8], cvr_length: usize) -> MChipData {
    let cvr_end = 2 + cvr_length;
    MChipData {
        derivation_key_index: iad[0],
        cryptogram_version: iad[1],
        card_verification_results: iad[2..cvr_end].to_vec(),
        dac_idn: iad[cvr_end..cvr_end + 2].to_vec(),
    }
}

fn parse_mastercard(iad: &[u8]) -> Result<IadFields> {
    match iad.len() {
        MCHIP_22_LENGTH => Ok(IadFields::MChip22(parse_mchip(iad, 4))),
        MCHIP_205_LENGTH => Ok(IadFields::MChip205(parse_mchip(iad, 5))),
        _ => {
            require_length("M/Chip 4", iad, MCHIP_4_LENGTH)?;

            let last_online_atc = if iad.len() >= MCHIP_4_WITH_ATC_LENGTH {
                Some(iad[18..20].to_vec())
            } else {
                None
            };

            Ok(IadFields::MChip4(MChip4Data {
                derivation_key_index: iad[0],
                cryptogram_version: iad[1],
                card_verification_results: iad[2..8].to_vec(),
                dac_idn: iad[8..10].to_vec(),
                counters: iad[10..18].to_vec(),
                last_online_atc,
            }))
        }
    }
}

fn parse_visa(iad: &[u8]) -> Result<IadFields> {
    require_length("Visa", iad, 1)?;

    let is_ccd = iad[0] == CCD_LENGTH_INDICATOR
        && iad.len() == CCD_LENGTH
        && iad[1] >> 4 == 0x0A;

    if is_ccd {
        return Ok(IadFields::CcdFormatA(CcdData {
            length_indicator: iad[0],
            common_core_identifier: iad[1],
            derivation_key_index: iad[2],
            card_verification_results: iad[3..8].to_vec(),
            counters: iad[8..16].to_vec(),
            issuer_discretionary_data_length: iad[16],
            issuer_discretionary_data: iad[17..].to_vec(),
        }));
    }

    if iad[0] == VISA_FORMAT_2_LENGTH_INDICATOR || iad.len() == CCD_LENGTH {
        require_length("Visa Format 2", iad, 8)?;

        return Ok(IadFields::VisaFormat2(VisaFormat2Data {
            length_indicator: iad[0],
            cryptogram_version: iad[1],
            derivation_key_index: iad[2],
            card_verification_results: iad[3..8].to_vec(),
            issuer_discretionary_data: iad[8..].to_vec(),
        }));
    }

    require_length("Visa Format 0/1/3", iad, 7)?;

    let (issuer_discretionary_data_length, issuer_discretionary_data) = if iad.len() > 7 {
        (Some(iad[7]), iad[8..].to_vec())
    } else {
        (None, Vec::new())
    };

    Ok(IadFields::VisaFormat013(VisaData {
        length_indicator: iad[0],
        derivation_key_index: iad[1],
        cryptogram_version: iad[2],
        card_verification_results: iad[3..7].to_vec(),
        issuer_discretionary_data_length,
        issuer_discretionary_data,
    }))
}

impl IssuerApplicationData {
    /// Parses the hex encoded IAD, the layout family is chosen by the PAN's scheme.
    pub fn parse(iad: &str, pan: &str) -> Result<IssuerApplicationData> {
        check_hexadecimal("IAD", iad, 14, 64)?;
        let data = decode_hex("IAD", iad)?;

        IssuerApplicationData::parse_bytes(&data[..], is_visa_pan(pan))
    }

    pub fn parse_bytes(iad: &[u8], is_visa: bool) -> Result<IssuerApplicationData> {
        let fields = if is_visa {
            parse_visa(iad)?
        } else {
            parse_mastercard(iad)?
        };

        let parsed = IssuerApplicationData {
            raw: iad.to_vec(),
            fields,
        };
        debug!(
            "IAD layout {}, CVN {:?}",
            parsed.layout_name(),
            parsed.cryptogram_version_number()
        );

        Ok(parsed)
    }

    pub fn layout_name(&self) -> &'static str {
        match self.fields {
            IadFields::MChip22(_) => "M/Chip 2.1/2.2",
            IadFields::MChip205(_) => "M/Chip 2.05",
            IadFields::MChip4(_) => "M/Chip 4",
            IadFields::CcdFormatA(_) => "CCD Format-A",
            IadFields::VisaFormat013(_) => "Visa Format 0/1/3",
            IadFields::VisaFormat2(_) => "Visa Format 2",
        }
    }

    pub fn derivation_key_index(&self) -> u8 {
        match &self.fields {
            IadFields::MChip22(d) | IadFields::MChip205(d) => d.derivation_key_index,
            IadFields::MChip4(d) => d.derivation_key_index,
            IadFields::CcdFormatA(d) => d.derivation_key_index,
            IadFields::VisaFormat013(d) => d.derivation_key_index,
            IadFields::VisaFormat2(d) => d.derivation_key_index,
        }
    }

    /// `None` for CCD and for a version byte outside CVN 10, 14, 18 and 22
    pub fn cryptogram_version_number(&self) -> Option<CryptogramVersionNumber> {
        let number = match &self.fields {
            IadFields::MChip22(d) | IadFields::MChip205(d) => decimal_nibbles(d.cryptogram_version),
            IadFields::MChip4(d) => decimal_nibbles(d.cryptogram_version),
            IadFields::VisaFormat2(d) => decimal_nibbles(d.cryptogram_version),
            IadFields::VisaFormat013(d) => Some(d.cryptogram_version),
            IadFields::CcdFormatA(_) => None,
        }?;

        CryptogramVersionNumber::from_number(number)
    }

    pub fn card_verification_results(&self) -> &[u8] {
        match &self.fields {
            IadFields::MChip22(d) | IadFields::MChip205(d) => &d.card_verification_results[..],
            IadFields::MChip4(d) => &d.card_verification_results[..],
            IadFields::CcdFormatA(d) => &d.card_verification_results[..],
            IadFields::VisaFormat013(d) => &d.card_verification_results[..],
            IadFields::VisaFormat2(d) => &d.card_verification_results[..],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw[..]
    }

    /// Cross checks the length indicators against the total length of the IAD.
    pub fn validate(&self) -> Result<()> {
        let total = self.raw.len();

        let valid = match &self.fields {
            IadFields::MChip22(_) => total == MCHIP_22_LENGTH,
            IadFields::MChip205(_) => total == MCHIP_205_LENGTH,
            IadFields::MChip4(_) => total == MCHIP_4_LENGTH || total == MCHIP_4_WITH_ATC_LENGTH,
            IadFields::CcdFormatA(d) => {
                if d.length_indicator != CCD_LENGTH_INDICATOR
                    || d.issuer_discretionary_data_length != CCD_LENGTH_INDICATOR
                {
                    return Err(Error::format("IAD", "CCD length indicators must be 0F"));
                }
                if d.common_core_identifier != 0xA5 && d.common_core_identifier != 0xA6 {
                    return Err(Error::format(
                        "IAD",
                        format!(
                            "unknown Common Core Identifier {:02X}",
                            d.common_core_identifier
                        ),
                    ));
                }

                usize::from(d.length_indicator)
                    + usize::from(d.issuer_discretionary_data_length)
                    + 2
                    == total
            }
            IadFields::VisaFormat013(d) => match d.issuer_discretionary_data_length {
                Some(idd_length) => {
                    usize::from(d.length_indicator) + usize::from(idd_length) + 2 == total
                }
                None => usize::from(d.length_indicator) + 1 == total,
            },
            IadFields::VisaFormat2(d) => usize::from(d.length_indicator) + 1 == total,
        };

        if !valid {
            return Err(Error::format(
                "IAD",
                format!(
                    "{} length indicators do not match the total length {}",
                    self.layout_name(),
                    total
                ),
            ));
        }

        Ok(())
    }
}

impl fmt::Display for IssuerApplicationData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.layout_name(), encode_hex(&self.raw))
    }
}
