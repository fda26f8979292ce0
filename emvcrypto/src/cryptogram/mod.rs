//! Authorization Request Cryptogram (ARQC) generation and the matching Authorization Response
//! Cryptogram (ARPC).

use hexplay::HexViewBuilder;
use log::{debug, trace, warn};
use openssl::memcmp;
use serde::{Deserialize, Serialize};

use crate::bcdutil::ascii_to_bcd_n;
use crate::hexutil::{decode_hex, encode_hex, xor, zero_pad_to_block};
use crate::iad::IssuerApplicationData;
use crate::keys::{
    derive_session_key, derive_udk, parse_atc, CryptogramVersionNumber, DoubleLengthKey,
    UdkDerivationOption,
};
use crate::tdes::{self, BLOCK_SIZE};
use crate::validate::{check_hexadecimal, check_numeric, check_pan, iso_date_to_yymmdd};
use crate::{get_truncated_pan, Error, Result};

/// Card and terminal data of one authorization, every value as a decimal or hex string.
#[derive(Deserialize, Serialize, Clone)]
pub struct ArqcRequest {
    pub pan: String,
    pub pan_sequence_number: String,
    pub master_key: String,
    pub amount_authorised: String,
    pub amount_other: String,
    pub terminal_country_code: String,
    pub terminal_verification_results: String,
    pub transaction_currency_code: String,
    /// YYYY-MM-DD
    pub transaction_date: String,
    pub transaction_type: String,
    pub unpredictable_number: String,
    pub application_interchange_profile: String,
    pub application_transaction_counter: String,
    pub issuer_application_data: String,
    /// ARC for CVN 10/14, CSU for CVN 18/22
    pub arc_or_csu: String,
    #[serde(default)]
    pub cryptogram_version_number: Option<CryptogramVersionNumber>,
    #[serde(default)]
    pub udk_derivation_option: Option<UdkDerivationOption>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CryptogramResponse {
    pub arqc: String,
    pub arpc: String,
    pub cryptogram_version_number: CryptogramVersionNumber,
    pub iad_layout: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// Authorisation Response Code, two alphanumeric characters
    Arc([u8; 2]),
    /// Card Status Update
    Csu([u8; 4]),
}

impl ResponseCode {
    pub fn parse(cvn: CryptogramVersionNumber, value: &str) -> Result<ResponseCode> {
        if cvn.derives_session_key() {
            check_hexadecimal("CSU", value, 8, 8)?;
            let csu = decode_hex("CSU", value)?;
            Ok(ResponseCode::Csu([csu[0], csu[1], csu[2], csu[3]]))
        } else {
            let arc = value.as_bytes();
            if arc.len() != 2 || !arc.iter().all(|c| c.is_ascii_alphanumeric()) {
                return Err(Error::format("ARC", "2 alphanumeric characters expected"));
            }
            Ok(ResponseCode::Arc([arc[0], arc[1]]))
        }
    }
}

/// Resolves the CVN, an explicit one wins over the version carried in the IAD.
fn resolve_cvn(
    requested: Option<CryptogramVersionNumber>,
    iad: &IssuerApplicationData,
) -> Result<CryptogramVersionNumber> {
    let from_iad = iad.cryptogram_version_number();

    match (requested, from_iad) {
        (Some(requested), Some(from_iad)) => {
            if requested != from_iad {
                warn!(
                    "Requested CVN {} differs from IAD CVN {}, using CVN {}",
                    requested, from_iad, requested
                );
            }
            Ok(requested)
        }
        (Some(requested), None) => Ok(requested),
        (None, Some(from_iad)) => Ok(from_iad),
        (None, None) => Err(Error::unsupported(
            "cryptogram version number",
            format!("none given and none found in {} IAD", iad.layout_name()),
        )),
    }
}

/// Builds the cryptogram input block: transaction fields, IAD, trailer and zero padding.
pub fn transaction_data(
    request: &ArqcRequest,
    cvn: CryptogramVersionNumber,
    iad: &IssuerApplicationData,
) -> Result<Vec<u8>> {
    check_numeric("Amount authorised", &request.amount_authorised, 1, 12)?;
    check_numeric("Amount other", &request.amount_other, 1, 12)?;
    check_numeric("Terminal country code", &request.terminal_country_code, 3, 4)?;
    check_hexadecimal("TVR", &request.terminal_verification_results, 10, 10)?;
    check_numeric("Transaction currency code", &request.transaction_currency_code, 3, 4)?;
    check_hexadecimal("Transaction type", &request.transaction_type, 2, 2)?;
    check_hexadecimal("Unpredictable number", &request.unpredictable_number, 8, 8)?;
    check_hexadecimal("AIP", &request.application_interchange_profile, 4, 4)?;

    let mut data: Vec<u8> = Vec::new();
    data.extend(ascii_to_bcd_n("Amount authorised", request.amount_authorised.as_bytes(), 6)?);
    data.extend(ascii_to_bcd_n("Amount other", request.amount_other.as_bytes(), 6)?);
    data.extend(ascii_to_bcd_n(
        "Terminal country code",
        request.terminal_country_code.as_bytes(),
        2,
    )?);
    data.extend(decode_hex("TVR", &request.terminal_verification_results)?);
    data.extend(ascii_to_bcd_n(
        "Transaction currency code",
        request.transaction_currency_code.as_bytes(),
        2,
    )?);
    data.extend(decode_hex(
        "Transaction date",
        &iso_date_to_yymmdd("Transaction date", &request.transaction_date)?,
    )?);
    data.extend(decode_hex("Transaction type", &request.transaction_type)?);
    data.extend(decode_hex("Unpredictable number", &request.unpredictable_number)?);
    data.extend(decode_hex("AIP", &request.application_interchange_profile)?);
    data.extend_from_slice(&parse_atc(&request.application_transaction_counter)?);
    data.extend_from_slice(iad.as_bytes());
    data.push(cvn.padding_trailer());
    zero_pad_to_block(&mut data);

    trace!(
        "Transaction data ({} blocks)\n{}",
        data.len() / BLOCK_SIZE,
        HexViewBuilder::new(&data[..]).finish()
    );

    Ok(data)
}

/// ISO 9797-1 MAC algorithm 3: single DES CBC under the left key half, the final block
/// decrypted with the right half and encrypted again with the left.
pub fn mac(data: &[u8], key: &DoubleLengthKey) -> Result<[u8; 8]> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(Error::CryptoPrimitive(format!(
            "MAC input of {} bytes is not block aligned",
            data.len()
        )));
    }

    let mut chained: Vec<u8> = vec![0u8; BLOCK_SIZE];
    for block in data.chunks(BLOCK_SIZE) {
        chained = tdes::encrypt_block(&xor(block, &chained)?, key.left())?;
    }

    let result = tdes::decrypt_block(&chained, key.right())?;
    let result = tdes::encrypt_block(&result, key.left())?;

    let mut output = [0u8; 8];
    output.copy_from_slice(&result[..BLOCK_SIZE]);
    Ok(output)
}

pub fn generate_arpc(
    arqc: &[u8; 8],
    response_code: &ResponseCode,
    session_key: &DoubleLengthKey,
) -> Result<[u8; 8]> {
    let mut output = [0u8; 8];

    match response_code {
        ResponseCode::Arc(arc) => {
            let mut arc_block = [0u8; 8];
            arc_block[..2].copy_from_slice(arc);

            let arpc = tdes::encrypt_block(&xor(&arc_block, arqc)?, session_key.as_bytes())?;
            output.copy_from_slice(&arpc[..8]);
        }
        ResponseCode::Csu(csu) => {
            let mut data: Vec<u8> = Vec::with_capacity(16);
            data.extend_from_slice(arqc);
            data.extend_from_slice(csu);
            data.push(0x80);
            zero_pad_to_block(&mut data);

            let arpc = mac(&data, session_key)?;
            output[..4].copy_from_slice(&arpc[..4]);
            output[4..].copy_from_slice(csu);
        }
    }

    Ok(output)
}

struct Cryptograms {
    arqc: [u8; 8],
    arpc: [u8; 8],
    cvn: CryptogramVersionNumber,
    iad_layout: &'static str,
}

fn compute(request: &ArqcRequest) -> Result<Cryptograms> {
    check_pan(&request.pan)?;
    check_numeric("PAN sequence number", &request.pan_sequence_number, 1, 2)?;
    let master_key = DoubleLengthKey::from_hex("Master key", &request.master_key)?;

    let iad = IssuerApplicationData::parse(&request.issuer_application_data, &request.pan)?;
    if let Err(err) = iad.validate() {
        warn!("IAD cross-validation failed: {}", err);
    }

    let cvn = resolve_cvn(request.cryptogram_version_number, &iad)?;
    let response_code = ResponseCode::parse(cvn, &request.arc_or_csu)?;
    let data = transaction_data(request, cvn, &iad)?;
    let atc = parse_atc(&request.application_transaction_counter)?;

    let option = request
        .udk_derivation_option
        .unwrap_or_else(|| UdkDerivationOption::for_pan(&request.pan));

    debug!(
        "Computing CVN {} cryptograms for PAN {} with UDK option {}",
        cvn,
        get_truncated_pan(&request.pan),
        option
    );

    let udk = derive_udk(
        &master_key,
        &request.pan,
        &request.pan_sequence_number,
        option,
    )?;
    let session_key = derive_session_key(&udk, cvn, &atc)?;

    let arqc = mac(&data, &session_key)?;
    let arpc = generate_arpc(&arqc, &response_code, &session_key)?;

    Ok(Cryptograms {
        arqc,
        arpc,
        cvn,
        iad_layout: iad.layout_name(),
    })
}

pub fn generate_arqc(request: &ArqcRequest) -> Result<String> {
    Ok(encode_hex(&compute(request)?.arqc))
}

pub fn generate_cryptograms(request: &ArqcRequest) -> Result<CryptogramResponse> {
    let cryptograms = compute(request)?;

    Ok(CryptogramResponse {
        arqc: encode_hex(&cryptograms.arqc),
        arpc: encode_hex(&cryptograms.arpc),
        cryptogram_version_number: cryptograms.cvn,
        iad_layout: cryptograms.iad_layout.to_string(),
    })
}

/// Recomputes the ARQC, the response is returned only when the card's ARQC matches.
pub fn validate_arqc(request: &ArqcRequest, arqc: &str) -> Result<Option<CryptogramResponse>> {
    check_hexadecimal("ARQC", arqc, 16, 16)?;
    let supplied = decode_hex("ARQC", arqc)?;

    let cryptograms = compute(request)?;

    if !memcmp::eq(&cryptograms.arqc[..], &supplied[..]) {
        warn!(
            "ARQC mismatch for PAN {}",
            get_truncated_pan(&request.pan)
        );
        return Ok(None);
    }

    Ok(Some(CryptogramResponse {
        arqc: encode_hex(&cryptograms.arqc),
        arpc: encode_hex(&cryptograms.arpc),
        cryptogram_version_number: cryptograms.cvn,
        iad_layout: cryptograms.iad_layout.to_string(),
    }))
}
