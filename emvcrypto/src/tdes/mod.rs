//! TDEA in ECB mode without padding, the single block primitive every other module chains.

use log::trace;
use openssl::sha;
use openssl::symm::{Cipher, Crypter, Mode};

use crate::hexutil::{decode_hex, encode_hex};
use crate::{Error, Result};

pub const BLOCK_SIZE: usize = 8;

/// Expands a single, double or triple length key to the 24 byte K1 K2 K3 form.
pub fn expand_key(key: &[u8]) -> Result<Vec<u8>> {
    let mut expanded: Vec<u8> = Vec::with_capacity(24);

    match key.len() {
        8 => {
            for _ in 0..3 {
                expanded.extend_from_slice(key);
            }
        }
        16 => {
            expanded.extend_from_slice(key);
            expanded.extend_from_slice(&key[..8]);
        }
        24 => expanded.extend_from_slice(key),
        length => {
            return Err(Error::CryptoPrimitive(format!(
                "TDEA key of 8, 16 or 24 bytes expected, received {} bytes",
                length
            )))
        }
    }

    Ok(expanded)
}

fn transform(mode: Mode, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(Error::CryptoPrimitive(format!(
            "data length {} is not a multiple of the {} byte block",
            data.len(),
            BLOCK_SIZE
        )));
    }

    let key = expand_key(key)?;
    let cipher = Cipher::des_ede3();

    let mut crypter = Crypter::new(cipher, mode, &key[..], None)?;
    crypter.pad(false);

    let mut output = vec![0u8; data.len() + cipher.block_size()];
    let mut count = crypter.update(data, &mut output)?;
    count += crypter.finalize(&mut output[count..])?;
    output.truncate(count);

    trace!("TDEA {} blocks", data.len() / BLOCK_SIZE);

    Ok(output)
}

pub fn encrypt_block(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    transform(Mode::Encrypt, data, key)
}

pub fn decrypt_block(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    transform(Mode::Decrypt, data, key)
}

pub fn encrypt_hex(data: &str, key: &str) -> Result<String> {
    let data = decode_hex("Data", data)?;
    let key = decode_hex("Key", key)?;

    Ok(encode_hex(&encrypt_block(&data, &key)?))
}

pub fn decrypt_hex(data: &str, key: &str) -> Result<String> {
    let data = decode_hex("Data", data)?;
    let key = decode_hex("Key", key)?;

    Ok(encode_hex(&decrypt_block(&data, &key)?))
}

pub fn digest(data: &[u8]) -> [u8; 20] {
    sha::sha1(data)
}
