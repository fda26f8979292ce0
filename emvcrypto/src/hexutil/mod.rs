use crate::{Error, Result};

pub fn decode_hex(field: &'static str, value: &str) -> Result<Vec<u8>> {
    if value.len() % 2 != 0 {
        return Err(Error::format(field, "even number of hexadecimal digits expected"));
    }

    hex::decode(value).map_err(|err| Error::format(field, err.to_string()))
}

pub fn encode_hex(data: &[u8]) -> String {
    hex::encode_upper(data)
}

pub fn xor(a: &[u8], b: &[u8]) -> Result<Vec<u8>> {
    if a.len() != b.len() {
        return Err(Error::format(
            "XOR operand",
            format!("equal lengths expected, received {} and {}", a.len(), b.len()),
        ));
    }

    Ok(a.iter().zip(b).map(|(x, y)| x ^ y).collect())
}

pub fn xor_hex(a: &str, b: &str) -> Result<String> {
    let a = decode_hex("XOR operand", a)?;
    let b = decode_hex("XOR operand", b)?;

    Ok(encode_hex(&xor(&a, &b)?))
}

/// Appends zero bytes up to the next 8 byte boundary, empty input stays empty.
pub fn zero_pad_to_block(data: &mut Vec<u8>) {
    let remainder = data.len() % 8;
    if remainder != 0 {
        data.resize(data.len() + 8 - remainder, 0x00);
    }
}

/// Collects up to `count` decimal digits left to right, the hex letters are skipped.
pub fn decimal_digits(hex_data: &str, count: usize) -> String {
    hex_data
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(count)
        .collect()
}

/// Scans hex digits left to right collecting `count` decimal digits.
///
/// Should there be fewer decimal digits than requested, a second pass collects the hex letters
/// decimalized A-F to 0-5. Input shorter than `count` yields everything available.
pub fn extract_digits(hex_data: &str, count: usize) -> String {
    let mut digits = decimal_digits(hex_data, count);

    if digits.len() < count {
        let missing = count - digits.len();
        digits.extend(
            hex_data
                .chars()
                .filter_map(|c| match c.to_ascii_uppercase() {
                    letter @ 'A'..='F' => Some(char::from(b'0' + (letter as u8 - b'A'))),
                    _ => None,
                })
                .take(missing),
        );
    }

    digits
}
