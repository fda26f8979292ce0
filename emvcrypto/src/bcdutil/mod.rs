use crate::{Error, Result};

const ASCII_CHARACTER_0: u8 = 0x30;

fn ascii_digit(field: &'static str, c: u8) -> Result<u8> {
    let digit = c.wrapping_sub(ASCII_CHARACTER_0);
    if digit > 0x9 {
        return Err(Error::format(field, "decimal digits expected"));
    }

    Ok(digit)
}

//cn = 12 34 56 78 90 12 3F FF
pub fn ascii_to_bcd_cn(field: &'static str, ascii_data: &[u8], size: usize) -> Result<Vec<u8>> {
    if ascii_data.len() > size * 2 {
        return Err(Error::format(
            field,
            format!("at most {} digits expected", size * 2),
        ));
    }

    let mut bcd_output: Vec<u8> = Vec::with_capacity(size);

    for i in (0..ascii_data.len()).step_by(2) {
        let b1 = ascii_digit(field, ascii_data[i])?;

        let mut b2 = 0xF;
        if i + 1 < ascii_data.len() {
            b2 = ascii_digit(field, ascii_data[i + 1])?;
        }

        bcd_output.push(b2 + (b1 << 4));
    }

    bcd_output.resize(size, 0xFF);

    Ok(bcd_output)
}

//n = 00 00 00 01 23 45
pub fn ascii_to_bcd_n(field: &'static str, ascii_data: &[u8], size: usize) -> Result<Vec<u8>> {
    if ascii_data.len() > size * 2 {
        return Err(Error::format(
            field,
            format!("at most {} digits expected", size * 2),
        ));
    }

    let mut bcd_output: Vec<u8> = Vec::with_capacity(size);

    let mut ascii_data_aligned: Vec<u8> = Vec::new();
    if ascii_data.len() % 2 == 1 {
        ascii_data_aligned.push(ASCII_CHARACTER_0);
    }
    ascii_data_aligned.extend_from_slice(ascii_data);

    for _ in ascii_data_aligned.len() / 2..size {
        bcd_output.push(0x00);
    }

    for pair in ascii_data_aligned.chunks(2) {
        let b1 = ascii_digit(field, pair[0])?;
        let b2 = ascii_digit(field, pair[1])?;

        bcd_output.push(b2 + (b1 << 4));
    }

    Ok(bcd_output)
}

/// Reads `count` nibbles starting at nibble `offset`, every one of them must be a decimal digit.
pub fn bcd_digits(field: &'static str, data: &[u8], offset: usize, count: usize) -> Result<String> {
    if offset + count > data.len() * 2 {
        return Err(Error::format(field, "not enough digits"));
    }

    let mut digits = String::with_capacity(count);
    for i in offset..offset + count {
        let byte = data[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0xF };
        if nibble > 0x9 {
            return Err(Error::format(field, "decimal digits expected"));
        }
        digits.push(char::from(ASCII_CHARACTER_0 + nibble));
    }

    Ok(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bcd_n() -> Result<()> {
        assert_eq!(
            ascii_to_bcd_n("Amount", b"1000", 6)?,
            [0x00, 0x00, 0x00, 0x00, 0x10, 0x00]
        );
        assert_eq!(ascii_to_bcd_n("Country", b"840", 2)?, [0x08, 0x40]);
        assert_eq!(ascii_to_bcd_n("Country", b"", 2)?, [0x00, 0x00]);

        assert!(ascii_to_bcd_n("Amount", b"12A4", 2).is_err());
        assert!(ascii_to_bcd_n("Amount", b"12345", 2).is_err());
        assert!(ascii_to_bcd_n("Amount", b"1 23", 2).is_err());

        Ok(())
    }

    #[test]
    fn test_bcd_cn() -> Result<()> {
        assert_eq!(
            ascii_to_bcd_cn("PIN", b"1234", 7)?,
            [0x12, 0x34, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(ascii_to_bcd_cn("PIN", b"12345", 3)?, [0x12, 0x34, 0x5F]);

        assert!(ascii_to_bcd_cn("PIN", b"1234567", 3).is_err());
        assert!(ascii_to_bcd_cn("PIN", b"12/4", 3).is_err());

        Ok(())
    }

    #[test]
    fn test_bcd_digits() -> Result<()> {
        let block = [0x04, 0x12, 0x34, 0xFF];
        assert_eq!(bcd_digits("PIN", &block, 2, 4)?, "1234");
        assert_eq!(bcd_digits("PIN", &block, 1, 3)?, "412");

        assert!(bcd_digits("PIN", &block, 2, 5).is_err());
        assert!(bcd_digits("PIN", &block, 6, 4).is_err());

        Ok(())
    }
}
