use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use crate::core::error::{Error, ErrorKind, Result};

const B36_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Uppercase base-36 rendering used for every id, offset and date on disk.
pub fn b36(mut number: u64) -> String {
    if number == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while number > 0 {
        digits.push(B36_ALPHABET[(number % 36) as usize]);
        number /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Signed variant; dates before the epoch carry a leading `-`.
pub fn b36_signed(number: i64) -> String {
    if number < 0 {
        format!("-{}", b36(number.unsigned_abs()))
    } else {
        b36(number as u64)
    }
}

pub fn parse_b36(text: &str) -> Result<u64> {
    if text.is_empty() {
        return Err(Error::new(ErrorKind::Parse, "Empty base-36 number".to_string()));
    }
    u64::from_str_radix(text, 36)
        .map_err(|e| Error::new(ErrorKind::Parse, format!("Bad base-36 number {:?}: {}", text, e)))
}

pub fn parse_b36_signed(text: &str) -> Result<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let out_of_range =
        || Error::new(ErrorKind::Parse, format!("Base-36 number out of range: {:?}", text));
    let magnitude = i64::try_from(parse_b36(digits)?).map_err(|_| out_of_range())?;
    if negative {
        magnitude.checked_neg().ok_or_else(out_of_range)
    } else {
        Ok(magnitude)
    }
}

/// Standard base64 of the SHA-1 digest of `text`.
pub fn sha1_b64(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Strip padding and newlines, and make the result filename-safe.
pub fn b64c(encoded: &str) -> String {
    encoded
        .chars()
        .filter(|c| *c != '\n' && *c != '=')
        .map(|c| if c == '/' { '_' } else { c })
        .collect()
}

pub fn b64w(encoded: &str) -> String {
    b64c(encoded).replace('+', "-")
}

/// Hash used as the unique key of a message: url-safe base64 of SHA-1,
/// computed over the trimmed header value.
pub fn message_id_hash(value: &str) -> String {
    b64w(&sha1_b64(value.trim()))
}

/// Fixed-length, mostly human-readable hash of a string.
///
/// The alphanumeric lowercase prefix of `text` is kept (at most `length - 4`
/// chars) and then padded with the lowercased digest of the original text.
pub fn strhash(text: &str, length: usize) -> String {
    let lowered = text.to_lowercase();
    let mut out: String = lowered
        .chars()
        .filter(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
        .take(length.saturating_sub(4))
        .collect();

    let pad = b64c(&sha1_b64(text)).to_lowercase();
    while out.len() < length {
        out.push_str(&pad);
    }
    out.truncate(length);
    out
}
