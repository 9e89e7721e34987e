// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Errors about string data in packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// Byte length exceeds 65535.
    TooManyData,

    /// Not a well-formed UTF-8 string, or contains the null character.
    InvalidString,
}

/// Generate random string with `len` bytes, in alphanumeric characters.
pub fn random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a random client id like `mqtt0-b7doZQ0Fmg`.
///
/// Used when a client connects with an empty client id.
pub fn random_client_id() -> String {
    format!("mqtt0-{}", random_string(10))
}

/// Check string length and reject embedded null characters.
///
/// A UTF-8 Encoded String MUST NOT include an encoding of the null
/// character U+0000 [MQTT-1.5.4-2].
///
/// # Errors
///
/// Returns error if `s` is too long or contains null characters.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > u16::MAX as usize {
        return Err(StringError::TooManyData);
    }
    if s.contains('\u{0000}') {
        return Err(StringError::InvalidString);
    }
    Ok(())
}

/// Convert a byte slice into an owned UTF-8 string.
///
/// # Errors
///
/// Returns error if `bytes` is not a well-formed UTF-8 sequence.
pub fn to_utf8_string(bytes: &[u8]) -> Result<String, StringError> {
    let s = String::from_utf8(bytes.to_vec()).map_err(|_err| StringError::InvalidString)?;
    validate_utf8_string(&s)?;
    Ok(s)
}

/// Check binary data length fits in a two byte integer prefix.
///
/// # Errors
///
/// Returns error if `data` is longer than 65535 bytes.
pub fn validate_two_bytes_data(data: &[u8]) -> Result<(), StringError> {
    if data.len() > u16::MAX as usize {
        Err(StringError::TooManyData)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_client_id() {
        let id = random_client_id();
        assert_eq!(id.len(), "mqtt0-".len() + 10);
        assert!(id.starts_with("mqtt0-"));
    }

    #[test]
    fn test_validate_utf8_string() {
        assert!(validate_utf8_string("sensor/temp").is_ok());
        assert_eq!(
            validate_utf8_string("bad\u{0000}string"),
            Err(StringError::InvalidString)
        );
    }
}
