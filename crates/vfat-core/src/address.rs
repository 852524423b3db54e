// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! Chain address conversion: `0x`-prefixed hex strings to raw bytes.

/// Errors raised when an address cannot be converted.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AddressError {
    #[error("attempting to convert an undefined address to bytes")]
    Missing,

    #[error("address '{0}' is missing the 0x prefix")]
    MissingPrefix(String),

    #[error("address '{0}' has no digits after the 0x prefix")]
    Empty(String),

    #[error("address '{input}' is not valid hex: {source}")]
    InvalidHex {
        input: String,
        #[source]
        source: hex::FromHexError,
    },
}

/// Convert a `0x`-prefixed hex address into its raw bytes.
///
/// `None`, or the string a page produces when it stringifies a missing
/// value, stands for a field the page never filled in; it is an error, not
/// an empty address.
pub fn decode_address(input: Option<&str>) -> Result<Vec<u8>, AddressError> {
    let input = input
        .filter(|s| *s != "undefined")
        .ok_or(AddressError::Missing)?;
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .ok_or_else(|| AddressError::MissingPrefix(input.to_string()))?;

    if digits.is_empty() {
        return Err(AddressError::Empty(input.to_string()));
    }

    hex::decode(digits).map_err(|source| AddressError::InvalidHex {
        input: input.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_short_address() {
        assert_eq!(decode_address(Some("0xabcdef")).unwrap(), vec![0xab, 0xcd, 0xef]);
    }

    #[test]
    fn test_decode_full_address_mixed_case() {
        let bytes = decode_address(Some("0xA4c1135f0C0123f6683F98A8177F4c51F3179107")).unwrap();
        assert_eq!(bytes.len(), 20);
        assert_eq!(bytes[0], 0xa4);
        assert_eq!(bytes[19], 0x07);
    }

    #[test]
    fn test_undefined_address_fails() {
        let err = decode_address(None).unwrap_err();
        assert_eq!(err, AddressError::Missing);
        assert!(err.to_string().contains("undefined"));

        assert_eq!(
            decode_address(Some("undefined")).unwrap_err(),
            AddressError::Missing
        );
    }

    #[test]
    fn test_malformed_addresses() {
        assert!(matches!(
            decode_address(Some("abcdef")),
            Err(AddressError::MissingPrefix(_))
        ));
        assert!(matches!(decode_address(Some("0x")), Err(AddressError::Empty(_))));
        assert!(matches!(
            decode_address(Some("0xabc")),
            Err(AddressError::InvalidHex { .. })
        ));
        assert!(matches!(
            decode_address(Some("0xzz")),
            Err(AddressError::InvalidHex { .. })
        ));
    }
}
