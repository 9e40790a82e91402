//! Fixed-width integer, hex, and Base64 helpers.
//!
//! The integer readers index directly into the slice. Callers guarantee `offset + width <= data.len()`; reading past
//! the end is a bug in the caller and panics like any other out-of-bounds slice access.

#![allow(missing_docs)]

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use crate::error::ErrorKind;
use crate::{Error, Result};

/// Accepts input with or without padding and with non-zero trailing bits, since characters outside the alphabet
/// (padding included) are stripped before decoding.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[inline]
pub fn u8_at(data: &[u8], offset: usize) -> u8 {
    data[offset]
}

#[inline]
pub fn i8_at(data: &[u8], offset: usize) -> i8 {
    data[offset] as i8
}

#[inline]
pub fn le_u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline]
pub fn le_i16_at(data: &[u8], offset: usize) -> i16 {
    le_u16_at(data, offset) as i16
}

#[inline]
pub fn le_u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

#[inline]
pub fn be_u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

#[inline]
pub fn be_i16_at(data: &[u8], offset: usize) -> i16 {
    be_u16_at(data, offset) as i16
}

#[inline]
pub fn be_u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

/// Lower-case hex, no separators.
pub fn hex_encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Upper-case hex, no separators. Beacon identifiers are conventionally written this way.
pub fn hex_encode_upper(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Decodes standard-alphabet Base64, ignoring every character outside `A-Z a-z 0-9 + /`.
///
/// Fails only when the remaining input cannot be a Base64 encoding at all (a single dangling character).
pub fn base64_decode(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '+' || *c == '/')
        .collect();
    LENIENT
        .decode(cleaned)
        .map_err(|err| Error::new(ErrorKind::InvalidParameter, Some(Box::new(err)), "invalid base64"))
}

/// Standard-alphabet Base64 with padding.
pub fn base64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
