//! Forgiving base64 used for descriptor payloads and wrapped subscriptions.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode base64 in either the standard or the url-safe alphabet. Characters
/// outside the alphabet (whitespace, stray `=`) are skipped, and padding is
/// re-added to reach a multiple of four. Decoding stops at the first padding
/// group that completes a quad; anything after it is ignored.
pub fn decode_lenient(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let mut cleaned = String::with_capacity(input.len());
    let mut quad = 0usize;
    let mut pads = 0usize;
    for c in input.chars() {
        let c = match c {
            '-' => '+',
            '_' => '/',
            c => c,
        };
        if c == '=' {
            if quad >= 2 {
                pads += 1;
                if quad + pads >= 4 {
                    break;
                }
            }
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '+' || c == '/' {
            cleaned.push(c);
            quad = (quad + 1) % 4;
            pads = 0;
        }
    }
    pad_to_quad(&mut cleaned);
    LENIENT.decode(cleaned.as_bytes())
}

/// Like [`decode_lenient`], with invalid UTF-8 dropped from the result.
pub fn decode_lenient_text(input: &str) -> Result<String, base64::DecodeError> {
    let bytes = decode_lenient(input)?;
    Ok(String::from_utf8_lossy(&bytes).replace(char::REPLACEMENT_CHARACTER, ""))
}

fn pad_to_quad(s: &mut String) {
    while s.len() % 4 != 0 {
        s.push('=');
    }
}
