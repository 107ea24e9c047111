//! Register decoder
//!
//! Turns raw holding-register words into numeric values. Multi-register
//! values are big-endian across words: the first register carries the most
//! significant word.

use crate::error::{PollError, Result};
use crate::registers::{RegisterType, ValueKind};

/// Join `words` into one unsigned integer, most significant word first
fn assemble(words: &[u16], register_type: RegisterType) -> Result<u64> {
    let expected = usize::from(register_type.register_count());
    if words.len() != expected {
        return Err(PollError::ShortRead {
            expected,
            actual: words.len(),
        });
    }

    Ok(words
        .iter()
        .fold(0u64, |acc, &word| (acc << 16) | u64::from(word)))
}

/// Decode a measurement to its raw (unscaled) value.
///
/// Signed widths are reinterpreted as two's complement of exactly that
/// width, so `0xFFFF` as S16 is `-1`. The scale factor is applied by
/// [`VariableSpec::scale_value`](crate::registers::VariableSpec::scale_value).
pub fn decode_measurement(words: &[u16], register_type: RegisterType) -> Result<f64> {
    let raw = assemble(words, register_type)?;
    let value = match register_type {
        RegisterType::U16 | RegisterType::U32 | RegisterType::U64 => raw as f64,
        RegisterType::S16 => f64::from(raw as u16 as i16),
        RegisterType::S32 => f64::from(raw as u32 as i32),
    };
    Ok(value)
}

/// Decode a bit-encoded status word. Only U16 and U32 are accepted.
pub fn decode_status_word(words: &[u16], register_type: RegisterType) -> Result<u64> {
    if !ValueKind::StatusWord.supports(register_type) {
        return Err(PollError::UnsupportedEncoding {
            register_type,
            kind: ValueKind::StatusWord,
        });
    }
    assemble(words, register_type)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::registers::VariableSpec;

    #[test]
    fn test_sign_bit_16() {
        assert_eq!(decode_measurement(&[0x8000], RegisterType::S16).unwrap(), -32768.0);
        assert_eq!(decode_measurement(&[0x8000], RegisterType::U16).unwrap(), 32768.0);
        assert_eq!(decode_measurement(&[0xFFFF], RegisterType::S16).unwrap(), -1.0);
    }

    #[test]
    fn test_sign_bit_32() {
        let words = [0x8000, 0x0000];
        assert_eq!(
            decode_measurement(&words, RegisterType::S32).unwrap(),
            f64::from(i32::MIN)
        );
        assert_eq!(
            decode_measurement(&words, RegisterType::U32).unwrap(),
            2_147_483_648.0
        );
        assert_eq!(
            decode_measurement(&[0xFFFF, 0xFFFE], RegisterType::S32).unwrap(),
            -2.0
        );
    }

    #[test]
    fn test_u64_word_order() {
        let words = [0x0000, 0x0000, 0x0001, 0x86A0];
        assert_eq!(decode_measurement(&words, RegisterType::U64).unwrap(), 100_000.0);

        let words = [0x8000, 0x0000, 0x0000, 0x0000];
        assert_eq!(
            decode_measurement(&words, RegisterType::U64).unwrap(),
            9_223_372_036_854_775_808.0
        );
    }

    #[test]
    fn test_scaled_signed_measurement() {
        let spec = VariableSpec::measurement("v", 1, 100, RegisterType::S16, 0.1, "V");
        let raw = decode_measurement(&[0xFFF6], spec.register_type).unwrap();
        assert_eq!(raw, -10.0);
        assert_eq!(spec.scale_value(raw), -1.0);
    }

    #[test]
    fn test_status_word_unscaled() {
        assert_eq!(decode_status_word(&[0x0004], RegisterType::U16).unwrap(), 4);
        assert_eq!(
            decode_status_word(&[0x1234, 0x5678], RegisterType::U32).unwrap(),
            0x1234_5678
        );
    }

    #[test]
    fn test_status_word_rejects_signed_and_wide() {
        for ty in [RegisterType::S16, RegisterType::S32, RegisterType::U64] {
            let words = vec![0u16; usize::from(ty.register_count())];
            let err = decode_status_word(&words, ty).unwrap_err();
            assert_eq!(
                err,
                PollError::UnsupportedEncoding {
                    register_type: ty,
                    kind: ValueKind::StatusWord,
                }
            );
        }
    }

    #[test]
    fn test_short_read() {
        let err = decode_measurement(&[0x0001], RegisterType::U32).unwrap_err();
        assert_eq!(err, PollError::ShortRead { expected: 2, actual: 1 });

        let err = decode_status_word(&[], RegisterType::U16).unwrap_err();
        assert_eq!(err, PollError::ShortRead { expected: 1, actual: 0 });
    }
}
