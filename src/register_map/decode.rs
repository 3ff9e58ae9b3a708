//! Register decoding rules (§4.1). These are pure functions over raw 16-bit
//! register words so they can be unit-tested without a field-bus session.

use super::descriptor::{Encoding, PointDescriptor};

/// Sign-extend the low 16 bits of `raw` if the high bit is set.
fn sign_extend_16(raw: u16) -> i32 {
    raw as i16 as i32
}

/// Sign-extend a 32-bit value assembled from two big-endian, high-word-first
/// register words.
fn sign_extend_32(raw: u32) -> i64 {
    raw as i32 as i64
}

/// Decode `registers` (already high-word-first for 2-register values)
/// according to `descriptor`, yielding the final gain-scaled value.
///
/// Returns `None` only when the register count doesn't match what the
/// encoding requires - a malformed descriptor or a short read from the
/// field-bus client, both of which the caller treats as "no value this
/// cycle" rather than a panic.
pub fn decode_registers(registers: &[u16], descriptor: &PointDescriptor) -> Option<f64> {
    match descriptor.encoding {
        Encoding::Integer => decode_integer(registers, descriptor.signed, descriptor.gain),
        Encoding::Float32 => decode_float32(registers, descriptor.gain),
        Encoding::FroniusPf => decode_fronius_power_factor(registers),
    }
}

fn decode_integer(registers: &[u16], signed: bool, gain: f64) -> Option<f64> {
    match registers.len() {
        1 => {
            let raw = registers[0];
            let value = if signed { sign_extend_16(raw) as f64 } else { raw as f64 };
            Some(value / gain)
        }
        2 => {
            let raw = ((registers[0] as u32) << 16) | registers[1] as u32;
            let value = if signed {
                sign_extend_32(raw) as f64
            } else {
                raw as f64
            };
            Some(value / gain)
        }
        _ => None,
    }
}

/// IEEE-754 32-bit float, big-endian, high word first (§4.1, §6).
fn decode_float32(registers: &[u16], gain: f64) -> Option<f64> {
    if registers.len() != 2 {
        return None;
    }
    let raw = ((registers[0] as u32) << 16) | registers[1] as u32;
    Some(f32::from_bits(raw) as f64 / gain)
}

/// Fronius power-factor special case (§4.1): first register is a signed
/// 16-bit mantissa, second is a signed 16-bit decimal scale factor;
/// value = mantissa * 10^scale.
fn decode_fronius_power_factor(registers: &[u16]) -> Option<f64> {
    if registers.len() != 2 {
        return None;
    }
    let mantissa = sign_extend_16(registers[0]) as f64;
    let scale = sign_extend_16(registers[1]) as i32;
    Some(mantissa * 10f64.powi(scale))
}

/// Encode a gain-scaled value back into high-word-first register words for
/// the descriptor's encoding, the inverse of [`decode_registers`] for the
/// control-executor write path (§4.7).
pub fn encode_registers(value: f64, descriptor: &PointDescriptor) -> Vec<u16> {
    match descriptor.encoding {
        Encoding::Integer => encode_integer(value, descriptor.quantity, descriptor.gain),
        Encoding::Float32 => encode_float32(value, descriptor.gain),
        Encoding::FroniusPf => panic!("fronius power-factor encoding is read-only"),
    }
}

fn encode_integer(value: f64, quantity: u8, gain: f64) -> Vec<u16> {
    let scaled = (value * gain).round();
    match quantity {
        1 => {
            let clamped = scaled.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            vec![clamped as u16]
        }
        2 => {
            let clamped = scaled.clamp(i32::MIN as f64, i32::MAX as f64) as i32;
            let raw = clamped as u32;
            vec![(raw >> 16) as u16, (raw & 0xFFFF) as u16]
        }
        other => panic!("unsupported register quantity: {other}"),
    }
}

fn encode_float32(value: f64, gain: f64) -> Vec<u16> {
    let raw = ((value * gain) as f32).to_bits();
    vec![(raw >> 16) as u16, (raw & 0xFFFF) as u16]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_map::descriptor::FunctionCode;

    fn descriptor(quantity: u8, signed: bool, gain: f64, encoding: Encoding) -> PointDescriptor {
        PointDescriptor {
            address: 0,
            quantity,
            function_code: FunctionCode::Holding,
            signed,
            gain,
            encoding,
            enable_register: None,
        }
    }

    #[test]
    fn decodes_unsigned_16bit() {
        let d = descriptor(1, false, 10.0, Encoding::Integer);
        assert_eq!(decode_registers(&[1234], &d), Some(123.4));
    }

    #[test]
    fn decodes_signed_16bit_negative() {
        let d = descriptor(1, true, 10.0, Encoding::Integer);
        assert_eq!(decode_registers(&[0xFFF6], &d), Some(-1.0));
    }

    #[test]
    fn decodes_signed_32bit_high_word_first() {
        let d = descriptor(2, true, 10.0, Encoding::Integer);
        // -12345 * 10 = -123450 = 0xFFFE1D06
        assert_eq!(decode_registers(&[0xFFFE, 0x1D06], &d), Some(-12345.0));
    }

    #[test]
    fn decodes_float32_big_endian() {
        let d = descriptor(2, false, 1.0, Encoding::Float32);
        let bits = 12.5f32.to_bits();
        let hi = (bits >> 16) as u16;
        let lo = (bits & 0xFFFF) as u16;
        assert_eq!(decode_registers(&[hi, lo], &d), Some(12.5));
    }

    #[test]
    fn decodes_fronius_power_factor_scenario() {
        // §8 scenario 5: mantissa 100, scale -2 -> 1.00
        let d = descriptor(2, true, 1.0, Encoding::FroniusPf);
        assert_eq!(decode_registers(&[0x0064, 0xFFFE], &d), Some(1.0));
    }

    #[test]
    fn signed_32bit_round_trips_through_encode_decode() {
        let d = descriptor(2, true, 10.0, Encoding::Integer);
        for v in [-2_000_000_000i64, -1, 0, 1, 2_000_000_000] {
            let encoded = encode_integer(v as f64 / 10.0, 2, 10.0);
            let decoded = decode_registers(&encoded, &d).unwrap();
            assert!((decoded - (v as f64 / 10.0)).abs() < 1e-6);
        }
    }

    #[test]
    fn signed_16bit_round_trips_through_encode_decode() {
        let d = descriptor(1, true, 1.0, Encoding::Integer);
        for v in [i16::MIN, -1, 0, 1, i16::MAX] {
            let encoded = encode_integer(v as f64, 1, 1.0);
            let decoded = decode_registers(&encoded, &d).unwrap();
            assert_eq!(decoded as i16, v);
        }
    }

    #[test]
    fn short_register_slice_yields_none_instead_of_panicking() {
        let d = descriptor(2, true, 10.0, Encoding::Integer);
        assert_eq!(decode_registers(&[1], &d), None);
    }
}
