//! Bit-level signal codec
//!
//! Pure functions converting between a signal's physical value and its bits inside
//! a frame payload. Nothing here allocates, blocks or keeps state, so the codec is
//! safe to call from a frame-received callback.
//!
//! ## Bit numbering
//!
//! Both byte orders use the DBC "LSB 0" numbering: bit `n` is bit `n % 8` of byte
//! `n / 8`, bit 0 being the least significant bit of the byte.
//!
//! - Little-endian (Intel): the start bit is the signal's LSB. The field grows
//!   towards higher bit numbers and continues at bit 0 of the next byte.
//! - Big-endian (Motorola): the start bit is the signal's MSB. The field consumes
//!   bits downwards within a byte and continues at bit 7 of the next byte.
//!
//! ## Scaling
//!
//! `physical = raw * factor + offset` for every data type. For IEEE-754 signals
//! `raw` is the reinterpreted float, so encoding stores `(value - offset) / factor`
//! as a float without rounding.

use crate::signals::database::{ByteOrder, DataType, Signal, ValueType};
use crate::types::{DbcError, Frame, Result};
use byteorder::{BigEndian, ByteOrder as _, LittleEndian};

/// Widest raw field the codec converts
pub const MAX_RAW_BITS: u16 = 64;

/// Signal codec - converts signals to and from frame bits
pub struct SignalCodec;

impl SignalCodec {
    /// Decode the physical value of `signal` from `frame`.
    ///
    /// Fails with a range error when the frame is too short for the signal.
    /// Minimum and maximum are not checked.
    pub fn decode(signal: &Signal, frame: &Frame) -> Result<f64> {
        let raw = Self::decode_raw(signal, frame)?;
        Ok(Self::raw_to_physical(signal, raw))
    }

    /// Extract the raw (unsigned, unscaled) bit pattern of `signal`
    pub fn decode_raw(signal: &Signal, frame: &Frame) -> Result<u64> {
        Self::check_fits(signal, frame)?;
        Ok(extract_bits(
            frame.data(),
            signal.start_bit() as usize,
            signal.length() as usize,
            signal.byte_order(),
        ))
    }

    /// Encode the physical `value` of `signal` into `frame`.
    ///
    /// Raw values that do not fit into the signal are truncated to their low
    /// `length` bits. Bits outside the signal are left untouched, and nothing is
    /// written when the frame is too short.
    pub fn encode(signal: &Signal, value: f64, frame: &mut Frame) -> Result<()> {
        let raw = Self::physical_to_raw(signal, value);
        Self::encode_raw(signal, raw, frame)
    }

    /// Write a raw bit pattern (truncated to the signal length) into `frame`
    pub fn encode_raw(signal: &Signal, raw: u64, frame: &mut Frame) -> Result<()> {
        Self::check_fits(signal, frame)?;
        insert_bits(
            frame.data_mut(),
            signal.start_bit() as usize,
            signal.length() as usize,
            signal.byte_order(),
            raw,
        );
        Ok(())
    }

    /// Convert a raw bit pattern into the physical value
    pub fn raw_to_physical(signal: &Signal, raw: u64) -> f64 {
        let length = signal.length() as usize;
        let value = match signal.data_type() {
            DataType::Float => f32::from_bits(raw as u32) as f64,
            DataType::Double => f64::from_bits(raw),
            DataType::Integer => match signal.value_type() {
                ValueType::Signed => sign_extend(raw, length) as f64,
                ValueType::Unsigned => raw as f64,
            },
        };

        value * signal.factor() + signal.offset()
    }

    /// Convert a physical value into the raw bit pattern, truncated to the signal length.
    ///
    /// Integer signals are rounded half away from zero. A zero factor encodes
    /// raw 0, and so does a non-finite integer value.
    pub fn physical_to_raw(signal: &Signal, value: f64) -> u64 {
        if signal.factor() == 0.0 {
            return 0;
        }

        let scaled = (value - signal.offset()) / signal.factor();
        let raw = match signal.data_type() {
            DataType::Float => (scaled as f32).to_bits() as u64,
            DataType::Double => scaled.to_bits(),
            DataType::Integer => round_to_bits(scaled),
        };

        raw & length_mask(signal.length() as usize)
    }

    /// Convert a raw signal value into the raw bit pattern (used for initial values)
    pub fn raw_from_f64(signal: &Signal, raw: f64) -> u64 {
        round_to_bits(raw) & length_mask(signal.length() as usize)
    }

    /// Raw value as a signed or unsigned integer, per the signal's value type
    pub fn raw_to_i64(signal: &Signal, raw: u64) -> i64 {
        match signal.value_type() {
            ValueType::Signed => sign_extend(raw, signal.length() as usize),
            ValueType::Unsigned => raw as i64,
        }
    }

    /// Verify that `frame` can carry `signal`
    pub fn check_fits(signal: &Signal, frame: &Frame) -> Result<()> {
        let required = signal.required_bytes();
        if required > frame.len() {
            return Err(DbcError::Range {
                signal: signal.name().to_string(),
                required,
                available: frame.len(),
            });
        }

        if signal.length() == 0 || signal.length() > MAX_RAW_BITS {
            return Err(DbcError::UnsupportedWidth {
                signal: signal.name().to_string(),
                length: signal.length(),
            });
        }

        Ok(())
    }
}

/// Number of payload bytes a signal touches
pub fn required_bytes(start_bit: u16, length: u16, byte_order: ByteOrder) -> usize {
    let start_bit = start_bit as usize;
    let length = length as usize;

    match byte_order {
        ByteOrder::LittleEndian => (start_bit + length + 7) / 8,
        ByteOrder::BigEndian => {
            // Bits available in the start byte, from the start bit down to bit 0
            let first_byte_bits = start_bit % 8 + 1;
            let remaining = length.saturating_sub(first_byte_bits);
            start_bit / 8 + 1 + (remaining + 7) / 8
        }
    }
}

/// Round to the nearest integer and reinterpret it as two's complement bits
fn round_to_bits(value: f64) -> u64 {
    let rounded = value.round();
    if !rounded.is_finite() {
        0
    } else if rounded >= 0.0 {
        rounded as u64
    } else {
        rounded as i64 as u64
    }
}

fn length_mask(length: usize) -> u64 {
    if length >= 64 {
        u64::MAX
    } else {
        (1u64 << length) - 1
    }
}

/// Sign-extend a value from N bits to 64 bits
fn sign_extend(value: u64, bit_length: usize) -> i64 {
    if bit_length == 0 || bit_length >= 64 {
        return value as i64;
    }

    let sign_bit = 1u64 << (bit_length - 1);
    if (value & sign_bit) != 0 {
        let mask = !0u64 << bit_length;
        (value | mask) as i64
    } else {
        value as i64
    }
}

/// Whole-byte fields of 16, 32 or 64 bits, as (first byte, width in bytes)
fn aligned_field(start_bit: usize, length: usize, byte_order: ByteOrder) -> Option<(usize, usize)> {
    if !matches!(length, 16 | 32 | 64) {
        return None;
    }

    let aligned = match byte_order {
        ByteOrder::LittleEndian => start_bit % 8 == 0,
        ByteOrder::BigEndian => start_bit % 8 == 7,
    };
    aligned.then_some((start_bit / 8, length / 8))
}

fn extract_bits(data: &[u8], start_bit: usize, length: usize, byte_order: ByteOrder) -> u64 {
    if let Some((byte, width)) = aligned_field(start_bit, length, byte_order) {
        let bytes = &data[byte..byte + width];
        return match byte_order {
            ByteOrder::LittleEndian => LittleEndian::read_uint(bytes, width),
            ByteOrder::BigEndian => BigEndian::read_uint(bytes, width),
        };
    }

    match byte_order {
        ByteOrder::LittleEndian => extract_little_endian(data, start_bit, length),
        ByteOrder::BigEndian => extract_big_endian(data, start_bit, length),
    }
}

fn insert_bits(data: &mut [u8], start_bit: usize, length: usize, byte_order: ByteOrder, raw: u64) {
    let raw = raw & length_mask(length);

    if let Some((byte, width)) = aligned_field(start_bit, length, byte_order) {
        let bytes = &mut data[byte..byte + width];
        match byte_order {
            ByteOrder::LittleEndian => LittleEndian::write_uint(bytes, raw, width),
            ByteOrder::BigEndian => BigEndian::write_uint(bytes, raw, width),
        }
        return;
    }

    match byte_order {
        ByteOrder::LittleEndian => insert_little_endian(data, start_bit, length, raw),
        ByteOrder::BigEndian => insert_big_endian(data, start_bit, length, raw),
    }
}

/// Extract a little-endian (Intel) field; the start bit is the LSB
fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
    let mut result: u64 = 0;

    for i in 0..length {
        let bit_pos = start_bit + i;
        let bit_value = (data[bit_pos / 8] >> (bit_pos % 8)) & 0x01;
        result |= (bit_value as u64) << i;
    }

    result
}

/// Extract a big-endian (Motorola) field; the start bit is the MSB
fn extract_big_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
    let mut result: u64 = 0;
    let mut byte_idx = start_bit / 8;
    let mut bit_in_byte = start_bit % 8;

    for _ in 0..length {
        let bit_value = (data[byte_idx] >> bit_in_byte) & 0x01;
        result = (result << 1) | bit_value as u64;

        if bit_in_byte == 0 {
            bit_in_byte = 7;
            byte_idx += 1;
        } else {
            bit_in_byte -= 1;
        }
    }

    result
}

fn insert_little_endian(data: &mut [u8], start_bit: usize, length: usize, raw: u64) {
    for i in 0..length {
        let bit_pos = start_bit + i;
        let mask = 1u8 << (bit_pos % 8);
        if (raw >> i) & 0x01 != 0 {
            data[bit_pos / 8] |= mask;
        } else {
            data[bit_pos / 8] &= !mask;
        }
    }
}

fn insert_big_endian(data: &mut [u8], start_bit: usize, length: usize, raw: u64) {
    let mut byte_idx = start_bit / 8;
    let mut bit_in_byte = start_bit % 8;

    for i in 0..length {
        let mask = 1u8 << bit_in_byte;
        if (raw >> (length - 1 - i)) & 0x01 != 0 {
            data[byte_idx] |= mask;
        } else {
            data[byte_idx] &= !mask;
        }

        if bit_in_byte == 0 {
            bit_in_byte = 7;
            byte_idx += 1;
        } else {
            bit_in_byte -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &[u8]) -> Frame {
        Frame::new(0x100, data).unwrap()
    }

    fn intel(start: u16, length: u16, value_type: ValueType) -> Signal {
        Signal::new("Sig", start, length, ByteOrder::LittleEndian, value_type)
    }

    fn motorola(start: u16, length: u16, value_type: ValueType) -> Signal {
        Signal::new("Sig", start, length, ByteOrder::BigEndian, value_type)
    }

    #[test]
    fn test_extract_little_endian_simple() {
        let data = [0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_little_endian(&data, 0, 8), 0xAB);
        assert_eq!(extract_little_endian(&data, 0, 16), 0xCDAB);
        assert_eq!(extract_little_endian(&data, 4, 8), 0xDA);
    }

    #[test]
    fn test_extract_big_endian_simple() {
        let data = [0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_big_endian(&data, 7, 8), 0xAB);
        assert_eq!(extract_big_endian(&data, 7, 16), 0xABCD);
        // Low nibble of byte 0 followed by high nibble of byte 1
        assert_eq!(extract_big_endian(&data, 3, 8), 0xBC);
    }

    #[test]
    fn test_multi_byte_little_endian() {
        let data = [0x00, 0x5A, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(extract_little_endian(&data, 8, 12), 0x35A);
    }

    #[test]
    fn test_fast_path_matches_bitwise() {
        let data = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
        for &(start, length) in &[(0usize, 16usize), (8, 32), (0, 64)] {
            assert_eq!(
                extract_bits(&data, start, length, ByteOrder::LittleEndian),
                extract_little_endian(&data, start, length)
            );
        }
        for &(start, length) in &[(7usize, 16usize), (15, 32), (7, 64)] {
            assert_eq!(
                extract_bits(&data, start, length, ByteOrder::BigEndian),
                extract_big_endian(&data, start, length)
            );
        }
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0x7F, 8), 127);
        assert_eq!(sign_extend(0xFF, 8), -1);
        assert_eq!(sign_extend(0x8000, 16), -32768);
        assert_eq!(sign_extend(u64::MAX, 64), -1);
    }

    #[test]
    fn test_four_bit_signed_field() {
        let signal = intel(0, 4, ValueType::Signed);
        assert_eq!(SignalCodec::decode(&signal, &frame(&[0x0F])).unwrap(), -1.0);
        assert_eq!(SignalCodec::decode(&signal, &frame(&[0x07])).unwrap(), 7.0);
        assert_eq!(SignalCodec::decode(&signal, &frame(&[0xF8])).unwrap(), -8.0);
    }

    #[test]
    fn test_single_byte_agrees_across_orders() {
        let data = frame(&[0x5C, 0x00]);
        let le = SignalCodec::decode(&intel(0, 8, ValueType::Unsigned), &data).unwrap();
        let be = SignalCodec::decode(&motorola(7, 8, ValueType::Unsigned), &data).unwrap();
        assert_eq!(le, 0x5C as f64);
        assert_eq!(be, le);
    }

    #[test]
    fn test_byte_order_divergence() {
        let data = frame(&[0x12, 0x34, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let le = SignalCodec::decode(&intel(7, 16, ValueType::Unsigned), &data).unwrap();
        let be = SignalCodec::decode(&motorola(7, 16, ValueType::Unsigned), &data).unwrap();
        // Intel: bits 7..22 -> (0x003412 >> 7) & 0xFFFF
        assert_eq!(le, 0x68 as f64);
        // Motorola: byte 0 then byte 1, MSB first
        assert_eq!(be, 0x1234 as f64);
    }

    #[test]
    fn test_scaling() {
        let signal = intel(0, 16, ValueType::Unsigned).with_scaling(0.25, 0.0);
        let data = frame(&[0x40, 0x1F]);
        assert_eq!(SignalCodec::decode(&signal, &data).unwrap(), 2000.0);

        let temp = intel(16, 8, ValueType::Unsigned).with_scaling(1.0, -40.0);
        let data = frame(&[0, 0, 0x64]);
        assert_eq!(SignalCodec::decode(&temp, &data).unwrap(), 60.0);
    }

    #[test]
    fn test_float_signals_are_scaled() {
        let signal = intel(0, 32, ValueType::Unsigned)
            .with_data_type(DataType::Float)
            .with_scaling(2.0, 1.0);
        let mut data = Frame::zeroed(0x100, 8).unwrap();
        SignalCodec::encode(&signal, 4.0, &mut data).unwrap();
        assert_eq!(&data.data()[..4], &1.5f32.to_le_bytes());
        assert_eq!(SignalCodec::decode(&signal, &data).unwrap(), 4.0);

        let double = motorola(7, 64, ValueType::Signed).with_data_type(DataType::Double);
        let mut data = Frame::zeroed(0x100, 8).unwrap();
        SignalCodec::encode(&double, -123.456, &mut data).unwrap();
        assert_eq!(data.data(), &(-123.456f64).to_be_bytes());
        assert_eq!(SignalCodec::decode(&double, &data).unwrap(), -123.456);
    }

    #[test]
    fn test_encode_preserves_neighbours() {
        let signal = intel(4, 8, ValueType::Unsigned);
        let mut data = frame(&[0xFF, 0xFF]);
        SignalCodec::encode(&signal, 0.0, &mut data).unwrap();
        assert_eq!(data.data(), &[0x0F, 0xF0]);

        let signal = motorola(3, 8, ValueType::Unsigned);
        let mut data = frame(&[0xFF, 0xFF]);
        SignalCodec::encode(&signal, 0.0, &mut data).unwrap();
        assert_eq!(data.data(), &[0xF0, 0x0F]);
    }

    #[test]
    fn test_encode_truncates_overflow() {
        let signal = intel(0, 4, ValueType::Unsigned);
        let mut data = frame(&[0xF0]);
        SignalCodec::encode(&signal, 0x1B as f64, &mut data).unwrap();
        assert_eq!(data.data(), &[0xFB]);

        let signed = intel(0, 4, ValueType::Signed);
        let mut data = frame(&[0x00]);
        SignalCodec::encode(&signed, -1.0, &mut data).unwrap();
        assert_eq!(data.data(), &[0x0F]);
    }

    #[test]
    fn test_encode_rounds() {
        let signal = intel(0, 8, ValueType::Unsigned).with_scaling(0.5, 0.0);
        assert_eq!(SignalCodec::physical_to_raw(&signal, 10.3), 21);
        assert_eq!(SignalCodec::physical_to_raw(&signal, 10.2), 20);
        let zero_factor = intel(0, 8, ValueType::Unsigned).with_scaling(0.0, 0.0);
        assert_eq!(SignalCodec::physical_to_raw(&zero_factor, 10.0), 0);
    }

    #[test]
    fn test_frame_too_short() {
        let signal = intel(8, 16, ValueType::Unsigned);
        let short = frame(&[0xAA, 0xBB]);
        let err = SignalCodec::decode(&signal, &short).unwrap_err();
        assert!(err.is_range());
        assert_eq!(short.data(), &[0xAA, 0xBB]);

        let mut short = frame(&[0xAA, 0xBB]);
        assert!(SignalCodec::encode(&signal, 1.0, &mut short).unwrap_err().is_range());
        assert_eq!(short.data(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_required_bytes() {
        assert_eq!(required_bytes(0, 16, ByteOrder::LittleEndian), 2);
        assert_eq!(required_bytes(7, 16, ByteOrder::LittleEndian), 3);
        assert_eq!(required_bytes(7, 16, ByteOrder::BigEndian), 2);
        assert_eq!(required_bytes(3, 4, ByteOrder::BigEndian), 1);
        assert_eq!(required_bytes(3, 5, ByteOrder::BigEndian), 2);
        assert_eq!(required_bytes(63, 64, ByteOrder::BigEndian), 15);
        assert_eq!(required_bytes(7, 64, ByteOrder::BigEndian), 8);
    }

    #[test]
    fn test_wide_signal_unsupported() {
        let signal = intel(0, 72, ValueType::Unsigned);
        let data = Frame::zeroed(0x100, 16).unwrap();
        assert!(matches!(
            SignalCodec::decode(&signal, &data),
            Err(DbcError::UnsupportedWidth { length: 72, .. })
        ));
    }

    #[test]
    fn test_round_trip_all_widths() {
        let mut data = Frame::zeroed(0x100, 8).unwrap();
        let factor = 0.5;
        let offset = -10.0;

        for &order in &[ByteOrder::LittleEndian, ByteOrder::BigEndian] {
            for &value_type in &[ValueType::Unsigned, ValueType::Signed] {
                for length in 1u16..=32 {
                    let start = match order {
                        ByteOrder::LittleEndian => 3,
                        ByteOrder::BigEndian => 5,
                    };
                    let signal = Signal::new("Sig", start, length, order, value_type)
                        .with_scaling(factor, offset);

                    let raws: Vec<i64> = match value_type {
                        ValueType::Unsigned => {
                            let max = (1i64 << length) - 1;
                            vec![0, 1, max / 2, max]
                        }
                        ValueType::Signed => {
                            let min = -(1i64 << (length - 1));
                            let max = (1i64 << (length - 1)) - 1;
                            vec![min, -1, 0, max]
                        }
                    };

                    for raw in raws {
                        let physical = raw as f64 * factor + offset;
                        SignalCodec::encode(&signal, physical, &mut data).unwrap();
                        let decoded = SignalCodec::decode(&signal, &data).unwrap();
                        assert!(
                            (decoded - physical).abs() <= factor,
                            "{:?} {:?} len {}: {} -> {}",
                            order,
                            value_type,
                            length,
                            physical,
                            decoded
                        );
                    }
                }
            }
        }
    }
}
