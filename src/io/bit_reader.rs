//! Bit granularity cursor over a byte buffer.
//!
//! CTF integers do not have to start or end on a byte boundary. For little
//! endian data the first bit of the stream is the least significant bit of the
//! first byte, for big endian data it is the most significant one. Byte order is
//! chosen for each read, since a structure may mix fields of both orders.

use crate::error::CtfError;
use crate::error::Result;
use byteorder::BigEndian;
use byteorder::LittleEndian;
use pastey::paste;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use std::borrow::Cow;

/// Byte order of an integer or float field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    #[serde(alias = "le")]
    LittleEndian,
    #[serde(alias = "be", alias = "network")]
    BigEndian,
}

/// Fast path for byte aligned integers of a native size.
macro_rules! aligned_reader {
    ($bits: literal) => {
        paste! {
            fn [<read_aligned_ $bits>](data: &[u8], order: ByteOrder) -> u64 {
                use byteorder::ByteOrder as _;
                match order {
                    ByteOrder::LittleEndian => u64::from(LittleEndian::[<read_u $bits>](data)),
                    ByteOrder::BigEndian => u64::from(BigEndian::[<read_u $bits>](data)),
                }
            }
        }
    };
}

aligned_reader!(16);

aligned_reader!(32);

aligned_reader!(64);

/// Cursor reading bit fields out of a byte slice. The cursor only moves
/// forward unless explicitly repositioned.
#[derive(Debug, Clone)]
pub struct BitReader<'data> {
    data: &'data [u8],
    position: u64,
    byte_order: ByteOrder,
}

impl<'data> BitReader<'data> {
    /// Create a reader at bit 0. `byte_order` is used for declarations that do
    /// not specify their own.
    pub fn new(data: &'data [u8], byte_order: ByteOrder) -> Self {
        Self {
            data,
            position: 0,
            byte_order,
        }
    }

    /// The default byte order of this reader.
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn set_byte_order(&mut self, byte_order: ByteOrder) {
        self.byte_order = byte_order;
    }

    /// Current position in bits.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move the cursor. Positions past the end are allowed, but any read from
    /// there fails.
    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    /// Size of the underlying buffer in bits.
    pub fn capacity(&self) -> u64 {
        self.data.len() as u64 * 8
    }

    /// Number of bits left before the end of the buffer.
    pub fn remaining(&self) -> u64 {
        self.capacity().saturating_sub(self.position)
    }

    /// True if `length` more bits can be read.
    pub fn can_read(&self, length: u64) -> bool {
        self.position
            .checked_add(length)
            .is_some_and(|end| end <= self.capacity())
    }

    /// Advance to the next multiple of `alignment` bits.
    pub fn align(&mut self, alignment: u64) {
        if alignment > 1 {
            self.position = self.position.div_ceil(alignment) * alignment;
        }
    }

    fn check(&self, length: u64) -> Result<()> {
        if self.can_read(length) {
            Ok(())
        } else {
            Err(CtfError::OutOfBounds {
                position: self.position,
                length,
                capacity: self.capacity(),
            })
        }
    }

    /// Read an integer of `length` bits (at most 64).
    ///
    /// The result is returned as raw 64-bit two's complement: when `signed` is
    /// set the value is sign extended.
    pub fn read_int(&mut self, length: u32, signed: bool, order: ByteOrder) -> Result<u64> {
        if length > 64 {
            return Err(CtfError::InvalidDeclaration(format!(
                "Cannot read an integer with over 64 bits. Length given: {length}"
            )));
        }
        let length64 = u64::from(length);
        self.check(length64)?;
        if length == 0 {
            return Ok(0);
        }
        let start = self.position;
        let raw = if start % 8 == 0 && matches!(length, 8 | 16 | 32 | 64) {
            let byte = (start / 8) as usize;
            let data = &self.data[byte..byte + (length / 8) as usize];
            match length {
                8 => u64::from(data[0]),
                16 => read_aligned_16(data, order),
                32 => read_aligned_32(data, order),
                _ => read_aligned_64(data, order),
            }
        } else {
            self.read_unaligned(start, length, order)
        };
        self.position += length64;

        let value = if signed && length < 64 && (raw >> (length - 1)) & 1 == 1 {
            raw | (u64::MAX << length)
        } else {
            raw
        };
        Ok(value)
    }

    fn read_unaligned(&self, start: u64, length: u32, order: ByteOrder) -> u64 {
        let end = start + u64::from(length);
        let first = (start / 8) as usize;
        let last = end.div_ceil(8) as usize;
        let bytes = &self.data[first..last];
        let shift_in = (start % 8) as u32;
        let mask = if length == 64 {
            u128::from(u64::MAX)
        } else {
            (1u128 << length) - 1
        };
        // At most 9 bytes are involved, so a u128 accumulator holds them all.
        let acc = match order {
            ByteOrder::LittleEndian => bytes
                .iter()
                .rev()
                .fold(0u128, |acc, &b| (acc << 8) | u128::from(b)),
            ByteOrder::BigEndian => bytes
                .iter()
                .fold(0u128, |acc, &b| (acc << 8) | u128::from(b)),
        };
        let value = match order {
            ByteOrder::LittleEndian => acc >> shift_in,
            ByteOrder::BigEndian => {
                let total = bytes.len() as u32 * 8;
                acc >> (total - shift_in - length)
            }
        };
        (value & mask) as u64
    }

    /// Read an IEEE-754 style float with the given exponent and mantissa
    /// widths (mantissa excludes the implicit leading bit).
    pub fn read_float(&mut self, exponent: u32, mantissa: u32, order: ByteOrder) -> Result<f64> {
        let length = 1 + exponent + mantissa;
        if exponent == 0 || mantissa == 0 || exponent > 15 || length > 64 {
            return Err(CtfError::InvalidDeclaration(format!(
                "Unsupported float layout: exponent {exponent} bits, mantissa {mantissa} bits"
            )));
        }
        let raw = self.read_int(length, false, order)?;
        Ok(match (exponent, mantissa) {
            (8, 23) => f64::from(f32::from_bits(raw as u32)),
            (11, 52) => f64::from_bits(raw),
            _ => decode_float(raw, exponent, mantissa),
        })
    }

    /// Read `count` whole bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<Cow<'data, [u8]>> {
        let length = count as u64 * 8;
        self.check(length)?;
        if self.position % 8 == 0 {
            let start = (self.position / 8) as usize;
            self.position += length;
            Ok(Cow::Borrowed(&self.data[start..start + count]))
        } else {
            let mut bytes = Vec::with_capacity(count);
            for _ in 0..count {
                bytes.push(self.read_int(8, false, ByteOrder::BigEndian)? as u8);
            }
            Ok(Cow::Owned(bytes))
        }
    }

    /// Read a NUL terminated string starting at the next byte boundary. The
    /// returned bytes do not include the terminator.
    pub fn read_cstring(&mut self) -> Result<&'data [u8]> {
        self.align(8);
        let start = (self.position / 8) as usize;
        let rest = self.data.get(start..).unwrap_or_default();
        let Some(nul) = memchr::memchr(0, rest) else {
            return Err(CtfError::OutOfBounds {
                position: self.position,
                length: (rest.len() as u64 + 1) * 8,
                capacity: self.capacity(),
            });
        };
        self.position += (nul as u64 + 1) * 8;
        Ok(&rest[..nul])
    }
}

/// Decode a float of non-standard width from its bit pattern.
fn decode_float(raw: u64, exponent: u32, mantissa: u32) -> f64 {
    let sign = if (raw >> (exponent + mantissa)) & 1 == 1 {
        -1.0
    } else {
        1.0
    };
    let exp_max = (1u64 << exponent) - 1;
    let exp = (raw >> mantissa) & exp_max;
    let frac = raw & ((1u64 << mantissa) - 1);
    let bias = (1i32 << (exponent - 1)) - 1;
    let scale = 2f64.powi(mantissa as i32);
    if exp == exp_max {
        if frac == 0 {
            sign * f64::INFINITY
        } else {
            f64::NAN
        }
    } else if exp == 0 {
        sign * (frac as f64 / scale) * 2f64.powi(1 - bias)
    } else {
        sign * (1.0 + frac as f64 / scale) * 2f64.powi(exp as i32 - bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bit_writer::BitWriter;

    const WIDTHS: [u32; 7] = [1, 5, 8, 16, 27, 32, 64];

    fn max_for(width: u32) -> u64 {
        if width == 64 {
            u64::MAX
        } else {
            (1 << width) - 1
        }
    }

    #[test]
    fn test_boundary_widths_round_trip() {
        for order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
            for offset in [0u64, 3] {
                let mut writer = BitWriter::new(order);
                writer.skip(offset);
                for width in WIDTHS {
                    writer.write(width, max_for(width) & 0x5a5a_5a5a_5a5a_5a5a);
                    writer.write(width, max_for(width));
                }
                let data = writer.finish();

                let mut reader = BitReader::new(&data, order);
                reader.set_position(offset);
                for width in WIDTHS {
                    let expected = max_for(width) & 0x5a5a_5a5a_5a5a_5a5a;
                    assert_eq!(
                        reader.read_int(width, false, order).unwrap(),
                        expected,
                        "width {width} order {order:?} offset {offset}"
                    );
                    assert_eq!(reader.read_int(width, false, order).unwrap(), max_for(width));
                }
            }
        }
    }

    #[test]
    fn test_signed_values() {
        let mut writer = BitWriter::new(ByteOrder::LittleEndian);
        writer.write(5, 0b11111);
        writer.write(5, 0b01111);
        writer.write(27, max_for(27));
        let data = writer.finish();
        let mut reader = BitReader::new(&data, ByteOrder::LittleEndian);
        assert_eq!(
            reader.read_int(5, true, ByteOrder::LittleEndian).unwrap() as i64,
            -1
        );
        assert_eq!(
            reader.read_int(5, true, ByteOrder::LittleEndian).unwrap() as i64,
            15
        );
        assert_eq!(
            reader.read_int(27, true, ByteOrder::LittleEndian).unwrap() as i64,
            -1
        );
    }

    #[test]
    fn test_known_layouts() {
        // Little endian: first bit is the LSB of byte 0.
        let data = [0b1010_0001, 0xff];
        let mut reader = BitReader::new(&data, ByteOrder::LittleEndian);
        assert_eq!(reader.read_int(1, false, ByteOrder::LittleEndian).unwrap(), 1);
        assert_eq!(reader.read_int(4, false, ByteOrder::LittleEndian).unwrap(), 0);
        assert_eq!(reader.read_int(3, false, ByteOrder::LittleEndian).unwrap(), 0b101);

        // Big endian: first bit is the MSB of byte 0.
        let mut reader = BitReader::new(&data, ByteOrder::BigEndian);
        assert_eq!(reader.read_int(1, false, ByteOrder::BigEndian).unwrap(), 1);
        assert_eq!(reader.read_int(4, false, ByteOrder::BigEndian).unwrap(), 0b0100);
        assert_eq!(reader.read_int(3, false, ByteOrder::BigEndian).unwrap(), 0b001);

        let data = [0x12, 0x34];
        let mut reader = BitReader::new(&data, ByteOrder::LittleEndian);
        assert_eq!(reader.read_int(16, false, ByteOrder::BigEndian).unwrap(), 0x1234);
        reader.set_position(0);
        assert_eq!(reader.read_int(16, false, ByteOrder::LittleEndian).unwrap(), 0x3412);
    }

    #[test]
    fn test_out_of_bounds() {
        let data = [0u8; 2];
        let mut reader = BitReader::new(&data, ByteOrder::LittleEndian);
        reader.read_int(12, false, ByteOrder::LittleEndian).unwrap();
        let err = reader.read_int(8, false, ByteOrder::LittleEndian).unwrap_err();
        assert!(err.is_out_of_bounds());
        // A failed read does not move the cursor.
        assert_eq!(reader.position(), 12);
        assert_eq!(reader.remaining(), 4);

        reader.set_position(100);
        assert_eq!(reader.remaining(), 0);
        assert!(reader.read_int(1, false, ByteOrder::LittleEndian).is_err());
    }

    #[test]
    fn test_align() {
        let data = [0u8; 16];
        let mut reader = BitReader::new(&data, ByteOrder::LittleEndian);
        reader.set_position(1);
        reader.align(8);
        assert_eq!(reader.position(), 8);
        reader.align(8);
        assert_eq!(reader.position(), 8);
        reader.align(32);
        assert_eq!(reader.position(), 32);
        reader.set_position(33);
        reader.align(64);
        assert_eq!(reader.position(), 64);
        reader.align(1);
        assert_eq!(reader.position(), 64);
    }

    #[test]
    fn test_floats() {
        let mut data = Vec::new();
        data.extend_from_slice(&1.5f32.to_le_bytes());
        data.extend_from_slice(&(-2.25f64).to_be_bytes());
        let mut reader = BitReader::new(&data, ByteOrder::LittleEndian);
        assert_eq!(reader.read_float(8, 23, ByteOrder::LittleEndian).unwrap(), 1.5);
        assert_eq!(reader.read_float(11, 52, ByteOrder::BigEndian).unwrap(), -2.25);

        // IEEE half precision: 0x3e00 is 1.5, 0xc000 is -2.
        let data = [0x00, 0x3e, 0x00, 0xc0];
        let mut reader = BitReader::new(&data, ByteOrder::LittleEndian);
        assert_eq!(reader.read_float(5, 10, ByteOrder::LittleEndian).unwrap(), 1.5);
        assert_eq!(reader.read_float(5, 10, ByteOrder::LittleEndian).unwrap(), -2.0);
    }

    #[test]
    fn test_strings_and_bytes() {
        let data = b"\x01hello\0world\0\xaa\xbb";
        let mut reader = BitReader::new(data, ByteOrder::LittleEndian);
        reader.read_int(3, false, ByteOrder::LittleEndian).unwrap();
        // Strings start on a byte boundary, so the partially read byte is skipped.
        assert_eq!(reader.read_cstring().unwrap(), b"hello".as_slice());
        assert_eq!(reader.read_cstring().unwrap(), b"world".as_slice());
        assert_eq!(reader.read_bytes(2).unwrap().as_ref(), &[0xaa, 0xbb]);
        assert!(reader.read_cstring().is_err());
    }
}
