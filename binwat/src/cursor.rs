//! Bounds-checked reading of the offset-addressed debugging region.
//!
//! The Watcom debug format is built out of tables that point into one another
//! by byte offset, so decoding works on in-memory regions instead of an
//! `io::Read` stream. A [`Cursor`] is a read position over one such region;
//! every read that would cross the region boundary fails with
//! [`Error::Truncated`] rather than returning garbage.


use crate::error::Error;
use crate::latin1_string;


/// Sign-extends an `bits`-bit two's-complement value.
///
/// Values in `[0, 2^bits)` are returned unchanged; values in
/// `[2^bits, 2^(bits+1))` come out as `value - 2^(bits+1)`.
pub fn to_signed(value: u32, bits: u32) -> i32 {
    let sign_bit = 1u64 << bits;
    let value = u64::from(value);
    if value >= sign_bit {
        -((((!value) & (sign_bit - 1)) + 1) as i64) as i32
    } else {
        value as i32
    }
}

/// A read position over a byte region.
///
/// The region may be a sub-span of a larger buffer; `base` records where the
/// region starts within that buffer so that error messages can name absolute
/// offsets. `context` names the table or record being decoded, again only for
/// error messages.
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    buffer: &'a [u8],
    base: usize,
    position: usize,
    context: &'static str,
}
impl<'a> Cursor<'a> {
    pub fn new(buffer: &'a [u8], context: &'static str) -> Self {
        Self {
            buffer,
            base: 0,
            position: 0,
            context,
        }
    }

    /// Creates a cursor over `buffer[offset..offset+length]` without copying.
    pub fn over(buffer: &'a [u8], offset: usize, length: usize, context: &'static str) -> Result<Self, Error> {
        let end = offset.checked_add(length)
            .ok_or(Error::Structural { offset, context })?;
        if end > buffer.len() {
            return Err(Error::Truncated {
                offset,
                needed: length,
                available: buffer.len().saturating_sub(offset),
                context,
            });
        }
        Ok(Self {
            buffer: &buffer[offset..end],
            base: offset,
            position: 0,
            context,
        })
    }

    /// The read position within the region.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The read position relative to the buffer the region was taken from.
    pub fn offset(&self) -> usize {
        self.base + self.position
    }

    pub fn at_end(&self) -> bool {
        self.position >= self.buffer.len()
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn truncated(&self, needed: usize) -> Error {
        Error::Truncated {
            offset: self.offset(),
            needed,
            available: self.remaining(),
            context: self.context,
        }
    }

    /// A structural-inconsistency error at the current read position.
    pub fn structural(&self, context: &'static str) -> Error {
        Error::Structural {
            offset: self.offset(),
            context,
        }
    }

    /// Returns the next `length` bytes and advances past them.
    pub fn read_slice(&mut self, length: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < length {
            return Err(self.truncated(length));
        }
        let slice = &self.buffer[self.position..self.position+length];
        self.position += length;
        Ok(slice)
    }

    /// Splits off a child cursor over the next `length` bytes and advances
    /// past them. The child reports offsets relative to the same buffer.
    pub fn sub_cursor(&mut self, length: usize, context: &'static str) -> Result<Cursor<'a>, Error> {
        let base = self.offset();
        let slice = self.read_slice(length)?;
        Ok(Cursor {
            buffer: slice,
            base,
            position: 0,
            context,
        })
    }

    /// Reads the next byte without advancing.
    pub fn peek_u8(&self) -> Result<u8, Error> {
        if self.at_end() {
            return Err(self.truncated(1));
        }
        Ok(self.buffer[self.position])
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let slice = self.read_slice(1)?;
        Ok(slice[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16, Error> {
        let slice = self.read_slice(2)?;
        Ok(u16::from_le_bytes(slice.try_into().unwrap()))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, Error> {
        let slice = self.read_slice(4)?;
        Ok(u32::from_le_bytes(slice.try_into().unwrap()))
    }

    pub fn read_s8(&mut self) -> Result<i32, Error> {
        let value = self.read_u8()?;
        Ok(to_signed(value.into(), 7))
    }

    pub fn read_s16_le(&mut self) -> Result<i32, Error> {
        let value = self.read_u16_le()?;
        Ok(to_signed(value.into(), 15))
    }

    pub fn read_s32_le(&mut self) -> Result<i32, Error> {
        let value = self.read_u32_le()?;
        Ok(to_signed(value, 31))
    }

    /// Reads a packed type/scope index.
    ///
    /// One byte if its high bit is clear; otherwise the high byte (minus the
    /// marker bit) followed by a second low byte, a 15-bit value.
    pub fn read_index(&mut self) -> Result<u16, Error> {
        let first = self.read_u8()?;
        if first & 0x80 != 0 {
            let second = self.read_u8()?;
            Ok((u16::from(first & 0x7F) << 8) | u16::from(second))
        } else {
            Ok(first.into())
        }
    }

    /// Reads a length byte followed by that many ISO-8859-1 characters.
    pub fn read_pascal_string(&mut self) -> Result<String, Error> {
        let length = self.read_u8()?;
        let slice = self.read_slice(length.into())?;
        Ok(latin1_string(slice))
    }

    /// Reads all remaining bytes of the region as one ISO-8859-1 string.
    ///
    /// Record decoders use this for trailing name fields, which are not
    /// NUL-terminated and run exactly to the end of the record's slice.
    pub fn read_string_to_end(&mut self) -> String {
        let slice = &self.buffer[self.position..];
        self.position = self.buffer.len();
        latin1_string(slice)
    }

    /// Reads NUL-terminated ISO-8859-1 strings until the region is exhausted.
    ///
    /// A trailing fragment without a terminating NUL is discarded.
    pub fn read_string_array(&mut self) -> Vec<String> {
        let mut strings = Vec::new();
        let mut current = Vec::new();
        while self.position < self.buffer.len() {
            let byte = self.buffer[self.position];
            self.position += 1;
            if byte == 0x00 {
                strings.push(latin1_string(&current));
                current.clear();
            } else {
                current.push(byte);
            }
        }
        strings
    }

    /// Reads 16-bit little-endian values until the region is exhausted.
    pub fn read_u16_le_array(&mut self) -> Result<Vec<u16>, Error> {
        let mut values = Vec::new();
        while !self.at_end() {
            values.push(self.read_u16_le()?);
        }
        Ok(values)
    }
}


/// Unsigned integer widths readable from a [`Cursor`], for record layouts
/// that exist in 8-, 16- and 32-bit flavors.
pub trait CursorInt: Sized {
    fn read_le(cursor: &mut Cursor<'_>) -> Result<Self, Error>;
}
impl CursorInt for u8 {
    fn read_le(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        cursor.read_u8()
    }
}
impl CursorInt for u16 {
    fn read_le(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        cursor.read_u16_le()
    }
}
impl CursorInt for u32 {
    fn read_le(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        cursor.read_u32_le()
    }
}
