use byteorder::{BigEndian, ByteOrder};
use std::fmt::Display;

/// Reading past the end of the underlying buffer. `at` is the cursor
/// position when the read was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorError {
    pub at: usize,
    pub wanted: usize,
}

impl Display for CursorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unexpected end of data: wanted {} byte(s) at offset {}",
            self.wanted, self.at
        )
    }
}

/// Bounds-checked big-endian reader over a byte slice. Every read either
/// succeeds completely or returns a `CursorError`; no read ever panics.
pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CursorError> {
        if n > self.remaining() {
            return Err(CursorError {
                at: self.pos,
                wanted: n,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), CursorError> {
        self.take(n).map(|_| ())
    }

    /// Advances to the next multiple of `alignment` relative to the start of
    /// the buffer. Used by the `tableswitch`/`lookupswitch` 4-byte padding.
    pub fn align_to(&mut self, alignment: usize) -> Result<(), CursorError> {
        let rem = self.pos % alignment;
        if rem != 0 {
            self.skip(alignment - rem)?;
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, CursorError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, CursorError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, CursorError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn read_i16(&mut self) -> Result<i16, CursorError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32, CursorError> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CursorError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64, CursorError> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CursorError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CursorError> {
        Ok(f64::from_bits(self.read_u64()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_big_endian() {
        let mut c = Cursor::new(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(c.read_u16().unwrap(), 0x0102);
        assert_eq!(c.read_u16().unwrap(), 0x0304);
        assert!(c.is_empty());
    }

    #[test]
    fn overrun_is_an_error_not_a_panic() {
        let mut c = Cursor::new(&[0xCA, 0xFE]);
        let err = c.read_u32().unwrap_err();
        assert_eq!(err, CursorError { at: 0, wanted: 4 });
        // The failed read consumed nothing.
        assert_eq!(c.read_u16().unwrap(), 0xCAFE);
    }

    #[test]
    fn align_to_is_relative_to_buffer_start() {
        let mut c = Cursor::new(&[0; 8]);
        c.skip(1).unwrap();
        c.align_to(4).unwrap();
        assert_eq!(c.position(), 4);
        c.align_to(4).unwrap();
        assert_eq!(c.position(), 4);
    }
}
