use crate::error::{Error, Result};

/// Bounds-checked little-endian reader over an advertisement buffer.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Takes the next `n` bytes, or fails without moving if fewer remain.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Everything not yet read. Consumes the cursor's remaining bytes.
    pub fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.data[self.pos..];
        self.pos = self.data.len();
        bytes
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(i8::from_le_bytes(self.array()?))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        let [b0, b1, b2] = self.array()?;
        Ok(u32::from_le_bytes([b0, b1, b2, 0]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian() {
        let mut c = Cursor::new(&[0x34, 0x08, 0xfe, 0x01, 0x02, 0x03, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(c.read_u16().unwrap(), 0x0834);
        assert_eq!(c.read_i8().unwrap(), -2);
        assert_eq!(c.read_u24().unwrap(), 0x030201);
        assert_eq!(c.read_u32().unwrap(), 0x12345678);
        assert!(c.is_empty());
    }

    #[test]
    fn negative_i16() {
        let mut c = Cursor::new(&[0x18, 0xfc]);
        assert_eq!(c.read_i16().unwrap(), -1000);
    }

    #[test]
    fn truncated_read_does_not_advance() {
        let mut c = Cursor::new(&[0x01, 0x02, 0x03]);
        c.skip(2).unwrap();
        let err = c.read_u16().unwrap_err();
        assert_eq!(
            err,
            Error::Truncated {
                needed: 2,
                remaining: 1
            }
        );
        assert_eq!(c.remaining(), 1);
        assert_eq!(c.read_u8().unwrap(), 0x03);
        assert!(c.read_u8().is_err());
    }

    #[test]
    fn rest_drains() {
        let mut c = Cursor::new(&[1, 2, 3, 4]);
        c.skip(1).unwrap();
        assert_eq!(c.rest(), &[2, 3, 4]);
        assert_eq!(c.remaining(), 0);
    }
}
