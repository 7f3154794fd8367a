//! Little endian helpers for the block reader and writer
use std::io;

/// Writer extension to write little endian data
pub trait WriteBytesExt<T> {
    /// Writes `T` to a bytes stream. Least significant byte first.
    fn write_le(&mut self, n: T) -> io::Result<()>;
}

impl<W: io::Write + ?Sized> WriteBytesExt<u8> for W {
    #[inline]
    fn write_le(&mut self, n: u8) -> io::Result<()> {
        self.write_all(&[n])
    }
}

impl<W: io::Write + ?Sized> WriteBytesExt<u16> for W {
    #[inline]
    fn write_le(&mut self, n: u16) -> io::Result<()> {
        self.write_all(&n.to_le_bytes())
    }
}

/// Reader extension to read little endian data
pub trait ReadBytesExt: io::Read {
    /// Reads a single byte.
    #[inline]
    fn read_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a `u16`, least significant byte first.
    #[inline]
    fn read_le_u16(&mut self) -> io::Result<u16> {
        let mut buf = [0; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }
}

impl<R: io::Read + ?Sized> ReadBytesExt for R {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn le_roundtrip() {
        let mut out = Vec::new();
        out.write_le(0x12u8).unwrap();
        out.write_le(0xABCDu16).unwrap();
        assert_eq!(out, [0x12, 0xCD, 0xAB]);

        let mut input = &out[..];
        assert_eq!(input.read_u8().unwrap(), 0x12);
        assert_eq!(input.read_le_u16().unwrap(), 0xABCD);
        assert!(input.read_u8().is_err());
    }
}
