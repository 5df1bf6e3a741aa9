//! Position-tracked little-endian streams for the cache codec.
//!
//! Node records are framed by ASCII name tags (`[TXFM_1]`); everything
//! else is raw little-endian binary. The read side maps a short read to
//! [`Error::UnexpectedEof`] carrying the stream position, so a truncated
//! file reports where it broke.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::util::{Error, Result};

/// Longest accepted name tag, delimiters excluded.
pub const MAX_TAG_LEN: usize = 64;
/// Longest accepted length-prefixed string.
pub const MAX_STRING_LEN: usize = 4096;

/// Little-endian output stream tracking the write position.
pub struct OStream<W: Write> {
    writer: W,
    pos: u64,
}

impl<W: Write> OStream<W> {
    pub fn new(writer: W) -> Self {
        OStream { writer, pos: 0 }
    }

    /// Current write position in bytes.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.pos += data.len() as u64;
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.writer.write_u8(v)?;
        self.pos += 1;
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(v)?;
        self.pos += 4;
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.writer.write_i32::<LittleEndian>(v)?;
        self.pos += 4;
        Ok(())
    }

    pub fn write_f32(&mut self, v: f32) -> Result<()> {
        self.writer.write_f32::<LittleEndian>(v)?;
        self.pos += 4;
        Ok(())
    }

    pub fn write_f64(&mut self, v: f64) -> Result<()> {
        self.writer.write_f64::<LittleEndian>(v)?;
        self.pos += 8;
        Ok(())
    }

    /// Write a node name tag, e.g. `[TXFM_1]`.
    pub fn write_tag(&mut self, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_TAG_LEN {
            return Err(Error::WriteFailed(format!("bad tag name '{}'", name)));
        }
        self.write_bytes(b"[")?;
        self.write_bytes(name.as_bytes())?;
        self.write_bytes(b"]")
    }

    /// Write a length-prefixed string (used for node references).
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        if s.len() > MAX_STRING_LEN {
            return Err(Error::WriteFailed(format!("string too long ({})", s.len())));
        }
        self.write_u32(s.len() as u32)?;
        self.write_bytes(s.as_bytes())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Little-endian input stream tracking the read position.
pub struct IStream<R: Read> {
    reader: R,
    pos: u64,
}

impl<R: Read> IStream<R> {
    pub fn new(reader: R) -> Self {
        IStream { reader, pos: 0 }
    }

    /// Current read position in bytes.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    fn map_eof(&self, e: std::io::Error) -> Error {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEof(self.pos)
        } else {
            Error::Io(e)
        }
    }

    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader
            .read_exact(buf)
            .map_err(|e| self.map_eof(e))?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let v = self.reader.read_u8().map_err(|e| self.map_eof(e))?;
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let v = self
            .reader
            .read_u32::<LittleEndian>()
            .map_err(|e| self.map_eof(e))?;
        self.pos += 4;
        Ok(v)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let v = self
            .reader
            .read_i32::<LittleEndian>()
            .map_err(|e| self.map_eof(e))?;
        self.pos += 4;
        Ok(v)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let v = self
            .reader
            .read_f32::<LittleEndian>()
            .map_err(|e| self.map_eof(e))?;
        self.pos += 4;
        Ok(v)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let v = self
            .reader
            .read_f64::<LittleEndian>()
            .map_err(|e| self.map_eof(e))?;
        self.pos += 8;
        Ok(v)
    }

    /// Read a single-byte boolean; anything but 0 or 1 is corruption.
    pub fn read_flag(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(Error::invalid(format!(
                "bad presence flag {} at position {}",
                v,
                self.pos - 1
            ))),
        }
    }

    /// Read a node name tag. Returns the position of the opening bracket
    /// and the name between the brackets.
    pub fn read_tag(&mut self) -> Result<(u64, String)> {
        let start = self.pos;
        let mut b = [0u8; 1];
        self.read_bytes(&mut b)?;
        if b[0] != b'[' {
            return Err(Error::invalid(format!(
                "expected a name tag at position {}",
                start
            )));
        }

        let mut name = Vec::new();
        loop {
            self.read_bytes(&mut b)?;
            if b[0] == b']' {
                break;
            }
            if !b[0].is_ascii_graphic() {
                return Err(Error::invalid(format!(
                    "non-printable byte in name tag at position {}",
                    self.pos - 1
                )));
            }
            name.push(b[0]);
            if name.len() > MAX_TAG_LEN {
                return Err(Error::invalid(format!(
                    "unterminated name tag at position {}",
                    start
                )));
            }
        }

        if name.is_empty() {
            return Err(Error::invalid(format!("empty name tag at position {}", start)));
        }

        Ok((start, String::from_utf8(name)?))
    }

    /// Read a length-prefixed string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        if len > MAX_STRING_LEN {
            return Err(Error::invalid(format!(
                "string length {} at position {} exceeds limit",
                len,
                self.pos - 4
            )));
        }
        let mut buf = vec![0u8; len];
        self.read_bytes(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
