//! Low-level reader for the protobuf wire primitives.

use crate::error::{DecodeError, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::Cursor;

const MAX_VARINT_LEN: usize = 10;
const GRPC_PREFIX_LEN: usize = 5;

mod ptypes {
    pub const VARINT: u8 = 0;
    pub const FIXED64: u8 = 1;
    pub const LENGTH_DELIMITED: u8 = 2;
    pub const FIXED32: u8 = 5;
}

/// The wire kinds this decoder understands. Groups (3 and 4) are not among them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            ptypes::VARINT => Some(Self::Varint),
            ptypes::FIXED64 => Some(Self::Fixed64),
            ptypes::LENGTH_DELIMITED => Some(Self::LengthDelimited),
            ptypes::FIXED32 => Some(Self::Fixed32),
            _ => None,
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Varint => "varint",
            Self::Fixed64 => "fixed64",
            Self::LengthDelimited => "length-delimited",
            Self::Fixed32 => "fixed32",
        };
        f.write_str(name)
    }
}

/// A field key split into its two parts. `wire_bits` is kept raw so the
/// caller can report kinds it does not support.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag {
    pub field: u64,
    pub wire_bits: u8,
}

impl Tag {
    pub fn from_key(key: u64) -> Self {
        Self {
            field: key >> 3,
            wire_bits: (key & 0x7) as u8,
        }
    }
}

pub struct WireCursor<'a> {
    cur: Cursor<&'a [u8]>,
}

impl<'a> WireCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            cur: Cursor::new(buf),
        }
    }

    pub fn pos(&self) -> usize {
        self.cur.position() as usize
    }

    pub fn at_end(&self) -> bool {
        self.remaining_bytes().is_empty()
    }

    fn remaining_bytes(&self) -> &'a [u8] {
        let buf: &'a [u8] = *self.cur.get_ref();
        buf.get(self.pos()..).unwrap_or_default()
    }

    /// Reads the next field key, or `None` when the buffer ends cleanly on a
    /// field boundary.
    pub fn read_tag(&mut self) -> Result<Option<Tag>> {
        if self.at_end() {
            return Ok(None);
        }
        self.read_varint().map(|key| Some(Tag::from_key(key)))
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let start = self.pos();
        let mut value: u64 = 0;

        for i in 0..MAX_VARINT_LEN {
            let byte = self
                .cur
                .read_u8()
                .map_err(|_| DecodeError::Truncated { offset: start })?;
            let bits = u64::from(byte & 0x7f);
            // the tenth byte may only contribute the top bit of a u64
            if i == MAX_VARINT_LEN - 1 && bits > 1 {
                return Err(DecodeError::VarintOverflow { offset: start });
            }
            value |= bits << (7 * i);
            if byte < 0x80 {
                return Ok(value);
            }
        }
        Err(DecodeError::VarintOverflow { offset: start })
    }

    pub fn read_fixed32(&mut self) -> Result<u32> {
        let start = self.pos();
        match self.cur.read_u32::<LittleEndian>() {
            Ok(value) => Ok(value),
            Err(_) => Err(self.truncated_at(start)),
        }
    }

    pub fn read_fixed64(&mut self) -> Result<u64> {
        let start = self.pos();
        match self.cur.read_u64::<LittleEndian>() {
            Ok(value) => Ok(value),
            Err(_) => Err(self.truncated_at(start)),
        }
    }

    /// Reads a length prefix and returns a view of that many bytes.
    pub fn read_length_delimited(&mut self) -> Result<&'a [u8]> {
        let start = self.pos();
        let len = self.read_varint()?;
        let rest = self.remaining_bytes();
        let len = match usize::try_from(len) {
            Ok(len) if len <= rest.len() => len,
            _ => return Err(DecodeError::Truncated { offset: start }),
        };
        self.cur.set_position((self.pos() + len) as u64);
        Ok(&rest[..len])
    }

    // a failed fixed-width read may have consumed a partial value
    fn truncated_at(&mut self, start: usize) -> DecodeError {
        self.cur.set_position(start as u64);
        DecodeError::Truncated { offset: start }
    }
}

/// Returns the message inside a gRPC length-prefixed frame, or the whole
/// buffer when it does not start with a well-formed uncompressed frame.
pub fn strip_grpc_frame(buf: &[u8]) -> &[u8] {
    if buf.len() < GRPC_PREFIX_LEN || buf[0] != 0 {
        return buf;
    }
    let len = BigEndian::read_u32(&buf[1..GRPC_PREFIX_LEN]) as usize;
    let body = &buf[GRPC_PREFIX_LEN..];
    if len > body.len() {
        return buf;
    }
    &body[..len]
}
