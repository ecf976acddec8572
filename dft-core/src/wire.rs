//! Client-facing wire protocol.
//!
//! Every request and response is a single length-prefixed frame:
//!
//! ```text
//! len: u32 LE | tag: u8 | body
//! ```
//!
//! where `len` counts the tag plus the body. For requests the tag is a
//! [`Method`]; for responses it is a [`Status`]. Body layouts are composed
//! from the little-endian primitives below; decoding is bounds-checked and
//! never panics on malformed input.

use crate::error::{DriftError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the frame length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Upper bound on a single frame. Guards length-prefix corruption from
/// turning into an allocation of arbitrary size.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Client RPC methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    Put = 1,
    Get = 2,
    Delete = 3,
    AddPeer = 4,
    RemovePeer = 5,
    SyncMetadata = 6,
    Metadata = 7,
    Report = 8,
}

impl Method {
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Put),
            2 => Some(Self::Get),
            3 => Some(Self::Delete),
            4 => Some(Self::AddPeer),
            5 => Some(Self::RemovePeer),
            6 => Some(Self::SyncMetadata),
            7 => Some(Self::Metadata),
            8 => Some(Self::Report),
            _ => None,
        }
    }
}

/// Response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    NotFound = 1,
    /// Not the leader; the body carries the leader address when known.
    FailedPrecondition = 2,
    InvalidArgument = 3,
    Internal = 4,
    Unavailable = 5,
}

impl Status {
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::NotFound),
            2 => Some(Self::FailedPrecondition),
            3 => Some(Self::InvalidArgument),
            4 => Some(Self::Internal),
            5 => Some(Self::Unavailable),
            _ => None,
        }
    }
}

/// Bounds-checked cursor over a received frame body.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| DriftError::Protocol("truncated frame".into()))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        let arr: [u8; 4] = raw
            .try_into()
            .map_err(|_| DriftError::Protocol("truncated u32".into()))?;
        Ok(u32::from_le_bytes(arr))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let raw = self.take(8)?;
        let arr: [u8; 8] = raw
            .try_into()
            .map_err(|_| DriftError::Protocol("truncated u64".into()))?;
        Ok(u64::from_le_bytes(arr))
    }

    /// Reads a `u32`-length-prefixed byte field.
    pub fn bytes(&mut self) -> Result<Bytes> {
        let len = self.u32()? as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    /// Reads a `u32`-length-prefixed UTF-8 string field.
    pub fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        String::from_utf8(self.take(len)?.to_vec())
            .map_err(|_| DriftError::Protocol("invalid UTF-8 in string field".into()))
    }

    /// Reads a fixed-size array field.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let raw = self.take(N)?;
        raw.try_into()
            .map_err(|_| DriftError::Protocol("truncated array field".into()))
    }

    /// Remaining unread body.
    #[must_use]
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

/// Frame body builder. `finish` prepends the length header.
pub struct WireWriter {
    buf: BytesMut,
    headered: bool,
}

impl WireWriter {
    /// Starts a frame with the given tag byte (method or status).
    #[must_use]
    pub fn new(tag: u8) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u32_le(0); // patched by finish
        buf.put_u8(tag);
        Self {
            buf,
            headered: true,
        }
    }

    /// Starts a bare record with no length header or tag, for embedding
    /// inside a larger frame or durable store.
    #[must_use]
    pub fn raw() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
            headered: false,
        }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64_le(v);
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.put_u32_le(v.len() as u32);
        self.buf.put_slice(v);
        self
    }

    pub fn string(&mut self, v: &str) -> &mut Self {
        self.bytes(v.as_bytes())
    }

    pub fn array(&mut self, v: &[u8]) -> &mut Self {
        self.buf.put_slice(v);
        self
    }

    /// Patches the length prefix (if any) and returns the finished frame.
    #[must_use]
    pub fn finish(mut self) -> Bytes {
        if self.headered {
            let body_len = (self.buf.len() - FRAME_HEADER_SIZE) as u32;
            self.buf[0..4].copy_from_slice(&body_len.to_le_bytes());
        }
        self.buf.freeze()
    }
}
