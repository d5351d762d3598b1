//! Split stream frames.
//!
//! Layout on the wire:
//! [ magic: u32 ][ version: u16 ][ kind: u8 ][ reserved: u8 ]
//! [ payload_len: u64 ][ checksum: 32 bytes ]
//! [ payload bytes … ]
//!
//! The checksum is blake3 over the payload. Integers are little-endian.

use std::io::{ErrorKind, Read, Write};

use crate::error::{Result, SplitError};

pub const MAGIC: u32 = 0x5153_504C; // "QSPL"
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 8 + 32;

/// Upper bound on a single frame payload.
pub const MAX_PAYLOAD: u64 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Metadata = 1,
    Batch = 2,
    End = 3,
}

impl FrameKind {
    pub fn from_u8(b: u8) -> Result<Self> {
        match b {
            1 => Ok(FrameKind::Metadata),
            2 => Ok(FrameKind::Batch),
            3 => Ok(FrameKind::End),
            other => Err(SplitError::Protocol(format!("unknown frame kind {other}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameKind::Metadata => "metadata",
            FrameKind::Batch => "batch",
            FrameKind::End => "end",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub version: u16,
    pub kind: FrameKind,
    pub payload_len: u64,
    pub checksum: [u8; 32],
}

impl FrameHeader {
    pub fn for_payload(kind: FrameKind, payload: &[u8]) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            kind,
            payload_len: payload.len() as u64,
            checksum: *blake3::hash(payload).as_bytes(),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6] = self.kind as u8;
        // out[7] reserved
        out[8..16].copy_from_slice(&self.payload_len.to_le_bytes());
        out[16..48].copy_from_slice(&self.checksum);
        out
    }

    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Result<Self> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        let mut version = [0u8; 2];
        version.copy_from_slice(&bytes[4..6]);
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[8..16]);
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&bytes[16..48]);

        let magic = u32::from_le_bytes(magic);
        let version = u16::from_le_bytes(version);
        if magic != MAGIC || version != VERSION {
            return Err(SplitError::Protocol(format!(
                "bad magic/version {magic:#x}/{version}"
            )));
        }
        let payload_len = u64::from_le_bytes(len);
        if payload_len > MAX_PAYLOAD {
            return Err(SplitError::Protocol(format!(
                "payload_len {payload_len} exceeds max {MAX_PAYLOAD}"
            )));
        }

        Ok(Self {
            magic,
            version,
            kind: FrameKind::from_u8(bytes[6])?,
            payload_len,
            checksum,
        })
    }
}

pub fn write_frame<W: Write>(w: &mut W, kind: FrameKind, payload: &[u8]) -> Result<()> {
    let header = FrameHeader::for_payload(kind, payload);
    w.write_all(&header.to_bytes())?;
    w.write_all(payload)?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames;
/// a close in the middle of a frame is `Truncated`.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Option<(FrameKind, Vec<u8>)>> {
    let mut buf = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(SplitError::Truncated),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    let header = FrameHeader::from_bytes(&buf)?;

    let mut payload = vec![0u8; header.payload_len as usize];
    r.read_exact(&mut payload).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => SplitError::Truncated,
        _ => SplitError::Io(e),
    })?;

    if *blake3::hash(&payload).as_bytes() != header.checksum {
        return Err(SplitError::ChecksumMismatch(header.kind.name()));
    }
    Ok(Some((header.kind, payload)))
}
