//! The record-frame codec.
//!
//! A store value is a concatenation of frames, each a 4-octet
//! little-endian length followed by that many octets of body.  The
//! first body octet identifies the frame kind:
//!
//! ```text
//!     0x00  scoped record    loc_len u8, loc, type u16, ttl u32,
//!                            rdlength u16, rdata
//!     0x01  unscoped record  type u16, ttl u32, rdlength u16, rdata
//!     0x02  map entry        loc_len u8, loc
//!     0x03  resolver-sensitive marker (no body)
//! ```
//!
//! Multi-octet integers inside frames are little-endian, like the
//! rest of the store format.  Record rdata is DNS wire form, never
//! compressed.  Unknown kinds are skipped by the iteration helpers so
//! the format can grow without breaking old readers.

use std::fmt;

use crate::location::LocationId;
use crate::FrameStep;

pub const FRAME_KIND_SCOPED_RECORD: u8 = 0x00;
pub const FRAME_KIND_RECORD: u8 = 0x01;
pub const FRAME_KIND_MAP_ENTRY: u8 = 0x02;
pub const FRAME_KIND_RESOLVER_SENSITIVE: u8 = 0x03;

/// One decoded frame, borrowing rdata from the value it came from.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Frame<'a> {
    Record(RecordFrame<'a>),
    MapEntry(LocationId),
    ResolverSensitive,
}

/// A resource record inside a value.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RecordFrame<'a> {
    /// The location this record applies to; `None` if unscoped.
    pub location: Option<LocationId>,

    /// The record type number.
    pub rtype: u16,

    /// Time to live, seconds.
    pub ttl: u32,

    /// The rdata, in uncompressed DNS wire form.
    pub rdata: &'a [u8],
}

impl RecordFrame<'_> {
    /// Whether this record is visible to a query at `location`.
    /// Unscoped records are visible everywhere.
    pub fn applies_at(&self, location: &LocationId) -> bool {
        match &self.location {
            None => true,
            Some(scope) => scope == location,
        }
    }
}

/// Errors from decoding frames.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FrameError {
    /// A length prefix that does not describe a frame inside the
    /// value.
    MalformedFrame,

    /// A frame body that ends before its fixed fields do.
    UnexpectedEnd,

    /// A frame kind this decoder does not know.  Iteration helpers
    /// skip these; single-frame decoding reports them.
    UnknownKind(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameError::MalformedFrame => write!(f, "malformed frame length"),
            FrameError::UnexpectedEnd => write!(f, "truncated frame body"),
            FrameError::UnknownKind(kind) => write!(f, "unknown frame kind {kind:#04x}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Decode a single frame body (the octets after the length prefix).
///
/// # Errors
///
/// If the body is truncated, inconsistent, or of unknown kind.
pub fn decode_frame(body: &[u8]) -> Result<Frame<'_>, FrameError> {
    let (&kind, rest) = body.split_first().ok_or(FrameError::UnexpectedEnd)?;

    match kind {
        FRAME_KIND_SCOPED_RECORD => {
            let (location, rest) = take_location(rest)?;
            let record = decode_record(Some(location), rest)?;
            Ok(Frame::Record(record))
        }
        FRAME_KIND_RECORD => Ok(Frame::Record(decode_record(None, rest)?)),
        FRAME_KIND_MAP_ENTRY => {
            let (location, rest) = take_location(rest)?;
            if !rest.is_empty() {
                return Err(FrameError::MalformedFrame);
            }
            Ok(Frame::MapEntry(location))
        }
        FRAME_KIND_RESOLVER_SENSITIVE => {
            if !rest.is_empty() {
                return Err(FrameError::MalformedFrame);
            }
            Ok(Frame::ResolverSensitive)
        }
        other => Err(FrameError::UnknownKind(other)),
    }
}

fn take_location(body: &[u8]) -> Result<(LocationId, &[u8]), FrameError> {
    let (&len, rest) = body.split_first().ok_or(FrameError::UnexpectedEnd)?;
    if rest.len() < len as usize {
        return Err(FrameError::UnexpectedEnd);
    }
    let (octets, rest) = rest.split_at(len as usize);
    let location = LocationId::new(octets).map_err(|_| FrameError::MalformedFrame)?;
    Ok((location, rest))
}

fn decode_record(location: Option<LocationId>, body: &[u8]) -> Result<RecordFrame<'_>, FrameError> {
    if body.len() < 8 {
        return Err(FrameError::UnexpectedEnd);
    }
    let rtype = u16::from_le_bytes([body[0], body[1]]);
    let ttl = u32::from_le_bytes([body[2], body[3], body[4], body[5]]);
    let rdlength = u16::from_le_bytes([body[6], body[7]]) as usize;
    let rdata = &body[8..];
    if rdata.len() != rdlength {
        return Err(FrameError::MalformedFrame);
    }

    Ok(RecordFrame {
        location,
        rtype,
        ttl,
        rdata,
    })
}

/// An iterator over the frames of a value.  Unknown kinds are
/// skipped; structural errors end the iteration after being yielded
/// once.
pub struct FrameIter<'a> {
    value: &'a [u8],
    position: usize,
}

impl<'a> FrameIter<'a> {
    pub fn new(value: &'a [u8]) -> Self {
        Self { value, position: 0 }
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<Frame<'a>, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.position == self.value.len() {
                return None;
            }

            let remaining = &self.value[self.position..];
            if remaining.len() < 4 {
                self.position = self.value.len();
                return Some(Err(FrameError::MalformedFrame));
            }

            let len =
                u32::from_le_bytes([remaining[0], remaining[1], remaining[2], remaining[3]])
                    as usize;
            if remaining.len() - 4 < len {
                self.position = self.value.len();
                return Some(Err(FrameError::UnexpectedEnd));
            }

            let body = &remaining[4..4 + len];
            self.position += 4 + len;

            match decode_frame(body) {
                Ok(frame) => return Some(Ok(frame)),
                Err(FrameError::UnknownKind(_)) => continue,
                Err(error) => {
                    self.position = self.value.len();
                    return Some(Err(error));
                }
            }
        }
    }
}

/// Run `f` over the frames of one value, skipping scoped records that
/// do not apply at `location`.  Returns whether iteration was stopped
/// early, so multi-value callers know to stop too.
///
/// # Errors
///
/// If a frame is malformed.
pub fn for_each_value_frame(
    value: &[u8],
    location: &LocationId,
    f: &mut dyn FnMut(Frame<'_>) -> FrameStep,
) -> Result<FrameStep, FrameError> {
    for frame in FrameIter::new(value) {
        let frame = frame?;
        if let Frame::Record(record) = &frame {
            if !record.applies_at(location) {
                continue;
            }
        }
        if f(frame) == FrameStep::Stop {
            return Ok(FrameStep::Stop);
        }
    }
    Ok(FrameStep::Continue)
}

/// Append an encoded record frame (length prefix included) to `out`.
pub fn encode_record_frame(
    out: &mut Vec<u8>,
    location: Option<&LocationId>,
    rtype: u16,
    ttl: u32,
    rdata: &[u8],
) {
    let loc_len = location.map(|l| 1 + l.octets().len()).unwrap_or(0);
    let body_len = 1 + loc_len + 8 + rdata.len();
    out.extend_from_slice(&(body_len as u32).to_le_bytes());
    match location {
        Some(location) => {
            out.push(FRAME_KIND_SCOPED_RECORD);
            out.push(location.octets().len() as u8);
            out.extend_from_slice(location.octets());
        }
        None => out.push(FRAME_KIND_RECORD),
    }
    out.extend_from_slice(&rtype.to_le_bytes());
    out.extend_from_slice(&ttl.to_le_bytes());
    out.extend_from_slice(&(rdata.len() as u16).to_le_bytes());
    out.extend_from_slice(rdata);
}

/// Append an encoded map-entry frame to `out`.
pub fn encode_map_entry_frame(out: &mut Vec<u8>, location: &LocationId) {
    let body_len = 1 + 1 + location.octets().len();
    out.extend_from_slice(&(body_len as u32).to_le_bytes());
    out.push(FRAME_KIND_MAP_ENTRY);
    out.push(location.octets().len() as u8);
    out.extend_from_slice(location.octets());
}

/// Append an encoded resolver-sensitive marker frame to `out`.
pub fn encode_resolver_sensitive_frame(out: &mut Vec<u8>) {
    out.extend_from_slice(&1u32.to_le_bytes());
    out.push(FRAME_KIND_RESOLVER_SENSITIVE);
}
