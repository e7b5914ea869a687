//! Wire formats of the decode-daemon protocol.
//!
//! Requests are line-oriented ASCII headers, responses are small fixed-width
//! binary headers followed by raw payload bytes. Field widths, byte order and
//! magic bytes are a compatibility contract with existing daemons and must not
//! change.

use bytes::{Buf, BufMut, BytesMut};
use num_enum::TryFromPrimitive;

use crate::error::{JpipError, Result};
use crate::util::safe_converter::SafeCast;

/// Session identifiers a daemon request may carry. `None` fields are sent as
/// the literal `0` placeholder line.
#[derive(Debug, Clone, Copy)]
pub struct SessionIds<'a> {
    pub filename: &'a str,
    pub tile_id: Option<&'a str>,
    pub channel_id: Option<&'a str>,
}

fn put_line(buf: &mut BytesMut, line: &str) {
    buf.put_slice(line.as_bytes());
    buf.put_u8(b'\n');
}

/// `JPIP-stream` upload. Session-less requests announce only the byte count;
/// session-aware requests announce filename, tile id and channel id first.
#[derive(Debug)]
pub struct StreamSend<'a> {
    pub session: Option<SessionIds<'a>>,
    pub payload: &'a [u8],
}

impl StreamSend<'_> {
    pub fn ser(&self, buf: &mut BytesMut) {
        put_line(buf, "JPIP-stream");
        put_line(buf, "version 1.2");
        match &self.session {
            None => {
                put_line(buf, &self.payload.len().to_string());
            }
            Some(ids) => {
                put_line(buf, ids.filename);
                put_line(buf, ids.tile_id.unwrap_or("0"));
                put_line(buf, ids.channel_id.unwrap_or("0"));
                put_line(buf, &self.payload.len().to_string());
            }
        }
        buf.put_slice(self.payload);
    }
}

/// Single-byte acknowledgement: zero signals failure.
pub fn ack_ok(byte: u8) -> bool {
    byte != 0
}

#[derive(Debug)]
pub struct PnmRequest<'a> {
    /// channel id if one exists, else tile id, else absent
    pub session_id: Option<&'a str>,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl PnmRequest<'_> {
    pub fn ser(&self, buf: &mut BytesMut) {
        put_line(buf, "PNM request");
        put_line(buf, self.session_id.unwrap_or("0"));
        put_line(buf, &self.frame_width.to_string());
        put_line(buf, &self.frame_height.to_string());
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum PnmVariant {
    Gray = 5,
    Rgb = 6,
}

impl PnmVariant {
    pub fn channels(&self) -> usize {
        match self {
            PnmVariant::Gray => 1,
            PnmVariant::Rgb => 3,
        }
    }
}

/// 7-byte PNM response header: `'P'`, variant, width, height (both big-endian
/// u16), maxval. Anything but maxval 255 is malformed and discards the
/// response.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PnmHeader {
    pub variant: PnmVariant,
    pub width: u16,
    pub height: u16,
}

impl PnmHeader {
    pub const SERIALIZED_LEN: usize = 7;

    pub fn deser(buf: &mut impl Buf) -> Result<PnmHeader> {
        let magic = try_u8(buf)?;
        if magic != b'P' {
            return Err(JpipError::violation(format!("PNM response magic is {:#04x}, expected 0x50 ('P')", magic)));
        }
        let raw_variant = try_u8(buf)?;
        let variant = PnmVariant::try_from_primitive(raw_variant)
            .map_err(|_| JpipError::violation(format!("unsupported PNM variant {}", raw_variant)))?;
        let width = try_u16(buf)?;
        let height = try_u16(buf)?;
        let maxval = try_u8(buf)?;
        if maxval != 255 {
            return Err(JpipError::violation(format!("PNM maxval is {}, expected 255", maxval)));
        }

        Ok(PnmHeader { variant, width, height })
    }

    pub fn sample_len(&self) -> usize {
        let width: usize = self.width.safe_cast();
        let height: usize = self.height.safe_cast();
        width * height * self.variant.channels()
    }
}

#[derive(Debug)]
pub struct XmlRequest<'a> {
    pub channel_id: &'a str,
}

impl XmlRequest<'_> {
    pub fn ser(&self, buf: &mut BytesMut) {
        put_line(buf, "XML request");
        put_line(buf, self.channel_id);
    }
}

/// 5-byte XML response header: ASCII `XML` tag, then big-endian u16 payload
/// length.
pub struct XmlHeader;

impl XmlHeader {
    pub const SERIALIZED_LEN: usize = 5;

    pub fn deser(buf: &mut impl Buf) -> Result<usize> {
        let tag = try_tag(buf)?;
        if &tag != b"XML" {
            return Err(JpipError::violation(format!("XML response tag is {:02x?}, expected \"XML\"", tag)));
        }
        let len = try_u16(buf)?;
        Ok(len.safe_cast())
    }
}

/// The two id namespaces the daemon can be queried for.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IdKind {
    Channel,
    Tile,
}

impl IdKind {
    pub fn tag(&self) -> &'static [u8; 3] {
        match self {
            IdKind::Channel => b"CID",
            IdKind::Tile => b"TID",
        }
    }

    fn keyword(&self) -> &'static str {
        match self {
            IdKind::Channel => "CID",
            IdKind::Tile => "TID",
        }
    }
}

#[derive(Debug)]
pub struct IdQuery<'a> {
    pub kind: IdKind,
    pub filename: &'a str,
}

impl IdQuery<'_> {
    pub fn ser(&self, buf: &mut BytesMut) {
        put_line(buf, &format!("{} request", self.kind.keyword()));
        put_line(buf, self.filename);
    }
}

/// 4-byte id response header: 3-byte tag matching the queried kind, then the
/// id length. Length zero means no id has been assigned.
pub struct IdHeader;

impl IdHeader {
    pub const SERIALIZED_LEN: usize = 4;

    pub fn deser(kind: IdKind, buf: &mut impl Buf) -> Result<usize> {
        let tag = try_tag(buf)?;
        if &tag != kind.tag() {
            return Err(JpipError::violation(format!(
                "id response tag is {:02x?}, expected {:02x?}",
                tag,
                kind.tag()
            )));
        }
        let len = try_u8(buf)?;
        Ok(len.safe_cast())
    }
}

#[derive(Debug)]
pub struct SizQuery<'a> {
    pub tile_id: Option<&'a str>,
    pub channel_id: Option<&'a str>,
}

impl SizQuery<'_> {
    pub fn ser(&self, buf: &mut BytesMut) {
        put_line(buf, "SIZ request");
        put_line(buf, self.tile_id.unwrap_or("0"));
        put_line(buf, self.channel_id.unwrap_or("0"));
    }
}

/// 9-byte size response: ASCII `SIZ` tag, then width and height as big-endian
/// 24-bit unsigned integers.
pub struct SizResponse;

impl SizResponse {
    pub const SERIALIZED_LEN: usize = 9;

    pub fn deser(buf: &mut impl Buf) -> Result<(u32, u32)> {
        let tag = try_tag(buf)?;
        if &tag != b"SIZ" {
            return Err(JpipError::violation(format!("SIZ response tag is {:02x?}, expected \"SIZ\"", tag)));
        }
        let width = try_u24(buf)?;
        let height = try_u24(buf)?;
        Ok((width, height))
    }
}

#[derive(Debug)]
pub struct ChannelDestroy<'a> {
    pub channel_id: &'a str,
}

impl ChannelDestroy<'_> {
    pub fn ser(&self, buf: &mut BytesMut) {
        put_line(buf, "CID destroy");
        put_line(buf, self.channel_id);
    }
}

fn try_u8(buf: &mut impl Buf) -> Result<u8> {
    buf.try_get_u8()
        .map_err(|_| JpipError::violation("truncated response header"))
}

fn try_u16(buf: &mut impl Buf) -> Result<u16> {
    buf.try_get_u16()
        .map_err(|_| JpipError::violation("truncated response header"))
}

fn try_u24(buf: &mut impl Buf) -> Result<u32> {
    let high: u32 = try_u16(buf)?.safe_cast();
    let low: u32 = u32::from(try_u8(buf)?);
    Ok((high << 8) | low)
}

fn try_tag(buf: &mut impl Buf) -> Result<[u8; 3]> {
    Ok([try_u8(buf)?, try_u8(buf)?, try_u8(buf)?])
}
