use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::error::{JpipError, Result};
use crate::session::session_state::{AuxTransport, StreamKind};

/// The JPIP custom response headers of one exchange, parsed in a single pass.
/// Absent headers stay `None`; a header that is present but malformed fails
/// the whole exchange.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct JpipResponseHeaders {
    /// derived from the `Content-Type` suffix, `None` for non-stream bodies
    pub stream_kind: Option<StreamKind>,
    /// `JPIP-fsiz`
    pub fsiz: Option<(u32, u32)>,
    /// `JPIP-roff`
    pub roff: Option<(u32, u32)>,
    /// `JPIP-rsiz`
    pub rsiz: Option<(u32, u32)>,
    /// `JPIP-cnew`
    pub cnew: Option<ChannelGrant>,
    /// `JPIP-tid`
    pub tid: Option<String>,
}

/// A server-side channel allocation: `cid=<id>,...,transport=<kind>[,auxport=<port>]`
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChannelGrant {
    pub cid: String,
    pub transport: AuxTransport,
    pub aux_port: Option<u16>,
}

impl JpipResponseHeaders {
    pub fn parse(headers: &HeaderMap) -> Result<JpipResponseHeaders> {
        let mut parsed = JpipResponseHeaders::default();

        if let Some(content_type) = header_str(headers.get(CONTENT_TYPE))? {
            parsed.stream_kind = stream_kind_from_content_type(content_type);
        }
        if let Some(raw) = header_str(headers.get("jpip-fsiz"))? {
            parsed.fsiz = Some(parse_int_pair("JPIP-fsiz", raw)?);
        }
        if let Some(raw) = header_str(headers.get("jpip-roff"))? {
            parsed.roff = Some(parse_int_pair("JPIP-roff", raw)?);
        }
        if let Some(raw) = header_str(headers.get("jpip-rsiz"))? {
            parsed.rsiz = Some(parse_int_pair("JPIP-rsiz", raw)?);
        }
        if let Some(raw) = header_str(headers.get("jpip-cnew"))? {
            parsed.cnew = Some(parse_cnew(raw)?);
        }
        if let Some(raw) = header_str(headers.get("jpip-tid"))? {
            parsed.tid = Some(parse_tid(raw)?);
        }

        Ok(parsed)
    }
}

fn header_str(value: Option<&HeaderValue>) -> Result<Option<&str>> {
    match value {
        None => Ok(None),
        Some(v) => v
            .to_str()
            .map(Some)
            .map_err(|_| JpipError::violation(format!("non-ascii header value: {:02x?}", v.as_bytes()))),
    }
}

fn stream_kind_from_content_type(content_type: &str) -> Option<StreamKind> {
    if content_type.ends_with("jpp-stream") {
        Some(StreamKind::Jpp)
    }
    else if content_type.ends_with("jpt-stream") {
        Some(StreamKind::Jpt)
    }
    else {
        None
    }
}

fn parse_int_pair(name: &str, raw: &str) -> Result<(u32, u32)> {
    let parse = |raw: &str| -> Option<(u32, u32)> {
        let (a, b) = raw.split_once(',')?;
        Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
    };
    parse(raw).ok_or_else(|| JpipError::violation(format!("{} is not an integer pair: {:?}", name, raw)))
}

fn parse_cnew(raw: &str) -> Result<ChannelGrant> {
    let mut cid = None;
    let mut transport = None;
    let mut aux_port = None;

    for item in raw.split(',') {
        let Some((key, value)) = item.split_once('=') else {
            return Err(JpipError::violation(format!("malformed JPIP-cnew item {:?} in {:?}", item, raw)));
        };
        match key.trim() {
            "cid" => cid = Some(value.trim().to_string()),
            "transport" => {
                transport = Some(AuxTransport::from_token(value.trim()).ok_or_else(|| {
                    JpipError::violation(format!("unknown JPIP-cnew transport {:?} in {:?}", value, raw))
                })?)
            }
            "auxport" => {
                aux_port = Some(value.trim().parse().map_err(|_| {
                    JpipError::violation(format!("malformed JPIP-cnew auxport {:?} in {:?}", value, raw))
                })?)
            }
            _ => {} // servers may add fields this client has no use for
        }
    }

    match (cid, transport) {
        (Some(cid), Some(transport)) => Ok(ChannelGrant { cid, transport, aux_port }),
        _ => Err(JpipError::violation(format!("JPIP-cnew without cid or transport: {:?}", raw))),
    }
}

fn parse_tid(raw: &str) -> Result<String> {
    raw.strip_prefix("tid=")
        .map(|tid| tid.to_string())
        .ok_or_else(|| JpipError::violation(format!("malformed JPIP-tid: {:?}", raw)))
}
