use std::time::Duration;

use crate::session::session_state::{AuxTransport, StreamKind};

/// Per-client configuration. The protocol itself has no notion of timeouts;
/// they are enforced locally because an unbounded blocking read against a
/// remote server is an operational hazard.
#[derive(Debug, Clone)]
pub struct JpipConfig {
    /// address of the image decode daemon, host:port
    pub daemon_addr: String,

    pub connect_timeout: Duration,
    pub read_timeout: Duration,

    /// upper bound for a reassembled JPIP byte stream - a server that sends
    /// more than this per exchange is treated as misbehaving
    pub max_stream_len: usize,

    /// auxiliary transport to ask for when allocating a channel
    pub aux_transport_preference: AuxTransport,
    /// stream flavor to ask for; the server's first answer locks the session
    pub stream_kind_preference: StreamKind,
}

impl JpipConfig {
    pub fn new(daemon_addr: impl Into<String>) -> JpipConfig {
        JpipConfig {
            daemon_addr: daemon_addr.into(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            max_stream_len: 64 * 1024 * 1024,
            aux_transport_preference: AuxTransport::None,
            stream_kind_preference: StreamKind::Jpp,
        }
    }
}
