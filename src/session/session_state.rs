use tracing::debug;

use crate::jpip::response_headers::JpipResponseHeaders;

/// The two JPIP byte-stream flavors. A session starts out undetermined; the
/// first flavor the server announces is locked in and never overwritten.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum StreamKind {
    #[default]
    Unknown,
    Jpp,
    Jpt,
}

impl StreamKind {
    /// value of the `type=` request parameter, `None` while undetermined
    pub fn type_token(&self) -> Option<&'static str> {
        match self {
            StreamKind::Unknown => None,
            StreamKind::Jpp => Some("jpp-stream"),
            StreamKind::Jpt => Some("jpt-stream"),
        }
    }
}

/// Out-of-band channel the server may hand a session off to instead of
/// returning JPIP bytes in the HTTP response body.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum AuxTransport {
    #[default]
    None,
    Tcp,
    Udp,
}

impl AuxTransport {
    /// value of the `cnew=` request parameter
    pub fn cnew_token(&self) -> &'static str {
        match self {
            AuxTransport::None => "http",
            AuxTransport::Tcp => "http-tcp",
            AuxTransport::Udp => "http-udp",
        }
    }

    pub fn from_token(token: &str) -> Option<AuxTransport> {
        match token {
            "http" => Some(AuxTransport::None),
            "http-tcp" => Some(AuxTransport::Tcp),
            "http-udp" => Some(AuxTransport::Udp),
            _ => None,
        }
    }
}

/// Linear session lifecycle. There is no branching: a session allocates its
/// channel once, then alternates between requesting and receiving regions
/// until it is closed for good.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum SessionPhase {
    #[default]
    NoChannel,
    ChannelRequested,
    ChannelOpen,
    RegionRequested,
    RegionDelivered,
    Closed,
}

/// Accumulated per-session protocol state: identifiers and geometry as last
/// reported by the server. Only [SessionState::apply_response] writes the
/// server-derived fields, so the update logic is testable without sockets.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct SessionState {
    pub channel_id: Option<String>,
    pub tile_id: Option<String>,

    /// full resolution of the referenced image, unknown until a SIZ-class
    /// response reports it
    pub full_size: Option<(u32, u32)>,
    /// last server-reported frame size (`JPIP-fsiz`)
    pub frame_size: Option<(u32, u32)>,
    /// last server-reported region offset (`JPIP-roff`)
    pub region_offset: Option<(u32, u32)>,
    /// last server-reported region size (`JPIP-rsiz`)
    pub region_size: Option<(u32, u32)>,

    pub stream_kind: StreamKind,
    pub aux_transport: AuxTransport,
    pub aux_port: Option<u16>,

    phase: SessionPhase,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    /// The identifier a request should carry: the channel id when one exists,
    /// the tile id otherwise.
    pub fn session_id(&self) -> Option<&str> {
        self.channel_id.as_deref().or(self.tile_id.as_deref())
    }

    pub fn mark_channel_requested(&mut self) {
        self.phase = SessionPhase::ChannelRequested;
    }

    pub fn mark_region_requested(&mut self) {
        self.phase = SessionPhase::RegionRequested;
    }

    pub fn mark_closed(&mut self) {
        self.phase = SessionPhase::Closed;
    }

    /// Folds one parsed response-header set into the session. Geometry fields
    /// are overwritten (the headers are the latest server-reported truth), the
    /// stream kind is locked on first sight, and a channel grant is only
    /// honored while no channel is allocated yet.
    pub fn apply_response(&mut self, headers: &JpipResponseHeaders) {
        if let Some(kind) = headers.stream_kind {
            self.lock_stream_kind(kind);
        }
        if let Some(fsiz) = headers.fsiz {
            self.frame_size = Some(fsiz);
        }
        if let Some(roff) = headers.roff {
            self.region_offset = Some(roff);
        }
        if let Some(rsiz) = headers.rsiz {
            self.region_size = Some(rsiz);
        }
        if let Some(tid) = &headers.tid {
            self.tile_id = Some(tid.clone());
        }
        if let Some(grant) = &headers.cnew {
            if self.channel_id.is_none() {
                self.channel_id = Some(grant.cid.clone());
                self.aux_transport = grant.transport;
                self.aux_port = grant.aux_port;
            }
            else {
                debug!("ignoring channel grant {:?}: a channel is already allocated", grant.cid);
            }
        }

        self.phase = match self.phase {
            SessionPhase::ChannelRequested if self.channel_id.is_some() => SessionPhase::ChannelOpen,
            SessionPhase::ChannelRequested => SessionPhase::NoChannel,
            SessionPhase::RegionRequested => SessionPhase::RegionDelivered,
            p => p,
        };
    }

    /// The effective stream kind for the next request: once the session is
    /// locked to a kind, a conflicting preference is suppressed.
    pub fn effective_stream_kind(&self, preference: StreamKind) -> StreamKind {
        match self.stream_kind {
            StreamKind::Unknown => preference,
            locked => locked,
        }
    }

    fn lock_stream_kind(&mut self, kind: StreamKind) {
        match self.stream_kind {
            StreamKind::Unknown => self.stream_kind = kind,
            locked if locked == kind => {}
            locked => {
                debug!("server reported stream kind {:?} but session is locked to {:?} - keeping {:?}",
                    kind, locked, locked);
            }
        }
    }

    pub fn set_full_size(&mut self, size: (u32, u32)) {
        self.full_size = Some(size);
    }

    pub fn adopt_tile_id(&mut self, tid: String) {
        self.tile_id = Some(tid);
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use crate::jpip::response_headers::ChannelGrant;

    use super::*;

    fn headers_with_kind(kind: StreamKind) -> JpipResponseHeaders {
        JpipResponseHeaders {
            stream_kind: Some(kind),
            ..Default::default()
        }
    }

    #[rstest]
    #[case::jpp_then_jpt(StreamKind::Jpp, StreamKind::Jpt)]
    #[case::jpt_then_jpp(StreamKind::Jpt, StreamKind::Jpp)]
    fn test_stream_kind_is_sticky(#[case] first: StreamKind, #[case] second: StreamKind) {
        let mut state = SessionState::default();

        state.apply_response(&headers_with_kind(first));
        assert_eq!(state.stream_kind, first);

        state.apply_response(&headers_with_kind(second));
        assert_eq!(state.stream_kind, first);

        assert_eq!(state.effective_stream_kind(second), first);
    }

    #[test]
    fn test_effective_stream_kind_before_lock() {
        let state = SessionState::default();
        assert_eq!(state.effective_stream_kind(StreamKind::Jpt), StreamKind::Jpt);
    }

    #[test]
    fn test_geometry_is_overwritten() {
        let mut state = SessionState::default();

        state.apply_response(&JpipResponseHeaders {
            fsiz: Some((512, 512)),
            roff: Some((0, 0)),
            rsiz: Some((256, 256)),
            ..Default::default()
        });
        state.apply_response(&JpipResponseHeaders {
            fsiz: Some((1024, 768)),
            ..Default::default()
        });

        assert_eq!(state.frame_size, Some((1024, 768)));
        assert_eq!(state.region_offset, Some((0, 0)));
        assert_eq!(state.region_size, Some((256, 256)));
    }

    #[test]
    fn test_channel_grant_is_honored_once() {
        let mut state = SessionState::default();

        state.mark_channel_requested();
        state.apply_response(&JpipResponseHeaders {
            cnew: Some(ChannelGrant {
                cid: "C1".to_string(),
                transport: AuxTransport::Tcp,
                aux_port: Some(9000),
            }),
            ..Default::default()
        });
        assert_eq!(state.channel_id.as_deref(), Some("C1"));
        assert_eq!(state.aux_transport, AuxTransport::Tcp);
        assert_eq!(state.phase(), SessionPhase::ChannelOpen);

        state.apply_response(&JpipResponseHeaders {
            cnew: Some(ChannelGrant {
                cid: "C2".to_string(),
                transport: AuxTransport::None,
                aux_port: None,
            }),
            ..Default::default()
        });
        assert_eq!(state.channel_id.as_deref(), Some("C1"));
        assert_eq!(state.aux_transport, AuxTransport::Tcp);
    }

    #[test]
    fn test_session_id_prefers_channel_id() {
        let mut state = SessionState::default();
        assert_eq!(state.session_id(), None);

        state.adopt_tile_id("T9".to_string());
        assert_eq!(state.session_id(), Some("T9"));

        state.channel_id = Some("C7".to_string());
        assert_eq!(state.session_id(), Some("C7"));
    }

    #[test]
    fn test_phase_walk() {
        let mut state = SessionState::default();
        assert_eq!(state.phase(), SessionPhase::NoChannel);

        state.mark_channel_requested();
        assert_eq!(state.phase(), SessionPhase::ChannelRequested);

        // a response without a channel grant drops back to NoChannel
        state.apply_response(&JpipResponseHeaders::default());
        assert_eq!(state.phase(), SessionPhase::NoChannel);

        state.mark_channel_requested();
        state.apply_response(&JpipResponseHeaders {
            cnew: Some(ChannelGrant {
                cid: "C1".to_string(),
                transport: AuxTransport::None,
                aux_port: None,
            }),
            ..Default::default()
        });
        assert_eq!(state.phase(), SessionPhase::ChannelOpen);

        state.mark_region_requested();
        assert_eq!(state.phase(), SessionPhase::RegionRequested);
        state.apply_response(&JpipResponseHeaders::default());
        assert_eq!(state.phase(), SessionPhase::RegionDelivered);

        state.mark_closed();
        assert!(state.is_closed());
    }
}
