use crate::session::session_state::{AuxTransport, SessionState, StreamKind};

/// A rectangular part of the image, in full-resolution coordinates.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Region {
    pub offset: (u32, u32),
    pub size: (u32, u32),
}

/// One requested view of the image: what the caller wants the server to
/// deliver next. Fields that are `None` are simply left out of the request -
/// the server keeps serving against its own notion of the current window.
#[derive(Debug, Clone, Default)]
pub struct ViewWindow {
    /// document identifier, only meaningful on the channel-creating request
    pub target: Option<String>,
    pub frame_size: Option<(u32, u32)>,
    pub region_offset: Option<(u32, u32)>,
    pub region_size: Option<(u32, u32)>,
    /// `Some` requests allocation of a new channel, with the given auxiliary
    /// transport preference
    pub new_channel: Option<AuxTransport>,
    pub stream_kind: StreamKind,
}

/// Builds the query string for one view-window request. Parameter order is
/// fixed: `target`, `tid`, `fsiz`, `roff`, `rsiz`, `cid`, `cnew`, `type`.
/// The channel id takes precedence over the tile id when both exist, and a
/// stream kind the session is already locked to overrides the window's
/// preference.
pub(crate) fn build_query(window: &ViewWindow, state: &SessionState) -> String {
    let mut query = QueryBuilder::default();

    if window.new_channel.is_some() {
        if let Some(target) = &window.target {
            query.param("target", target);
        }
    }

    match (&state.channel_id, &state.tile_id) {
        (Some(_), _) => {} // cid is appended after the geometry parameters
        (None, Some(tid)) => query.param("tid", tid),
        (None, None) => {}
    }

    if let Some((fw, fh)) = window.frame_size {
        query.pair_param("fsiz", fw, fh);
    }
    if let Some((rx, ry)) = window.region_offset {
        query.pair_param("roff", rx, ry);
    }
    if let Some((rw, rh)) = window.region_size {
        query.pair_param("rsiz", rw, rh);
    }

    if let Some(cid) = &state.channel_id {
        query.param("cid", cid);
    }
    if let Some(aux) = window.new_channel {
        query.param("cnew", aux.cnew_token());
    }

    if let Some(kind) = state.effective_stream_kind(window.stream_kind).type_token() {
        query.param("type", kind);
    }

    query.into_string()
}

#[derive(Default)]
struct QueryBuilder {
    buf: String,
}

impl QueryBuilder {
    fn param(&mut self, key: &str, value: &str) {
        if !self.buf.is_empty() {
            self.buf.push('&');
        }
        self.buf.push_str(key);
        self.buf.push('=');
        self.buf.push_str(value);
    }

    fn pair_param(&mut self, key: &str, a: u32, b: u32) {
        self.param(key, &format!("{},{}", a, b));
    }

    fn into_string(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::all_pairs(Some((512, 512)), Some((0, 128)), Some((256, 256)), "fsiz=512,512&roff=0,128&rsiz=256,256")]
    #[case::frame_only(Some((800, 600)), None, None, "fsiz=800,600")]
    #[case::region_only(None, Some((10, 20)), Some((30, 40)), "roff=10,20&rsiz=30,40")]
    #[case::nothing(None, None, None, "")]
    fn test_geometry_pairs_in_and_out(
        #[case] frame_size: Option<(u32, u32)>,
        #[case] region_offset: Option<(u32, u32)>,
        #[case] region_size: Option<(u32, u32)>,
        #[case] expected: &str,
    ) {
        let window = ViewWindow {
            frame_size,
            region_offset,
            region_size,
            ..Default::default()
        };
        assert_eq!(build_query(&window, &SessionState::default()), expected);
    }

    #[test]
    fn test_channel_creating_request() {
        let window = ViewWindow {
            frame_size: Some((512, 512)),
            new_channel: Some(AuxTransport::None),
            stream_kind: StreamKind::Jpp,
            ..Default::default()
        };
        assert_eq!(
            build_query(&window, &SessionState::default()),
            "fsiz=512,512&cnew=http&type=jpp-stream"
        );
    }

    #[test]
    fn test_target_only_on_channel_creating_request() {
        let window = ViewWindow {
            target: Some("scan.jp2".to_string()),
            frame_size: Some((512, 512)),
            new_channel: Some(AuxTransport::Tcp),
            stream_kind: StreamKind::Jpt,
            ..Default::default()
        };
        assert_eq!(
            build_query(&window, &SessionState::default()),
            "target=scan.jp2&fsiz=512,512&cnew=http-tcp&type=jpt-stream"
        );

        // same window without channel allocation: the target is dropped
        let window = ViewWindow {
            new_channel: None,
            ..window
        };
        let mut state = SessionState::default();
        state.channel_id = Some("C1".to_string());
        assert_eq!(
            build_query(&window, &state),
            "fsiz=512,512&cid=C1&type=jpt-stream"
        );
    }

    #[test]
    fn test_channel_id_takes_precedence_over_tile_id() {
        let mut state = SessionState::default();
        state.adopt_tile_id("T3".to_string());

        let window = ViewWindow {
            frame_size: Some((64, 64)),
            ..Default::default()
        };
        assert_eq!(build_query(&window, &state), "tid=T3&fsiz=64,64");

        state.channel_id = Some("C3".to_string());
        assert_eq!(build_query(&window, &state), "fsiz=64,64&cid=C3");
    }

    #[test]
    fn test_locked_stream_kind_suppresses_conflicting_preference() {
        let mut state = SessionState::default();
        state.stream_kind = StreamKind::Jpp;
        state.channel_id = Some("C1".to_string());

        let window = ViewWindow {
            frame_size: Some((128, 128)),
            stream_kind: StreamKind::Jpt,
            ..Default::default()
        };
        assert_eq!(
            build_query(&window, &state),
            "fsiz=128,128&cid=C1&type=jpp-stream"
        );
    }

    #[test]
    fn test_unknown_stream_kind_omits_type() {
        let window = ViewWindow {
            frame_size: Some((128, 128)),
            ..Default::default()
        };
        assert_eq!(build_query(&window, &SessionState::default()), "fsiz=128,128");
    }
}
