use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::JpipConfig;
use crate::error::{JpipError, Result};
use crate::jpip::aux_channel;
use crate::jpip::http_transport::{HyperJpipTransport, JpipTransport};
use crate::jpip::response_headers::JpipResponseHeaders;
use crate::jpip::view_window::{build_query, ViewWindow};
use crate::session::session_state::{AuxTransport, SessionState};

/// Client side of one JPIP session: owns the session state and performs one
/// exchange at a time. All session-mutating operations take `&mut self`, so a
/// caller cannot have two requests in flight against the same channel.
pub struct JpipClient {
    transport: Arc<dyn JpipTransport>,
    config: Arc<JpipConfig>,
    state: SessionState,
}

impl JpipClient {
    pub fn connect(url: &str, config: Arc<JpipConfig>) -> Result<JpipClient> {
        let transport = HyperJpipTransport::from_url(url, config.clone())?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    pub fn with_transport(transport: Arc<dyn JpipTransport>, config: Arc<JpipConfig>) -> JpipClient {
        JpipClient {
            transport,
            config,
            state: SessionState::default(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Full image size is learned out of band (SIZ query against the daemon);
    /// the owner records it here so the session carries the complete geometry.
    pub fn record_full_size(&mut self, size: (u32, u32)) {
        self.state.set_full_size(size);
    }

    /// Adopts a daemon-assigned tile id for a session the server never gave a
    /// channel id.
    pub fn adopt_tile_id(&mut self, tid: String) {
        self.state.adopt_tile_id(tid);
    }

    /// Performs one view-window exchange and returns the JPIP byte stream the
    /// server produced for it - `None` when the server had explicitly nothing
    /// new for this window.
    ///
    /// Local refusals (`SemanticRefusal`) happen before any network I/O:
    /// requesting a second channel, requesting a region without any session
    /// identifier, or using a closed session.
    pub async fn open_view(&mut self, window: &ViewWindow) -> Result<Option<Bytes>> {
        if self.state.is_closed() {
            return Err(JpipError::SemanticRefusal("session is closed"));
        }
        if window.new_channel.is_some() {
            if self.state.channel_id.is_some() {
                return Err(JpipError::SemanticRefusal("a channel is already allocated for this client"));
            }
            self.state.mark_channel_requested();
        }
        else {
            if self.state.session_id().is_none() {
                return Err(JpipError::SemanticRefusal("view request needs a channel or tile id"));
            }
            self.state.mark_region_requested();
        }

        let query = build_query(window, &self.state);
        let response = self.transport.get(&query).await?;
        if !response.status.is_success() {
            warn!("view request failed with http status {}", response.status);
            return Err(JpipError::violation(format!("http status {}", response.status)));
        }

        let headers = JpipResponseHeaders::parse(&response.headers).map_err(|e| {
            warn!("unusable response headers: {}", e);
            e
        })?;
        self.state.apply_response(&headers);

        // an auxiliary grant means the body is not the stream - the stream is
        // fetched over a raw socket instead
        if let Some(grant) = headers.cnew.as_ref().filter(|g| g.transport != AuxTransport::None) {
            let port = grant
                .aux_port
                .ok_or_else(|| JpipError::violation("auxiliary transport granted without auxport"))?;
            debug!("channel {} handed off to auxiliary transport on port {}", grant.cid, port);
            let mut stream = self.transport.open_aux_channel(port).await?;
            let bytes = aux_channel::retrieve_stream(stream.as_mut(), &grant.cid, &self.config).await?;
            return Ok(Some(bytes));
        }

        if response.body.is_empty() {
            Ok(None)
        }
        else {
            Ok(Some(response.body))
        }
    }

    /// Tells the server to release the channel. Best effort: the response is
    /// discarded, failures are logged and swallowed, and the session is closed
    /// locally either way.
    pub async fn close_channel(&mut self) {
        if let Some(cid) = self.state.channel_id.clone() {
            match self.transport.get(&format!("cclose={}", cid)).await {
                Ok(_) => debug!("closed channel {}", cid),
                Err(e) => debug!("channel close for {} failed (ignored): {}", cid, e),
            }
        }
        self.state.mark_closed();
    }
}
