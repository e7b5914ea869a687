use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use crate::config::JpipConfig;
use crate::error::{JpipError, Result};
use crate::imgdec::client::DaemonClient;
use crate::imgdec::raster::Raster;
use crate::imgdec::wire::{IdKind, SessionIds};
use crate::jpip::client::JpipClient;
use crate::jpip::view_window::{Region, ViewWindow};
use crate::session::session_state::SessionState;

/// Drives one remote image: fetches JPIP byte streams from the server, feeds
/// them to the decode daemon, and hands decoded rasters to the caller.
///
/// Operations are sequential by construction (`&mut self`); a caller that
/// wants concurrent sessions opens one manager per image.
pub struct ImageManager {
    jpip: JpipClient,
    daemon: DaemonClient,
    config: Arc<JpipConfig>,
    target: String,
}

impl ImageManager {
    /// `url` is the JPIP server endpoint, `target` the document to view.
    pub fn connect(url: &str, target: impl Into<String>, config: JpipConfig) -> Result<ImageManager> {
        let config = Arc::new(config);
        Ok(ImageManager {
            jpip: JpipClient::connect(url, config.clone())?,
            daemon: DaemonClient::tcp(config.clone()),
            config,
            target: target.into(),
        })
    }

    #[cfg(test)]
    fn with_parts(jpip: JpipClient, daemon: DaemonClient, config: Arc<JpipConfig>, target: &str) -> ImageManager {
        ImageManager {
            jpip,
            daemon,
            config,
            target: target.to_string(),
        }
    }

    pub fn session(&self) -> &SessionState {
        self.jpip.state()
    }

    /// Requests a view of the image and returns the decoded raster - `None`
    /// when the server had nothing new for this window (the previous raster
    /// stays valid in that case).
    ///
    /// The first call allocates the channel, with the configured transport and
    /// stream-kind preferences; later calls - pan, zoom - reuse it.
    pub async fn open_view(&mut self, frame_size: (u32, u32), region: Option<Region>) -> Result<Option<Raster>> {
        let needs_channel = self.jpip.state().session_id().is_none();

        let window = ViewWindow {
            target: needs_channel.then(|| self.target.clone()),
            frame_size: Some(frame_size),
            region_offset: region.map(|r| r.offset),
            region_size: region.map(|r| r.size),
            new_channel: needs_channel.then_some(self.config.aux_transport_preference),
            stream_kind: self.config.stream_kind_preference,
        };

        let Some(stream_bytes) = self.jpip.open_view(&window).await? else {
            debug!("no new data for this view window");
            return Ok(None);
        };
        info!("received {} JPIP stream bytes", stream_bytes.len());

        self.feed_daemon(&stream_bytes).await?;

        let decode_id = self.jpip.state().session_id().map(str::to_string);
        let frame = self.jpip.state().frame_size.unwrap_or(frame_size);
        let raster = self.daemon.fetch_pnm(decode_id.as_deref(), frame).await?;
        Ok(Some(raster))
    }

    /// Document metadata for the open channel, as raw XML bytes.
    pub async fn request_xml(&mut self) -> Result<Bytes> {
        let Some(cid) = self.jpip.state().channel_id.clone() else {
            return Err(JpipError::SemanticRefusal("metadata needs an open channel"));
        };
        self.daemon.fetch_xml(&cid).await
    }

    /// Full resolution of the image, queried from the daemon once and cached
    /// in the session afterwards.
    pub async fn image_size(&mut self) -> Result<(u32, u32)> {
        if let Some(size) = self.jpip.state().full_size {
            return Ok(size);
        }

        let (tid, cid) = {
            let state = self.jpip.state();
            (state.tile_id.clone(), state.channel_id.clone())
        };
        let size = self.daemon.query_size(tid.as_deref(), cid.as_deref()).await?;
        self.jpip.record_full_size(size);
        Ok(size)
    }

    /// Tears the session down on both sides. Best effort and terminal: the
    /// session refuses further view requests afterwards.
    pub async fn close(&mut self) {
        let cid = self.jpip.state().channel_id.clone();
        self.jpip.close_channel().await;
        if let Some(cid) = cid {
            self.daemon.destroy_channel(&cid).await;
        }
    }

    /// Uploads the stream with whatever identifiers the session has. When the
    /// server assigned no channel id, the daemon keys the decode state by
    /// filename and assigns a tile id, which is adopted into the session so
    /// follow-up requests stay bound to it.
    async fn feed_daemon(&mut self, stream_bytes: &[u8]) -> Result<()> {
        let (cid, tid) = {
            let state = self.jpip.state();
            (state.channel_id.clone(), state.tile_id.clone())
        };
        let ids = SessionIds {
            filename: &self.target,
            tile_id: tid.as_deref(),
            channel_id: cid.as_deref(),
        };
        self.daemon.send_stream(stream_bytes, Some(&ids)).await?;

        if cid.is_none() && tid.is_none() {
            if let Some(assigned) = self.daemon.query_id(IdKind::Tile, &self.target).await? {
                debug!("daemon assigned tile id {}", assigned);
                self.jpip.adopt_tile_id(assigned);
            }
        }
        Ok(())
    }
}
