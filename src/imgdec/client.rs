use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::config::JpipConfig;
use crate::error::{JpipError, Result};
use crate::imgdec::raster::Raster;
use crate::imgdec::wire::{
    ack_ok, ChannelDestroy, IdHeader, IdKind, IdQuery, PnmHeader, PnmRequest, SessionIds, SizQuery,
    SizResponse, StreamSend, XmlHeader, XmlRequest,
};
use crate::util::io::{read_exact_timed, write_all_timed, NetStream};

/// Produces the connection for one daemon exchange. The protocol has no
/// persistent sessions at the transport level - every logical operation runs
/// over a connection of its own, and continuity comes from the identifiers
/// in the request headers.
#[async_trait]
pub trait DaemonConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn NetStream>>;
}

pub struct TcpDaemonConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpDaemonConnector {
    pub fn new(config: &JpipConfig) -> TcpDaemonConnector {
        TcpDaemonConnector {
            addr: config.daemon_addr.clone(),
            connect_timeout: config.connect_timeout,
        }
    }
}

#[async_trait]
impl DaemonConnector for TcpDaemonConnector {
    async fn connect(&self) -> Result<Box<dyn NetStream>> {
        match timeout(self.connect_timeout, TcpStream::connect(self.addr.as_str())).await {
            Ok(Ok(stream)) => Ok(Box::new(stream)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(JpipError::Timeout(self.connect_timeout)),
        }
    }
}

/// Client for the image decode daemon. Stateless apart from configuration:
/// whoever calls it passes the session identifiers to use, and each operation
/// opens, uses and drops its own connection on every path.
pub struct DaemonClient {
    connector: Arc<dyn DaemonConnector>,
    config: Arc<JpipConfig>,
}

impl DaemonClient {
    pub fn tcp(config: Arc<JpipConfig>) -> DaemonClient {
        let connector = Arc::new(TcpDaemonConnector::new(&config));
        Self::with_connector(connector, config)
    }

    pub fn with_connector(connector: Arc<dyn DaemonConnector>, config: Arc<JpipConfig>) -> DaemonClient {
        DaemonClient { connector, config }
    }

    /// Uploads a raw JPIP byte stream for decoding. The daemon answers with a
    /// single acknowledgement byte; zero means it rejected the stream.
    pub async fn send_stream(&self, payload: &[u8], session: Option<&SessionIds<'_>>) -> Result<()> {
        let mut stream = self.connector.connect().await?;

        let mut buf = BytesMut::with_capacity(payload.len() + 64);
        StreamSend {
            session: session.copied(),
            payload,
        }
        .ser(&mut buf);
        write_all_timed(stream.as_mut(), &buf, self.config.read_timeout).await?;

        let mut ack = [0u8; 1];
        read_exact_timed(stream.as_mut(), &mut ack, self.config.read_timeout).await?;
        if !ack_ok(ack[0]) {
            return Err(JpipError::violation("daemon rejected the stream"));
        }
        trace!("daemon accepted {} stream bytes", payload.len());
        Ok(())
    }

    /// Fetches the decoded raster for the current state of a session, scaled
    /// to the given frame size.
    pub async fn fetch_pnm(&self, session_id: Option<&str>, frame_size: (u32, u32)) -> Result<Raster> {
        let mut stream = self.connector.connect().await?;

        let mut buf = BytesMut::new();
        PnmRequest {
            session_id,
            frame_width: frame_size.0,
            frame_height: frame_size.1,
        }
        .ser(&mut buf);
        write_all_timed(stream.as_mut(), &buf, self.config.read_timeout).await?;

        let mut raw_header = [0u8; PnmHeader::SERIALIZED_LEN];
        read_exact_timed(stream.as_mut(), &mut raw_header, self.config.read_timeout).await?;
        let header = PnmHeader::deser(&mut raw_header.as_ref()).map_err(|e| {
            warn!("discarding PNM response {:02x?}: {}", raw_header, e);
            e
        })?;

        let sample_len = header.sample_len();
        if sample_len > self.config.max_stream_len {
            return Err(JpipError::violation(format!(
                "PNM response of {} sample bytes exceeds configured maximum",
                sample_len
            )));
        }

        let mut samples = vec![0u8; sample_len];
        read_exact_timed(stream.as_mut(), &mut samples, self.config.read_timeout).await?;

        Ok(Raster {
            channels: header.variant.channels() as u8,
            width: u32::from(header.width),
            height: u32::from(header.height),
            samples: Bytes::from(samples),
        })
    }

    /// Fetches the document metadata (XML) for a channel.
    pub async fn fetch_xml(&self, channel_id: &str) -> Result<Bytes> {
        let mut stream = self.connector.connect().await?;

        let mut buf = BytesMut::new();
        XmlRequest { channel_id }.ser(&mut buf);
        write_all_timed(stream.as_mut(), &buf, self.config.read_timeout).await?;

        let mut raw_header = [0u8; XmlHeader::SERIALIZED_LEN];
        read_exact_timed(stream.as_mut(), &mut raw_header, self.config.read_timeout).await?;
        let len = XmlHeader::deser(&mut raw_header.as_ref()).map_err(|e| {
            warn!("discarding XML response {:02x?}: {}", raw_header, e);
            e
        })?;

        let mut payload = vec![0u8; len];
        read_exact_timed(stream.as_mut(), &mut payload, self.config.read_timeout).await?;
        Ok(Bytes::from(payload))
    }

    /// Asks which channel or tile id the daemon has assigned for a document.
    /// `None` means no id has been assigned yet.
    pub async fn query_id(&self, kind: IdKind, filename: &str) -> Result<Option<String>> {
        let mut stream = self.connector.connect().await?;

        let mut buf = BytesMut::new();
        IdQuery { kind, filename }.ser(&mut buf);
        write_all_timed(stream.as_mut(), &buf, self.config.read_timeout).await?;

        let mut raw_header = [0u8; IdHeader::SERIALIZED_LEN];
        read_exact_timed(stream.as_mut(), &mut raw_header, self.config.read_timeout).await?;
        let len = IdHeader::deser(kind, &mut raw_header.as_ref()).map_err(|e| {
            warn!("discarding id response {:02x?}: {}", raw_header, e);
            e
        })?;
        if len == 0 {
            return Ok(None);
        }

        let mut id = vec![0u8; len];
        read_exact_timed(stream.as_mut(), &mut id, self.config.read_timeout).await?;
        let id = String::from_utf8(id)
            .map_err(|e| JpipError::violation(format!("id is not ascii: {:02x?}", e.into_bytes())))?;
        Ok(Some(id))
    }

    /// Asks for the full resolution of the referenced image.
    pub async fn query_size(&self, tile_id: Option<&str>, channel_id: Option<&str>) -> Result<(u32, u32)> {
        let mut stream = self.connector.connect().await?;

        let mut buf = BytesMut::new();
        SizQuery { tile_id, channel_id }.ser(&mut buf);
        write_all_timed(stream.as_mut(), &buf, self.config.read_timeout).await?;

        let mut raw = [0u8; SizResponse::SERIALIZED_LEN];
        read_exact_timed(stream.as_mut(), &mut raw, self.config.read_timeout).await?;
        SizResponse::deser(&mut raw.as_ref()).map_err(|e| {
            warn!("discarding SIZ response {:02x?}: {}", raw, e);
            e
        })
    }

    /// Tells the daemon to drop its decode state for a channel. Best effort:
    /// failures are logged and swallowed.
    pub async fn destroy_channel(&self, channel_id: &str) {
        match self.try_destroy(channel_id).await {
            Ok(()) => debug!("daemon state for channel {} destroyed", channel_id),
            Err(e) => debug!("channel destroy for {} failed (ignored): {}", channel_id, e),
        }
    }

    async fn try_destroy(&self, channel_id: &str) -> Result<()> {
        let mut stream = self.connector.connect().await?;

        let mut buf = BytesMut::new();
        ChannelDestroy { channel_id }.ser(&mut buf);
        write_all_timed(stream.as_mut(), &buf, self.config.read_timeout).await?;

        let mut ack = [0u8; 1];
        read_exact_timed(stream.as_mut(), &mut ack, self.config.read_timeout).await?;
        if !ack_ok(ack[0]) {
            return Err(JpipError::violation("daemon refused to destroy the channel"));
        }
        Ok(())
    }

    /// Full decode round trip: upload the stream, then fetch the raster at
    /// the given frame size.
    pub async fn decode(
        &self,
        payload: &[u8],
        session: Option<&SessionIds<'_>>,
        frame_size: (u32, u32),
    ) -> Result<Raster> {
        self.send_stream(payload, session).await?;
        let session_id = session.and_then(|ids| ids.channel_id.or(ids.tile_id));
        self.fetch_pnm(session_id, frame_size).await
    }
}
