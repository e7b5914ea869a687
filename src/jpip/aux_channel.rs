use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::config::JpipConfig;
use crate::error::{JpipError, Result};
use crate::util::io::{read_exact_timed, write_all_timed, NetStream};
use crate::util::safe_converter::SafeCast;

pub const CHUNK_HEADER_LEN: usize = 8;

/// Retrieves one JPIP byte stream over an auxiliary raw-socket channel.
///
/// The client announces the channel id, then the server sends the stream as a
/// sequence of chunks: an 8-byte header whose first two bytes are the
/// big-endian total chunk length (header included), followed by the body.
/// Every header is echoed back as an acknowledgement. The stream is complete
/// when a chunk body carries the end-of-message marker in its final two bytes:
/// `0x00` followed by `0x01` or `0x02`.
pub(crate) async fn retrieve_stream<S>(stream: &mut S, channel_id: &str, config: &JpipConfig) -> Result<Bytes>
where S: NetStream + ?Sized {
    write_all_timed(stream, format!("{}\r\n", channel_id).as_bytes(), config.read_timeout).await?;

    let mut out = BytesMut::new();
    loop {
        let mut header = [0u8; CHUNK_HEADER_LEN];
        read_exact_timed(stream, &mut header, config.read_timeout).await?;

        let total_len: usize = u16::from_be_bytes([header[0], header[1]]).safe_cast();
        if total_len < CHUNK_HEADER_LEN {
            return Err(JpipError::violation(format!(
                "auxiliary chunk announces {} bytes, less than its own header",
                total_len
            )));
        }
        let body_len = total_len - CHUNK_HEADER_LEN;
        if out.len() + body_len > config.max_stream_len {
            return Err(JpipError::violation(format!(
                "auxiliary stream exceeds configured maximum of {} bytes",
                config.max_stream_len
            )));
        }

        let mut body = vec![0u8; body_len];
        read_exact_timed(stream, &mut body, config.read_timeout).await?;
        write_all_timed(stream, &header, config.read_timeout).await?;
        trace!("auxiliary chunk: {} body bytes", body_len);

        let terminal = is_terminal_chunk(&body);
        out.extend_from_slice(&body);
        if terminal {
            debug!("auxiliary stream complete: {} bytes", out.len());
            return Ok(out.freeze());
        }
    }
}

/// End-of-message marker in the last two body bytes: 0x00, then 0x01 or 0x02.
fn is_terminal_chunk(body: &[u8]) -> bool {
    let n = body.len();
    n >= 2 && body[n - 2] == 0x00 && matches!(body[n - 1], 0x01 | 0x02)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn test_config() -> JpipConfig {
        let mut config = JpipConfig::new("127.0.0.1:1");
        config.read_timeout = Duration::from_secs(1);
        config
    }

    fn chunk(body: &[u8]) -> Vec<u8> {
        let total = (body.len() + CHUNK_HEADER_LEN) as u16;
        let mut out = Vec::new();
        out.extend_from_slice(&total.to_be_bytes());
        out.extend_from_slice(&[0u8; 6]);
        out.extend_from_slice(body);
        out
    }

    #[tokio::test]
    async fn test_reassembles_bodies_in_order_and_acks_headers() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let bodies: Vec<Vec<u8>> = vec![
            b"first".to_vec(),
            b"second".to_vec(),
            vec![0xca, 0xfe, 0x00, 0x01],
        ];
        let expected: Vec<u8> = bodies.concat();

        let server_task = tokio::spawn(async move {
            let mut greeting = vec![0u8; "C1\r\n".len()];
            server.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, b"C1\r\n");

            for body in &bodies {
                let chunk = chunk(body);
                server.write_all(&chunk).await.unwrap();

                let mut ack = [0u8; CHUNK_HEADER_LEN];
                server.read_exact(&mut ack).await.unwrap();
                assert_eq!(ack, chunk[..CHUNK_HEADER_LEN]);
            }
        });

        let stream = retrieve_stream(&mut client, "C1", &test_config()).await.unwrap();
        assert_eq!(stream.as_ref(), expected.as_slice());
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_terminates_on_first_terminal_chunk() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        tokio::spawn(async move {
            let mut greeting = vec![0u8; 4];
            server.read_exact(&mut greeting).await.unwrap();

            server.write_all(&chunk(&[0x11, 0x00, 0x02])).await.unwrap();
            let mut ack = [0u8; CHUNK_HEADER_LEN];
            server.read_exact(&mut ack).await.unwrap();
            // no further chunks: the client must not wait for any
        });

        let stream = retrieve_stream(&mut client, "C1", &test_config()).await.unwrap();
        assert_eq!(stream.as_ref(), &[0x11, 0x00, 0x02]);
    }

    #[tokio::test]
    async fn test_undersized_chunk_length_is_violation() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        tokio::spawn(async move {
            let mut greeting = vec![0u8; 4];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x00, 0x04, 0, 0, 0, 0, 0, 0]).await.unwrap();
        });

        let result = retrieve_stream(&mut client, "C1", &test_config()).await;
        assert!(matches!(result, Err(JpipError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_truncated_body_is_violation() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        tokio::spawn(async move {
            let mut greeting = vec![0u8; 4];
            server.read_exact(&mut greeting).await.unwrap();
            // announces 8 body bytes but delivers 3, then closes
            server.write_all(&[0x00, 0x10, 0, 0, 0, 0, 0, 0]).await.unwrap();
            server.write_all(&[1, 2, 3]).await.unwrap();
        });

        let result = retrieve_stream(&mut client, "C1", &test_config()).await;
        assert!(matches!(result, Err(JpipError::ProtocolViolation(_))));
    }

    #[rstest::rstest]
    #[case::marker_01(&[0xaa, 0x00, 0x01], true)]
    #[case::marker_02(&[0x00, 0x02], true)]
    #[case::wrong_last_byte(&[0xaa, 0x00, 0x03], false)]
    #[case::missing_zero(&[0xaa, 0xbb, 0x01], false)]
    #[case::too_short(&[0x01], false)]
    #[case::empty(&[], false)]
    fn test_terminal_marker(#[case] body: &[u8], #[case] expected: bool) {
        assert_eq!(is_terminal_chunk(body), expected);
    }
}
