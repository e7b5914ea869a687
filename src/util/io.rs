use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{JpipError, Result};

/// Anything the protocol code can speak over: a real TCP stream in production,
/// an in-memory duplex stream in tests.
pub trait NetStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> NetStream for T {}

/// `read_exact` with an explicit deadline. A stream that ends early surfaces
/// as a protocol violation via the `io::Error` conversion, not as a short read.
pub async fn read_exact_timed<S>(stream: &mut S, buf: &mut [u8], limit: Duration) -> Result<()>
where S: AsyncRead + Unpin + ?Sized {
    match timeout(limit, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(JpipError::Timeout(limit)),
    }
}

pub async fn write_all_timed<S>(stream: &mut S, buf: &[u8], limit: Duration) -> Result<()>
where S: AsyncWrite + Unpin + ?Sized {
    match timeout(limit, stream.write_all(buf)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(JpipError::Timeout(limit)),
    }
}
