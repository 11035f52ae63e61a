//! TCP transport carrying length-prefixed CBOR envelopes.
//!
//! A connection is a sequence of request/response exchanges: the client
//! writes one framed [`Request`], the server answers with one framed
//! [`Response`], in order. Authentication of the caller context carried in
//! the envelope happens before this layer (TLS termination, gateway).
//!
//! [`Request`]: greet_proto::Request
//! [`Response`]: greet_proto::Response

use std::net::SocketAddr;

use greet_proto::envelope::{LENGTH_PREFIX_SIZE, envelope_len, frame};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::error::ServerError;

/// Listening TCP socket.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind to `address` (e.g. `"0.0.0.0:6777"`).
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Wait for the next connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        Ok(self.listener.accept().await?)
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }
}

/// Read one envelope. `None` when the peer closed the stream between
/// envelopes.
pub async fn read_envelope<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ServerError>
where
    R: AsyncReadExt + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = envelope_len(prefix)?;
    let mut envelope = vec![0u8; len];
    reader.read_exact(&mut envelope).await?;
    Ok(Some(envelope))
}

/// Write one envelope with its length prefix.
pub async fn write_envelope<W>(writer: &mut W, envelope: &[u8]) -> Result<(), ServerError>
where
    W: AsyncWriteExt + Unpin,
{
    writer.write_all(&frame(envelope)?).await?;
    writer.flush().await?;
    Ok(())
}
