use std::io;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;

/// Dialing capability used by the probe runner.
///
/// Implementations only establish the stream; connect and read deadlines are
/// applied by the caller. Dropping the stream must release the socket.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Stream: AsyncRead + Unpin + Send + 'static;

    async fn connect(&self, host: &str, port: u16) -> io::Result<Self::Stream>;
}

/// Plain TCP via the tokio networking stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        TcpStream::connect((host, port)).await
    }
}
