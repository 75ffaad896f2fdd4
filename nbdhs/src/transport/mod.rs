use async_trait::async_trait;
use std::io::Result;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

pub mod protocol;
use protocol::handshake::{handshake, Established, HandshakeConfig};
use protocol::HandshakeFlags;

pub use protocol::handshake::{HandshakeError, State, Step, Verifier};

pub const NBD_DEFAULT_PORT: u16 = 10809;

/// Anything that hands out a fresh, connected byte stream to an NBD server.
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;
    async fn connect(&self) -> Result<Self::Stream>;
}

#[derive(Debug, Hash, Eq, PartialEq, Clone)]
pub struct TcpConnector {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Option<Duration>,
}
impl TcpConnector {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: NBD_DEFAULT_PORT,
            connect_timeout: Some(Duration::from_secs(30)),
        }
    }
}
#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;
    async fn connect(&self) -> Result<TcpStream> {
        let addr = (self.host.as_str(), self.port);
        let stream = match self.connect_timeout {
            Some(d) => match tokio::time::timeout(d, TcpStream::connect(addr)).await {
                Ok(res) => res?,
                Err(_) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))
                }
            },
            None => TcpStream::connect(addr).await?,
        };
        stream.set_nodelay(true)?;
        info!("connected to {}", stream.peer_addr()?);
        Ok(stream)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect")]
    Connect(#[source] std::io::Error),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

/// A stream whose greeting has been verified. The only way to get one is a
/// successful handshake, so option haggling can't start on a bad connection.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    established: Established,
}
impl<S> Connection<S> {
    pub fn flags(&self) -> HandshakeFlags {
        self.established.flags
    }
    pub fn established(&self) -> Established {
        self.established
    }
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }
    /// Hands the stream back. Closing it is up to the caller.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

pub struct Client<C: Connector> {
    connector: C,
    config: HandshakeConfig,
}
impl<C: Connector> Client<C> {
    pub fn new(connector: C, config: HandshakeConfig) -> Self {
        Self { connector, config }
    }
    /// Opens a fresh stream and runs the greeting on it. Nothing is retried:
    /// on failure the stream is dropped and the caller decides what to do.
    pub async fn connect(&self) -> std::result::Result<Connection<C::Stream>, Error> {
        let mut stream = self.connector.connect().await.map_err(Error::Connect)?;
        debug!("starting fixed newstyle handshake");
        let established = handshake(&mut stream, &self.config).await?;
        Ok(Connection { stream, established })
    }
}
