#![deny(unused_must_use)]

//! Client side of the NBD fixed newstyle handshake.
//!
//! A server opens every newstyle connection with `NBDMAGIC`, `IHAVEOPT` and a
//! 16 bit flags field. This crate reads those three tokens off an already
//! connected stream, checks them in order, and stops right before option
//! haggling would begin.
//!
//! ```no_run
//! # async fn f() -> Result<(), nbdhs::Error> {
//! let client = nbdhs::Client::new(nbdhs::TcpConnector::new("127.0.0.1"), Default::default());
//! let conn = client.connect().await?;
//! println!("flags {:#06x}", conn.flags().bits());
//! # Ok(())
//! # }
//! ```

pub mod transport;

pub use transport::protocol::handshake::{handshake, Established, HandshakeConfig};
pub use transport::protocol::HandshakeFlags;
pub use transport::{
    Client, Connection, Connector, Error, HandshakeError, State, Step, TcpConnector, Verifier, NBD_DEFAULT_PORT,
};
