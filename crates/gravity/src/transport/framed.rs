//! Length-prefixed JSON framing over any `AsyncRead + AsyncWrite` stream.
//!
//! Frame shape: a 4-byte big-endian length prefix followed by that many
//! bytes of `serde_json`-encoded body — the same framing
//! `hdds-discovery-server`'s `connection.rs` uses for its own wire
//! protocol, generalized here to carry any `Serialize`/`DeserializeOwned`
//! type rather than one fixed message enum.

use crate::error::{GravityError, GravityResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Messages larger than this are rejected rather than read into memory.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// A length-prefixed JSON stream over some underlying transport.
pub struct Framed<S> {
    stream: S,
    max_message_size: usize,
}

impl<S> Framed<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_max_message_size(stream: S, max_message_size: usize) -> Self {
        Self {
            stream,
            max_message_size,
        }
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> GravityResult<()> {
        let body = serde_json::to_vec(message)?;
        if body.len() > self.max_message_size {
            return Err(GravityError::BadReply(format!(
                "outgoing message of {} bytes exceeds max {}",
                body.len(),
                self.max_message_size
            )));
        }
        let len = body.len() as u32;
        self.stream.write_all(&len.to_be_bytes()).await?;
        self.stream.write_all(&body).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> GravityResult<T> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_message_size {
            return Err(GravityError::BadReply(format!(
                "incoming message of {len} bytes exceeds max {}",
                self.max_message_size
            )));
        }
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    #[tokio::test]
    async fn round_trips_over_tcp_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream);
            let msg: Ping = framed.recv().await.unwrap();
            framed.send(&msg).await.unwrap();
        });

        let client_stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Framed::new(client_stream);
        client.send(&Ping { seq: 7 }).await.unwrap();
        let echoed: Ping = client.recv().await.unwrap();
        assert_eq!(echoed, Ping { seq: 7 });

        server.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_outgoing_message_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::with_max_message_size(stream, 4);
        let err = framed.send(&Ping { seq: 1 }).await.unwrap_err();
        assert!(matches!(err, GravityError::BadReply(_)));
    }
}
