//! XPUB-shaped publisher and SUB-shaped subscriber built on TCP.
//!
//! A publisher binds a `TcpListener`; every accepted connection is treated
//! as a subscribe event (this crate does not implement literal
//! `ZMQ_SUBSCRIBE` filter frames — filter matching happens client-side, in
//! the Subscription Manager, exactly as it does in the original transport).
//! `XPUB_VERBOSE` is approximated by delivering every new connection as a
//! subscribe event, including ones from a peer that already holds another
//! connection open, since this transport has no concept of a logical
//! subscription distinct from the TCP connection itself.

use crate::error::GravityResult;
use crate::transport::Framed;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// One publish frame: `frame1 = filterText`, `frame2 = serialized data
/// product`, bundled into a single JSON message on this transport (see
/// SPEC_FULL.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishFrame {
    pub filter_text: String,
    pub payload: Vec<u8>,
}

/// A newly accepted subscriber connection on a publisher's listener.
pub struct NewSubscriber {
    pub stream: TcpStream,
}

/// Bind a publisher socket and hand back the listener plus a stream of
/// accept events. The caller (the Publish Manager) owns replay-on-subscribe
/// and fan-out; this just turns "a TCP accept happened" into an event.
pub async fn bind_publisher(url: &str) -> GravityResult<TcpListener> {
    let addr = crate::transport::reqrep::strip_scheme(url);
    Ok(TcpListener::bind(addr).await?)
}

/// Spawn a task that forwards every accepted connection on `listener` to
/// `tx`, until the listener errors (e.g. because it was dropped) or `tx`'s
/// receiver is gone.
pub fn spawn_accept_loop(listener: TcpListener, tx: mpsc::UnboundedSender<NewSubscriber>) {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    if tx.send(NewSubscriber { stream }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "publisher accept loop exiting");
                    break;
                }
            }
        }
    });
}

/// Spawn a task that owns one subscriber connection's outgoing half,
/// draining `rx` and writing each frame until the connection breaks.
pub fn spawn_subscriber_writer(
    stream: TcpStream,
    mut rx: mpsc::UnboundedReceiver<PublishFrame>,
) {
    tokio::spawn(async move {
        let mut framed = Framed::new(stream);
        while let Some(frame) = rx.recv().await {
            if framed.send(&frame).await.is_err() {
                break;
            }
        }
    });
}

/// Connect a SUB-shaped socket and spawn a task that forwards every frame
/// received on it to `tx`, tagged with the URL it came from.
pub async fn connect_subscriber(
    url: &str,
    tx: mpsc::UnboundedSender<(String, PublishFrame)>,
) -> GravityResult<()> {
    let addr = crate::transport::reqrep::strip_scheme(url);
    let stream = TcpStream::connect(addr).await?;
    let url = url.to_string();
    tokio::spawn(async move {
        let mut framed = Framed::new(stream);
        loop {
            match framed.recv::<PublishFrame>().await {
                Ok(frame) => {
                    if tx.send((url.clone(), frame)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "subscriber connection closed");
                    break;
                }
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_frame() {
        let listener = bind_publisher("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accept_tx, mut accept_rx) = mpsc::unbounded_channel();
        spawn_accept_loop(listener, accept_tx);

        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        connect_subscriber(&addr.to_string(), frame_tx).await.unwrap();

        let new_sub = accept_rx.recv().await.unwrap();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        spawn_subscriber_writer(new_sub.stream, writer_rx);
        writer_tx
            .send(PublishFrame {
                filter_text: String::new(),
                payload: vec![1, 2, 3],
            })
            .unwrap();

        let (_url, frame) = frame_rx.recv().await.unwrap();
        assert_eq!(frame.payload, vec![1, 2, 3]);
    }
}
