//! REQ/REP round trip: connect, send, wait with a timeout, always close.
//!
//! Grounds `GravityNode::sendRequestToServiceProvider`'s retry loop: a
//! fresh socket every attempt, a bounded number of attempts, and the socket
//! closed on every exit path (success, timeout, or error).

use crate::error::{GravityError, GravityResult};
use crate::transport::Framed;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;

/// Perform one REQ/REP attempt: connect, send `request`, wait up to
/// `timeout` for a reply. The connection is dropped on every exit path.
pub async fn try_once<Req, Rep>(
    url: &str,
    request: &Req,
    timeout: Duration,
) -> GravityResult<Rep>
where
    Req: Serialize,
    Rep: DeserializeOwned,
{
    let addr = strip_scheme(url);
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| GravityError::Timeout)??;
    let mut framed = Framed::new(stream);
    framed.send(request).await?;
    let reply = tokio::time::timeout(timeout, framed.recv::<Rep>())
        .await
        .map_err(|_| GravityError::Timeout)??;
    Ok(reply)
}

/// Retry [`try_once`] up to `retries` times, each with its own fresh
/// connection and its own `timeout` budget. Returns the first successful
/// reply, or `GravityError::Timeout` if every attempt timed out.
pub async fn request_with_retry<Req, Rep>(
    url: &str,
    request: &Req,
    timeout: Duration,
    retries: u32,
) -> GravityResult<Rep>
where
    Req: Serialize,
    Rep: DeserializeOwned,
{
    let mut last_err = GravityError::Timeout;
    for _attempt in 0..retries.max(1) {
        match try_once(url, request, timeout).await {
            Ok(reply) => return Ok(reply),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

/// Strip a `tcp://` scheme prefix, if present, for use with `TcpStream`.
pub fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("tcp://").unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tokio::net::TcpListener;

    #[derive(Debug, Serialize, Deserialize)]
    struct Echo {
        value: u32,
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream);
            let req: Echo = framed.recv().await.unwrap();
            framed.send(&req).await.unwrap();
        });

        let reply: Echo =
            request_with_retry(&addr.to_string(), &Echo { value: 9 }, Duration::from_millis(200), 3)
                .await
                .unwrap();
        assert_eq!(reply.value, 9);
    }

    #[tokio::test]
    async fn exhausts_retries_against_unreachable_peer() {
        // Nothing listening on this port.
        let result: GravityResult<Echo> = request_with_retry(
            "127.0.0.1:1",
            &Echo { value: 1 },
            Duration::from_millis(50),
            2,
        )
        .await;
        assert!(result.is_err());
    }
}
