//! Directory Synchronizer: cross-domain anti-entropy.
//!
//! Grounded on `ServiceDirectory.cpp`'s domain sync thread: on a discovered
//! peer domain, pull its full snapshot via `DirectoryService:GetProviders`
//! and merge it in under the peer's own domain key; on a lost peer, purge
//! everything tagged with that domain. This crate's realization keeps the
//! merge itself on the directory's single accept-loop task (see
//! `server.rs::run`) — the synchronizer only decides *when* to sync, it
//! never touches `DirectoryState` directly.

use gravity::protocol::DirectoryMessage;
use gravity::transport::reqrep;
use std::time::Duration;

/// A discovery event fed in from the UDP Beacon Receiver.
#[derive(Debug, Clone)]
pub enum SyncCommand {
    /// A peer directory for `domain` was heard (or re-heard) at `url`.
    Add { domain: String, url: String },
    /// A peer domain went quiet and should be purged.
    Remove { domain: String },
}

/// Pull a peer directory's full cross-domain snapshot and return just the
/// slice for `domain`. Called from the single accept-loop task in response
/// to a `SyncCommand::Add`.
pub async fn pull_domain_snapshot(
    peer_url: &str,
    domain: &str,
    timeout: Duration,
    retries: u32,
) -> Option<gravity::protocol::ServiceDirectoryMap> {
    let reply: Result<DirectoryMessage, _> =
        reqrep::request_with_retry(peer_url, &DirectoryMessage::GetProvidersRequest, timeout, retries).await;
    match reply {
        Ok(DirectoryMessage::GetProvidersResponse { domains }) => {
            domains.into_iter().find(|m| m.domain == domain)
        }
        Ok(other) => {
            tracing::warn!(peer = %peer_url, reply = %other, "unexpected reply to GetProvidersRequest");
            None
        }
        Err(e) => {
            tracing::warn!(peer = %peer_url, error = %e, "peer sync round trip failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gravity::protocol::ServiceDirectoryMap;
    use gravity::transport::Framed;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn pulls_the_requested_domain_slice() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream);
            let _req: DirectoryMessage = framed.recv().await.unwrap();
            framed
                .send(&DirectoryMessage::GetProvidersResponse {
                    domains: vec![
                        ServiceDirectoryMap {
                            domain: "Lab1".into(),
                            service_providers: vec![],
                            data_providers: vec![],
                            change: None,
                        },
                        ServiceDirectoryMap {
                            domain: "Lab2".into(),
                            service_providers: vec![],
                            data_providers: vec![("temp".into(), vec!["tcp://10.0.0.1:1".into()])],
                            change: None,
                        },
                    ],
                })
                .await
                .unwrap();
        });

        let snapshot = pull_domain_snapshot(&addr.to_string(), "Lab2", Duration::from_millis(500), 2)
            .await
            .unwrap();
        assert_eq!(snapshot.domain, "Lab2");
        assert_eq!(snapshot.data_providers[0].0, "temp");
    }
}
