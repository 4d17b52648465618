//! UDP Beacon Pair: broadcasts this directory's (domain, url) and listens
//! for peers broadcasting theirs.
//!
//! Grounded on `ServiceDirectory.cpp`'s broadcaster/receiver threads
//! (`sendBroadcasterParameters`). Payload on the wire is simply
//! `domain\tdirectory-url`, UTF-8, single datagram.

use crate::synchronizer::SyncCommand;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

const FIELD_SEP: char = '\t';

/// Spawn the broadcaster: announce `(domain, own_url)` to the network on
/// `broadcast_port` every `rate`.
pub fn spawn_broadcaster(domain: String, own_url: String, broadcast_port: u16, rate: Duration) {
    tokio::spawn(async move {
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "beacon broadcaster failed to bind");
                return;
            }
        };
        if let Err(e) = socket.set_broadcast(true) {
            tracing::warn!(error = %e, "failed to enable UDP broadcast");
        }
        let payload = format!("{domain}{FIELD_SEP}{own_url}");
        let dest = format!("255.255.255.255:{broadcast_port}");
        let mut ticker = tokio::time::interval(rate);
        loop {
            ticker.tick().await;
            if let Err(e) = socket.send_to(payload.as_bytes(), &dest).await {
                tracing::debug!(error = %e, "beacon broadcast failed");
            }
        }
    });
}

/// Spawn the receiver: listen on `broadcast_port`, filter to
/// `valid_domains` (empty means accept any domain other than `own_domain`),
/// and forward `Add`/`Remove` discovery events to `tx`. A peer is presumed
/// gone — and a `Remove` emitted — once it has not been re-heard for
/// `stale_after`, which the caller sets to a multiple of its own broadcast
/// rate (see `ServiceDirectory.cpp`'s domain sync thread, which ages peers
/// out the same way rather than waiting on a UDP disconnect signal that
/// doesn't exist).
pub fn spawn_receiver(
    broadcast_port: u16,
    own_domain: String,
    valid_domains: HashSet<String>,
    stale_after: Duration,
    tx: mpsc::UnboundedSender<SyncCommand>,
) {
    tokio::spawn(async move {
        let socket = match UdpSocket::bind(format!("0.0.0.0:{broadcast_port}")).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "beacon receiver failed to bind");
                return;
            }
        };
        let mut last_seen: HashMap<String, Instant> = HashMap::new();
        let mut scan = tokio::time::interval(stale_after);
        scan.tick().await; // first tick fires immediately; skip it

        let mut buf = [0u8; 1024];
        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    let (len, _peer) = match received {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::debug!(error = %e, "beacon receive failed");
                            continue;
                        }
                    };
                    let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                        continue;
                    };
                    let Some((domain, url)) = text.split_once(FIELD_SEP) else {
                        continue;
                    };
                    if domain == own_domain {
                        continue;
                    }
                    if !valid_domains.is_empty() && !valid_domains.contains(domain) {
                        continue;
                    }
                    last_seen.insert(domain.to_string(), Instant::now());
                    if tx
                        .send(SyncCommand::Add {
                            domain: domain.to_string(),
                            url: url.to_string(),
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                _ = scan.tick() => {
                    for domain in stale_domains(&last_seen, Instant::now(), stale_after) {
                        last_seen.remove(&domain);
                        if tx.send(SyncCommand::Remove { domain }).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });
}

/// Domains in `last_seen` that haven't been re-heard within `stale_after` of
/// `now`. Split out from the receiver loop so the aging rule is testable
/// without a real socket or a real clock tick.
fn stale_domains(last_seen: &HashMap<String, Instant>, now: Instant, stale_after: Duration) -> Vec<String> {
    last_seen
        .iter()
        .filter(|(_, seen)| now.duration_since(**seen) > stale_after)
        .map(|(domain, _)| domain.clone())
        .collect()
}
