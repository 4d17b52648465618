//! Heartbeat Publisher and Heartbeat Listener.
//!
//! The publisher is a timer loop that publishes a tiny data product under
//! the owning component's id; the listener watches one or more such
//! streams and fires INIT/ALIVE/MISSED transitions (SPEC_FULL.md §4.6-4.7).
//! Heartbeats ride the ordinary Publish/Subscribe path — a heartbeat is
//! just a data product whose id is the component id — so this module only
//! adds the watch bookkeeping and the periodic liveness scan on top of it.

use crate::node::listener::{HeartbeatListener, ListenerHandle, ListenerRegistry};
use crate::node::publish_manager::PublishManagerHandle;
use crate::protocol::DataProduct;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

/// State of one watched heartbeat stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Init,
    Alive,
    Missed,
}

struct Watch {
    max_inter_arrival: Duration,
    last_seen: Option<Instant>,
    state: WatchState,
    listener: ListenerHandle,
}

/// Periodic liveness beacon under `component_id`.
pub struct HeartbeatPublisher {
    stop: Arc<std::sync::atomic::AtomicBool>,
}

impl HeartbeatPublisher {
    /// Spawn the publisher. `component_id` must already be registered as a
    /// data product bound on the caller-supplied port (the original
    /// hard-codes port 54541 here; this rewrite honors the caller's choice,
    /// see DESIGN.md).
    pub fn spawn(component_id: String, interval: Duration, publisher: PublishManagerHandle) -> Self {
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stop_for_task = stop.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if stop_for_task.load(std::sync::atomic::Ordering::Relaxed) {
                    break;
                }
                let product = DataProduct::new(component_id.clone(), Vec::new());
                publisher.publish(String::new(), product);
            }
        });
        Self { stop }
    }

    pub fn stop(&self) {
        self.stop.store(true, std::sync::atomic::Ordering::Relaxed);
    }
}

/// Watches one or more heartbeat streams and fires transitions on the
/// registered [`HeartbeatListener`] callbacks.
pub struct HeartbeatListenerManager {
    watches: Mutex<HashMap<String, Watch>>,
    registry: Arc<ListenerRegistry>,
}

impl HeartbeatListenerManager {
    pub fn new(registry: Arc<ListenerRegistry>) -> Arc<Self> {
        Arc::new(Self {
            watches: Mutex::new(HashMap::new()),
            registry,
        })
    }

    /// Register interest in `component_id`'s heartbeats. `listener` must
    /// already be registered as a [`HeartbeatListener`] in the registry.
    pub async fn watch(&self, component_id: String, max_inter_arrival: Duration, listener: ListenerHandle) {
        self.watches.lock().await.insert(
            component_id,
            Watch {
                max_inter_arrival,
                last_seen: None,
                state: WatchState::Init,
                listener,
            },
        );
    }

    /// Called by the Subscription Manager's dispatch path whenever a
    /// heartbeat data product for `component_id` arrives.
    pub async fn on_heartbeat(&self, component_id: &str) {
        let mut watches = self.watches.lock().await;
        let Some(watch) = watches.get_mut(component_id) else {
            return;
        };
        let was_first = watch.last_seen.is_none();
        let was_missed = watch.state == WatchState::Missed;
        watch.last_seen = Some(Instant::now());
        watch.state = WatchState::Alive;
        let listener = watch.listener;
        drop(watches);

        self.registry.with_heartbeat_listener(listener, |cb| {
            if was_first {
                cb.first_heartbeat(component_id);
            } else if was_missed {
                cb.received_heartbeat(component_id);
            }
        });
    }

    /// Scan all watches for missed deadlines; fires `missedHeartbeat` and
    /// transitions matching watches to MISSED. Intended to be driven by a
    /// periodic ticker (see [`HeartbeatListenerManager::run_scanner`]).
    pub async fn scan(&self) {
        let now = Instant::now();
        let mut transitions = Vec::new();
        {
            let mut watches = self.watches.lock().await;
            for (component_id, watch) in watches.iter_mut() {
                let Some(last_seen) = watch.last_seen else {
                    continue;
                };
                if watch.state != WatchState::Missed && now.duration_since(last_seen) > watch.max_inter_arrival {
                    watch.state = WatchState::Missed;
                    transitions.push((
                        component_id.clone(),
                        watch.listener,
                        now.duration_since(last_seen).as_micros() as u64,
                    ));
                }
            }
        }
        for (component_id, listener, micros_since_last) in transitions {
            self.registry.with_heartbeat_listener(listener, |cb| {
                cb.missed_heartbeat(&component_id, micros_since_last);
            });
        }
    }

    /// Run [`scan`](Self::scan) on a fixed period until the channel closes.
    pub fn run_scanner(self: Arc<Self>, period: Duration, mut kill_rx: mpsc::UnboundedReceiver<()>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.scan().await,
                    _ = kill_rx.recv() => break,
                }
            }
        });
    }
}
