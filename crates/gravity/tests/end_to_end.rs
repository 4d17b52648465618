//! End-to-end scenarios driving a real [`gravity_directory::DirectoryServer`]
//! and one or more [`gravity::Node`]s over real TCP sockets.
//!
//! The directory is explicitly single-threaded (see gravity-directory's
//! DESIGN.md), so its accept loop is never `Send`-spawnable; these tests run
//! it on a `tokio::task::LocalSet` via `spawn_local`, and drive every Node
//! client directly on the task polling that set. Port numbers are handed out
//! from a shared counter (grounded on the same pattern `hooteproto`'s
//! integration tests use for picking fresh endpoints per test).

use gravity::error::GravityReturnCode;
use gravity::node::listener::HeartbeatListener;
use gravity::protocol::{DataProduct, DirectoryMessage, RegistrationKind};
use gravity::transport::reqrep;
use gravity::{Node, NodeConfig};
use gravity_directory::{DirectoryConfig, DirectoryServer};
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

static NEXT_PORT: AtomicU16 = AtomicU16::new(26000);

/// Reserve a contiguous block of `n` ports for one test (directory bind +
/// its two self-publish channels + however many product ports the scenario
/// needs), so concurrently-running tests never collide.
fn next_port_block(n: u16) -> u16 {
    NEXT_PORT.fetch_add(n, Ordering::SeqCst)
}

async fn spawn_directory(domain: &str, base: u16) -> u16 {
    let config = DirectoryConfig {
        bind_url: format!("tcp://127.0.0.1:{base}"),
        domain: domain.to_string(),
        publishers_channel_port: base + 1,
        domain_details_port: base + 2,
        ..Default::default()
    };
    let server = DirectoryServer::new(config).await.expect("directory init");
    tokio::task::spawn_local(async move {
        if let Err(e) = server.run().await {
            eprintln!("directory exited: {e}");
        }
    });
    // Give the accept loop a moment to bind before any client dials it.
    tokio::time::sleep(Duration::from_millis(30)).await;
    base
}

fn node_config(directory_port: u16, domain: &str) -> NodeConfig {
    NodeConfig {
        service_directory_url: format!("tcp://127.0.0.1:{directory_port}"),
        domain: domain.to_string(),
        network_timeout_ms: 300,
        network_retries: 3,
        ..Default::default()
    }
}

async fn new_node(name: &str, directory_port: u16, domain: &str) -> Node {
    let node = Node::new();
    let code = node
        .init(name, node_config(directory_port, domain), CancellationToken::new())
        .await;
    assert!(code.is_success(), "node {name} failed to init: {code}");
    node
}

/// Scenario 1: single-node echo. A registers `tick`, B subscribes with an
/// empty filter, A publishes one payload, B's listener sees it exactly once.
#[tokio::test]
async fn single_node_echo() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let base = next_port_block(10);
            let directory_port = spawn_directory("Lab1", base).await;

            let node_a = new_node("NodeA", directory_port, "Lab1").await;
            let code = node_a.register_data_product("tick", base + 3, "tcp").await;
            assert_eq!(code, GravityReturnCode::Success);

            let seen = Arc::new(Mutex::new(Vec::new()));
            let seen2 = seen.clone();
            let node_b = new_node("NodeB", directory_port, "Lab1").await;
            let (_handle, code) = node_b
                .subscribe("tick", "", move |product: DataProduct| {
                    seen2.lock().unwrap().push(product);
                })
                .await;
            assert_eq!(code, GravityReturnCode::Success);
            tokio::time::sleep(Duration::from_millis(50)).await;

            node_a.publish("tick", vec![0x01, 0x02], "");
            tokio::time::sleep(Duration::from_millis(100)).await;

            let received = seen.lock().unwrap();
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].body, vec![0x01, 0x02]);
        })
        .await;
}

/// Scenario 2: late subscriber cache replay. A publishes before B ever
/// subscribes; B still gets the cached value as its first message.
#[tokio::test]
async fn late_subscriber_replays_cached_value() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let base = next_port_block(10);
            let directory_port = spawn_directory("Lab1", base).await;

            let node_a = new_node("NodeA", directory_port, "Lab1").await;
            let code = node_a.register_data_product("temp", base + 3, "tcp").await;
            assert_eq!(code, GravityReturnCode::Success);
            node_a.publish("temp", vec![42], "");

            tokio::time::sleep(Duration::from_millis(500)).await;

            let seen = Arc::new(Mutex::new(Vec::new()));
            let seen2 = seen.clone();
            let node_b = new_node("NodeB", directory_port, "Lab1").await;
            let (_handle, code) = node_b
                .subscribe("temp", "", move |product: DataProduct| {
                    seen2.lock().unwrap().push(product);
                })
                .await;
            assert_eq!(code, GravityReturnCode::Success);

            tokio::time::sleep(Duration::from_millis(100)).await;
            let received = seen.lock().unwrap();
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].body, vec![42]);
        })
        .await;
}

/// Scenario 3: duplicate registration is idempotent `SUCCESS` and the
/// directory's list still contains the URL exactly once.
#[tokio::test]
async fn duplicate_registration_does_not_add_a_second_url() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let base = next_port_block(10);
            let directory_port = spawn_directory("Lab1", base).await;

            let node_a = new_node("NodeA", directory_port, "Lab1").await;
            let first = node_a.register_data_product("x", base + 3, "tcp").await;
            let second = node_a.register_data_product("x", base + 3, "tcp").await;
            assert_eq!(first, GravityReturnCode::Success);
            assert_eq!(second, GravityReturnCode::Success);

            let lookup = DirectoryMessage::ComponentLookupRequest {
                lookup_id: "x".into(),
                kind: RegistrationKind::Data,
                domain: None,
            };
            let reply: DirectoryMessage =
                reqrep::request_with_retry(&format!("127.0.0.1:{directory_port}"), &lookup, Duration::from_millis(300), 3)
                    .await
                    .expect("lookup round trip");
            match reply {
                DirectoryMessage::ComponentDataLookupResponse { urls, .. } => assert_eq!(urls.len(), 1),
                other => panic!("unexpected reply: {other:?}"),
            }
        })
        .await;
}

/// Registering, unregistering, then re-registering the same id round-trips
/// cleanly: the unregister actually removes the directory's entry for the
/// URL the node bound, rather than leaving it behind under a URL the node
/// never registered.
#[tokio::test]
async fn unregister_then_reregister_round_trips() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let base = next_port_block(10);
            let directory_port = spawn_directory("Lab1", base).await;
            let node_a = new_node("NodeA", directory_port, "Lab1").await;

            let code = node_a.register_data_product("x", base + 3, "tcp").await;
            assert_eq!(code, GravityReturnCode::Success);
            let code = node_a.unregister_data_product("x").await;
            assert_eq!(code, GravityReturnCode::Success);

            let lookup = DirectoryMessage::ComponentLookupRequest {
                lookup_id: "x".into(),
                kind: RegistrationKind::Data,
                domain: None,
            };
            let reply: DirectoryMessage = reqrep::request_with_retry(
                &format!("127.0.0.1:{directory_port}"),
                &lookup,
                Duration::from_millis(300),
                3,
            )
            .await
            .expect("lookup round trip");
            match reply {
                DirectoryMessage::ComponentDataLookupResponse { urls, .. } => assert!(urls.is_empty()),
                other => panic!("unexpected reply: {other:?}"),
            }

            // Same id, same port: must succeed now that the old entry is gone.
            let code = node_a.register_data_product("x", base + 3, "tcp").await;
            assert_eq!(code, GravityReturnCode::Success);
        })
        .await;
}

/// Scenario 4: service request with retry. A registers a service whose
/// provider stalls every reply past the point where the client has already
/// given up and moved to a fresh attempt, then starts replying promptly; B's
/// request eventually gets a reply from a later retry attempt.
///
/// The provider itself is synchronous (`ServiceProvider: Fn(DataProduct) ->
/// Vec<u8>`), so the stall has to be a blocking `std::thread::sleep` rather
/// than an `.await`; each accepted connection is handled on its own spawned
/// task (see `service_manager.rs`), so a slow reply to one retry attempt
/// doesn't hold up the next one. Needs a multi-thread runtime so that
/// blocking sleep doesn't stall the executor the `LocalSet` and the rest of
/// the test's async machinery share.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn service_request_succeeds_once_the_provider_stops_stalling() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let base = next_port_block(10);
            let directory_port = spawn_directory("Lab1", base).await;

            let node_a = new_node("NodeA", directory_port, "Lab1").await;
            let reachable_after = std::time::Instant::now() + Duration::from_millis(250);
            let code = node_a
                .register_service("add", base + 3, "tcp", move |request: DataProduct| {
                    let now = std::time::Instant::now();
                    if now < reachable_after {
                        std::thread::sleep(reachable_after - now);
                    }
                    request.body
                })
                .await;
            assert_eq!(code, GravityReturnCode::Success);

            let mut requestor_config = node_config(directory_port, "Lab1");
            requestor_config.network_timeout_ms = 100;
            requestor_config.network_retries = 5;
            let node_b = Node::new();
            let code = node_b
                .init("NodeB", requestor_config, CancellationToken::new())
                .await;
            assert!(code.is_success(), "NodeB failed to init: {code}");

            let reply_body = Arc::new(Mutex::new(None));
            let reply_body2 = reply_body.clone();
            let code = node_b
                .request("add", vec![9, 9], "req-4", move |result: gravity::GravityResult<DataProduct>, _id: String| {
                    if let Ok(product) = result {
                        *reply_body2.lock().unwrap() = Some(product.body);
                    }
                })
                .await;
            assert_eq!(code, GravityReturnCode::Success);

            tokio::time::sleep(Duration::from_millis(800)).await;
            assert_eq!(*reply_body.lock().unwrap(), Some(vec![9, 9]));
        })
        .await;
}

struct CountingHeartbeatListener {
    missed: Arc<AtomicU32>,
    received: Arc<AtomicU32>,
}

impl HeartbeatListener for CountingHeartbeatListener {
    fn first_heartbeat(&self, _component_id: &str) {}
    fn received_heartbeat(&self, _component_id: &str) {
        self.received.fetch_add(1, Ordering::SeqCst);
    }
    fn missed_heartbeat(&self, _component_id: &str, _microseconds_since_last: u64) {
        self.missed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scenario 5: heartbeat timeout. B watches A; once A stops publishing for
/// longer than the watch's `max_inter_arrival`, B sees exactly one
/// `missedHeartbeat`. When A resumes, B sees `receivedHeartbeat`.
///
/// A's heartbeat publisher is registered (so the channel is real, over real
/// sockets and the real directory) but ticks on an interval far longer than
/// the test itself; the individual beats are driven by hand so the test
/// controls their exact timing instead of racing a live ticker.
#[tokio::test]
async fn missed_heartbeat_then_recovery() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let base = next_port_block(10);
            let directory_port = spawn_directory("Lab1", base).await;

            let node_a = new_node("NodeA", directory_port, "Lab1").await;
            let code = node_a.start_heartbeat(Duration::from_secs(10), base + 3).await;
            assert_eq!(code, GravityReturnCode::Success);

            let missed = Arc::new(AtomicU32::new(0));
            let received = Arc::new(AtomicU32::new(0));
            let node_b = new_node("NodeB", directory_port, "Lab1").await;
            let code = node_b
                .register_heartbeat_listener(
                    "NodeA",
                    Duration::from_millis(150),
                    CountingHeartbeatListener { missed: missed.clone(), received: received.clone() },
                )
                .await;
            assert_eq!(code, GravityReturnCode::Success);
            tokio::time::sleep(Duration::from_millis(50)).await;

            node_a.publish("NodeA", Vec::new(), "");
            tokio::time::sleep(Duration::from_millis(400)).await;
            assert_eq!(missed.load(Ordering::SeqCst), 1);

            node_a.publish("NodeA", Vec::new(), "");
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(received.load(Ordering::SeqCst), 1);
        })
        .await;
}

/// Scenario 6: obsolete purge. A component registers `x` at some URL and
/// then, without ever unregistering, a second component registers `y` at
/// that very same URL; the directory drops the stale `x` entry since one URL
/// cannot name two data products. Driven with raw registration messages
/// against the directory directly (as scenario 3 does for its lookup),
/// since the property under test is the directory's own bookkeeping, not
/// anything reachable by actually rebinding the OS-level port A held.
#[tokio::test]
async fn reusing_a_dead_peers_url_purges_its_stale_registration() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let base = next_port_block(10);
            let directory_port = spawn_directory("Lab1", base).await;
            let directory_addr = format!("127.0.0.1:{directory_port}");
            let shared_url = format!("tcp://127.0.0.1:{}", base + 3);

            let register_x = DirectoryMessage::ServiceDirectoryRegistration {
                id: "x".into(),
                url: shared_url.clone(),
                kind: RegistrationKind::Data,
                component_id: "NodeA".into(),
                domain: Some("Lab1".into()),
            };
            let _: DirectoryMessage =
                reqrep::request_with_retry(&directory_addr, &register_x, Duration::from_millis(300), 3)
                    .await
                    .expect("register x");

            // A "dies" here: it never sends ServiceDirectoryUnregistration.
            let register_y = DirectoryMessage::ServiceDirectoryRegistration {
                id: "y".into(),
                url: shared_url,
                kind: RegistrationKind::Data,
                component_id: "NodeA2".into(),
                domain: Some("Lab1".into()),
            };
            let _: DirectoryMessage =
                reqrep::request_with_retry(&directory_addr, &register_y, Duration::from_millis(300), 3)
                    .await
                    .expect("register y");

            let lookup = DirectoryMessage::ComponentLookupRequest {
                lookup_id: "x".into(),
                kind: RegistrationKind::Data,
                domain: None,
            };
            let reply: DirectoryMessage =
                reqrep::request_with_retry(&directory_addr, &lookup, Duration::from_millis(300), 3)
                    .await
                    .expect("lookup round trip");
            match reply {
                DirectoryMessage::ComponentDataLookupResponse { urls, .. } => assert!(urls.is_empty()),
                other => panic!("unexpected reply: {other:?}"),
            }
        })
        .await;
}
