//! The Node Facade: the stable public surface applications call into.
//!
//! Translates calls into control messages for the four managers and into
//! REQ/REP exchanges with the directory. Grounded on `GravityNode.cpp` end
//! to end: the manager-spawn-and-readiness-barrier shape of `init`, the
//! retry/error-code mapping of `sendRequestToServiceProvider`, and the
//! UDP-probe technique of `getIP`.

use crate::config::NodeConfig;
use crate::error::{GravityError, GravityResult, GravityReturnCode};
use crate::node::heartbeat::{HeartbeatListenerManager, HeartbeatPublisher};
use crate::node::listener::{DataListener, HeartbeatListener, ListenerHandle, ListenerRegistry, ServiceProvider};
use crate::node::publish_manager::{self, PublishManagerHandle};
use crate::node::request_manager::{self, RequestManagerHandle};
use crate::node::service_manager::{self, ServiceManagerHandle};
use crate::node::subscription_manager::{self, SubscriptionManagerHandle};
use crate::protocol::{DataProduct, DirectoryMessage, RegistrationKind};
use crate::transport::reqrep;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

struct Inner {
    component_id: String,
    config: NodeConfig,
    local_ip: std::net::IpAddr,
    registry: Arc<ListenerRegistry>,
    publish: PublishManagerHandle,
    subscription: SubscriptionManagerHandle,
    request_mgr: RequestManagerHandle,
    service: ServiceManagerHandle,
    heartbeat_watch: Arc<HeartbeatListenerManager>,
    heartbeat_publisher: AsyncMutex<Option<HeartbeatPublisher>>,
    heartbeat_started: AtomicBool,
    /// Kept alive for as long as the node runs so the scanner's kill
    /// channel never observes a closed sender; dropped (and the scanner
    /// along with it) only when the node itself is torn down.
    heartbeat_scanner: AsyncMutex<Option<mpsc::UnboundedSender<()>>>,
    /// URL each registered data product / service was bound to, so
    /// `unregister_data_product`/`unregister_service` can send the directory
    /// the same URL it was registered under instead of re-deriving it from
    /// arguments the caller no longer passes.
    data_product_urls: SyncMutex<HashMap<String, String>>,
    service_urls: SyncMutex<HashMap<String, String>>,
}

/// A node in the messaging fabric. Construct with [`Node::new`], then call
/// [`Node::init`] once before using any other method.
pub struct Node {
    inner: SyncMutex<Option<Arc<Inner>>>,
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    pub fn new() -> Self {
        Self {
            inner: SyncMutex::new(None),
        }
    }

    fn inner(&self) -> GravityResult<Arc<Inner>> {
        self.inner
            .lock()
            .clone()
            .ok_or(GravityError::RegistrationConflict("node not initialized".into()))
    }

    /// Create the shared runtime, spawn every manager, and block until each
    /// has signaled readiness or `cancellation` fires. Idempotent-safe:
    /// calling this again on an already-initialized node returns
    /// `ALREADY_INITIALIZED` without touching the live runtime.
    ///
    /// `cancellation` stands in for the signal traps the original installs
    /// around its init barrier: the caller is expected to wire
    /// `tokio::signal::ctrl_c()`/`SIGTERM` into the token at the
    /// process-entry binary (see `gravity-directory`'s `main.rs`) and pass
    /// it down here, rather than this library touching process-wide signal
    /// state itself. If the token fires before every manager reports ready,
    /// `init` returns `INTERRUPTED` without installing a live node.
    pub async fn init(
        &self,
        component_id: impl Into<String>,
        config: NodeConfig,
        cancellation: CancellationToken,
    ) -> GravityReturnCode {
        if self.inner.lock().is_some() {
            return GravityReturnCode::AlreadyInitialized;
        }

        let component_id = component_id.into();
        let local_ip = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return GravityReturnCode::Interrupted,
            result = resolve_local_ip(&config.directory_url()) => match result {
                Ok(ip) => ip,
                Err(e) => {
                    tracing::error!(error = %e, "failed to resolve local ip via directory probe");
                    return GravityReturnCode::Failure;
                }
            },
        };

        let registry = Arc::new(ListenerRegistry::new());
        let (ready_tx, mut ready_rx) = tokio::sync::mpsc::unbounded_channel();

        let subscription = subscription_manager::spawn(registry.clone(), ready_tx.clone());
        let publish = publish_manager::spawn(ready_tx.clone());
        let request_mgr = request_manager::spawn(
            registry.clone(),
            config.network_timeout(),
            config.network_retries,
            ready_tx.clone(),
        );
        let service = service_manager::spawn(registry.clone(), ready_tx.clone());
        drop(ready_tx);

        let expected = ["SubscriptionManager", "PublishManager", "RequestManager", "ServiceManager"];
        let mut seen = 0;
        while seen < expected.len() {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    tracing::info!("init interrupted before the readiness barrier completed");
                    return GravityReturnCode::Interrupted;
                }
                result = tokio::time::timeout(Duration::from_secs(5), ready_rx.recv()) => match result {
                    Ok(Some(_name)) => seen += 1,
                    _ => {
                        tracing::error!("timed out waiting for manager readiness during init");
                        return GravityReturnCode::Failure;
                    }
                },
            }
        }

        let heartbeat_watch = HeartbeatListenerManager::new(registry.clone());

        let inner = Arc::new(Inner {
            component_id,
            config,
            local_ip,
            registry,
            publish,
            subscription,
            request_mgr,
            service,
            heartbeat_watch,
            heartbeat_publisher: AsyncMutex::new(None),
            heartbeat_started: AtomicBool::new(false),
            heartbeat_scanner: AsyncMutex::new(None),
            data_product_urls: SyncMutex::new(HashMap::new()),
            service_urls: SyncMutex::new(HashMap::new()),
        });
        *self.inner.lock() = Some(inner);
        GravityReturnCode::Success
    }

    pub fn registry(&self) -> GravityResult<Arc<ListenerRegistry>> {
        Ok(self.inner()?.registry.clone())
    }

    /// Bind a publishing URL on `port` over `transport` (e.g. `"tcp"`) and
    /// register it with the directory.
    pub async fn register_data_product(&self, id: &str, port: u16, transport: &str) -> GravityReturnCode {
        match self.try_register_data_product(id, port, transport).await {
            Ok(()) => GravityReturnCode::Success,
            Err(e) => e.code(),
        }
    }

    async fn try_register_data_product(&self, id: &str, port: u16, transport: &str) -> GravityResult<()> {
        let inner = self.inner()?;
        let url = format!("{transport}://{}:{port}", inner.local_ip);
        inner.publish.register(id.to_string(), url.clone()).await?;
        inner.data_product_urls.lock().insert(id.to_string(), url.clone());

        let request = DirectoryMessage::ServiceDirectoryRegistration {
            id: id.to_string(),
            url,
            kind: RegistrationKind::Data,
            component_id: inner.component_id.clone(),
            domain: Some(inner.config.domain.clone()),
        };
        directory_mutate(&inner, &request).await?;
        Ok(())
    }

    pub async fn unregister_data_product(&self, id: &str) -> GravityReturnCode {
        match self.try_unregister_data_product(id).await {
            Ok(()) => GravityReturnCode::Success,
            Err(e) => e.code(),
        }
    }

    async fn try_unregister_data_product(&self, id: &str) -> GravityResult<()> {
        let inner = self.inner()?;
        inner.publish.unregister(id.to_string());
        let url = inner.data_product_urls.lock().remove(id).unwrap_or_default();

        let request = DirectoryMessage::ServiceDirectoryUnregistration {
            id: id.to_string(),
            url,
            kind: RegistrationKind::Data,
        };
        directory_mutate(&inner, &request).await?;
        Ok(())
    }

    /// Look up `id`'s publishers and subscribe to each, filtering on
    /// `filter`. Returns the listener handle (so the caller can later call
    /// [`Node::unsubscribe`]) and the resulting return code.
    pub async fn subscribe(
        &self,
        id: &str,
        filter: &str,
        listener: impl DataListener,
    ) -> (Option<ListenerHandle>, GravityReturnCode) {
        let inner = match self.inner() {
            Ok(inner) => inner,
            Err(e) => return (None, e.code()),
        };
        let lookup = DirectoryMessage::ComponentLookupRequest {
            lookup_id: id.to_string(),
            kind: RegistrationKind::Data,
            domain: None,
        };
        let reply = match directory_round_trip(&inner, &lookup).await {
            Ok(reply) => reply,
            Err(e) => return (None, e.code()),
        };
        let urls = match reply {
            DirectoryMessage::ComponentDataLookupResponse { urls, .. } => urls,
            _ => return (None, GravityReturnCode::LinkError),
        };
        if urls.is_empty() {
            return (None, GravityReturnCode::NoSuchDataProduct);
        }

        let handle = inner.registry.register_data_listener(listener);
        for url in urls {
            inner
                .subscription
                .subscribe(id.to_string(), url, filter.to_string(), handle);
        }
        (Some(handle), GravityReturnCode::Success)
    }

    pub fn unsubscribe(&self, id: &str, filter: &str, listener: ListenerHandle) -> GravityReturnCode {
        let inner = match self.inner() {
            Ok(inner) => inner,
            Err(e) => return e.code(),
        };
        inner
            .subscription
            .unsubscribe(id.to_string(), filter.to_string(), listener);
        inner.registry.unregister(listener);
        GravityReturnCode::Success
    }

    /// Stamp `body` as a data product under `id` with the current time and
    /// forward it to the Publish Manager.
    pub fn publish(&self, id: &str, body: Vec<u8>, filter_text: &str) -> GravityReturnCode {
        let inner = match self.inner() {
            Ok(inner) => inner,
            Err(e) => return e.code(),
        };
        inner
            .publish
            .publish(filter_text.to_string(), DataProduct::new(id, body));
        GravityReturnCode::Success
    }

    pub async fn register_service(
        &self,
        id: &str,
        port: u16,
        transport: &str,
        provider: impl ServiceProvider,
    ) -> GravityReturnCode {
        match self.try_register_service(id, port, transport, provider).await {
            Ok(()) => GravityReturnCode::Success,
            Err(e) => e.code(),
        }
    }

    async fn try_register_service(
        &self,
        id: &str,
        port: u16,
        transport: &str,
        provider: impl ServiceProvider,
    ) -> GravityResult<()> {
        let inner = self.inner()?;
        let url = format!("{transport}://{}:{port}", inner.local_ip);
        let handle = inner.registry.register_service_provider(provider);
        inner.service.register(id.to_string(), url.clone(), handle).await?;
        inner.service_urls.lock().insert(id.to_string(), url.clone());

        let request = DirectoryMessage::ServiceDirectoryRegistration {
            id: id.to_string(),
            url,
            kind: RegistrationKind::Service,
            component_id: inner.component_id.clone(),
            domain: Some(inner.config.domain.clone()),
        };
        directory_mutate(&inner, &request).await?;
        Ok(())
    }

    pub async fn unregister_service(&self, id: &str) -> GravityReturnCode {
        let inner = match self.inner() {
            Ok(inner) => inner,
            Err(e) => return e.code(),
        };
        inner.service.unregister(id.to_string());
        let url = inner.service_urls.lock().remove(id).unwrap_or_default();
        let request = DirectoryMessage::ServiceDirectoryUnregistration {
            id: id.to_string(),
            url,
            kind: RegistrationKind::Service,
        };
        match directory_mutate(&inner, &request).await {
            Ok(()) => GravityReturnCode::Success,
            Err(e) => e.code(),
        }
    }

    /// Look up `service_id`'s provider and forward `payload` to the Request
    /// Manager. `requestor` is invoked with the reply (or a failure code)
    /// once the bounded retry budget completes.
    pub async fn request(
        &self,
        service_id: &str,
        payload: Vec<u8>,
        request_id: &str,
        requestor: impl crate::node::listener::Requestor,
    ) -> GravityReturnCode {
        let inner = match self.inner() {
            Ok(inner) => inner,
            Err(e) => return e.code(),
        };
        let lookup = DirectoryMessage::ComponentLookupRequest {
            lookup_id: service_id.to_string(),
            kind: RegistrationKind::Service,
            domain: None,
        };
        let reply = match directory_round_trip(&inner, &lookup).await {
            Ok(reply) => reply,
            Err(e) => return e.code(),
        };
        let url = match reply {
            DirectoryMessage::ComponentServiceLookupResponse { url: Some(url), .. } => url,
            DirectoryMessage::ComponentServiceLookupResponse { url: None, .. } => {
                return GravityReturnCode::NoServiceProvider
            }
            _ => return GravityReturnCode::LinkError,
        };

        let handle = inner.registry.register_requestor(requestor);
        inner
            .request_mgr
            .request(service_id.to_string(), url, payload, handle, request_id.to_string());
        GravityReturnCode::Success
    }

    /// Register a heartbeat data product bound on `port` and start
    /// publishing on it every `interval`. Honors `port` rather than
    /// hard-coding it (see DESIGN.md).
    pub async fn start_heartbeat(&self, interval: Duration, port: u16) -> GravityReturnCode {
        let inner = match self.inner() {
            Ok(inner) => inner,
            Err(e) => return e.code(),
        };
        if inner.heartbeat_started.swap(true, Ordering::SeqCst) {
            return GravityReturnCode::AlreadyStarted;
        }
        let code = self.register_data_product(&inner.component_id, port, "tcp").await;
        if !code.is_success() {
            inner.heartbeat_started.store(false, Ordering::SeqCst);
            return code;
        }
        let publisher = HeartbeatPublisher::spawn(inner.component_id.clone(), interval, inner.publish.clone());
        *inner.heartbeat_publisher.lock().await = Some(publisher);
        GravityReturnCode::Success
    }

    /// Subscribe to `component_id`'s heartbeat stream and watch it for
    /// gaps longer than `max_inter_arrival`.
    pub async fn register_heartbeat_listener(
        &self,
        component_id: &str,
        max_inter_arrival: Duration,
        listener: impl HeartbeatListener,
    ) -> GravityReturnCode {
        let inner = match self.inner() {
            Ok(inner) => inner,
            Err(e) => return e.code(),
        };
        let handle = inner.registry.register_heartbeat_listener(listener);
        inner.heartbeat_watch.watch(component_id.to_string(), max_inter_arrival, handle).await;

        let watch = inner.heartbeat_watch.clone();
        let component = component_id.to_string();
        let (_sub_handle, code) = self
            .subscribe(component_id, "", move |_product: DataProduct| {
                let watch = watch.clone();
                let component = component.clone();
                tokio::spawn(async move { watch.on_heartbeat(&component).await });
            })
            .await;
        if code.is_success() {
            let mut scanner = inner.heartbeat_scanner.lock().await;
            if scanner.is_none() {
                let (tx, rx) = mpsc::unbounded_channel();
                inner.heartbeat_watch.clone().run_scanner(max_inter_arrival, rx);
                *scanner = Some(tx);
            }
        }
        code
    }
}

async fn directory_round_trip(inner: &Inner, request: &DirectoryMessage) -> GravityResult<DirectoryMessage> {
    reqrep::request_with_retry(
        &inner.config.directory_url(),
        request,
        inner.config.network_timeout(),
        inner.config.network_retries,
    )
    .await
}

/// Round-trip a registration/unregistration and fold the directory's
/// `ServiceDirectoryResponse` return code into the result.
async fn directory_mutate(inner: &Inner, request: &DirectoryMessage) -> GravityResult<()> {
    match directory_round_trip(inner, request).await? {
        DirectoryMessage::ServiceDirectoryResponse {
            return_code: crate::protocol::DirectoryReturnCode::Success,
            ..
        } => Ok(()),
        DirectoryMessage::ServiceDirectoryResponse { return_code, .. } => {
            Err(GravityError::Directory(return_code))
        }
        other => Err(GravityError::BadReply(other.to_string())),
    }
}

/// Resolve this process's local IP by opening a UDP socket toward the
/// directory host and reading the bound source address — the same
/// technique `GravityNode::getIP` uses.
async fn resolve_local_ip(directory_url: &str) -> std::io::Result<std::net::IpAddr> {
    let target = reqrep::strip_scheme(directory_url).replace('*', "127.0.0.1");
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(target).await?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_a_loopback_local_ip() {
        let ip = resolve_local_ip("tcp://127.0.0.1:5555").await.unwrap();
        let _ = ip;
    }

    #[tokio::test]
    async fn operations_before_init_report_failure() {
        let node = Node::new();
        let code = node.unregister_data_product("x").await;
        assert!(!code.is_success());
    }

    #[tokio::test]
    async fn cancelled_token_interrupts_init_before_the_readiness_barrier() {
        let node = Node::new();
        let token = CancellationToken::new();
        token.cancel();
        let code = node
            .init("c", crate::config::NodeConfig::default(), token)
            .await;
        assert_eq!(code, GravityReturnCode::Interrupted);
        // A cancelled init must not leave a live node behind.
        assert!(node.inner.lock().is_none());
    }
}
