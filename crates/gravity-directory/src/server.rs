//! Directory Server: the single-threaded accept/process loop.
//!
//! Grounded on `hdds-discovery-server/src/server.rs`'s accept-loop shape,
//! deliberately stripped of its per-connection `tokio::spawn` + `RwLock`
//! concurrency (see DESIGN.md's concurrency-model deviation): this loop
//! accepts one connection, reads and answers exactly one request including
//! every mutation side effect, closes the connection, and only then accepts
//! the next. `DirectoryState` lives in a plain `RefCell` because nothing
//! but this loop ever touches it.

use crate::beacon;
use crate::config::DirectoryConfig;
use crate::registry::{DirectoryState, PendingPublish};
use crate::synchronizer::{self, SyncCommand};
use gravity::error::GravityResult;
use gravity::protocol::{DirectoryMessage, DirectoryReturnCode, ProductChange, RegistrationKind};
use gravity::transport::Framed;
use gravity::{Node, NodeConfig};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct RegisteredPublishersUpdate {
    product_id: String,
    urls: Vec<String>,
}

pub struct DirectoryServer {
    config: DirectoryConfig,
    state: RefCell<DirectoryState>,
    node: Arc<Node>,
}

impl DirectoryServer {
    /// Build the server and bring up its embedded Node Facade (used only to
    /// publish `RegisteredPublishers` / `ServiceDirectory_DomainDetails`
    /// through the ordinary registration path, per `ServiceDirectory.cpp`).
    /// The embedded node's directory round trips don't resolve until
    /// [`run`] is accepting connections; that's the bootstrap-ordering
    /// subtlety §4.8 describes.
    pub async fn new(config: DirectoryConfig) -> GravityResult<Self> {
        config
            .validate()
            .map_err(|e| gravity::GravityError::BadReply(e.to_string()))?;

        let node_config = NodeConfig {
            service_directory_url: config.loopback_url(),
            domain: config.domain.clone(),
            network_timeout_ms: config.network_timeout_ms,
            network_retries: config.network_retries,
            ..Default::default()
        };

        let node = Node::new();
        let code = node
            .init("ServiceDirectory", node_config, CancellationToken::new())
            .await;
        if !code.is_success() {
            return Err(gravity::GravityError::BadReply(format!(
                "embedded node init failed: {code}"
            )));
        }

        Ok(Self {
            state: RefCell::new(DirectoryState::new(config.domain.clone())),
            node: Arc::new(node),
            config,
        })
    }

    pub async fn run(&self) -> GravityResult<()> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        info!(addr = %self.config.bind_url, domain = %self.config.domain, "directory listening");

        self.spawn_self_registration();

        let (sync_tx, mut sync_rx) = mpsc::unbounded_channel::<SyncCommand>();
        if self.config.broadcast_enabled {
            self.spawn_beacon_pair(sync_tx);
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if let Err(e) = self.handle_connection(stream).await {
                                warn!(%peer, error = %e, "connection error");
                            }
                        }
                        Err(e) => warn!(error = %e, "accept error"),
                    }
                }
                Some(cmd) = sync_rx.recv() => {
                    self.handle_sync_command(cmd).await;
                }
            }
        }
    }

    fn spawn_self_registration(&self) {
        let node = self.node.clone();
        let publishers_port = self.config.publishers_channel_port;
        let domain_details_port = self.config.domain_details_port;
        tokio::spawn(async move {
            let code = node
                .register_data_product("RegisteredPublishers", publishers_port, "tcp")
                .await;
            if !code.is_success() {
                warn!(%code, "directory failed to self-register RegisteredPublishers channel");
                return;
            }
            let code = node
                .register_data_product("ServiceDirectory_DomainDetails", domain_details_port, "tcp")
                .await;
            if !code.is_success() {
                warn!(%code, "directory failed to self-register domain-details channel");
            }
        });
    }

    fn spawn_beacon_pair(&self, sync_tx: mpsc::UnboundedSender<SyncCommand>) {
        beacon::spawn_broadcaster(
            self.config.domain.clone(),
            self.config.bind_url.clone(),
            self.config.broadcast_port,
            self.config.broadcast_rate(),
        );
        let valid_domains: HashSet<String> = self.config.domain_sync_list.iter().cloned().collect();
        beacon::spawn_receiver(
            self.config.broadcast_port,
            self.config.domain.clone(),
            valid_domains,
            self.config.broadcast_rate() * 3,
            sync_tx,
        );
    }

    async fn handle_sync_command(&self, cmd: SyncCommand) {
        match cmd {
            SyncCommand::Add { domain, url } => {
                let snapshot = synchronizer::pull_domain_snapshot(
                    &url,
                    &domain,
                    self.config.network_timeout(),
                    self.config.network_retries,
                )
                .await;
                if let Some(snapshot) = snapshot {
                    debug!(%domain, %url, "merging peer domain snapshot");
                    self.state.borrow_mut().merge_foreign_domain(snapshot);
                }
            }
            SyncCommand::Remove { domain } => {
                debug!(%domain, "purging peer domain");
                self.state.borrow_mut().remove_foreign_domain(&domain);
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> GravityResult<()> {
        let mut framed = Framed::new(stream);
        let request: DirectoryMessage = framed.recv().await?;
        let response = self.process(request).await;
        framed.send(&response).await
    }

    async fn process(&self, request: DirectoryMessage) -> DirectoryMessage {
        match request {
            DirectoryMessage::ComponentLookupRequest { lookup_id, kind, domain } => {
                let domain = domain.unwrap_or_else(|| self.state.borrow().own_domain().to_string());
                match kind {
                    RegistrationKind::Data => {
                        let urls = self.state.borrow().lookup_data(&domain, &lookup_id);
                        DirectoryMessage::ComponentDataLookupResponse { lookup_id, domain, urls }
                    }
                    RegistrationKind::Service => {
                        let url = self.state.borrow().lookup_service(&domain, &lookup_id);
                        DirectoryMessage::ComponentServiceLookupResponse { lookup_id, domain, url }
                    }
                }
            }

            DirectoryMessage::ServiceDirectoryRegistration { id, url, kind, component_id, domain } => {
                let domain = domain.unwrap_or_else(|| self.state.borrow().own_domain().to_string());
                let outcome = self
                    .state
                    .borrow_mut()
                    .register(&domain, kind, &id, &url, &component_id);

                if id == "RegisteredPublishers" && domain.as_str() == self.state.borrow().own_domain() {
                    self.state.borrow_mut().mark_publishers_channel_ready();
                }

                self.apply_side_effects(&domain, &id, outcome.change, outcome.purged);
                DirectoryMessage::ServiceDirectoryResponse { id, return_code: outcome.return_code }
            }

            DirectoryMessage::ServiceDirectoryUnregistration { id, url, kind } => {
                let domain = self.state.borrow().own_domain().to_string();
                let (return_code, change) = self.state.borrow_mut().unregister(&domain, kind, &id, &url);
                if let Some(change) = change {
                    self.apply_side_effects(&domain, &id, change, Vec::new());
                }
                DirectoryMessage::ServiceDirectoryResponse { id, return_code }
            }

            DirectoryMessage::GetDomainRequest => DirectoryMessage::GetDomainResponse {
                domain: self.state.borrow().own_domain().to_string(),
            },

            DirectoryMessage::GetProvidersRequest => DirectoryMessage::GetProvidersResponse {
                domains: self.state.borrow().all_domains_snapshot(),
            },

            other => {
                warn!(request = %other, "directory received an unexpected request kind");
                DirectoryMessage::ServiceDirectoryResponse {
                    id: String::new(),
                    return_code: DirectoryReturnCode::NotRegistered,
                }
            }
        }
    }

    /// Publish `RegisteredPublishers`/domain-details updates for `id` and
    /// every purged id, live if the channel is ready, queued otherwise.
    fn apply_side_effects(
        &self,
        domain: &str,
        id: &str,
        change: ProductChange,
        purged: Vec<ProductChange>,
    ) {
        let ready = self.state.borrow().publishers_channel_ready();
        if ready {
            // Anything queued before readiness logically happened first, so
            // it goes out before this mutation's own update.
            let pending = self.state.borrow_mut().drain_pending();
            self.publish_pending(pending);

            let urls = self.state.borrow().lookup_data(domain, id);
            self.publish_registered_publishers(id, urls);
            self.publish_domain_details(domain, change);
            for p in purged {
                let urls = self.state.borrow().lookup_data(domain, &p.product_id);
                self.publish_registered_publishers(&p.product_id, urls);
                self.publish_domain_details(domain, p);
            }
        } else {
            let urls = self.state.borrow().lookup_data(domain, id);
            self.state.borrow_mut().queue_update(PendingPublish::RegisteredPublishers {
                product_id: id.to_string(),
                urls,
            });
            self.state.borrow_mut().queue_update(PendingPublish::DomainDetails {
                domain: domain.to_string(),
                change,
            });
            for p in purged {
                let urls = self.state.borrow().lookup_data(domain, &p.product_id);
                self.state.borrow_mut().queue_update(PendingPublish::RegisteredPublishers {
                    product_id: p.product_id.clone(),
                    urls,
                });
                self.state.borrow_mut().queue_update(PendingPublish::DomainDetails {
                    domain: domain.to_string(),
                    change: p,
                });
            }
        }
    }

    fn publish_pending(&self, pending: Vec<PendingPublish>) {
        for update in pending {
            match update {
                PendingPublish::RegisteredPublishers { product_id, urls } => {
                    self.publish_registered_publishers(&product_id, urls);
                }
                PendingPublish::DomainDetails { domain, change } => {
                    self.publish_domain_details(&domain, change);
                }
            }
        }
    }

    fn publish_registered_publishers(&self, product_id: &str, urls: Vec<String>) {
        let update = RegisteredPublishersUpdate { product_id: product_id.to_string(), urls };
        match serde_json::to_vec(&update) {
            Ok(body) => {
                self.node.publish("RegisteredPublishers", body, "");
            }
            Err(e) => warn!(error = %e, "failed to serialize RegisteredPublishers update"),
        }
    }

    fn publish_domain_details(&self, domain: &str, change: ProductChange) {
        let mut snapshot = self.state.borrow().domain_snapshot(domain);
        snapshot.change = Some(change);
        match serde_json::to_vec(&snapshot) {
            Ok(body) => {
                self.node.publish("ServiceDirectory_DomainDetails", body, "");
            }
            Err(e) => warn!(error = %e, "failed to serialize domain-details snapshot"),
        }
    }
}
