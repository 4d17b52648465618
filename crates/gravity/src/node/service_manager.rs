//! Service Manager: owns one REP-shaped listener per registered service,
//! dispatching each incoming request synchronously to the registered
//! provider and writing back its reply.
//!
//! Grounded on the provider side of `GravityNode::registerService`/
//! `request`; registration and unregistration are control commands
//! analogous to the Publish Manager's (SPEC_FULL.md §4.5).

use crate::error::{GravityError, GravityResult};
use crate::node::listener::{ListenerHandle, ListenerRegistry};
use crate::protocol::DataProduct;
use crate::transport::Framed;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

pub enum Command {
    Register {
        service_id: String,
        url: String,
        provider: ListenerHandle,
        reply: oneshot::Sender<GravityResult<()>>,
    },
    Unregister {
        service_id: String,
    },
    Kill,
}

#[derive(Clone)]
pub struct ServiceManagerHandle {
    control: mpsc::UnboundedSender<Command>,
}

impl ServiceManagerHandle {
    pub async fn register(
        &self,
        service_id: String,
        url: String,
        provider: ListenerHandle,
    ) -> GravityResult<()> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Command::Register {
                service_id,
                url,
                provider,
                reply: tx,
            })
            .map_err(|_| gone())?;
        rx.await.map_err(|_| gone())?
    }

    pub fn unregister(&self, service_id: String) {
        let _ = self.control.send(Command::Unregister { service_id });
    }

    pub fn kill(&self) {
        let _ = self.control.send(Command::Kill);
    }
}

fn gone() -> GravityError {
    GravityError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "service manager is gone",
    ))
}

struct ServiceState {
    shutdown: oneshot::Sender<()>,
}

pub fn spawn(
    registry: Arc<ListenerRegistry>,
    ready_tx: mpsc::UnboundedSender<&'static str>,
) -> ServiceManagerHandle {
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Command>();

    tokio::spawn(async move {
        let _ = ready_tx.send("ServiceManager");
        let mut services: HashMap<String, ServiceState> = HashMap::new();

        while let Some(cmd) = control_rx.recv().await {
            match cmd {
                Command::Register { service_id, url, provider, reply } => {
                    let result =
                        register_service(&service_id, &url, provider, registry.clone(), &mut services)
                            .await;
                    let _ = reply.send(result);
                }
                Command::Unregister { service_id } => {
                    if let Some(state) = services.remove(&service_id) {
                        let _ = state.shutdown.send(());
                    }
                }
                Command::Kill => break,
            }
        }
        tracing::debug!("service manager exiting, {} services torn down", services.len());
    });

    ServiceManagerHandle { control: control_tx }
}

async fn register_service(
    service_id: &str,
    url: &str,
    provider: ListenerHandle,
    registry: Arc<ListenerRegistry>,
    services: &mut HashMap<String, ServiceState>,
) -> GravityResult<()> {
    let addr = crate::transport::reqrep::strip_scheme(url);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|_| GravityError::BindConflict(url.to_string()))?;

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                accepted = listener.accept() => {
                    let Ok((stream, _addr)) = accepted else { break };
                    let registry = registry.clone();
                    tokio::spawn(handle_connection(stream, provider, registry));
                }
            }
        }
    });

    services.insert(service_id.to_string(), ServiceState { shutdown: shutdown_tx });
    Ok(())
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    provider: ListenerHandle,
    registry: Arc<ListenerRegistry>,
) {
    let mut framed = Framed::new(stream);
    loop {
        let request: DataProduct = match framed.recv().await {
            Ok(r) => r,
            Err(_) => break,
        };
        let reply_body = registry
            .invoke_service(provider, request.clone())
            .unwrap_or_default();
        let reply = DataProduct::new(request.data_product_id, reply_body);
        if framed.send(&reply).await.is_err() {
            break;
        }
    }
}
