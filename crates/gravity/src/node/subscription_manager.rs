//! Subscription Manager: owns one SUB-shaped connection per distinct
//! connected URL, and dispatches received data products to every listener
//! whose (data-product-id, filter) matches.
//!
//! Grounded on `GravityNode::subscribe`'s URL-keyed subscribe command and
//! SPEC_FULL.md §4.2's filter-prefix matching rule.

use crate::node::listener::{ListenerHandle, ListenerRegistry};
use crate::protocol::DataProduct;
use crate::transport::pubsub::{self, PublishFrame};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

struct Binding {
    data_product_id: String,
    filter: String,
    listener: ListenerHandle,
}

pub enum Command {
    Subscribe {
        data_product_id: String,
        url: String,
        filter: String,
        listener: ListenerHandle,
    },
    Unsubscribe {
        data_product_id: String,
        filter: String,
        listener: ListenerHandle,
    },
    Kill,
}

#[derive(Clone)]
pub struct SubscriptionManagerHandle {
    control: mpsc::UnboundedSender<Command>,
}

impl SubscriptionManagerHandle {
    pub fn subscribe(&self, data_product_id: String, url: String, filter: String, listener: ListenerHandle) {
        let _ = self.control.send(Command::Subscribe {
            data_product_id,
            url,
            filter,
            listener,
        });
    }

    pub fn unsubscribe(&self, data_product_id: String, filter: String, listener: ListenerHandle) {
        let _ = self.control.send(Command::Unsubscribe {
            data_product_id,
            filter,
            listener,
        });
    }

    pub fn kill(&self) {
        let _ = self.control.send(Command::Kill);
    }
}

pub fn spawn(
    registry: Arc<ListenerRegistry>,
    ready_tx: mpsc::UnboundedSender<&'static str>,
) -> SubscriptionManagerHandle {
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Command>();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<(String, PublishFrame)>();

    tokio::spawn(async move {
        let _ = ready_tx.send("SubscriptionManager");
        // url -> bindings currently attached to it.
        let mut bindings_by_url: HashMap<String, Vec<Binding>> = HashMap::new();

        loop {
            tokio::select! {
                cmd = control_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        Command::Subscribe { data_product_id, url, filter, listener } => {
                            if !bindings_by_url.contains_key(&url) {
                                if pubsub::connect_subscriber(&url, frame_tx.clone()).await.is_err() {
                                    tracing::warn!(%url, "subscription manager could not connect");
                                    continue;
                                }
                                bindings_by_url.insert(url.clone(), Vec::new());
                            }
                            bindings_by_url.get_mut(&url).unwrap().push(Binding {
                                data_product_id,
                                filter,
                                listener,
                            });
                        }
                        Command::Unsubscribe { data_product_id, filter, listener } => {
                            for bindings in bindings_by_url.values_mut() {
                                bindings.retain(|b| {
                                    !(b.data_product_id == data_product_id
                                        && b.filter == filter
                                        && b.listener == listener)
                                });
                            }
                            bindings_by_url.retain(|_, bindings| !bindings.is_empty());
                        }
                        Command::Kill => break,
                    }
                }
                frame = frame_rx.recv() => {
                    let Some((url, frame)) = frame else { continue };
                    dispatch(&registry, &bindings_by_url, &url, frame);
                }
            }
        }

        tracing::debug!("subscription manager exiting, {} urls torn down", bindings_by_url.len());
    });

    SubscriptionManagerHandle { control: control_tx }
}

fn dispatch(
    registry: &ListenerRegistry,
    bindings_by_url: &HashMap<String, Vec<Binding>>,
    url: &str,
    frame: PublishFrame,
) {
    let Some(bindings) = bindings_by_url.get(url) else {
        return;
    };
    let product: DataProduct = match serde_json::from_slice(&frame.payload) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "dropping malformed data product");
            return;
        }
    };
    for binding in bindings {
        if binding.data_product_id != product.data_product_id {
            continue;
        }
        if !frame.filter_text.starts_with(&binding.filter) {
            continue;
        }
        // Listener invocation is sequential within this manager; a slow
        // listener only blocks this manager (SPEC_FULL.md §4.2).
        registry.invoke_data(binding.listener, product.clone());
    }
}
