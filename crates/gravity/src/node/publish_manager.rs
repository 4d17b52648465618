//! Publish Manager: owns one XPUB-shaped listener per registered data
//! product, caches the last published value, and replays it to every new
//! subscriber connection.
//!
//! Grounded on `GravityPublishManager.cpp` in full: `registerDataProduct`
//! binds the socket and tracks it by id, `publish` overwrites the cache and
//! fans out, and the poll loop's "new subscriber" branch is this module's
//! `NewSubscriber` handling, which replays `lastCachedValue` immediately.

use crate::error::{GravityError, GravityResult};
use crate::protocol::DataProduct;
use crate::transport::pubsub::{self, NewSubscriber, PublishFrame};
use std::collections::HashMap;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

/// Control commands sent to the Publish Manager's control channel, the
/// typed equivalent of the original's `register`/`unregister`/`publish`/
/// `kill` multi-frame commands.
pub enum Command {
    Register {
        data_product_id: String,
        url: String,
        reply: oneshot::Sender<GravityResult<()>>,
    },
    Unregister {
        data_product_id: String,
    },
    Publish {
        filter_text: String,
        product: DataProduct,
    },
    Kill,
}

struct ProductState {
    url: String,
    cache: Option<PublishFrame>,
    subscribers: Vec<mpsc::UnboundedSender<PublishFrame>>,
}

/// Handle used by the Node Facade to talk to a running Publish Manager.
#[derive(Clone)]
pub struct PublishManagerHandle {
    control: mpsc::UnboundedSender<Command>,
}

impl PublishManagerHandle {
    pub async fn register(&self, data_product_id: String, url: String) -> GravityResult<()> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Command::Register {
                data_product_id,
                url,
                reply: tx,
            })
            .map_err(|_| GravityError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "publish manager is gone",
            )))?;
        rx.await.map_err(|_| {
            GravityError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "publish manager dropped reply channel",
            ))
        })?
    }

    pub fn unregister(&self, data_product_id: String) {
        let _ = self.control.send(Command::Unregister { data_product_id });
    }

    pub fn publish(&self, filter_text: String, product: DataProduct) {
        let _ = self.control.send(Command::Publish {
            filter_text,
            product,
        });
    }

    pub fn kill(&self) {
        let _ = self.control.send(Command::Kill);
    }
}

enum Event {
    Control(Command),
    NewSubscriber { data_product_id: String, sub: NewSubscriber },
}

/// Spawn the Publish Manager task. Sends a ready signal on `ready_tx` once
/// its control channel is live, mirroring `GravityPublishManager::ready()`.
pub fn spawn(ready_tx: mpsc::UnboundedSender<&'static str>) -> PublishManagerHandle {
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Command>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    tokio::spawn(async move {
        let _ = ready_tx.send("PublishManager");
        let mut products: HashMap<String, ProductState> = HashMap::new();

        loop {
            tokio::select! {
                cmd = control_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        Command::Register { data_product_id, url, reply } => {
                            let result = register_product(
                                &data_product_id,
                                &url,
                                &mut products,
                                event_tx.clone(),
                            )
                            .await;
                            let _ = reply.send(result);
                        }
                        Command::Unregister { data_product_id } => {
                            products.remove(&data_product_id);
                        }
                        Command::Publish { filter_text, product } => {
                            publish(&mut products, &filter_text, product);
                        }
                        Command::Kill => break,
                    }
                }
                event = event_rx.recv() => {
                    let Some(Event::NewSubscriber { data_product_id, sub }) = event else { continue };
                    if let Some(state) = products.get_mut(&data_product_id) {
                        let (tx, rx) = mpsc::unbounded_channel();
                        if let Some(cached) = state.cache.clone() {
                            let _ = tx.send(cached);
                        }
                        pubsub::spawn_subscriber_writer(sub.stream, rx);
                        state.subscribers.push(tx);
                    }
                }
            }
        }

        tracing::debug!("publish manager exiting, {} products torn down", products.len());
    });

    PublishManagerHandle { control: control_tx }
}

async fn register_product(
    data_product_id: &str,
    url: &str,
    products: &mut HashMap<String, ProductState>,
    event_tx: mpsc::UnboundedSender<Event>,
) -> GravityResult<()> {
    let listener: TcpListener = pubsub::bind_publisher(url)
        .await
        .map_err(|_| GravityError::BindConflict(url.to_string()))?;

    let (accept_tx, mut accept_rx) = mpsc::unbounded_channel::<NewSubscriber>();
    pubsub::spawn_accept_loop(listener, accept_tx);

    let id_for_task = data_product_id.to_string();
    tokio::spawn(async move {
        while let Some(sub) = accept_rx.recv().await {
            if event_tx
                .send(Event::NewSubscriber {
                    data_product_id: id_for_task.clone(),
                    sub,
                })
                .is_err()
            {
                break;
            }
        }
    });

    products.insert(
        data_product_id.to_string(),
        ProductState {
            url: url.to_string(),
            cache: None,
            subscribers: Vec::new(),
        },
    );
    Ok(())
}

fn publish(products: &mut HashMap<String, ProductState>, filter_text: &str, product: DataProduct) {
    let Some(state) = products.get_mut(&product.data_product_id) else {
        return;
    };
    let payload = match serde_json::to_vec(&product) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize data product for publish");
            return;
        }
    };
    let frame = PublishFrame {
        filter_text: filter_text.to_string(),
        payload,
    };
    state.cache = Some(frame.clone());
    state
        .subscribers
        .retain(|tx| tx.send(frame.clone()).is_ok());
    let _ = &state.url;
}
