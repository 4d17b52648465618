//! Domain-scoped publish/subscribe, request/reply and service discovery
//! for a fleet of cooperating processes.
//!
//! A [`Node`](node::Node) is the facade applications talk to; it owns four
//! managers (subscription, publish, request, service) that each run as
//! their own task and communicate over `tokio::sync` channels, and it talks
//! to a directory process (see the `gravity-directory` binary) to resolve
//! data products and services to URLs.
//!
//! ```no_run
//! # async fn run() {
//! use gravity::config::NodeConfig;
//! use gravity::node::Node;
//! use tokio_util::sync::CancellationToken;
//!
//! let node = Node::new();
//! node.init("my-component", NodeConfig::default(), CancellationToken::new()).await;
//! node.register_data_product("Temperature", 5656, "tcp").await;
//! node.publish("Temperature", b"72.1".to_vec(), "");
//! # }
//! ```

pub mod config;
pub mod error;
pub mod node;
pub mod protocol;
pub mod transport;

pub use config::NodeConfig;
pub use error::{GravityError, GravityResult, GravityReturnCode};
pub use node::Node;
