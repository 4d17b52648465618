//! Standalone service directory library: domain-scoped component
//! registration/lookup plus cross-domain anti-entropy over UDP beacons.
//!
//! `gravity-directory`'s binary (`src/main.rs`) is a thin CLI wrapper over
//! this library, the same way `hdds-discovery-server` keeps its binary
//! separate from its `server`/`config` modules.

mod beacon;
mod config;
mod registry;
mod server;
mod synchronizer;

pub use config::{ConfigError, DirectoryConfig};
pub use registry::DirectoryState;
pub use server::DirectoryServer;
pub use synchronizer::SyncCommand;
