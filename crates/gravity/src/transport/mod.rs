//! Socket-pattern stand-ins for the out-of-scope message transport.
//!
//! The original system treats its message transport (a 0MQ-style library
//! with REQ/REP, PUB/SUB and XPUB/XSUB) as a black box. This crate has no
//! equivalent dependency in its ecosystem, so the patterns it needs are
//! realized directly on `tokio` TCP streams:
//!
//! - [`framed`] supplies the length-prefixed JSON framing every pattern
//!   below is built from, the same way `hdds-discovery-server`'s
//!   `connection.rs` frames its own control protocol.
//! - [`reqrep`] is the lock-step REQ/REP round trip used for directory and
//!   service calls, including the fresh-socket-per-retry rule.
//! - [`pubsub`] is the XPUB-shaped broadcast-with-replay used by the
//!   Publish Manager, and the SUB-shaped connect-and-receive used by the
//!   Subscription Manager and the Heartbeat Listener.

pub mod framed;
pub mod pubsub;
pub mod reqrep;

pub use framed::Framed;
