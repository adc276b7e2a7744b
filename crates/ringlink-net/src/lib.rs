//! # ringlink-net
//!
//! Runtime-selectable transport abstraction for the ringlink ordered
//! multicast engine.
//!
//! The ordering engine above this crate must behave identically whether the
//! cluster runs over multicast datagrams, replicated unicast, or a fabric
//! transport supplied by the host process. This crate is the seam that
//! makes that possible:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ordering engine                          │
//! │        (token ring, membership, retransmission)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                       NetChannel                             │
//! │   (one interface ↔ one backend, selected at init, then      │
//! │    forwarded verbatim — no transport branching after that)  │
//! ├──────────────────────┬──────────────────────┬───────────────┤
//! │  UDP/IP Multicast    │  UDP/IP Unicast      │  host-supplied │
//! │  (always available)  │  (feature `unicast`) │  backends      │
//! └──────────────────────┴──────────────────────┴───────────────┘
//! ```
//!
//! This crate provides:
//! - The [`Backend`] contract every pluggable transport satisfies
//! - The compiled-in descriptor [`registry`] (index 0 is always UDP/IP
//!   multicast)
//! - [`NetChannel`], the per-interface instance handle and dispatch layer
//! - An explicit [`log`] context routing diagnostics to a pluggable sink
//!
//! It deliberately does not provide message ordering, retransmission, or
//! cryptography; those live above (the engine) or below (the backends).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod channel;
pub mod config;
pub mod log;
pub mod registry;
mod sock;
#[cfg(test)]
mod test_support;
pub mod udp;
#[cfg(feature = "unicast")]
pub mod unicast;

pub use backend::{Backend, BackendSetup, IfaceStatus, NetError, NetHandler, NetResult};
pub use channel::NetChannel;
pub use config::{
    CipherKind, DEFAULT_SOCKET_BUFFER, ETHERNET_MTU, IfaceConfig, MAX_NET_MTU, MIN_NET_MTU,
    NetConfig,
};
pub use log::{LogConfig, LogLevel, LogSink, NetLog};
pub use registry::{BackendDescriptor, REGISTRY, TransportKind};
pub use udp::UdpMulticastBackend;
#[cfg(feature = "unicast")]
pub use unicast::UdpUnicastBackend;
