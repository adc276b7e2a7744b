//! Backend capability contract and upper-layer callback bindings.
//!
//! A transport backend is one pluggable link-layer engine (UDP/IP multicast,
//! replicated unicast, an RDMA fabric supplied by the host, ...) satisfying
//! the [`Backend`] trait. The trait is the complete operation set the
//! dispatch layer forwards into; a backend missing an operation does not
//! compile, so a partially-populated transport cannot exist at runtime.
//!
//! The upper layer's three callbacks travel as one [`NetHandler`] trait
//! object, handed to the backend at construction and held for the instance's
//! lifetime. Backends must invoke the handler on the runtime supplied in
//! [`BackendSetup`] so the upper layer never observes concurrent callback
//! re-entrancy.

use crate::config::{CipherKind, IfaceConfig, NetConfig};
use crate::log::NetLog;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

/// Transport-layer errors
#[derive(Debug, Error)]
pub enum NetError {
    /// I/O failure in the bound backend
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configured transport index names no compiled-in backend
    #[error("transport index {index} names no compiled-in backend")]
    UnknownTransport {
        /// The rejected registry index
        index: usize,
    },

    /// Interface number outside the configured interface list
    #[error("interface {index} is not configured")]
    NoSuchInterface {
        /// The rejected interface number
        index: usize,
    },

    /// Backend rejected the requested message protection
    #[error("cipher {0:?} is not supported by this backend")]
    UnsupportedCipher(CipherKind),

    /// Configuration rejected at backend initialization
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for transport operations
pub type NetResult<T> = Result<T, NetError>;

/// Outcome of an `iface_check` revalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfaceStatus {
    /// The bound local interface address is still usable
    Unchanged,
    /// The bound address is gone; an `iface_change` callback has been
    /// scheduled with the replacement address
    Changed,
}

/// Upper-layer callback bindings held for a channel's lifetime.
///
/// The protocol engine's per-instance context lives in the implementing
/// type; backends invoke these on the instance's runtime, one at a time.
pub trait NetHandler: Send + Sync {
    /// A datagram arrived for the upper layer.
    fn deliver(&self, msg: &[u8]);

    /// The bound local interface address changed.
    fn iface_change(&self, new_addr: SocketAddr);

    /// Token retargeting requested via `token_target_set` finished.
    fn target_set_completed(&self);
}

/// Initialization parameters handed to a backend constructor.
pub struct BackendSetup {
    /// Runtime driving this instance's receive path and callbacks
    pub handle: Handle,
    /// Transport-layer configuration
    pub config: NetConfig,
    /// Index into `config.interfaces` to bind
    pub iface_no: usize,
    /// Upper-layer callback bindings
    pub handler: Arc<dyn NetHandler>,
    /// Logging context of the owning channel
    pub log: NetLog,
}

impl BackendSetup {
    /// The interface entry this backend is asked to bind.
    pub fn iface(&self) -> NetResult<&IfaceConfig> {
        self.config
            .interfaces
            .get(self.iface_no)
            .ok_or(NetError::NoSuchInterface {
                index: self.iface_no,
            })
    }
}

/// Complete operation set a pluggable transport must satisfy.
///
/// One instance of an implementing type is the per-interface backend
/// context: it is owned by exactly one
/// [`NetChannel`](crate::channel::NetChannel) and reachable only through
/// this trait, so no other transport's operations can ever touch it.
///
/// Send operations return the number of payload bytes accepted; errors are
/// propagated to the caller verbatim, with no retry or reinterpretation by
/// the dispatch layer.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable transport name for diagnostics.
    fn name(&self) -> &'static str;

    /// Unicast the token message to the currently configured token target.
    async fn token_send(&self, payload: &[u8]) -> NetResult<usize>;

    /// Multicast a payload, flushing any coalesced prior sends first.
    ///
    /// Every payload queued by `mcast_noflush_send` before this call is on
    /// the wire before this payload, so no receiver observes this payload
    /// ahead of an earlier queued one.
    async fn mcast_flush_send(&self, payload: &[u8]) -> NetResult<usize>;

    /// Multicast a payload, possibly coalescing it with later sends.
    async fn mcast_noflush_send(&self, payload: &[u8]) -> NetResult<usize>;

    /// Force any coalesced outbound sends onto the wire.
    async fn send_flush(&self) -> NetResult<()>;

    /// Drain receive-side buffering, delivering pending datagrams inline on
    /// the calling (owning) context.
    fn recv_flush(&self) -> NetResult<()>;

    /// Whether the multicast receive queue is currently empty.
    fn recv_mcast_empty(&self) -> bool;

    /// Revalidate that the bound local interface is still usable.
    fn iface_check(&self) -> NetResult<IfaceStatus>;

    /// The backend's notion of the current local interface address.
    fn iface_get(&self) -> NetResult<SocketAddr>;

    /// Human-readable name of the bound local interface.
    fn iface_print(&self) -> String;

    /// Reconfigure where unicast token messages are sent.
    ///
    /// Invokes the handler's `target_set_completed` on the instance runtime
    /// once the retargeting is effective.
    async fn token_target_set(&self, target: SocketAddr) -> NetResult<()>;

    /// Configure backend-level message protection.
    fn crypto_set(&self, cipher: CipherKind) -> NetResult<()>;

    /// Inform the backend of the current membership size.
    fn processor_count_set(&self, count: usize) -> NetResult<()>;

    /// Shave this backend's per-datagram overhead off the configured
    /// network MTU.
    fn net_mtu_adjust(&self, config: &mut NetConfig);

    /// Register a member address for transports that replicate multicasts.
    async fn member_add(&self, member: SocketAddr) -> NetResult<()>;

    /// Remove a previously registered member address.
    async fn member_remove(&self, member: SocketAddr) -> NetResult<()>;

    /// Release every resource bound to this instance.
    ///
    /// Must be safe to call while deliveries are logically in flight at the
    /// protocol level; the dispatch layer guarantees it is called at most
    /// once.
    async fn finalize(&self) -> NetResult<()>;
}
