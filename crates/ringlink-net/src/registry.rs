//! Process-wide descriptor table of compiled-in transport backends.
//!
//! The table is fixed at build time and read-only for the life of the
//! process. Index 0 is always the UDP/IP multicast baseline; later indices
//! exist only when their build-time capability is compiled in. Resolution
//! of a configured index happens exactly once, inside
//! [`NetChannel::initialize`](crate::channel::NetChannel::initialize), and
//! an index naming no compiled-in backend is rejected outright — selection
//! never falls back to a transport the operator did not ask for.

use crate::backend::{NetError, NetResult};

/// Discriminant naming one compiled-in transport backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// UDP/IP multicast baseline, always available
    #[default]
    UdpMulticast,
    /// UDP/IP replicated unicast
    #[cfg(feature = "unicast")]
    UdpUnicast,
}

impl TransportKind {
    /// Transport kinds compiled into this build, in registry order.
    #[must_use]
    pub fn available() -> Vec<TransportKind> {
        REGISTRY.iter().map(|descriptor| descriptor.kind).collect()
    }
}

/// One entry in the descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendDescriptor {
    /// Which backend this entry constructs
    pub kind: TransportKind,
    /// Human-readable transport name for diagnostics
    pub name: &'static str,
}

impl BackendDescriptor {
    /// Resolve a configured transport index to its descriptor.
    ///
    /// # Errors
    /// [`NetError::UnknownTransport`] for any index that names no
    /// compiled-in backend.
    ///
    /// # Examples
    /// ```
    /// use ringlink_net::BackendDescriptor;
    ///
    /// let baseline = BackendDescriptor::lookup(0).unwrap();
    /// assert_eq!(baseline.name, "UDP/IP Multicast");
    /// ```
    pub fn lookup(index: usize) -> NetResult<&'static BackendDescriptor> {
        REGISTRY
            .get(index)
            .ok_or(NetError::UnknownTransport { index })
    }
}

const UDP_MULTICAST: BackendDescriptor = BackendDescriptor {
    kind: TransportKind::UdpMulticast,
    name: "UDP/IP Multicast",
};

#[cfg(feature = "unicast")]
const UDP_UNICAST: BackendDescriptor = BackendDescriptor {
    kind: TransportKind::UdpUnicast,
    name: "UDP/IP Unicast",
};

/// Compiled-in transport descriptors, baseline first.
#[cfg(not(feature = "unicast"))]
pub const REGISTRY: &[BackendDescriptor] = &[UDP_MULTICAST];

/// Compiled-in transport descriptors, baseline first.
#[cfg(feature = "unicast")]
pub const REGISTRY: &[BackendDescriptor] = &[UDP_MULTICAST, UDP_UNICAST];
