//! Configuration consumed by the transport layer.
//!
//! [`NetConfig`] is the slice of the engine configuration this layer reads:
//! which backend to bind (a registry index), the logging sink, the local
//! interface list, and the MTU the upper layer frames against. Backends
//! shave their per-datagram overhead off `net_mtu` through
//! [`net_mtu_adjust`](crate::channel::NetChannel::net_mtu_adjust) whenever
//! the upper layer recomputes its framing.

use crate::log::LogConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Minimum network MTU the engine will run with (IPv6 floor)
pub const MIN_NET_MTU: usize = 1280;

/// Standard Ethernet MTU, the default framing assumption
pub const ETHERNET_MTU: usize = 1500;

/// Largest supported network MTU (jumbo frames)
pub const MAX_NET_MTU: usize = 9000;

/// Default socket buffer size for the datagram backends
pub const DEFAULT_SOCKET_BUFFER: usize = 256 * 1024;

/// Message protection requested from a backend via `crypto_set`.
///
/// This layer only forwards the request; whether a cipher is honoured is
/// the backend's decision. The datagram backends in this crate carry no
/// cipher implementation and accept only [`CipherKind::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CipherKind {
    /// No message protection
    #[default]
    None,
    /// AES-256 payload protection, applied by the backend
    Aes256,
}

/// One local interface binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfaceConfig {
    /// Local address datagram sockets bind to
    pub bind_addr: IpAddr,
    /// Multicast group address and port carrying the ordered stream
    pub mcast_group: SocketAddr,
    /// Port for unicast token traffic (0 = OS-assigned)
    pub token_port: u16,
}

impl Default for IfaceConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            mcast_group: SocketAddr::from((Ipv4Addr::new(239, 192, 104, 1), 5405)),
            token_port: 0,
        }
    }
}

/// Transport-layer configuration handed to
/// [`NetChannel::initialize`](crate::channel::NetChannel::initialize).
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Registry index of the transport backend to bind.
    ///
    /// Index 0 is always the UDP/IP multicast baseline. An index naming no
    /// compiled-in backend fails initialization; selection never falls back
    /// to another transport.
    pub transport: usize,
    /// Logging sink and subsystem identifier
    pub log: LogConfig,
    /// Local interfaces this node participates on, indexed by interface
    /// number at initialization
    pub interfaces: Vec<IfaceConfig>,
    /// Network MTU the upper layer frames against
    pub net_mtu: usize,
    /// Socket receive buffer size in bytes
    pub recv_buffer_size: usize,
    /// Socket send buffer size in bytes
    pub send_buffer_size: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            transport: 0,
            log: LogConfig::default(),
            interfaces: vec![IfaceConfig::default()],
            net_mtu: ETHERNET_MTU,
            recv_buffer_size: DEFAULT_SOCKET_BUFFER,
            send_buffer_size: DEFAULT_SOCKET_BUFFER,
        }
    }
}
