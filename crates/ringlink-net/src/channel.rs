//! Transport instance handle and dispatch layer.
//!
//! [`NetChannel`] is the seam between the ordering engine and the link
//! layer: it binds one local interface to one backend at initialization
//! time and thereafter forwards every operation to that backend verbatim.
//! The transport-type branch happens exactly once, inside
//! [`NetChannel::initialize`]; no forwarding operation ever inspects which
//! transport is bound.
//!
//! The channel has exactly two lifecycle states, and the second one is not
//! representable: [`NetChannel::finalize`] consumes the channel by value,
//! so an operation on a finalized instance is a compile error rather than
//! a runtime fault, and the backend's own finalize can never run twice.

use crate::backend::{Backend, BackendSetup, IfaceStatus, NetHandler, NetResult};
use crate::config::{CipherKind, NetConfig};
use crate::log::NetLog;
use crate::registry::{BackendDescriptor, TransportKind};
use crate::udp::UdpMulticastBackend;
#[cfg(feature = "unicast")]
use crate::unicast::UdpUnicastBackend;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::runtime::Handle;

/// One live binding between a local network interface and a transport
/// backend.
///
/// Instances are independent: two channels initialized for two interface
/// numbers share nothing, and operations on one can never observe the
/// other's backend state.
pub struct NetChannel {
    backend: Box<dyn Backend>,
    log: NetLog,
}

impl NetChannel {
    /// Select the configured transport and initialize a backend for one
    /// interface.
    ///
    /// The transport index in `config` is resolved against the compiled-in
    /// registry; an index naming no compiled-in backend is rejected with
    /// [`NetError::UnknownTransport`](crate::backend::NetError::UnknownTransport)
    /// rather than falling back to a transport the operator did not choose.
    /// The logging context is bound before anything else so every later
    /// failure is reported through the configured sink.
    ///
    /// `handle` is the runtime that drives this instance: the backend runs
    /// its receive path on it and marshals every handler callback onto it.
    ///
    /// # Errors
    /// Propagates registry resolution failures and the backend's own
    /// initialization failure verbatim; on failure no instance exists.
    ///
    /// # Examples
    /// ```no_run
    /// use ringlink_net::{NetChannel, NetConfig, NetHandler};
    /// use std::net::SocketAddr;
    /// use std::sync::Arc;
    ///
    /// struct Engine;
    ///
    /// impl NetHandler for Engine {
    ///     fn deliver(&self, msg: &[u8]) {
    ///         println!("delivered {} bytes", msg.len());
    ///     }
    ///     fn iface_change(&self, new_addr: SocketAddr) {
    ///         println!("interface moved to {new_addr}");
    ///     }
    ///     fn target_set_completed(&self) {}
    /// }
    ///
    /// # async fn example() -> Result<(), ringlink_net::NetError> {
    /// let config = NetConfig::default();
    /// let channel = NetChannel::initialize(
    ///     tokio::runtime::Handle::current(),
    ///     &config,
    ///     0,
    ///     Arc::new(Engine),
    /// )
    /// .await?;
    /// println!("bound transport: {}", channel.transport_name());
    /// channel.finalize().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn initialize(
        handle: Handle,
        config: &NetConfig,
        iface_no: usize,
        handler: Arc<dyn NetHandler>,
    ) -> NetResult<NetChannel> {
        let descriptor = BackendDescriptor::lookup(config.transport)?;
        let log = NetLog::new(&config.log);
        log.notice(&format!("Initializing transport ({}).", descriptor.name));

        let setup = BackendSetup {
            handle,
            config: config.clone(),
            iface_no,
            handler,
            log: log.clone(),
        };
        let backend: Box<dyn Backend> = match descriptor.kind {
            TransportKind::UdpMulticast => {
                Box::new(UdpMulticastBackend::initialize(setup).await?)
            }
            #[cfg(feature = "unicast")]
            TransportKind::UdpUnicast => Box::new(UdpUnicastBackend::initialize(setup).await?),
        };

        Ok(NetChannel { backend, log })
    }

    /// Bind an externally supplied backend.
    ///
    /// This is the seam for pluggable transports that live outside this
    /// crate (an RDMA engine supplied by the host process) and for test
    /// doubles standing in for a real link layer.
    #[must_use]
    pub fn from_backend(backend: Box<dyn Backend>, log: NetLog) -> NetChannel {
        NetChannel { backend, log }
    }

    /// Human-readable name of the bound transport.
    #[must_use]
    pub fn transport_name(&self) -> &'static str {
        self.backend.name()
    }

    /// The logging context bound at initialization.
    #[must_use]
    pub fn log(&self) -> &NetLog {
        &self.log
    }

    /// Configure backend-level message protection.
    pub fn crypto_set(&self, cipher: CipherKind) -> NetResult<()> {
        self.backend.crypto_set(cipher)
    }

    /// Inform the backend of the current membership size.
    pub fn processor_count_set(&self, count: usize) -> NetResult<()> {
        self.backend.processor_count_set(count)
    }

    /// Unicast the token message to the currently configured token target.
    pub async fn token_send(&self, payload: &[u8]) -> NetResult<usize> {
        self.backend.token_send(payload).await
    }

    /// Multicast a payload, flushing any coalesced prior sends first.
    pub async fn mcast_flush_send(&self, payload: &[u8]) -> NetResult<usize> {
        self.backend.mcast_flush_send(payload).await
    }

    /// Multicast a payload, possibly coalescing it with later sends.
    pub async fn mcast_noflush_send(&self, payload: &[u8]) -> NetResult<usize> {
        self.backend.mcast_noflush_send(payload).await
    }

    /// Drain receive-side buffering, delivering pending datagrams inline.
    pub fn recv_flush(&self) -> NetResult<()> {
        self.backend.recv_flush()
    }

    /// Force any coalesced outbound sends onto the wire.
    pub async fn send_flush(&self) -> NetResult<()> {
        self.backend.send_flush().await
    }

    /// Revalidate that the bound local interface is still usable.
    pub fn iface_check(&self) -> NetResult<IfaceStatus> {
        self.backend.iface_check()
    }

    /// Shave the bound backend's per-datagram overhead off the configured
    /// network MTU.
    pub fn net_mtu_adjust(&self, config: &mut NetConfig) {
        self.backend.net_mtu_adjust(config);
    }

    /// Human-readable name of the bound local interface.
    #[must_use]
    pub fn iface_print(&self) -> String {
        self.backend.iface_print()
    }

    /// The backend's notion of the current local interface address.
    pub fn iface_get(&self) -> NetResult<SocketAddr> {
        self.backend.iface_get()
    }

    /// Reconfigure where unicast token messages are sent.
    pub async fn token_target_set(&self, target: SocketAddr) -> NetResult<()> {
        self.backend.token_target_set(target).await
    }

    /// Whether the multicast receive queue is currently empty.
    #[must_use]
    pub fn recv_mcast_empty(&self) -> bool {
        self.backend.recv_mcast_empty()
    }

    /// Register a member address for transports that replicate multicasts.
    pub async fn member_add(&self, member: SocketAddr) -> NetResult<()> {
        self.backend.member_add(member).await
    }

    /// Remove a previously registered member address.
    pub async fn member_remove(&self, member: SocketAddr) -> NetResult<()> {
        self.backend.member_remove(member).await
    }

    /// Release the backend resources bound to this channel.
    ///
    /// Consumes the channel: the backend finalize runs exactly once, and
    /// no further operation on this instance can be expressed.
    pub async fn finalize(self) -> NetResult<()> {
        self.backend.finalize().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{NetError, NetHandler};
    use crate::config::IfaceConfig;
    use crate::log::LogConfig;
    use crate::registry::REGISTRY;
    use crate::test_support::{TestHandler, ephemeral_port};
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test double recording every operation routed into it.
    #[derive(Default)]
    struct MockState {
        calls: Mutex<Vec<String>>,
        finalize_count: AtomicUsize,
        target: Mutex<Option<SocketAddr>>,
    }

    struct MockBackend(Arc<MockState>);

    impl MockState {
        fn record(&self, op: &str) {
            self.calls.lock().unwrap().push(op.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        fn name(&self) -> &'static str {
            "Mock"
        }

        async fn token_send(&self, payload: &[u8]) -> NetResult<usize> {
            self.0.record("token_send");
            Ok(payload.len())
        }

        async fn mcast_flush_send(&self, payload: &[u8]) -> NetResult<usize> {
            self.0.record("mcast_flush_send");
            Ok(payload.len())
        }

        async fn mcast_noflush_send(&self, payload: &[u8]) -> NetResult<usize> {
            self.0.record("mcast_noflush_send");
            Ok(payload.len())
        }

        async fn send_flush(&self) -> NetResult<()> {
            self.0.record("send_flush");
            Ok(())
        }

        fn recv_flush(&self) -> NetResult<()> {
            self.0.record("recv_flush");
            Ok(())
        }

        fn recv_mcast_empty(&self) -> bool {
            self.0.record("recv_mcast_empty");
            true
        }

        fn iface_check(&self) -> NetResult<IfaceStatus> {
            self.0.record("iface_check");
            Ok(IfaceStatus::Unchanged)
        }

        fn iface_get(&self) -> NetResult<SocketAddr> {
            self.0.record("iface_get");
            Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, 9)))
        }

        fn iface_print(&self) -> String {
            self.0.record("iface_print");
            "mock0".to_string()
        }

        async fn token_target_set(&self, target: SocketAddr) -> NetResult<()> {
            self.0.record("token_target_set");
            *self.0.target.lock().unwrap() = Some(target);
            Ok(())
        }

        fn crypto_set(&self, _cipher: CipherKind) -> NetResult<()> {
            self.0.record("crypto_set");
            Ok(())
        }

        fn processor_count_set(&self, _count: usize) -> NetResult<()> {
            self.0.record("processor_count_set");
            Ok(())
        }

        fn net_mtu_adjust(&self, config: &mut NetConfig) {
            self.0.record("net_mtu_adjust");
            config.net_mtu -= 1;
        }

        async fn member_add(&self, _member: SocketAddr) -> NetResult<()> {
            self.0.record("member_add");
            Ok(())
        }

        async fn member_remove(&self, _member: SocketAddr) -> NetResult<()> {
            self.0.record("member_remove");
            Ok(())
        }

        async fn finalize(&self) -> NetResult<()> {
            self.0.record("finalize");
            self.0.finalize_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn mock_channel() -> (NetChannel, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        let channel = NetChannel::from_backend(
            Box::new(MockBackend(Arc::clone(&state))),
            NetLog::new(&LogConfig::default()),
        );
        (channel, state)
    }

    fn loopback_config() -> NetConfig {
        NetConfig {
            interfaces: vec![IfaceConfig {
                bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
                mcast_group: SocketAddr::from((Ipv4Addr::new(239, 255, 71, 43), ephemeral_port())),
                token_port: 0,
            }],
            ..NetConfig::default()
        }
    }

    #[tokio::test]
    async fn test_every_operation_routes_to_the_bound_backend() {
        let (channel, state) = mock_channel();

        channel.crypto_set(CipherKind::None).unwrap();
        channel.processor_count_set(4).unwrap();
        channel.token_send(b"t").await.unwrap();
        channel.mcast_flush_send(b"f").await.unwrap();
        channel.mcast_noflush_send(b"n").await.unwrap();
        channel.recv_flush().unwrap();
        channel.send_flush().await.unwrap();
        channel.iface_check().unwrap();
        let mut config = NetConfig::default();
        channel.net_mtu_adjust(&mut config);
        channel.iface_print();
        channel.iface_get().unwrap();
        channel
            .token_target_set("127.0.0.1:7000".parse().unwrap())
            .await
            .unwrap();
        channel.recv_mcast_empty();
        channel.member_add("127.0.0.1:7001".parse().unwrap()).await.unwrap();
        channel
            .member_remove("127.0.0.1:7001".parse().unwrap())
            .await
            .unwrap();
        channel.finalize().await.unwrap();

        assert_eq!(
            state.calls(),
            vec![
                "crypto_set",
                "processor_count_set",
                "token_send",
                "mcast_flush_send",
                "mcast_noflush_send",
                "recv_flush",
                "send_flush",
                "iface_check",
                "net_mtu_adjust",
                "iface_print",
                "iface_get",
                "token_target_set",
                "recv_mcast_empty",
                "member_add",
                "member_remove",
                "finalize",
            ]
        );
    }

    #[tokio::test]
    async fn test_results_pass_through_verbatim() {
        let (channel, state) = mock_channel();

        assert_eq!(channel.token_send(&[0u8; 64]).await.unwrap(), 64);
        assert_eq!(channel.iface_print(), "mock0");
        assert!(channel.recv_mcast_empty());

        let target: SocketAddr = "127.0.0.1:7777".parse().unwrap();
        channel.token_target_set(target).await.unwrap();
        assert_eq!(*state.target.lock().unwrap(), Some(target));
        channel.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_finalize_runs_backend_finalize_exactly_once() {
        let (channel, state) = mock_channel();
        channel.finalize().await.unwrap();
        assert_eq!(state.finalize_count.load(Ordering::SeqCst), 1);
        // `channel` is consumed above; further operations on the instance
        // no longer typecheck, which is the whole point.
    }

    #[tokio::test]
    async fn test_initialize_binds_the_baseline_transport() {
        let handler = Arc::new(TestHandler::default());
        let channel = NetChannel::initialize(
            Handle::current(),
            &loopback_config(),
            0,
            handler,
        )
        .await
        .unwrap();

        assert_eq!(channel.transport_name(), REGISTRY[0].name);
        assert!(!channel.iface_print().is_empty());
        channel.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_rejects_unknown_transport_index() {
        let handler = Arc::new(TestHandler::default());
        let mut config = loopback_config();
        config.transport = 250;

        match NetChannel::initialize(Handle::current(), &config, 0, handler).await {
            Err(NetError::UnknownTransport { index }) => assert_eq!(index, 250),
            other => panic!("expected UnknownTransport, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_initialize_reports_selection_through_the_sink() {
        let records = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&records);
        let mut config = loopback_config();
        config.log.sink = Arc::new(move |level, subsys, message| {
            captured
                .lock()
                .unwrap()
                .push((level, subsys.to_string(), message.to_string()));
        });
        config.log.subsys = "RING".to_string();

        let handler = Arc::new(TestHandler::default());
        let channel = NetChannel::initialize(Handle::current(), &config, 0, handler)
            .await
            .unwrap();

        let notice = records
            .lock()
            .unwrap()
            .iter()
            .find(|(level, _, _)| *level == crate::log::LogLevel::Notice)
            .cloned()
            .expect("selection notice emitted");
        assert_eq!(notice.1, "RING");
        assert!(notice.2.contains("UDP/IP Multicast"));
        channel.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_instances_are_distinct() {
        let handler = Arc::new(TestHandler::default());
        let first = NetChannel::initialize(
            Handle::current(),
            &loopback_config(),
            0,
            handler.clone(),
        )
        .await
        .unwrap();
        let second = NetChannel::initialize(
            Handle::current(),
            &loopback_config(),
            0,
            handler,
        )
        .await
        .unwrap();

        // Separate instances bind separate token sockets.
        assert_ne!(first.iface_get().unwrap(), second.iface_get().unwrap());
        first.finalize().await.unwrap();
        second.finalize().await.unwrap();
    }
}
