//! Baseline UDP/IP multicast backend (registry index 0).
//!
//! Two sockets per instance: a group socket that carries the ordered
//! multicast stream, and a unicast token socket that carries ordering
//! permission between ring members. Receive tasks for both run on the
//! runtime supplied at initialization, so every delivery callback fires on
//! the instance's own poll context.
//!
//! Outbound multicasts sent through `mcast_noflush_send` are coalesced in a
//! FIFO queue; `mcast_flush_send` and `send_flush` put the queue on the wire
//! in order, which is what gives flushed sends their ordering guarantee.

use crate::backend::{Backend, BackendSetup, IfaceStatus, NetError, NetHandler, NetResult};
use crate::config::{CipherKind, NetConfig};
use crate::log::NetLog;
use crate::sock;
use async_trait::async_trait;
use std::collections::{BTreeSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// IPv4 header plus UDP header, shaved off the network MTU for framing.
const UDP_IP_OVERHEAD: usize = 28;

/// UDP/IP multicast transport.
pub struct UdpMulticastBackend {
    handle: Handle,
    handler: Arc<dyn NetHandler>,
    log: NetLog,

    mcast: Arc<UdpSocket>,
    mcast_probe: std::net::UdpSocket,
    token: Arc<UdpSocket>,
    token_probe: std::net::UdpSocket,

    group: SocketAddr,
    bind_ip: Ipv4Addr,
    local_addr: SocketAddr,

    token_target: Mutex<SocketAddr>,
    pending: Mutex<VecDeque<Vec<u8>>>,
    cipher: Mutex<CipherKind>,
    processor_count: AtomicUsize,
    members: Mutex<BTreeSet<SocketAddr>>,

    closed: Arc<AtomicBool>,
    recv_tasks: Vec<JoinHandle<()>>,
}

impl UdpMulticastBackend {
    /// Bind the group and token sockets for one configured interface and
    /// start the receive tasks.
    ///
    /// A freshly initialized instance targets its own token socket: a
    /// one-node ring passes the token to itself until the upper layer
    /// retargets it.
    ///
    /// # Errors
    /// Fails if the interface number is not configured, the group address
    /// is not IPv4 multicast, or socket setup fails.
    pub async fn initialize(setup: BackendSetup) -> NetResult<Self> {
        let BackendSetup {
            handle,
            config,
            iface_no,
            handler,
            log,
        } = setup;
        let iface = config
            .interfaces
            .get(iface_no)
            .ok_or(NetError::NoSuchInterface { index: iface_no })?
            .clone();

        let bind_ip = match iface.bind_addr {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(addr) => {
                return Err(NetError::InvalidConfig(format!(
                    "IPv6 interface {addr} is not supported by the multicast backend"
                )));
            }
        };
        let group_ip = match iface.mcast_group.ip() {
            IpAddr::V4(v4) if v4.is_multicast() => v4,
            other => {
                return Err(NetError::InvalidConfig(format!(
                    "{other} is not an IPv4 multicast group"
                )));
            }
        };

        // Group socket: carries the ordered stream, both directions.
        let socket = sock::build_udp(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, iface.mcast_group.port())),
            &config,
        )?;
        socket.join_multicast_v4(&group_ip, &bind_ip)?;
        socket.set_multicast_if_v4(&bind_ip)?;
        socket.set_multicast_loop_v4(true)?;
        let (mcast, mcast_probe) = sock::into_tokio(socket, &handle)?;

        // Token socket: unicast ordering permission.
        let socket = sock::build_udp(SocketAddr::from((bind_ip, iface.token_port)), &config)?;
        let (token, token_probe) = sock::into_tokio(socket, &handle)?;
        let local_addr = token.local_addr()?;

        let closed = Arc::new(AtomicBool::new(false));
        let recv_tasks = vec![
            sock::spawn_deliver(
                &handle,
                Arc::clone(&mcast),
                Arc::clone(&handler),
                Arc::clone(&closed),
                log.clone(),
                "multicast",
            ),
            sock::spawn_deliver(
                &handle,
                Arc::clone(&token),
                Arc::clone(&handler),
                Arc::clone(&closed),
                log.clone(),
                "token",
            ),
        ];

        log.debug(&format!(
            "multicast backend bound to {local_addr}, group {}",
            iface.mcast_group
        ));

        Ok(Self {
            handle,
            handler,
            log,
            mcast,
            mcast_probe,
            token,
            token_probe,
            group: iface.mcast_group,
            bind_ip,
            local_addr,
            token_target: Mutex::new(local_addr),
            pending: Mutex::new(VecDeque::new()),
            cipher: Mutex::new(CipherKind::None),
            processor_count: AtomicUsize::new(1),
            members: Mutex::new(BTreeSet::new()),
            closed,
            recv_tasks,
        })
    }

    /// The message protection currently recorded for this instance.
    #[must_use]
    pub fn cipher(&self) -> CipherKind {
        *self.cipher.lock().expect("cipher lock")
    }

    /// The membership size most recently reported by the upper layer.
    #[must_use]
    pub fn processor_count(&self) -> usize {
        self.processor_count.load(Ordering::Relaxed)
    }

    /// Number of member addresses currently recorded.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.lock().expect("members lock").len()
    }

    /// Put every coalesced multicast on the wire, oldest first.
    async fn drain_pending(&self) -> NetResult<()> {
        loop {
            let next = self.pending.lock().expect("pending lock").pop_front();
            let Some(payload) = next else {
                return Ok(());
            };
            if let Err(err) = self.mcast.send_to(&payload, self.group).await {
                // Keep the payload at the head so ordering survives a retry.
                self.pending
                    .lock()
                    .expect("pending lock")
                    .push_front(payload);
                return Err(err.into());
            }
        }
    }
}

#[async_trait]
impl Backend for UdpMulticastBackend {
    fn name(&self) -> &'static str {
        "UDP/IP Multicast"
    }

    async fn token_send(&self, payload: &[u8]) -> NetResult<usize> {
        let target = *self.token_target.lock().expect("token target lock");
        Ok(self.token.send_to(payload, target).await?)
    }

    async fn mcast_flush_send(&self, payload: &[u8]) -> NetResult<usize> {
        self.drain_pending().await?;
        Ok(self.mcast.send_to(payload, self.group).await?)
    }

    async fn mcast_noflush_send(&self, payload: &[u8]) -> NetResult<usize> {
        self.pending
            .lock()
            .expect("pending lock")
            .push_back(payload.to_vec());
        Ok(payload.len())
    }

    async fn send_flush(&self) -> NetResult<()> {
        self.drain_pending().await
    }

    fn recv_flush(&self) -> NetResult<()> {
        sock::drain_deliver(&self.mcast_probe, &self.handler)?;
        sock::drain_deliver(&self.token_probe, &self.handler)?;
        Ok(())
    }

    fn recv_mcast_empty(&self) -> bool {
        !sock::pending_datagram(&self.mcast_probe)
    }

    fn iface_check(&self) -> NetResult<IfaceStatus> {
        if std::net::UdpSocket::bind((self.bind_ip, 0)).is_ok() {
            return Ok(IfaceStatus::Unchanged);
        }

        // The bound address is gone. Ask the kernel where it would source
        // group traffic from now and report that upward.
        let probe = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        probe.connect(self.group)?;
        let new_addr = probe.local_addr()?;
        self.log.warning(&format!(
            "local interface {} is gone, replacement is {}",
            self.bind_ip,
            new_addr.ip()
        ));
        let handler = Arc::clone(&self.handler);
        self.handle.spawn(async move {
            handler.iface_change(new_addr);
        });
        Ok(IfaceStatus::Changed)
    }

    fn iface_get(&self) -> NetResult<SocketAddr> {
        Ok(self.local_addr)
    }

    fn iface_print(&self) -> String {
        self.bind_ip.to_string()
    }

    async fn token_target_set(&self, target: SocketAddr) -> NetResult<()> {
        *self.token_target.lock().expect("token target lock") = target;
        let handler = Arc::clone(&self.handler);
        self.handle.spawn(async move {
            handler.target_set_completed();
        });
        Ok(())
    }

    fn crypto_set(&self, cipher: CipherKind) -> NetResult<()> {
        match cipher {
            CipherKind::None => {
                *self.cipher.lock().expect("cipher lock") = cipher;
                Ok(())
            }
            other => Err(NetError::UnsupportedCipher(other)),
        }
    }

    fn processor_count_set(&self, count: usize) -> NetResult<()> {
        self.processor_count.store(count, Ordering::Relaxed);
        Ok(())
    }

    fn net_mtu_adjust(&self, config: &mut NetConfig) {
        config.net_mtu = config.net_mtu.saturating_sub(UDP_IP_OVERHEAD);
    }

    async fn member_add(&self, member: SocketAddr) -> NetResult<()> {
        let mut members = self.members.lock().expect("members lock");
        members.insert(member);
        self.log
            .debug(&format!("member {member} added ({} total)", members.len()));
        Ok(())
    }

    async fn member_remove(&self, member: SocketAddr) -> NetResult<()> {
        let mut members = self.members.lock().expect("members lock");
        members.remove(&member);
        self.log
            .debug(&format!("member {member} removed ({} left)", members.len()));
        Ok(())
    }

    async fn finalize(&self) -> NetResult<()> {
        self.closed.store(true, Ordering::Relaxed);
        if let Err(err) = self.drain_pending().await {
            self.log
                .warning(&format!("dropping coalesced sends at shutdown: {err}"));
        }
        for task in &self.recv_tasks {
            task.abort();
        }
        self.log.debug("multicast backend finalized");
        Ok(())
    }
}

impl Drop for UdpMulticastBackend {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
        for task in &self.recv_tasks {
            task.abort();
        }
    }
}
