//! Optional UDP/IP unicast backend (registry index 1, feature `unicast`).
//!
//! For networks where multicast is filtered or unavailable: one datagram
//! socket per instance carries both token and replicated traffic, and
//! "multicast" sends are replayed over unicast to every member registered
//! through `member_add`. The coalescing queue and its flush ordering work
//! exactly as in the multicast backend; the guarantee holds per receiver.

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

/// Replicated-unicast transport.
pub struct UdpUnicastBackend {
    handle: Handle,
    handler: Arc<dyn NetHandler>,
    log: NetLog,

    socket: Arc<UdpSocket>,
    probe: std::net::UdpSocket,

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

impl UdpUnicastBackend {
    /// Bind the datagram socket for one configured interface and start the
    /// receive task.
    ///
    /// The member set starts empty; replicated sends reach nobody until the
    /// upper layer registers the membership through `member_add` (the local
    /// node included, which is how a node sees its own multicasts).
    ///
    /// # Errors
    /// Fails if the interface number is not configured, the interface is
    /// not IPv4, or socket setup fails.
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
                    "IPv6 interface {addr} is not supported by the unicast backend"
                )));
            }
        };

        let socket = sock::build_udp(SocketAddr::from((bind_ip, iface.token_port)), &config)?;
        let (socket, probe) = sock::into_tokio(socket, &handle)?;
        let local_addr = socket.local_addr()?;

        let closed = Arc::new(AtomicBool::new(false));
        let recv_tasks = vec![sock::spawn_deliver(
            &handle,
            Arc::clone(&socket),
            Arc::clone(&handler),
            Arc::clone(&closed),
            log.clone(),
            "unicast",
        )];

        log.debug(&format!("unicast backend bound to {local_addr}"));

        Ok(Self {
            handle,
            handler,
            log,
            socket,
            probe,
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

    /// Number of member addresses currently registered for replication.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.lock().expect("members lock").len()
    }

    /// Send one payload to every registered member.
    async fn replicate(&self, payload: &[u8]) -> NetResult<usize> {
        let members: Vec<SocketAddr> = self
            .members
            .lock()
            .expect("members lock")
            .iter()
            .copied()
            .collect();
        for member in members {
            self.socket.send_to(payload, member).await?;
        }
        Ok(payload.len())
    }

    /// Replicate every coalesced payload, oldest first.
    async fn drain_pending(&self) -> NetResult<()> {
        loop {
            let next = self.pending.lock().expect("pending lock").pop_front();
            let Some(payload) = next else {
                return Ok(());
            };
            if let Err(err) = self.replicate(&payload).await {
                self.pending
                    .lock()
                    .expect("pending lock")
                    .push_front(payload);
                return Err(err);
            }
        }
    }
}

#[async_trait]
impl Backend for UdpUnicastBackend {
    fn name(&self) -> &'static str {
        "UDP/IP Unicast"
    }

    async fn token_send(&self, payload: &[u8]) -> NetResult<usize> {
        let target = *self.token_target.lock().expect("token target lock");
        Ok(self.socket.send_to(payload, target).await?)
    }

    async fn mcast_flush_send(&self, payload: &[u8]) -> NetResult<usize> {
        self.drain_pending().await?;
        self.replicate(payload).await
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
        sock::drain_deliver(&self.probe, &self.handler)?;
        Ok(())
    }

    fn recv_mcast_empty(&self) -> bool {
        !sock::pending_datagram(&self.probe)
    }

    fn iface_check(&self) -> NetResult<IfaceStatus> {
        if std::net::UdpSocket::bind((self.bind_ip, 0)).is_ok() {
            return Ok(IfaceStatus::Unchanged);
        }

        let target = *self.token_target.lock().expect("token target lock");
        let probe = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        probe.connect(target)?;
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
        self.log.debug("unicast backend finalized");
        Ok(())
    }
}

impl Drop for UdpUnicastBackend {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
        for task in &self.recv_tasks {
            task.abort();
        }
    }
}
