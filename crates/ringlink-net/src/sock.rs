//! Datagram socket plumbing shared by the built-in backends.
//!
//! Sockets are built through `socket2` for the options the backends need
//! (reuse-address, buffer sizing, multicast membership) and then converted
//! into tokio sockets on the runtime the channel was initialized with. Each
//! receive socket keeps a non-blocking std dup alongside the tokio half:
//! the dup shares the kernel receive queue, which is what lets
//! `recv_mcast_empty` peek without consuming and `recv_flush` drain and
//! deliver inline on the owning context.

use crate::backend::NetHandler;
use crate::config::NetConfig;
use crate::log::NetLog;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Largest datagram the receive path accepts (maximum UDP payload).
pub(crate) const RECV_BUF_LEN: usize = 65536;

/// Build a non-blocking UDP socket bound to `bind`, with the configured
/// kernel buffer sizes.
pub(crate) fn build_udp(bind: SocketAddr, config: &NetConfig) -> io::Result<Socket> {
    let domain = if bind.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.set_recv_buffer_size(config.recv_buffer_size)?;
    socket.set_send_buffer_size(config.send_buffer_size)?;
    socket.bind(&bind.into())?;
    Ok(socket)
}

/// Split a bound socket into its tokio half and a non-blocking std dup of
/// the same kernel socket.
pub(crate) fn into_tokio(
    socket: Socket,
    handle: &Handle,
) -> io::Result<(Arc<UdpSocket>, std::net::UdpSocket)> {
    let probe: std::net::UdpSocket = socket.try_clone()?.into();
    let std_socket: std::net::UdpSocket = socket.into();
    // from_std needs a reactor; the channel may be initialized from outside
    // the runtime that will drive it.
    let _guard = handle.enter();
    let tokio_socket = UdpSocket::from_std(std_socket)?;
    Ok((Arc::new(tokio_socket), probe))
}

/// Spawn the receive task for one socket: read datagrams and hand each to
/// the upper layer's delivery callback, on the instance runtime.
pub(crate) fn spawn_deliver(
    handle: &Handle,
    socket: Arc<UdpSocket>,
    handler: Arc<dyn NetHandler>,
    closed: Arc<AtomicBool>,
    log: NetLog,
    label: &'static str,
) -> JoinHandle<()> {
    handle.spawn(async move {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, _from)) => handler.deliver(&buf[..len]),
                Err(err) => {
                    if !closed.load(Ordering::Relaxed) {
                        log.warning(&format!("{label} receive failed: {err}"));
                    }
                    break;
                }
            }
        }
    })
}

/// Whether the socket behind `probe` has at least one datagram queued.
pub(crate) fn pending_datagram(probe: &std::net::UdpSocket) -> bool {
    let mut peek = [0u8; 1];
    match probe.peek_from(&mut peek) {
        Ok(_) => true,
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => false,
        Err(_) => false,
    }
}

/// Drain every queued datagram from the socket behind `probe`, delivering
/// each inline on the calling context.
pub(crate) fn drain_deliver(
    probe: &std::net::UdpSocket,
    handler: &Arc<dyn NetHandler>,
) -> io::Result<()> {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        match probe.recv_from(&mut buf) {
            Ok((len, _from)) => handler.deliver(&buf[..len]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}
