//! Helpers shared by the in-crate test suites.

use crate::backend::NetHandler;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Records every callback the backend under test fires.
#[derive(Default)]
pub(crate) struct TestHandler {
    delivered: Mutex<Vec<Vec<u8>>>,
    iface_changes: AtomicUsize,
    target_sets: AtomicUsize,
}

impl TestHandler {
    pub(crate) fn delivered(&self) -> Vec<Vec<u8>> {
        self.delivered.lock().unwrap().clone()
    }

    pub(crate) fn iface_changes(&self) -> usize {
        self.iface_changes.load(Ordering::SeqCst)
    }

    pub(crate) fn target_set_count(&self) -> usize {
        self.target_sets.load(Ordering::SeqCst)
    }
}

impl NetHandler for TestHandler {
    fn deliver(&self, msg: &[u8]) {
        self.delivered.lock().unwrap().push(msg.to_vec());
    }

    fn iface_change(&self, _new_addr: SocketAddr) {
        self.iface_changes.fetch_add(1, Ordering::SeqCst);
    }

    fn target_set_completed(&self) {
        self.target_sets.fetch_add(1, Ordering::SeqCst);
    }
}

/// A currently-free UDP port on loopback.
pub(crate) fn ephemeral_port() -> u16 {
    std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Poll `cond` until it holds, panicking after `limit`.
pub(crate) async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
