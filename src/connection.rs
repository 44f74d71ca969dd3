//! Per-connection state, ID allocation and teardown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::io::Transport;

/// Process-wide connection-ID counter.
///
/// A strictly-increasing ID without a dedicated lock: the atomic increment
/// gives the same guarantee a counter behind a mutex would.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn allocate_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// An accepted peer.
pub struct Connection {
    /// `None` is the "no socket" sentinel: close has already happened.
    transport: Option<Transport>,
    peer_ip: String,
    id: u64,
    connect_time: u64,
    disconnect_time: u64,
    bytes_sent: u64,
    error: bool,
}

impl Connection {
    /// Construct a new connection at accept time (step 7).
    pub fn new(transport: Transport, peer_addr: SocketAddr, connect_time: u64) -> Self {
        Self {
            transport: Some(transport),
            peer_ip: canonical_peer_ip(peer_addr),
            id: allocate_id(),
            connect_time,
            disconnect_time: connect_time,
            bytes_sent: 0,
            error: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_ip(&self) -> &str {
        &self.peer_ip
    }

    /// Override the peer IP, e.g. with a trusted proxy's `X-Forwarded-For` value.
    pub fn set_peer_ip(&mut self, ip: String) {
        self.peer_ip = ip;
    }

    pub fn connect_time(&self) -> u64 {
        self.connect_time
    }

    pub fn disconnect_time(&self) -> u64 {
        self.disconnect_time
    }

    pub fn set_disconnect_time(&mut self, when: u64) {
        self.disconnect_time = when;
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// True once any fatal I/O has occurred; monotonic (invariants).
    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn mark_error(&mut self) {
        self.error = true;
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Read bytes, counting nothing (reads don't contribute to `bytes_sent`).
    pub fn read(&mut self, buf: &mut [u8]) -> crate::error::Result<crate::io::IoOutcome> {
        match &mut self.transport {
            Some(t) => {
                let outcome = t.read(buf);
                if outcome.is_err() {
                    self.error = true;
                }
                outcome
            }
            None => Ok(crate::io::IoOutcome::Done(0)),
        }
    }

    /// Write bytes, accounting them into `bytes_sent` on success. Once
    /// `error` is set, no further write is attempted (invariant).
    pub fn write(&mut self, buf: &[u8]) -> crate::error::Result<crate::io::IoOutcome> {
        if self.error {
            return Ok(crate::io::IoOutcome::WouldBlock);
        }
        match &mut self.transport {
            Some(t) => {
                let outcome = t.write(buf);
                match outcome {
                    Ok(crate::io::IoOutcome::Done(n)) => self.bytes_sent += n as u64,
                    Err(_) => self.error = true,
                    _ => {}
                }
                outcome
            }
            None => Ok(crate::io::IoOutcome::WouldBlock),
        }
    }

    pub fn writev(&mut self, vecs: &[&[u8]], skip: usize) -> crate::error::Result<crate::io::IoOutcome> {
        if self.error {
            return Ok(crate::io::IoOutcome::WouldBlock);
        }
        match &mut self.transport {
            Some(t) => {
                let outcome = t.writev(vecs, skip);
                match outcome {
                    Ok(crate::io::IoOutcome::Done(n)) => self.bytes_sent += n as u64,
                    Err(_) => self.error = true,
                    _ => {}
                }
                outcome
            }
            None => Ok(crate::io::IoOutcome::WouldBlock),
        }
    }

    /// Idempotent teardown (, §8 "repeated close is a no-op").
    pub fn close(&mut self) {
        if let Some(mut t) = self.transport.take() {
            t.shutdown();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Strip the IPv4-mapped IPv6 prefix, per boundary behaviour.
fn canonical_peer_ip(addr: SocketAddr) -> String {
    match addr {
        SocketAddr::V4(v4) => v4.ip().to_string(),
        SocketAddr::V6(v6) => {
            if let Some(v4) = v6.ip().to_ipv4_mapped() {
                v4.to_string()
            } else {
                let s = v6.ip().to_string();
                s.strip_prefix("::ffff:").map(str::to_string).unwrap_or(s)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn ids_are_strictly_increasing() {
        let a = allocate_id();
        let b = allocate_id();
        assert!(b > a);
    }

    #[test]
    fn ipv4_mapped_ipv6_is_stripped() {
        let mapped = Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0x0a00, 0x0001);
        let addr = SocketAddr::new(std::net::IpAddr::V6(mapped), 1234);
        assert_eq!(canonical_peer_ip(addr), "10.0.0.1");
    }

    #[test]
    fn plain_ipv4_is_unchanged() {
        let addr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)), 80);
        assert_eq!(canonical_peer_ip(addr), "203.0.113.9");
    }
}
