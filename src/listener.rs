//! Bind, tune and reconcile listening endpoints.
//!
//! The sole writer of the listen-socket array and its parallel profile array;
//! every other component only reads through [`ListenSocketManager::sockets`].

use std::net::SocketAddr;
use std::sync::Arc;

use mio::net::TcpListener as MioTcpListener;
use socket2::{Domain, Socket, Type};
use tracing::warn;

use crate::config::{CoreConfig, ListenerConfig};

/// Shared, reference-counted description of a listening endpoint. `Arc`'s
/// strong count doubles as the per-listener client refcount.
#[derive(Debug)]
pub struct ListenerProfile {
    pub bind_address: Option<String>,
    pub port: u16,
    pub qlen: i32,
    pub tls: bool,
    pub legacy: bool,
    pub legacy_mount: Option<String>,
    pub so_sndbuf: Option<u32>,
    pub so_mss: Option<u32>,
}

impl ListenerProfile {
    fn from_config(lc: &ListenerConfig) -> Self {
        Self {
            bind_address: lc.bind_address.clone(),
            port: lc.port,
            qlen: lc.qlen,
            tls: lc.tls,
            legacy: lc.legacy,
            legacy_mount: lc.legacy_mount.clone(),
            so_sndbuf: lc.so_sndbuf,
            so_mss: lc.so_mss,
        }
    }

    fn same_bind_point_as(&self, lc: &ListenerConfig) -> bool {
        self.port == lc.port && self.bind_address.as_deref().unwrap_or("") == lc.bind_address.as_deref().unwrap_or("")
    }
}

/// Owns the listen-socket array and its parallel profile array: the two
/// always have identical length, one-to-one correspondence by index.
#[derive(Default)]
pub struct ListenSocketManager {
    sockets: Vec<MioTcpListener>,
    profiles: Vec<Arc<ListenerProfile>>,
}

impl ListenSocketManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sockets(&self) -> &[MioTcpListener] {
        &self.sockets
    }

    pub fn sockets_mut(&mut self) -> &mut [MioTcpListener] {
        &mut self.sockets
    }

    pub fn profile(&self, index: usize) -> &Arc<ListenerProfile> {
        &self.profiles[index]
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Bind every configured listener not already bound; on failure, drop it
    /// from `config` and keep going (`setup`).
    pub fn setup(&mut self, config: &mut CoreConfig) {
        let already_bound: Vec<bool> = config
            .listeners
            .iter()
            .map(|lc| self.profiles.iter().any(|p| p.same_bind_point_as(lc)))
            .collect();

        let mut failed = Vec::new();
        for (idx, lc) in config.listeners.iter().enumerate() {
            if already_bound[idx] {
                continue;
            }
            match bind_one(lc) {
                Ok(listener) => {
                    self.sockets.push(listener);
                    self.profiles.push(Arc::new(ListenerProfile::from_config(lc)));
                }
                Err(e) => {
                    warn!(port = lc.port, error = %e, "failed to bind listener, removing from active set");
                    failed.push(idx);
                }
            }
        }
        for idx in failed.into_iter().rev() {
            config.listeners.remove(idx);
        }
    }

    /// Close listening sockets (`close`).
    ///
    /// When `all` is false and `config` still lists a privileged (`<1024`)
    /// listener at an identical bind point, that socket survives; everything
    /// else is closed. The arrays are compacted afterward.
    pub fn close(&mut self, config: Option<&CoreConfig>, all: bool) {
        let mut keep = vec![false; self.sockets.len()];
        if !all {
            if let Some(cfg) = config {
                for (idx, profile) in self.profiles.iter().enumerate() {
                    if profile.port < 1024 && cfg.listeners.iter().any(|lc| profile.same_bind_point_as(lc)) {
                        keep[idx] = true;
                    }
                }
            }
        }

        let mut sockets = Vec::new();
        let mut profiles = Vec::new();
        for (idx, (socket, profile)) in self.sockets.drain(..).zip(self.profiles.drain(..)).enumerate() {
            if keep[idx] {
                sockets.push(socket);
                profiles.push(profile);
            }
            // else: `socket` drops here, closing the fd.
        }
        self.sockets = sockets;
        self.profiles = profiles;
    }

    /// Remove the sockets at `indices` (already observed as errored/hung up)
    /// and compact (step 3).
    pub fn remove_defunct(&mut self, indices: &[usize]) {
        for &idx in indices.iter().rev() {
            self.sockets.remove(idx);
            self.profiles.remove(idx);
        }
    }
}

fn bind_one(lc: &ListenerConfig) -> crate::error::Result<MioTcpListener> {
    let addr_str = format!("{}:{}", lc.bind_address.as_deref().unwrap_or("0.0.0.0"), lc.port);
    let addr: SocketAddr = addr_str
        .parse()
        .map_err(|e| crate::error::Error::listener(format!("invalid bind address {addr_str}: {e}")))?;

    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)
        .map_err(|e| crate::error::Error::listener(format!("socket() failed: {e}")))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| crate::error::Error::listener(format!("SO_REUSEADDR failed: {e}")))?;
    #[cfg(unix)]
    socket
        .set_reuse_port(true)
        .map_err(|e| crate::error::Error::listener(format!("SO_REUSEPORT failed: {e}")))?;

    if let Some(sndbuf) = lc.so_sndbuf {
        socket
            .set_send_buffer_size(sndbuf as usize)
            .map_err(|e| crate::error::Error::listener(format!("SO_SNDBUF failed: {e}")))?;
    }

    socket
        .bind(&addr.into())
        .map_err(|e| crate::error::Error::listener(format!("bind({addr_str}) failed: {e}")))?;
    socket
        .listen(lc.qlen)
        .map_err(|e| crate::error::Error::listener(format!("listen() failed: {e}")))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| crate::error::Error::listener(format!("set_nonblocking failed: {e}")))?;

    #[cfg(unix)]
    if let Some(mss) = lc.so_mss {
        unsafe {
            use std::os::unix::io::AsRawFd;
            let fd = socket.as_raw_fd();
            let value = mss as libc::c_int;
            libc::setsockopt(
                fd,
                libc::IPPROTO_TCP,
                libc::TCP_MAXSEG,
                &value as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
    }

    Ok(MioTcpListener::from_std(socket.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lc(port: u16, addr: Option<&str>) -> ListenerConfig {
        ListenerConfig {
            bind_address: addr.map(str::to_string),
            port,
            qlen: 128,
            tls: false,
            legacy: false,
            legacy_mount: None,
            so_sndbuf: None,
            so_mss: None,
        }
    }

    #[test]
    fn setup_binds_ephemeral_listener() {
        let mut mgr = ListenSocketManager::new();
        let mut cfg = CoreConfig { listeners: vec![lc(0, Some("127.0.0.1"))], ..Default::default() };
        mgr.setup(&mut cfg);
        assert_eq!(mgr.len(), 1);
        assert_eq!(cfg.listeners.len(), 1);
    }

    #[test]
    fn setup_drops_unbindable_listener_from_config() {
        let mut mgr = ListenSocketManager::new();
        let mut cfg = CoreConfig { listeners: vec![lc(0, Some("127.0.0.1")), lc(0, Some("not-an-address"))], ..Default::default() };
        mgr.setup(&mut cfg);
        assert_eq!(mgr.len(), 1);
        assert_eq!(cfg.listeners.len(), 1);
    }

    #[test]
    fn close_preserves_privileged_port_still_in_config() {
        let mut mgr = ListenSocketManager::new();
        let mut cfg = CoreConfig { listeners: vec![lc(0, Some("127.0.0.1"))], ..Default::default() };
        mgr.setup(&mut cfg);
        // pretend the bound ephemeral port is privileged for this test
        if let Some(p) = mgr.profiles.first_mut() {
            *p = Arc::new(ListenerProfile { port: 80, ..ListenerProfile::from_config(&cfg.listeners[0]) });
        }
        let reload = CoreConfig { listeners: vec![lc(80, Some("127.0.0.1"))], ..Default::default() };
        mgr.close(Some(&reload), false);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn close_all_clears_everything() {
        let mut mgr = ListenSocketManager::new();
        let mut cfg = CoreConfig { listeners: vec![lc(0, Some("127.0.0.1"))], ..Default::default() };
        mgr.setup(&mut cfg);
        mgr.close(None, true);
        assert!(mgr.is_empty());
    }
}
