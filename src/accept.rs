//! The dedicated accept thread.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::CoreConfig;
use crate::connection::Connection;
use crate::io::Transport;
use crate::ip_access::{now_secs, IpAccessCache, Lookup};
use crate::listener::ListenSocketManager;
use crate::signals::{SignalChannel, SignalEvent};

#[cfg(feature = "tls")]
use openssl::ssl::SslAcceptor;

/// Receives freshly accepted, fully initialised clients. A real deployment's
/// worker pool implements this; this crate only defines the seam. The worker
/// pool itself is out of scope here.
pub trait WorkerHandoff {
    fn accept_client(&self, client: Client);
}

const SIGNAL_TOKEN: Token = Token(usize::MAX);
const POLL_TIMEOUT_WITH_SIGNALS: Duration = Duration::from_secs(4);
const POLL_TIMEOUT_WITHOUT_SIGNALS: Duration = Duration::from_millis(333);
const ACCEPT_FAILURE_SLEEP: Duration = Duration::from_millis(500);

pub struct AcceptLoop {
    poll: Poll,
    events: Events,
    manager: ListenSocketManager,
    banned: Arc<IpAccessCache>,
    signals: Option<SignalChannel>,
    running: Arc<AtomicBool>,
    reread_requested: Arc<AtomicBool>,
    /// Set once the signal channel itself errors out; a companion thread
    /// managing this loop's lifecycle watches this flag to know when to
    /// restart it.
    signal_channel_errored: Arc<AtomicBool>,
    header_timeout_secs: u64,
    new_connections_slowdown: u32,
    #[cfg(feature = "tls")]
    tls_acceptor: Option<SslAcceptor>,
}

impl AcceptLoop {
    pub fn new(
        config: &mut CoreConfig,
        banned: Arc<IpAccessCache>,
        running: Arc<AtomicBool>,
        reread_requested: Arc<AtomicBool>,
        signal_channel_errored: Arc<AtomicBool>,
    ) -> crate::error::Result<Self> {
        let poll = Poll::new().map_err(crate::error::Error::from)?;
        let mut manager = ListenSocketManager::new();
        manager.setup(config);
        for (idx, socket) in manager.sockets_mut().iter_mut().enumerate() {
            poll.registry().register(socket, Token(idx), Interest::READABLE).map_err(crate::error::Error::from)?;
        }

        let signals = match SignalChannel::new() {
            Ok(mut s) => {
                if let Err(e) = s.register(poll.registry(), SIGNAL_TOKEN) {
                    warn!(error = %e, "failed to register signal channel, falling back to short poll timeout");
                    None
                } else {
                    Some(s)
                }
            }
            Err(e) => {
                warn!(error = %e, "signalfd unavailable, falling back to short poll timeout");
                None
            }
        };

        #[cfg(feature = "tls")]
        let tls_acceptor = if config.listeners.iter().any(|l| l.tls) {
            match crate::tls::build_acceptor(config) {
                Ok(acceptor) => Some(acceptor),
                Err(e) => {
                    warn!(error = %e, "TLS setup failed, TLS listeners will reject connections");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            poll,
            events: Events::with_capacity(64),
            manager,
            banned,
            signals,
            running,
            reread_requested,
            signal_channel_errored,
            header_timeout_secs: config.header_timeout,
            new_connections_slowdown: config.new_connections_slowdown,
            #[cfg(feature = "tls")]
            tls_acceptor,
        })
    }

    /// Run until the process running flag is cleared.
    pub fn run(&mut self, handoff: &dyn WorkerHandoff) {
        while self.running.load(Ordering::Acquire) {
            if let Err(e) = self.poll_once(handoff) {
                warn!(error = %e, "accept loop iteration failed, continuing");
            }
        }
        info!("accept loop exiting");
    }

    /// One iteration: poll, handle signals, sweep defunct sockets, accept at
    /// most one connection.
    pub fn poll_once(&mut self, handoff: &dyn WorkerHandoff) -> crate::error::Result<()> {
        let timeout = if self.signals.is_some() { POLL_TIMEOUT_WITH_SIGNALS } else { POLL_TIMEOUT_WITHOUT_SIGNALS };
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(crate::error::Error::from(e)),
        }

        let mut defunct = Vec::new();
        let mut ready_listener = None;

        for event in self.events.iter() {
            if event.token() == SIGNAL_TOKEN {
                if event.is_error() || (event.is_read_closed() && !event.is_readable()) {
                    warn!("signal channel errored, signal delivery unavailable until restarted");
                    self.signal_channel_errored.store(true, Ordering::Release);
                    continue;
                }
                if let Some(signals) = &mut self.signals {
                    for sig in signals.drain() {
                        match sig {
                            SignalEvent::Terminate => {
                                info!("termination signal received, halting accept loop");
                                self.running.store(false, Ordering::Release);
                                return Ok(());
                            }
                            SignalEvent::Reread => {
                                info!("hangup signal received, scheduling config reread");
                                self.reread_requested.store(true, Ordering::Release);
                            }
                        }
                    }
                }
                continue;
            }

            let idx = event.token().0;
            if event.is_error() || (event.is_read_closed() && !event.is_readable()) {
                defunct.push(idx);
            } else if event.is_readable() && ready_listener.is_none() {
                ready_listener = Some(idx);
            }
        }

        if !defunct.is_empty() {
            defunct.sort_unstable();
            defunct.dedup();
            self.manager.remove_defunct(&defunct);
        }

        if let Some(idx) = ready_listener {
            if idx < self.manager.len() {
                self.accept_one(idx, handoff);
            }
        }

        Ok(())
    }

    fn accept_one(&mut self, idx: usize, handoff: &dyn WorkerHandoff) {
        let profile = self.manager.profile(idx).clone();
        let accepted = self.manager.sockets_mut()[idx].accept();
        let (stream, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!(error = %e, "accept() failed");
                std::thread::sleep(ACCEPT_FAILURE_SLEEP);
                return;
            }
        };

        let now = now_secs();
        if matches!(self.banned.contains(&canonical_ip(peer_addr), now), Lookup::Match) {
            debug!(peer = %peer_addr, "rejecting banned IP at accept");
            return;
        }

        tune_accepted_socket(&stream);

        let transport = match self.upgrade_transport(&profile, stream) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "TLS upgrade failed for accepted connection");
                return;
            }
        };

        let mut connection = Connection::new(transport, peer_addr, now);
        connection.set_disconnect_time(now + self.header_timeout_secs);

        let now_ms = now * 1000;
        let client = Client::new(connection, profile, now_ms);
        handoff.accept_client(client);

        if self.new_connections_slowdown > 0 {
            std::thread::sleep(Duration::from_millis(5 * self.new_connections_slowdown as u64));
        }
    }

    #[cfg(feature = "tls")]
    fn upgrade_transport(&self, profile: &crate::listener::ListenerProfile, stream: mio::net::TcpStream) -> crate::error::Result<Transport> {
        if !profile.tls {
            return Ok(Transport::Plain(stream));
        }
        let Some(acceptor) = &self.tls_acceptor else {
            return Err(crate::error::Error::listener("TLS listener has no acceptor configured"));
        };
        // NB: this drives the handshake to completion synchronously on the accept
        // thread. A resumable non-blocking handshake, suspending and resuming
        // like the preamble reader does, is a known follow-up noted in DESIGN.md.
        match acceptor.accept(stream) {
            Ok(stream) => Ok(Transport::Tls(Box::new(stream))),
            Err(e) => Err(crate::error::Error::other(format!("TLS accept failed: {e}"))),
        }
    }

    #[cfg(not(feature = "tls"))]
    fn upgrade_transport(&self, _profile: &crate::listener::ListenerProfile, stream: mio::net::TcpStream) -> crate::error::Result<Transport> {
        Ok(Transport::Plain(stream))
    }
}

fn canonical_ip(addr: SocketAddr) -> String {
    match addr {
        SocketAddr::V4(v4) => v4.ip().to_string(),
        SocketAddr::V6(v6) => {
            if let Some(v4) = v6.ip().to_ipv4_mapped() {
                v4.to_string()
            } else {
                v6.ip().to_string().strip_prefix("::ffff:").map(str::to_string).unwrap_or_else(|| v6.ip().to_string())
            }
        }
    }
}

/// Prefer TCP_CORK, falling back to TCP_NODELAY.
fn tune_accepted_socket(stream: &mio::net::TcpStream) {
    use std::os::unix::io::AsRawFd;
    let fd = stream.as_raw_fd();
    let value: libc::c_int = 1;
    let cork_result = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_CORK,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if cork_result != 0 {
        let _ = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_TCP,
                libc::TCP_NODELAY,
                &value as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
    }
}
