//! End-to-end scenarios over the connection accept/dispatch core, exercised
//! through real loopback sockets rather than the unit-level plumbing each
//! module's own `#[cfg(test)]` block already covers.

use std::io::Write;
use std::net::TcpStream as StdTcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mio::net::TcpStream as MioTcpStream;

use streamgate::client::{Client, HandlerRole, OperationSet};
use streamgate::collaborators::{Collaborators, HandoffOutcome};
use streamgate::config::{CoreConfig, ListenerConfig};
use streamgate::connection::Connection;
use streamgate::dispatch::DispatchOutcome;
use streamgate::http::ParsedRequest;
use streamgate::io::Transport;
use streamgate::ip_access::IpAccessCache;
use streamgate::listener::ListenerProfile;
use streamgate::worker::{self, TickOutcome};

fn listener_config(port: u16, legacy: bool, legacy_mount: Option<&str>) -> ListenerConfig {
    ListenerConfig {
        bind_address: Some("127.0.0.1".to_string()),
        port,
        qlen: 128,
        tls: false,
        legacy,
        legacy_mount: legacy_mount.map(str::to_string),
        so_sndbuf: None,
        so_mss: None,
    }
}

fn listener_profile(legacy: bool, legacy_mount: Option<&str>) -> Arc<ListenerProfile> {
    Arc::new(ListenerProfile {
        bind_address: None,
        port: 8000,
        qlen: 128,
        tls: false,
        legacy,
        legacy_mount: legacy_mount.map(str::to_string),
        so_sndbuf: None,
        so_mss: None,
    })
}

/// Bind an ephemeral loopback listener, connect to it and hand back the
/// server-side [`Client`] plus the peer socket the test drives.
fn accept_pair(legacy: bool, legacy_mount: Option<&str>) -> (Client, StdTcpStream) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = StdTcpStream::connect(addr).unwrap();
    let (server_side, peer_addr) = listener.accept().unwrap();
    server_side.set_nonblocking(true).unwrap();
    let transport = Transport::Plain(MioTcpStream::from_std(server_side));
    let mut connection = Connection::new(transport, peer_addr, 0);
    connection.set_disconnect_time(1_000_000);
    let client = Client::new(connection, listener_profile(legacy, legacy_mount), 0);
    (client, peer)
}

/// Records which collaborator method fired and hands every role request
/// straight back as accepted, mirroring the shape of a real worker pool's
/// handler roles without owning any of their behaviour.
#[derive(Default)]
struct RecordingCollaborators {
    calls: Mutex<Vec<String>>,
}

impl RecordingCollaborators {
    fn record(&self, what: impl Into<String>) {
        self.calls.lock().unwrap().push(what.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Collaborators for RecordingCollaborators {
    fn auth_check_http(&self, _client: &Client, _request: &ParsedRequest) -> bool {
        self.record("auth_check_http");
        true
    }

    fn auth_add_listener(&self, mount: &str, _client: &mut Client) -> HandoffOutcome {
        self.record(format!("auth_add_listener:{mount}"));
        HandoffOutcome::Accepted
    }

    fn source_setup(&self, mount: &str, _client: &mut Client, _body_offset: usize) -> HandoffOutcome {
        self.record(format!("source_setup:{mount}"));
        HandoffOutcome::Accepted
    }

    fn stats_attach_all(&self, _client: &mut Client) -> HandoffOutcome {
        self.record("stats_attach_all");
        HandoffOutcome::Accepted
    }

    fn stats_attach_relay(&self, _client: &mut Client) -> HandoffOutcome {
        self.record("stats_attach_relay");
        HandoffOutcome::Accepted
    }

    fn listener_auth(&self, _client: &mut Client) -> HandoffOutcome {
        self.record("listener_auth");
        HandoffOutcome::Accepted
    }

    fn admin_dispatch(&self, uri: &str, _client: &mut Client) -> HandoffOutcome {
        self.record(format!("admin_dispatch:{uri}"));
        HandoffOutcome::Accepted
    }

    fn serve_file(&self, mount: &str, client: &mut Client) -> HandoffOutcome {
        self.record(format!("serve_file:{mount}"));
        let _ = client.connection.write(b"HTTP/1.0 200 OK\r\n\r\n");
        HandoffOutcome::Accepted
    }
}

fn tick_until_dispatched(
    client: &mut Client,
    config: &CoreConfig,
    cache: &IpAccessCache,
    collaborators: &dyn Collaborators,
) -> TickOutcome {
    for _ in 0..50 {
        let outcome = worker::tick(client, true, 0, 0, config, cache, collaborators, 0).unwrap();
        match outcome {
            TickOutcome::Pending => std::thread::sleep(Duration::from_millis(5)),
            other => return other,
        }
    }
    panic!("client did not reach a terminal/dispatched state in time");
}

#[test]
fn plain_get_request_hands_off_to_listener_collaborator() {
    let (mut client, mut peer) = accept_pair(false, None);
    peer.write_all(b"GET /stream.mp3 HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();

    let config = CoreConfig { client_limit: 1000, ..Default::default() };
    let cache = IpAccessCache::new();
    let collaborators = RecordingCollaborators::default();

    let outcome = tick_until_dispatched(&mut client, &config, &cache, &collaborators);
    assert_eq!(outcome, TickOutcome::Dispatched(DispatchOutcome::HandedOff(HandlerRole::Listener)));
    assert_eq!(collaborators.calls(), vec!["auth_check_http".to_string(), "auth_add_listener:/stream.mp3".to_string()]);
}

#[test]
fn legacy_handshake_produces_synthetic_source_request() {
    let (mut client, mut peer) = accept_pair(true, Some("/live"));
    peer.write_all(b"hackme\r\nicy-name:Test Stream\r\n\r\n").unwrap();

    let config = CoreConfig { source_password: Some("hackme".to_string()), ..Default::default() };
    let cache = IpAccessCache::new();
    let collaborators = RecordingCollaborators::default();

    assert_eq!(client.op, OperationSet::LegacyHandshake);
    let outcome = tick_until_dispatched(&mut client, &config, &cache, &collaborators);
    assert_eq!(outcome, TickOutcome::Dispatched(DispatchOutcome::HandedOff(HandlerRole::Source)));
    assert_eq!(collaborators.calls(), vec!["auth_check_http".to_string(), "source_setup:/live".to_string()]);

    // the client socket should have received the legacy "OK2" acknowledgement
    let mut buf = [0u8; 32];
    peer.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    let n = peer.read_some(&mut buf);
    assert!(n > 0, "peer should have received the OK2 handshake response");
}

// small helper trait so the test above doesn't need to juggle WouldBlock itself
trait ReadSome {
    fn read_some(&mut self, buf: &mut [u8]) -> usize;
}

impl ReadSome for StdTcpStream {
    fn read_some(&mut self, buf: &mut [u8]) -> usize {
        use std::io::Read;
        self.read(buf).unwrap_or(0)
    }
}

#[test]
fn banned_ip_is_dropped_silently_at_accept() {
    let banned = Arc::new(IpAccessCache::new());
    banned.add("127.0.0.1", 0);

    // pick a free ephemeral port up front: AcceptLoop::new doesn't report the
    // concrete port back into the config it binds from.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let bound_port = probe.local_addr().unwrap().port();
    drop(probe);

    let mut config = CoreConfig { listeners: vec![listener_config(bound_port, false, None)], ..Default::default() };
    let running = Arc::new(AtomicBool::new(true));
    let reread = Arc::new(AtomicBool::new(false));
    let signal_errored = Arc::new(AtomicBool::new(false));
    let mut accept_loop = streamgate::accept::AcceptLoop::new(&mut config, banned, running, reread, signal_errored).unwrap();

    struct Collector {
        accepted: Mutex<Vec<u64>>,
    }
    impl streamgate::accept::WorkerHandoff for Collector {
        fn accept_client(&self, client: Client) {
            self.accepted.lock().unwrap().push(client.connection.id());
        }
    }
    let collector = Collector { accepted: Mutex::new(Vec::new()) };

    let _peer = StdTcpStream::connect(("127.0.0.1", bound_port)).unwrap();
    // give the kernel a moment to complete the handshake before polling
    std::thread::sleep(Duration::from_millis(50));
    accept_loop.poll_once(&collector).unwrap();

    assert!(collector.accepted.lock().unwrap().is_empty(), "banned peer must never reach the worker handoff");
}

#[test]
fn flash_policy_probe_served_via_collaborator() {
    let (mut client, mut peer) = accept_pair(false, None);
    peer.write_all(b"<policy-file-request/>\0").unwrap();

    let config = CoreConfig { flashpolicy_mount: "/flashpolicy".to_string(), ..Default::default() };
    let cache = IpAccessCache::new();
    let collaborators = RecordingCollaborators::default();

    let outcome = tick_until_dispatched(&mut client, &config, &cache, &collaborators);
    assert_eq!(outcome, TickOutcome::FlashPolicy);
    assert_eq!(collaborators.calls(), vec!["serve_file:/flashpolicy".to_string()]);
}

#[test]
fn preamble_step_on_idle_socket_reschedules_without_blocking() {
    let (mut client, _peer) = accept_pair(false, None);
    let start = Instant::now();
    let outcome = streamgate::preamble::step(&mut client, true, 0, 0).unwrap();
    let elapsed = start.elapsed();

    assert!(matches!(outcome, streamgate::preamble::StepOutcome::Reschedule { .. }));
    assert!(elapsed < Duration::from_millis(250), "a single step must never block waiting for peer data, took {elapsed:?}");
}

#[test]
fn reload_close_drops_unbound_listener_not_in_new_config() {
    let mut manager = streamgate::listener::ListenSocketManager::new();
    let mut config = CoreConfig { listeners: vec![listener_config(0, false, None)], ..Default::default() };
    manager.setup(&mut config);
    assert_eq!(manager.len(), 1);

    // a reload whose config no longer references this (non-privileged,
    // ephemeral) bind point must close it rather than keep it around.
    let next_config = CoreConfig::default();
    manager.close(Some(&next_config), false);
    assert!(manager.is_empty());
}
