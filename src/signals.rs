//! Signal delivery alongside the listen sockets, pollable from the same
//! reactor rather than handled asynchronously off a signal handler.

use mio::event::Source;
use mio::{Interest, Registry, Token};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook_mio::v0_8::Signals;

use crate::error::{Error, Result};

/// One notification read off the signal channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// TERM or INT: halt the accept loop.
    Terminate,
    /// HUP: schedule a config reread for the cooperating thread.
    Reread,
}

/// Wraps the underlying signalfd-backed source, pollable alongside listen
/// sockets.
pub struct SignalChannel {
    signals: Signals,
}

impl SignalChannel {
    pub fn new() -> Result<Self> {
        let signals = Signals::new([SIGTERM, SIGINT, SIGHUP]).map_err(|e| Error::other(format!("signalfd setup failed: {e}")))?;
        Ok(Self { signals })
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> Result<()> {
        self.signals.register(registry, token, Interest::READABLE).map_err(Error::from)
    }

    /// Drain pending signals into their corresponding events.
    pub fn drain(&mut self) -> Vec<SignalEvent> {
        self.signals
            .pending()
            .filter_map(|signal| match signal {
                SIGTERM | SIGINT => Some(SignalEvent::Terminate),
                SIGHUP => Some(SignalEvent::Reread),
                _ => None,
            })
            .collect()
    }
}
