//! A connection plus request-building state and its operation-set dispatch.

use std::sync::Arc;

use bytes::BytesMut;

use crate::connection::Connection;
use crate::http::ParsedRequest;
use crate::listener::ListenerProfile;

/// Scratch-buffer capacity for the preamble.
pub const SCRATCH_CAPACITY: usize = 4096;

/// The client's current behaviour under the worker pool.
///
/// `GetHandler`/`SourceHandler`/`StatsHandler` are terminal markers recording
/// which collaborator took ownership; this crate does not drive them further.
/// The worker pool and downstream handlers are external.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationSet {
    LegacyHandshake,
    PreambleRead,
    HandedOff(HandlerRole),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerRole {
    Listener,
    Source,
    Stats,
    Admin,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClientFlags {
    pub keep_alive: bool,
    pub skip_access_log: bool,
    pub prefers_flv: bool,
}

/// A connection plus the state needed to build and dispatch its first request.
pub struct Client {
    pub connection: Connection,
    pub scratch: BytesMut,
    pub op: OperationSet,
    pub headers: Option<ParsedRequest>,
    pub flags: ClientFlags,
    pub profile: Arc<ListenerProfile>,
    /// Next time (ms since an arbitrary epoch) the worker should invoke this
    /// client's operation again.
    pub schedule_ms: u64,
    /// Fixed anchor (connect time, ms) the preamble reader's back-off formula
    /// measures elapsed time against — never updated after construction.
    pub counter_ms: u64,
    /// Bytes read after the password line but before the legacy adapter
    /// finished — carried into the synthesized request.
    pub early_body: Vec<u8>,
}

impl Client {
    pub fn new(connection: Connection, profile: Arc<ListenerProfile>, now_ms: u64) -> Self {
        let op = if profile.legacy { OperationSet::LegacyHandshake } else { OperationSet::PreambleRead };
        Self {
            connection,
            scratch: BytesMut::with_capacity(SCRATCH_CAPACITY),
            op,
            headers: None,
            flags: ClientFlags::default(),
            profile,
            schedule_ms: now_ms,
            counter_ms: now_ms,
            early_body: Vec::new(),
        }
    }

    pub fn scratch_remaining(&self) -> usize {
        SCRATCH_CAPACITY.saturating_sub(self.scratch.len())
    }
}
