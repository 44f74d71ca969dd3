//! External handler roles this core dispatches into but does not own.
//!
//! The worker pool, the streaming format layer, per-mount source logic and
//! admin HTML rendering all live behind these traits. This crate supplies no
//! implementation beyond what a test double needs.

use crate::client::Client;
use crate::http::ParsedRequest;

/// Outcome of handing a client to a downstream role. `Accepted` means the
/// collaborator has taken ownership of the client for the rest of its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOutcome {
    Accepted,
    Rejected,
}

/// The four downstream handler roles a request can be routed to.
pub trait Collaborators: Send + Sync {
    /// `auth_check_http` — pre-auth hook run before method classification.
    fn auth_check_http(&self, client: &Client, request: &ParsedRequest) -> bool;

    /// Attach as a listener on `mount` (GET/HEAD handler role).
    fn auth_add_listener(&self, mount: &str, client: &mut Client) -> HandoffOutcome;

    /// Hand off to source-ingest setup (SOURCE/PUT handler role).
    fn source_setup(&self, mount: &str, client: &mut Client, body_offset: usize) -> HandoffOutcome;

    /// Attach as an all-stats listener (admin credentials already verified).
    fn stats_attach_all(&self, client: &mut Client) -> HandoffOutcome;

    /// Attach as a slave + general listener (`/admin/streams`, relay credentials).
    fn stats_attach_relay(&self, client: &mut Client) -> HandoffOutcome;

    /// Hand off to the listener-auth collaborator for a STATS request that
    /// matched neither admin nor relay credentials.
    fn listener_auth(&self, client: &mut Client) -> HandoffOutcome;

    /// Route to the admin HTML/XML handler.
    fn admin_dispatch(&self, uri: &str, client: &mut Client) -> HandoffOutcome;

    /// Serve a preconfigured static resource (used for the flash-policy probe).
    fn serve_file(&self, mount: &str, client: &mut Client) -> HandoffOutcome;
}
