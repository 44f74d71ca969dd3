//! A minimal cooperative driver over the client's operation set.
//!
//! A production worker pool — many threads, each owning a cohort of
//! clients — is an external collaborator; this is just enough of one to
//! drive the legacy handshake, preamble read and dispatch steps end to
//! end in tests and in a small single-threaded deployment.

use tracing::debug;

use crate::client::{Client, OperationSet};
use crate::collaborators::Collaborators;
use crate::config::CoreConfig;
use crate::dispatch::{self, DispatchContext, DispatchOutcome};
use crate::http;
use crate::ip_access::IpAccessCache;
use crate::legacy;
use crate::preamble;

/// What happened to one client on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Pending,
    Terminal,
    FlashPolicy,
    Dispatched(DispatchOutcome),
}

/// Drive `client` through at most one operation invocation.
pub fn tick(
    client: &mut Client,
    running: bool,
    now_ms: u64,
    now_secs: u64,
    config: &CoreConfig,
    user_agent_cache: &IpAccessCache,
    collaborators: &dyn Collaborators,
    client_count: usize,
) -> crate::error::Result<TickOutcome> {
    if now_ms < client.schedule_ms {
        return Ok(TickOutcome::Pending);
    }

    match client.op {
        OperationSet::LegacyHandshake => match legacy::step(client, running, now_ms, now_secs)? {
            legacy::StepOutcome::Terminal => Ok(TickOutcome::Terminal),
            legacy::StepOutcome::Reschedule { schedule_ms } => {
                client.schedule_ms = schedule_ms;
                Ok(TickOutcome::Pending)
            }
            legacy::StepOutcome::Handed => {
                debug!(id = client.connection.id(), "legacy handshake complete, switched to preamble read");
                Ok(TickOutcome::Pending)
            }
        },
        OperationSet::PreambleRead => match preamble::step(client, running, now_ms, now_secs)? {
            preamble::StepOutcome::Terminal => Ok(TickOutcome::Terminal),
            preamble::StepOutcome::Reschedule { schedule_ms } => {
                client.schedule_ms = schedule_ms;
                Ok(TickOutcome::Pending)
            }
            preamble::StepOutcome::FlashPolicy => {
                let mount = config.flashpolicy_mount.clone();
                collaborators.serve_file(&mount, client);
                Ok(TickOutcome::FlashPolicy)
            }
            preamble::StepOutcome::HeadersParsed { end } => {
                let request = http::parse(&client.scratch[..end])?;
                let ctx = DispatchContext {
                    config,
                    user_agent_cache,
                    collaborators,
                    listener_port: client.profile.port,
                    listener_bind: client.profile.bind_address.as_deref(),
                    client_count,
                    now_secs,
                };
                let outcome = dispatch::dispatch(client, request, end, &ctx)?;
                Ok(TickOutcome::Dispatched(outcome))
            }
        },
        OperationSet::HandedOff(_) => Ok(TickOutcome::Terminal),
    }
}
