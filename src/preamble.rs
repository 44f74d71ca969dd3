//! Non-blocking, budgeted read of bytes up to end-of-headers.

use tracing::debug;

use crate::client::Client;
use crate::error::Result;
use crate::http;
use crate::io::IoOutcome;

// The trailing NUL is part of the literal the client sends, not a terminator;
// the probe is 23 bytes, not the 22 visible characters.
const FLASH_POLICY_PROBE: &[u8] = b"<policy-file-request/>\0";

/// Minimum and maximum reschedule delays from the back-off formula.
const MIN_RESCHEDULE_MS: u64 = 6;
const MAX_RESCHEDULE_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The client must be torn down: not running, errored, past its
    /// deadline, zero bytes with no error, or buffer filled with no
    /// terminator.
    Terminal,
    /// Try again no earlier than `schedule_ms`.
    Reschedule { schedule_ms: u64 },
    /// The flash-policy probe was seen; hand off to the file-serving
    /// collaborator.
    FlashPolicy,
    /// End-of-headers found; `end` is the offset just past the terminator.
    HeadersParsed { end: usize },
}

/// Run one invocation of the preamble reader.
pub fn step(client: &mut Client, running: bool, now_ms: u64, now_secs: u64) -> Result<StepOutcome> {
    if !running || client.connection.has_error() || now_secs >= client.connection.disconnect_time() {
        return Ok(StepOutcome::Terminal);
    }

    let max_read = client.scratch_remaining().saturating_sub(1);
    if max_read > 0 {
        let mut tmp = vec![0u8; max_read];
        match client.connection.read(&mut tmp) {
            Ok(IoOutcome::Done(0)) => return Ok(StepOutcome::Terminal),
            Ok(IoOutcome::Done(n)) => {
                client.scratch.extend_from_slice(&tmp[..n]);
            }
            Ok(IoOutcome::WouldBlock) => {
                return Ok(StepOutcome::Reschedule { schedule_ms: backoff(client, now_ms) });
            }
            Err(e) => {
                debug!(error = %e, "preamble read failed fatally");
                return Ok(StepOutcome::Terminal);
            }
        }
    }

    if client.scratch.len() >= FLASH_POLICY_PROBE.len() && &client.scratch[..FLASH_POLICY_PROBE.len()] == FLASH_POLICY_PROBE {
        return Ok(StepOutcome::FlashPolicy);
    }

    match http::find_terminator(&client.scratch) {
        Some(end) => Ok(StepOutcome::HeadersParsed { end }),
        None if client.scratch.len() >= crate::client::SCRATCH_CAPACITY => Ok(StepOutcome::Terminal),
        None => Ok(StepOutcome::Reschedule { schedule_ms: backoff(client, now_ms) }),
    }
}

fn backoff(client: &Client, now_ms: u64) -> u64 {
    let elapsed = now_ms.saturating_sub(client.counter_ms);
    let delay = (elapsed / 2).clamp(MIN_RESCHEDULE_MS, MAX_RESCHEDULE_MS);
    now_ms + delay
}
