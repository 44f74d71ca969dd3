//! Translate the "password-first" dialogue into a synthetic HTTP request.

use base64::Engine;
use tracing::debug;

use crate::client::{Client, OperationSet};
use crate::error::Result;
use crate::io::IoOutcome;

const RESPONSE: &[u8] = b"OK2\r\nicy-caps:11\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Terminal,
    Reschedule { schedule_ms: u64 },
    /// The password line was consumed and the synthetic request installed;
    /// the client's operation set has already been switched to the
    /// preamble reader.
    Handed,
}

/// Fixed reschedule delay while waiting for the password line's terminator.
const SCAN_RESCHEDULE_MS: u64 = 100;

pub fn step(client: &mut Client, running: bool, now_ms: u64, now_secs: u64) -> Result<StepOutcome> {
    if !running || client.connection.has_error() || now_secs >= client.connection.disconnect_time() {
        return Ok(StepOutcome::Terminal);
    }

    let max_read = client.scratch_remaining().saturating_sub(2);
    if max_read > 0 {
        let mut tmp = vec![0u8; max_read];
        match client.connection.read(&mut tmp) {
            Ok(IoOutcome::Done(0)) => return Ok(StepOutcome::Terminal),
            Ok(IoOutcome::Done(n)) => client.scratch.extend_from_slice(&tmp[..n]),
            Ok(IoOutcome::WouldBlock) => return Ok(StepOutcome::Reschedule { schedule_ms: now_ms + SCAN_RESCHEDULE_MS }),
            Err(e) => {
                debug!(error = %e, "legacy read failed fatally");
                return Ok(StepOutcome::Terminal);
            }
        }
    }

    let Some(terminator_pos) = client.scratch.iter().position(|&b| b == b'\r' || b == b'\n') else {
        if client.scratch.len() >= crate::client::SCRATCH_CAPACITY {
            return Ok(StepOutcome::Terminal);
        }
        return Ok(StepOutcome::Reschedule { schedule_ms: now_ms + SCAN_RESCHEDULE_MS });
    };

    let password = String::from_utf8_lossy(&client.scratch[..terminator_pos]).into_owned();
    let mut rest_start = terminator_pos;
    while rest_start < client.scratch.len() && (client.scratch[rest_start] == b'\r' || client.scratch[rest_start] == b'\n') {
        rest_start += 1;
    }
    let trailing = client.scratch.split_off(rest_start);

    let mount = client.profile.legacy_mount.as_deref().unwrap_or("/");
    let credentials = format!("source:{password}");
    let auth_value = base64::engine::general_purpose::STANDARD.encode(credentials);

    let mut synthetic = format!("SOURCE {mount} HTTP/1.0\r\nAuthorization: Basic {auth_value}\r\n").into_bytes();
    synthetic.extend_from_slice(&trailing);

    client.scratch.clear();
    client.scratch.extend_from_slice(&synthetic);
    client.op = OperationSet::PreambleRead;

    match client.connection.write(RESPONSE) {
        Ok(IoOutcome::Done(_)) | Ok(IoOutcome::WouldBlock) => {}
        Err(e) => {
            debug!(error = %e, "legacy OK2 response failed");
            return Ok(StepOutcome::Terminal);
        }
    }

    Ok(StepOutcome::Handed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_and_trailing_headers_compose_expected_request() {
        // Unit-test the pure composition logic directly rather than through a live
        // socket, mirroring what `step` builds once a password line is found.
        let password = "hackme";
        let trailing = b"icy-name:Test\r\n\r\n";
        let mount = "/live";
        let credentials = format!("source:{password}");
        let auth_value = base64::engine::general_purpose::STANDARD.encode(credentials);
        assert_eq!(auth_value, "c291cmNlOmhhY2ttZQ==");

        let mut synthetic = format!("SOURCE {mount} HTTP/1.0\r\nAuthorization: Basic {auth_value}\r\n").into_bytes();
        synthetic.extend_from_slice(trailing);

        let parsed = crate::http::parse(&synthetic).unwrap();
        assert_eq!(parsed.method, "SOURCE");
        assert_eq!(parsed.uri, "/live");
        assert_eq!(parsed.header("authorization"), Some(format!("Basic {auth_value}").as_str()));
        assert_eq!(parsed.header("icy-name"), Some("Test"));
    }
}
