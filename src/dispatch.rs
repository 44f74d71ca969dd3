//! Parse, authenticate, classify and route a request.

use tracing::{debug, info};

use crate::auth;
use crate::client::{Client, HandlerRole, OperationSet};
use crate::collaborators::{Collaborators, HandoffOutcome};
use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::http::ParsedRequest;
use crate::ip_access::{IpAccessCache, Lookup};

/// What the dispatcher did with a request, for logging/tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    HandedOff(HandlerRole),
    Rejected(u16),
    OptionsHandled,
    /// Silently dropped (user-agent cache match); no response sent.
    Dropped,
}

/// Everything the dispatcher needs beyond the client and parsed request.
pub struct DispatchContext<'a> {
    pub config: &'a CoreConfig,
    pub user_agent_cache: &'a IpAccessCache,
    pub collaborators: &'a dyn Collaborators,
    pub listener_port: u16,
    pub listener_bind: Option<&'a str>,
    pub client_count: usize,
    pub now_secs: u64,
}

pub fn dispatch(client: &mut Client, request: ParsedRequest, end_of_headers: usize, ctx: &DispatchContext<'_>) -> Result<DispatchOutcome> {
    client.flags.keep_alive = match request.header("connection") {
        Some(v) => v.eq_ignore_ascii_case("keep-alive"),
        None => request.version_major == 1 && request.version_minor == 1,
    };

    let mut effective_ip = client.connection.peer_ip().to_string();
    if ctx.config.trusted_forwarders.iter().any(|p| p == &effective_ip) {
        if let Some(xff) = request.header("x-forwarded-for") {
            if let Some(first) = xff.split(',').next() {
                effective_ip = first.trim().to_string();
            }
        }
    }
    client.connection.set_peer_ip(effective_ip.clone());

    if let Some(ua) = request.header("user-agent") {
        if matches!(ctx.user_agent_cache.contains(ua, ctx.now_secs), Lookup::Match) {
            let err = Error::auth(format!("blocked user-agent: {ua}"));
            debug!(ip = %effective_ip, error = %err, "dropping request");
            return Ok(DispatchOutcome::Dropped);
        }
    }

    let _ = ctx.collaborators.auth_check_http(client, &request);

    match request.method.as_str() {
        "HEAD" | "GET" => handle_get(client, &request, ctx),
        "SOURCE" | "PUT" => handle_source(client, &request, end_of_headers, ctx),
        "STATS" => handle_stats(client, &request, ctx),
        "OPTIONS" => {
            write_response(client, b"HTTP/1.0 200 OK\r\nAllow: GET, HEAD, SOURCE, PUT, STATS, OPTIONS\r\n\r\n");
            Ok(DispatchOutcome::OptionsHandled)
        }
        _ => {
            write_response(client, b"HTTP/1.0 501 Not Implemented\r\n\r\n");
            Ok(DispatchOutcome::Rejected(501))
        }
    }
}

fn handle_get(client: &mut Client, request: &ParsedRequest, ctx: &DispatchContext<'_>) -> Result<DispatchOutcome> {
    let Some(normalized) = normalize_uri(&request.uri) else {
        write_response(client, b"HTTP/1.0 400 Bad Request\r\n\r\n");
        return Ok(DispatchOutcome::Rejected(400));
    };

    client.flags.prefers_flv = normalized.ends_with(".flv")
        || query_param(&normalized, "type").map(|v| v.eq_ignore_ascii_case("flv")).unwrap_or(false);

    if let Some(ext) = extension_of(&normalized) {
        if ctx.config.excluded_extensions().any(|e| e.eq_ignore_ascii_case(ext)) {
            client.flags.skip_access_log = true;
        }
    }

    let mut routed_uri = normalized.clone();
    for alias in &ctx.config.aliases {
        if alias.matches(&normalized, ctx.listener_port, ctx.listener_bind) {
            routed_uri = alias.destination.clone();
            break;
        }
    }

    let limit_reached = ctx.client_count > ctx.config.client_limit;
    let is_admin_path = routed_uri.starts_with("/admin/") || routed_uri == "/admin.cgi";

    if is_admin_path {
        info!(uri = %routed_uri, "routing GET to admin collaborator");
        return Ok(collaborator_outcome(ctx.collaborators.admin_dispatch(&routed_uri, client), HandlerRole::Admin));
    }

    if limit_reached {
        let err = Error::auth("client limit reached");
        debug!(uri = %routed_uri, error = %err, "rejecting GET request");
        write_response(client, b"HTTP/1.0 403 Forbidden\r\n\r\nToo many clients connected\r\n");
        return Ok(DispatchOutcome::Rejected(403));
    }

    info!(uri = %routed_uri, "routing GET to listener collaborator");
    Ok(collaborator_outcome(ctx.collaborators.auth_add_listener(&routed_uri, client), HandlerRole::Listener))
}

fn handle_source(client: &mut Client, request: &ParsedRequest, end_of_headers: usize, ctx: &DispatchContext<'_>) -> Result<DispatchOutcome> {
    let authorized = match &ctx.config.source_password {
        Some(pass) => auth::check_source(request, "source", pass, ctx.config.ice_login),
        None => false,
    };
    if !authorized {
        let err = Error::auth("source credential check failed");
        debug!(error = %err, "rejecting source request");
        write_response(client, b"HTTP/1.0 401 Unauthorized\r\n\r\n");
        return Ok(DispatchOutcome::Rejected(401));
    }

    if let Some(expect) = request.header("expect") {
        if expect.eq_ignore_ascii_case("100-continue") {
            write_response(client, b"HTTP/1.1 100 Continue\r\n\r\n");
        }
    }

    let body_offset = end_of_headers;
    client.early_body = client.scratch[body_offset.min(client.scratch.len())..].to_vec();
    client.op = OperationSet::HandedOff(HandlerRole::Source);

    Ok(collaborator_outcome(ctx.collaborators.source_setup(&request.uri, client, body_offset), HandlerRole::Source))
}

fn handle_stats(client: &mut Client, request: &ParsedRequest, ctx: &DispatchContext<'_>) -> Result<DispatchOutcome> {
    if let (Some(user), Some(pass)) = (&ctx.config.admin_username, &ctx.config.admin_password) {
        if auth::check_admin(request, user, pass) {
            return Ok(collaborator_outcome(ctx.collaborators.stats_attach_all(client), HandlerRole::Stats));
        }
    }
    if request.uri == "/admin/streams" {
        if let (Some(user), Some(pass)) = (&ctx.config.relay_username, &ctx.config.relay_password) {
            if auth::check_admin(request, user, pass) {
                return Ok(collaborator_outcome(ctx.collaborators.stats_attach_relay(client), HandlerRole::Stats));
            }
        }
    }
    Ok(collaborator_outcome(ctx.collaborators.listener_auth(client), HandlerRole::Stats))
}

fn collaborator_outcome(outcome: HandoffOutcome, role: HandlerRole) -> DispatchOutcome {
    match outcome {
        HandoffOutcome::Accepted => DispatchOutcome::HandedOff(role),
        HandoffOutcome::Rejected => DispatchOutcome::Rejected(403),
    }
}

fn write_response(client: &mut Client, body: &[u8]) {
    let _ = client.connection.write(body);
}

fn extension_of(uri: &str) -> Option<&str> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.').map(|(_, ext)| ext)
}

fn query_param<'a>(uri: &'a str, key: &str) -> Option<&'a str> {
    let (_, query) = uri.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then_some(v)
    })
}

/// Percent-decode and reject `..` path traversal.
fn normalize_uri(uri: &str) -> Option<String> {
    let (path, rest) = match uri.split_once(['?', '#']) {
        Some((p, _)) => (p, &uri[p.len()..]),
        None => (uri, ""),
    };

    let decoded = percent_decode(path)?;
    if decoded.split('/').any(|segment| segment == "..") {
        return None;
    }
    Some(format!("{decoded}{rest}"))
}

fn percent_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let value = u8::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?;
            out.push(value);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
