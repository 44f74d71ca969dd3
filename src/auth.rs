//! Basic-auth and ICY-password verifiers.

use base64::Engine;
use tracing::warn;

use crate::http::ParsedRequest;

/// HTTP Basic: header must start with `Basic `, decode, split on first `:`.
pub fn check_basic(header_value: &str, user: &str, pass: &str) -> bool {
    let Some(encoded) = header_value.strip_prefix("Basic ") else { return false };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else { return false };
    let Ok(decoded) = String::from_utf8(decoded) else { return false };
    let Some((got_user, got_pass)) = decoded.split_once(':') else { return false };
    got_user == user && got_pass == pass
}

/// ICY: compare `icy-password` directly.
pub fn check_icy(icy_password_header: &str, pass: &str) -> bool {
    icy_password_header == pass
}

/// Deprecated ICE fallback: compare `ice-password`, warn on successful use.
pub fn check_ice(ice_password_header: &str, pass: &str) -> bool {
    let ok = ice_password_header == pass;
    if ok {
        warn!("client authenticated via deprecated ice-password header");
    }
    ok
}

/// Admin credential check: ICY when the request protocol is ICY, else Basic.
///
/// The preamble parser only ever yields `HTTP` or `ICE` as a protocol token
/// (`ICY` is never produced), so this branch is unreachable for any request
/// that parsed successfully — matching upstream, where the same `ICY`
/// comparison is equally dead code for a parser accepting the same tokens.
pub fn check_admin(request: &ParsedRequest, user: &str, pass: &str) -> bool {
    if request.protocol == "ICY" {
        request.header("icy-password").map(|v| check_icy(v, pass)).unwrap_or(false)
    } else {
        request.header("authorization").map(|v| check_basic(v, user, pass)).unwrap_or(false)
    }
}

/// Source credential check: ICY when the protocol is ICY; else HTTP Basic,
/// then the deprecated ICE fallback when `ice_login` is enabled.
///
/// As in [`check_admin`], the `ICY` branch is unreachable for any request the
/// parser accepts; every parsed request falls through to Basic and, when
/// enabled, the `ice-password` fallback.
pub fn check_source(request: &ParsedRequest, user: &str, pass: &str, ice_login: bool) -> bool {
    if request.protocol == "ICY" {
        return request.header("icy-password").map(|v| check_icy(v, pass)).unwrap_or(false);
    }
    if request.header("authorization").map(|v| check_basic(v, user, pass)).unwrap_or(false) {
        return true;
    }
    if ice_login {
        if let Some(v) = request.header("ice-password") {
            return check_ice(v, pass);
        }
    }
    false
}
