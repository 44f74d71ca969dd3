//! Minimal request-line + header parser.
//!
//! Existing crates in this space (e.g. `httparse`) hardcode the `HTTP/`
//! version token and reject the `ICE/1.0` protocol token this server must
//! also accept, so the preamble parser is hand-rolled here: an ordered
//! header list plus case-insensitive lookup by name.

use crate::error::{Error, Result};

/// A parsed request line plus headers, in header-arrival order.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: String,
    pub uri: String,
    pub protocol: String,
    pub version_major: u8,
    pub version_minor: u8,
    headers: Vec<(String, String)>,
}

impl ParsedRequest {
    /// Case-insensitive header lookup, first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// Parse `buf` (which must already contain a header terminator) into a
/// request line and header list.
pub fn parse(buf: &[u8]) -> Result<ParsedRequest> {
    let text = std::str::from_utf8(buf).map_err(|_| Error::protocol("request is not valid UTF-8"))?;
    let mut lines = text.split("\r\n").flat_map(|l| l.split('\n'));

    let request_line = lines.next().ok_or_else(|| Error::protocol("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| Error::protocol("missing method"))?.to_string();
    let uri = parts.next().ok_or_else(|| Error::protocol("missing URI"))?.to_string();
    if !uri.starts_with('/') {
        return Err(Error::protocol("URI missing leading slash"));
    }
    let version_token = parts.next().ok_or_else(|| Error::protocol("missing protocol version"))?;
    let (protocol, version_major, version_minor) = parse_protocol(version_token)?;

    let mut headers = Vec::new();
    for line in lines {
        let line = line.trim_end_matches(['\r', '\0']);
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| Error::protocol(format!("malformed header: {line}")))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(ParsedRequest { method, uri, protocol, version_major, version_minor, headers })
}

fn parse_protocol(token: &str) -> Result<(String, u8, u8)> {
    let (name, version) = token.split_once('/').ok_or_else(|| Error::protocol(format!("malformed protocol token: {token}")))?;
    if name != "HTTP" && name != "ICE" {
        return Err(Error::protocol(format!("unsupported protocol token: {name}")));
    }
    let (major, minor) = version.split_once('.').ok_or_else(|| Error::protocol(format!("malformed version: {version}")))?;
    let major: u8 = major.parse().map_err(|_| Error::protocol(format!("malformed version: {version}")))?;
    let minor: u8 = minor.parse().map_err(|_| Error::protocol(format!("malformed version: {version}")))?;
    Ok((name.to_string(), major, minor))
}

/// Search `buf` for any accepted end-of-headers terminator, trying the
/// strict form first, returning the offset just past it.
pub fn find_terminator(buf: &[u8]) -> Option<usize> {
    const TERMINATORS: [&[u8]; 3] = [b"\r\n\r\n", b"\n\n", b"\r\r\n\r\r\n"];
    for terminator in TERMINATORS {
        if let Some(pos) = find_subslice(buf, terminator) {
            return Some(pos + terminator.len());
        }
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
