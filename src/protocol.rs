//! The wire protocol: a small subset of HTTP/1.1.
//!
//! ```text
//! GET /<key> HTTP/1.1
//!
//! POST /<key> HTTP/1.1
//! Content-Length: <n>
//!
//! <n bytes of body>
//!
//! DELETE /<key> HTTP/1.1
//! ```
//!
//! Every request is answered with either `HTTP/1.1 200 OK` (carrying the value for a GET) or
//! `HTTP/1.1 404 Not found`, each with a `Content-length` header.
//!
//! Decoding works on whatever bytes have been read from a connection so far. A request head
//! is the request line followed by `name: value` header lines and ends at the first blank line.
//! A GET or DELETE is answered as soon as its request line is in: its head also ends at the
//! first line that is not a header, or with the buffered data, and header lines that arrive
//! after it was answered are skipped. A POST needs its blank line and all `Content-Length` body
//! bytes before it is complete. Anything after a complete request belongs to the next request.
//! An unterminated request line that is still a prefix of a valid one waits for more bytes.
use serde::Serialize;
use thiserror::Error;

/// the only protocol version accepted on the request line
pub const PROTOCOL_VERSION: &str = "HTTP/1.1";

/// upper bound on the size of a request or response head
pub const MAX_HEAD_LEN: usize = 4096;

/// upper bound on a declared body length
pub const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

/// upper bound on the length of a key, in bytes
pub const MAX_KEY_LEN: usize = 80;

/// The kind of operation a [`Request`] asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RequestKind {
    /// look up a key
    Get,
    /// insert or overwrite a key
    Post,
    /// remove a key
    Delete,
}

impl RequestKind {
    fn method(self) -> &'static str {
        match self {
            RequestKind::Get => "GET",
            RequestKind::Post => "POST",
            RequestKind::Delete => "DELETE",
        }
    }
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// what to do
    pub kind: RequestKind,
    /// the request path without its leading `/`
    pub key: String,
    /// the value to store. Always empty unless `kind` is [`RequestKind::Post`].
    pub body: Vec<u8>,
}

impl Request {
    /// a lookup of `key`
    pub fn get(key: impl Into<String>) -> Self {
        Request {
            kind: RequestKind::Get,
            key: key.into(),
            body: Vec::new(),
        }
    }

    /// an insert of `value` under `key`
    pub fn post(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Request {
            kind: RequestKind::Post,
            key: key.into(),
            body: value.into(),
        }
    }

    /// a removal of `key`
    pub fn delete(key: impl Into<String>) -> Self {
        Request {
            kind: RequestKind::Delete,
            key: key.into(),
            body: Vec::new(),
        }
    }
}

/// The outcome of a request, as sent back on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// the request succeeded. A GET carries the value found.
    Ok(Option<Vec<u8>>),
    /// the lookup, insert or delete failed
    NotFound,
}

/// Reasons a request or response could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// the first token is not GET, POST or DELETE
    #[error("unknown method {0:?}")]
    UnknownMethod(String),

    /// the request target does not start with `/`
    #[error("request target {0:?} does not start with '/'")]
    InvalidPath(String),

    /// the third token is not `HTTP/1.1`
    #[error("unsupported protocol version {0:?}")]
    InvalidVersion(String),

    /// the key is empty, too long or not UTF-8
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// a POST head line that is neither a `name: value` header nor the blank line
    #[error("invalid header line {0:?}")]
    InvalidHeader(String),

    /// no blank line within the first `MAX_HEAD_LEN` bytes
    #[error("head is longer than {} bytes", MAX_HEAD_LEN)]
    HeadTooLarge,

    /// the declared body is larger than `MAX_BODY_LEN`
    #[error("declared body length {0} is larger than {}", MAX_BODY_LEN)]
    BodyTooLarge(usize),

    /// the peer closed the connection in the middle of a message
    #[error("connection closed after {0} bytes of an incomplete message")]
    Truncated(usize),

    /// a response status line could not be understood
    #[error("invalid status line {0:?}")]
    InvalidStatus(String),
}

/// Decodes the request at the start of `buf`.
///
/// Returns `Ok(None)` if more bytes are needed, or the request together with the number of
/// bytes it occupied.
pub fn decode_request(buf: &[u8]) -> Result<Option<(Request, usize)>, ProtocolError> {
    let start = idle_len(buf);
    let rest = &buf[start..];
    if rest.is_empty() {
        return Ok(None);
    }

    let line_end = match rest.iter().position(|&b| b == b'\n') {
        Some(i) => start + i,
        None => {
            if rest.len() > MAX_HEAD_LEN {
                return Err(ProtocolError::HeadTooLarge);
            }
            if is_partial_request_line(rest) || is_partial_header_line(rest) {
                return Ok(None);
            }
            buf.len()
        }
    };

    let (kind, key) = parse_request_line(&buf[start..line_end])?;
    if line_end == buf.len() {
        // an unterminated GET or DELETE ends with the buffered data
        return match kind {
            RequestKind::Post => Ok(None),
            _ => Ok(Some((bodyless(kind, key), buf.len()))),
        };
    }

    let headers_start = line_end + 1;
    let mut line_start = headers_start;
    let head = loop {
        if line_start - start > MAX_HEAD_LEN {
            return Err(ProtocolError::HeadTooLarge);
        }
        let newline = match buf[line_start..].iter().position(|&b| b == b'\n') {
            Some(i) => line_start + i,
            None => break None,
        };
        let line = &buf[line_start..newline];
        if line.is_empty() || line == b"\r" {
            break Some(Head {
                lines_end: line_start,
                body_start: newline + 1,
            });
        }
        if !is_header_line(line) {
            if kind == RequestKind::Post {
                return Err(ProtocolError::InvalidHeader(lossy(trim_whitespace(line))));
            }
            // the next request starts here
            break None;
        }
        line_start = newline + 1;
    };

    if kind != RequestKind::Post {
        let consumed = head.map_or(line_start, |h| h.body_start);
        return Ok(Some((bodyless(kind, key), consumed)));
    }

    let head = match head {
        Some(head) => head,
        None if buf.len() - start > MAX_HEAD_LEN => return Err(ProtocolError::HeadTooLarge),
        None => return Ok(None),
    };
    let len = content_length(&buf[headers_start..head.lines_end]);
    if len > MAX_BODY_LEN {
        return Err(ProtocolError::BodyTooLarge(len));
    }
    let end = head.body_start + len;
    if buf.len() < end {
        return Ok(None);
    }
    Ok(Some((
        Request {
            kind,
            key,
            body: buf[head.body_start..end].to_vec(),
        },
        end,
    )))
}

/// The number of leading bytes of `buf` that carry no request: whitespace, and header lines
/// left over from a GET or DELETE that was answered before its head was complete.
pub fn idle_len(buf: &[u8]) -> usize {
    let mut pos = 0;
    loop {
        pos += buf[pos..]
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        match buf[pos..].iter().position(|&b| b == b'\n') {
            Some(i) if is_header_line(&buf[pos..pos + i]) => pos += i + 1,
            _ => return pos,
        }
    }
}

fn parse_request_line(line: &[u8]) -> Result<(RequestKind, String), ProtocolError> {
    let mut tokens = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|t| !t.is_empty());

    let method = tokens.next().unwrap_or_default();
    let kind = match method {
        b"GET" => RequestKind::Get,
        b"POST" => RequestKind::Post,
        b"DELETE" => RequestKind::Delete,
        other => return Err(ProtocolError::UnknownMethod(lossy(other))),
    };

    let target = tokens.next().unwrap_or_default();
    let key = match target.strip_prefix(b"/") {
        Some(key) => parse_key(key)?,
        None => return Err(ProtocolError::InvalidPath(lossy(target))),
    };

    let version = tokens.next().unwrap_or_default();
    if version != PROTOCOL_VERSION.as_bytes() {
        return Err(ProtocolError::InvalidVersion(lossy(version)));
    }
    Ok((kind, key))
}

fn bodyless(kind: RequestKind, key: String) -> Request {
    Request {
        kind,
        key,
        body: Vec::new(),
    }
}

/// Serializes a request the way [`decode_request`] expects it.
pub fn encode_request(request: &Request) -> Vec<u8> {
    let mut out = format!("{} /{} {}\r\n", request.kind.method(), request.key, PROTOCOL_VERSION)
        .into_bytes();
    if request.kind == RequestKind::Post {
        out.extend_from_slice(format!("Content-Length: {}\r\n", request.body.len()).as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&request.body);
    } else {
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Serializes a response.
pub fn encode_response(response: &Response) -> Vec<u8> {
    match response {
        Response::Ok(body) => {
            let body = body.as_deref().unwrap_or_default();
            let mut out = format!(
                "{} 200 OK\r\nContent-length: {}\r\n\r\n",
                PROTOCOL_VERSION,
                body.len()
            )
            .into_bytes();
            out.extend_from_slice(body);
            out
        }
        Response::NotFound => {
            format!("{} 404 Not found\r\nContent-length: 0\r\n\r\n", PROTOCOL_VERSION).into_bytes()
        }
    }
}

/// Decodes the response at the start of `buf`.
///
/// Returns `Ok(None)` if more bytes are needed. A 200 response always carries `Some` body,
/// possibly empty.
pub fn decode_response(buf: &[u8]) -> Result<Option<(Response, usize)>, ProtocolError> {
    let head = match find_head(buf, 0)? {
        Some(head) => head,
        None => return Ok(None),
    };
    let (status_line, header_lines) = split_first_line(&buf[..head.lines_end]);
    let mut tokens = status_line
        .split(|b| b.is_ascii_whitespace())
        .filter(|t| !t.is_empty());

    let version = tokens.next().unwrap_or_default();
    let code = tokens.next().unwrap_or_default();
    if version != PROTOCOL_VERSION.as_bytes() {
        return Err(ProtocolError::InvalidStatus(lossy(status_line)));
    }

    let len = content_length(header_lines);
    if len > MAX_BODY_LEN {
        return Err(ProtocolError::BodyTooLarge(len));
    }
    let end = head.body_start + len;
    if buf.len() < end {
        return Ok(None);
    }
    let response = match code {
        b"200" => Response::Ok(Some(buf[head.body_start..end].to_vec())),
        b"404" => Response::NotFound,
        _ => return Err(ProtocolError::InvalidStatus(lossy(status_line))),
    };
    Ok(Some((response, end)))
}

#[derive(Debug, Clone, Copy)]
struct Head {
    // end of the last header line, before the blank line
    lines_end: usize,
    // first byte after the blank line
    body_start: usize,
}

/// finds the blank line that ends the head starting at `start`
fn find_head(buf: &[u8], start: usize) -> Result<Option<Head>, ProtocolError> {
    let mut line_start = start;
    while let Some(offset) = buf[line_start..].iter().position(|&b| b == b'\n') {
        let newline = line_start + offset;
        let line = &buf[line_start..newline];
        if line.is_empty() || line == b"\r" {
            if line_start - start > MAX_HEAD_LEN {
                return Err(ProtocolError::HeadTooLarge);
            }
            return Ok(Some(Head {
                lines_end: line_start,
                body_start: newline + 1,
            }));
        }
        line_start = newline + 1;
    }
    if buf.len() - start > MAX_HEAD_LEN {
        return Err(ProtocolError::HeadTooLarge);
    }
    Ok(None)
}

fn split_first_line(head: &[u8]) -> (&[u8], &[u8]) {
    match head.iter().position(|&b| b == b'\n') {
        Some(i) => (&head[..i], &head[i + 1..]),
        None => (head, &[]),
    }
}

/// `true` if `line` could still grow into a valid request line
fn is_partial_request_line(line: &[u8]) -> bool {
    const METHODS: [&[u8]; 3] = [b"GET", b"POST", b"DELETE"];
    let mut tokens = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|t| !t.is_empty());
    let method = tokens.next().unwrap_or_default();
    match (tokens.next(), tokens.next(), tokens.next()) {
        (None, _, _) => METHODS.iter().any(|m| m.starts_with(method)),
        (Some(target), None, _) => METHODS.contains(&method) && target.starts_with(b"/"),
        (Some(_), Some(version), None) => {
            let open = line.last().map_or(false, |b| !b.is_ascii_whitespace());
            open && version.len() < PROTOCOL_VERSION.len()
                && PROTOCOL_VERSION.as_bytes().starts_with(version)
        }
        _ => false,
    }
}

/// `true` for a complete `name: value` line
fn is_header_line(line: &[u8]) -> bool {
    match line.iter().position(|&b| b == b':') {
        Some(colon) => is_token(&line[..colon]),
        None => false,
    }
}

/// `true` if `fragment` could still grow into a header line
fn is_partial_header_line(fragment: &[u8]) -> bool {
    match fragment.iter().position(|&b| b == b':') {
        Some(colon) => is_token(&fragment[..colon]),
        None => is_token(fragment),
    }
}

fn is_token(name: &[u8]) -> bool {
    !name.is_empty()
        && name
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

/// the value of the first usable `Content-Length` header, or 0
fn content_length(header_lines: &[u8]) -> usize {
    header_lines
        .split(|&b| b == b'\n')
        .filter_map(|line| {
            let colon = line.iter().position(|&b| b == b':')?;
            let (name, value) = (&line[..colon], &line[colon + 1..]);
            if !trim_whitespace(name).eq_ignore_ascii_case(b"content-length") {
                return None;
            }
            std::str::from_utf8(value).ok()?.trim().parse::<usize>().ok()
        })
        .next()
        .unwrap_or(0)
}

fn parse_key(raw: &[u8]) -> Result<String, ProtocolError> {
    if raw.is_empty() {
        return Err(ProtocolError::InvalidKey("key is empty".to_string()));
    }
    if raw.len() > MAX_KEY_LEN {
        return Err(ProtocolError::InvalidKey(format!(
            "key is {} bytes long, the limit is {}",
            raw.len(),
            MAX_KEY_LEN
        )));
    }
    String::from_utf8(raw.to_vec())
        .map_err(|_| ProtocolError::InvalidKey("key is not valid UTF-8".to_string()))
}

fn trim_whitespace(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if !first.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    while let [rest @ .., last] = bytes {
        if !last.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    bytes
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
