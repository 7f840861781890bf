//! Minimal blocking HTTP/1.1 for the MCP endpoint.
//!
//! One request per connection, answered with `Connection: close`. The body is
//! read to exactly `Content-Length` bytes, never to EOF, so keep-alive clients
//! that don't half-close get their answer immediately. Limits are decided from
//! the head before any body byte is read.

use std::io::{ErrorKind, Read, Write};
use thiserror::Error;

/// Request head cap (request line + headers)
const MAX_HEADER_SIZE: usize = 32 * 1024;

/// Header count httparse will accept
const MAX_HEADERS: usize = 64;

/// Request body cap (1 MiB)
pub const MAX_BODY_SIZE: usize = 1_048_576;

const READ_CHUNK: usize = 4096;

const HEAD_END: &[u8] = b"\r\n\r\n";

/// Parsed HTTP request
#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Header value by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP response to write back
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json(status: u16, value: &impl serde::Serialize) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Why a request could not be read. Each maps to the status it is answered with.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request head exceeds {} bytes", MAX_HEADER_SIZE)]
    HeadTooLarge,
    #[error("request body exceeds {} bytes", MAX_BODY_SIZE)]
    BodyTooLarge,
    #[error("{0} requires Content-Length")]
    LengthRequired(String),
    #[error("chunked transfer encoding not supported")]
    Chunked,
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("connection closed mid-request")]
    Truncated,
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl RequestError {
    pub fn status(&self) -> u16 {
        match self {
            RequestError::HeadTooLarge => 431,
            RequestError::BodyTooLarge => 413,
            RequestError::LengthRequired(_) => 411,
            RequestError::Chunked => 501,
            RequestError::Malformed(_) | RequestError::Truncated | RequestError::Io(_) => 400,
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        411 => "Length Required",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Read one request.
///
/// `None` means the peer went away before sending anything; no response is due.
pub fn read_request(stream: &mut impl Read) -> Option<Result<HttpRequest, RequestError>> {
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    let head_len = loop {
        if let Some(pos) = buf.windows(HEAD_END.len()).position(|w| w == HEAD_END) {
            break pos + HEAD_END.len();
        }
        if buf.len() > MAX_HEADER_SIZE {
            return Some(Err(RequestError::HeadTooLarge));
        }
        match stream.read(&mut chunk) {
            Ok(0) if buf.is_empty() => return None,
            Ok(0) => return Some(Err(RequestError::Truncated)),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) if buf.is_empty() => return None,
            Err(e) => return Some(Err(e.into())),
        }
    };
    if head_len > MAX_HEADER_SIZE {
        return Some(Err(RequestError::HeadTooLarge));
    }

    Some(parse_request(stream, buf, head_len))
}

/// Parse the head in `buf[..head_len]`, then finish the body from `stream`.
/// Bytes already buffered past the head are the start of the body.
fn parse_request(
    stream: &mut impl Read,
    mut buf: Vec<u8>,
    head_len: usize,
) -> Result<HttpRequest, RequestError> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut head = httparse::Request::new(&mut slots);
    match head.parse(&buf[..head_len]) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(RequestError::Malformed("incomplete request head".to_string()))
        }
        Err(e) => return Err(RequestError::Malformed(e.to_string())),
    }

    let mut request = HttpRequest {
        method: head.method.unwrap_or_default().to_string(),
        path: head.path.unwrap_or("/").to_string(),
        headers: head
            .headers
            .iter()
            .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
            .collect(),
        body: Vec::new(),
    };

    if request
        .header("Transfer-Encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    {
        return Err(RequestError::Chunked);
    }

    let length = match request.header("Content-Length") {
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed(format!("bad Content-Length '{}'", value)))?,
        None if matches!(request.method.as_str(), "POST" | "PUT" | "PATCH") => {
            return Err(RequestError::LengthRequired(request.method.clone()))
        }
        None => 0,
    };
    if length > MAX_BODY_SIZE {
        return Err(RequestError::BodyTooLarge);
    }

    let mut body = buf.split_off(head_len);
    body.truncate(length);
    let buffered = body.len();
    if buffered < length {
        body.resize(length, 0);
        stream.read_exact(&mut body[buffered..]).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => RequestError::Truncated,
            _ => RequestError::Io(e),
        })?;
    }
    request.body = body;
    Ok(request)
}

/// Serialize `response` and write it in one go.
pub fn write_response(stream: &mut impl Write, response: &HttpResponse) -> std::io::Result<()> {
    let mut out = Vec::with_capacity(256 + response.body.len());
    write!(
        out,
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        reason(response.status),
        response.body.len()
    )?;
    for (name, value) in &response.headers {
        write!(out, "{}: {}\r\n", name, value)?;
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&response.body);

    stream.write_all(&out)?;
    stream.flush()
}
