use std::io;
use std::io::{
    Read,
    Write,
};
use std::time::SystemTime;

use ascii::{
    AsciiChar,
    AsciiStr,
};
use log::{
    error,
    warn,
};
use tiny_http::StatusCode;

use crate::error::Result;

pub const ALLOW: &str = "Allow";
pub const DAV: &str = "DAV";
pub const ACCEPT_RANGES: &str = "Accept-Ranges";
pub const CONTENT_RANGE: &str = "Content-Range";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const LAST_MODIFIED: &str = "Last-Modified";
pub const CONNECTION: &str = "Connection";
pub const SERVER: &str = "Server";
pub const DATE: &str = "Date";

pub const TEXT_XML: &str = "text/xml; charset=utf-8";

/// Headers that describe the body and must not survive a failed response.
const ENTITY_HEADERS: [&str; 5] = [
    CONTENT_RANGE,
    CONTENT_LENGTH,
    CONTENT_TYPE,
    LAST_MODIFIED,
    ACCEPT_RANGES,
];

/// Outgoing response under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Default for DavResponse {
    fn default() -> DavResponse {
        DavResponse::new()
    }
}

impl DavResponse {
    pub fn new() -> DavResponse {
        DavResponse {
            status: 200,
            headers: vec!(),
            body: vec!(),
        }
    }

    pub fn set_status(&mut self, status: u16) -> &mut DavResponse {
        self.status = status;
        self
    }

    /// Set `field` to `value`, replacing any earlier value.
    pub fn set_header(&mut self, field: &str, value: &str) -> &mut DavResponse {
        self.remove_header(field);
        self.headers.push((field.to_string(), value.to_string()));
        self
    }

    pub fn remove_header(&mut self, field: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(field));
    }

    pub fn header(&self, field: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(field))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_body(&mut self, body: Vec<u8>) -> &mut DavResponse {
        self.body = body;
        self
    }

    /// Turn the response into a bare `500`, dropping the body and everything
    /// describing it. Protocol headers such as `Allow` and `DAV` stay.
    pub fn fail(&mut self) {
        self.status = 500;
        self.body.clear();
        for h in ENTITY_HEADERS.iter() {
            self.remove_header(h);
        }
    }

    /// Write the whole response, head and body, to `w`.
    ///
    /// `Content-Length` always describes the body actually sent. Headers whose
    /// value is not ASCII are dropped.
    pub fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, StatusCode(self.status).default_reason_phrase());
        head.push_str(&format!("{}: {}\r\n", DATE, httpdate::fmt_http_date(SystemTime::now())));
        head.push_str(&format!("{}: {}\r\n", SERVER, server_header()));
        for (k, v) in self.headers.iter() {
            if k.eq_ignore_ascii_case(CONTENT_LENGTH) || k.eq_ignore_ascii_case(DATE) || k.eq_ignore_ascii_case(SERVER) {
                continue;
            }
            match (AsciiStr::from_ascii(k.as_str()), AsciiStr::from_ascii(v.as_str())) {
                (Ok(k), Ok(v)) if !has_line_break(k) && !has_line_break(v) => {
                    head.push_str(&format!("{}: {}\r\n", k, v));
                },
                _ => {
                    warn!("dropping header {} with non-ascii value", k);
                },
            }
        }
        head.push_str(&format!("{}: {}\r\n\r\n", CONTENT_LENGTH, self.body.len()));
        w.write_all(head.as_bytes())?;
        w.write_all(&self.body)?;
        w.flush()
    }
}

fn has_line_break(s: &AsciiStr) -> bool {
    s.chars().any(|ch| ch == AsciiChar::CarriageReturn || ch == AsciiChar::LineFeed)
}

pub fn server_header() -> String {
    format!("davbridge/{}, tiny_http (Rust)", env!("CARGO_PKG_VERSION"))
}

/// Deferred part of a request, run on a worker.
///
/// It receives the body still waiting on the connection and the response
/// prepared by the handler, and fills in the rest.
pub type Task = Box<dyn FnOnce(&mut dyn Read, &mut DavResponse) -> Result<()> + Send + 'static>;

pub enum Reply {
    /// The response is complete and can be committed right away.
    Ready,
    /// The response must wait for the task to run.
    Async(Task),
}

/// Result of routing one request.
pub struct Dispatched {
    pub response: DavResponse,
    pub reply: Reply,
}

impl Dispatched {
    pub fn ready(response: DavResponse) -> Dispatched {
        Dispatched {
            response,
            reply: Reply::Ready,
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self.reply, Reply::Async(_))
    }

    /// Run the deferred task, if any, on the current thread.
    ///
    /// # Arguments
    ///
    /// * `body` - Remaining request body on the connection.
    pub fn finish(self, body: &mut dyn Read) -> DavResponse {
        let mut res = self.response;
        match self.reply {
            Reply::Ready => {},
            Reply::Async(task) => {
                match task(body, &mut res) {
                    Ok(()) => {},
                    Err(e) => {
                        error!("deferred request failed: {}", e);
                        res.fail();
                    },
                }
            },
        }
        res
    }
}
