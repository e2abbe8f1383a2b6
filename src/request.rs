use std::fmt;
use std::str::FromStr;

use percent_encoding::percent_decode_str;

/// The request methods the gateway knows how to route.
///
/// Ordering of the variants is the order `Allow` lists them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DavMethod {
    Get,
    Put,
    Delete,
    Mkcol,
    Move,
    Propfind,
    Options,
}

impl DavMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DavMethod::Get => "GET",
            DavMethod::Put => "PUT",
            DavMethod::Delete => "DELETE",
            DavMethod::Mkcol => "MKCOL",
            DavMethod::Move => "MOVE",
            DavMethod::Propfind => "PROPFIND",
            DavMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for DavMethod {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

/// Returned for any method name outside [DavMethod].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMethod(pub String);

impl FromStr for DavMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<DavMethod, UnknownMethod> {
        let m = match s.to_ascii_uppercase().as_str() {
            "GET" => DavMethod::Get,
            "PUT" => DavMethod::Put,
            "DELETE" => DavMethod::Delete,
            "MKCOL" => DavMethod::Mkcol,
            "MOVE" => DavMethod::Move,
            "PROPFIND" => DavMethod::Propfind,
            "OPTIONS" => DavMethod::Options,
            _ => {
                return Err(UnknownMethod(s.to_string()));
            },
        };
        Ok(m)
    }
}

/// What the connection knows about the request body at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// No body was sent.
    Empty,
    /// The whole body is already in memory.
    Buffered(Vec<u8>),
    /// The body is still on the connection. `None` when the client did not
    /// announce a length.
    Streamed(Option<u64>),
}

/// Transport-neutral view of an incoming request.
#[derive(Debug, Clone)]
pub struct DavRequest {
    /// Method as sent by the client; unknown methods are kept verbatim.
    pub method: Result<DavMethod, UnknownMethod>,
    /// Raw request path, still percent-encoded, query string removed.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl DavRequest {
    pub fn new(method: &str, url: &str) -> DavRequest {
        let path = match url.find('?') {
            Some(i) => &url[..i],
            None => url,
        };
        DavRequest {
            method: DavMethod::from_str(method),
            path: path.to_string(),
            headers: vec!(),
            body: Body::Empty,
        }
    }

    pub fn with_header(mut self, field: &str, value: &str) -> DavRequest {
        self.headers.push((field.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Body) -> DavRequest {
        self.body = body;
        self
    }

    /// First value of header `field`, matched case-insensitively.
    pub fn header(&self, field: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(field))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_or<'a>(&'a self, field: &str, default: &'a str) -> &'a str {
        self.header(field).unwrap_or(default)
    }

    /// The request path with percent-escapes resolved.
    pub fn decoded_path(&self) -> String {
        decode_path(&self.path)
    }

    /// Length announced by `Content-Length`, if any and well formed.
    pub fn content_length(&self) -> Option<u64> {
        match self.header("Content-Length") {
            Some(v) => u64::from_str(v.trim()).ok(),
            None => None,
        }
    }
}

pub fn decode_path(path: &str) -> String {
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{
        decode_path,
        DavMethod,
        DavRequest,
        UnknownMethod,
    };

    #[test]
    fn test_method_parse() {
        assert_eq!(DavMethod::from_str("PROPFIND").unwrap(), DavMethod::Propfind);
        assert_eq!(DavMethod::from_str("mkcol").unwrap(), DavMethod::Mkcol);
        assert_eq!(DavMethod::from_str("LOCK"), Err(UnknownMethod(String::from("LOCK"))));
    }

    #[test]
    fn test_request_path_and_headers() {
        let req = DavRequest::new("GET", "/foo%20bar/baz.txt?x=1")
            .with_header("content-length", " 42")
            .with_header("Depth", "1");
        assert_eq!(req.path, "/foo%20bar/baz.txt");
        assert_eq!(req.decoded_path(), "/foo bar/baz.txt");
        assert_eq!(req.content_length(), Some(42));
        assert_eq!(req.header("DEPTH"), Some("1"));
        assert_eq!(req.header_or("Range", "none"), "none");
    }

    #[test]
    fn test_decode_utf8() {
        assert_eq!(decode_path("/%D1%84%D0%B0%D0%B9%D0%BB"), "/файл");
    }
}
