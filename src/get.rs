use std::io;
use std::io::Read;
use std::sync::Arc;
use std::time::{
    Duration,
    SystemTime,
    UNIX_EPOCH,
};

use log::debug;
use mime::Mime;

use crate::error::{
    DavError,
    Result,
};
use crate::propfind::http_date;
use crate::range::Range;
use crate::request::DavRequest;
use crate::response::{
    DavResponse,
    Reply,
    ACCEPT_RANGES,
    CONNECTION,
    CONTENT_LENGTH,
    CONTENT_RANGE,
    CONTENT_TYPE,
    LAST_MODIFIED,
};
use crate::router::Handler;
use crate::storage::{
    FileInfo,
    Storage,
};

/// Serves object content, whole or a single byte range.
///
/// Headers are settled on the calling thread. The content itself is fetched
/// by the returned task so that a slow backend never holds up intake.
pub struct GetHandler {
    storage: Arc<dyn Storage>,
}

impl GetHandler {
    pub fn new(storage: Arc<dyn Storage>) -> GetHandler {
        GetHandler {
            storage,
        }
    }
}

fn content_type(name: &str) -> Option<Mime> {
    mime_guess::from_path(name).first()
}

/// HTTP-dates carry whole seconds only.
fn whole_seconds(t: SystemTime) -> SystemTime {
    match t.duration_since(UNIX_EPOCH) {
        Ok(v) => UNIX_EPOCH + Duration::from_secs(v.as_secs()),
        Err(_) => t,
    }
}

/// Whether `If-Modified-Since` lets us answer `304` for `file`.
fn not_modified(req: &DavRequest, file: &FileInfo) -> bool {
    let since = match req.header("If-Modified-Since") {
        Some(v) => v,
        None => {
            return false;
        },
    };
    match httpdate::parse_http_date(since.trim()) {
        Ok(v) => v >= whole_seconds(file.updated),
        Err(e) => {
            debug!("ignoring bad if-modified-since {:?}: {}", since, e);
            false
        },
    }
}

impl Handler for GetHandler {
    fn handle(&self, req: &DavRequest, res: &mut DavResponse) -> Result<Reply> {
        let path = req.decoded_path();
        let file = match self.storage.get_info(&path)? {
            Some(v) => v,
            None => {
                res.set_status(404);
                return Ok(Reply::Ready);
            },
        };

        res.set_header(ACCEPT_RANGES, "bytes");

        let span = match req.header("Range") {
            Some(v) => {
                match Range::parse(v, file.size) {
                    Ok(r) => {
                        res.set_status(206);
                        res.set_header(CONTENT_RANGE, &r.to_string());
                        Some(r)
                    },
                    Err(e) => {
                        debug!("{} for {}", e, path);
                        res.set_status(416);
                        return Ok(Reply::Ready);
                    },
                }
            },
            None => {
                if not_modified(req, &file) {
                    res.set_status(304);
                    return Ok(Reply::Ready);
                }
                Range::full(file.size)
            },
        };

        let length = span.map(|v| v.len()).unwrap_or(0);
        res.set_header(LAST_MODIFIED, &http_date(file.updated));
        res.set_header(CONTENT_LENGTH, &length.to_string());
        res.set_header(CONNECTION, "close");
        if let Some(m) = content_type(&file.name) {
            res.set_header(CONTENT_TYPE, m.essence_str());
        }

        let span = match span {
            Some(v) => v,
            None => {
                return Ok(Reply::Ready);
            },
        };

        debug!("serving {} bytes {}-{} of {}", path, span.from, span.to, span.total);
        let storage = self.storage.clone();
        Ok(Reply::Async(Box::new(move |_: &mut dyn Read, res: &mut DavResponse| -> Result<()> {
            let data = storage.get_data(&file, span.from, span.end())?;
            if data.len() as u64 != span.len() {
                return Err(DavError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("storage returned {} of {} bytes", data.len(), span.len()),
                )));
            }
            res.set_body(data);
            Ok(())
        })))
    }
}
