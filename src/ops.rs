use std::sync::Arc;

use log::debug;
use url::Url;

use crate::error::Result;
use crate::request::{
    decode_path,
    DavRequest,
};
use crate::response::{
    DavResponse,
    Reply,
    CONTENT_LENGTH,
};
use crate::router::Handler;
use crate::storage::Storage;

fn status_only(res: &mut DavResponse, status: u16) -> Result<Reply> {
    res.set_status(status);
    res.set_header(CONTENT_LENGTH, "0");
    Ok(Reply::Ready)
}

/// Storage path named by a `Destination` header.
///
/// Absolute URLs contribute only their path. Either way the result is
/// percent-decoded like a request path.
pub fn destination_path(header: &str) -> String {
    let header = header.trim();
    match Url::parse(header) {
        Ok(v) => decode_path(v.path()),
        Err(_) => decode_path(header),
    }
}

pub struct DeleteHandler {
    storage: Arc<dyn Storage>,
}

impl DeleteHandler {
    pub fn new(storage: Arc<dyn Storage>) -> DeleteHandler {
        DeleteHandler {
            storage,
        }
    }
}

impl Handler for DeleteHandler {
    fn handle(&self, req: &DavRequest, res: &mut DavResponse) -> Result<Reply> {
        let path = req.decoded_path();
        match self.storage.get_info(&path)? {
            Some(v) => {
                self.storage.delete(&v)?;
                debug!("deleted {}", path);
                status_only(res, 204)
            },
            None => status_only(res, 400),
        }
    }
}

pub struct MkcolHandler {
    storage: Arc<dyn Storage>,
}

impl MkcolHandler {
    pub fn new(storage: Arc<dyn Storage>) -> MkcolHandler {
        MkcolHandler {
            storage,
        }
    }
}

impl Handler for MkcolHandler {
    fn handle(&self, req: &DavRequest, res: &mut DavResponse) -> Result<Reply> {
        let path = req.decoded_path();
        if self.storage.get_info(&path)?.is_some() {
            return status_only(res, 400);
        }
        self.storage.create_folder(&path)?;
        debug!("created folder {}", path);
        status_only(res, 201)
    }
}

pub struct MoveHandler {
    storage: Arc<dyn Storage>,
}

impl MoveHandler {
    pub fn new(storage: Arc<dyn Storage>) -> MoveHandler {
        MoveHandler {
            storage,
        }
    }
}

impl Handler for MoveHandler {
    fn handle(&self, req: &DavRequest, res: &mut DavResponse) -> Result<Reply> {
        let path = req.decoded_path();
        let file = match self.storage.get_info(&path)? {
            Some(v) => v,
            None => {
                return status_only(res, 400);
            },
        };
        let destination = match req.header("Destination") {
            Some(v) if !v.trim().is_empty() => destination_path(v),
            _ => {
                debug!("move of {} without destination", path);
                return status_only(res, 400);
            },
        };
        self.storage.move_to(&file, &destination)?;
        debug!("moved {} to {}", path, destination);
        status_only(res, 201)
    }
}
