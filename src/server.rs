//! HTTP front on top of `tiny_http`.
//!
//! A few event-loop threads take requests off the listener, turn them into
//! [DavRequest]s and route them. Responses that are ready go straight back;
//! deferred ones travel to the [WorkerPool] together with the connection and
//! are committed from there.
use std::error::Error;
use std::io::Read;
use std::net::{
    SocketAddr,
    ToSocketAddrs,
};
use std::sync::Arc;
use std::thread;

use log::{
    debug,
    error,
    info,
    warn,
};
use tiny_http::{
    Request,
    Server,
    ServerConfig,
};

use crate::error::DavError;
use crate::get::GetHandler;
use crate::ops::{
    DeleteHandler,
    MkcolHandler,
    MoveHandler,
};
use crate::propfind::PropfindHandler;
use crate::put::PutHandler;
use crate::request::{
    Body,
    DavMethod,
    DavRequest,
};
use crate::response::{
    DavResponse,
    CONNECTION,
};
use crate::router::{
    DavHandler,
    MethodRouter,
};
use crate::storage::Storage;
use crate::worker::WorkerPool;

/// Bodies up to this size are read before dispatch.
pub const INLINE_BODY_LIMIT: u64 = 16 * 1024;

/// Upper bound on a `PROPFIND` request document.
pub const MAX_XML_BODY: u64 = 1024 * 1024;

/// Router with every supported method registered against `storage`.
pub fn dav_handler(storage: Arc<dyn Storage>) -> DavHandler {
    let mut router = MethodRouter::new();
    router
        .register(DavMethod::Get, GetHandler::new(storage.clone()))
        .register(DavMethod::Put, PutHandler::new(storage.clone()))
        .register(DavMethod::Delete, DeleteHandler::new(storage.clone()))
        .register(DavMethod::Mkcol, MkcolHandler::new(storage.clone()))
        .register(DavMethod::Move, MoveHandler::new(storage.clone()))
        .register(DavMethod::Propfind, PropfindHandler::new(storage));
    DavHandler::new(router)
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub io_threads: usize,
    pub workers: usize,
    pub queue_depth: usize,
    pub inline_body_limit: u64,
}

impl Default for ServerSettings {
    fn default() -> ServerSettings {
        ServerSettings {
            io_threads: 2,
            workers: 8,
            queue_depth: 64,
            inline_body_limit: INLINE_BODY_LIMIT,
        }
    }
}

pub struct DavServer {
    server: Arc<Server>,
    handler: Arc<DavHandler>,
    pool: Arc<WorkerPool>,
    settings: ServerSettings,
}

impl DavServer {
    pub fn bind<A>(addr: A, handler: DavHandler, settings: ServerSettings) -> Result<DavServer, Box<dyn Error + Send + Sync + 'static>>
    where
        A: ToSocketAddrs,
    {
        let srv_cfg = ServerConfig{
            addr,
            ssl: None,
        };
        let server = Server::new(srv_cfg)?;
        let pool = WorkerPool::new(settings.workers, settings.queue_depth)?;
        Ok(DavServer {
            server: Arc::new(server),
            handler: Arc::new(handler),
            pool: Arc::new(pool),
            settings,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.server_addr()
    }

    /// Serve until the listener fails. The calling thread becomes one of the
    /// event loops.
    pub fn run(&self) {
        info!("serving on {} with {} event loops and {} workers", self.local_addr(), self.settings.io_threads.max(1), self.pool.size());
        let mut loops = vec!();
        for i in 1..self.settings.io_threads.max(1) {
            let server = self.server.clone();
            let handler = self.handler.clone();
            let pool = self.pool.clone();
            let limit = self.settings.inline_body_limit;
            let r = thread::Builder::new()
                .name(format!("davbridge-io-{}", i))
                .spawn(move || {
                    event_loop(&server, &handler, &pool, limit);
                });
            match r {
                Ok(v) => loops.push(v),
                Err(e) => {
                    error!("could not start event loop {}: {}", i, e);
                },
            }
        }
        event_loop(&self.server, &self.handler, &self.pool, self.settings.inline_body_limit);
        for v in loops {
            let name = v.thread().name().unwrap_or("davbridge-io").to_string();
            if v.join().is_err() {
                error!("event loop {} panicked", name);
            }
        }
    }
}

fn event_loop(server: &Server, handler: &Arc<DavHandler>, pool: &Arc<WorkerPool>, limit: u64) {
    loop {
        let req = match server.recv() {
            Ok(v) => v,
            Err(e) => {
                error!("{}", e);
                break;
            },
        };
        serve(req, handler, pool, limit);
    }
}

fn serve(mut req: Request, handler: &DavHandler, pool: &WorkerPool, limit: u64) {
    let dav = match to_dav_request(&mut req, limit) {
        Ok(v) => v,
        Err(e) => {
            warn!("{} {}: {}", req.method(), req.url(), e);
            respond(req, handler.failure());
            return;
        },
    };

    let d = handler.dispatch(&dav);
    if !d.is_async() {
        respond(req, d.response);
        return;
    }

    let r = pool.submit(move || {
        let mut req = req;
        let res = d.finish(req.as_reader());
        respond(req, res);
    });
    if r.is_err() {
        error!("dropping {} {}, worker pool is gone", dav.method.as_ref().map(|v| v.as_str()).unwrap_or("?"), dav.path);
    }
}

/// Write `res` on the connection of `req`.
///
/// The head is serialized here rather than by `tiny_http`, which would
/// swallow some of the headers handlers set.
fn respond(req: Request, mut res: DavResponse) {
    debug!("{} {} -> {}", req.method(), req.url(), res.status);
    let closing = req.headers().iter().any(|h| {
        h.field.equiv(CONNECTION) && h.value.as_str().eq_ignore_ascii_case("close")
    });
    if closing {
        res.set_header(CONNECTION, "close");
    }
    let mut w = req.into_writer();
    if let Err(e) = res.write_to(&mut w) {
        warn!("failed writing response: {}", e);
    }
}

/// Build the transport-neutral view of `req`.
///
/// `PROPFIND` documents and bodies of at most `limit` bytes are read here.
/// Anything else stays on the connection for the handler to pull.
fn to_dav_request(req: &mut Request, limit: u64) -> Result<DavRequest, DavError> {
    let mut dav = DavRequest::new(&req.method().to_string(), req.url());
    for h in req.headers() {
        dav.headers.push((h.field.to_string(), h.value.as_str().to_string()));
    }

    let declared = req.body_length().map(|v| v as u64);
    let is_propfind = dav.method == Ok(DavMethod::Propfind);
    let inline = match declared {
        Some(v) => v <= limit || is_propfind,
        None => is_propfind,
    };
    if !inline {
        dav.body = Body::Streamed(declared);
        return Ok(dav);
    }

    let cap = match declared {
        Some(v) => v.min(MAX_XML_BODY.max(limit)),
        None => MAX_XML_BODY,
    };
    let mut buf = vec!();
    req.as_reader().take(cap).read_to_end(&mut buf)?;
    if let Some(v) = declared {
        if (buf.len() as u64) < v.min(cap) {
            return Err(DavError::StreamAborted {
                expected: v,
                received: buf.len() as u64,
            });
        }
    }
    dav.body = if buf.is_empty() {
        Body::Empty
    } else {
        Body::Buffered(buf)
    };
    Ok(dav)
}
