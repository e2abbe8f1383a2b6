use std::collections::BTreeMap;
use std::sync::Arc;

use log::{
    debug,
    error,
};

use crate::error::Result;
use crate::request::{
    DavMethod,
    DavRequest,
};
use crate::response::{
    DavResponse,
    Dispatched,
    Reply,
    ALLOW,
    CONTENT_LENGTH,
    DAV,
};

/// Compliance classes advertised in the `DAV` header.
pub const DAV_COMPLIANCE: &str = "1";

/// One method's worth of request handling.
///
/// The handler receives a response that already carries the router's
/// headers. Returning [Reply::Async] hands the rest of the work to a worker.
pub trait Handler: Send + Sync {
    fn handle(&self, req: &DavRequest, res: &mut DavResponse) -> Result<Reply>;
}

impl<F> Handler for F
where
    F: Fn(&DavRequest, &mut DavResponse) -> Result<Reply> + Send + Sync,
{
    fn handle(&self, req: &DavRequest, res: &mut DavResponse) -> Result<Reply> {
        self(req, res)
    }
}

/// Maps request methods to handlers and answers `OPTIONS` on its own.
pub struct MethodRouter {
    handlers: BTreeMap<DavMethod, Arc<dyn Handler>>,
    allow: String,
}

impl Default for MethodRouter {
    fn default() -> MethodRouter {
        MethodRouter::new()
    }
}

impl MethodRouter {
    pub fn new() -> MethodRouter {
        let mut r = MethodRouter {
            handlers: BTreeMap::new(),
            allow: String::new(),
        };
        r.generate_allow();
        r
    }

    /// Register `handler` for `method`, replacing any previous one.
    pub fn register(&mut self, method: DavMethod, handler: impl Handler + 'static) -> &mut MethodRouter {
        self.handlers.insert(method, Arc::new(handler));
        self.generate_allow();
        self
    }

    fn generate_allow(&mut self) {
        let mut methods: Vec<&str> = self.handlers.keys()
            .filter(|v| **v != DavMethod::Options)
            .map(|v| v.as_str())
            .collect();
        methods.push(DavMethod::Options.as_str());
        self.allow = methods.join(", ");
    }

    /// Current value of the `Allow` header.
    pub fn allow(&self) -> &str {
        &self.allow
    }

    pub fn dispatch(&self, req: &DavRequest) -> Dispatched {
        self.dispatch_with(req, |_| {})
    }

    /// Route `req`, letting `provide` add headers once `Allow` is set and
    /// before any handler runs.
    pub fn dispatch_with<F>(&self, req: &DavRequest, provide: F) -> Dispatched
    where
        F: FnOnce(&mut DavResponse),
    {
        let mut res = DavResponse::new();
        res.set_header(ALLOW, &self.allow);
        provide(&mut res);

        let method = match &req.method {
            Ok(DavMethod::Options) => {
                debug!("OPTIONS {}", req.path);
                res.set_header(CONTENT_LENGTH, "0");
                return Dispatched::ready(res);
            },
            Ok(v) => *v,
            Err(e) => {
                debug!("unknown method {} for {}", e.0, req.path);
                res.set_status(405);
                res.set_header(CONTENT_LENGTH, "0");
                return Dispatched::ready(res);
            },
        };

        let handler = match self.handlers.get(&method) {
            Some(v) => v,
            None => {
                debug!("no handler for {} {}", method, req.path);
                res.set_status(405);
                res.set_header(CONTENT_LENGTH, "0");
                return Dispatched::ready(res);
            },
        };

        debug!("{} {}", method, req.path);
        match handler.handle(req, &mut res) {
            Ok(reply) => {
                Dispatched {
                    response: res,
                    reply,
                }
            },
            Err(e) => {
                error!("{} {} failed: {}", method, req.path, e);
                res.fail();
                Dispatched::ready(res)
            },
        }
    }
}

/// Router front that advertises WebDAV compliance on every response.
pub struct DavHandler {
    router: MethodRouter,
    compliance: String,
}

impl DavHandler {
    pub fn new(router: MethodRouter) -> DavHandler {
        DavHandler {
            router,
            compliance: DAV_COMPLIANCE.to_string(),
        }
    }

    pub fn dispatch(&self, req: &DavRequest) -> Dispatched {
        self.router.dispatch_with(req, |res| {
            res.set_header(DAV, &self.compliance);
        })
    }

    /// Bare `500` for a request that never reached a handler.
    pub fn failure(&self) -> DavResponse {
        let mut res = DavResponse::new();
        res.set_header(ALLOW, self.router.allow());
        res.set_header(DAV, &self.compliance);
        res.fail();
        res
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{
        DavHandler,
        MethodRouter,
    };
    use crate::error::{
        DavError,
        Result,
    };
    use crate::request::{
        DavMethod,
        DavRequest,
    };
    use crate::response::{
        DavResponse,
        Reply,
    };

    fn teapot(_: &DavRequest, res: &mut DavResponse) -> Result<Reply> {
        res.set_status(418);
        Ok(Reply::Ready)
    }

    fn broken(_: &DavRequest, _: &mut DavResponse) -> Result<Reply> {
        Err(DavError::xml("secret backend detail"))
    }

    fn allow_set(v: &str) -> BTreeSet<String> {
        v.split(", ").map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_allow_tracks_registration() {
        let mut router = MethodRouter::new();
        assert_eq!(router.allow(), "OPTIONS");

        router.register(DavMethod::Put, teapot);
        router.register(DavMethod::Get, teapot);
        let want: BTreeSet<String> = ["GET", "PUT", "OPTIONS"].iter().map(|s| s.to_string()).collect();
        assert_eq!(allow_set(router.allow()), want);

        let mut other = MethodRouter::new();
        other.register(DavMethod::Get, teapot);
        other.register(DavMethod::Put, teapot);
        assert_eq!(allow_set(other.allow()), want);
    }

    #[test]
    fn test_options_always_answered() {
        let router = MethodRouter::new();
        let d = router.dispatch(&DavRequest::new("OPTIONS", "/"));
        assert!(!d.is_async());
        assert_eq!(d.response.status, 200);
        assert!(d.response.body.is_empty());
        assert_eq!(d.response.header("Content-Length"), Some("0"));
        assert_eq!(d.response.header("Allow"), Some("OPTIONS"));
    }

    #[test]
    fn test_unregistered_method() {
        let mut router = MethodRouter::new();
        router.register(DavMethod::Get, teapot);

        let d = router.dispatch(&DavRequest::new("PUT", "/a"));
        assert_eq!(d.response.status, 405);
        assert!(d.response.body.is_empty());
        assert_eq!(allow_set(d.response.header("Allow").unwrap()), allow_set("GET, OPTIONS"));

        let d = router.dispatch(&DavRequest::new("LOCK", "/a"));
        assert_eq!(d.response.status, 405);
        assert!(d.response.header("Allow").is_some());

        let d = router.dispatch(&DavRequest::new("GET", "/a"));
        assert_eq!(d.response.status, 418);
    }

    #[test]
    fn test_dav_header_everywhere() {
        let mut router = MethodRouter::new();
        router.register(DavMethod::Get, teapot);
        router.register(DavMethod::Delete, broken);
        let handler = DavHandler::new(router);

        for m in ["OPTIONS", "GET", "MKCOL", "DELETE"].iter() {
            let d = handler.dispatch(&DavRequest::new(m, "/"));
            assert_eq!(d.response.header("DAV"), Some("1"), "{}", m);
            assert!(d.response.header("Allow").is_some(), "{}", m);
        }
    }

    #[test]
    fn test_failure_carries_protocol_headers() {
        let mut router = MethodRouter::new();
        router.register(DavMethod::Get, teapot);
        let handler = DavHandler::new(router);
        let res = handler.failure();
        assert_eq!(res.status, 500);
        assert!(res.body.is_empty());
        assert_eq!(res.header("DAV"), Some("1"));
        assert_eq!(allow_set(res.header("Allow").unwrap()), allow_set("GET, OPTIONS"));
    }

    #[test]
    fn test_handler_error_is_opaque() {
        let mut router = MethodRouter::new();
        router.register(DavMethod::Delete, broken);
        let d = router.dispatch(&DavRequest::new("DELETE", "/x"));
        assert_eq!(d.response.status, 500);
        assert!(d.response.body.is_empty());
    }
}
