//! PROPFIND handling.
//!
//! The request body names the properties the client wants; the handler
//! resolves those it knows for the target (and, with `Depth: 1`, for each
//! immediate child) and answers with a `207` multistatus document. Properties
//! that cannot be resolved for a resource are left out of its entry.
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{
    DateTime,
    SecondsFormat,
    Utc,
};
use log::debug;
use percent_encoding::{
    utf8_percent_encode,
    AsciiSet,
    NON_ALPHANUMERIC,
};
use quick_xml::events::{
    BytesDecl,
    BytesEnd,
    BytesStart,
    BytesText,
    Event,
};
use quick_xml::{
    Reader,
    Writer,
};

use crate::error::{
    DavError,
    Result,
};
use crate::request::{
    Body,
    DavRequest,
};
use crate::response::{
    DavResponse,
    Reply,
    CONTENT_TYPE,
    TEXT_XML,
};
use crate::router::Handler;
use crate::storage::{
    FileInfo,
    Storage,
};

const STATUS_OK: &str = "HTTP/1.1 200 OK";

/// Characters left alone when a child name goes into an href.
const HREF_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'*')
    .remove(b'_');

/// Property names requested by the client, lowercased local parts in
/// request order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyRequest {
    pub names: Vec<String>,
}

impl PropertyRequest {
    /// Read the property list out of a PROPFIND body.
    ///
    /// The first child element of the document root holds the requested
    /// names as its own children. Namespace prefixes are dropped.
    pub fn parse(xml: &[u8]) -> Result<PropertyRequest> {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut level = 0usize;
        let mut have_list = false;
        let mut in_list = false;
        let mut names = Vec::new();

        loop {
            let (start, empty) = match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => (Some(local_name(&e)), false),
                Ok(Event::Empty(e)) => (Some(local_name(&e)), true),
                Ok(Event::End(_)) => {
                    if level == 2 && in_list {
                        in_list = false;
                    }
                    level = level.saturating_sub(1);
                    (None, false)
                },
                Ok(Event::Eof) => {
                    break;
                },
                Ok(_) => (None, false),
                Err(e) => {
                    return Err(DavError::xml(e));
                },
            };

            if let Some(name) = start {
                let at = level + 1;
                if at == 2 && !have_list {
                    have_list = true;
                    in_list = !empty;
                } else if at == 3 && in_list {
                    names.push(name);
                }
                if !empty {
                    level = at;
                }
            }
            buf.clear();
        }

        if !have_list {
            return Err(DavError::xml("propfind body has no property list"));
        }
        Ok(PropertyRequest {
            names,
        })
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase()
}

/// A resolved property with its serialized value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prop {
    ResourceType { collection: bool },
    CreationDate(String),
    ContentLength(u64),
    LastModified(String),
    QuotaAvailable(u64),
    QuotaUsed(u64),
}

impl Prop {
    fn element(&self) -> &'static str {
        match self {
            Prop::ResourceType { .. } => "D:resourcetype",
            Prop::CreationDate(_) => "D:creationdate",
            Prop::ContentLength(_) => "D:getcontentlength",
            Prop::LastModified(_) => "D:getlastmodified",
            Prop::QuotaAvailable(_) => "D:quota-available-bytes",
            Prop::QuotaUsed(_) => "D:quota-used-bytes",
        }
    }

    fn text(&self) -> Option<String> {
        match self {
            Prop::ResourceType { .. } => None,
            Prop::CreationDate(v) | Prop::LastModified(v) => Some(v.clone()),
            Prop::ContentLength(v) | Prop::QuotaAvailable(v) | Prop::QuotaUsed(v) => Some(v.to_string()),
        }
    }
}

/// One `D:response` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub href: String,
    pub props: Vec<Prop>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Multistatus {
    pub responses: Vec<Entry>,
}

fn write<'a>(w: &mut Writer<Vec<u8>>, event: Event<'a>) -> Result<()> {
    w.write_event(event).map_err(DavError::xml)
}

fn write_text(w: &mut Writer<Vec<u8>>, element: &str, text: &str) -> Result<()> {
    write(w, Event::Start(BytesStart::new(element)))?;
    write(w, Event::Text(BytesText::new(text)))?;
    write(w, Event::End(BytesEnd::new(element)))
}

impl Multistatus {
    pub fn push(&mut self, href: String, props: Vec<Prop>) {
        self.responses.push(Entry {
            href,
            props,
        });
    }

    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new(Vec::new());
        write(&mut w, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut root = BytesStart::new("D:multistatus");
        root.push_attribute(("xmlns:D", "DAV:"));
        write(&mut w, Event::Start(root))?;
        for entry in self.responses.iter() {
            write(&mut w, Event::Start(BytesStart::new("D:response")))?;
            write_text(&mut w, "D:href", &entry.href)?;
            write(&mut w, Event::Start(BytesStart::new("D:propstat")))?;
            write_text(&mut w, "D:status", STATUS_OK)?;
            write(&mut w, Event::Start(BytesStart::new("D:prop")))?;
            for prop in entry.props.iter() {
                match prop {
                    Prop::ResourceType { collection: true } => {
                        write(&mut w, Event::Start(BytesStart::new(prop.element())))?;
                        write(&mut w, Event::Empty(BytesStart::new("D:collection")))?;
                        write(&mut w, Event::End(BytesEnd::new(prop.element())))?;
                    },
                    Prop::ResourceType { collection: false } => {
                        write(&mut w, Event::Empty(BytesStart::new(prop.element())))?;
                    },
                    _ => {
                        let text = prop.text().unwrap_or_default();
                        write_text(&mut w, prop.element(), &text)?;
                    },
                }
            }
            write(&mut w, Event::End(BytesEnd::new("D:prop")))?;
            write(&mut w, Event::End(BytesEnd::new("D:propstat")))?;
            write(&mut w, Event::End(BytesEnd::new("D:response")))?;
        }
        write(&mut w, Event::End(BytesEnd::new("D:multistatus")))?;
        Ok(w.into_inner())
    }
}

pub fn iso8601(t: SystemTime) -> String {
    DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn http_date(t: SystemTime) -> String {
    httpdate::fmt_http_date(t)
}

/// Href of a child, relative to the href the client asked for.
pub fn child_href(parent: &str, name: &str) -> String {
    let mut s = parent.to_string();
    if !s.ends_with('/') {
        s.push('/');
    }
    s.push_str(&utf8_percent_encode(name, HREF_SAFE).to_string());
    s
}

pub struct PropfindHandler {
    storage: Arc<dyn Storage>,
}

impl PropfindHandler {
    pub fn new(storage: Arc<dyn Storage>) -> PropfindHandler {
        PropfindHandler {
            storage,
        }
    }

    fn quota(&self, name: &str) -> Result<Option<Prop>> {
        let p = match name {
            "quota-available-bytes" => Prop::QuotaAvailable(self.storage.usable_space()?),
            "quota-used-bytes" => {
                let total = self.storage.total_space()?;
                let usable = self.storage.usable_space()?;
                Prop::QuotaUsed(total.saturating_sub(usable))
            },
            _ => {
                return Ok(None);
            },
        };
        Ok(Some(p))
    }

    /// Properties of a folder reported as the target itself.
    fn folder_props(&self, file: &FileInfo, req: &PropertyRequest) -> Result<Vec<Prop>> {
        let mut props = vec!();
        for name in req.names.iter() {
            match name.as_str() {
                "resourcetype" => props.push(Prop::ResourceType { collection: true }),
                "creationdate" => props.push(Prop::CreationDate(iso8601(file.created))),
                v => {
                    if let Some(p) = self.quota(v)? {
                        props.push(p);
                    }
                },
            }
        }
        Ok(props)
    }

    fn file_props(&self, file: &FileInfo, req: &PropertyRequest) -> Vec<Prop> {
        let mut props = vec!();
        for name in req.names.iter() {
            match name.as_str() {
                "resourcetype" => props.push(Prop::ResourceType { collection: false }),
                "getcontentlength" => props.push(Prop::ContentLength(file.size)),
                "getlastmodified" => props.push(Prop::LastModified(http_date(file.updated))),
                _ => {},
            }
        }
        props
    }

    fn child_props(&self, child: &FileInfo, req: &PropertyRequest) -> Result<Vec<Prop>> {
        let mut props = vec!();
        for name in req.names.iter() {
            if let Some(p) = self.quota(name)? {
                props.push(p);
                continue;
            }
            if child.is_file() {
                match name.as_str() {
                    "getcontentlength" => props.push(Prop::ContentLength(child.size)),
                    "getlastmodified" => props.push(Prop::LastModified(http_date(child.updated))),
                    "resourcetype" => props.push(Prop::ResourceType { collection: false }),
                    _ => {},
                }
            } else {
                match name.as_str() {
                    "resourcetype" => props.push(Prop::ResourceType { collection: true }),
                    "creationdate" => props.push(Prop::CreationDate(iso8601(child.created))),
                    _ => {},
                }
            }
        }
        Ok(props)
    }

    /// Assemble the multistatus document for `file` seen at `href`.
    ///
    /// # Arguments
    ///
    /// * `href` - Request path exactly as the client sent it.
    /// * `file` - The resolved target.
    /// * `depth` - Value of the `Depth` header.
    /// * `req` - Requested property names.
    pub fn build(&self, href: &str, file: &FileInfo, depth: &str, req: &PropertyRequest) -> Result<Multistatus> {
        let mut doc = Multistatus::default();
        match (file.is_folder(), depth) {
            (true, "0") => {
                doc.push(href.to_string(), self.folder_props(file, req)?);
            },
            (true, "1") => {
                doc.push(href.to_string(), self.folder_props(file, req)?);
                for child in self.storage.list(file)? {
                    let props = self.child_props(&child, req)?;
                    doc.push(child_href(href, &child.name), props);
                }
            },
            _ => {
                doc.push(href.to_string(), self.file_props(file, req));
            },
        }
        Ok(doc)
    }
}

fn not_found(res: &mut DavResponse) -> Result<Reply> {
    res.set_status(404);
    res.set_body(vec!());
    Ok(Reply::Ready)
}

impl Handler for PropfindHandler {
    fn handle(&self, req: &DavRequest, res: &mut DavResponse) -> Result<Reply> {
        let body = match &req.body {
            Body::Buffered(v) if !v.is_empty() => v,
            _ => {
                debug!("propfind without body for {}", req.path);
                return not_found(res);
            },
        };
        let props = match PropertyRequest::parse(body) {
            Ok(v) => v,
            Err(e) => {
                debug!("unusable propfind body for {}: {}", req.path, e);
                return not_found(res);
            },
        };

        let path = req.decoded_path();
        let file = match self.storage.get_info(&path)? {
            Some(v) => v,
            None => {
                return not_found(res);
            },
        };

        let depth = req.header_or("Depth", "0").trim();
        debug!("propfind {} depth {} props {:?}", path, depth, props.names);
        let doc = self.build(&req.path, &file, depth, &props)?;
        res.set_status(207);
        res.set_header(CONTENT_TYPE, TEXT_XML);
        res.set_body(doc.to_xml()?);
        Ok(Reply::Ready)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{
        Duration,
        SystemTime,
    };

    use super::{
        child_href,
        iso8601,
        Multistatus,
        Prop,
        PropertyRequest,
        PropfindHandler,
    };
    use crate::request::{
        Body,
        DavRequest,
    };
    use crate::response::DavResponse;
    use crate::router::Handler;
    use crate::storage::{
        MemoryStorage,
        Storage,
    };

    const ALL_PROPS: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:resourcetype/>
    <D:CreationDate/>
    <D:getcontentlength/>
    <D:getlastmodified/>
    <D:quota-available-bytes/>
    <D:quota-used-bytes/>
    <D:displayname/>
  </D:prop>
</D:propfind>"#;

    fn storage() -> Arc<dyn Storage> {
        let s = MemoryStorage::with_capacity(1000);
        s.create_folder("/docs/sub dir").unwrap();
        s.put_bytes("/docs/a.txt", b"hello").unwrap();
        s.put_bytes("/docs/b c.txt", b"0123456789").unwrap();
        Arc::new(s)
    }

    fn propfind(storage: &Arc<dyn Storage>, path: &str, depth: Option<&str>, body: Option<&str>) -> DavResponse {
        let handler = PropfindHandler::new(storage.clone());
        let mut req = DavRequest::new("PROPFIND", path);
        if let Some(v) = depth {
            req = req.with_header("Depth", v);
        }
        if let Some(v) = body {
            req = req.with_body(Body::Buffered(v.as_bytes().to_vec()));
        }
        let mut res = DavResponse::new();
        handler.handle(&req, &mut res).unwrap();
        res
    }

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn test_parse_property_request() {
        let r = PropertyRequest::parse(ALL_PROPS.as_bytes()).unwrap();
        assert_eq!(r.names, vec![
            "resourcetype",
            "creationdate",
            "getcontentlength",
            "getlastmodified",
            "quota-available-bytes",
            "quota-used-bytes",
            "displayname",
        ]);

        let r = PropertyRequest::parse(b"<propfind xmlns=\"DAV:\"><allprop/></propfind>").unwrap();
        assert!(r.names.is_empty());

        assert!(PropertyRequest::parse(b"<propfind/>").is_err());
        assert!(PropertyRequest::parse(b"<a><b></c></a>").is_err());
    }

    #[test]
    fn test_missing_body_or_target() {
        let s = storage();
        assert_eq!(propfind(&s, "/docs", None, None).status, 404);
        assert_eq!(propfind(&s, "/docs", None, Some("")).status, 404);
        assert_eq!(propfind(&s, "/docs", None, Some("<garbage")).status, 404);
        assert_eq!(propfind(&s, "/nope", None, Some(ALL_PROPS)).status, 404);
    }

    #[test]
    fn test_depth_zero_folder() {
        let s = storage();
        let res = propfind(&s, "/docs", None, Some(ALL_PROPS));
        assert_eq!(res.status, 207);
        assert_eq!(res.header("Content-Type"), Some("text/xml; charset=utf-8"));
        let xml = String::from_utf8(res.body).unwrap();
        assert_eq!(count(&xml, "<D:response>"), 1);
        assert!(xml.contains("<D:href>/docs</D:href>"));
        assert!(xml.contains("<D:status>HTTP/1.1 200 OK</D:status>"));
        assert!(xml.contains("<D:resourcetype><D:collection/></D:resourcetype>"));
        assert!(xml.contains("<D:creationdate>"));
        assert!(xml.contains("<D:quota-available-bytes>985</D:quota-available-bytes>"));
        assert!(xml.contains("<D:quota-used-bytes>15</D:quota-used-bytes>"));
        assert!(!xml.contains("getcontentlength"));
        assert!(!xml.contains("displayname"));
    }

    #[test]
    fn test_depth_one_folder() {
        let s = storage();
        let res = propfind(&s, "/docs", Some("1"), Some(ALL_PROPS));
        assert_eq!(res.status, 207);
        let xml = String::from_utf8(res.body).unwrap();
        let docs = s.get_info("/docs").unwrap().unwrap();
        let children = s.list(&docs).unwrap();
        assert_eq!(count(&xml, "<D:response>"), 1 + children.len());

        assert!(xml.contains("<D:href>/docs/a.txt</D:href>"));
        assert!(xml.contains("<D:href>/docs/b%20c.txt</D:href>"));
        assert!(xml.contains("<D:href>/docs/sub%20dir</D:href>"));
        assert!(xml.contains("<D:getcontentlength>10</D:getcontentlength>"));
        assert!(xml.contains("<D:resourcetype/>"));
        assert_eq!(count(&xml, "<D:collection/>"), 2);
        assert_eq!(count(&xml, "<D:quota-used-bytes>15</D:quota-used-bytes>"), 4);
    }

    #[test]
    fn test_file_target() {
        let s = storage();
        for depth in [None, Some("1"), Some("infinity")].iter() {
            let res = propfind(&s, "/docs/b%20c.txt", *depth, Some(ALL_PROPS));
            assert_eq!(res.status, 207);
            let xml = String::from_utf8(res.body).unwrap();
            assert_eq!(count(&xml, "<D:response>"), 1);
            assert!(xml.contains("<D:href>/docs/b%20c.txt</D:href>"));
            assert!(xml.contains("<D:getcontentlength>10</D:getcontentlength>"));
            assert!(xml.contains("<D:getlastmodified>"));
            assert!(xml.contains("<D:resourcetype/>"));
            assert!(!xml.contains("quota"));
        }
    }

    #[test]
    fn test_folder_other_depth_uses_file_properties() {
        let s = storage();
        let res = propfind(&s, "/docs", Some("infinity"), Some(ALL_PROPS));
        let xml = String::from_utf8(res.body).unwrap();
        assert_eq!(count(&xml, "<D:response>"), 1);
        assert!(xml.contains("<D:resourcetype/>"));
        assert!(!xml.contains("<D:collection/>"));
    }

    #[test]
    fn test_child_href() {
        assert_eq!(child_href("/", "a b+c"), "/a%20b%2Bc");
        assert_eq!(child_href("/docs/", "x_y-z.*"), "/docs/x_y-z.*");
        assert_eq!(child_href("/docs", "ü"), "/docs/%C3%BC");
    }

    #[test]
    fn test_multistatus_escaping() {
        let mut doc = Multistatus::default();
        doc.push(String::from("/a&b"), vec![Prop::ContentLength(3)]);
        let xml = String::from_utf8(doc.to_xml().unwrap()).unwrap();
        assert!(xml.contains("<D:multistatus xmlns:D=\"DAV:\">"));
        assert!(xml.contains("<D:href>/a&amp;b</D:href>"));
        assert!(xml.contains("<D:prop><D:getcontentlength>3</D:getcontentlength></D:prop>"));
    }

    #[test]
    fn test_iso8601() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_millis(1_500);
        assert_eq!(iso8601(t), "1970-01-01T00:00:01.500Z");
    }
}
