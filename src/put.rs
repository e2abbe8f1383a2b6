//! Upload handling.
//!
//! Small bodies arrive already buffered and are committed on the spot. Larger
//! ones are pumped off the connection by an [UploadSession] into a temporary
//! file, which is handed to the backend once the announced length has been
//! received.
use std::cell::RefCell;
use std::io::{
    Read,
    Seek,
    SeekFrom,
    Write,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use log::{
    debug,
    info,
    warn,
};
use tempfile::NamedTempFile;

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
    CONNECTION,
    CONTENT_LENGTH,
};
use crate::router::Handler;
use crate::storage::Storage;

/// Size of the per-thread buffer uploads are read through.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

thread_local! {
    static READ_BUFFER: RefCell<Vec<u8>> = RefCell::new(vec![0; READ_BUFFER_SIZE]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    AwaitingBytes,
    Accumulating,
    Committing,
    Committed,
    Aborted,
}

/// Outcome of one readability step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Pending,
    Complete,
    Aborted,
}

/// One upload in flight, from first byte to commit or abort.
///
/// The temporary sink is removed whatever the outcome, at the latest when the
/// session is dropped.
pub struct UploadSession {
    path: String,
    sink: Option<NamedTempFile>,
    remaining: Option<u64>,
    received: u64,
    state: UploadState,
}

impl UploadSession {
    /// Open a session for the object at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Decoded storage path the upload is committed to.
    /// * `declared` - Announced body length; `None` reads until end of stream.
    pub fn open(path: &str, declared: Option<u64>) -> io::Result<UploadSession> {
        let sink = NamedTempFile::new()?;
        debug!("upload of {} buffering in {:?}", path, sink.path());
        Ok(UploadSession {
            path: path.to_string(),
            sink: Some(sink),
            remaining: declared,
            received: 0,
            state: UploadState::AwaitingBytes,
        })
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// Location of the temporary sink while the session still holds one.
    pub fn sink_path(&self) -> Option<PathBuf> {
        self.sink.as_ref().map(|v| v.path().to_path_buf())
    }

    /// Move at most one buffer's worth of bytes from `src` to the sink.
    ///
    /// Never reads past the announced length, so bytes belonging to a
    /// following request stay on the connection.
    pub fn on_readable(&mut self, src: &mut dyn Read, buf: &mut [u8]) -> Progress {
        match self.state {
            UploadState::AwaitingBytes | UploadState::Accumulating => {},
            UploadState::Committing | UploadState::Committed => {
                return Progress::Complete;
            },
            UploadState::Aborted => {
                return Progress::Aborted;
            },
        }
        let want = match self.remaining {
            Some(0) => {
                self.state = UploadState::Committing;
                return Progress::Complete;
            },
            Some(v) => v.min(buf.len() as u64) as usize,
            None => buf.len(),
        };
        if want == 0 {
            return Progress::Pending;
        }

        let c = match src.read(&mut buf[..want]) {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                return Progress::Pending;
            },
            Err(e) => {
                warn!("upload of {} failed reading: {}", self.path, e);
                self.abort();
                return Progress::Aborted;
            },
        };

        if c == 0 {
            return match self.remaining {
                None => {
                    self.state = UploadState::Committing;
                    Progress::Complete
                },
                Some(v) => {
                    warn!("upload of {} ended {} bytes short", self.path, v);
                    self.abort();
                    Progress::Aborted
                },
            };
        }

        let written = match self.sink.as_mut() {
            Some(v) => v.write_all(&buf[..c]),
            None => Err(io::Error::new(io::ErrorKind::Other, "sink closed")),
        };
        if let Err(e) = written {
            warn!("upload of {} failed writing sink: {}", self.path, e);
            self.abort();
            return Progress::Aborted;
        }

        self.received += c as u64;
        self.state = UploadState::Accumulating;
        match self.remaining.as_mut() {
            Some(v) => {
                *v -= c as u64;
                if *v == 0 {
                    self.state = UploadState::Committing;
                    return Progress::Complete;
                }
                Progress::Pending
            },
            None => Progress::Pending,
        }
    }

    /// Keep reading from `src` through the thread's buffer until the upload
    /// completes or aborts.
    pub fn drive(&mut self, src: &mut dyn Read) -> Progress {
        READ_BUFFER.with(|b| {
            let mut buf = b.borrow_mut();
            loop {
                match self.on_readable(src, &mut buf[..]) {
                    Progress::Pending => {},
                    v => {
                        return v;
                    },
                }
            }
        })
    }

    /// Hand the received content to `storage` and remove the sink.
    pub fn commit(&mut self, storage: &dyn Storage) -> Result<()> {
        if self.state != UploadState::Committing {
            return Err(DavError::StreamAborted {
                expected: self.received + self.remaining.unwrap_or(0),
                received: self.received,
            });
        }
        let mut sink = match self.sink.take() {
            Some(v) => v,
            None => {
                return Err(DavError::Io(io::Error::new(io::ErrorKind::Other, "sink closed")));
            },
        };
        let r = flush_and_store(&mut sink, &self.path, storage);
        if let Err(e) = sink.close() {
            warn!("could not remove upload sink: {}", e);
        }
        match r {
            Ok(()) => {
                info!("committed {} bytes to {}", self.received, self.path);
                self.state = UploadState::Committed;
                Ok(())
            },
            Err(e) => {
                self.state = UploadState::Aborted;
                Err(e)
            },
        }
    }

    /// Drop everything received so far.
    pub fn abort(&mut self) {
        self.sink = None;
        self.state = UploadState::Aborted;
    }
}

fn flush_and_store(sink: &mut NamedTempFile, path: &str, storage: &dyn Storage) -> Result<()> {
    let f = sink.as_file_mut();
    f.flush()?;
    f.seek(SeekFrom::Start(0))?;
    storage.put_file(path, f)?;
    Ok(())
}

pub struct PutHandler {
    storage: Arc<dyn Storage>,
}

impl PutHandler {
    pub fn new(storage: Arc<dyn Storage>) -> PutHandler {
        PutHandler {
            storage,
        }
    }
}

impl Handler for PutHandler {
    fn handle(&self, req: &DavRequest, res: &mut DavResponse) -> Result<Reply> {
        let path = req.decoded_path();
        let status = match self.storage.get_info(&path)? {
            Some(_) => 200,
            None => 201,
        };

        let declared = match &req.body {
            Body::Empty => {
                self.storage.put_bytes(&path, &[])?;
                res.set_status(status);
                res.set_header(CONTENT_LENGTH, "0");
                return Ok(Reply::Ready);
            },
            Body::Buffered(v) => {
                debug!("put {} bytes inline to {}", v.len(), path);
                self.storage.put_bytes(&path, v)?;
                res.set_status(status);
                res.set_header(CONTENT_LENGTH, "0");
                return Ok(Reply::Ready);
            },
            Body::Streamed(Some(0)) => {
                self.storage.put_bytes(&path, &[])?;
                res.set_status(status);
                res.set_header(CONTENT_LENGTH, "0");
                return Ok(Reply::Ready);
            },
            Body::Streamed(v) => *v,
        };

        let mut session = UploadSession::open(&path, declared)?;
        let storage = self.storage.clone();
        Ok(Reply::Async(Box::new(move |body: &mut dyn Read, res: &mut DavResponse| -> Result<()> {
            res.set_header(CONTENT_LENGTH, "0");
            res.set_header(CONNECTION, "close");
            match session.drive(body) {
                Progress::Complete => {
                    session.commit(storage.as_ref())?;
                    res.set_status(status);
                },
                _ => {
                    res.set_status(500);
                },
            }
            Ok(())
        })))
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::io::{
        empty,
        Cursor,
        Read,
    };
    use std::sync::Arc;

    use super::{
        Progress,
        PutHandler,
        UploadSession,
        UploadState,
    };
    use crate::request::{
        Body,
        DavRequest,
    };
    use crate::response::{
        DavResponse,
        Dispatched,
    };
    use crate::router::Handler;
    use crate::storage::{
        MemoryStorage,
        Storage,
    };

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    fn put(storage: &Arc<dyn Storage>, req: DavRequest, body: &mut dyn Read) -> (bool, DavResponse) {
        let handler = PutHandler::new(storage.clone());
        let mut res = DavResponse::new();
        let reply = handler.handle(&req, &mut res).unwrap();
        let d = Dispatched {
            response: res,
            reply,
        };
        let deferred = d.is_async();
        (deferred, d.finish(body))
    }

    fn content(storage: &Arc<dyn Storage>, path: &str) -> Option<Vec<u8>> {
        let f = storage.get_info(path).unwrap()?;
        Some(storage.get_all(&f).unwrap())
    }

    #[test]
    fn test_session_steps() {
        let storage = MemoryStorage::new();
        let mut src = Cursor::new(b"0123456789".to_vec());
        let mut buf = [0u8; 4];
        let mut session = UploadSession::open("/digits", Some(10)).unwrap();
        assert_eq!(session.state(), UploadState::AwaitingBytes);

        assert_eq!(session.on_readable(&mut src, &mut buf), Progress::Pending);
        assert_eq!(session.state(), UploadState::Accumulating);
        assert_eq!(session.on_readable(&mut src, &mut buf), Progress::Pending);
        assert_eq!(session.remaining(), Some(2));
        assert_eq!(session.on_readable(&mut src, &mut buf), Progress::Complete);
        assert_eq!(session.state(), UploadState::Committing);
        assert_eq!(session.received(), 10);

        let sink = session.sink_path().unwrap();
        session.commit(&storage).unwrap();
        assert_eq!(session.state(), UploadState::Committed);
        assert!(!sink.exists());

        let f = storage.get_info("/digits").unwrap().unwrap();
        assert_eq!(storage.get_all(&f).unwrap(), b"0123456789");
    }

    #[test]
    fn test_session_stops_at_declared_length() {
        let storage = MemoryStorage::new();
        let mut src = Cursor::new(b"helloGET / HTTP/1.1".to_vec());
        let mut session = UploadSession::open("/a", Some(5)).unwrap();
        assert_eq!(session.drive(&mut src), Progress::Complete);
        assert_eq!(src.position(), 5);
        session.commit(&storage).unwrap();
        let f = storage.get_info("/a").unwrap().unwrap();
        assert_eq!(storage.get_all(&f).unwrap(), b"hello");
    }

    #[test]
    fn test_session_short_stream() {
        let storage = MemoryStorage::new();
        let mut session = UploadSession::open("/a", Some(8)).unwrap();
        let sink = session.sink_path().unwrap();
        assert!(sink.exists());
        assert_eq!(session.drive(&mut &b"abc"[..]), Progress::Aborted);
        assert_eq!(session.state(), UploadState::Aborted);
        assert!(!sink.exists());
        assert!(session.commit(&storage).is_err());
        assert!(storage.get_info("/a").unwrap().is_none());
    }

    #[test]
    fn test_session_read_error() {
        let mut session = UploadSession::open("/a", None).unwrap();
        assert_eq!(session.drive(&mut Broken), Progress::Aborted);
        assert!(session.sink_path().is_none());
    }

    #[test]
    fn test_put_buffered() {
        let s: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let req = DavRequest::new("PUT", "/a%20b.txt").with_body(Body::Buffered(b"hello".to_vec()));
        let (deferred, res) = put(&s, req.clone(), &mut empty());
        assert!(!deferred);
        assert_eq!(res.status, 201);
        assert_eq!(content(&s, "/a b.txt").unwrap(), b"hello");

        let (_, res) = put(&s, req, &mut empty());
        assert_eq!(res.status, 200);
    }

    #[test]
    fn test_put_streamed() {
        let s: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let data: Vec<u8> = (0..200_000u32).map(|v| (v % 251) as u8).collect();
        let req = DavRequest::new("PUT", "/big.bin").with_body(Body::Streamed(Some(data.len() as u64)));
        let (deferred, res) = put(&s, req, &mut Cursor::new(data.clone()));
        assert!(deferred);
        assert_eq!(res.status, 201);
        assert_eq!(res.header("Connection"), Some("close"));
        assert_eq!(content(&s, "/big.bin").unwrap(), data);
    }

    #[test]
    fn test_put_streamed_short() {
        let s: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        s.put_bytes("/a.txt", b"old").unwrap();
        let req = DavRequest::new("PUT", "/a.txt").with_body(Body::Streamed(Some(100)));
        let (deferred, res) = put(&s, req, &mut &b"only some"[..]);
        assert!(deferred);
        assert_eq!(res.status, 500);
        assert_eq!(res.header("Connection"), Some("close"));
        assert_eq!(content(&s, "/a.txt").unwrap(), b"old");
    }

    #[test]
    fn test_put_unknown_length() {
        let s: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let req = DavRequest::new("PUT", "/chunked").with_body(Body::Streamed(None));
        let (_, res) = put(&s, req, &mut &b"streamed until eof"[..]);
        assert_eq!(res.status, 201);
        assert_eq!(content(&s, "/chunked").unwrap(), b"streamed until eof");
    }

    #[test]
    fn test_put_empty() {
        let s: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        for (i, body) in [Body::Empty, Body::Streamed(Some(0))].iter().enumerate() {
            let path = format!("/empty{}", i);
            let req = DavRequest::new("PUT", &path).with_body(body.clone());
            let (deferred, res) = put(&s, req, &mut empty());
            assert!(!deferred);
            assert_eq!(res.status, 201);
            assert_eq!(content(&s, &path).unwrap(), b"");
        }
    }

    #[test]
    fn test_put_missing_parent() {
        let s: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let req = DavRequest::new("PUT", "/nowhere/a.txt").with_body(Body::Buffered(b"x".to_vec()));
        let handler = PutHandler::new(s.clone());
        let mut res = DavResponse::new();
        assert!(handler.handle(&req, &mut res).is_err());
    }
}
