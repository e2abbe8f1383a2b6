#![crate_name = "davbridge"]

//! davbridge is a WebDAV class 1 server in front of a pluggable storage backend.
//!
//! Requests are translated into calls on the [Storage](crate::storage::Storage) capability, so the
//! same protocol layer can serve a local folder, an in-memory tree or anything else that can list,
//! read, write, move and delete objects.
//!
//! ## Supported methods
//!
//! `OPTIONS`, `GET` (with single byte ranges and `If-Modified-Since`), `PUT`, `DELETE`, `MKCOL`,
//! `MOVE` and `PROPFIND` at depth `0` and `1`. Every response advertises `DAV: 1` and the set of
//! registered methods in `Allow`. Locking and property writes are not provided.
//!
//! ## Running the daemon
//!
//! The daemon listens on all addresses on port 8000 by default and serves the current directory.
//! This behavior can be modified by the argument options. See `cargo run -- --help` for details.
//!
//! ## Uploading content
//!
//! With a server running on `localhost:8000`, a file can be stored and fetched back with:
//!
//! ``` ignore,
//! curl -T notes.txt http://localhost:8000/notes.txt
//! curl -H 'Range: bytes=0-9' http://localhost:8000/notes.txt
//! ```

/// Error types shared by the backends and the request handlers.
pub mod error;

/// The storage capability and its bundled backends.
pub mod storage;

/// Encapsulates an incoming remote request.
pub mod request;

/// Encapsulates an outgoing response to remote.
pub mod response;

/// Method routing and the `DAV` compliance header.
pub mod router;

/// Single byte-range parsing.
pub mod range;

/// `PROPFIND` parsing and multistatus rendering.
pub mod propfind;

/// Content retrieval.
pub mod get;

/// Uploads.
pub mod put;

/// `DELETE`, `MKCOL` and `MOVE`.
pub mod ops;

/// Threads running deferred request work.
pub mod worker;

/// The `tiny_http` front end.
pub mod server;
