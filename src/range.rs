//! Single byte-range handling for `Range` / `Content-Range`.
//!
//! Only one range per request is served. Anything the parser cannot map onto
//! a satisfiable span of the resource is reported as a [RangeError], which the
//! GET handler answers with `416`.
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("malformed range header: {0}")]
    Malformed(String),

    #[error("range {0} not satisfiable for {1} bytes")]
    Unsatisfiable(String, u64),
}

/// Inclusive byte span within a resource of `total` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub from: u64,
    pub to: u64,
    pub total: u64,
}

impl Range {
    /// The whole resource, `None` when it is empty.
    pub fn full(total: u64) -> Option<Range> {
        if total == 0 {
            return None;
        }
        Some(Range {
            from: 0,
            to: total - 1,
            total,
        })
    }

    /// Parse a `Range` header value against a resource of `total` bytes.
    ///
    /// Accepts `bytes=a-b`, `bytes=a-` and `bytes=-n`.
    pub fn parse(header: &str, total: u64) -> Result<Range, RangeError> {
        let malformed = || RangeError::Malformed(header.to_string());
        let unsatisfiable = || RangeError::Unsatisfiable(header.to_string(), total);

        let ranges = match header.trim().strip_prefix("bytes=") {
            Some(v) => v.trim(),
            None => {
                return Err(malformed());
            },
        };
        if ranges.contains(',') {
            return Err(unsatisfiable());
        }
        let (start, end) = match ranges.split_once('-') {
            Some(v) => v,
            None => {
                return Err(malformed());
            },
        };
        let (start, end) = (start.trim(), end.trim());
        let number = |s: &str| u64::from_str(s).map_err(|_| malformed());

        let r = if start.is_empty() {
            let n = number(end)?;
            if n == 0 || total == 0 {
                return Err(unsatisfiable());
            }
            Range {
                from: total - n.min(total),
                to: total - 1,
                total,
            }
        } else if end.is_empty() {
            let from = number(start)?;
            if from >= total {
                return Err(unsatisfiable());
            }
            Range {
                from,
                to: total - 1,
                total,
            }
        } else {
            let from = number(start)?;
            let to = number(end)?;
            if from > to || to >= total {
                return Err(unsatisfiable());
            }
            Range {
                from,
                to,
                total,
            }
        };
        Ok(r)
    }

    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }

    /// Exclusive end offset, as taken by `Storage::get_data`.
    pub fn end(&self) -> u64 {
        self.to + 1
    }
}

/// Formats the `Content-Range` value, `bytes from-to/total`.
impl fmt::Display for Range {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "bytes {}-{}/{}", self.from, self.to, self.total)
    }
}
