//! jsonwall, a sorted line-oriented JSON record store.
//!
//! A jsonwall is a byte stream: one header line
//! `{"jsonwall":"1.0","schema":"<S>","count":N}` followed by `N-1` payload
//! lines, each a single JSON object terminated by `\n`.
//!
//! Determinism rules:
//! - payload lines are sorted by raw byte order after serialisation
//! - records must serialise object fields in a fixed declaration order, so
//!   that records sharing leading fields share a byte prefix
//!
//! The ordered-field contract is what makes lookups cheap: `get` and
//! `iter_prefix` serialise a partial record, cut its closing brace, and
//! binary-search the line index for the first line carrying that byte
//! prefix. When the last encoded field is a string its closing quote is
//! also trimmed, which turns the search into a string-prefix query (for
//! example "every path under /usr/").

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WallError {
    #[error("unsupported database format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid database: {0}")]
    Malformed(String),

    #[error("value not found in database")]
    NotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type WallResult<T> = Result<T, WallError>;

/// Wire format version emitted by the writer.
const WALL_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    jsonwall: String,
    schema: String,
    count: usize,
}

/// Accumulates records, then sorts and streams them out.
#[derive(Debug)]
pub struct JsonWallWriter {
    schema: String,
    lines: Vec<Vec<u8>>,
}

impl JsonWallWriter {
    pub fn new(schema: impl Into<String>) -> Self {
        JsonWallWriter {
            schema: schema.into(),
            lines: Vec::new(),
        }
    }

    /// Append one record. Field order follows the struct declaration.
    pub fn add<T: Serialize>(&mut self, value: &T) -> WallResult<()> {
        let line = serde_json::to_vec(value)
            .map_err(|e| WallError::Malformed(format!("cannot encode record: {e}")))?;
        self.lines.push(line);
        Ok(())
    }

    /// Number of records added so far.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sort records byte-wise and stream the wall to `sink`.
    ///
    /// Identical records collapse into a single line.
    pub fn write_to<W: Write>(mut self, sink: &mut W) -> WallResult<()> {
        self.lines.sort();
        self.lines.dedup();

        let header = Header {
            jsonwall: WALL_VERSION.to_string(),
            schema: self.schema.clone(),
            count: self.lines.len() + 1,
        };
        let header = serde_json::to_vec(&header)
            .map_err(|e| WallError::Malformed(format!("cannot encode header: {e}")))?;
        sink.write_all(&header)?;
        sink.write_all(b"\n")?;
        for line in &self.lines {
            sink.write_all(line)?;
            sink.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// A read-only wall with a memoised line index.
#[derive(Debug)]
pub struct JsonWall {
    schema: String,
    lines: Vec<String>,
}

impl JsonWall {
    /// Load a wall from a byte source.
    ///
    /// Headers with major version 1 are accepted; anything else is
    /// `UnsupportedFormat`. A `count` larger than 8x the stream length is
    /// ignored when sizing the line index, as a guard against hostile
    /// headers demanding huge allocations.
    pub fn read<R: Read>(source: R) -> WallResult<Self> {
        let mut source = source;
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;

        let mut raw_lines = data.split(|&b| b == b'\n');
        let header_line = raw_lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| WallError::Malformed("empty stream".to_string()))?;
        let header: Header = serde_json::from_slice(header_line)
            .map_err(|e| WallError::Malformed(format!("cannot decode header: {e}")))?;

        let major = header.jsonwall.split('.').next().unwrap_or("");
        if major != "1" {
            return Err(WallError::UnsupportedFormat(format!(
                "jsonwall version {} not supported",
                header.jsonwall
            )));
        }

        let mut lines = Vec::new();
        if header.count > 0 && header.count <= data.len().saturating_mul(8) {
            lines.reserve(header.count - 1);
        }
        for line in raw_lines {
            if line.is_empty() {
                continue;
            }
            let line = std::str::from_utf8(line)
                .map_err(|_| WallError::Malformed("record is not valid UTF-8".to_string()))?;
            lines.push(line.to_string());
        }
        if header.count != 0 && header.count != lines.len() + 1 {
            return Err(WallError::Malformed(format!(
                "header count {} does not match {} lines",
                header.count,
                lines.len() + 1
            )));
        }
        Ok(JsonWall {
            schema: header.schema,
            lines,
        })
    }

    /// Schema tag recorded in the header.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Number of payload records.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Exact lookup: find the single record matching every field of
    /// `prefix`, decoding the full line into `T`.
    pub fn get<P: Serialize, T: DeserializeOwned>(&self, prefix: &P) -> WallResult<T> {
        let body = self.encode_prefix(prefix)?;
        let stem = &body[..body.len() - 1];
        // A matching record either closes right after the prefix fields or
        // continues with more of them, so search with the bare stem.
        let idx = self.lower_bound(stem.as_bytes());
        if idx < self.lines.len() {
            let line = &self.lines[idx];
            if let Some(rest) = line.strip_prefix(stem) {
                if rest.starts_with(',') || rest.starts_with('}') {
                    return serde_json::from_str(line)
                        .map_err(|e| WallError::Malformed(format!("cannot decode record: {e}")));
                }
            }
        }
        Err(WallError::NotFound)
    }

    /// Iterate every record whose serialised form begins with `prefix`'s
    /// encoding. When the last encoded field is a string, its closing
    /// quote is trimmed so that the final field matches by string prefix.
    pub fn iter_prefix<'a, P: Serialize, T: DeserializeOwned>(
        &'a self,
        prefix: &P,
    ) -> WallResult<PrefixIter<'a, T>> {
        let mut body = self.encode_prefix(prefix)?;
        if body.ends_with("\",") {
            body.truncate(body.len() - 2);
        }
        let start = self.lower_bound(body.as_bytes());
        Ok(PrefixIter {
            wall: self,
            prefix: body,
            next: start,
            _marker: std::marker::PhantomData,
        })
    }

    /// Serialise a partial record and swap its closing brace for a comma,
    /// yielding the byte prefix shared by matching lines.
    fn encode_prefix<P: Serialize>(&self, prefix: &P) -> WallResult<String> {
        let mut s = serde_json::to_string(prefix)
            .map_err(|e| WallError::Malformed(format!("cannot encode prefix: {e}")))?;
        if !s.ends_with('}') {
            return Err(WallError::Malformed(
                "prefix value must encode to a JSON object".to_string(),
            ));
        }
        s.truncate(s.len() - 1);
        s.push(',');
        Ok(s)
    }

    /// First index whose line sorts at or after `key`.
    fn lower_bound(&self, key: &[u8]) -> usize {
        self.lines.partition_point(|line| line.as_bytes() < key)
    }
}

pub struct PrefixIter<'a, T> {
    wall: &'a JsonWall,
    prefix: String,
    next: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<'a, T: DeserializeOwned> Iterator for PrefixIter<'a, T> {
    type Item = WallResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.wall.lines.len() {
            return None;
        }
        let line = &self.wall.lines[self.next];
        if !line.starts_with(self.prefix.as_str()) {
            return None;
        }
        self.next += 1;
        Some(
            serde_json::from_str(line)
                .map_err(|e| WallError::Malformed(format!("cannot decode record: {e}"))),
        )
    }
}
