//! Row-to-record encoding for the delimited output format.
//!
//! A record is the column values in cursor order, separated by the delimiter
//! and closed by the record terminator. NULL becomes the sentinel literal.
//! Field bytes pass through a [`ByteFilter`] first; the default filter removes
//! every occurrence of the record terminator so one row is always one record.
//! The delimiter is not escaped: data containing it, or equal to the sentinel,
//! cannot be told apart on read.

use crate::config::validate_format;
use crate::error::{DumpError, DumpResult};
use crate::models::{RecordFormat, Row};
use std::sync::Arc;

/// Rewrites raw field bytes on their way into a record.
pub trait ByteFilter: Send + Sync {
    fn filter_into(&self, input: &[u8], out: &mut Vec<u8>);
}

/// Drops every occurrence of a fixed set of bytes.
#[derive(Debug, Clone)]
pub struct StripBytes {
    bytes: Vec<u8>,
}

impl StripBytes {
    pub fn new(bytes: &[u8]) -> Self {
        let mut bytes = bytes.to_vec();
        bytes.sort_unstable();
        bytes.dedup();
        Self { bytes }
    }

    fn copy_between<I: Iterator<Item = usize>>(input: &[u8], hits: I, out: &mut Vec<u8>) {
        let mut start = 0;
        for pos in hits {
            out.extend_from_slice(&input[start..pos]);
            start = pos + 1;
        }
        out.extend_from_slice(&input[start..]);
    }
}

impl ByteFilter for StripBytes {
    fn filter_into(&self, input: &[u8], out: &mut Vec<u8>) {
        match *self.bytes.as_slice() {
            [] => out.extend_from_slice(input),
            [a] => Self::copy_between(input, memchr::memchr_iter(a, input), out),
            [a, b] => Self::copy_between(input, memchr::memchr2_iter(a, b, input), out),
            [a, b, c] => Self::copy_between(input, memchr::memchr3_iter(a, b, c, input), out),
            _ => out.extend(input.iter().filter(|b| !self.bytes.contains(b))),
        }
    }
}

/// Stateless encoder; one instance can serve any number of rows and threads.
#[derive(Clone)]
pub struct Encoder {
    delimiter: u8,
    terminator: u8,
    null_sentinel: Vec<u8>,
    filter: Arc<dyn ByteFilter>,
}

impl Encoder {
    pub fn new(format: &RecordFormat) -> DumpResult<Self> {
        validate_format(format)?;
        let delimiter = ascii_byte(format.delimiter)?;
        let terminator = ascii_byte(format.record_terminator)?;
        Ok(Self {
            delimiter,
            terminator,
            null_sentinel: format.null_sentinel.as_bytes().to_vec(),
            filter: Arc::new(StripBytes::new(&[terminator])),
        })
    }

    /// Replaces the field filter. The replacement is responsible for keeping
    /// the record terminator out of field text.
    pub fn with_filter(mut self, filter: Arc<dyn ByteFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn encode_header(&self, columns: &[String], out: &mut Vec<u8>) {
        self.encode_fields(columns.iter().map(|c| Some(c.as_bytes())), out);
    }

    pub fn encode_row(&self, row: &Row, out: &mut Vec<u8>) {
        self.encode_fields(row.values().iter().map(|v| v.as_deref()), out);
    }

    fn encode_fields<'a, I>(&self, fields: I, out: &mut Vec<u8>)
    where
        I: Iterator<Item = Option<&'a [u8]>>,
    {
        for (i, field) in fields.enumerate() {
            if i > 0 {
                out.push(self.delimiter);
            }
            match field {
                Some(bytes) => self.filter.filter_into(bytes, out),
                None => out.extend_from_slice(&self.null_sentinel),
            }
        }
        out.push(self.terminator);
    }
}

fn ascii_byte(c: char) -> DumpResult<u8> {
    u8::try_from(c)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| DumpError::Config(format!("{:?} is not a single-byte character", c)))
}
