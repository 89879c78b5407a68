//! Dump-stream parser
//!
//! A dump stream is a sequence of records, each an RFC822-style header
//! block terminated by a blank line and possibly followed by a content
//! block whose size the headers declare. Records are classified by the
//! header they carry: `Revision-number`, `Node-path`, `UUID`, or the
//! format-version magic. Content blocks hold a property sub-block
//! (`K`/`V`/`D` length-prefixed entries ending at `PROPS-END`) and/or a
//! text sub-block, either fulltext or an svndiff delta.
//!
//! The parser is single-pass over any `BufRead` and drives a
//! `DumpConsumer` with record lifecycle events; it owns all framing
//! concerns (lengths, sub-block accounting, trailing-content drain) so
//! consumers only see structured data.

use std::collections::HashMap;
use std::io::BufRead;

use crate::error::{Error, Result};
use crate::props;
use crate::svndiff::{SvndiffDecoder, Window};

/// Newest dump format this parser understands. Version 3 adds property
/// and text deltas.
pub const DUMPFILE_FORMAT_VERSION: u32 = 3;

/// Header naming the dump format version; also the first line of every
/// stream.
pub const MAGIC_HEADER: &str = "SVN-fs-dump-format-version";

pub const REVISION_NUMBER: &str = "Revision-number";
pub const NODE_PATH: &str = "Node-path";
pub const NODE_KIND: &str = "Node-kind";
pub const NODE_ACTION: &str = "Node-action";
pub const NODE_COPYFROM_REV: &str = "Node-copyfrom-rev";
pub const NODE_COPYFROM_PATH: &str = "Node-copyfrom-path";
pub const TEXT_COPY_SOURCE_MD5: &str = "Text-copy-source-md5";
pub const TEXT_DELTA_BASE_MD5: &str = "Text-delta-base-md5";
pub const TEXT_CONTENT_MD5: &str = "Text-content-md5";
pub const TEXT_CONTENT_SHA1: &str = "Text-content-sha1";
pub const CONTENT_LENGTH: &str = "Content-length";
pub const PROP_CONTENT_LENGTH: &str = "Prop-content-length";
pub const TEXT_CONTENT_LENGTH: &str = "Text-content-length";
pub const PROP_DELTA: &str = "Prop-delta";
pub const TEXT_DELTA: &str = "Text-delta";
pub const UUID: &str = "UUID";

/// Parsed header block of one record.
pub type Headers = HashMap<String, String>;

/// Receiver for parsed dump records.
///
/// The parser calls these in stream order: `new_revision_record` (after
/// closing any previous revision), then per node `new_node_record`,
/// property callbacks, text delivery, `close_node`; `close_revision`
/// fires before the next revision record and once at end of stream.
pub trait DumpConsumer {
    /// The stream's declared format version, reported once up front.
    fn format_version(&mut self, _version: u32) -> Result<()> {
        Ok(())
    }
    fn uuid_record(&mut self, uuid: &str) -> Result<()>;
    fn new_revision_record(&mut self, headers: &Headers) -> Result<()>;
    fn new_node_record(&mut self, headers: &Headers) -> Result<()>;
    fn set_revision_property(&mut self, name: &str, value: &[u8]) -> Result<()>;
    fn set_node_property(&mut self, name: &str, value: &[u8]) -> Result<()>;
    fn delete_node_property(&mut self, name: &str) -> Result<()>;
    /// Clear the node's properties; sent before a non-delta property
    /// block, which is a full replacement.
    fn remove_node_props(&mut self) -> Result<()>;
    /// One chunk of fulltext. Zero-length text arrives as a single empty
    /// chunk.
    fn fulltext_chunk(&mut self, chunk: &[u8]) -> Result<()>;
    /// One decoded, validated delta window.
    fn delta_window(&mut self, window: Window) -> Result<()>;
    fn close_node(&mut self) -> Result<()>;
    fn close_revision(&mut self) -> Result<()>;

    /// Whether this consumer can apply property and text deltas. Streams
    /// of format version 3 are rejected when this returns false.
    fn handles_deltas(&self) -> bool {
        false
    }

    /// Notification that a mergeinfo property value carried CR line
    /// endings and was normalized to LF before delivery.
    fn mergeinfo_normalized(&mut self) {}
}

const CHUNK_SIZE: usize = 102_400;

fn ran_dry() -> Error {
    Error::incomplete("premature end of content data in dumpstream")
}

fn stream_malformed() -> Error {
    Error::malformed("dumpstream data appears to be malformed")
}

enum LineRead {
    Line(Vec<u8>),
    /// Stream ended; carries whatever partial line preceded EOF.
    Eof(Vec<u8>),
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<LineRead> {
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line)?;
    if line.last() == Some(&b'\n') {
        line.pop();
        Ok(LineRead::Line(line))
    } else {
        Ok(LineRead::Eof(line))
    }
}

fn read_exact<R: BufRead>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(ran_dry());
        }
        filled += n;
    }
    Ok(buf)
}

fn parse_u64(value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::malformed(format!("invalid number '{value}' in dumpstream")))
}

/// Read RFC822-style headers up to (and consuming) the blank terminator
/// line. `first_header` is the record's first line, already read by the
/// caller.
fn read_header_block<R: BufRead>(reader: &mut R, first_header: String) -> Result<Headers> {
    let mut headers = Headers::new();
    let mut pending = Some(first_header);

    loop {
        let line = match pending.take() {
            Some(line) => line,
            None => match read_line(reader)? {
                LineRead::Line(line) => String::from_utf8(line)
                    .map_err(|_| Error::malformed("non-UTF-8 header in dumpstream"))?,
                LineRead::Eof(partial) if partial.is_empty() => break,
                LineRead::Eof(_) => return Err(ran_dry()),
            },
        };
        if line.is_empty() {
            break; // end of header block
        }
        let (name, rest) = line.split_once(':').ok_or_else(|| {
            Error::malformed(format!("dump stream contains a header with no ':': '{line}'"))
        })?;
        // The separator is ": "; a colon at end-of-line has no value.
        if rest.is_empty() {
            return Err(Error::malformed(format!(
                "dump stream contains a header with no value: '{name}'"
            )));
        }
        headers.insert(name.to_string(), rest[1..].to_string());
    }
    Ok(headers)
}

/// Verify the stream's opening `SVN-fs-dump-format-version: N` line.
fn parse_format_version(line: &str) -> Result<u32> {
    let version = line
        .strip_prefix(MAGIC_HEADER)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or_else(|| Error::malformed("malformed dumpfile header"))?;
    let version = parse_u64(version.trim())? as u32;
    if version > DUMPFILE_FORMAT_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    Ok(version)
}

/// Parse a `content_length`-byte property sub-block, forwarding each
/// entry. Returns the number of bytes actually consumed, which the
/// old-v1 heuristic needs to size an undeclared text block.
fn parse_property_block<R: BufRead, C: DumpConsumer + ?Sized>(
    reader: &mut R,
    content_length: u64,
    consumer: &mut C,
    is_node: bool,
) -> Result<u64> {
    let mut consumed = 0u64;

    while consumed != content_length {
        // Read a key length line. (It might be PROPS-END.)
        let line = match read_line(reader)? {
            LineRead::Line(line) => line,
            LineRead::Eof(_) => {
                return Err(Error::malformed(
                    "incomplete or unterminated property block",
                ));
            }
        };
        consumed += line.len() as u64 + 1;

        if line == b"PROPS-END" {
            break; // no more properties
        }

        if let Some(len) = line.strip_prefix(b"K ") {
            let key = read_prop_chunk(reader, len, &mut consumed)?;
            let key = String::from_utf8(key)
                .map_err(|_| Error::malformed("non-UTF-8 property name"))?;

            // Read a value length line.
            let line = match read_line(reader)? {
                LineRead::Line(line) => line,
                LineRead::Eof(_) => return Err(ran_dry()),
            };
            consumed += line.len() as u64 + 1;
            let Some(len) = line.strip_prefix(b"V ") else {
                return Err(stream_malformed()); // expected a 'V' line
            };
            let mut value = read_prop_chunk(reader, len, &mut consumed)?;

            if is_node {
                // Mergeinfo parsing chokes on CR line endings, which a
                // dump stream may legitimately carry. Normalize to LF
                // and notify the consumer of the correction.
                if key == props::MERGE_INFO && value.contains(&b'\r') {
                    value = normalize_eol(&value);
                    consumer.mergeinfo_normalized();
                }
                consumer.set_node_property(&key, &value)?;
            } else {
                consumer.set_revision_property(&key, &value)?;
            }
        } else if let Some(len) = line.strip_prefix(b"D ") {
            let key = read_prop_chunk(reader, len, &mut consumed)?;
            let key = String::from_utf8(key)
                .map_err(|_| Error::malformed("non-UTF-8 property name"))?;
            // Deletions don't occur in revision properties; there they
            // mean a v3 feature leaked into an older stream.
            if !is_node {
                return Err(stream_malformed());
            }
            consumer.delete_node_property(&key)?;
        } else {
            return Err(stream_malformed()); // expected a 'K' line
        }
    }
    Ok(consumed)
}

/// Read a length-prefixed property key or value plus its trailing
/// newline, tracking consumed bytes.
fn read_prop_chunk<R: BufRead>(
    reader: &mut R,
    len_text: &[u8],
    consumed: &mut u64,
) -> Result<Vec<u8>> {
    let len_text =
        std::str::from_utf8(len_text).map_err(|_| stream_malformed())?;
    let len = parse_u64(len_text)? as usize;
    let buf = read_exact(reader, len)?;
    let newline = read_exact(reader, 1)?;
    *consumed += len as u64 + 1;
    if newline[0] != b'\n' {
        return Err(stream_malformed());
    }
    Ok(buf)
}

fn normalize_eol(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    let mut bytes = value.iter().peekable();
    while let Some(&b) = bytes.next() {
        if b == b'\r' {
            if bytes.peek() == Some(&&b'\n') {
                bytes.next();
            }
            out.push(b'\n');
        } else {
            out.push(b);
        }
    }
    out
}

/// Read a `content_length`-byte text sub-block, delivering it either as
/// fulltext chunks or as decoded delta windows.
fn parse_text_block<R: BufRead, C: DumpConsumer + ?Sized>(
    reader: &mut R,
    mut content_length: u64,
    is_delta: bool,
    consumer: &mut C,
) -> Result<()> {
    let mut decoder = if is_delta {
        Some(SvndiffDecoder::new())
    } else {
        None
    };

    // Zero-length fulltext still replaces the contents.
    if content_length == 0 && decoder.is_none() {
        consumer.fulltext_chunk(&[])?;
    }

    while content_length > 0 {
        let rlen = (content_length).min(CHUNK_SIZE as u64) as usize;
        let buf = read_exact(reader, rlen)?;
        content_length -= rlen as u64;
        match decoder {
            Some(ref mut decoder) => {
                for window in decoder.feed(&buf)? {
                    consumer.delta_window(window)?;
                }
            }
            None => consumer.fulltext_chunk(&buf)?,
        }
    }

    if let Some(decoder) = decoder {
        decoder.finish()?;
    }
    Ok(())
}

/// Drain `remaining` declared-but-unparsed content bytes.
fn drain<R: BufRead>(reader: &mut R, mut remaining: u64) -> Result<()> {
    while remaining > 0 {
        let rlen = remaining.min(CHUNK_SIZE as u64) as usize;
        read_exact(reader, rlen)?;
        remaining -= rlen as u64;
    }
    Ok(())
}

/// Parse a complete dump stream, driving `consumer` record by record.
///
/// `cancel` is polled once per record; returning true stops the parse
/// with `Error::Cancelled`.
pub fn parse_dumpstream<R: BufRead, C: DumpConsumer + ?Sized>(
    reader: &mut R,
    consumer: &mut C,
    mut cancel: Option<&mut dyn FnMut() -> bool>,
) -> Result<()> {
    // The first line of the stream is the dumpfile format version.
    let line = match read_line(reader)? {
        LineRead::Line(line) => {
            String::from_utf8(line).map_err(|_| Error::malformed("malformed dumpfile header"))?
        }
        LineRead::Eof(_) => return Err(ran_dry()),
    };
    let mut version = parse_format_version(&line)?;

    // Deltas arrived with the current format version; a consumer that
    // cannot apply them cannot load such a stream.
    if version == DUMPFILE_FORMAT_VERSION && !consumer.handles_deltas() {
        return Err(Error::UnsupportedVersion(version));
    }
    consumer.format_version(version)?;

    let mut revision_open = false;

    loop {
        if let Some(cancel) = cancel.as_mut() {
            if cancel() {
                return Err(Error::Cancelled);
            }
        }

        // Keep reading blank lines until we discover a new record, or
        // until the stream runs out.
        let line = match read_line(reader)? {
            LineRead::Eof(partial) => {
                if partial.is_empty() {
                    break; // end of stream, go home
                }
                return Err(ran_dry());
            }
            LineRead::Line(line) => line,
        };
        if line.is_empty() || line[0].is_ascii_whitespace() {
            continue;
        }
        let first = String::from_utf8(line)
            .map_err(|_| Error::malformed("non-UTF-8 header in dumpstream"))?;
        let headers = read_header_block(reader, first)?;

        let mut found_node = false;
        if headers.contains_key(REVISION_NUMBER) {
            if revision_open {
                consumer.close_revision()?;
            }
            consumer.new_revision_record(&headers)?;
            revision_open = true;
        } else if headers.contains_key(NODE_PATH) {
            if !revision_open {
                return Err(Error::malformed("node record outside a revision"));
            }
            consumer.new_node_record(&headers)?;
            found_node = true;
        } else if let Some(uuid) = headers.get(UUID) {
            consumer.uuid_record(uuid)?;
        } else if let Some(value) = headers.get(MAGIC_HEADER) {
            version = parse_u64(value)? as u32;
            if version > DUMPFILE_FORMAT_VERSION {
                return Err(Error::UnsupportedVersion(version));
            }
        } else {
            return Err(Error::malformed("unrecognized record type in stream"));
        }

        let content_length = headers.get(CONTENT_LENGTH).map(String::as_str);
        let prop_cl = headers.get(PROP_CONTENT_LENGTH).map(String::as_str);
        let text_cl = headers.get(TEXT_CONTENT_LENGTH).map(String::as_str);

        // Old (pre 0.14) v1 dumps lack the Prop-/Text-content-length
        // split but always frame the properties inside Content-length.
        let old_v1_with_cl =
            version == 1 && content_length.is_some() && prop_cl.is_none() && text_cl.is_none();

        let mut actual_prop_length = 0;
        if prop_cl.is_some() || old_v1_with_cl {
            let is_delta = headers.get(PROP_DELTA).map(String::as_str) == Some("true");
            // A non-delta block is a full replacement of the node's
            // properties.
            if found_node && !is_delta {
                consumer.remove_node_props()?;
            }
            let declared = parse_u64(prop_cl.or(content_length).unwrap_or("0"))?;
            actual_prop_length = parse_property_block(reader, declared, consumer, found_node)?;
        }

        if let Some(text_cl) = text_cl {
            let is_delta = headers.get(TEXT_DELTA).map(String::as_str) == Some("true");
            parse_text_block(reader, parse_u64(text_cl)?, is_delta, consumer)?;
        } else if old_v1_with_cl {
            // If the property block did not consume the whole
            // Content-length, the rest is a text block. A consumed-flat
            // block still carries an *empty* text block when the node is
            // a file (a file modification); otherwise the text block is
            // absent.
            let cl_value = parse_u64(content_length.unwrap_or("0"))?
                .checked_sub(actual_prop_length)
                .ok_or_else(stream_malformed)?;
            if cl_value > 0 || headers.get(NODE_KIND).map(String::as_str) == Some("file") {
                parse_text_block(reader, cl_value, false, consumer)?;
            }
        }

        // If we have a Content-length, consume whatever part of it the
        // sub-blocks did not declare. (Old v1 always consumes all of it.)
        if let Some(content_length) = content_length {
            if !old_v1_with_cl {
                let declared = parse_u64(content_length)?;
                let sub = prop_cl.map_or(Ok(0), parse_u64)? + text_cl.map_or(Ok(0), parse_u64)?;
                let remaining = declared.checked_sub(sub).ok_or_else(|| {
                    Error::malformed("sum of subblock sizes larger than total block content length")
                })?;
                drain(reader, remaining)?;
            }
        }

        if found_node {
            consumer.close_node()?;
        }
    }

    // Close out whatever revision we're in.
    if revision_open {
        consumer.close_revision()?;
    }
    Ok(())
}
