//! svndiff binary delta codec
//!
//! A delta stream is a 4-byte `SVN\0` magic header followed by windows,
//! each of which transforms one source byte range plus fresh literal data
//! into one target byte range. A window is five variable-length integers
//! (source offset, source length, target length, instruction-block byte
//! length, literal-data byte length) followed by the instruction block and
//! the literal bytes. An instruction byte carries a 2-bit action tag in the
//! top bits and an inline length in the low 6 bits (0 meaning "read a
//! varint next"); copy instructions are followed by a varint offset.
//!
//! The decoder is a push-style byte sink that validates every invariant
//! before surfacing a window: source views must never slide backwards
//! across the stream, instruction lengths must sum exactly to the declared
//! target length, and every copy must stay in bounds.

use std::io::Write;

use crate::error::{Error, Result};
use crate::varint;

/// Magic header written exactly once before the first window.
pub const SVNDIFF_MAGIC: [u8; 4] = *b"SVN\0";

const ACTION_SOURCE: u8 = 0x00;
const ACTION_TARGET: u8 = 0x40;
const ACTION_NEW: u8 = 0x80;

/// One delta instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Copy `len` bytes from offset `offset` of the source view.
    Source { offset: u64, len: u64 },
    /// Copy `len` bytes from offset `offset` of the target view produced
    /// so far. The offset must reference earlier output; the run may
    /// overlap the write position (self-referential back-copy).
    Target { offset: u64, len: u64 },
    /// Append the next `len` bytes of the window's literal data.
    New { len: u64 },
}

impl Op {
    pub fn len(&self) -> u64 {
        match *self {
            Op::Source { len, .. } | Op::Target { len, .. } | Op::New { len } => len,
        }
    }
}

/// One self-contained unit of a delta stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Window {
    /// Offset of the source view. Monotonically non-decreasing across a
    /// stream; decoders reject backwards-sliding views.
    pub sview_offset: u64,
    /// Length of the source view.
    pub sview_len: u64,
    /// Number of target bytes this window produces.
    pub tview_len: u64,
    /// Instructions, whose lengths sum to exactly `tview_len`.
    pub ops: Vec<Op>,
    /// Literal data consumed by `New` instructions, exactly.
    pub new_data: Vec<u8>,
}

impl Window {
    /// True for the all-zero window that terminates a stream.
    pub fn is_empty(&self) -> bool {
        self.tview_len == 0 && self.ops.is_empty() && self.new_data.is_empty()
    }

    /// Interpret this window against `source` (the bytes of the source
    /// view) and return the produced target bytes.
    pub fn apply(&self, source: &[u8]) -> Result<Vec<u8>> {
        let mut target = Vec::with_capacity(self.tview_len as usize);
        let mut new_pos = 0usize;

        for op in &self.ops {
            match *op {
                Op::Source { offset, len } => {
                    let end = offset
                        .checked_add(len)
                        .ok_or_else(|| Error::malformed("source copy range overflow"))?;
                    if end > source.len() as u64 {
                        return Err(Error::malformed("source copy outside source view"));
                    }
                    target.extend_from_slice(&source[offset as usize..end as usize]);
                }
                Op::Target { offset, len } => {
                    if offset >= target.len() as u64 {
                        return Err(Error::malformed("target copy from unproduced output"));
                    }
                    // Byte-wise so that overlapping runs replicate already
                    // written output (the RLE-style use of this action).
                    let mut from = offset as usize;
                    for _ in 0..len {
                        let b = target[from];
                        target.push(b);
                        from += 1;
                    }
                }
                Op::New { len } => {
                    let end = new_pos + len as usize;
                    if end > self.new_data.len() {
                        return Err(Error::malformed("new-data instruction past literal data"));
                    }
                    target.extend_from_slice(&self.new_data[new_pos..end]);
                    new_pos = end;
                }
            }
        }

        if target.len() as u64 != self.tview_len {
            return Err(Error::malformed(
                "window instructions do not produce declared target length",
            ));
        }
        Ok(target)
    }
}

/// Chunk size used when representing plain content as delta windows.
const CONTENT_WINDOW_SIZE: usize = 102_400;

/// Build windows carrying `data` as fresh literal content, with no source
/// view. This is what a delta against an empty base looks like; replay
/// uses it when it must resend a file's full contents.
pub fn windows_for_content(data: &[u8]) -> Vec<Window> {
    data.chunks(CONTENT_WINDOW_SIZE)
        .map(|chunk| Window {
            sview_offset: 0,
            sview_len: 0,
            tview_len: chunk.len() as u64,
            ops: vec![Op::New {
                len: chunk.len() as u64,
            }],
            new_data: chunk.to_vec(),
        })
        .collect()
}

/// Streaming encoder: writes the magic header before the first window and
/// serializes each window to the underlying sink. `finish` consumes the
/// encoder, so end-of-stream is signalled exactly once.
pub struct SvndiffEncoder<W: Write> {
    out: W,
    header_written: bool,
}

impl<W: Write> SvndiffEncoder<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header_written: false,
        }
    }

    fn write_magic(&mut self) -> Result<()> {
        if !self.header_written {
            self.out.write_all(&SVNDIFF_MAGIC)?;
            self.header_written = true;
        }
        Ok(())
    }

    pub fn write_window(&mut self, window: &Window) -> Result<()> {
        self.write_magic()?;

        // Encode the instruction block.
        let mut instructions = Vec::new();
        for op in &window.ops {
            let (action, offset) = match *op {
                Op::Source { offset, .. } => (ACTION_SOURCE, Some(offset)),
                Op::Target { offset, .. } => (ACTION_TARGET, Some(offset)),
                Op::New { .. } => (ACTION_NEW, None),
            };
            let len = op.len();
            if len > 0 && len < 0x40 {
                instructions.push(action | len as u8);
            } else {
                instructions.push(action);
                varint::encode(len, &mut instructions);
            }
            if let Some(offset) = offset {
                varint::encode(offset, &mut instructions);
            }
        }

        // Encode the header.
        let mut header = Vec::new();
        varint::encode(window.sview_offset, &mut header);
        varint::encode(window.sview_len, &mut header);
        varint::encode(window.tview_len, &mut header);
        varint::encode(instructions.len() as u64, &mut header);
        varint::encode(window.new_data.len() as u64, &mut header);

        self.out.write_all(&header)?;
        self.out.write_all(&instructions)?;
        self.out.write_all(&window.new_data)?;
        Ok(())
    }

    /// Flush and close the stream. An empty stream still carries the magic
    /// header so that a decoder accepts it.
    pub fn finish(mut self) -> Result<W> {
        self.write_magic()?;
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Streaming decoder: feed it bytes as they arrive; complete, validated
/// windows are returned as soon as enough input has been buffered.
pub struct SvndiffDecoder {
    buffer: Vec<u8>,
    header_bytes: usize,
    last_sview_offset: u64,
    last_sview_len: u64,
}

impl Default for SvndiffDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SvndiffDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            header_bytes: 0,
            last_sview_offset: 0,
            last_sview_len: 0,
        }
    }

    /// Buffer `data` and return every window that became complete.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<Vec<Window>> {
        // Chew up four bytes at the beginning for the magic header.
        if self.header_bytes < 4 {
            let n = (4 - self.header_bytes).min(data.len());
            if data[..n] != SVNDIFF_MAGIC[self.header_bytes..self.header_bytes + n] {
                return Err(Error::malformed("svndiff has invalid header"));
            }
            self.header_bytes += n;
            data = &data[n..];
        }

        self.buffer.extend_from_slice(data);

        let mut windows = Vec::new();
        while let Some(window) = self.try_decode_window()? {
            windows.push(window);
        }
        Ok(windows)
    }

    /// Signal end-of-stream. Fails if fewer than four header bytes were
    /// ever seen or undecoded bytes remain (truncated stream).
    pub fn finish(self) -> Result<()> {
        if self.header_bytes < 4 || !self.buffer.is_empty() {
            return Err(Error::malformed("unexpected end of svndiff input"));
        }
        Ok(())
    }

    /// Attempt to decode one window from the buffer; `None` means more
    /// input is needed.
    fn try_decode_window(&mut self) -> Result<Option<Window>> {
        let buf = &self.buffer[..];
        let mut pos = 0usize;

        let mut header = [0u64; 5];
        for slot in header.iter_mut() {
            match varint::decode(&buf[pos..])? {
                Some((val, len)) => {
                    *slot = val;
                    pos += len;
                }
                None => return Ok(None),
            }
        }
        let [sview_offset, sview_len, tview_len, inslen, newlen] = header;

        let body_len = inslen
            .checked_add(newlen)
            .ok_or_else(|| Error::malformed("svndiff contains corrupt window header"))?;
        let sview_end = sview_offset
            .checked_add(sview_len)
            .ok_or_else(|| Error::malformed("svndiff contains corrupt window header"))?;

        // Check for source views which slide backwards.
        if sview_offset < self.last_sview_offset
            || sview_end < self.last_sview_offset + self.last_sview_len
        {
            return Err(Error::malformed(
                "svndiff has backwards-sliding source views",
            ));
        }

        // Wait for more data if the whole window isn't buffered yet.
        if ((buf.len() - pos) as u64) < body_len {
            return Ok(None);
        }

        let ins_end = pos + inslen as usize;
        let ops = decode_and_verify_ops(&buf[pos..ins_end], sview_len, tview_len, newlen)?;
        let new_data = buf[ins_end..ins_end + newlen as usize].to_vec();

        let window = Window {
            sview_offset,
            sview_len,
            tview_len,
            ops,
            new_data,
        };

        // Slide the buffer forward past this window.
        self.buffer.drain(..ins_end + newlen as usize);
        self.last_sview_offset = sview_offset;
        self.last_sview_len = sview_len;

        Ok(Some(window))
    }
}

/// Decode one instruction from the front of `buf`, or `None` if the block
/// ends mid-instruction (which, inside a complete instruction block, is a
/// malformed stream and handled by the caller).
fn decode_op(buf: &[u8]) -> Result<Option<(Op, usize)>> {
    let Some(&selector) = buf.first() else {
        return Ok(None);
    };
    let action = selector & 0xc0;
    let mut pos = 1usize;

    let mut len = u64::from(selector & 0x3f);
    if len == 0 {
        match varint::decode(&buf[pos..])? {
            Some((val, n)) => {
                len = val;
                pos += n;
            }
            None => return Ok(None),
        }
    }

    let op = match action {
        ACTION_NEW => Op::New { len },
        ACTION_SOURCE | ACTION_TARGET => {
            let Some((offset, n)) = varint::decode(&buf[pos..])? else {
                return Ok(None);
            };
            pos += n;
            if action == ACTION_SOURCE {
                Op::Source { offset, len }
            } else {
                Op::Target { offset, len }
            }
        }
        _ => return Err(Error::malformed("svndiff contains invalid instructions")),
    };
    Ok(Some((op, pos)))
}

/// Decode the full instruction block and verify it against the window
/// lengths: every length fits the remaining target budget, source copies
/// stay within the source view, target copies reference earlier output
/// only, and literal consumption matches the declared literal length.
fn decode_and_verify_ops(
    mut buf: &[u8],
    sview_len: u64,
    tview_len: u64,
    new_len: u64,
) -> Result<Vec<Op>> {
    let mut ops = Vec::new();
    let mut tpos = 0u64;
    let mut npos = 0u64;

    while !buf.is_empty() {
        let (op, consumed) = decode_op(buf)?
            .ok_or_else(|| Error::malformed("svndiff contains invalid instructions"))?;
        buf = &buf[consumed..];

        let len = op.len();
        if len > tview_len - tpos {
            return Err(Error::malformed("svndiff contains invalid instructions"));
        }
        match op {
            Op::Source { offset, .. } => {
                if offset > sview_len || len > sview_len - offset {
                    return Err(Error::malformed("svndiff contains invalid instructions"));
                }
            }
            Op::Target { offset, .. } => {
                if offset >= tpos {
                    return Err(Error::malformed("svndiff contains invalid instructions"));
                }
            }
            Op::New { .. } => {
                if len > new_len - npos {
                    return Err(Error::malformed("svndiff contains invalid instructions"));
                }
                npos += len;
            }
        }
        tpos += len;
        ops.push(op);
    }

    if tpos != tview_len || npos != new_len {
        return Err(Error::malformed("svndiff contains invalid instructions"));
    }
    Ok(ops)
}
