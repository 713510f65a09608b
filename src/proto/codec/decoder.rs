use bytes::{Buf, Bytes, BytesMut};

use crate::proto::error::DecodeError;
use crate::proto::frame::Frame;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024; // 512 MB default

/// Deepest array nesting accepted in a single reply.
const MAX_NESTING_DEPTH: usize = 512;

/// Upper bound on elements reserved up front for an array header.
const MAX_PREALLOCATED_ITEMS: usize = 1024;

/// Smallest encoding of an array element (`+\r\n`).
const MIN_ELEMENT_SIZE: usize = 3;

/// An array whose elements are still arriving.
#[derive(Debug)]
struct PartialArray {
    remaining: usize,
    items: Vec<Frame>,
}

/// One scalar frame or the header of an array.
enum Item {
    Frame(Frame),
    ArrayHeader(usize),
}

/// A RESP decoder that converts bytes to [`Frame`] types.
///
/// The decoder handles streaming input and decodes frames incrementally.
/// Call [`append`](Decoder::append) to add data, then [`decode`](Decoder::decode)
/// to parse frames. Elements of an array that are already complete are
/// consumed and kept, so a large reply arriving in many reads is parsed
/// once. An incomplete scalar stays in the buffer until it can be parsed.
///
/// After an error the decoder state is unspecified and the connection it
/// serves should be dropped.
///
/// # Example
///
/// ```
/// use redpipe::proto::codec::Decoder;
/// use redpipe::proto::frame::Frame;
///
/// let mut decoder = Decoder::new();
/// decoder.append(b"+QUEUED\r\n");
/// let frame = decoder.decode().unwrap().unwrap();
/// assert_eq!(frame, Frame::SimpleString(b"QUEUED".to_vec()));
/// ```
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_frame_size: usize,
    /// Open arrays of the frame in progress, outermost first.
    stack: Vec<PartialArray>,
    /// Bytes of the frame in progress already consumed from `buf`.
    frame_len: usize,
    /// Offset up to which `buf` is known to hold no CRLF.
    scanned: usize,
}

impl Decoder {
    /// Creates a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a new decoder with a custom maximum frame size.
    ///
    /// # Arguments
    ///
    /// * `max_frame_size` - Maximum size in bytes for a single frame
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
            stack: Vec::new(),
            frame_len: 0,
            scanned: 0,
        }
    }

    /// Appends raw bytes to the internal buffer.
    ///
    /// Frame size limits are checked during decode, not append.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the number of buffered bytes not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Attempts to decode a frame from the buffer.
    ///
    /// Returns `Ok(Some(Frame))` if a complete frame was decoded.
    /// Returns `Ok(None)` if more data is needed.
    /// Returns `Err(...)` if the data is malformed or a frame is larger or
    /// more deeply nested than allowed.
    pub fn decode(&mut self) -> Result<Option<Frame>, DecodeError> {
        loop {
            let (item, used) = match self.parse_item()? {
                Some(parsed) => parsed,
                None => {
                    if self.frame_len + self.buf.len() > self.max_frame_size {
                        return Err(frame_too_large());
                    }
                    return Ok(None);
                }
            };

            self.frame_len += used;
            if self.frame_len > self.max_frame_size {
                return Err(frame_too_large());
            }
            self.buf.advance(used);
            self.scanned = 0;

            let frame = match item {
                Item::Frame(frame) => frame,
                Item::ArrayHeader(len) => {
                    if self.stack.len() >= MAX_NESTING_DEPTH {
                        return Err(DecodeError::new(format!(
                            "array nesting deeper than {MAX_NESTING_DEPTH} levels"
                        )));
                    }
                    self.stack.push(PartialArray {
                        remaining: len,
                        items: Vec::with_capacity(len.min(MAX_PREALLOCATED_ITEMS)),
                    });
                    continue;
                }
            };

            if let Some(frame) = self.complete(frame) {
                self.frame_len = 0;
                return Ok(Some(frame));
            }
        }
    }

    /// Adds a finished element to the innermost open array, closing every
    /// array it completes. Returns the top-level frame once it is whole.
    fn complete(&mut self, mut frame: Frame) -> Option<Frame> {
        while let Some(parent) = self.stack.last_mut() {
            parent.items.push(frame);
            parent.remaining -= 1;
            if parent.remaining > 0 {
                return None;
            }
            let items = std::mem::take(&mut parent.items);
            self.stack.pop();
            frame = Frame::Array(items);
        }
        Some(frame)
    }

    /// Parses one scalar frame or array header at the start of the buffer
    /// without consuming anything.
    ///
    /// Returns the item and the number of bytes it occupies.
    fn parse_item(&mut self) -> Result<Option<(Item, usize)>, DecodeError> {
        let tag = match self.buf.first() {
            Some(tag) => *tag,
            None => return Ok(None),
        };
        let end = match self.find_crlf() {
            Some(end) => end,
            None => return Ok(None),
        };
        let line = &self.buf[1..end];
        let next = end + 2;

        let item = match tag {
            b'+' => Item::Frame(Frame::SimpleString(line.to_vec())),
            b'-' => Item::Frame(Frame::Error(line.to_vec())),
            b':' => Item::Frame(Frame::Integer(parse_int(line)?)),
            b'$' => return self.parse_bulk_string(parse_int(line)?, next),
            b'*' => self.parse_array_header(parse_int(line)?)?,
            other => {
                return Err(DecodeError::new(format!(
                    "unknown frame type: {}",
                    other as char
                )))
            }
        };
        Ok(Some((item, next)))
    }

    fn parse_bulk_string(
        &self,
        len: i64,
        start: usize,
    ) -> Result<Option<(Item, usize)>, DecodeError> {
        if len == -1 {
            return Ok(Some((Item::Frame(Frame::BulkString(None)), start)));
        }
        let len = usize::try_from(len)
            .map_err(|_| DecodeError::new("negative bulk string length"))?;

        if len > self.max_frame_size {
            return Err(DecodeError::new(
                "Bulk string length exceeds maximum frame size",
            ));
        }

        let end = start + len;
        if self.buf.len() < end + 2 {
            return Ok(None);
        }
        if &self.buf[end..end + 2] != b"\r\n" {
            return Err(DecodeError::new("bulk string is not terminated by CRLF"));
        }

        let data = Bytes::copy_from_slice(&self.buf[start..end]);
        Ok(Some((Item::Frame(Frame::BulkString(Some(data))), end + 2)))
    }

    fn parse_array_header(&self, len: i64) -> Result<Item, DecodeError> {
        match len {
            -1 => Ok(Item::Frame(Frame::Null)),
            0 => Ok(Item::Frame(Frame::Array(Vec::new()))),
            len => {
                let len = usize::try_from(len)
                    .map_err(|_| DecodeError::new("negative array length"))?;
                if len > self.max_frame_size / MIN_ELEMENT_SIZE {
                    return Err(DecodeError::new("Array length exceeds reasonable maximum"));
                }
                Ok(Item::ArrayHeader(len))
            }
        }
    }

    /// Finds the first CRLF after the type byte, resuming where the last
    /// unsuccessful search stopped.
    fn find_crlf(&mut self) -> Option<usize> {
        let from = self.scanned.max(1);
        match self
            .buf
            .get(from..)?
            .windows(2)
            .position(|w| w == b"\r\n")
        {
            Some(i) => Some(from + i),
            None => {
                // a trailing '\r' may still be completed by the next read
                self.scanned = self.buf.len().saturating_sub(1).max(1);
                None
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn frame_too_large() -> DecodeError {
    DecodeError::new("Frame exceeds maximum frame size")
}

fn parse_int(line: &[u8]) -> Result<i64, DecodeError> {
    std::str::from_utf8(line)
        .map_err(|e| DecodeError::new(e.to_string()))?
        .parse::<i64>()
        .map_err(|e| DecodeError::new(e.to_string()))
}
