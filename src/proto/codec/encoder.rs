use bytes::{BufMut, BytesMut};

use crate::proto::frame::Frame;

/// A RESP encoder that converts [`Frame`] types to bytes.
///
/// The encoder accumulates data in an internal buffer, so a whole pipeline
/// or transaction can be encoded first and written with a single syscall.
///
/// # Example
///
/// ```
/// use redpipe::proto::codec::Encoder;
/// use redpipe::proto::frame::Frame;
///
/// let mut encoder = Encoder::new();
/// encoder.encode_all(&[
///     Frame::Array(vec![Frame::BulkString(Some("MULTI".into()))]),
///     Frame::Array(vec![Frame::BulkString(Some("EXEC".into()))]),
/// ]);
/// assert_eq!(&encoder.take()[..], b"*1\r\n$5\r\nMULTI\r\n*1\r\n$4\r\nEXEC\r\n");
/// ```
#[derive(Debug)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates a new encoder with an empty buffer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Encodes a frame into the internal buffer using RESP protocol.
    pub fn encode(&mut self, frame: &Frame) {
        match frame {
            Frame::SimpleString(s) => self.put_line(b'+', s),
            Frame::Error(e) => self.put_line(b'-', e),
            Frame::Integer(n) => self.put_line(b':', n.to_string().as_bytes()),
            Frame::BulkString(Some(data)) => {
                self.put_line(b'$', data.len().to_string().as_bytes());
                self.buf.extend_from_slice(data);
                self.buf.extend_from_slice(b"\r\n");
            }
            Frame::BulkString(None) | Frame::Null => self.buf.extend_from_slice(b"$-1\r\n"),
            Frame::Array(items) => {
                self.put_line(b'*', items.len().to_string().as_bytes());
                for item in items {
                    self.encode(item);
                }
            }
        }
    }

    /// Encodes a batch of frames back to back.
    pub fn encode_all<'a>(&mut self, frames: impl IntoIterator<Item = &'a Frame>) {
        for frame in frames {
            self.encode(frame);
        }
    }

    /// Takes the encoded data from the buffer, leaving it empty.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }

    fn put_line(&mut self, tag: u8, body: &[u8]) {
        self.buf.put_u8(tag);
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\r\n");
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_encode_simple_string() {
        let mut encoder = Encoder::new();
        encoder.encode(&Frame::SimpleString(b"QUEUED".to_vec()));
        assert_eq!(encoder.take().as_ref(), b"+QUEUED\r\n");
    }

    #[test]
    fn test_encode_error() {
        let mut encoder = Encoder::new();
        encoder.encode(&Frame::Error(b"ERR".to_vec()));
        assert_eq!(encoder.take().as_ref(), b"-ERR\r\n");
    }

    #[test]
    fn test_encode_integer() {
        let mut encoder = Encoder::new();
        encoder.encode(&Frame::Integer(-3));
        assert_eq!(encoder.take().as_ref(), b":-3\r\n");
    }

    #[test]
    fn test_encode_bulk_string() {
        let mut encoder = Encoder::new();
        encoder.encode(&Frame::BulkString(Some(Bytes::from("#0"))));
        assert_eq!(encoder.take().as_ref(), b"$2\r\n#0\r\n");
    }

    #[test]
    fn test_encode_nulls() {
        let mut encoder = Encoder::new();
        encoder.encode(&Frame::BulkString(None));
        encoder.encode(&Frame::Null);
        assert_eq!(encoder.take().as_ref(), b"$-1\r\n$-1\r\n");
    }

    #[test]
    fn test_encode_array() {
        let mut encoder = Encoder::new();
        encoder.encode(&Frame::Array(vec![
            Frame::BulkString(Some(Bytes::from("GET"))),
            Frame::BulkString(Some(Bytes::from("seat:3"))),
        ]));
        assert_eq!(
            encoder.take().as_ref(),
            b"*2\r\n$3\r\nGET\r\n$6\r\nseat:3\r\n"
        );
    }

    #[test]
    fn test_take_leaves_encoder_reusable() {
        let mut encoder = Encoder::new();
        encoder.encode(&Frame::Integer(1));
        let first = encoder.take();
        encoder.encode(&Frame::Integer(2));
        assert_eq!(first.as_ref(), b":1\r\n");
        assert_eq!(encoder.take().as_ref(), b":2\r\n");
    }
}
