use std::fmt;

use bytes::Bytes;

/// A RESP (Redis Serialization Protocol) frame.
///
/// This enum represents all frame types defined in RESP2:
/// - SimpleString: Status responses like "OK" or "QUEUED"
/// - Error: Error responses from the server
/// - Integer: Numeric responses
/// - BulkString: Binary-safe string data
/// - Array: Command arguments, array responses and EXEC results
/// - Null: NULL value (`*-1`, returned by an aborted EXEC)
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string (+OK).
    SimpleString(Vec<u8>),
    /// Error (-ERR).
    Error(Vec<u8>),
    /// Integer (:1000).
    Integer(i64),
    /// Bulk string ($6\r\nfoobar).
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...).
    Array(Vec<Frame>),
    /// Null ($-1 or *-1).
    Null,
}

impl Frame {
    /// Returns true for both null encodings (`Null` and a null bulk string).
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::BulkString(None))
    }

    /// Returns true if this frame is a server error.
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    /// Returns true if this is the given status reply (e.g. `OK`, `QUEUED`).
    pub fn is_status(&self, status: &str) -> bool {
        matches!(self, Frame::SimpleString(s) if s.as_slice() == status.as_bytes())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::SimpleString(s) | Frame::Error(s) => f.write_str(&String::from_utf8_lossy(s)),
            Frame::Integer(i) => write!(f, "{i}"),
            Frame::BulkString(Some(b)) => f.write_str(&String::from_utf8_lossy(b)),
            Frame::BulkString(None) | Frame::Null => f.write_str("nil"),
            Frame::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_display() {
        assert_eq!(Frame::SimpleString(b"OK".to_vec()).to_string(), "OK");
        assert_eq!(Frame::Integer(42).to_string(), "42");
        assert_eq!(Frame::Null.to_string(), "nil");
        assert_eq!(Frame::BulkString(None).to_string(), "nil");
        assert_eq!(
            Frame::BulkString(Some(Bytes::from("/usr/syscmds/"))).to_string(),
            "/usr/syscmds/"
        );
    }

    #[test]
    fn test_frame_array_display() {
        let frame = Frame::Array(vec![
            Frame::Integer(1),
            Frame::SimpleString(b"test".to_vec()),
            Frame::Null,
        ]);
        assert_eq!(frame.to_string(), "[1, test, nil]");
    }

    #[test]
    fn test_frame_is_null() {
        assert!(Frame::Null.is_null());
        assert!(Frame::BulkString(None).is_null());
        assert!(!Frame::Integer(42).is_null());
        assert!(!Frame::Array(vec![]).is_null());
    }

    #[test]
    fn test_frame_is_status() {
        assert!(Frame::SimpleString(b"QUEUED".to_vec()).is_status("QUEUED"));
        assert!(!Frame::SimpleString(b"OK".to_vec()).is_status("QUEUED"));
        assert!(!Frame::BulkString(Some(Bytes::from("OK"))).is_status("OK"));
    }

    #[test]
    fn test_frame_is_error() {
        assert!(Frame::Error(b"ERR".to_vec()).is_error());
        assert!(!Frame::SimpleString(b"ERR".to_vec()).is_error());
    }
}
