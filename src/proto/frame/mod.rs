//! RESP2 frames: the values exchanged with the server, from status
//! replies like `QUEUED` to the array (or null) an EXEC answers with.

/// Frame type definitions.
pub mod types;

pub use types::Frame;
