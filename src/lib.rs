//! # Redpipe
//!
//! Async Redis client for Rust focused on batching: pipelines that send
//! many commands in one round trip, and MULTI/EXEC transactions with
//! optimistic locking through WATCH.
//!
//! Plain commands share one multiplexed connection. Every pipeline or
//! transaction checks out a dedicated connection from a bounded pool and
//! returns it when the batch is closed or dropped, so server-side
//! WATCH/MULTI state never leaks between callers.
//!
//! Queued commands hand back a [`Response`] placeholder whose value
//! becomes available once the batch is synced or executed.
//!
//! ## Example
//!
//! ```no_run
//! use redpipe::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect("redis://localhost:6379").await?;
//!
//!     let mut pipe = client.pipelined().await?;
//!     let set = pipe.set("seat:0", "#0");
//!     let get = pipe.get("seat:0");
//!     pipe.close().await?;
//!     assert_eq!(set.get()?, "OK");
//!     assert_eq!(get.get()?.as_deref(), Some(&b"#0"[..]));
//!
//!     let mut trans = client.transaction(false).await?;
//!     trans.watch(&["shellpath"]).await?;
//!     trans.multi().await?;
//!     trans.append("shellpath", ":/usr/mycmds/")?;
//!     match trans.exec().await? {
//!         Some(results) => println!("committed {} commands", results.len()),
//!         None => println!("shellpath changed, transaction aborted"),
//!     }
//!     trans.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `test-utils` - exposes [`testing::MockServer`], an in-process RESP2
//!   server with MULTI/EXEC/WATCH support

#![warn(missing_docs)]

pub(crate) mod core;
pub mod proto;

#[cfg(test)]
mod stress;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use crate::core::builder::ClientBuilder;
pub use crate::core::command::Cmd;
pub use crate::core::connection::ConnectionInfo;
pub use crate::core::pipeline::Pipeline;
pub use crate::core::pool::PoolConfig;
pub use crate::core::response::Response;
pub use crate::core::transaction::Transaction;
pub use crate::core::{Client, Error, Result};
